use log::info;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::check::RetryPolicy;
use crate::error::Error;

const CONFIG_ENV: &str = "HEALTHCHECK_CONFIG";

/// Longest accepted monitor interval.
pub const MAX_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Table,
}

/// On-disk configuration; every field has a default.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub check: CheckOptions,
    pub monitor: MonitorOptions,
    pub log: LogOptions,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CheckOptions {
    pub threshold_secs: f64,
    pub retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: Option<u64>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            threshold_secs: 0.5,
            retries: 3,
            backoff_ms: 2000,
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorOptions {
    pub interval_secs: u64,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self { interval_secs: 2 }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogOptions {
    pub file: PathBuf,
    pub output: OutputFormat,
    pub max_size_mb: u64,
    pub max_backups: u32,
    /// Rotated files older than this are removed; zero keeps them regardless of age.
    pub max_age_days: u64,
    pub compress: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            file: PathBuf::from("healthcheck.log"),
            output: OutputFormat::Text,
            max_size_mb: 10,
            max_backups: 3,
            max_age_days: 28,
            compress: true,
        }
    }
}

impl Config {
    /// Loads the configuration file.
    ///
    /// An explicit path (flag or `HEALTHCHECK_CONFIG`, `.env` included) must
    /// exist. The per-user default location is optional and falls back to
    /// built-in defaults when absent.
    ///
    /// # Errors
    ///
    /// Fails when an explicit file is missing or any file fails to parse.
    pub fn load(explicit: Option<&Path>) -> Result<Config, Error> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(path) = dotenvy::var(CONFIG_ENV) {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(path),
            _ => Ok(Config::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("healthcheck").join("config.toml"))
    }

    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid TOML for [`Config`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config, Error> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }
}

/// Values given on the command line; `None` keeps the file's value.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub threshold_secs: Option<f64>,
    pub retries: Option<u32>,
    pub logfile: Option<PathBuf>,
    pub output: Option<OutputFormat>,
    pub silent: bool,
    pub verbose: bool,
    pub interval: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub file: PathBuf,
    pub output: OutputFormat,
    pub silent: bool,
    pub verbose: bool,
    pub max_size_bytes: u64,
    pub max_backups: u32,
    pub max_age: Option<Duration>,
    pub compress: bool,
}

/// Resolved, immutable settings for one process.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub threshold: Duration,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
    pub interval: Duration,
    pub log: LogSettings,
}

impl Settings {
    /// Layers command-line overrides over the file configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a negative or non-finite threshold, or a
    /// monitor interval that is zero or longer than [`MAX_INTERVAL`].
    pub fn resolve(config: Config, overrides: &Overrides) -> Result<Settings, Error> {
        let threshold_secs = overrides
            .threshold_secs
            .unwrap_or(config.check.threshold_secs);
        let threshold = Duration::try_from_secs_f64(threshold_secs)
            .map_err(|e| Error::Config(format!("invalid threshold {threshold_secs}: {e}")))?;

        let interval = overrides
            .interval
            .unwrap_or(Duration::from_secs(config.monitor.interval_secs));
        if interval.is_zero() {
            return Err(Error::Config("monitor interval must be positive".to_string()));
        }
        if interval > MAX_INTERVAL {
            return Err(Error::Config(format!(
                "monitor interval {interval:?} exceeds the maximum of {MAX_INTERVAL:?}"
            )));
        }

        let output = overrides.output.unwrap_or(config.log.output);
        // The table owns stdout, so records only go to the file and stay terse.
        let (silent, verbose) = if output == OutputFormat::Table {
            (true, false)
        } else {
            (overrides.silent, overrides.verbose)
        };

        Ok(Settings {
            threshold,
            retry: RetryPolicy {
                max_retries: overrides.retries.unwrap_or(config.check.retries),
                backoff: Duration::from_millis(config.check.backoff_ms),
            },
            timeout: config.check.timeout_secs.map(Duration::from_secs),
            interval,
            log: LogSettings {
                file: overrides.logfile.clone().unwrap_or(config.log.file),
                output,
                silent,
                verbose,
                max_size_bytes: config.log.max_size_mb.saturating_mul(1024 * 1024),
                max_backups: config.log.max_backups,
                max_age: (config.log.max_age_days > 0).then(|| {
                    Duration::from_secs(config.log.max_age_days.saturating_mul(24 * 60 * 60))
                }),
                compress: config.log.compress,
            },
        })
    }
}
