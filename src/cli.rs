//! Command-line interface for healthcheck
//!
//! Parses arguments, resolves settings and wires the checker, logger and
//! table together for each subcommand.

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::{Config, OutputFormat, Overrides, Settings};
use crate::error::Error;
use crate::history::{HistoryFilter, parse_start_date, replay_file};
use crate::probe::HttpProbe;
use crate::sink::Logger;
use crate::table::TableRenderer;
use crate::target::validate_all;
use crate::worker::{monitor, run_tick};

/// A tool for monitoring health status and responsiveness of web applications
#[derive(Parser, Debug)]
#[command(name = "healthcheck")]
#[command(version)]
#[command(
    long_about = "Sends HTTP requests to the given URLs, reports whether each service \
    is reachable and how quickly it responds, and records every result to a log file. \
    Supports one-off checks, continuous monitoring and replaying past results."
)]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// File to log output to
    #[arg(long, global = true)]
    pub logfile: Option<PathBuf>,

    /// Seconds after which a response counts as too slow
    #[arg(long, global = true)]
    pub threshold: Option<f64>,

    /// Number of retries for a failed request
    #[arg(long, global = true)]
    pub retries: Option<u32>,

    /// Only write to the log file, not stdout
    #[arg(long, global = true)]
    pub silent: bool,

    /// Also record debug detail such as request attempts
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, value_enum)]
    pub output: Option<OutputFormat>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check the health of the given URL(s) once; reads URLs from stdin when none are given
    Check { urls: Vec<String> },
    /// Monitor the health of the given URL(s) at a fixed interval
    Monitor {
        #[arg(required = true)]
        urls: Vec<String>,

        /// Interval between health checks, e.g. 500ms, 2s, 1m30s
        #[arg(long, value_parser = parse_interval)]
        interval: Option<Duration>,
    },
    /// Display logged results for the given URL(s) since a date
    History {
        /// Start date (format: MM/DD/YYYY, UTC)
        #[arg(long = "startDate", value_parser = parse_start_date)]
        start_date: NaiveDate,

        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print version
    Version,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let interval = match &self.command {
            Command::Monitor { interval, .. } => *interval,
            _ => None,
        };
        Overrides {
            threshold_secs: self.threshold,
            retries: self.retries,
            logfile: self.logfile.clone(),
            output: self.output,
            silent: self.silent,
            verbose: self.verbose,
            interval,
        }
    }

    /// Fills an empty `check` URL list from `reader`.
    fn read_missing_urls<R: BufRead>(&mut self, reader: R) -> Result<(), Error> {
        if let Command::Check { urls } = &mut self.command
            && urls.is_empty()
        {
            *urls = read_urls(reader)?;
        }
        Ok(())
    }
}

/// Parses one or more `<number><unit>` terms such as `500ms`, `1m30s` or
/// `1.5h`, with units `ms`, `s`, `m` and `h`. A lone bare number is seconds.
fn parse_interval(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut secs = 0.0;
    let mut rest = input;
    while !rest.is_empty() {
        let split = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(split);
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid duration {input:?}"))?;
        let split = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(split);
        secs += match unit {
            "ms" => value / 1000.0,
            "s" => value,
            "m" => value * 60.0,
            "h" => value * 3600.0,
            "" if number.len() == input.len() => value,
            "" => return Err(format!("missing duration unit in {input:?}")),
            other => return Err(format!("unknown duration unit {other:?} in {input:?}")),
        };
        rest = tail;
    }

    let duration = Duration::try_from_secs_f64(secs).map_err(|e| e.to_string())?;
    if duration.is_zero() {
        return Err("interval must be positive".to_string());
    }
    Ok(duration)
}

/// Fires on Ctrl-C, and on SIGTERM where available.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Interrupt received, cancelling");
        trigger.cancel();
    });
    token
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {e}");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Runs the parsed command and maps the result to a process exit code.
pub async fn run(mut cli: Cli) -> ExitCode {
    // Prompt before installing the signal handler so Ctrl-C at the prompt
    // still ends the process.
    let result = match cli.read_missing_urls(io::stdin().lock()) {
        Ok(()) => execute(cli, &shutdown_token()).await,
        Err(e) => Err(e),
    };
    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

/// Runs a fully specified command; `check` URLs must already be present.
///
/// # Errors
///
/// Invalid targets, configuration problems and unreadable history files are
/// returned to the caller; check failures are reported through the exit code.
pub async fn execute(cli: Cli, token: &CancellationToken) -> Result<ExitCode, Error> {
    let overrides = cli.overrides();
    let settings = || -> Result<Settings, Error> {
        Settings::resolve(Config::load(cli.config.as_deref())?, &overrides)
    };

    match cli.command {
        Command::Check { urls } => check(&urls, &settings()?, token).await,
        Command::Monitor { urls, .. } => watch(&urls, &settings()?, token).await,
        Command::History { start_date, urls } => history(&urls, start_date, &settings()?),
        Command::Version => {
            print_version();
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn check(
    urls: &[String],
    settings: &Settings,
    token: &CancellationToken,
) -> Result<ExitCode, Error> {
    if urls.is_empty() {
        return Err(Error::Config("no URLs to check".to_string()));
    }
    let targets = validate_all(urls)?;

    let logger = Logger::from_settings(&settings.log);
    let probe = HttpProbe::new(settings.timeout)?;
    let tick = run_tick(&probe, &targets, settings, &logger, token).await;

    if settings.log.output == OutputFormat::Table {
        let color = io::stdout().is_terminal();
        let mut table = TableRenderer::for_check(Box::new(io::stdout()), color);
        if let Err(e) = table.render(&tick.outcomes) {
            warn!("Failed to render status table: {e}");
        }
    }

    let failed = tick.cancelled || tick.outcomes.iter().any(|o| o.error.is_some());
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn watch(
    urls: &[String],
    settings: &Settings,
    token: &CancellationToken,
) -> Result<ExitCode, Error> {
    let targets = validate_all(urls)?;
    let logger = Logger::from_settings(&settings.log);
    let probe = HttpProbe::new(settings.timeout)?;

    let mut table = (settings.log.output == OutputFormat::Table).then(|| {
        let color = io::stdout().is_terminal();
        TableRenderer::for_monitor(Box::new(io::stdout()), color)
    });

    let report = monitor(&probe, &targets, settings, &logger, table.as_mut(), token).await;
    info!("Monitoring stopped after {} ticks", report.ticks);
    Ok(ExitCode::from(report.exit.exit_code()))
}

fn history(urls: &[String], start: NaiveDate, settings: &Settings) -> Result<ExitCode, Error> {
    let filter = HistoryFilter::new(urls, start);
    let mut out = io::stdout().lock();
    replay_file(&settings.log.file, &filter, &mut out)?;
    out.flush()?;
    Ok(ExitCode::SUCCESS)
}

/// Reads one URL per line until a blank line or end of input.
fn read_urls<R: BufRead>(reader: R) -> Result<Vec<String>, Error> {
    eprintln!("Enter URLs to check, one per line. Press Enter twice to finish:");
    let mut urls = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let url = line.trim();
        if url.is_empty() {
            break;
        }
        urls.push(url.to_string());
    }
    Ok(urls)
}

fn print_version() {
    let profile = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    println!("Version {}\nBuild profile: {profile}", env!("CARGO_PKG_VERSION"));
}
