use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, SecondsFormat, Utc};
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{LogSettings, OutputFormat};
use crate::outcome::{CheckOutcome, Classification, TerminalError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

impl Severity {
    fn as_str(self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "DEBUG" => Some(Severity::Debug),
            "INFO" => Some(Severity::Info),
            "WARN" => Some(Severity::Warn),
            "ERROR" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// Line encoding shared by every destination of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Text,
    Json,
}

impl From<OutputFormat> for Format {
    fn from(output: OutputFormat) -> Self {
        match output {
            OutputFormat::Json => Format::Json,
            OutputFormat::Text | OutputFormat::Table => Format::Text,
        }
    }
}

/// One line in the console or durable log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    pub time: DateTime<Utc>,
    pub level: Severity,
    pub msg: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Elapsed nanoseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(default, rename = "err", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LogRecord {
    pub fn event(level: Severity, msg: &str, url: &str) -> Self {
        Self {
            time: Utc::now(),
            level,
            msg: msg.to_string(),
            url: url.to_string(),
            status_code: None,
            duration: None,
            attempt: None,
            retries: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status_code: u16, elapsed: Duration) -> Self {
        self.status_code = Some(status_code);
        self.duration = Some(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));
        self
    }

    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Final record for a finished check.
    pub fn from_outcome(outcome: &CheckOutcome) -> Self {
        let url = outcome.target.as_str();
        let record = match (&outcome.classification, &outcome.error) {
            (Classification::Success, _) => {
                LogRecord::event(Severity::Info, "successful check", url)
            }
            (Classification::Slow, _) => LogRecord::event(Severity::Warn, "exceeded threshold", url),
            (Classification::Failure, Some(TerminalError::Cancelled)) => {
                LogRecord::event(Severity::Error, "check cancelled", url)
                    .with_attempt(outcome.attempts.saturating_sub(1))
            }
            (Classification::Failure, Some(TerminalError::RequestConstruction(e))) => {
                LogRecord::event(Severity::Error, "failed to create request", url).with_error(e)
            }
            (Classification::Failure, Some(TerminalError::Exhausted { last_error })) => {
                LogRecord::event(Severity::Error, "fetching error", url)
                    .with_retries(outcome.attempts.saturating_sub(1))
                    .with_error(last_error)
            }
            (Classification::Failure, None) => LogRecord::event(Severity::Error, "fetching error", url),
        };
        let mut record = match outcome.status_code {
            Some(code) => record.with_status(code, outcome.elapsed),
            None => record,
        };
        record.time = outcome.timestamp;
        record
    }

    /// Encodes the record as a single line without the trailing newline.
    ///
    /// # Errors
    ///
    /// Only the JSON encoding can fail.
    pub fn encode(&self, format: Format) -> Result<String, serde_json::Error> {
        match format {
            Format::Json => serde_json::to_string(self),
            Format::Text => Ok(self.to_text()),
        }
    }

    fn to_text(&self) -> String {
        let mut fields = vec![
            ("time", self.time.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            ("level", self.level.as_str().to_string()),
            ("msg", self.msg.clone()),
            ("url", self.url.clone()),
        ];
        if let Some(code) = self.status_code {
            fields.push(("statusCode", code.to_string()));
        }
        if let Some(duration) = self.duration {
            fields.push(("duration", duration.to_string()));
        }
        if let Some(attempt) = self.attempt {
            fields.push(("attempt", attempt.to_string()));
        }
        if let Some(retries) = self.retries {
            fields.push(("retries", retries.to_string()));
        }
        if let Some(error) = &self.error {
            fields.push(("err", error.clone()));
        }

        fields
            .iter()
            .map(|(key, value)| format!("{key}={}", quote(value)))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Reads back a line produced by the text encoding.
    pub fn parse_text(line: &str) -> Option<Self> {
        let mut record = LogRecord::event(Severity::Info, "", "");
        let mut time = None;
        let mut level = None;
        for (key, value) in split_pairs(line)? {
            match key.as_str() {
                "time" => time = Some(DateTime::parse_from_rfc3339(&value).ok()?.to_utc()),
                "level" => level = Some(Severity::parse(&value)?),
                "msg" => record.msg = value,
                "url" => record.url = value,
                "statusCode" => record.status_code = Some(value.parse().ok()?),
                "duration" => record.duration = Some(value.parse().ok()?),
                "attempt" => record.attempt = Some(value.parse().ok()?),
                "retries" => record.retries = Some(value.parse().ok()?),
                "err" => record.error = Some(value),
                _ => {}
            }
        }
        record.time = time?;
        record.level = level?;
        Some(record)
    }
}

fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '=' || c == '\\');
    if !needs_quotes {
        return value.to_string();
    }
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        match c {
            '"' | '\\' => {
                quoted.push('\\');
                quoted.push(c);
            }
            '\n' => quoted.push_str("\\n"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

fn split_pairs(line: &str) -> Option<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut chars = line.trim().chars().peekable();
    while chars.peek().is_some() {
        let key: String = chars.by_ref().take_while(|&c| c != '=').collect();
        if key.is_empty() {
            return None;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => match chars.next()? {
                        'n' => value.push('\n'),
                        other => value.push(other),
                    },
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return None;
            }
            if chars.next().is_some_and(|c| c != ' ') {
                return None;
            }
        } else {
            value = chars.by_ref().take_while(|&c| c != ' ').collect();
        }
        pairs.push((key, value));
        while chars.peek() == Some(&' ') {
            chars.next();
        }
    }
    Some(pairs)
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write to {destination}: {source}")]
    Write {
        destination: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{} of {attempted} destinations failed: {}", .failures.len(), describe(.failures))]
    Partial {
        attempted: usize,
        failures: Vec<SinkError>,
    },
}

fn describe(failures: &[SinkError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A destination that accepts encoded record lines.
pub trait Sink: Send + Sync {
    fn name(&self) -> String;

    /// # Errors
    ///
    /// Returns [`SinkError::Write`] when the destination rejects the line.
    fn write_line(&self, line: &str) -> Result<(), SinkError>;
}

/// Interactive destination, stdout in practice.
pub struct ConsoleSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> String {
        "console".to_string()
    }

    fn write_line(&self, line: &str) -> Result<(), SinkError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{line}")
            .and_then(|()| writer.flush())
            .map_err(|source| SinkError::Write {
                destination: self.name(),
                source,
            })
    }
}

/// Size, count and age limits for the durable log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rotation {
    /// Zero disables size-based rotation.
    pub max_bytes: u64,
    pub max_backups: usize,
    pub max_age: Option<Duration>,
    pub compress: bool,
}

impl From<&LogSettings> for Rotation {
    fn from(settings: &LogSettings) -> Self {
        Self {
            max_bytes: settings.max_size_bytes,
            max_backups: usize::try_from(settings.max_backups).unwrap_or(usize::MAX),
            max_age: settings.max_age,
            compress: settings.compress,
        }
    }
}

struct OpenLog {
    writer: FileRotate<AppendCount>,
    size: u64,
}

/// Append-only durable log rotated by size, with numbered (optionally
/// gzipped) backups pruned by count and age.
///
/// The file is opened on first write so an unwritable path only surfaces as
/// a [`SinkError`] on that write.
pub struct FileSink {
    path: PathBuf,
    rotation: Rotation,
    state: Mutex<Option<OpenLog>>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>, rotation: Rotation) -> Self {
        Self {
            path: path.into(),
            rotation,
            state: Mutex::new(None),
        }
    }

    fn open(&self) -> io::Result<OpenLog> {
        if let Some(max_age) = self.rotation.max_age {
            prune_expired(&self.path, max_age)?;
        }
        // FileRotate panics on a directory it cannot create, so the path is
        // checked here first.
        let size = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .metadata()?
            .len();

        let content_limit = match usize::try_from(self.rotation.max_bytes) {
            Ok(0) => ContentLimit::None,
            Ok(bytes) => ContentLimit::BytesSurpassed(bytes),
            Err(_) => ContentLimit::BytesSurpassed(usize::MAX),
        };
        let compression = if self.rotation.compress {
            Compression::OnRotate(0)
        } else {
            Compression::None
        };
        let writer = FileRotate::new(
            &self.path,
            AppendCount::new(self.rotation.max_backups),
            content_limit,
            compression,
            #[cfg(unix)]
            None,
        );
        Ok(OpenLog { writer, size })
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_none() {
            *state = Some(self.open()?);
        }

        let mut rotated = false;
        if let Some(open) = state.as_mut() {
            // One write call per line keeps a record from straddling two files.
            open.writer.write_all(format!("{line}\n").as_bytes())?;
            open.writer.flush()?;
            // A file smaller than before plus this line was just replaced.
            let size = fs::metadata(&self.path)?.len();
            rotated = size < open.size + line.len() as u64 + 1;
            open.size = size;
        }

        if rotated && let Some(max_age) = self.rotation.max_age {
            debug!("{} rotated, pruning backups older than {max_age:?}", self.path.display());
            // Reopened on the next write so the writer rescans what is left.
            *state = None;
            prune_expired(&self.path, max_age)?;
        }
        Ok(())
    }
}

/// Removes numbered backups of `path` last modified more than `max_age` ago.
fn prune_expired(path: &Path, max_age: Duration) -> io::Result<()> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(());
    };
    let prefix = format!("{name}.");
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    let now = SystemTime::now();
    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(suffix) = file_name.to_str().and_then(|n| n.strip_prefix(&prefix)) else {
            continue;
        };
        if !suffix.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if now.duration_since(modified).is_ok_and(|age| age > max_age) {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

impl Sink for FileSink {
    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn write_line(&self, line: &str) -> Result<(), SinkError> {
        self.append(line).map_err(|source| SinkError::Write {
            destination: self.name(),
            source,
        })
    }
}

/// Writes every line to each inner destination, even after one fails.
#[derive(Default)]
pub struct FanOut {
    sinks: Vec<Box<dyn Sink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, sink: impl Sink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Sink for FanOut {
    fn name(&self) -> String {
        self.sinks
            .iter()
            .map(|s| s.name())
            .collect::<Vec<_>>()
            .join("+")
    }

    fn write_line(&self, line: &str) -> Result<(), SinkError> {
        let failures: Vec<SinkError> = self
            .sinks
            .iter()
            .filter_map(|sink| sink.write_line(line).err())
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SinkError::Partial {
                attempted: self.sinks.len(),
                failures,
            })
        }
    }
}

/// Level filter and encoding in front of the destinations.
pub struct Logger {
    sink: FanOut,
    format: Format,
    min_level: Severity,
}

impl Logger {
    pub fn new(sink: FanOut, format: Format, min_level: Severity) -> Self {
        Self {
            sink,
            format,
            min_level,
        }
    }

    /// Wires the destinations described by the log settings: the durable file
    /// always, the console unless silent.
    pub fn from_settings(settings: &LogSettings) -> Self {
        let mut sink = FanOut::new();
        if !settings.silent {
            sink = sink.with(ConsoleSink::stdout());
        }
        sink = sink.with(FileSink::new(&settings.file, Rotation::from(settings)));
        let min_level = if settings.verbose {
            Severity::Debug
        } else {
            Severity::Info
        };
        Self::new(sink, settings.output.into(), min_level)
    }

    pub fn enabled(&self, level: Severity) -> bool {
        level >= self.min_level
    }

    /// Encodes and writes one record.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] naming the destinations that failed; the
    /// others still received the line.
    pub fn record(&self, record: &LogRecord) -> Result<(), SinkError> {
        if !self.enabled(record.level) {
            return Ok(());
        }
        let line = record.encode(self.format)?;
        self.sink.write_line(&line)
    }

    /// Like [`Logger::record`] but downgrades a write failure to a warning.
    pub fn emit(&self, record: &LogRecord) {
        if let Err(e) = self.record(record) {
            warn!("Failed to record {:?} for {}: {e}", record.msg, record.url);
        }
    }

    pub fn record_outcome(&self, outcome: &CheckOutcome) {
        self.emit(&LogRecord::from_outcome(outcome));
    }
}
