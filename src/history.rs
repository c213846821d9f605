use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use log::{info, warn};

use crate::error::Error;
use crate::sink::LogRecord;

pub const START_DATE_FORMAT: &str = "%m/%d/%Y";

/// Parses a `MM/DD/YYYY` start date.
///
/// # Errors
///
/// Returns [`Error::DateParse`] for anything else.
pub fn parse_start_date(input: &str) -> Result<NaiveDate, Error> {
    Ok(NaiveDate::parse_from_str(input, START_DATE_FORMAT)?)
}

/// Decodes a durable log line in either output format.
pub fn parse_line(line: &str) -> Option<LogRecord> {
    let line = line.trim();
    if line.starts_with('{') {
        serde_json::from_str(line).ok()
    } else {
        LogRecord::parse_text(line)
    }
}

/// Selects records for a set of URLs logged after midnight UTC of a date.
pub struct HistoryFilter {
    urls: HashSet<String>,
    after: DateTime<Utc>,
}

impl HistoryFilter {
    /// Only the listed URLs match; an empty list selects nothing.
    pub fn new<S: AsRef<str>>(urls: &[S], start: NaiveDate) -> Self {
        Self {
            urls: urls.iter().map(|u| u.as_ref().to_string()).collect(),
            after: start.and_time(NaiveTime::MIN).and_utc(),
        }
    }

    pub fn matches(&self, record: &LogRecord) -> bool {
        self.urls.contains(&record.url) && record.time > self.after
    }
}

/// Copies every matching line of `reader` to `out` unchanged and returns the
/// decoded matches. Lines that decode as neither format are skipped.
///
/// # Errors
///
/// Fails on read or write errors.
pub fn replay<R: BufRead, W: Write>(
    reader: R,
    filter: &HistoryFilter,
    out: &mut W,
) -> Result<Vec<LogRecord>, Error> {
    let mut matches = Vec::new();
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Some(record) = parse_line(&line) else {
            warn!("Skipping unparseable log line {}", number + 1);
            continue;
        };
        if filter.matches(&record) {
            writeln!(out, "{line}")?;
            matches.push(record);
        }
    }
    Ok(matches)
}

/// [`replay`] over the durable log file.
///
/// # Errors
///
/// Fails if the file cannot be opened or read.
pub fn replay_file<W: Write>(
    path: &Path,
    filter: &HistoryFilter,
    out: &mut W,
) -> Result<Vec<LogRecord>, Error> {
    let file = File::open(path)?;
    let matches = replay(BufReader::new(file), filter, out)?;
    info!("Found {} matching records in {}", matches.len(), path.display());
    Ok(matches)
}
