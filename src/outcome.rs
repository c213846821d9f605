use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::probe::ProbeResponse;
use crate::target::Target;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Success,
    Slow,
    Failure,
}

/// Boolean view used by the table: `Up` only for a 2xx response.
/// A slow 2xx is still `Up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Up,
    Down,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Up => f.write_str("Up"),
            Health::Down => f.write_str("Down"),
        }
    }
}

/// Why a check ended without a usable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalError {
    /// Every permitted attempt failed at the transport level.
    Exhausted { last_error: String },
    /// The request could not be built; never retried.
    RequestConstruction(String),
    /// The shared cancellation token fired mid-check.
    Cancelled,
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalError::Exhausted { last_error } => write!(f, "retries exhausted: {last_error}"),
            TerminalError::RequestConstruction(e) => write!(f, "failed to create request: {e}"),
            TerminalError::Cancelled => f.write_str("check cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckOutcome {
    pub target: Target,
    pub timestamp: DateTime<Utc>,
    pub status_code: Option<u16>,
    pub elapsed: Duration,
    pub classification: Classification,
    pub attempts: u32,
    pub error: Option<TerminalError>,
}

impl CheckOutcome {
    pub(crate) fn responded(
        target: &Target,
        response: ProbeResponse,
        threshold: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            target: target.clone(),
            timestamp: Utc::now(),
            status_code: Some(response.status_code),
            elapsed: response.elapsed,
            classification: classify(&response, threshold),
            attempts,
            error: None,
        }
    }

    pub(crate) fn failed(
        target: &Target,
        elapsed: Duration,
        attempts: u32,
        error: TerminalError,
    ) -> Self {
        Self {
            target: target.clone(),
            timestamp: Utc::now(),
            status_code: None,
            elapsed,
            classification: Classification::Failure,
            attempts,
            error: Some(error),
        }
    }

    pub fn health(&self) -> Health {
        match self.status_code {
            Some(code) if (200..300).contains(&code) => Health::Up,
            _ => Health::Down,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(self.error, Some(TerminalError::Cancelled))
    }
}

/// Slow means strictly over the threshold; equal counts as on time.
pub fn classify(response: &ProbeResponse, threshold: Duration) -> Classification {
    if response.elapsed > threshold {
        Classification::Slow
    } else {
        Classification::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::validate;

    fn response(status_code: u16, millis: u64) -> ProbeResponse {
        ProbeResponse {
            status_code,
            elapsed: Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_threshold_is_strict() {
        let threshold = Duration::from_millis(500);
        assert_eq!(classify(&response(200, 499), threshold), Classification::Success);
        assert_eq!(classify(&response(200, 500), threshold), Classification::Success);
        assert_eq!(classify(&response(200, 501), threshold), Classification::Slow);
    }

    #[test]
    fn test_slow_response_is_still_up() {
        let target = validate("http://example.com").unwrap();
        let outcome = CheckOutcome::responded(&target, response(200, 50), Duration::from_millis(10), 1);
        assert_eq!(outcome.classification, Classification::Slow);
        assert_eq!(outcome.health(), Health::Up);
    }

    #[test]
    fn test_server_error_is_down_but_classified_by_time() {
        let target = validate("http://www.tripadvisor.com").unwrap();
        let outcome = CheckOutcome::responded(&target, response(500, 100), Duration::from_secs(2), 1);
        assert_eq!(outcome.classification, Classification::Success);
        assert_eq!(outcome.health(), Health::Down);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_failed_outcome_is_down() {
        let target = validate("http://example.com").unwrap();
        let outcome = CheckOutcome::failed(&target, Duration::ZERO, 1, TerminalError::Cancelled);
        assert_eq!(outcome.classification, Classification::Failure);
        assert_eq!(outcome.health(), Health::Down);
        assert!(outcome.was_cancelled());
    }
}
