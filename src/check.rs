use std::time::{Duration, Instant};

use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::outcome::{CheckOutcome, TerminalError};
use crate::probe::{Probe, ProbeError};
use crate::sink::{LogRecord, Logger, Severity};
use crate::target::Target;

/// Bounded retries with a fixed, jitter-free wait between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Runs one check of `target`: up to `max_retries + 1` attempts, stopping at
/// the first response of any status.
///
/// Only transport failures are retried. A request that cannot be built ends
/// the check at once, and the token firing during an attempt or a backoff
/// wait ends it with [`TerminalError::Cancelled`]. Every step is recorded
/// through `logger`, the final outcome included.
pub async fn execute<P: Probe>(
    probe: &P,
    target: &Target,
    policy: &RetryPolicy,
    threshold: Duration,
    logger: &Logger,
    token: &CancellationToken,
) -> CheckOutcome {
    let url = target.as_str();
    let started = Instant::now();
    let mut last_error = String::new();

    for attempt in 0..=policy.max_retries {
        logger.emit(&LogRecord::event(Severity::Debug, "request details", url).with_attempt(attempt));

        match probe.probe(target, token).await {
            Ok(response) => {
                let outcome = CheckOutcome::responded(target, response, threshold, attempt + 1);
                logger.record_outcome(&outcome);
                return outcome;
            }
            Err(ProbeError::Cancelled) => {
                return finish(target, started, attempt + 1, TerminalError::Cancelled, logger);
            }
            Err(ProbeError::RequestConstructionFailed(e)) => {
                return finish(
                    target,
                    started,
                    attempt + 1,
                    TerminalError::RequestConstruction(e),
                    logger,
                );
            }
            Err(ProbeError::TransportFailed(e)) => {
                logger.emit(
                    &LogRecord::event(Severity::Error, "failed to perform request", url)
                        .with_attempt(attempt)
                        .with_error(&e),
                );
                last_error = e;
            }
        }

        if attempt == policy.max_retries {
            break;
        }

        logger.emit(&LogRecord::event(Severity::Info, "backing off", url).with_attempt(attempt));
        select! {
            biased;
            () = token.cancelled() => {
                return finish(target, started, attempt + 1, TerminalError::Cancelled, logger);
            }
            () = sleep(policy.backoff) => {}
        }
    }

    finish(
        target,
        started,
        policy.max_retries + 1,
        TerminalError::Exhausted { last_error },
        logger,
    )
}

fn finish(
    target: &Target,
    started: Instant,
    attempts: u32,
    error: TerminalError,
    logger: &Logger,
) -> CheckOutcome {
    let outcome = CheckOutcome::failed(target, started.elapsed(), attempts, error);
    logger.record_outcome(&outcome);
    outcome
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::outcome::{Classification, Health};
    use crate::probe::ProbeResponse;
    use crate::sink::tests::SharedBuffer;
    use crate::sink::{ConsoleSink, FanOut, Format};
    use crate::target::validate;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Replays canned results, then fails at the transport level forever.
    #[derive(Default)]
    pub(crate) struct ScriptedProbe {
        script: Mutex<VecDeque<Result<ProbeResponse, ProbeError>>>,
        calls: AtomicU32,
        cancel_on_call: Option<(u32, CancellationToken)>,
    }

    impl ScriptedProbe {
        pub(crate) fn new(script: Vec<Result<ProbeResponse, ProbeError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Self::default()
            }
        }

        pub(crate) fn always_failing() -> Self {
            Self::default()
        }

        /// Fires `token` when the `n`th call (1-based) starts.
        pub(crate) fn cancelling_on(mut self, n: u32, token: CancellationToken) -> Self {
            self.cancel_on_call = Some((n, token));
            self
        }

        pub(crate) fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Probe for ScriptedProbe {
        async fn probe(
            &self,
            _target: &Target,
            token: &CancellationToken,
        ) -> Result<ProbeResponse, ProbeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((n, cancel)) = &self.cancel_on_call {
                if *n == call {
                    cancel.cancel();
                }
            }
            if token.is_cancelled() {
                return Err(ProbeError::Cancelled);
            }
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProbeError::TransportFailed("connection refused".into())))
        }
    }

    pub(crate) fn ok(status_code: u16, millis: u64) -> Result<ProbeResponse, ProbeError> {
        Ok(ProbeResponse {
            status_code,
            elapsed: Duration::from_millis(millis),
        })
    }

    pub(crate) fn test_logger() -> (Logger, SharedBuffer) {
        let buffer = SharedBuffer::default();
        let logger = Logger::new(
            FanOut::new().with(ConsoleSink::new(Box::new(buffer.clone()))),
            Format::Text,
            Severity::Debug,
        );
        (logger, buffer)
    }

    fn policy(max_retries: u32, backoff_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(backoff_ms),
        }
    }

    #[tokio::test]
    async fn test_successful_first_attempt() {
        let probe = ScriptedProbe::new(vec![ok(200, 100)]);
        let target = validate("http://example.com").unwrap();
        let (logger, buffer) = test_logger();

        let outcome = execute(
            &probe,
            &target,
            &policy(1, 10),
            Duration::from_secs(2),
            &logger,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(probe.calls(), 1);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.classification, Classification::Success);
        assert_eq!(outcome.health(), Health::Up);
        assert!(buffer.contents().contains("msg=\"successful check\""));
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let probe = ScriptedProbe::new(vec![ok(500, 100)]);
        let target = validate("http://www.tripadvisor.com").unwrap();
        let (logger, _) = test_logger();

        let outcome = execute(
            &probe,
            &target,
            &policy(1, 10),
            Duration::from_secs(2),
            &logger,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(probe.calls(), 1);
        assert_eq!(outcome.health(), Health::Down);
        assert_eq!(outcome.classification, Classification::Success);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_slow_response_exceeds_threshold() {
        let probe = ScriptedProbe::new(vec![ok(200, 50)]);
        let target = validate("http://www.tripadvisor.com").unwrap();
        let (logger, buffer) = test_logger();

        let outcome = execute(
            &probe,
            &target,
            &policy(1, 10),
            Duration::from_millis(10),
            &logger,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.classification, Classification::Slow);
        assert_eq!(outcome.health(), Health::Up);
        assert!(buffer.contents().contains("level=WARN msg=\"exceeded threshold\""));
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let probe = ScriptedProbe::always_failing();
        let target = validate("http://example.com").unwrap();
        let (logger, buffer) = test_logger();

        let outcome = execute(
            &probe,
            &target,
            &policy(0, 10_000),
            Duration::from_secs(2),
            &logger,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(probe.calls(), 1);
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.error, Some(TerminalError::Exhausted { .. })));
        assert!(!buffer.contents().contains("backing off"));
    }

    #[tokio::test]
    async fn test_transport_failures_exhaust_retries() {
        let probe = ScriptedProbe::always_failing();
        let target = validate("http://example.com").unwrap();
        let (logger, buffer) = test_logger();
        let start = Instant::now();

        let outcome = execute(
            &probe,
            &target,
            &policy(3, 20),
            Duration::from_secs(2),
            &logger,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(probe.calls(), 4);
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.classification, Classification::Failure);
        assert_eq!(outcome.status_code, None);
        assert_eq!(
            outcome.error,
            Some(TerminalError::Exhausted {
                last_error: "connection refused".to_string()
            })
        );

        let contents = buffer.contents();
        assert_eq!(contents.matches("msg=\"backing off\"").count(), 3);
        assert_eq!(contents.matches("msg=\"failed to perform request\"").count(), 4);
        assert_eq!(contents.matches("msg=\"request details\"").count(), 4);
        assert!(contents.contains("msg=\"fetching error\""));
        assert!(contents.contains("retries=3"));
    }

    #[tokio::test]
    async fn test_first_success_after_failure_wins() {
        let probe = ScriptedProbe::new(vec![
            Err(ProbeError::TransportFailed("reset".into())),
            ok(204, 5),
            ok(500, 5),
        ]);
        let target = validate("http://example.com").unwrap();
        let (logger, _) = test_logger();

        let outcome = execute(
            &probe,
            &target,
            &policy(3, 1),
            Duration::from_secs(2),
            &logger,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(probe.calls(), 2);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.status_code, Some(204));
        assert_eq!(outcome.health(), Health::Up);
    }

    #[tokio::test]
    async fn test_request_construction_failure_is_not_retried() {
        let probe = ScriptedProbe::new(vec![Err(ProbeError::RequestConstructionFailed(
            "bad header".into(),
        ))]);
        let target = validate("http://example.com").unwrap();
        let (logger, buffer) = test_logger();

        let outcome = execute(
            &probe,
            &target,
            &policy(3, 1),
            Duration::from_secs(2),
            &logger,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(probe.calls(), 1);
        assert!(matches!(
            outcome.error,
            Some(TerminalError::RequestConstruction(_))
        ));
        assert!(buffer.contents().contains("msg=\"failed to create request\""));
    }

    #[tokio::test]
    async fn test_cancellation_during_backoff_stops_retries() {
        let probe = ScriptedProbe::always_failing();
        let target = validate("http://example.com").unwrap();
        let (logger, buffer) = test_logger();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });
        let start = Instant::now();

        let outcome = execute(
            &probe,
            &target,
            &policy(5, 10_000),
            Duration::from_secs(2),
            &logger,
            &token,
        )
        .await;

        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(probe.calls(), 1);
        assert!(outcome.was_cancelled());
        assert!(buffer.contents().contains("msg=\"check cancelled\""));
    }

    #[tokio::test]
    async fn test_cancellation_during_attempt() {
        let token = CancellationToken::new();
        let probe = ScriptedProbe::always_failing().cancelling_on(2, token.clone());
        let target = validate("http://example.com").unwrap();
        let (logger, _) = test_logger();

        let outcome = execute(
            &probe,
            &target,
            &policy(5, 1),
            Duration::from_secs(2),
            &logger,
            &token,
        )
        .await;

        assert_eq!(probe.calls(), 2);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.was_cancelled());
    }
}
