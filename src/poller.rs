//! Bounded waiting for externally driven state transitions.
//!
//! The poller owns only the waiting discipline. What is fetched and what counts as
//! terminal are supplied by the caller, so the same loop waits for pipelines, for
//! runs to appear and for deployments to sync.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{CIRelayError, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;
pub const DEFAULT_MIN_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_FETCH_FAILURES: u32 = 3;

/// How long to keep polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPolicy {
    /// Poll every `interval` until `timeout` has elapsed.
    Deadline { timeout: Duration, interval: Duration },
    /// Poll at most `max_attempts` times, doubling the pause from `min_backoff` up
    /// to `max_backoff`.
    Attempts {
        max_attempts: u32,
        min_backoff: Duration,
        max_backoff: Duration,
    },
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::Attempts {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            min_backoff: DEFAULT_MIN_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl PollPolicy {
    pub fn deadline(timeout: Duration, interval: Duration) -> Self {
        Self::Deadline { timeout, interval }
    }

    /// Pause after the given 1-based attempt, or `None` when polling should stop.
    fn pause_after(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        match *self {
            Self::Deadline { timeout, interval } => {
                let remaining = timeout.checked_sub(elapsed).filter(|r| !r.is_zero())?;
                Some(interval.min(remaining))
            }
            Self::Attempts {
                max_attempts,
                min_backoff,
                max_backoff,
            } => {
                if attempt >= max_attempts {
                    return None;
                }
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                Some(min_backoff.saturating_mul(factor).min(max_backoff))
            }
        }
    }
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    /// The first terminal observation.
    Terminal(T),
    /// The policy ran out while the subject was still non-terminal.
    TimedOut { last: Option<T>, elapsed: Duration },
    /// The cancellation token fired.
    Cancelled { last: Option<T> },
}

impl<T> PollOutcome<T> {
    pub fn terminal(self) -> Option<T> {
        match self {
            Self::Terminal(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Poller {
    policy: PollPolicy,
    max_fetch_failures: u32,
    cancel: CancellationToken,
}

impl Poller {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            max_fetch_failures: DEFAULT_MAX_FETCH_FAILURES,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Consecutive retryable fetch failures tolerated before giving up.
    #[must_use]
    pub fn with_max_fetch_failures(mut self, max_fetch_failures: u32) -> Self {
        self.max_fetch_failures = max_fetch_failures;
        self
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Repeatedly runs `fetch` until `is_terminal` holds for its value.
    ///
    /// Returns as soon as a terminal value is observed. A fetch error that is not
    /// retryable is returned unchanged; more than `max_fetch_failures` consecutive
    /// retryable errors become a `TransportFault`. Running out of time or attempts
    /// is not an error: it yields `PollOutcome::TimedOut`.
    pub async fn await_terminal<T, F, Fut, P>(
        &self,
        subject: &str,
        mut fetch: F,
        is_terminal: P,
    ) -> Result<PollOutcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&T) -> bool,
    {
        let start = Instant::now();
        let mut attempt = 0u32;
        let mut failures = 0u32;
        let mut last = None;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(PollOutcome::Cancelled { last });
            }
            attempt += 1;

            let fetched = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(PollOutcome::Cancelled { last }),
                fetched = fetch() => fetched,
            };

            match fetched {
                Ok(value) if is_terminal(&value) => {
                    debug!("{subject} reached a terminal state after {attempt} attempt(s)");
                    return Ok(PollOutcome::Terminal(value));
                }
                Ok(value) => {
                    failures = 0;
                    last = Some(value);
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    if failures > self.max_fetch_failures {
                        return Err(CIRelayError::TransportFault {
                            endpoint: subject.to_string(),
                            attempts: failures,
                            cause: Box::new(e),
                        });
                    }
                    warn!(
                        "Fetching {subject} failed ({e}), will retry ({failures}/{})",
                        self.max_fetch_failures
                    );
                }
                Err(e) => return Err(e),
            }

            let elapsed = start.elapsed();
            let Some(pause) = self.policy.pause_after(attempt, elapsed) else {
                debug!("Gave up waiting for {subject} after {attempt} attempt(s)");
                return Ok(PollOutcome::TimedOut { last, elapsed });
            };

            debug!("{subject} not terminal yet, polling again in {pause:?}");
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(PollOutcome::Cancelled { last }),
                () = tokio::time::sleep(pause) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::PipelineStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn scripted(
        statuses: Vec<Result<PipelineStatus>>,
    ) -> impl FnMut() -> std::future::Ready<Result<PipelineStatus>> {
        let queue = Arc::new(Mutex::new(VecDeque::from(statuses)));
        move || {
            let next = queue
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(PipelineStatus::Running));
            std::future::ready(next)
        }
    }

    fn is_terminal(status: &PipelineStatus) -> bool {
        status.is_terminal()
    }

    fn network_fault() -> CIRelayError {
        CIRelayError::ApiError {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_on_first_terminal_observation() {
        let interval = Duration::from_secs(5);
        let poller = Poller::new(PollPolicy::deadline(Duration::from_secs(600), interval));
        let start = Instant::now();

        let outcome = poller
            .await_terminal(
                "pipeline",
                scripted(vec![
                    Ok(PipelineStatus::Running),
                    Ok(PipelineStatus::Running),
                    Ok(PipelineStatus::Success),
                ]),
                is_terminal,
            )
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Terminal(PipelineStatus::Success));
        assert_eq!(start.elapsed(), interval * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out_without_error() {
        let timeout = Duration::from_secs(60);
        let poller = Poller::new(PollPolicy::deadline(timeout, Duration::from_secs(7)));
        let start = Instant::now();

        let outcome = poller
            .await_terminal("pipeline", scripted(Vec::new()), is_terminal)
            .await
            .unwrap();

        match outcome {
            PollOutcome::TimedOut { last, elapsed } => {
                assert_eq!(last, Some(PipelineStatus::Running));
                assert!(elapsed >= timeout);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(start.elapsed() >= timeout);
        assert!(start.elapsed() < timeout + Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_policy_counts_fetches_with_capped_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let poller = Poller::new(PollPolicy::Attempts {
            max_attempts: 4,
            min_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(30),
        });
        let start = Instant::now();

        let outcome = poller
            .await_terminal(
                "in-flight runs",
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Ok(PipelineStatus::Running))
                },
                is_terminal,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, PollOutcome::TimedOut { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 10s + 20s + 30s (capped)
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_fetch_failures_are_retried() {
        let poller = Poller::new(PollPolicy::deadline(
            Duration::from_secs(600),
            Duration::from_secs(1),
        ));

        let outcome = poller
            .await_terminal(
                "pipeline",
                scripted(vec![
                    Err(network_fault()),
                    Err(network_fault()),
                    Ok(PipelineStatus::Failure),
                ]),
                is_terminal,
            )
            .await
            .unwrap();

        assert_eq!(outcome, PollOutcome::Terminal(PipelineStatus::Failure));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_fetch_retries_surface_as_transport_fault() {
        let poller = Poller::new(PollPolicy::deadline(
            Duration::from_secs(600),
            Duration::from_secs(1),
        ))
        .with_max_fetch_failures(2);

        let result = poller
            .await_terminal(
                "pipeline",
                scripted(vec![
                    Err(network_fault()),
                    Err(network_fault()),
                    Err(network_fault()),
                ]),
                is_terminal,
            )
            .await;

        match result {
            Err(CIRelayError::TransportFault { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected transport fault, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_returned_immediately() {
        let poller = Poller::new(PollPolicy::default());
        let result = poller
            .await_terminal(
                "pipeline",
                scripted(vec![Err(CIRelayError::not_found("run", "42"))]),
                is_terminal,
            )
            .await;
        assert!(matches!(result, Err(CIRelayError::NotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let poller = Poller::new(PollPolicy::deadline(
            Duration::from_secs(3600),
            Duration::from_secs(600),
        ))
        .with_cancellation(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = poller
            .await_terminal("pipeline", scripted(Vec::new()), is_terminal)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            PollOutcome::Cancelled {
                last: Some(PipelineStatus::Running)
            }
        );
        assert!(start.elapsed() < Duration::from_secs(600));
    }

    #[test]
    fn test_pause_after_deadline_is_capped_to_remaining_time() {
        let policy = PollPolicy::deadline(Duration::from_secs(10), Duration::from_secs(4));
        assert_eq!(
            policy.pause_after(1, Duration::from_secs(8)),
            Some(Duration::from_secs(2))
        );
        assert_eq!(policy.pause_after(1, Duration::from_secs(10)), None);
    }
}
