//! Caller-facing waits on pipelines of one provider.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::PollingConfig;
use crate::error::{CIRelayError, Result};
use crate::poller::{PollOutcome, PollPolicy, Poller};
use crate::providers::CiProvider;
use crate::status::{EventType, Pipeline, PipelineRef, PipelineStatus};

/// Looks up runs through a [`CiProvider`] and waits on them.
#[derive(Clone)]
pub struct PipelineWatcher {
    provider: Arc<dyn CiProvider>,
    polling: PollingConfig,
    cancel: CancellationToken,
}

impl PipelineWatcher {
    pub fn new(provider: Arc<dyn CiProvider>, polling: PollingConfig) -> Self {
        Self {
            provider,
            polling,
            cancel: CancellationToken::new(),
        }
    }

    /// Every wait started by this watcher returns promptly once `cancel` fires.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn provider(&self) -> &Arc<dyn CiProvider> {
        &self.provider
    }

    fn poller(&self, policy: PollPolicy) -> Poller {
        Poller::new(policy)
            .with_cancellation(self.cancel.clone())
            .with_max_fetch_failures(self.polling.max_fetch_failures)
    }

    /// Finds the run of `name` for `reference`.
    ///
    /// Without `expected_status` this is a single lookup. With it, the lookup is
    /// repeated within the appear timeout until the run shows that status or
    /// finishes; a run that finished with another status is still returned so the
    /// caller can see what happened. `None` means nothing matching showed up.
    pub async fn get_pipeline(
        &self,
        name: &str,
        reference: &PipelineRef,
        expected_status: Option<PipelineStatus>,
        event: EventType,
    ) -> Result<Option<Pipeline>> {
        let Some(expected) = expected_status else {
            return self
                .provider
                .get_pipeline_for_event(name, reference, event)
                .await;
        };

        let subject = format!("{name} for {reference}");
        let outcome = self
            .poller(self.polling.appear_policy())
            .await_terminal(
                &subject,
                || self.provider.get_pipeline_for_event(name, reference, event),
                |found: &Option<Pipeline>| {
                    found
                        .as_ref()
                        .is_some_and(|p| p.status == expected || p.is_terminal())
                },
            )
            .await?;

        match outcome {
            PollOutcome::Terminal(found) => {
                if let Some(p) = found.as_ref().filter(|p| p.status != expected) {
                    warn!("{subject} finished {} instead of {expected}", p.status);
                }
                Ok(found)
            }
            PollOutcome::TimedOut { .. } => Ok(None),
            PollOutcome::Cancelled { .. } => Err(CIRelayError::Cancelled { subject }),
        }
    }

    /// Waits, within the appear timeout, for a run of `name` for `reference` to exist.
    pub async fn await_pipeline(
        &self,
        name: &str,
        reference: &PipelineRef,
        event: EventType,
    ) -> Result<Option<Pipeline>> {
        let subject = format!("{name} for {reference}");
        let outcome = self
            .poller(self.polling.appear_policy())
            .await_terminal(
                &subject,
                || self.provider.get_pipeline_for_event(name, reference, event),
                Option::is_some,
            )
            .await?;

        match outcome {
            PollOutcome::Terminal(found) => Ok(found),
            PollOutcome::TimedOut { elapsed, .. } => {
                warn!("No run of {subject} appeared within {elapsed:?}");
                Ok(None)
            }
            PollOutcome::Cancelled { .. } => Err(CIRelayError::Cancelled { subject }),
        }
    }

    /// Polls `pipeline` until it is terminal and returns the final observation.
    pub async fn wait_for_completion(
        &self,
        pipeline: &Pipeline,
        timeout: Option<Duration>,
    ) -> Result<Pipeline> {
        let policy = timeout.map_or_else(
            || self.polling.pipeline_policy(),
            |timeout| PollPolicy::deadline(timeout, self.polling.interval),
        );
        let subject = pipeline.id.to_string();
        info!("Waiting for {subject} ({}) to finish", pipeline.status);

        let outcome = self
            .poller(policy)
            .await_terminal(
                &subject,
                || self.provider.fetch_pipeline(pipeline),
                Pipeline::is_terminal,
            )
            .await?;

        match outcome {
            PollOutcome::Terminal(done) => {
                info!("{subject} finished: {}", done.status);
                Ok(done)
            }
            PollOutcome::TimedOut { last, elapsed } => Err(CIRelayError::Timeout {
                subject,
                elapsed,
                last_status: last.map(|p| p.status),
            }),
            PollOutcome::Cancelled { .. } => Err(CIRelayError::Cancelled { subject }),
        }
    }

    /// Waits for `pipeline` to finish and returns its terminal status.
    ///
    /// # Errors
    ///
    /// `Timeout` if it is still running after `timeout` (or the configured pipeline
    /// timeout), `Cancelled` if the watcher was cancelled.
    pub async fn wait_for_pipeline_to_finish(
        &self,
        pipeline: &Pipeline,
        timeout: Option<Duration>,
    ) -> Result<PipelineStatus> {
        Ok(self.wait_for_completion(pipeline, timeout).await?.status)
    }

    /// Waits for several pipelines at once. Statuses come back in input order.
    pub async fn wait_for_pipelines(
        &self,
        pipelines: &[Pipeline],
        timeout: Option<Duration>,
    ) -> Result<Vec<PipelineStatus>> {
        try_join_all(
            pipelines
                .iter()
                .map(|pipeline| self.wait_for_pipeline_to_finish(pipeline, timeout)),
        )
        .await
    }

    /// Blocks until `name` has no queued or running runs left.
    pub async fn wait_for_all_in_flight_to_finish(&self, name: &str) -> Result<()> {
        let pipeline_id = self
            .provider
            .resolve_pipeline_id(name)
            .await?
            .ok_or_else(|| CIRelayError::not_found("pipeline", name))?;
        let subject = format!("in-flight runs of {name}");

        let outcome = self
            .poller(self.polling.in_flight_policy())
            .await_terminal(
                &subject,
                || self.provider.list_in_flight(&pipeline_id),
                Vec::is_empty,
            )
            .await?;

        match outcome {
            PollOutcome::Terminal(_) => {
                info!("No runs of {name} in flight");
                Ok(())
            }
            PollOutcome::TimedOut { last, elapsed } => Err(CIRelayError::Timeout {
                subject,
                elapsed,
                last_status: last.and_then(|runs| runs.first().map(|p| p.status)),
            }),
            PollOutcome::Cancelled { .. } => Err(CIRelayError::Cancelled { subject }),
        }
    }
}
