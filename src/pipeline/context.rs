//! Pipeline run context: per-run state, state transitions, events.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::data_source::DataSourceTypes;
use crate::error::{Error, Result};
use crate::executor::ConcurrentExecutor;
use crate::retry::Retry;
use crate::transport::Transport;
use crate::types::{PipelineEvent, PipelineState, Stage};

use super::report::{ItemFailure, RunReport};

/// Everything one run needs, owned by that run and dropped at its end
pub(super) struct PipelineContext {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) data_source_types: DataSourceTypes,
    pub(super) config: Arc<Config>,
    pub(super) cancel: CancellationToken,
    pub(super) executor: ConcurrentExecutor,
    pub(super) retry: Retry,
    pub(super) report: RunReport,
    state: PipelineState,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl PipelineContext {
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        data_source_types: DataSourceTypes,
        config: Arc<Config>,
        event_tx: broadcast::Sender<PipelineEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor: ConcurrentExecutor::new(config.executor.max_workers),
            retry: Retry::from_config(&config.retry),
            report: RunReport::new(Utc::now()),
            state: PipelineState::Idle,
            transport,
            data_source_types,
            config,
            cancel,
            event_tx,
        }
    }

    /// Move to `next`, logging and broadcasting the change
    pub(super) fn transition(&mut self, next: PipelineState) {
        let from = self.state;
        debug_assert!(
            from.can_transition_to(next),
            "invalid pipeline transition {from} -> {next}"
        );
        self.state = next;
        tracing::info!(from = %from, to = %next, "pipeline state changed");
        self.emit(PipelineEvent::StateChanged { from, to: next });
    }

    /// Broadcast an event; having no subscribers is fine
    pub(super) fn emit(&self, event: PipelineEvent) {
        self.event_tx.send(event).ok();
    }

    /// Fail with [`Error::Cancelled`] once the run token has fired
    pub(super) fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Whether `error` only reports that the run was cancelled before the item finished
    pub(super) fn is_interrupted(&self, error: &Error) -> bool {
        error.is_cancelled() && self.cancel.is_cancelled()
    }

    pub(super) fn record_success(&self, stage: Stage, extract_id: &str) {
        tracing::debug!(stage = %stage, extract_id, "item succeeded");
        self.emit(PipelineEvent::ItemSucceeded {
            stage,
            extract_id: extract_id.to_string(),
        });
    }

    pub(super) fn record_failure(&mut self, stage: Stage, extract_id: &str, error: Error) {
        tracing::error!(stage = %stage, extract_id, error = %error, "item failed");
        self.emit(PipelineEvent::ItemFailed {
            stage,
            extract_id: extract_id.to_string(),
            error: error.to_string(),
        });
        self.report.failures.push(ItemFailure {
            stage,
            extract_id: extract_id.to_string(),
            error,
        });
    }

    pub(super) fn failures_in(&self, stage: Stage) -> usize {
        self.report.failures_in(stage).count()
    }

    /// Reach the terminal state matching `outcome` and hand out the report
    pub(super) fn finish(mut self, outcome: Result<()>) -> RunReport {
        let final_state = match outcome {
            Ok(()) => PipelineState::Done,
            Err(error) => {
                tracing::error!(state = %self.state, error = %error, "pipeline run failed");
                self.report.fatal = Some(error);
                PipelineState::Failed
            }
        };
        self.transition(final_state);
        self.executor.dispose();

        self.report.final_state = final_state;
        self.report.finished_at = Utc::now();
        tracing::info!(
            state = %final_state,
            extracts = self.report.extracts_total,
            extracted = self.report.extracted,
            delivered = self.report.delivered.len(),
            failures = self.report.failures.len(),
            warnings = self.report.warnings.len(),
            duration_ms = self.report.duration().num_milliseconds(),
            "pipeline run finished"
        );
        self.emit(PipelineEvent::RunFinished {
            state: final_state,
            delivered: self.report.delivered.len(),
            failures: self.report.failures.len(),
        });
        self.report
    }
}
