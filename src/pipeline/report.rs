//! Run report: the outcome of one pipeline run.

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::types::{PipelineState, Stage};

/// An upload whose metadata and every chunk reached the server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveredUpload {
    /// Id of the extract metadata the upload was produced from
    pub extract_id: String,
    /// Id of the upload metadata issued by the server
    pub upload_id: String,
    /// Number of chunks posted
    pub chunks: usize,
    /// Size of the upload content in bytes
    pub bytes: usize,
    /// Whether the completion notification was accepted
    pub marked_complete: bool,
}

/// An item excluded from the rest of the run
#[derive(Debug)]
pub struct ItemFailure {
    /// Stage in which the item failed
    pub stage: Stage,
    /// Id of the extract metadata the item belongs to
    pub extract_id: String,
    /// The cause
    pub error: Error,
}

/// A delivered upload the server could not be told about
#[derive(Debug)]
pub struct CompletionWarning {
    /// Id of the upload metadata
    pub upload_id: String,
    /// Id of the extract metadata the upload was produced from
    pub extract_id: String,
    /// The cause
    pub error: Error,
}

/// Outcome of one pipeline run
#[must_use]
#[derive(Debug)]
pub struct RunReport {
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal state
    pub finished_at: DateTime<Utc>,
    /// `Done` or `Failed`
    pub final_state: PipelineState,
    /// Number of extract metadata records received
    pub extracts_total: usize,
    /// Number of extracts that produced a payload
    pub extracted: usize,
    /// Uploads that reached the server
    pub delivered: Vec<DeliveredUpload>,
    /// Per-item failures across every stage
    pub failures: Vec<ItemFailure>,
    /// Completion notifications that failed
    pub warnings: Vec<CompletionWarning>,
    /// The stage-fatal error that moved the run to `Failed`, if any
    pub fatal: Option<Error>,
}

impl RunReport {
    pub(super) fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            final_state: PipelineState::Idle,
            extracts_total: 0,
            extracted: 0,
            delivered: Vec::new(),
            failures: Vec::new(),
            warnings: Vec::new(),
            fatal: None,
        }
    }

    /// Whether the run reached `Done`
    pub fn is_success(&self) -> bool {
        self.final_state == PipelineState::Done
    }

    /// Process exit code for the run
    ///
    /// 1 when the run `Failed`, and also when uploads were delivered but not
    /// one of them could be marked complete; 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        let completion_had_no_successes =
            !self.delivered.is_empty() && self.delivered.iter().all(|d| !d.marked_complete);
        if self.is_success() && !completion_had_no_successes {
            0
        } else {
            1
        }
    }

    /// Failures recorded during `stage`
    pub fn failures_in(&self, stage: Stage) -> impl Iterator<Item = &ItemFailure> {
        self.failures.iter().filter(move |f| f.stage == stage)
    }

    /// Wall-clock duration of the run
    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
