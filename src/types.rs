//! Core types for idr-client: pipeline states, stages and events

use serde::{Deserialize, Serialize};

/// State of one pipeline run
///
/// A run moves through the states in declaration order. [`Failed`](PipelineState::Failed)
/// is reachable from any non-terminal state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Created, not started
    #[default]
    Idle,
    /// Retrieving extract metadata from the server
    FetchingMetadata,
    /// Running extracts against their data sources
    Extracting,
    /// Posting upload metadata and chunks
    Uploading,
    /// Notifying the server that uploads are complete
    MarkingComplete,
    /// Run finished
    Done,
    /// Run aborted by a stage-fatal error or cancellation
    Failed,
}

impl PipelineState {
    /// Returns true for `Done` and `Failed`
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (*self, next) {
            (from, Failed) => !from.is_terminal(),
            (Idle, FetchingMetadata)
            | (FetchingMetadata, Extracting)
            | (Extracting, Uploading)
            | (Uploading, MarkingComplete)
            | (MarkingComplete, Done) => true,
            // An empty metadata set has nothing to extract.
            (FetchingMetadata, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::FetchingMetadata => "fetching_metadata",
            PipelineState::Extracting => "extracting",
            PipelineState::Uploading => "uploading",
            PipelineState::MarkingComplete => "marking_complete",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-item stage of the pipeline, used to attribute item outcomes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Extraction from a data source
    Extract,
    /// Upload of metadata and chunks
    Upload,
    /// Completion notification
    MarkComplete,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Extract => "extract",
            Stage::Upload => "upload",
            Stage::MarkComplete => "mark_complete",
        };
        f.write_str(name)
    }
}

/// Event emitted during a pipeline run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The run moved to a new state
    StateChanged {
        /// Previous state
        from: PipelineState,
        /// New state
        to: PipelineState,
    },

    /// Extract metadata was retrieved
    MetadataFetched {
        /// Number of extract metadata records received
        extracts: usize,
    },

    /// An item finished a stage successfully
    ItemSucceeded {
        /// The stage
        stage: Stage,
        /// Id of the extract metadata the item belongs to
        extract_id: String,
    },

    /// An item failed a stage and was excluded from the rest of the run
    ItemFailed {
        /// The stage
        stage: Stage,
        /// Id of the extract metadata the item belongs to
        extract_id: String,
        /// Error message
        error: String,
    },

    /// A delivered upload could not be marked complete
    CompletionWarning {
        /// Id of the upload metadata
        upload_id: String,
        /// Error message
        error: String,
    },

    /// The run reached a terminal state
    RunFinished {
        /// Terminal state
        state: PipelineState,
        /// Number of uploads delivered
        delivered: usize,
        /// Number of item failures across all stages
        failures: usize,
    },
}
