//! Error types for idr-client
//!
//! Every fallible operation in the crate returns [`Result`]. The variants of
//! [`Error`] mirror the layers of the engine:
//! - task failures wrapping an arbitrary cause ([`TaskError`])
//! - retry deadlines being exceeded ([`RetryError`])
//! - transport and data source collaborators ([`TransportError`], [`DataSourceError`])
//! - stage-fatal pipeline conditions ([`PipelineError`])
//! - cooperative cancellation ([`Error::Cancelled`])

use std::time::Duration;
use thiserror::Error;

use crate::types::Stage;

/// Result type alias for idr-client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error used to carry foreign causes through [`TaskError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for idr-client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "retry.default_deadline")
        key: Option<String>,
    },

    /// A task failed with a foreign cause
    #[error(transparent)]
    Task(#[from] TaskError),

    /// Retries were exhausted
    #[error(transparent)]
    Retry(#[from] RetryError),

    /// Metadata retrieval, upload or completion notification failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Connecting to or extracting from a data source failed
    #[error("data source error: {0}")]
    DataSource(#[from] DataSourceError),

    /// A pipeline stage could not continue
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Cancellation was observed at a suspension point
    #[error("operation cancelled")]
    Cancelled,

    /// The concurrent executor has been disposed and refuses new work
    #[error("concurrent executor disposed: not accepting new tasks")]
    ExecutorDisposed,

    /// Upload chunks do not form a contiguous sequence
    #[error("invalid chunk sequence: {0}")]
    InvalidChunks(String),
}

impl Error {
    /// Build a configuration error for the given setting key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Returns true if this error represents cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// A task failure wrapping the underlying cause
#[derive(Debug, Error)]
#[error("task {task} failed: {source}")]
pub struct TaskError {
    /// Name of the task that failed
    pub task: String,
    /// The underlying cause
    #[source]
    pub source: BoxError,
}

impl TaskError {
    /// Wrap `source` as a failure of the task named `task`
    pub fn new(task: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            task: task.into(),
            source: source.into(),
        }
    }

    /// A task that panicked instead of returning
    pub fn panicked(task: impl Into<String>, message: impl Into<String>) -> Self {
        let message: String = message.into();
        Self::new(task, format!("task panicked: {message}"))
    }
}

/// Retry deadline exceeded, carrying the last failure
#[derive(Debug, Error)]
#[error(
    "deadline of {secs:.1}s exceeded after {attempts} attempt(s): {source}",
    secs = .deadline.as_secs_f64()
)]
pub struct RetryError {
    /// The wall-clock budget that was exceeded
    pub deadline: Duration,
    /// Number of attempts made before giving up
    pub attempts: u32,
    /// The error returned by the last attempt
    #[source]
    pub source: Box<Error>,
}

impl RetryError {
    /// The error returned by the last attempt
    pub fn last_error(&self) -> &Error {
        &self.source
    }
}

/// Errors raised by a [`Transport`](crate::transport::Transport) implementation
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the remote server
    #[error("connection failed: {0}")]
    Connection(String),

    /// The request did not complete in time
    #[error("request {operation} timed out")]
    Timeout {
        /// The operation that timed out (e.g., "upload_chunk")
        operation: String,
    },

    /// The server refused the request
    #[error("server rejected {operation}: {reason}")]
    Rejected {
        /// The operation that was rejected
        operation: String,
        /// Reason given by the server
        reason: String,
    },

    /// The server answered with something the transport could not interpret
    #[error("unexpected response to {operation}: {reason}")]
    Protocol {
        /// The operation whose response was malformed
        operation: String,
        /// What was wrong with the response
        reason: String,
    },

    /// The upload referenced by a chunk or completion call does not exist
    #[error("unknown upload {0}")]
    UnknownUpload(String),
}

/// Errors raised by a [`DataSource`](crate::data_source::DataSource) or its type
#[derive(Debug, Error)]
pub enum DataSourceError {
    /// Connecting to the data source failed
    #[error("failed to connect to data source {data_source}: {reason}")]
    Connection {
        /// Id of the data source
        data_source: String,
        /// The reason the connection failed
        reason: String,
    },

    /// Running an extract against the data source failed
    #[error("extract {extract} failed: {reason}")]
    Extraction {
        /// Id of the extract metadata
        extract: String,
        /// The reason extraction failed
        reason: String,
    },

    /// The data source was used after being disposed
    #[error("data source {0} is disposed")]
    Disposed(String),

    /// No data source type with this code is registered
    #[error("data source type {0} is not registered")]
    UnsupportedType(String),

    /// Turning extracted data into upload content failed
    #[error("failed to prepare upload content for extract {extract}: {reason}")]
    Packaging {
        /// Id of the extract metadata
        extract: String,
        /// The reason packaging failed
        reason: String,
    },
}

/// Stage-fatal pipeline conditions
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The metadata provider could not supply extract metadata
    #[error("failed to fetch extract metadata: {source}")]
    MetadataFetch {
        /// The failure returned by the metadata provider
        #[source]
        source: Box<Error>,
    },

    /// Every item of a fan-out stage failed
    #[error("no item succeeded during {stage} ({failures} failure(s))")]
    NoSuccesses {
        /// The stage in which every item failed
        stage: Stage,
        /// Number of failed items
        failures: usize,
    },
}
