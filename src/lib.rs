//! # idr-client
//!
//! Client-side ETL agent: extracts data from local data sources and uploads it
//! to a remote server.
//!
//! ## Design Philosophy
//!
//! idr-client is designed to be:
//! - **Source-agnostic** - Data sources and transports plug in through traits
//! - **Failure-isolating** - One bad extract never sinks the whole run
//! - **Library-first** - No CLI or subscriber setup, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to run events, no polling required
//!
//! A run moves through `FetchingMetadata → Extracting → Uploading →
//! MarkingComplete → Done`, or ends in `Failed`. Every transport and data
//! source call is wrapped in a [`Retry`] policy and fanned out through a
//! bounded [`ConcurrentExecutor`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use idr_client::{Config, DataSourceTypeRegistry, OrgUnit, Pipeline, TransportRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::new(OrgUnit {
//!         code: "12345".to_string(),
//!         name: "Test Facility".to_string(),
//!     });
//!
//!     let pipeline = Pipeline::from_config(
//!         config,
//!         &TransportRegistry::with_defaults(),
//!         &DataSourceTypeRegistry::data_source_types(),
//!     )?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = idr_client::run_with_shutdown(&pipeline).await;
//!     std::process::exit(report.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Data source abstraction
pub mod data_source;
/// Extract and upload records exchanged with the server
pub mod domain;
/// Error types
pub mod error;
/// Bounded concurrent execution of async invocations
pub mod executor;
/// The extract → upload → mark-complete pipeline (decomposed into focused submodules)
pub mod pipeline;
/// Code-to-factory registration tables
pub mod registry;
/// Retry logic with exponential backoff
pub mod retry;
/// Composable async tasks
pub mod task;
/// Transport abstraction and the in-memory transport
pub mod transport;
/// Core types and events
pub mod types;

use tokio_util::sync::CancellationToken;

// Re-export commonly used types
pub use config::{Config, ExecutorConfig, OrgUnit, RetryConfig, TransportConfig, UploadConfig};
pub use data_source::{DataSource, DataSourceType, DataSourceTypes};
pub use domain::{DataSourceDescriptor, ExtractMetadata, UploadChunk, UploadMetadata};
pub use error::{
    DataSourceError, Error, PipelineError, Result, RetryError, TaskError, TransportError,
};
pub use executor::ConcurrentExecutor;
pub use pipeline::{CompletionWarning, DeliveredUpload, ItemFailure, Pipeline, RunReport};
pub use registry::{DataSourceTypeRegistry, FactoryRegistry, TransportRegistry};
pub use retry::{Retry, RetryTask};
pub use task::{Task, TaskExt, task_fn};
pub use transport::{DataSink, InMemoryTransport, MetadataProvider, Transport};
pub use types::{PipelineEvent, PipelineState, Stage};

/// Run the pipeline once, cancelling it on a termination signal.
///
/// The run keeps going until it finishes on its own or a signal arrives; after
/// a signal the run is cancelled and its (failed) report is still returned.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use idr_client::{Pipeline, run_with_shutdown};
///
/// async fn once(pipeline: &Pipeline) -> i32 {
///     let report = run_with_shutdown(pipeline).await;
///     report.exit_code()
/// }
/// ```
pub async fn run_with_shutdown(pipeline: &Pipeline) -> RunReport {
    let cancel = CancellationToken::new();
    let run = pipeline.run(cancel.clone());
    tokio::pin!(run);

    tokio::select! {
        report = &mut run => report,
        () = wait_for_signal() => {
            tracing::info!("cancelling pipeline run");
            cancel.cancel();
            run.await
        }
    }
}

/// Resolves on the first termination signal; never resolves if none can be observed
#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal, shutdown by signal disabled");
            std::future::pending::<()>().await;
        }
    }
}
