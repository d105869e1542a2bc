//! Main pipeline: fetch extract metadata, extract, upload, mark complete.
//!
//! Split into focused submodules:
//! - [`context`] - Per-run state, state transitions and event emission
//! - [`extraction`] - Grouping by data source, connection, extraction, disposal
//! - [`upload`] - Upload metadata creation, packaging, ordered chunk posting
//! - [`completion`] - Completion notifications
//! - [`report`] - The run report
//!
//! Stages are separated by a barrier: every item of a stage settles before the
//! next stage starts. Items that fail are recorded and dropped; a stage fails
//! the run only when none of its items succeed.

mod completion;
mod context;
mod extraction;
mod report;
mod upload;


use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::data_source::DataSourceTypes;
use crate::domain::ExtractMetadata;
use crate::error::{Error, PipelineError, Result};
use crate::registry::{DataSourceTypeRegistry, TransportRegistry};
use crate::transport::Transport;
use crate::types::{PipelineEvent, PipelineState};

use context::PipelineContext;

pub use report::{CompletionWarning, DeliveredUpload, ItemFailure, RunReport};

/// Capacity of the event channel; slow subscribers lag beyond this
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// The extract → upload → mark-complete pipeline
pub struct Pipeline {
    transport: Arc<dyn Transport>,
    data_source_types: DataSourceTypes,
    config: Arc<Config>,
    event_tx: broadcast::Sender<PipelineEvent>,
}

impl Pipeline {
    /// Create a pipeline from explicit collaborators
    ///
    /// The configuration is validated first.
    pub fn new(
        transport: Arc<dyn Transport>,
        data_source_types: DataSourceTypes,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        if data_source_types.is_empty() {
            tracing::warn!("no data source types enabled, every run will be empty");
        }
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            transport,
            data_source_types,
            config: Arc::new(config),
            event_tx,
        })
    }

    /// Create a pipeline whose transport and data source types are picked by
    /// `config` from the given registries
    pub fn from_config(
        config: Config,
        transports: &TransportRegistry,
        data_source_types: &DataSourceTypeRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let transport = transports.create(&config.transport.factory, &config)?;
        let types = DataSourceTypes::from_registry(data_source_types, &config)?;
        tracing::info!(
            transport = %config.transport.factory,
            data_source_types = ?types.codes(),
            "pipeline configured"
        );
        Self::new(transport, types, config)
    }

    /// Subscribe to the events of every subsequent run
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    /// The validated configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the pipeline once
    ///
    /// Never returns an error: stage-fatal conditions and cancellation end the
    /// run in [`PipelineState::Failed`] with the cause in [`RunReport::fatal`].
    pub async fn run(&self, cancel: CancellationToken) -> RunReport {
        let mut ctx = PipelineContext::new(
            self.transport.clone(),
            self.data_source_types.clone(),
            self.config.clone(),
            self.event_tx.clone(),
            cancel,
        );
        let outcome = drive(&mut ctx).await;
        ctx.finish(outcome)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("data_source_types", &self.data_source_types)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn drive(ctx: &mut PipelineContext) -> Result<()> {
    ctx.transition(PipelineState::FetchingMetadata);
    let extracts = fetch_metadata(ctx).await?;
    if extracts.is_empty() {
        tracing::info!("no extracts to run");
        return Ok(());
    }

    ctx.transition(PipelineState::Extracting);
    let extracted = extraction::extract_all(ctx, extracts).await?;

    ctx.transition(PipelineState::Uploading);
    let uploaded = upload::upload_all(ctx, extracted).await?;

    ctx.transition(PipelineState::MarkingComplete);
    completion::mark_all_complete(ctx, uploaded).await
}

/// One retried metadata request for every enabled data source type
async fn fetch_metadata(ctx: &mut PipelineContext) -> Result<Vec<Arc<ExtractMetadata>>> {
    let codes = ctx.data_source_types.codes();
    let transport = &ctx.transport;
    let codes = &codes;

    let extracts = ctx
        .retry
        .run(&ctx.cancel, || async move {
            transport
                .fetch_extract_metadata(codes)
                .await
                .map_err(Error::from)
        })
        .await
        .map_err(|e| match e {
            Error::Cancelled => Error::Cancelled,
            other => PipelineError::MetadataFetch {
                source: Box::new(other),
            }
            .into(),
        })?;

    tracing::info!(extracts = extracts.len(), "extract metadata fetched");
    ctx.report.extracts_total = extracts.len();
    ctx.emit(PipelineEvent::MetadataFetched {
        extracts: extracts.len(),
    });
    Ok(extracts.into_iter().map(Arc::new).collect())
}
