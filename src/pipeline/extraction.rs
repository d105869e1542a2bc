//! Extraction stage: group extracts by data source, connect, extract, dispose.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data_source::{DataSource, DataSourceType};
use crate::domain::{DataSourceDescriptor, ExtractMetadata};
use crate::error::{DataSourceError, Error, PipelineError, Result};
use crate::task::{Task, TaskExt};
use crate::types::Stage;

use super::context::PipelineContext;

/// An extract that produced a payload
pub(super) struct Extracted {
    pub(super) metadata: Arc<ExtractMetadata>,
    pub(super) data_source_type: Arc<dyn DataSourceType>,
    pub(super) payload: Vec<u8>,
}

/// Extracts sharing one data source
struct SourceGroup {
    descriptor: DataSourceDescriptor,
    data_source_type: Arc<dyn DataSourceType>,
    extracts: Vec<Arc<ExtractMetadata>>,
}

#[derive(Clone)]
struct ExtractInput {
    source: Arc<dyn DataSource>,
    data_source_type: Arc<dyn DataSourceType>,
    metadata: Arc<ExtractMetadata>,
}

/// Runs one extract against its connected data source
struct ExtractTask;

#[async_trait]
impl Task<ExtractInput, Extracted> for ExtractTask {
    async fn execute(&self, input: ExtractInput) -> Result<Extracted> {
        let payload = input.source.extract(&input.metadata).await?;
        tracing::debug!(
            extract_id = %input.metadata.id,
            data_source = input.source.id(),
            bytes = payload.len(),
            "extract finished"
        );
        Ok(Extracted {
            metadata: input.metadata,
            data_source_type: input.data_source_type,
            payload,
        })
    }

    fn name(&self) -> &str {
        "extract"
    }
}

/// Run every extract, isolating per-item failures
///
/// Fails only when no extract produced a payload.
pub(super) async fn extract_all(
    ctx: &mut PipelineContext,
    extracts: Vec<Arc<ExtractMetadata>>,
) -> Result<Vec<Extracted>> {
    let groups = group_by_source(ctx, extracts);
    let connected = connect_all(ctx, groups).await?;

    let mut inputs = Vec::new();
    let mut sources = Vec::with_capacity(connected.len());
    for (group, connection) in connected {
        match connection {
            Ok(source) => {
                inputs.extend(group.extracts.into_iter().map(|metadata| ExtractInput {
                    source: source.clone(),
                    data_source_type: group.data_source_type.clone(),
                    metadata,
                }));
                sources.push(source);
            }
            Err(error) => {
                tracing::error!(
                    data_source = %group.descriptor.id,
                    extracts = group.extracts.len(),
                    error = %error,
                    "could not connect to data source"
                );
                for metadata in &group.extracts {
                    let failure = DataSourceError::Connection {
                        data_source: group.descriptor.id.clone(),
                        reason: error.to_string(),
                    };
                    ctx.record_failure(Stage::Extract, &metadata.id, failure.into());
                }
            }
        }
    }

    let ids: Vec<String> = inputs.iter().map(|i| i.metadata.id.clone()).collect();
    let task = Arc::new(ExtractTask.retrying(ctx.retry.clone(), ctx.cancel.clone()));
    let results = ctx.executor.execute_each(&ctx.cancel, task, inputs).await;

    dispose_all(&sources).await;

    let results = results?;

    // Record what finished before looking at cancellation
    let mut extracted = Vec::with_capacity(results.len());
    for (extract_id, result) in ids.iter().zip(results) {
        match result {
            Ok(item) => {
                ctx.record_success(Stage::Extract, extract_id);
                extracted.push(item);
            }
            Err(error) if ctx.is_interrupted(&error) => {}
            Err(error) => ctx.record_failure(Stage::Extract, extract_id, error),
        }
    }
    ctx.report.extracted = extracted.len();
    ctx.ensure_not_cancelled()?;

    let failures = ctx.failures_in(Stage::Extract);
    tracing::info!(
        extracted = extracted.len(),
        failures,
        "extraction stage finished"
    );
    if extracted.is_empty() {
        return Err(PipelineError::NoSuccesses {
            stage: Stage::Extract,
            failures,
        }
        .into());
    }
    Ok(extracted)
}

/// Bucket extracts by owning data source, failing those whose type is unknown
fn group_by_source(
    ctx: &mut PipelineContext,
    extracts: Vec<Arc<ExtractMetadata>>,
) -> Vec<SourceGroup> {
    let mut groups: BTreeMap<String, SourceGroup> = BTreeMap::new();
    for metadata in extracts {
        let code = &metadata.data_source.data_source_type;
        let data_source_type = match ctx.data_source_types.get(code) {
            Ok(data_source_type) => data_source_type.clone(),
            Err(error) => {
                ctx.record_failure(Stage::Extract, &metadata.id, error.into());
                continue;
            }
        };
        groups
            .entry(metadata.data_source.id.clone())
            .or_insert_with(|| SourceGroup {
                descriptor: metadata.data_source.clone(),
                data_source_type,
                extracts: Vec::new(),
            })
            .extracts
            .push(metadata);
    }
    groups.into_values().collect()
}

/// Materialise and connect every data source concurrently
async fn connect_all(
    ctx: &PipelineContext,
    groups: Vec<SourceGroup>,
) -> Result<Vec<(SourceGroup, Result<Arc<dyn DataSource>>)>> {
    let invocations: Vec<_> = groups
        .iter()
        .map(|group| {
            let descriptor = group.descriptor.clone();
            let data_source_type = group.data_source_type.clone();
            let retry = ctx.retry.clone();
            let cancel = ctx.cancel.clone();
            async move {
                let source = data_source_type.data_source(&descriptor)?;
                {
                    let source = &source;
                    retry
                        .run(&cancel, || async move {
                            source.connect().await.map_err(Error::from)
                        })
                        .await?;
                }
                tracing::debug!(data_source = %descriptor.id, "connected to data source");
                Ok::<_, Error>(source)
            }
        })
        .collect();

    let connections = ctx.executor.execute_all(&ctx.cancel, invocations).await?;
    let connected: Vec<_> = groups.into_iter().zip(connections).collect();

    if ctx.cancel.is_cancelled() {
        let sources: Vec<_> = connected
            .iter()
            .filter_map(|(_, connection)| connection.as_ref().ok().cloned())
            .collect();
        dispose_all(&sources).await;
        return Err(Error::Cancelled);
    }
    Ok(connected)
}

async fn dispose_all(sources: &[Arc<dyn DataSource>]) {
    for source in sources {
        if let Err(error) = source.dispose().await {
            tracing::warn!(data_source = source.id(), error = %error, "failed to dispose data source");
        }
    }
}
