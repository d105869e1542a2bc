//! Upload stage: create upload metadata, package content, post chunks in order.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::OrgUnit;
use crate::domain::{UploadChunk, UploadMetadata};
use crate::error::{Error, PipelineError, Result};
use crate::retry::Retry;
use crate::task::Task;
use crate::transport::Transport;
use crate::types::Stage;

use super::context::PipelineContext;
use super::extraction::Extracted;
use super::report::DeliveredUpload;

/// An upload whose content reached the server, pending completion
pub(super) struct Uploaded {
    pub(super) upload: Arc<UploadMetadata>,
    pub(super) extract_id: String,
    pub(super) chunks: usize,
    pub(super) bytes: usize,
}

/// Delivers one extract: metadata first, then every chunk in index order
///
/// Each transport call is retried on its own, so a failed chunk does not
/// re-send the chunks before it.
struct UploadTask {
    transport: Arc<dyn Transport>,
    org_unit: OrgUnit,
    chunk_size: usize,
    retry: Retry,
    cancel: CancellationToken,
}

#[async_trait]
impl Task<Extracted, Uploaded> for UploadTask {
    async fn execute(&self, extracted: Extracted) -> Result<Uploaded> {
        let Extracted {
            metadata,
            data_source_type,
            payload,
        } = extracted;
        let transport = &self.transport;
        let org_unit = &self.org_unit;
        let content_type = data_source_type.content_type();

        let upload = {
            let metadata = &metadata;
            self.retry
                .run(&self.cancel, || async move {
                    transport
                        .create_upload(metadata, content_type, org_unit)
                        .await
                        .map_err(Error::from)
                })
                .await?
        };
        tracing::debug!(extract_id = %metadata.id, upload_id = %upload.id, "upload created");

        let content = data_source_type.prepare_upload_content(&metadata, payload)?;
        let chunks = UploadChunk::split(&upload.id, &content, self.chunk_size)?;

        for chunk in &chunks {
            let upload = &upload;
            self.retry
                .run(&self.cancel, || async move {
                    transport
                        .upload_chunk(upload, chunk)
                        .await
                        .map_err(Error::from)
                })
                .await?;
            tracing::debug!(
                upload_id = %upload.id,
                chunk_index = chunk.chunk_index,
                bytes = chunk.content.len(),
                "chunk posted"
            );
        }

        Ok(Uploaded {
            upload: Arc::new(upload),
            extract_id: metadata.id.clone(),
            chunks: chunks.len(),
            bytes: content.len(),
        })
    }

    fn name(&self) -> &str {
        "upload"
    }
}

/// Deliver every extracted item, isolating per-item failures
///
/// Fails only when no upload was delivered.
pub(super) async fn upload_all(
    ctx: &mut PipelineContext,
    extracted: Vec<Extracted>,
) -> Result<Vec<Uploaded>> {
    let ids: Vec<String> = extracted.iter().map(|e| e.metadata.id.clone()).collect();
    let task = Arc::new(UploadTask {
        transport: ctx.transport.clone(),
        org_unit: ctx.config.org_unit.clone(),
        chunk_size: ctx.config.upload.chunk_size,
        retry: ctx.retry.clone(),
        cancel: ctx.cancel.clone(),
    });

    let results = ctx
        .executor
        .execute_each(&ctx.cancel, task, extracted)
        .await?;

    // Record what finished before looking at cancellation
    let mut uploaded = Vec::with_capacity(results.len());
    for (extract_id, result) in ids.iter().zip(results) {
        match result {
            Ok(item) => {
                ctx.record_success(Stage::Upload, extract_id);
                ctx.report.delivered.push(DeliveredUpload {
                    extract_id: item.extract_id.clone(),
                    upload_id: item.upload.id.clone(),
                    chunks: item.chunks,
                    bytes: item.bytes,
                    marked_complete: false,
                });
                uploaded.push(item);
            }
            Err(error) if ctx.is_interrupted(&error) => {}
            Err(error) => ctx.record_failure(Stage::Upload, extract_id, error),
        }
    }
    ctx.ensure_not_cancelled()?;

    let failures = ctx.failures_in(Stage::Upload);
    tracing::info!(delivered = uploaded.len(), failures, "upload stage finished");
    if uploaded.is_empty() {
        return Err(PipelineError::NoSuccesses {
            stage: Stage::Upload,
            failures,
        }
        .into());
    }
    Ok(uploaded)
}
