//! Completion stage: notify the server that delivered uploads are complete.

use std::sync::Arc;

use crate::domain::UploadMetadata;
use crate::error::Result;
use crate::task::{TaskExt, task_fn};
use crate::types::{PipelineEvent, Stage};

use super::context::PipelineContext;
use super::report::CompletionWarning;
use super::upload::Uploaded;

/// Mark every delivered upload complete
///
/// A failed notification is a warning: the upload stays delivered.
pub(super) async fn mark_all_complete(
    ctx: &mut PipelineContext,
    uploaded: Vec<Uploaded>,
) -> Result<()> {
    let transport = ctx.transport.clone();
    let task = task_fn("mark_upload_complete", move |upload: Arc<UploadMetadata>| {
        let transport = transport.clone();
        async move { transport.mark_upload_complete(&upload).await }
    })
    .retrying(ctx.retry.clone(), ctx.cancel.clone());

    let uploads: Vec<Arc<UploadMetadata>> = uploaded.iter().map(|u| u.upload.clone()).collect();
    let results = ctx
        .executor
        .execute_each(&ctx.cancel, Arc::new(task), uploads)
        .await?;

    // Record what finished before looking at cancellation
    for (item, result) in uploaded.into_iter().zip(results) {
        match result {
            Ok(()) => {
                ctx.record_success(Stage::MarkComplete, &item.extract_id);
                if let Some(delivered) = ctx
                    .report
                    .delivered
                    .iter_mut()
                    .find(|d| d.upload_id == item.upload.id)
                {
                    delivered.marked_complete = true;
                }
            }
            Err(error) if ctx.is_interrupted(&error) => {}
            Err(error) => {
                tracing::warn!(
                    upload_id = %item.upload.id,
                    extract_id = %item.extract_id,
                    error = %error,
                    "failed to mark upload as complete"
                );
                ctx.emit(PipelineEvent::CompletionWarning {
                    upload_id: item.upload.id.clone(),
                    error: error.to_string(),
                });
                ctx.report.warnings.push(CompletionWarning {
                    upload_id: item.upload.id.clone(),
                    extract_id: item.extract_id,
                    error,
                });
            }
        }
    }
    ctx.ensure_not_cancelled()?;

    tracing::info!(
        completed = ctx.report.delivered.iter().filter(|d| d.marked_complete).count(),
        warnings = ctx.report.warnings.len(),
        "completion stage finished"
    );
    Ok(())
}
