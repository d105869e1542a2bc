//! In-memory transport for dry runs and tests

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{DataSink, MetadataProvider};
use crate::config::OrgUnit;
use crate::domain::{ExtractMetadata, UploadChunk, UploadMetadata};
use crate::error::{Error, TransportError};

/// An upload as received by [`InMemoryTransport`]
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedUpload {
    /// Metadata issued for the upload
    pub metadata: UploadMetadata,
    /// Chunks received, in arrival order
    pub chunks: Vec<UploadChunk>,
    /// Whether completion was notified
    pub completed: bool,
}

impl RecordedUpload {
    /// The upload's content, reassembled from its chunks
    pub fn content(&self) -> crate::error::Result<Vec<u8>> {
        UploadChunk::reassemble(self.chunks.clone())
    }
}

#[derive(Default)]
struct State {
    next_upload: u64,
    uploads: BTreeMap<String, RecordedUpload>,
}

/// Serves a fixed set of extract metadata and records everything uploaded
///
/// Chunks must arrive in index order; re-posting the last chunk with the same
/// content is accepted so that retried posts are idempotent.
pub struct InMemoryTransport {
    extracts: Vec<ExtractMetadata>,
    state: Mutex<State>,
}

impl InMemoryTransport {
    /// Serve `extracts` to every metadata request
    pub fn new(extracts: Vec<ExtractMetadata>) -> Self {
        Self {
            extracts,
            state: Mutex::new(State::default()),
        }
    }

    /// Build from `transport.options`; an optional `extracts` array seeds the metadata
    pub fn from_options(
        options: &serde_json::Map<String, serde_json::Value>,
    ) -> crate::error::Result<Self> {
        let extracts = match options.get("extracts") {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                Error::config(
                    "transport.options.extracts",
                    format!("invalid extract metadata: {e}"),
                )
            })?,
            None => Vec::new(),
        };
        Ok(Self::new(extracts))
    }

    /// Every upload received so far, ordered by upload id
    pub async fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.lock().await.uploads.values().cloned().collect()
    }

    /// The upload created for `extract_id`, if any
    pub async fn upload_for_extract(&self, extract_id: &str) -> Option<RecordedUpload> {
        self.state
            .lock()
            .await
            .uploads
            .values()
            .find(|u| u.metadata.extract_metadata_id == extract_id)
            .cloned()
    }
}

#[async_trait]
impl MetadataProvider for InMemoryTransport {
    async fn fetch_extract_metadata(
        &self,
        data_source_types: &[String],
    ) -> Result<Vec<ExtractMetadata>, TransportError> {
        Ok(self
            .extracts
            .iter()
            .filter(|e| data_source_types.contains(&e.data_source.data_source_type))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DataSink for InMemoryTransport {
    async fn create_upload(
        &self,
        extract: &ExtractMetadata,
        content_type: &str,
        org_unit: &OrgUnit,
    ) -> Result<UploadMetadata, TransportError> {
        let mut state = self.state.lock().await;
        state.next_upload += 1;
        let id = format!("upload-{}", state.next_upload);

        let mut attributes = BTreeMap::new();
        if let Some(name) = &extract.preferred_uploads_name {
            attributes.insert("name".to_string(), serde_json::Value::from(name.clone()));
        }

        let metadata = UploadMetadata {
            id: id.clone(),
            extract_metadata_id: extract.id.clone(),
            org_unit_code: org_unit.code.clone(),
            org_unit_name: org_unit.name.clone(),
            content_type: content_type.to_string(),
            attributes,
        };
        state.uploads.insert(
            id,
            RecordedUpload {
                metadata: metadata.clone(),
                chunks: Vec::new(),
                completed: false,
            },
        );
        Ok(metadata)
    }

    async fn upload_chunk(
        &self,
        upload: &UploadMetadata,
        chunk: &UploadChunk,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let recorded = state
            .uploads
            .get_mut(&upload.id)
            .ok_or_else(|| TransportError::UnknownUpload(upload.id.clone()))?;

        let rejected = |reason: String| TransportError::Rejected {
            operation: "upload_chunk".to_string(),
            reason,
        };
        if recorded.completed {
            return Err(rejected(format!("upload {} is already complete", upload.id)));
        }
        if chunk.upload_id != upload.id {
            return Err(rejected(format!(
                "chunk belongs to upload {}, posted to {}",
                chunk.upload_id, upload.id
            )));
        }

        let expected = u32::try_from(recorded.chunks.len())
            .map_err(|_| rejected(format!("upload {} has no chunk indices left", upload.id)))?;
        if chunk.chunk_index == expected {
            recorded.chunks.push(chunk.clone());
            return Ok(());
        }
        if chunk.chunk_index.checked_add(1) == Some(expected)
            && recorded.chunks.last() == Some(chunk)
        {
            return Ok(());
        }
        Err(rejected(format!(
            "expected chunk {expected} of upload {}, got {}",
            upload.id, chunk.chunk_index
        )))
    }

    async fn mark_upload_complete(&self, upload: &UploadMetadata) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        let recorded = state
            .uploads
            .get_mut(&upload.id)
            .ok_or_else(|| TransportError::UnknownUpload(upload.id.clone()))?;
        recorded.completed = true;
        Ok(())
    }
}
