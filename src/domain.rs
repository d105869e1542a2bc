//! Domain records exchanged with the server: extract and upload metadata,
//! upload chunks

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Free-form attributes attached to metadata records
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Descriptor of a data source as supplied by the server
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSourceDescriptor {
    /// Unique id of the data source
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// Code of the [`DataSourceType`](crate::data_source::DataSourceType) owning this source
    pub data_source_type: String,
}

/// Describes one extraction to run against a data source
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExtractMetadata {
    /// Unique id
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
    /// The data source this extract runs against
    pub data_source: DataSourceDescriptor,
    /// Query (or equivalent) understood by the data source
    pub query: String,
    /// Versions of the source system this extract applies to
    #[serde(default)]
    pub applicable_source_versions: Vec<String>,
    /// Name the server should give the resulting upload
    #[serde(default)]
    pub preferred_uploads_name: Option<String>,
    /// Implementation-specific extras
    #[serde(default)]
    pub attributes: Attributes,
}

/// Server-issued metadata for one packaged extraction
///
/// Does not carry the payload; content travels as [`UploadChunk`]s.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadMetadata {
    /// Unique id assigned by the server
    pub id: String,
    /// Id of the [`ExtractMetadata`] this upload belongs to
    pub extract_metadata_id: String,
    /// Code of the reporting organisation unit
    pub org_unit_code: String,
    /// Name of the reporting organisation unit
    pub org_unit_name: String,
    /// MIME type of the upload content
    pub content_type: String,
    /// Implementation-specific extras
    #[serde(default)]
    pub attributes: Attributes,
}

/// A bounded-size piece of an upload's content
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadChunk {
    /// Id of the [`UploadMetadata`] this chunk belongs to
    pub upload_id: String,
    /// Zero-based position of the chunk within the upload
    pub chunk_index: u32,
    /// Raw bytes
    pub content: Vec<u8>,
}

impl UploadChunk {
    /// Cut `content` into chunks of at most `chunk_size` bytes
    ///
    /// Indices are contiguous from zero. Empty content yields a single empty
    /// chunk so that every upload carries at least one chunk.
    pub fn split(upload_id: &str, content: &[u8], chunk_size: usize) -> Result<Vec<UploadChunk>> {
        if chunk_size == 0 {
            return Err(Error::config(
                "upload.chunk_size",
                "chunk_size must be greater than 0",
            ));
        }
        if content.is_empty() {
            return Ok(vec![UploadChunk {
                upload_id: upload_id.to_string(),
                chunk_index: 0,
                content: Vec::new(),
            }]);
        }

        content
            .chunks(chunk_size)
            .enumerate()
            .map(|(index, piece)| {
                let chunk_index = u32::try_from(index).map_err(|_| {
                    Error::InvalidChunks(format!(
                        "upload {upload_id} needs more than {} chunks",
                        u32::MAX
                    ))
                })?;
                Ok(UploadChunk {
                    upload_id: upload_id.to_string(),
                    chunk_index,
                    content: piece.to_vec(),
                })
            })
            .collect()
    }

    /// Join chunks back into the original content
    ///
    /// Chunks may arrive in any order, but must all belong to the same upload
    /// and cover every index from zero without duplicates.
    pub fn reassemble(mut chunks: Vec<UploadChunk>) -> Result<Vec<u8>> {
        let Some(upload_id) = chunks.first().map(|c| c.upload_id.clone()) else {
            return Err(Error::InvalidChunks("no chunks to reassemble".to_string()));
        };
        if let Some(stray) = chunks.iter().find(|c| c.upload_id != upload_id) {
            return Err(Error::InvalidChunks(format!(
                "chunk {} belongs to upload {}, expected {upload_id}",
                stray.chunk_index, stray.upload_id
            )));
        }

        chunks.sort_by_key(|c| c.chunk_index);
        let mut content = Vec::with_capacity(chunks.iter().map(|c| c.content.len()).sum());
        for (expected, chunk) in chunks.into_iter().enumerate() {
            let index = chunk.chunk_index as usize;
            if index < expected {
                return Err(Error::InvalidChunks(format!(
                    "duplicate chunk {index} in upload {upload_id}"
                )));
            }
            if index > expected {
                return Err(Error::InvalidChunks(format!(
                    "missing chunk {expected} in upload {upload_id}"
                )));
            }
            content.extend_from_slice(&chunk.content);
        }
        Ok(content)
    }
}
