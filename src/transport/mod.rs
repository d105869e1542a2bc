//! Transport abstraction
//!
//! A [`Transport`] talks to the remote server: it supplies extract metadata
//! ([`MetadataProvider`]) and receives uploads ([`DataSink`]). The wire format
//! belongs to each implementation; this crate ships only
//! [`InMemoryTransport`] for dry runs and tests.

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, OrgUnit};
use crate::domain::{ExtractMetadata, UploadChunk, UploadMetadata};
use crate::error::TransportError;
use crate::registry::FactoryRegistry;

mod memory;

pub use memory::{InMemoryTransport, RecordedUpload};

/// Code of the built-in in-memory transport
pub const MEMORY_TRANSPORT: &str = "memory";

/// Supplies the extracts the server wants run
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Fetch the extract metadata for every data source type in `data_source_types`
    async fn fetch_extract_metadata(
        &self,
        data_source_types: &[String],
    ) -> Result<Vec<ExtractMetadata>, TransportError>;
}

/// Receives upload metadata, content and completion notifications
#[async_trait]
pub trait DataSink: Send + Sync {
    /// Register a new upload for `extract` and return the server's metadata for it
    async fn create_upload(
        &self,
        extract: &ExtractMetadata,
        content_type: &str,
        org_unit: &OrgUnit,
    ) -> Result<UploadMetadata, TransportError>;

    /// Post one chunk of an upload's content
    async fn upload_chunk(
        &self,
        upload: &UploadMetadata,
        chunk: &UploadChunk,
    ) -> Result<(), TransportError>;

    /// Tell the server every chunk of `upload` has been posted
    async fn mark_upload_complete(&self, upload: &UploadMetadata) -> Result<(), TransportError>;
}

/// A full transport: metadata provider and data sink in one
pub trait Transport: MetadataProvider + DataSink {}

impl<T: MetadataProvider + DataSink + ?Sized> Transport for T {}

impl FactoryRegistry<dyn Transport> {
    /// An empty transport registry
    pub fn transports() -> Self {
        Self::new("transport", "transport.factory")
    }

    /// A transport registry holding the built-in transports
    pub fn with_defaults() -> Self {
        let mut registry = Self::transports();
        // Cannot collide in an empty registry
        let _ = registry.register(MEMORY_TRANSPORT, memory_transport);
        registry
    }
}

fn memory_transport(config: &Config) -> crate::error::Result<Arc<dyn Transport>> {
    let transport = InMemoryTransport::from_options(&config.transport.options)?;
    Ok(Arc::new(transport))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TransportRegistry;

    #[tokio::test]
    async fn default_registry_builds_the_memory_transport() {
        let registry = TransportRegistry::with_defaults();
        assert!(registry.contains(MEMORY_TRANSPORT));

        let config = Config::new(OrgUnit {
            code: "12345".to_string(),
            name: "Test Facility".to_string(),
        });
        let transport = match registry.create(&config.transport.factory, &config) {
            Ok(transport) => transport,
            Err(err) => panic!("memory transport should build: {err}"),
        };
        let extracts = transport
            .fetch_extract_metadata(&["sql".to_string()])
            .await
            .unwrap();
        assert!(extracts.is_empty());
    }

    #[test]
    fn unknown_transport_is_a_config_error() {
        let registry = TransportRegistry::with_defaults();
        let config = Config::new(OrgUnit {
            code: "12345".to_string(),
            name: "Test Facility".to_string(),
        });
        assert!(matches!(
            registry.create("http", &config),
            Err(crate::error::Error::Config { .. })
        ));
    }
}
