//! Table-backed data source type, extract metadata builders and configs

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use idr_client::{
    Config, DataSource, DataSourceDescriptor, DataSourceError, DataSourceType,
    DataSourceTypeRegistry, ExtractMetadata, InMemoryTransport, OrgUnit, Transport,
    TransportRegistry,
};

/// Code of [`TableSourceType`]
pub const TABLE_TYPE: &str = "table";

/// Code under which [`recording_transports`] registers the shared transport
pub const RECORDING_TRANSPORT: &str = "recording";

/// A data source type whose sources serve named in-memory tables
///
/// An extract's `query` is the table name; querying a missing table fails.
#[derive(Default)]
pub struct TableSourceType {
    tables: BTreeMap<String, String>,
    extract_calls: Arc<AtomicUsize>,
}

impl TableSourceType {
    /// Serve `tables` (name → CSV text)
    pub fn new<'a>(tables: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|(name, rows)| (name.to_string(), rows.to_string()))
                .collect(),
            extract_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of extract calls across every source of this type
    pub fn extract_calls(&self) -> Arc<AtomicUsize> {
        self.extract_calls.clone()
    }
}

struct TableSource {
    id: String,
    tables: BTreeMap<String, String>,
    extract_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl DataSource for TableSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        "in-memory tables"
    }

    async fn extract(&self, extract: &ExtractMetadata) -> Result<Vec<u8>, DataSourceError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.tables
            .get(&extract.query)
            .map(|rows| rows.clone().into_bytes())
            .ok_or_else(|| DataSourceError::Extraction {
                extract: extract.id.clone(),
                reason: format!("no such table: {}", extract.query),
            })
    }
}

impl DataSourceType for TableSourceType {
    fn code(&self) -> &str {
        TABLE_TYPE
    }

    fn name(&self) -> &str {
        "In-memory tables"
    }

    fn content_type(&self) -> &str {
        "text/csv"
    }

    fn data_source(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> Result<Arc<dyn DataSource>, DataSourceError> {
        Ok(Arc::new(TableSource {
            id: descriptor.id.clone(),
            tables: self.tables.clone(),
            extract_calls: self.extract_calls.clone(),
        }))
    }
}

/// Extract metadata reading `table` from the table source `data_source_id`
pub fn table_extract(id: &str, data_source_id: &str, table: &str) -> ExtractMetadata {
    ExtractMetadata {
        id: id.to_string(),
        name: format!("{table} extract"),
        description: None,
        data_source: DataSourceDescriptor {
            id: data_source_id.to_string(),
            name: format!("{data_source_id} database"),
            description: None,
            data_source_type: TABLE_TYPE.to_string(),
        },
        query: table.to_string(),
        applicable_source_versions: Vec::new(),
        preferred_uploads_name: Some(format!("{table}_upload")),
        attributes: BTreeMap::new(),
    }
}

/// A configuration with the table type enabled and the given transport factory
pub fn test_config(transport_factory: &str) -> Config {
    let mut config = Config::new(OrgUnit {
        code: "12345".to_string(),
        name: "Test Facility".to_string(),
    });
    config.supported_data_source_types = vec![TABLE_TYPE.to_string()];
    config.transport.factory = transport_factory.to_string();
    config.upload.chunk_size = 16;
    config.executor.max_workers = Some(3);
    config
}

/// A data source type registry holding one [`TableSourceType`]
pub fn table_types(data_source_type: Arc<TableSourceType>) -> DataSourceTypeRegistry {
    let mut registry = DataSourceTypeRegistry::data_source_types();
    registry
        .register(TABLE_TYPE, move |_config: &Config| {
            Ok(data_source_type.clone() as Arc<dyn DataSourceType>)
        })
        .unwrap();
    registry
}

/// The default transports plus one that always hands out `transport`
pub fn recording_transports(transport: Arc<InMemoryTransport>) -> TransportRegistry {
    let mut registry = TransportRegistry::with_defaults();
    registry
        .register(RECORDING_TRANSPORT, move |_config: &Config| {
            Ok(transport.clone() as Arc<dyn Transport>)
        })
        .unwrap();
    registry
}

/// Five patient tables shared by several tests
pub fn clinic_tables() -> TableSourceType {
    TableSourceType::new([
        ("patients", "id,name\n1,Amani\n2,Baraka\n"),
        ("visits", "patient,date\n1,2024-01-05\n2,2024-01-06\n"),
        ("labs", "patient,test,result\n1,cd4,512\n"),
        ("prescriptions", "patient,drug\n1,tdf\n2,3tc\n"),
        ("appointments", "patient,date\n2,2024-02-01\n"),
    ])
}
