//! Data source abstraction
//!
//! A [`DataSourceType`] is a category of data source (e.g. `"sql"`). It turns
//! the [`DataSourceDescriptor`]s the server hands out into live
//! [`DataSource`]s and packages their extracts for upload. Concrete drivers
//! live outside this crate and are plugged in through
//! [`DataSourceTypeRegistry`](crate::registry::DataSourceTypeRegistry).

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::domain::{DataSourceDescriptor, ExtractMetadata};
use crate::error::{DataSourceError, Error, Result};
use crate::registry::DataSourceTypeRegistry;

/// A connectable source of extract data, e.g. one database instance
///
/// `connect` is called once before the first extract and `dispose` once after
/// the last; both default to doing nothing.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Unique id, matching [`DataSourceDescriptor::id`]
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Open the connection
    async fn connect(&self) -> std::result::Result<(), DataSourceError> {
        Ok(())
    }

    /// Run one extract and return the raw payload
    async fn extract(
        &self,
        extract: &ExtractMetadata,
    ) -> std::result::Result<Vec<u8>, DataSourceError>;

    /// Release the connection
    async fn dispose(&self) -> std::result::Result<(), DataSourceError> {
        Ok(())
    }
}

/// A category of data source
pub trait DataSourceType: Send + Sync {
    /// Unique code, as listed in `supported_data_source_types`
    fn code(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// MIME type of the upload content this type produces
    fn content_type(&self) -> &str;

    /// Build the data source described by `descriptor`
    fn data_source(
        &self,
        descriptor: &DataSourceDescriptor,
    ) -> std::result::Result<Arc<dyn DataSource>, DataSourceError>;

    /// Turn a raw extract into upload content (the identity by default)
    fn prepare_upload_content(
        &self,
        _extract: &ExtractMetadata,
        payload: Vec<u8>,
    ) -> std::result::Result<Vec<u8>, DataSourceError> {
        Ok(payload)
    }
}

/// The set of data source types enabled for a run, keyed by code
#[derive(Clone, Default)]
pub struct DataSourceTypes {
    types: BTreeMap<String, Arc<dyn DataSourceType>>,
}

impl DataSourceTypes {
    /// An empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type; its code must not be taken yet
    pub fn insert(&mut self, data_source_type: Arc<dyn DataSourceType>) -> Result<()> {
        let code = data_source_type.code().to_string();
        if self.types.contains_key(&code) {
            return Err(Error::config(
                "supported_data_source_types",
                format!("data source type {code} is listed more than once"),
            ));
        }
        self.types.insert(code, data_source_type);
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, data_source_type: Arc<dyn DataSourceType>) -> Result<Self> {
        self.insert(data_source_type)?;
        Ok(self)
    }

    /// Instantiate every type named in `config.supported_data_source_types`
    pub fn from_registry(registry: &DataSourceTypeRegistry, config: &Config) -> Result<Self> {
        let mut types = Self::new();
        for code in &config.supported_data_source_types {
            let data_source_type = registry.create(code, config)?;
            if data_source_type.code() != code {
                return Err(Error::config(
                    "supported_data_source_types",
                    format!(
                        "factory registered as {code} produced data source type {}",
                        data_source_type.code()
                    ),
                ));
            }
            types.insert(data_source_type)?;
        }
        Ok(types)
    }

    /// Look a type up by code
    pub fn get(&self, code: &str) -> std::result::Result<&Arc<dyn DataSourceType>, DataSourceError> {
        self.types
            .get(code)
            .ok_or_else(|| DataSourceError::UnsupportedType(code.to_string()))
    }

    /// Codes of every type, in sorted order
    pub fn codes(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    /// Number of types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no type is enabled
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl std::fmt::Debug for DataSourceTypes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.types.keys()).finish()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrgUnit;

    struct CsvSource {
        id: String,
    }

    #[async_trait]
    impl DataSource for CsvSource {
        fn id(&self) -> &str {
            &self.id
        }

        fn name(&self) -> &str {
            "csv"
        }

        async fn extract(
            &self,
            extract: &ExtractMetadata,
        ) -> std::result::Result<Vec<u8>, DataSourceError> {
            Ok(extract.query.as_bytes().to_vec())
        }
    }

    struct CsvType;

    impl DataSourceType for CsvType {
        fn code(&self) -> &str {
            "csv"
        }

        fn name(&self) -> &str {
            "CSV files"
        }

        fn content_type(&self) -> &str {
            "text/csv"
        }

        fn data_source(
            &self,
            descriptor: &DataSourceDescriptor,
        ) -> std::result::Result<Arc<dyn DataSource>, DataSourceError> {
            Ok(Arc::new(CsvSource {
                id: descriptor.id.clone(),
            }))
        }
    }

    fn config_with(types: &[&str]) -> Config {
        let mut config = Config::new(OrgUnit {
            code: "12345".to_string(),
            name: "Test Facility".to_string(),
        });
        config.supported_data_source_types = types.iter().map(|t| t.to_string()).collect();
        config
    }

    #[test]
    fn duplicate_codes_are_rejected() {
        let types = DataSourceTypes::new().with(Arc::new(CsvType)).unwrap();
        assert!(types.with(Arc::new(CsvType)).is_err());
    }

    #[test]
    fn unknown_code_is_an_unsupported_type() {
        let types = DataSourceTypes::new();
        assert!(matches!(
            types.get("sql"),
            Err(DataSourceError::UnsupportedType(code)) if code == "sql"
        ));
    }

    #[test]
    fn from_registry_instantiates_configured_types_only() {
        let mut registry = DataSourceTypeRegistry::data_source_types();
        registry
            .register("csv", |_| Ok(Arc::new(CsvType) as Arc<dyn DataSourceType>))
            .unwrap();

        let types = DataSourceTypes::from_registry(&registry, &config_with(&["csv"])).unwrap();
        assert_eq!(types.codes(), vec!["csv".to_string()]);

        let none = DataSourceTypes::from_registry(&registry, &config_with(&[])).unwrap();
        assert!(none.is_empty());

        assert!(DataSourceTypes::from_registry(&registry, &config_with(&["sql"])).is_err());
    }

    #[tokio::test]
    async fn default_hooks_are_no_ops() {
        let source = CsvType
            .data_source(&DataSourceDescriptor {
                id: "ds-1".to_string(),
                name: "exports".to_string(),
                description: None,
                data_source_type: "csv".to_string(),
            })
            .unwrap();

        source.connect().await.unwrap();
        source.dispose().await.unwrap();
        assert_eq!(source.id(), "ds-1");
    }
}
