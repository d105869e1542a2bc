//! Factory registries
//!
//! Transports and data source types are chosen by code from configuration.
//! Implementations are made available by registering a factory under their
//! code; there is no global state.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::Config;
use crate::data_source::DataSourceType;
use crate::error::{Error, Result};
use crate::transport::Transport;

/// A factory building a `T` from configuration
pub type Factory<T> = Arc<dyn Fn(&Config) -> Result<Arc<T>> + Send + Sync>;

/// Maps codes to factories of `T`
pub struct FactoryRegistry<T: ?Sized> {
    kind: &'static str,
    config_key: &'static str,
    factories: BTreeMap<String, Factory<T>>,
}

/// Registry of transport factories
pub type TransportRegistry = FactoryRegistry<dyn Transport>;

/// Registry of data source type factories
pub type DataSourceTypeRegistry = FactoryRegistry<dyn DataSourceType>;

impl<T: ?Sized> FactoryRegistry<T> {
    /// An empty registry
    ///
    /// `kind` names what the registry builds in error messages; `config_key`
    /// is the setting whose value selects a code.
    pub fn new(kind: &'static str, config_key: &'static str) -> Self {
        Self {
            kind,
            config_key,
            factories: BTreeMap::new(),
        }
    }

    /// Register `factory` under `code`
    ///
    /// Fails if the code is already taken.
    pub fn register<F>(&mut self, code: impl Into<String>, factory: F) -> Result<()>
    where
        F: Fn(&Config) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let code = code.into();
        if self.factories.contains_key(&code) {
            return Err(Error::config(
                self.config_key,
                format!("{} {code} is already registered", self.kind),
            ));
        }
        tracing::debug!(kind = self.kind, code = %code, "registered factory");
        self.factories.insert(code, Arc::new(factory));
        Ok(())
    }

    /// Whether a factory is registered under `code`
    pub fn contains(&self, code: &str) -> bool {
        self.factories.contains_key(code)
    }

    /// Registered codes, in sorted order
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Build the implementation registered under `code`
    pub fn create(&self, code: &str, config: &Config) -> Result<Arc<T>> {
        let factory = self.factories.get(code).ok_or_else(|| {
            let known: Vec<&str> = self.codes().collect();
            Error::config(
                self.config_key,
                format!(
                    "unknown {} {code} (registered: {})",
                    self.kind,
                    known.join(", ")
                ),
            )
        })?;
        factory(config)
    }
}

impl FactoryRegistry<dyn DataSourceType> {
    /// An empty data source type registry
    pub fn data_source_types() -> Self {
        Self::new("data source type", "supported_data_source_types")
    }
}

impl<T: ?Sized> std::fmt::Debug for FactoryRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("kind", &self.kind)
            .field("codes", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}
