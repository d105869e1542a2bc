//! Configuration types for idr-client
//!
//! Only the values consumed by the engine live here; reading them from a file
//! or the environment is up to the embedding application.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// Organisation unit the uploaded data is attributed to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgUnit {
    /// Unique code of the organisation unit (e.g., a facility code)
    pub code: String,
    /// Human-readable name of the organisation unit
    pub name: String,
}

/// Retry configuration for transient failures
///
/// Field names follow the `RETRY` settings block of the client's
/// configuration file; all durations are expressed in seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total wall-clock budget for one retried operation (default: 60 seconds)
    #[serde(
        rename = "default_deadline",
        default = "default_deadline",
        with = "duration_secs"
    )]
    pub deadline: Duration,

    /// Delay before the first retry (default: 1 second)
    #[serde(
        rename = "default_initial_delay",
        default = "default_initial_delay",
        with = "duration_secs"
    )]
    pub initial_delay: Duration,

    /// Upper bound for a single delay (default: 60 seconds)
    #[serde(
        rename = "default_maximum_delay",
        default = "default_maximum_delay",
        with = "duration_secs"
    )]
    pub maximum_delay: Duration,

    /// Multiplier applied to the delay after each failed attempt (default: 2.0)
    #[serde(
        rename = "default_multiplicative_factor",
        default = "default_multiplicative_factor"
    )]
    pub multiplicative_factor: f64,

    /// When false every operation is attempted exactly once (default: true)
    #[serde(rename = "enable_retries", default = "default_true")]
    pub enabled: bool,

    /// Stretch each delay by a random factor to spread out retries (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            deadline: default_deadline(),
            initial_delay: default_initial_delay(),
            maximum_delay: default_maximum_delay(),
            multiplicative_factor: default_multiplicative_factor(),
            enabled: true,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Check the retry invariants
    pub fn validate(&self) -> Result<()> {
        if self.deadline.is_zero() {
            return Err(Error::config(
                "retry.default_deadline",
                "the deadline must be greater than 0",
            ));
        }
        if self.initial_delay.is_zero() {
            return Err(Error::config(
                "retry.default_initial_delay",
                "the initial delay must be greater than 0",
            ));
        }
        if self.maximum_delay < self.initial_delay {
            return Err(Error::config(
                "retry.default_maximum_delay",
                format!(
                    "the maximum delay ({:.2}s) must be greater than or equal to the initial delay ({:.2}s)",
                    self.maximum_delay.as_secs_f64(),
                    self.initial_delay.as_secs_f64()
                ),
            ));
        }
        if !(self.multiplicative_factor.is_finite() && self.multiplicative_factor > 0.0) {
            return Err(Error::config(
                "retry.default_multiplicative_factor",
                "the multiplicative factor must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Concurrent executor configuration
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of task invocations running at once (None = one worker per invocation)
    #[serde(default)]
    pub max_workers: Option<usize>,
}

/// Upload packaging configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum size of one upload chunk in bytes (default: 1 MiB)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
        }
    }
}

/// Transport selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Code of the transport factory to instantiate (default: "memory")
    #[serde(default = "default_transport_factory")]
    pub factory: String,

    /// Implementation-specific options handed to the factory
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            factory: default_transport_factory(),
            options: serde_json::Map::new(),
        }
    }
}

/// Main configuration for the pipeline
///
/// Fields are organized into logical sub-configs:
/// - [`retry`](RetryConfig) - backoff defaults for every retried operation
/// - [`executor`](ExecutorConfig) - fan-out worker budget
/// - [`upload`](UploadConfig) - chunk sizing
/// - [`transport`](TransportConfig) - which transport factory to use
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Organisation unit attached to every upload
    pub org_unit: OrgUnit,

    /// Retry defaults
    #[serde(default)]
    pub retry: RetryConfig,

    /// Concurrent executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Upload packaging settings
    #[serde(default)]
    pub upload: UploadConfig,

    /// Transport selection
    #[serde(default)]
    pub transport: TransportConfig,

    /// Codes of the data source types enabled for this client
    #[serde(default)]
    pub supported_data_source_types: Vec<String>,
}

impl Config {
    /// Create a configuration with defaults for everything but the org unit
    pub fn new(org_unit: OrgUnit) -> Self {
        Self {
            org_unit,
            retry: RetryConfig::default(),
            executor: ExecutorConfig::default(),
            upload: UploadConfig::default(),
            transport: TransportConfig::default(),
            supported_data_source_types: Vec::new(),
        }
    }

    /// Validate every section, returning the first violation found
    pub fn validate(&self) -> Result<()> {
        if self.org_unit.code.trim().is_empty() {
            return Err(Error::config(
                "org_unit.code",
                "the org unit code must not be empty",
            ));
        }
        self.retry.validate()?;
        if self.executor.max_workers == Some(0) {
            return Err(Error::config(
                "executor.max_workers",
                "max_workers must be at least 1 when set",
            ));
        }
        if self.upload.chunk_size == 0 {
            return Err(Error::config(
                "upload.chunk_size",
                "chunk_size must be greater than 0",
            ));
        }
        if self.transport.factory.trim().is_empty() {
            return Err(Error::config(
                "transport.factory",
                "a transport factory must be named",
            ));
        }
        Ok(())
    }
}

fn default_deadline() -> Duration {
    Duration::from_secs(60)
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_maximum_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_multiplicative_factor() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_transport_factory() -> String {
    crate::transport::MEMORY_TRANSPORT.to_string()
}

// Durations as fractional seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
