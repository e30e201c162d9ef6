//! Configuration management for the signing service
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (signing.toml)
//! - Environment variables (SIGNING__*)
//!
//! ## Example config file (signing.toml):
//! ```toml
//! [registry]
//! url = "http://schema-registry:8081"
//! timeout_secs = 10
//!
//! [bus]
//! brokers = ["kafka-1:9092", "kafka-2:9092"]
//! group_id = "signing-service"
//!
//! [subjects.request]
//! topic = "signing-request"
//! compatibility = "FORWARD_TRANSITIVE"
//! version = "1.0.0"
//!
//! [subjects.response]
//! topic = "signing-response"
//! compatibility = "FORWARD_TRANSITIVE"
//! version = "1.1.0"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::catalog::Contract;
use crate::compatibility::CompatibilityMode;
use crate::error::Result;
use crate::schema::Subject;
use crate::version::ContractVersion;

/// Main configuration for the signing service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Schema registry connection
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Message broker connection
    #[serde(default)]
    pub bus: BusConfig,

    /// Subjects governed at startup
    #[serde(default)]
    pub subjects: SubjectsConfig,
}

/// Registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Base URL of the Confluent-compatible registry
    #[serde(default = "default_registry_url")]
    pub url: String,

    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Basic auth user
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

/// Broker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_brokers")]
    pub brokers: Vec<String>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Consumer group for the response subscription
    #[serde(default = "default_group_id")]
    pub group_id: String,

    /// How long a produce may wait for broker acknowledgement
    #[serde(default = "default_delivery_timeout_ms")]
    pub delivery_timeout_ms: u64,
}

/// The request and response subjects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectsConfig {
    #[serde(default = "default_request_subject")]
    pub request: SubjectConfig,

    #[serde(default = "default_response_subject")]
    pub response: SubjectConfig,
}

/// How one contract is bound to a topic and subject
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    pub topic: String,

    /// Registry subject; defaults to `<topic>-value`
    #[serde(default)]
    pub subject: Option<String>,

    pub compatibility: CompatibilityMode,

    /// Catalog version this process writes and reads
    pub version: String,

    /// Register the schema at startup, or only resolve an existing registration
    #[serde(default = "default_true")]
    pub register: bool,
}

// Default value functions
fn default_registry_url() -> String {
    "http://localhost:8081".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_client_id() -> String {
    "signing-schemas".to_string()
}

fn default_group_id() -> String {
    "signing-schemas".to_string()
}

fn default_delivery_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_request_subject() -> SubjectConfig {
    SubjectConfig::for_contract(Contract::SigningRequest, "1.0.0")
}

fn default_response_subject() -> SubjectConfig {
    SubjectConfig::for_contract(Contract::SigningResponse, "1.0.0")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            url: default_registry_url(),
            timeout_secs: default_timeout_secs(),
            username: None,
            password: None,
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            client_id: default_client_id(),
            group_id: default_group_id(),
            delivery_timeout_ms: default_delivery_timeout_ms(),
        }
    }
}

impl BusConfig {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.delivery_timeout_ms)
    }
}

impl Default for SubjectsConfig {
    fn default() -> Self {
        Self {
            request: default_request_subject(),
            response: default_response_subject(),
        }
    }
}

impl SubjectsConfig {
    pub fn for_contract(&self, contract: Contract) -> &SubjectConfig {
        match contract {
            Contract::SigningRequest => &self.request,
            Contract::SigningResponse => &self.response,
        }
    }
}

impl SubjectConfig {
    /// Default binding of a contract: its own topic, FORWARD_TRANSITIVE
    pub fn for_contract(contract: Contract, version: &str) -> Self {
        Self {
            topic: contract.default_topic().to_string(),
            subject: None,
            compatibility: CompatibilityMode::ForwardTransitive,
            version: version.to_string(),
            register: true,
        }
    }

    pub fn subject(&self) -> Subject {
        match &self.subject {
            Some(name) => Subject::new(name.clone()),
            None => Subject::value_for_topic(&self.topic),
        }
    }

    pub fn contract_version(&self) -> Result<ContractVersion> {
        Ok(ContractVersion::parse(&self.version)?)
    }
}

impl ServiceConfig {
    /// Load configuration from default locations
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> std::result::Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["signing.toml", ".signing.toml", "config/signing.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("com", "brave", "signing-schemas") {
            let xdg_config = config_dir.config_dir().join("signing.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (SIGNING__*)
        builder = builder.add_source(
            Environment::with_prefix("SIGNING")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("bus.brokers")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
