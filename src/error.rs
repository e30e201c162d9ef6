//! Error types for the schema gate, codec and registry clients

use thiserror::Error;

use crate::compatibility::CompatibilityMode;
use crate::schema::SchemaId;

/// Result type for schema operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Schema gate and codec errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("Registration rejected for subject {subject}: {reason}")]
    RegistrationRejected { subject: String, reason: String },

    #[error("Incompatible schema version for subject {subject} ({mode})")]
    IncompatibleSchema {
        subject: String,
        mode: CompatibilityMode,
    },

    #[error("Serialization failed at {path}: {reason}")]
    Serialization { path: String, reason: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown schema id {id}")]
    UnknownSchema { id: SchemaId },

    #[error("Symbol '{symbol}' is not defined by reader enum {enum_name}")]
    UnresolvedEnumSymbol { enum_name: String, symbol: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid schema format: {0}")]
    InvalidFormat(String),

    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    #[error("Delivery to topic {topic} failed: {reason}")]
    Delivery { topic: String, reason: String },

    #[error("Avro error: {0}")]
    Avro(#[from] apache_avro::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Semver error: {0}")]
    Semver(#[from] semver::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),
}

impl SchemaError {
    pub(crate) fn serialization(path: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::Serialization {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn rejected(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        SchemaError::RegistrationRejected {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Transport-level failures a caller may choose to retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchemaError::RegistryUnavailable(_) | SchemaError::Delivery { .. }
        )
    }

    /// Schema evolution violations that must abort process startup
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            SchemaError::RegistrationRejected { .. } | SchemaError::IncompatibleSchema { .. }
        )
    }

    /// Failures scoped to a single message on the produce or consume path
    pub fn is_per_message(&self) -> bool {
        matches!(
            self,
            SchemaError::Serialization { .. }
                | SchemaError::MalformedPayload(_)
                | SchemaError::UnknownSchema { .. }
                | SchemaError::UnresolvedEnumSymbol { .. }
        )
    }
}
