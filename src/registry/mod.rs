//! Schema registry clients
//!
//! [`RegistryClient`] is the seam between the gate/codec and whatever stores schemas.
//! [`ConfluentRegistry`] talks to a Confluent-compatible HTTP service;
//! [`InMemoryRegistry`] applies the same rules in process for tests and local runs.

pub mod confluent;
pub mod memory;

pub use confluent::{ConfluentRegistry, RegistryAuth};
pub use memory::InMemoryRegistry;

use apache_avro::types::Value;
use async_trait::async_trait;
use tracing::debug;

use crate::codec::{wire, WriterSchema};
use crate::compatibility::CompatibilityMode;
use crate::error::Result;
use crate::schema::{SchemaDefinition, SchemaId, Subject};

/// One version of a subject as the registry stores it
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectVersion {
    pub subject: Subject,
    pub version: u32,
    pub id: SchemaId,
    pub schema: SchemaDefinition,
}

/// Operations the service needs from a schema registry
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Register `schema` under `subject`, first making sure the subject is governed by
    /// `mode`. Registering a body the subject already holds returns its existing id.
    async fn register(
        &self,
        schema: &SchemaDefinition,
        subject: &Subject,
        mode: CompatibilityMode,
    ) -> Result<SchemaId>;

    /// Whether `schema` satisfies the subject's configured compatibility mode
    async fn check_compatibility(&self, schema: &SchemaDefinition, subject: &Subject) -> Result<bool>;

    /// Identifier of a schema already registered under `subject`
    async fn identifier_for_schema(&self, schema: &SchemaDefinition, subject: &Subject) -> Result<SchemaId>;

    /// Schema body for an identifier
    async fn schema_by_id(&self, id: SchemaId) -> Result<SchemaDefinition>;

    async fn latest_version(&self, subject: &Subject) -> Result<SubjectVersion>;

    /// Decode a framed payload into `reader` without a long-lived codec
    async fn decode_with_reader_schema(
        &self,
        payload: &[u8],
        reader: &SchemaDefinition,
        subject: &Subject,
    ) -> Result<Value> {
        let (id, body) = wire::unframe(payload)?;
        let writer = WriterSchema::new(id, self.schema_by_id(id).await?)?;
        debug!(%subject, schema_id = %id, reader = %reader.full_name(), "Decoding with reader schema");
        writer.decode_body(body, reader)
    }
}
