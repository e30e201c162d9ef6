//! Schema-aware payload codec
//!
//! Producers encode with the identifier resolved by the compatibility gate; consumers
//! decode any framed payload into the reader schema they declare. Writer schemas are
//! fetched from the registry the first time an identifier is seen and cached for the
//! life of the codec.

pub mod datum;
pub mod wire;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use apache_avro::types::Value;
use tracing::{debug, info};

use crate::error::{Result, SchemaError};
use crate::gate::SchemaIdCache;
use crate::record::AvroRecord;
use crate::registry::RegistryClient;
use crate::schema::{AvroType, SchemaDefinition, SchemaId};

/// A registered schema compiled for datum encoding
#[derive(Debug, Clone)]
pub struct WriterSchema {
    pub id: SchemaId,
    pub definition: SchemaDefinition,
    avro: apache_avro::Schema,
}

impl WriterSchema {
    pub fn new(id: SchemaId, definition: SchemaDefinition) -> Result<Self> {
        let avro = definition.to_avro()?;
        Ok(Self {
            id,
            definition,
            avro,
        })
    }

    /// Serialize a record and frame it with this schema's identifier
    pub fn encode(&self, record: &Value) -> Result<Vec<u8>> {
        let root = AvroType::Record(self.definition.root().clone());
        let conformed = datum::conform(record, &root, "")?;
        let body = apache_avro::to_avro_datum(&self.avro, conformed)
            .map_err(|e| SchemaError::serialization(self.definition.full_name(), e.to_string()))?;
        Ok(wire::frame(self.id, &body))
    }

    /// Read a datum body written with this schema and resolve it into `reader`
    pub fn decode_body(&self, body: &[u8], reader: &SchemaDefinition) -> Result<Value> {
        let mut cursor = body;
        let written = apache_avro::from_avro_datum(&self.avro, &mut cursor, None).map_err(|e| {
            SchemaError::MalformedPayload(format!(
                "body does not match writer schema {}: {}",
                self.id, e
            ))
        })?;
        if !cursor.is_empty() {
            return Err(SchemaError::MalformedPayload(format!(
                "{} trailing bytes after datum written with schema {}",
                cursor.len(),
                self.id
            )));
        }
        datum::project(written, &AvroType::Record(reader.root().clone()), "")
    }
}

/// Encoder and decoder for framed Avro payloads
pub struct Codec {
    registry: Arc<dyn RegistryClient>,
    writers: RwLock<HashMap<SchemaId, Arc<WriterSchema>>>,
}

impl Codec {
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            registry,
            writers: RwLock::new(HashMap::new()),
        }
    }

    /// Codec pre-seeded with every schema the gate admitted
    pub fn with_registered(registry: Arc<dyn RegistryClient>, ids: &SchemaIdCache) -> Result<Self> {
        let codec = Self::new(registry);
        for registered in ids.iter() {
            codec.preload(registered.id, registered.schema.clone())?;
        }
        Ok(codec)
    }

    /// Cache a schema whose identifier is already known
    pub fn preload(&self, id: SchemaId, definition: SchemaDefinition) -> Result<Arc<WriterSchema>> {
        let writer = Arc::new(WriterSchema::new(id, definition)?);
        self.writers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, writer.clone());
        Ok(writer)
    }

    /// Writer schema for an identifier, fetched from the registry on first use
    pub async fn writer_schema(&self, id: SchemaId) -> Result<Arc<WriterSchema>> {
        let cached = self
            .writers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        if let Some(writer) = cached {
            return Ok(writer);
        }

        let definition = self.registry.schema_by_id(id).await?;
        info!(schema_id = %id, schema = %definition.full_name(), "Fetched writer schema");
        self.preload(id, definition)
    }

    /// Encode a record with the schema registered under `id`
    pub async fn encode(&self, record: &Value, id: SchemaId) -> Result<Vec<u8>> {
        let writer = self.writer_schema(id).await?;
        let payload = writer.encode(record)?;
        debug!(schema_id = %id, bytes = payload.len(), "Encoded payload");
        Ok(payload)
    }

    /// Decode a framed payload into the shape of `reader`
    pub async fn decode(&self, payload: &[u8], reader: &SchemaDefinition) -> Result<Value> {
        let (id, body) = wire::unframe(payload)?;
        let writer = self.writer_schema(id).await?;
        let value = writer.decode_body(body, reader)?;
        debug!(schema_id = %id, reader = %reader.full_name(), "Decoded payload");
        Ok(value)
    }

    pub async fn encode_record<R: AvroRecord>(&self, record: &R, id: SchemaId) -> Result<Vec<u8>> {
        self.encode(&record.to_avro()?, id).await
    }

    pub async fn decode_record<R: AvroRecord>(
        &self,
        payload: &[u8],
        reader: &SchemaDefinition,
    ) -> Result<R> {
        R::from_avro(self.decode(payload, reader).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compatibility::CompatibilityMode;
    use crate::registry::InMemoryRegistry;
    use crate::schema::Subject;

    const V1: &str = r#"{"type":"record","name":"Token","namespace":"test","fields":[
        {"name":"id","type":"string"},
        {"name":"count","type":"int"}
    ]}"#;

    const V2: &str = r#"{"type":"record","name":"Token","namespace":"test","fields":[
        {"name":"id","type":"string"},
        {"name":"count","type":"long"},
        {"name":"note","type":["null","string"],"default":null}
    ]}"#;

    fn record(id: &str, count: i32) -> Value {
        Value::Record(vec![
            ("id".into(), Value::String(id.into())),
            ("count".into(), Value::Int(count)),
        ])
    }

    #[tokio::test]
    async fn test_encode_decode_through_registry() {
        let registry = Arc::new(InMemoryRegistry::new());
        let v1 = SchemaDefinition::parse(V1).unwrap();
        let id = registry
            .register(&v1, &Subject::new("token-value"), CompatibilityMode::Backward)
            .await
            .unwrap();

        let codec = Codec::new(registry);
        let payload = codec.encode(&record("a", 2), id).await.unwrap();
        assert_eq!(payload[0], wire::MAGIC_BYTE);
        assert_eq!(&payload[1..5], &id.0.to_be_bytes());

        let decoded = codec.decode(&payload, &v1).await.unwrap();
        assert_eq!(decoded, record("a", 2));
    }

    #[tokio::test]
    async fn test_decode_into_newer_reader() {
        let registry = Arc::new(InMemoryRegistry::new());
        let v1 = SchemaDefinition::parse(V1).unwrap();
        let v2 = SchemaDefinition::parse(V2).unwrap();
        let id = registry
            .register(&v1, &Subject::new("token-value"), CompatibilityMode::Backward)
            .await
            .unwrap();

        let codec = Codec::new(registry);
        let payload = codec.encode(&record("a", 2), id).await.unwrap();
        let decoded = codec.decode(&payload, &v2).await.unwrap();
        assert_eq!(
            decoded,
            Value::Record(vec![
                ("id".into(), Value::String("a".into())),
                ("count".into(), Value::Long(2)),
                ("note".into(), Value::Union(0, Box::new(Value::Null))),
            ])
        );
    }

    #[tokio::test]
    async fn test_unknown_identifier() {
        let codec = Codec::new(Arc::new(InMemoryRegistry::new()));
        let v1 = SchemaDefinition::parse(V1).unwrap();

        let err = codec.encode(&record("a", 1), SchemaId(404)).await.unwrap_err();
        assert!(matches!(err, SchemaError::UnknownSchema { id } if id == SchemaId(404)));

        let payload = wire::frame(SchemaId(404), &[]);
        assert!(matches!(
            codec.decode(&payload, &v1).await,
            Err(SchemaError::UnknownSchema { .. })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_body_is_malformed() {
        let codec = Codec::new(Arc::new(InMemoryRegistry::new()));
        let v1 = SchemaDefinition::parse(V1).unwrap();
        codec.preload(SchemaId(1), v1.clone()).unwrap();

        let good = codec.encode(&record("abc", 1), SchemaId(1)).await.unwrap();
        let truncated = &good[..good.len() - 2];
        assert!(matches!(
            codec.decode(truncated, &v1).await,
            Err(SchemaError::MalformedPayload(_))
        ));

        let mut padded = good.clone();
        padded.push(0);
        assert!(matches!(
            codec.decode(&padded, &v1).await,
            Err(SchemaError::MalformedPayload(msg)) if msg.contains("trailing")
        ));

        assert!(matches!(
            codec.decode(&[0, 0], &v1).await,
            Err(SchemaError::MalformedPayload(_))
        ));
    }

    #[tokio::test]
    async fn test_logical_types_travel_as_base_values() {
        let registry = Arc::new(InMemoryRegistry::new());
        let schema = SchemaDefinition::parse(
            r#"{"type":"record","name":"Stamp","namespace":"test","fields":[
                {"name":"at","type":{"type":"long","logicalType":"timestamp-millis"}},
                {"name":"id","type":{"type":"string","logicalType":"uuid"},"aliases":["key"]}
            ]}"#,
        )
        .unwrap();
        let id = registry
            .register(&schema, &Subject::new("stamp-value"), CompatibilityMode::Backward)
            .await
            .unwrap();

        let record = Value::Record(vec![
            ("at".into(), Value::Long(1_700_000_000_000)),
            ("id".into(), Value::String("3f1c0e8e-4c4a-4d3a-9c39-0b7f1b1a2c3d".into())),
        ]);
        let codec = Codec::new(registry);
        let payload = codec.encode(&record, id).await.unwrap();
        assert_eq!(codec.decode(&payload, &schema).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_encode_rejects_wrong_shape() {
        let codec = Codec::new(Arc::new(InMemoryRegistry::new()));
        codec
            .preload(SchemaId(1), SchemaDefinition::parse(V1).unwrap())
            .unwrap();

        let missing = Value::Record(vec![("id".into(), Value::String("a".into()))]);
        assert!(matches!(
            codec.encode(&missing, SchemaId(1)).await,
            Err(SchemaError::Serialization { path, .. }) if path == "count"
        ));
    }
}
