//! Typed signing contracts
//!
//! Rust views of the `SigningRequestSet` and `SigningResultSet` records. Conversion
//! goes through [`AvroRecord`], so the codec stays generic over contracts.

use std::fmt;
use std::str::FromStr;

use apache_avro::types::Value;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchemaError};

/// A type that maps to and from an Avro record value
pub trait AvroRecord: Sized {
    fn to_avro(&self) -> Result<Value>;
    fn from_avro(value: Value) -> Result<Self>;
}

/// Free-form metadata carried through the signer untouched
///
/// On the wire it travels as the JSON text in a `bytes` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssociatedData(pub serde_json::Value);

impl AssociatedData {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.0)?)
    }

    /// Parse wire bytes; an empty field is an empty object
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
            .map(Self)
            .map_err(|e| SchemaError::serialization("associated_data", e.to_string()))
    }
}

impl Default for AssociatedData {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Batch of signing requests, keyed on the bus by `request_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningRequestSet {
    pub request_id: String,
    pub data: Vec<SigningRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningRequest {
    #[serde(default)]
    pub associated_data: AssociatedData,
    pub blinded_tokens: Vec<String>,
    pub issuer_type: String,
    pub issuer_cohort: i32,
}

/// Batch of signing results answering one request set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningResultSet {
    pub request_id: String,
    pub data: Vec<SigningResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningResult {
    pub signed_tokens: Vec<String>,
    pub public_key: String,
    pub proof: String,
    pub status: SigningResultStatus,
    #[serde(default)]
    pub valid_to: Option<String>,
    #[serde(default)]
    pub valid_from: Option<String>,
    #[serde(default)]
    pub associated_data: AssociatedData,
}

/// Outcome of signing one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningResultStatus {
    Ok,
    InvalidIssuer,
    Error,
}

impl SigningResultStatus {
    /// Enum symbol on the wire
    pub fn as_symbol(&self) -> &'static str {
        match self {
            SigningResultStatus::Ok => "ok",
            SigningResultStatus::InvalidIssuer => "invalid_issuer",
            SigningResultStatus::Error => "error",
        }
    }
}

impl fmt::Display for SigningResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_symbol())
    }
}

impl FromStr for SigningResultStatus {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(SigningResultStatus::Ok),
            "invalid_issuer" => Ok(SigningResultStatus::InvalidIssuer),
            "error" => Ok(SigningResultStatus::Error),
            other => Err(SchemaError::serialization(
                "status",
                format!("unknown signing status '{}'", other),
            )),
        }
    }
}

impl AvroRecord for SigningRequestSet {
    fn to_avro(&self) -> Result<Value> {
        let data = self
            .data
            .iter()
            .map(SigningRequest::to_avro)
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Record(vec![
            ("request_id".into(), Value::String(self.request_id.clone())),
            ("data".into(), Value::Array(data)),
        ]))
    }

    fn from_avro(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "SigningRequestSet")?;
        Ok(Self {
            request_id: fields.string("request_id")?,
            data: fields.records("data")?,
        })
    }
}

impl AvroRecord for SigningRequest {
    fn to_avro(&self) -> Result<Value> {
        Ok(Value::Record(vec![
            ("associated_data".into(), Value::Bytes(self.associated_data.to_bytes()?)),
            ("blinded_tokens".into(), strings(&self.blinded_tokens)),
            ("issuer_type".into(), Value::String(self.issuer_type.clone())),
            ("issuer_cohort".into(), Value::Int(self.issuer_cohort)),
        ]))
    }

    fn from_avro(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "SigningRequest")?;
        Ok(Self {
            associated_data: AssociatedData::from_bytes(&fields.bytes("associated_data")?)?,
            blinded_tokens: fields.strings("blinded_tokens")?,
            issuer_type: fields.string("issuer_type")?,
            issuer_cohort: fields.int("issuer_cohort")?,
        })
    }
}

impl AvroRecord for SigningResultSet {
    fn to_avro(&self) -> Result<Value> {
        let data = self
            .data
            .iter()
            .map(SigningResult::to_avro)
            .collect::<Result<Vec<_>>>()?;
        Ok(Value::Record(vec![
            ("request_id".into(), Value::String(self.request_id.clone())),
            ("data".into(), Value::Array(data)),
        ]))
    }

    fn from_avro(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "SigningResultSet")?;
        Ok(Self {
            request_id: fields.string("request_id")?,
            data: fields.records("data")?,
        })
    }
}

impl AvroRecord for SigningResult {
    fn to_avro(&self) -> Result<Value> {
        Ok(Value::Record(vec![
            ("signed_tokens".into(), strings(&self.signed_tokens)),
            ("public_key".into(), Value::String(self.public_key.clone())),
            ("proof".into(), Value::String(self.proof.clone())),
            ("status".into(), Value::String(self.status.as_symbol().to_string())),
            ("valid_to".into(), optional_string(&self.valid_to)),
            ("valid_from".into(), optional_string(&self.valid_from)),
            ("associated_data".into(), Value::Bytes(self.associated_data.to_bytes()?)),
        ]))
    }

    fn from_avro(value: Value) -> Result<Self> {
        let mut fields = Fields::new(value, "SigningResult")?;
        Ok(Self {
            signed_tokens: fields.strings("signed_tokens")?,
            public_key: fields.string("public_key")?,
            proof: fields.string("proof")?,
            status: fields.symbol("status")?.parse()?,
            valid_to: fields.optional_string("valid_to")?,
            valid_from: fields.optional_string("valid_from")?,
            associated_data: AssociatedData::from_bytes(&fields.bytes("associated_data")?)?,
        })
    }
}

fn strings(values: &[String]) -> Value {
    Value::Array(values.iter().cloned().map(Value::String).collect())
}

fn optional_string(value: &Option<String>) -> Value {
    match value {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    }
}

/// Field access over a decoded record value
struct Fields {
    record: &'static str,
    fields: Vec<(String, Value)>,
}

impl Fields {
    fn new(value: Value, record: &'static str) -> Result<Self> {
        match value {
            Value::Record(fields) => Ok(Self { record, fields }),
            _ => Err(SchemaError::serialization(record, "value is not a record")),
        }
    }

    /// Take a field by name, looking through a union wrapper
    fn take(&mut self, name: &str) -> Result<Value> {
        let pos = self
            .fields
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| self.error(name, "field is missing"))?;
        Ok(match self.fields.swap_remove(pos).1 {
            Value::Union(_, inner) => *inner,
            other => other,
        })
    }

    fn string(&mut self, name: &str) -> Result<String> {
        match self.take(name)? {
            Value::String(s) => Ok(s),
            _ => Err(self.error(name, "expected a string")),
        }
    }

    fn optional_string(&mut self, name: &str) -> Result<Option<String>> {
        // Older writers never carried the field.
        if !self.fields.iter().any(|(n, _)| n == name) {
            return Ok(None);
        }
        match self.take(name)? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            _ => Err(self.error(name, "expected null or a string")),
        }
    }

    fn int(&mut self, name: &str) -> Result<i32> {
        match self.take(name)? {
            Value::Int(i) => Ok(i),
            Value::Long(l) => i32::try_from(l).map_err(|_| self.error(name, "out of int range")),
            _ => Err(self.error(name, "expected an int")),
        }
    }

    fn bytes(&mut self, name: &str) -> Result<Vec<u8>> {
        match self.take(name)? {
            Value::Bytes(b) => Ok(b),
            Value::String(s) => Ok(s.into_bytes()),
            _ => Err(self.error(name, "expected bytes")),
        }
    }

    fn symbol(&mut self, name: &str) -> Result<String> {
        match self.take(name)? {
            Value::Enum(_, s) | Value::String(s) => Ok(s),
            _ => Err(self.error(name, "expected an enum symbol")),
        }
    }

    fn strings(&mut self, name: &str) -> Result<Vec<String>> {
        match self.take(name)? {
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    _ => Err(self.error(name, "expected an array of strings")),
                })
                .collect(),
            _ => Err(self.error(name, "expected an array")),
        }
    }

    fn records<R: AvroRecord>(&mut self, name: &str) -> Result<Vec<R>> {
        match self.take(name)? {
            Value::Array(items) => items.into_iter().map(R::from_avro).collect(),
            _ => Err(self.error(name, "expected an array of records")),
        }
    }

    fn error(&self, name: &str, reason: &str) -> SchemaError {
        SchemaError::serialization(format!("{}.{}", self.record, name), reason)
    }
}
