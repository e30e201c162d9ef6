//! Schema definitions
//!
//! A [`SchemaDefinition`] is an immutable tree of named, typed fields rooted at an Avro
//! record. It is parsed from Avro JSON, rendered back to JSON for registration, and
//! compiled into an [`apache_avro::Schema`] for binary datum encoding.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::checksum::Fingerprint;
use crate::error::{Result, SchemaError};

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static name pattern"));

/// Durable, globally unique identifier the registry assigns to a schema body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(pub u32);

impl fmt::Display for SchemaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry name of an evolving message contract
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Subject for the value side of a topic (`<topic>-value`)
    pub fn value_for_topic(topic: &str) -> Self {
        Self(format!("{}-value", topic))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Subject {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A node in the schema tree
#[derive(Debug, Clone, PartialEq)]
pub enum AvroType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
    Enum(EnumType),
    Array(Box<AvroType>),
    Record(RecordType),
    /// Branches in declaration order; a field default applies to the first branch
    Union(Vec<AvroType>),
    /// A type carrying a `logicalType` or extra attributes
    Annotated(AnnotatedType),
}

impl AvroType {
    /// Union of `null` and `inner`, the shape of an optional field
    pub fn nullable(inner: AvroType) -> Self {
        AvroType::Union(vec![AvroType::Null, inner])
    }

    pub fn array(items: AvroType) -> Self {
        AvroType::Array(Box::new(items))
    }

    /// The Avro type keyword
    pub fn type_name(&self) -> &'static str {
        match self {
            AvroType::Null => "null",
            AvroType::Boolean => "boolean",
            AvroType::Int => "int",
            AvroType::Long => "long",
            AvroType::Float => "float",
            AvroType::Double => "double",
            AvroType::String => "string",
            AvroType::Bytes => "bytes",
            AvroType::Enum(_) => "enum",
            AvroType::Array(_) => "array",
            AvroType::Record(_) => "record",
            AvroType::Union(_) => "union",
            AvroType::Annotated(a) => a.base.type_name(),
        }
    }

    /// The type with annotations removed, which is what the binary encoding follows
    pub fn physical(&self) -> &AvroType {
        match self {
            AvroType::Annotated(a) => a.base.physical(),
            other => other,
        }
    }

    /// Full name of a named type (record or enum)
    pub fn full_name(&self) -> Option<String> {
        match self {
            AvroType::Record(r) => Some(r.full_name()),
            AvroType::Enum(e) => Some(e.full_name()),
            _ => None,
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self.physical() {
            AvroType::Null => true,
            AvroType::Union(branches) => branches.iter().any(|b| *b == AvroType::Null),
            _ => false,
        }
    }

    fn primitive(name: &str) -> Option<Self> {
        Some(match name {
            "null" => AvroType::Null,
            "boolean" => AvroType::Boolean,
            "int" => AvroType::Int,
            "long" => AvroType::Long,
            "float" => AvroType::Float,
            "double" => AvroType::Double,
            "string" => AvroType::String,
            "bytes" => AvroType::Bytes,
            _ => return None,
        })
    }
}

/// A primitive or array type with attributes the encoding does not depend on
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedType {
    pub base: Box<AvroType>,
    /// e.g. `timestamp-millis`, `uuid`, `decimal`
    pub logical_type: Option<String>,
    /// Remaining attributes (`precision`, `scale`, custom properties)
    pub properties: Map<String, Value>,
}

impl AnnotatedType {
    pub fn logical(name: impl Into<String>, base: AvroType) -> Self {
        Self {
            base: Box::new(base),
            logical_type: Some(name.into()),
            properties: Map::new(),
        }
    }
}

/// A record type and its ordered fields
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    pub name: String,
    pub namespace: Option<String>,
    pub doc: Option<String>,
    /// Former names this type still answers to when reading
    pub aliases: Vec<String>,
    pub fields: Vec<Field>,
    pub properties: Map<String, Value>,
}

impl RecordType {
    pub fn new(name: impl Into<String>, namespace: Option<&str>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(String::from),
            doc: None,
            aliases: Vec::new(),
            fields,
            properties: Map::new(),
        }
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn full_name(&self) -> String {
        full_name(&self.name, self.namespace.as_deref())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether data written under another record's name resolves to this reader
    pub fn reads_name_of(&self, writer: &RecordType) -> bool {
        self.name == writer.name || alias_matches(&self.aliases, &writer.name, &writer.full_name())
    }

    /// Writer field that supplies the reader field `reader`, by name and then by alias
    pub fn field_for(&self, reader: &Field) -> Option<&Field> {
        self.field(&reader.name)
            .or_else(|| self.fields.iter().find(|f| reader.aliases.contains(&f.name)))
    }
}

/// Sort order of a field when records are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    Ascending,
    Descending,
    Ignore,
}

impl FieldOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOrder::Ascending => "ascending",
            FieldOrder::Descending => "descending",
            FieldOrder::Ignore => "ignore",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "ascending" => Some(FieldOrder::Ascending),
            "descending" => Some(FieldOrder::Descending),
            "ignore" => Some(FieldOrder::Ignore),
            _ => None,
        }
    }
}

/// A named field of a record
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub doc: Option<String>,
    pub ty: AvroType,
    /// Reader-side default, in Avro JSON encoding
    pub default: Option<Value>,
    pub aliases: Vec<String>,
    pub order: Option<FieldOrder>,
    pub properties: Map<String, Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: AvroType) -> Self {
        Self {
            name: name.into(),
            doc: None,
            ty,
            default: None,
            aliases: Vec::new(),
            order: None,
            properties: Map::new(),
        }
    }

    /// Optional field: `["null", inner]` defaulting to null
    pub fn optional(name: impl Into<String>, inner: AvroType) -> Self {
        Self::new(name, AvroType::nullable(inner)).with_default(Value::Null)
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Whether a written field named `name` feeds this field
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}

/// An enumeration with a fixed, ordered symbol set
#[derive(Debug, Clone, PartialEq)]
pub struct EnumType {
    pub name: String,
    pub namespace: Option<String>,
    pub doc: Option<String>,
    pub aliases: Vec<String>,
    pub symbols: Vec<String>,
    /// Symbol substituted when a writer symbol is unknown to this reader
    pub default: Option<String>,
    pub properties: Map<String, Value>,
}

impl EnumType {
    pub fn new(name: impl Into<String>, namespace: Option<&str>, symbols: &[&str]) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(String::from),
            doc: None,
            aliases: Vec::new(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            default: None,
            properties: Map::new(),
        }
    }

    pub fn full_name(&self) -> String {
        full_name(&self.name, self.namespace.as_deref())
    }

    /// Whether data written under another enum's name resolves to this reader
    pub fn reads_name_of(&self, writer: &EnumType) -> bool {
        self.name == writer.name || alias_matches(&self.aliases, &writer.name, &writer.full_name())
    }

    /// Position of `symbol` in the symbol set
    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }
}

/// An immutable schema rooted at a record
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaDefinition {
    root: RecordType,
}

impl SchemaDefinition {
    /// Build a definition from a record tree, validating it the same way parsing does
    pub fn new(root: RecordType) -> Result<Self> {
        let definition = Self { root };
        // Re-parse the rendered form so hand-built trees obey the parser's rules.
        Self::from_json(&definition.to_json())
    }

    /// Parse Avro JSON text
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| SchemaError::InvalidFormat(format!("schema is not JSON: {}", e)))?;
        Self::from_json(&value)
    }

    /// Parse an Avro JSON value
    pub fn from_json(value: &Value) -> Result<Self> {
        let mut parser = Parser::default();
        match parser.parse(value, None)? {
            AvroType::Record(root) => Ok(Self { root }),
            other => Err(SchemaError::InvalidFormat(format!(
                "top-level schema must be a record, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn root(&self) -> &RecordType {
        &self.root
    }

    pub fn full_name(&self) -> String {
        self.root.full_name()
    }

    /// Render as Avro JSON; each named type is defined once and referenced afterwards
    pub fn to_json(&self) -> Value {
        Renderer::new(false).record(&self.root)
    }

    /// Compact JSON body submitted to the registry
    pub fn canonical_json(&self) -> String {
        self.to_json().to_string()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_json(&self.to_json())
    }

    /// Compile into an `apache_avro` schema for datum encoding
    ///
    /// Logical types and attributes are left out: values travel as their base types.
    pub fn to_avro(&self) -> Result<apache_avro::Schema> {
        let physical = Renderer::new(true).record(&self.root);
        Ok(apache_avro::Schema::parse(&physical)?)
    }
}

impl fmt::Display for SchemaDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_json())
    }
}

fn full_name(name: &str, namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}.{}", ns, name),
        _ => name.to_string(),
    }
}

fn alias_matches(aliases: &[String], name: &str, full: &str) -> bool {
    aliases.iter().any(|a| a == name || a == full)
}

fn validate_name(name: &str, what: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(SchemaError::InvalidFormat(format!("invalid {} name '{}'", what, name)))
    }
}

/// Split a possibly dotted name into (name, namespace)
fn split_name(
    raw: &str,
    explicit_ns: Option<&str>,
    enclosing_ns: Option<&str>,
) -> Result<(String, Option<String>)> {
    let (name, namespace) = match raw.rsplit_once('.') {
        Some((ns, name)) => (name.to_string(), Some(ns.to_string())),
        None => (
            raw.to_string(),
            explicit_ns.or(enclosing_ns).map(String::from),
        ),
    };
    validate_name(&name, "type")?;
    if let Some(ns) = namespace.as_deref() {
        for part in ns.split('.').filter(|p| !p.is_empty()) {
            validate_name(part, "namespace")?;
        }
    }
    Ok((name, namespace.filter(|ns| !ns.is_empty())))
}

const RECORD_KEYS: &[&str] = &["type", "name", "namespace", "doc", "aliases", "fields"];
const FIELD_KEYS: &[&str] = &["name", "type", "doc", "default", "aliases", "order"];
const ENUM_KEYS: &[&str] = &["type", "name", "namespace", "doc", "aliases", "symbols", "default"];
const ARRAY_KEYS: &[&str] = &["type", "items", "logicalType"];
const TYPE_KEYS: &[&str] = &["type", "logicalType"];

/// Attributes of `map` outside the `reserved` keys
fn properties(map: &Map<String, Value>, reserved: &[&str]) -> Map<String, Value> {
    map.iter()
        .filter(|(key, _)| !reserved.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn parse_aliases(map: &Map<String, Value>, owner: &str, dotted: bool) -> Result<Vec<String>> {
    let Some(raw) = map.get("aliases") else {
        return Ok(Vec::new());
    };
    let list = raw
        .as_array()
        .ok_or_else(|| SchemaError::InvalidFormat(format!("aliases of '{}' must be an array", owner)))?;
    list.iter()
        .map(|alias| -> Result<String> {
            let alias = alias.as_str().ok_or_else(|| {
                SchemaError::InvalidFormat(format!("non-string alias on '{}'", owner))
            })?;
            if dotted {
                for part in alias.split('.') {
                    validate_name(part, "alias")?;
                }
            } else {
                validate_name(alias, "alias")?;
            }
            Ok(alias.to_string())
        })
        .collect()
}

/// Wrap `base` when the object declares a logical type or extra attributes
fn annotate(base: AvroType, map: &Map<String, Value>, reserved: &[&str]) -> Result<AvroType> {
    let logical_type = match map.get("logicalType") {
        None => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(other) => {
            return Err(SchemaError::InvalidFormat(format!(
                "logicalType must be a string, found {}",
                other
            )))
        }
    };
    let properties = properties(map, reserved);
    if logical_type.is_none() && properties.is_empty() {
        return Ok(base);
    }
    Ok(AvroType::Annotated(AnnotatedType {
        base: Box::new(base),
        logical_type,
        properties,
    }))
}

#[derive(Default)]
struct Parser {
    named: HashMap<String, AvroType>,
    /// Records whose fields are still being parsed
    defining: HashSet<String>,
}

impl Parser {
    fn parse(&mut self, value: &Value, namespace: Option<&str>) -> Result<AvroType> {
        match value {
            Value::String(name) => self.resolve_name(name, namespace),
            Value::Array(branches) => self.parse_union(branches, namespace),
            Value::Object(map) => self.parse_object(map, namespace),
            other => Err(SchemaError::InvalidFormat(format!(
                "unexpected schema node: {}",
                other
            ))),
        }
    }

    fn resolve_name(&self, name: &str, namespace: Option<&str>) -> Result<AvroType> {
        if let Some(primitive) = AvroType::primitive(name) {
            return Ok(primitive);
        }
        let qualified = if name.contains('.') {
            name.to_string()
        } else {
            full_name(name, namespace)
        };
        if let Some(found) = self.named.get(&qualified).or_else(|| self.named.get(name)) {
            return Ok(found.clone());
        }
        if self.defining.contains(&qualified) || self.defining.contains(name) {
            return Err(SchemaError::InvalidFormat(format!(
                "record '{}' refers to itself; recursive types are not supported",
                qualified
            )));
        }
        Err(SchemaError::InvalidFormat(format!("unknown type '{}'", name)))
    }

    fn parse_object(&mut self, map: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let ty = map
            .get("type")
            .ok_or_else(|| SchemaError::InvalidFormat("schema object without 'type'".into()))?;
        match ty {
            Value::String(keyword) => match keyword.as_str() {
                "record" => self.parse_record(map, namespace),
                "enum" => self.parse_enum(map, namespace),
                "array" => {
                    let items = map.get("items").ok_or_else(|| {
                        SchemaError::InvalidFormat("array schema without 'items'".into())
                    })?;
                    let array = AvroType::array(self.parse(items, namespace)?);
                    annotate(array, map, ARRAY_KEYS)
                }
                "map" | "fixed" | "error" => Err(SchemaError::InvalidFormat(format!(
                    "unsupported schema type '{}'",
                    keyword
                ))),
                // {"type": "long", "logicalType": "timestamp-millis"} and friends
                other => {
                    let base = self.resolve_name(other, namespace)?;
                    annotate(base, map, TYPE_KEYS)
                }
            },
            nested => {
                let base = self.parse(nested, namespace)?;
                annotate(base, map, TYPE_KEYS)
            }
        }
    }

    fn named_header(
        &self,
        map: &Map<String, Value>,
        namespace: Option<&str>,
    ) -> Result<(String, Option<String>, Option<String>)> {
        let raw_name = map
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::InvalidFormat("named type without 'name'".into()))?;
        let explicit_ns = map.get("namespace").and_then(Value::as_str);
        let (name, ns) = split_name(raw_name, explicit_ns, namespace)?;
        let full = full_name(&name, ns.as_deref());
        if self.named.contains_key(&full) || self.defining.contains(&full) {
            return Err(SchemaError::InvalidFormat(format!("type '{}' is defined twice", full)));
        }
        let doc = map.get("doc").and_then(Value::as_str).map(String::from);
        Ok((name, ns, doc))
    }

    fn parse_record(&mut self, map: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let (name, ns, doc) = self.named_header(map, namespace)?;
        let full = full_name(&name, ns.as_deref());
        let aliases = parse_aliases(map, &full, true)?;
        let raw_fields = map
            .get("fields")
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::InvalidFormat(format!("record '{}' without fields", full)))?;

        self.defining.insert(full.clone());
        let fields = self.parse_fields(raw_fields, &full, ns.as_deref());
        self.defining.remove(&full);
        let fields = fields?;

        let record = AvroType::Record(RecordType {
            name,
            namespace: ns,
            doc,
            aliases,
            fields,
            properties: properties(map, RECORD_KEYS),
        });
        self.named.insert(full, record.clone());
        Ok(record)
    }

    fn parse_fields(&mut self, raw_fields: &[Value], full: &str, ns: Option<&str>) -> Result<Vec<Field>> {
        let mut fields = Vec::with_capacity(raw_fields.len());
        let mut names = HashSet::new();
        for raw in raw_fields {
            let field = raw.as_object().ok_or_else(|| {
                SchemaError::InvalidFormat(format!("field of '{}' is not an object", full))
            })?;
            let field_name = field
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::InvalidFormat(format!("field of '{}' without name", full)))?;
            validate_name(field_name, "field")?;
            if !names.insert(field_name.to_string()) {
                return Err(SchemaError::InvalidFormat(format!(
                    "duplicate field '{}' in '{}'",
                    field_name, full
                )));
            }
            let path = format!("{}.{}", full, field_name);
            let raw_ty = field
                .get("type")
                .ok_or_else(|| SchemaError::InvalidFormat(format!("field '{}' without type", path)))?;
            let ty = self.parse(raw_ty, ns)?;
            let default = field.get("default").cloned();
            if let Some(default) = &default {
                if !default_matches(default, &ty) {
                    return Err(SchemaError::InvalidFormat(format!(
                        "default of '{}' does not match its type",
                        path
                    )));
                }
            }
            let order = match field.get("order") {
                None => None,
                Some(raw) => Some(raw.as_str().and_then(FieldOrder::parse).ok_or_else(|| {
                    SchemaError::InvalidFormat(format!("invalid order {} on '{}'", raw, path))
                })?),
            };
            fields.push(Field {
                name: field_name.to_string(),
                doc: field.get("doc").and_then(Value::as_str).map(String::from),
                ty,
                default,
                aliases: parse_aliases(field, &path, false)?,
                order,
                properties: properties(field, FIELD_KEYS),
            });
        }
        Ok(fields)
    }

    fn parse_enum(&mut self, map: &Map<String, Value>, namespace: Option<&str>) -> Result<AvroType> {
        let (name, ns, doc) = self.named_header(map, namespace)?;
        let full = full_name(&name, ns.as_deref());
        let aliases = parse_aliases(map, &full, true)?;
        let raw_symbols = map
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| SchemaError::InvalidFormat(format!("enum '{}' without symbols", full)))?;

        let mut symbols = Vec::with_capacity(raw_symbols.len());
        for raw in raw_symbols {
            let symbol = raw.as_str().ok_or_else(|| {
                SchemaError::InvalidFormat(format!("non-string symbol in enum '{}'", full))
            })?;
            validate_name(symbol, "enum symbol")?;
            if symbols.iter().any(|s| s == symbol) {
                return Err(SchemaError::InvalidFormat(format!(
                    "duplicate symbol '{}' in enum '{}'",
                    symbol, full
                )));
            }
            symbols.push(symbol.to_string());
        }

        let default = map.get("default").and_then(Value::as_str).map(String::from);
        if let Some(default) = &default {
            if !symbols.contains(default) {
                return Err(SchemaError::InvalidFormat(format!(
                    "default '{}' is not a symbol of enum '{}'",
                    default, full
                )));
            }
        }

        let ty = AvroType::Enum(EnumType {
            name,
            namespace: ns,
            doc,
            aliases,
            symbols,
            default,
            properties: properties(map, ENUM_KEYS),
        });
        self.named.insert(full, ty.clone());
        Ok(ty)
    }

    fn parse_union(&mut self, raw: &[Value], namespace: Option<&str>) -> Result<AvroType> {
        if raw.is_empty() {
            return Err(SchemaError::InvalidFormat("empty union".into()));
        }
        let mut branches = Vec::with_capacity(raw.len());
        let mut keys = HashSet::new();
        for value in raw {
            let branch = self.parse(value, namespace)?;
            if let AvroType::Union(_) = branch.physical() {
                return Err(SchemaError::InvalidFormat("unions may not nest".into()));
            }
            let key = branch
                .physical()
                .full_name()
                .unwrap_or_else(|| branch.type_name().to_string());
            if !keys.insert(key.clone()) {
                return Err(SchemaError::InvalidFormat(format!(
                    "union declares '{}' twice",
                    key
                )));
            }
            branches.push(branch);
        }
        Ok(AvroType::Union(branches))
    }
}

/// Whether a JSON default is a valid value of `ty`
pub(crate) fn default_matches(value: &Value, ty: &AvroType) -> bool {
    match (ty.physical(), value) {
        (AvroType::Null, Value::Null) => true,
        (AvroType::Boolean, Value::Bool(_)) => true,
        (AvroType::Int, Value::Number(n)) => n
            .as_i64()
            .map(|i| i32::try_from(i).is_ok())
            .unwrap_or(false),
        (AvroType::Long, Value::Number(n)) => n.is_i64(),
        (AvroType::Float | AvroType::Double, Value::Number(_)) => true,
        (AvroType::String | AvroType::Bytes, Value::String(_)) => true,
        (AvroType::Enum(e), Value::String(s)) => e.index_of(s).is_some(),
        (AvroType::Array(items), Value::Array(values)) => {
            values.iter().all(|v| default_matches(v, items))
        }
        (AvroType::Record(r), Value::Object(map)) => r.fields.iter().all(|f| match map.get(&f.name) {
            Some(v) => default_matches(v, &f.ty),
            None => f.default.is_some(),
        }),
        (AvroType::Union(branches), v) => branches
            .first()
            .map(|first| default_matches(v, first))
            .unwrap_or(false),
        _ => false,
    }
}

/// Renders schema trees back to Avro JSON
///
/// A physical rendering keeps only what the binary encoding depends on.
struct Renderer {
    seen: HashSet<String>,
    physical: bool,
}

impl Renderer {
    fn new(physical: bool) -> Self {
        Self {
            seen: HashSet::new(),
            physical,
        }
    }

    fn ty(&mut self, ty: &AvroType) -> Value {
        match ty {
            AvroType::Enum(e) => self.enumeration(e),
            AvroType::Array(items) => {
                let mut map = Map::new();
                map.insert("type".into(), "array".into());
                map.insert("items".into(), self.ty(items));
                Value::Object(map)
            }
            AvroType::Record(r) => {
                if self.seen.contains(&r.full_name()) {
                    return Value::String(r.full_name());
                }
                self.record(r)
            }
            AvroType::Union(branches) => Value::Array(branches.iter().map(|b| self.ty(b)).collect()),
            AvroType::Annotated(a) => {
                let base = self.ty(&a.base);
                if self.physical {
                    return base;
                }
                let mut map = match base {
                    Value::Object(map) => map,
                    other => {
                        let mut map = Map::new();
                        map.insert("type".into(), other);
                        map
                    }
                };
                if let Some(logical) = &a.logical_type {
                    map.insert("logicalType".into(), logical.clone().into());
                }
                map.extend(a.properties.clone());
                Value::Object(map)
            }
            primitive => Value::String(primitive.type_name().to_string()),
        }
    }

    fn named_header(
        &self,
        kind: &str,
        name: &str,
        namespace: Option<&String>,
        doc: Option<&String>,
        aliases: &[String],
        properties: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("type".into(), kind.into());
        map.insert("name".into(), name.into());
        if let Some(ns) = namespace {
            map.insert("namespace".into(), ns.clone().into());
        }
        if let Some(doc) = doc {
            map.insert("doc".into(), doc.clone().into());
        }
        if !self.physical {
            if !aliases.is_empty() {
                map.insert("aliases".into(), aliases.to_vec().into());
            }
            map.extend(properties.clone());
        }
        map
    }

    fn enumeration(&mut self, e: &EnumType) -> Value {
        let full = e.full_name();
        if !self.seen.insert(full.clone()) {
            return Value::String(full);
        }
        let mut map = self.named_header(
            "enum",
            &e.name,
            e.namespace.as_ref(),
            e.doc.as_ref(),
            &e.aliases,
            &e.properties,
        );
        map.insert(
            "symbols".into(),
            Value::Array(e.symbols.iter().cloned().map(Value::String).collect()),
        );
        if let Some(default) = &e.default {
            map.insert("default".into(), default.clone().into());
        }
        Value::Object(map)
    }

    fn record(&mut self, record: &RecordType) -> Value {
        self.seen.insert(record.full_name());
        let mut map = self.named_header(
            "record",
            &record.name,
            record.namespace.as_ref(),
            record.doc.as_ref(),
            &record.aliases,
            &record.properties,
        );
        let fields = record.fields.iter().map(|field| self.field(field)).collect();
        map.insert("fields".into(), Value::Array(fields));
        Value::Object(map)
    }

    fn field(&mut self, field: &Field) -> Value {
        let mut f = Map::new();
        f.insert("name".into(), field.name.clone().into());
        f.insert("type".into(), self.ty(&field.ty));
        if let Some(doc) = &field.doc {
            f.insert("doc".into(), doc.clone().into());
        }
        if let Some(default) = &field.default {
            f.insert("default".into(), default.clone());
        }
        if !self.physical {
            if !field.aliases.is_empty() {
                f.insert("aliases".into(), field.aliases.clone().into());
            }
            if let Some(order) = field.order {
                f.insert("order".into(), order.as_str().into());
            }
            f.extend(field.properties.clone());
        }
        Value::Object(f)
    }
}
