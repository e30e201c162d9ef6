//! Shaping Avro values against schema trees
//!
//! [`conform`] prepares a caller's record for a writer schema before binary encoding.
//! [`project`] applies Avro resolution rules to a decoded value so it matches the
//! reader schema the consumer asked for.

use apache_avro::types::Value;
use serde_json::Value as Json;
use tracing::warn;

use crate::error::{Result, SchemaError};
use crate::schema::{AvroType, EnumType, RecordType};

/// Normalize `value` to the shape of the writer type `ty`
///
/// Record fields are emitted in schema order. Absent fields take their declared
/// default and unknown fields are dropped. Enum symbols may be given as strings.
pub(crate) fn conform(value: &Value, ty: &AvroType, path: &str) -> Result<Value> {
    let ty = ty.physical();
    if let AvroType::Union(branches) = ty {
        return conform_union(value, branches, path);
    }

    let value = match value {
        Value::Union(_, inner) => inner.as_ref(),
        other => other,
    };

    match (ty, value) {
        (AvroType::Null, Value::Null) => Ok(Value::Null),
        (AvroType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(*b)),
        (AvroType::Int, Value::Int(i)) => Ok(Value::Int(*i)),
        (AvroType::Int, Value::Long(l)) => i32::try_from(*l)
            .map(Value::Int)
            .map_err(|_| SchemaError::serialization(path, format!("{} does not fit in an int", l))),
        (AvroType::Long, Value::Int(i)) => Ok(Value::Long(i64::from(*i))),
        (AvroType::Long, Value::Long(l)) => Ok(Value::Long(*l)),
        (AvroType::Float, Value::Float(f)) => Ok(Value::Float(*f)),
        (AvroType::Double, Value::Float(f)) => Ok(Value::Double(f64::from(*f))),
        (AvroType::Double, Value::Double(d)) => Ok(Value::Double(*d)),
        (AvroType::String, Value::String(s)) => Ok(Value::String(s.clone())),
        (AvroType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b.clone())),
        (AvroType::Enum(e), Value::Enum(_, symbol) | Value::String(symbol)) => {
            match e.index_of(symbol) {
                Some(index) => Ok(Value::Enum(index as u32, symbol.clone())),
                None => Err(SchemaError::serialization(
                    path,
                    format!("'{}' is not a symbol of {}", symbol, e.full_name()),
                )),
            }
        }
        (AvroType::Array(items), Value::Array(values)) => values
            .iter()
            .enumerate()
            .map(|(i, v)| conform(v, items, &format!("{}[{}]", path, i)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        (AvroType::Record(record), Value::Record(fields)) => conform_record(fields, record, path),
        (ty, other) => Err(SchemaError::serialization(
            path,
            format!("expected {}, found {}", describe(ty), value_kind(other)),
        )),
    }
}

fn conform_union(value: &Value, branches: &[AvroType], path: &str) -> Result<Value> {
    let inner = match value {
        Value::Union(_, inner) => inner.as_ref(),
        other => other,
    };

    if matches!(inner, Value::Null) {
        return branches
            .iter()
            .position(|b| *b.physical() == AvroType::Null)
            .map(|index| Value::Union(index as u32, Box::new(Value::Null)))
            .ok_or_else(|| SchemaError::serialization(path, "null is not allowed here"));
    }

    let mut last_error = None;
    for (index, branch) in branches.iter().enumerate() {
        if *branch.physical() == AvroType::Null {
            continue;
        }
        match conform(inner, branch, path) {
            Ok(v) => return Ok(Value::Union(index as u32, Box::new(v))),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        SchemaError::serialization(path, format!("no union branch accepts {}", value_kind(inner)))
    }))
}

fn conform_record(fields: &[(String, Value)], record: &RecordType, path: &str) -> Result<Value> {
    let mut out = Vec::with_capacity(record.fields.len());
    for field in &record.fields {
        let field_path = join(path, &field.name);
        let value = match fields.iter().find(|(name, _)| *name == field.name) {
            Some((_, v)) => conform(v, &field.ty, &field_path)?,
            None => match &field.default {
                Some(default) => default_value(default, &field.ty, &field_path)?,
                None => {
                    return Err(SchemaError::serialization(
                        field_path,
                        "required field is missing",
                    ))
                }
            },
        };
        out.push((field.name.clone(), value));
    }
    Ok(Value::Record(out))
}

/// Resolve a value decoded with the writer schema into the reader type
pub(crate) fn project(value: Value, reader: &AvroType, path: &str) -> Result<Value> {
    let reader = reader.physical();
    if let AvroType::Union(branches) = reader {
        return project_union(value, branches, path);
    }

    let value = match value {
        Value::Union(_, inner) => *inner,
        other => other,
    };

    match (reader, value) {
        (AvroType::Null, Value::Null) => Ok(Value::Null),
        (AvroType::Boolean, Value::Boolean(b)) => Ok(Value::Boolean(b)),
        (AvroType::Int, Value::Int(i)) => Ok(Value::Int(i)),
        (AvroType::Long, Value::Int(i)) => Ok(Value::Long(i64::from(i))),
        (AvroType::Long, Value::Long(l)) => Ok(Value::Long(l)),
        (AvroType::Float, Value::Int(i)) => Ok(Value::Float(i as f32)),
        (AvroType::Float, Value::Long(l)) => Ok(Value::Float(l as f32)),
        (AvroType::Float, Value::Float(f)) => Ok(Value::Float(f)),
        (AvroType::Double, Value::Int(i)) => Ok(Value::Double(f64::from(i))),
        (AvroType::Double, Value::Long(l)) => Ok(Value::Double(l as f64)),
        (AvroType::Double, Value::Float(f)) => Ok(Value::Double(f64::from(f))),
        (AvroType::Double, Value::Double(d)) => Ok(Value::Double(d)),
        (AvroType::String, Value::String(s)) => Ok(Value::String(s)),
        (AvroType::String, Value::Bytes(b)) => String::from_utf8(b)
            .map(Value::String)
            .map_err(|_| SchemaError::MalformedPayload(format!("{}: bytes are not UTF-8", path))),
        (AvroType::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
        (AvroType::Bytes, Value::String(s)) => Ok(Value::Bytes(s.into_bytes())),
        (AvroType::Enum(e), Value::Enum(_, symbol)) => resolve_symbol(e, symbol, path),
        (AvroType::Array(items), Value::Array(values)) => values
            .into_iter()
            .enumerate()
            .map(|(i, v)| project(v, items, &format!("{}[{}]", path, i)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        (AvroType::Record(record), Value::Record(fields)) => project_record(fields, record, path),
        (reader, other) => Err(SchemaError::MalformedPayload(format!(
            "{}: reader expects {} but payload holds {}",
            path,
            describe(reader),
            value_kind(&other)
        ))),
    }
}

fn project_union(value: Value, branches: &[AvroType], path: &str) -> Result<Value> {
    let inner = match value {
        Value::Union(_, inner) => *inner,
        other => other,
    };

    if matches!(inner, Value::Null) {
        return branches
            .iter()
            .position(|b| *b.physical() == AvroType::Null)
            .map(|index| Value::Union(index as u32, Box::new(Value::Null)))
            .ok_or_else(|| {
                SchemaError::MalformedPayload(format!("{}: reader union does not admit null", path))
            });
    }

    let mut last_error = None;
    for (index, branch) in branches.iter().enumerate() {
        if *branch.physical() == AvroType::Null {
            continue;
        }
        match project(inner.clone(), branch, path) {
            Ok(v) => return Ok(Value::Union(index as u32, Box::new(v))),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        SchemaError::MalformedPayload(format!(
            "{}: no reader union branch accepts {}",
            path,
            value_kind(&inner)
        ))
    }))
}

fn project_record(mut written: Vec<(String, Value)>, record: &RecordType, path: &str) -> Result<Value> {
    let mut out = Vec::with_capacity(record.fields.len());
    for field in &record.fields {
        let field_path = join(path, &field.name);
        let position = written
            .iter()
            .position(|(name, _)| *name == field.name)
            .or_else(|| written.iter().position(|(name, _)| field.answers_to(name)));
        let value = match position {
            Some(pos) => {
                let (_, v) = written.swap_remove(pos);
                project(v, &field.ty, &field_path)?
            }
            None => match &field.default {
                Some(default) => default_value(default, &field.ty, &field_path)?,
                None => {
                    return Err(SchemaError::MalformedPayload(format!(
                        "{}: absent from payload and the reader declares no default",
                        field_path
                    )))
                }
            },
        };
        out.push((field.name.clone(), value));
    }
    // Whatever is left in `written` is unknown to the reader and skipped.
    Ok(Value::Record(out))
}

fn resolve_symbol(reader: &EnumType, symbol: String, path: &str) -> Result<Value> {
    if let Some(index) = reader.index_of(&symbol) {
        return Ok(Value::Enum(index as u32, symbol));
    }
    match reader.default.as_deref().and_then(|d| reader.index_of(d).map(|i| (i, d))) {
        Some((index, fallback)) => {
            warn!(
                path,
                symbol = %symbol,
                fallback,
                "Enum symbol unknown to reader, using the reader default"
            );
            Ok(Value::Enum(index as u32, fallback.to_string()))
        }
        None => Err(SchemaError::UnresolvedEnumSymbol {
            enum_name: reader.full_name(),
            symbol,
        }),
    }
}

/// Convert a JSON field default into a value of `ty`
pub(crate) fn default_value(default: &Json, ty: &AvroType, path: &str) -> Result<Value> {
    let mismatch = || SchemaError::serialization(path, format!("default {} is not a valid {}", default, describe(ty)));

    match (ty.physical(), default) {
        // A union default always belongs to the first branch.
        (AvroType::Union(branches), _) => {
            let first = branches.first().ok_or_else(mismatch)?;
            Ok(Value::Union(0, Box::new(default_value(default, first, path)?)))
        }
        (AvroType::Null, Json::Null) => Ok(Value::Null),
        (AvroType::Boolean, Json::Bool(b)) => Ok(Value::Boolean(*b)),
        (AvroType::Int, Json::Number(n)) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::Int)
            .ok_or_else(mismatch),
        (AvroType::Long, Json::Number(n)) => n.as_i64().map(Value::Long).ok_or_else(mismatch),
        (AvroType::Float, Json::Number(n)) => {
            n.as_f64().map(|f| Value::Float(f as f32)).ok_or_else(mismatch)
        }
        (AvroType::Double, Json::Number(n)) => n.as_f64().map(Value::Double).ok_or_else(mismatch),
        (AvroType::String, Json::String(s)) => Ok(Value::String(s.clone())),
        // Avro encodes bytes defaults as strings of code points 0-255.
        (AvroType::Bytes, Json::String(s)) => s
            .chars()
            .map(|c| u8::try_from(u32::from(c)).map_err(|_| mismatch()))
            .collect::<Result<Vec<u8>>>()
            .map(Value::Bytes),
        (AvroType::Enum(e), Json::String(s)) => e
            .index_of(s)
            .map(|i| Value::Enum(i as u32, s.clone()))
            .ok_or_else(mismatch),
        (AvroType::Array(items), Json::Array(values)) => values
            .iter()
            .enumerate()
            .map(|(i, v)| default_value(v, items, &format!("{}[{}]", path, i)))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        (AvroType::Record(record), Json::Object(map)) => {
            let mut out = Vec::with_capacity(record.fields.len());
            for field in &record.fields {
                let field_path = join(path, &field.name);
                let json = map.get(&field.name).or(field.default.as_ref()).ok_or_else(mismatch)?;
                out.push((field.name.clone(), default_value(json, &field.ty, &field_path)?));
            }
            Ok(Value::Record(out))
        }
        _ => Err(mismatch()),
    }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", path, field)
    }
}

fn describe(ty: &AvroType) -> String {
    ty.full_name().unwrap_or_else(|| ty.type_name().to_string())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Boolean(_) => "boolean",
        Value::Int(_) => "int",
        Value::Long(_) => "long",
        Value::Float(_) => "float",
        Value::Double(_) => "double",
        Value::Bytes(_) => "bytes",
        Value::String(_) => "string",
        Value::Enum(_, _) => "enum",
        Value::Union(_, _) => "union",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Record(_) => "record",
        _ => "unsupported value",
    }
}
