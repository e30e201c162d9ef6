//! Schema compatibility checking
//!
//! Decides whether data written with one schema can be read with another, following Avro
//! schema resolution, and applies a registry compatibility mode over a subject's history.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;
use crate::schema::{AvroType, EnumType, RecordType, SchemaDefinition};

/// Rule the registry enforces when a new version is proposed for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    None,
    /// New schema can read data written with the latest version
    #[default]
    Backward,
    BackwardTransitive,
    /// Latest version can read data written with the new schema
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
}

impl CompatibilityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompatibilityMode::None => "NONE",
            CompatibilityMode::Backward => "BACKWARD",
            CompatibilityMode::BackwardTransitive => "BACKWARD_TRANSITIVE",
            CompatibilityMode::Forward => "FORWARD",
            CompatibilityMode::ForwardTransitive => "FORWARD_TRANSITIVE",
            CompatibilityMode::Full => "FULL",
            CompatibilityMode::FullTransitive => "FULL_TRANSITIVE",
        }
    }

    /// Checked against every prior version rather than only the latest
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::BackwardTransitive
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::FullTransitive
        )
    }

    /// The candidate must read existing data (consumers upgrade first)
    pub fn checks_backward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Backward
                | CompatibilityMode::BackwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }

    /// Existing readers must read candidate data (producers upgrade first)
    pub fn checks_forward(&self) -> bool {
        matches!(
            self,
            CompatibilityMode::Forward
                | CompatibilityMode::ForwardTransitive
                | CompatibilityMode::Full
                | CompatibilityMode::FullTransitive
        )
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompatibilityMode {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Ok(match normalized.as_str() {
            "NONE" => CompatibilityMode::None,
            "BACKWARD" => CompatibilityMode::Backward,
            "BACKWARD_TRANSITIVE" => CompatibilityMode::BackwardTransitive,
            "FORWARD" => CompatibilityMode::Forward,
            "FORWARD_TRANSITIVE" => CompatibilityMode::ForwardTransitive,
            "FULL" => CompatibilityMode::Full,
            "FULL_TRANSITIVE" => CompatibilityMode::FullTransitive,
            _ => {
                return Err(SchemaError::InvalidFormat(format!(
                    "unknown compatibility mode '{}'",
                    s
                )))
            }
        })
    }
}

/// Result of a compatibility check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityResult {
    /// Whether the schemas are compatible
    pub is_compatible: bool,
    /// List of changes detected
    pub changes: Vec<SchemaChange>,
    /// Summary of the compatibility check
    pub summary: String,
}

impl CompatibilityResult {
    /// Create a compatible result
    pub fn compatible(changes: Vec<SchemaChange>) -> Self {
        let summary = if changes.is_empty() {
            "No changes detected".to_string()
        } else {
            format!("{} compatible changes detected", changes.len())
        };
        Self {
            is_compatible: true,
            changes,
            summary,
        }
    }

    /// Create an incompatible result
    pub fn incompatible(changes: Vec<SchemaChange>, reason: impl Into<String>) -> Self {
        Self {
            is_compatible: false,
            changes,
            summary: reason.into(),
        }
    }

    /// Changes that make the schemas incompatible
    pub fn breaking(&self) -> impl Iterator<Item = &SchemaChange> {
        self.changes.iter().filter(|c| c.is_breaking)
    }
}

/// A detected difference between a reader and a writer schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaChange {
    /// Type of change
    pub change_type: ChangeType,
    /// Path to the changed element (e.g., "data[].status")
    pub path: String,
    /// Whether this change prevents the reader from decoding writer data
    pub is_breaking: bool,
    /// Human-readable description
    pub description: String,
}

impl SchemaChange {
    fn new(change_type: ChangeType, path: &str, is_breaking: bool, description: String) -> Self {
        Self {
            change_type,
            path: if path.is_empty() { "$".to_string() } else { path.to_string() },
            is_breaking,
            description,
        }
    }
}

/// Type of schema change, seen from the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Reader declares a field the writer does not have
    FieldAdded,
    /// Writer has a field the reader does not declare
    FieldRemoved,
    /// A field's type changed incompatibly
    TypeChanged,
    /// A field's type widened (e.g. int to long)
    TypePromoted,
    /// A named type was renamed
    NameChanged,
    /// Reader field takes its value from a writer field through an alias
    FieldRenamed,
    /// Reader has a symbol the writer does not
    EnumSymbolAdded,
    /// Writer has a symbol the reader does not
    EnumSymbolRemoved,
    /// A writer union branch has no reader counterpart
    UnionBranchRemoved,
}

/// Compatibility checker for schema versions
pub struct CompatibilityChecker {
    /// Strict mode - any change is considered breaking
    strict_mode: bool,
}

impl CompatibilityChecker {
    /// Create a new compatibility checker
    pub fn new() -> Self {
        Self { strict_mode: false }
    }

    /// Enable strict mode
    pub fn strict(mut self) -> Self {
        self.strict_mode = true;
        self
    }

    /// Check whether `reader` can decode data written with `writer`
    pub fn can_read(&self, reader: &SchemaDefinition, writer: &SchemaDefinition) -> CompatibilityResult {
        let mut changes = Vec::new();
        self.resolve_record(reader.root(), writer.root(), "", &mut changes);
        self.summarize(changes, String::new())
    }

    /// Check `candidate` against a subject's history (oldest first) under `mode`
    pub fn check(
        &self,
        mode: CompatibilityMode,
        candidate: &SchemaDefinition,
        history: &[&SchemaDefinition],
    ) -> CompatibilityResult {
        if mode == CompatibilityMode::None || history.is_empty() {
            return CompatibilityResult::compatible(Vec::new());
        }

        let skip = if mode.is_transitive() { 0 } else { history.len() - 1 };
        let mut changes = Vec::new();
        let mut failed_versions = Vec::new();

        for (index, existing) in history.iter().enumerate().skip(skip) {
            let version = index + 1;
            let mut found = Vec::new();
            if mode.checks_backward() {
                self.resolve_record(candidate.root(), existing.root(), "", &mut found);
            }
            if mode.checks_forward() {
                self.resolve_record(existing.root(), candidate.root(), "", &mut found);
            }
            if found.iter().any(|c| c.is_breaking) {
                failed_versions.push(version.to_string());
            }
            changes.extend(found);
        }

        let context = if failed_versions.is_empty() {
            String::new()
        } else {
            format!(" against version(s) {}", failed_versions.join(", "))
        };
        self.summarize(changes, context)
    }

    fn summarize(&self, changes: Vec<SchemaChange>, context: String) -> CompatibilityResult {
        let breaking_count = changes.iter().filter(|c| c.is_breaking).count();

        if self.strict_mode && !changes.is_empty() {
            let count = changes.len();
            CompatibilityResult::incompatible(
                changes,
                format!("Strict mode: {} changes detected{}", count, context),
            )
        } else if breaking_count > 0 {
            CompatibilityResult::incompatible(
                changes,
                format!("{} breaking changes detected{}", breaking_count, context),
            )
        } else {
            CompatibilityResult::compatible(changes)
        }
    }

    fn readable(&self, reader: &AvroType, writer: &AvroType) -> bool {
        let mut changes = Vec::new();
        self.resolve(reader, writer, "", &mut changes);
        !changes.iter().any(|c| c.is_breaking)
    }

    fn resolve(&self, reader: &AvroType, writer: &AvroType, path: &str, changes: &mut Vec<SchemaChange>) {
        // Logical types and attributes do not change how data is read.
        match (reader.physical(), writer.physical()) {
            (AvroType::Union(readers), AvroType::Union(writers)) => {
                for branch in writers {
                    if !readers.iter().any(|r| self.readable(r, branch)) {
                        changes.push(SchemaChange::new(
                            ChangeType::UnionBranchRemoved,
                            path,
                            true,
                            format!("Writer union branch '{}' has no reader counterpart", branch_name(branch)),
                        ));
                    }
                }
            }
            (AvroType::Union(readers), single) => {
                if !readers.iter().any(|r| self.readable(r, single)) {
                    changes.push(SchemaChange::new(
                        ChangeType::TypeChanged,
                        path,
                        true,
                        format!("Reader union cannot hold writer type '{}'", branch_name(single)),
                    ));
                }
            }
            (single, AvroType::Union(writers)) => {
                for branch in writers {
                    if !self.readable(single, branch) {
                        changes.push(SchemaChange::new(
                            ChangeType::UnionBranchRemoved,
                            path,
                            true,
                            format!(
                                "Writer union branch '{}' cannot be read as '{}'",
                                branch_name(branch),
                                branch_name(single)
                            ),
                        ));
                    }
                }
            }
            (AvroType::Record(r), AvroType::Record(w)) => self.resolve_record(r, w, path, changes),
            (AvroType::Enum(r), AvroType::Enum(w)) => self.resolve_enum(r, w, path, changes),
            (AvroType::Array(r), AvroType::Array(w)) => {
                self.resolve(r, w, &format!("{}[]", path), changes)
            }
            (r, w) if r == w => {}
            (r, w) if is_promotion(w, r) => changes.push(SchemaChange::new(
                ChangeType::TypePromoted,
                path,
                false,
                format!("Writer '{}' is promoted to reader '{}'", w.type_name(), r.type_name()),
            )),
            (r, w) => changes.push(SchemaChange::new(
                ChangeType::TypeChanged,
                path,
                true,
                format!("Type changed from '{}' to '{}'", branch_name(w), branch_name(r)),
            )),
        }
    }

    fn resolve_record(&self, reader: &RecordType, writer: &RecordType, path: &str, changes: &mut Vec<SchemaChange>) {
        if !reader.reads_name_of(writer) {
            changes.push(SchemaChange::new(
                ChangeType::NameChanged,
                path,
                true,
                format!("Record '{}' was renamed to '{}'", writer.name, reader.name),
            ));
            return;
        }
        if reader.name != writer.name {
            changes.push(SchemaChange::new(
                ChangeType::NameChanged,
                path,
                false,
                format!("Record '{}' is read as '{}' through an alias", writer.name, reader.name),
            ));
        }

        for field in &reader.fields {
            let field_path = join(path, &field.name);
            match writer.field_for(field) {
                Some(written) => {
                    if written.name != field.name {
                        changes.push(SchemaChange::new(
                            ChangeType::FieldRenamed,
                            &field_path,
                            false,
                            format!("Field '{}' is read from '{}' through an alias", field.name, written.name),
                        ));
                    }
                    self.resolve(&field.ty, &written.ty, &field_path, changes)
                }
                None if field.default.is_some() => changes.push(SchemaChange::new(
                    ChangeType::FieldAdded,
                    &field_path,
                    false,
                    format!("Field '{}' is filled from its default", field.name),
                )),
                None => changes.push(SchemaChange::new(
                    ChangeType::FieldAdded,
                    &field_path,
                    true,
                    format!("Field '{}' is missing from the writer and has no default", field.name),
                )),
            }
        }

        for written in &writer.fields {
            if !reader.fields.iter().any(|f| f.answers_to(&written.name)) {
                changes.push(SchemaChange::new(
                    ChangeType::FieldRemoved,
                    &join(path, &written.name),
                    false,
                    format!("Field '{}' is ignored by the reader", written.name),
                ));
            }
        }
    }

    fn resolve_enum(&self, reader: &EnumType, writer: &EnumType, path: &str, changes: &mut Vec<SchemaChange>) {
        if !reader.reads_name_of(writer) {
            changes.push(SchemaChange::new(
                ChangeType::NameChanged,
                path,
                true,
                format!("Enum '{}' was renamed to '{}'", writer.name, reader.name),
            ));
            return;
        }

        for symbol in &writer.symbols {
            if reader.index_of(symbol).is_none() {
                let rescued = reader.default.is_some();
                changes.push(SchemaChange::new(
                    ChangeType::EnumSymbolRemoved,
                    path,
                    !rescued,
                    if rescued {
                        format!("Symbol '{}' is read as the reader default", symbol)
                    } else {
                        format!("Symbol '{}' is unknown to the reader", symbol)
                    },
                ));
            }
        }
        for symbol in &reader.symbols {
            if writer.index_of(symbol).is_none() {
                changes.push(SchemaChange::new(
                    ChangeType::EnumSymbolAdded,
                    path,
                    false,
                    format!("Symbol '{}' was added", symbol),
                ));
            }
        }
    }
}

impl Default for CompatibilityChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Avro type promotions a reader may apply to writer data
pub(crate) fn is_promotion(writer: &AvroType, reader: &AvroType) -> bool {
    matches!(
        (writer, reader),
        (AvroType::Int, AvroType::Long | AvroType::Float | AvroType::Double)
            | (AvroType::Long, AvroType::Float | AvroType::Double)
            | (AvroType::Float, AvroType::Double)
            | (AvroType::String, AvroType::Bytes)
            | (AvroType::Bytes, AvroType::String)
    )
}

fn branch_name(ty: &AvroType) -> String {
    ty.full_name().unwrap_or_else(|| ty.type_name().to_string())
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}
