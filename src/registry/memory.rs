//! In-process schema registry
//!
//! Follows the registry's own rules: identifiers are global per schema body, a subject
//! keeps an append-only version history, and new versions must satisfy the subject's
//! compatibility mode against that history.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{RegistryClient, SubjectVersion};
use crate::checksum::Fingerprint;
use crate::compatibility::{CompatibilityChecker, CompatibilityMode, CompatibilityResult};
use crate::error::{Result, SchemaError};
use crate::schema::{SchemaDefinition, SchemaId, Subject};

#[derive(Debug, Clone)]
struct VersionEntry {
    version: u32,
    id: SchemaId,
    registered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SubjectState {
    compatibility: Option<CompatibilityMode>,
    versions: Vec<VersionEntry>,
}

#[derive(Debug)]
struct RegistryState {
    next_id: u32,
    schemas: HashMap<SchemaId, SchemaDefinition>,
    ids: HashMap<Fingerprint, SchemaId>,
    subjects: HashMap<Subject, SubjectState>,
}

impl RegistryState {
    fn history(&self, subject: &Subject) -> Vec<&SchemaDefinition> {
        self.subjects
            .get(subject)
            .map(|state| {
                state
                    .versions
                    .iter()
                    .filter_map(|entry| self.schemas.get(&entry.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn id_in_subject(&self, fingerprint: &Fingerprint, subject: &Subject) -> Option<SchemaId> {
        let id = *self.ids.get(fingerprint)?;
        self.subjects
            .get(subject)?
            .versions
            .iter()
            .any(|entry| entry.id == id)
            .then_some(id)
    }
}

/// Registry kept in memory
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
    default_mode: CompatibilityMode,
    available: AtomicBool,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    /// Empty registry whose subjects default to BACKWARD, as Confluent's do
    pub fn new() -> Self {
        Self::with_default_mode(CompatibilityMode::Backward)
    }

    pub fn with_default_mode(default_mode: CompatibilityMode) -> Self {
        Self {
            state: Mutex::new(RegistryState {
                next_id: 1,
                schemas: HashMap::new(),
                ids: HashMap::new(),
                subjects: HashMap::new(),
            }),
            default_mode,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the registry going away; every call then fails as unavailable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn subject_compatibility(&self, subject: &Subject) -> Option<CompatibilityMode> {
        self.lock().subjects.get(subject).and_then(|s| s.compatibility)
    }

    pub fn set_subject_compatibility(&self, subject: &Subject, mode: CompatibilityMode) {
        self.lock()
            .subjects
            .entry(subject.clone())
            .or_default()
            .compatibility = Some(mode);
        info!(%subject, %mode, "Configured subject compatibility");
    }

    /// Mode governing a subject: its own level, else the registry default
    pub fn effective_compatibility(&self, subject: &Subject) -> CompatibilityMode {
        self.subject_compatibility(subject).unwrap_or(self.default_mode)
    }

    /// Detailed compatibility of `schema` against the subject's history
    pub fn compatibility_result(&self, schema: &SchemaDefinition, subject: &Subject) -> CompatibilityResult {
        let mode = self.effective_compatibility(subject);
        let state = self.lock();
        let result = CompatibilityChecker::new().check(mode, schema, &state.history(subject));
        if !result.is_compatible {
            for change in result.breaking() {
                warn!(%subject, path = %change.path, "{}", change.description);
            }
        }
        result
    }

    /// Add `schema` to the subject under its configured mode
    pub fn register_version(&self, schema: &SchemaDefinition, subject: &Subject) -> Result<SchemaId> {
        let mode = self.effective_compatibility(subject);
        let fingerprint = schema.fingerprint();
        let mut guard = self.lock();

        if let Some(id) = guard.id_in_subject(&fingerprint, subject) {
            debug!(%subject, schema_id = %id, "Schema already registered under subject");
            return Ok(id);
        }

        let result = CompatibilityChecker::new().check(mode, schema, &guard.history(subject));
        if !result.is_compatible {
            return Err(SchemaError::rejected(
                subject.as_str(),
                format!(
                    "Schema being registered is incompatible with an earlier schema ({}): {}",
                    mode, result.summary
                ),
            ));
        }

        let state = &mut *guard;
        let id = match state.ids.get(&fingerprint) {
            Some(id) => *id,
            None => {
                let id = SchemaId(state.next_id);
                state.next_id += 1;
                state.ids.insert(fingerprint, id);
                state.schemas.insert(id, schema.clone());
                id
            }
        };

        let subject_state = state.subjects.entry(subject.clone()).or_default();
        let version = subject_state.versions.len() as u32 + 1;
        subject_state.versions.push(VersionEntry {
            version,
            id,
            registered_at: Utc::now(),
        });

        info!(%subject, schema_id = %id, version, %mode, "Registered schema version");
        Ok(id)
    }

    /// Version numbers of a subject, oldest first
    pub fn versions(&self, subject: &Subject) -> Vec<u32> {
        self.lock()
            .subjects
            .get(subject)
            .map(|s| s.versions.iter().map(|v| v.version).collect())
            .unwrap_or_default()
    }

    /// Version under which `id` was registered in the subject
    pub fn version_of(&self, subject: &Subject, id: SchemaId) -> Option<u32> {
        self.lock()
            .subjects
            .get(subject)?
            .versions
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.version)
    }

    /// When a subject version was registered
    pub fn registered_at(&self, subject: &Subject, version: u32) -> Option<DateTime<Utc>> {
        self.lock()
            .subjects
            .get(subject)?
            .versions
            .iter()
            .find(|v| v.version == version)
            .map(|v| v.registered_at)
    }

    pub fn subjects(&self) -> Vec<Subject> {
        let mut subjects: Vec<Subject> = self.lock().subjects.keys().cloned().collect();
        subjects.sort();
        subjects
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SchemaError::RegistryUnavailable(
                "in-memory registry is switched off".to_string(),
            ))
        }
    }
}

#[async_trait]
impl RegistryClient for InMemoryRegistry {
    async fn register(
        &self,
        schema: &SchemaDefinition,
        subject: &Subject,
        mode: CompatibilityMode,
    ) -> Result<SchemaId> {
        self.ensure_available()?;
        match self.subject_compatibility(subject) {
            None => self.set_subject_compatibility(subject, mode),
            Some(current) if current == mode => {}
            Some(current) => {
                return Err(SchemaError::rejected(
                    subject.as_str(),
                    format!(
                        "subject is configured for {} but {} was requested",
                        current, mode
                    ),
                ))
            }
        }
        self.register_version(schema, subject)
    }

    async fn check_compatibility(&self, schema: &SchemaDefinition, subject: &Subject) -> Result<bool> {
        self.ensure_available()?;
        Ok(self.compatibility_result(schema, subject).is_compatible)
    }

    async fn identifier_for_schema(&self, schema: &SchemaDefinition, subject: &Subject) -> Result<SchemaId> {
        self.ensure_available()?;
        self.lock()
            .id_in_subject(&schema.fingerprint(), subject)
            .ok_or_else(|| {
                SchemaError::NotFound(format!(
                    "{} is not registered under {}",
                    schema.full_name(),
                    subject
                ))
            })
    }

    async fn schema_by_id(&self, id: SchemaId) -> Result<SchemaDefinition> {
        self.ensure_available()?;
        self.lock()
            .schemas
            .get(&id)
            .cloned()
            .ok_or(SchemaError::UnknownSchema { id })
    }

    async fn latest_version(&self, subject: &Subject) -> Result<SubjectVersion> {
        self.ensure_available()?;
        let state = self.lock();
        let entry = state
            .subjects
            .get(subject)
            .and_then(|s| s.versions.last())
            .ok_or_else(|| SchemaError::NotFound(format!("subject {}", subject)))?;
        let schema = state
            .schemas
            .get(&entry.id)
            .cloned()
            .ok_or(SchemaError::UnknownSchema { id: entry.id })?;
        Ok(SubjectVersion {
            subject: subject.clone(),
            version: entry.version,
            id: entry.id,
            schema,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AvroType, Field, RecordType};

    fn tokens(extra: Vec<Field>) -> SchemaDefinition {
        let mut fields = vec![Field::new("request_id", AvroType::String)];
        fields.extend(extra);
        SchemaDefinition::new(RecordType::new("Tokens", Some("test"), fields)).unwrap()
    }

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let registry = InMemoryRegistry::new();
        let subject = Subject::value_for_topic("tokens");
        let schema = tokens(vec![]);

        let first = registry
            .register(&schema, &subject, CompatibilityMode::ForwardTransitive)
            .await
            .unwrap();
        let second = registry
            .register(&schema, &subject, CompatibilityMode::ForwardTransitive)
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.versions(&subject), vec![1]);
        assert!(registry.registered_at(&subject, 1).is_some());
        assert_eq!(
            registry.identifier_for_schema(&schema, &subject).await.unwrap(),
            first
        );
    }

    #[tokio::test]
    async fn test_ids_are_shared_across_subjects() {
        let registry = InMemoryRegistry::new();
        let schema = tokens(vec![]);
        let a = registry
            .register(&schema, &Subject::new("a-value"), CompatibilityMode::Backward)
            .await
            .unwrap();
        let b = registry
            .register(&schema, &Subject::new("b-value"), CompatibilityMode::Backward)
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.subjects().len(), 2);
    }

    #[tokio::test]
    async fn test_mode_mismatch_is_rejected() {
        let registry = InMemoryRegistry::new();
        let subject = Subject::new("tokens-value");
        registry.set_subject_compatibility(&subject, CompatibilityMode::Full);

        let err = registry
            .register(&tokens(vec![]), &subject, CompatibilityMode::ForwardTransitive)
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::RegistrationRejected { .. }));
        assert!(registry.versions(&subject).is_empty());
    }

    #[tokio::test]
    async fn test_incompatible_version_is_rejected() {
        let registry = InMemoryRegistry::new();
        let subject = Subject::new("tokens-value");
        let mode = CompatibilityMode::ForwardTransitive;
        let v1 = tokens(vec![Field::new("proof", AvroType::String)]);
        registry.register(&v1, &subject, mode).await.unwrap();

        // Dropping a field old readers require breaks forward compatibility.
        let v2 = tokens(vec![]);
        assert!(!registry.check_compatibility(&v2, &subject).await.unwrap());
        assert!(matches!(
            registry.register(&v2, &subject, mode).await,
            Err(SchemaError::RegistrationRejected { .. })
        ));

        let v3 = tokens(vec![
            Field::new("proof", AvroType::String),
            Field::optional("valid_to", AvroType::String),
        ]);
        assert!(registry.check_compatibility(&v3, &subject).await.unwrap());
        let id = registry.register(&v3, &subject, mode).await.unwrap();

        let latest = registry.latest_version(&subject).await.unwrap();
        assert_eq!(latest.version, 2);
        assert_eq!(latest.id, id);
        assert_eq!(latest.schema, v3);
    }

    #[tokio::test]
    async fn test_lookup_failures() {
        let registry = InMemoryRegistry::new();
        let subject = Subject::new("tokens-value");

        assert!(matches!(
            registry.schema_by_id(SchemaId(7)).await,
            Err(SchemaError::UnknownSchema { .. })
        ));
        assert!(matches!(
            registry.latest_version(&subject).await,
            Err(SchemaError::NotFound(_))
        ));
        assert!(matches!(
            registry.identifier_for_schema(&tokens(vec![]), &subject).await,
            Err(SchemaError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unavailable_registry() {
        let registry = InMemoryRegistry::new();
        registry.set_available(false);
        let err = registry
            .register(&tokens(vec![]), &Subject::new("x-value"), CompatibilityMode::None)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        registry.set_available(true);
        assert!(registry
            .register(&tokens(vec![]), &Subject::new("x-value"), CompatibilityMode::None)
            .await
            .is_ok());
    }
}
