//! Startup compatibility gate
//!
//! Before any message is produced or consumed, every subject the process uses is
//! registered (or resolved) and then explicitly checked against its compatibility
//! mode. Subjects are handled one at a time, in order, and the first failure aborts the
//! whole gate: a process never runs with some subjects admitted and others not.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info};

use crate::catalog::{Contract, SchemaCatalog};
use crate::compatibility::CompatibilityMode;
use crate::config::SubjectConfig;
use crate::error::{Result, SchemaError};
use crate::registry::RegistryClient;
use crate::schema::{SchemaDefinition, SchemaId, Subject};

/// A schema the process intends to use under a subject
#[derive(Debug, Clone)]
pub struct SubjectBinding {
    pub topic: String,
    pub subject: Subject,
    pub mode: CompatibilityMode,
    pub schema: SchemaDefinition,
    /// Register the schema, or only look up an existing registration
    pub register: bool,
}

impl SubjectBinding {
    /// Bind `schema` to the value subject of `topic`
    pub fn for_topic(topic: &str, mode: CompatibilityMode, schema: SchemaDefinition) -> Self {
        Self {
            topic: topic.to_string(),
            subject: Subject::value_for_topic(topic),
            mode,
            schema,
            register: true,
        }
    }

    /// Binding described by configuration, with the schema taken from the catalog
    pub fn from_config(contract: Contract, config: &SubjectConfig, catalog: &SchemaCatalog) -> Result<Self> {
        let version = config.contract_version()?;
        let schema = catalog.get(contract, &version)?.clone();
        Ok(Self {
            topic: config.topic.clone(),
            subject: config.subject(),
            mode: config.compatibility,
            schema,
            register: config.register,
        })
    }

    /// Only resolve the identifier of an existing registration
    pub fn resolve_only(mut self) -> Self {
        self.register = false;
        self
    }
}

/// A subject admitted by the gate
#[derive(Debug, Clone)]
pub struct RegisteredSubject {
    pub topic: String,
    pub subject: Subject,
    pub mode: CompatibilityMode,
    pub id: SchemaId,
    pub schema: SchemaDefinition,
}

/// Identifiers resolved at startup, read-only afterwards
#[derive(Debug, Clone, Default)]
pub struct SchemaIdCache {
    subjects: HashMap<Subject, RegisteredSubject>,
}

impl SchemaIdCache {
    pub fn get(&self, subject: &Subject) -> Option<&RegisteredSubject> {
        self.subjects.get(subject)
    }

    /// Identifier of an admitted subject
    pub fn id(&self, subject: &Subject) -> Result<SchemaId> {
        self.get(subject)
            .map(|r| r.id)
            .ok_or_else(|| SchemaError::NotFound(format!("subject {} was not admitted", subject)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredSubject> {
        self.subjects.values()
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// Registers and verifies subjects before traffic starts
pub struct CompatibilityGate {
    registry: Arc<dyn RegistryClient>,
    bindings: Vec<SubjectBinding>,
}

impl CompatibilityGate {
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self {
            registry,
            bindings: Vec::new(),
        }
    }

    pub fn with_subject(mut self, binding: SubjectBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    pub fn bindings(&self) -> &[SubjectBinding] {
        &self.bindings
    }

    /// Admit every bound subject, or none
    pub async fn run(&self) -> Result<SchemaIdCache> {
        let mut subjects = HashMap::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            if subjects.contains_key(&binding.subject) {
                return Err(SchemaError::rejected(
                    binding.subject.as_str(),
                    "subject is bound more than once",
                ));
            }
            let admitted = self.admit(binding).await.inspect_err(|e| {
                error!(
                    subject = %binding.subject,
                    topic = %binding.topic,
                    mode = %binding.mode,
                    error = %e,
                    "Compatibility gate failed; aborting startup"
                );
            })?;
            subjects.insert(binding.subject.clone(), admitted);
        }

        info!(subjects = subjects.len(), "Compatibility gate passed");
        Ok(SchemaIdCache { subjects })
    }

    async fn admit(&self, binding: &SubjectBinding) -> Result<RegisteredSubject> {
        let id = if binding.register {
            self.registry
                .register(&binding.schema, &binding.subject, binding.mode)
                .await?
        } else {
            self.registry
                .identifier_for_schema(&binding.schema, &binding.subject)
                .await?
        };

        // Registration already enforces the mode; this check confirms the subject
        // still accepts the body we are about to use.
        let compatible = self
            .registry
            .check_compatibility(&binding.schema, &binding.subject)
            .await?;
        if !compatible {
            return Err(SchemaError::IncompatibleSchema {
                subject: binding.subject.to_string(),
                mode: binding.mode,
            });
        }

        info!(
            subject = %binding.subject,
            topic = %binding.topic,
            schema_id = %id,
            mode = %binding.mode,
            "Schema admitted"
        );
        Ok(RegisteredSubject {
            topic: binding.topic.clone(),
            subject: binding.subject.clone(),
            mode: binding.mode,
            id,
            schema: binding.schema.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Contract;
    use crate::registry::InMemoryRegistry;
    use crate::version::ContractVersion;

    fn catalog_schema(contract: Contract, version: (u64, u64, u64)) -> SchemaDefinition {
        SchemaCatalog::builtin()
            .unwrap()
            .get(contract, &ContractVersion::new(version.0, version.1, version.2))
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_gate_admits_both_subjects() {
        let registry = Arc::new(InMemoryRegistry::new());
        let gate = CompatibilityGate::new(registry.clone())
            .with_subject(SubjectBinding::for_topic(
                "signing-request",
                CompatibilityMode::ForwardTransitive,
                catalog_schema(Contract::SigningRequest, (1, 0, 0)),
            ))
            .with_subject(SubjectBinding::for_topic(
                "signing-response",
                CompatibilityMode::ForwardTransitive,
                catalog_schema(Contract::SigningResponse, (1, 0, 0)),
            ));

        let ids = gate.run().await.unwrap();
        assert_eq!(ids.len(), 2);
        let request = Subject::new("signing-request-value");
        assert_eq!(ids.get(&request).unwrap().topic, "signing-request");
        assert_ne!(
            ids.id(&request).unwrap(),
            ids.id(&Subject::new("signing-response-value")).unwrap()
        );
        assert_eq!(
            registry.subject_compatibility(&request),
            Some(CompatibilityMode::ForwardTransitive)
        );
    }

    #[tokio::test]
    async fn test_gate_is_all_or_nothing() {
        let registry = Arc::new(InMemoryRegistry::new());
        let response = Subject::new("signing-response-value");
        registry.set_subject_compatibility(&response, CompatibilityMode::Full);

        let gate = CompatibilityGate::new(registry.clone())
            .with_subject(SubjectBinding::for_topic(
                "signing-request",
                CompatibilityMode::ForwardTransitive,
                catalog_schema(Contract::SigningRequest, (1, 0, 0)),
            ))
            .with_subject(SubjectBinding::for_topic(
                "signing-response",
                CompatibilityMode::ForwardTransitive,
                catalog_schema(Contract::SigningResponse, (1, 0, 0)),
            ));

        let err = gate.run().await.unwrap_err();
        assert!(err.is_startup_fatal());
        assert!(registry.versions(&response).is_empty());
    }

    #[tokio::test]
    async fn test_superseded_body_fails_explicit_check() {
        let registry = Arc::new(InMemoryRegistry::new());
        let subject = Subject::new("tokens-value");
        let mode = CompatibilityMode::Forward;
        let v1 = SchemaDefinition::parse(
            r#"{"type":"record","name":"Token","namespace":"test","fields":[
                {"name":"id","type":"string"}
            ]}"#,
        )
        .unwrap();
        let v2 = SchemaDefinition::parse(
            r#"{"type":"record","name":"Token","namespace":"test","fields":[
                {"name":"id","type":"string"},
                {"name":"count","type":"int"}
            ]}"#,
        )
        .unwrap();

        let v1_id = registry.register(&v1, &subject, mode).await.unwrap();
        registry.register(&v2, &subject, mode).await.unwrap();

        // Registering v1 again hands back its id without a new version...
        assert_eq!(registry.register(&v1, &subject, mode).await.unwrap(), v1_id);
        assert_eq!(registry.versions(&subject), vec![1, 2]);

        // ...so only the explicit check notices that v2 cannot read v1 data.
        let err = CompatibilityGate::new(registry.clone())
            .with_subject(SubjectBinding::for_topic("tokens", mode, v1))
            .run()
            .await
            .unwrap_err();
        match err {
            SchemaError::IncompatibleSchema { subject, mode } => {
                assert_eq!(subject, "tokens-value");
                assert_eq!(mode, CompatibilityMode::Forward);
            }
            other => panic!("expected IncompatibleSchema, got {:?}", other),
        }
        assert_eq!(registry.versions(&subject), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_resolve_only_requires_registration() {
        let registry = Arc::new(InMemoryRegistry::new());
        let schema = catalog_schema(Contract::SigningResponse, (1, 1, 0));
        let binding = SubjectBinding::for_topic(
            "signing-response",
            CompatibilityMode::ForwardTransitive,
            schema.clone(),
        )
        .resolve_only();

        let gate = CompatibilityGate::new(registry.clone()).with_subject(binding.clone());
        assert!(matches!(gate.run().await, Err(SchemaError::NotFound(_))));

        let id = registry
            .register(&schema, &binding.subject, binding.mode)
            .await
            .unwrap();
        let ids = gate.run().await.unwrap();
        assert_eq!(ids.id(&binding.subject).unwrap(), id);
    }

    #[tokio::test]
    async fn test_duplicate_binding_is_rejected() {
        let registry = Arc::new(InMemoryRegistry::new());
        let binding = SubjectBinding::for_topic(
            "signing-request",
            CompatibilityMode::ForwardTransitive,
            catalog_schema(Contract::SigningRequest, (1, 0, 0)),
        );
        let gate = CompatibilityGate::new(registry)
            .with_subject(binding.clone())
            .with_subject(binding);
        assert!(matches!(
            gate.run().await,
            Err(SchemaError::RegistrationRejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_unavailable_registry_aborts() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.set_available(false);
        let gate = CompatibilityGate::new(registry).with_subject(SubjectBinding::for_topic(
            "signing-request",
            CompatibilityMode::ForwardTransitive,
            catalog_schema(Contract::SigningRequest, (1, 0, 0)),
        ));
        assert!(matches!(
            gate.run().await,
            Err(SchemaError::RegistryUnavailable(_))
        ));
    }
}
