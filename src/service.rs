//! Signing service wiring
//!
//! Startup order is fixed: the compatibility gate admits both subjects, the codec is
//! seeded with their identifiers, the response consumer subscribes, and only then are
//! requests published.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::bus::{DeliveryReceipt, Message, MessageBus, MessageHandler, Subscription};
use crate::catalog::{Contract, SchemaCatalog};
use crate::codec::{wire, Codec};
use crate::config::ServiceConfig;
use crate::error::{Result, SchemaError};
use crate::gate::{CompatibilityGate, RegisteredSubject, SchemaIdCache, SubjectBinding};
use crate::record::{AvroRecord, SigningRequestSet, SigningResultSet};
use crate::registry::RegistryClient;
use crate::schema::{SchemaDefinition, SchemaId, Subject};

/// Encodes signing requests and produces them keyed by request id
pub struct RequestPublisher {
    codec: Arc<Codec>,
    bus: Arc<dyn MessageBus>,
    topic: String,
    subject: Subject,
    schema_id: SchemaId,
}

impl RequestPublisher {
    pub fn new(codec: Arc<Codec>, bus: Arc<dyn MessageBus>, registered: &RegisteredSubject) -> Self {
        Self {
            codec,
            bus,
            topic: registered.topic.clone(),
            subject: registered.subject.clone(),
            schema_id: registered.id,
        }
    }

    pub async fn publish(&self, request: &SigningRequestSet) -> Result<DeliveryReceipt> {
        let payload = self
            .codec
            .encode_record(request, self.schema_id)
            .await
            .inspect_err(|e| {
                error!(
                    request_id = %request.request_id,
                    subject = %self.subject,
                    schema_id = %self.schema_id,
                    error = %e,
                    "Failed to encode signing request"
                );
            })?;

        let receipt = self
            .bus
            .produce(&self.topic, &request.request_id, payload)
            .await
            .inspect_err(|e| {
                error!(
                    request_id = %request.request_id,
                    topic = %self.topic,
                    error = %e,
                    "Failed to produce signing request"
                );
            })?;

        info!(
            request_id = %request.request_id,
            topic = %self.topic,
            offset = receipt.offset,
            requests = request.data.len(),
            "Published signing request"
        );
        Ok(receipt)
    }
}

/// Decodes consumed payloads into `R` with a fixed reader schema and passes them on
///
/// Messages that cannot be decoded are logged and skipped. Transient registry
/// failures are returned to the bus adapter instead.
pub struct DecodingHandler<R, F> {
    codec: Arc<Codec>,
    reader: SchemaDefinition,
    subject: Subject,
    sink: F,
    _record: PhantomData<fn() -> R>,
}

impl<R, F> DecodingHandler<R, F>
where
    R: AvroRecord + Send + 'static,
    F: Fn(String, R) + Send + Sync + 'static,
{
    pub fn new(codec: Arc<Codec>, reader: SchemaDefinition, subject: Subject, sink: F) -> Self {
        Self {
            codec,
            reader,
            subject,
            sink,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R, F> MessageHandler for DecodingHandler<R, F>
where
    R: AvroRecord + Send + 'static,
    F: Fn(String, R) + Send + Sync + 'static,
{
    async fn handle(&self, message: Message) -> Result<()> {
        match self.codec.decode_record::<R>(&message.value, &self.reader).await {
            Ok(record) => {
                (self.sink)(message.key, record);
                Ok(())
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                warn!(
                    request_id = %message.key,
                    subject = %self.subject,
                    schema_id = ?wire::peek_schema_id(&message.value),
                    topic = %message.topic,
                    offset = message.offset,
                    error = %e,
                    "Skipping undecodable message"
                );
                Ok(())
            }
        }
    }
}

/// Producer and consumer sides of the signing exchange
pub struct SigningService {
    ids: SchemaIdCache,
    codec: Arc<Codec>,
    bus: Arc<dyn MessageBus>,
    publisher: RequestPublisher,
    subscription: Option<Subscription>,
}

impl SigningService {
    /// Run the gate and start consuming responses
    ///
    /// Fails without touching the bus if either subject is not admitted.
    pub async fn start<F>(
        config: &ServiceConfig,
        catalog: &SchemaCatalog,
        registry: Arc<dyn RegistryClient>,
        bus: Arc<dyn MessageBus>,
        on_response: F,
    ) -> Result<Self>
    where
        F: Fn(String, SigningResultSet) + Send + Sync + 'static,
    {
        let request = SubjectBinding::from_config(
            Contract::SigningRequest,
            &config.subjects.request,
            catalog,
        )?;
        let response = SubjectBinding::from_config(
            Contract::SigningResponse,
            &config.subjects.response,
            catalog,
        )?;

        let ids = CompatibilityGate::new(registry.clone())
            .with_subject(request.clone())
            .with_subject(response.clone())
            .run()
            .await?;
        let codec = Arc::new(Codec::with_registered(registry, &ids)?);

        let handler = Arc::new(DecodingHandler::new(
            codec.clone(),
            response.schema.clone(),
            response.subject.clone(),
            on_response,
        ));
        let subscription = bus.subscribe(&response.topic, handler).await?;

        let registered = ids.get(&request.subject).ok_or_else(|| {
            SchemaError::NotFound(format!("subject {} was not admitted", request.subject))
        })?;
        let publisher = RequestPublisher::new(codec.clone(), bus.clone(), registered);

        info!(
            request_topic = %request.topic,
            response_topic = %response.topic,
            "Signing service started"
        );
        Ok(Self {
            ids,
            codec,
            bus,
            publisher,
            subscription: Some(subscription),
        })
    }

    pub fn schema_ids(&self) -> &SchemaIdCache {
        &self.ids
    }

    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    pub async fn publish_request(&self, request: &SigningRequestSet) -> Result<DeliveryReceipt> {
        self.publisher.publish(request).await
    }

    /// Stop consuming and close the bus
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.bus.close().await?;
        info!("Signing service stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::compatibility::CompatibilityMode;
    use crate::record::{AssociatedData, SigningRequest};
    use crate::registry::InMemoryRegistry;
    use serde_json::json;
    use std::sync::Mutex;

    fn request() -> SigningRequestSet {
        SigningRequestSet {
            request_id: "abc".into(),
            data: vec![SigningRequest {
                associated_data: AssociatedData::new(json!({"foo": 1})),
                blinded_tokens: vec!["token".into()],
                issuer_type: "ads".into(),
                issuer_cohort: 1,
            }],
        }
    }

    #[tokio::test]
    async fn test_start_publishes_after_gate() {
        let registry = Arc::new(InMemoryRegistry::new());
        let bus = Arc::new(InMemoryBus::new());
        let catalog = SchemaCatalog::builtin().unwrap();

        let service = SigningService::start(
            &ServiceConfig::default(),
            &catalog,
            registry.clone(),
            bus.clone(),
            |_, _| {},
        )
        .await
        .unwrap();
        assert_eq!(service.schema_ids().len(), 2);

        let receipt = service.publish_request(&request()).await.unwrap();
        let messages = bus.messages("signing-request");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key, "abc");
        assert_eq!(receipt.offset, 0);

        let request_id = service
            .schema_ids()
            .id(&Subject::new("signing-request-value"))
            .unwrap();
        assert_eq!(wire::peek_schema_id(&messages[0].value), Some(request_id));

        service.shutdown().await.unwrap();
        assert!(bus.produce("signing-request", "k", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_gate_failure_prevents_start() {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.set_subject_compatibility(
            &Subject::new("signing-request-value"),
            CompatibilityMode::Backward,
        );
        let bus = Arc::new(InMemoryBus::new());

        let result = SigningService::start(
            &ServiceConfig::default(),
            &SchemaCatalog::builtin().unwrap(),
            registry,
            bus.clone(),
            |_, _| {},
        )
        .await;
        assert!(matches!(result, Err(SchemaError::RegistrationRejected { .. })));
        assert!(bus.messages("signing-request").is_empty());
    }

    #[tokio::test]
    async fn test_decoding_handler_skips_garbage() {
        let registry = Arc::new(InMemoryRegistry::new());
        let codec = Arc::new(Codec::new(registry));
        let reader = SchemaCatalog::builtin()
            .unwrap()
            .latest(Contract::SigningResponse)
            .unwrap()
            .1
            .clone();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |key: String, _: SigningResultSet| seen.lock().unwrap().push(key)
        };
        let handler = DecodingHandler::new(codec, reader, Subject::new("signing-response-value"), sink);

        let garbage = Message {
            topic: "signing-response".into(),
            partition: 0,
            offset: 0,
            key: "abc".into(),
            value: vec![1, 2, 3],
        };
        assert!(handler.handle(garbage).await.is_ok());
        assert!(seen.lock().unwrap().is_empty());
    }
}
