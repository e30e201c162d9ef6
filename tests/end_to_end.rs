//! End-to-end Tests for the Signing Exchange
//!
//! Registry and bus both run in process; everything between them is the real gate,
//! codec and service wiring.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use signing_schemas::codec::wire;
use signing_schemas::{
    AssociatedData, Codec, CompatibilityGate, CompatibilityMode, Contract, ContractVersion,
    DecodingHandler, InMemoryBus, InMemoryRegistry, MessageBus, RegistryClient, SchemaCatalog, SchemaDefinition,
    SchemaError, ServiceConfig, SigningRequestSet, SigningResult, SigningResultSet,
    SigningResultStatus, SigningService, Subject, SubjectBinding,
};

fn catalog() -> SchemaCatalog {
    SchemaCatalog::builtin().unwrap()
}

fn schema(contract: Contract, major: u64, minor: u64) -> SchemaDefinition {
    catalog()
        .get(contract, &ContractVersion::new(major, minor, 0))
        .unwrap()
        .clone()
}

fn request_abc() -> SigningRequestSet {
    serde_json::from_value(json!({
        "request_id": "abc",
        "data": [{
            "associated_data": {"foo": 1},
            "blinded_tokens": ["Ym9n", "dG9r"],
            "issuer_type": "ads",
            "issuer_cohort": 1
        }]
    }))
    .unwrap()
}

fn result_set(request_id: &str, status: SigningResultStatus, valid_to: Option<&str>) -> SigningResultSet {
    SigningResultSet {
        request_id: request_id.to_string(),
        data: vec![SigningResult {
            signed_tokens: vec!["c2ln".into()],
            public_key: "pk".into(),
            proof: "proof".into(),
            status,
            valid_to: valid_to.map(str::to_string),
            valid_from: None,
            associated_data: AssociatedData::new(json!({"foo": 1})),
        }],
    }
}

/// Poll until `check` holds or two seconds pass
async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

// =============================================================================
// Request Path
// =============================================================================

#[tokio::test]
async fn test_request_round_trip_through_bus() {
    let registry = Arc::new(InMemoryRegistry::new());
    let bus = Arc::new(InMemoryBus::new());
    let request_schema = schema(Contract::SigningRequest, 1, 0);

    let ids = CompatibilityGate::new(registry.clone())
        .with_subject(SubjectBinding::for_topic(
            "signing-request",
            CompatibilityMode::ForwardTransitive,
            request_schema.clone(),
        ))
        .run()
        .await
        .unwrap();
    let subject = Subject::new("signing-request-value");
    let id = ids.id(&subject).unwrap();

    let codec = Codec::with_registered(registry.clone(), &ids).unwrap();
    let payload = codec.encode_record(&request_abc(), id).await.unwrap();
    assert_eq!(payload[0], 0x00);
    assert_eq!(&payload[1..5], &id.0.to_be_bytes());

    bus.produce("signing-request", "abc", payload).await.unwrap();

    let consumed = bus.messages("signing-request");
    assert_eq!(consumed.len(), 1);
    assert_eq!(consumed[0].key, "abc");

    // A consumer with a fresh codec has to fetch the writer schema by id.
    let consumer_codec = Codec::new(registry.clone());
    let decoded: SigningRequestSet = consumer_codec
        .decode_record(&consumed[0].value, &request_schema)
        .await
        .unwrap();
    assert_eq!(decoded, request_abc());
    assert_eq!(decoded.data[0].associated_data.as_json(), &json!({"foo": 1}));
}

#[tokio::test]
async fn test_subscriber_receives_minimal_request() {
    let registry = Arc::new(InMemoryRegistry::new());
    let bus = Arc::new(InMemoryBus::new());
    let request_schema = schema(Contract::SigningRequest, 1, 0);
    let subject = Subject::new("signing-request-value");

    let ids = CompatibilityGate::new(registry.clone())
        .with_subject(SubjectBinding::for_topic(
            "signing-request",
            CompatibilityMode::ForwardTransitive,
            request_schema.clone(),
        ))
        .run()
        .await
        .unwrap();
    assert_eq!(
        registry.subject_compatibility(&subject),
        Some(CompatibilityMode::ForwardTransitive)
    );

    let request: SigningRequestSet = serde_json::from_value(json!({
        "request_id": "abc",
        "data": [{
            "associated_data": {"foo": 1},
            "blinded_tokens": [],
            "issuer_type": "",
            "issuer_cohort": 0
        }]
    }))
    .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let consumer = DecodingHandler::new(
        Arc::new(Codec::new(registry.clone())),
        request_schema,
        subject.clone(),
        move |key: String, record: SigningRequestSet| sink.lock().unwrap().push((key, record)),
    );
    let subscription = bus
        .subscribe("signing-request", Arc::new(consumer))
        .await
        .unwrap();

    let producer = Codec::with_registered(registry.clone(), &ids).unwrap();
    let payload = producer
        .encode_record(&request, ids.id(&subject).unwrap())
        .await
        .unwrap();
    bus.produce("signing-request", "abc", payload).await.unwrap();

    eventually(|| received.lock().unwrap().len() == 1).await;
    let (key, decoded) = received.lock().unwrap().remove(0);
    assert_eq!(key, "abc");
    assert_eq!(decoded, request);
    assert!(decoded.data[0].blinded_tokens.is_empty());
    subscription.cancel();
}

#[tokio::test]
async fn test_registration_is_idempotent_across_restarts() {
    let registry = Arc::new(InMemoryRegistry::new());
    let binding = SubjectBinding::for_topic(
        "signing-request",
        CompatibilityMode::ForwardTransitive,
        schema(Contract::SigningRequest, 1, 0),
    );

    let first = CompatibilityGate::new(registry.clone())
        .with_subject(binding.clone())
        .run()
        .await
        .unwrap();
    let second = CompatibilityGate::new(registry.clone())
        .with_subject(binding.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(first.id(&binding.subject).unwrap(), second.id(&binding.subject).unwrap());
    assert_eq!(registry.versions(&binding.subject), vec![1]);
}

// =============================================================================
// Schema Evolution
// =============================================================================

#[tokio::test]
async fn test_response_versions_read_each_other() {
    let registry = Arc::new(InMemoryRegistry::new());
    let subject = Subject::new("signing-response-value");
    let mode = CompatibilityMode::ForwardTransitive;
    let v1 = schema(Contract::SigningResponse, 1, 0);
    let v2 = schema(Contract::SigningResponse, 1, 1);

    let v1_id = registry.register(&v1, &subject, mode).await.unwrap();
    let v2_id = registry.register(&v2, &subject, mode).await.unwrap();
    assert_ne!(v1_id, v2_id);

    let codec = Codec::new(registry.clone());

    // Newer writer, older reader: the validity fields are skipped.
    let from_v2 = codec
        .encode_record(&result_set("abc", SigningResultStatus::Ok, Some("2030-01-01")), v2_id)
        .await
        .unwrap();
    let read_by_v1: SigningResultSet = codec.decode_record(&from_v2, &v1).await.unwrap();
    assert_eq!(read_by_v1.data[0].valid_to, None);
    assert_eq!(read_by_v1.data[0].status, SigningResultStatus::Ok);

    // Older writer, newer reader: the validity fields take their null default.
    let from_v1 = codec
        .encode_record(&result_set("abc", SigningResultStatus::Error, Some("dropped")), v1_id)
        .await
        .unwrap();
    let read_by_v2: SigningResultSet = codec.decode_record(&from_v1, &v2).await.unwrap();
    assert_eq!(read_by_v2.data[0].valid_to, None);
    assert_eq!(read_by_v2.data[0].status, SigningResultStatus::Error);

    // Same version both sides keeps everything.
    let same: SigningResultSet = codec.decode_record(&from_v2, &v2).await.unwrap();
    assert_eq!(same, result_set("abc", SigningResultStatus::Ok, Some("2030-01-01")));
}

#[tokio::test]
async fn test_removing_required_field_is_refused() {
    let registry = Arc::new(InMemoryRegistry::new());
    let mode = CompatibilityMode::ForwardTransitive;
    let subject = Subject::new("signing-response-value");
    registry
        .register(&schema(Contract::SigningResponse, 1, 0), &subject, mode)
        .await
        .unwrap();

    let mut body = schema(Contract::SigningResponse, 1, 0).to_json();
    body["fields"][1]["type"]["items"]["fields"]
        .as_array_mut()
        .unwrap()
        .retain(|field| field["name"] != "proof");
    let without_proof = SchemaDefinition::from_json(&body).unwrap();
    assert!(without_proof.canonical_json().len() < schema(Contract::SigningResponse, 1, 0).canonical_json().len());

    let err = CompatibilityGate::new(registry.clone())
        .with_subject(SubjectBinding::for_topic("signing-response", mode, without_proof))
        .run()
        .await
        .unwrap_err();
    assert!(err.is_startup_fatal(), "unexpected error {err:?}");
    assert_eq!(registry.versions(&subject), vec![1]);
}

#[tokio::test]
async fn test_unknown_enum_symbol_is_rejected() {
    let registry = Arc::new(InMemoryRegistry::new());
    let writer = SchemaDefinition::parse(
        r#"{"type":"record","name":"Status","fields":[
            {"name":"status","type":{"type":"enum","name":"SigningResultStatus",
                "symbols":["ok","invalid_issuer","error","revoked"]}}
        ]}"#,
    )
    .unwrap();
    let reader = SchemaDefinition::parse(
        r#"{"type":"record","name":"Status","fields":[
            {"name":"status","type":{"type":"enum","name":"SigningResultStatus",
                "symbols":["ok","invalid_issuer","error"]}}
        ]}"#,
    )
    .unwrap();

    let id = registry
        .register(&writer, &Subject::new("status-value"), CompatibilityMode::None)
        .await
        .unwrap();
    let codec = Codec::new(registry.clone());
    let record = apache_avro::types::Value::Record(vec![(
        "status".into(),
        apache_avro::types::Value::String("revoked".into()),
    )]);
    let payload = codec.encode(&record, id).await.unwrap();

    match codec.decode(&payload, &reader).await.unwrap_err() {
        SchemaError::UnresolvedEnumSymbol { symbol, enum_name } => {
            assert_eq!(symbol, "revoked");
            assert_eq!(enum_name, "SigningResultStatus");
        }
        other => panic!("unexpected error {other:?}"),
    }

    // A known symbol still decodes.
    let ok = apache_avro::types::Value::Record(vec![(
        "status".into(),
        apache_avro::types::Value::String("ok".into()),
    )]);
    let payload = codec.encode(&ok, id).await.unwrap();
    assert!(codec.decode(&payload, &reader).await.is_ok());
}

// =============================================================================
// Decode Failures
// =============================================================================

#[tokio::test]
async fn test_malformed_and_unknown_payloads() {
    let registry = Arc::new(InMemoryRegistry::new());
    let codec = Codec::new(registry.clone());
    let reader = schema(Contract::SigningRequest, 1, 0);

    assert!(matches!(
        codec.decode(&[0x00, 0x00], &reader).await,
        Err(SchemaError::MalformedPayload(_))
    ));
    assert!(matches!(
        codec.decode(&wire::frame(signing_schemas::SchemaId(9999), b"\x02"), &reader).await,
        Err(SchemaError::UnknownSchema { .. })
    ));

    let subject = Subject::new("signing-request-value");
    assert!(matches!(
        registry
            .decode_with_reader_schema(&[0x07, 0, 0, 0, 1], &reader, &subject)
            .await,
        Err(SchemaError::MalformedPayload(_))
    ));
}

// =============================================================================
// Service Loop
// =============================================================================

#[tokio::test]
async fn test_service_consumes_newer_responses() {
    let registry = Arc::new(InMemoryRegistry::new());
    let bus = Arc::new(InMemoryBus::new());
    let received = Arc::new(Mutex::new(Vec::new()));

    let service = SigningService::start(
        &ServiceConfig::default(),
        &catalog(),
        registry.clone(),
        bus.clone(),
        {
            let received = received.clone();
            move |key, set: SigningResultSet| received.lock().unwrap().push((key, set))
        },
    )
    .await
    .unwrap();

    service.publish_request(&request_abc()).await.unwrap();
    assert_eq!(bus.messages("signing-request").len(), 1);

    // The signer has already moved to response v1.1.0.
    let v2 = schema(Contract::SigningResponse, 1, 1);
    let v2_id = registry
        .register(
            &v2,
            &Subject::new("signing-response-value"),
            CompatibilityMode::ForwardTransitive,
        )
        .await
        .unwrap();
    let signer_codec = Codec::new(registry.clone());

    // Garbage first; it must not block what follows.
    bus.produce("signing-response", "junk", vec![0xFF, 0x00]).await.unwrap();
    let payload = signer_codec
        .encode_record(&result_set("abc", SigningResultStatus::Ok, Some("2030-01-01")), v2_id)
        .await
        .unwrap();
    bus.produce("signing-response", "abc", payload).await.unwrap();

    eventually(|| received.lock().unwrap().len() == 1).await;
    let (key, set) = received.lock().unwrap()[0].clone();
    assert_eq!(key, "abc");
    assert_eq!(set.request_id, "abc");
    assert_eq!(set.data[0].status, SigningResultStatus::Ok);
    assert_eq!(set.data[0].valid_to, None);
    assert_eq!(set.data[0].associated_data.as_json(), &json!({"foo": 1}));

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_service_does_not_start_without_registry() {
    let registry = Arc::new(InMemoryRegistry::new());
    registry.set_available(false);
    let bus = Arc::new(InMemoryBus::new());

    let result = SigningService::start(
        &ServiceConfig::default(),
        &catalog(),
        registry,
        bus.clone(),
        |_, _| {},
    )
    .await;

    assert!(matches!(result, Err(SchemaError::RegistryUnavailable(_))));
    assert!(bus.messages("signing-response").is_empty());
}
