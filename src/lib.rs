//! Signing Schemas
//!
//! Schema governance for the signing request/response exchange: every message
//! travelling between this service and the token signer is Avro, registered in a
//! Confluent-compatible schema registry and framed with the identifier of the schema
//! that wrote it.
//!
//! ## Features
//!
//! - **Compatibility Gate**: Subjects are registered and checked before any traffic flows
//! - **Schema Evolution**: Readers resolve older and newer writer schemas by Avro rules
//! - **Versioned Catalog**: One embedded table of every contract version
//! - **Wire Format**: `[0x00][schema id, 4 bytes BE][Avro datum]`
//!
//! ## Architecture
//!
//! ```text
//! catalog ──► gate ──► registry (Confluent HTTP | in-memory)
//!               │
//!               ▼
//!  service ──► codec ──► bus (Kafka | in-memory)
//! ```

pub mod bus;
pub mod catalog;
pub mod checksum;
pub mod codec;
pub mod compatibility;
pub mod config;
pub mod error;
pub mod gate;
pub mod record;
pub mod registry;
pub mod schema;
pub mod service;
pub mod version;

pub use bus::{DeliveryReceipt, InMemoryBus, Message, MessageBus, MessageHandler, Subscription};
pub use catalog::{Contract, SchemaCatalog};
pub use checksum::Fingerprint;
pub use codec::Codec;
pub use compatibility::{CompatibilityChecker, CompatibilityMode, CompatibilityResult};
pub use config::ServiceConfig;
pub use error::{Result, SchemaError};
pub use gate::{CompatibilityGate, RegisteredSubject, SchemaIdCache, SubjectBinding};
pub use record::{
    AssociatedData, AvroRecord, SigningRequest, SigningRequestSet, SigningResult,
    SigningResultSet, SigningResultStatus,
};
pub use registry::{ConfluentRegistry, InMemoryRegistry, RegistryClient};
pub use schema::{SchemaDefinition, SchemaId, Subject};
pub use service::{DecodingHandler, RequestPublisher, SigningService};
pub use version::ContractVersion;
