//! Versioned contract schemas
//!
//! The one authoritative table of every schema this service produces or consumes. Each
//! version lives at `schemas/<contract>/<semver>.avsc` and is embedded at compile time,
//! so producer and consumer paths always select from the same definitions.
//!
//! ```text
//! schemas/
//! ├── signing-request/
//! │   └── 1.0.0.avsc
//! └── signing-response/
//!     ├── 1.0.0.avsc
//!     └── 1.1.0.avsc      (adds nullable valid_to / valid_from)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use include_dir::{include_dir, Dir};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compatibility::{CompatibilityChecker, CompatibilityMode};
use crate::error::{Result, SchemaError};
use crate::schema::{SchemaDefinition, Subject};
use crate::version::ContractVersion;

static SCHEMA_DIR: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/schemas");

/// A message contract governed by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Contract {
    /// Signing requests produced by this service
    SigningRequest,
    /// Signing results consumed by this service
    SigningResponse,
}

impl Contract {
    pub const ALL: [Contract; 2] = [Contract::SigningRequest, Contract::SigningResponse];

    /// Directory of this contract's schema files
    pub fn dir_name(&self) -> &'static str {
        match self {
            Contract::SigningRequest => "signing-request",
            Contract::SigningResponse => "signing-response",
        }
    }

    /// Topic the contract travels on by default
    pub fn default_topic(&self) -> &'static str {
        self.dir_name()
    }

    pub fn default_subject(&self) -> Subject {
        Subject::value_for_topic(self.default_topic())
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Contract {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "signing-request" | "request" => Ok(Contract::SigningRequest),
            "signing-response" | "response" => Ok(Contract::SigningResponse),
            other => Err(SchemaError::NotFound(format!("contract '{}'", other))),
        }
    }
}

/// Table of contract schemas keyed by contract and version
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    entries: BTreeMap<(Contract, ContractVersion), SchemaDefinition>,
}

impl SchemaCatalog {
    /// Load the schemas embedded in this crate
    pub fn builtin() -> Result<Self> {
        let mut catalog = Self::default();
        for contract in Contract::ALL {
            let Some(dir) = SCHEMA_DIR.get_dir(contract.dir_name()) else {
                continue;
            };
            for file in dir.files() {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("avsc") {
                    continue;
                }
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .ok_or_else(|| SchemaError::InvalidVersion(path.display().to_string()))?;
                let version = ContractVersion::parse(stem)?;
                let text = file.contents_utf8().ok_or_else(|| {
                    SchemaError::InvalidFormat(format!("{} is not UTF-8", path.display()))
                })?;
                let schema = SchemaDefinition::parse(text)?;
                debug!(%contract, %version, fingerprint = schema.fingerprint().short(), "Loaded contract schema");
                catalog.insert(contract, version, schema)?;
            }
        }
        Ok(catalog)
    }

    /// Add a schema; an existing (contract, version) is never replaced
    pub fn insert(
        &mut self,
        contract: Contract,
        version: ContractVersion,
        schema: SchemaDefinition,
    ) -> Result<()> {
        let key = (contract, version);
        if self.entries.contains_key(&key) {
            return Err(SchemaError::InvalidVersion(format!(
                "{} {} is already defined",
                key.0, key.1
            )));
        }
        self.entries.insert(key, schema);
        Ok(())
    }

    /// Schema of a specific contract version
    pub fn get(&self, contract: Contract, version: &ContractVersion) -> Result<&SchemaDefinition> {
        self.entries
            .get(&(contract, version.clone()))
            .ok_or_else(|| SchemaError::NotFound(format!("{} {}", contract, version)))
    }

    /// Newest version of a contract
    pub fn latest(&self, contract: Contract) -> Result<(&ContractVersion, &SchemaDefinition)> {
        self.entries
            .iter()
            .filter(|((c, _), _)| *c == contract)
            .map(|((_, v), s)| (v, s))
            .next_back()
            .ok_or_else(|| SchemaError::NotFound(format!("no versions of {}", contract)))
    }

    /// All versions of a contract, oldest first
    pub fn versions(&self, contract: Contract) -> Vec<&ContractVersion> {
        self.entries
            .keys()
            .filter(|(c, _)| *c == contract)
            .map(|(_, v)| v)
            .collect()
    }

    /// Verify every version is fully compatible with all earlier versions of its major line
    pub fn verify_lines(&self) -> Result<()> {
        let checker = CompatibilityChecker::new();
        for contract in Contract::ALL {
            let versions = self.versions(contract);
            for (index, version) in versions.iter().enumerate() {
                let history: Vec<&SchemaDefinition> = versions[..index]
                    .iter()
                    .filter(|earlier| earlier.same_line_as(version))
                    .map(|earlier| self.get(contract, earlier))
                    .collect::<Result<_>>()?;
                let candidate = self.get(contract, version)?;
                let result = checker.check(CompatibilityMode::FullTransitive, candidate, &history);
                if !result.is_compatible {
                    return Err(SchemaError::InvalidVersion(format!(
                        "{} {} breaks its major line: {}",
                        contract, version, result.summary
                    )));
                }
            }
        }
        Ok(())
    }
}
