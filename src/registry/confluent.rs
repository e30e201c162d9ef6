//! Confluent-compatible schema registry over HTTP

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{RegistryClient, SubjectVersion};
use crate::compatibility::CompatibilityMode;
use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::schema::{SchemaDefinition, SchemaId, Subject};

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

/// Credentials sent with every registry request
#[derive(Debug, Clone, Default)]
pub enum RegistryAuth {
    #[default]
    None,
    Basic { username: String, password: String },
    Bearer { token: String },
}

/// HTTP client for a Confluent-compatible registry
pub struct ConfluentRegistry {
    base_url: String,
    auth: RegistryAuth,
    http_client: reqwest::Client,
}

impl ConfluentRegistry {
    pub fn new(base_url: &str, auth: RegistryAuth, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                SchemaError::RegistryUnavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            http_client,
        })
    }

    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let auth = match (&config.username, &config.password) {
            (Some(username), password) => RegistryAuth::Basic {
                username: username.clone(),
                password: password.clone().unwrap_or_default(),
            },
            (None, _) => RegistryAuth::None,
        };
        Self::new(&config.url, auth, config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Compatibility level configured on the subject itself, if any
    pub async fn subject_compatibility(&self, subject: &Subject) -> Result<Option<CompatibilityMode>> {
        let url = format!("{}/config/{}", self.base_url, subject);
        let response = self.execute_request(reqwest::Method::GET, &url, None).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::ensure_success(response, subject.as_str()).await?;
        let config: ConfigResponse = Self::read_json(response).await?;
        config
            .compatibility_level
            .or(config.compatibility)
            .map(|level| level.parse())
            .transpose()
    }

    pub async fn set_subject_compatibility(&self, subject: &Subject, mode: CompatibilityMode) -> Result<()> {
        let url = format!("{}/config/{}", self.base_url, subject);
        let body = serde_json::to_string(&ConfigRequest {
            compatibility: mode.as_str(),
        })?;
        let response = self
            .execute_request(reqwest::Method::PUT, &url, Some(body))
            .await?;
        Self::ensure_success(response, subject.as_str()).await?;
        info!(%subject, %mode, "Configured subject compatibility");
        Ok(())
    }

    /// Put the subject under `mode`, refusing to override a different existing level
    async fn reconcile_compatibility(&self, subject: &Subject, mode: CompatibilityMode) -> Result<()> {
        match self.subject_compatibility(subject).await? {
            None => self.set_subject_compatibility(subject, mode).await,
            Some(current) if current == mode => Ok(()),
            Some(current) => Err(SchemaError::rejected(
                subject.as_str(),
                format!(
                    "subject is configured for {} but {} was requested",
                    current, mode
                ),
            )),
        }
    }

    async fn execute_request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<String>,
    ) -> Result<reqwest::Response> {
        let mut request = self
            .http_client
            .request(method.clone(), url)
            .header("Content-Type", CONTENT_TYPE)
            .header("Accept", CONTENT_TYPE);

        request = match &self.auth {
            RegistryAuth::Basic { username, password } => request.basic_auth(username, Some(password)),
            RegistryAuth::Bearer { token } => request.bearer_auth(token),
            RegistryAuth::None => request,
        };

        if let Some(body) = body {
            request = request.body(body);
        }

        debug!(%method, url, "Registry request");
        request
            .send()
            .await
            .map_err(|e| SchemaError::RegistryUnavailable(format!("{} {} failed: {}", method, url, e)))
    }

    /// Map a non-2xx response onto the error taxonomy; `context` names what was asked for
    async fn ensure_success(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: ErrorResponse = response.json().await.unwrap_or_default();
        let reason = if body.message.is_empty() {
            format!("status {}", status)
        } else {
            format!("{} (error code {})", body.message, body.error_code)
        };
        warn!(context, status = status.as_u16(), reason = %reason, "Registry request failed");

        Err(match status.as_u16() {
            404 => SchemaError::NotFound(format!("{}: {}", context, reason)),
            409 | 422 => SchemaError::rejected(context, reason),
            _ => SchemaError::RegistryUnavailable(format!("{}: {}", context, reason)),
        })
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        response.json().await.map_err(|e| {
            SchemaError::RegistryUnavailable(format!("Failed to parse registry response: {}", e))
        })
    }

    fn parse_schema(schema_type: Option<&str>, schema: &str) -> Result<SchemaDefinition> {
        match schema_type {
            None | Some("AVRO") => SchemaDefinition::parse(schema),
            Some(other) => Err(SchemaError::InvalidFormat(format!(
                "registry returned a {} schema, only AVRO is supported",
                other
            ))),
        }
    }
}

#[async_trait]
impl RegistryClient for ConfluentRegistry {
    async fn register(
        &self,
        schema: &SchemaDefinition,
        subject: &Subject,
        mode: CompatibilityMode,
    ) -> Result<SchemaId> {
        self.reconcile_compatibility(subject, mode).await?;

        let url = format!("{}/subjects/{}/versions", self.base_url, subject);
        let body = serde_json::to_string(&SchemaRequest {
            schema_type: Some("AVRO"),
            schema: schema.canonical_json(),
        })?;
        let response = self
            .execute_request(reqwest::Method::POST, &url, Some(body))
            .await?;
        let response = Self::ensure_success(response, subject.as_str()).await?;
        let registered: IdResponse = Self::read_json(response).await?;

        let id = SchemaId(registered.id);
        info!(%subject, schema_id = %id, %mode, "Registered schema");
        Ok(id)
    }

    async fn check_compatibility(&self, schema: &SchemaDefinition, subject: &Subject) -> Result<bool> {
        // Without a version the registry checks every version the subject's mode requires.
        let url = format!("{}/compatibility/subjects/{}/versions", self.base_url, subject);
        let body = serde_json::to_string(&SchemaRequest {
            schema_type: None,
            schema: schema.canonical_json(),
        })?;
        let response = self
            .execute_request(reqwest::Method::POST, &url, Some(body))
            .await?;
        let response = Self::ensure_success(response, subject.as_str()).await?;
        let result: CompatibilityResponse = Self::read_json(response).await?;
        Ok(result.is_compatible)
    }

    async fn identifier_for_schema(&self, schema: &SchemaDefinition, subject: &Subject) -> Result<SchemaId> {
        let url = format!("{}/subjects/{}", self.base_url, subject);
        let body = serde_json::to_string(&SchemaRequest {
            schema_type: Some("AVRO"),
            schema: schema.canonical_json(),
        })?;
        let response = self
            .execute_request(reqwest::Method::POST, &url, Some(body))
            .await?;
        let response = Self::ensure_success(response, subject.as_str()).await?;
        let found: SubjectVersionResponse = Self::read_json(response).await?;
        Ok(SchemaId(found.id))
    }

    async fn schema_by_id(&self, id: SchemaId) -> Result<SchemaDefinition> {
        let url = format!("{}/schemas/ids/{}", self.base_url, id);
        let response = self.execute_request(reqwest::Method::GET, &url, None).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SchemaError::UnknownSchema { id });
        }
        let response = Self::ensure_success(response, &format!("schema {}", id)).await?;
        let found: SchemaResponse = Self::read_json(response).await?;
        Self::parse_schema(found.schema_type.as_deref(), &found.schema)
    }

    async fn latest_version(&self, subject: &Subject) -> Result<SubjectVersion> {
        let url = format!("{}/subjects/{}/versions/latest", self.base_url, subject);
        let response = self.execute_request(reqwest::Method::GET, &url, None).await?;
        let response = Self::ensure_success(response, subject.as_str()).await?;
        let found: SubjectVersionResponse = Self::read_json(response).await?;
        Ok(SubjectVersion {
            subject: Subject::new(found.subject.unwrap_or_else(|| subject.to_string())),
            version: found.version,
            id: SchemaId(found.id),
            schema: Self::parse_schema(found.schema_type.as_deref(), &found.schema)?,
        })
    }
}

/// Confluent API request and response bodies
#[derive(Debug, Serialize)]
struct SchemaRequest {
    #[serde(rename = "schemaType", skip_serializing_if = "Option::is_none")]
    schema_type: Option<&'static str>,
    schema: String,
}

#[derive(Debug, Serialize)]
struct ConfigRequest {
    compatibility: &'static str,
}

#[derive(Debug, Deserialize)]
struct ConfigResponse {
    #[serde(rename = "compatibilityLevel", default)]
    compatibility_level: Option<String>,
    #[serde(default)]
    compatibility: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct CompatibilityResponse {
    is_compatible: bool,
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    schema: String,
    #[serde(rename = "schemaType", default)]
    schema_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubjectVersionResponse {
    #[serde(default)]
    subject: Option<String>,
    id: u32,
    version: u32,
    schema: String,
    #[serde(rename = "schemaType", default)]
    schema_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    message: String,
}
