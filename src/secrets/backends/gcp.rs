//! GCP Secret Manager store.
//!
//! Talks to the Secret Manager v1 REST API over `reqwest`.
//!
//! ## Configuration
//!
//! See [`GcpSettings`]: API endpoint (overridable for emulators and tests), an
//! optional OAuth bearer token and a request timeout. Token acquisition is left
//! to the caller; without a token requests are sent unauthenticated.
//!
//! ## Wire format
//!
//! - Payloads travel base64-encoded in `payload.data`.
//! - Conditioned writes send the `etag` in the request body.
//! - Errors arrive as `{"error": {"code", "message", "status"}}` and are mapped
//!   by their `status` string, falling back to the HTTP status code.
//! - Each [`CallContext`] entry is sent as a request header.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::GcpSettings;
use crate::secrets::client::SecretStore;
use crate::secrets::context::CallContext;
use crate::secrets::error::{Result, SecretsError};
use crate::secrets::model::{
    AccessedVersion, Secret, SecretConfig, SecretField, SecretVersion, VersionState,
};
use crate::secrets::names::{SecretName, VersionName};
use crate::secrets::types::{SecretPayload, SecretString};

pub const SECRET_MANAGER_ENDPOINT: &str = "https://secretmanager.googleapis.com/v1";
const PAGE_SIZE: &str = "100";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SecretResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    etag: String,
    #[serde(default)]
    annotations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version_destroy_ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    replication: Option<Value>,
}

impl SecretResource {
    fn into_secret(self) -> Result<Secret> {
        let version_destroy_ttl = self.version_destroy_ttl.as_deref().map(parse_duration).transpose()?;
        Ok(Secret {
            name: self.name,
            etag: self.etag,
            annotations: self.annotations,
            version_destroy_ttl,
            create_time: self.create_time,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionResource {
    name: String,
    state: VersionState,
    #[serde(default)]
    etag: String,
    create_time: Option<DateTime<Utc>>,
    destroy_time: Option<DateTime<Utc>>,
    scheduled_destroy_time: Option<DateTime<Utc>>,
}

impl From<VersionResource> for SecretVersion {
    fn from(v: VersionResource) -> Self {
        Self {
            name: v.name,
            state: v.state,
            etag: v.etag,
            create_time: v.create_time,
            destroy_time: v.destroy_time,
            scheduled_destroy_time: v.scheduled_destroy_time,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListVersionsResponse {
    #[serde(default)]
    versions: Vec<VersionResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    name: String,
    payload: PayloadResource,
}

#[derive(Debug, Deserialize)]
struct PayloadResource {
    #[serde(default)]
    data: String,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// Secret Manager REST client.
#[derive(Clone)]
pub struct GcpSecretStore {
    client: Client,
    endpoint: String,
    access_token: Option<SecretString>,
}

impl std::fmt::Debug for GcpSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpSecretStore")
            .field("endpoint", &self.endpoint)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl GcpSecretStore {
    pub fn from_settings(settings: &GcpSettings) -> Result<Self> {
        let endpoint = url::Url::parse(&settings.endpoint).map_err(|e| {
            SecretsError::config_error(format!("invalid endpoint {}: {}", settings.endpoint, e))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(SecretsError::config_error(format!(
                "endpoint must be http(s): {}",
                settings.endpoint
            )));
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| SecretsError::config_error(format!("failed to build HTTP client: {}", e)))?;

        info!(endpoint = %settings.endpoint, "initialized GCP Secret Manager store");
        Ok(Self::with_client(client, &settings.endpoint, settings.access_token.clone()))
    }

    pub fn with_client(
        client: Client,
        endpoint: impl Into<String>,
        access_token: Option<SecretString>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self { client, endpoint, access_token }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, resource: &str, suffix: &str) -> String {
        format!("{}/{}{}", self.endpoint, resource, suffix)
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        query: &[(&str, &str)],
        body: Option<Value>,
        ctx: &CallContext,
    ) -> Result<Response> {
        let mut builder = self.client.request(method.clone(), &url).query(query);
        if let Some(token) = &self.access_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token.expose_secret()));
        }
        for (key, value) in ctx.iter() {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                SecretsError::invalid_argument(format!("invalid context key '{}': {}", key, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                SecretsError::invalid_argument(format!("invalid context value for '{}': {}", key, e))
            })?;
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        debug!(method = %method, url = %url, "secret manager request");
        builder.send().await.map_err(|e| {
            SecretsError::connection_failed(format!("request to {} failed: {}", url, e))
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        resource: &str,
        suffix: &str,
        query: &[(&str, &str)],
        body: Option<Value>,
        ctx: &CallContext,
    ) -> Result<T> {
        let response = self.send(method, self.url(resource, suffix), query, body, ctx).await?;
        if !response.status().is_success() {
            return Err(error_from_response(resource, response).await);
        }
        response.json::<T>().await.map_err(|e| {
            SecretsError::backend_error(format!("failed to decode response for {}: {}", resource, e))
        })
    }

    async fn version_action(
        &self,
        name: &str,
        action: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion> {
        VersionName::parse(name)?;
        let body = match etag {
            Some(etag) => json!({ "etag": etag }),
            None => json!({}),
        };
        let version: VersionResource =
            self.call(Method::POST, name, action, &[], Some(body), ctx).await?;
        Ok(version.into())
    }
}

#[async_trait]
impl SecretStore for GcpSecretStore {
    async fn create_secret(
        &self,
        parent: &str,
        secret_id: &str,
        config: SecretConfig,
        ctx: &CallContext,
    ) -> Result<Secret> {
        let name = SecretName::from_parts(parent, secret_id)?;
        let body = SecretResource {
            annotations: config.annotations,
            version_destroy_ttl: config.version_destroy_ttl.map(format_duration),
            replication: Some(json!({ "automatic": {} })),
            ..SecretResource::default()
        };
        let body = serde_json::to_value(&body)?;

        let created: SecretResource = self
            .call(Method::POST, parent, "/secrets", &[("secretId", secret_id)], Some(body), ctx)
            .await
            .map_err(|e| match e {
                SecretsError::AlreadyExists { .. } => SecretsError::already_exists(name.as_str()),
                other => other,
            })?;
        created.into_secret()
    }

    async fn get_secret(&self, name: &str, ctx: &CallContext) -> Result<Secret> {
        let secret: SecretResource = self.call(Method::GET, name, "", &[], None, ctx).await?;
        secret.into_secret()
    }

    async fn update_secret(
        &self,
        secret: &Secret,
        fields: &[SecretField],
        ctx: &CallContext,
    ) -> Result<Secret> {
        if fields.is_empty() {
            return Err(SecretsError::invalid_argument("update mask must name at least one field"));
        }
        let mask = fields.iter().map(SecretField::mask_path).collect::<Vec<_>>().join(",");
        let body = SecretResource {
            name: secret.name.clone(),
            etag: secret.etag.clone(),
            annotations: secret.annotations.clone(),
            version_destroy_ttl: secret.version_destroy_ttl.map(format_duration),
            ..SecretResource::default()
        };
        let body = serde_json::to_value(&body)?;

        let updated: SecretResource = self
            .call(Method::PATCH, &secret.name, "", &[("updateMask", mask.as_str())], Some(body), ctx)
            .await?;
        updated.into_secret()
    }

    async fn get_secret_version(&self, name: &str, ctx: &CallContext) -> Result<SecretVersion> {
        VersionName::parse(name)?;
        let version: VersionResource = self.call(Method::GET, name, "", &[], None, ctx).await?;
        Ok(version.into())
    }

    async fn access_secret_version(
        &self,
        name: &str,
        ctx: &CallContext,
    ) -> Result<AccessedVersion> {
        VersionName::parse(name)?;
        let accessed: AccessResponse = self.call(Method::GET, name, ":access", &[], None, ctx).await?;
        let data = STANDARD.decode(accessed.payload.data.as_bytes()).map_err(|e| {
            SecretsError::backend_error(format!("invalid payload encoding for {}: {}", accessed.name, e))
        })?;
        Ok(AccessedVersion { name: accessed.name, payload: SecretPayload::new(data) })
    }

    async fn add_secret_version(
        &self,
        parent: &str,
        payload: &SecretPayload,
        ctx: &CallContext,
    ) -> Result<SecretVersion> {
        SecretName::parse(parent)?;
        let body = json!({ "payload": { "data": STANDARD.encode(payload.as_bytes()) } });
        let version: VersionResource =
            self.call(Method::POST, parent, ":addVersion", &[], Some(body), ctx).await?;
        Ok(version.into())
    }

    async fn enable_secret_version(
        &self,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion> {
        self.version_action(name, ":enable", etag, ctx).await
    }

    async fn disable_secret_version(
        &self,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion> {
        self.version_action(name, ":disable", etag, ctx).await
    }

    async fn destroy_secret_version(
        &self,
        name: &str,
        etag: Option<&str>,
        ctx: &CallContext,
    ) -> Result<SecretVersion> {
        self.version_action(name, ":destroy", etag, ctx).await
    }

    async fn list_secret_versions(
        &self,
        parent: &str,
        ctx: &CallContext,
    ) -> Result<Vec<SecretVersion>> {
        SecretName::parse(parent)?;
        let mut collected = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", PAGE_SIZE)];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: ListVersionsResponse =
                self.call(Method::GET, parent, "/versions", &query, None, ctx).await?;
            collected.extend(page.versions.into_iter().map(SecretVersion::from));

            match page.next_page_token.filter(|token| !token.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(collected)
    }
}

async fn error_from_response(resource: &str, response: Response) -> SecretsError {
    let http_status = response.status();
    let body = response.text().await.unwrap_or_default();
    let (status, message) = match serde_json::from_str::<GoogleErrorBody>(&body) {
        Ok(parsed) => (parsed.error.status, parsed.error.message),
        Err(_) => (String::new(), body),
    };
    map_status(&status, http_status, resource, message)
}

/// Map a Google status string (or, failing that, the HTTP status) onto the
/// error taxonomy.
pub(crate) fn map_status(
    status: &str,
    http_status: StatusCode,
    resource: &str,
    message: String,
) -> SecretsError {
    match status {
        "NOT_FOUND" => SecretsError::not_found(resource),
        "ALREADY_EXISTS" => SecretsError::already_exists(resource),
        "INVALID_ARGUMENT" | "OUT_OF_RANGE" => SecretsError::invalid_argument(message),
        "FAILED_PRECONDITION" | "ABORTED" => SecretsError::precondition_failed(resource, message),
        "UNAUTHENTICATED" | "PERMISSION_DENIED" => SecretsError::authentication_failed(message),
        "UNAVAILABLE" | "DEADLINE_EXCEEDED" => SecretsError::connection_failed(message),
        _ => match http_status {
            StatusCode::NOT_FOUND => SecretsError::not_found(resource),
            StatusCode::CONFLICT => SecretsError::already_exists(resource),
            StatusCode::BAD_REQUEST => SecretsError::invalid_argument(message),
            StatusCode::PRECONDITION_FAILED => SecretsError::precondition_failed(resource, message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                SecretsError::authentication_failed(message)
            }
            StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
                SecretsError::connection_failed(message)
            }
            other => SecretsError::backend_error(format!("{} for {}: {}", other, resource, message)),
        },
    }
}

/// Protobuf JSON duration, e.g. `86400s` or `1.5s`.
pub(crate) fn format_duration(duration: Duration) -> String {
    let millis = duration.num_milliseconds();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}.{:03}s", millis / 1000, millis % 1000)
    }
}

pub(crate) fn parse_duration(raw: &str) -> Result<Duration> {
    let invalid = || SecretsError::backend_error(format!("invalid duration '{}'", raw));
    let seconds = raw.strip_suffix('s').ok_or_else(invalid)?;
    let (whole, fraction) = seconds.split_once('.').unwrap_or((seconds, ""));
    let whole: i64 = whole.parse().map_err(|_| invalid())?;

    let mut millis = 0i64;
    for (i, digit) in fraction.chars().take(3).enumerate() {
        let digit = digit.to_digit(10).ok_or_else(invalid)? as i64;
        millis += digit * 10i64.pow(2 - i as u32);
    }
    Ok(Duration::seconds(whole) + Duration::milliseconds(millis))
}
