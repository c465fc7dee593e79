//! Tests for the Secret Manager REST store against a mock server.

use secretlock::secrets::{
    CallContext, ErrorCode, GcpSecretStore, LockOptions, Secret, SecretConfig, SecretField,
    SecretLock, SecretPayload, SecretStore, SecretString, SecretsError, VersionState,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &str = "projects/p/secrets/db";
const TOKEN: &str = "ya29.test-token";

async fn setup() -> (MockServer, GcpSecretStore) {
    let server = MockServer::start().await;
    let store = GcpSecretStore::with_client(
        reqwest::Client::new(),
        format!("{}/v1", server.uri()),
        Some(SecretString::new(TOKEN)),
    );
    (server, store)
}

fn secret_json(etag: &str) -> serde_json::Value {
    json!({
        "name": SECRET,
        "etag": etag,
        "annotations": { "owner": "payments" },
        "versionDestroyTtl": "86400s",
        "createTime": "2024-01-01T00:00:00Z",
        "replication": { "automatic": {} }
    })
}

fn error_json(code: u16, status: &str, message: &str) -> serde_json::Value {
    json!({ "error": { "code": code, "message": message, "status": status } })
}

fn version_json(ordinal: u64, state: &str) -> serde_json::Value {
    json!({
        "name": format!("{}/versions/{}", SECRET, ordinal),
        "state": state,
        "etag": format!("\"v{}\"", ordinal),
        "createTime": "2024-01-01T00:00:00Z"
    })
}

#[tokio::test]
async fn test_get_secret_sends_token_and_context_headers() {
    let (server, store) = setup().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", SECRET)))
        .and(header("authorization", format!("Bearer {}", TOKEN).as_str()))
        .and(header("x-request-id", "req-42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(secret_json("\"e1\"")))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = CallContext::new().with("x-request-id", "req-42");
    let secret = store.get_secret(SECRET, &ctx).await.unwrap();

    assert_eq!(secret.name, SECRET);
    assert_eq!(secret.etag, "\"e1\"");
    assert_eq!(secret.annotations.get("owner").map(String::as_str), Some("payments"));
    assert_eq!(secret.version_destroy_ttl, Some(chrono::Duration::days(1)));
}

#[tokio::test]
async fn test_update_secret_sends_mask_and_etag() {
    let (server, store) = setup().await;
    Mock::given(method("PATCH"))
        .and(path(format!("/v1/{}", SECRET)))
        .and(query_param("updateMask", "annotations"))
        .and(body_partial_json(json!({
            "etag": "\"e1\"",
            "annotations": { "owner": "payments", "locked_at": "2024-01-01T00:00:00.000Z" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(secret_json("\"e2\"")))
        .expect(1)
        .mount(&server)
        .await;

    let mut secret = secret_fixture("\"e1\"");
    secret.annotations.insert("locked_at".into(), "2024-01-01T00:00:00.000Z".into());
    let updated =
        store.update_secret(&secret, &[SecretField::Annotations], &CallContext::new()).await.unwrap();

    assert_eq!(updated.etag, "\"e2\"");
}

#[tokio::test]
async fn test_etag_mismatch_maps_to_precondition_failed() {
    let (server, store) = setup().await;
    Mock::given(method("PATCH"))
        .and(path(format!("/v1/{}", SECRET)))
        .respond_with(ResponseTemplate::new(409).set_body_json(error_json(
            409,
            "ABORTED",
            "etag does not match",
        )))
        .mount(&server)
        .await;

    let secret = secret_fixture("\"stale\"");
    let err = store
        .update_secret(&secret, &[SecretField::Annotations], &CallContext::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::PreconditionFailed);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_create_secret_conflict_maps_to_already_exists() {
    let (server, store) = setup().await;
    Mock::given(method("POST"))
        .and(path("/v1/projects/p/secrets"))
        .and(query_param("secretId", "db"))
        .and(body_partial_json(json!({ "versionDestroyTtl": "3600s" })))
        .respond_with(ResponseTemplate::new(409).set_body_json(error_json(
            409,
            "ALREADY_EXISTS",
            "Secret [projects/p/secrets/db] already exists.",
        )))
        .mount(&server)
        .await;

    let config = SecretConfig::default().with_version_destroy_ttl(chrono::Duration::hours(1));
    let err = store.create_secret("projects/p", "db", config, &CallContext::new()).await.unwrap_err();

    assert!(matches!(err, SecretsError::AlreadyExists { ref resource } if resource == SECRET));
}

#[tokio::test]
async fn test_access_decodes_base64_payload() {
    let (server, store) = setup().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}/versions/latest:access", SECRET)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": format!("{}/versions/3", SECRET),
            "payload": { "data": "aHVudGVyMg==" }
        })))
        .mount(&server)
        .await;

    let accessed = store
        .access_secret_version(&format!("{}/versions/latest", SECRET), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(accessed.name, format!("{}/versions/3", SECRET));
    assert_eq!(accessed.payload.as_bytes(), b"hunter2");
}

#[tokio::test]
async fn test_missing_version_is_not_found() {
    let (server, store) = setup().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}/versions/latest:access", SECRET)))
        .respond_with(ResponseTemplate::new(404).set_body_json(error_json(
            404,
            "NOT_FOUND",
            "Secret Version [projects/p/secrets/db/versions/latest] not found.",
        )))
        .mount(&server)
        .await;

    let lock = SecretLock::new(SECRET, Arc::new(store.clone()), LockOptions::default()).unwrap();
    assert!(lock.latest_payload().await.unwrap().is_none());
    let err = lock.require_latest_payload().await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_permission_denied_maps_to_authentication_failed() {
    let (server, store) = setup().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", SECRET)))
        .respond_with(ResponseTemplate::new(403).set_body_json(error_json(
            403,
            "PERMISSION_DENIED",
            "Permission 'secretmanager.secrets.get' denied",
        )))
        .mount(&server)
        .await;

    let err = store.get_secret(SECRET, &CallContext::new()).await.unwrap_err();
    assert!(matches!(err, SecretsError::AuthenticationFailed { .. }));
}

#[tokio::test]
async fn test_destroy_sends_etag_in_body() {
    let (server, store) = setup().await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/{}/versions/1:destroy", SECRET)))
        .and(body_json(json!({ "etag": "\"v1\"" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": format!("{}/versions/1", SECRET),
            "state": "DISABLED",
            "etag": "\"v1b\"",
            "scheduledDestroyTime": "2024-01-02T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let version = store
        .destroy_secret_version(&format!("{}/versions/1", SECRET), Some("\"v1\""), &CallContext::new())
        .await
        .unwrap();

    assert_eq!(version.state, VersionState::Disabled);
    assert!(version.scheduled_destroy_time.is_some());
}

#[tokio::test]
async fn test_list_versions_follows_page_tokens() {
    let (server, store) = setup().await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}/versions", SECRET)))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "versions": [version_json(1, "DESTROYED")]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}/versions", SECRET)))
        .and(query_param("pageSize", "100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "versions": [version_json(3, "ENABLED"), version_json(2, "DISABLED")],
            "nextPageToken": "page-2"
        })))
        .mount(&server)
        .await;

    let versions = store.list_secret_versions(SECRET, &CallContext::new()).await.unwrap();
    let states: Vec<_> = versions.iter().map(|v| v.state).collect();

    assert_eq!(versions.len(), 3);
    assert_eq!(states, vec![VersionState::Enabled, VersionState::Disabled, VersionState::Destroyed]);
}

#[tokio::test]
async fn test_rotation_runs_against_rest_store() {
    let (server, store) = setup().await;
    let unlocked = json!({ "name": SECRET, "etag": "\"e1\"", "annotations": {} });
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}", SECRET)))
        .respond_with(ResponseTemplate::new(200).set_body_json(unlocked.clone()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(format!("/v1/{}", SECRET)))
        .respond_with(ResponseTemplate::new(200).set_body_json(unlocked))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/v1/{}/versions/latest", SECRET)))
        .respond_with(ResponseTemplate::new(404).set_body_json(error_json(404, "NOT_FOUND", "none")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/{}:addVersion", SECRET)))
        .and(body_json(json!({ "payload": { "data": "djE=" } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(version_json(1, "ENABLED")))
        .expect(1)
        .mount(&server)
        .await;

    let lock = SecretLock::new(SECRET, Arc::new(store), LockOptions::default()).unwrap();
    let rotated =
        lock.rotate_versioned(|| async { Ok::<_, std::io::Error>("v1") }).await.unwrap();

    assert_eq!(rotated.value, "v1");
    assert_eq!(rotated.version_name, format!("{}/versions/1", SECRET));
}

#[tokio::test]
async fn test_unreachable_endpoint_is_connection_failure() {
    let store = GcpSecretStore::with_client(reqwest::Client::new(), "http://127.0.0.1:1/v1", None);
    let err = store.get_secret(SECRET, &CallContext::new()).await.unwrap_err();
    assert!(matches!(err, SecretsError::ConnectionFailed { .. }));
    assert_eq!(err.code(), ErrorCode::Unavailable);
}

#[tokio::test]
async fn test_add_version_rejects_malformed_parent_without_request() {
    let (server, store) = setup().await;
    let err = store
        .add_secret_version("projects/p", &SecretPayload::from("x"), &CallContext::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

fn secret_fixture(etag: &str) -> Secret {
    let mut annotations = HashMap::new();
    annotations.insert("owner".to_string(), "payments".to_string());
    Secret {
        name: SECRET.to_string(),
        etag: etag.to_string(),
        annotations,
        version_destroy_ttl: None,
        create_time: None,
    }
}
