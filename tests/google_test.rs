//! Google API clients against wiremock stand-ins of the real endpoints.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::test_config;
use swapwithus::config::{FirebaseConfig, GcpConfig, MapsConfig};
use swapwithus::services::{
    AuthFailure, BlobSigner, CredentialSource, FirebaseTokenVerifier, GcpError, GcsStore, Geocoder,
    IamBlobSigner, ObjectStore, TokenVerifier, V4UrlSigner,
};

const SERVICE_ACCOUNT: &str = "api@swapwithus.iam.gserviceaccount.com";

fn gcp_config(server: &MockServer) -> GcpConfig {
    let mut gcp = test_config(false).gcp;
    gcp.storage_base_url = server.uri();
    gcp.iam_base_url = server.uri();
    gcp.metadata_base_url = server.uri();
    gcp
}

fn static_credentials(server: &MockServer) -> Arc<CredentialSource> {
    let mut gcp = gcp_config(server);
    gcp.access_token = Some("static-token".into());
    gcp.service_account_email = Some(SERVICE_ACCOUNT.into());
    Arc::new(CredentialSource::from_config(&gcp, reqwest::Client::new()))
}

async fn mount_metadata(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(
            "/computeMetadata/v1/instance/service-accounts/default/token",
        ))
        .and(header("Metadata-Flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "metadata-token",
            "expires_in": 3599,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(
            "/computeMetadata/v1/instance/service-accounts/default/email",
        ))
        .and(header("Metadata-Flavor", "Google"))
        .respond_with(ResponseTemplate::new(200).set_body_string(SERVICE_ACCOUNT))
        .expect(1)
        .mount(server)
        .await;
}

// ---------------------------------------------------------------------------
// Identity Toolkit
// ---------------------------------------------------------------------------

fn verifier(server: &MockServer) -> FirebaseTokenVerifier {
    FirebaseTokenVerifier::new(&FirebaseConfig {
        api_key: "web-key".into(),
        identity_base_url: server.uri(),
    })
    .unwrap()
}

#[tokio::test]
async fn valid_token_resolves_to_local_id() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:lookup"))
        .and(query_param("key", "web-key"))
        .and(body_json(json!({ "idToken": "good-token" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "identitytoolkit#GetAccountInfoResponse",
            "users": [{ "localId": "uid-123", "email": "ana@example.com" }]
        })))
        .mount(&server)
        .await;

    let uid = verifier(&server).verify("good-token").await.unwrap();
    assert_eq!(uid, "uid-123");
}

#[tokio::test]
async fn expired_token_is_rejected_with_reason() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:lookup"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": 400, "message": "TOKEN_EXPIRED" }
        })))
        .mount(&server)
        .await;

    match verifier(&server).verify("old-token").await {
        Err(AuthFailure::Rejected(reason)) => assert_eq!(reason, "TOKEN_EXPIRED"),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn disabled_account_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:lookup"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [{ "localId": "uid-9", "disabled": true }]
        })))
        .mount(&server)
        .await;

    match verifier(&server).verify("token").await {
        Err(AuthFailure::Rejected(reason)) => assert_eq!(reason, "USER_DISABLED"),
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn identity_outage_is_not_a_rejection() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:lookup"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    assert!(matches!(
        verifier(&server).verify("token").await,
        Err(AuthFailure::Unavailable(_))
    ));
}

// ---------------------------------------------------------------------------
// Cloud Storage
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_returns_the_public_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/storage/v1/b/test-bucket/o"))
        .and(query_param("uploadType", "media"))
        .and(query_param("name", "home/abc_20260101_0123456789ab.jpg"))
        .and(header("authorization", "Bearer static-token"))
        .and(header("content-type", "image/jpeg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "x" })))
        .expect(1)
        .mount(&server)
        .await;

    let store = GcsStore::new(&gcp_config(&server), static_credentials(&server)).unwrap();
    let url = store
        .put(
            "home/abc_20260101_0123456789ab.jpg",
            vec![0xff, 0xd8, 0xff],
            "image/jpeg",
        )
        .await
        .unwrap();

    assert_eq!(
        url,
        "https://storage.googleapis.com/test-bucket/home/abc_20260101_0123456789ab.jpg"
    );
}

#[tokio::test]
async fn failed_upload_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/storage/v1/b/test-bucket/o"))
        .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
        .mount(&server)
        .await;

    let store = GcsStore::new(&gcp_config(&server), static_credentials(&server)).unwrap();
    let result = store.put("home/a.jpg", vec![1], "image/jpeg").await;

    assert!(matches!(result, Err(GcpError::Status { .. })));
}

#[tokio::test]
async fn delete_treats_missing_objects_as_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/storage/v1/b/test-bucket/o/home%2Fgone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/storage/v1/b/test-bucket/o/home%2Flocked.jpg"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let store = GcsStore::new(&gcp_config(&server), static_credentials(&server)).unwrap();

    assert!(
        store
            .delete("https://storage.googleapis.com/test-bucket/home/gone.jpg")
            .await
    );
    assert!(
        !store
            .delete("https://storage.googleapis.com/test-bucket/home/locked.jpg")
            .await
    );
    // Objects of other buckets are never touched
    assert!(
        !store
            .delete("https://storage.googleapis.com/other-bucket/home/gone.jpg")
            .await
    );
}

// ---------------------------------------------------------------------------
// Metadata server and IAM signBlob
// ---------------------------------------------------------------------------

#[tokio::test]
async fn signer_uses_metadata_identity_and_caches_the_token() {
    let server = MockServer::start().await;
    mount_metadata(&server).await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/v1/projects/-/serviceAccounts/{}:signBlob",
            SERVICE_ACCOUNT
        )))
        .and(header("authorization", "Bearer metadata-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keyId": "k1",
            "signedBlob": "3q2+7w=="
        })))
        .expect(2)
        .mount(&server)
        .await;

    let credentials = Arc::new(CredentialSource::from_config(
        &gcp_config(&server),
        reqwest::Client::new(),
    ));
    let signer = IamBlobSigner::new(&server.uri(), credentials).unwrap();

    assert_eq!(signer.sign_blob(b"first").await.unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
    assert_eq!(signer.sign_blob(b"second").await.unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
}

#[tokio::test]
async fn v4_url_carries_the_iam_signature() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/v1/projects/-/serviceAccounts/{}:signBlob",
            SERVICE_ACCOUNT
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "keyId": "k1",
            "signedBlob": "3q2+7w=="
        })))
        .mount(&server)
        .await;

    let signer = IamBlobSigner::new(&server.uri(), static_credentials(&server)).unwrap();
    let urls = V4UrlSigner::new("test-bucket", Arc::new(signer));
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    let url = urls.sign("home/a b.jpg", 3600, now).await.unwrap();

    assert!(url.starts_with("https://storage.googleapis.com/test-bucket/home/a%20b.jpg?"));
    assert!(url.contains("X-Goog-Date=20260301T120000Z"));
    assert!(url.contains("X-Goog-Expires=3600"));
    assert!(url.ends_with("&X-Goog-Signature=deadbeef"));
}

#[tokio::test]
async fn missing_self_grant_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/v1/projects/-/serviceAccounts/{}:signBlob",
            SERVICE_ACCOUNT
        )))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let signer = IamBlobSigner::new(&server.uri(), static_credentials(&server)).unwrap();

    match signer.sign_blob(b"payload").await {
        Err(GcpError::PermissionDenied(message)) => {
            assert!(message.contains("roles/iam.serviceAccountTokenCreator"))
        }
        other => panic!("expected permission error, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Geocoding
// ---------------------------------------------------------------------------

fn geocoder(server: &MockServer) -> Geocoder {
    Geocoder::from_config(&MapsConfig {
        api_key: Some("maps-key".into()),
        geocoding_url: format!("{}/maps/api/geocode/json", server.uri()),
    })
    .unwrap()
    .unwrap()
}

#[tokio::test]
async fn geocoding_returns_the_first_result() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maps/api/geocode/json"))
        .and(query_param("address", "Rua Augusta 1, Lisbon, Portugal"))
        .and(query_param("key", "maps-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [
                { "geometry": { "location": { "lat": 38.7101, "lng": -9.1366 } } },
                { "geometry": { "location": { "lat": 0.0, "lng": 0.0 } } }
            ]
        })))
        .mount(&server)
        .await;

    let location = geocoder(&server)
        .geocode("Rua Augusta 1, Lisbon, Portugal")
        .await;
    assert_eq!(location, Some((38.7101, -9.1366)));
}

#[tokio::test]
async fn geocoding_failures_yield_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("address", "Nowhere"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ZERO_RESULTS",
            "results": []
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("address", "Denied"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid."
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("address", "Broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let geocoder = geocoder(&server);
    assert_eq!(geocoder.geocode("Nowhere").await, None);
    assert_eq!(geocoder.geocode("Denied").await, None);
    assert_eq!(geocoder.geocode("Broken").await, None);
    assert_eq!(geocoder.geocode("   ").await, None);
}

#[test]
fn geocoder_needs_a_key() {
    assert!(Geocoder::from_config(&MapsConfig::default())
        .unwrap()
        .is_none());
}
