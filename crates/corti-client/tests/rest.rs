//! Authenticated REST requests against a mock API and token endpoint.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use corti_auth::{BearerTokenOptions, TokenResponse, refresh_fn};
use corti_client::{AuthOptions, CortiClient, Error, RequestContext};
use reqwest::Method;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{fake_token, local_environment};

const TOKEN_PATH: &str = "/realms/acme/protocol/openid-connect/token";

fn token_body(access: &str) -> serde_json::Value {
    json!({
        "access_token": access,
        "token_type": "Bearer",
        "expires_in": 300,
        "refresh_expires_in": 1800,
    })
}

async fn mount_token(server: &MockServer, grant: &str, access: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains(format!("grant_type={grant}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access)))
        .expect(times)
        .mount(server)
        .await;
}

fn builder(server: &MockServer) -> corti_client::ClientBuilder {
    CortiClient::builder()
        .environment(local_environment(&server.uri(), "ws://127.0.0.1:9"))
        .tenant_name("acme")
}

#[tokio::test]
async fn client_credentials_attach_token_and_tenant() {
    let server = MockServer::start().await;
    mount_token(&server, "client_credentials", "cc-token", 1).await;
    Mock::given(method("GET"))
        .and(path("/v2/interactions"))
        .and(header("Authorization", "Bearer cc-token"))
        .and(header("Tenant-Name", "acme"))
        .and(header("X-Fern-Language", "Rust"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"interactions": []})))
        .expect(2)
        .mount(&server)
        .await;

    let client = builder(&server)
        .client_credentials("cid", "secret")
        .build()
        .unwrap();

    let first: serde_json::Value = client.get("interactions").await.unwrap();
    assert_eq!(first, json!({"interactions": []}));
    // Second call reuses the cached token.
    let _: serde_json::Value = client.get("/interactions").await.unwrap();
}

#[tokio::test]
async fn build_never_contacts_the_network() {
    let server = MockServer::start().await;
    mount_token(&server, "client_credentials", "unused", 0).await;

    let _client = builder(&server)
        .client_credentials("cid", "secret")
        .build()
        .unwrap();
}

#[tokio::test]
async fn credentials_can_be_disabled_per_request() {
    let server = MockServer::start().await;
    mount_token(&server, "client_credentials", "cc-token", 0).await;
    Mock::given(method("GET"))
        .and(path("/v2/public"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = builder(&server)
        .client_credentials("cid", "secret")
        .build()
        .unwrap();

    let context = RequestContext {
        with_credentials: Some(false),
        ..Default::default()
    };
    let request = client
        .request(Method::GET, "public", &context)
        .await
        .unwrap();
    client.send(request, &context).await.unwrap();

    let received = server.received_requests().await.unwrap();
    let api_call = received
        .iter()
        .find(|request| request.url.path() == "/v2/public")
        .unwrap();
    assert!(api_call.headers.get("authorization").is_none());
    assert_eq!(api_call.headers.get("tenant-name").unwrap(), "acme");
}

#[tokio::test]
async fn client_wide_credentials_default_off() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/v2/interactions/1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = builder(&server)
        .bearer(BearerTokenOptions::new("tok").with_expires_in(3600))
        .with_credentials(false)
        .build()
        .unwrap();
    client.delete("interactions/1").await.unwrap();

    let received = server.received_requests().await.unwrap();
    assert!(received[0].headers.get("authorization").is_none());
}

#[tokio::test]
async fn non_success_status_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/interactions"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad payload"))
        .mount(&server)
        .await;

    let client = builder(&server)
        .bearer(BearerTokenOptions::new("tok").with_expires_in(3600))
        .build()
        .unwrap();

    let err = client
        .post::<serde_json::Value, _>("interactions", &json!({}))
        .await
        .unwrap_err();
    match err {
        Error::Api { status, body } => {
            assert_eq!(status, 422);
            assert_eq!(body, "bad payload");
        }
        other => panic!("expected api error, got {other:?}"),
    }
}

#[tokio::test]
async fn password_grant_fetches_token_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=nurse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "pw-token",
            "expires_in": 300,
            "refresh_token": "pw-refresh",
            "refresh_expires_in": 1800,
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/me"))
        .and(header("Authorization", "Bearer pw-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(2)
        .mount(&server)
        .await;

    let client = builder(&server)
        .auth(AuthOptions::Password {
            client_id: "cid".into(),
            client_secret: None,
            username: "nurse".into(),
            password: "pw".into(),
        })
        .build()
        .unwrap();

    let _: serde_json::Value = client.get("me").await.unwrap();
    let _: serde_json::Value = client.get("me").await.unwrap();
}

#[tokio::test]
async fn failed_initial_grant_is_retried_on_next_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_token(&server, "password", "pw-token", 1).await;

    let client = builder(&server)
        .auth(AuthOptions::Password {
            client_id: "cid".into(),
            client_secret: None,
            username: "nurse".into(),
            password: "pw".into(),
        })
        .build()
        .unwrap();

    let err = client.token().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Auth(corti_auth::AuthError::ApiStatus { status: 503, .. })
    ));
    assert_eq!(client.token().await.unwrap(), "pw-token");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn refresh_only_bearer_learns_tenant_from_one_refresh() {
    let server = MockServer::start().await;
    let token = fake_token(json!({
        "iss": "https://keycloak.eu.corti.app/realms/clinic",
        "exp": 4_000_000_000u64,
    }));
    Mock::given(method("GET"))
        .and(path("/v2/me"))
        .and(header("Authorization", format!("Bearer {token}").as_str()))
        .and(header("Tenant-Name", "clinic"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let issued = token.clone();
    let callback = refresh_fn(move |_refresh_token: Option<String>| {
        let counter = counter.clone();
        let issued = issued.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(TokenResponse {
                expires_in: Some(300),
                ..TokenResponse::bearer(issued)
            })
        }
    });

    let client = CortiClient::builder()
        .environment(local_environment(&server.uri(), "ws://127.0.0.1:9"))
        .bearer(BearerTokenOptions::refresh_only(callback))
        .build()
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let _: serde_json::Value = client.get("me").await.unwrap();
    assert_eq!(client.tenant_name().resolve().await.unwrap(), "clinic");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_environment_is_config_error() {
    let client = CortiClient::builder()
        .bearer(BearerTokenOptions::new("tok").with_expires_in(3600))
        .base_url("http://127.0.0.1:9/v2")
        .build()
        .unwrap();

    let err = client.environment_urls().await.unwrap_err();
    assert!(err.is_config_error());
}
