//! Token refresh behavior of the authenticated client against a mock backend.
//!
//! The refresh endpoint answers after a delay so that every concurrent 401
//! lands while the first refresh is still in flight.

use std::sync::Arc;
use std::time::Duration;

use drivekey_core::api::{ApiClient, ApiError, ApiRequest, ClientConfig};
use drivekey_core::auth::{
    MemoryStorage, SessionStore, TokenStorage, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY,
};
use drivekey_core::models::User;
use futures::future::join_all;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REFRESH_DELAY: Duration = Duration::from_millis(300);

/// Helper: a logged-in client holding `A-old`/`R-old`.
async fn logged_in_client(server: &MockServer, storage: &Arc<MemoryStorage>) -> ApiClient {
    let session = Arc::new(SessionStore::new(
        Arc::clone(storage) as Arc<dyn TokenStorage>
    ));
    session.initialize().await;
    session
        .login(
            "A-old".to_string(),
            "R-old".to_string(),
            User::from_email("driver@example.com"),
        )
        .await
        .expect("login should persist to memory storage");
    client_for(server, session)
}

fn client_for(server: &MockServer, session: Arc<SessionStore>) -> ApiClient {
    let config = ClientConfig {
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
    };
    ApiClient::new(&config, session).expect("client should build")
}

async fn mock_vehicles(server: &MockServer, token: &str, status: u16, times: u64) {
    let template = if status == 200 {
        ResponseTemplate::new(200).set_body_json(json!([{ "model": "Corolla" }]))
    } else {
        ResponseTemplate::new(status)
    };
    Mock::given(method("GET"))
        .and(path("/vehicles"))
        .and(header("Authorization", format!("Bearer {}", token).as_str()))
        .respond_with(template)
        .expect(times)
        .mount(server)
        .await;
}

async fn mock_refresh_ok(server: &MockServer, times: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refreshToken": "R-old" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": "A-new", "refreshToken": "R-new" }))
                .set_delay(REFRESH_DELAY),
        )
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-old", 401, 3).await;
    mock_vehicles(&server, "A-new", 200, 3).await;
    mock_refresh_ok(&server, 1).await;

    let storage = Arc::new(MemoryStorage::new());
    let client = logged_in_client(&server, &storage).await;

    let results = join_all((0..3).map(|_| client.get_json::<Value>("/vehicles"))).await;

    for result in results {
        let body = result.expect("request should succeed after refresh");
        assert_eq!(body[0]["model"], "Corolla");
    }

    let session = client.session();
    assert_eq!(session.access_token().await.as_deref(), Some("A-new"));
    assert_eq!(session.refresh_token().await.as_deref(), Some("R-new"));
    assert!(session.is_authenticated());
    assert_eq!(storage.peek(ACCESS_TOKEN_KEY).as_deref(), Some("A-new"));
    assert_eq!(storage.peek(REFRESH_TOKEN_KEY).as_deref(), Some("R-new"));
    assert!(!client.coordinator().is_in_flight());

    // The refresh exchange itself never carries a bearer token
    let requests = server.received_requests().await.unwrap();
    let refresh = requests
        .iter()
        .find(|r| r.url.path() == "/auth/refresh")
        .expect("refresh request recorded");
    assert!(refresh.headers.get("authorization").is_none());

    server.verify().await;
}

#[tokio::test]
async fn failed_refresh_rejects_everyone_and_logs_out_once() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-old", 401, 3).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_delay(REFRESH_DELAY))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let client = logged_in_client(&server, &storage).await;

    let results = join_all((0..3).map(|_| client.get_json::<Value>("/vehicles"))).await;

    for result in results {
        let err = result.expect_err("every caller sees the failure");
        assert!(err.is_session_expired(), "unexpected error: {err:?}");
    }

    let session = client.session();
    assert!(!session.is_authenticated());
    assert!(session.access_token().await.is_none());
    assert!(session.refresh_token().await.is_none());
    // One logout clears two keys
    assert_eq!(storage.delete_calls(), 2);
    assert!(!client.coordinator().is_in_flight());

    server.verify().await;
}

#[tokio::test]
async fn replayed_request_is_not_retried_again() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-old", 401, 1).await;
    mock_vehicles(&server, "A-new", 401, 1).await;
    mock_refresh_ok(&server, 1).await;

    let storage = Arc::new(MemoryStorage::new());
    let client = logged_in_client(&server, &storage).await;

    let err = client
        .get_json::<Value>("/vehicles")
        .await
        .expect_err("second 401 propagates");
    assert!(matches!(err, ApiError::SessionRejected), "unexpected error: {err:?}");
    assert!(err.is_session_expired());
    assert!(!client.session().is_authenticated());

    server.verify().await;
}

#[tokio::test]
async fn request_flagged_as_retried_fails_immediately() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-old", 401, 1).await;
    mock_refresh_ok(&server, 0).await;

    let storage = Arc::new(MemoryStorage::new());
    let client = logged_in_client(&server, &storage).await;

    let mut request = ApiRequest::get("/vehicles");
    request.retried = true;
    let err = client.send(request).await.expect_err("no retry for replays");
    assert!(matches!(err, ApiError::SessionRejected), "unexpected error: {err:?}");

    server.verify().await;
}

#[tokio::test]
async fn missing_refresh_token_ends_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vehicles"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    mock_refresh_ok(&server, 0).await;

    let storage = Arc::new(MemoryStorage::new());
    let session = Arc::new(SessionStore::new(
        Arc::clone(&storage) as Arc<dyn TokenStorage>
    ));
    session.initialize().await;
    let client = client_for(&server, session);

    let err = client
        .get_json::<Value>("/vehicles")
        .await
        .expect_err("nothing to refresh with");
    match err {
        ApiError::RefreshFailed(cause) => assert!(cause.is_unauthorized()),
        other => panic!("unexpected error: {other:?}"),
    }

    // The request went out without a bearer token
    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].headers.get("authorization").is_none());

    server.verify().await;
}

#[tokio::test]
async fn other_errors_pass_through_without_refresh() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-old", 503, 1).await;
    mock_refresh_ok(&server, 0).await;

    let storage = Arc::new(MemoryStorage::new());
    let client = logged_in_client(&server, &storage).await;

    let err = client
        .get_json::<Value>("/vehicles")
        .await
        .expect_err("server error surfaces");
    assert!(matches!(err, ApiError::ServerError(_)));
    assert!(client.session().is_authenticated());

    server.verify().await;
}

#[tokio::test]
async fn timeout_is_not_an_authorization_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;
    mock_refresh_ok(&server, 0).await;

    let storage = Arc::new(MemoryStorage::new());
    let session = Arc::new(SessionStore::new(
        Arc::clone(&storage) as Arc<dyn TokenStorage>
    ));
    session.initialize().await;
    session
        .login(
            "A-old".to_string(),
            "R-old".to_string(),
            User::from_email("driver@example.com"),
        )
        .await
        .unwrap();
    let config = ClientConfig {
        base_url: server.uri(),
        timeout: Duration::from_millis(200),
    };
    let client = ApiClient::new(&config, session).unwrap();

    let err = client
        .get_json::<Value>("/slow")
        .await
        .expect_err("request should time out");
    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(client.session().is_authenticated());
    assert_eq!(client.session().access_token().await.as_deref(), Some("A-old"));
}

#[tokio::test]
async fn restored_tokens_are_attached_before_login() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-stored", 200, 1).await;

    let storage = Arc::new(MemoryStorage::with_tokens("A-stored", "R-stored"));
    let session = Arc::new(SessionStore::new(
        Arc::clone(&storage) as Arc<dyn TokenStorage>
    ));
    session.initialize().await;
    assert!(!session.is_authenticated());

    let client = client_for(&server, session);
    client
        .get_json::<Value>("/vehicles")
        .await
        .expect("restored token is presented");

    server.verify().await;
}

#[tokio::test]
async fn logout_during_refresh_keeps_session_ended() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-old", 401, 1).await;
    mock_vehicles(&server, "A-new", 200, 0).await;
    mock_refresh_ok(&server, 1).await;

    let storage = Arc::new(MemoryStorage::new());
    let client = logged_in_client(&server, &storage).await;
    let session = Arc::clone(client.session());

    let (result, _) = tokio::join!(client.get_json::<Value>("/vehicles"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        session.logout().await
    });

    let err = result.expect_err("a logged-out session must not be revived");
    assert!(err.is_unauthorized(), "unexpected error: {err:?}");
    assert!(!session.is_authenticated());
    assert!(session.access_token().await.is_none());
    assert!(session.refresh_token().await.is_none());
    assert!(storage.peek(ACCESS_TOKEN_KEY).is_none());
    assert!(storage.peek(REFRESH_TOKEN_KEY).is_none());
    // Only the explicit logout touched storage
    assert_eq!(storage.delete_calls(), 2);
    assert!(!client.coordinator().is_in_flight());

    server.verify().await;
}

#[tokio::test]
async fn queued_request_rejected_when_session_ends_mid_refresh() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-old", 401, 2).await;
    mock_vehicles(&server, "A-new", 200, 0).await;
    mock_refresh_ok(&server, 1).await;

    let storage = Arc::new(MemoryStorage::new());
    let client = logged_in_client(&server, &storage).await;
    let session = Arc::clone(client.session());

    let (results, _) = tokio::join!(
        join_all((0..2).map(|_| client.get_json::<Value>("/vehicles"))),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            session.logout().await
        }
    );

    for result in results {
        assert!(result.is_err(), "no request may succeed after logout");
    }
    assert!(session.access_token().await.is_none());
    assert!(storage.peek(REFRESH_TOKEN_KEY).is_none());
    assert_eq!(storage.delete_calls(), 2);

    server.verify().await;
}

#[tokio::test]
async fn login_during_refresh_is_not_overwritten() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-old", 401, 1).await;
    mock_refresh_ok(&server, 1).await;

    let storage = Arc::new(MemoryStorage::new());
    let client = logged_in_client(&server, &storage).await;
    let session = Arc::clone(client.session());

    let (result, _) = tokio::join!(client.get_json::<Value>("/vehicles"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        session
            .login(
                "A-fresh".to_string(),
                "R-fresh".to_string(),
                User::from_email("driver@example.com"),
            )
            .await
    });

    assert!(result.is_err());
    assert!(session.is_authenticated());
    assert_eq!(session.access_token().await.as_deref(), Some("A-fresh"));
    assert_eq!(session.refresh_token().await.as_deref(), Some("R-fresh"));
    assert_eq!(storage.peek(ACCESS_TOKEN_KEY).as_deref(), Some("A-fresh"));
    assert_eq!(storage.peek(REFRESH_TOKEN_KEY).as_deref(), Some("R-fresh"));

    server.verify().await;
}

#[tokio::test]
async fn anonymous_request_replays_with_login_that_landed_meanwhile() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vehicles"))
        .and(header("Authorization", "Bearer at1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/vehicles"))
        .respond_with(ResponseTemplate::new(401).set_delay(REFRESH_DELAY))
        .expect(1)
        .mount(&server)
        .await;
    mock_refresh_ok(&server, 0).await;

    let storage = Arc::new(MemoryStorage::new());
    let session = Arc::new(SessionStore::new(
        Arc::clone(&storage) as Arc<dyn TokenStorage>
    ));
    session.initialize().await;
    let client = client_for(&server, Arc::clone(&session));

    let (result, _) = tokio::join!(client.get_json::<Value>("/vehicles"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        session
            .login(
                "at1".to_string(),
                "rt1".to_string(),
                User::from_email("driver@example.com"),
            )
            .await
    });

    result.expect("replayed with the new login's token");
    assert_eq!(session.refresh_token().await.as_deref(), Some("rt1"));

    server.verify().await;
}

#[tokio::test]
async fn failed_refresh_does_not_log_out_newer_login() {
    let server = MockServer::start().await;
    mock_vehicles(&server, "A-old", 401, 1).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_delay(REFRESH_DELAY))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let client = logged_in_client(&server, &storage).await;
    let session = Arc::clone(client.session());

    let (result, _) = tokio::join!(client.get_json::<Value>("/vehicles"), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        session
            .login(
                "A-fresh".to_string(),
                "R-fresh".to_string(),
                User::from_email("driver@example.com"),
            )
            .await
    });

    let err = result.expect_err("the old session's request still fails");
    assert!(err.is_unauthorized(), "unexpected error: {err:?}");
    assert!(session.is_authenticated());
    assert_eq!(storage.peek(REFRESH_TOKEN_KEY).as_deref(), Some("R-fresh"));
    assert_eq!(storage.delete_calls(), 0);

    server.verify().await;
}
