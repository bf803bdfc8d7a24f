//! Authenticated HTTP client for the drivekey backend.
//!
//! Every request goes through the same two steps:
//!
//! - outbound: attach `Authorization: Bearer <access token>` unless the path
//!   is one of the public auth endpoints
//! - inbound: on the first 401 for a request, refresh the token pair once
//!   (shared with every other request failing at the same time) and replay
//!   the request with the new token
//!
//! Network errors and timeouts are never treated as authorization failures.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use super::refresh::{RefreshCoordinator, RefreshGuard, RefreshTicket};
use super::ApiError;
use crate::auth::SessionStore;
use crate::models::{RefreshRequest, TokenPair};

// ============================================================================
// Constants
// ============================================================================

/// Default API base URL (Android emulator alias for the host machine).
pub const DEFAULT_BASE_URL: &str = "http://10.0.2.2:8080";

/// HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Endpoints that never carry an access token.
const PUBLIC_PATHS: &[&str] = &[LOGIN_PATH, REGISTER_PATH, REFRESH_PATH];

/// Connection settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// A request that can be replayed after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    /// Set once the request has been replayed after a refresh; never replayed twice.
    pub retried: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            retried: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    fn is_public(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or(&self.path);
        PUBLIC_PATHS.contains(&path)
    }
}

/// API client shared by every service.
/// Clone is cheap - the HTTP client, session and coordinator are all shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionStore>,
    refresh: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Create a client with its own refresh coordinator.
    pub fn new(config: &ClientConfig, session: Arc<SessionStore>) -> Result<Self, ApiError> {
        Self::with_coordinator(config, session, Arc::new(RefreshCoordinator::new()))
    }

    /// Create a client sharing an existing refresh coordinator.
    pub fn with_coordinator(
        config: &ClientConfig,
        session: Arc<SessionStore>,
        refresh: Arc<RefreshCoordinator>,
    ) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
            refresh,
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.refresh
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Send one attempt. Returns the bearer token that was attached, if any.
    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<String>,
    ) -> (Option<String>, Result<Response, ApiError>) {
        let token = if request.is_public() {
            None
        } else {
            match token {
                Some(token) => Some(token),
                None => self.session.access_token().await,
            }
        };

        let mut builder = self
            .client
            .request(request.method.clone(), self.url(&request.path));
        if let Some(ref token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        debug!(
            method = %request.method,
            path = %request.path,
            authenticated = token.is_some(),
            retried = request.retried,
            "Sending request"
        );

        let result = match builder.send().await {
            Ok(response) => Self::check_response(response).await,
            Err(e) => Err(e.into()),
        };
        (token, result)
    }

    /// Send a request, refreshing the session once if the server rejects the token.
    pub async fn send(&self, mut request: ApiRequest) -> Result<Response, ApiError> {
        let (sent_token, result) = self.dispatch(&request, None).await;

        match result {
            Err(ApiError::Unauthorized) if request.is_public() => Err(ApiError::Unauthorized),
            Err(ApiError::Unauthorized) if request.retried => self.reject_replay(&request).await,
            Err(ApiError::Unauthorized) => {
                request.retried = true;
                let token = self.recover_token(sent_token).await?;
                match self.dispatch(&request, Some(token)).await.1 {
                    Err(ApiError::Unauthorized) => self.reject_replay(&request).await,
                    other => other,
                }
            }
            other => other,
        }
    }

    /// A replayed request was rejected again: the session cannot be recovered.
    async fn reject_replay(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        warn!(path = %request.path, "Request rejected after token refresh, ending session");
        self.session.logout().await;
        Err(ApiError::SessionRejected)
    }

    /// Obtain a token to replay a request that failed with 401 using `sent_token`.
    async fn recover_token(&self, sent_token: Option<String>) -> Result<String, ApiError> {
        let current = self.session.access_token().await;
        match (sent_token, current) {
            // Someone refreshed while this request was in flight
            (Some(sent), Some(current)) if sent != current => {
                debug!("Token already refreshed, replaying with current token");
                return Ok(current);
            }
            // A login or restore landed while this anonymous request was in flight
            (None, Some(current)) => {
                debug!("Session started while request was in flight, replaying with its token");
                return Ok(current);
            }
            // Someone ended the session while this request was in flight
            (Some(_), None) => {
                debug!("Session ended while request was in flight");
                return Err(ApiError::Unauthorized);
            }
            _ => {}
        }

        let guard = match self.refresh.begin() {
            RefreshTicket::Follower(waiter) => {
                return waiter.wait().await.map_err(ApiError::RefreshFailed);
            }
            RefreshTicket::Leader(guard) => guard,
        };

        let exchanged = match self.session.refresh_token().await {
            Some(token) => token,
            None => {
                warn!("No refresh token available");
                return self.fail_refresh(guard, ApiError::Unauthorized).await;
            }
        };

        match self.exchange_refresh_token(&exchanged).await {
            Ok(pair) => {
                if !self.session.apply_refresh(&exchanged, &pair).await {
                    return Self::supersede_refresh(guard);
                }
                let released = guard.complete(Ok(pair.access_token.clone()));
                info!(released, "Token refresh succeeded");
                Ok(pair.access_token)
            }
            Err(e) => {
                // A replaced session's failed exchange must not log out its successor
                if self.session.refresh_token().await.as_deref() != Some(exchanged.as_str()) {
                    return Self::supersede_refresh(guard);
                }
                self.fail_refresh(guard, e).await
            }
        }
    }

    /// Logout or a new login replaced the session mid-exchange.
    fn supersede_refresh(guard: RefreshGuard<'_>) -> Result<String, ApiError> {
        let released = guard.complete(Err(Arc::new(ApiError::Unauthorized)));
        debug!(released, "Discarded refresh for a session that no longer exists");
        Err(ApiError::Unauthorized)
    }

    /// End the session, then reject everyone waiting on this refresh.
    async fn fail_refresh(&self, guard: RefreshGuard<'_>, error: ApiError) -> Result<String, ApiError> {
        let cause = Arc::new(error);
        warn!(error = %cause, "Token refresh failed, logging out");
        self.session.logout().await;
        let released = guard.complete(Err(Arc::clone(&cause)));
        debug!(released, "Released queued requests after failed refresh");
        Err(ApiError::RefreshFailed(cause))
    }

    /// Trade `refresh_token` for a new pair.
    /// Goes straight to the HTTP client so a failure here never triggers another refresh.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let response = self
            .client
            .post(self.url(REFRESH_PATH))
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let response = Self::check_response(response).await?;

        response
            .json::<TokenPair>()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse refresh response: {}", e)))
    }

    // ===== Typed helpers =====

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::get(path)).await?;
        Self::parse_json(response, path).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.send(ApiRequest::post(path).json(body)?).await?;
        Self::parse_json(response, path).await
    }

    /// POST and return the body as text (some endpoints answer with plain strings).
    pub async fn post_text<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<String, ApiError> {
        let response = self.send(ApiRequest::post(path).json(body)?).await?;
        Ok(response.text().await?)
    }

    /// POST with no body, discarding the response body.
    pub async fn post_empty(&self, path: &str) -> Result<StatusCode, ApiError> {
        let response = self.send(ApiRequest::post(path)).await?;
        Ok(response.status())
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_paths() {
        assert!(ApiRequest::post(LOGIN_PATH).is_public());
        assert!(ApiRequest::post(REGISTER_PATH).is_public());
        assert!(ApiRequest::post(REFRESH_PATH).is_public());
        assert!(ApiRequest::post("/auth/login?next=home").is_public());
        assert!(!ApiRequest::post(LOGOUT_PATH).is_public());
        assert!(!ApiRequest::post("/car/register").is_public());
        assert!(!ApiRequest::get("/auth/login/extra").is_public());
    }

    #[test]
    fn test_request_body_is_replayable() {
        let request = ApiRequest::post("/car/register")
            .json(&serde_json::json!({ "model": "Corolla" }))
            .unwrap();
        let replay = request.clone();
        assert_eq!(replay.body, request.body);
        assert!(!replay.retried);
    }
}
