//! Endpoint wrappers used by the screens: authentication and vehicles.

use tracing::{debug, info, warn};

use super::client::{ApiClient, LOGIN_PATH, LOGOUT_PATH, REGISTER_PATH};
use super::ApiError;
use crate::models::{CarRegistration, Credentials, TokenPair, User};
use crate::validation::{validate_car, validate_credentials};

/// Base path for vehicle endpoints
const CAR_REGISTER_PATH: &str = "/car/register";

/// Marker the register endpoint includes in its success message.
const SIGN_UP_SUCCESS_MARKER: &str = "created";

/// Login, sign-up and logout against `/auth/*`.
#[derive(Clone)]
pub struct AuthService {
    api: ApiClient,
}

impl AuthService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Exchange credentials for a token pair and start an authenticated session.
    pub async fn login(&self, credentials: &Credentials) -> Result<User, ApiError> {
        validate_credentials(credentials)?;

        let pair: TokenPair = self.api.post_json(LOGIN_PATH, credentials).await?;
        // The login endpoint does not return a profile yet.
        let user = User::from_email(&credentials.email);
        self.api
            .session()
            .login(pair.access_token, pair.refresh_token, user.clone())
            .await?;

        info!(user = %user.email, "Login succeeded");
        Ok(user)
    }

    /// Create an account. Returns the server's confirmation message.
    pub async fn sign_up(&self, credentials: &Credentials) -> Result<String, ApiError> {
        validate_credentials(credentials)?;

        let message = self.api.post_text(REGISTER_PATH, credentials).await?;
        if message.contains(SIGN_UP_SUCCESS_MARKER) {
            info!(email = %credentials.email, "Account created");
            Ok(message)
        } else {
            Err(ApiError::InvalidResponse(format!(
                "Unexpected sign-up response: {}",
                message
            )))
        }
    }

    /// Tell the server (best effort), then end the local session regardless.
    pub async fn logout(&self) {
        match self.api.post_empty(LOGOUT_PATH).await {
            Ok(status) => debug!(%status, "Server logout acknowledged"),
            Err(e) => warn!(error = %e, "Logout API error"),
        }
        self.api.session().logout().await;
    }
}

/// Vehicle endpoints under `/car`.
#[derive(Clone)]
pub struct CarService {
    api: ApiClient,
}

impl CarService {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Register a vehicle for the current user.
    /// Plain-text responses are returned as a JSON string.
    pub async fn register(&self, car: &CarRegistration) -> Result<serde_json::Value, ApiError> {
        validate_car(car)?;

        let text = self.api.post_text(CAR_REGISTER_PATH, car).await?;
        let value = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        info!(model = %car.model, year = %car.year, "Vehicle registered");
        Ok(value)
    }
}
