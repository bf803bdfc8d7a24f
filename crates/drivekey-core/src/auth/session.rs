use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use super::credentials::{StorageError, TokenStorage};
use crate::models::{TokenPair, User};

/// Where the session is in its lifecycle.
///
/// `Uninitialized -> Loading -> {Authenticated, Unauthenticated}`; once settled
/// the session never returns to `Loading`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    Uninitialized,
    Loading,
    Authenticated,
    Unauthenticated,
}

impl SessionPhase {
    fn is_settled(self) -> bool {
        matches!(self, SessionPhase::Authenticated | SessionPhase::Unauthenticated)
    }
}

/// What `initialize` concludes from a restored credential pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestorePolicy {
    /// Attach the restored tokens to requests but stay unauthenticated until
    /// a user identity is attached.
    #[default]
    TokensOnly,
    /// Treat a restored pair as an authenticated session.
    TrustStoredTokens,
}

impl std::str::FromStr for RestorePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tokens-only" => Ok(RestorePolicy::TokensOnly),
            "trust-stored-tokens" => Ok(RestorePolicy::TrustStoredTokens),
            other => Err(format!("unknown restore policy: {}", other)),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user: Option<User>,
    pub phase: SessionPhase,
    pub authenticated_at: Option<DateTime<Utc>>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl Default for SessionData {
    fn default() -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            user: None,
            phase: SessionPhase::Uninitialized,
            authenticated_at: None,
            refreshed_at: None,
        }
    }
}

impl std::fmt::Debug for SessionData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionData")
            .field("has_access_token", &self.access_token.is_some())
            .field("has_refresh_token", &self.refresh_token.is_some())
            .field("user", &self.user)
            .field("phase", &self.phase)
            .field("authenticated_at", &self.authenticated_at)
            .field("refreshed_at", &self.refreshed_at)
            .finish()
    }
}

impl SessionData {
    pub fn is_authenticated(&self) -> bool {
        self.phase == SessionPhase::Authenticated
    }

    pub fn is_loading(&self) -> bool {
        !self.phase.is_settled()
    }

    /// Whether a credential pair is held in memory
    pub fn has_tokens(&self) -> bool {
        self.access_token.is_some() && self.refresh_token.is_some()
    }

    fn reset(&mut self) {
        *self = Self {
            phase: SessionPhase::Unauthenticated,
            ..Self::default()
        };
    }
}

/// Single source of truth for who is logged in and which credentials to present.
///
/// Memory is authoritative; the token storage is a durable copy read once at
/// startup by `initialize`.
pub struct SessionStore {
    storage: Arc<dyn TokenStorage>,
    policy: RestorePolicy,
    data: RwLock<SessionData>,
    phase_tx: watch::Sender<SessionPhase>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn TokenStorage>) -> Self {
        Self::with_policy(storage, RestorePolicy::default())
    }

    pub fn with_policy(storage: Arc<dyn TokenStorage>, policy: RestorePolicy) -> Self {
        let (phase_tx, _) = watch::channel(SessionPhase::Uninitialized);
        Self {
            storage,
            policy,
            data: RwLock::new(SessionData::default()),
            phase_tx,
        }
    }

    /// Restore the credential pair from storage. Never fails: storage errors
    /// are logged and the session still settles so the app is not stuck loading.
    pub async fn initialize(&self) {
        {
            let mut data = self.data.write().await;
            if data.phase != SessionPhase::Uninitialized {
                debug!(phase = ?data.phase, "Session already initialized");
                return;
            }
            data.phase = SessionPhase::Loading;
            self.phase_tx.send_replace(SessionPhase::Loading);
        }

        let restored = match self.storage.load_tokens() {
            Ok((Some(access), Some(refresh))) => Some((access, refresh)),
            Ok((access, refresh)) => {
                debug!(
                    has_access = access.is_some(),
                    has_refresh = refresh.is_some(),
                    "No complete credential pair stored"
                );
                None
            }
            Err(e) => {
                error!(error = %e, "Error initializing session from storage");
                None
            }
        };

        let mut data = self.data.write().await;
        if data.phase != SessionPhase::Loading {
            // A login landed while storage was being read; it wins.
            debug!(phase = ?data.phase, "Session settled during restore");
            return;
        }

        let phase = match restored {
            Some((access, refresh)) => {
                data.access_token = Some(access);
                data.refresh_token = Some(refresh);
                match self.policy {
                    RestorePolicy::TokensOnly => SessionPhase::Unauthenticated,
                    RestorePolicy::TrustStoredTokens => {
                        data.authenticated_at = Some(Utc::now());
                        SessionPhase::Authenticated
                    }
                }
            }
            None => SessionPhase::Unauthenticated,
        };
        data.phase = phase;
        self.phase_tx.send_replace(phase);
        info!(phase = ?phase, restored = data.has_tokens(), "Session initialized");
    }

    /// Persist the pair, then switch to an authenticated session in one step.
    pub async fn login(
        &self,
        access_token: String,
        refresh_token: String,
        user: User,
    ) -> Result<(), StorageError> {
        self.storage.save_tokens(&access_token, &refresh_token)?;

        let mut data = self.data.write().await;
        info!(user = %user.email, "Logged in");
        data.access_token = Some(access_token);
        data.refresh_token = Some(refresh_token);
        data.user = Some(user);
        data.phase = SessionPhase::Authenticated;
        data.authenticated_at = Some(Utc::now());
        self.phase_tx.send_replace(SessionPhase::Authenticated);
        Ok(())
    }

    /// Clear storage (best effort) and reset to unauthenticated no matter what.
    /// Returns whether a session was held before.
    pub async fn logout(&self) -> bool {
        if let Err(e) = self.storage.clear_tokens() {
            warn!(error = %e, "Failed to clear stored tokens");
        }

        let mut data = self.data.write().await;
        let had_session = data.is_authenticated() || data.has_tokens();
        data.reset();
        self.phase_tx.send_replace(SessionPhase::Unauthenticated);
        info!(had_session, "Logged out");
        had_session
    }

    /// Replace the access token only. Storage failures are logged; memory wins.
    pub async fn update_access_token(&self, access_token: String) {
        if let Err(e) = self.storage.save_access_token(&access_token) {
            warn!(error = %e, "Failed to persist access token");
        }
        let mut data = self.data.write().await;
        data.access_token = Some(access_token);
        data.refreshed_at = Some(Utc::now());
    }

    /// Memory-only update of both tokens.
    pub async fn set_tokens(&self, access_token: String, refresh_token: String) {
        let mut data = self.data.write().await;
        data.access_token = Some(access_token);
        data.refresh_token = Some(refresh_token);
        data.refreshed_at = Some(Utc::now());
    }

    /// Persist a refreshed pair, then apply it in memory, but only if the
    /// session still holds `exchanged`, the refresh token the pair was
    /// obtained with. Returns false when a logout or a new login replaced
    /// the session while the exchange was in flight; nothing is written then.
    pub async fn apply_refresh(&self, exchanged: &str, pair: &TokenPair) -> bool {
        let mut data = self.data.write().await;
        if data.refresh_token.as_deref() != Some(exchanged) {
            debug!("Session changed during refresh, discarding refreshed pair");
            return false;
        }
        if let Err(e) = self
            .storage
            .save_tokens(&pair.access_token, &pair.refresh_token)
        {
            warn!(error = %e, "Failed to persist refreshed tokens");
        }
        data.access_token = Some(pair.access_token.clone());
        data.refresh_token = Some(pair.refresh_token.clone());
        data.refreshed_at = Some(Utc::now());
        true
    }

    /// Attach or detach the user identity. Ignored before the session settles.
    pub async fn set_user(&self, user: Option<User>) {
        let mut data = self.data.write().await;
        if !data.phase.is_settled() {
            debug!("Ignoring set_user before session settled");
            return;
        }
        let phase = if user.is_some() {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Unauthenticated
        };
        if phase == SessionPhase::Authenticated && data.authenticated_at.is_none() {
            data.authenticated_at = Some(Utc::now());
        }
        data.user = user;
        data.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    pub async fn access_token(&self) -> Option<String> {
        self.data.read().await.access_token.clone()
    }

    pub async fn refresh_token(&self) -> Option<String> {
        self.data.read().await.refresh_token.clone()
    }

    pub async fn user(&self) -> Option<User> {
        self.data.read().await.user.clone()
    }

    pub async fn snapshot(&self) -> SessionData {
        self.data.read().await.clone()
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase_tx.borrow()
    }

    pub fn is_authenticated(&self) -> bool {
        self.phase() == SessionPhase::Authenticated
    }

    pub fn is_loading(&self) -> bool {
        !self.phase().is_settled()
    }

    pub fn policy(&self) -> RestorePolicy {
        self.policy
    }

    /// Watch phase transitions (view layers re-render on change).
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase_tx.subscribe()
    }
}

// ============================================================================
// Tests
// ============================================================================
