//! drivekey core library.
//!
//! Session state, durable token storage and an authenticated API client that
//! refreshes expired access tokens transparently. Front ends call
//! `SessionStore::initialize` once at startup, read `is_loading` and
//! `is_authenticated` to decide what to show, and go through `AuthService`
//! and `CarService` for everything else.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod validation;

pub use api::{ApiClient, ApiError, AuthService, CarService, ClientConfig, RefreshCoordinator};
pub use auth::{RestorePolicy, SessionPhase, SessionStore, TokenStorage};
pub use config::{Config, StorageBackend};
