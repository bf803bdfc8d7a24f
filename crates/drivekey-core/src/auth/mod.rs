//! Authentication module for managing the user session and its credentials.
//!
//! This module provides:
//! - `SessionStore`: In-memory session state with lifecycle tracking
//! - `TokenStorage`: Durable storage for the access/refresh token pair,
//!   backed by the OS keychain, a passphrase-encrypted file, or memory
//!
//! The token pair is read from storage once at startup and written on
//! login and on every refresh.

pub mod credentials;
pub mod encrypted;
pub mod session;

pub use credentials::{
    KeyringStorage, MemoryStorage, StorageError, TokenStorage, ACCESS_TOKEN_KEY,
    DEFAULT_SERVICE_NAME, REFRESH_TOKEN_KEY,
};
pub use encrypted::EncryptedFileStorage;
pub use session::{RestorePolicy, SessionData, SessionPhase, SessionStore};
