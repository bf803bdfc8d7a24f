//! Data models for the drivekey API.
//!
//! This module contains the wire types exchanged with the backend:
//!
//! - `User`: The identity attached to an authenticated session
//! - `TokenPair`, `Credentials`, `RefreshRequest`: Auth endpoint payloads
//! - `CarRegistration`: Vehicle registration form payload

pub mod auth;
pub mod car;

pub use auth::{Credentials, TokenPair, User};
pub(crate) use auth::RefreshRequest;
pub use car::CarRegistration;
