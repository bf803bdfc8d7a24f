//! REST API client module for the drivekey backend.
//!
//! This module provides the `ApiClient` for talking to the backend with
//! automatic bearer authentication, and the `AuthService`/`CarService`
//! wrappers used by the front end.
//!
//! Expired access tokens are refreshed transparently through the
//! `RefreshCoordinator`, which keeps at most one refresh exchange in flight.

pub mod client;
pub mod error;
pub mod refresh;
pub mod services;

pub use client::{ApiClient, ApiRequest, ClientConfig};
pub use error::ApiError;
pub use refresh::{RefreshCoordinator, RefreshOutcome};
pub use services::{AuthService, CarService};
