//! Form validation shared by every front end.
//!
//! Messages match what the login, sign-up and vehicle forms display.

use std::fmt;

use serde::Serialize;

use crate::models::{CarRegistration, Credentials};

/// Minimum password length accepted by the backend
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Minimum length of the vehicle year field
pub const MIN_YEAR_LENGTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: &'static str,
}

/// Every problem found in one form submission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    fn push(&mut self, field: &'static str, message: &'static str) {
        self.0.push(FieldError { field, message });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First message for `field`, if any.
    pub fn message_for(&self, field: &str) -> Option<&'static str> {
        self.0.iter().find(|e| e.field == field).map(|e| e.message)
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self
            .0
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

/// Equivalent of `^[^\s@]+@[^\s@]+\.[^\s@]+$`.
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    // Some dot must have at least one character on each side
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}

/// Validate login and sign-up forms.
pub fn validate_credentials(credentials: &Credentials) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if credentials.email.is_empty() {
        errors.push("email", "Email is required");
    } else if !is_valid_email(&credentials.email) {
        errors.push("email", "Please enter a valid email address");
    }

    if credentials.password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push("password", "Password must be at least 6 characters");
    }

    errors.into_result()
}

/// Validate the vehicle registration form. Brand is optional.
pub fn validate_car(car: &CarRegistration) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    if car.model.is_empty() {
        errors.push("model", "Model is required");
    }
    if car.year.chars().count() < MIN_YEAR_LENGTH {
        errors.push("year", "Year must be at least 4 characters");
    }
    if car.kilometers.is_empty() {
        errors.push("kilometers", "Kilometers is required");
    }

    errors.into_result()
}
