//! Input validation for API requests.
//!
//! Validators return `Result<(), String>` with a user-facing message. To
//! report several fields at once, feed them into the `ValidationErrorBuilder`
//! from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

use super::error::{ApiError, ValidationErrorBuilder};

pub const MIN_PASSWORD_LENGTH: usize = 8;
pub const MAX_PASSWORD_LENGTH: usize = 128;
pub const MAX_NAME_LENGTH: usize = 100;
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Roles a caller may assign
pub const VALID_ROLES: &[&str] = &["admin", "user"];

lazy_static! {
    /// Deliberately loose: one `@`, no whitespace, a dot in the domain
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^@\s]+@[^@\s]+\.[^@\s]+$"
    ).unwrap();
}

/// Trim and lowercase an email so lookups and the UNIQUE index agree
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > MAX_EMAIL_LENGTH {
        return Err(format!(
            "Email is too long (max {} characters)",
            MAX_EMAIL_LENGTH
        ));
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a new password. Only length is checked.
pub fn validate_password(password: &str) -> Result<(), String> {
    let length = password.chars().count();
    if length < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }

    if length > MAX_PASSWORD_LENGTH {
        return Err(format!(
            "Password is too long (max {} characters)",
            MAX_PASSWORD_LENGTH
        ));
    }

    Ok(())
}

/// Validate a display name (team member or organisation)
pub fn validate_name(name: &str, label: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(format!("{} is required", label));
    }

    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(format!(
            "{} is too long (max {} characters)",
            label, MAX_NAME_LENGTH
        ));
    }

    Ok(())
}

/// Validate an optional role
pub fn validate_role(role: Option<&str>) -> Result<(), String> {
    match role {
        Some(r) if !VALID_ROLES.contains(&r) => Err(format!(
            "Invalid role. Must be one of: {}",
            VALID_ROLES.join(", ")
        )),
        _ => Ok(()),
    }
}

/// Validate registration input
pub fn validate_registration(
    email: &str,
    password: &str,
    role: Option<&str>,
) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("email", validate_email(email))
        .check("password", validate_password(password))
        .check("role", validate_role(role));
    errors.finish()
}

/// Validate the team member fields of an invitation or a plain team member
pub fn validate_team_member(
    name: &str,
    email: &str,
    role: Option<&str>,
) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("teamMemberName", validate_name(name, "Team member name"))
        .check("teamMemberEmailId", validate_email(email))
        .check("role", validate_role(role));
    errors.finish()
}
