//! Unified API error handling.
//!
//! Every failure a client can observe is an [`ApiError`] carrying a stable
//! [`ErrorCode`]. Over HTTP it renders as `{"error": "<message>", "code": "<CODE>"}`
//! with the code's status; inside GraphQL the code is placed in the error's
//! `extensions.code` so clients can branch on it.

use async_graphql::ErrorExtensions;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::auth::TokenError;

/// Error codes for API responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication and authorization
    Unauthenticated,
    Unauthorized,
    InvalidCredentials,
    InvalidToken,

    // Business rules
    EmailAlreadyExists,
    NoOrganisation,
    TeamMemberNotFound,
    InvitationNotFoundOrExpired,
    AlreadyAccepted,
    EmailBelongsToDifferentOrganisation,
    NotFound,
    ValidationError,
    TooManyRequests,

    // Server errors
    InternalError,
}

impl ErrorCode {
    /// Get the default HTTP status code for this error code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthenticated
            | ErrorCode::InvalidCredentials
            | ErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthorized => StatusCode::FORBIDDEN,
            ErrorCode::EmailAlreadyExists
            | ErrorCode::AlreadyAccepted
            | ErrorCode::EmailBelongsToDifferentOrganisation => StatusCode::CONFLICT,
            ErrorCode::NoOrganisation | ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::TeamMemberNotFound
            | ErrorCode::InvitationNotFoundOrExpired
            | ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the string representation of the error code
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthenticated => "UNAUTHENTICATED",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::InvalidCredentials => "INVALID_CREDENTIALS",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::EmailAlreadyExists => "EMAIL_ALREADY_EXISTS",
            ErrorCode::NoOrganisation => "NO_ORGANISATION",
            ErrorCode::TeamMemberNotFound => "TEAM_MEMBER_NOT_FOUND",
            ErrorCode::InvitationNotFoundOrExpired => "INVITATION_NOT_FOUND_OR_EXPIRED",
            ErrorCode::AlreadyAccepted => "ALREADY_ACCEPTED",
            ErrorCode::EmailBelongsToDifferentOrganisation => {
                "EMAIL_BELONGS_TO_DIFFERENT_ORGANISATION"
            }
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::TooManyRequests => "TOO_MANY_REQUESTS",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// The JSON body of an HTTP error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
    /// Machine-readable error code
    pub code: String,
    /// Field-level validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HashMap<String, Vec<String>>>,
}

/// Unified API error type
#[derive(Debug, Clone)]
pub struct ApiError {
    code: ErrorCode,
    status: StatusCode,
    message: String,
    details: Option<HashMap<String, Vec<String>>>,
}

impl ApiError {
    /// Create a new API error with a specific code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code(),
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&HashMap<String, Vec<String>>> {
        self.details.as_ref()
    }

    /// Convert into a GraphQL error with `extensions.code` set
    pub fn into_graphql(self) -> async_graphql::Error {
        self.extend()
    }

    // -------------------------------------------------------------------------
    // Convenience constructors
    // -------------------------------------------------------------------------

    /// No identity, or the presented session token was rejected
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    /// Authenticated, but acting outside the caller's organisation
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Login failure; the same value for unknown email and wrong password
    pub fn invalid_credentials() -> Self {
        Self::new(ErrorCode::InvalidCredentials, "Invalid email or password")
    }

    /// Any token codec failure, deliberately without the reason
    pub fn invalid_token() -> Self {
        Self::new(ErrorCode::InvalidToken, "Invalid or expired token")
    }

    pub fn email_already_exists() -> Self {
        Self::new(ErrorCode::EmailAlreadyExists, "Email already exists")
    }

    pub fn no_organisation() -> Self {
        Self::new(
            ErrorCode::NoOrganisation,
            "User does not belong to an organisation",
        )
    }

    pub fn team_member_not_found() -> Self {
        Self::new(ErrorCode::TeamMemberNotFound, "Team member not found")
    }

    pub fn invitation_not_found_or_expired() -> Self {
        Self::new(
            ErrorCode::InvitationNotFoundOrExpired,
            "Invitation not found or has expired",
        )
    }

    pub fn already_accepted() -> Self {
        Self::new(
            ErrorCode::AlreadyAccepted,
            "This invitation has already been accepted",
        )
    }

    pub fn email_belongs_to_different_organisation() -> Self {
        Self::new(
            ErrorCode::EmailBelongsToDifferentOrganisation,
            "Email already registered with a different organisation",
        )
    }

    /// Not found error (404)
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Validation error (400) with field-level details
    pub fn validation(errors: HashMap<String, Vec<String>>) -> Self {
        let message = if errors.len() == 1 {
            errors
                .values()
                .next()
                .and_then(|v| v.first())
                .cloned()
                .unwrap_or_else(|| "Validation failed".to_string())
        } else {
            format!("Validation failed for {} fields", errors.len())
        };

        let mut err = Self::new(ErrorCode::ValidationError, message);
        err.details = Some(errors);
        err
    }

    /// Single field validation error
    pub fn validation_field(field: &str, message: impl Into<String>) -> Self {
        let mut errors = HashMap::new();
        errors.insert(field.to_string(), vec![message.into()]);
        Self::validation(errors)
    }

    /// Too many requests error (429)
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TooManyRequests, message)
    }

    /// Internal server error (500). The message is shown to clients, so keep
    /// details in the log instead.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let response = ErrorResponse {
            error: self.message,
            code: self.code.as_str().to_string(),
            details: self.details,
        };

        (self.status, Json(response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for ApiError {}

impl ErrorExtensions for ApiError {
    fn extend(&self) -> async_graphql::Error {
        let error = async_graphql::Error::new(self.message.clone());
        let code = self.code.as_str().to_string();
        let fields = self
            .details
            .as_ref()
            .and_then(|details| serde_json::to_value(details).ok())
            .and_then(|json| async_graphql::Value::from_json(json).ok());

        error.extend_with(|_, extensions| {
            extensions.set("code", code);
            if let Some(fields) = fields {
                extensions.set("fields", fields);
            }
        })
    }
}

// -------------------------------------------------------------------------
// Conversion implementations for common error types
// -------------------------------------------------------------------------

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {}", err);

        match &err {
            sqlx::Error::RowNotFound => ApiError::not_found("Resource not found"),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                ApiError::validation_field("id", "A resource with this identifier already exists")
            }
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                ApiError::validation_field("id", "Referenced resource does not exist")
            }
            _ => ApiError::internal("A database error occurred"),
        }
    }
}

/// Token failures never tell the caller which check failed
impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::MissingSecret | TokenError::Signing(_) => {
                tracing::error!("Token signing failed: {}", err);
                ApiError::internal("Failed to issue token")
            }
            _ => {
                tracing::debug!("Token rejected: {}", err);
                ApiError::invalid_token()
            }
        }
    }
}

// -------------------------------------------------------------------------
// Builder for validation errors (integrates with the validation module)
// -------------------------------------------------------------------------

/// Builder for collecting multiple validation errors
#[derive(Debug, Default)]
pub struct ValidationErrorBuilder {
    errors: HashMap<String, Vec<String>>,
}

impl ValidationErrorBuilder {
    /// Create a new validation error builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validation error for a field
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) -> &mut Self {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
        self
    }

    /// Record the error of a `Result<(), String>` validator, if any
    pub fn check(&mut self, field: &str, result: Result<(), String>) -> &mut Self {
        if let Err(message) = result {
            self.add(field, message);
        }
        self
    }

    /// Check if there are any errors
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Build the ApiError if there are any errors
    pub fn build(self) -> Option<ApiError> {
        if self.errors.is_empty() {
            None
        } else {
            Some(ApiError::validation(self.errors))
        }
    }

    /// Return Ok(()) if no errors, or Err(ApiError) if there are errors
    pub fn finish(self) -> Result<(), ApiError> {
        match self.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
