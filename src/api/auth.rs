//! Authentication for the GraphQL endpoint.
//!
//! Every request needs a valid session token unless each root field of the
//! selected operation is on [`PUBLIC_OPERATIONS`]. The decision is made on
//! the parsed operation, never on substrings of the body. Anything that
//! cannot be classified is treated as protected. Public operations run with
//! whatever identity a usable token gives them; a stale or empty header
//! does not lock a logged-out client out of `login`.

use async_graphql::parser::{
    parse_query,
    types::{DocumentOperations, OperationDefinition, OperationType, Selection},
};
use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

use super::error::{ApiError, ErrorCode};
use super::rate_limit::{self, RateLimitTier};
use crate::AppState;

/// Root fields reachable without a session
pub const PUBLIC_OPERATIONS: &[&str] = &[
    "health",
    "register",
    "login",
    "verifyInvitationToken",
    "joinOrganisation",
    "__schema",
    "__type",
    "__typename",
];

/// Largest GraphQL body accepted
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Whether a request may run without a session. Stored in request
/// extensions for the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationAccess {
    Public,
    Protected,
}

/// What the `Authorization` header holds
#[derive(Debug, PartialEq, Eq)]
enum Credentials {
    Missing,
    Malformed,
    Bearer(String),
}

fn extract_credentials(headers: &HeaderMap) -> Credentials {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Credentials::Missing;
    };
    let Ok(value) = value.to_str() else {
        return Credentials::Malformed;
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Credentials::Bearer(token.trim().to_string()),
        _ => Credentials::Malformed,
    }
}

/// Classify a raw GraphQL POST body
pub fn classify_body(body: &[u8]) -> OperationAccess {
    match serde_json::from_slice::<async_graphql::Request>(body) {
        Ok(request) => classify(&request.query, request.operation_name.as_deref()),
        Err(_) => OperationAccess::Protected,
    }
}

/// Classify a GraphQL document and the name of the operation to run
pub fn classify(query: &str, operation_name: Option<&str>) -> OperationAccess {
    let Ok(document) = parse_query(query) else {
        return OperationAccess::Protected;
    };

    // Same selection rules the executor applies: a lone operation runs
    // without a name, otherwise the name must match
    let operation = match (&document.operations, operation_name) {
        (DocumentOperations::Single(operation), _) => Some(&operation.node),
        (DocumentOperations::Multiple(operations), Some(name)) => operations
            .iter()
            .find(|(op_name, _)| op_name.as_str() == name)
            .map(|(_, operation)| &operation.node),
        (DocumentOperations::Multiple(operations), None) if operations.len() == 1 => {
            operations.values().next().map(|operation| &operation.node)
        }
        (DocumentOperations::Multiple(_), None) => None,
    };

    match operation {
        Some(operation) if is_public(operation) => OperationAccess::Public,
        _ => OperationAccess::Protected,
    }
}

fn is_public(operation: &OperationDefinition) -> bool {
    if operation.ty == OperationType::Subscription {
        return false;
    }

    let items = &operation.selection_set.node.items;
    !items.is_empty()
        && items.iter().all(|selection| match &selection.node {
            Selection::Field(field) => PUBLIC_OPERATIONS.contains(&field.node.name.node.as_str()),
            // Fragments at the root could hide protected fields
            Selection::FragmentSpread(_) | Selection::InlineFragment(_) => false,
        })
}

/// Gate `POST /graphql`.
///
/// Protected requests without a usable bearer token get a 401 before the
/// schema runs, and each 401 is charged to the client's `Auth` rate-limit
/// tier. Public requests always go through; a valid token still attaches
/// its `Identity`, anything else is ignored.
pub async fn graphql_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::validation_field("body", "Request body is too large or unreadable")
                .into_response()
        }
    };

    let access = classify_body(&bytes);
    let credentials = extract_credentials(&parts.headers);
    let mut request = Request::from_parts(parts, Body::from(bytes));
    request.extensions_mut().insert(access);
    let ip = rate_limit::client_ip(&request);

    match credentials {
        Credentials::Bearer(token) => match state.sessions.authenticate(&token).await {
            Ok(identity) => {
                debug!(user_id = identity.user_id, "Authenticated request");
                request.extensions_mut().insert(identity);
            }
            Err(err) if err.code() == ErrorCode::InternalError => return err.into_response(),
            Err(_) if access == OperationAccess::Public => {
                debug!("Ignoring unusable session token on a public operation");
            }
            Err(_) => {
                warn!(%ip, "Rejected invalid or revoked session token");
                return reject(&state, ip, ApiError::invalid_token());
            }
        },
        Credentials::Malformed | Credentials::Missing if access == OperationAccess::Protected => {
            return reject(
                &state,
                ip,
                ApiError::unauthenticated("Authentication required"),
            );
        }
        Credentials::Malformed => {
            debug!("Ignoring malformed Authorization header on a public operation");
        }
        Credentials::Missing => {}
    }

    next.run(request).await
}

/// Answer a failed authentication, or 429 once the client has failed too often
fn reject(state: &AppState, ip: IpAddr, err: ApiError) -> Response {
    match state.rate_limiter.check(ip, RateLimitTier::Auth) {
        Ok(_) => err.into_response(),
        Err(retry_after) => rate_limit::too_many_requests(
            &state.rate_limiter,
            RateLimitTier::Auth,
            ip,
            retry_after,
        ),
    }
}
