//! The GraphQL schema. Resolvers are thin: they pull `Arc<AppState>` and the
//! caller's `Identity` out of the request context and delegate to the auth
//! services.

mod guard;
mod mutation;
mod query;
pub mod types;

pub use guard::{identity, RequireIdentity};
pub use mutation::MutationRoot;
pub use query::QueryRoot;

use async_graphql::{EmptySubscription, Schema, ID};
use std::sync::Arc;

use crate::api::error::ApiError;
use crate::AppState;

pub type AppSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(state: Arc<AppState>) -> AppSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(state)
        .finish()
}

/// Database ids are integers exposed as GraphQL `ID`
pub(crate) fn parse_id(id: &ID, field: &str) -> async_graphql::Result<i64> {
    id.parse::<i64>()
        .map_err(|_| ApiError::validation_field(field, "Invalid id").into_graphql())
}
