use async_graphql::{Context, Guard, Result};

use crate::api::error::ApiError;
use crate::auth::Identity;

/// Field guard for everything outside the public allow-list. The HTTP layer
/// already rejects unauthenticated protected requests; this keeps the schema
/// safe when it is executed some other way.
pub struct RequireIdentity;

impl Guard for RequireIdentity {
    async fn check(&self, ctx: &Context<'_>) -> Result<()> {
        identity(ctx).map(|_| ())
    }
}

/// The caller's identity, or `UNAUTHENTICATED`
pub fn identity<'a>(ctx: &Context<'a>) -> Result<&'a Identity> {
    ctx.data_opt::<Identity>()
        .ok_or_else(|| ApiError::unauthenticated("Authentication required").into_graphql())
}
