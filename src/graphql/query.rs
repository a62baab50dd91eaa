use async_graphql::{Context, Object, Result, ID};
use std::sync::Arc;

use super::guard::{identity, RequireIdentity};
use super::types::{
    HealthStatus, InvitationObject, OrganisationObject, TeamMemberObject, TokenInfo, UserObject,
};
use super::parse_id;
use crate::api::error::ApiError;
use crate::{db, AppState};

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    async fn health(&self, ctx: &Context<'_>) -> Result<HealthStatus> {
        let state = ctx.data::<Arc<AppState>>()?;
        Ok(HealthStatus::current(&state.config))
    }

    /// The authenticated user with organisation and team member
    #[graphql(guard = "RequireIdentity")]
    async fn me(&self, ctx: &Context<'_>) -> Result<UserObject> {
        let state = ctx.data::<Arc<AppState>>()?;
        let view = state
            .sessions
            .me(identity(ctx)?)
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(view.into())
    }

    #[graphql(guard = "RequireIdentity")]
    async fn organisation(&self, ctx: &Context<'_>) -> Result<OrganisationObject> {
        let state = ctx.data::<Arc<AppState>>()?;
        let organisation = state
            .sessions
            .organisation(identity(ctx)?)
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(organisation.into())
    }

    #[graphql(guard = "RequireIdentity")]
    async fn team_members(&self, ctx: &Context<'_>) -> Result<Vec<TeamMemberObject>> {
        let state = ctx.data::<Arc<AppState>>()?;
        let members = state
            .invitations
            .team_members(identity(ctx)?)
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(members.into_iter().map(Into::into).collect())
    }

    #[graphql(guard = "RequireIdentity")]
    async fn team_member(&self, ctx: &Context<'_>, id: ID) -> Result<TeamMemberObject> {
        let state = ctx.data::<Arc<AppState>>()?;
        let id = parse_id(&id, "id")?;
        let member = state
            .invitations
            .team_member(identity(ctx)?, id)
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(member.into())
    }

    /// Invitations sent by the caller's organisation, newest first
    #[graphql(guard = "RequireIdentity")]
    async fn invitations(&self, ctx: &Context<'_>) -> Result<Vec<InvitationObject>> {
        let state = ctx.data::<Arc<AppState>>()?;
        let invitations = state
            .invitations
            .invitations(identity(ctx)?)
            .await
            .map_err(ApiError::into_graphql)?;

        let now = db::now();
        Ok(invitations
            .into_iter()
            .map(|invitation| InvitationObject::from_row(invitation, &now))
            .collect())
    }

    /// Look up who an invitation token is for, without redeeming it
    async fn verify_invitation_token(&self, ctx: &Context<'_>, token: String) -> Result<TokenInfo> {
        let state = ctx.data::<Arc<AppState>>()?;
        let info = state
            .invitations
            .verify_invitation_token(&token)
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(info.into())
    }
}
