use async_graphql::{Context, Object, Result};
use std::sync::Arc;

use super::guard::{identity, RequireIdentity};
use super::parse_id;
use super::types::{
    AuthResult, CreateOrganisationInput, CreateOrganisationResult, CreateTeamMemberInput,
    InviteTeamMemberInput, JoinOrganisationInput, LoginInput, RegisterInput,
    ResendInvitationInput, TeamMemberObject,
};
use crate::api::error::ApiError;
use crate::AppState;

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    async fn register(&self, ctx: &Context<'_>, input: RegisterInput) -> Result<AuthResult> {
        let state = ctx.data::<Arc<AppState>>()?;
        let outcome = state
            .sessions
            .register(&input.email, &input.password, input.role.as_deref())
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(outcome.into())
    }

    async fn login(&self, ctx: &Context<'_>, input: LoginInput) -> Result<AuthResult> {
        let state = ctx.data::<Arc<AppState>>()?;
        let outcome = state
            .sessions
            .login(&input.email, &input.password)
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(outcome.into())
    }

    /// Revoke the token this request was made with
    #[graphql(guard = "RequireIdentity")]
    async fn logout(&self, ctx: &Context<'_>) -> Result<bool> {
        let state = ctx.data::<Arc<AppState>>()?;
        state
            .sessions
            .logout(identity(ctx)?)
            .await
            .map_err(ApiError::into_graphql)
    }

    #[graphql(guard = "RequireIdentity")]
    async fn create_organisation(
        &self,
        ctx: &Context<'_>,
        input: CreateOrganisationInput,
    ) -> Result<CreateOrganisationResult> {
        let state = ctx.data::<Arc<AppState>>()?;
        let (organisation, token) = state
            .sessions
            .create_organisation(identity(ctx)?, &input.organisation_name)
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(CreateOrganisationResult {
            organisation: organisation.into(),
            token,
        })
    }

    #[graphql(guard = "RequireIdentity")]
    async fn create_team_member(
        &self,
        ctx: &Context<'_>,
        input: CreateTeamMemberInput,
    ) -> Result<TeamMemberObject> {
        let state = ctx.data::<Arc<AppState>>()?;
        let member = state
            .invitations
            .create_team_member(
                identity(ctx)?,
                &input.team_member_name,
                &input.team_member_email_id,
            )
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(member.into())
    }

    /// Create a team member and email them an invitation
    #[graphql(guard = "RequireIdentity")]
    async fn invite_team_member(
        &self,
        ctx: &Context<'_>,
        input: InviteTeamMemberInput,
    ) -> Result<TeamMemberObject> {
        let state = ctx.data::<Arc<AppState>>()?;
        let member = state
            .invitations
            .create_invitation(
                identity(ctx)?,
                &input.team_member_name,
                &input.team_member_email_id,
                input.role.as_deref(),
            )
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(member.into())
    }

    async fn join_organisation(
        &self,
        ctx: &Context<'_>,
        input: JoinOrganisationInput,
    ) -> Result<AuthResult> {
        let state = ctx.data::<Arc<AppState>>()?;
        let outcome = state
            .invitations
            .join_organisation(&input.token, &input.password)
            .await
            .map_err(ApiError::into_graphql)?;
        Ok(outcome.into())
    }

    #[graphql(guard = "RequireIdentity")]
    async fn resend_invitation(
        &self,
        ctx: &Context<'_>,
        input: ResendInvitationInput,
    ) -> Result<bool> {
        let state = ctx.data::<Arc<AppState>>()?;
        let team_member_id = parse_id(&input.team_member_id, "teamMemberId")?;
        state
            .invitations
            .resend_invitation(identity(ctx)?, team_member_id)
            .await
            .map_err(ApiError::into_graphql)
    }
}
