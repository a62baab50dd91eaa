//! GraphQL object and input types.
//!
//! Database rows are mapped into these at the resolver boundary, so things
//! like password hashes and invitation token hashes never reach the schema.

use async_graphql::{Enum, InputObject, SimpleObject, ID};
use serde::Serialize;

use crate::auth::{AuthOutcome, TokenInfo as InvitationTokenInfo, UserView};
use crate::config::Config;
use crate::db::{self, EffectiveStatus};

#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "Organisation")]
pub struct OrganisationObject {
    pub id: ID,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<db::Organisation> for OrganisationObject {
    fn from(org: db::Organisation) -> Self {
        Self {
            id: ID::from(org.id.to_string()),
            name: org.name,
            created_at: org.created_at,
            updated_at: org.updated_at,
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "TeamMember")]
pub struct TeamMemberObject {
    pub id: ID,
    pub organisation_id: ID,
    pub name: String,
    pub email: String,
    /// Set once the invitation has been accepted
    pub user_id: Option<ID>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<db::TeamMember> for TeamMemberObject {
    fn from(tm: db::TeamMember) -> Self {
        Self {
            id: ID::from(tm.id.to_string()),
            organisation_id: ID::from(tm.organisation_id.to_string()),
            name: tm.name,
            email: tm.email,
            user_id: tm.user_id.map(|id| ID::from(id.to_string())),
            created_at: tm.created_at,
            updated_at: tm.updated_at,
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "User")]
pub struct UserObject {
    pub id: ID,
    pub email: String,
    pub role: String,
    pub organisation_id: Option<ID>,
    pub organisation: Option<OrganisationObject>,
    pub team_member: Option<TeamMemberObject>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<db::User> for UserObject {
    fn from(user: db::User) -> Self {
        Self {
            id: ID::from(user.id.to_string()),
            email: user.email,
            role: user.role,
            organisation_id: user.organisation_id.map(|id| ID::from(id.to_string())),
            organisation: None,
            team_member: None,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

impl From<UserView> for UserObject {
    fn from(view: UserView) -> Self {
        let mut user = UserObject::from(view.user);
        user.organisation = view.organisation.map(Into::into);
        user.team_member = view.team_member.map(Into::into);
        user
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
#[graphql(name = "InvitationStatus")]
pub enum InvitationStatusKind {
    Pending,
    Accepted,
    Expired,
}

impl From<EffectiveStatus> for InvitationStatusKind {
    fn from(status: EffectiveStatus) -> Self {
        match status {
            EffectiveStatus::Pending => InvitationStatusKind::Pending,
            EffectiveStatus::Accepted => InvitationStatusKind::Accepted,
            EffectiveStatus::Expired => InvitationStatusKind::Expired,
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
#[graphql(name = "Invitation")]
pub struct InvitationObject {
    pub id: ID,
    pub email: String,
    pub team_member_id: ID,
    pub invited_by: ID,
    pub role: String,
    pub status: InvitationStatusKind,
    pub expires_at: String,
    pub accepted_at: Option<String>,
    pub created_at: String,
}

impl InvitationObject {
    /// Map a row, deriving `EXPIRED` from `now`
    pub fn from_row(invitation: db::Invitation, now: &str) -> Self {
        let status = invitation.effective_status(now).into();
        Self {
            id: ID::from(invitation.id.to_string()),
            email: invitation.email,
            team_member_id: ID::from(invitation.team_member_id.to_string()),
            invited_by: ID::from(invitation.invited_by.to_string()),
            role: invitation.role,
            status,
            expires_at: invitation.expires_at,
            accepted_at: invitation.accepted_at,
            created_at: invitation.created_at,
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
pub struct AuthResult {
    pub user: UserObject,
    pub token: String,
    pub setup_required: Option<bool>,
    pub next_step: Option<String>,
}

impl From<AuthOutcome> for AuthResult {
    fn from(outcome: AuthOutcome) -> Self {
        let next_step = outcome.next_step().map(str::to_string);
        Self {
            setup_required: Some(outcome.setup_required),
            next_step,
            token: outcome.token,
            user: outcome.user.into(),
        }
    }
}

#[derive(Debug, Clone, SimpleObject)]
pub struct CreateOrganisationResult {
    pub organisation: OrganisationObject,
    /// Replaces the caller's previous token
    pub token: String,
}

#[derive(Debug, Clone, SimpleObject)]
pub struct TokenInfo {
    pub name: String,
    pub email: String,
    pub organization_name: String,
    pub role: String,
}

impl From<InvitationTokenInfo> for TokenInfo {
    fn from(info: InvitationTokenInfo) -> Self {
        Self {
            name: info.name,
            email: info.email,
            organization_name: info.organization_name,
            role: info.role,
        }
    }
}

#[derive(Debug, Clone, Serialize, SimpleObject)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub env: String,
}

impl HealthStatus {
    pub fn current(config: &Config) -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: db::now(),
            env: config.server.environment.clone(),
        }
    }
}

#[derive(Debug, InputObject)]
pub struct RegisterInput {
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

#[derive(Debug, InputObject)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, InputObject)]
pub struct CreateOrganisationInput {
    pub organisation_name: String,
}

#[derive(Debug, InputObject)]
pub struct CreateTeamMemberInput {
    pub team_member_name: String,
    pub team_member_email_id: String,
}

#[derive(Debug, InputObject)]
pub struct InviteTeamMemberInput {
    pub team_member_name: String,
    pub team_member_email_id: String,
    pub role: Option<String>,
}

#[derive(Debug, InputObject)]
pub struct JoinOrganisationInput {
    pub token: String,
    pub password: String,
}

#[derive(Debug, InputObject)]
pub struct ResendInvitationInput {
    pub team_member_id: ID,
}
