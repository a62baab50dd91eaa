//! Team invitations: create, verify, join and resend.
//!
//! An invitation is a pending row plus a signed invitation token mailed to
//! the invitee. Only the SHA-256 of the token is stored. Joining claims the
//! row (`pending -> accepted`) and links the team member to a user in the
//! same transaction, so a token can be redeemed once.

use chrono::{Duration, Utc};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{info, warn};

use super::session::{caller_organisation, create_user, issue_session};
use super::{hash_token, AuthOutcome, Identity, Password, PasswordService, TokenCodec};
use crate::api::error::ApiError;
use crate::api::validation::{self, normalize_email};
use crate::db::{self, DbPool, Invitation, NewInvitation, Organisation, TeamMember, User};
use crate::notifications::{InvitationEmail, InvitationMailer};

pub const DEFAULT_INVITEE_ROLE: &str = "user";

/// What the join page shows before the invitee picks a password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub name: String,
    pub email: String,
    pub organization_name: String,
    pub role: String,
}

#[derive(Clone)]
pub struct InvitationService {
    db: DbPool,
    tokens: TokenCodec,
    passwords: PasswordService,
    mailer: Arc<dyn InvitationMailer>,
    invitation_ttl: Duration,
    frontend_url: String,
}

impl InvitationService {
    pub fn new(
        db: DbPool,
        tokens: TokenCodec,
        passwords: PasswordService,
        mailer: Arc<dyn InvitationMailer>,
        invitation_ttl: Duration,
        frontend_url: impl Into<String>,
    ) -> Self {
        Self {
            db,
            tokens,
            passwords,
            mailer,
            invitation_ttl,
            frontend_url: frontend_url.into(),
        }
    }

    /// Create a team member in the inviter's organisation and invite it.
    ///
    /// The email goes out after commit. A failed send is logged and does not
    /// undo the invitation.
    pub async fn create_invitation(
        &self,
        inviter: &Identity,
        name: &str,
        email: &str,
        role: Option<&str>,
    ) -> Result<TeamMember, ApiError> {
        let (inviter_user, organisation) = caller_organisation(&self.db, inviter).await?;
        let email = normalize_email(email);
        validation::validate_team_member(name, &email, role)?;
        let role = role.unwrap_or(DEFAULT_INVITEE_ROLE);

        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let team_member =
            TeamMember::insert(&mut *tx, organisation.id, name.trim(), &email, &db::timestamp(now))
                .await?;
        let token = self
            .store_invitation(&mut tx, &team_member, inviter_user.id, role, now)
            .await?;
        tx.commit().await?;

        info!(
            team_member_id = team_member.id,
            organisation_id = organisation.id,
            invited_by = inviter_user.id,
            "Invitation created"
        );

        self.send_invitation_email(&team_member, &organisation, &inviter_user.email, &token)
            .await;
        Ok(team_member)
    }

    /// Check an invitation token without changing anything
    pub async fn verify_invitation_token(&self, token: &str) -> Result<TokenInfo, ApiError> {
        let claims = self.tokens.verify_invitation(token)?;

        let team_member = TeamMember::find_by_id(&self.db, claims.team_member_id)
            .await?
            .ok_or_else(ApiError::team_member_not_found)?;
        if team_member.is_linked() {
            return Err(ApiError::already_accepted());
        }

        Invitation::find_pending(&self.db, team_member.id, &hash_token(token), &db::now())
            .await?
            .ok_or_else(ApiError::invitation_not_found_or_expired)?;

        let organisation = Organisation::find_by_id(&self.db, team_member.organisation_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Organisation not found"))?;

        Ok(TokenInfo {
            name: team_member.name,
            email: team_member.email,
            organization_name: organisation.name,
            role: claims.role,
        })
    }

    /// Redeem an invitation token.
    ///
    /// The claim UPDATE is the first statement of the transaction, so two
    /// concurrent joins serialise on SQLite's write lock and the second sees
    /// nothing left to claim.
    pub async fn join_organisation(
        &self,
        token: &str,
        password: &str,
    ) -> Result<AuthOutcome, ApiError> {
        let claims = self.tokens.verify_invitation(token)?;
        validation::validate_password(password)
            .map_err(|msg| ApiError::validation_field("password", msg))?;

        TeamMember::find_by_id(&self.db, claims.team_member_id)
            .await?
            .ok_or_else(ApiError::team_member_not_found)?;

        // Hash outside the transaction so the write lock is held briefly
        let password_hash = self.passwords.hash(password).map_err(|e| {
            tracing::error!("Password hashing failed: {}", e);
            ApiError::internal("Failed to process password")
        })?;

        let now = db::now();
        let mut tx = self.db.begin().await?;

        let claimed =
            Invitation::accept_pending(&mut *tx, claims.team_member_id, &hash_token(token), &now)
                .await?;
        if claimed == 0 {
            return Err(ApiError::invitation_not_found_or_expired());
        }

        let team_member = TeamMember::find_by_id(&mut *tx, claims.team_member_id)
            .await?
            .ok_or_else(ApiError::team_member_not_found)?;

        let user = match User::find_by_email(&mut *tx, &claims.email).await? {
            None => {
                let user = create_user(
                    &mut *tx,
                    &self.passwords,
                    &claims.email,
                    Password::Hashed(password_hash),
                    &claims.role,
                    Some(claims.organisation_id),
                )
                .await?;
                link(&mut tx, &team_member, &user, &now).await?;
                user
            }
            Some(user) if user.organisation_id == Some(claims.organisation_id) => {
                match team_member.user_id {
                    None => link(&mut tx, &team_member, &user, &now).await?,
                    Some(linked) if linked == user.id => {}
                    Some(_) => return Err(ApiError::already_accepted()),
                }
                user
            }
            Some(user) => {
                warn!(
                    user_id = user.id,
                    organisation_id = claims.organisation_id,
                    "Invitation email belongs to another organisation"
                );
                return Err(ApiError::email_belongs_to_different_organisation());
            }
        };

        tx.commit().await?;

        let session = issue_session(&self.tokens, &self.db, &user).await?;
        info!(
            user_id = user.id,
            team_member_id = team_member.id,
            organisation_id = claims.organisation_id,
            "Invitation accepted"
        );

        Ok(AuthOutcome {
            setup_required: !user.has_organisation(),
            user,
            token: session,
        })
    }

    /// Issue a fresh invitation for an unlinked team member. Outstanding
    /// invitations stop working.
    pub async fn resend_invitation(
        &self,
        inviter: &Identity,
        team_member_id: i64,
    ) -> Result<bool, ApiError> {
        let (inviter_user, organisation) = caller_organisation(&self.db, inviter).await?;

        let team_member = TeamMember::find_by_id(&self.db, team_member_id)
            .await?
            .ok_or_else(ApiError::team_member_not_found)?;
        if team_member.organisation_id != organisation.id {
            return Err(ApiError::unauthorized(
                "Team member belongs to a different organisation",
            ));
        }
        if team_member.is_linked() {
            return Err(ApiError::already_accepted());
        }

        let role = Invitation::find_latest_for_team_member(&self.db, team_member.id)
            .await?
            .map(|invitation| invitation.role)
            .unwrap_or_else(|| DEFAULT_INVITEE_ROLE.to_string());

        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        let retired = Invitation::retire_pending(&mut *tx, team_member.id, &db::timestamp(now)).await?;
        let token = self
            .store_invitation(&mut tx, &team_member, inviter_user.id, &role, now)
            .await?;
        tx.commit().await?;

        info!(
            team_member_id = team_member.id,
            retired, "Invitation resent"
        );

        self.send_invitation_email(&team_member, &organisation, &inviter_user.email, &token)
            .await;
        Ok(true)
    }

    /// Add a team member without inviting it
    pub async fn create_team_member(
        &self,
        identity: &Identity,
        name: &str,
        email: &str,
    ) -> Result<TeamMember, ApiError> {
        let (_, organisation) = caller_organisation(&self.db, identity).await?;
        let email = normalize_email(email);
        validation::validate_team_member(name, &email, None)?;

        let team_member =
            TeamMember::insert(&self.db, organisation.id, name.trim(), &email, &db::now()).await?;
        info!(team_member_id = team_member.id, "Team member created");
        Ok(team_member)
    }

    pub async fn team_members(&self, identity: &Identity) -> Result<Vec<TeamMember>, ApiError> {
        let (_, organisation) = caller_organisation(&self.db, identity).await?;
        Ok(TeamMember::list_for_organisation(&self.db, organisation.id).await?)
    }

    /// A team member of the caller's organisation. Members of other
    /// organisations are reported as missing.
    pub async fn team_member(&self, identity: &Identity, id: i64) -> Result<TeamMember, ApiError> {
        let (_, organisation) = caller_organisation(&self.db, identity).await?;
        TeamMember::find_by_id(&self.db, id)
            .await?
            .filter(|tm| tm.organisation_id == organisation.id)
            .ok_or_else(|| ApiError::not_found("Team member not found"))
    }

    pub async fn invitations(&self, identity: &Identity) -> Result<Vec<Invitation>, ApiError> {
        let (_, organisation) = caller_organisation(&self.db, identity).await?;
        Ok(Invitation::list_for_organisation(&self.db, organisation.id).await?)
    }

    /// Sign an invitation token and insert its pending row
    async fn store_invitation(
        &self,
        conn: &mut SqliteConnection,
        team_member: &TeamMember,
        invited_by: i64,
        role: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<String, ApiError> {
        let token = self.tokens.issue_invitation_token(
            team_member.id,
            team_member.organisation_id,
            &team_member.email,
            role,
            self.invitation_ttl,
        )?;
        let token_hash = hash_token(&token);
        let expires_at = db::timestamp(now + self.invitation_ttl);

        let new_invitation = NewInvitation {
            email: &team_member.email,
            token_hash: &token_hash,
            team_member_id: team_member.id,
            organisation_id: team_member.organisation_id,
            invited_by,
            role,
            expires_at: &expires_at,
        };
        Invitation::insert(&mut *conn, &new_invitation, &db::timestamp(now)).await?;
        Ok(token)
    }

    fn accept_url(&self, token: &str) -> String {
        format!("{}/join?token={}", self.frontend_url.trim_end_matches('/'), token)
    }

    async fn send_invitation_email(
        &self,
        team_member: &TeamMember,
        organisation: &Organisation,
        inviter_email: &str,
        token: &str,
    ) {
        let accept_url = self.accept_url(token);
        let email = InvitationEmail {
            to_email: &team_member.email,
            to_name: &team_member.name,
            organisation_name: &organisation.name,
            inviter_email,
            accept_url: &accept_url,
            expires_in_days: self.invitation_ttl.num_days(),
        };

        if let Err(e) = self.mailer.send_invitation(&email).await {
            warn!(
                team_member_id = team_member.id,
                "Failed to send invitation email: {}", e
            );
        }
    }
}

/// Link a team member to a user inside the join transaction
async fn link(
    conn: &mut SqliteConnection,
    team_member: &TeamMember,
    user: &User,
    now: &str,
) -> Result<(), ApiError> {
    match TeamMember::link_user(&mut *conn, team_member.id, user.id, now).await {
        Ok(0) => Err(ApiError::already_accepted()),
        Ok(_) => Ok(()),
        Err(e) if db::is_unique_violation(&e) => Err(ApiError::validation_field(
            "email",
            "User is already linked to another team member",
        )),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::auth::{testing, SessionManager};
    use crate::db::testing::temp_db;
    use crate::db::InvitationStatus;
    use crate::notifications::testing::RecordingMailer;

    struct Fixture {
        _dir: tempfile::TempDir,
        pool: DbPool,
        sessions: SessionManager,
        invitations: InvitationService,
        mailer: Arc<RecordingMailer>,
    }

    async fn fixture_with(mailer: RecordingMailer) -> Fixture {
        let (dir, pool) = temp_db().await;
        let mailer = Arc::new(mailer);
        let sessions = SessionManager::new(pool.clone(), testing::codec(), testing::passwords());
        let invitations = InvitationService::new(
            pool.clone(),
            testing::codec(),
            testing::passwords(),
            mailer.clone(),
            Duration::days(7),
            "http://localhost:3000",
        );
        Fixture {
            _dir: dir,
            pool,
            sessions,
            invitations,
            mailer,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(RecordingMailer::default()).await
    }

    /// Register a user and give it an organisation
    async fn admin(fx: &Fixture, email: &str, org: &str) -> (Identity, Organisation) {
        let outcome = fx
            .sessions
            .register(email, "password-1", None)
            .await
            .unwrap();
        let identity = fx.sessions.authenticate(&outcome.token).await.unwrap();
        let (organisation, token) = fx
            .sessions
            .create_organisation(&identity, org)
            .await
            .unwrap();
        let identity = fx.sessions.authenticate(&token).await.unwrap();
        (identity, organisation)
    }

    /// Token from the accept URL of the most recent email
    fn last_token(fx: &Fixture) -> String {
        let sent = fx.mailer.sent();
        let url = &sent.last().expect("an invitation email").accept_url;
        url.split("token=").nth(1).unwrap().to_string()
    }

    async fn invitation_rows(pool: &DbPool, team_member_id: i64) -> Vec<Invitation> {
        sqlx::query_as("SELECT * FROM invitations WHERE team_member_id = ? ORDER BY id")
            .bind(team_member_id)
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_verify_join() {
        let fx = fixture().await;
        let (inviter, org) = admin(&fx, "a@x.com", "Acme").await;

        let team_member = fx
            .invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", None)
            .await
            .unwrap();
        assert_eq!(team_member.organisation_id, org.id);
        assert_eq!(team_member.user_id, None);

        let rows = invitation_rows(&fx.pool, team_member.id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status_enum(), Some(InvitationStatus::Pending));
        assert_eq!(rows[0].invited_by, inviter.user_id);

        let sent = fx.mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to_email, "bob@y.com");
        assert_eq!(sent[0].organisation_name, "Acme");
        assert_eq!(sent[0].inviter_email, "a@x.com");
        assert!(sent[0]
            .accept_url
            .starts_with("http://localhost:3000/join?token="));

        let token = last_token(&fx);
        // Only the hash is stored
        assert_eq!(rows[0].token, hash_token(&token));

        let info = fx.invitations.verify_invitation_token(&token).await.unwrap();
        assert_eq!(
            info,
            TokenInfo {
                name: "Bob".to_string(),
                email: "bob@y.com".to_string(),
                organization_name: "Acme".to_string(),
                role: "user".to_string(),
            }
        );

        let joined = fx
            .invitations
            .join_organisation(&token, "password-2")
            .await
            .unwrap();
        assert_eq!(joined.user.email, "bob@y.com");
        assert_eq!(joined.user.organisation_id, Some(org.id));
        assert_eq!(joined.user.role, "user");
        assert!(!joined.setup_required);

        let claims = testing::codec().verify_session(&joined.token).unwrap();
        assert_eq!(claims.id, joined.user.id);
        assert_eq!(claims.organisation_id, Some(org.id));
        assert_eq!(claims.team_member_id, Some(team_member.id));

        let linked = TeamMember::find_by_id(&fx.pool, team_member.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linked.user_id, Some(joined.user.id));

        let rows = invitation_rows(&fx.pool, team_member.id).await;
        assert_eq!(rows[0].status_enum(), Some(InvitationStatus::Accepted));
        assert!(rows[0].accepted_at.is_some());

        // The new account logs in with the chosen password
        let login = fx.sessions.login("bob@y.com", "password-2").await.unwrap();
        assert_eq!(login.user.id, joined.user.id);

        // Replaying the token after the link is reported as accepted
        let err = fx
            .invitations
            .verify_invitation_token(&token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyAccepted);
    }

    #[tokio::test]
    async fn test_create_invitation_requires_organisation() {
        let fx = fixture().await;
        let outcome = fx
            .sessions
            .register("a@x.com", "password-1", None)
            .await
            .unwrap();
        let identity = fx.sessions.authenticate(&outcome.token).await.unwrap();

        let err = fx
            .invitations
            .create_invitation(&identity, "Bob", "bob@y.com", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoOrganisation);
        assert!(fx.mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_email_failure_keeps_invitation() {
        let fx = fixture_with(RecordingMailer::failing()).await;
        let (inviter, _) = admin(&fx, "a@x.com", "Acme").await;

        let team_member = fx
            .invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", Some("admin"))
            .await
            .unwrap();

        let rows = invitation_rows(&fx.pool, team_member.id).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].role, "admin");
    }

    #[tokio::test]
    async fn test_session_token_is_not_an_invitation() {
        let fx = fixture().await;
        let (inviter, _) = admin(&fx, "a@x.com", "Acme").await;
        let session = fx.sessions.login("a@x.com", "password-1").await.unwrap();

        fx.invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", None)
            .await
            .unwrap();

        let err = fx
            .invitations
            .verify_invitation_token(&session.token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidToken);

        let err = fx
            .invitations
            .join_organisation(&session.token, "password-2")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidToken);
    }

    #[tokio::test]
    async fn test_sequential_double_join() {
        let fx = fixture().await;
        let (inviter, _) = admin(&fx, "a@x.com", "Acme").await;
        let team_member = fx
            .invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", None)
            .await
            .unwrap();
        let token = last_token(&fx);

        let first = fx
            .invitations
            .join_organisation(&token, "password-2")
            .await
            .unwrap();
        let accepted_at = invitation_rows(&fx.pool, team_member.id).await[0]
            .accepted_at
            .clone();

        let err = fx
            .invitations
            .join_organisation(&token, "password-2")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvitationNotFoundOrExpired);

        // The failed replay changed nothing
        let rows = invitation_rows(&fx.pool, team_member.id).await;
        assert_eq!(rows[0].accepted_at, accepted_at);
        let linked = TeamMember::find_by_id(&fx.pool, team_member.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linked.user_id, Some(first.user.id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_join_has_one_winner() {
        let fx = fixture().await;
        let (inviter, _) = admin(&fx, "a@x.com", "Acme").await;
        let team_member = fx
            .invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", None)
            .await
            .unwrap();
        let token = last_token(&fx);

        let (first, second) = tokio::join!(
            fx.invitations.join_organisation(&token, "password-2"),
            fx.invitations.join_organisation(&token, "password-3"),
        );

        let results = [first, second];
        let winners: Vec<&AuthOutcome> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);

        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(
            loser.code(),
            ErrorCode::InvitationNotFoundOrExpired | ErrorCode::AlreadyAccepted
        ));

        let users: Vec<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE email = 'bob@y.com'")
            .fetch_all(&fx.pool)
            .await
            .unwrap();
        assert_eq!(users.len(), 1);

        let linked = TeamMember::find_by_id(&fx.pool, team_member.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(linked.user_id, Some(winners[0].user.id));
    }

    #[tokio::test]
    async fn test_expired_pending_invitation_is_not_found() {
        let fx = fixture().await;
        let (inviter, _) = admin(&fx, "a@x.com", "Acme").await;
        let team_member = fx
            .invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", None)
            .await
            .unwrap();
        let token = last_token(&fx);

        // The row expires while the token itself is still valid
        sqlx::query("UPDATE invitations SET expires_at = '2000-01-01T00:00:00Z' WHERE team_member_id = ?")
            .bind(team_member.id)
            .execute(&fx.pool)
            .await
            .unwrap();

        let err = fx
            .invitations
            .verify_invitation_token(&token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvitationNotFoundOrExpired);

        let err = fx
            .invitations
            .join_organisation(&token, "password-2")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvitationNotFoundOrExpired);

        let rows = invitation_rows(&fx.pool, team_member.id).await;
        assert_eq!(rows[0].status_enum(), Some(InvitationStatus::Pending));
        assert!(User::find_by_email(&fx.pool, "bob@y.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_email_in_other_organisation_is_rejected() {
        let fx = fixture().await;
        let (inviter, _) = admin(&fx, "a@x.com", "Acme").await;
        admin(&fx, "bob@y.com", "Globex").await;

        let team_member = fx
            .invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", None)
            .await
            .unwrap();
        let token = last_token(&fx);

        let err = fx
            .invitations
            .join_organisation(&token, "password-2")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::EmailBelongsToDifferentOrganisation);

        // Rolled back: still pending, still unlinked
        let rows = invitation_rows(&fx.pool, team_member.id).await;
        assert_eq!(rows[0].status_enum(), Some(InvitationStatus::Pending));
        assert!(rows[0].accepted_at.is_none());
        let tm = TeamMember::find_by_id(&fx.pool, team_member.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!tm.is_linked());
    }

    #[tokio::test]
    async fn test_user_without_organisation_is_rejected() {
        let fx = fixture().await;
        let (inviter, _) = admin(&fx, "a@x.com", "Acme").await;
        fx.sessions
            .register("bob@y.com", "password-1", None)
            .await
            .unwrap();

        fx.invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", None)
            .await
            .unwrap();
        let token = last_token(&fx);

        let err = fx
            .invitations
            .join_organisation(&token, "password-2")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::EmailBelongsToDifferentOrganisation);
    }

    #[tokio::test]
    async fn test_existing_same_org_user_is_linked() {
        let fx = fixture().await;
        let (inviter, org) = admin(&fx, "a@x.com", "Acme").await;

        // Bob was added to the organisation by an earlier invitation
        fx.invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", None)
            .await
            .unwrap();
        let first_token = last_token(&fx);
        let bob = fx
            .invitations
            .join_organisation(&first_token, "password-2")
            .await
            .unwrap();

        // The inviter's own seat is a separate, unlinked team member
        let seat = fx
            .invitations
            .create_team_member(&inviter, "Alice", "a@x.com")
            .await
            .unwrap();
        fx.invitations
            .resend_invitation(&inviter, seat.id)
            .await
            .unwrap();
        let seat_token = last_token(&fx);

        let joined = fx
            .invitations
            .join_organisation(&seat_token, "ignored-password")
            .await
            .unwrap();
        assert_eq!(joined.user.id, inviter.user_id);
        assert_eq!(joined.user.organisation_id, Some(org.id));

        // Password untouched
        assert!(fx.sessions.login("a@x.com", "password-1").await.is_ok());
        assert!(fx
            .sessions
            .login("a@x.com", "ignored-password")
            .await
            .is_err());

        let tm = TeamMember::find_by_id(&fx.pool, seat.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tm.user_id, Some(inviter.user_id));
        assert_ne!(bob.user.id, inviter.user_id);
    }

    #[tokio::test]
    async fn test_join_when_already_linked_to_same_user() {
        let fx = fixture().await;
        let (inviter, org) = admin(&fx, "a@x.com", "Acme").await;

        let seat = fx
            .invitations
            .create_team_member(&inviter, "Alice", "a@x.com")
            .await
            .unwrap();
        fx.invitations
            .resend_invitation(&inviter, seat.id)
            .await
            .unwrap();
        let token = last_token(&fx);

        // Linked out of band while the invitation is still pending
        let linked = TeamMember::link_user(&fx.pool, seat.id, inviter.user_id, &db::now())
            .await
            .unwrap();
        assert_eq!(linked, 1);

        let joined = fx
            .invitations
            .join_organisation(&token, "password-1")
            .await
            .unwrap();
        assert_eq!(joined.user.id, inviter.user_id);
        assert_eq!(joined.user.organisation_id, Some(org.id));
        assert!(!joined.setup_required);

        let identity = fx.sessions.authenticate(&joined.token).await.unwrap();
        assert_eq!(identity.user_id, inviter.user_id);

        let rows = invitation_rows(&fx.pool, seat.id).await;
        assert_eq!(
            rows.last().unwrap().status_enum(),
            Some(InvitationStatus::Accepted)
        );
    }

    #[tokio::test]
    async fn test_resend_invitation() {
        let fx = fixture().await;
        let (inviter, _) = admin(&fx, "a@x.com", "Acme").await;
        let team_member = fx
            .invitations
            .create_invitation(&inviter, "Bob", "bob@y.com", Some("admin"))
            .await
            .unwrap();
        let old_token = last_token(&fx);

        assert!(fx
            .invitations
            .resend_invitation(&inviter, team_member.id)
            .await
            .unwrap());
        let new_token = last_token(&fx);
        assert_ne!(old_token, new_token);
        assert_eq!(fx.mailer.sent().len(), 2);

        // The old link stops working, the new one keeps the role
        let err = fx
            .invitations
            .verify_invitation_token(&old_token)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvitationNotFoundOrExpired);

        let info = fx
            .invitations
            .verify_invitation_token(&new_token)
            .await
            .unwrap();
        assert_eq!(info.role, "admin");

        fx.invitations
            .join_organisation(&new_token, "password-2")
            .await
            .unwrap();
        let err = fx
            .invitations
            .resend_invitation(&inviter, team_member.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyAccepted);
    }

    #[tokio::test]
    async fn test_resend_is_organisation_scoped() {
        let fx = fixture().await;
        let (acme, _) = admin(&fx, "a@x.com", "Acme").await;
        let (globex, _) = admin(&fx, "g@z.com", "Globex").await;

        let team_member = fx
            .invitations
            .create_invitation(&acme, "Bob", "bob@y.com", None)
            .await
            .unwrap();

        let err = fx
            .invitations
            .resend_invitation(&globex, team_member.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);

        let err = fx
            .invitations
            .resend_invitation(&acme, 9999)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TeamMemberNotFound);
    }

    #[tokio::test]
    async fn test_team_member_queries_are_scoped() {
        let fx = fixture().await;
        let (acme, _) = admin(&fx, "a@x.com", "Acme").await;
        let (globex, _) = admin(&fx, "g@z.com", "Globex").await;

        let bob = fx
            .invitations
            .create_team_member(&acme, "Bob", "bob@y.com")
            .await
            .unwrap();
        fx.invitations
            .create_invitation(&acme, "Carol", "carol@y.com", None)
            .await
            .unwrap();

        let members = fx.invitations.team_members(&acme).await.unwrap();
        let names: Vec<&str> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Bob", "Carol"]);
        assert!(fx.invitations.team_members(&globex).await.unwrap().is_empty());

        assert_eq!(
            fx.invitations.team_member(&acme, bob.id).await.unwrap().id,
            bob.id
        );
        let err = fx
            .invitations
            .team_member(&globex, bob.id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        assert_eq!(fx.invitations.invitations(&acme).await.unwrap().len(), 1);
        assert!(fx.invitations.invitations(&globex).await.unwrap().is_empty());
    }
}
