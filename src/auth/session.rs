//! Register, login, logout and the current-user lookup.

use chrono::{TimeZone, Utc};
use sqlx::SqliteExecutor;
use tracing::{info, warn};

use super::{Identity, Password, PasswordService, SessionSubject, TokenCodec};
use crate::api::error::ApiError;
use crate::api::validation::{self, normalize_email};
use crate::db::{self, DbPool, NewUser, Organisation, RevokedToken, TeamMember, User};

pub const DEFAULT_ROLE: &str = "admin";
pub const NEXT_STEP_CREATE_ORGANIZATION: &str = "create-organization";

/// Result of a successful register, login or join
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: User,
    pub token: String,
    /// The user still has to create an organisation
    pub setup_required: bool,
}

impl AuthOutcome {
    pub fn next_step(&self) -> Option<&'static str> {
        self.setup_required.then_some(NEXT_STEP_CREATE_ORGANIZATION)
    }
}

/// A user with its organisation and team member resolved
#[derive(Debug, Clone)]
pub struct UserView {
    pub user: User,
    pub organisation: Option<Organisation>,
    pub team_member: Option<TeamMember>,
}

#[derive(Clone)]
pub struct SessionManager {
    db: DbPool,
    tokens: TokenCodec,
    passwords: PasswordService,
}

impl SessionManager {
    pub fn new(db: DbPool, tokens: TokenCodec, passwords: PasswordService) -> Self {
        Self {
            db,
            tokens,
            passwords,
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        role: Option<&str>,
    ) -> Result<AuthOutcome, ApiError> {
        let email = normalize_email(email);
        validation::validate_registration(&email, password, role)?;

        if User::find_by_email(&self.db, &email).await?.is_some() {
            return Err(ApiError::email_already_exists());
        }

        let user = create_user(
            &self.db,
            &self.passwords,
            &email,
            Password::Plaintext(password.to_string()),
            role.unwrap_or(DEFAULT_ROLE),
            None,
        )
        .await?;
        let token = issue_session(&self.tokens, &self.db, &user).await?;

        info!(user_id = user.id, "User registered");
        Ok(AuthOutcome {
            user,
            token,
            setup_required: true,
        })
    }

    /// Unknown email and wrong password fail with the same error, after the
    /// same amount of hashing work.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthOutcome, ApiError> {
        let email = normalize_email(email);

        let user = match User::find_by_email(&self.db, &email).await? {
            Some(user) => user,
            None => {
                self.passwords.verify_dummy(password);
                warn!("Failed login attempt");
                return Err(ApiError::invalid_credentials());
            }
        };

        if !self.passwords.verify(password, &user.password_hash) {
            warn!(user_id = user.id, "Failed login attempt");
            return Err(ApiError::invalid_credentials());
        }

        let token = issue_session(&self.tokens, &self.db, &user).await?;
        let setup_required = !user.has_organisation();

        info!(user_id = user.id, "User logged in");
        Ok(AuthOutcome {
            user,
            token,
            setup_required,
        })
    }

    /// Revoke the caller's session token until it would have expired anyway
    pub async fn logout(&self, identity: &Identity) -> Result<bool, ApiError> {
        let expires_at = Utc
            .timestamp_opt(identity.expires_at, 0)
            .single()
            .map(db::timestamp)
            .unwrap_or_else(db::now);

        RevokedToken::insert(&self.db, &identity.token_id, &expires_at).await?;
        let purged = RevokedToken::purge_expired(&self.db, &db::now()).await?;
        if purged > 0 {
            tracing::debug!(purged, "Purged expired token revocations");
        }

        info!(user_id = identity.user_id, "User logged out");
        Ok(true)
    }

    /// The caller's own record. There is no way to ask for anyone else's.
    pub async fn me(&self, identity: &Identity) -> Result<UserView, ApiError> {
        let user = User::find_by_id(&self.db, identity.user_id)
            .await?
            .ok_or_else(|| ApiError::unauthenticated("User no longer exists"))?;

        let organisation = match user.organisation_id {
            Some(id) => Organisation::find_by_id(&self.db, id).await?,
            None => None,
        };
        let team_member = TeamMember::find_by_user_id(&self.db, user.id).await?;

        Ok(UserView {
            user,
            organisation,
            team_member,
        })
    }

    /// The caller's organisation; `NO_ORGANISATION` before onboarding
    pub async fn organisation(&self, identity: &Identity) -> Result<Organisation, ApiError> {
        let (_, organisation) = caller_organisation(&self.db, identity).await?;
        Ok(organisation)
    }

    /// Resolve a bearer token into an identity: a valid session token that
    /// has not been revoked.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, ApiError> {
        let claims = self.tokens.verify_session(token)?;
        if RevokedToken::is_revoked(&self.db, &claims.jti).await? {
            return Err(ApiError::invalid_token());
        }
        Ok(Identity::from(claims))
    }

    /// Create an organisation and make the caller its first member. Returns
    /// a fresh token, since the old one carries no organisation.
    pub async fn create_organisation(
        &self,
        identity: &Identity,
        name: &str,
    ) -> Result<(Organisation, String), ApiError> {
        validation::validate_name(name, "Organisation name")
            .map_err(|msg| ApiError::validation_field("organisationName", msg))?;

        let now = db::now();
        let mut tx = self.db.begin().await?;

        let mut user = User::find_by_id(&mut *tx, identity.user_id)
            .await?
            .ok_or_else(|| ApiError::unauthenticated("User no longer exists"))?;
        if user.has_organisation() {
            return Err(already_in_organisation());
        }

        let organisation = Organisation::insert(&mut *tx, name.trim(), &now).await?;
        if User::assign_organisation(&mut *tx, user.id, organisation.id, &now).await? == 0 {
            return Err(already_in_organisation());
        }
        tx.commit().await?;

        user.organisation_id = Some(organisation.id);
        let token = issue_session(&self.tokens, &self.db, &user).await?;

        info!(
            user_id = user.id,
            organisation_id = organisation.id,
            "Organisation created"
        );
        Ok((organisation, token))
    }
}

/// The caller and its organisation, read from the database rather than from
/// token claims, which may predate `createOrganisation`.
pub(crate) async fn caller_organisation(
    db: &DbPool,
    identity: &Identity,
) -> Result<(User, Organisation), ApiError> {
    let user = User::find_by_id(db, identity.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthenticated("User no longer exists"))?;
    let organisation_id = user.organisation_id.ok_or_else(ApiError::no_organisation)?;
    let organisation = Organisation::find_by_id(db, organisation_id)
        .await?
        .ok_or_else(ApiError::no_organisation)?;
    Ok((user, organisation))
}

fn already_in_organisation() -> ApiError {
    ApiError::validation_field("organisationName", "User already belongs to an organisation")
}

/// Insert a user. A UNIQUE violation on the email becomes
/// `EMAIL_ALREADY_EXISTS`.
pub(crate) async fn create_user<'e, E>(
    executor: E,
    passwords: &PasswordService,
    email: &str,
    password: Password,
    role: &str,
    organisation_id: Option<i64>,
) -> Result<User, ApiError>
where
    E: SqliteExecutor<'e>,
{
    let password_hash = password.into_hash(passwords).map_err(|e| {
        tracing::error!("Password hashing failed: {}", e);
        ApiError::internal("Failed to process password")
    })?;

    let new_user = NewUser {
        email,
        password_hash: &password_hash,
        role,
        organisation_id,
    };
    User::insert(executor, &new_user, &db::now())
        .await
        .map_err(|e| {
            if db::is_unique_violation(&e) {
                ApiError::email_already_exists()
            } else {
                e.into()
            }
        })
}

/// Issue a session token for a user, embedding its team member if linked
pub(crate) async fn issue_session<'e, E>(
    tokens: &TokenCodec,
    executor: E,
    user: &User,
) -> Result<String, ApiError>
where
    E: SqliteExecutor<'e>,
{
    let team_member = TeamMember::find_by_user_id(executor, user.id).await?;
    let subject = SessionSubject {
        id: user.id,
        email: user.email.clone(),
        role: user.role.clone(),
        organisation_id: user.organisation_id,
        team_member_id: team_member.map(|tm| tm.id),
    };
    Ok(tokens.issue_session_token(&subject)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;
    use crate::auth::testing;
    use crate::db::testing::temp_db;

    fn manager(pool: &DbPool) -> SessionManager {
        SessionManager::new(pool.clone(), testing::codec(), testing::passwords())
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (_dir, pool) = temp_db().await;
        let sessions = manager(&pool);

        let registered = sessions
            .register("a@x.com", "password-1", None)
            .await
            .unwrap();
        assert!(registered.setup_required);
        assert_eq!(registered.next_step(), Some("create-organization"));
        assert_eq!(registered.user.role, "admin");
        assert_eq!(registered.user.organisation_id, None);

        let wrong = sessions.login("a@x.com", "wrong-password").await.unwrap_err();
        assert_eq!(wrong.code(), ErrorCode::InvalidCredentials);

        let logged_in = sessions.login("a@x.com", "password-1").await.unwrap();
        assert!(logged_in.setup_required);
        assert_ne!(logged_in.token, registered.token);

        let codec = testing::codec();
        let first = codec.verify_session(&registered.token).unwrap();
        let second = codec.verify_session(&logged_in.token).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.id, registered.user.id);
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (_dir, pool) = temp_db().await;
        let sessions = manager(&pool);
        sessions
            .register("a@x.com", "password-1", None)
            .await
            .unwrap();

        let unknown = sessions
            .login("nobody@x.com", "password-1")
            .await
            .unwrap_err();
        let wrong = sessions.login("a@x.com", "password-2").await.unwrap_err();

        assert_eq!(unknown.code(), wrong.code());
        assert_eq!(unknown.message(), wrong.message());
        assert_eq!(unknown.status(), wrong.status());
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let (_dir, pool) = temp_db().await;
        let sessions = manager(&pool);
        sessions
            .register("a@x.com", "password-1", None)
            .await
            .unwrap();

        let err = sessions
            .register(" A@X.com", "password-2", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::EmailAlreadyExists);
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let (_dir, pool) = temp_db().await;
        let err = manager(&pool)
            .register("not-an-email", "short", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let (_dir, pool) = temp_db().await;
        let sessions = manager(&pool);
        let outcome = sessions
            .register("a@x.com", "password-1", None)
            .await
            .unwrap();

        let identity = sessions.authenticate(&outcome.token).await.unwrap();
        assert_eq!(identity.user_id, outcome.user.id);

        assert!(sessions.logout(&identity).await.unwrap());
        let err = sessions.authenticate(&outcome.token).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidToken);

        // Other sessions of the same user are unaffected
        let again = sessions.login("a@x.com", "password-1").await.unwrap();
        assert!(sessions.authenticate(&again.token).await.is_ok());
    }

    #[tokio::test]
    async fn test_me_returns_own_record() {
        let (_dir, pool) = temp_db().await;
        let sessions = manager(&pool);
        let outcome = sessions
            .register("a@x.com", "password-1", None)
            .await
            .unwrap();
        let identity = sessions.authenticate(&outcome.token).await.unwrap();

        let view = sessions.me(&identity).await.unwrap();
        assert_eq!(view.user.id, outcome.user.id);
        assert_eq!(view.user.email, "a@x.com");
        assert!(view.organisation.is_none());
        assert!(view.team_member.is_none());
    }

    #[tokio::test]
    async fn test_create_organisation() {
        let (_dir, pool) = temp_db().await;
        let sessions = manager(&pool);
        let outcome = sessions
            .register("a@x.com", "password-1", None)
            .await
            .unwrap();
        let identity = sessions.authenticate(&outcome.token).await.unwrap();

        let (organisation, token) = sessions
            .create_organisation(&identity, "Acme Realty")
            .await
            .unwrap();
        assert_eq!(organisation.name, "Acme Realty");

        let refreshed = sessions.authenticate(&token).await.unwrap();
        assert_eq!(refreshed.organisation_id, Some(organisation.id));

        let err = sessions
            .create_organisation(&refreshed, "Second Org")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        // The stale token still resolves the organisation from the database
        assert_eq!(
            sessions.organisation(&identity).await.unwrap().id,
            organisation.id
        );

        let login = sessions.login("a@x.com", "password-1").await.unwrap();
        assert!(!login.setup_required);
        assert_eq!(login.next_step(), None);
    }

    #[tokio::test]
    async fn test_create_organisation_requires_name() {
        let (_dir, pool) = temp_db().await;
        let sessions = manager(&pool);
        let outcome = sessions
            .register("a@x.com", "password-1", None)
            .await
            .unwrap();
        let identity = sessions.authenticate(&outcome.token).await.unwrap();

        let err = sessions
            .create_organisation(&identity, "  ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValidationError);

        let err = sessions.organisation(&identity).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NoOrganisation);
    }
}
