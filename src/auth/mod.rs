//! Authentication core: tokens, passwords, sessions and invitations.

pub mod invitations;
pub mod password;
pub mod session;
pub mod tokens;

pub use invitations::{InvitationService, TokenInfo};
pub use password::{Password, PasswordError, PasswordService};
pub use session::{AuthOutcome, SessionManager, UserView};
pub use tokens::{
    hash_token, InvitationClaims, SessionClaims, SessionSubject, TokenCodec, TokenError,
    TokenKind,
};

/// The authenticated caller of one request, built from a verified session
/// token. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub email: String,
    pub role: String,
    pub organisation_id: Option<i64>,
    pub team_member_id: Option<i64>,
    /// `jti` of the session token, used to revoke it on logout
    pub token_id: String,
    /// Unix timestamp at which the session token expires
    pub expires_at: i64,
}

impl From<SessionClaims> for Identity {
    fn from(claims: SessionClaims) -> Self {
        Self {
            user_id: claims.id,
            email: claims.email,
            role: claims.role,
            organisation_id: claims.organisation_id,
            team_member_id: claims.team_member_id,
            token_id: claims.jti,
            expires_at: claims.exp,
        }
    }
}
