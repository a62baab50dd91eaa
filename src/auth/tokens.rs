//! Signed session and invitation tokens.
//!
//! Both kinds are HS256 JWTs carrying a `type` claim. Verification pins the
//! algorithm, checks expiry with zero leeway, and checks the discriminator
//! before the typed claim set is deserialised, so a session token can never
//! be read as an invitation and vice versa.

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Session,
    Invitation,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Session => "session",
            TokenKind::Invitation => "invitation",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token signing secret is empty")]
    MissingSecret,
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("expected a {expected} token")]
    WrongTokenType { expected: TokenKind },
    #[error("token is malformed")]
    Malformed,
    #[error("failed to sign token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for TokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName => TokenError::InvalidSignature,
            _ => TokenError::Malformed,
        }
    }
}

/// Claim sets that carry a `type` discriminator
pub trait TypedClaims: DeserializeOwned {
    const KIND: TokenKind;
}

/// The user a session token is issued for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSubject {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub organisation_id: Option<i64>,
    pub team_member_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub id: i64,
    pub email: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organisation_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_member_id: Option<i64>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl TypedClaims for SessionClaims {
    const KIND: TokenKind = TokenKind::Session;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationClaims {
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub team_member_id: i64,
    pub organisation_id: i64,
    pub email: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

impl TypedClaims for InvitationClaims {
    const KIND: TokenKind = TokenKind::Invitation;
}

/// Issues and verifies tokens with the process-wide secret
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    session_ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &str, session_ttl: Duration) -> Result<Self, TokenError> {
        if secret.trim().is_empty() {
            return Err(TokenError::MissingSecret);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            session_ttl,
        })
    }

    pub fn issue_session_token(&self, subject: &SessionSubject) -> Result<String, TokenError> {
        let iat = Utc::now().timestamp();
        let claims = SessionClaims {
            kind: TokenKind::Session,
            id: subject.id,
            email: subject.email.clone(),
            role: subject.role.clone(),
            organisation_id: subject.organisation_id,
            team_member_id: subject.team_member_id,
            iat,
            exp: iat + self.session_ttl.num_seconds(),
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(&claims)
    }

    pub fn issue_invitation_token(
        &self,
        team_member_id: i64,
        organisation_id: i64,
        email: &str,
        role: &str,
        ttl: Duration,
    ) -> Result<String, TokenError> {
        let iat = Utc::now().timestamp();
        let claims = InvitationClaims {
            kind: TokenKind::Invitation,
            team_member_id,
            organisation_id,
            email: email.to_string(),
            role: role.to_string(),
            iat,
            exp: iat + ttl.num_seconds(),
            jti: Uuid::new_v4().to_string(),
        };
        self.sign(&claims)
    }

    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, TokenError> {
        self.verify(token)
    }

    pub fn verify_invitation(&self, token: &str) -> Result<InvitationClaims, TokenError> {
        self.verify(token)
    }

    /// Verify signature, algorithm and expiry, then the `type` claim, and
    /// only then deserialise the claim set.
    pub fn verify<C: TypedClaims>(&self, token: &str) -> Result<C, TokenError> {
        let data = decode::<serde_json::Value>(token, &self.decoding_key, &self.validation)?;
        let claims = data.claims;

        let kind = claims.get("type").and_then(|v| v.as_str());
        if kind != Some(C::KIND.as_str()) {
            return Err(TokenError::WrongTokenType { expected: C::KIND });
        }

        serde_json::from_value(claims).map_err(|_| TokenError::Malformed)
    }

    fn sign<C: Serialize>(&self, claims: &C) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }
}

/// Hash a token for storage (SHA-256, hex encoded)
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
