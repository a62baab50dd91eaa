//! Invitation records and their status.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteExecutor};

/// Stored invitation status. The only transition is `Pending -> Accepted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
        }
    }
}

impl std::fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for InvitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            _ => Err(format!("Unknown invitation status: {}", s)),
        }
    }
}

/// Status as seen by callers: a pending row past its expiry is `Expired`
/// even though nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectiveStatus {
    Pending,
    Accepted,
    Expired,
}

#[derive(Debug, Clone, FromRow)]
pub struct Invitation {
    pub id: i64,
    pub email: String,
    /// SHA-256 of the invitation token, hex encoded
    pub token: String,
    pub team_member_id: i64,
    pub organisation_id: i64,
    pub invited_by: i64,
    /// Role the invitee gets on joining
    pub role: String,
    pub status: String,
    pub expires_at: String,
    pub accepted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewInvitation<'a> {
    pub email: &'a str,
    pub token_hash: &'a str,
    pub team_member_id: i64,
    pub organisation_id: i64,
    pub invited_by: i64,
    pub role: &'a str,
    pub expires_at: &'a str,
}

impl Invitation {
    pub fn status_enum(&self) -> Option<InvitationStatus> {
        self.status.parse().ok()
    }

    pub fn effective_status(&self, now: &str) -> EffectiveStatus {
        match self.status_enum() {
            Some(InvitationStatus::Accepted) => EffectiveStatus::Accepted,
            Some(InvitationStatus::Pending) if self.expires_at.as_str() > now => {
                EffectiveStatus::Pending
            }
            _ => EffectiveStatus::Expired,
        }
    }

    pub async fn insert<'e, E>(
        executor: E,
        new: &NewInvitation<'_>,
        now: &str,
    ) -> Result<Invitation, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as(
            r#"
            INSERT INTO invitations
                (email, token, team_member_id, organisation_id, invited_by, role, status, expires_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(new.email)
        .bind(new.token_hash)
        .bind(new.team_member_id)
        .bind(new.organisation_id)
        .bind(new.invited_by)
        .bind(new.role)
        .bind(new.expires_at)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// The actionable invitation behind a token: pending, not expired, and
    /// issued for this team member
    pub async fn find_pending<'e, E>(
        executor: E,
        team_member_id: i64,
        token_hash: &str,
        now: &str,
    ) -> Result<Option<Invitation>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as(
            r#"
            SELECT * FROM invitations
            WHERE team_member_id = ? AND token = ? AND status = 'pending' AND expires_at > ?
            "#,
        )
        .bind(team_member_id)
        .bind(token_hash)
        .bind(now)
        .fetch_optional(executor)
        .await
    }

    /// Most recent invitation of a team member, whatever its status
    pub async fn find_latest_for_team_member<'e, E>(
        executor: E,
        team_member_id: i64,
    ) -> Result<Option<Invitation>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as(
            "SELECT * FROM invitations WHERE team_member_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(team_member_id)
        .fetch_optional(executor)
        .await
    }

    /// Claim the invitation behind a token, moving it to `accepted`.
    ///
    /// Rows already accepted or expired are untouched, so `accepted_at` is
    /// written exactly once. Returns the number of rows claimed; zero means
    /// there was nothing left to accept.
    pub async fn accept_pending<'e, E>(
        executor: E,
        team_member_id: i64,
        token_hash: &str,
        now: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET status = 'accepted', accepted_at = ?, updated_at = ?
            WHERE team_member_id = ? AND token = ? AND status = 'pending' AND expires_at > ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(team_member_id)
        .bind(token_hash)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Expire outstanding invitations of a team member (used before resending)
    pub async fn retire_pending<'e, E>(
        executor: E,
        team_member_id: i64,
        now: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET expires_at = ?, updated_at = ?
            WHERE team_member_id = ? AND status = 'pending' AND expires_at > ?
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(team_member_id)
        .bind(now)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_for_organisation<'e, E>(
        executor: E,
        organisation_id: i64,
    ) -> Result<Vec<Invitation>, sqlx::Error>
    where
        E: SqliteExecutor<'e>,
    {
        sqlx::query_as(
            "SELECT * FROM invitations WHERE organisation_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(organisation_id)
        .fetch_all(executor)
        .await
    }
}
