pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod graphql;
pub mod notifications;

pub use db::DbPool;

use anyhow::Context as _;
use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::auth::{InvitationService, PasswordService, SessionManager, TokenCodec};
use crate::notifications::InvitationMailer;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub sessions: SessionManager,
    pub invitations: InvitationService,
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, mailer: Arc<dyn InvitationMailer>) -> anyhow::Result<Self> {
        let tokens = TokenCodec::new(
            &config.auth.jwt_secret,
            chrono::Duration::days(config.auth.session_ttl_days),
        )
        .context("Invalid JWT configuration")?;
        let passwords = PasswordService::new(&config.auth.password_hashing)
            .context("Invalid password hashing configuration")?;

        let sessions = SessionManager::new(db.clone(), tokens.clone(), passwords.clone());
        let invitations = InvitationService::new(
            db.clone(),
            tokens,
            passwords,
            mailer,
            chrono::Duration::days(config.auth.invitation_ttl_days),
            config.server.frontend_url.clone(),
        );
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));

        Ok(Self {
            config,
            db,
            sessions,
            invitations,
            rate_limiter,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::PasswordHashingConfig;
    use crate::notifications::testing::RecordingMailer;
    use tempfile::TempDir;

    pub struct TestApp {
        pub _dir: TempDir,
        pub state: Arc<AppState>,
        pub mailer: Arc<RecordingMailer>,
    }

    /// Application state over a fresh database, with cheap hashing and a
    /// recording mailer
    pub async fn test_app() -> TestApp {
        test_app_with(|_| {}).await
    }

    pub async fn test_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
        let (dir, db) = crate::db::testing::temp_db().await;
        let mut config = Config::default();
        config.auth.jwt_secret = crate::auth::testing::SECRET.to_string();
        config.auth.password_hashing = PasswordHashingConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        };
        config.rate_limit.enabled = false;
        configure(&mut config);

        let mailer = Arc::new(RecordingMailer::default());
        let state = AppState::new(config, db, mailer.clone()).unwrap();
        TestApp {
            _dir: dir,
            state: Arc::new(state),
            mailer,
        }
    }
}
