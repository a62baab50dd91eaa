use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Reported by the health endpoint ("development", "production", ...)
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Base URL of the web frontend, used to build invitation links
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
    /// Serve GraphiQL on GET /graphql
    #[serde(default = "default_playground")]
    pub playground: bool,
    /// Comma-separated list of allowed CORS origins, or "*"
    #[serde(default = "default_cors_allow_origins")]
    pub cors_allow_origins: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            frontend_url: default_frontend_url(),
            playground: default_playground(),
            cors_allow_origins: default_cors_allow_origins(),
        }
    }
}

impl ServerConfig {
    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors_allow_origins
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_playground() -> bool {
    true
}

fn default_cors_allow_origins() -> String {
    "*".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits for the SQLite write lock before failing
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/crmdash.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret for session and invitation tokens
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_session_ttl_days")]
    pub session_ttl_days: i64,
    #[serde(default = "default_invitation_ttl_days")]
    pub invitation_ttl_days: i64,
    #[serde(default)]
    pub password_hashing: PasswordHashingConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            session_ttl_days: default_session_ttl_days(),
            invitation_ttl_days: default_invitation_ttl_days(),
            password_hashing: PasswordHashingConfig::default(),
        }
    }
}

fn default_session_ttl_days() -> i64 {
    7
}

fn default_invitation_ttl_days() -> i64 {
    7
}

/// Argon2id cost parameters. Raise them until hashing takes roughly
/// 50-100ms on the production host.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordHashingConfig {
    #[serde(default = "default_memory_kib")]
    pub memory_kib: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

impl Default for PasswordHashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: default_memory_kib(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

fn default_memory_kib() -> u32 {
    19 * 1024
}

fn default_iterations() -> u32 {
    2
}

fn default_parallelism() -> u32 {
    1
}

/// SMTP settings for invitation emails. When `smtp_host` or `from_address`
/// is missing, emails are written to the log instead of being sent.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    #[serde(default = "default_smtp_tls")]
    pub smtp_tls: bool,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_username: None,
            smtp_password: None,
            smtp_tls: default_smtp_tls(),
            from_address: None,
            from_name: default_from_name(),
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_tls() -> bool {
    true
}

fn default_from_name() -> String {
    "CRM Dashboard".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Authenticated GraphQL requests per window
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Public operations (login, register, invitation) per window
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            window_seconds: default_window_seconds(),
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}

fn default_window_seconds() -> u64 {
    60
}

fn default_api_requests() -> u32 {
    300
}

fn default_auth_requests() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Environment variables win over the file so secrets can stay out of it
    fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("CRMDASH_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(path) = std::env::var("CRMDASH_DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Ok(env) = std::env::var("CRMDASH_ENV") {
            self.server.environment = env;
        }
        if let Ok(url) = std::env::var("CRMDASH_FRONTEND_URL") {
            self.server.frontend_url = url;
        }
        if let Some(port) = std::env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Ok(password) = std::env::var("CRMDASH_SMTP_PASSWORD") {
            self.email.smtp_password = Some(password);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            bail!("auth.jwt_secret is not set (use the config file or CRMDASH_JWT_SECRET)");
        }
        if self.auth.session_ttl_days <= 0 || self.auth.invitation_ttl_days <= 0 {
            bail!("auth.session_ttl_days and auth.invitation_ttl_days must be positive");
        }
        Ok(())
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            email: EmailConfig::default(),
            rate_limit: RateLimitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
