//! Process configuration read from the environment.

use std::net::SocketAddr;

use chrono::Duration;
use thiserror::Error;
use tracing::warn;

use escrowdesk_auth::UndeclaredActionPolicy;
use escrowdesk_auth::token::DEFAULT_SESSION_DAYS;

const DEV_SECRET: &str = "dev-secret";
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("JWT_SECRET must be set when APP_ENV is '{0}'")]
    MissingSecret(String),

    #[error("invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct ApiConfig {
    pub jwt_secret: String,
    pub session_ttl: Duration,
    pub listen_addr: SocketAddr,
    pub undeclared_action_policy: UndeclaredActionPolicy,
    /// When set, events and privileges live in Postgres.
    pub database_url: Option<String>,
    /// Registrations with this email receive the Admin role.
    pub bootstrap_admin_email: Option<String>,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("jwt_secret", &"<redacted>")
            .field("session_ttl", &self.session_ttl)
            .field("listen_addr", &self.listen_addr)
            .field("undeclared_action_policy", &self.undeclared_action_policy)
            .field("database_url", &self.database_url.as_ref().map(|_| "<redacted>"))
            .field("bootstrap_admin_email", &self.bootstrap_admin_email)
            .finish()
    }
}

impl ApiConfig {
    /// In-memory configuration with defaults for everything but the secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            session_ttl: Duration::days(DEFAULT_SESSION_DAYS),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            undeclared_action_policy: UndeclaredActionPolicy::default(),
            database_url: None,
            bootstrap_admin_email: None,
        }
    }

    pub fn with_bootstrap_admin(mut self, email: impl Into<String>) -> Self {
        self.bootstrap_admin_email = Some(email.into().trim().to_lowercase());
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source (the environment in production).
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let app_env = get("APP_ENV").unwrap_or_else(|| "dev".to_string());
        let jwt_secret = match get("JWT_SECRET") {
            Some(secret) => secret,
            None if app_env == "dev" => {
                warn!("JWT_SECRET not set; using insecure dev default");
                DEV_SECRET.to_string()
            }
            None => return Err(ConfigError::MissingSecret(app_env)),
        };

        let session_days = match get("SESSION_TTL_DAYS") {
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|d| *d > 0)
                .ok_or(ConfigError::Invalid {
                    name: "SESSION_TTL_DAYS",
                    value: raw,
                })?,
            None => DEFAULT_SESSION_DAYS,
        };

        let raw_addr = get("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = raw_addr.parse::<SocketAddr>().map_err(|_| ConfigError::Invalid {
            name: "LISTEN_ADDR",
            value: raw_addr.clone(),
        })?;

        let undeclared_action_policy = match get("UNDECLARED_ACTION_POLICY") {
            Some(raw) => UndeclaredActionPolicy::parse(&raw).ok_or(ConfigError::Invalid {
                name: "UNDECLARED_ACTION_POLICY",
                value: raw,
            })?,
            None => UndeclaredActionPolicy::default(),
        };

        Ok(Self {
            jwt_secret,
            session_ttl: Duration::days(session_days),
            listen_addr,
            undeclared_action_policy,
            database_url: get("DATABASE_URL"),
            bootstrap_admin_email: get("BOOTSTRAP_ADMIN_EMAIL").map(|e| e.to_lowercase()),
        })
    }
}
