use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Longest session lifetime accepted from MINICHAT_SESSION_DAYS.
const MAX_SESSION_DAYS: i64 = 3650;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityConfig {
    Google { client_id: String },
    Dev,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub session_ttl: chrono::TimeDelta,
    pub identity: IdentityConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("MINICHAT_JWT_SECRET is unset or still a placeholder")]
    MissingSecret,
    #[error("MINICHAT_GOOGLE_CLIENT_ID is required when MINICHAT_IDENTITY=google")]
    MissingClientId,
    #[error("unknown MINICHAT_IDENTITY '{0}', expected 'google' or 'dev'")]
    UnknownIdentity(String),
    #[error("invalid {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Keeps parsing testable without touching the
    /// process environment.
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let jwt_secret = get("MINICHAT_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            return Err(ConfigError::MissingSecret);
        }

        let host = get("MINICHAT_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = get("MINICHAT_PORT").unwrap_or_else(|| "3000".into());
        let addr_str = format!("{}:{}", host, port);
        let addr: SocketAddr = addr_str.parse().map_err(|_| ConfigError::Invalid {
            name: "MINICHAT_HOST/MINICHAT_PORT",
            value: addr_str.clone(),
        })?;

        let db_path = get("MINICHAT_DB_PATH").unwrap_or_else(|| "minichat.db".into()).into();

        let session_ttl = match get("MINICHAT_SESSION_DAYS") {
            Some(v) => v
                .parse::<i64>()
                .ok()
                .filter(|days| (1..=MAX_SESSION_DAYS).contains(days))
                .and_then(chrono::TimeDelta::try_days)
                .ok_or(ConfigError::Invalid {
                    name: "MINICHAT_SESSION_DAYS",
                    value: v,
                })?,
            None => chrono::TimeDelta::days(30),
        };

        let identity = match get("MINICHAT_IDENTITY").as_deref().unwrap_or("google") {
            "google" => IdentityConfig::Google {
                client_id: get("MINICHAT_GOOGLE_CLIENT_ID")
                    .filter(|id| !id.is_empty())
                    .ok_or(ConfigError::MissingClientId)?,
            },
            "dev" => IdentityConfig::Dev,
            other => return Err(ConfigError::UnknownIdentity(other.to_string())),
        };

        Ok(Self {
            addr,
            db_path,
            jwt_secret,
            session_ttl,
            identity,
        })
    }
}
