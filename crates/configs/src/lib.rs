//! # configs
//!
//! Layered application configuration: built-in defaults, an optional
//! `dadhub.toml`, then `DADHUB__SECTION__KEY` environment variables
//! (a `.env` file is loaded first when present).

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "dadhub.toml";
const ENV_PREFIX: &str = "DADHUB";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            filter: "info".to_string(),
        }
    }
}

/// Reserved admin identities and what they are seeded with.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub emails: Vec<String>,
    pub seed_points: i64,
    pub seed_level: u32,
    /// When set, the binary registers the first reserved email with this password
    pub bootstrap_password: Option<SecretString>,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            emails: vec!["admin@dadhub.com".to_string()],
            seed_points: 1000,
            seed_level: 5,
            bootstrap_password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub max_failed_attempts: u32,
    pub lockout_minutes: i64,
    pub argon2_memory_kib: u32,
    pub argon2_iterations: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            lockout_minutes: 15,
            argon2_memory_kib: 19 * 1024,
            argon2_iterations: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GamificationConfig {
    pub xp_per_level: i64,
    pub check_in_points: i64,
    pub spin_prizes: Vec<i64>,
}

impl Default for GamificationConfig {
    fn default() -> Self {
        Self {
            xp_per_level: 250,
            check_in_points: 10,
            spin_prizes: vec![5, 10, 25, 50, 100],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReferralConfig {
    pub referrer_bonus: i64,
    pub referee_bonus: i64,
}

impl Default for ReferralConfig {
    fn default() -> Self {
        Self {
            referrer_bonus: 100,
            referee_bonus: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Upload directory; uploads stay in memory when unset
    pub root: Option<PathBuf>,
    pub url_prefix: String,
    pub max_bytes: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: None,
            url_prefix: "/static/uploads".to_string(),
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LocalStorageConfig {
    /// JSON file backing local storage; in memory when unset
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub page_size: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub admin: AdminConfig,
    pub auth: AuthConfig,
    pub gamification: GamificationConfig,
    pub referrals: ReferralConfig,
    pub media: MediaConfig,
    pub local_storage: LocalStorageConfig,
    pub feeds: FeedConfig,
}

impl AppConfig {
    /// Loads `.env`, then `dadhub.toml` (if present), then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Like `load`, reading `path` instead of `dadhub.toml`.
    pub fn load_with(path: &Path) -> Result<Self, ConfigError> {
        if let Ok(env_file) = dotenvy::dotenv() {
            tracing::debug!(path = %env_file.display(), "loaded .env");
        }
        Self::load_from(path)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("admin.emails")
                    .with_list_parse_key("gamification.spin_prizes"),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gamification.xp_per_level <= 0 {
            return Err(ConfigError::Invalid("gamification.xp_per_level must be positive".into()));
        }
        if self.gamification.spin_prizes.is_empty() {
            return Err(ConfigError::Invalid("gamification.spin_prizes must not be empty".into()));
        }
        if let Some(email) = self.admin.emails.iter().find(|e| !e.contains('@')) {
            return Err(ConfigError::Invalid(format!("admin.emails: '{email}' is not an email")));
        }
        if self.feeds.page_size == 0 {
            return Err(ConfigError::Invalid("feeds.page_size must be at least 1".into()));
        }
        Ok(())
    }
}
