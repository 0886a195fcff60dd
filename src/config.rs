//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding settings
//! - Database backend selection (PostgreSQL via DATABASE_URL, SQLite otherwise)
//! - Admin session and plugin token secrets (environment only)
//! - Evidence upload limits

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// One year
const MAX_SESSION_TTL_HOURS: i64 = 24 * 365;
/// One day
const MAX_CODE_TTL_MINUTES: i64 = 24 * 60;

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub plugin: PluginConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub housekeeping: HousekeepingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL URL, only ever filled from DATABASE_URL
    #[serde(skip)]
    pub url: Option<String>,
    /// SQLite file used when no PostgreSQL URL is configured
    pub sqlite_path: PathBuf,
    pub pool_max_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            sqlite_path: PathBuf::from("camp.db"),
            pool_max_size: 20,
        }
    }
}

/// Admin session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC key for admin cookies (ADMIN_SESSION_SECRET, falling back to DATABASE_URL)
    #[serde(skip)]
    pub session_secret: Option<String>,
    pub session_ttl_hours: i64,
    /// Adds the Secure attribute to the admin cookie
    pub secure_cookie: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_secret: None,
            session_ttl_hours: 8,
            secure_cookie: false,
        }
    }
}

/// Minecraft plugin integration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Expected x-plugin-token (MC_PLUGIN_TOKEN). Plugin routes are open when unset.
    #[serde(skip)]
    pub token: Option<String>,
    /// Max commands handed out per poll
    pub poll_batch_size: i64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            token: None,
            poll_batch_size: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// Require an in-game verification code to create an account
    pub require_code: bool,
    pub code_ttl_minutes: i64,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            require_code: false,
            code_ttl_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadsConfig {
    pub dir: PathBuf,
    pub max_file_bytes: usize,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("public/uploads/evidence"),
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HousekeepingConfig {
    /// Interval for purging expired registration codes
    pub purge_interval_secs: u64,
}

impl Default for HousekeepingConfig {
    fn default() -> Self {
        Self {
            purge_interval_secs: 600,
        }
    }
}

impl Config {
    /// Load from CAMP_CONFIG or config.toml, falling back to the embedded defaults,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("CAMP_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        let mut config = Self::load_from(path)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            Self::parse(&content)
        } else {
            // Use embedded default config
            Self::parse(DEFAULT_CONFIG).context("Failed to parse default config")
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the session, code and queue arithmetic cannot handle
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SESSION_TTL_HOURS).contains(&self.auth.session_ttl_hours) {
            bail!(
                "auth.session_ttl_hours must be between 1 and {}",
                MAX_SESSION_TTL_HOURS
            );
        }
        if !(1..=MAX_CODE_TTL_MINUTES).contains(&self.registration.code_ttl_minutes) {
            bail!(
                "registration.code_ttl_minutes must be between 1 and {}",
                MAX_CODE_TTL_MINUTES
            );
        }
        if self.plugin.poll_batch_size < 1 {
            bail!("plugin.poll_batch_size must be at least 1");
        }
        if self.uploads.max_file_bytes == 0 {
            bail!("uploads.max_file_bytes must be greater than 0");
        }
        Ok(())
    }

    /// Environment variables take precedence over file values; secrets only come from here.
    pub fn apply_env(&mut self) {
        if let Some(url) = non_empty_env("DATABASE_URL") {
            self.database.url = Some(url);
        }
        self.auth.session_secret =
            non_empty_env("ADMIN_SESSION_SECRET").or_else(|| self.database.url.clone());
        self.plugin.token = non_empty_env("MC_PLUGIN_TOKEN");

        if let Some(host) = non_empty_env("CAMP_HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty_env("CAMP_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(dir) = non_empty_env("UPLOAD_DIR") {
            self.uploads.dir = PathBuf::from(dir);
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default config ships with the crate; the fallback only
        // matters if someone breaks config.toml.
        Self::parse(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            plugin: PluginConfig::default(),
            registration: RegistrationConfig::default(),
            uploads: UploadsConfig::default(),
            housekeeping: HousekeepingConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_default_parses() {
        let config = Config::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.session_ttl_hours, 8);
        assert_eq!(config.plugin.poll_batch_size, 25);
        assert_eq!(config.registration.code_ttl_minutes, 10);
        assert!(!config.registration.require_code);
    }

    #[test]
    fn test_secrets_are_not_read_from_file() {
        let config = Config::default();
        assert!(config.database.url.is_none());
        assert!(config.auth.session_secret.is_none());
        assert!(config.plugin.token.is_none());
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config = Config::parse(
            r#"
            [server]
            host = "127.0.0.1"
            port = 8081
            "#,
        )
        .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:8081");
        assert_eq!(config.uploads.max_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.database.sqlite_path, PathBuf::from("camp.db"));
        assert_eq!(config.housekeeping.purge_interval_secs, 600);
    }

    #[test]
    fn test_load_from_missing_path_falls_back() {
        let config = Config::load_from("/definitely/not/here/config.toml").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let base = "[server]\nhost = \"127.0.0.1\"\nport = 8081\n";
        let with = |section: &str| format!("{}{}", base, section);

        let err = Config::parse(&with("[auth]\nsession_ttl_hours = 9223372036854775807\nsecure_cookie = false\n"))
            .unwrap_err();
        assert!(err.to_string().contains("session_ttl_hours"));
        assert!(Config::parse(&with("[auth]\nsession_ttl_hours = 0\nsecure_cookie = false\n")).is_err());
        assert!(Config::parse(&with("[registration]\nrequire_code = false\ncode_ttl_minutes = -1\n")).is_err());
        assert!(Config::parse(&with("[plugin]\npoll_batch_size = 0\n")).is_err());
        assert!(Config::parse(&with("[auth]\nsession_ttl_hours = 24\nsecure_cookie = true\n")).is_ok());
    }
}
