//! Capsule configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CapsuleError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CapsuleConfig {
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl CapsuleConfig {
    /// Load config from the default path (~/.capsule/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| CapsuleError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CapsuleError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| CapsuleError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Capsule home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".capsule")
    }

    /// Apply environment overrides on top of the file values.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparseable numeric or
    /// boolean values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAIL_SERVER") {
            self.mail.host = v;
        }
        if let Some(v) = lookup("MAIL_PORT") {
            match v.parse() {
                Ok(port) => self.mail.port = port,
                Err(_) => tracing::warn!("Ignoring invalid MAIL_PORT '{v}'"),
            }
        }
        if let Some(v) = lookup("MAIL_USE_TLS") {
            self.mail.use_tls = parse_flag(&v);
        }
        if let Some(v) = lookup("MAIL_USE_SSL") {
            self.mail.use_ssl = parse_flag(&v);
        }
        if let Some(v) = lookup("MAIL_USERNAME") {
            self.mail.username = Some(v);
        }
        if let Some(v) = lookup("MAIL_PASSWORD") {
            self.mail.password = Some(v);
        }
        if let Some(v) = lookup("MAIL_DEFAULT_SENDER") {
            self.mail.default_sender = Some(v);
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.storage.database_path = v;
        }
        if let Some(v) = lookup("UPLOAD_FOLDER") {
            self.storage.upload_dir = v;
        }
        if let Some(v) = lookup("PORT") {
            match v.parse() {
                Ok(port) => self.gateway.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT '{v}'"),
            }
        }
        if let Some(v) = lookup("CAPSULE_TICK_SECS") {
            match v.parse::<u64>() {
                Ok(secs) if secs > 0 => self.scheduler.interval_secs = secs,
                _ => tracing::warn!("Ignoring invalid CAPSULE_TICK_SECS '{v}'"),
            }
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn bool_true() -> bool { true }

/// Mail relay configuration consumed by the SMTP transport.
#[derive(Clone, Serialize, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_host")]
    pub host: String,
    #[serde(default = "default_mail_port")]
    pub port: u16,
    /// Upgrade a plaintext connection with STARTTLS.
    #[serde(default = "bool_true")]
    pub use_tls: bool,
    /// Connect with implicit TLS (SMTPS). Takes precedence over `use_tls`.
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub default_sender: Option<String>,
    #[serde(default = "default_mail_timeout")]
    pub timeout_secs: u64,
}

fn default_mail_host() -> String { "smtp.gmail.com".into() }
fn default_mail_port() -> u16 { 587 }
fn default_mail_timeout() -> u64 { 30 }

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            host: default_mail_host(),
            port: default_mail_port(),
            use_tls: true,
            use_ssl: false,
            username: None,
            password: None,
            default_sender: None,
            timeout_secs: default_mail_timeout(),
        }
    }
}

impl MailConfig {
    /// Sender address: the configured default sender, else the username.
    pub fn sender(&self) -> Option<&str> {
        self.default_sender
            .as_deref()
            .or(self.username.as_deref())
            .filter(|s| !s.trim().is_empty())
    }
}

// Keeps the password out of logs.
impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("use_tls", &self.use_tls)
            .field("use_ssl", &self.use_ssl)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("default_sender", &self.default_sender)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_interval_secs() -> u64 { 60 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
        }
    }
}

/// Database and upload locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_database_path() -> String { "~/.capsule/capsules.db".into() }
fn default_upload_dir() -> String { "~/.capsule/uploads".into() }
fn default_max_upload_bytes() -> usize { 16 * 1024 * 1024 }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl StorageConfig {
    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_path(&self.database_path)
    }

    /// Upload directory with `~` expanded.
    pub fn upload_dir(&self) -> PathBuf {
        expand_path(&self.upload_dir)
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Offset applied to naive (zone-less) send times submitted by clients.
    #[serde(default)]
    pub local_utc_offset_minutes: i32,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 5078 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            local_utc_offset_minutes: 0,
        }
    }
}

/// Expand `~` in a configured path.
pub fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = CapsuleConfig::default();
        assert_eq!(config.mail.host, "smtp.gmail.com");
        assert_eq!(config.mail.port, 587);
        assert!(config.mail.use_tls);
        assert!(!config.mail.use_ssl);
        assert_eq!(config.scheduler.interval_secs, 60);
        assert_eq!(config.gateway.port, 5078);
        assert_eq!(config.storage.max_upload_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
            [mail]
            host = "smtp.example.org"
            port = 465
            use_ssl = true
            username = "robot@example.org"
            password = "hunter2"

            [scheduler]
            interval_secs = 5
        "#;

        let config: CapsuleConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.mail.host, "smtp.example.org");
        assert_eq!(config.mail.port, 465);
        assert!(config.mail.use_ssl);
        assert_eq!(config.mail.sender(), Some("robot@example.org"));
        assert_eq!(config.scheduler.interval_secs, 5);
        assert_eq!(config.gateway.port, 5078);
    }

    #[test]
    fn test_config_missing_fields_use_defaults() {
        let config: CapsuleConfig = toml::from_str("").unwrap();
        assert_eq!(config.mail.port, 587);
        assert!(config.mail.username.is_none());
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("MAIL_SERVER", "relay.local"),
            ("MAIL_PORT", "2525"),
            ("MAIL_USE_TLS", "False"),
            ("MAIL_USERNAME", "me@relay.local"),
            ("MAIL_DEFAULT_SENDER", "noreply@relay.local"),
            ("PORT", "not-a-port"),
            ("CAPSULE_TICK_SECS", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = CapsuleConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.mail.host, "relay.local");
        assert_eq!(config.mail.port, 2525);
        assert!(!config.mail.use_tls);
        assert_eq!(config.mail.sender(), Some("noreply@relay.local"));
        // invalid values keep defaults
        assert_eq!(config.gateway.port, 5078);
        assert_eq!(config.scheduler.interval_secs, 60);
    }

    #[test]
    fn test_debug_hides_password() {
        let mail = MailConfig {
            password: Some("s3cret".into()),
            ..Default::default()
        };
        let rendered = format!("{mail:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = std::env::temp_dir().join(format!("capsule-config-test-{}", std::process::id()));
        let path = dir.join("config.toml");
        let mut config = CapsuleConfig::default();
        config.gateway.port = 9999;
        config.save_to(&path).unwrap();

        let loaded = CapsuleConfig::load_from(&path).unwrap();
        assert_eq!(loaded.gateway.port, 9999);
        std::fs::remove_dir_all(&dir).ok();
    }
}
