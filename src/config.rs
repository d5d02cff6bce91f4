use crate::error::{AppError, Result};
use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    #[validate]
    pub redis: RedisSettings,
    #[validate]
    pub idempotency: IdempotencySettings,
    #[validate]
    pub application: ApplicationSettings,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RedisSettings {
    #[validate(length(min = 1))]
    pub url: String,
    /// Upper bound on every store command. A timed-out reservation is
    /// rejected, never assumed to have succeeded.
    #[serde(default = "default_command_timeout_ms")]
    #[validate(range(min = 1))]
    pub command_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct IdempotencySettings {
    /// Operation name prefixes eligible for guarding. Must not be empty.
    #[validate(length(min = 1, message = "at least one namespace must be configured"))]
    pub scan_namespaces: Vec<String>,
    /// Base64 DER public key for signature verification. Blank disables it.
    #[serde(default)]
    pub public_key: String,
    #[serde(default = "default_token_header")]
    #[validate(length(min = 1))]
    pub token_header: String,
    #[serde(default = "default_cleanup_interval_ms")]
    #[validate(range(min = 1))]
    pub cleanup_interval_ms: u64,
    #[serde(default = "default_monitor_interval_secs")]
    #[validate(range(min = 1))]
    pub monitor_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApplicationSettings {
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_command_timeout_ms() -> u64 {
    1000
}

fn default_token_header() -> String {
    "token".to_string()
}

fn default_cleanup_interval_ms() -> u64 {
    2000
}

fn default_monitor_interval_secs() -> u64 {
    3600
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Settings {
    pub fn new() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("idempotency.scan_namespaces")
                    .try_parsing(true),
            );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validated()
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validated()
    }

    fn validated(self) -> Result<Self> {
        self.validate()
            .map_err(|e| AppError::Configuration(format!("Invalid settings: {}", e)))?;
        Ok(self)
    }
}

impl RedisSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

impl IdempotencySettings {
    pub fn public_key(&self) -> Option<&str> {
        let key = self.public_key.trim();
        (!key.is_empty()).then_some(key)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [redis]
        url = "redis://localhost:6379/"

        [idempotency]
        scan_namespaces = ["OrderService"]

        [application]
        port = 8080
    "#;

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::from_toml_str(MINIMAL).unwrap();
        assert_eq!(settings.redis.command_timeout(), Duration::from_secs(1));
        assert_eq!(settings.idempotency.token_header, "token");
        assert_eq!(settings.idempotency.cleanup_interval(), Duration::from_millis(2000));
        assert_eq!(settings.idempotency.monitor_interval(), Duration::from_secs(3600));
        assert_eq!(settings.idempotency.public_key(), None);
        assert_eq!(settings.application.log_format, "pretty");
    }

    #[test]
    fn test_empty_namespaces_rejected() {
        let toml = MINIMAL.replace(r#"["OrderService"]"#, "[]");
        let err = Settings::from_toml_str(&toml).unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let toml = MINIMAL.replace(
            r#"url = "redis://localhost:6379/""#,
            "url = \"redis://localhost:6379/\"\ncommand_timeout_ms = 0",
        );
        assert!(Settings::from_toml_str(&toml).is_err());
    }

    #[test]
    fn test_missing_section_is_configuration_error() {
        let err = Settings::from_toml_str("[redis]\nurl = \"redis://x/\"").unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }
}
