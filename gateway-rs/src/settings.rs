//! Startup configuration.
//!
//! Sources, later ones winning:
//! 1. built-in defaults
//! 2. `config/gateway.{toml,json,yaml}` or the file named by `GATEWAY_CONFIG`
//! 3. `GATEWAY__SECTION__KEY` environment variables (a `.env` file is honoured)

use std::env;
use std::net::SocketAddr;

use config::{Config, Environment, File, FileFormat};
use resilience::ResilienceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LoggingConfig;

const DEFAULT_CONFIG_PATH: &str = "config/gateway";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid resilience configuration: {0}")]
    Resilience(#[from] resilience::ConfigError),

    #[error("Invalid bind address '{0}'")]
    BindAddress(String),

    #[error("Invalid executor configuration: {0}")]
    Executors(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Largest accepted request body in bytes
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            body_limit_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpExecutorConfig {
    /// Characters of response body kept before truncation
    pub truncate_limit: usize,
    /// Client-side ceiling for one outbound call
    pub timeout_ms: u64,
}

impl Default for HttpExecutorConfig {
    fn default() -> Self {
        Self {
            truncate_limit: 1000,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandExecutorConfig {
    pub allowed_commands: Vec<String>,
}

impl Default for CommandExecutorConfig {
    fn default() -> Self {
        Self {
            allowed_commands: ["date", "echo", "hostname", "uname", "uptime"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorsConfig {
    pub http: HttpExecutorConfig,
    pub command: CommandExecutorConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub server: ServerConfig,
    pub resilience: ResilienceConfig,
    pub logging: LoggingConfig,
    pub executors: ExecutorsConfig,
}

impl GatewaySettings {
    /// Loads settings from the file and environment sources.
    pub fn load() -> Result<Self, SettingsError> {
        dotenv::dotenv().ok();
        let path = env::var("GATEWAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let config = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(environment())
            .build()?;

        Self::from_config(config)
    }

    /// Parses settings from an in-memory TOML document.
    pub fn from_toml(document: &str) -> Result<Self, SettingsError> {
        let config = Config::builder()
            .add_source(File::from_str(document, FileFormat::Toml))
            .build()?;

        Self::from_config(config)
    }

    fn from_config(config: Config) -> Result<Self, SettingsError> {
        let settings: GatewaySettings = config.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.resilience.validate()?;
        self.bind_address()?;
        if self.executors.http.timeout_ms == 0 {
            return Err(SettingsError::Executors(
                "http.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bind_address(&self) -> Result<SocketAddr, SettingsError> {
        self.server
            .bind_address
            .parse()
            .map_err(|_| SettingsError::BindAddress(self.server.bind_address.clone()))
    }
}

fn environment() -> Environment {
    Environment::with_prefix("GATEWAY")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("resilience.fatal_error_kinds")
        .with_list_parse_key("executors.command.allowed_commands")
}

#[cfg(test)]
mod tests {
    use super::*;
    use resilience::ErrorKind;

    #[test]
    fn test_defaults_validate() {
        let settings = GatewaySettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.executors.http.truncate_limit, 1000);
        assert_eq!(settings.resilience.max_retries, 3);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let settings = GatewaySettings::from_toml(
            r#"
            [server]
            bind_address = "127.0.0.1:9090"

            [resilience]
            max_retries = 1
            circuit_breaker_failure_threshold = 2
            fatal_error_kinds = ["Validation", "Security"]

            [executors.command]
            allowed_commands = ["echo"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.bind_address().unwrap().port(), 9090);
        assert_eq!(settings.resilience.max_retries, 1);
        assert_eq!(settings.resilience.base_delay_ms, 500);
        assert_eq!(
            settings.resilience.fatal_error_kinds,
            vec![ErrorKind::Validation, ErrorKind::Security]
        );
        assert_eq!(settings.executors.command.allowed_commands, vec!["echo"]);
    }

    #[test]
    fn test_invalid_resilience_is_rejected() {
        let err = GatewaySettings::from_toml(
            r#"
            [resilience]
            base_delay_ms = 9000
            max_delay_ms = 10
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SettingsError::Resilience(_)));
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let err = GatewaySettings::from_toml("[server]\nbind_address = \"nowhere\"").unwrap_err();
        assert!(matches!(err, SettingsError::BindAddress(_)));
    }
}
