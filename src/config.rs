//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub nowpayments: NowPaymentsConfig,
    pub paypal: PaypalConfig,
    pub reconciler: ReconcilerConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Crypto processor credentials
#[derive(Debug, Clone)]
pub struct NowPaymentsConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub ipn_secret: Option<String>,
    pub sandbox: bool,
}

/// Card/wallet processor credentials
#[derive(Debug, Clone)]
pub struct PaypalConfig {
    pub enabled: bool,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub webhook_id: Option<String>,
    pub sandbox: bool,
}

/// Background reconciliation settings
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub poll_interval_seconds: u64,
    pub older_than_minutes: i64,
    pub batch_limit: i64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            nowpayments: NowPaymentsConfig::from_env()?,
            paypal: PaypalConfig::from_env()?,
            reconciler: ReconcilerConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.nowpayments.validate()?;
        self.paypal.validate()?;
        self.reconciler.validate()?;

        Ok(())
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(default),
    }
}

fn env_opt(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl NowPaymentsConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(NowPaymentsConfig {
            enabled: env_bool("NOWPAYMENTS_ENABLED", true)?,
            api_key: env_opt("NOWPAYMENTS_API_KEY"),
            ipn_secret: env_opt("NOWPAYMENTS_IPN_SECRET"),
            sandbox: env_bool("NOWPAYMENTS_SANDBOX", false)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.api_key.is_none() {
            return Err(ConfigError::MissingVariable(
                "NOWPAYMENTS_API_KEY".to_string(),
            ));
        }

        Ok(())
    }
}

impl PaypalConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(PaypalConfig {
            enabled: env_bool("PAYPAL_ENABLED", true)?,
            client_id: env_opt("PAYPAL_CLIENT_ID"),
            client_secret: env_opt("PAYPAL_CLIENT_SECRET"),
            webhook_id: env_opt("PAYPAL_WEBHOOK_ID"),
            sandbox: env_bool("PAYPAL_SANDBOX", false)?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled {
            if self.client_id.is_none() {
                return Err(ConfigError::MissingVariable("PAYPAL_CLIENT_ID".to_string()));
            }
            if self.client_secret.is_none() {
                return Err(ConfigError::MissingVariable(
                    "PAYPAL_CLIENT_SECRET".to_string(),
                ));
            }
        }

        Ok(())
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ReconcilerConfig {
            enabled: env_bool("RECONCILER_ENABLED", true)?,
            poll_interval_seconds: env::var("RECONCILER_POLL_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("RECONCILER_POLL_INTERVAL_SECONDS".to_string())
                })?,
            older_than_minutes: env::var("RECONCILER_OLDER_THAN_MINUTES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("RECONCILER_OLDER_THAN_MINUTES".to_string())
                })?,
            batch_limit: env::var("RECONCILER_BATCH_LIMIT")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RECONCILER_BATCH_LIMIT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILER_POLL_INTERVAL_SECONDS cannot be 0".to_string(),
            ));
        }

        if self.older_than_minutes < 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILER_OLDER_THAN_MINUTES cannot be negative".to_string(),
            ));
        }

        if self.batch_limit <= 0 {
            return Err(ConfigError::InvalidValue(
                "RECONCILER_BATCH_LIMIT must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Invalid port
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_nowpayments_requires_api_key() {
        let config = NowPaymentsConfig {
            enabled: true,
            api_key: None,
            ipn_secret: None,
            sandbox: true,
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_provider_skips_credential_checks() {
        let config = PaypalConfig {
            enabled: false,
            client_id: None,
            client_secret: None,
            webhook_id: None,
            sandbox: true,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reconciler_rejects_zero_interval() {
        let config = ReconcilerConfig {
            enabled: true,
            poll_interval_seconds: 0,
            older_than_minutes: 5,
            batch_limit: 50,
        };

        assert!(config.validate().is_err());
    }
}
