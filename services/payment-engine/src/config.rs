use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Minimum length for both the JWT secret and the credential secret
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub environment: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub security: SecurityConfig,
    pub mpesa: MpesaConfig,
    pub reconciliation: ReconciliationConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub run_migrations: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub credential_encryption_key: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MpesaConfig {
    pub callback_base_url: String,
    pub sandbox_base_url: String,
    pub production_base_url: String,
    pub http_timeout_secs: u64,
    pub registration_deadline_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReconciliationConfig {
    pub confirmation_deadline_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogConfig {
    pub format: String,
    pub filter: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            // Start with default configuration
            .set_default("environment", environment.clone())?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", 4)?
            .set_default("server.cors_allowed_origins", Vec::<String>::new())?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("database.run_migrations", true)?
            .set_default("security.jwt_secret", "")?
            .set_default("security.credential_encryption_key", "")?
            .set_default("mpesa.callback_base_url", "")?
            .set_default("mpesa.sandbox_base_url", "https://sandbox.safaricom.co.ke")?
            .set_default("mpesa.production_base_url", "https://api.safaricom.co.ke")?
            .set_default("mpesa.http_timeout_secs", 15)?
            .set_default("mpesa.registration_deadline_secs", 30)?
            .set_default("reconciliation.confirmation_deadline_ms", 5000)?
            .set_default("log.format", "text")?
            .set_default("log.filter", "payment_engine=info,actix_web=info")?;

        // Add environment-specific config file if it exists
        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        // Override with environment variables
        builder = builder.add_source(
            Environment::with_prefix("PAYMENT_ENGINE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_allowed_origins")
                .try_parsing(true),
        );

        // Special handling for common env vars
        if let Ok(db_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            builder = builder.set_override("security.jwt_secret", secret)?;
        }

        if let Ok(key) = env::var("CREDENTIAL_ENCRYPTION_KEY") {
            builder = builder.set_override("security.credential_encryption_key", key)?;
        }

        if let Ok(base_url) = env::var("MPESA_CALLBACK_BASE_URL") {
            builder = builder.set_override("mpesa.callback_base_url", base_url)?;
        }

        if let Ok(port) = env::var("APP_PORT") {
            builder = builder.set_override("server.port", port)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.security.jwt_secret.len() < MIN_SECRET_LEN {
            return Err(format!(
                "JWT secret must be at least {} characters",
                MIN_SECRET_LEN
            ));
        }

        if self.security.credential_encryption_key.len() < MIN_SECRET_LEN {
            return Err(format!(
                "Credential encryption key must be at least {} bytes",
                MIN_SECRET_LEN
            ));
        }

        if !(1..=15).contains(&self.mpesa.http_timeout_secs) {
            return Err("M-Pesa HTTP timeout must be between 1 and 15 seconds".to_string());
        }

        if self.reconciliation.confirmation_deadline_ms == 0 {
            return Err("Confirmation deadline cannot be 0".to_string());
        }

        if self.is_production() {
            if self.mpesa.callback_base_url.trim().is_empty() {
                return Err("MPESA_CALLBACK_BASE_URL is required in production".to_string());
            }

            if self.server.cors_allowed_origins.is_empty() {
                return Err("CORS allowed origins must be set in production".to_string());
            }

            if self.server.cors_allowed_origins.iter().any(|o| o.trim() == "*") {
                return Err("Wildcard CORS origin is not allowed in production".to_string());
            }
        }

        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.database.acquire_timeout_secs)
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.mpesa.http_timeout_secs)
    }

    pub fn registration_deadline(&self) -> Duration {
        Duration::from_secs(self.mpesa.registration_deadline_secs)
    }

    pub fn confirmation_deadline(&self) -> Duration {
        Duration::from_millis(self.reconciliation.confirmation_deadline_ms)
    }

    /// Configured callback base, or `None` to derive it from the request host
    pub fn callback_base_url(&self) -> Option<String> {
        let base = self.mpesa.callback_base_url.trim();
        (!base.is_empty()).then(|| base.to_string())
    }
}
