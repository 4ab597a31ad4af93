/// Configuration management for the Keystone CRM auth service
use crate::error::{CrmError, CrmResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub retention: RetentionConfig,
    pub email: Option<EmailConfig>,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Public base URL used in email links
    pub public_url: String,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Credential and token security configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    /// Default session lifetime in days
    pub jwt_default_days: i64,
    /// Remember-me session lifetime in days
    pub jwt_extended_days: i64,
    /// bcrypt cost factor
    pub bcrypt_cost: u32,
    /// Password reset token lifetime in hours
    pub reset_token_hours: i64,
    /// Failed logins before the account is locked
    pub lockout_threshold: i64,
    /// Lock duration in minutes once the threshold is hit
    pub lockout_minutes: i64,
}

/// Retention configuration for the purge job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days to keep auth log entries
    pub auth_log_days: i64,
    /// Hours to keep used reset tokens after consumption
    pub used_token_hours: i64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> CrmResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("CRM_HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let port = env::var("CRM_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| CrmError::Validation("Invalid port number".to_string()))?;
        let public_url = env::var("CRM_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", hostname, port));
        let version = env::var("CRM_VERSION").unwrap_or_else(|_| "0.1.0".to_string());

        let data_directory: PathBuf = env::var("CRM_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("CRM_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("keystone.sqlite"));

        let jwt_secret = env::var("CRM_JWT_SECRET")
            .map_err(|_| CrmError::Validation("JWT secret required".to_string()))?;
        let jwt_default_days = env::var("CRM_JWT_DEFAULT_DAYS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);
        let jwt_extended_days = env::var("CRM_JWT_EXTENDED_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);
        let bcrypt_cost = env::var("CRM_BCRYPT_COST")
            .unwrap_or_else(|_| "12".to_string())
            .parse()
            .unwrap_or(12);
        let reset_token_hours = env::var("CRM_RESET_TOKEN_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);
        let lockout_threshold = env::var("CRM_LOCKOUT_THRESHOLD")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);
        let lockout_minutes = env::var("CRM_LOCKOUT_MINUTES")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let auth_log_days = env::var("CRM_AUTH_LOG_RETENTION_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);
        let used_token_hours = env::var("CRM_USED_TOKEN_RETENTION_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .unwrap_or(24);

        let email = if let Ok(smtp_url) = env::var("CRM_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("CRM_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let log_level = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                public_url,
                version,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            security: SecurityConfig {
                jwt_secret,
                jwt_default_days,
                jwt_extended_days,
                bcrypt_cost,
                reset_token_hours,
                lockout_threshold,
                lockout_minutes,
            },
            retention: RetentionConfig {
                auth_log_days,
                used_token_hours,
            },
            email,
            logging: LoggingConfig { level: log_level },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> CrmResult<()> {
        if self.service.hostname.is_empty() {
            return Err(CrmError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.security.jwt_secret.len() < 32 {
            return Err(CrmError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if !(4..=31).contains(&self.security.bcrypt_cost) {
            return Err(CrmError::Validation(
                "bcrypt cost must be between 4 and 31".to_string(),
            ));
        }

        Ok(())
    }

    /// Configuration suitable for unit and integration tests
    #[doc(hidden)]
    pub fn for_tests() -> Self {
        ServerConfig {
            service: ServiceConfig {
                hostname: "localhost".to_string(),
                port: 8080,
                public_url: "http://localhost:8080".to_string(),
                version: "0.1.0".to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                database: PathBuf::from(":memory:"),
            },
            security: SecurityConfig {
                jwt_secret: "test-secret-key-for-testing-only-0123456789".to_string(),
                jwt_default_days: 3,
                jwt_extended_days: 30,
                // Low cost keeps the test suite fast
                bcrypt_cost: 4,
                reset_token_hours: 24,
                lockout_threshold: 5,
                lockout_minutes: 30,
            },
            retention: RetentionConfig {
                auth_log_days: 7,
                used_token_hours: 24,
            },
            email: None,
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}
