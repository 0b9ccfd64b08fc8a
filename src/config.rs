//! Application configuration
//! Mission: Load and validate the full environment surface at startup

use anyhow::{bail, Result};
use sha2::{Digest, Sha256};
use std::env;
use std::path::PathBuf;

/// Minimum entropy for the signing secret outside development.
const MIN_SECRET_BYTES: usize = 32;

const DEV_JWT_SECRET: &str = "dev-secret-change-in-production-minimum-32-characters";
const DEV_ADMIN_PASSWORD: &str = "changeme-admin";

/// Application configuration, read once at startup and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub batch_size: usize,
    pub enable_encryption: bool,
    pub auto_analyze: bool,
    pub jwt_secret: String,
    pub jwt_expiration_hours: i64,
    pub admin_username: String,
    pub admin_password: String,
    pub data_dir: PathBuf,
    pub log_level: String,
    encryption_key_material: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let port = env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let batch_size = env::var("BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(10);

        let enable_encryption = env::var("ENABLE_ENCRYPTION")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        let auto_analyze = env::var("AUTO_ANALYZE")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
            .unwrap_or(true);

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.to_string());

        let jwt_expiration_hours = env::var("JWT_EXPIRATION_HOURS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(24);

        let admin_username = env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());
        let admin_password =
            env::var("ADMIN_PASSWORD").unwrap_or_else(|_| DEV_ADMIN_PASSWORD.to_string());

        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));

        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        // Key material for at-rest encryption; falls back to the signing
        // secret so a single-secret deployment still gets a real key.
        let encryption_key_material =
            env::var("ENCRYPTION_KEY").unwrap_or_else(|_| jwt_secret.clone());

        let config = Self {
            port,
            environment,
            batch_size,
            enable_encryption,
            auto_analyze,
            jwt_secret,
            jwt_expiration_hours,
            admin_username,
            admin_password,
            data_dir,
            log_level,
            encryption_key_material,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.is_development() {
            if self.jwt_secret == DEV_JWT_SECRET {
                bail!("JWT_SECRET must be set explicitly outside development");
            }
            if self.jwt_secret.len() < MIN_SECRET_BYTES {
                bail!(
                    "JWT_SECRET must be at least {} bytes, got {}",
                    MIN_SECRET_BYTES,
                    self.jwt_secret.len()
                );
            }
        }
        Ok(())
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    pub fn uses_default_admin_password(&self) -> bool {
        self.admin_password == DEV_ADMIN_PASSWORD
    }

    /// 256-bit data-encryption key, or None when encryption is disabled.
    ///
    /// A 64-character hex ENCRYPTION_KEY is used verbatim; any other key
    /// material is stretched through SHA-256.
    pub fn data_key(&self) -> Option<[u8; 32]> {
        if !self.enable_encryption {
            return None;
        }

        let mut key = [0u8; 32];
        if let Ok(raw) = hex::decode(&self.encryption_key_material) {
            if raw.len() == 32 {
                key.copy_from_slice(&raw);
                return Some(key);
            }
        }

        let digest = Sha256::digest(self.encryption_key_material.as_bytes());
        key.copy_from_slice(&digest);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config {
            port: 8080,
            environment: "development".to_string(),
            batch_size: 10,
            enable_encryption: true,
            auto_analyze: true,
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_expiration_hours: 24,
            admin_username: "admin".to_string(),
            admin_password: DEV_ADMIN_PASSWORD.to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            encryption_key_material: "test-key-material".to_string(),
        }
    }

    #[test]
    fn test_data_key_is_stable() {
        let config = test_config();
        let k1 = config.data_key().unwrap();
        let k2 = config.data_key().unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_hex_key_used_verbatim() {
        let mut config = test_config();
        config.encryption_key_material = "ab".repeat(32);
        let key = config.data_key().unwrap();
        assert_eq!(key, [0xabu8; 32]);
    }

    #[test]
    fn test_data_key_disabled() {
        let mut config = test_config();
        config.enable_encryption = false;
        assert!(config.data_key().is_none());
    }

    #[test]
    fn test_production_requires_explicit_secret() {
        let mut config = test_config();
        config.environment = "production".to_string();
        assert!(config.validate().is_err());

        config.jwt_secret = "x".repeat(32);
        assert!(config.validate().is_ok());

        config.jwt_secret = "short".to_string();
        assert!(config.validate().is_err());
    }
}
