//! Configuration types and validation for the review service
//! Author: kartik4091
//! Created: 2025-06-03

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::security::{CipherSuite, FieldCodec};

pub const ENV_FIELD_KEY: &str = "BLINDREVIEW_FIELD_KEY";
pub const ENV_DATABASE_URL: &str = "BLINDREVIEW_DATABASE_URL";
pub const ENV_UPLOAD_ROOT: &str = "BLINDREVIEW_UPLOAD_ROOT";

/// Where manuscripts and their rows live
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_url: String,
    pub upload_root: PathBuf,
    pub max_connections: u32,
}

/// Field encryption settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub cipher_suite: CipherSuite,
    /// Base64 key, must match the suite's key length
    pub field_key: String,
}

/// Timeouts and mask settings for blur/unblur
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedactionConfig {
    pub document_timeout_ms: u64,
    pub lock_wait_ms: u64,
    pub mask_char: char,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    pub tesseract_binary: PathBuf,
    pub languages: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub with_target: bool,
}

/// Top-level service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub redaction: RedactionConfig,
    pub ocr: OcrConfig,
    pub logging: LoggingConfig,
}

// Defaults
impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://blindreview.db".to_string(),
            upload_root: PathBuf::from("uploads"),
            max_connections: 5,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cipher_suite: CipherSuite::default(),
            field_key: String::new(),
        }
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("cipher_suite", &self.cipher_suite)
            .field("field_key", &"<redacted>")
            .finish()
    }
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            document_timeout_ms: 120_000,
            lock_wait_ms: 5_000,
            mask_char: '*',
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tesseract_binary: PathBuf::from("tesseract"),
            languages: vec!["eng".to_string()],
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

impl RedactionConfig {
    pub fn document_timeout(&self) -> Duration {
        Duration::from_millis(self.document_timeout_ms)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

impl ServiceConfig {
    /// Reads a YAML file, applies environment overrides and validates
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_yaml_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Defaults plus environment overrides, validated
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(ENV_FIELD_KEY) {
            self.security.field_key = key;
        }
        if let Some(url) = lookup(ENV_DATABASE_URL) {
            self.storage.database_url = url;
        }
        if let Some(root) = lookup(ENV_UPLOAD_ROOT) {
            self.storage.upload_root = PathBuf::from(root);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.security.field_key.trim().is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "field key is empty, set security.field_key or {}",
                ENV_FIELD_KEY
            )));
        }
        // decodes and checks the key length for the suite
        FieldCodec::from_base64_key(self.security.cipher_suite, &self.security.field_key)?;

        if self.storage.database_url.is_empty() {
            return Err(Error::InvalidConfiguration("database url is empty".to_string()));
        }
        if self.storage.max_connections == 0 {
            return Err(Error::InvalidConfiguration(
                "storage.max_connections must be at least 1".to_string(),
            ));
        }
        if self.redaction.document_timeout_ms == 0 || self.redaction.lock_wait_ms == 0 {
            return Err(Error::InvalidConfiguration(
                "redaction timeouts must be non-zero".to_string(),
            ));
        }
        if self.redaction.mask_char.is_whitespace() || self.redaction.mask_char.is_control() {
            return Err(Error::InvalidConfiguration(
                "mask character must be visible".to_string(),
            ));
        }
        Ok(())
    }

    pub fn field_codec(&self) -> Result<FieldCodec> {
        FieldCodec::from_base64_key(self.security.cipher_suite, &self.security.field_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_128: &str = "YXNkZmdoamtscXdlcnR5dQ==";

    fn valid() -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.security.field_key = KEY_128.to_string();
        config
    }

    #[test]
    fn test_yaml_sections_and_defaults() {
        let config = ServiceConfig::from_yaml_str(
            r#"
storage:
  database_url: "sqlite::memory:"
security:
  cipher_suite: aes-256-gcm
redaction:
  lock_wait_ms: 250
  document_timeout_ms: 1500
"#,
        )
        .unwrap();

        assert_eq!(config.storage.database_url, "sqlite::memory:");
        assert_eq!(config.storage.upload_root, PathBuf::from("uploads"));
        assert_eq!(config.security.cipher_suite, CipherSuite::Aes256Gcm);
        assert_eq!(config.redaction.lock_wait(), Duration::from_millis(250));
        assert_eq!(config.redaction.document_timeout(), Duration::from_millis(1500));
        assert_eq!(config.redaction.mask_char, '*');
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_overrides_take_precedence() {
        let mut config = valid();
        config.apply_overrides(|name| match name {
            ENV_DATABASE_URL => Some("sqlite://other.db".to_string()),
            ENV_UPLOAD_ROOT => Some("/srv/papers".to_string()),
            _ => None,
        });
        assert_eq!(config.storage.database_url, "sqlite://other.db");
        assert_eq!(config.storage.upload_root, PathBuf::from("/srv/papers"));
        assert_eq!(config.security.field_key, KEY_128);
    }

    #[test]
    fn test_validation() {
        assert!(valid().validate().is_ok());
        assert!(ServiceConfig::default().validate().is_err());

        let mut short = valid();
        short.security.cipher_suite = CipherSuite::Aes256Cbc;
        assert!(short.validate().is_err());

        let mut zero = valid();
        zero.redaction.document_timeout_ms = 0;
        assert!(zero.validate().is_err());

        let mut blank_mask = valid();
        blank_mask.redaction.mask_char = ' ';
        assert!(blank_mask.validate().is_err());
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", valid());
        assert!(!rendered.contains(KEY_128));
        assert!(rendered.contains("<redacted>"));
    }
}
