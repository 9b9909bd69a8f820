use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sanitizing constants
pub mod limits {
    /// Length of the secret part used for IPv4 addresses
    pub const IPV4_SECRET_LEN: usize = 31;

    /// Length of a secret that can also hash IPv6 addresses
    pub const FULL_SECRET_LEN: usize = 50;

    /// Status entries older than this relative to the status itself are suspicious
    pub const STATUS_STALENESS_SECS: i64 = 60 * 60;

    /// Newest publication of any kind older than this is worth a warning
    pub const STALE_INPUT_SECS: i64 = 330 * 60;

    /// Recent mirror files untouched for longer than this get removed
    pub const RECENT_RETENTION_SECS: i64 = 3 * 24 * 60 * 60;
}

/// Authority fingerprint used in status file names unless configured otherwise
pub const DEFAULT_AUTHORITY_FINGERPRINT: &str = "4A0CCD2DDC7995083D73F5D667100C8A5831F16D";

/// Sanitizer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Directory with raw bridge descriptors to import
    pub input_dir: PathBuf,

    /// Root of the permanent sanitized archive
    pub sanitized_dir: PathBuf,

    /// Root of the recent-activity mirror
    pub recent_dir: PathBuf,

    /// File holding one secret per month
    pub secrets_file: PathBuf,

    /// Replace addresses with keyed hashes; when false every address becomes
    /// a fixed placeholder (test deployments only)
    pub replace_ip_addresses_with_hashes: bool,

    /// Days to keep secrets around, -1 keeps them forever
    pub limit_bridge_descriptor_mappings: i64,

    /// Verify the self-signature of ed25519 identity certificates
    pub verify_identity_signatures: bool,

    /// Fingerprint of the bridge authority, used to name status files
    pub authority_fingerprint: String,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("in/bridge-descriptors"),
            sanitized_dir: PathBuf::from("out/bridge-descriptors"),
            recent_dir: PathBuf::from("recent/bridge-descriptors"),
            secrets_file: PathBuf::from("stats/bridge-ip-secrets"),
            replace_ip_addresses_with_hashes: true,
            limit_bridge_descriptor_mappings: -1,
            verify_identity_signatures: false,
            authority_fingerprint: DEFAULT_AUTHORITY_FINGERPRINT.to_string(),
        }
    }
}

impl SanitizerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = dir.into();
        self
    }

    pub fn with_output_dirs(
        mut self,
        sanitized: impl Into<PathBuf>,
        recent: impl Into<PathBuf>,
    ) -> Self {
        self.sanitized_dir = sanitized.into();
        self.recent_dir = recent.into();
        self
    }

    pub fn with_secrets_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.secrets_file = path.into();
        self
    }

    pub fn with_hashing(mut self, enabled: bool) -> Self {
        self.replace_ip_addresses_with_hashes = enabled;
        self
    }

    pub fn with_mapping_limit(mut self, days: i64) -> Self {
        self.limit_bridge_descriptor_mappings = days;
        self
    }

    /// Instant before which secrets are no longer kept.
    ///
    /// Without a limit this is the end of 1999, so every real month is
    /// retained. A limit reaching past the calendar range counts as no limit.
    pub fn cutoff(&self, now: NaiveDateTime) -> NaiveDateTime {
        let no_limit = NaiveDate::from_ymd_opt(1999, 12, 31)
            .and_then(|date| date.and_hms_opt(23, 59, 59))
            .unwrap_or(NaiveDateTime::MIN);
        if self.limit_bridge_descriptor_mappings < 0 {
            return no_limit;
        }
        TimeDelta::try_days(self.limit_bridge_descriptor_mappings)
            .and_then(|limit| now.checked_sub_signed(limit))
            .unwrap_or(no_limit)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, contents).map_err(|e| ConfigError::WriteError(e.to_string()))?;

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config file: {0}")]
    WriteError(String),
}
