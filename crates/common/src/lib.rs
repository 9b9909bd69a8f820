/// Shared types for the bridge descriptor sanitizer
///
/// Holds the value types every crate agrees on (months, publication
/// times, record kinds), the configuration file, and the run-level error.

pub mod config;
pub mod error;
pub mod types;

pub use config::{limits, ConfigError, SanitizerConfig, DEFAULT_AUTHORITY_FINGERPRINT};
pub use error::{Result, SanitizerError};
pub use types::{Month, PublishedTime, RecordKind, TimeError, PUBLISHED_FORMAT};
