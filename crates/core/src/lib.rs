pub mod address;
pub mod digest;
pub mod identity;
pub mod output;
pub mod sanitizer;
pub mod secrets;

pub use address::{AddressAnonymizer, AddressError, IPV4_PLACEHOLDER, IPV6_PREFIX};
pub use identity::{CertError, Fingerprint, FingerprintError, IdentityCert};

// Re-export secret types
pub use secrets::{MonthlySecret, PruneReport, SecretError, SecretKeyStore};

// Re-export sanitizer types
pub use sanitizer::{DescriptorSanitizer, RecordDigest, SanitizeError, SanitizedRecord};

// Re-export output types
pub use output::{SanitizedOutputWriter, WriteError, WriteOutcome};
