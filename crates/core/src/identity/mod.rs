pub(crate) mod cert;
mod fingerprint;

pub use cert::{extract_master_key, CertError, CertReader, IdentityCert, MASTER_KEY_EXTENSION};
pub use fingerprint::{Fingerprint, FingerprintError, FINGERPRINT_LEN};
