use crate::digest;
use std::fmt;

pub const FINGERPRINT_LEN: usize = 20;

/// Identity of a bridge: the SHA-1 digest of its long-term identity key
///
/// Never written out as is; sanitized descriptors only carry its SHA-1 hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    pub fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, FingerprintError> {
        let array: [u8; FINGERPRINT_LEN] = bytes
            .try_into()
            .map_err(|_| FingerprintError::InvalidLength(bytes.len()))?;
        Ok(Self(array))
    }

    /// Parse hex, tolerating the space-separated groups of `fingerprint` lines
    pub fn from_hex(s: &str) -> Result<Self, FingerprintError> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(compact.to_ascii_lowercase())
            .map_err(|_| FingerprintError::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Parse the unpadded base64 form used in status entries
    pub fn from_base64(s: &str) -> Result<Self, FingerprintError> {
        let bytes = digest::decode_base64(s).ok_or(FingerprintError::InvalidBase64)?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// SHA-1 of the fingerprint, the only form that gets published
    pub fn hashed(&self) -> [u8; 20] {
        digest::sha1(&self.0)
    }

    pub fn hashed_hex(&self) -> String {
        hex::encode(self.hashed())
    }

    pub fn hashed_hex_upper(&self) -> String {
        hex::encode_upper(self.hashed())
    }

    /// Hashed fingerprint as in `fingerprint` lines: uppercase groups of four
    pub fn hashed_grouped(&self) -> String {
        let hex = self.hashed_hex_upper();
        hex.as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Hashed fingerprint as in status entries: base64, cut to 27 characters
    pub fn hashed_base64(&self) -> String {
        digest::base64_unpadded(&self.hashed())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keep the real identity out of logs
        write!(f, "Fingerprint(hashed {})", self.hashed_hex())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("Invalid hexadecimal fingerprint")]
    InvalidHex,

    #[error("Invalid base64 fingerprint")]
    InvalidBase64,

    #[error("Invalid fingerprint length {0} (expected 20 bytes)")]
    InvalidLength(usize),
}
