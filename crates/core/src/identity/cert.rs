/// Ed25519 identity certificates embedded in bridge descriptors
///
/// The `identity-ed25519` block holds a certificate that certifies the
/// bridge's signing key with its ed25519 master key. The master key itself
/// travels in extension type 4, so it can be recovered without trusting
/// the separate `master-key-ed25519` line.

use crate::digest;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::warn;

const CERT_VERSION: u8 = 0x01;
const CERT_TYPE_IDENTITY: u8 = 0x04;
const KEY_TYPE_ED25519: u8 = 0x01;
const SIGNATURE_LEN: usize = 64;

/// Extension type carrying the key that signed the certificate
pub const MASTER_KEY_EXTENSION: u8 = 0x04;

/// Errors while decoding an identity certificate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CertError {
    #[error("Invalid base64 in identity-ed25519 block")]
    InvalidBase64,

    #[error("Certificate truncated at offset {offset} (needed {needed} more bytes)")]
    Truncated { offset: usize, needed: usize },

    #[error("Unknown certificate version {0}")]
    UnknownVersion(u8),

    #[error("Unknown certificate type {0}")]
    UnknownCertType(u8),

    #[error("Unknown certified key type {0}")]
    UnknownKeyType(u8),

    #[error("No extensions in certificate")]
    NoExtensions,

    #[error("No master key extension in certificate")]
    MissingMasterKey,

    #[error("Master key is not a valid ed25519 point")]
    InvalidMasterKey,

    #[error("Certificate signature does not verify")]
    BadSignature,
}

/// Bounds-checked cursor over certificate bytes
pub struct CertReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> CertReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CertError> {
        if self.remaining() < len {
            return Err(CertError::Truncated {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CertError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CertError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, CertError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CertError> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.read_bytes(N)?);
        Ok(array)
    }
}

/// A decoded `identity-ed25519` certificate
#[derive(Debug, Clone)]
pub struct IdentityCert {
    /// Expiration, in hours since the epoch
    pub expiration_hours: u32,

    /// The signing key certified by the master key
    pub certified_key: [u8; 32],

    /// Master key, taken from the signed-with-key extension
    pub master_key: [u8; 32],

    /// Trailing signature, if the certificate carries one
    pub signature: Option<[u8; SIGNATURE_LEN]>,

    signed: Vec<u8>,
}

impl IdentityCert {
    /// Decode the base64 body between the BEGIN/END lines
    pub fn from_base64_block(text: &str) -> Result<Self, CertError> {
        let compact: String = text.split_whitespace().collect();
        let bytes = digest::decode_base64(&compact).ok_or(CertError::InvalidBase64)?;
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CertError> {
        let mut reader = CertReader::new(bytes);

        let version = reader.read_u8()?;
        if version != CERT_VERSION {
            return Err(CertError::UnknownVersion(version));
        }
        let cert_type = reader.read_u8()?;
        if cert_type != CERT_TYPE_IDENTITY {
            return Err(CertError::UnknownCertType(cert_type));
        }
        let expiration_hours = reader.read_u32()?;
        let key_type = reader.read_u8()?;
        if key_type != KEY_TYPE_ED25519 {
            return Err(CertError::UnknownKeyType(key_type));
        }
        let certified_key = reader.read_array::<32>()?;

        let extension_count = reader.read_u8()?;
        if extension_count == 0 {
            return Err(CertError::NoExtensions);
        }

        let mut master_key = None;
        for _ in 0..extension_count {
            let length = reader.read_u16()? as usize;
            let extension_type = reader.read_u8()?;
            let _flags = reader.read_u8()?;
            let data = reader.read_bytes(length)?;
            if master_key.is_none() && extension_type == MASTER_KEY_EXTENSION && length == 32 {
                let mut key = [0u8; 32];
                key.copy_from_slice(data);
                master_key = Some(key);
            }
        }
        let master_key = master_key.ok_or(CertError::MissingMasterKey)?;

        let signed_len = reader.position();
        let signature = if reader.remaining() >= SIGNATURE_LEN {
            Some(reader.read_array::<SIGNATURE_LEN>()?)
        } else {
            None
        };

        Ok(Self {
            expiration_hours,
            certified_key,
            master_key,
            signature,
            signed: bytes[..signed_len].to_vec(),
        })
    }

    /// Check the certificate's self-signature against its master key
    pub fn verify_signature(&self) -> Result<(), CertError> {
        let signature = self.signature.ok_or(CertError::Truncated {
            offset: self.signed.len(),
            needed: SIGNATURE_LEN,
        })?;
        let key =
            VerifyingKey::from_bytes(&self.master_key).map_err(|_| CertError::InvalidMasterKey)?;
        key.verify(&self.signed, &Signature::from_bytes(&signature))
            .map_err(|_| CertError::BadSignature)
    }
}

/// Recover the ed25519 master key from raw certificate bytes
pub fn extract_master_key(cert: &[u8]) -> Result<[u8; 32], CertError> {
    match IdentityCert::parse(cert) {
        Ok(parsed) => Ok(parsed.master_key),
        Err(e) => {
            warn!("Unable to locate master-key-ed25519 in identity-ed25519: {}", e);
            Err(e)
        }
    }
}
