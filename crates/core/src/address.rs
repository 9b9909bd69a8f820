/// Address pseudonymization
///
/// Replaces a bridge's real IPv4/IPv6 address with a stable pseudonym that
/// depends on the address, the bridge fingerprint and the secret of the
/// month in which the descriptor was published. Without the secret the
/// mapping cannot be reproduced; with a new month it changes.

use crate::identity::{Fingerprint, FINGERPRINT_LEN};
use crate::digest;
use crate::secrets::{SecretError, SecretKeyStore};
use bridgesan_common::limits::{FULL_SECRET_LEN, IPV4_SECRET_LEN};
use bridgesan_common::PublishedTime;
use rand::{CryptoRng, RngCore};
use std::net::{Ipv4Addr, Ipv6Addr};

/// IPv4 pseudonyms live in 10.0.0.0/8
pub const IPV4_PREFIX: u8 = 10;

/// IPv6 pseudonyms live in this unique-local prefix
pub const IPV6_PREFIX: &str = "fd9f:2e19:3bcf::";

/// Returned for every IPv4 address when hashing is disabled
pub const IPV4_PLACEHOLDER: &str = "127.0.0.1";

const IPV4_HASH_INPUT_LEN: usize = 4 + FINGERPRINT_LEN + IPV4_SECRET_LEN;
const IPV6_SECRET_LEN: usize = FULL_SECRET_LEN - IPV4_SECRET_LEN;
const IPV6_HASH_INPUT_LEN: usize = 16 + FINGERPRINT_LEN + IPV6_SECRET_LEN;

#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("Malformed address '{0}'")]
    Malformed(String),

    #[error("No secret available: {0}")]
    SecretsUnavailable(#[from] SecretError),
}

impl AddressError {
    /// Whether the failure comes from the secret store rather than the input
    pub fn is_secret_failure(&self) -> bool {
        matches!(self, Self::SecretsUnavailable(_))
    }
}

/// Hash an IPv4 address with the 31-byte IPv4 part of a monthly secret
pub fn hash_ipv4(address: Ipv4Addr, fingerprint: &Fingerprint, secret: &[u8]) -> Ipv4Addr {
    let mut input = [0u8; IPV4_HASH_INPUT_LEN];
    input[..4].copy_from_slice(&address.octets());
    input[4..24].copy_from_slice(fingerprint.as_bytes());
    input[24..].copy_from_slice(&secret[..IPV4_SECRET_LEN]);
    let hash = digest::sha256(&input);
    Ipv4Addr::new(IPV4_PREFIX, hash[0], hash[1], hash[2])
}

/// Hash an IPv6 address with the 19 bytes that extend a secret to full length
pub fn hash_ipv6(address: Ipv6Addr, fingerprint: &Fingerprint, secret_tail: &[u8]) -> String {
    let mut input = [0u8; IPV6_HASH_INPUT_LEN];
    input[..16].copy_from_slice(&address.octets());
    input[16..36].copy_from_slice(fingerprint.as_bytes());
    input[36..].copy_from_slice(&secret_tail[..IPV6_SECRET_LEN]);
    let hash = digest::sha256(&input);
    format!(
        "{}{:02x}:{:02x}{:02x}",
        IPV6_PREFIX, hash[29], hash[30], hash[31]
    )
}

/// Maps real addresses to pseudonyms, drawing secrets from the store it owns
pub struct AddressAnonymizer<R> {
    secrets: Option<SecretKeyStore<R>>,
}

impl<R: RngCore + CryptoRng> AddressAnonymizer<R> {
    /// Replace addresses with keyed hashes
    pub fn hashing(secrets: SecretKeyStore<R>) -> Self {
        Self {
            secrets: Some(secrets),
        }
    }

    /// Replace every address with a fixed placeholder; for test deployments
    pub fn placeholder() -> Self {
        Self { secrets: None }
    }

    /// Only a hashing anonymizer can be poisoned
    pub fn is_poisoned(&self) -> bool {
        self.secrets.as_ref().is_some_and(SecretKeyStore::is_poisoned)
    }

    pub fn secrets_mut(&mut self) -> Option<&mut SecretKeyStore<R>> {
        self.secrets.as_mut()
    }

    pub fn anonymize_ipv4(
        &mut self,
        address: &str,
        fingerprint: &Fingerprint,
        published: &PublishedTime,
    ) -> Result<String, AddressError> {
        let Some(secrets) = self.secrets.as_mut() else {
            return Ok(IPV4_PLACEHOLDER.to_string());
        };
        if secrets.is_poisoned() {
            return Err(SecretError::Poisoned.into());
        }
        let parsed: Ipv4Addr = address
            .parse()
            .map_err(|_| AddressError::Malformed(address.to_string()))?;
        let secret = secrets.secret_for(published.month())?;
        Ok(hash_ipv4(parsed, fingerprint, secret).to_string())
    }

    /// Anonymize an IPv6 address given without brackets
    pub fn anonymize_ipv6(
        &mut self,
        address: &str,
        fingerprint: &Fingerprint,
        published: &PublishedTime,
    ) -> Result<String, AddressError> {
        let Some(secrets) = self.secrets.as_mut() else {
            return Ok(IPV6_PREFIX.to_string());
        };
        if secrets.is_poisoned() {
            return Err(SecretError::Poisoned.into());
        }
        let parsed: Ipv6Addr = address
            .parse()
            .map_err(|_| AddressError::Malformed(address.to_string()))?;
        let secret = secrets.extend_for_ipv6(published.month())?;
        Ok(hash_ipv6(parsed, fingerprint, &secret[IPV4_SECRET_LEN..]))
    }

    /// Anonymize `address:port` or `[address]:port`, keeping the port
    pub fn scrub_or_address(
        &mut self,
        or_address: &str,
        fingerprint: &Fingerprint,
        published: &PublishedTime,
    ) -> Result<String, AddressError> {
        let malformed = || AddressError::Malformed(or_address.to_string());
        let (address, port) = or_address.rsplit_once(':').ok_or_else(malformed)?;
        if let Some(inner) = address.strip_prefix('[') {
            let inner = inner.strip_suffix(']').ok_or_else(malformed)?;
            let scrubbed = self.anonymize_ipv6(inner, fingerprint, published)?;
            Ok(format!("[{}]:{}", scrubbed, port))
        } else {
            let scrubbed = self.anonymize_ipv4(address, fingerprint, published)?;
            Ok(format!("{}:{}", scrubbed, port))
        }
    }
}
