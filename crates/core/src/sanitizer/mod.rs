/// Descriptor sanitizing
///
/// One line-oriented parser per record kind. Each parser only knows the
/// lines it can safely redact or copy; anything else drops the whole
/// record, since an unknown line might carry information that needs
/// redacting.

mod ed25519;
mod extra_info;
mod record;
mod server;
mod status;

pub use ed25519::{hashed_master_key_line, CertProgress, MasterKeyCheck};
pub use record::{decode_ascii, line_prefix, RecordDigest, SanitizedRecord};

use crate::address::{AddressAnonymizer, AddressError};
use crate::identity::CertError;
use bridgesan_common::limits::STALE_INPUT_SECS;
use bridgesan_common::{PublishedTime, RecordKind, TimeError};
use chrono::{Duration, NaiveDateTime};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Why a record was not sanitized
#[derive(Debug, thiserror::Error)]
pub enum SanitizeError {
    #[error("Secret store is poisoned; refusing to sanitize {0}")]
    SecretsPoisoned(RecordKind),

    #[error("Unrecognized line '{line}' in {kind}")]
    UnrecognizedLine { kind: RecordKind, line: String },

    #[error("Malformed line '{line}' in {kind}: {reason}")]
    MalformedLine {
        kind: RecordKind,
        line: String,
        reason: String,
    },

    #[error("Missing {field} in {kind}")]
    MissingField {
        kind: RecordKind,
        field: &'static str,
    },

    #[error("Malformed address '{address}' in {kind}")]
    MalformedAddress { kind: RecordKind, address: String },

    #[error("Mismatch between identity-ed25519 and master-key-ed25519 in {0}")]
    KeyMismatch(RecordKind),

    #[error("Invalid identity-ed25519 certificate in {kind}: {source}")]
    Certificate {
        kind: RecordKind,
        #[source]
        source: CertError,
    },

    #[error("Could not calculate {0} digest")]
    Digest(RecordKind),

    #[error("Invalid timestamp in {kind}: {source}")]
    Timestamp {
        kind: RecordKind,
        #[source]
        source: TimeError,
    },
}

impl SanitizeError {
    /// Poisoning ends all address hashing for the run; everything else only
    /// costs the current record
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::SecretsPoisoned(_))
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            Self::SecretsPoisoned(kind)
            | Self::KeyMismatch(kind)
            | Self::Digest(kind)
            | Self::UnrecognizedLine { kind, .. }
            | Self::MalformedLine { kind, .. }
            | Self::MissingField { kind, .. }
            | Self::MalformedAddress { kind, .. }
            | Self::Certificate { kind, .. }
            | Self::Timestamp { kind, .. } => *kind,
        }
    }

    pub(crate) fn unrecognized(kind: RecordKind, line: &str) -> Self {
        Self::UnrecognizedLine {
            kind,
            line: line_prefix(line),
        }
    }

    pub(crate) fn malformed(kind: RecordKind, line: &str, reason: impl Into<String>) -> Self {
        Self::MalformedLine {
            kind,
            line: line_prefix(line),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(kind: RecordKind, field: &'static str) -> Self {
        Self::MissingField { kind, field }
    }

    pub(crate) fn from_address(kind: RecordKind, err: AddressError) -> Self {
        match err {
            AddressError::Malformed(address) => Self::MalformedAddress { kind, address },
            AddressError::SecretsUnavailable(_) => Self::SecretsPoisoned(kind),
        }
    }

    pub(crate) fn timestamp(kind: RecordKind, source: TimeError) -> Self {
        Self::Timestamp { kind, source }
    }
}

/// Sanitizes all three kinds of bridge descriptors for one run
pub struct DescriptorSanitizer<R> {
    anonymizer: AddressAnonymizer<R>,
    cutoff: NaiveDateTime,
    verify_identity_signatures: bool,
    warned_about_interval: bool,
    newest_published: BTreeMap<RecordKind, PublishedTime>,
}

impl<R: RngCore + CryptoRng> DescriptorSanitizer<R> {
    pub fn new(anonymizer: AddressAnonymizer<R>, cutoff: NaiveDateTime) -> Self {
        Self {
            anonymizer,
            cutoff,
            verify_identity_signatures: false,
            warned_about_interval: false,
            newest_published: BTreeMap::new(),
        }
    }

    /// Also require identity certificates to carry a valid self-signature
    pub fn with_signature_verification(mut self, enabled: bool) -> Self {
        self.verify_identity_signatures = enabled;
        self
    }

    pub fn anonymizer(&self) -> &AddressAnonymizer<R> {
        &self.anonymizer
    }

    pub fn anonymizer_mut(&mut self) -> &mut AddressAnonymizer<R> {
        &mut self.anonymizer
    }

    pub fn cutoff(&self) -> &NaiveDateTime {
        &self.cutoff
    }

    /// Sanitize one raw record of the given kind.
    ///
    /// `publication_time` is only used for network statuses without a
    /// `published` line.
    pub fn sanitize(
        &mut self,
        kind: RecordKind,
        data: &[u8],
        publication_time: Option<PublishedTime>,
    ) -> Result<SanitizedRecord, SanitizeError> {
        let result = match kind {
            RecordKind::NetworkStatus => self.sanitize_network_status(data, publication_time),
            RecordKind::ServerDescriptor => self.sanitize_server_descriptor(data),
            RecordKind::ExtraInfo => self.sanitize_extra_info(data),
        };
        if let Err(e) = &result {
            if e.is_run_fatal() {
                debug!("Not sanitizing {}: {}", kind, e);
            } else {
                warn!("Skipping {}: {}", kind, e);
            }
        }
        result
    }

    /// Remember the newest publication per kind and complain about
    /// publications outside the sanitizing interval
    fn note_published(&mut self, kind: RecordKind, published: PublishedTime) {
        let newest = self.newest_published.entry(kind).or_insert(published);
        if published > *newest {
            *newest = published;
        }

        if *published.as_naive() < self.cutoff {
            if self.warned_about_interval {
                debug!(
                    "Sanitizing and storing {} with publication time outside our \
                     descriptor sanitizing interval.",
                    kind
                );
            } else {
                warn!(
                    "Sanitizing and storing {} with publication time outside our \
                     descriptor sanitizing interval.",
                    kind
                );
                self.warned_about_interval = true;
            }
        }
    }

    pub fn newest_published(&self, kind: RecordKind) -> Option<PublishedTime> {
        self.newest_published.get(&kind).copied()
    }

    /// Kinds whose newest publication this run is older than 5:30 hours
    pub fn check_stale_descriptors(&self, now: NaiveDateTime) -> Vec<(RecordKind, PublishedTime)> {
        let too_old = now - Duration::seconds(STALE_INPUT_SECS);
        let mut stale = Vec::new();
        for (kind, newest) in &self.newest_published {
            if *newest.as_naive() < too_old {
                warn!(
                    "The last known {} was published {}, which is more than 5:30 hours in the past.",
                    kind, newest
                );
                stale.push((*kind, *newest));
            }
        }
        stale
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::digest;
    use crate::identity::Fingerprint;
    use crate::secrets::SecretKeyStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::path::Path;

    pub const FINGERPRINT_HEX: &str = "46D4A71197B8FA515A826C6B017C522FE264655B";

    pub fn fingerprint() -> Fingerprint {
        Fingerprint::from_hex(FINGERPRINT_HEX).unwrap()
    }

    pub fn fingerprint_base64() -> String {
        digest::base64_unpadded(fingerprint().as_bytes())
    }

    pub fn no_cutoff() -> NaiveDateTime {
        *PublishedTime::parse("1999-12-31 23:59:59").unwrap().as_naive()
    }

    pub fn sanitizer_at(path: &Path) -> DescriptorSanitizer<StdRng> {
        let store = SecretKeyStore::load(path, no_cutoff(), StdRng::seed_from_u64(11));
        DescriptorSanitizer::new(AddressAnonymizer::hashing(store), no_cutoff())
    }

    pub fn poisoned_sanitizer(dir: &Path) -> DescriptorSanitizer<StdRng> {
        let blocker = dir.join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let mut store =
            SecretKeyStore::load(blocker.join("secrets"), no_cutoff(), StdRng::seed_from_u64(11));
        let month = "2024-05".parse().unwrap();
        assert!(store.secret_for(month).is_err());
        DescriptorSanitizer::new(AddressAnonymizer::hashing(store), no_cutoff())
    }
}
