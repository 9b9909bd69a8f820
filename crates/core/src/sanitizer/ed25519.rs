use super::SanitizeError;
use crate::digest;
use crate::identity::IdentityCert;
use bridgesan_common::RecordKind;
use tracing::warn;

/// `master-key-ed25519` line carrying the SHA-256 of the master key
pub fn hashed_master_key_line(master_key: &[u8; 32]) -> String {
    format!(
        "master-key-ed25519 {}",
        digest::base64_unpadded(&digest::sha256(master_key))
    )
}

const CERT_BEGIN: &str = "-----BEGIN ED25519 CERT-----";
const CERT_END: &str = "-----END ED25519 CERT-----";

/// Result of feeding one line of an `identity-ed25519` block
pub enum CertProgress {
    /// Block still open; the base64 collected so far
    Pending(String),
    /// Block closed; the hashed `master-key-ed25519` line replacing it
    Done(String),
}

/// Cross-check between the master key certified in `identity-ed25519` and
/// the one declared in `master-key-ed25519`
///
/// The two lines may come in either order; the record is rejected as soon
/// as both are known and differ.
#[derive(Debug)]
pub struct MasterKeyCheck {
    kind: RecordKind,
    verify_signature: bool,
    from_cert: Option<[u8; 32]>,
    declared: Option<[u8; 32]>,
}

impl MasterKeyCheck {
    pub fn new(kind: RecordKind, verify_signature: bool) -> Self {
        Self {
            kind,
            verify_signature,
            from_cert: None,
            declared: None,
        }
    }

    pub fn has_certificate(&self) -> bool {
        self.from_cert.is_some()
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Refuse a second `identity-ed25519`, which could carry another key
    pub fn expect_first_certificate(&self, line: &str) -> Result<(), SanitizeError> {
        if self.has_certificate() {
            return Err(SanitizeError::malformed(
                self.kind,
                line,
                "repeated identity certificate",
            ));
        }
        Ok(())
    }

    /// Feed one line of an open certificate block
    pub fn continue_certificate(
        &mut self,
        mut block: String,
        line: &str,
    ) -> Result<CertProgress, SanitizeError> {
        if line == CERT_END {
            return self.record_certificate(&block).map(CertProgress::Done);
        }
        if line != CERT_BEGIN {
            block.push_str(line);
        }
        Ok(CertProgress::Pending(block))
    }

    /// Decode the certificate block and return the line replacing it
    pub fn record_certificate(&mut self, block: &str) -> Result<String, SanitizeError> {
        let cert = IdentityCert::from_base64_block(block).map_err(|source| {
            warn!("Unable to locate master-key-ed25519 in identity-ed25519: {}", source);
            SanitizeError::Certificate {
                kind: self.kind,
                source,
            }
        })?;
        if self.verify_signature {
            cert.verify_signature().map_err(|source| SanitizeError::Certificate {
                kind: self.kind,
                source,
            })?;
        }
        self.from_cert = Some(cert.master_key);
        self.compare()?;
        Ok(hashed_master_key_line(&cert.master_key))
    }

    /// Record the value of a `master-key-ed25519` line
    pub fn record_declared(&mut self, line: &str, value: &str) -> Result<(), SanitizeError> {
        let bytes = digest::decode_base64(value)
            .ok_or_else(|| SanitizeError::malformed(self.kind, line, "invalid base64 key"))?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| SanitizeError::malformed(self.kind, line, "key is not 32 bytes"))?;
        self.declared = Some(key);
        self.compare()
    }

    fn compare(&self) -> Result<(), SanitizeError> {
        match (&self.from_cert, &self.declared) {
            (Some(from_cert), Some(declared)) if from_cert != declared => {
                warn!("Mismatch between identity-ed25519 and master-key-ed25519.  Skipping.");
                Err(SanitizeError::KeyMismatch(self.kind))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::cert::tests::{build_cert, test_master};

    fn cert_block() -> String {
        digest::base64_padded(&build_cert(&test_master(), [9u8; 32]))
    }

    fn declared() -> String {
        digest::base64_unpadded(test_master().verifying_key().as_bytes())
    }

    #[test]
    fn test_matching_keys_in_either_order() {
        let mut check = MasterKeyCheck::new(RecordKind::ServerDescriptor, true);
        let line = check.record_certificate(&cert_block()).unwrap();
        assert_eq!(
            line,
            hashed_master_key_line(test_master().verifying_key().as_bytes())
        );
        assert!(check.record_declared("master-key-ed25519 x", &declared()).is_ok());

        let mut check = MasterKeyCheck::new(RecordKind::ExtraInfo, false);
        assert!(check.record_declared("master-key-ed25519 x", &declared()).is_ok());
        assert!(check.record_certificate(&cert_block()).is_ok());
        assert!(check.has_certificate());
    }

    #[test]
    fn test_mismatch_is_rejected() {
        let other = digest::base64_unpadded(&[1u8; 32]);

        let mut check = MasterKeyCheck::new(RecordKind::ServerDescriptor, false);
        check.record_certificate(&cert_block()).unwrap();
        assert!(matches!(
            check.record_declared("master-key-ed25519 x", &other),
            Err(SanitizeError::KeyMismatch(RecordKind::ServerDescriptor))
        ));

        let mut check = MasterKeyCheck::new(RecordKind::ServerDescriptor, false);
        check.record_declared("master-key-ed25519 x", &other).unwrap();
        assert!(matches!(
            check.record_certificate(&cert_block()),
            Err(SanitizeError::KeyMismatch(_))
        ));
    }

    #[test]
    fn test_certificate_block_lines() {
        let block = cert_block();
        let (head, tail) = block.split_at(block.len() / 2);
        let mut check = MasterKeyCheck::new(RecordKind::ServerDescriptor, false);

        let mut pending = String::new();
        for line in [CERT_BEGIN, head, tail] {
            match check.continue_certificate(pending, line).unwrap() {
                CertProgress::Pending(acc) => pending = acc,
                CertProgress::Done(_) => panic!("block closed early"),
            }
        }
        match check.continue_certificate(pending, CERT_END).unwrap() {
            CertProgress::Done(line) => assert!(line.starts_with("master-key-ed25519 ")),
            CertProgress::Pending(_) => panic!("block not closed"),
        }
        assert!(check.expect_first_certificate("identity-ed25519").is_err());
    }

    #[test]
    fn test_bad_declared_key() {
        let mut check = MasterKeyCheck::new(RecordKind::ExtraInfo, false);
        assert!(matches!(
            check.record_declared("master-key-ed25519 AAAA", "AAAA"),
            Err(SanitizeError::MalformedLine { .. })
        ));
    }

    #[test]
    fn test_broken_certificate() {
        let mut check = MasterKeyCheck::new(RecordKind::ExtraInfo, false);
        assert!(matches!(
            check.record_certificate("AQQ="),
            Err(SanitizeError::Certificate { .. })
        ));
    }
}
