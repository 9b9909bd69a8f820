use super::ed25519::{CertProgress, MasterKeyCheck};
use super::record::{decode_ascii, sha1_of_span, sha256_of_span, RecordDigest, SanitizedRecord};
use super::server::ParseState;
use super::{DescriptorSanitizer, SanitizeError};
use crate::identity::Fingerprint;
use bridgesan_common::{PublishedTime, RecordKind};
use rand::{CryptoRng, RngCore};

const KIND: RecordKind = RecordKind::ExtraInfo;

const DIGEST_START: &str = "extra-info ";
const DIGEST_END: &str = "\nrouter-signature\n";
const SHA256_DIGEST_END: &str = "\n-----END SIGNATURE-----\n";

/// Statistics lines copied verbatim
const PASSTHROUGH_PREFIXES: &[&str] = &[
    "write-history ",
    "read-history ",
    "geoip-start-time ",
    "geoip-client-origins ",
    "geoip-db-digest ",
    "geoip6-db-digest ",
    "conn-bi-direct ",
    "bridge-",
    "dirreq-",
    "cell-",
    "entry-",
    "exit-",
];

impl<R: RngCore + CryptoRng> DescriptorSanitizer<R> {
    /// Sanitize a single bridge extra-info descriptor.
    ///
    /// Extra-info descriptors carry no addresses, so a poisoned secret
    /// store does not stop them.
    pub fn sanitize_extra_info(&mut self, data: &[u8]) -> Result<SanitizedRecord, SanitizeError> {
        let text = decode_ascii(data);
        let mut keys = MasterKeyCheck::new(KIND, self.verify_identity_signatures);
        let mut lines: Vec<String> = Vec::new();
        let mut published: Option<PublishedTime> = None;
        let mut state = ParseState::Body;
        let mut signed = false;

        for line in text.lines() {
            if let ParseState::IdentityCert(block) = state {
                state = match keys.continue_certificate(block, line)? {
                    CertProgress::Done(hashed_line) => {
                        lines.push(hashed_line);
                        ParseState::Body
                    }
                    CertProgress::Pending(block) => ParseState::IdentityCert(block),
                };
                continue;
            }

            if let Some(rest) = line.strip_prefix("extra-info ") {
                let parts: Vec<&str> = rest.split(' ').collect();
                if parts.len() < 2 || !lines.is_empty() {
                    return Err(SanitizeError::malformed(KIND, line, "invalid extra-info line"));
                }
                let fingerprint = Fingerprint::from_hex(parts[1])
                    .map_err(|e| SanitizeError::malformed(KIND, line, e.to_string()))?;
                lines.push(format!(
                    "extra-info {} {}",
                    parts[0],
                    fingerprint.hashed_hex_upper()
                ));
                continue;
            }
            if lines.is_empty() {
                return Err(SanitizeError::missing(KIND, "extra-info"));
            }

            if let Some(rest) = line.strip_prefix("published ") {
                published =
                    Some(PublishedTime::parse(rest).map_err(|e| SanitizeError::timestamp(KIND, e))?);
                lines.push(line.to_string());
            } else if line.starts_with("transport ") {
                let parts: Vec<&str> = line.split(' ').collect();
                if parts.len() < 3 {
                    return Err(SanitizeError::malformed(KIND, line, "too few fields"));
                }
                lines.push(format!("transport {}", parts[1]));
            } else if line.starts_with("transport-info ") || line.starts_with("router-sig-ed25519 ")
            {
                // dropped
            } else if line == "identity-ed25519" {
                keys.expect_first_certificate(line)?;
                state = ParseState::IdentityCert(String::new());
            } else if let Some(value) = line.strip_prefix("master-key-ed25519 ") {
                keys.record_declared(line, value)?;
            } else if PASSTHROUGH_PREFIXES.iter().any(|p| line.starts_with(p)) {
                lines.push(line.to_string());
            } else if line.starts_with("router-signature") {
                signed = true;
                break;
            } else {
                return Err(SanitizeError::unrecognized(KIND, line));
            }
        }

        if let ParseState::IdentityCert(_) = state {
            return Err(SanitizeError::malformed(
                KIND,
                "identity-ed25519",
                "certificate not terminated",
            ));
        }
        if !signed {
            return Err(SanitizeError::missing(KIND, "router-signature"));
        }
        let published = published.ok_or_else(|| SanitizeError::missing(KIND, "published"))?;

        let sha1_hex =
            sha1_of_span(data, DIGEST_START, DIGEST_END).ok_or(SanitizeError::Digest(KIND))?;
        let sha256_base64 = if keys.has_certificate() {
            Some(
                sha256_of_span(data, DIGEST_START, SHA256_DIGEST_END)
                    .ok_or(SanitizeError::Digest(KIND))?,
            )
        } else {
            None
        };

        self.note_published(KIND, published);
        Ok(SanitizedRecord {
            kind: KIND,
            published,
            lines,
            digest: RecordDigest {
                sha1_hex,
                sha256_base64,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::super::server::tests::{cert_lines, declared_key};
    use super::*;
    use crate::digest;

    fn extra_info(with_cert: bool, extra: &str) -> String {
        let mut raw = format!("extra-info Unnamed {}\n", FINGERPRINT_HEX);
        if with_cert {
            raw.push_str(&cert_lines());
            raw.push_str(&format!("master-key-ed25519 {}\n", declared_key()));
        }
        raw.push_str(&format!(
            "published 2024-05-17 12:41:39\n\
             write-history 2024-05-17 10:23:44 (86400 s) 1,2,3\n\
             read-history 2024-05-17 10:23:44 (86400 s) 4,5,6\n\
             geoip-db-digest 09A0E093100B279AD9CFF47A67B13A21C6E1483F\n\
             transport obfs4 198.51.100.7:41234 cert=abcdef,iat-mode=0\n\
             transport-info version=1.2\n\
             bridge-stats-end 2024-05-17 10:23:44 (86400 s)\n\
             bridge-ips us=8,de=8\n\
             dirreq-v3-ips us=8\n\
             {extra}\
             router-sig-ed25519 c2lnbmF0dXJl\n\
             router-signature\n\
             -----BEGIN SIGNATURE-----\n\
             c2lnbmF0dXJl\n\
             -----END SIGNATURE-----\n",
            extra = extra
        ));
        raw
    }

    #[test]
    fn test_sanitizes_extra_info() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = extra_info(false, "");
        let record = sanitizer.sanitize_extra_info(raw.as_bytes()).unwrap();

        assert_eq!(
            record.lines[0],
            format!("extra-info Unnamed {}", fingerprint().hashed_hex_upper())
        );
        assert_eq!(record.lines[1], "published 2024-05-17 12:41:39");
        assert!(record.lines.contains(&"transport obfs4".to_string()));
        assert!(record.lines.contains(&"bridge-ips us=8,de=8".to_string()));

        let rendered = record.render();
        assert!(rendered.starts_with("@type bridge-extra-info 1.3\n"));
        assert!(!rendered.contains(FINGERPRINT_HEX));
        assert!(!rendered.contains("198.51.100.7"));
        assert!(!rendered.contains("transport-info"));
        assert!(!rendered.contains("router-sig-ed25519"));
        assert!(record.digest.sha256_base64.is_none());
        assert_eq!(
            record.digest.sha1_hex,
            sha1_of_span(raw.as_bytes(), DIGEST_START, DIGEST_END).unwrap()
        );
    }

    #[test]
    fn test_extra_info_with_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = extra_info(true, "");
        let record = sanitizer.sanitize_extra_info(raw.as_bytes()).unwrap();

        assert!(record.lines[1].starts_with("master-key-ed25519 "));
        assert_eq!(
            record
                .lines
                .iter()
                .filter(|l| l.starts_with("master-key-ed25519 "))
                .count(),
            1
        );
        assert!(!record.render().contains(&declared_key()));
        assert_eq!(
            record.digest.sha256_base64,
            sha256_of_span(raw.as_bytes(), DIGEST_START, SHA256_DIGEST_END)
        );
    }

    #[test]
    fn test_mismatched_master_key_drops_extra_info() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = extra_info(true, "").replace(
            &format!("master-key-ed25519 {}", declared_key()),
            &format!("master-key-ed25519 {}", digest::base64_unpadded(&[1u8; 32])),
        );
        assert!(matches!(
            sanitizer.sanitize_extra_info(raw.as_bytes()),
            Err(SanitizeError::KeyMismatch(RecordKind::ExtraInfo))
        ));
    }

    #[test]
    fn test_short_transport_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = extra_info(false, "transport meek\n");
        assert!(matches!(
            sanitizer.sanitize_extra_info(raw.as_bytes()),
            Err(SanitizeError::MalformedLine { .. })
        ));
    }

    #[test]
    fn test_unknown_line_drops_extra_info() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = extra_info(false, "hidserv-stats-end 2024-05-17 10:23:44 (86400 s)\n");
        assert!(matches!(
            sanitizer.sanitize_extra_info(raw.as_bytes()),
            Err(SanitizeError::UnrecognizedLine { .. })
        ));
    }

    #[test]
    fn test_sanitizing_twice_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = extra_info(true, "");
        let first = sanitizer.sanitize_extra_info(raw.as_bytes()).unwrap();
        let second = sanitizer.sanitize_extra_info(raw.as_bytes()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_poisoned_store_still_sanitizes_extra_info() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = poisoned_sanitizer(dir.path());
        assert!(sanitizer
            .sanitize_extra_info(extra_info(false, "").as_bytes())
            .is_ok());
    }
}
