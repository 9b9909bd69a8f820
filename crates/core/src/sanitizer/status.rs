use super::record::{decode_ascii, RecordDigest, SanitizedRecord};
use super::{DescriptorSanitizer, SanitizeError};
use crate::digest;
use crate::identity::Fingerprint;
use bridgesan_common::limits::STATUS_STALENESS_SECS;
use bridgesan_common::{PublishedTime, RecordKind};
use rand::{CryptoRng, RngCore};
use std::collections::BTreeMap;
use tracing::warn;

const KIND: RecordKind = RecordKind::NetworkStatus;

/// Where the parser is within a status
enum StatusState {
    /// Before the first `r` line
    Header,
    /// Inside the entry started by the last `r` line
    Entry {
        fingerprint: Fingerprint,
        published: PublishedTime,
        key: String,
    },
}

struct StatusAccumulator {
    state: StatusState,
    published: Option<PublishedTime>,
    header: Vec<String>,
    /// Entries keyed by hashed identity, which is also the output order
    entries: BTreeMap<String, Vec<String>>,
    entry_times: Vec<PublishedTime>,
}

impl StatusAccumulator {
    fn current_entry(&mut self, line: &str) -> Result<&mut Vec<String>, SanitizeError> {
        match &self.state {
            StatusState::Entry { key, .. } => self
                .entries
                .get_mut(key)
                .ok_or_else(|| SanitizeError::malformed(KIND, line, "entry vanished")),
            StatusState::Header => Err(SanitizeError::malformed(KIND, line, "line before first r line")),
        }
    }
}

impl<R: RngCore + CryptoRng> DescriptorSanitizer<R> {
    /// Sanitize a bridge network status.
    ///
    /// `publication_time` comes from wherever the status was found and is
    /// overridden by a `published` line.
    pub fn sanitize_network_status(
        &mut self,
        data: &[u8],
        publication_time: Option<PublishedTime>,
    ) -> Result<SanitizedRecord, SanitizeError> {
        if self.anonymizer.is_poisoned() {
            return Err(SanitizeError::SecretsPoisoned(KIND));
        }

        let text = decode_ascii(data);
        let mut acc = StatusAccumulator {
            state: StatusState::Header,
            published: publication_time,
            header: Vec::new(),
            entries: BTreeMap::new(),
            entry_times: Vec::new(),
        };

        for line in text.lines() {
            if let Some(rest) = line.strip_prefix("published ") {
                acc.published = Some(
                    PublishedTime::parse(rest).map_err(|e| SanitizeError::timestamp(KIND, e))?,
                );
            } else if line.starts_with("flag-thresholds ") {
                acc.header.push(line.to_string());
            } else if line.starts_with("r ") {
                self.sanitize_r_line(&mut acc, line)?;
            } else if let Some(or_address) = line.strip_prefix("a ") {
                let StatusState::Entry {
                    fingerprint,
                    published,
                    ..
                } = &acc.state
                else {
                    return Err(SanitizeError::malformed(KIND, line, "a line before first r line"));
                };
                match self
                    .anonymizer
                    .scrub_or_address(or_address, fingerprint, published)
                {
                    Ok(scrubbed) => acc.current_entry(line)?.push(format!("a {}", scrubbed)),
                    Err(e) if e.is_secret_failure() => {
                        return Err(SanitizeError::SecretsPoisoned(KIND))
                    }
                    Err(_) => {
                        warn!("Invalid address in a line of {}.  Skipping line!", KIND);
                    }
                }
            } else if is_copied_entry_line(line) {
                acc.current_entry(line)?.push(line.to_string());
            } else {
                return Err(SanitizeError::unrecognized(KIND, line));
            }
        }

        let published = acc
            .published
            .ok_or_else(|| SanitizeError::missing(KIND, "published"))?;

        if let Some(most_recent) = stale_entries(published, &acc.entry_times) {
            warn!(
                "The most recent descriptor in the bridge network status published at {} \
                 was published at {} which is more than 1 hour before the status. This is \
                 a sign for the status being stale. Please check!",
                published, most_recent
            );
        }
        self.note_published(KIND, published);

        let mut lines = Vec::with_capacity(1 + acc.header.len() + acc.entries.len() * 4);
        lines.push(format!("published {}", published));
        lines.extend(acc.header);
        lines.extend(acc.entries.into_values().flatten());

        Ok(SanitizedRecord {
            kind: KIND,
            published,
            lines,
            digest: RecordDigest::sha1_only(hex::encode(digest::sha1(data))),
        })
    }

    fn sanitize_r_line(
        &mut self,
        acc: &mut StatusAccumulator,
        line: &str,
    ) -> Result<(), SanitizeError> {
        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() < 9 {
            return Err(SanitizeError::malformed(KIND, line, "too few fields"));
        }
        let nickname = parts[1];
        let fingerprint = Fingerprint::from_base64(parts[2])
            .map_err(|e| SanitizeError::malformed(KIND, line, e.to_string()))?;
        let descriptor_id = digest::decode_base64(parts[3])
            .ok_or_else(|| SanitizeError::malformed(KIND, line, "invalid descriptor digest"))?;
        let entry_published = PublishedTime::parse(&format!("{} {}", parts[4], parts[5]))
            .map_err(|e| SanitizeError::timestamp(KIND, e))?;
        let (address, or_port, dir_port) = (parts[6], parts[7], parts[8]);

        let scrubbed_address = self
            .anonymizer
            .anonymize_ipv4(address, &fingerprint, &entry_published)
            .map_err(|e| SanitizeError::from_address(KIND, e))?;

        let hashed_identity = fingerprint.hashed_base64();
        let hashed_descriptor: String = digest::base64_unpadded(&digest::sha1(&descriptor_id))
            .chars()
            .take(27)
            .collect();
        let key = fingerprint.hashed_hex();

        acc.entries.insert(
            key.clone(),
            vec![format!(
                "r {} {} {} {} {} {} {}",
                nickname,
                hashed_identity,
                hashed_descriptor,
                entry_published,
                scrubbed_address,
                or_port,
                dir_port
            )],
        );
        acc.entry_times.push(entry_published);
        acc.state = StatusState::Entry {
            fingerprint,
            published: entry_published,
            key,
        };
        Ok(())
    }
}

/// Most recent entry publication, if it lies more than an hour before the
/// status. Entries published after the status are ignored.
fn stale_entries(published: PublishedTime, entry_times: &[PublishedTime]) -> Option<PublishedTime> {
    let most_recent = entry_times.iter().filter(|time| **time <= published).max()?;
    let age = *published.as_naive() - *most_recent.as_naive();
    (age.num_seconds() > STATUS_STALENESS_SECS).then_some(*most_recent)
}

/// `s`, `w` and `p` lines carry nothing identifying and are copied
fn is_copied_entry_line(line: &str) -> bool {
    ["s", "w", "p"]
        .iter()
        .any(|keyword| line == *keyword || line.starts_with(&format!("{} ", keyword)))
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::address::AddressAnonymizer;
    use rand::rngs::StdRng;

    fn status(extra_entry_line: &str) -> String {
        format!(
            "published 2024-05-17 13:00:00\n\
             flag-thresholds stable-uptime=693369 fast-speed=40960\n\
             r Unnamed {fp} AAAAAAAAAAAAAAAAAAAAAAAAAAA 2024-05-17 12:41:39 198.51.100.7 443 0\n\
             a [2001:db8::1]:443\n\
             s Fast Running Stable Valid\n\
             w Bandwidth=1234\n\
             p reject 1-65535\n\
             {extra}",
            fp = fingerprint_base64(),
            extra = extra_entry_line
        )
    }

    #[test]
    fn test_sanitizes_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = status("");
        let record = sanitizer
            .sanitize_network_status(raw.as_bytes(), None)
            .unwrap();

        assert_eq!(record.kind, RecordKind::NetworkStatus);
        assert_eq!(record.published.to_string(), "2024-05-17 13:00:00");
        assert_eq!(record.lines[0], "published 2024-05-17 13:00:00");
        assert!(record.lines[1].starts_with("flag-thresholds "));

        let r_line = &record.lines[2];
        let parts: Vec<&str> = r_line.split(' ').collect();
        assert_eq!(parts[1], "Unnamed");
        assert_eq!(parts[2], fingerprint().hashed_base64());
        assert_eq!(parts[2].len(), 27);
        assert_eq!(parts[3].len(), 27);
        assert_eq!(parts[4], "2024-05-17");
        assert!(parts[6].starts_with("10."));
        assert_eq!(&parts[7..], &["443", "0"]);

        assert!(record.lines[3].starts_with("a [fd9f:2e19:3bcf::"));
        assert_eq!(record.lines[4], "s Fast Running Stable Valid");

        let rendered = record.render();
        assert!(!rendered.contains("198.51.100.7"));
        assert!(!rendered.contains("2001:db8"));
        assert!(!rendered.contains(&fingerprint_base64()));
    }

    #[test]
    fn test_sanitizing_twice_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = status("");
        let first = sanitizer.sanitize_network_status(raw.as_bytes(), None).unwrap();
        let second = sanitizer.sanitize_network_status(raw.as_bytes(), None).unwrap();
        assert_eq!(first.render(), second.render());
        assert_eq!(first.digest, second.digest);
    }

    #[test]
    fn test_entries_sorted_by_hashed_identity() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let other = Fingerprint::from_bytes([0x99; 20]);
        let other_b64 = digest::base64_unpadded(other.as_bytes());
        let raw = status(&format!(
            "r Other {} AAAAAAAAAAAAAAAAAAAAAAAAAAA 2024-05-17 12:00:00 203.0.113.9 9001 0\ns Valid\n",
            other_b64
        ));
        let record = sanitizer.sanitize_network_status(raw.as_bytes(), None).unwrap();

        let mut by_hex = vec![
            (fingerprint().hashed_hex(), fingerprint().hashed_base64()),
            (other.hashed_hex(), other.hashed_base64()),
        ];
        by_hex.sort();
        let expected: Vec<String> = by_hex.into_iter().map(|(_, b64)| b64).collect();

        let identities: Vec<String> = record
            .lines
            .iter()
            .filter(|l| l.starts_with("r "))
            .map(|l| l.split(' ').nth(2).unwrap().to_string())
            .collect();
        assert_eq!(identities, expected);
    }

    #[test]
    fn test_unknown_line_drops_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = status("m 8,9 sha256=abc\n");
        let err = sanitizer
            .sanitize_network_status(raw.as_bytes(), None)
            .unwrap_err();
        assert!(matches!(err, SanitizeError::UnrecognizedLine { .. }));
    }

    #[test]
    fn test_invalid_a_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = status("").replace("a [2001:db8::1]:443", "a [2001::db8::1]:443");
        let record = sanitizer.sanitize_network_status(raw.as_bytes(), None).unwrap();
        assert!(record.lines.iter().all(|l| !l.starts_with("a ")));
    }

    #[test]
    fn test_malformed_r_line_address_drops_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = status("").replace("198.51.100.7", "198.51.100");
        assert!(matches!(
            sanitizer.sanitize_network_status(raw.as_bytes(), None),
            Err(SanitizeError::MalformedAddress { .. })
        ));
    }

    #[test]
    fn test_publication_time_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = sanitizer_at(&dir.path().join("secrets"));
        let raw = status("").replace("published 2024-05-17 13:00:00\n", "");
        assert!(matches!(
            sanitizer.sanitize_network_status(raw.as_bytes(), None),
            Err(SanitizeError::MissingField { .. })
        ));

        let fallback = PublishedTime::parse("2024-05-17 13:30:00").unwrap();
        let record = sanitizer
            .sanitize_network_status(raw.as_bytes(), Some(fallback))
            .unwrap();
        assert_eq!(record.published, fallback);
        assert_eq!(record.lines[0], "published 2024-05-17 13:30:00");
    }

    #[test]
    fn test_placeholder_addresses() {
        let mut sanitizer =
            DescriptorSanitizer::new(AddressAnonymizer::<StdRng>::placeholder(), no_cutoff());
        let record = sanitizer
            .sanitize_network_status(status("").as_bytes(), None)
            .unwrap();
        assert!(record.lines[2].contains(" 127.0.0.1 443 0"));
        assert_eq!(record.lines[3], "a [fd9f:2e19:3bcf::]:443");
    }

    #[test]
    fn test_stale_entries() {
        let time = |s: &str| PublishedTime::parse(s).unwrap();
        let status = time("2024-05-17 13:00:00");

        let fresh = [time("2024-05-17 11:00:00"), time("2024-05-17 12:41:39")];
        assert_eq!(stale_entries(status, &fresh), None);

        let stale = [time("2024-05-17 10:00:00"), time("2024-05-17 11:59:59")];
        assert_eq!(stale_entries(status, &stale), Some(time("2024-05-17 11:59:59")));

        let exactly_one_hour = [time("2024-05-17 12:00:00")];
        assert_eq!(stale_entries(status, &exactly_one_hour), None);

        // entries from after the status do not count as recent
        let future = [time("2024-05-17 10:00:00"), time("2024-05-17 14:00:00")];
        assert_eq!(stale_entries(status, &future), Some(time("2024-05-17 10:00:00")));

        assert_eq!(stale_entries(status, &[]), None);
    }

    #[test]
    fn test_poisoned_store_refuses_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut sanitizer = poisoned_sanitizer(dir.path());
        let err = sanitizer
            .sanitize_network_status(status("").as_bytes(), None)
            .unwrap_err();
        assert!(err.is_run_fatal());
    }
}
