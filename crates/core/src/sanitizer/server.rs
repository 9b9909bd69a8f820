use super::ed25519::{CertProgress, MasterKeyCheck};
use super::record::{decode_ascii, sha1_of_span, sha256_of_span, RecordDigest, SanitizedRecord};
use super::{DescriptorSanitizer, SanitizeError};
use crate::digest;
use crate::identity::Fingerprint;
use bridgesan_common::{PublishedTime, RecordKind};
use rand::{CryptoRng, RngCore};
use tracing::warn;

const KIND: RecordKind = RecordKind::ServerDescriptor;

const DIGEST_START: &str = "router ";
const DIGEST_END: &str = "\nrouter-signature\n";
const SHA256_DIGEST_END: &str = "\n-----END SIGNATURE-----\n";

/// Lines copied verbatim when they start with one of these
const PASSTHROUGH_PREFIXES: &[&str] = &[
    "platform ",
    "opt protocols ",
    "protocols ",
    "uptime ",
    "bandwidth ",
    "opt hibernating ",
    "hibernating ",
    "ntor-onion-key ",
    "ipv6-policy ",
];

/// Lines copied verbatim when they match exactly
const PASSTHROUGH_LINES: &[&str] = &[
    "opt hidden-service-dir",
    "hidden-service-dir",
    "opt caches-extra-info",
    "caches-extra-info",
    "opt allow-single-hop-exits",
    "allow-single-hop-exits",
    "tunnelled-dir-server",
];

/// Lines that open a key block we drop up to its `-----END ` line
const CRYPTO_KEYWORDS: &[&str] = &["onion-key", "signing-key", "onion-key-crosscert"];

/// Where a descriptor parser is; shared with the extra-info parser
pub(super) enum ParseState {
    Body,
    SkippingCrypto,
    /// Collecting the base64 lines of an `identity-ed25519` certificate
    IdentityCert(String),
}

/// Body line, possibly waiting for the scrubbed router address
enum BodyLine {
    Text(String),
    /// `accept` or `reject` rule naming the bridge's own address
    OwnAddressPolicy { action: &'static str, rest: String },
}

struct RouterLine {
    nickname: String,
    address: String,
    or_port: String,
    socks_port: String,
    dir_port: String,
}

impl RouterLine {
    fn parse(line: &str) -> Result<Self, SanitizeError> {
        let parts: Vec<&str> = line.split(' ').collect();
        if parts.len() < 6 {
            return Err(SanitizeError::malformed(KIND, line, "too few fields"));
        }
        Ok(Self {
            nickname: parts[1].to_string(),
            address: parts[2].to_string(),
            or_port: parts[3].to_string(),
            socks_port: parts[4].to_string(),
            dir_port: parts[5].to_string(),
        })
    }
}

struct ServerAccumulator {
    keys: MasterKeyCheck,
    router: Option<RouterLine>,
    or_addresses: Vec<String>,
    fingerprint: Option<Fingerprint>,
    published: Option<PublishedTime>,
    body: Vec<BodyLine>,
}

impl ServerAccumulator {
    /// Handle a line outside any key block and return the state to continue in
    fn body_line(&mut self, line: &str) -> Result<ParseState, SanitizeError> {
        if line.starts_with("router ") {
            self.router = Some(RouterLine::parse(line)?);
        } else if let Some(or_address) = line.strip_prefix("or-address ") {
            self.or_addresses.push(or_address.to_string());
        } else if let Some(rest) = line.strip_prefix("published ") {
            self.published =
                Some(PublishedTime::parse(rest).map_err(|e| SanitizeError::timestamp(KIND, e))?);
            self.body.push(BodyLine::Text(line.to_string()));
        } else if let Some((opt, rest)) = strip_opt(line, "fingerprint ") {
            let parsed = Fingerprint::from_hex(rest)
                .map_err(|e| SanitizeError::malformed(KIND, line, e.to_string()))?;
            self.body.push(BodyLine::Text(format!(
                "{}fingerprint {}",
                opt,
                parsed.hashed_grouped()
            )));
            self.fingerprint = Some(parsed);
        } else if line.starts_with("contact ") {
            self.body.push(BodyLine::Text("contact somebody".to_string()));
        } else if let Some((opt, rest)) = strip_opt(line, "extra-info-digest ") {
            let hashed = hash_extra_info_digest(line, rest)?;
            self.body.push(BodyLine::Text(format!("{}{}", opt, hashed)));
        } else if let Some(rest) = line.strip_prefix("reject ") {
            self.body
                .push(policy_line("reject", line, rest, self.router.as_ref())?);
        } else if let Some(rest) = line.strip_prefix("accept ") {
            self.body
                .push(policy_line("accept", line, rest, self.router.as_ref())?);
        } else if line == "identity-ed25519" {
            self.keys.expect_first_certificate(line)?;
            return Ok(ParseState::IdentityCert(String::new()));
        } else if let Some(value) = line.strip_prefix("master-key-ed25519 ") {
            self.keys.record_declared(line, value)?;
        } else if is_passthrough(line) {
            self.body.push(BodyLine::Text(line.to_string()));
        } else if let Some(members) = line.strip_prefix("family ") {
            self.body.push(BodyLine::Text(hash_family(line, members)?));
        } else if line.starts_with("@purpose ") || line.starts_with("router-sig-ed25519 ") {
            // dropped
        } else if line.starts_with("-----BEGIN ")
            || CRYPTO_KEYWORDS.contains(&line)
            || line.starts_with("ntor-onion-key-crosscert ")
        {
            return Ok(ParseState::SkippingCrypto);
        } else if !line.starts_with("-----END ") {
            return Err(SanitizeError::unrecognized(KIND, line));
        }
        Ok(ParseState::Body)
    }
}

impl<R: RngCore + CryptoRng> DescriptorSanitizer<R> {
    /// Sanitize a single bridge server descriptor
    pub fn sanitize_server_descriptor(
        &mut self,
        data: &[u8],
    ) -> Result<SanitizedRecord, SanitizeError> {
        if self.anonymizer.is_poisoned() {
            return Err(SanitizeError::SecretsPoisoned(KIND));
        }

        let text = decode_ascii(data);
        let mut acc = ServerAccumulator {
            keys: MasterKeyCheck::new(KIND, self.verify_identity_signatures),
            router: None,
            or_addresses: Vec::new(),
            fingerprint: None,
            published: None,
            body: Vec::new(),
        };
        let mut state = ParseState::Body;
        let mut signed = false;

        for line in text.lines() {
            if matches!(state, ParseState::Body) && line.starts_with("router-signature") {
                signed = true;
                break;
            }
            state = match state {
                ParseState::Body => acc.body_line(line)?,
                ParseState::SkippingCrypto if line.starts_with("-----END ") => ParseState::Body,
                ParseState::SkippingCrypto => ParseState::SkippingCrypto,
                ParseState::IdentityCert(block) => {
                    match acc.keys.continue_certificate(block, line)? {
                        CertProgress::Done(hashed_line) => {
                            acc.body.push(BodyLine::Text(hashed_line));
                            ParseState::Body
                        }
                        CertProgress::Pending(block) => ParseState::IdentityCert(block),
                    }
                }
            };
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
        let router = acc.router.ok_or_else(|| SanitizeError::missing(KIND, "router"))?;
        let fingerprint = acc
            .fingerprint
            .ok_or_else(|| SanitizeError::missing(KIND, "fingerprint"))?;
        let published = acc
            .published
            .ok_or_else(|| SanitizeError::missing(KIND, "published"))?;

        let scrubbed_address = self
            .anonymizer
            .anonymize_ipv4(&router.address, &fingerprint, &published)
            .map_err(|e| SanitizeError::from_address(KIND, e))?;

        let mut lines = Vec::with_capacity(1 + acc.or_addresses.len() + acc.body.len());
        lines.push(format!(
            "router {} {} {} {} {}",
            router.nickname, scrubbed_address, router.or_port, router.socks_port, router.dir_port
        ));
        for or_address in &acc.or_addresses {
            match self
                .anonymizer
                .scrub_or_address(or_address, &fingerprint, &published)
            {
                Ok(scrubbed) => lines.push(format!("or-address {}", scrubbed)),
                Err(e) if e.is_secret_failure() => {
                    return Err(SanitizeError::SecretsPoisoned(KIND))
                }
                Err(_) => warn!(
                    "Invalid address in line 'or-address {}' in {}.  Skipping line!",
                    or_address, KIND
                ),
            }
        }
        for line in acc.body {
            lines.push(match line {
                BodyLine::Text(text) => text,
                BodyLine::OwnAddressPolicy { action, rest } => {
                    format!("{} {}{}", action, scrubbed_address, rest)
                }
            });
        }

        let sha1_hex =
            sha1_of_span(data, DIGEST_START, DIGEST_END).ok_or(SanitizeError::Digest(KIND))?;
        let sha256_base64 = if acc.keys.has_certificate() {
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

/// Split an optional `opt ` prefix off a keyword line
pub(super) fn strip_opt<'a>(line: &'a str, keyword: &str) -> Option<(&'static str, &'a str)> {
    if let Some(rest) = line.strip_prefix(keyword) {
        Some(("", rest))
    } else {
        line.strip_prefix("opt ")
            .and_then(|l| l.strip_prefix(keyword))
            .map(|rest| ("opt ", rest))
    }
}

fn is_passthrough(line: &str) -> bool {
    PASSTHROUGH_LINES.contains(&line) || PASSTHROUGH_PREFIXES.iter().any(|p| line.starts_with(p))
}

/// `extra-info-digest <sha1 hex> [<sha256 base64>]` with both digests hashed
/// once more
fn hash_extra_info_digest(line: &str, rest: &str) -> Result<String, SanitizeError> {
    let mut fields = rest.split(' ');
    let sha1 = fields
        .next()
        .and_then(|f| hex::decode(f.to_ascii_lowercase()).ok())
        .ok_or_else(|| SanitizeError::malformed(KIND, line, "invalid hex digest"))?;
    let mut hashed = format!(
        "extra-info-digest {}",
        hex::encode_upper(digest::sha1(&sha1))
    );
    if let Some(sha256) = fields.next().filter(|f| !f.is_empty()) {
        let sha256 = digest::decode_base64(sha256)
            .ok_or_else(|| SanitizeError::malformed(KIND, line, "invalid base64 digest"))?;
        hashed.push(' ');
        hashed.push_str(&digest::base64_unpadded(&digest::sha256(&sha256)));
    }
    Ok(hashed)
}

/// Exit policy lines naming the bridge's own address get the scrubbed
/// address once it is known
fn policy_line(
    action: &'static str,
    line: &str,
    rest: &str,
    router: Option<&RouterLine>,
) -> Result<BodyLine, SanitizeError> {
    let router = router.ok_or_else(|| {
        SanitizeError::malformed(KIND, line, format!("{} before router line", action))
    })?;
    match rest.strip_prefix(router.address.as_str()) {
        Some(tail) if tail.is_empty() || tail.starts_with(':') || tail.starts_with('/') => {
            Ok(BodyLine::OwnAddressPolicy {
                action,
                rest: tail.to_string(),
            })
        }
        _ => Ok(BodyLine::Text(line.to_string())),
    }
}

/// Hash `$fingerprint` family members; nicknames stay as they are
fn hash_family(line: &str, members: &str) -> Result<String, SanitizeError> {
    let mut hashed = String::from("family");
    for member in members.split(' ') {
        hashed.push(' ');
        match member.strip_prefix('$') {
            Some(entry) => {
                let split = entry.find(['=', '~']).unwrap_or(entry.len());
                let (hex_part, nickname) = entry.split_at(split);
                let fingerprint = Fingerprint::from_hex(hex_part)
                    .map_err(|e| SanitizeError::malformed(KIND, line, e.to_string()))?;
                hashed.push('$');
                hashed.push_str(&fingerprint.hashed_hex_upper());
                hashed.push_str(nickname);
            }
            None => hashed.push_str(member),
        }
    }
    Ok(hashed)
}
