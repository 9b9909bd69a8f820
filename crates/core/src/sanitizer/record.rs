use crate::digest;
use bridgesan_common::{PublishedTime, RecordKind};

const LINE_PREFIX_LEN: usize = 24;

/// Digests of the original, unsanitized descriptor
///
/// `sha1_hex` is the SHA-1 of the descriptor's SHA-1 digest, so the
/// published value can be matched against other sanitized data without
/// revealing the real digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDigest {
    pub sha1_hex: String,
    pub sha256_base64: Option<String>,
}

impl RecordDigest {
    pub fn sha1_only(sha1_hex: String) -> Self {
        Self {
            sha1_hex,
            sha256_base64: None,
        }
    }
}

/// A sanitized descriptor ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanitizedRecord {
    pub kind: RecordKind,
    pub published: PublishedTime,
    pub lines: Vec<String>,
    pub digest: RecordDigest,
}

impl SanitizedRecord {
    /// Full output, starting with the `@type` annotation
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(self.kind.annotation());
        out.push('\n');
        for line in &self.lines {
            out.push_str(line);
            out.push('\n');
        }
        if self.kind != RecordKind::NetworkStatus {
            if let Some(sha256) = &self.digest.sha256_base64 {
                out.push_str("router-digest-sha256 ");
                out.push_str(sha256);
                out.push('\n');
            }
            out.push_str("router-digest ");
            out.push_str(&self.digest.sha1_hex.to_ascii_uppercase());
            out.push('\n');
        }
        out
    }
}

/// Decode descriptor bytes as ASCII; every non-ASCII byte becomes U+FFFD
pub fn decode_ascii(data: &[u8]) -> String {
    data.iter()
        .map(|&b| if b.is_ascii() { b as char } else { '\u{FFFD}' })
        .collect()
}

/// Start of a line, short enough to log without spilling a whole descriptor
pub fn line_prefix(line: &str) -> String {
    line.chars().take(LINE_PREFIX_LEN).collect()
}

/// `hex(SHA-1(SHA-1(span)))` of the span between the markers
pub(crate) fn sha1_of_span(data: &[u8], start: &str, end: &str) -> Option<String> {
    let span = digest::span(data, start.as_bytes(), end.as_bytes())?;
    Some(hex::encode(digest::sha1(&digest::sha1(span))))
}

/// `base64(SHA-256(SHA-256(span)))` of the span between the markers
pub(crate) fn sha256_of_span(data: &[u8], start: &str, end: &str) -> Option<String> {
    let span = digest::span(data, start.as_bytes(), end.as_bytes())?;
    Some(digest::base64_unpadded(&digest::sha256(&digest::sha256(span))))
}
