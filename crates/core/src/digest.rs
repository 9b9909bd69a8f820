/// Hashing and encoding helpers shared by the sanitizers
///
/// Descriptors mix hex, padded base64 and unpadded base64; these helpers
/// keep the decoding rules in one place.

use data_encoding::{BASE64, BASE64_NOPAD};
use sha1::Sha1;
use sha2::{Digest, Sha256};

pub fn sha1(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Base64 without trailing `=`, the form descriptors use for digests and keys
pub fn base64_unpadded(data: &[u8]) -> String {
    BASE64_NOPAD.encode(data)
}

pub fn base64_padded(data: &[u8]) -> String {
    BASE64.encode(data)
}

/// Decode base64 regardless of whether the padding was kept
pub fn decode_base64(text: &str) -> Option<Vec<u8>> {
    BASE64_NOPAD
        .decode(text.trim().trim_end_matches('=').as_bytes())
        .ok()
}

/// Byte range of `data` starting at the first `start` token and ending after
/// the first `end` token that follows it
pub fn span<'a>(data: &'a [u8], start: &[u8], end: &[u8]) -> Option<&'a [u8]> {
    let begin = find(data, start)?;
    let end_at = find(&data[begin..], end)? + begin + end.len();
    Some(&data[begin..end_at])
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha1_known_value() {
        assert_eq!(
            hex::encode(sha1(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_base64_padding_is_optional() {
        let data = [1u8, 2, 3, 4];
        assert_eq!(decode_base64(&base64_padded(&data)).unwrap(), data);
        assert_eq!(decode_base64(&base64_unpadded(&data)).unwrap(), data);
        assert!(decode_base64("not base64!").is_none());
    }

    #[test]
    fn test_span() {
        let data = b"@purpose bridge\nrouter a b\nbody\nrouter-signature\nsig";
        let found = span(data, b"router ", b"\nrouter-signature\n").unwrap();
        assert_eq!(found, b"router a b\nbody\nrouter-signature\n");
        assert!(span(data, b"extra-info ", b"\nrouter-signature\n").is_none());
        assert!(span(data, b"router ", b"\n-----END SIGNATURE-----\n").is_none());
    }
}
