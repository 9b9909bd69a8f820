use bridgesan_common::limits::{FULL_SECRET_LEN, IPV4_SECRET_LEN};
use bridgesan_common::Month;
use std::fmt;
use zeroize::Zeroize;

/// Keying material for one month
///
/// Starts out with 31 bytes, enough for IPv4 addresses, and is extended to
/// 50 bytes the first time an IPv6 address of that month needs hashing.
/// Extension only ever appends.
#[derive(Clone, PartialEq, Eq)]
pub struct MonthlySecret {
    bytes: Vec<u8>,
}

impl MonthlySecret {
    /// Wrap stored bytes; only the two valid lengths are accepted
    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        match bytes.len() {
            IPV4_SECRET_LEN | FULL_SECRET_LEN => Some(Self { bytes }),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.bytes.len() >= FULL_SECRET_LEN
    }

    /// Bytes keying IPv4 hashes
    pub fn ipv4_part(&self) -> &[u8] {
        &self.bytes[..IPV4_SECRET_LEN]
    }

    /// Bytes keying IPv6 hashes, present once the secret is full
    pub fn ipv6_part(&self) -> Option<&[u8]> {
        self.bytes.get(IPV4_SECRET_LEN..FULL_SECRET_LEN)
    }

    /// Whether `other` could be a later version of this secret
    pub fn shares_prefix(&self, other: &MonthlySecret) -> bool {
        self.ipv4_part() == other.ipv4_part()
    }

    /// One line of the secrets file
    pub fn to_line(&self, month: &Month) -> String {
        format!("{},{}", month, hex::encode(&self.bytes))
    }
}

impl fmt::Debug for MonthlySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonthlySecret")
            .field("len", &self.bytes.len())
            .field("bytes", &"<redacted>")
            .finish()
    }
}

impl Drop for MonthlySecret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        assert!(MonthlySecret::from_bytes(vec![0u8; 30]).is_none());
        let partial = MonthlySecret::from_bytes(vec![1u8; 31]).unwrap();
        assert!(!partial.is_full());
        assert!(partial.ipv6_part().is_none());

        let full = MonthlySecret::from_bytes(vec![1u8; 50]).unwrap();
        assert!(full.is_full());
        assert_eq!(full.ipv6_part().unwrap().len(), 19);
        assert!(partial.shares_prefix(&full));
    }

    #[test]
    fn test_line_format() {
        let month: Month = "2024-05".parse().unwrap();
        let secret = MonthlySecret::from_bytes(vec![0xab; 31]).unwrap();
        let line = secret.to_line(&month);
        assert_eq!(line.len(), "yyyy-MM,".len() + 62);
        assert!(line.starts_with("2024-05,abab"));
    }

    #[test]
    fn test_debug_redacts() {
        let secret = MonthlySecret::from_bytes(vec![0xab; 31]).unwrap();
        assert!(!format!("{:?}", secret).contains("ab, "));
        assert!(format!("{:?}", secret).contains("redacted"));
    }
}
