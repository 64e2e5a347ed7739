//! Content fingerprints used as cache and lock keys.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of raw bytes kept from the SHA-256 digest.
pub const FINGERPRINT_BYTES: usize = 8;

/// Number of hex characters in the rendered form.
pub const FINGERPRINT_HEX_LEN: usize = FINGERPRINT_BYTES * 2;

/// A content fingerprint: the first 8 bytes of a SHA-256 digest, rendered
/// as 16 lowercase hex characters.
///
/// 64 bits of digest give a birthday bound of roughly n^2 / 2^65 for n
/// distinct inputs: at a million inputs the collision probability is about
/// 3e-8, which is negligible for any plausible corpus of uploaded songs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; FINGERPRINT_BYTES]);

impl Fingerprint {
    /// Create a fingerprint from raw truncated-digest bytes.
    pub fn from_bytes(bytes: [u8; FINGERPRINT_BYTES]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_BYTES] {
        &self.0
    }

    /// Compute the fingerprint of a byte slice.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self::from_digest(hasher.finalize().into())
    }

    /// Create an incremental hasher for streaming input.
    pub fn hasher() -> FingerprintHasher {
        FingerprintHasher(Sha256::new())
    }

    /// Parse from a 16-character lowercase hex string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.len() != FINGERPRINT_HEX_LEN {
            return Err(crate::Error::InvalidFingerprint(format!(
                "expected {} hex chars, got {}",
                FINGERPRINT_HEX_LEN,
                s.len()
            )));
        }
        let mut bytes = [0u8; FINGERPRINT_BYTES];
        for (i, pair) in s.as_bytes().chunks(2).enumerate() {
            bytes[i] = (Self::nibble(pair[0])? << 4) | Self::nibble(pair[1])?;
        }
        Ok(Self(bytes))
    }

    fn nibble(b: u8) -> crate::Result<u8> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            _ => Err(crate::Error::InvalidFingerprint(format!(
                "expected lowercase hex, got {:?}",
                b as char
            ))),
        }
    }

    /// Encode as lowercase hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    fn from_digest(digest: [u8; 32]) -> Self {
        let mut bytes = [0u8; FINGERPRINT_BYTES];
        bytes.copy_from_slice(&digest[..FINGERPRINT_BYTES]);
        Self(bytes)
    }
}

impl FromStr for Fingerprint {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Incremental fingerprint hasher for streaming file reads.
pub struct FingerprintHasher(Sha256);

impl FingerprintHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the fingerprint.
    pub fn finalize(self) -> Fingerprint {
        Fingerprint::from_digest(self.0.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_roundtrip() {
        let fp = Fingerprint::compute(b"hello world");
        let hex = fp.to_hex();
        assert_eq!(hex.len(), FINGERPRINT_HEX_LEN);

        let parsed = Fingerprint::parse(&hex).unwrap();
        assert_eq!(fp, parsed);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut hasher = Fingerprint::hasher();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), Fingerprint::compute(b"hello world"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Fingerprint::parse("short").is_err());
        assert!(Fingerprint::parse("zzzzzzzzzzzzzzzz").is_err());
        assert!(Fingerprint::parse("ABCDEF0123456789").is_err());
        assert!(Fingerprint::parse("+1+1+1+1+1+1+1+1").is_err());
        assert!(Fingerprint::parse("-1-1-1-1-1-1-1-1").is_err());
        assert!(Fingerprint::parse("abcdef0123456789").is_ok());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let fp = Fingerprint::compute(b"song");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }
}
