//! Content digest types and utilities.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// A content digest in `<algorithm>:<hex>` form.
///
/// Only lowercase hex encodings are accepted; the algorithm determines the
/// expected length. sha256 is the canonical algorithm for new content.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(String);

impl Digest {
    /// Parse and validate a digest string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| crate::Error::InvalidDigest(format!("missing algorithm: {s}")))?;

        let expected_len = match algorithm {
            "sha256" => 64,
            "sha512" => 128,
            _ => {
                return Err(crate::Error::InvalidDigest(format!(
                    "unsupported algorithm: {algorithm}"
                )));
            }
        };

        if hex.len() != expected_len {
            return Err(crate::Error::InvalidDigest(format!(
                "expected {expected_len} hex chars for {algorithm}, got {}",
                hex.len()
            )));
        }
        if !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
            return Err(crate::Error::InvalidDigest(format!(
                "non-lowercase-hex character in: {s}"
            )));
        }

        Ok(Self(s.to_string()))
    }

    /// Compute the sha256 digest of a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(format!("sha256:{:x}", hasher.finalize()))
    }

    /// The algorithm component.
    pub fn algorithm(&self) -> &str {
        self.0.split_once(':').map(|(a, _)| a).unwrap_or("")
    }

    /// The hex component.
    pub fn hex(&self) -> &str {
        self.0.split_once(':').map(|(_, h)| h).unwrap_or("")
    }

    /// The full `<algorithm>:<hex>` string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental sha256 digester.
#[derive(Clone)]
pub struct Digester(Sha256);

impl Digester {
    /// Create a new digester.
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    /// Update the digester with data.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Finalize and return the digest.
    pub fn finalize(self) -> Digest {
        Digest(format!("sha256:{:x}", self.0.finalize()))
    }

    /// Digest of the bytes fed so far, without consuming the digester.
    pub fn current(&self) -> Digest {
        self.clone().finalize()
    }
}

impl Default for Digester {
    fn default() -> Self {
        Self::new()
    }
}
