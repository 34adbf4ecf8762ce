//! Content hashing for the module cache
//!
//! Cache keys are 160-bit: SHA256 followed by RIPEMD160.

use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;

/// Calculate single SHA256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let hash = Sha256::digest(data);
    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    result
}

/// Calculate RIPEMD160 hash
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let hash = Ripemd160::digest(data);
    let mut result = [0u8; 20];
    result.copy_from_slice(&hash);
    result
}

/// SHA256 + RIPEMD160
pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha256_hash = sha256(data);
    ripemd160(&sha256_hash)
}

/// Content hash of a module's raw bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 20]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        ContentHash(hash160(data))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash160_known_vector() {
        // hash160("") = ripemd160(sha256(""))
        assert_eq!(
            ContentHash::of(b"").to_string(),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn test_hash160_differs_from_parts() {
        let data = b"test data";
        let result = hash160(data);
        assert_ne!(result, sha256(data)[..20]);
        assert_ne!(result, ripemd160(data));
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(ContentHash::of(b"same"), ContentHash::of(b"same"));
        assert_ne!(ContentHash::of(b"same"), ContentHash::of(b"other"));
    }
}
