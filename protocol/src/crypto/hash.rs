//! # Hashing Utilities
//!
//! Keccak-256 is the only hash the vault protocol uses, because it is the
//! only hash the ledger uses. Message digests, CREATE2 addresses, library
//! placeholders, address checksums and the holder's master secret are all
//! Keccak-256.
//!
//! Note this is the original Keccak padding, not NIST SHA3-256. The two
//! differ in a single padding byte and produce completely different
//! digests. `sha3::Keccak256` is the former.

use sha3::{Digest, Keccak256};

/// Compute the Keccak-256 digest of `data`.
///
/// # Example
///
/// ```
/// use quip_protocol::crypto::keccak256;
///
/// let digest = keccak256(b"quip");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash several byte slices as if they had been concatenated.
///
/// Feeds each part into one hasher instead of building the packed buffer
/// first. Equivalent to `keccak256(&[a, b, c].concat())`.
pub fn keccak256_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak256_empty_vector() {
        // Keccak-256 of the empty string. Differs from SHA3-256(""); if this
        // ever starts failing, someone swapped in the NIST padding.
        let expected =
            hex::decode("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
                .unwrap();
        assert_eq!(keccak256(b"").as_slice(), expected.as_slice());
    }

    #[test]
    fn keccak256_deterministic() {
        assert_eq!(keccak256(b"vault"), keccak256(b"vault"));
        assert_ne!(keccak256(b"vault"), keccak256(b"Vault"));
    }

    #[test]
    fn multi_matches_concatenation() {
        let multi = keccak256_multi(&[b"hello", b" ", b"world"]);
        assert_eq!(multi, keccak256(b"hello world"));
    }
}
