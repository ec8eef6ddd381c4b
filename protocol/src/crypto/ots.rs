//! # One-Time Signature Primitive
//!
//! The contract this crate expects from the hash-based one-time signature
//! scheme (WOTS+ on the deployed ledger). The scheme itself lives outside
//! this crate; everything here consumes it through
//! [`OneTimeSignatureScheme`].
//!
//! A key pair produced by a scheme may sign exactly one message. Two
//! signatures under one Winternitz key reveal enough chain elements to
//! forge a third. The types in [`crate::keys`] make that rule hard to
//! break; the trait here only describes the raw operations.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::{HASH_LENGTH, PUBLIC_KEY_LENGTH};
use crate::error::Result;
use crate::types::{PqPublicKey, PqSignature};

/// Raw private key bytes from the primitive, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeyBytes(Vec<u8>);

impl PrivateKeyBytes {
    /// Take ownership of raw key bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Borrow the key bytes. Only the scheme should ever look at these.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for PrivateKeyBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for PrivateKeyBytes {}

impl std::fmt::Debug for PrivateKeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKeyBytes(<{} bytes redacted>)", self.0.len())
    }
}

/// What the primitive hands back from key generation.
pub struct RawKeyPair {
    /// Opaque private key.
    pub private_key: PrivateKeyBytes,
    /// `publicSeed(32) || publicKeyHash(32)`.
    pub public_key: [u8; PUBLIC_KEY_LENGTH],
}

/// A hash-based one-time signature scheme.
///
/// Implementations must be deterministic: the same `(private_seed,
/// public_seed)` always yields the same key pair, and signing is a pure
/// function of key and digest.
pub trait OneTimeSignatureScheme: Send + Sync {
    /// Derive a key pair from a private seed and a 32-byte public seed.
    fn generate_key_pair(
        &self,
        private_seed: &[u8],
        public_seed: &[u8; HASH_LENGTH],
    ) -> Result<RawKeyPair>;

    /// Sign a 32-byte digest.
    fn sign(
        &self,
        private_key: &PrivateKeyBytes,
        public_seed: &[u8; HASH_LENGTH],
        digest: &[u8; HASH_LENGTH],
    ) -> Result<PqSignature>;

    /// Check a signature against a public identity.
    fn verify(
        &self,
        public_key: &PqPublicKey,
        digest: &[u8; HASH_LENGTH],
        signature: &PqSignature,
    ) -> bool;
}
