//! Test support: a reference Winternitz one-time signature scheme.
//!
//! [`KeccakWinternitz`] stands in for the external WOTS+ primitive in unit
//! tests, integration tests and benches. It follows the usual shape
//! (w = 16, 64 message digits, 3 checksum digits, Keccak-256 chains
//! keyed by the public seed) but makes no claim of byte compatibility with
//! the on-ledger verifier library. Only compiled for tests and under the
//! `test-utils` feature.

use crate::config::{HASH_LENGTH, PUBLIC_KEY_LENGTH};
use crate::crypto::hash::{keccak256, keccak256_multi};
use crate::crypto::ots::{OneTimeSignatureScheme, PrivateKeyBytes, RawKeyPair};
use crate::error::{QuipError, Result};
use crate::types::{PqPublicKey, PqSignature};

/// Highest digit value (w - 1).
const MAX_DIGIT: u32 = 15;

/// Digits covering the 256-bit message digest, four bits each.
const MESSAGE_DIGITS: usize = 2 * HASH_LENGTH;

/// Digits covering the checksum. The largest checksum is 64 * 15 = 960,
/// which fits in three base-16 digits.
const CHECKSUM_DIGITS: usize = 3;

/// Chains per key, and elements per signature.
pub const CHAINS: usize = MESSAGE_DIGITS + CHECKSUM_DIGITS;

/// Keccak-256 Winternitz scheme with w = 16.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeccakWinternitz;

fn digits(digest: &[u8; HASH_LENGTH]) -> [u32; CHAINS] {
    let mut out = [0u32; CHAINS];
    for (i, byte) in digest.iter().enumerate() {
        out[2 * i] = u32::from(byte >> 4);
        out[2 * i + 1] = u32::from(byte & 0x0f);
    }
    let checksum: u32 = out[..MESSAGE_DIGITS].iter().map(|d| MAX_DIGIT - d).sum();
    out[MESSAGE_DIGITS] = (checksum >> 8) & 0x0f;
    out[MESSAGE_DIGITS + 1] = (checksum >> 4) & 0x0f;
    out[MESSAGE_DIGITS + 2] = checksum & 0x0f;
    out
}

fn chain_secret(secret_key: &[u8], chain: usize) -> [u8; HASH_LENGTH] {
    keccak256_multi(&[secret_key, &(chain as u32).to_be_bytes()])
}

/// Walk `steps` hash steps along chain `chain`, starting at position `start`.
fn walk(
    public_seed: &[u8; HASH_LENGTH],
    chain: usize,
    start: u32,
    steps: u32,
    value: [u8; HASH_LENGTH],
) -> [u8; HASH_LENGTH] {
    let chain = (chain as u32).to_be_bytes();
    (start..start + steps).fold(value, |x, position| {
        keccak256_multi(&[public_seed, &chain, &position.to_be_bytes(), &x])
    })
}

fn public_key_hash(ends: impl Iterator<Item = [u8; HASH_LENGTH]>) -> [u8; HASH_LENGTH] {
    let packed: Vec<u8> = ends.flatten().collect();
    keccak256(&packed)
}

impl OneTimeSignatureScheme for KeccakWinternitz {
    fn generate_key_pair(
        &self,
        private_seed: &[u8],
        public_seed: &[u8; HASH_LENGTH],
    ) -> Result<RawKeyPair> {
        let secret_key = keccak256(private_seed);
        let hash = public_key_hash(
            (0..CHAINS).map(|i| walk(public_seed, i, 0, MAX_DIGIT, chain_secret(&secret_key, i))),
        );

        let mut public_key = [0u8; PUBLIC_KEY_LENGTH];
        public_key[..HASH_LENGTH].copy_from_slice(public_seed);
        public_key[HASH_LENGTH..].copy_from_slice(&hash);

        Ok(RawKeyPair {
            private_key: PrivateKeyBytes::new(secret_key.to_vec()),
            public_key,
        })
    }

    fn sign(
        &self,
        private_key: &PrivateKeyBytes,
        public_seed: &[u8; HASH_LENGTH],
        digest: &[u8; HASH_LENGTH],
    ) -> Result<PqSignature> {
        if private_key.as_bytes().len() != HASH_LENGTH {
            return Err(QuipError::Signature(format!(
                "private key must be {HASH_LENGTH} bytes, got {}",
                private_key.as_bytes().len()
            )));
        }
        let elements = digits(digest)
            .iter()
            .enumerate()
            .map(|(i, d)| walk(public_seed, i, 0, *d, chain_secret(private_key.as_bytes(), i)))
            .collect();
        Ok(PqSignature::new(elements))
    }

    fn verify(
        &self,
        public_key: &PqPublicKey,
        digest: &[u8; HASH_LENGTH],
        signature: &PqSignature,
    ) -> bool {
        if signature.len() != CHAINS {
            return false;
        }
        let seed = &public_key.public_seed;
        let ends = digits(digest)
            .into_iter()
            .zip(signature.elements.iter())
            .enumerate()
            .map(|(i, (d, element))| walk(seed, i, d, MAX_DIGIT - d, *element));
        public_key_hash(ends) == public_key.public_key_hash
    }
}
