//! # One-Time Key Derivation
//!
//! Every vault identity is a one-time Winternitz key pair derived from
//!
//! ```text
//! private_seed = MasterSecret(32) || VaultId(32)
//! public_seed  = fresh randomness    (new identity)
//!              | read from the ledger (recovered identity)
//! ```
//!
//! The private seed never leaves this module and is never stored. It is
//! rebuilt from the master secret each time a key pair is needed, so the
//! only long-lived secret in the process is the [`MasterSecret`].
//!
//! ## Capability boundary
//!
//! Sessions never see private material. They hold an
//! `Arc<dyn SigningCapability>` that can derive identities and sign digests
//! under a named identity, and nothing else. [`QuipSigner`] is the
//! in-process implementation; a hardware-backed one can slot in without
//! touching callers.
//!
//! ## One signature per key
//!
//! [`OneTimeKeyPair::sign`] consumes the pair, so a single handle cannot
//! sign twice. Because pairs can always be re-derived, [`QuipSigner`] also
//! remembers every `(vault, public_seed)` it has signed under and refuses a
//! second signature with [`QuipError::KeyReuse`]. The key is retired before
//! the primitive runs, so a failed signing attempt retires it as well.

use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::HASH_LENGTH;
use crate::crypto::hash::keccak256;
use crate::crypto::ots::{OneTimeSignatureScheme, PrivateKeyBytes};
use crate::error::{QuipError, Result};
use crate::types::{short_hex, PqPublicKey, PqSignature, VaultId};

// ---------------------------------------------------------------------------
// MasterSecret
// ---------------------------------------------------------------------------

/// Keccak-256 of the holder's secret. Wiped on drop, never printed.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterSecret([u8; HASH_LENGTH]);

impl MasterSecret {
    /// Digest a holder-supplied secret of any length.
    pub fn from_secret(secret: &[u8]) -> Self {
        Self(keccak256(secret))
    }

    /// `MasterSecret || VaultId`, zeroized when the caller drops it.
    fn private_seed(&self, vault_id: &VaultId) -> Zeroizing<Vec<u8>> {
        let mut seed = Zeroizing::new(Vec::with_capacity(2 * HASH_LENGTH));
        seed.extend_from_slice(&self.0);
        seed.extend_from_slice(vault_id.as_bytes());
        seed
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret(<redacted>)")
    }
}

// ---------------------------------------------------------------------------
// OneTimeKeyPair
// ---------------------------------------------------------------------------

/// A derived one-time key pair. Not `Clone`: signing consumes it.
pub struct OneTimeKeyPair {
    private_key: PrivateKeyBytes,
    public_key: PqPublicKey,
}

impl OneTimeKeyPair {
    /// The public identity this pair signs for.
    pub fn public_key(&self) -> &PqPublicKey {
        &self.public_key
    }

    /// Sign one digest and destroy the pair.
    pub fn sign<S>(self, scheme: &S, digest: &[u8; HASH_LENGTH]) -> Result<PqSignature>
    where
        S: OneTimeSignatureScheme + ?Sized,
    {
        scheme.sign(&self.private_key, &self.public_key.public_seed, digest)
    }
}

impl std::fmt::Debug for OneTimeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneTimeKeyPair")
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SigningCapability
// ---------------------------------------------------------------------------

/// Derive and sign under vault identities without exposing private keys.
pub trait SigningCapability: Send + Sync {
    /// Derive a brand-new identity for `vault_id` under a fresh public seed.
    fn derive_new(&self, vault_id: &VaultId) -> Result<PqPublicKey>;

    /// Re-derive the identity for `vault_id` under a known public seed.
    fn recover(&self, vault_id: &VaultId, public_seed: &[u8; HASH_LENGTH]) -> Result<PqPublicKey>;

    /// Sign `digest` with the identity `(vault_id, public_seed)`.
    ///
    /// Succeeds at most once per identity.
    fn sign(
        &self,
        vault_id: &VaultId,
        public_seed: &[u8; HASH_LENGTH],
        digest: &[u8; HASH_LENGTH],
    ) -> Result<PqSignature>;
}

// ---------------------------------------------------------------------------
// QuipSigner
// ---------------------------------------------------------------------------

/// In-process signer holding the master secret.
///
/// Every identity it signs under stays in the retired set for the life of
/// the signer, one entry per signature. Entries are never pruned: a ledger
/// that rolls back to an old identity must still find its key spent.
pub struct QuipSigner<S> {
    master: MasterSecret,
    scheme: Arc<S>,
    retired: Mutex<HashSet<(VaultId, [u8; HASH_LENGTH])>>,
}

impl<S: OneTimeSignatureScheme> QuipSigner<S> {
    /// Build a signer from the holder's secret.
    pub fn new(secret: &[u8], scheme: S) -> Self {
        Self::with_scheme(secret, Arc::new(scheme))
    }

    /// Build a signer sharing an existing scheme instance.
    pub fn with_scheme(secret: &[u8], scheme: Arc<S>) -> Self {
        Self {
            master: MasterSecret::from_secret(secret),
            scheme,
            retired: Mutex::new(HashSet::new()),
        }
    }

    /// The underlying primitive.
    pub fn scheme(&self) -> &S {
        &self.scheme
    }

    /// Derive a new key pair under a fresh random public seed.
    pub fn derive_key_pair(&self, vault_id: &VaultId) -> Result<OneTimeKeyPair> {
        let mut public_seed = [0u8; HASH_LENGTH];
        OsRng.fill_bytes(&mut public_seed);
        self.derive(vault_id, &public_seed)
    }

    /// Reproduce the key pair for a public seed read from the ledger.
    pub fn recover_key_pair(
        &self,
        vault_id: &VaultId,
        public_seed: &[u8; HASH_LENGTH],
    ) -> Result<OneTimeKeyPair> {
        self.derive(vault_id, public_seed)
    }

    /// Whether this signer has already signed under the given identity.
    pub fn is_retired(&self, vault_id: &VaultId, public_seed: &[u8; HASH_LENGTH]) -> bool {
        self.retired.lock().contains(&(*vault_id, *public_seed))
    }

    /// How many identities this signer has signed under.
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Verify through the primitive.
    pub fn verify(
        &self,
        public_key: &PqPublicKey,
        digest: &[u8; HASH_LENGTH],
        signature: &PqSignature,
    ) -> bool {
        self.scheme.verify(public_key, digest, signature)
    }

    fn derive(&self, vault_id: &VaultId, public_seed: &[u8; HASH_LENGTH]) -> Result<OneTimeKeyPair> {
        let private_seed = self.master.private_seed(vault_id);
        let raw = self.scheme.generate_key_pair(&private_seed, public_seed)?;
        let public_key = PqPublicKey::from_bytes(&raw.public_key);

        if public_key.public_seed != *public_seed {
            warn!(
                vault_id = %vault_id,
                expected = %short_hex(public_seed),
                returned = %short_hex(&public_key.public_seed),
                "primitive returned key material for a different public seed"
            );
            return Err(QuipError::KeyDerivation {
                expected: short_hex(public_seed),
                returned: short_hex(&public_key.public_seed),
            });
        }

        debug!(
            vault_id = %vault_id,
            public_seed = %short_hex(public_seed),
            "derived one-time key pair"
        );

        Ok(OneTimeKeyPair {
            private_key: raw.private_key,
            public_key,
        })
    }

    /// Mark an identity as used. Returns `false` if it already was.
    fn retire(&self, vault_id: &VaultId, public_seed: &[u8; HASH_LENGTH]) -> bool {
        self.retired.lock().insert((*vault_id, *public_seed))
    }
}

impl<S: OneTimeSignatureScheme> SigningCapability for QuipSigner<S> {
    fn derive_new(&self, vault_id: &VaultId) -> Result<PqPublicKey> {
        Ok(*self.derive_key_pair(vault_id)?.public_key())
    }

    fn recover(&self, vault_id: &VaultId, public_seed: &[u8; HASH_LENGTH]) -> Result<PqPublicKey> {
        Ok(*self.recover_key_pair(vault_id, public_seed)?.public_key())
    }

    fn sign(
        &self,
        vault_id: &VaultId,
        public_seed: &[u8; HASH_LENGTH],
        digest: &[u8; HASH_LENGTH],
    ) -> Result<PqSignature> {
        if !self.retire(vault_id, public_seed) {
            warn!(
                vault_id = %vault_id,
                public_seed = %short_hex(public_seed),
                "refusing second signature under a one-time key"
            );
            return Err(QuipError::KeyReuse {
                vault_id: *vault_id,
                public_seed: short_hex(public_seed),
            });
        }

        let pair = self.recover_key_pair(vault_id, public_seed)?;
        pair.sign(self.scheme.as_ref(), digest)
    }
}

impl<S> std::fmt::Debug for QuipSigner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuipSigner")
            .field("retired", &self.retired.lock().len())
            .finish_non_exhaustive()
    }
}
