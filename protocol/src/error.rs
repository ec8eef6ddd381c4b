//! Error types for the Quip vault protocol.
//!
//! Every fallible operation in this crate returns a [`QuipError`]. The
//! variants map one-to-one onto the failure modes a caller has to tell
//! apart: fatal consistency failures (wrong signer, corrupted primitive,
//! unlinked bytecode), precondition failures the caller can route around
//! (vault exists / does not exist), and ledger refusals.
//!
//! Messages name the invariant that broke. "signer does not control this
//! vault" is actionable; "operation failed" is not.

use thiserror::Error;

use crate::types::{Address, VaultId};

/// Shorthand used across the crate.
pub type Result<T> = std::result::Result<T, QuipError>;

/// Errors raised by the vault protocol core.
#[derive(Debug, Error)]
pub enum QuipError {
    /// The one-time signature primitive returned key material whose public
    /// seed differs from the one it was asked to derive under.
    #[error("key derivation returned public seed {returned}, expected {expected}")]
    KeyDerivation {
        /// Hex prefix of the public seed that was requested.
        expected: String,
        /// Hex prefix of the public seed the primitive handed back.
        returned: String,
    },

    /// Creation bytecode still contains a library placeholder after linking.
    #[error("unlinked library placeholder {placeholder} at offset {offset} in creation bytecode")]
    UnlinkedBytecode {
        /// The placeholder token, e.g. `__$1b2c...$__`.
        placeholder: String,
        /// Character offset of the placeholder inside the hex template.
        offset: usize,
    },

    /// The key recovered from the on-ledger public seed does not hash to
    /// the on-ledger public key hash.
    #[error("signer does not control vault {vault_id}: recovered key hash does not match on-ledger identity")]
    AuthorizationMismatch {
        /// The vault that was being bound.
        vault_id: VaultId,
    },

    /// The factory already maps this owner and vault id to a deployment.
    #[error("vault {vault_id} already exists at {address}")]
    AlreadyExists {
        /// The vault id that was requested.
        vault_id: VaultId,
        /// Where the existing vault lives.
        address: Address,
    },

    /// No deployment exists for this owner and vault id.
    #[error("no vault found for vault id {vault_id}")]
    NotFound {
        /// The vault id that was requested.
        vault_id: VaultId,
    },

    /// The ledger declined the operation because the attached fee is short.
    #[error("insufficient fee: required {required}, provided {provided}")]
    InsufficientFee {
        /// Fee the contract demands.
        required: u128,
        /// Fee that was attached.
        provided: u128,
    },

    /// The ledger declined the operation for any other reason.
    #[error("rejected by ledger: {0}")]
    Rejected(String),

    /// A second signature was requested under a one-time key that has
    /// already signed (or attempted to sign) a message.
    #[error("one-time key {public_seed} for vault {vault_id} has already been used to sign")]
    KeyReuse {
        /// The vault the key belongs to.
        vault_id: VaultId,
        /// Hex prefix of the retired key's public seed.
        public_seed: String,
    },

    /// The current one-time key already signed an authorization whose
    /// outcome on the ledger is not settled.
    #[error("vault {vault_id} has a transmitted authorization pending; resubmit it or rebind")]
    PendingAuthorization {
        /// The vault with the in-flight authorization.
        vault_id: VaultId,
    },

    /// `resubmit_pending` was called with nothing pending.
    #[error("vault {vault_id} has no pending authorization")]
    NoPendingAuthorization {
        /// The vault that was queried.
        vault_id: VaultId,
    },

    /// The on-ledger identity moved without this session observing it.
    #[error("session for vault {vault_id} is stale: on-ledger identity changed, rebind before authorizing")]
    StaleSession {
        /// The vault whose session is out of date.
        vault_id: VaultId,
    },

    /// The ledger returned state that contradicts its own invariants.
    #[error("inconsistent ledger state: {0}")]
    InconsistentState(String),

    /// The signature primitive failed to produce a signature.
    #[error("signature construction failed: {0}")]
    Signature(String),

    /// Hex text could not be decoded.
    #[error("invalid hex: {0}")]
    InvalidHex(String),

    /// A fixed-width value had the wrong number of bytes.
    #[error("invalid length for {what}: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// What was being parsed.
        what: &'static str,
        /// Required width in bytes.
        expected: usize,
        /// Width that was supplied.
        got: usize,
    },

    /// The collaborator could not be reached or answered garbage.
    #[error("transport error: {0}")]
    Transport(String),

    /// The client configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),
}

impl QuipError {
    /// Whether another attempt can succeed without the ledger changing.
    ///
    /// `InsufficientFee` and `Transport` clear on `resubmit_pending`, which
    /// attaches the fee in force. `StaleSession` clears after `rebind`.
    ///
    /// `Rejected` is a revert of the signed request itself. Resending the
    /// same bytes reverts again until ledger state changes, and the key
    /// that signed them cannot sign anything else. `PendingAuthorization`
    /// only says something else has to settle first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            QuipError::InsufficientFee { .. }
                | QuipError::Transport(_)
                | QuipError::StaleSession { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_the_invariant() {
        let err = QuipError::AuthorizationMismatch {
            vault_id: VaultId::from_bytes([7u8; 32]),
        };
        assert!(err.to_string().contains("signer does not control vault"));
    }

    #[test]
    fn fatal_errors_are_not_retryable() {
        let fatal = QuipError::KeyDerivation {
            expected: "aa".into(),
            returned: "bb".into(),
        };
        assert!(!fatal.is_retryable());
        assert!(QuipError::InsufficientFee {
            required: 10,
            provided: 1
        }
        .is_retryable());
        assert!(QuipError::Transport("timeout".into()).is_retryable());
    }

    #[test]
    fn reverts_and_pending_are_not_retryable() {
        let vault_id = VaultId::from_bytes([7u8; 32]);
        assert!(!QuipError::Rejected("insufficient balance".into()).is_retryable());
        assert!(!QuipError::PendingAuthorization { vault_id }.is_retryable());
        assert!(QuipError::StaleSession { vault_id }.is_retryable());
    }
}
