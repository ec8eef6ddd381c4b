//! # Authorization Messages
//!
//! The exact bytes a vault's current one-time key signs. The contract
//! rebuilds the same bytes from its own state and the call arguments,
//! hashes them, and checks the signature against that digest. Field order
//! and widths are therefore part of the wire contract:
//!
//! ```text
//! Transfer:  cur.seed(32) cur.hash(32) next.seed(32) next.hash(32) recipient(20) amount(32, BE)
//! Call:      cur.seed(32) cur.hash(32) next.seed(32) next.hash(32) target(20)    payload(n)
//! ```
//!
//! This is Solidity's `abi.encodePacked` of the same tuple: no length
//! prefixes, no padding beyond the fixed widths above.

use crate::config::{ADDRESS_LENGTH, AMOUNT_LENGTH, HASH_LENGTH};
use crate::crypto::hash::keccak256;
use crate::types::{Address, PqPublicKey};

/// Width of the shared `current || next` identity prefix.
pub const IDENTITY_PREFIX_LENGTH: usize = 4 * HASH_LENGTH;

/// Packed length of a transfer message.
pub const TRANSFER_MESSAGE_LENGTH: usize = IDENTITY_PREFIX_LENGTH + ADDRESS_LENGTH + AMOUNT_LENGTH;

/// Encode an amount as a 256-bit big-endian word.
pub fn amount_word(amount: u128) -> [u8; AMOUNT_LENGTH] {
    let mut word = [0u8; AMOUNT_LENGTH];
    word[AMOUNT_LENGTH - 16..].copy_from_slice(&amount.to_be_bytes());
    word
}

/// A message authorizing one vault operation and one key rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationMessage {
    /// Move `amount` of the native asset to `recipient`.
    Transfer {
        /// Identity currently authorized on the ledger (the signer).
        current: PqPublicKey,
        /// Identity that replaces it once the operation is accepted.
        next: PqPublicKey,
        /// Recipient of the funds.
        recipient: Address,
        /// Amount in the smallest unit.
        amount: u128,
    },
    /// Call `target` with opaque `payload`.
    Call {
        /// Identity currently authorized on the ledger (the signer).
        current: PqPublicKey,
        /// Identity that replaces it once the operation is accepted.
        next: PqPublicKey,
        /// Contract to call.
        target: Address,
        /// Calldata, passed through untouched.
        payload: Vec<u8>,
    },
}

impl AuthorizationMessage {
    /// Build a transfer message.
    pub fn transfer(current: PqPublicKey, next: PqPublicKey, recipient: Address, amount: u128) -> Self {
        Self::Transfer {
            current,
            next,
            recipient,
            amount,
        }
    }

    /// Build a generic call message.
    pub fn call(current: PqPublicKey, next: PqPublicKey, target: Address, payload: Vec<u8>) -> Self {
        Self::Call {
            current,
            next,
            target,
            payload,
        }
    }

    /// The identity that must sign this message.
    pub fn current(&self) -> &PqPublicKey {
        match self {
            Self::Transfer { current, .. } | Self::Call { current, .. } => current,
        }
    }

    /// The identity this message commits to next.
    pub fn next(&self) -> &PqPublicKey {
        match self {
            Self::Transfer { next, .. } | Self::Call { next, .. } => next,
        }
    }

    /// Packed wire encoding.
    pub fn encode(&self) -> Vec<u8> {
        let (current, next) = (self.current(), self.next());
        let mut out = Vec::with_capacity(match self {
            Self::Transfer { .. } => TRANSFER_MESSAGE_LENGTH,
            Self::Call { payload, .. } => IDENTITY_PREFIX_LENGTH + ADDRESS_LENGTH + payload.len(),
        });
        out.extend_from_slice(&current.public_seed);
        out.extend_from_slice(&current.public_key_hash);
        out.extend_from_slice(&next.public_seed);
        out.extend_from_slice(&next.public_key_hash);

        match self {
            Self::Transfer {
                recipient, amount, ..
            } => {
                out.extend_from_slice(recipient.as_bytes());
                out.extend_from_slice(&amount_word(*amount));
            }
            Self::Call {
                target, payload, ..
            } => {
                out.extend_from_slice(target.as_bytes());
                out.extend_from_slice(payload);
            }
        }
        out
    }

    /// Keccak-256 of [`encode`](Self::encode). This is what gets signed.
    pub fn digest(&self) -> [u8; HASH_LENGTH] {
        keccak256(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids() -> (PqPublicKey, PqPublicKey) {
        (
            PqPublicKey::new([0x11; 32], [0x22; 32]),
            PqPublicKey::new([0x33; 32], [0x44; 32]),
        )
    }

    fn recipient() -> Address {
        Address::from_bytes([0x55; 20])
    }

    #[test]
    fn transfer_layout_is_packed_in_order() {
        let (current, next) = ids();
        let msg = AuthorizationMessage::transfer(current, next, recipient(), 0x0102);
        let bytes = msg.encode();

        assert_eq!(bytes.len(), TRANSFER_MESSAGE_LENGTH);
        assert_eq!(bytes.len(), 180);
        assert_eq!(&bytes[0..32], &[0x11; 32]);
        assert_eq!(&bytes[32..64], &[0x22; 32]);
        assert_eq!(&bytes[64..96], &[0x33; 32]);
        assert_eq!(&bytes[96..128], &[0x44; 32]);
        assert_eq!(&bytes[128..148], &[0x55; 20]);
        // Amount is a big-endian 256-bit word.
        assert!(bytes[148..178].iter().all(|b| *b == 0));
        assert_eq!(&bytes[178..180], &[0x01, 0x02]);
    }

    #[test]
    fn call_layout_appends_raw_payload() {
        let (current, next) = ids();
        let payload = vec![0xde, 0xad, 0xbe, 0xef, 0x00];
        let msg = AuthorizationMessage::call(current, next, recipient(), payload.clone());
        let bytes = msg.encode();

        assert_eq!(bytes.len(), IDENTITY_PREFIX_LENGTH + 20 + payload.len());
        assert_eq!(&bytes[128..148], &[0x55; 20]);
        assert_eq!(&bytes[148..], payload.as_slice());
    }

    #[test]
    fn empty_call_payload_is_allowed() {
        let (current, next) = ids();
        let msg = AuthorizationMessage::call(current, next, recipient(), Vec::new());
        assert_eq!(msg.encode().len(), IDENTITY_PREFIX_LENGTH + 20);
    }

    #[test]
    fn max_amount_fills_low_sixteen_bytes() {
        let word = amount_word(u128::MAX);
        assert!(word[..16].iter().all(|b| *b == 0));
        assert!(word[16..].iter().all(|b| *b == 0xff));
    }

    #[test]
    fn digest_is_keccak_of_encoding() {
        let (current, next) = ids();
        let msg = AuthorizationMessage::transfer(current, next, recipient(), 7);
        assert_eq!(msg.digest(), keccak256(&msg.encode()));
    }

    #[test]
    fn swapping_identities_changes_digest() {
        let (current, next) = ids();
        let forward = AuthorizationMessage::transfer(current, next, recipient(), 7);
        let backward = AuthorizationMessage::transfer(next, current, recipient(), 7);
        assert_ne!(forward.digest(), backward.digest());
    }

    proptest! {
        #[test]
        fn digest_binds_amount(a in any::<u128>(), b in any::<u128>()) {
            prop_assume!(a != b);
            let (current, next) = ids();
            let da = AuthorizationMessage::transfer(current, next, recipient(), a).digest();
            let db = AuthorizationMessage::transfer(current, next, recipient(), b).digest();
            prop_assert_ne!(da, db);
        }

        #[test]
        fn call_with_amount_payload_matches_transfer_digest(amount in any::<u128>()) {
            // The two kinds share a byte layout; the contract entry point is
            // what tells them apart, not the digest.
            let (current, next) = ids();
            let transfer = AuthorizationMessage::transfer(current, next, recipient(), amount);
            let call = AuthorizationMessage::call(
                current,
                next,
                recipient(),
                amount_word(amount).to_vec(),
            );
            prop_assert_eq!(transfer.digest(), call.digest());
        }
    }
}
