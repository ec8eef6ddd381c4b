// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Quip Protocol: Core Library
//!
//! Client-side core for post-quantum smart-contract vaults. Each vault is
//! guarded by a hash-based one-time signature key that is used exactly once
//! and replaced in the same ledger operation, so a leaked old key can never
//! authorize anything new.
//!
//! ## Architecture
//!
//! - **crypto**: Keccak-256 and the trait boundary to the external
//!   Winternitz primitive.
//! - **keys**: per-vault key derivation from a master secret, the signing
//!   capability and one-time-use enforcement.
//! - **message**: the packed transfer and call messages that get signed.
//! - **address**: CREATE2 vault address prediction and library linking.
//! - **ledger**: the factory and vault collaborator traits.
//! - **session**: a bound vault and its sign-then-rotate cycle.
//! - **client**: vault creation, lookup and enumeration for one owner.
//! - **config**: wire constants, networks and client configuration.
//!
//! ## Design Rules
//!
//! 1. A one-time key signs at most one message. Enforced, not hoped for.
//! 2. Local state follows the ledger; it never runs ahead of it.
//! 3. Address prediction is a pure function with bit-exact ledger parity.
//! 4. Secrets never reach a log line or a `Debug` string.

pub mod address;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod logging;
pub mod message;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use address::{BytecodeTemplate, LinkedBytecode, VaultAddressOracle};
pub use client::{QuipClient, VaultListing};
pub use config::{ClientConfig, Network};
pub use error::{QuipError, Result};
pub use keys::{MasterSecret, OneTimeKeyPair, QuipSigner, SigningCapability};
pub use ledger::{
    CallRequest, LedgerError, LedgerResult, PqTransferEvent, Receipt, TransferRequest,
    VaultFactory, VaultLedger,
};
pub use message::AuthorizationMessage;
pub use session::{PendingAuthorization, RebindOutcome, SignedOperation, VaultSession};
pub use types::{Address, PqPublicKey, PqSignature, VaultId};
