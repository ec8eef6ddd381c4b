//! # Cryptographic Primitives
//!
//! Two concerns live here and nothing else:
//!
//! - **Keccak-256**: the ledger's hash. Every digest this crate produces
//!   has to match what the contract recomputes, byte for byte.
//! - **The one-time signature contract**: the trait boundary to the
//!   Winternitz primitive. We consume it; we do not implement it.
//!
//! Key derivation on top of these lives in [`crate::keys`].

pub mod hash;
pub mod ots;

pub use hash::{keccak256, keccak256_multi};
pub use ots::{OneTimeSignatureScheme, PrivateKeyBytes, RawKeyPair};
