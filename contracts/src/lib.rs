// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Quip Reference Contracts
//!
//! In-memory models of the two contracts a Quip deployment consists of,
//! plus a ledger that hosts them behind the collaborator traits from
//! `quip-protocol`:
//!
//! - **Factory**: deterministic vault deployment, per-owner vault index,
//!   fee schedule and admin controls.
//! - **Wallet**: the vault itself. Verifies a Winternitz signature from
//!   its current one-time owner, performs the transfer or call, and rotates
//!   to the next owner in the same step.
//! - **Ledger**: [`InMemoryLedger`], one lock around all of the above.
//!
//! ## Design Principles
//!
//! 1. Balances use checked arithmetic. A reverted call changes nothing.
//! 2. Messages are rebuilt from contract state, never taken from the caller.
//! 3. Addresses come from the same CREATE2 oracle clients use to predict them.

pub mod error;
pub mod factory;
pub mod ledger;
pub mod wallet;

pub use error::ContractError;
pub use factory::{FeeSchedule, QuipCreated, QuipFactory};
pub use ledger::{Fault, InMemoryLedger};
pub use wallet::{ExecutedCall, QuipWallet};
