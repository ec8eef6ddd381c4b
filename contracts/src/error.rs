//! Revert reasons shared by the factory and wallet contracts.

use quip_protocol::ledger::LedgerError;
use quip_protocol::types::{Address, VaultId};
use thiserror::Error;

/// Why a contract call reverted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractError {
    /// An admin-only entry point was called by someone else.
    #[error("caller is not the admin")]
    NotAdmin,

    /// The attached value does not cover the fee.
    #[error("insufficient fee: required {required}, provided {provided}")]
    InsufficientFee {
        /// Fee in force.
        required: u128,
        /// Value attached.
        provided: u128,
    },

    /// A transfer or withdrawal exceeds the available balance.
    #[error("insufficient balance: have {balance}, need {amount}")]
    InsufficientBalance {
        /// Balance held.
        balance: u128,
        /// Amount requested.
        amount: u128,
    },

    /// The Winternitz signature does not verify against the current owner.
    #[error("invalid winternitz signature")]
    InvalidSignature,

    /// `(owner, vault_id)` already has a vault.
    #[error("vault {vault_id} already exists for {owner}")]
    VaultExists {
        /// Creator.
        owner: Address,
        /// Requested vault id.
        vault_id: VaultId,
    },

    /// No wallet is deployed at this address.
    #[error("no vault deployed at {0}")]
    UnknownVault(Address),

    /// The called contract reverted.
    #[error("call to {0} reverted")]
    CallReverted(Address),

    /// Arithmetic on balances would overflow.
    #[error("balance overflow")]
    Overflow,

    /// The vault bytecode could not be linked.
    #[error("vault bytecode unusable: {0}")]
    Bytecode(String),
}

impl From<ContractError> for LedgerError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::InsufficientFee { required, provided } => {
                LedgerError::InsufficientFee { required, provided }
            }
            other => LedgerError::Rejected(other.to_string()),
        }
    }
}
