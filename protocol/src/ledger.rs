//! # Ledger Collaborators
//!
//! The vault core never talks to a chain directly. It consumes two
//! collaborators:
//!
//! - [`VaultFactory`]: the CREATE2 deployer and per-owner vault index.
//! - [`VaultLedger`]: per-vault state (current identity, fees) and the
//!   two rotating entry points, transfer and call.
//!
//! Every method may suspend while the ledger answers. The ledger is the
//! only serialization point for a vault: it MUST reject any signature that
//! does not verify against the vault's current identity, which is what
//! makes concurrent stale submissions harmless.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::HASH_LENGTH;
use crate::error::QuipError;
use crate::types::{Address, PqPublicKey, PqSignature, VaultId};

/// Failures reported by a ledger collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// The attached value does not cover the fee.
    #[error("insufficient fee: required {required}, provided {provided}")]
    InsufficientFee {
        /// Fee the contract demands.
        required: u128,
        /// Value that was attached.
        provided: u128,
    },

    /// The contract reverted.
    #[error("rejected: {0}")]
    Rejected(String),

    /// An index read past the end of the owner's vault list.
    #[error("index {index} out of range")]
    OutOfRange {
        /// The index that was read.
        index: u64,
    },

    /// The ledger could not be reached.
    #[error("transport: {0}")]
    Transport(String),
}

impl From<LedgerError> for QuipError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFee { required, provided } => {
                QuipError::InsufficientFee { required, provided }
            }
            LedgerError::Rejected(reason) => QuipError::Rejected(reason),
            // Callers that expect exhaustion match on `OutOfRange` before
            // converting. Anywhere else it means the index lied.
            LedgerError::OutOfRange { index } => {
                QuipError::InconsistentState(format!("vault index {index} out of range"))
            }
            LedgerError::Transport(reason) => QuipError::Transport(reason),
        }
    }
}

/// Result alias for collaborator calls.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// A signed transfer plus the identity it rotates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Identity that becomes current once this is accepted.
    pub next: PqPublicKey,
    /// Signature by the current identity over the transfer message.
    pub signature: PqSignature,
    /// Recipient of the funds.
    pub recipient: Address,
    /// Amount in the smallest unit.
    pub amount: u128,
}

/// A signed generic call plus the identity it rotates to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Identity that becomes current once this is accepted.
    pub next: PqPublicKey,
    /// Signature by the current identity over the call message.
    pub signature: PqSignature,
    /// Contract to call.
    pub target: Address,
    /// Opaque calldata.
    pub payload: Vec<u8>,
}

/// Event a vault emits when a transfer is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqTransferEvent {
    /// Amount moved.
    pub amount: u128,
    /// Ledger timestamp, seconds since the epoch.
    pub when: i64,
    /// Identity that signed.
    pub from: PqPublicKey,
    /// Identity that replaced it.
    pub next: PqPublicKey,
    /// Recipient of the funds.
    pub to: Address,
}

/// What the ledger hands back for an accepted operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Transaction hash.
    pub tx_hash: [u8; HASH_LENGTH],
    /// Vault that executed the operation.
    pub vault: Address,
    /// Identity that authorized it.
    pub previous: PqPublicKey,
    /// Identity now current on the ledger.
    pub next: PqPublicKey,
    /// Value attached to cover the fee.
    pub fee_paid: u128,
    /// Present for transfers.
    pub transfer: Option<PqTransferEvent>,
}

/// The vault factory: deploys vaults and indexes them per owner.
#[async_trait]
pub trait VaultFactory: Send + Sync {
    /// Address vaults are deployed from.
    fn factory_address(&self) -> Address;

    /// Winternitz verifier library linked into vault code.
    fn library_address(&self) -> Address;

    /// Value that must accompany `create_vault`.
    async fn creation_fee(&self) -> LedgerResult<u128>;

    /// Deployed vault for `(owner, vault_id)`, if any.
    async fn vault_of(&self, owner: &Address, vault_id: &VaultId) -> LedgerResult<Option<Address>>;

    /// The `index`-th vault id created by `owner`. Fails with
    /// [`LedgerError::OutOfRange`] past the end.
    async fn vault_id_at(&self, owner: &Address, index: u64) -> LedgerResult<VaultId>;

    /// How many vaults `owner` has, when the ledger can say.
    async fn vault_count(&self, _owner: &Address) -> LedgerResult<Option<u64>> {
        Ok(None)
    }

    /// Deploy a vault for `owner` with `initial` as its first identity.
    /// `value` covers the creation fee; any excess is the initial deposit.
    async fn create_vault(
        &self,
        vault_id: &VaultId,
        owner: &Address,
        initial: &PqPublicKey,
        value: u128,
    ) -> LedgerResult<Address>;
}

/// A deployed vault's state and its two rotating entry points.
#[async_trait]
pub trait VaultLedger: Send + Sync {
    /// The identity currently authorized to sign for `vault`.
    async fn current_identity(&self, vault: &Address) -> LedgerResult<PqPublicKey>;

    /// Fee for a transfer out of `vault`.
    async fn transfer_fee(&self, vault: &Address) -> LedgerResult<u128>;

    /// Fee for a call from `vault`.
    async fn execute_fee(&self, vault: &Address) -> LedgerResult<u128>;

    /// Submit a signed transfer with `value` attached.
    async fn submit_transfer(
        &self,
        vault: &Address,
        request: &TransferRequest,
        value: u128,
    ) -> LedgerResult<Receipt>;

    /// Submit a signed call with `value` attached.
    async fn submit_call(
        &self,
        vault: &Address,
        request: &CallRequest,
        value: u128,
    ) -> LedgerResult<Receipt>;

    /// Suspend until the transaction behind `receipt` is `confirmations`
    /// deep. Ledgers that apply submissions atomically are final at once.
    async fn await_confirmations(&self, receipt: &Receipt, confirmations: u64) -> LedgerResult<()> {
        let _ = (receipt, confirmations);
        Ok(())
    }
}
