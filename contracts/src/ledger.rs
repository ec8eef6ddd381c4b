//! # In-Memory Ledger
//!
//! A single-process stand-in for the chain: one [`QuipFactory`], the
//! wallets it deployed and plain account balances, behind one lock. Every
//! submission is applied atomically, which gives the same per-vault total
//! order a real chain does.
//!
//! Besides the collaborator traits it offers the levers tests need: admin
//! calls, funding, reverting call targets, an optional count query and
//! one-shot fault injection.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use quip_protocol::address::BytecodeTemplate;
use quip_protocol::crypto::{keccak256_multi, OneTimeSignatureScheme};
use quip_protocol::ledger::{
    CallRequest, LedgerError, LedgerResult, Receipt, TransferRequest, VaultFactory, VaultLedger,
};
use quip_protocol::types::{Address, PqPublicKey, VaultId};

use crate::error::ContractError;
use crate::factory::{FeeSchedule, QuipCreated, QuipFactory};
use crate::wallet::{ExecutedCall, QuipWallet};

/// A failure to inject into the next submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Fail without touching state.
    Reject(LedgerError),
    /// Apply the operation, then report this error instead of the receipt.
    DropReceipt(LedgerError),
}

#[derive(Debug)]
struct LedgerState {
    factory: QuipFactory,
    wallets: HashMap<Address, QuipWallet>,
    accounts: HashMap<Address, u128>,
    created: Vec<QuipCreated>,
    reverting: HashSet<Address>,
    fault: Option<Fault>,
    count_query: bool,
    nonce: u64,
}

impl LedgerState {
    fn credit(&mut self, account: Address, amount: u128) -> Result<(), ContractError> {
        if account == self.factory.address() {
            return self.factory.collect(amount);
        }
        if let Some(wallet) = self.wallets.get_mut(&account) {
            return wallet.receive(amount);
        }
        let balance = self.accounts.entry(account).or_default();
        *balance = balance.checked_add(amount).ok_or(ContractError::Overflow)?;
        Ok(())
    }

    fn held(&self, account: &Address) -> u128 {
        if *account == self.factory.address() {
            return self.factory.balance();
        }
        match self.wallets.get(account) {
            Some(wallet) => wallet.balance,
            None => self.accounts.get(account).copied().unwrap_or(0),
        }
    }

    /// A copy of the wallet to run an operation against. It replaces the
    /// deployed one only once the whole operation is known to succeed.
    fn staged_wallet(&self, vault: &Address) -> Result<QuipWallet, ContractError> {
        self.wallets
            .get(vault)
            .cloned()
            .ok_or(ContractError::UnknownVault(*vault))
    }

    /// Fail unless paying `fee` to the factory and `amount` to `recipient`
    /// fits, with `staged` standing in for the operating wallet.
    fn check_settlement(
        &self,
        staged: &QuipWallet,
        fee: u128,
        recipient: Address,
        amount: u128,
    ) -> Result<(), ContractError> {
        let factory = self.factory.address();
        let into_factory = if recipient == factory {
            fee.checked_add(amount).ok_or(ContractError::Overflow)?
        } else {
            fee
        };
        self.factory
            .balance()
            .checked_add(into_factory)
            .ok_or(ContractError::Overflow)?;

        if recipient != factory {
            let held = if recipient == staged.address {
                staged.balance
            } else {
                self.held(&recipient)
            };
            held.checked_add(amount).ok_or(ContractError::Overflow)?;
        }
        Ok(())
    }

    fn tx_hash(&mut self, vault: &Address, next: &PqPublicKey) -> [u8; 32] {
        self.nonce += 1;
        keccak256_multi(&[&self.nonce.to_be_bytes(), vault.as_bytes(), &next.to_bytes()])
    }
}

/// Factory, wallets and accounts in one process.
pub struct InMemoryLedger<S> {
    scheme: Arc<S>,
    state: RwLock<LedgerState>,
}

impl<S: OneTimeSignatureScheme> InMemoryLedger<S> {
    /// Deploy a factory at `factory` administered by `admin`.
    pub fn new(
        scheme: Arc<S>,
        factory: Address,
        admin: Address,
        library: Address,
        template: &BytecodeTemplate,
    ) -> Result<Self, ContractError> {
        Ok(Self {
            scheme,
            state: RwLock::new(LedgerState {
                factory: QuipFactory::new(factory, admin, library, template)?,
                wallets: HashMap::new(),
                accounts: HashMap::new(),
                created: Vec::new(),
                reverting: HashSet::new(),
                fault: None,
                count_query: true,
                nonce: 0,
            }),
        })
    }

    /// Whether [`VaultFactory::vault_count`] answers. Off means callers
    /// have to probe.
    pub fn set_count_query(&self, enabled: bool) {
        self.state.write().count_query = enabled;
    }

    /// Make the next transfer or call submission fail.
    pub fn inject_fault(&self, fault: Fault) {
        self.state.write().fault = Some(fault);
    }

    /// Calls to `target` revert from now on.
    pub fn set_reverting(&self, target: Address) {
        self.state.write().reverting.insert(target);
    }

    /// Send `amount` to `account` out of thin air.
    pub fn fund(&self, account: Address, amount: u128) -> Result<(), ContractError> {
        self.state.write().credit(account, amount)
    }

    /// Native balance of a wallet or plain account.
    pub fn balance_of(&self, account: &Address) -> u128 {
        self.state.read().held(account)
    }

    /// Snapshot of a deployed wallet.
    pub fn wallet(&self, vault: &Address) -> Option<QuipWallet> {
        self.state.read().wallets.get(vault).cloned()
    }

    /// Calls a wallet has made.
    pub fn calls(&self, vault: &Address) -> Vec<ExecutedCall> {
        self.wallet(vault).map(|w| w.calls).unwrap_or_default()
    }

    /// Every creation event, oldest first.
    pub fn created(&self) -> Vec<QuipCreated> {
        self.state.read().created.clone()
    }

    /// Fees in force.
    pub fn fees(&self) -> FeeSchedule {
        self.state.read().factory.fees()
    }

    /// Current factory admin.
    pub fn admin(&self) -> Address {
        self.state.read().factory.admin()
    }

    /// Admin: set the creation fee.
    pub fn set_creation_fee(&self, caller: Address, fee: u128) -> Result<(), ContractError> {
        self.state.write().factory.set_creation_fee(caller, fee)
    }

    /// Admin: set the transfer fee.
    pub fn set_transfer_fee(&self, caller: Address, fee: u128) -> Result<(), ContractError> {
        self.state.write().factory.set_transfer_fee(caller, fee)
    }

    /// Admin: set the execute fee.
    pub fn set_execute_fee(&self, caller: Address, fee: u128) -> Result<(), ContractError> {
        self.state.write().factory.set_execute_fee(caller, fee)
    }

    /// Admin: hand over the admin role.
    pub fn transfer_ownership(&self, caller: Address, new_admin: Address) -> Result<(), ContractError> {
        self.state.write().factory.transfer_ownership(caller, new_admin)
    }

    /// Admin: pay `amount` of collected fees to the caller.
    pub fn withdraw(&self, caller: Address, amount: u128) -> Result<(), ContractError> {
        let mut state = self.state.write();
        let paid = state.factory.withdraw(caller, amount)?;
        state.credit(caller, paid)
    }

    fn take_fault(state: &mut LedgerState) -> (Option<LedgerError>, Option<LedgerError>) {
        match state.fault.take() {
            Some(Fault::Reject(err)) => (Some(err), None),
            Some(Fault::DropReceipt(err)) => (None, Some(err)),
            None => (None, None),
        }
    }
}

#[async_trait]
impl<S: OneTimeSignatureScheme> VaultFactory for InMemoryLedger<S> {
    fn factory_address(&self) -> Address {
        self.state.read().factory.address()
    }

    fn library_address(&self) -> Address {
        self.state.read().factory.library()
    }

    async fn creation_fee(&self) -> LedgerResult<u128> {
        Ok(self.state.read().factory.fees().creation)
    }

    async fn vault_of(&self, owner: &Address, vault_id: &VaultId) -> LedgerResult<Option<Address>> {
        Ok(self.state.read().factory.vault_of(owner, vault_id))
    }

    async fn vault_id_at(&self, owner: &Address, index: u64) -> LedgerResult<VaultId> {
        self.state
            .read()
            .factory
            .vault_id_at(owner, index)
            .ok_or(LedgerError::OutOfRange { index })
    }

    async fn vault_count(&self, owner: &Address) -> LedgerResult<Option<u64>> {
        let state = self.state.read();
        Ok(state
            .count_query
            .then(|| state.factory.vault_count(owner)))
    }

    async fn create_vault(
        &self,
        vault_id: &VaultId,
        owner: &Address,
        initial: &PqPublicKey,
        value: u128,
    ) -> LedgerResult<Address> {
        let mut state = self.state.write();
        let created = state.factory.create(*vault_id, *owner, *initial, value)?;
        let wallet = QuipWallet::new(created.vault, *owner, *vault_id, *initial, created.amount);
        state.wallets.insert(created.vault, wallet);

        info!(
            vault_id = %vault_id,
            vault = %created.vault,
            owner = %owner,
            deposit = %created.amount,
            "QuipCreated"
        );
        let vault = created.vault;
        state.created.push(created);
        Ok(vault)
    }
}

#[async_trait]
impl<S: OneTimeSignatureScheme> VaultLedger for InMemoryLedger<S> {
    async fn current_identity(&self, vault: &Address) -> LedgerResult<PqPublicKey> {
        let state = self.state.read();
        let wallet = state
            .wallets
            .get(vault)
            .ok_or(ContractError::UnknownVault(*vault))?;
        Ok(wallet.pq_owner)
    }

    async fn transfer_fee(&self, _vault: &Address) -> LedgerResult<u128> {
        Ok(self.state.read().factory.fees().transfer)
    }

    async fn execute_fee(&self, _vault: &Address) -> LedgerResult<u128> {
        Ok(self.state.read().factory.fees().execute)
    }

    async fn submit_transfer(
        &self,
        vault: &Address,
        request: &TransferRequest,
        value: u128,
    ) -> LedgerResult<Receipt> {
        let mut state = self.state.write();
        let (reject, drop_receipt) = Self::take_fault(&mut state);
        if let Some(err) = reject {
            return Err(err);
        }

        let fee = state.factory.fees().transfer;
        let mut wallet = state.staged_wallet(vault)?;
        let event = wallet
            .transfer_with_winternitz(self.scheme.as_ref(), request, value, fee)
            .and_then(|event| {
                state.check_settlement(&wallet, value, request.recipient, request.amount)?;
                Ok(event)
            });
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                warn!(vault = %vault, error = %err, "transfer reverted");
                return Err(err.into());
            }
        };

        state.wallets.insert(*vault, wallet);
        state.factory.collect(value)?;
        state.credit(request.recipient, request.amount)?;
        let tx_hash = state.tx_hash(vault, &request.next);
        debug!(vault = %vault, to = %request.recipient, amount = %request.amount, "pqTransfer");

        if let Some(err) = drop_receipt {
            return Err(err);
        }
        Ok(Receipt {
            tx_hash,
            vault: *vault,
            previous: event.from,
            next: event.next,
            fee_paid: value,
            transfer: Some(event),
        })
    }

    async fn submit_call(
        &self,
        vault: &Address,
        request: &CallRequest,
        value: u128,
    ) -> LedgerResult<Receipt> {
        let mut state = self.state.write();
        let (reject, drop_receipt) = Self::take_fault(&mut state);
        if let Some(err) = reject {
            return Err(err);
        }

        let fee = state.factory.fees().execute;
        let reverts = state.reverting.contains(&request.target);
        let mut wallet = state.staged_wallet(vault)?;
        let previous = wallet.pq_owner;
        let call = wallet
            .execute_with_winternitz(self.scheme.as_ref(), request, value, fee, reverts)
            .and_then(|call| {
                state.check_settlement(&wallet, fee, call.target, call.value)?;
                Ok(call)
            });
        let call = match call {
            Ok(call) => call,
            Err(err) => {
                warn!(vault = %vault, error = %err, "call reverted");
                return Err(err.into());
            }
        };

        state.wallets.insert(*vault, wallet);
        state.factory.collect(fee)?;
        if call.value > 0 {
            state.credit(call.target, call.value)?;
        }
        let tx_hash = state.tx_hash(vault, &request.next);
        debug!(vault = %vault, target = %call.target, "executed call");

        if let Some(err) = drop_receipt {
            return Err(err);
        }
        Ok(Receipt {
            tx_hash,
            vault: *vault,
            previous,
            next: request.next,
            fee_paid: fee,
            transfer: None,
        })
    }
}

impl<S> std::fmt::Debug for InMemoryLedger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("InMemoryLedger")
            .field("factory", &state.factory.address())
            .field("wallets", &state.wallets.len())
            .finish_non_exhaustive()
    }
}
