//! # Vault Factory Contract
//!
//! Deploys one wallet per `(owner, vault_id)` at its CREATE2 address,
//! indexes vault ids per owner, and collects protocol fees.
//!
//! ## Fees
//!
//! Three fees are in force at any time: creation, transfer and execute.
//! Creation fees are paid to the factory directly. Wallets forward their
//! transfer and execute fees here. Only the admin may change fees, withdraw
//! the accumulated balance or hand over the admin role.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use quip_protocol::address::{BytecodeTemplate, VaultAddressOracle};
use quip_protocol::types::{Address, PqPublicKey, VaultId};

use crate::error::ContractError;

/// Emitted once per vault creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuipCreated {
    /// Value deposited into the new vault (after the fee).
    pub amount: u128,
    /// Block time.
    pub when: DateTime<Utc>,
    /// The vault id.
    pub vault_id: VaultId,
    /// Creator and owner.
    pub creator: Address,
    /// First one-time identity.
    pub pq_pubkey: PqPublicKey,
    /// Deployed address.
    pub vault: Address,
}

/// Fee schedule in force.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    /// Due with every vault creation.
    pub creation: u128,
    /// Due with every transfer.
    pub transfer: u128,
    /// Due with every call.
    pub execute: u128,
}

/// Factory contract state.
#[derive(Debug, Clone)]
pub struct QuipFactory {
    address: Address,
    admin: Address,
    oracle: VaultAddressOracle,
    fees: FeeSchedule,
    balance: u128,
    vaults: HashMap<(Address, VaultId), Address>,
    vault_ids: HashMap<Address, Vec<VaultId>>,
}

impl QuipFactory {
    /// Deploy a factory at `address` linking vault code against `library`.
    pub fn new(
        address: Address,
        admin: Address,
        library: Address,
        template: &BytecodeTemplate,
    ) -> Result<Self, ContractError> {
        let oracle = VaultAddressOracle::new(address, library, template)
            .map_err(|e| ContractError::Bytecode(e.to_string()))?;
        Ok(Self {
            address,
            admin,
            oracle,
            fees: FeeSchedule::default(),
            balance: 0,
            vaults: HashMap::new(),
            vault_ids: HashMap::new(),
        })
    }

    /// Factory address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Linked verifier library.
    pub fn library(&self) -> Address {
        self.oracle.library()
    }

    /// Current admin.
    pub fn admin(&self) -> Address {
        self.admin
    }

    /// Fees in force.
    pub fn fees(&self) -> FeeSchedule {
        self.fees
    }

    /// Accumulated, unwithdrawn fees.
    pub fn balance(&self) -> u128 {
        self.balance
    }

    fn only_admin(&self, caller: Address) -> Result<(), ContractError> {
        if caller != self.admin {
            return Err(ContractError::NotAdmin);
        }
        Ok(())
    }

    /// Set the creation fee.
    pub fn set_creation_fee(&mut self, caller: Address, fee: u128) -> Result<(), ContractError> {
        self.only_admin(caller)?;
        self.fees.creation = fee;
        Ok(())
    }

    /// Set the transfer fee.
    pub fn set_transfer_fee(&mut self, caller: Address, fee: u128) -> Result<(), ContractError> {
        self.only_admin(caller)?;
        self.fees.transfer = fee;
        Ok(())
    }

    /// Set the execute fee.
    pub fn set_execute_fee(&mut self, caller: Address, fee: u128) -> Result<(), ContractError> {
        self.only_admin(caller)?;
        self.fees.execute = fee;
        Ok(())
    }

    /// Hand the admin role to `new_admin`.
    pub fn transfer_ownership(
        &mut self,
        caller: Address,
        new_admin: Address,
    ) -> Result<(), ContractError> {
        self.only_admin(caller)?;
        info!(from = %self.admin, to = %new_admin, "factory admin transferred");
        self.admin = new_admin;
        Ok(())
    }

    /// Take `amount` of accumulated fees out. Returns the amount paid.
    pub fn withdraw(&mut self, caller: Address, amount: u128) -> Result<u128, ContractError> {
        self.only_admin(caller)?;
        self.balance = self
            .balance
            .checked_sub(amount)
            .ok_or(ContractError::InsufficientBalance {
                balance: self.balance,
                amount,
            })?;
        Ok(amount)
    }

    /// Credit a fee forwarded by a wallet.
    pub fn collect(&mut self, fee: u128) -> Result<(), ContractError> {
        self.balance = self.balance.checked_add(fee).ok_or(ContractError::Overflow)?;
        Ok(())
    }

    /// Register a new vault. Returns the creation event; its `amount` is the
    /// deposit the new wallet starts with.
    pub fn create(
        &mut self,
        vault_id: VaultId,
        owner: Address,
        initial: PqPublicKey,
        value: u128,
    ) -> Result<QuipCreated, ContractError> {
        let required = self.fees.creation;
        if value < required {
            return Err(ContractError::InsufficientFee {
                required,
                provided: value,
            });
        }
        if self.vaults.contains_key(&(owner, vault_id)) {
            return Err(ContractError::VaultExists { owner, vault_id });
        }

        let vault = self.oracle.vault_address(owner, &vault_id);
        self.collect(required)?;
        self.vaults.insert((owner, vault_id), vault);
        self.vault_ids.entry(owner).or_default().push(vault_id);

        Ok(QuipCreated {
            amount: value - required,
            when: Utc::now(),
            vault_id,
            creator: owner,
            pq_pubkey: initial,
            vault,
        })
    }

    /// Vault deployed for `(owner, vault_id)`.
    pub fn vault_of(&self, owner: &Address, vault_id: &VaultId) -> Option<Address> {
        self.vaults.get(&(*owner, *vault_id)).copied()
    }

    /// The `index`-th vault id `owner` created.
    pub fn vault_id_at(&self, owner: &Address, index: u64) -> Option<VaultId> {
        let ids = self.vault_ids.get(owner)?;
        usize::try_from(index).ok().and_then(|i| ids.get(i)).copied()
    }

    /// How many vaults `owner` created.
    pub fn vault_count(&self, owner: &Address) -> u64 {
        self.vault_ids.get(owner).map_or(0, |ids| ids.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN: Address = Address::from_bytes([0xad; 20]);
    const OTHER: Address = Address::from_bytes([0x0b; 20]);

    fn factory() -> QuipFactory {
        let template = BytecodeTemplate::new("test", "0x60806040");
        QuipFactory::new(
            Address::from_bytes([0xf1; 20]),
            ADMIN,
            Address::from_bytes([0xa1; 20]),
            &template,
        )
        .unwrap()
    }

    #[test]
    fn only_admin_may_change_fees() {
        let mut f = factory();
        assert_eq!(f.set_creation_fee(OTHER, 1), Err(ContractError::NotAdmin));
        assert_eq!(f.set_transfer_fee(OTHER, 1), Err(ContractError::NotAdmin));
        assert_eq!(f.set_execute_fee(OTHER, 1), Err(ContractError::NotAdmin));
        f.set_creation_fee(ADMIN, 10).unwrap();
        assert_eq!(f.fees().creation, 10);
        assert_eq!(ContractError::NotAdmin.to_string(), "caller is not the admin");
    }

    #[test]
    fn creation_collects_fee_and_indexes_vault() {
        let mut f = factory();
        f.set_creation_fee(ADMIN, 10).unwrap();
        let id = VaultId::from_label("a");
        let pk = PqPublicKey::new([1; 32], [2; 32]);

        let err = f.create(id, OTHER, pk, 9).unwrap_err();
        assert!(matches!(err, ContractError::InsufficientFee { required: 10, provided: 9 }));

        let created = f.create(id, OTHER, pk, 25).unwrap();
        assert_eq!(created.amount, 15);
        assert_eq!(f.balance(), 10);
        assert_eq!(f.vault_of(&OTHER, &id), Some(created.vault));
        assert_eq!(f.vault_id_at(&OTHER, 0), Some(id));
        assert_eq!(f.vault_id_at(&OTHER, 1), None);
        assert_eq!(f.vault_count(&OTHER), 1);

        assert!(matches!(
            f.create(id, OTHER, pk, 10),
            Err(ContractError::VaultExists { .. })
        ));
    }

    #[test]
    fn withdraw_and_admin_handover() {
        let mut f = factory();
        f.collect(50).unwrap();
        assert_eq!(f.withdraw(OTHER, 10), Err(ContractError::NotAdmin));
        assert!(matches!(
            f.withdraw(ADMIN, 51),
            Err(ContractError::InsufficientBalance { .. })
        ));
        assert_eq!(f.withdraw(ADMIN, 20), Ok(20));
        assert_eq!(f.balance(), 30);

        f.transfer_ownership(ADMIN, OTHER).unwrap();
        assert_eq!(f.admin(), OTHER);
        assert_eq!(f.withdraw(ADMIN, 1), Err(ContractError::NotAdmin));
    }
}
