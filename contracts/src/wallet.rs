//! # Vault Wallet Contract
//!
//! One deployed vault. Holds a native balance and the `pq_owner` identity,
//! the only one-time key allowed to authorize the next operation.
//!
//! Both entry points follow the same order: fee check, signature check
//! against a message rebuilt from contract state, effect, rotation. A
//! reverted call leaves everything untouched, including `pq_owner`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use quip_protocol::crypto::OneTimeSignatureScheme;
use quip_protocol::ledger::{CallRequest, PqTransferEvent, TransferRequest};
use quip_protocol::message::AuthorizationMessage;
use quip_protocol::types::{Address, PqPublicKey, PqSignature, VaultId};

use crate::error::ContractError;

/// A call the wallet made on its owner's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutedCall {
    /// Called contract.
    pub target: Address,
    /// Calldata.
    pub payload: Vec<u8>,
    /// Value forwarded beyond the execute fee.
    pub value: u128,
    /// Block time.
    pub when: DateTime<Utc>,
}

/// Wallet contract state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuipWallet {
    /// Where the wallet lives.
    pub address: Address,
    /// The account that created it.
    pub owner: Address,
    /// Its vault id.
    pub vault_id: VaultId,
    /// Currently authorized one-time identity.
    pub pq_owner: PqPublicKey,
    /// Native balance.
    pub balance: u128,
    /// Calls made so far, oldest first.
    pub calls: Vec<ExecutedCall>,
    /// Deployment time.
    pub created_at: DateTime<Utc>,
}

fn check_fee(required: u128, provided: u128) -> Result<(), ContractError> {
    if provided < required {
        return Err(ContractError::InsufficientFee { required, provided });
    }
    Ok(())
}

impl QuipWallet {
    /// A freshly deployed wallet.
    pub fn new(
        address: Address,
        owner: Address,
        vault_id: VaultId,
        pq_owner: PqPublicKey,
        deposit: u128,
    ) -> Self {
        Self {
            address,
            owner,
            vault_id,
            pq_owner,
            balance: deposit,
            calls: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Accept a plain deposit.
    pub fn receive(&mut self, amount: u128) -> Result<(), ContractError> {
        self.balance = self.balance.checked_add(amount).ok_or(ContractError::Overflow)?;
        Ok(())
    }

    fn verify<S>(
        &self,
        scheme: &S,
        message: &AuthorizationMessage,
        signature: &PqSignature,
    ) -> Result<(), ContractError>
    where
        S: OneTimeSignatureScheme + ?Sized,
    {
        if !scheme.verify(&self.pq_owner, &message.digest(), signature) {
            return Err(ContractError::InvalidSignature);
        }
        Ok(())
    }

    /// Move `request.amount` to `request.recipient` and rotate `pq_owner`.
    ///
    /// `value` is what the caller attached; `fee` is the transfer fee in
    /// force. The whole attached value goes to the factory.
    pub fn transfer_with_winternitz<S>(
        &mut self,
        scheme: &S,
        request: &TransferRequest,
        value: u128,
        fee: u128,
    ) -> Result<PqTransferEvent, ContractError>
    where
        S: OneTimeSignatureScheme + ?Sized,
    {
        check_fee(fee, value)?;
        let message = AuthorizationMessage::transfer(
            self.pq_owner,
            request.next,
            request.recipient,
            request.amount,
        );
        self.verify(scheme, &message, &request.signature)?;

        self.balance = self
            .balance
            .checked_sub(request.amount)
            .ok_or(ContractError::InsufficientBalance {
                balance: self.balance,
                amount: request.amount,
            })?;

        let from = self.pq_owner;
        self.pq_owner = request.next;
        Ok(PqTransferEvent {
            amount: request.amount,
            when: Utc::now().timestamp(),
            from,
            next: request.next,
            to: request.recipient,
        })
    }

    /// Call `request.target` and rotate `pq_owner`.
    ///
    /// Anything attached beyond `fee` is forwarded with the call. When
    /// `reverts` is set the target reverts and so does this call.
    pub fn execute_with_winternitz<S>(
        &mut self,
        scheme: &S,
        request: &CallRequest,
        value: u128,
        fee: u128,
        reverts: bool,
    ) -> Result<ExecutedCall, ContractError>
    where
        S: OneTimeSignatureScheme + ?Sized,
    {
        check_fee(fee, value)?;
        let message = AuthorizationMessage::call(
            self.pq_owner,
            request.next,
            request.target,
            request.payload.clone(),
        );
        self.verify(scheme, &message, &request.signature)?;

        if reverts {
            return Err(ContractError::CallReverted(request.target));
        }

        let call = ExecutedCall {
            target: request.target,
            payload: request.payload.clone(),
            value: value - fee,
            when: Utc::now(),
        };
        self.calls.push(call.clone());
        self.pq_owner = request.next;
        Ok(call)
    }
}
