//! # Vault Sessions
//!
//! A [`VaultSession`] is a bound handle on one deployed vault. It tracks the
//! identity this process last saw the ledger accept and drives the
//! sign-then-rotate cycle:
//!
//! ```text
//!   read ledger identity ──► matches last known? ──no──► StaleSession
//!            │ yes
//!            ▼
//!   derive next ─► build message ─► sign with current ─► submit
//!                                                         │
//!                      accepted ◄──────────── ok ─────────┤
//!             last_known = next                           │ err
//!                                                         ▼
//!                                          pending (key retired)
//! ```
//!
//! The session never moves its notion of the current identity before the
//! ledger confirms to the configured depth. A signature that has been
//! handed to the ledger counts as spent whether or not it was accepted; it
//! is kept as a pending authorization that can be resubmitted or reconciled
//! with [`VaultSession::rebind`], but never re-signed. The fee is not part
//! of the signed message, so a resubmission attaches whatever fee is in
//! force at that point.
//!
//! Two sessions authorizing against one vault race at the ledger. One wins;
//! the other gets a rejection and must [`rebind`](VaultSession::rebind)
//! before trying again.

use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_CONFIRMATIONS;
use crate::error::{QuipError, Result};
use crate::keys::SigningCapability;
use crate::ledger::{CallRequest, Receipt, TransferRequest, VaultLedger};
use crate::message::AuthorizationMessage;
use crate::types::{short_hex, Address, PqPublicKey, VaultId};

/// A signed operation ready for the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignedOperation {
    /// A native-asset transfer.
    Transfer(TransferRequest),
    /// A generic call.
    Call(CallRequest),
}

/// A signed authorization that was transmitted but not confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    /// Identity that signed. Retired.
    pub current: PqPublicKey,
    /// Identity the operation rotates to.
    pub next: PqPublicKey,
    /// The exact request that was sent.
    pub operation: SignedOperation,
    /// Value attached on the latest submission.
    pub value: u128,
}

/// How [`VaultSession::rebind`] reconciled with the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebindOutcome {
    /// Nothing pending and the ledger still shows the last known identity.
    Unchanged,
    /// The pending authorization landed; its next identity is now current.
    Accepted,
    /// The ledger still shows the identity that signed the pending request.
    StillPending,
    /// The ledger moved elsewhere; the new identity was verified and adopted.
    Adopted,
}

/// A vault bound to a signer that controls it.
pub struct VaultSession {
    vault_id: VaultId,
    address: Address,
    signer: Arc<dyn SigningCapability>,
    ledger: Arc<dyn VaultLedger>,
    last_known: PqPublicKey,
    pending: Option<PendingAuthorization>,
    confirmations: u64,
}

/// Fail with `AuthorizationMismatch` unless `signer` reproduces `identity`.
fn verify_control(
    signer: &dyn SigningCapability,
    vault_id: &VaultId,
    identity: &PqPublicKey,
) -> Result<()> {
    let recovered = signer.recover(vault_id, &identity.public_seed)?;
    if recovered.public_key_hash != identity.public_key_hash {
        warn!(
            vault_id = %vault_id,
            public_seed = %short_hex(&identity.public_seed),
            "recovered key does not match on-ledger identity"
        );
        return Err(QuipError::AuthorizationMismatch {
            vault_id: *vault_id,
        });
    }
    Ok(())
}

impl VaultSession {
    /// Bind to a deployed vault after checking the signer controls it.
    pub async fn bind_existing(
        vault_id: VaultId,
        address: Address,
        signer: Arc<dyn SigningCapability>,
        ledger: Arc<dyn VaultLedger>,
    ) -> Result<Self> {
        let identity = ledger.current_identity(&address).await?;
        verify_control(signer.as_ref(), &vault_id, &identity)?;

        debug!(
            vault_id = %vault_id,
            vault = %address,
            public_seed = %short_hex(&identity.public_seed),
            "bound vault session"
        );

        Ok(Self::bound(vault_id, address, signer, ledger, identity))
    }

    /// A session for a vault this process just created with `identity`.
    pub(crate) fn bound(
        vault_id: VaultId,
        address: Address,
        signer: Arc<dyn SigningCapability>,
        ledger: Arc<dyn VaultLedger>,
        identity: PqPublicKey,
    ) -> Self {
        Self {
            vault_id,
            address,
            signer,
            ledger,
            last_known: identity,
            pending: None,
            confirmations: DEFAULT_CONFIRMATIONS,
        }
    }

    /// Wait for `confirmations` before treating a rotation as accepted.
    pub fn with_confirmations(mut self, confirmations: u64) -> Self {
        self.confirmations = confirmations;
        self
    }

    /// Confirmations awaited per rotation.
    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// The vault id.
    pub fn vault_id(&self) -> &VaultId {
        &self.vault_id
    }

    /// The vault's ledger address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The identity this session last saw the ledger accept.
    pub fn current_identity(&self) -> &PqPublicKey {
        &self.last_known
    }

    /// The unsettled authorization, if any.
    pub fn pending(&self) -> Option<&PendingAuthorization> {
        self.pending.as_ref()
    }

    /// Current transfer fee for this vault.
    pub async fn transfer_fee(&self) -> Result<u128> {
        Ok(self.ledger.transfer_fee(&self.address).await?)
    }

    /// Current call fee for this vault.
    pub async fn execute_fee(&self) -> Result<u128> {
        Ok(self.ledger.execute_fee(&self.address).await?)
    }

    /// Sign and submit a transfer of `amount` to `recipient`, rotating the
    /// vault to a fresh identity.
    pub async fn authorize_transfer(&mut self, recipient: Address, amount: u128) -> Result<Receipt> {
        let current = self.ready_identity().await?;
        let fee = self.ledger.transfer_fee(&self.address).await?;
        let next = self.signer.derive_new(&self.vault_id)?;

        let message = AuthorizationMessage::transfer(current, next, recipient, amount);
        let signature = self
            .signer
            .sign(&self.vault_id, &current.public_seed, &message.digest())?;

        debug!(
            vault = %self.address,
            recipient = %recipient,
            amount = %amount,
            fee = %fee,
            "signed transfer authorization"
        );

        let request = TransferRequest {
            next,
            signature,
            recipient,
            amount,
        };
        self.submit(PendingAuthorization {
            current,
            next,
            operation: SignedOperation::Transfer(request),
            value: fee,
        })
        .await
    }

    /// Sign and submit a call to `target` with `payload`, rotating the
    /// vault to a fresh identity.
    pub async fn authorize_call(&mut self, target: Address, payload: Vec<u8>) -> Result<Receipt> {
        let current = self.ready_identity().await?;
        let fee = self.ledger.execute_fee(&self.address).await?;
        let next = self.signer.derive_new(&self.vault_id)?;

        let message = AuthorizationMessage::call(current, next, target, payload.clone());
        let signature = self
            .signer
            .sign(&self.vault_id, &current.public_seed, &message.digest())?;

        debug!(
            vault = %self.address,
            target = %target,
            payload_len = payload.len(),
            fee = %fee,
            "signed call authorization"
        );

        let request = CallRequest {
            next,
            signature,
            target,
            payload,
        };
        self.submit(PendingAuthorization {
            current,
            next,
            operation: SignedOperation::Call(request),
            value: fee,
        })
        .await
    }

    /// Send the pending authorization again.
    ///
    /// The signed request goes out byte for byte. The attached value is the
    /// fee in force now, since a fee raised after signing would otherwise
    /// make every resubmission fall short.
    pub async fn resubmit_pending(&mut self) -> Result<Receipt> {
        let mut pending = self
            .pending
            .take()
            .ok_or(QuipError::NoPendingAuthorization {
                vault_id: self.vault_id,
            })?;

        let fee = match &pending.operation {
            SignedOperation::Transfer(_) => self.ledger.transfer_fee(&self.address).await,
            SignedOperation::Call(_) => self.ledger.execute_fee(&self.address).await,
        };
        let fee = match fee {
            Ok(fee) => fee,
            Err(err) => {
                self.pending = Some(pending);
                return Err(err.into());
            }
        };
        if fee != pending.value {
            info!(
                vault = %self.address,
                previous = %pending.value,
                current = %fee,
                "fee changed since signing; attaching the current fee"
            );
        }
        pending.value = fee;

        debug!(vault = %self.address, "resubmitting pending authorization");
        self.submit(pending).await
    }

    /// Re-read the ledger identity and reconcile it with local state.
    pub async fn rebind(&mut self) -> Result<RebindOutcome> {
        let identity = self.ledger.current_identity(&self.address).await?;

        let outcome = match self.pending.take() {
            Some(pending) if identity == pending.next => {
                self.last_known = identity;
                RebindOutcome::Accepted
            }
            Some(pending) if identity == pending.current => {
                self.pending = Some(pending);
                RebindOutcome::StillPending
            }
            None if identity == self.last_known => RebindOutcome::Unchanged,
            pending => {
                if let Err(err) = verify_control(self.signer.as_ref(), &self.vault_id, &identity) {
                    self.pending = pending;
                    return Err(err);
                }
                if pending.is_some() {
                    warn!(
                        vault = %self.address,
                        "ledger moved past a pending authorization; dropping it"
                    );
                }
                self.last_known = identity;
                RebindOutcome::Adopted
            }
        };

        info!(
            vault = %self.address,
            outcome = ?outcome,
            public_seed = %short_hex(&self.last_known.public_seed),
            "rebound vault session"
        );
        Ok(outcome)
    }

    /// The identity to sign with, once the session is known to be in step
    /// with the ledger and nothing is in flight.
    async fn ready_identity(&self) -> Result<PqPublicKey> {
        if self.pending.is_some() {
            return Err(QuipError::PendingAuthorization {
                vault_id: self.vault_id,
            });
        }
        let on_ledger = self.ledger.current_identity(&self.address).await?;
        if on_ledger != self.last_known {
            warn!(
                vault = %self.address,
                expected = %short_hex(&self.last_known.public_seed),
                found = %short_hex(&on_ledger.public_seed),
                "on-ledger identity moved without this session"
            );
            return Err(QuipError::StaleSession {
                vault_id: self.vault_id,
            });
        }
        Ok(on_ledger)
    }

    async fn submit(&mut self, pending: PendingAuthorization) -> Result<Receipt> {
        let outcome = match &pending.operation {
            SignedOperation::Transfer(request) => {
                self.ledger
                    .submit_transfer(&self.address, request, pending.value)
                    .await
            }
            SignedOperation::Call(request) => {
                self.ledger
                    .submit_call(&self.address, request, pending.value)
                    .await
            }
        };

        let outcome = match outcome {
            Ok(receipt) if receipt.next == pending.next => self
                .ledger
                .await_confirmations(&receipt, self.confirmations)
                .await
                .map(|()| receipt),
            other => other,
        };

        match outcome {
            Ok(receipt) if receipt.next == pending.next => {
                self.last_known = pending.next;
                info!(
                    vault = %self.address,
                    previous = %short_hex(&pending.current.public_seed),
                    next = %short_hex(&pending.next.public_seed),
                    tx = %short_hex(&receipt.tx_hash),
                    "vault identity rotated"
                );
                Ok(receipt)
            }
            Ok(receipt) => {
                self.pending = Some(pending);
                Err(QuipError::InconsistentState(format!(
                    "receipt {} reports a different next identity",
                    short_hex(&receipt.tx_hash)
                )))
            }
            Err(err) => {
                warn!(
                    vault = %self.address,
                    error = %err,
                    "authorization not confirmed; keeping it pending"
                );
                self.pending = Some(pending);
                Err(err.into())
            }
        }
    }
}

impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("vault_id", &self.vault_id)
            .field("address", &self.address)
            .field("last_known", &self.last_known)
            .field("pending", &self.pending.is_some())
            .field("confirmations", &self.confirmations)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::QuipSigner;
    use crate::ledger::{LedgerError, LedgerResult};
    use crate::testing::KeccakWinternitz;
    use crate::types::PqSignature;
    use crate::crypto::ots::OneTimeSignatureScheme;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// One vault, verifying signatures like the contract would.
    struct ScriptedVault {
        identity: Mutex<PqPublicKey>,
        fee: Mutex<u128>,
        fail_next: Mutex<Option<LedgerError>>,
        fail_confirmation: Mutex<Option<LedgerError>>,
        submissions: Mutex<u32>,
        awaited: Mutex<Vec<u64>>,
    }

    impl ScriptedVault {
        fn new(identity: PqPublicKey) -> Self {
            Self {
                identity: Mutex::new(identity),
                fee: Mutex::new(0),
                fail_next: Mutex::new(None),
                fail_confirmation: Mutex::new(None),
                submissions: Mutex::new(0),
                awaited: Mutex::new(Vec::new()),
            }
        }

        fn accept(
            &self,
            vault: &Address,
            message: AuthorizationMessage,
            signature: &PqSignature,
            value: u128,
        ) -> LedgerResult<Receipt> {
            *self.submissions.lock() += 1;
            if let Some(err) = self.fail_next.lock().take() {
                return Err(err);
            }
            let fee = *self.fee.lock();
            if value < fee {
                return Err(LedgerError::InsufficientFee {
                    required: fee,
                    provided: value,
                });
            }
            let mut identity = self.identity.lock();
            if message.current() != &*identity
                || !KeccakWinternitz.verify(&identity, &message.digest(), signature)
            {
                return Err(LedgerError::Rejected("invalid signature".into()));
            }
            let previous = *identity;
            *identity = *message.next();
            Ok(Receipt {
                tx_hash: message.digest(),
                vault: *vault,
                previous,
                next: *message.next(),
                fee_paid: value,
                transfer: None,
            })
        }
    }

    #[async_trait]
    impl VaultLedger for ScriptedVault {
        async fn current_identity(&self, _vault: &Address) -> LedgerResult<PqPublicKey> {
            Ok(*self.identity.lock())
        }

        async fn transfer_fee(&self, _vault: &Address) -> LedgerResult<u128> {
            Ok(*self.fee.lock())
        }

        async fn execute_fee(&self, _vault: &Address) -> LedgerResult<u128> {
            Ok(*self.fee.lock())
        }

        async fn submit_transfer(
            &self,
            vault: &Address,
            request: &TransferRequest,
            value: u128,
        ) -> LedgerResult<Receipt> {
            let current = *self.identity.lock();
            let message = AuthorizationMessage::transfer(
                current,
                request.next,
                request.recipient,
                request.amount,
            );
            self.accept(vault, message, &request.signature, value)
        }

        async fn submit_call(
            &self,
            vault: &Address,
            request: &CallRequest,
            value: u128,
        ) -> LedgerResult<Receipt> {
            let current = *self.identity.lock();
            let message = AuthorizationMessage::call(
                current,
                request.next,
                request.target,
                request.payload.clone(),
            );
            self.accept(vault, message, &request.signature, value)
        }

        async fn await_confirmations(
            &self,
            _receipt: &Receipt,
            confirmations: u64,
        ) -> LedgerResult<()> {
            self.awaited.lock().push(confirmations);
            match self.fail_confirmation.lock().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    const VAULT: Address = Address::from_bytes([0xaa; 20]);

    fn setup() -> (VaultId, Arc<QuipSigner<KeccakWinternitz>>, Arc<ScriptedVault>) {
        let vault_id = VaultId::from_label("session");
        let signer = Arc::new(QuipSigner::new(b"session secret", KeccakWinternitz));
        let initial = signer.derive_new(&vault_id).unwrap();
        (vault_id, signer, Arc::new(ScriptedVault::new(initial)))
    }

    #[tokio::test]
    async fn accepted_transfer_rotates_identity() {
        let (vault_id, signer, ledger) = setup();
        let mut session = VaultSession::bind_existing(vault_id, VAULT, signer, ledger.clone())
            .await
            .unwrap();
        let id0 = *session.current_identity();

        let receipt = session
            .authorize_transfer(Address::from_bytes([1; 20]), 10)
            .await
            .unwrap();

        assert_eq!(receipt.previous, id0);
        assert_eq!(session.current_identity(), &receipt.next);
        assert_eq!(*ledger.identity.lock(), receipt.next);
        assert!(session.pending().is_none());
    }

    #[tokio::test]
    async fn bind_with_wrong_secret_is_a_mismatch() {
        let (vault_id, _, ledger) = setup();
        let intruder = Arc::new(QuipSigner::new(b"not the owner", KeccakWinternitz));
        let err = VaultSession::bind_existing(vault_id, VAULT, intruder, ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, QuipError::AuthorizationMismatch { .. }));
    }

    #[tokio::test]
    async fn failed_submission_is_kept_pending_and_resubmitted_verbatim() {
        let (vault_id, signer, ledger) = setup();
        let mut session = VaultSession::bind_existing(vault_id, VAULT, signer, ledger.clone())
            .await
            .unwrap();
        let id0 = *session.current_identity();

        *ledger.fail_next.lock() = Some(LedgerError::Transport("timeout".into()));
        let err = session
            .authorize_call(Address::from_bytes([2; 20]), vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(matches!(err, QuipError::Transport(_)));
        assert_eq!(session.current_identity(), &id0);
        let pending = session.pending().cloned().unwrap();

        // No second signature while the first is in flight.
        let err = session
            .authorize_transfer(Address::from_bytes([1; 20]), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, QuipError::PendingAuthorization { .. }));

        let receipt = session.resubmit_pending().await.unwrap();
        assert_eq!(receipt.next, pending.next);
        assert_eq!(session.current_identity(), &pending.next);
        assert_eq!(*ledger.submissions.lock(), 2);
    }

    #[tokio::test]
    async fn rebind_adopts_a_landed_pending_authorization() {
        let (vault_id, signer, ledger) = setup();
        let mut session = VaultSession::bind_existing(vault_id, VAULT, signer, ledger.clone())
            .await
            .unwrap();

        *ledger.fail_next.lock() = Some(LedgerError::Transport("lost reply".into()));
        session
            .authorize_transfer(Address::from_bytes([1; 20]), 5)
            .await
            .unwrap_err();
        assert_eq!(session.rebind().await.unwrap(), RebindOutcome::StillPending);

        // The ledger applied it after all.
        let next = session.pending().unwrap().next;
        *ledger.identity.lock() = next;

        assert_eq!(session.rebind().await.unwrap(), RebindOutcome::Accepted);
        assert_eq!(session.current_identity(), &next);
        assert!(session.pending().is_none());
        assert_eq!(session.rebind().await.unwrap(), RebindOutcome::Unchanged);
    }

    #[tokio::test]
    async fn resubmit_without_pending_is_an_error() {
        let (vault_id, signer, ledger) = setup();
        let mut session = VaultSession::bind_existing(vault_id, VAULT, signer, ledger)
            .await
            .unwrap();
        assert!(matches!(
            session.resubmit_pending().await,
            Err(QuipError::NoPendingAuthorization { .. })
        ));
    }

    #[tokio::test]
    async fn resubmission_attaches_the_fee_in_force() {
        let (vault_id, signer, ledger) = setup();
        *ledger.fee.lock() = 5;
        let mut session = VaultSession::bind_existing(vault_id, VAULT, signer, ledger.clone())
            .await
            .unwrap();

        *ledger.fail_next.lock() = Some(LedgerError::Transport("timeout".into()));
        session
            .authorize_transfer(Address::from_bytes([1; 20]), 3)
            .await
            .unwrap_err();
        let signed = session.pending().cloned().unwrap();
        assert_eq!(signed.value, 5);

        // Fee raised after the signature went out.
        *ledger.fee.lock() = 7;
        let receipt = session.resubmit_pending().await.unwrap();

        assert_eq!(receipt.fee_paid, 7);
        assert_eq!(receipt.next, signed.next);
        assert_eq!(session.current_identity(), &signed.next);
        assert!(session.pending().is_none());
    }

    #[tokio::test]
    async fn refused_resubmission_stays_pending() {
        let (vault_id, signer, ledger) = setup();
        let mut session = VaultSession::bind_existing(vault_id, VAULT, signer, ledger.clone())
            .await
            .unwrap();

        *ledger.fail_next.lock() = Some(LedgerError::Transport("timeout".into()));
        session
            .authorize_call(Address::from_bytes([2; 20]), vec![9])
            .await
            .unwrap_err();
        let signed = session.pending().cloned().unwrap();

        // Raised beyond what the session can see: the ledger refuses.
        *ledger.fee.lock() = 1;
        *ledger.fail_next.lock() = Some(LedgerError::InsufficientFee {
            required: 2,
            provided: 1,
        });
        let err = session.resubmit_pending().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(session.pending().map(|p| &p.operation), Some(&signed.operation));

        session.resubmit_pending().await.unwrap();
        assert_eq!(session.current_identity(), &signed.next);
    }

    #[tokio::test]
    async fn rebind_onto_a_foreign_identity_changes_nothing() {
        let (vault_id, signer, ledger) = setup();
        let mut session = VaultSession::bind_existing(vault_id, VAULT, signer, ledger.clone())
            .await
            .unwrap();
        let id0 = *session.current_identity();

        *ledger.fail_next.lock() = Some(LedgerError::Transport("timeout".into()));
        session
            .authorize_transfer(Address::from_bytes([1; 20]), 1)
            .await
            .unwrap_err();
        let pending = session.pending().cloned().unwrap();

        let stranger = QuipSigner::new(b"someone else", KeccakWinternitz);
        *ledger.identity.lock() = stranger.derive_new(&vault_id).unwrap();

        let err = session.rebind().await.unwrap_err();
        assert!(matches!(err, QuipError::AuthorizationMismatch { .. }));
        assert_eq!(session.pending(), Some(&pending));
        assert_eq!(session.current_identity(), &id0);
    }

    #[tokio::test]
    async fn rotation_waits_for_configured_confirmations() {
        let (vault_id, signer, ledger) = setup();
        let mut session = VaultSession::bind_existing(vault_id, VAULT, signer, ledger.clone())
            .await
            .unwrap()
            .with_confirmations(3);

        session
            .authorize_transfer(Address::from_bytes([1; 20]), 1)
            .await
            .unwrap();
        assert_eq!(*ledger.awaited.lock(), vec![3]);
    }

    #[tokio::test]
    async fn unconfirmed_rotation_stays_pending_until_rebind() {
        let (vault_id, signer, ledger) = setup();
        let mut session = VaultSession::bind_existing(vault_id, VAULT, signer, ledger.clone())
            .await
            .unwrap();
        let id0 = *session.current_identity();

        *ledger.fail_confirmation.lock() = Some(LedgerError::Transport("reorg".into()));
        let err = session
            .authorize_transfer(Address::from_bytes([1; 20]), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, QuipError::Transport(_)));
        assert_eq!(session.current_identity(), &id0);

        let next = session.pending().unwrap().next;
        assert_eq!(session.rebind().await.unwrap(), RebindOutcome::Accepted);
        assert_eq!(session.current_identity(), &next);
    }
}
