//! # Client
//!
//! [`QuipClient`] is the entry point for one owner on one deployment. It
//! creates vaults, binds sessions to existing ones, enumerates the owner's
//! vaults and predicts vault addresses offline.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::address::VaultAddressOracle;
use crate::config::ClientConfig;
use crate::error::{QuipError, Result};
use crate::keys::SigningCapability;
use crate::ledger::{LedgerError, VaultFactory, VaultLedger};
use crate::session::VaultSession;
use crate::types::{short_hex, Address, VaultId};

/// Vault operations for a single owner.
pub struct QuipClient {
    owner: Address,
    signer: Arc<dyn SigningCapability>,
    factory: Arc<dyn VaultFactory>,
    ledger: Arc<dyn VaultLedger>,
    config: ClientConfig,
    oracle: VaultAddressOracle,
}

impl QuipClient {
    /// Build a client. Fails if the config is invalid or names a different
    /// factory or library than the collaborator reports.
    pub fn new(
        owner: Address,
        signer: Arc<dyn SigningCapability>,
        factory: Arc<dyn VaultFactory>,
        ledger: Arc<dyn VaultLedger>,
        config: ClientConfig,
    ) -> Result<Self> {
        config.validate()?;
        if factory.factory_address() != config.factory_address {
            return Err(QuipError::Config(format!(
                "factory collaborator is {}, config names {}",
                factory.factory_address(),
                config.factory_address
            )));
        }
        if factory.library_address() != config.library_address {
            return Err(QuipError::Config(format!(
                "factory links library {}, config names {}",
                factory.library_address(),
                config.library_address
            )));
        }
        let oracle = config.address_oracle()?;

        Ok(Self {
            owner,
            signer,
            factory,
            ledger,
            config,
            oracle,
        })
    }

    /// The owner this client acts for.
    pub fn owner(&self) -> Address {
        self.owner
    }

    /// The loaded configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Value required to create a vault.
    pub async fn creation_fee(&self) -> Result<u128> {
        Ok(self.factory.creation_fee().await?)
    }

    /// Where `vault_id` is (or will be) deployed for this owner. Pure; no
    /// ledger access.
    pub fn vault_address(&self, vault_id: &VaultId) -> Address {
        self.oracle.vault_address(self.owner, vault_id)
    }

    /// Create a vault with no initial deposit.
    pub async fn create_vault(&self, vault_id: VaultId) -> Result<VaultSession> {
        self.create_vault_with_deposit(vault_id, 0).await
    }

    /// Create a vault, attaching the creation fee plus `deposit`.
    pub async fn create_vault_with_deposit(
        &self,
        vault_id: VaultId,
        deposit: u128,
    ) -> Result<VaultSession> {
        if let Some(address) = self.deployed(&vault_id).await? {
            return Err(QuipError::AlreadyExists { vault_id, address });
        }

        let fee = self.factory.creation_fee().await?;
        let value = fee
            .checked_add(deposit)
            .ok_or_else(|| QuipError::Rejected("creation fee plus deposit overflows".into()))?;
        let initial = self.signer.derive_new(&vault_id)?;
        let predicted = self.vault_address(&vault_id);

        let address = self
            .factory
            .create_vault(&vault_id, &self.owner, &initial, value)
            .await?;

        if address != predicted {
            warn!(
                vault_id = %vault_id,
                deployed = %address,
                predicted = %predicted,
                bytecode = self.oracle.linked_bytecode().version(),
                "deployed vault address differs from prediction"
            );
        }

        info!(
            vault_id = %vault_id,
            vault = %address,
            owner = %self.owner,
            public_seed = %short_hex(&initial.public_seed),
            deposit = %deposit,
            "vault created"
        );

        Ok(VaultSession::bound(
            vault_id,
            address,
            self.signer.clone(),
            self.ledger.clone(),
            initial,
        )
        .with_confirmations(self.config.confirmations))
    }

    /// Bind a session to an existing vault.
    pub async fn get_vault(&self, vault_id: VaultId) -> Result<VaultSession> {
        let address = self
            .deployed(&vault_id)
            .await?
            .ok_or(QuipError::NotFound { vault_id })?;
        let session = VaultSession::bind_existing(
            vault_id,
            address,
            self.signer.clone(),
            self.ledger.clone(),
        )
        .await?;
        Ok(session.with_confirmations(self.config.confirmations))
    }

    /// Start a lazy walk over this owner's vaults.
    pub async fn vaults(&self) -> Result<VaultListing> {
        let count = self.factory.vault_count(&self.owner).await?;
        let bound = count.unwrap_or(self.config.max_vault_probes);
        Ok(VaultListing {
            factory: self.factory.clone(),
            owner: self.owner,
            index: 0,
            limit: bound,
            bound,
            counted: count.is_some(),
        })
    }

    /// Every `(vault_id, address)` this owner has, in creation order.
    pub async fn list_vaults(&self) -> Result<Vec<(VaultId, Address)>> {
        let mut listing = self.vaults().await?;
        let mut out = Vec::new();
        while let Some(entry) = listing.next().await? {
            out.push(entry);
        }
        Ok(out)
    }

    async fn deployed(&self, vault_id: &VaultId) -> Result<Option<Address>> {
        let found = self.factory.vault_of(&self.owner, vault_id).await?;
        Ok(found.filter(|address| !address.is_zero()))
    }
}

impl std::fmt::Debug for QuipClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuipClient")
            .field("owner", &self.owner)
            .field("network", &self.config.network)
            .field("factory", &self.config.factory_address)
            .finish_non_exhaustive()
    }
}

/// A finite, restartable walk over one owner's vault index.
///
/// Bounded by the factory's count when it offers one, otherwise by
/// `max_vault_probes`, stopping early at the first out-of-range index.
pub struct VaultListing {
    factory: Arc<dyn VaultFactory>,
    owner: Address,
    index: u64,
    limit: u64,
    bound: u64,
    counted: bool,
}

impl VaultListing {
    /// The next `(vault_id, address)`, or `None` when exhausted.
    pub async fn next(&mut self) -> Result<Option<(VaultId, Address)>> {
        if self.index >= self.limit {
            return Ok(None);
        }
        let index = self.index;

        let vault_id = match self.factory.vault_id_at(&self.owner, index).await {
            Ok(vault_id) => vault_id,
            Err(LedgerError::OutOfRange { .. }) if !self.counted => {
                debug!(owner = %self.owner, vaults = index, "vault index exhausted");
                self.limit = index;
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        self.index += 1;

        let address = self
            .factory
            .vault_of(&self.owner, &vault_id)
            .await?
            .filter(|address| !address.is_zero())
            .ok_or_else(|| {
                QuipError::InconsistentState(format!(
                    "vault index {index} names {vault_id} but no deployment exists"
                ))
            })?;

        if !self.counted && self.index == self.limit {
            warn!(
                owner = %self.owner,
                probes = self.limit,
                "stopped listing at the probe bound; more vaults may exist"
            );
        }

        Ok(Some((vault_id, address)))
    }

    /// Rewind to the first vault.
    pub fn restart(&mut self) {
        self.index = 0;
        self.limit = self.bound;
    }

    /// Upper bound on remaining entries.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.index)
    }
}

impl std::fmt::Debug for VaultListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultListing")
            .field("owner", &self.owner)
            .field("index", &self.index)
            .field("limit", &self.limit)
            .field("counted", &self.counted)
            .finish()
    }
}
