//! # Protocol Configuration & Constants
//!
//! Every width, tag and default the vault protocol depends on lives here,
//! next to the [`ClientConfig`] a client loads to find its factory.
//!
//! The widths are not tunables. They are the ledger's ABI, and changing one
//! silently breaks digest and address parity with the deployed contracts.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::address::{BytecodeTemplate, VaultAddressOracle};
use crate::error::{QuipError, Result};
use crate::types::Address;

// ---------------------------------------------------------------------------
// Wire Widths
// ---------------------------------------------------------------------------

/// Keccak-256 output, public seeds, public key hashes, vault ids.
pub const HASH_LENGTH: usize = 32;

/// Ledger addresses.
pub const ADDRESS_LENGTH: usize = 20;

/// `publicSeed || publicKeyHash` as the primitive returns it.
pub const PUBLIC_KEY_LENGTH: usize = 2 * HASH_LENGTH;

/// Amounts are packed as full 256-bit big-endian words.
pub const AMOUNT_LENGTH: usize = 32;

/// ABI word size for constructor arguments.
pub const ABI_WORD_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Deterministic Deployment
// ---------------------------------------------------------------------------

/// Leading tag byte of the EIP-1014 CREATE2 preimage.
pub const CREATE2_PREFIX: u8 = 0xff;

/// Opening marker of a solc library placeholder: `__$`.
pub const LIBRARY_PLACEHOLDER_PREFIX: &str = "__$";

/// Closing marker of a solc library placeholder: `$__`.
pub const LIBRARY_PLACEHOLDER_SUFFIX: &str = "$__";

/// Hex characters between the markers (17 bytes of keccak of the library's
/// fully qualified name).
pub const LIBRARY_PLACEHOLDER_HASH_CHARS: usize = 34;

/// Total placeholder length in hex characters. Same width as the 20-byte
/// address that replaces it, which is why linking never shifts offsets.
pub const LIBRARY_PLACEHOLDER_LENGTH: usize = 40;

/// Fully qualified name of the Winternitz verifier library the vault links.
pub const WOTS_LIBRARY_NAME: &str =
    "@quip.network/hashsigs-solidity/contracts/WOTSPlus.sol:WOTSPlus";

// ---------------------------------------------------------------------------
// Client Defaults
// ---------------------------------------------------------------------------

/// Upper bound on index probes when the factory cannot report a count.
pub const DEFAULT_MAX_VAULT_PROBES: u64 = 1_024;

/// Confirmations a session awaits before treating a rotation as accepted.
pub const DEFAULT_CONFIRMATIONS: u64 = 1;

// ---------------------------------------------------------------------------
// Networks
// ---------------------------------------------------------------------------

/// Deployments the published factory addresses exist on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    /// Ethereum mainnet.
    Mainnet,
    /// Ethereum Sepolia testnet.
    Sepolia,
    /// OP mainnet.
    Optimism,
    /// Base mainnet.
    Base,
    /// OP Sepolia testnet.
    SepoliaOptimism,
    /// Base Sepolia testnet.
    SepoliaBase,
}

impl Network {
    /// EIP-155 chain id.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Mainnet => 1,
            Network::Sepolia => 11_155_111,
            Network::Optimism => 10,
            Network::Base => 8_453,
            Network::SepoliaOptimism => 11_155_420,
            Network::SepoliaBase => 84_532,
        }
    }

    /// Look a network up by chain id. Unknown ids are `None`; we don't guess.
    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        [
            Network::Mainnet,
            Network::Sepolia,
            Network::Optimism,
            Network::Base,
            Network::SepoliaOptimism,
            Network::SepoliaBase,
        ]
        .into_iter()
        .find(|n| n.chain_id() == chain_id)
    }
}

// ---------------------------------------------------------------------------
// ClientConfig
// ---------------------------------------------------------------------------

fn default_max_vault_probes() -> u64 {
    DEFAULT_MAX_VAULT_PROBES
}

fn default_confirmations() -> u64 {
    DEFAULT_CONFIRMATIONS
}

/// Everything a client needs to locate and predict vaults on one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Which deployment this config describes.
    pub network: Network,
    /// The vault factory (CREATE2 deployer of vaults).
    pub factory_address: Address,
    /// The deployed Winternitz verifier library linked into vault code.
    pub library_address: Address,
    /// Vault creation bytecode, possibly with library placeholders.
    pub vault_bytecode: BytecodeTemplate,
    /// Probe bound for vault enumeration without a count query.
    #[serde(default = "default_max_vault_probes")]
    pub max_vault_probes: u64,
    /// Confirmations every session awaits per rotation.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,
}

impl ClientConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|e| QuipError::Config(format!("malformed client config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| QuipError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Reject configs that cannot possibly work.
    ///
    /// Links the bytecode once so an unresolvable template fails here, at
    /// load time, rather than on the first address prediction.
    pub fn validate(&self) -> Result<()> {
        if self.factory_address.is_zero() {
            return Err(QuipError::Config("factory address is zero".into()));
        }
        if self.library_address.is_zero() {
            return Err(QuipError::Config("library address is zero".into()));
        }
        if self.max_vault_probes == 0 {
            return Err(QuipError::Config("max_vault_probes must be positive".into()));
        }
        if self.confirmations == 0 {
            return Err(QuipError::Config("confirmations must be positive".into()));
        }
        self.vault_bytecode.link(self.library_address)?;
        Ok(())
    }

    /// Build the address oracle for this deployment.
    pub fn address_oracle(&self) -> Result<VaultAddressOracle> {
        VaultAddressOracle::new(
            self.factory_address,
            self.library_address,
            &self.vault_bytecode,
        )
    }
}
