//! # Core Value Types
//!
//! Fixed-width values that cross the boundary between this crate and the
//! ledger. Everything here is `Copy`, cheap to compare, and has exactly one
//! byte representation, because the ledger recomputes digests and
//! addresses from these bytes and any drift is a verification failure.
//!
//! ```text
//! Address       20 bytes   0x-prefixed hex, EIP-55 checksummed on display
//! VaultId       32 bytes   CREATE2 salt and key-derivation domain
//! PqPublicKey   64 bytes   public_seed(32) || public_key_hash(32)
//! PqSignature   n x 32     one element per Winternitz chain
//! ```

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::config::{ABI_WORD_LENGTH, ADDRESS_LENGTH, HASH_LENGTH, PUBLIC_KEY_LENGTH};
use crate::crypto::hash::keccak256;
use crate::error::{QuipError, Result};

/// Decode `0x`-prefixed (or bare) hex into exactly `N` bytes.
pub(crate) fn decode_fixed<const N: usize>(what: &'static str, s: &str) -> Result<[u8; N]> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(stripped).map_err(|e| QuipError::InvalidHex(format!("{what}: {e}")))?;
    if bytes.len() != N {
        return Err(QuipError::InvalidLength {
            what,
            expected: N,
            got: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Short hex prefix for log fields. Enough to correlate, too short to matter.
pub(crate) fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(6)])
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte ledger account or contract address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    /// The all-zero address. Factories return it for "no such vault".
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Take the low 20 bytes of a 32-byte word, the way the ledger turns
    /// hashes into addresses.
    pub fn from_word(word: &[u8; HASH_LENGTH]) -> Self {
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&word[HASH_LENGTH - ADDRESS_LENGTH..]);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    /// Whether this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; ADDRESS_LENGTH]
    }

    /// Left-pad to a 32-byte ABI word.
    pub fn to_word(&self) -> [u8; ABI_WORD_LENGTH] {
        let mut word = [0u8; ABI_WORD_LENGTH];
        word[ABI_WORD_LENGTH - ADDRESS_LENGTH..].copy_from_slice(&self.0);
        word
    }

    /// Lowercase hex without checksum, no `0x` prefix.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// EIP-55 mixed-case checksum encoding with `0x` prefix.
    ///
    /// A hex letter is uppercased when the matching nibble of
    /// `keccak256(lowercase_hex)` is 8 or higher.
    pub fn to_checksum(&self) -> String {
        let lower = self.to_hex();
        let hash = keccak256(lower.as_bytes());
        let mut out = String::with_capacity(2 + lower.len());
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let byte = hash[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl FromStr for Address {
    type Err = QuipError;

    /// Parses hex in any case. Checksums are not enforced on input; callers
    /// pasting addresses get the bytes they typed.
    fn from_str(s: &str) -> Result<Self> {
        decode_fixed::<ADDRESS_LENGTH>("address", s).map(Self)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_checksum())
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_checksum())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// VaultId
// ---------------------------------------------------------------------------

/// A 32-byte vault identifier chosen by the owner.
///
/// Doubles as the CREATE2 salt and as the per-vault half of the private
/// seed, so one master secret yields unrelated key chains per vault.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VaultId([u8; HASH_LENGTH]);

impl VaultId {
    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; HASH_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derive a vault id from a human label: `keccak256(label)`.
    pub fn from_label(label: &str) -> Self {
        Self(keccak256(label.as_bytes()))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl FromStr for VaultId {
    type Err = QuipError;

    fn from_str(s: &str) -> Result<Self> {
        decode_fixed::<HASH_LENGTH>("vault id", s).map(Self)
    }
}

impl fmt::Display for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for VaultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VaultId({})", self.to_hex())
    }
}

impl Serialize for VaultId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for VaultId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// PqPublicKey
// ---------------------------------------------------------------------------

/// A one-time public identity: the seed that parameterized derivation and
/// the hash committing to the derived Winternitz public key.
///
/// On the ledger this is the vault's `pqOwner`, the only key allowed to
/// authorize the next operation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PqPublicKey {
    /// Randomizer supplied at derivation time.
    pub public_seed: [u8; HASH_LENGTH],
    /// Commitment to the full public key.
    pub public_key_hash: [u8; HASH_LENGTH],
}

impl PqPublicKey {
    /// Pair up a seed and a hash.
    pub fn new(public_seed: [u8; HASH_LENGTH], public_key_hash: [u8; HASH_LENGTH]) -> Self {
        Self {
            public_seed,
            public_key_hash,
        }
    }

    /// Split the primitive's 64-byte `publicSeed || publicKeyHash` encoding.
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_LENGTH]) -> Self {
        let mut public_seed = [0u8; HASH_LENGTH];
        let mut public_key_hash = [0u8; HASH_LENGTH];
        public_seed.copy_from_slice(&bytes[..HASH_LENGTH]);
        public_key_hash.copy_from_slice(&bytes[HASH_LENGTH..]);
        Self {
            public_seed,
            public_key_hash,
        }
    }

    /// The 64-byte concatenated encoding.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LENGTH] {
        let mut out = [0u8; PUBLIC_KEY_LENGTH];
        out[..HASH_LENGTH].copy_from_slice(&self.public_seed);
        out[HASH_LENGTH..].copy_from_slice(&self.public_key_hash);
        out
    }
}

impl fmt::Debug for PqPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PqPublicKey(seed={}.., hash={}..)",
            short_hex(&self.public_seed),
            short_hex(&self.public_key_hash)
        )
    }
}

// ---------------------------------------------------------------------------
// PqSignature
// ---------------------------------------------------------------------------

/// A one-time signature as the ledger expects it: an ordered list of
/// 32-byte chain elements.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PqSignature {
    /// One element per signature chain, in chain order.
    pub elements: Vec<[u8; HASH_LENGTH]>,
}

impl PqSignature {
    /// Wrap raw elements.
    pub fn new(elements: Vec<[u8; HASH_LENGTH]>) -> Self {
        Self { elements }
    }

    /// Number of chain elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the signature carries no elements at all.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl fmt::Debug for PqSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PqSignature({} elements)", self.elements.len())
    }
}
