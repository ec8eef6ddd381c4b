//! # Deterministic Vault Addresses
//!
//! Predicts where the factory will deploy a vault before anyone pays to
//! create it. The factory deploys with CREATE2, so the address is a pure
//! function of:
//!
//! ```text
//! keccak256(0xff || factory || vault_id || keccak256(init_code))[12..]
//! init_code = link(vault_bytecode, library) || abi.encode(factory, owner)
//! ```
//!
//! This formula is duplicated from the ledger's CREATE2 opcode (EIP-1014).
//! If the two ever drift, every predicted address is wrong, so the tests
//! pin it to the EIP's published vectors.
//!
//! ## Library linking
//!
//! Solidity emits bytecode with `__$<34 hex>$__` holes wherever an external
//! library is called. The 34 hex characters are the first 17 bytes of
//! `keccak256(fully_qualified_library_name)`. Each hole is exactly 40 hex
//! characters, the width of the 20-byte address that fills it. A hole left
//! unfilled makes the bytes meaningless, so linking refuses to hash
//! anything that still contains one.

use serde::{Deserialize, Serialize};

use crate::config::{
    ABI_WORD_LENGTH, CREATE2_PREFIX, HASH_LENGTH, LIBRARY_PLACEHOLDER_HASH_CHARS,
    LIBRARY_PLACEHOLDER_LENGTH, LIBRARY_PLACEHOLDER_PREFIX, LIBRARY_PLACEHOLDER_SUFFIX,
};
use crate::crypto::hash::{keccak256, keccak256_multi};
use crate::error::{QuipError, Result};
use crate::types::{Address, VaultId};

// ---------------------------------------------------------------------------
// Bytecode templates
// ---------------------------------------------------------------------------

/// Vault creation bytecode as compiled, before library linking.
///
/// The byte pattern belongs to one compiler output of one contract version,
/// so it travels with a version label. Predictions made from a template
/// are only as good as the match between that label and what the factory
/// actually deploys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytecodeTemplate {
    /// Free-form label identifying the compiler artifact.
    pub version: String,
    /// Hex text, optionally `0x`-prefixed, possibly containing placeholders.
    pub bytecode: String,
}

/// Creation bytecode with every library placeholder resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedBytecode {
    version: String,
    code: Vec<u8>,
}

impl LinkedBytecode {
    /// The template version this was linked from.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Raw creation code.
    pub fn as_bytes(&self) -> &[u8] {
        &self.code
    }
}

/// The placeholder solc emits for a fully qualified library name.
pub fn library_placeholder(qualified_name: &str) -> String {
    let hash = hex::encode(keccak256(qualified_name.as_bytes()));
    format!(
        "{LIBRARY_PLACEHOLDER_PREFIX}{}{LIBRARY_PLACEHOLDER_SUFFIX}",
        &hash[..LIBRARY_PLACEHOLDER_HASH_CHARS]
    )
}

fn is_placeholder(candidate: &str) -> bool {
    candidate.len() == LIBRARY_PLACEHOLDER_LENGTH
        && candidate.starts_with(LIBRARY_PLACEHOLDER_PREFIX)
        && candidate.ends_with(LIBRARY_PLACEHOLDER_SUFFIX)
        && candidate[LIBRARY_PLACEHOLDER_PREFIX.len()
            ..LIBRARY_PLACEHOLDER_LENGTH - LIBRARY_PLACEHOLDER_SUFFIX.len()]
            .chars()
            .all(|c| c.is_ascii_hexdigit())
}

impl BytecodeTemplate {
    /// Wrap a compiler artifact.
    pub fn new(version: impl Into<String>, bytecode: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            bytecode: bytecode.into(),
        }
    }

    /// Fill every placeholder with `library`.
    ///
    /// Vault bytecode links exactly one library, so any hole is that
    /// library's hole.
    pub fn link(&self, library: Address) -> Result<LinkedBytecode> {
        self.link_with(|_| Some(library))
    }

    /// Fill only the placeholders belonging to the named libraries.
    ///
    /// A placeholder whose hash matches none of `libraries` is reported as
    /// [`QuipError::UnlinkedBytecode`].
    pub fn link_libraries(&self, libraries: &[(&str, Address)]) -> Result<LinkedBytecode> {
        let resolved: Vec<(String, Address)> = libraries
            .iter()
            .map(|(name, address)| (library_placeholder(name), *address))
            .collect();
        self.link_with(|placeholder| {
            resolved
                .iter()
                .find(|(p, _)| p.eq_ignore_ascii_case(placeholder))
                .map(|(_, address)| *address)
        })
    }

    fn link_with<F>(&self, resolve: F) -> Result<LinkedBytecode>
    where
        F: Fn(&str) -> Option<Address>,
    {
        let body = self.bytecode.strip_prefix("0x").unwrap_or(&self.bytecode);
        let mut linked = String::with_capacity(body.len());
        let mut rest = body;
        let mut offset = 0;

        while let Some(pos) = rest.find(LIBRARY_PLACEHOLDER_PREFIX) {
            linked.push_str(&rest[..pos]);
            let start = offset + pos;
            let candidate = rest
                .get(pos..pos + LIBRARY_PLACEHOLDER_LENGTH)
                .filter(|c| is_placeholder(c));

            let Some(placeholder) = candidate else {
                return Err(QuipError::UnlinkedBytecode {
                    placeholder: rest[pos..].chars().take(LIBRARY_PLACEHOLDER_LENGTH).collect(),
                    offset: start,
                });
            };
            let Some(address) = resolve(placeholder) else {
                return Err(QuipError::UnlinkedBytecode {
                    placeholder: placeholder.to_string(),
                    offset: start,
                });
            };

            linked.push_str(&address.to_hex());
            rest = &rest[pos + LIBRARY_PLACEHOLDER_LENGTH..];
            offset = start + LIBRARY_PLACEHOLDER_LENGTH;
        }
        linked.push_str(rest);

        let code = hex::decode(&linked).map_err(|e| {
            QuipError::InvalidHex(format!("bytecode {}: {e}", self.version))
        })?;
        Ok(LinkedBytecode {
            version: self.version.clone(),
            code,
        })
    }
}

// ---------------------------------------------------------------------------
// CREATE2
// ---------------------------------------------------------------------------

/// EIP-1014 address from a precomputed init code hash.
pub fn create2_address(
    creator: Address,
    salt: &[u8; HASH_LENGTH],
    init_code_hash: &[u8; HASH_LENGTH],
) -> Address {
    let hash = keccak256_multi(&[
        &[CREATE2_PREFIX],
        creator.as_bytes(),
        salt,
        init_code_hash,
    ]);
    Address::from_word(&hash)
}

/// ABI-encode a list of addresses as consecutive 32-byte words.
pub fn encode_constructor_args(args: &[Address]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(args.len() * ABI_WORD_LENGTH);
    for arg in args {
        encoded.extend_from_slice(&arg.to_word());
    }
    encoded
}

/// The address `creator` will deploy `linked || constructor_args` to under
/// salt `vault_id`.
///
/// Pure: no I/O, no state, the same inputs give the same address forever.
pub fn compute_address(
    creator: Address,
    vault_id: &VaultId,
    linked: &LinkedBytecode,
    constructor_args: &[u8],
) -> Address {
    let init_code_hash = keccak256_multi(&[linked.as_bytes(), constructor_args]);
    create2_address(creator, vault_id.as_bytes(), &init_code_hash)
}

/// One-shot prediction of a vault address straight from a template.
pub fn compute_vault_address(
    owner: Address,
    vault_id: &VaultId,
    library: Address,
    factory: Address,
    template: &BytecodeTemplate,
) -> Result<Address> {
    let oracle = VaultAddressOracle::new(factory, library, template)?;
    Ok(oracle.vault_address(owner, vault_id))
}

// ---------------------------------------------------------------------------
// Oracle
// ---------------------------------------------------------------------------

/// Predicts vault addresses for one factory deployment.
///
/// Links the template once up front; after that every prediction is a
/// couple of hashes.
#[derive(Debug, Clone)]
pub struct VaultAddressOracle {
    factory: Address,
    library: Address,
    linked: LinkedBytecode,
}

impl VaultAddressOracle {
    /// Link `template` against `library` for predictions under `factory`.
    pub fn new(factory: Address, library: Address, template: &BytecodeTemplate) -> Result<Self> {
        let linked = template.link(library)?;
        Ok(Self {
            factory,
            library,
            linked,
        })
    }

    /// The factory doing the deploying.
    pub fn factory(&self) -> Address {
        self.factory
    }

    /// The library linked into the vault code.
    pub fn library(&self) -> Address {
        self.library
    }

    /// The linked vault creation code, without constructor arguments.
    pub fn linked_bytecode(&self) -> &LinkedBytecode {
        &self.linked
    }

    /// Full init code for a vault owned by `owner`: the vault constructor
    /// takes `(factory, owner)`.
    pub fn init_code(&self, owner: Address) -> Vec<u8> {
        let mut code = self.linked.as_bytes().to_vec();
        code.extend_from_slice(&encode_constructor_args(&[self.factory, owner]));
        code
    }

    /// Where the vault `(owner, vault_id)` lives or will live.
    pub fn vault_address(&self, owner: Address, vault_id: &VaultId) -> Address {
        compute_address(
            self.factory,
            vault_id,
            &self.linked,
            &encode_constructor_args(&[self.factory, owner]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WOTS_LIBRARY_NAME;
    use proptest::prelude::*;

    fn addr(s: &str) -> Address {
        s.parse().unwrap()
    }

    fn word(s: &str) -> [u8; 32] {
        crate::types::decode_fixed::<32>("salt", s).unwrap()
    }

    fn create2_hex(creator: &str, salt: &str, init_code: &str) -> Address {
        let code = hex::decode(init_code.trim_start_matches("0x")).unwrap();
        create2_address(addr(creator), &word(salt), &keccak256(&code))
    }

    const ZERO_ADDR: &str = "0x0000000000000000000000000000000000000000";
    const ZERO_SALT: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

    #[test]
    fn eip1014_published_vectors() {
        let cases = [
            (ZERO_ADDR, ZERO_SALT, "0x00", "0x4D1A2e2bB4F88F0250f26Ffff098B0b30B26BF38"),
            (
                "0xdeadbeef00000000000000000000000000000000",
                ZERO_SALT,
                "0x00",
                "0xB928f69Bb1D91Cd65274e3c79d8986362984fDA3",
            ),
            (
                "0xdeadbeef00000000000000000000000000000000",
                "0x000000000000000000000000feed000000000000000000000000000000000000",
                "0x00",
                "0xD04116cDd17beBE565EB2422F2497E06cC1C9833",
            ),
            (ZERO_ADDR, ZERO_SALT, "0xdeadbeef", "0x70f2b2914A2a4b783FaEFb75f459A580616Fcb5e"),
            (
                "0x00000000000000000000000000000000deadbeef",
                "0x00000000000000000000000000000000000000000000000000000000cafebabe",
                "0xdeadbeef",
                "0x60f3f640a8508fC6a86d45DF051962668E1e8AC7",
            ),
            (
                "0x00000000000000000000000000000000deadbeef",
                "0x00000000000000000000000000000000000000000000000000000000cafebabe",
                "0xdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
                "0x1d8bfDC5D46DC4f61D6b6115972536eBE6A8854C",
            ),
            (ZERO_ADDR, ZERO_SALT, "0x", "0xE33C0C7F7df4809055C3ebA6c09CFe4BaF1BD9e0"),
        ];
        for (creator, salt, code, expected) in cases {
            assert_eq!(create2_hex(creator, salt, code), addr(expected), "{expected}");
        }
    }

    #[test]
    fn link_replaces_every_placeholder() {
        let placeholder = library_placeholder(WOTS_LIBRARY_NAME);
        let template = BytecodeTemplate::new(
            "v1",
            format!("0x6080{placeholder}60{placeholder}00"),
        );
        let library = addr("0x1111111111111111111111111111111111111111");
        let linked = template.link(library).unwrap();

        let mut expected = vec![0x60, 0x80];
        expected.extend_from_slice(library.as_bytes());
        expected.push(0x60);
        expected.extend_from_slice(library.as_bytes());
        expected.push(0x00);
        assert_eq!(linked.as_bytes(), expected.as_slice());
        assert_eq!(linked.version(), "v1");
    }

    #[test]
    fn link_libraries_reports_unknown_placeholder() {
        let foreign = library_placeholder("contracts/Other.sol:Other");
        let template = BytecodeTemplate::new("v1", format!("6080{foreign}00"));
        let err = template
            .link_libraries(&[(WOTS_LIBRARY_NAME, Address::ZERO)])
            .unwrap_err();
        match err {
            QuipError::UnlinkedBytecode {
                placeholder,
                offset,
            } => {
                assert_eq!(placeholder, foreign);
                assert_eq!(offset, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn link_libraries_resolves_named_placeholder() {
        let ours = library_placeholder(WOTS_LIBRARY_NAME);
        let template = BytecodeTemplate::new("v1", ours);
        let library = addr("0x2222222222222222222222222222222222222222");
        let linked = template
            .link_libraries(&[(WOTS_LIBRARY_NAME, library)])
            .unwrap();
        assert_eq!(linked.as_bytes(), library.as_bytes());
    }

    #[test]
    fn truncated_placeholder_fails_loudly() {
        let template = BytecodeTemplate::new("v1", "6080__$0123");
        assert!(matches!(
            template.link(Address::ZERO),
            Err(QuipError::UnlinkedBytecode { offset: 4, .. })
        ));
    }

    #[test]
    fn placeholder_width_matches_address() {
        assert_eq!(
            library_placeholder(WOTS_LIBRARY_NAME).len(),
            LIBRARY_PLACEHOLDER_LENGTH
        );
    }

    #[test]
    fn constructor_args_are_abi_words() {
        let a = addr("0x00000000000000000000000000000000000000aa");
        let b = addr("0x00000000000000000000000000000000000000bb");
        let encoded = encode_constructor_args(&[a, b]);
        assert_eq!(encoded.len(), 64);
        assert_eq!(encoded[31], 0xaa);
        assert_eq!(encoded[63], 0xbb);
        assert!(encoded[..31].iter().all(|b| *b == 0));
    }

    #[test]
    fn oracle_matches_manual_create2() {
        let factory = addr("0x00000000000000000000000000000000000000f1");
        let library = addr("0x00000000000000000000000000000000000000a1");
        let owner = addr("0x4971905b8741bdbe1ba008f73c28c82de9d95df9");
        let vault_id: VaultId =
            "0x783e1393edc4a6dac846b6da7723acb50de92b51b66ccdbc69bcadfb3fd9da69"
                .parse()
                .unwrap();
        let template = BytecodeTemplate::new(
            "v1",
            format!("0x6080{}00", library_placeholder(WOTS_LIBRARY_NAME)),
        );

        let oracle = VaultAddressOracle::new(factory, library, &template).unwrap();
        let predicted = oracle.vault_address(owner, &vault_id);
        let manual = create2_address(factory, vault_id.as_bytes(), &keccak256(&oracle.init_code(owner)));
        assert_eq!(predicted, manual);
        assert_eq!(
            compute_vault_address(owner, &vault_id, library, factory, &template).unwrap(),
            predicted
        );
    }

    fn arb_address() -> impl Strategy<Value = Address> {
        any::<[u8; 20]>().prop_map(Address::from_bytes)
    }

    fn arb_vault_id() -> impl Strategy<Value = VaultId> {
        any::<[u8; 32]>().prop_map(VaultId::from_bytes)
    }

    fn test_oracle(factory: Address, library: Address) -> VaultAddressOracle {
        let template = BytecodeTemplate::new(
            "v1",
            format!("0x608060{}5b00", library_placeholder(WOTS_LIBRARY_NAME)),
        );
        VaultAddressOracle::new(factory, library, &template).unwrap()
    }

    proptest! {
        #[test]
        fn prediction_is_referentially_transparent(
            factory in arb_address(),
            library in arb_address(),
            owner in arb_address(),
            vault_id in arb_vault_id(),
        ) {
            let first = test_oracle(factory, library).vault_address(owner, &vault_id);
            let second = test_oracle(factory, library).vault_address(owner, &vault_id);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn every_input_moves_the_address(
            factory in arb_address(),
            library in arb_address(),
            owner in arb_address(),
            vault_id in arb_vault_id(),
            flip in 0usize..20,
        ) {
            let base = test_oracle(factory, library).vault_address(owner, &vault_id);

            let mut other = *owner.as_bytes();
            other[flip] ^= 0x01;
            let by_owner = test_oracle(factory, library)
                .vault_address(Address::from_bytes(other), &vault_id);
            prop_assert_ne!(base, by_owner);

            let mut other = *factory.as_bytes();
            other[flip] ^= 0x01;
            let by_factory = test_oracle(Address::from_bytes(other), library)
                .vault_address(owner, &vault_id);
            prop_assert_ne!(base, by_factory);

            let mut other = *library.as_bytes();
            other[flip] ^= 0x01;
            let by_library = test_oracle(factory, Address::from_bytes(other))
                .vault_address(owner, &vault_id);
            prop_assert_ne!(base, by_library);

            let mut other = *vault_id.as_bytes();
            other[flip] ^= 0x01;
            let by_vault = test_oracle(factory, library)
                .vault_address(owner, &VaultId::from_bytes(other));
            prop_assert_ne!(base, by_vault);
        }
    }
}
