//! # Address Derivation
//!
//! Deterministic derivation of every account the pipeline touches: the
//! multisig, its vaults, per-index vault transactions and proposals, and
//! associated token accounts.
//!
//! Derivation is pure. The same inputs always yield the same address and
//! bump, so results are memoized in a concurrent [`DashMap`]. The cache is an
//! optimization only and is never consulted as a source of truth for
//! anything that did not come out of a derivation.

pub mod pda;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::config::{ProgramIds, SEED_MULTISIG, SEED_PREFIX, SEED_PROPOSAL, SEED_TRANSACTION, SEED_VAULT};
use crate::crypto::keys::Address;

pub use pda::{create_program_address, find_program_address};

/// Errors that can occur during address derivation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DerivationError {
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("no bump in 255..=0 produced an off-curve address")]
    DerivationExhausted,

    #[error("derived address lies on the ed25519 curve")]
    OnCurve,

    #[error("token account owner {0} is off-curve and off-curve owners were not allowed")]
    OwnerOffCurve(Address),
}

/// A derived address together with the inputs that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAddress {
    /// The key the derivation hangs off (create key, multisig, or owner).
    pub seed_authority: Address,
    /// Vault or transaction index; zero where the derivation has none.
    pub index: u64,
    pub address: Address,
    pub bump: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CacheKey {
    Multisig(Address),
    Vault(Address, u8),
    Transaction(Address, u64),
    Proposal(Address, u64),
    TokenAccount { owner: Address, mint: Address },
}

/// Memoizing deriver bound to a set of program ids.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
#[derive(Debug)]
pub struct AddressDeriver {
    program_ids: ProgramIds,
    cache: DashMap<CacheKey, (Address, u8)>,
}

impl Default for AddressDeriver {
    fn default() -> Self {
        Self::new(ProgramIds::default())
    }
}

impl AddressDeriver {
    pub fn new(program_ids: ProgramIds) -> Self {
        Self {
            program_ids,
            cache: DashMap::new(),
        }
    }

    pub fn program_ids(&self) -> &ProgramIds {
        &self.program_ids
    }

    /// Number of memoized derivations.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// The multisig account for `create_key`.
    pub fn derive_multisig_address(
        &self,
        create_key: &Address,
    ) -> Result<DerivedAddress, DerivationError> {
        let program = self.program_ids.multisig;
        let (address, bump) = self.memoized(CacheKey::Multisig(*create_key), || {
            find_program_address(&[SEED_PREFIX, SEED_MULTISIG, create_key.as_bytes()], &program)
        })?;
        Ok(DerivedAddress {
            seed_authority: *create_key,
            index: 0,
            address,
            bump,
        })
    }

    /// Vault `vault_index` under `multisig`.
    pub fn derive_vault_address(
        &self,
        multisig: &Address,
        vault_index: u8,
    ) -> Result<DerivedAddress, DerivationError> {
        let program = self.program_ids.multisig;
        let (address, bump) = self.memoized(CacheKey::Vault(*multisig, vault_index), || {
            find_program_address(
                &[SEED_PREFIX, multisig.as_bytes(), SEED_VAULT, &[vault_index]],
                &program,
            )
        })?;
        Ok(DerivedAddress {
            seed_authority: *multisig,
            index: u64::from(vault_index),
            address,
            bump,
        })
    }

    /// Vault transaction `tx_index` under `multisig`.
    pub fn derive_transaction_address(
        &self,
        multisig: &Address,
        tx_index: u64,
    ) -> Result<DerivedAddress, DerivationError> {
        let program = self.program_ids.multisig;
        let index_bytes = tx_index.to_le_bytes();
        let (address, bump) = self.memoized(CacheKey::Transaction(*multisig, tx_index), || {
            find_program_address(
                &[SEED_PREFIX, multisig.as_bytes(), SEED_TRANSACTION, &index_bytes],
                &program,
            )
        })?;
        Ok(DerivedAddress {
            seed_authority: *multisig,
            index: tx_index,
            address,
            bump,
        })
    }

    /// Proposal attached to vault transaction `tx_index`.
    pub fn derive_proposal_address(
        &self,
        multisig: &Address,
        tx_index: u64,
    ) -> Result<DerivedAddress, DerivationError> {
        let program = self.program_ids.multisig;
        let index_bytes = tx_index.to_le_bytes();
        let (address, bump) = self.memoized(CacheKey::Proposal(*multisig, tx_index), || {
            find_program_address(
                &[
                    SEED_PREFIX,
                    multisig.as_bytes(),
                    SEED_TRANSACTION,
                    &index_bytes,
                    SEED_PROPOSAL,
                ],
                &program,
            )
        })?;
        Ok(DerivedAddress {
            seed_authority: *multisig,
            index: tx_index,
            address,
            bump,
        })
    }

    /// Associated token account of `owner` for `mint`.
    ///
    /// Recipients must be real wallets, so an off-curve owner is refused
    /// unless `allow_owner_off_curve` is set. Vault owners are PDAs and
    /// always pass `true`.
    pub fn derive_associated_token_address(
        &self,
        owner: &Address,
        mint: &Address,
        allow_owner_off_curve: bool,
    ) -> Result<DerivedAddress, DerivationError> {
        if !allow_owner_off_curve && !owner.is_on_curve() {
            return Err(DerivationError::OwnerOffCurve(*owner));
        }

        let token_program = self.program_ids.token;
        let ata_program = self.program_ids.associated_token;
        let key = CacheKey::TokenAccount {
            owner: *owner,
            mint: *mint,
        };
        let (address, bump) = self.memoized(key, || {
            find_program_address(
                &[owner.as_bytes(), token_program.as_bytes(), mint.as_bytes()],
                &ata_program,
            )
        })?;
        Ok(DerivedAddress {
            seed_authority: *owner,
            index: 0,
            address,
            bump,
        })
    }

    fn memoized<F>(&self, key: CacheKey, derive: F) -> Result<(Address, u8), DerivationError>
    where
        F: FnOnce() -> Result<(Address, u8), DerivationError>,
    {
        if let Some(hit) = self.cache.get(&key) {
            return Ok(*hit);
        }
        let derived = derive()?;
        trace!(?key, address = %derived.0, bump = derived.1, "derived address");
        self.cache.insert(key, derived);
        Ok(derived)
    }
}

/// Parses a base58 authority key supplied by a caller.
pub fn parse_authority(input: &str) -> Result<Address, DerivationError> {
    input
        .trim()
        .parse()
        .map_err(|e| DerivationError::InvalidSeed(format!("authority {input:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;
    use crate::crypto::TransactionSigner;

    fn create_key() -> Address {
        Keypair::from_seed(&[1u8; 32]).address()
    }

    #[test]
    fn derivations_are_deterministic_across_derivers() {
        let a = AddressDeriver::default();
        let b = AddressDeriver::default();

        let ms_a = a.derive_multisig_address(&create_key()).unwrap();
        let ms_b = b.derive_multisig_address(&create_key()).unwrap();
        assert_eq!(ms_a, ms_b);

        let vault_a = a.derive_vault_address(&ms_a.address, 0).unwrap();
        let vault_b = b.derive_vault_address(&ms_b.address, 0).unwrap();
        assert_eq!(vault_a, vault_b);
        assert!(!vault_a.address.is_on_curve());
    }

    #[test]
    fn cache_returns_identical_result() {
        let deriver = AddressDeriver::default();
        let first = deriver.derive_multisig_address(&create_key()).unwrap();
        assert_eq!(deriver.cached(), 1);
        let second = deriver.derive_multisig_address(&create_key()).unwrap();
        assert_eq!(first, second);
        assert_eq!(deriver.cached(), 1);
    }

    #[test]
    fn vault_indices_yield_distinct_addresses() {
        let deriver = AddressDeriver::default();
        let ms = deriver.derive_multisig_address(&create_key()).unwrap().address;
        let v0 = deriver.derive_vault_address(&ms, 0).unwrap();
        let v1 = deriver.derive_vault_address(&ms, 1).unwrap();
        assert_ne!(v0.address, v1.address);
        assert_eq!(v1.index, 1);
    }

    #[test]
    fn vault_matches_manual_seed_layout() {
        let deriver = AddressDeriver::default();
        let ms = deriver.derive_multisig_address(&create_key()).unwrap().address;
        let derived = deriver.derive_vault_address(&ms, 3).unwrap();

        let program = ProgramIds::default().multisig;
        let (manual, bump) =
            find_program_address(&[b"multisig", ms.as_bytes(), b"vault", &[3]], &program).unwrap();
        assert_eq!(derived.address, manual);
        assert_eq!(derived.bump, bump);
    }

    #[test]
    fn transaction_and_proposal_differ() {
        let deriver = AddressDeriver::default();
        let ms = deriver.derive_multisig_address(&create_key()).unwrap().address;
        let tx = deriver.derive_transaction_address(&ms, 7).unwrap();
        let proposal = deriver.derive_proposal_address(&ms, 7).unwrap();
        let next_tx = deriver.derive_transaction_address(&ms, 8).unwrap();
        assert_ne!(tx.address, proposal.address);
        assert_ne!(tx.address, next_tx.address);
    }

    #[test]
    fn recipient_token_account_requires_on_curve_owner() {
        let deriver = AddressDeriver::default();
        let mint = ProgramIds::default().token;
        let ms = deriver.derive_multisig_address(&create_key()).unwrap().address;
        let vault = deriver.derive_vault_address(&ms, 0).unwrap().address;

        assert_eq!(
            deriver.derive_associated_token_address(&vault, &mint, false),
            Err(DerivationError::OwnerOffCurve(vault))
        );
        assert!(deriver
            .derive_associated_token_address(&vault, &mint, true)
            .is_ok());

        let wallet = Keypair::from_seed(&[2u8; 32]).address();
        assert!(deriver
            .derive_associated_token_address(&wallet, &mint, false)
            .is_ok());
    }

    #[test]
    fn parse_authority_rejects_malformed_input() {
        let good = create_key();
        assert_eq!(parse_authority(&format!(" {good} ")).unwrap(), good);
        assert!(matches!(
            parse_authority("not-base58!"),
            Err(DerivationError::InvalidSeed(_))
        ));
        assert!(matches!(
            parse_authority("abc"),
            Err(DerivationError::InvalidSeed(_))
        ));
    }
}
