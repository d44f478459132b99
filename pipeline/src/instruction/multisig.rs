//! Multisig workflow instructions.
//!
//! A vault payment runs through four multisig-program instructions:
//!
//! 1. `vault_transaction_create` records the vault transaction and a
//!    commitment to the transfers it will perform;
//! 2. `proposal_create` opens a proposal for it;
//! 3. `proposal_approve` casts the (single) member's approval;
//! 4. `vault_transaction_execute` runs the transfers with the vault as
//!    signer.
//!
//! Instruction data starts with an Anchor-style discriminator: the first
//! eight bytes of `SHA-256("global:<instruction_name>")`.

use serde::{Deserialize, Serialize};

use super::{AccountMeta, Instruction, InstructionKind};
use crate::config::ProgramIds;
use crate::crypto::hash::{sha256, sha256_multi};
use crate::crypto::keys::Address;

/// Which multisig and vault a payment draws from, and the index its vault
/// transaction will occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultContext {
    pub multisig: Address,
    pub vault_index: u8,
    /// Index the new vault transaction takes (the multisig's current
    /// transaction index plus one).
    pub transaction_index: u64,
}

/// Addresses the workflow instructions need, all derived up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkflowAccounts {
    pub multisig: Address,
    pub vault: Address,
    pub transaction: Address,
    pub proposal: Address,
    /// The approving member. Also creator, rent payer and fee payer.
    pub member: Address,
}

/// The four workflow instructions of one vault payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultisigWorkflow {
    pub create: Instruction,
    pub propose: Instruction,
    pub approve: Instruction,
    pub execute: Instruction,
}

/// Eight-byte discriminator for the named instruction.
pub fn discriminator(name: &str) -> [u8; 8] {
    let digest = sha256(format!("global:{name}").as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Commitment over the instructions a vault transaction will execute:
/// program id, every account with its flags, and length-prefixed data.
pub fn commitment(instructions: &[Instruction]) -> [u8; 32] {
    let mut buf = Vec::new();
    for ix in instructions {
        buf.extend_from_slice(ix.program_id.as_bytes());
        buf.extend_from_slice(&(ix.accounts.len() as u32).to_le_bytes());
        for meta in &ix.accounts {
            buf.extend_from_slice(meta.address.as_bytes());
            buf.push(u8::from(meta.is_signer) | (u8::from(meta.is_writable) << 1));
        }
        buf.extend_from_slice(&(ix.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&ix.data);
    }
    sha256_multi(&[b"vault_transaction", &buf])
}

pub fn vault_transaction_create(
    programs: &ProgramIds,
    accounts: &WorkflowAccounts,
    vault_index: u8,
    commitment: [u8; 32],
) -> Instruction {
    let mut data = Vec::with_capacity(8 + 1 + 1 + 32);
    data.extend_from_slice(&discriminator("vault_transaction_create"));
    data.push(vault_index);
    // ephemeral signers
    data.push(0);
    data.extend_from_slice(&commitment);

    Instruction::new(
        InstructionKind::VaultTransactionCreate,
        programs.multisig,
        vec![
            AccountMeta::writable(accounts.multisig, false),
            AccountMeta::writable(accounts.transaction, false),
            AccountMeta::readonly(accounts.member, true),
            AccountMeta::writable(accounts.member, true),
            AccountMeta::readonly(programs.system, false),
        ],
        data,
    )
}

pub fn proposal_create(
    programs: &ProgramIds,
    accounts: &WorkflowAccounts,
    transaction_index: u64,
) -> Instruction {
    let mut data = Vec::with_capacity(8 + 8 + 1);
    data.extend_from_slice(&discriminator("proposal_create"));
    data.extend_from_slice(&transaction_index.to_le_bytes());
    // draft = false: the proposal opens for voting immediately
    data.push(0);

    Instruction::new(
        InstructionKind::ProposalCreate,
        programs.multisig,
        vec![
            AccountMeta::readonly(accounts.multisig, false),
            AccountMeta::writable(accounts.proposal, false),
            AccountMeta::readonly(accounts.member, true),
            AccountMeta::writable(accounts.member, true),
            AccountMeta::readonly(programs.system, false),
        ],
        data,
    )
}

pub fn proposal_approve(programs: &ProgramIds, accounts: &WorkflowAccounts) -> Instruction {
    let mut data = Vec::with_capacity(8 + 1);
    data.extend_from_slice(&discriminator("proposal_approve"));
    // no vote memo
    data.push(0);

    Instruction::new(
        InstructionKind::ProposalApprove,
        programs.multisig,
        vec![
            AccountMeta::readonly(accounts.multisig, false),
            AccountMeta::writable(accounts.member, true),
            AccountMeta::writable(accounts.proposal, false),
        ],
        data,
    )
}

/// `remaining` are the accounts the committed transfers touch, in the
/// order the multisig program replays them.
pub fn vault_transaction_execute(
    programs: &ProgramIds,
    accounts: &WorkflowAccounts,
    remaining: Vec<AccountMeta>,
) -> Instruction {
    let mut metas = vec![
        AccountMeta::readonly(accounts.multisig, false),
        AccountMeta::writable(accounts.proposal, false),
        AccountMeta::readonly(accounts.transaction, false),
        AccountMeta::readonly(accounts.member, true),
    ];
    metas.extend(remaining);

    Instruction::new(
        InstructionKind::VaultTransactionExecute,
        programs.multisig,
        metas,
        discriminator("vault_transaction_execute").to_vec(),
    )
}

/// Reads the transaction index out of `proposal_create` data.
pub fn decode_proposal_index(data: &[u8]) -> Option<u64> {
    if data.len() < 16 || data[..8] != discriminator("proposal_create") {
        return None;
    }
    let mut index = [0u8; 8];
    index.copy_from_slice(&data[8..16]);
    Some(u64::from_le_bytes(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accounts() -> WorkflowAccounts {
        WorkflowAccounts {
            multisig: Address::new([1; 32]),
            vault: Address::new([2; 32]),
            transaction: Address::new([3; 32]),
            proposal: Address::new([4; 32]),
            member: Address::new([5; 32]),
        }
    }

    #[test]
    fn discriminators_are_distinct_and_stable() {
        let names = [
            "vault_transaction_create",
            "proposal_create",
            "proposal_approve",
            "vault_transaction_execute",
        ];
        for (i, a) in names.iter().enumerate() {
            assert_eq!(discriminator(a), discriminator(a));
            for b in names.iter().skip(i + 1) {
                assert_ne!(discriminator(a), discriminator(b));
            }
        }
        assert_eq!(&discriminator("proposal_approve")[..], &sha256(b"global:proposal_approve")[..8]);
    }

    #[test]
    fn create_carries_commitment() {
        let programs = ProgramIds::default();
        let commit = [0xCD; 32];
        let ix = vault_transaction_create(&programs, &accounts(), 0, commit);
        assert_eq!(ix.data.len(), 42);
        assert_eq!(&ix.data[10..], &commit);
        assert_eq!(ix.program_id, programs.multisig);
    }

    #[test]
    fn proposal_index_roundtrip() {
        let ix = proposal_create(&ProgramIds::default(), &accounts(), 77);
        assert_eq!(decode_proposal_index(&ix.data), Some(77));
        assert_eq!(decode_proposal_index(&[0u8; 16]), None);
    }

    #[test]
    fn commitment_changes_with_data() {
        let programs = ProgramIds::default();
        let a = proposal_approve(&programs, &accounts());
        let mut b = a.clone();
        b.data.push(1);
        assert_ne!(commitment(&[a.clone()]), commitment(&[b]));
        assert_eq!(commitment(&[a.clone()]), commitment(&[a]));
    }

    #[test]
    fn execute_appends_remaining_accounts() {
        let extra = AccountMeta::writable(Address::new([9; 32]), false);
        let ix = vault_transaction_execute(&ProgramIds::default(), &accounts(), vec![extra]);
        assert_eq!(ix.accounts.len(), 5);
        assert_eq!(ix.accounts[4], extra);
        assert_eq!(ix.data, discriminator("vault_transaction_execute"));
    }
}
