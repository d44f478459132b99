//! # Instructions
//!
//! Program instructions as plain data, before they are compiled into a
//! message. An [`Instruction`] names its program, the accounts it touches
//! (with signer/writable flags), and opaque data bytes.
//!
//! ```text
//! token.rs     SPL TransferChecked
//! memo.rs      invoice annotations (full and compact JSON)
//! multisig.rs  vault transaction create / proposal create / approve / execute
//! builder.rs   InstructionBuilder: invoices + vault context -> InstructionBatch
//! ```
//!
//! Every instruction carries an [`InstructionKind`] tag so the assembler can
//! order, split and re-encode without inspecting program ids.

pub mod builder;
pub mod memo;
pub mod multisig;
pub mod token;

use serde::{Deserialize, Serialize};

use crate::crypto::keys::Address;

pub use builder::{BuildError, InstructionBatch, InstructionBuilder, InvoiceInstructions};
pub use memo::Annotation;
pub use multisig::{MultisigWorkflow, VaultContext};

/// What an instruction does within a payment batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InstructionKind {
    Transfer,
    Annotation,
    VaultTransactionCreate,
    ProposalCreate,
    ProposalApprove,
    VaultTransactionExecute,
}

/// One account referenced by an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMeta {
    pub address: Address,
    pub is_signer: bool,
    pub is_writable: bool,
}

impl AccountMeta {
    pub fn writable(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: true,
        }
    }

    pub fn readonly(address: Address, is_signer: bool) -> Self {
        Self {
            address,
            is_signer,
            is_writable: false,
        }
    }
}

/// A single program instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instruction {
    pub kind: InstructionKind,
    pub program_id: Address,
    pub accounts: Vec<AccountMeta>,
    #[serde(with = "hex_data")]
    pub data: Vec<u8>,
}

impl Instruction {
    pub fn new(
        kind: InstructionKind,
        program_id: Address,
        accounts: Vec<AccountMeta>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            kind,
            program_id,
            accounts,
            data,
        }
    }

    /// Every address this instruction makes the transaction load, program
    /// id included.
    pub fn keys(&self) -> impl Iterator<Item = &Address> {
        std::iter::once(&self.program_id).chain(self.accounts.iter().map(|a| &a.address))
    }
}

mod hex_data {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
