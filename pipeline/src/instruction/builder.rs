//! Turns invoices into instructions.
//!
//! [`InstructionBuilder`] resolves every address through the shared
//! [`AddressDeriver`], scales amounts to base units, and produces one
//! [`InvoiceInstructions`] per invoice plus the [`MultisigWorkflow`] that
//! moves the money. The result is an [`InstructionBatch`], which is all the
//! assembler needs.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::memo::Annotation;
use super::multisig::{self, MultisigWorkflow, VaultContext, WorkflowAccounts};
use super::token::transfer_checked;
use super::{AccountMeta, Instruction};
use crate::address::{AddressDeriver, DerivationError};
use crate::config::PipelineConfig;
use crate::crypto::keys::Address;
use crate::invoice::{AmountError, Invoice};
use crate::proof::ProofReference;

/// Errors that can occur while building instructions.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invoice {invoice}: {source}")]
    InvalidAmount {
        invoice: String,
        #[source]
        source: AmountError,
    },

    #[error("address resolution failed: {0}")]
    AddressResolution(String),

    #[error("annotation encoding failed: {0}")]
    Annotation(#[from] serde_json::Error),
}

impl From<DerivationError> for BuildError {
    fn from(err: DerivationError) -> Self {
        Self::AddressResolution(err.to_string())
    }
}

/// Instructions for a single invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceInstructions {
    pub invoice_number: String,
    /// Amount in base units.
    pub amount: u64,
    pub recipient: Address,
    pub destination: Address,
    pub transfer: Instruction,
    /// Annotation in the full JSON form.
    pub annotation: Instruction,
    /// Same annotation, compact form. Swapped in by the assembler when the
    /// full form does not fit.
    pub compact_annotation: Instruction,
}

/// Everything the assembler packages for one payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionBatch {
    pub invoices: Vec<InvoiceInstructions>,
    pub workflow: MultisigWorkflow,
    /// Signs and pays for every stage.
    pub fee_payer: Address,
    pub vault: Address,
    /// Sum of all transfer amounts, in base units. Checked when the batch
    /// is built.
    pub total_amount: u64,
}

/// Builds instructions against one mint.
#[derive(Debug, Clone)]
pub struct InstructionBuilder {
    deriver: Arc<AddressDeriver>,
    mint: Address,
    decimals: u8,
}

impl InstructionBuilder {
    pub fn new(deriver: Arc<AddressDeriver>, mint: Address, decimals: u8) -> Self {
        Self {
            deriver,
            mint,
            decimals,
        }
    }

    pub fn from_config(deriver: Arc<AddressDeriver>, config: &PipelineConfig) -> Self {
        Self::new(deriver, config.mint, config.token_decimals)
    }

    pub fn mint(&self) -> Address {
        self.mint
    }

    /// Transfer and annotation for one invoice, paid from `vault`.
    pub fn build_invoice_instructions(
        &self,
        vault: &Address,
        invoice: &Invoice,
        proof: &ProofReference,
    ) -> Result<InvoiceInstructions, BuildError> {
        let amount =
            invoice
                .base_units(self.decimals)
                .map_err(|source| BuildError::InvalidAmount {
                    invoice: invoice.number.clone(),
                    source,
                })?;

        if invoice.recipient.is_default() {
            return Err(BuildError::AddressResolution(format!(
                "invoice {} has no recipient",
                invoice.number
            )));
        }

        let programs = self.deriver.program_ids();
        let source = self
            .deriver
            .derive_associated_token_address(vault, &self.mint, true)?
            .address;
        let destination = self
            .deriver
            .derive_associated_token_address(&invoice.recipient, &self.mint, false)?
            .address;

        let transfer = transfer_checked(
            programs.token,
            source,
            self.mint,
            destination,
            *vault,
            amount,
            self.decimals,
        );

        let annotation = Annotation::new(invoice.number.clone(), proof.clone());

        Ok(InvoiceInstructions {
            invoice_number: invoice.number.clone(),
            amount,
            recipient: invoice.recipient,
            destination,
            transfer,
            annotation: annotation.to_instruction(programs.memo, false)?,
            compact_annotation: annotation.to_instruction(programs.memo, true)?,
        })
    }

    /// Builds every invoice's instructions and the workflow around them.
    pub fn build_batch(
        &self,
        vault_ctx: &VaultContext,
        member: Address,
        invoices: &[Invoice],
        proof: &ProofReference,
    ) -> Result<InstructionBatch, BuildError> {
        let vault = self
            .deriver
            .derive_vault_address(&vault_ctx.multisig, vault_ctx.vault_index)?
            .address;

        let built = invoices
            .iter()
            .map(|invoice| self.build_invoice_instructions(&vault, invoice, proof))
            .collect::<Result<Vec<_>, _>>()?;

        let mut total_amount = 0u64;
        for invoice in &built {
            total_amount = total_amount.checked_add(invoice.amount).ok_or_else(|| {
                BuildError::InvalidAmount {
                    invoice: invoice.invoice_number.clone(),
                    source: AmountError::Overflow(format!(
                        "batch total {total_amount} + {}",
                        invoice.amount
                    )),
                }
            })?;
        }

        let workflow = self.build_workflow(vault_ctx, vault, member, &built)?;

        debug!(
            invoices = built.len(),
            vault = %vault,
            tx_index = vault_ctx.transaction_index,
            "built instruction batch"
        );

        Ok(InstructionBatch {
            invoices: built,
            workflow,
            fee_payer: member,
            vault,
            total_amount,
        })
    }

    /// The create/propose/approve/execute instructions for `invoices`.
    pub fn build_workflow(
        &self,
        vault_ctx: &VaultContext,
        vault: Address,
        member: Address,
        invoices: &[InvoiceInstructions],
    ) -> Result<MultisigWorkflow, BuildError> {
        let multisig = vault_ctx.multisig;
        let tx_index = vault_ctx.transaction_index;
        let accounts = WorkflowAccounts {
            multisig,
            vault,
            transaction: self
                .deriver
                .derive_transaction_address(&multisig, tx_index)?
                .address,
            proposal: self.deriver.derive_proposal_address(&multisig, tx_index)?.address,
            member,
        };

        let transfers: Vec<Instruction> = invoices.iter().map(|i| i.transfer.clone()).collect();
        let programs = self.deriver.program_ids();

        let source = self
            .deriver
            .derive_associated_token_address(&vault, &self.mint, true)?
            .address;
        let destinations: BTreeSet<Address> = invoices.iter().map(|i| i.destination).collect();

        let mut remaining = vec![
            AccountMeta::writable(accounts.vault, false),
            AccountMeta::writable(source, false),
            AccountMeta::readonly(self.mint, false),
        ];
        remaining.extend(
            destinations
                .into_iter()
                .map(|d| AccountMeta::writable(d, false)),
        );
        remaining.push(AccountMeta::readonly(programs.token, false));
        remaining.push(AccountMeta::readonly(programs.memo, false));

        Ok(MultisigWorkflow {
            create: multisig::vault_transaction_create(
                programs,
                &accounts,
                vault_ctx.vault_index,
                multisig::commitment(&transfers),
            ),
            propose: multisig::proposal_create(programs, &accounts, tx_index),
            approve: multisig::proposal_approve(programs, &accounts),
            execute: multisig::vault_transaction_execute(programs, &accounts, remaining),
        })
    }
}
