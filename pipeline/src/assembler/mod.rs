//! # Transaction Assembly
//!
//! Packs an [`InstructionBatch`] into as few transactions as the size budget
//! allows, never more than two.
//!
//! ## Algorithm
//!
//! 1. Everything in one transaction, full annotations. Fits: atomic.
//! 2. Same, with compact annotations. Fits: atomic.
//! 3. Split, compact annotations:
//!    - **setup**: transfers, annotations, vault transaction create, proposal
//!      create;
//!    - **execute**: proposal approve, vault transaction execute.
//!
//!    Both stages must fit or assembly fails with
//!    [`AssemblyError::StageExceedsBudget`].
//!
//! The effective budget is `min(requested, ceiling)`. A split gives up
//! atomicity: if setup lands and execute never does, a proposal stays open
//! on-chain. The submission layer reports that case explicitly.

pub mod size;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::crypto::keys::Address;
use crate::instruction::{Instruction, InstructionBatch};

pub use size::{estimate_transaction_size, instruction_size};

/// Errors that can occur during assembly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("cannot assemble an empty batch")]
    EmptyBatch,

    #[error("{stage} stage needs ~{estimated} bytes but the budget is {budget}")]
    StageExceedsBudget {
        stage: Stage,
        estimated: usize,
        budget: usize,
    },
}

/// Position of a transaction within a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Single,
    Setup,
    Execute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Single => "single",
            Stage::Setup => "setup",
            Stage::Execute => "execute",
        };
        f.write_str(s)
    }
}

/// One transaction's worth of instructions, ready to compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTransaction {
    pub instructions: Vec<Instruction>,
    pub estimated_size: usize,
    pub is_atomic: bool,
    pub stage: Stage,
    pub fee_payer: Address,
    /// Whether annotations were re-encoded in the compact form.
    pub compact_annotations: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssemblyKind {
    Atomic,
    Split,
}

/// The assembler's decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembly {
    Atomic(AssembledTransaction),
    Split {
        setup: AssembledTransaction,
        execute: AssembledTransaction,
    },
}

impl Assembly {
    pub fn kind(&self) -> AssemblyKind {
        match self {
            Assembly::Atomic(_) => AssemblyKind::Atomic,
            Assembly::Split { .. } => AssemblyKind::Split,
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, Assembly::Atomic(_))
    }

    /// Transactions in submission order.
    pub fn stages(&self) -> Vec<&AssembledTransaction> {
        match self {
            Assembly::Atomic(tx) => vec![tx],
            Assembly::Split { setup, execute } => vec![setup, execute],
        }
    }
}

/// Packs batches under a hard size ceiling.
#[derive(Debug, Clone, Copy)]
pub struct TransactionAssembler {
    ceiling: usize,
}

impl TransactionAssembler {
    pub fn new(ceiling: usize) -> Self {
        Self { ceiling }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_transaction_size)
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Assembles `batch` under `budget` (clamped to the ceiling).
    pub fn assemble(
        &self,
        batch: &InstructionBatch,
        budget: usize,
    ) -> Result<Assembly, AssemblyError> {
        if batch.invoices.is_empty() {
            return Err(AssemblyError::EmptyBatch);
        }
        let budget = budget.min(self.ceiling);
        let payer = batch.fee_payer;

        for compact in [false, true] {
            let mut instructions = invoice_instructions(batch, compact);
            instructions.extend(setup_workflow(batch));
            instructions.extend(execute_workflow(batch));

            let estimated = estimate_transaction_size(&payer, &instructions);
            debug!(compact, estimated, budget, "atomic candidate");
            if estimated <= budget {
                info!(
                    invoices = batch.invoices.len(),
                    estimated,
                    compact,
                    "assembled atomic transaction"
                );
                return Ok(Assembly::Atomic(AssembledTransaction {
                    instructions,
                    estimated_size: estimated,
                    is_atomic: true,
                    stage: Stage::Single,
                    fee_payer: payer,
                    compact_annotations: compact,
                }));
            }
        }

        let mut setup_ixs = invoice_instructions(batch, true);
        setup_ixs.extend(setup_workflow(batch));
        let setup = stage(Stage::Setup, payer, setup_ixs, budget)?;
        let execute = stage(Stage::Execute, payer, execute_workflow(batch), budget)?;

        info!(
            invoices = batch.invoices.len(),
            setup_bytes = setup.estimated_size,
            execute_bytes = execute.estimated_size,
            budget,
            "batch over budget, split into setup and execute"
        );
        Ok(Assembly::Split { setup, execute })
    }
}

fn invoice_instructions(batch: &InstructionBatch, compact: bool) -> Vec<Instruction> {
    let mut out = Vec::with_capacity(batch.invoices.len() * 2 + 4);
    for invoice in &batch.invoices {
        out.push(invoice.transfer.clone());
        let annotation = if compact {
            &invoice.compact_annotation
        } else {
            &invoice.annotation
        };
        out.push(annotation.clone());
    }
    out
}

fn setup_workflow(batch: &InstructionBatch) -> [Instruction; 2] {
    [batch.workflow.create.clone(), batch.workflow.propose.clone()]
}

fn execute_workflow(batch: &InstructionBatch) -> Vec<Instruction> {
    vec![batch.workflow.approve.clone(), batch.workflow.execute.clone()]
}

fn stage(
    stage: Stage,
    fee_payer: Address,
    instructions: Vec<Instruction>,
    budget: usize,
) -> Result<AssembledTransaction, AssemblyError> {
    let estimated = estimate_transaction_size(&fee_payer, &instructions);
    if estimated > budget {
        return Err(AssemblyError::StageExceedsBudget {
            stage,
            estimated,
            budget,
        });
    }
    Ok(AssembledTransaction {
        instructions,
        estimated_size: estimated,
        is_atomic: false,
        stage,
        fee_payer,
        compact_annotations: true,
    })
}
