// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # VaultPay Pipeline: Core Library
//!
//! Pays batches of invoices out of a multisig-controlled vault. Each batch
//! becomes token transfers plus on-chain annotations, wrapped in the
//! multisig's create → propose → approve → execute workflow, packed into
//! as few transactions as the size ceiling allows, submitted, and watched
//! until it settles.
//!
//! Business data never touches the chain in the clear. It is sealed with
//! AES-256-GCM under a fresh per-batch key; the chain only sees a hash of
//! it, and the key goes back to the caller.
//!
//! ## Architecture
//!
//! - **config**: Constants, program ids, and the tunable [`PipelineConfig`].
//! - **crypto**: Keys, signing, hashing, and symmetric encryption.
//! - **address**: Program-derived and associated token addresses.
//! - **invoice**: Invoice model, amount parsing, and batch validation.
//! - **proof**: Sealing and opening the private proof payload.
//! - **instruction**: Transfer, annotation, and multisig instructions.
//! - **transaction**: Message compilation and signing.
//! - **assembler**: Size estimation and the atomic-or-split decision.
//! - **backend**: The execution backend contract and a simulated backend.
//! - **submission**: Stage-by-stage submission with enforced sequencing.
//! - **confirmation**: Status polling with exponential backoff.
//! - **payment**: The end-to-end facade and the persistence contract.
//!
//! ## Ground rules
//!
//! 1. Nothing that moves money is retried blindly. Rejections surface.
//! 2. An execute stage is never sent before its setup is confirmed.
//! 3. Size estimates may overshoot the wire size, never undershoot it.

pub mod address;
pub mod assembler;
pub mod backend;
pub mod config;
pub mod confirmation;
pub mod crypto;
pub mod instruction;
pub mod invoice;
pub mod payment;
pub mod proof;
pub mod submission;
pub mod transaction;

pub use config::PipelineConfig;
pub use payment::{PaymentError, PaymentPipeline, PaymentReceipt};
