//! # Transaction Module
//!
//! Compilation and signing of the transactions the pipeline submits.
//!
//! ## Architecture
//!
//! ```text
//! message.rs  Message compilation: account table, header, short-vec encoding
//! signing.rs  SignedTransaction: detached signatures over the message bytes
//! ```
//!
//! ## Lifecycle
//!
//! 1. **Assemble**: the assembler decides which instructions share a
//!    transaction (see [`crate::assembler`]).
//! 2. **Compile**: right before submission, [`Message::compile`] binds the
//!    instructions to a freshly fetched [`Blockhash`].
//! 3. **Sign**: [`SignedTransaction::sign`] collects one signature per
//!    required signer.
//! 4. **Submit**: the backend verifies and lands it.

pub mod message;
pub mod signing;

pub use message::{Blockhash, CompiledInstruction, Message, MessageError, MessageHeader};
pub use signing::{SignedTransaction, SigningError};
