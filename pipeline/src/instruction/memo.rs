//! Invoice annotations written through the memo program.
//!
//! The full form is self-describing:
//!
//! ```json
//! {"invoiceNumber":"INV-1","proof":{"integrityHash":"…","version":"1.0"},"schemaVersion":"1"}
//! ```
//!
//! The compact form renames every field to a single letter and is what the
//! assembler falls back to when a batch is over budget:
//!
//! ```json
//! {"n":"INV-1","p":{"h":"…","v":"1.0"},"s":"1"}
//! ```

use serde::{Deserialize, Serialize};

use super::{Instruction, InstructionKind};
use crate::config::ANNOTATION_SCHEMA_VERSION;
use crate::crypto::keys::Address;
use crate::proof::ProofReference;

/// Annotation attached to each invoice transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub invoice_number: String,
    pub proof: ProofReference,
    pub schema_version: String,
}

#[derive(Serialize, Deserialize)]
struct CompactAnnotation {
    n: String,
    p: CompactProof,
    s: String,
}

#[derive(Serialize, Deserialize)]
struct CompactProof {
    h: String,
    v: String,
}

impl Annotation {
    pub fn new(invoice_number: impl Into<String>, proof: ProofReference) -> Self {
        Self {
            invoice_number: invoice_number.into(),
            proof,
            schema_version: ANNOTATION_SCHEMA_VERSION.to_string(),
        }
    }

    /// JSON bytes in the full or compact form.
    pub fn encode(&self, compact: bool) -> Result<Vec<u8>, serde_json::Error> {
        if compact {
            serde_json::to_vec(&CompactAnnotation {
                n: self.invoice_number.clone(),
                p: CompactProof {
                    h: self.proof.integrity_hash.clone(),
                    v: self.proof.version.clone(),
                },
                s: self.schema_version.clone(),
            })
        } else {
            serde_json::to_vec(self)
        }
    }

    /// Parses either form.
    pub fn decode(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice::<Self>(data).or_else(|_| {
            let compact: CompactAnnotation = serde_json::from_slice(data)?;
            Ok(Self {
                invoice_number: compact.n,
                proof: ProofReference {
                    integrity_hash: compact.p.h,
                    version: compact.p.v,
                },
                schema_version: compact.s,
            })
        })
    }

    /// Wraps the encoded annotation in a memo instruction. Memos need no
    /// accounts.
    pub fn to_instruction(
        &self,
        memo_program: Address,
        compact: bool,
    ) -> Result<Instruction, serde_json::Error> {
        Ok(Instruction::new(
            InstructionKind::Annotation,
            memo_program,
            Vec::new(),
            self.encode(compact)?,
        ))
    }
}
