//! Serialized-size estimation.
//!
//! The estimate is an upper bound on [`crate::transaction::SignedTransaction::serialize`]
//! for a single-signer transaction whose account table, instruction count,
//! and per-instruction account lists stay under 128 entries: every
//! length prefix is charged at its worst case for that range.

use std::collections::BTreeSet;

use crate::config::{
    ACCOUNT_KEY_LENGTH, INSTRUCTION_BASE_OVERHEAD, PER_ACCOUNT_BYTES, TRANSACTION_BASE_OVERHEAD,
};
use crate::crypto::keys::Address;
use crate::instruction::Instruction;

/// `base + data + accounts × per_account` for one instruction.
pub fn instruction_size(ix: &Instruction) -> usize {
    INSTRUCTION_BASE_OVERHEAD + ix.data.len() + ix.accounts.len() * PER_ACCOUNT_BYTES
}

/// Distinct keys a transaction loads, fee payer and program ids included.
pub fn unique_keys<'a>(
    fee_payer: &Address,
    instructions: impl IntoIterator<Item = &'a Instruction>,
) -> usize {
    let mut keys: BTreeSet<&Address> = BTreeSet::new();
    keys.insert(fee_payer);
    for ix in instructions {
        keys.extend(ix.keys());
    }
    keys.len()
}

/// Estimated wire size of a transaction carrying `instructions`.
pub fn estimate_transaction_size(fee_payer: &Address, instructions: &[Instruction]) -> usize {
    TRANSACTION_BASE_OVERHEAD
        + unique_keys(fee_payer, instructions) * ACCOUNT_KEY_LENGTH
        + instructions.iter().map(instruction_size).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{AccountMeta, InstructionKind};
    use crate::transaction::{Blockhash, Message, SignedTransaction};
    use crate::crypto::keys::Keypair;
    use crate::crypto::TransactionSigner;

    #[test]
    fn instruction_formula() {
        let ix = Instruction::new(
            InstructionKind::Transfer,
            Address::new([1; 32]),
            vec![AccountMeta::readonly(Address::new([2; 32]), false); 4],
            vec![0; 10],
        );
        assert_eq!(instruction_size(&ix), 4 + 10 + 4);
    }

    #[test]
    fn shared_keys_counted_once() {
        let payer = Address::new([1; 32]);
        let program = Address::new([2; 32]);
        let ix = Instruction::new(
            InstructionKind::Annotation,
            program,
            vec![AccountMeta::readonly(payer, true)],
            Vec::new(),
        );
        assert_eq!(unique_keys(&payer, [&ix, &ix]), 2);
    }

    #[test]
    fn estimate_bounds_actual_wire_size() {
        let kp = Keypair::from_seed(&[4; 32]);
        let payer = kp.address();
        let instructions: Vec<Instruction> = (0..6u8)
            .map(|i| {
                Instruction::new(
                    InstructionKind::Transfer,
                    Address::new([100 + i; 32]),
                    vec![
                        AccountMeta::writable(Address::new([i; 32]), false),
                        AccountMeta::readonly(payer, true),
                    ],
                    vec![i; 40 * usize::from(i) + 1],
                )
            })
            .collect();

        let estimate = estimate_transaction_size(&payer, &instructions);
        let msg = Message::compile(&payer, &instructions, Blockhash::default()).unwrap();
        let signed = SignedTransaction::sign(msg, &[&kp]).unwrap();
        assert!(signed.serialize().len() <= estimate);
    }
}
