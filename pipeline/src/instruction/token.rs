//! SPL token `TransferChecked`.

use super::{AccountMeta, Instruction, InstructionKind};
use crate::crypto::keys::Address;

/// Instruction tag of `TransferChecked` in the token program.
pub const TRANSFER_CHECKED_TAG: u8 = 12;

/// Encoded length of `TransferChecked` data: tag, u64 amount, decimals.
pub const TRANSFER_CHECKED_LEN: usize = 1 + 8 + 1;

/// Moves `amount` base units of `mint` from `source` to `destination`.
///
/// `authority` owns `source`. For vault payments the authority is the vault
/// PDA, which signs through the multisig program at execution rather than in
/// the outer transaction, so it is listed as a non-signer here.
pub fn transfer_checked(
    token_program: Address,
    source: Address,
    mint: Address,
    destination: Address,
    authority: Address,
    amount: u64,
    decimals: u8,
) -> Instruction {
    let mut data = Vec::with_capacity(TRANSFER_CHECKED_LEN);
    data.push(TRANSFER_CHECKED_TAG);
    data.extend_from_slice(&amount.to_le_bytes());
    data.push(decimals);

    Instruction::new(
        InstructionKind::Transfer,
        token_program,
        vec![
            AccountMeta::writable(source, false),
            AccountMeta::readonly(mint, false),
            AccountMeta::writable(destination, false),
            AccountMeta::readonly(authority, false),
        ],
        data,
    )
}

/// Decodes `(amount, decimals)` from `TransferChecked` data.
pub fn decode_transfer_checked(data: &[u8]) -> Option<(u64, u8)> {
    if data.len() != TRANSFER_CHECKED_LEN || data[0] != TRANSFER_CHECKED_TAG {
        return None;
    }
    let mut amount = [0u8; 8];
    amount.copy_from_slice(&data[1..9]);
    Some((u64::from_le_bytes(amount), data[9]))
}
