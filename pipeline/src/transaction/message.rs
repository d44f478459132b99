//! Message compilation.
//!
//! A [`Message`] is the exact byte string a transaction's signers sign:
//!
//! ```text
//! header          3 bytes   required signatures, readonly signed, readonly unsigned
//! account keys    short-vec of 32-byte keys
//! blockhash       32 bytes
//! instructions    short-vec of { program index, short-vec account indices, short-vec data }
//! ```
//!
//! Keys are ordered fee payer first, then writable signers, readonly
//! signers, writable non-signers, readonly non-signers. Within each group
//! keys keep first-appearance order so compilation is deterministic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::crypto::keys::{Address, KeyError};
use crate::instruction::Instruction;

/// Errors that can occur while compiling or decoding a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("message references {0} accounts; at most 256 can be indexed")]
    TooManyAccounts(usize),

    #[error("message carries no instructions")]
    NoInstructions,
}

/// A recent blockhash, the replay guard every transaction commits to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Blockhash([u8; 32]);

impl Blockhash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({self})")
    }
}

impl FromStr for Blockhash {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Address::from_str(s).map(|a| Self(a.to_bytes()))
    }
}

impl Serialize for Blockhash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Blockhash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
}

/// An instruction with its keys replaced by indices into the message's
/// account table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Address>,
    pub recent_blockhash: Blockhash,
    pub instructions: Vec<CompiledInstruction>,
}

struct KeyFlags {
    address: Address,
    is_signer: bool,
    is_writable: bool,
}

impl Message {
    /// Compiles `instructions` with `fee_payer` as first signer.
    pub fn compile(
        fee_payer: &Address,
        instructions: &[Instruction],
        recent_blockhash: Blockhash,
    ) -> Result<Self, MessageError> {
        if instructions.is_empty() {
            return Err(MessageError::NoInstructions);
        }

        let mut keys: Vec<KeyFlags> = vec![KeyFlags {
            address: *fee_payer,
            is_signer: true,
            is_writable: true,
        }];
        let mut upsert = |address: Address, is_signer: bool, is_writable: bool| {
            match keys.iter_mut().find(|k| k.address == address) {
                Some(existing) => {
                    existing.is_signer |= is_signer;
                    existing.is_writable |= is_writable;
                }
                None => keys.push(KeyFlags {
                    address,
                    is_signer,
                    is_writable,
                }),
            }
        };
        for ix in instructions {
            for meta in &ix.accounts {
                upsert(meta.address, meta.is_signer, meta.is_writable);
            }
            upsert(ix.program_id, false, false);
        }

        if keys.len() > usize::from(u8::MAX) + 1 {
            return Err(MessageError::TooManyAccounts(keys.len()));
        }

        // Stable sort keeps first-appearance order inside each group; the
        // fee payer is a writable signer and already first.
        let rank = |k: &KeyFlags| match (k.is_signer, k.is_writable) {
            (true, true) => 0,
            (true, false) => 1,
            (false, true) => 2,
            (false, false) => 3,
        };
        keys[1..].sort_by_key(rank);

        let header = MessageHeader {
            num_required_signatures: keys.iter().filter(|k| k.is_signer).count() as u8,
            num_readonly_signed: keys
                .iter()
                .filter(|k| k.is_signer && !k.is_writable)
                .count() as u8,
            num_readonly_unsigned: keys
                .iter()
                .filter(|k| !k.is_signer && !k.is_writable)
                .count() as u8,
        };
        let account_keys: Vec<Address> = keys.into_iter().map(|k| k.address).collect();

        let index_of = |address: &Address| -> u8 {
            // Every key was inserted above, and the table fits in a u8.
            account_keys
                .iter()
                .position(|k| k == address)
                .unwrap_or_default() as u8
        };

        let compiled = instructions
            .iter()
            .map(|ix| CompiledInstruction {
                program_id_index: index_of(&ix.program_id),
                accounts: ix.accounts.iter().map(|m| index_of(&m.address)).collect(),
                data: ix.data.clone(),
            })
            .collect();

        Ok(Self {
            header,
            account_keys,
            recent_blockhash,
            instructions: compiled,
        })
    }

    /// The bytes signers sign.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        buf.push(self.header.num_required_signatures);
        buf.push(self.header.num_readonly_signed);
        buf.push(self.header.num_readonly_unsigned);

        encode_length(&mut buf, self.account_keys.len());
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }

        buf.extend_from_slice(self.recent_blockhash.as_bytes());

        encode_length(&mut buf, self.instructions.len());
        for ix in &self.instructions {
            buf.push(ix.program_id_index);
            encode_length(&mut buf, ix.accounts.len());
            buf.extend_from_slice(&ix.accounts);
            encode_length(&mut buf, ix.data.len());
            buf.extend_from_slice(&ix.data);
        }
        buf
    }

    /// Keys that must sign, fee payer first.
    pub fn signers(&self) -> &[Address] {
        let n = usize::from(self.header.num_required_signatures).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn fee_payer(&self) -> Option<&Address> {
        self.account_keys.first()
    }

    /// Program id of a compiled instruction.
    pub fn program_id(&self, ix: &CompiledInstruction) -> Option<&Address> {
        self.account_keys.get(usize::from(ix.program_id_index))
    }

    /// Account addresses of a compiled instruction, in order.
    pub fn instruction_accounts<'a>(
        &'a self,
        ix: &'a CompiledInstruction,
    ) -> impl Iterator<Item = Option<&'a Address>> + 'a {
        ix.accounts
            .iter()
            .map(move |i| self.account_keys.get(usize::from(*i)))
    }
}

/// Appends a compact-u16 ("short-vec") length: seven bits per byte, high
/// bit set on every byte but the last.
pub fn encode_length(buf: &mut Vec<u8>, len: usize) {
    let mut rem = len;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            buf.push(byte);
            break;
        }
        byte |= 0x80;
        buf.push(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{AccountMeta, InstructionKind};

    fn addr(b: u8) -> Address {
        Address::new([b; 32])
    }

    #[test]
    fn short_vec_encoding() {
        let cases: [(usize, &[u8]); 5] = [
            (0, &[0x00]),
            (5, &[0x05]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (16384, &[0x80, 0x80, 0x01]),
        ];
        for (len, expected) in cases {
            let mut buf = Vec::new();
            encode_length(&mut buf, len);
            assert_eq!(buf, expected, "length {len}");
        }
    }

    #[test]
    fn accounts_are_deduplicated_and_ordered() {
        let payer = addr(1);
        let program = addr(9);
        let ix = Instruction::new(
            InstructionKind::ProposalApprove,
            program,
            vec![
                AccountMeta::readonly(addr(3), false),
                AccountMeta::writable(addr(4), false),
                AccountMeta::readonly(payer, true),
                AccountMeta::readonly(addr(3), false),
            ],
            vec![7],
        );

        let msg = Message::compile(&payer, &[ix], Blockhash::default()).unwrap();
        assert_eq!(msg.account_keys, vec![payer, addr(4), addr(3), program]);
        assert_eq!(msg.header.num_required_signatures, 1);
        assert_eq!(msg.header.num_readonly_signed, 0);
        assert_eq!(msg.header.num_readonly_unsigned, 2);
        assert_eq!(msg.signers(), &[payer]);

        let compiled = &msg.instructions[0];
        assert_eq!(compiled.program_id_index, 3);
        assert_eq!(compiled.accounts, vec![2, 1, 0, 2]);
        assert_eq!(msg.program_id(compiled), Some(&program));
    }

    #[test]
    fn serialized_length_matches_layout() {
        let payer = addr(1);
        let ix = Instruction::new(
            InstructionKind::Annotation,
            addr(2),
            Vec::new(),
            vec![0u8; 10],
        );
        let msg = Message::compile(&payer, &[ix], Blockhash::new([5; 32])).unwrap();
        // header + keys(1+64) + blockhash + ix count + (program, 0 accounts, len, data)
        assert_eq!(msg.serialize().len(), 3 + 1 + 64 + 32 + 1 + 1 + 1 + 1 + 10);
    }

    #[test]
    fn empty_message_rejected() {
        assert_eq!(
            Message::compile(&addr(1), &[], Blockhash::default()),
            Err(MessageError::NoInstructions)
        );
    }

    #[test]
    fn blockhash_string_roundtrip() {
        let hash = Blockhash::new([77; 32]);
        let parsed: Blockhash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
    }
}
