//! The compact transaction message: a header, a flat account list, a
//! recent blockhash, and compiled instructions.
//!
//! The account list is ordered by required permissions: writable signers
//! first, then read-only signers, writable non-signers, and read-only
//! non-signers. The header fields describe that layout so the runtime can
//! recover each account's permissions from its position alone.

use crate::solana::hash::Hash;
use crate::solana::instruction::{AccountMeta, CompiledInstruction, Instruction};
use crate::solana::pubkey::Pubkey;
use crate::solana::shortvec;
use std::collections::BTreeMap;
use std::io::Write;

/// The length of a serialized message header in bytes.
pub const MESSAGE_HEADER_LENGTH: usize = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// The number of signatures required for this message to be considered
    /// valid. The signers must match the first `num_required_signatures`
    /// of `account_keys`.
    pub num_required_signatures: u8,
    /// The last `num_readonly_signed_accounts` of the signed keys are
    /// read-only accounts.
    pub num_readonly_signed_accounts: u8,
    /// The last `num_readonly_unsigned_accounts` of the unsigned keys are
    /// read-only accounts.
    pub num_readonly_unsigned_accounts: u8,
}

#[derive(Default, Debug)]
struct CompiledKeyMeta {
    is_signer: bool,
    is_writable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
}

impl Message {
    pub fn new(instructions: &[Instruction], payer: Option<&Pubkey>) -> Self {
        Self::new_with_blockhash(instructions, payer, &Hash::default())
    }

    pub fn new_with_blockhash(
        instructions: &[Instruction],
        payer: Option<&Pubkey>,
        blockhash: &Hash,
    ) -> Self {
        let (header, account_keys) = compile_keys(instructions, payer);
        let instructions = instructions
            .iter()
            .map(|ix| compile_instruction(ix, &account_keys))
            .collect();
        Self {
            header,
            account_keys,
            recent_blockhash: *blockhash,
            instructions,
        }
    }

    pub fn position(&self, key: &Pubkey) -> Option<u8> {
        self.account_keys
            .iter()
            .position(|k| k == key)
            .map(|p| p as u8)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut wr = Vec::with_capacity(256);
        wr.write_all(&[
            self.header.num_required_signatures,
            self.header.num_readonly_signed_accounts,
            self.header.num_readonly_unsigned_accounts,
        ])
        .expect("serialize header");
        shortvec::encode_len(&mut wr, self.account_keys.len()).expect("serialize num keys");
        for key in &self.account_keys {
            wr.write_all(key.as_ref()).expect("serialize account key");
        }
        wr.write_all(self.recent_blockhash.as_ref())
            .expect("serialize recent_blockhash");
        shortvec::encode_len(&mut wr, self.instructions.len()).expect("serialize num instructions");
        for ix in &self.instructions {
            wr.write_all(&[ix.program_id_index])
                .expect("serialize program id index");
            shortvec::serialize_vec_bytes(&mut wr, &ix.accounts)
                .expect("serialize instruction accounts");
            shortvec::serialize_vec_bytes(&mut wr, &ix.data).expect("serialize instruction data");
        }
        wr
    }
}

/// Collect the pubkeys referenced by a list of instructions, deduplicated
/// and ordered by permission class, with the payer forced to the front.
fn compile_keys(instructions: &[Instruction], payer: Option<&Pubkey>) -> (MessageHeader, Vec<Pubkey>) {
    let mut key_meta_map = BTreeMap::<&Pubkey, CompiledKeyMeta>::new();
    for ix in instructions {
        key_meta_map.entry(&ix.program_id).or_default();
        for AccountMeta {
            pubkey,
            is_signer,
            is_writable,
        } in &ix.accounts
        {
            let meta = key_meta_map.entry(pubkey).or_default();
            meta.is_signer |= is_signer;
            meta.is_writable |= is_writable;
        }
    }
    if let Some(payer) = payer {
        key_meta_map.remove(payer);
    }

    let writable_signer_keys: Vec<Pubkey> = payer
        .into_iter()
        .copied()
        .chain(
            key_meta_map
                .iter()
                .filter(|(_, meta)| meta.is_signer && meta.is_writable)
                .map(|(key, _)| **key),
        )
        .collect();
    let readonly_signer_keys: Vec<Pubkey> = key_meta_map
        .iter()
        .filter(|(_, meta)| meta.is_signer && !meta.is_writable)
        .map(|(key, _)| **key)
        .collect();
    let writable_non_signer_keys: Vec<Pubkey> = key_meta_map
        .iter()
        .filter(|(_, meta)| !meta.is_signer && meta.is_writable)
        .map(|(key, _)| **key)
        .collect();
    let readonly_non_signer_keys: Vec<Pubkey> = key_meta_map
        .iter()
        .filter(|(_, meta)| !meta.is_signer && !meta.is_writable)
        .map(|(key, _)| **key)
        .collect();

    let header = MessageHeader {
        num_required_signatures: (writable_signer_keys.len() + readonly_signer_keys.len()) as u8,
        num_readonly_signed_accounts: readonly_signer_keys.len() as u8,
        num_readonly_unsigned_accounts: readonly_non_signer_keys.len() as u8,
    };

    let account_keys = writable_signer_keys
        .into_iter()
        .chain(readonly_signer_keys)
        .chain(writable_non_signer_keys)
        .chain(readonly_non_signer_keys)
        .collect();

    (header, account_keys)
}

fn compile_instruction(ix: &Instruction, keys: &[Pubkey]) -> CompiledInstruction {
    let position = |key: &Pubkey| {
        keys.iter()
            .position(|k| k == key)
            .expect("instruction key must be present in compiled keys") as u8
    };
    CompiledInstruction {
        program_id_index: position(&ix.program_id),
        accounts: ix.accounts.iter().map(|m| position(&m.pubkey)).collect(),
        data: ix.data.clone(),
    }
}
