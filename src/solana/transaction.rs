//! An atomically-committed sequence of instructions plus the signatures
//! authorizing it.

use crate::solana::hash::Hash;
use crate::solana::message::Message;
use crate::solana::shortvec;
use crate::solana::signature::{Signature, Signer};
use std::io::Write;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Signatures over the message data, one per required signer, in the
    /// same order as the first `num_required_signatures` account keys.
    pub signatures: Vec<Signature>,
    pub message: Message,
}

impl Transaction {
    pub fn new_unsigned(message: Message) -> Self {
        Self {
            signatures: vec![
                Signature::default();
                message.header.num_required_signatures as usize
            ],
            message,
        }
    }

    /// Sets the recent blockhash, then signs the message with each keypair.
    ///
    /// Keypairs must cover exactly the required signer positions of the
    /// message; an unknown signer is a caller bug.
    pub fn sign<T: Signer + ?Sized>(&mut self, keypairs: &[&T], recent_blockhash: Hash) {
        self.message.recent_blockhash = recent_blockhash;
        let message_data = self.message.serialize();
        for keypair in keypairs {
            let position = self
                .message
                .position(&keypair.pubkey())
                .expect("keypair-pubkey not found in message account keys");
            self.signatures[position as usize] = keypair.sign_message(&message_data);
        }
    }

    /// Wire bytes: a shortvec of signatures followed by the message.
    pub fn serialize(&self) -> Vec<u8> {
        let message_data = self.message.serialize();
        let mut wr = Vec::with_capacity(1 + self.signatures.len() * 64 + message_data.len());
        shortvec::encode_len(&mut wr, self.signatures.len()).expect("serialize num signatures");
        for signature in &self.signatures {
            wr.write_all(signature.as_ref()).expect("serialize signature");
        }
        wr.write_all(&message_data).expect("serialize message");
        wr
    }
}
