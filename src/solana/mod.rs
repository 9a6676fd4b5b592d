//! The minimal subset of Solana chain primitives this workload needs:
//! addresses, keypairs, and the legacy transaction wire format.

pub mod hash;
pub mod instruction;
pub mod message;
pub mod pubkey;
pub mod shortvec;
pub mod signature;
pub mod transaction;

pub use hash::Hash;
pub use pubkey::Pubkey;
pub use signature::{Keypair, Signature, Signer};
