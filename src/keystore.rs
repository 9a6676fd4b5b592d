//! Loads operator signing keys from a directory of `id{N}.json` files.
//!
//! Each file holds a JSON array of bytes; the first 32 are the Ed25519
//! seed. The same 32 bytes double as a secp256k1 secret, giving every
//! operator an Ethereum-style address alongside its Solana account.

use crate::eth::{eth_address_of_secret, EthAddress};
use crate::solana::Keypair;
use std::convert::TryInto;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("missing operator key file {path}")]
    MissingKey { path: PathBuf },
    #[error("malformed operator key file {path}: {reason}")]
    MalformedKey { path: PathBuf, reason: String },
}

/// An operator: pays for and signs Solana transactions, identified on
/// the execution chain by its derived Ethereum address.
#[derive(Debug)]
pub struct OperatorSigner {
    pub keypair: Keypair,
    pub eth_address: EthAddress,
}

pub fn read_operator_keypair(path: &Path) -> Result<OperatorSigner, KeystoreError> {
    let malformed = |reason: String| KeystoreError::MalformedKey {
        path: path.to_path_buf(),
        reason,
    };

    let file = File::open(path).map_err(|_| KeystoreError::MissingKey {
        path: path.to_path_buf(),
    })?;
    let bytes: Vec<u8> =
        serde_json::from_reader(file).map_err(|err| malformed(err.to_string()))?;
    let secret: [u8; SECRET_LEN] = bytes
        .get(..SECRET_LEN)
        .ok_or_else(|| malformed(format!("expected at least {} bytes", SECRET_LEN)))?
        .try_into()
        .map_err(|_| malformed("secret conversion failed".to_string()))?;

    let keypair =
        Keypair::from_seed(&secret).map_err(|err| malformed(format!("ed25519: {}", err)))?;
    let eth_address =
        eth_address_of_secret(&secret).map_err(|err| malformed(format!("secp256k1: {}", err)))?;
    Ok(OperatorSigner {
        keypair,
        eth_address,
    })
}

/// Loads operators `id{offset}.json` through `id{offset+count-1}.json`,
/// in index order. Any missing or undecodable file is fatal.
pub fn load_operators(
    dir: &Path,
    offset: usize,
    count: usize,
) -> Result<Vec<OperatorSigner>, KeystoreError> {
    (offset..offset + count)
        .map(|index| read_operator_keypair(&dir.join(format!("id{}.json", index))))
        .collect()
}
