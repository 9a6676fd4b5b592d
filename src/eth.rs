//! Ethereum-side primitives: secp256k1 keypairs, deterministic user key
//! derivation, and EIP-155 signed legacy transactions.

use alloy_rlp::{Decodable, Encodable, Header};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ETH_ADDRESS_BYTES: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EthError {
    #[error("invalid secp256k1 secret key")]
    InvalidSecret,
    #[error("invalid signature in transaction")]
    InvalidSignature,
    #[error("malformed rlp: {0}")]
    Rlp(alloy_rlp::Error),
    #[error("invalid ethereum address string")]
    InvalidAddress,
}

impl From<alloy_rlp::Error> for EthError {
    fn from(err: alloy_rlp::Error) -> Self {
        Self::Rlp(err)
    }
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EthAddress(pub [u8; ETH_ADDRESS_BYTES]);

impl EthAddress {
    /// The address of a secp256k1 public key: the low 20 bytes of the
    /// keccak hash of the uncompressed point, tag byte excluded.
    pub fn from_public_key(pubkey: &libsecp256k1::PublicKey) -> Self {
        let mut addr = [0u8; ETH_ADDRESS_BYTES];
        addr.copy_from_slice(&Keccak256::digest(&pubkey.serialize()[1..])[12..]);
        Self(addr)
    }

    pub fn as_bytes(&self) -> &[u8; ETH_ADDRESS_BYTES] {
        &self.0
    }
}

impl fmt::Display for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EthAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl FromStr for EthAddress {
    type Err = EthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s.strip_prefix("0x").unwrap_or(s);
        if hex.len() != 2 * ETH_ADDRESS_BYTES {
            return Err(EthError::InvalidAddress);
        }
        let mut bytes = [0u8; ETH_ADDRESS_BYTES];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[2 * i..2 * i + 2], 16)
                .map_err(|_| EthError::InvalidAddress)?;
        }
        Ok(Self(bytes))
    }
}

/// A secp256k1 signing key with its derived Ethereum address.
pub struct EthKeypair {
    secret: libsecp256k1::SecretKey,
    pub address: EthAddress,
}

impl EthKeypair {
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Result<Self, EthError> {
        let secret =
            libsecp256k1::SecretKey::parse(secret).map_err(|_| EthError::InvalidSecret)?;
        let public = libsecp256k1::PublicKey::from_secret_key(&secret);
        Ok(Self {
            secret,
            address: EthAddress::from_public_key(&public),
        })
    }
}

/// Derives the Ethereum address for an arbitrary 32-byte secret, without
/// retaining the signing half.
pub fn eth_address_of_secret(secret: &[u8; 32]) -> Result<EthAddress, EthError> {
    Ok(EthKeypair::from_secret_bytes(secret)?.address)
}

/// Offsets a 32-byte big-endian secret by an integer, with carry.
///
/// Disjoint index ranges over the same base therefore yield disjoint
/// users, letting concurrent runs avoid nonce collisions.
pub fn derive_user_secret(base: &[u8; 32], index: u64) -> [u8; 32] {
    let mut out = *base;
    let mut carry = index as u128;
    for byte in out.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let sum = *byte as u128 + (carry & 0xff);
        *byte = (sum & 0xff) as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
    out
}

/// An unsigned legacy transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: EthAddress,
    pub value: u128,
    pub data: Vec<u8>,
}

/// A signed legacy transaction with its EIP-155 signature fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub tx: LegacyTransaction,
    pub v: u64,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

fn encode_fields(fields: &[&dyn Encodable], out: &mut Vec<u8>) {
    let payload_length = fields.iter().map(|f| f.length()).sum();
    Header {
        list: true,
        payload_length,
    }
    .encode(out);
    for field in fields {
        field.encode(out);
    }
}

impl LegacyTransaction {
    /// The EIP-155 signing hash: keccak of the nine-field RLP with the
    /// chain id and two empty placeholders in the signature positions.
    fn signature_hash(&self, chain_id: u64) -> [u8; 32] {
        let mut rlp = Vec::with_capacity(128);
        encode_fields(
            &[
                &self.nonce,
                &self.gas_price,
                &self.gas_limit,
                &&self.to.0[..],
                &self.value,
                &&self.data[..],
                &chain_id,
                &0u64,
                &0u64,
            ],
            &mut rlp,
        );
        Keccak256::digest(&rlp).into()
    }

    /// Signs the transaction under `chain_id`, folding the recovery parity
    /// into `v = chain_id * 2 + 35 + parity`.
    pub fn sign(self, keypair: &EthKeypair, chain_id: u64) -> SignedTransaction {
        let hash = self.signature_hash(chain_id);
        let message = libsecp256k1::Message::parse(&hash);
        let (signature, recovery_id) = libsecp256k1::sign(&message, &keypair.secret);
        let serialized = signature.serialize();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&serialized[..32]);
        s.copy_from_slice(&serialized[32..]);
        SignedTransaction {
            tx: self,
            v: chain_id * 2 + 35 + recovery_id.serialize() as u64,
            r,
            s,
        }
    }
}

impl SignedTransaction {
    /// Raw RLP bytes of the nine-field signed transaction.
    pub fn rlp_bytes(&self) -> Vec<u8> {
        let mut rlp = Vec::with_capacity(128);
        encode_fields(
            &[
                &self.tx.nonce,
                &self.tx.gas_price,
                &self.tx.gas_limit,
                &&self.tx.to.0[..],
                &self.tx.value,
                &&self.tx.data[..],
                &self.v,
                &trim_leading_zeros(&self.r),
                &trim_leading_zeros(&self.s),
            ],
            &mut rlp,
        );
        rlp
    }

    /// keccak of the raw RLP bytes.
    pub fn hash(&self) -> [u8; 32] {
        Keccak256::digest(&self.rlp_bytes()).into()
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, EthError> {
        let buf = &mut buf;
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(EthError::Rlp(alloy_rlp::Error::UnexpectedString));
        }
        let nonce = u64::decode(buf)?;
        let gas_price = u128::decode(buf)?;
        let gas_limit = u64::decode(buf)?;
        let to = EthAddress(<[u8; ETH_ADDRESS_BYTES]>::decode(buf)?);
        let value = u128::decode(buf)?;
        let data = Vec::<u8>::from(alloy_rlp::Bytes::decode(buf)?.as_ref());
        let v = u64::decode(buf)?;
        let r = decode_word(buf)?;
        let s = decode_word(buf)?;
        Ok(Self {
            tx: LegacyTransaction {
                nonce,
                gas_price,
                gas_limit,
                to,
                value,
                data,
            },
            v,
            r,
            s,
        })
    }

    /// Recovers the sender address from the signature fields.
    pub fn recover_sender(&self, chain_id: u64) -> Result<EthAddress, EthError> {
        let parity = self
            .v
            .checked_sub(chain_id * 2 + 35)
            .filter(|p| *p < 2)
            .ok_or(EthError::InvalidSignature)?;
        let recovery_id =
            libsecp256k1::RecoveryId::parse(parity as u8).map_err(|_| EthError::InvalidSignature)?;
        let mut serialized = [0u8; 64];
        serialized[..32].copy_from_slice(&self.r);
        serialized[32..].copy_from_slice(&self.s);
        let signature = libsecp256k1::Signature::parse_standard(&serialized)
            .map_err(|_| EthError::InvalidSignature)?;
        let hash = self.tx.signature_hash(chain_id);
        let public = libsecp256k1::recover(
            &libsecp256k1::Message::parse(&hash),
            &signature,
            &recovery_id,
        )
        .map_err(|_| EthError::InvalidSignature)?;
        Ok(EthAddress::from_public_key(&public))
    }
}

fn decode_word(buf: &mut &[u8]) -> Result<[u8; 32], EthError> {
    let bytes = alloy_rlp::Bytes::decode(buf)?;
    if bytes.len() > 32 {
        return Err(EthError::Rlp(alloy_rlp::Error::Overflow));
    }
    let mut word = [0u8; 32];
    word[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(word)
}
