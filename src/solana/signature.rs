//! Ed25519 keypairs and signatures.

use crate::solana::pubkey::Pubkey;
use ed25519_dalek::Signer as DalekSigner;
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const SIGNATURE_BYTES: usize = 64;

#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Signature([u8; SIGNATURE_BYTES]);

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; SIGNATURE_BYTES])
    }
}

impl Signature {
    pub fn new(signature_slice: &[u8]) -> Self {
        Self(<[u8; SIGNATURE_BYTES]>::try_from(signature_slice).expect("slice must be 64 bytes"))
    }
}

impl AsRef<[u8]> for Signature {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0[..].as_ref()).into_string())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0[..].as_ref()).into_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseSignatureError {
    #[error("string decoded to wrong size for signature")]
    WrongSize,
    #[error("failed to decode string to signature")]
    Invalid,
}

impl FromStr for Signature {
    type Err = ParseSignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| ParseSignatureError::Invalid)?;
        if bytes.len() != SIGNATURE_BYTES {
            Err(ParseSignatureError::WrongSize)
        } else {
            Ok(Signature::new(&bytes))
        }
    }
}

/// Produces Solana signatures for an account it controls.
///
/// The signing role is deliberately separate from the plain [`Pubkey`]
/// address type; holders of a `Pubkey` cannot sign.
pub trait Signer {
    fn pubkey(&self) -> Pubkey;
    fn sign_message(&self, message: &[u8]) -> Signature;
}

pub struct Keypair(ed25519_dalek::Keypair);

impl Keypair {
    /// Constructs a keypair from the first 32 bytes of `seed`.
    pub fn from_seed(seed: &[u8]) -> Result<Self, ed25519_dalek::SignatureError> {
        let secret = ed25519_dalek::SecretKey::from_bytes(
            seed.get(..ed25519_dalek::SECRET_KEY_LENGTH)
                .ok_or_else(ed25519_dalek::SignatureError::new)?,
        )?;
        let public = ed25519_dalek::PublicKey::from(&secret);
        Ok(Self(ed25519_dalek::Keypair { secret, public }))
    }
}

// only the public half; the secret never reaches log output
impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Keypair({})", self.pubkey())
    }
}

impl Signer for Keypair {
    fn pubkey(&self) -> Pubkey {
        Pubkey::new(self.0.public.as_ref())
    }

    fn sign_message(&self, message: &[u8]) -> Signature {
        Signature::new(&self.0.sign(message).to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_from_seed() {
        let seed = [1u8; 32];
        let keypair = Keypair::from_seed(&seed).unwrap();
        assert_ne!(keypair.pubkey(), Pubkey::default());

        // same seed, same key; a longer blob only contributes its head
        let mut blob = seed.to_vec();
        blob.extend_from_slice(&[9u8; 32]);
        let keypair2 = Keypair::from_seed(&blob).unwrap();
        assert_eq!(keypair.pubkey(), keypair2.pubkey());

        assert!(Keypair::from_seed(&seed[..31]).is_err());
    }

    #[test]
    fn test_keypair_debug_omits_secret() {
        let keypair = Keypair::from_seed(&[3u8; 32]).unwrap();
        assert_eq!(
            format!("{:?}", keypair),
            format!("Keypair({})", keypair.pubkey())
        );
    }

    #[test]
    fn test_signature_fromstr() {
        let keypair = Keypair::from_seed(&[2u8; 32]).unwrap();
        let signature = keypair.sign_message(b"hello");
        assert_eq!(signature.to_string().parse::<Signature>(), Ok(signature));
    }
}
