use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),
}

/// Reserved sender of mining rewards. Never carries a signature.
pub const REWARD_SENDER: &str = "0";

/// A wallet address: the base58 encoding of an Ed25519 public key,
/// or the reward sentinel `"0"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// The mining-reward sentinel address
    pub fn reward_sender() -> Self {
        Address(REWARD_SENDER.to_string())
    }

    /// Creates an address from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Address(bs58::encode(public_key.as_bytes()).into_string())
    }

    /// Converts the address back to a public key
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = bs58::decode(&self.0)
            .into_vec()
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key length".to_string())
        })?;

        VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn is_reward_sender(&self) -> bool {
        self.0 == REWARD_SENDER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

/// A freshly generated keypair.
///
/// The private key leaves the engine exactly once, through `private_key_hex`,
/// and is never written to storage.
#[derive(Debug, Clone)]
pub struct Keypair {
    signing_key: SigningKey,
    address: Address,
}

impl Keypair {
    /// Generates a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let address = Address::from_public_key(&signing_key.verifying_key());

        Keypair {
            signing_key,
            address,
        }
    }

    /// Restores a keypair from a hex encoded private key
    pub fn from_private_key_hex(private_key: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(private_key.trim())
            .map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?;

        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKeyFormat("Private key must be 32 bytes".to_string())
        })?;

        let signing_key = SigningKey::from_bytes(&bytes);
        let address = Address::from_public_key(&signing_key.verifying_key());

        Ok(Keypair {
            signing_key,
            address,
        })
    }

    /// The public key, which doubles as the wallet address
    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Signs a message and returns the base58 encoded signature
    pub fn sign(&self, message: &[u8]) -> String {
        let signature = self.signing_key.sign(message);
        bs58::encode(signature.to_bytes()).into_string()
    }
}

/// Generates a fresh keypair
pub fn generate_keypair() -> Keypair {
    Keypair::generate()
}

/// Signs `message` with a hex encoded private key
pub fn sign(private_key: &str, message: &[u8]) -> Result<String, CryptoError> {
    let keypair = Keypair::from_private_key_hex(private_key)?;
    Ok(keypair.sign(message))
}

/// Verifies a base58 signature over `message`.
///
/// Any malformed key or signature simply yields `false`.
pub fn verify(public_key: &Address, message: &[u8], signature: &str) -> bool {
    let public_key = match public_key.to_public_key() {
        Ok(key) => key,
        Err(_) => return false,
    };

    let signature_bytes: [u8; 64] = match bs58::decode(signature).into_vec() {
        Ok(bytes) => match bytes.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        },
        Err(_) => return false,
    };

    let signature = Signature::from_bytes(&signature_bytes);
    public_key.verify(message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_generation() {
        let keypair = generate_keypair();
        assert!(!keypair.address().0.is_empty());
        assert_eq!(keypair.private_key_hex().len(), 64);
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = generate_keypair();
        let message = b"Hello, world!";

        let signature = sign(&keypair.private_key_hex(), message).unwrap();
        assert!(verify(keypair.address(), message, &signature));

        // Wrong message
        assert!(!verify(keypair.address(), b"Wrong message", &signature));

        // Wrong key
        let other = generate_keypair();
        assert!(!verify(other.address(), message, &signature));
    }

    #[test]
    fn test_altered_signature_fails() {
        let keypair = generate_keypair();
        let message = b"payload";
        let signature = keypair.sign(message);

        let mut bytes = bs58::decode(&signature).into_vec().unwrap();
        bytes[0] ^= 0x01;
        let tampered = bs58::encode(bytes).into_string();

        assert!(!verify(keypair.address(), message, &tampered));
    }

    #[test]
    fn test_malformed_inputs_do_not_verify() {
        let keypair = generate_keypair();
        let signature = keypair.sign(b"payload");

        assert!(!verify(&Address::from("not-a-key"), b"payload", &signature));
        assert!(!verify(keypair.address(), b"payload", "0OIl"));
        assert!(!verify(keypair.address(), b"payload", ""));
    }

    #[test]
    fn test_invalid_private_key() {
        assert!(matches!(
            sign("zz", b"payload"),
            Err(CryptoError::InvalidKeyFormat(_))
        ));
        assert!(matches!(
            sign("abcd", b"payload"),
            Err(CryptoError::InvalidKeyFormat(_))
        ));
    }

    #[test]
    fn test_restore_from_private_key() {
        let keypair = generate_keypair();
        let restored = Keypair::from_private_key_hex(&keypair.private_key_hex()).unwrap();
        assert_eq!(restored.address(), keypair.address());

        let public_key = keypair.address().to_public_key().unwrap();
        assert_eq!(Address::from_public_key(&public_key), *keypair.address());
    }
}
