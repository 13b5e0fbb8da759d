/// Ed25519 signatures for validator consensus keys
/// 
/// Consensus keys sign the validator's side of the proof-of-possession and
/// the engine's canonical vote-extension bytes.

use ed25519_dalek::{
    Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const ED25519_PUBLIC_KEY_SIZE: usize = 32;
pub const ED25519_SECRET_KEY_SIZE: usize = 32;
pub const ED25519_SIGNATURE_SIZE: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Ed25519Error {
    #[error("Invalid key")]
    InvalidKey,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

/// Ed25519 secret key
#[derive(Clone)]
pub struct Ed25519SecretKey {
    inner: SigningKey,
}

impl Ed25519SecretKey {
    /// Generate a new random secret key
    pub fn generate() -> Self {
        let inner = SigningKey::generate(&mut rand::rngs::OsRng);
        Self { inner }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Ed25519Error> {
        let raw: [u8; ED25519_SECRET_KEY_SIZE] = bytes.try_into().map_err(|_| {
            Ed25519Error::InvalidLength { expected: ED25519_SECRET_KEY_SIZE, got: bytes.len() }
        })?;
        Ok(Self { inner: SigningKey::from_bytes(&raw) })
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; ED25519_SECRET_KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.inner.verifying_key().to_bytes())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.inner.sign(message).to_bytes())
    }
}

impl fmt::Debug for Ed25519SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519SecretKey(..)")
    }
}

/// Ed25519 public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ed25519PublicKey([u8; ED25519_PUBLIC_KEY_SIZE]);

impl Ed25519PublicKey {
    /// Create from raw bytes, rejecting encodings that are not curve points
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Ed25519Error> {
        let raw: [u8; ED25519_PUBLIC_KEY_SIZE] = bytes.try_into().map_err(|_| {
            Ed25519Error::InvalidLength { expected: ED25519_PUBLIC_KEY_SIZE, got: bytes.len() }
        })?;
        VerifyingKey::from_bytes(&raw).map_err(|_| Ed25519Error::InvalidKey)?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; ED25519_PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Verify a signature over `message`
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> bool {
        let key = match VerifyingKey::from_bytes(&self.0) {
            Ok(key) => key,
            Err(_) => return false,
        };
        let sig = DalekSignature::from_bytes(&signature.0);
        key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for Ed25519PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519PublicKey({})", hex::encode(self.0))
    }
}

/// Ed25519 signature
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ed25519Signature([u8; ED25519_SIGNATURE_SIZE]);

impl Ed25519Signature {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Ed25519Error> {
        let raw: [u8; ED25519_SIGNATURE_SIZE] = bytes.try_into().map_err(|_| {
            Ed25519Error::InvalidLength { expected: ED25519_SIGNATURE_SIZE, got: bytes.len() }
        })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; ED25519_SIGNATURE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Ed25519Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ed25519Signature({})", hex::encode(&self.0[..8]))
    }
}

impl_bytes_serde!(Ed25519Signature, "a 64-byte Ed25519 signature");

/// Sign a message with a consensus key
pub fn sign(secret_key: &Ed25519SecretKey, message: &[u8]) -> Ed25519Signature {
    secret_key.sign(message)
}

/// Verify a consensus-key signature
pub fn verify(public_key: &Ed25519PublicKey, message: &[u8], signature: &Ed25519Signature) -> bool {
    public_key.verify(message, signature)
}
