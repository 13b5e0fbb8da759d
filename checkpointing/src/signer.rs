/// Local BLS signing identity
/// 
/// The vote-extension handler signs through the `BlsSigner` trait; the
/// local implementation keeps the validator address and BLS secret key in
/// memory and persists them as a JSON key file.

use crate::crypto::{BLSError, BLSPublicKey, BLSSecretKey, BLSSignature};
use crate::epoch::{ValidatorAddress, ValidatorSetError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key file parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid BLS key: {0}")]
    Bls(#[from] BLSError),

    #[error("Invalid validator address: {0}")]
    Address(#[from] ValidatorSetError),
}

pub type Result<T> = std::result::Result<T, SignerError>;

/// What the vote-extension handler needs from the local validator
pub trait BlsSigner {
    fn address(&self) -> ValidatorAddress;

    fn sign(&self, msg: &[u8]) -> BLSSignature;

    fn public_key(&self) -> BLSPublicKey;
}

/// On-disk key file layout
#[derive(Serialize, Deserialize)]
struct KeyFile {
    validator_address: String,
    bls_public_key: String,
    bls_secret_key: String,
}

/// In-memory BLS signer
#[derive(Clone, Debug)]
pub struct LocalBlsSigner {
    address: ValidatorAddress,
    secret_key: BLSSecretKey,
    public_key: BLSPublicKey,
}

impl LocalBlsSigner {
    pub fn new(address: ValidatorAddress, secret_key: BLSSecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self { address, secret_key, public_key }
    }

    /// Fresh random BLS key for `address`
    pub fn generate(address: ValidatorAddress) -> Self {
        Self::new(address, BLSSecretKey::generate())
    }

    pub fn secret_key(&self) -> &BLSSecretKey {
        &self.secret_key
    }

    /// Write the key file (overwrites)
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = KeyFile {
            validator_address: hex::encode(self.address.as_bytes()),
            bls_public_key: hex::encode(self.public_key.as_bytes()),
            bls_secret_key: hex::encode(self.secret_key.to_bytes()),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Read a key file written by `save`
    pub fn load(path: &Path) -> Result<Self> {
        let file: KeyFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let address = ValidatorAddress::from_slice(&hex::decode(&file.validator_address)?)?;
        let secret_key = BLSSecretKey::from_bytes(&hex::decode(&file.bls_secret_key)?)?;

        let signer = Self::new(address, secret_key);
        let stored_pk = BLSPublicKey::from_bytes(&hex::decode(&file.bls_public_key)?)?;
        if stored_pk != signer.public_key {
            return Err(SignerError::Bls(BLSError::InvalidKey));
        }
        Ok(signer)
    }

    /// Load the key file, or create one for `address` if it does not exist
    pub fn load_or_generate(path: &Path, address: ValidatorAddress) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }
        let signer = Self::generate(address);
        signer.save(path)?;
        info!(path = %path.display(), validator = %address, "Generated new BLS key");
        Ok(signer)
    }
}

impl BlsSigner for LocalBlsSigner {
    fn address(&self) -> ValidatorAddress {
        self.address
    }

    fn sign(&self, msg: &[u8]) -> BLSSignature {
        self.secret_key.sign(msg)
    }

    fn public_key(&self) -> BLSPublicKey {
        self.public_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verifies_under_public_key() {
        let signer = LocalBlsSigner::generate(ValidatorAddress::new([1; 20]));
        let sig = signer.sign(b"epoch message");
        assert!(sig.verify(&signer.public_key(), b"epoch message"));
        assert_eq!(signer.address(), ValidatorAddress::new([1; 20]));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("bls_key.json");

        let signer = LocalBlsSigner::generate(ValidatorAddress::new([3; 20]));
        signer.save(&path).unwrap();

        let loaded = LocalBlsSigner::load(&path).unwrap();
        assert_eq!(loaded.address(), signer.address());
        assert_eq!(loaded.public_key(), signer.public_key());
    }

    #[test]
    fn test_load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bls_key.json");
        let address = ValidatorAddress::new([4; 20]);

        let first = LocalBlsSigner::load_or_generate(&path, address).unwrap();
        let second = LocalBlsSigner::load_or_generate(&path, address).unwrap();
        assert_eq!(first.public_key(), second.public_key());
    }

    #[test]
    fn test_load_rejects_mismatched_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bls_key.json");

        let signer = LocalBlsSigner::generate(ValidatorAddress::new([5; 20]));
        let other = LocalBlsSigner::generate(ValidatorAddress::new([5; 20]));
        let file = KeyFile {
            validator_address: hex::encode(signer.address().as_bytes()),
            bls_public_key: hex::encode(other.public_key().as_bytes()),
            bls_secret_key: hex::encode(signer.secret_key().to_bytes()),
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        assert!(LocalBlsSigner::load(&path).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            LocalBlsSigner::load(&dir.path().join("missing.json")),
            Err(SignerError::Io(_))
        ));
    }
}
