/// Validator BLS key registry
/// 
/// One BLS key per validator and one validator per BLS key, both admitted
/// only with a valid proof-of-possession. Kept as two column families
/// (address -> key, key -> address) written in the same batch.
///
/// Also holds the validator BLS set of each epoch, snapshotted when the
/// epoch begins so past checkpoints stay verifiable after keys change.

pub mod genesis;
pub mod pop;

use crate::crypto::{BLSPublicKey, Ed25519PublicKey};
use crate::epoch::{ValidatorAddress, ValidatorWithBlsKeySet};
use crate::storage::{
    encode, epoch_key, Storage, StorageError, CF_BLS_KEYS, CF_BLS_KEY_SET, CF_VAL_BLS_SET,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

pub use genesis::{GenesisKey, GenesisState};
pub use pop::{BlsKey, ProofOfPossession};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("invalid proof-of-possession for validator {0}")]
    InvalidPoP(ValidatorAddress),

    #[error("validator {0} already registered a BLS key")]
    AlreadyRegistered(ValidatorAddress),

    #[error("BLS key {key} is already registered by validator {owner}")]
    KeyInUse { key: BLSPublicKey, owner: ValidatorAddress },

    #[error("no BLS key registered for validator {0}")]
    NotFound(ValidatorAddress),

    #[error("duplicate genesis key for validator {0}")]
    DuplicateGenesisKey(ValidatorAddress),

    #[error("no validator BLS set stored for epoch {0}")]
    BlsSetNotFound(u64),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Persistent BLS key registry
pub struct BlsRegistry {
    storage: Arc<Storage>,
}

impl BlsRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Register `bls_pub_key` for `val_address`
    pub fn register(
        &self,
        bls_pub_key: &BLSPublicKey,
        pop: &ProofOfPossession,
        val_address: &ValidatorAddress,
        val_pub_key: &Ed25519PublicKey,
    ) -> Result<()> {
        self.check_registration(bls_pub_key, pop, val_address, val_pub_key)?;

        self.storage.batch_write(|s, batch| {
            batch.put_cf(s.get_cf(CF_BLS_KEYS)?, val_address.as_bytes(), encode(bls_pub_key)?);
            batch.put_cf(s.get_cf(CF_BLS_KEY_SET)?, bls_pub_key.as_bytes(), encode(val_address)?);
            Ok(())
        })?;

        info!(validator = %val_address, bls_key = %bls_pub_key, "Registered BLS key");
        Ok(())
    }

    fn check_registration(
        &self,
        bls_pub_key: &BLSPublicKey,
        pop: &ProofOfPossession,
        val_address: &ValidatorAddress,
        val_pub_key: &Ed25519PublicKey,
    ) -> Result<()> {
        if !pop.is_valid(bls_pub_key, val_pub_key) {
            warn!(validator = %val_address, "Rejected BLS key with invalid proof-of-possession");
            return Err(RegistryError::InvalidPoP(*val_address));
        }
        if self.exists(val_address)? {
            return Err(RegistryError::AlreadyRegistered(*val_address));
        }
        if let Some(owner) = self.address_by_key(bls_pub_key)? {
            return Err(RegistryError::KeyInUse { key: *bls_pub_key, owner });
        }
        Ok(())
    }

    /// Register every genesis key in one batch; nothing is written unless
    /// all of them are accepted
    pub fn register_genesis(&self, genesis: &GenesisState) -> Result<()> {
        genesis.validate()?;
        for key in &genesis.genesis_keys {
            self.check_registration(
                &key.bls_key.pubkey,
                &key.bls_key.pop,
                &key.validator_address,
                &key.val_pubkey,
            )?;
        }

        self.storage.batch_write(|s, batch| {
            for key in &genesis.genesis_keys {
                let (address, pubkey) = (&key.validator_address, &key.bls_key.pubkey);
                batch.put_cf(s.get_cf(CF_BLS_KEYS)?, address.as_bytes(), encode(pubkey)?);
                batch.put_cf(s.get_cf(CF_BLS_KEY_SET)?, pubkey.as_bytes(), encode(address)?);
            }
            Ok(())
        })?;

        info!(keys = genesis.genesis_keys.len(), "Registered genesis BLS keys");
        Ok(())
    }

    /// BLS key of `address`, or `NotFound`
    pub fn lookup(&self, address: &ValidatorAddress) -> Result<BLSPublicKey> {
        self.storage
            .get_value(CF_BLS_KEYS, address.as_bytes())?
            .ok_or(RegistryError::NotFound(*address))
    }

    /// Validator that registered `key`, if any
    pub fn address_by_key(&self, key: &BLSPublicKey) -> Result<Option<ValidatorAddress>> {
        Ok(self.storage.get_value(CF_BLS_KEY_SET, key.as_bytes())?)
    }

    pub fn exists(&self, address: &ValidatorAddress) -> Result<bool> {
        Ok(self.storage.contains(CF_BLS_KEYS, address.as_bytes())?)
    }

    /// Delete both mappings of `address`
    pub fn remove(&self, address: &ValidatorAddress) -> Result<()> {
        let key = self.lookup(address)?;
        self.storage.batch_write(|s, batch| {
            batch.delete_cf(s.get_cf(CF_BLS_KEYS)?, address.as_bytes());
            batch.delete_cf(s.get_cf(CF_BLS_KEY_SET)?, key.as_bytes());
            Ok(())
        })?;
        info!(validator = %address, "Removed BLS key");
        Ok(())
    }

    /// Store the validator BLS set of `epoch`, replacing any earlier one
    pub fn save_validator_bls_set(&self, epoch: u64, set: &ValidatorWithBlsKeySet) -> Result<()> {
        self.storage.put(CF_VAL_BLS_SET, &epoch_key(epoch), &encode(set)?)?;
        Ok(())
    }

    /// Validator BLS set snapshotted for `epoch`
    pub fn validator_bls_set(&self, epoch: u64) -> Result<ValidatorWithBlsKeySet> {
        self.storage
            .get_value(CF_VAL_BLS_SET, &epoch_key(epoch))?
            .ok_or(RegistryError::BlsSetNotFound(epoch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BLSKeyPair, Ed25519SecretKey};

    struct Registrant {
        address: ValidatorAddress,
        val_sk: Ed25519SecretKey,
        bls: BLSKeyPair,
    }

    impl Registrant {
        fn new(b: u8) -> Self {
            Self {
                address: ValidatorAddress::new([b; 20]),
                val_sk: Ed25519SecretKey::generate(),
                bls: BLSKeyPair::generate(),
            }
        }

        fn pop(&self) -> ProofOfPossession {
            ProofOfPossession::build(&self.val_sk, &self.bls.secret_key)
        }

        fn register(&self, registry: &BlsRegistry) -> Result<()> {
            registry.register(&self.bls.public_key, &self.pop(), &self.address, &self.val_sk.public_key())
        }
    }

    fn registry() -> BlsRegistry {
        BlsRegistry::new(Arc::new(Storage::new_temp().unwrap()))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        let alice = Registrant::new(1);

        alice.register(&registry).unwrap();
        assert_eq!(registry.lookup(&alice.address).unwrap(), alice.bls.public_key);
        assert_eq!(registry.address_by_key(&alice.bls.public_key).unwrap(), Some(alice.address));
        assert!(registry.exists(&alice.address).unwrap());
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = registry();
        let addr = ValidatorAddress::new([9; 20]);
        assert!(matches!(registry.lookup(&addr), Err(RegistryError::NotFound(a)) if a == addr));
        assert!(!registry.exists(&addr).unwrap());
    }

    #[test]
    fn test_invalid_pop_rejected() {
        let registry = registry();
        let alice = Registrant::new(1);
        let other_bls = BLSKeyPair::generate();

        let err = registry
            .register(&other_bls.public_key, &alice.pop(), &alice.address, &alice.val_sk.public_key())
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidPoP(_)));
        assert!(!registry.exists(&alice.address).unwrap());
    }

    #[test]
    fn test_second_registration_rejected() {
        let registry = registry();
        let alice = Registrant::new(1);
        alice.register(&registry).unwrap();

        let mut again = Registrant::new(1);
        again.val_sk = alice.val_sk.clone();
        let err = again.register(&registry).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(_)));
        assert_eq!(registry.lookup(&alice.address).unwrap(), alice.bls.public_key);
    }

    #[test]
    fn test_key_in_use_rejected() {
        let registry = registry();
        let alice = Registrant::new(1);
        alice.register(&registry).unwrap();

        // bob proves possession of alice's BLS secret under his own consensus key
        let bob = Registrant {
            address: ValidatorAddress::new([2; 20]),
            val_sk: Ed25519SecretKey::generate(),
            bls: alice.bls.clone(),
        };
        let err = bob.register(&registry).unwrap_err();
        assert!(matches!(err, RegistryError::KeyInUse { owner, .. } if owner == alice.address));
    }

    #[test]
    fn test_remove() {
        let registry = registry();
        let alice = Registrant::new(1);
        alice.register(&registry).unwrap();

        registry.remove(&alice.address).unwrap();
        assert!(!registry.exists(&alice.address).unwrap());
        assert!(registry.address_by_key(&alice.bls.public_key).unwrap().is_none());
        assert!(matches!(registry.remove(&alice.address), Err(RegistryError::NotFound(_))));

        // the key can be registered again once removed
        alice.register(&registry).unwrap();
    }
}
