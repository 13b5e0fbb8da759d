/// Genesis BLS keys

use super::pop::BlsKey;
use super::{RegistryError, Result};
use crate::crypto::Ed25519PublicKey;
use crate::epoch::ValidatorAddress;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// BLS key of a genesis validator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisKey {
    pub validator_address: ValidatorAddress,
    pub bls_key: BlsKey,
    pub val_pubkey: Ed25519PublicKey,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisState {
    pub genesis_keys: Vec<GenesisKey>,
}

impl GenesisState {
    pub fn new(genesis_keys: Vec<GenesisKey>) -> Self {
        Self { genesis_keys }
    }

    /// No duplicate validators, no BLS key claimed twice, and every
    /// proof-of-possession valid
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let mut owners = HashMap::new();
        for key in &self.genesis_keys {
            if !seen.insert(key.validator_address) {
                return Err(RegistryError::DuplicateGenesisKey(key.validator_address));
            }
            if let Some(owner) = owners.insert(key.bls_key.pubkey, key.validator_address) {
                return Err(RegistryError::KeyInUse { key: key.bls_key.pubkey, owner });
            }
            if !key.bls_key.is_valid(&key.val_pubkey) {
                return Err(RegistryError::InvalidPoP(key.validator_address));
            }
        }
        Ok(())
    }
}
