/// Epoch and validator-set provider interface
/// 
/// The epoching subsystem is an external collaborator: it decides epoch
/// boundaries, the per-epoch validator set and voting power, and resolves
/// consensus public keys. This module defines what checkpointing needs
/// from it, plus an in-memory implementation for embedding and tests.

pub mod types;

use crate::crypto::Ed25519PublicKey;
use std::collections::HashMap;

pub use types::{
    Epoch, Validator, ValidatorAddress, ValidatorSet, ValidatorSetError, ValidatorWithBlsKey,
    ValidatorWithBlsKeySet, ADDRESS_SIZE,
};

/// What checkpointing consumes from the epoching subsystem
pub trait EpochProvider {
    /// The current epoch
    fn get_epoch(&self) -> Epoch;

    /// The validator set of `epoch_number`, sorted by address
    fn get_validator_set(&self, epoch_number: u64) -> ValidatorSet;

    /// Total voting power of `epoch_number`'s validator set
    fn get_total_voting_power(&self, epoch_number: u64) -> u64 {
        self.get_validator_set(epoch_number).total_power()
    }

    /// Consensus (Ed25519) public key of a validator
    fn get_pub_key_by_address(&self, address: &ValidatorAddress) -> Option<Ed25519PublicKey>;
}

/// In-memory epoch provider
#[derive(Clone, Debug, Default)]
pub struct StaticEpochProvider {
    epoch: Option<Epoch>,
    validator_sets: HashMap<u64, ValidatorSet>,
    consensus_keys: HashMap<ValidatorAddress, Ed25519PublicKey>,
}

impl StaticEpochProvider {
    pub fn new(epoch: Epoch) -> Self {
        Self {
            epoch: Some(epoch),
            ..Default::default()
        }
    }

    pub fn set_epoch(&mut self, epoch: Epoch) {
        self.epoch = Some(epoch);
    }

    pub fn set_validator_set(&mut self, epoch_number: u64, validators: ValidatorSet) {
        self.validator_sets.insert(epoch_number, validators);
    }

    pub fn set_consensus_key(&mut self, address: ValidatorAddress, key: Ed25519PublicKey) {
        self.consensus_keys.insert(address, key);
    }
}

impl EpochProvider for StaticEpochProvider {
    fn get_epoch(&self) -> Epoch {
        self.epoch.unwrap_or(Epoch::new(0, 1, 0))
    }

    fn get_validator_set(&self, epoch_number: u64) -> ValidatorSet {
        self.validator_sets
            .get(&epoch_number)
            .cloned()
            .unwrap_or_default()
    }

    fn get_pub_key_by_address(&self, address: &ValidatorAddress) -> Option<Ed25519PublicKey> {
        self.consensus_keys.get(address).copied()
    }
}
