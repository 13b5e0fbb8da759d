/// Epoch and validator-set types
/// 
/// Consumed from the epoch provider, never mutated here.

use crate::checkpoint::types::Bitmap;
use crate::crypto::BLSPublicKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const ADDRESS_SIZE: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidatorSetError {
    #[error("validator {0} does not exist in the validator set")]
    ValidatorNotFound(ValidatorAddress),

    #[error("bitmap ({bits} bits) is not large enough to contain the validator set with size {set_size}")]
    BitmapTooSmall { bits: usize, set_size: usize },

    #[error("invalid address length: {0}")]
    InvalidAddressLength(usize),
}

/// Validator operator address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct ValidatorAddress([u8; ADDRESS_SIZE]);

impl ValidatorAddress {
    pub fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, ValidatorSetError> {
        let bytes: [u8; ADDRESS_SIZE] = slice
            .try_into()
            .map_err(|_| ValidatorSetError::InvalidAddressLength(slice.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }
}

impl fmt::Display for ValidatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ValidatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValidatorAddress({})", hex::encode(self.0))
    }
}

/// Epoch boundaries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub epoch_number: u64,
    pub current_epoch_interval: u64,
    pub first_block_height: u64,
}

impl Epoch {
    pub fn new(epoch_number: u64, current_epoch_interval: u64, first_block_height: u64) -> Self {
        Self {
            epoch_number,
            current_epoch_interval,
            first_block_height,
        }
    }

    /// Last block height of this epoch (epoch 0 only contains genesis)
    pub fn last_block_height(&self) -> u64 {
        if self.epoch_number == 0 {
            return 0;
        }
        self.first_block_height
            .saturating_add(self.current_epoch_interval)
            .saturating_sub(1)
    }

    /// Whether `height` opens this epoch; the epoch's validator BLS set is
    /// snapshotted here
    pub fn is_first_block(&self, height: u64) -> bool {
        self.first_block_height == height
    }

    /// Whether `height` is the last block of this epoch, where BLS vote
    /// extensions are produced
    pub fn is_last_block_by_height(&self, height: u64) -> bool {
        self.epoch_number > 0 && self.last_block_height() == height
    }

    /// Whether `height` is the first block after this epoch, where the
    /// epoch's vote extensions are aggregated into its checkpoint.
    ///
    /// The epoch provider still reports this epoch while that block is
    /// being proposed and processed. No BLS signatures exist for epoch 0.
    pub fn is_vote_extension_proposal(&self, height: u64) -> bool {
        self.epoch_number > 0 && self.last_block_height() + 1 == height
    }

    pub fn within_boundary(&self, height: u64) -> bool {
        height >= self.first_block_height && height <= self.last_block_height()
    }
}

/// A validator and its voting power for one epoch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: ValidatorAddress,
    pub power: u64,
}

/// Validator set of an epoch, sorted ascending by address.
///
/// Ordinal positions are bitmap positions in the epoch's checkpoint and
/// must be identical on every replica.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet(Vec<Validator>);

impl ValidatorSet {
    /// Build a validator set, sorting by address
    pub fn new(mut validators: Vec<Validator>) -> Self {
        validators.sort_by(|a, b| a.address.cmp(&b.address));
        validators.dedup_by(|a, b| a.address == b.address);
        Self(validators)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Validator> {
        self.0.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Validator> {
        self.0.get(index)
    }

    /// Find a validator and its ordinal by address
    pub fn find_validator_with_index(
        &self,
        address: &ValidatorAddress,
    ) -> Result<(&Validator, usize), ValidatorSetError> {
        self.0
            .binary_search_by(|v| v.address.cmp(address))
            .map(|index| (&self.0[index], index))
            .map_err(|_| ValidatorSetError::ValidatorNotFound(*address))
    }

    /// Validators whose bit is set in `bitmap`
    pub fn find_subset(&self, bitmap: &Bitmap) -> Result<Vec<Validator>, ValidatorSetError> {
        if bitmap.len() < self.0.len() {
            return Err(ValidatorSetError::BitmapTooSmall {
                bits: bitmap.len(),
                set_size: self.0.len(),
            });
        }
        // iterate over the set, not the bitmap: trailing padding bits
        // have no validator behind them
        Ok(self
            .0
            .iter()
            .enumerate()
            .filter(|(i, _)| bitmap.get(*i))
            .map(|(_, v)| *v)
            .collect())
    }

    pub fn total_power(&self) -> u64 {
        self.0.iter().fold(0u64, |sum, v| sum.saturating_add(v.power))
    }
}

impl<'a> IntoIterator for &'a ValidatorSet {
    type Item = &'a Validator;
    type IntoIter = std::slice::Iter<'a, Validator>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Validator with its registered BLS key, in validator-set order
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorWithBlsKey {
    pub validator_address: ValidatorAddress,
    pub bls_pub_key: BLSPublicKey,
    pub voting_power: u64,
}

/// Validator set of an epoch with BLS keys, as snapshotted when the epoch
/// began. Same order as the epoch's `ValidatorSet`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorWithBlsKeySet(Vec<ValidatorWithBlsKey>);

impl ValidatorWithBlsKeySet {
    pub fn new(validators: Vec<ValidatorWithBlsKey>) -> Self {
        Self(validators)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ValidatorWithBlsKey> {
        self.0.iter()
    }

    pub fn total_power(&self) -> u64 {
        self.0.iter().fold(0u64, |sum, v| sum.saturating_add(v.voting_power))
    }

    /// Validators whose bit is set in `bitmap`, with their summed power
    pub fn find_subset_with_power_sum(
        &self,
        bitmap: &Bitmap,
    ) -> Result<(Vec<&ValidatorWithBlsKey>, u64), ValidatorSetError> {
        if bitmap.len() < self.0.len() {
            return Err(ValidatorSetError::BitmapTooSmall {
                bits: bitmap.len(),
                set_size: self.0.len(),
            });
        }
        let subset: Vec<_> = self
            .0
            .iter()
            .enumerate()
            .filter(|(i, _)| bitmap.get(*i))
            .map(|(_, v)| v)
            .collect();
        let power_sum = subset.iter().fold(0u64, |sum, v| sum.saturating_add(v.voting_power));
        Ok((subset, power_sum))
    }
}
