/// Checkpoint storage and lifecycle
/// 
/// Provides:
/// - One checkpoint per epoch, keyed by big-endian epoch number
/// - Single-step status transitions with hash-conflict detection
/// - Tip / last-confirmed / last-finalized epoch bookkeeping
/// - Status queries over the most recent epochs

pub mod accumulator;
pub mod types;

use crate::crypto::{BLSError, Hash};
use crate::epoch::{ValidatorAddress, ValidatorSetError};
use crate::registry::RegistryError;
use crate::storage::{
    encode, epoch_key, Storage, StorageError, CF_CHECKPOINTS, KEY_LAST_CONFIRMED_EPOCH,
    KEY_LAST_FINALIZED_EPOCH, KEY_TIP_EPOCH,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

pub use accumulator::exceeds_two_thirds;
pub use types::{
    get_sign_bytes, Bitmap, BlockHash, BlsSig, CheckpointStateUpdate, CheckpointStatus,
    EpochStatusCount, RawCheckpoint, RawCheckpointWithMeta,
};

/// Checkpoint errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("BLS error: {0}")]
    BlsError(#[from] BLSError),

    #[error("Registry error: {0}")]
    RegistryError(#[from] RegistryError),

    #[error("Validator set error: {0}")]
    ValidatorSetError(ValidatorSetError),

    #[error("raw checkpoint for epoch {0} already exists")]
    AlreadyExists(u64),

    #[error("raw checkpoint for epoch {0} does not exist")]
    NotFound(u64),

    #[error("no checkpoint with status {0} or later")]
    NoCheckpointWithStatus(CheckpointStatus),

    #[error("hash of the stored checkpoint for epoch {epoch} does not match ({stored} != {given})")]
    HashConflict { epoch: u64, stored: Hash, given: Hash },

    #[error("checkpoint for epoch {epoch} is {status}, not accumulating BLS signatures")]
    NotAccumulating { epoch: u64, status: CheckpointStatus },

    #[error("validator {0} is not in the epoch's validator set")]
    ValidatorNotFound(ValidatorAddress),

    #[error("validator {address} already voted for epoch {epoch}")]
    AlreadyVoted { epoch: u64, address: ValidatorAddress },

    #[error("invalid BLS signature from {address} for epoch {epoch}")]
    InvalidBlsSignature { epoch: u64, address: ValidatorAddress },

    #[error("checkpoint for epoch {epoch} has status {actual}, expected {expected}")]
    InvalidStatus {
        epoch: u64,
        expected: CheckpointStatus,
        actual: CheckpointStatus,
    },

    #[error("invalid raw checkpoint: {0}")]
    InvalidRawCheckpoint(String),

    #[error("insufficient voting power: {power_sum} of {total_power}")]
    InsufficientVotingPower { power_sum: u64, total_power: u64 },

    #[error("conflicting checkpoint for epoch {epoch}: {ours} != {theirs}")]
    ConflictingCheckpoint {
        epoch: u64,
        ours: BlockHash,
        theirs: BlockHash,
    },
}

impl CheckpointError {
    /// Errors after which the replica must stop rather than carry on
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CheckpointError::HashConflict { .. } | CheckpointError::ConflictingCheckpoint { .. }
        )
    }
}

impl From<ValidatorSetError> for CheckpointError {
    fn from(err: ValidatorSetError) -> Self {
        match err {
            ValidatorSetError::ValidatorNotFound(address) => CheckpointError::ValidatorNotFound(address),
            other => CheckpointError::ValidatorSetError(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Whether `from -> to` is a transition the lifecycle allows.
///
/// `Submitted -> Sealed` is the rollback taken when a submission is
/// forgotten on the Bitcoin side.
pub fn is_valid_transition(from: CheckpointStatus, to: CheckpointStatus) -> bool {
    use CheckpointStatus::*;
    matches!(
        (from, to),
        (Accumulating, Sealed)
            | (Sealed, Submitted)
            | (Submitted, Confirmed)
            | (Confirmed, Finalized)
            | (Submitted, Sealed)
    )
}

/// Persistent checkpoint store
pub struct CheckpointStore {
    storage: Arc<Storage>,
    /// Bitmap width of newly created checkpoints
    bitmap_bits: usize,
}

impl CheckpointStore {
    pub fn new(storage: Arc<Storage>, bitmap_bits: usize) -> Self {
        Self { storage, bitmap_bits }
    }

    /// Create an empty `Accumulating` checkpoint for `epoch`
    pub fn create(
        &self,
        epoch: u64,
        block_hash: BlockHash,
        height: u64,
        time: u64,
    ) -> Result<RawCheckpointWithMeta> {
        if self.exists(epoch)? {
            return Err(CheckpointError::AlreadyExists(epoch));
        }

        let mut ckpt = RawCheckpointWithMeta::accumulating(epoch, block_hash, self.bitmap_bits);
        ckpt.record_state_update(height, time, CheckpointStatus::Accumulating);
        self.insert(&ckpt)?;

        debug!(epoch, block_hash = %block_hash, "Created raw checkpoint");
        Ok(ckpt)
    }

    /// Insert a fully formed checkpoint
    pub fn add(&self, ckpt: &RawCheckpointWithMeta) -> Result<()> {
        if self.exists(ckpt.epoch())? {
            return Err(CheckpointError::AlreadyExists(ckpt.epoch()));
        }
        self.insert(ckpt)
    }

    fn insert(&self, ckpt: &RawCheckpointWithMeta) -> Result<()> {
        let epoch = ckpt.epoch();
        let tip = self.tip_epoch()?;
        self.storage.batch_write(|s, batch| {
            batch.put_cf(s.get_cf(CF_CHECKPOINTS)?, epoch_key(epoch), encode(ckpt)?);
            if epoch > tip {
                s.put_meta_u64(batch, KEY_TIP_EPOCH, epoch)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    /// Overwrite an existing checkpoint
    pub fn update(&self, ckpt: &RawCheckpointWithMeta) -> Result<()> {
        let epoch = ckpt.epoch();
        if !self.exists(epoch)? {
            return Err(CheckpointError::NotFound(epoch));
        }
        self.storage
            .put(CF_CHECKPOINTS, &epoch_key(epoch), &encode(ckpt)?)?;
        Ok(())
    }

    pub fn exists(&self, epoch: u64) -> Result<bool> {
        Ok(self.storage.contains(CF_CHECKPOINTS, &epoch_key(epoch))?)
    }

    /// Checkpoint of `epoch`, or `NotFound`
    pub fn get(&self, epoch: u64) -> Result<RawCheckpointWithMeta> {
        self.try_get(epoch)?.ok_or(CheckpointError::NotFound(epoch))
    }

    pub fn try_get(&self, epoch: u64) -> Result<Option<RawCheckpointWithMeta>> {
        Ok(self.storage.get_value(CF_CHECKPOINTS, &epoch_key(epoch))?)
    }

    pub fn get_status(&self, epoch: u64) -> Result<CheckpointStatus> {
        Ok(self.get(epoch)?.status)
    }

    /// Move the checkpoint of `epoch` to `new_status`.
    ///
    /// Returns the updated checkpoint, or `None` when the transition is not
    /// allowed from the stored status (the request is ignored). A stored
    /// checkpoint whose hash differs from `expected_hash` is a fatal
    /// `HashConflict`.
    pub fn advance_status(
        &self,
        epoch: u64,
        new_status: CheckpointStatus,
        expected_hash: &Hash,
        height: u64,
        time: u64,
    ) -> Result<Option<RawCheckpointWithMeta>> {
        let mut ckpt = self.get(epoch)?;

        let stored = ckpt.ckpt.hash();
        if stored != *expected_hash {
            error!(epoch, %stored, given = %expected_hash, "Checkpoint hash conflict");
            return Err(CheckpointError::HashConflict {
                epoch,
                stored,
                given: *expected_hash,
            });
        }

        if !is_valid_transition(ckpt.status, new_status) {
            warn!(
                epoch,
                from = %ckpt.status,
                to = %new_status,
                "Ignoring out-of-order checkpoint status transition"
            );
            return Ok(None);
        }

        ckpt.record_state_update(height, time, new_status);

        let last_confirmed = self.last_confirmed_epoch()?;
        let last_finalized = self.last_finalized_epoch()?;
        self.storage.batch_write(|s, batch| {
            batch.put_cf(s.get_cf(CF_CHECKPOINTS)?, epoch_key(epoch), encode(&ckpt)?);
            match new_status {
                CheckpointStatus::Confirmed if last_confirmed.map_or(true, |last| epoch > last) => {
                    s.put_meta_u64(batch, KEY_LAST_CONFIRMED_EPOCH, epoch)?;
                }
                CheckpointStatus::Finalized if epoch > last_finalized => {
                    s.put_meta_u64(batch, KEY_LAST_FINALIZED_EPOCH, epoch)?;
                }
                _ => {}
            }
            Ok(())
        })?;

        debug!(epoch, status = %new_status, height, "Checkpoint status updated");
        Ok(Some(ckpt))
    }

    /// Checkpoints with `status`, highest epoch first.
    ///
    /// Statuses only move forward with the epoch, so a scan for anything
    /// below `Confirmed` stops at the first epoch already confirmed.
    pub fn list_by_status(&self, status: CheckpointStatus) -> Result<Vec<RawCheckpointWithMeta>> {
        let stop_at_confirmed = status < CheckpointStatus::Confirmed;
        let mut found = Vec::new();

        self.storage
            .for_each_reverse::<RawCheckpointWithMeta, _>(CF_CHECKPOINTS, |_, ckpt| {
                if stop_at_confirmed && ckpt.status >= CheckpointStatus::Confirmed {
                    return false;
                }
                if ckpt.status == status {
                    found.push(ckpt);
                }
                true
            })?;

        Ok(found)
    }

    /// Most recent checkpoint at `status` or further along the lifecycle
    pub fn last_checkpoint_with_status(&self, status: CheckpointStatus) -> Result<RawCheckpoint> {
        let mut found = None;
        self.storage
            .for_each_reverse::<RawCheckpointWithMeta, _>(CF_CHECKPOINTS, |_, ckpt| {
                if ckpt.status >= status {
                    found = Some(ckpt.ckpt);
                    return false;
                }
                true
            })?;
        found.ok_or(CheckpointError::NoCheckpointWithStatus(status))
    }

    /// Count the statuses of the last `epoch_count` epochs up to the tip.
    ///
    /// Epochs that never got a checkpoint are skipped; epoch 0 never has one.
    pub fn recent_epoch_status_count(&self, epoch_count: u64) -> Result<EpochStatusCount> {
        let tip_epoch = self.tip_epoch()?;
        let mut counts = EpochStatusCount {
            tip_epoch,
            epoch_count: 0,
            status_count: BTreeMap::new(),
        };
        if epoch_count == 0 || tip_epoch == 0 {
            return Ok(counts);
        }

        let target = tip_epoch.saturating_add(1).saturating_sub(epoch_count).max(1);
        for epoch in (target..=tip_epoch).rev() {
            if let Some(ckpt) = self.try_get(epoch)? {
                *counts.status_count.entry(ckpt.status).or_insert(0) += 1;
            }
        }
        counts.epoch_count = tip_epoch - target + 1;
        Ok(counts)
    }

    /// Highest epoch with a checkpoint (0 if none)
    pub fn tip_epoch(&self) -> Result<u64> {
        Ok(self.storage.get_meta_u64(KEY_TIP_EPOCH)?.unwrap_or(0))
    }

    pub fn last_confirmed_epoch(&self) -> Result<Option<u64>> {
        Ok(self.storage.get_meta_u64(KEY_LAST_CONFIRMED_EPOCH)?)
    }

    /// Last finalized epoch (0 until anything is finalized)
    pub fn last_finalized_epoch(&self) -> Result<u64> {
        Ok(self.storage.get_meta_u64(KEY_LAST_FINALIZED_EPOCH)?.unwrap_or(0))
    }

    pub fn set_last_finalized_epoch(&self, epoch: u64) -> Result<()> {
        self.storage
            .batch_write(|s, batch| s.put_meta_u64(batch, KEY_LAST_FINALIZED_EPOCH, epoch))?;
        Ok(())
    }
}
