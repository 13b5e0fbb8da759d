/// Checkpointing keeper
/// 
/// Owns the persistent state (checkpoints, BLS registry) and the
/// collaborators around it:
/// - the epoch provider for validator sets and consensus keys
/// - lifecycle observers, fired after every persisted transition
/// - the configuration fixing bitmap width and chain ID

use crate::checkpoint::{
    exceeds_two_thirds, CheckpointError, CheckpointStatus, CheckpointStore, EpochStatusCount,
    RawCheckpoint, RawCheckpointWithMeta,
};
use crate::config::CheckpointingConfig;
use crate::crypto::{verify_multi_sig, BLSPublicKey, Ed25519PublicKey};
use crate::epoch::{EpochProvider, ValidatorAddress, ValidatorWithBlsKey, ValidatorWithBlsKeySet};
use crate::hooks::{CheckpointingHooks, MultiCheckpointingHooks};
use crate::registry::{self, BlsRegistry, GenesisState, ProofOfPossession};
use crate::storage::{Storage, StorageError};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

type Result<T> = std::result::Result<T, CheckpointError>;

/// Checkpointing state and lifecycle operations
pub struct Checkpointing {
    config: CheckpointingConfig,
    checkpoints: CheckpointStore,
    registry: BlsRegistry,
    epoch_provider: Box<dyn EpochProvider>,
    hooks: MultiCheckpointingHooks,
}

impl Checkpointing {
    pub fn new(
        config: CheckpointingConfig,
        storage: Arc<Storage>,
        epoch_provider: Box<dyn EpochProvider>,
        hooks: MultiCheckpointingHooks,
    ) -> Self {
        Self {
            checkpoints: CheckpointStore::new(storage.clone(), config.max_validators),
            registry: BlsRegistry::new(storage),
            config,
            epoch_provider,
            hooks,
        }
    }

    /// Open storage at the configured path, or a temporary database
    pub fn open(
        config: CheckpointingConfig,
        epoch_provider: Box<dyn EpochProvider>,
        hooks: MultiCheckpointingHooks,
    ) -> std::result::Result<Self, StorageError> {
        let storage = match &config.storage_path {
            Some(path) => Storage::new(path)?,
            None => Storage::new_temp()?,
        };
        Ok(Self::new(config, Arc::new(storage), epoch_provider, hooks))
    }

    pub fn config(&self) -> &CheckpointingConfig {
        &self.config
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    pub fn registry(&self) -> &BlsRegistry {
        &self.registry
    }

    pub fn epoch_provider(&self) -> &dyn EpochProvider {
        self.epoch_provider.as_ref()
    }

    pub fn set_epoch_provider(&mut self, epoch_provider: Box<dyn EpochProvider>) {
        self.epoch_provider = epoch_provider;
    }

    pub fn register_hook(&mut self, hook: Box<dyn CheckpointingHooks>) {
        self.hooks.register(hook);
    }

    // ===== BLS key registration =====

    /// Register a validator's BLS key and notify observers
    pub fn create_registration(
        &self,
        bls_pub_key: &BLSPublicKey,
        pop: &ProofOfPossession,
        val_address: &ValidatorAddress,
        val_pub_key: &Ed25519PublicKey,
    ) -> registry::Result<()> {
        self.registry.register(bls_pub_key, pop, val_address, val_pub_key)?;
        self.hooks.after_bls_key_registered(val_address);
        Ok(())
    }

    pub fn remove_bls_key(&self, val_address: &ValidatorAddress) -> registry::Result<()> {
        self.registry.remove(val_address)
    }

    pub fn get_bls_pub_key(&self, val_address: &ValidatorAddress) -> registry::Result<BLSPublicKey> {
        self.registry.lookup(val_address)
    }

    /// Register every genesis key; nothing is written if any key is invalid
    pub fn init_genesis(&self, genesis: &GenesisState) -> Result<()> {
        self.registry.register_genesis(genesis)?;
        self.checkpoints.set_last_finalized_epoch(0)?;
        info!(keys = genesis.genesis_keys.len(), "Initialized checkpointing genesis");
        Ok(())
    }

    /// Per-block entry point; snapshots the validator BLS set when `height`
    /// opens the current epoch
    pub fn begin_block(&self, height: u64) -> Result<()> {
        if self.epoch_provider.get_epoch().is_first_block(height) {
            self.init_validator_bls_set()?;
        }
        Ok(())
    }

    /// Snapshot the current epoch's validators with their BLS keys
    pub fn init_validator_bls_set(&self) -> Result<()> {
        let epoch = self.epoch_provider.get_epoch().epoch_number;
        let set = self
            .epoch_provider
            .get_validator_set(epoch)
            .iter()
            .map(|v| {
                Ok(ValidatorWithBlsKey {
                    validator_address: v.address,
                    bls_pub_key: self.registry.lookup(&v.address)?,
                    voting_power: v.power,
                })
            })
            .collect::<registry::Result<Vec<_>>>()?;

        let set = ValidatorWithBlsKeySet::new(set);
        self.registry.save_validator_bls_set(epoch, &set)?;
        debug!(epoch, validators = set.len(), "Stored validator BLS set");
        Ok(())
    }

    /// Validators of `epoch` with their BLS keys, as of the epoch's start
    pub fn get_validator_bls_set(&self, epoch: u64) -> registry::Result<ValidatorWithBlsKeySet> {
        self.registry.validator_bls_set(epoch)
    }

    // ===== Checkpoint lifecycle =====

    /// Persist a checkpoint that reached quorum during proposal handling
    pub fn seal_checkpoint(&self, ckpt: &RawCheckpointWithMeta, height: u64, time: u64) -> Result<()> {
        let epoch = ckpt.epoch();
        if ckpt.status != CheckpointStatus::Sealed {
            return Err(CheckpointError::InvalidStatus {
                epoch,
                expected: CheckpointStatus::Sealed,
                actual: ckpt.status,
            });
        }

        if let Some(existing) = self.checkpoints.try_get(epoch)? {
            let (stored, given) = (existing.ckpt.hash(), ckpt.ckpt.hash());
            if stored != given {
                error!(epoch, %stored, %given, "Sealed checkpoint conflicts with stored checkpoint");
                return Err(CheckpointError::HashConflict { epoch, stored, given });
            }
            debug!(epoch, "Checkpoint already sealed");
            return Ok(());
        }

        let mut sealed = ckpt.clone();
        sealed.record_state_update(height, time, CheckpointStatus::Sealed);
        self.checkpoints.add(&sealed)?;

        info!(epoch, height, power_sum = sealed.power_sum, "Sealed raw checkpoint");
        self.hooks.after_raw_checkpoint_sealed(epoch);
        Ok(())
    }

    /// Move `epoch` from `from` to `to`; ignored if it is not at `from`
    fn set_checkpoint_status(
        &self,
        epoch: u64,
        from: CheckpointStatus,
        to: CheckpointStatus,
        height: u64,
        time: u64,
    ) -> Result<Option<RawCheckpointWithMeta>> {
        let ckpt = self.checkpoints.get(epoch)?;
        if ckpt.status != from {
            warn!(
                epoch,
                expected = %from,
                actual = %ckpt.status,
                to = %to,
                "Checkpoint is not in the expected status"
            );
            return Ok(None);
        }
        let updated = self
            .checkpoints
            .advance_status(epoch, to, &ckpt.ckpt.hash(), height, time)?;
        if updated.is_some() {
            info!(epoch, from = %from, to = %to, height, "Checkpoint status changed");
        }
        Ok(updated)
    }

    pub fn set_checkpoint_submitted(&self, epoch: u64, height: u64, time: u64) -> Result<()> {
        self.set_checkpoint_status(epoch, CheckpointStatus::Sealed, CheckpointStatus::Submitted, height, time)?;
        Ok(())
    }

    pub fn set_checkpoint_confirmed(&self, epoch: u64, height: u64, time: u64) -> Result<()> {
        let updated = self.set_checkpoint_status(
            epoch,
            CheckpointStatus::Submitted,
            CheckpointStatus::Confirmed,
            height,
            time,
        )?;
        if updated.is_some() {
            self.hooks.after_raw_checkpoint_confirmed(epoch);
        }
        Ok(())
    }

    pub fn set_checkpoint_finalized(&self, epoch: u64, height: u64, time: u64) -> Result<()> {
        let updated = self.set_checkpoint_status(
            epoch,
            CheckpointStatus::Confirmed,
            CheckpointStatus::Finalized,
            height,
            time,
        )?;
        if updated.is_some() {
            self.hooks.after_raw_checkpoint_finalized(epoch);
        }
        Ok(())
    }

    /// Roll a submitted checkpoint back to sealed
    pub fn set_checkpoint_forgotten(&self, epoch: u64, height: u64, time: u64) -> Result<()> {
        let updated = self.set_checkpoint_status(
            epoch,
            CheckpointStatus::Submitted,
            CheckpointStatus::Sealed,
            height,
            time,
        )?;
        if let Some(ckpt) = updated {
            self.hooks.after_raw_checkpoint_forgotten(&ckpt.ckpt);
        }
        Ok(())
    }

    /// Check a checkpoint received from elsewhere: signers must hold more
    /// than two thirds of the epoch's power and the multi-signature must
    /// verify against their keys in the epoch's validator BLS set
    pub fn verify_raw_checkpoint(&self, ckpt: &RawCheckpoint) -> Result<()> {
        ckpt.validate_basic().map_err(CheckpointError::InvalidRawCheckpoint)?;

        let vals = self.registry.validator_bls_set(ckpt.epoch_num)?;
        let (signers, power_sum) = vals.find_subset_with_power_sum(&ckpt.bitmap)?;
        let total_power = vals.total_power();
        if !exceeds_two_thirds(power_sum, total_power) {
            return Err(CheckpointError::InsufficientVotingPower { power_sum, total_power });
        }

        let keys: Vec<BLSPublicKey> = signers.iter().map(|v| v.bls_pub_key).collect();
        let multi_sig = ckpt
            .bls_multi_sig
            .as_ref()
            .ok_or_else(|| CheckpointError::InvalidRawCheckpoint("missing BLS multi-signature".into()))?;
        if !verify_multi_sig(multi_sig, &keys, &ckpt.signed_msg())? {
            return Err(CheckpointError::InvalidRawCheckpoint(
                "BLS multi-signature does not verify".into(),
            ));
        }

        self.hooks.after_raw_checkpoint_bls_sig_verified(ckpt);
        Ok(())
    }

    /// Compare an externally observed checkpoint against ours.
    ///
    /// Returns the local record when both are identical, `None` when the
    /// other checkpoint is valid and attests the same block with another
    /// signer set. A valid checkpoint for a different block is a fatal
    /// `ConflictingCheckpoint`.
    pub fn verify_checkpoint_conflict(&self, ckpt: &RawCheckpoint) -> Result<Option<RawCheckpointWithMeta>> {
        let local = self.checkpoints.get(ckpt.epoch_num)?;
        if local.ckpt == *ckpt {
            return Ok(Some(local));
        }

        self.verify_raw_checkpoint(ckpt)?;

        if local.ckpt.block_hash != ckpt.block_hash {
            error!(
                epoch = ckpt.epoch_num,
                ours = %local.ckpt.block_hash,
                theirs = %ckpt.block_hash,
                "Conflicting checkpoint with valid BLS multi-signature"
            );
            return Err(CheckpointError::ConflictingCheckpoint {
                epoch: ckpt.epoch_num,
                ours: local.ckpt.block_hash,
                theirs: ckpt.block_hash,
            });
        }
        Ok(None)
    }

    // ===== Queries =====

    pub fn get_checkpoint(&self, epoch: u64) -> Result<RawCheckpointWithMeta> {
        self.checkpoints.get(epoch)
    }

    pub fn get_status(&self, epoch: u64) -> Result<CheckpointStatus> {
        self.checkpoints.get_status(epoch)
    }

    pub fn list_by_status(&self, status: CheckpointStatus) -> Result<Vec<RawCheckpointWithMeta>> {
        self.checkpoints.list_by_status(status)
    }

    pub fn get_last_finalized_epoch(&self) -> Result<u64> {
        self.checkpoints.last_finalized_epoch()
    }

    /// Latest checkpoint at `status`, or one already past it
    pub fn last_checkpoint_with_status(&self, status: CheckpointStatus) -> Result<RawCheckpoint> {
        self.checkpoints.last_checkpoint_with_status(status)
    }

    pub fn recent_epoch_status_count(&self, epoch_count: u64) -> Result<EpochStatusCount> {
        self.checkpoints.recent_epoch_status_count(epoch_count)
    }
}
