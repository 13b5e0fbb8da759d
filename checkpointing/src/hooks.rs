/// Checkpoint lifecycle observers
/// 
/// Observers are registered explicitly at construction and invoked in
/// registration order after each transition has been persisted. A failing
/// observer is logged; the transition stands and later observers still run.

use crate::checkpoint::RawCheckpoint;
use crate::epoch::ValidatorAddress;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("hook failed: {0}")]
pub struct HookError(pub String);

pub type HookResult = std::result::Result<(), HookError>;

/// Reactions to checkpointing events. Every method defaults to a no-op.
pub trait CheckpointingHooks {
    fn after_bls_key_registered(&self, _val_addr: &ValidatorAddress) -> HookResult {
        Ok(())
    }

    fn after_raw_checkpoint_sealed(&self, _epoch: u64) -> HookResult {
        Ok(())
    }

    fn after_raw_checkpoint_confirmed(&self, _epoch: u64) -> HookResult {
        Ok(())
    }

    fn after_raw_checkpoint_forgotten(&self, _ckpt: &RawCheckpoint) -> HookResult {
        Ok(())
    }

    fn after_raw_checkpoint_finalized(&self, _epoch: u64) -> HookResult {
        Ok(())
    }

    fn after_raw_checkpoint_bls_sig_verified(&self, _ckpt: &RawCheckpoint) -> HookResult {
        Ok(())
    }
}

/// Ordered list of observers
#[derive(Default)]
pub struct MultiCheckpointingHooks {
    hooks: Vec<Box<dyn CheckpointingHooks>>,
}

impl MultiCheckpointingHooks {
    pub fn new(hooks: Vec<Box<dyn CheckpointingHooks>>) -> Self {
        Self { hooks }
    }

    pub fn register(&mut self, hook: Box<dyn CheckpointingHooks>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    fn dispatch<F>(&self, event: &'static str, f: F)
    where
        F: Fn(&dyn CheckpointingHooks) -> HookResult,
    {
        for (index, hook) in self.hooks.iter().enumerate() {
            if let Err(e) = f(hook.as_ref()) {
                error!(event, hook = index, error = %e, "Checkpointing hook failed");
            }
        }
    }

    pub fn after_bls_key_registered(&self, val_addr: &ValidatorAddress) {
        self.dispatch("bls_key_registered", |h| h.after_bls_key_registered(val_addr));
    }

    pub fn after_raw_checkpoint_sealed(&self, epoch: u64) {
        self.dispatch("raw_checkpoint_sealed", |h| h.after_raw_checkpoint_sealed(epoch));
    }

    pub fn after_raw_checkpoint_confirmed(&self, epoch: u64) {
        self.dispatch("raw_checkpoint_confirmed", |h| h.after_raw_checkpoint_confirmed(epoch));
    }

    pub fn after_raw_checkpoint_forgotten(&self, ckpt: &RawCheckpoint) {
        self.dispatch("raw_checkpoint_forgotten", |h| h.after_raw_checkpoint_forgotten(ckpt));
    }

    pub fn after_raw_checkpoint_finalized(&self, epoch: u64) {
        self.dispatch("raw_checkpoint_finalized", |h| h.after_raw_checkpoint_finalized(epoch));
    }

    pub fn after_raw_checkpoint_bls_sig_verified(&self, ckpt: &RawCheckpoint) {
        self.dispatch("raw_checkpoint_bls_sig_verified", |h| {
            h.after_raw_checkpoint_bls_sig_verified(ckpt)
        });
    }
}
