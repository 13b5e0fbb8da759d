/// BLS quorum accumulation
/// 
/// Folds one validator's signature at a time into an epoch's checkpoint and
/// seals it once signers hold more than two thirds of the voting power.

use super::types::{CheckpointStatus, RawCheckpointWithMeta};
use super::{CheckpointError, Result};
use crate::crypto::{aggr_pk, aggr_sig, BLSPublicKey, BLSSignature};
use crate::epoch::{ValidatorAddress, ValidatorSet, ValidatorSetError};
use tracing::debug;

/// `power * 3 > total * 2`, evaluated without overflow
pub fn exceeds_two_thirds(power: u64, total: u64) -> bool {
    (power as u128) * 3 > (total as u128) * 2
}

impl RawCheckpointWithMeta {
    /// Add `signer_address`'s signature to this checkpoint.
    ///
    /// Nothing is modified when an error is returned.
    pub fn accumulate(
        &mut self,
        vals: &ValidatorSet,
        signer_address: &ValidatorAddress,
        signer_bls_key: &BLSPublicKey,
        sig: &BLSSignature,
        total_power: u64,
    ) -> Result<()> {
        let epoch = self.epoch();
        if self.status != CheckpointStatus::Accumulating {
            return Err(CheckpointError::NotAccumulating {
                epoch,
                status: self.status,
            });
        }

        let (validator, index) = vals.find_validator_with_index(signer_address)?;
        if index >= self.ckpt.bitmap.len() {
            return Err(ValidatorSetError::BitmapTooSmall {
                bits: self.ckpt.bitmap.len(),
                set_size: vals.len(),
            }
            .into());
        }
        if self.ckpt.bitmap.get(index) {
            return Err(CheckpointError::AlreadyVoted {
                epoch,
                address: *signer_address,
            });
        }

        if !sig.verify(signer_bls_key, &self.ckpt.signed_msg()) {
            return Err(CheckpointError::InvalidBlsSignature {
                epoch,
                address: *signer_address,
            });
        }

        let multi_sig = aggr_sig(self.ckpt.bls_multi_sig.as_ref(), sig)?;
        let aggr_key = aggr_pk(self.bls_aggr_pk.as_ref(), signer_bls_key)?;

        self.ckpt.bitmap.set(index);
        self.ckpt.bls_multi_sig = Some(multi_sig);
        self.bls_aggr_pk = Some(aggr_key);
        self.power_sum = self.power_sum.saturating_add(validator.power);

        if exceeds_two_thirds(self.power_sum, total_power) {
            self.status = CheckpointStatus::Sealed;
            debug!(epoch, power_sum = self.power_sum, total_power, "Checkpoint sealed");
        }

        Ok(())
    }
}
