/// Checkpoint data model
/// 
/// - `RawCheckpoint`: what validators attest to for one epoch
/// - `RawCheckpointWithMeta`: the checkpoint plus quorum bookkeeping and
///   its lifecycle history
/// - `BlsSig`: one validator's BLS signature over an epoch's sign bytes

use crate::crypto::{hash_fields, BLSPublicKey, BLSSignature, Hash};
use crate::epoch::ValidatorAddress;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Hash of the last block of an epoch
pub type BlockHash = Hash;

/// Bytes every validator signs for an epoch: `epoch (big-endian) || block hash`
pub fn get_sign_bytes(epoch_num: u64, block_hash: &BlockHash) -> Vec<u8> {
    let mut msg = Vec::with_capacity(8 + block_hash.as_bytes().len());
    msg.extend_from_slice(&epoch_num.to_be_bytes());
    msg.extend_from_slice(block_hash.as_bytes());
    msg
}

/// Fixed-width bit array over validator-set ordinals.
///
/// Bit `i` lives in byte `i / 8` at position `i % 8`.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Bitmap(Vec<u8>);

impl Bitmap {
    /// Bitmap able to hold at least `bits` bits
    pub fn new(bits: usize) -> Self {
        Self(vec![0u8; bits.div_ceil(8)])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Width in bits
    pub fn len(&self) -> usize {
        self.0.len() * 8
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bits outside the bitmap read as unset
    pub fn get(&self, index: usize) -> bool {
        self.0
            .get(index / 8)
            .map(|byte| byte & (1 << (index % 8)) != 0)
            .unwrap_or(false)
    }

    /// Set bit `index`; returns false if it is outside the bitmap
    pub fn set(&mut self, index: usize) -> bool {
        match self.0.get_mut(index / 8) {
            Some(byte) => {
                *byte |= 1 << (index % 8);
                true
            }
            None => false,
        }
    }

    pub fn count_ones(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bitmap({})", hex::encode(&self.0))
    }
}

/// The attested content for one epoch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCheckpoint {
    pub epoch_num: u64,
    pub block_hash: BlockHash,
    /// Ordinals of the validators whose signatures are aggregated
    pub bitmap: Bitmap,
    /// Aggregate of every signature marked in `bitmap`
    pub bls_multi_sig: Option<BLSSignature>,
}

impl RawCheckpoint {
    /// Fresh checkpoint with no signatures
    pub fn new(epoch_num: u64, block_hash: BlockHash, bitmap_bits: usize) -> Self {
        Self {
            epoch_num,
            block_hash,
            bitmap: Bitmap::new(bitmap_bits),
            bls_multi_sig: None,
        }
    }

    /// Content hash over every field
    pub fn hash(&self) -> Hash {
        let epoch = self.epoch_num.to_be_bytes();
        let sig: &[u8] = match &self.bls_multi_sig {
            Some(sig) => sig.as_bytes(),
            None => &[],
        };
        hash_fields(&[&epoch, self.block_hash.as_bytes(), sig, self.bitmap.as_bytes()])
    }

    /// The message every signer in `bitmap` signed
    pub fn signed_msg(&self) -> Vec<u8> {
        get_sign_bytes(self.epoch_num, &self.block_hash)
    }

    /// Stateless sanity checks for a checkpoint received from elsewhere
    pub fn validate_basic(&self) -> Result<(), String> {
        if self.bitmap.is_empty() {
            return Err("empty bitmap".into());
        }
        if self.bitmap.count_ones() == 0 {
            return Err("bitmap has no signers".into());
        }
        if self.bls_multi_sig.is_none() {
            return Err("missing BLS multi-signature".into());
        }
        Ok(())
    }
}

/// Checkpoint lifecycle, totally ordered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CheckpointStatus {
    Accumulating,
    Sealed,
    Submitted,
    Confirmed,
    Finalized,
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CheckpointStatus::Accumulating => "ACCUMULATING",
            CheckpointStatus::Sealed => "SEALED",
            CheckpointStatus::Submitted => "SUBMITTED",
            CheckpointStatus::Confirmed => "CONFIRMED",
            CheckpointStatus::Finalized => "FINALIZED",
        };
        f.write_str(name)
    }
}

/// One lifecycle transition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointStateUpdate {
    pub state: CheckpointStatus,
    pub block_height: u64,
    /// Unix seconds of the block that caused the transition
    pub block_time: u64,
}

/// A checkpoint together with its quorum state and history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCheckpointWithMeta {
    pub ckpt: RawCheckpoint,
    pub status: CheckpointStatus,
    /// Aggregate of the public keys marked in the bitmap
    pub bls_aggr_pk: Option<BLSPublicKey>,
    pub power_sum: u64,
    pub lifecycle: Vec<CheckpointStateUpdate>,
}

impl RawCheckpointWithMeta {
    pub fn new(ckpt: RawCheckpoint, status: CheckpointStatus) -> Self {
        Self {
            ckpt,
            status,
            bls_aggr_pk: None,
            power_sum: 0,
            lifecycle: Vec::new(),
        }
    }

    /// An empty `Accumulating` checkpoint
    pub fn accumulating(epoch_num: u64, block_hash: BlockHash, bitmap_bits: usize) -> Self {
        Self::new(RawCheckpoint::new(epoch_num, block_hash, bitmap_bits), CheckpointStatus::Accumulating)
    }

    pub fn epoch(&self) -> u64 {
        self.ckpt.epoch_num
    }

    /// Set `status` and append the matching lifecycle entry
    pub fn record_state_update(&mut self, block_height: u64, block_time: u64, status: CheckpointStatus) {
        self.status = status;
        self.lifecycle.push(CheckpointStateUpdate {
            state: status,
            block_height,
            block_time,
        });
    }
}

/// A validator's BLS signature over an epoch's sign bytes
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlsSig {
    pub epoch_num: u64,
    pub block_hash: BlockHash,
    pub bls_sig: BLSSignature,
    pub signer_address: ValidatorAddress,
}

impl BlsSig {
    /// Deterministic content hash
    pub fn hash(&self) -> Hash {
        let epoch = self.epoch_num.to_be_bytes();
        hash_fields(&[
            &epoch,
            self.block_hash.as_bytes(),
            self.bls_sig.as_bytes(),
            self.signer_address.as_bytes(),
        ])
    }

    pub fn signed_msg(&self) -> Vec<u8> {
        get_sign_bytes(self.epoch_num, &self.block_hash)
    }
}

/// How many of the most recent epochs sit at each status
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpochStatusCount {
    pub tip_epoch: u64,
    /// Epochs scanned, from the tip down
    pub epoch_count: u64,
    pub status_count: BTreeMap<CheckpointStatus, u64>,
}
