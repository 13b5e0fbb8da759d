/// Vote-extension wire types

use crate::checkpoint::{BlockHash, BlsSig};
use crate::epoch::ValidatorAddress;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoteExtensionError {
    #[error("Encoding error: {0}")]
    Encode(String),

    #[error("Decoding error: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, VoteExtensionError>;

/// Extension attached to a validator's precommit at an epoch's last block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteExtension {
    /// Address of the BLS signing identity
    pub signer: ValidatorAddress,
    pub validator_address: ValidatorAddress,
    pub block_hash: BlockHash,
    pub epoch_num: u64,
    pub height: u64,
    pub bls_sig: BlsSig,
}

impl VoteExtension {
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| VoteExtensionError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| VoteExtensionError::Decode(e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestExtendVote {
    pub height: u64,
    /// Hash of the block being voted on
    pub hash: BlockHash,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestVerifyVoteExtension {
    pub height: u64,
    pub hash: BlockHash,
    /// Validator that sent the extension
    pub validator_address: ValidatorAddress,
    pub vote_extension: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyStatus {
    Accept,
    Reject,
}
