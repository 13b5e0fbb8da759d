/// Engine-facing proposal types and errors

use crate::checkpoint::{CheckpointError, RawCheckpointWithMeta};
use crate::epoch::Validator;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Proposal handling errors.
///
/// Recoverable errors mean "no checkpoint this round": the proposer goes
/// ahead with the ordinary transactions. Fatal errors mean consensus
/// itself is broken and the replica must stop.
#[derive(Error, Debug)]
pub enum ProposalError {
    #[error("no extended votes received from the last block at height {height}")]
    NoExtendedVotes { height: u64 },

    #[error("invalid vote extensions: {0}")]
    InvalidVoteExtensions(String),

    #[error("insufficient voting power to build the checkpoint for epoch {epoch}")]
    InsufficientVotingPower { epoch: u64 },

    #[error("invalid injected checkpoint tx: {0}")]
    InjectedTx(#[from] CodecError),

    #[error("transaction selection failed: {0}")]
    TxSelection(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl ProposalError {
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProposalError::NoExtendedVotes { .. } | ProposalError::InsufficientVotingPower { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ProposalError>;

/// Injected tx codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("the tx set does not contain the injected tx")]
    Missing,

    #[error("the injected tx is empty")]
    Empty,

    #[error("length prefix says {declared} bytes, body has {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("body too large: {0} bytes")]
    TooLarge(usize),

    #[error("bincode: {0}")]
    Bincode(String),
}

/// How a validator's vote counted in the last commit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockIdFlag {
    Absent,
    Commit,
    Nil,
}

/// A precommit with its extension, as delivered by the consensus engine
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedVoteInfo {
    pub validator: Validator,
    pub vote_extension: Vec<u8>,
    /// Consensus-key signature over the canonical extension sign bytes
    pub extension_signature: Vec<u8>,
    pub block_id_flag: BlockIdFlag,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedCommitInfo {
    pub round: u32,
    pub votes: Vec<ExtendedVoteInfo>,
}

/// The checkpoint a proposer places at tx index 0, along with the votes it
/// was built from so every replica can rebuild it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedCheckpoint {
    pub ckpt: RawCheckpointWithMeta,
    pub extended_commit_info: ExtendedCommitInfo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestPrepareProposal {
    pub height: u64,
    /// Unix seconds
    pub time: u64,
    pub txs: Vec<Vec<u8>>,
    pub local_last_commit: ExtendedCommitInfo,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponsePrepareProposal {
    pub txs: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestProcessProposal {
    pub height: u64,
    pub time: u64,
    pub txs: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFinalizeBlock {
    pub height: u64,
    pub time: u64,
    pub txs: Vec<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalStatus {
    Accept,
    Reject,
}
