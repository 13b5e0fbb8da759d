/// Epoch checkpointing over BLS vote extensions
/// 
/// At the last block of every epoch each validator signs (epoch, block hash)
/// with its BLS key and attaches the signature to its precommit. The next
/// proposer aggregates the extensions into a raw checkpoint, injects it as
/// the first transaction of the block, and every replica re-derives and
/// seals it when the block is finalized. Provides:
/// - BLS key registry with proof-of-possession
/// - Checkpoint storage and status lifecycle
/// - Vote extension and proposal handlers

pub mod checkpoint;
pub mod config;
pub mod crypto;
pub mod epoch;
pub mod hooks;
pub mod keeper;
pub mod proposal;
pub mod registry;
pub mod signer;
pub mod storage;
pub mod testckpt;
pub mod vote_ext;

pub use checkpoint::{
    Bitmap, BlockHash, BlsSig, CheckpointError, CheckpointStatus, CheckpointStore, EpochStatusCount,
    RawCheckpoint, RawCheckpointWithMeta,
};
pub use config::CheckpointingConfig;
pub use crypto::{BLSKeyPair, BLSPublicKey, BLSSecretKey, BLSSignature, Hash};
pub use epoch::{Epoch, EpochProvider, StaticEpochProvider, Validator, ValidatorAddress, ValidatorSet};
pub use hooks::{CheckpointingHooks, MultiCheckpointingHooks};
pub use keeper::Checkpointing;
pub use proposal::{ProposalError, ProposalHandler};
pub use registry::{BlsKey, BlsRegistry, ProofOfPossession};
pub use signer::{BlsSigner, LocalBlsSigner};
pub use storage::Storage;
pub use vote_ext::{VoteExtension, VoteExtensionHandler};
