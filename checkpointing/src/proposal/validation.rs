/// Vote-weight validation and default transaction selection
/// 
/// The consensus engine hands the proposer its last commit with every
/// precommit's extension. Before trusting any extension, the commit must
/// show that validators holding more than two thirds of the power signed
/// their extensions with their consensus keys.

use super::types::{BlockIdFlag, ExtendedCommitInfo, ProposalError, ProposalStatus, Result};
use crate::crypto::Ed25519Signature;
use crate::epoch::EpochProvider;
use crate::vote_ext::VoteExtension;
use std::collections::{BTreeMap, HashSet};

/// Bytes a validator signs with its consensus key to authenticate its
/// vote extension
pub fn vote_extension_sign_bytes(extension: &[u8], height: u64, round: u32, chain_id: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + chain_id.len() + 8 + 4 + 4 + extension.len());
    out.extend_from_slice(&(chain_id.len() as u32).to_be_bytes());
    out.extend_from_slice(chain_id.as_bytes());
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&round.to_be_bytes());
    out.extend_from_slice(&(extension.len() as u32).to_be_bytes());
    out.extend_from_slice(extension);
    out
}

/// Engine-side check that a commit's extensions carry enough weight
pub trait VoteWeightValidator {
    /// Validate `commit` for the proposal at `height` and return the
    /// extension backed by the most voting power
    fn validate_vote_extensions(
        &self,
        provider: &dyn EpochProvider,
        height: u64,
        chain_id: &str,
        commit: &ExtendedCommitInfo,
    ) -> Result<VoteExtension>;
}

/// Consensus-key signature and voting-power check over `Commit` votes
#[derive(Clone, Copy, Debug)]
pub struct DefaultVoteWeightValidator {
    vote_extensions_enable_height: u64,
}

impl DefaultVoteWeightValidator {
    pub fn new(vote_extensions_enable_height: u64) -> Self {
        Self { vote_extensions_enable_height }
    }
}

fn invalid(msg: String) -> ProposalError {
    ProposalError::InvalidVoteExtensions(msg)
}

impl VoteWeightValidator for DefaultVoteWeightValidator {
    fn validate_vote_extensions(
        &self,
        provider: &dyn EpochProvider,
        height: u64,
        chain_id: &str,
        commit: &ExtendedCommitInfo,
    ) -> Result<VoteExtension> {
        // the proposal at the enable height has no extensions to look at
        let exts_enabled =
            self.vote_extensions_enable_height != 0 && height > self.vote_extensions_enable_height;
        // extensions were signed while voting on the previous height
        let signed_height = height.saturating_sub(1);

        let mut total_power: u128 = 0;
        let mut sum_power: u128 = 0;
        let mut seen = HashSet::new();
        let mut extension_power: BTreeMap<&[u8], u128> = BTreeMap::new();

        for vote in &commit.votes {
            total_power += vote.validator.power as u128;

            if vote.block_id_flag != BlockIdFlag::Commit {
                continue;
            }

            let address = vote.validator.address;
            if !exts_enabled {
                if !vote.vote_extension.is_empty() || !vote.extension_signature.is_empty() {
                    return Err(invalid(format!(
                        "vote extensions disabled; received non-empty vote extension from {} at height {}",
                        address, height
                    )));
                }
                continue;
            }

            if vote.extension_signature.is_empty() {
                return Err(invalid(format!(
                    "received empty vote extension signature from {} at height {}",
                    address, height
                )));
            }

            if !seen.insert(address) {
                return Err(invalid(format!(
                    "duplicate validator; {} has already submitted a vote extension",
                    address
                )));
            }

            let pub_key = provider
                .get_pub_key_by_address(&address)
                .ok_or_else(|| invalid(format!("failed to get validator {} public key", address)))?;
            let signature = Ed25519Signature::from_bytes(&vote.extension_signature)
                .map_err(|e| invalid(format!("malformed extension signature from {}: {}", address, e)))?;
            let sign_bytes =
                vote_extension_sign_bytes(&vote.vote_extension, signed_height, commit.round, chain_id);
            if !pub_key.verify(&sign_bytes, &signature) {
                return Err(invalid(format!(
                    "failed to verify validator {} vote extension signature",
                    address
                )));
            }

            *extension_power.entry(vote.vote_extension.as_slice()).or_insert(0) += vote.validator.power as u128;
            sum_power += vote.validator.power as u128;
        }

        if total_power == 0 {
            return Err(invalid("total voting power must be positive".into()));
        }

        let required = total_power * 2 / 3 + 1;
        if sum_power < required {
            return Err(invalid(format!(
                "insufficient cumulative voting power received to verify vote extensions; got: {}, expected: >={}",
                sum_power, required
            )));
        }

        let bytes = most_voted(&extension_power).ok_or_else(|| invalid("no vote extensions".into()))?;

        VoteExtension::decode(bytes).map_err(|e| invalid(format!("bad most-voted vote extension: {}", e)))
    }
}

/// Extension backed by the most power; ties go to the lexicographically
/// smallest extension
pub fn most_voted<'a>(extension_power: &BTreeMap<&'a [u8], u128>) -> Option<&'a [u8]> {
    let mut best: Option<(&'a [u8], u128)> = None;
    for (ext, power) in extension_power {
        if best.map_or(true, |(_, best_power)| *power > best_power) {
            best = Some((*ext, *power));
        }
    }
    best.map(|(ext, _)| ext)
}

/// Ordinary transaction handling around the injected checkpoint
pub trait TxSelector {
    /// Pick the ordinary txs for a proposal
    fn prepare_txs(&self, height: u64, txs: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>>;

    /// Judge the ordinary txs of a received proposal
    fn process_txs(&self, height: u64, txs: &[Vec<u8>]) -> Result<ProposalStatus>;
}

/// Passes every transaction through unchanged
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultTxSelector;

impl TxSelector for DefaultTxSelector {
    fn prepare_txs(&self, _height: u64, txs: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        Ok(txs)
    }

    fn process_txs(&self, _height: u64, _txs: &[Vec<u8>]) -> Result<ProposalStatus> {
        Ok(ProposalStatus::Accept)
    }
}
