/// Checkpoint proposal handling
/// 
/// In the first block after an epoch's last block:
/// - the proposer aggregates the epoch's BLS vote extensions into a sealed
///   checkpoint and injects it as tx 0
/// - every replica rebuilds the checkpoint from the same votes and rejects
///   the proposal unless both match
/// - finalization persists the injected checkpoint without re-verifying it
///
/// The injected checkpoint's block hash comes from the most-voted
/// extension. Replicas cannot check it against the previous block ID here;
/// they rely on the commit's consensus-key signatures and the BLS quorum.

pub mod codec;
pub mod types;
pub mod validation;

use crate::checkpoint::{CheckpointStatus, RawCheckpointWithMeta};
use crate::keeper::Checkpointing;
use crate::vote_ext::VoteExtension;
use tracing::{debug, error, info, warn};

pub use codec::{
    decode_injected_checkpoint, encode_injected_checkpoint, extract_injected_checkpoint,
    remove_injected_tx, INJECTED_TX_INDEX,
};
pub use types::{
    BlockIdFlag, CodecError, ExtendedCommitInfo, ExtendedVoteInfo, InjectedCheckpoint,
    ProposalError, ProposalStatus, RequestFinalizeBlock, RequestPrepareProposal,
    RequestProcessProposal, ResponsePrepareProposal, Result,
};
pub use validation::{
    vote_extension_sign_bytes, DefaultTxSelector, DefaultVoteWeightValidator, TxSelector,
    VoteWeightValidator,
};

/// Prepare / process / finalize handlers for checkpoint proposals
pub struct ProposalHandler<'k> {
    keeper: &'k Checkpointing,
    tx_selector: Box<dyn TxSelector>,
    weight_validator: Box<dyn VoteWeightValidator>,
}

impl<'k> ProposalHandler<'k> {
    /// Handler with the pass-through tx selector and the default vote
    /// weight check
    pub fn new(keeper: &'k Checkpointing) -> Self {
        let enable_height = keeper.config().vote_extensions_enable_height;
        Self::with_components(
            keeper,
            Box::new(DefaultTxSelector),
            Box::new(DefaultVoteWeightValidator::new(enable_height)),
        )
    }

    pub fn with_components(
        keeper: &'k Checkpointing,
        tx_selector: Box<dyn TxSelector>,
        weight_validator: Box<dyn VoteWeightValidator>,
    ) -> Self {
        Self { keeper, tx_selector, weight_validator }
    }

    fn chain_id(&self) -> &str {
        &self.keeper.config().chain_id
    }

    /// Build the proposal's tx list, injecting the sealed checkpoint when
    /// `req.height` is a vote-extension proposal
    pub fn prepare_proposal(&self, req: &RequestPrepareProposal) -> Result<ResponsePrepareProposal> {
        let mut txs = self.tx_selector.prepare_txs(req.height, req.txs.clone())?;

        let epoch = self.keeper.epoch_provider().get_epoch();
        if !epoch.is_vote_extension_proposal(req.height) {
            return Ok(ResponsePrepareProposal { txs });
        }

        if req.local_last_commit.votes.is_empty() {
            return Err(ProposalError::NoExtendedVotes { height: req.height });
        }

        let most_voted = self.weight_validator.validate_vote_extensions(
            self.keeper.epoch_provider(),
            req.height,
            self.chain_id(),
            &req.local_last_commit,
        )?;

        // the epoch has not advanced yet, so the current epoch is the one
        // whose last block carried the extensions
        let ckpt = self.build_checkpoint_from_vote_extensions(
            epoch.epoch_number,
            &req.local_last_commit,
            &most_voted,
        )?;

        let injected = InjectedCheckpoint {
            ckpt,
            extended_commit_info: req.local_last_commit.clone(),
        };
        txs.insert(INJECTED_TX_INDEX, encode_injected_checkpoint(&injected)?);

        info!(
            epoch = epoch.epoch_number,
            height = req.height,
            power_sum = injected.ckpt.power_sum,
            "Injected sealed checkpoint into proposal"
        );
        Ok(ResponsePrepareProposal { txs })
    }

    /// `prepare_proposal`, falling back to the ordinary txs when no
    /// checkpoint can be built this round. Only fatal errors are returned.
    pub fn prepare_proposal_or_default(&self, req: &RequestPrepareProposal) -> Result<ResponsePrepareProposal> {
        match self.prepare_proposal(req) {
            Err(e) if !e.is_fatal() => {
                warn!(height = req.height, error = %e, "Proposing without a checkpoint");
                let txs = self.tx_selector.prepare_txs(req.height, req.txs.clone())?;
                Ok(ResponsePrepareProposal { txs })
            }
            other => other,
        }
    }

    /// Judge a received proposal. An `Err` is always fatal.
    pub fn process_proposal(&self, req: &RequestProcessProposal) -> Result<ProposalStatus> {
        let epoch = self.keeper.epoch_provider().get_epoch();
        let mut txs = req.txs.clone();

        if epoch.is_vote_extension_proposal(req.height) {
            let injected = match extract_injected_checkpoint(&txs) {
                Ok(injected) => injected,
                Err(e) => {
                    warn!(height = req.height, error = %e, "Cannot get injected checkpoint");
                    return Ok(ProposalStatus::Reject);
                }
            };
            txs = match remove_injected_tx(txs) {
                Ok(rest) => rest,
                Err(e) => {
                    warn!(height = req.height, error = %e, "Failed to remove injected tx");
                    return Ok(ProposalStatus::Reject);
                }
            };

            let most_voted = self
                .weight_validator
                .validate_vote_extensions(
                    self.keeper.epoch_provider(),
                    req.height,
                    self.chain_id(),
                    &injected.extended_commit_info,
                )
                .map_err(|e| {
                    error!(height = req.height, error = %e, "Injected vote extensions failed the weight check");
                    e
                })?;

            let rebuilt = match self.build_checkpoint_from_vote_extensions(
                epoch.epoch_number,
                &injected.extended_commit_info,
                &most_voted,
            ) {
                Ok(ckpt) => ckpt,
                Err(e) => {
                    warn!(height = req.height, error = %e, "Cannot rebuild injected checkpoint");
                    return Ok(ProposalStatus::Reject);
                }
            };

            if rebuilt != injected.ckpt {
                warn!(
                    epoch = epoch.epoch_number,
                    height = req.height,
                    "Injected checkpoint does not match the one rebuilt from its votes"
                );
                return Ok(ProposalStatus::Reject);
            }
        }

        if self.tx_selector.process_txs(req.height, &txs)? == ProposalStatus::Reject {
            warn!(height = req.height, epoch = epoch.epoch_number, "Ordinary txs rejected");
            return Ok(ProposalStatus::Reject);
        }

        Ok(ProposalStatus::Accept)
    }

    /// Persist the injected checkpoint of an accepted vote-extension block
    pub fn finalize_block(&self, req: &RequestFinalizeBlock) -> Result<()> {
        let epoch = self.keeper.epoch_provider().get_epoch();
        if !epoch.is_vote_extension_proposal(req.height) {
            return Ok(());
        }

        let injected = extract_injected_checkpoint(&req.txs)?;
        self.keeper.seal_checkpoint(&injected.ckpt, req.height, req.time)?;
        Ok(())
    }

    /// Fold the votes' BLS signatures into a checkpoint for `epoch` over
    /// the most-voted block hash. Unusable extensions are skipped; once
    /// the checkpoint seals the remaining votes are not looked at.
    pub fn build_checkpoint_from_vote_extensions(
        &self,
        epoch: u64,
        commit: &ExtendedCommitInfo,
        most_voted: &VoteExtension,
    ) -> Result<RawCheckpointWithMeta> {
        let provider = self.keeper.epoch_provider();
        let vals = provider.get_validator_set(epoch);
        let total_power = provider.get_total_voting_power(epoch);

        let mut ckpt = RawCheckpointWithMeta::accumulating(
            epoch,
            most_voted.block_hash,
            self.keeper.config().max_validators,
        );

        for vote in &commit.votes {
            if vote.vote_extension.is_empty() {
                debug!(validator = %vote.validator.address, "Skipping empty vote extension");
                continue;
            }
            let ext = match VoteExtension::decode(&vote.vote_extension) {
                Ok(ext) => ext,
                Err(e) => {
                    debug!(validator = %vote.validator.address, error = %e, "Skipping undecodable vote extension");
                    continue;
                }
            };

            let signer = ext.bls_sig.signer_address;
            let signer_key = match self.keeper.get_bls_pub_key(&signer) {
                Ok(key) => key,
                Err(e) => {
                    debug!(%signer, error = %e, "Skipping BLS sig without registered key");
                    continue;
                }
            };

            if let Err(e) = ckpt.accumulate(&vals, &signer, &signer_key, &ext.bls_sig.bls_sig, total_power) {
                debug!(%signer, error = %e, "Skipping BLS sig");
                continue;
            }

            if ckpt.status == CheckpointStatus::Sealed {
                break;
            }
        }

        if ckpt.status != CheckpointStatus::Sealed {
            return Err(ProposalError::InsufficientVotingPower { epoch });
        }
        Ok(ckpt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash;
    use crate::epoch::Epoch;
    use crate::testckpt::TestNetwork;

    // epoch 1 covers heights 1..=10; height 11 aggregates its extensions
    fn network() -> TestNetwork {
        TestNetwork::new(&[100, 100, 100, 100], Epoch::new(1, 10, 1)).unwrap()
    }

    fn hash() -> Hash {
        Hash::new([0xab; 32])
    }

    fn prepare_req(net: &TestNetwork, signers: &[usize]) -> RequestPrepareProposal {
        RequestPrepareProposal {
            height: 11,
            time: 1_700_000_011,
            txs: vec![b"tx-a".to_vec(), b"tx-b".to_vec()],
            local_last_commit: net
                .extended_commit(1, hash(), signers, &net.config().chain_id)
                .unwrap(),
        }
    }

    #[test]
    fn test_prepare_outside_round_is_unchanged() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let mut req = prepare_req(&net, &[0, 1, 2]);
        req.height = 7;
        let res = handler.prepare_proposal(&req).unwrap();
        assert_eq!(res.txs, req.txs);
    }

    #[test]
    fn test_prepare_injects_sealed_checkpoint() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let req = prepare_req(&net, &[0, 1, 2, 3]);
        let res = handler.prepare_proposal(&req).unwrap();
        assert_eq!(res.txs.len(), 3);
        assert_eq!(&res.txs[1..], &req.txs[..]);

        let injected = decode_injected_checkpoint(&res.txs[0]).unwrap();
        assert_eq!(injected.ckpt.status, CheckpointStatus::Sealed);
        assert_eq!(injected.ckpt.ckpt.block_hash, hash());
        // sealing stops at the third signature
        assert_eq!(injected.ckpt.power_sum, 300);
        assert_eq!(injected.ckpt.ckpt.bitmap.count_ones(), 3);
        assert_eq!(injected.extended_commit_info, req.local_last_commit);
    }

    #[test]
    fn test_prepare_without_votes_is_recoverable() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let mut req = prepare_req(&net, &[0, 1, 2]);
        req.local_last_commit = ExtendedCommitInfo::default();
        let err = handler.prepare_proposal(&req).unwrap_err();
        assert!(matches!(err, ProposalError::NoExtendedVotes { height: 11 }));
        assert!(!err.is_fatal());

        let res = handler.prepare_proposal_or_default(&req).unwrap();
        assert_eq!(res.txs, req.txs);
    }

    #[test]
    fn test_prepare_weight_failure_is_fatal() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let req = prepare_req(&net, &[0, 1]);
        let err = handler.prepare_proposal_or_default(&req).unwrap_err();
        assert!(matches!(err, ProposalError::InvalidVoteExtensions(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_process_accepts_honest_proposal() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let prepared = handler.prepare_proposal(&prepare_req(&net, &[0, 1, 2])).unwrap();
        let status = handler
            .process_proposal(&RequestProcessProposal { height: 11, time: 0, txs: prepared.txs })
            .unwrap();
        assert_eq!(status, ProposalStatus::Accept);
    }

    #[test]
    fn test_process_rejects_missing_or_garbled_injected_tx() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let status = handler
            .process_proposal(&RequestProcessProposal { height: 11, time: 0, txs: Vec::new() })
            .unwrap();
        assert_eq!(status, ProposalStatus::Reject);

        let status = handler
            .process_proposal(&RequestProcessProposal {
                height: 11,
                time: 0,
                txs: vec![b"not a checkpoint".to_vec()],
            })
            .unwrap();
        assert_eq!(status, ProposalStatus::Reject);
    }

    #[test]
    fn test_process_rejects_tampered_checkpoint() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let prepared = handler.prepare_proposal(&prepare_req(&net, &[0, 1, 2])).unwrap();
        let mut injected = decode_injected_checkpoint(&prepared.txs[0]).unwrap();
        injected.ckpt.power_sum += 1;

        let mut txs = prepared.txs.clone();
        txs[0] = encode_injected_checkpoint(&injected).unwrap();
        let status = handler
            .process_proposal(&RequestProcessProposal { height: 11, time: 0, txs })
            .unwrap();
        assert_eq!(status, ProposalStatus::Reject);
    }

    #[test]
    fn test_process_weight_failure_is_fatal() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let prepared = handler.prepare_proposal(&prepare_req(&net, &[0, 1, 2])).unwrap();
        let mut injected = decode_injected_checkpoint(&prepared.txs[0]).unwrap();
        injected.extended_commit_info.votes[2].block_id_flag = BlockIdFlag::Nil;

        let mut txs = prepared.txs.clone();
        txs[0] = encode_injected_checkpoint(&injected).unwrap();
        let err = handler
            .process_proposal(&RequestProcessProposal { height: 11, time: 0, txs })
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_process_delegates_outside_round() {
        struct RejectAll;
        impl TxSelector for RejectAll {
            fn prepare_txs(&self, _height: u64, txs: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
                Ok(txs)
            }
            fn process_txs(&self, _height: u64, _txs: &[Vec<u8>]) -> Result<ProposalStatus> {
                Ok(ProposalStatus::Reject)
            }
        }

        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::with_components(
            &keeper,
            Box::new(RejectAll),
            Box::new(DefaultVoteWeightValidator::new(1)),
        );

        let status = handler
            .process_proposal(&RequestProcessProposal { height: 4, time: 0, txs: Vec::new() })
            .unwrap();
        assert_eq!(status, ProposalStatus::Reject);
    }

    #[test]
    fn test_finalize_seals_checkpoint() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let prepared = handler.prepare_proposal(&prepare_req(&net, &[0, 1, 2])).unwrap();
        handler
            .finalize_block(&RequestFinalizeBlock { height: 11, time: 1_700_000_011, txs: prepared.txs })
            .unwrap();

        let stored = keeper.get_checkpoint(1).unwrap();
        assert_eq!(stored.status, CheckpointStatus::Sealed);
        assert_eq!(stored.lifecycle.len(), 1);
        assert_eq!(stored.lifecycle[0].block_height, 11);
        assert_eq!(stored.lifecycle[0].block_time, 1_700_000_011);
    }

    #[test]
    fn test_finalize_outside_round_is_noop() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        handler
            .finalize_block(&RequestFinalizeBlock { height: 5, time: 0, txs: vec![b"x".to_vec()] })
            .unwrap();
        assert!(keeper.checkpoints().try_get(1).unwrap().is_none());
    }

    #[test]
    fn test_finalize_without_injected_tx_fails() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let handler = ProposalHandler::new(&keeper);

        let err = handler
            .finalize_block(&RequestFinalizeBlock { height: 11, time: 0, txs: Vec::new() })
            .unwrap_err();
        assert!(matches!(err, ProposalError::InjectedTx(CodecError::Missing)));
    }
}
