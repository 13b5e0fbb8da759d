/// Test fixtures for checkpointing
/// 
/// A `TestNetwork` is a fixed validator set with deterministic consensus
/// and BLS keys, able to produce everything the handlers consume: a keeper
/// with every key registered, signed vote extensions, extended commits,
/// and sealed checkpoints.

use crate::checkpoint::{get_sign_bytes, BlockHash, BlsSig, CheckpointStatus, RawCheckpointWithMeta};
use crate::config::CheckpointingConfig;
use crate::crypto::{BLSKeyPair, Ed25519PublicKey, Ed25519SecretKey};
use crate::epoch::{Epoch, StaticEpochProvider, Validator, ValidatorAddress, ValidatorSet};
use crate::hooks::MultiCheckpointingHooks;
use crate::keeper::Checkpointing;
use crate::proposal::{vote_extension_sign_bytes, BlockIdFlag, ExtendedCommitInfo, ExtendedVoteInfo};
use crate::registry::{BlsKey, GenesisKey, GenesisState, ProofOfPossession};
use crate::signer::LocalBlsSigner;
use crate::storage::Storage;
use crate::vote_ext::VoteExtension;
use std::sync::Arc;

pub const TEST_CHAIN_ID: &str = "checkpointing-test";

/// A validator with all of its key material
#[derive(Clone, Debug)]
pub struct TestValidator {
    pub address: ValidatorAddress,
    pub power: u64,
    pub consensus_sk: Ed25519SecretKey,
    pub bls: BLSKeyPair,
}

impl TestValidator {
    /// Deterministic validator number `index`
    pub fn new(index: usize, power: u64) -> anyhow::Result<Self> {
        let mut address = [0u8; 20];
        address[12..].copy_from_slice(&(index as u64 + 1).to_be_bytes());
        Ok(Self {
            address: ValidatorAddress::new(address),
            power,
            consensus_sk: Ed25519SecretKey::from_bytes(&testutil::indexed_seed(0xed, index))?,
            bls: BLSKeyPair::from_seed(&testutil::indexed_seed(0xb1, index))?,
        })
    }

    pub fn consensus_key(&self) -> Ed25519PublicKey {
        self.consensus_sk.public_key()
    }

    pub fn pop(&self) -> ProofOfPossession {
        ProofOfPossession::build(&self.consensus_sk, &self.bls.secret_key)
    }

    pub fn signer(&self) -> LocalBlsSigner {
        LocalBlsSigner::new(self.address, self.bls.secret_key.clone())
    }

    pub fn bls_sig(&self, epoch: u64, block_hash: BlockHash) -> BlsSig {
        BlsSig {
            epoch_num: epoch,
            block_hash,
            bls_sig: self.bls.secret_key.sign(&get_sign_bytes(epoch, &block_hash)),
            signer_address: self.address,
        }
    }

    /// The extension this validator would attach at `height`
    pub fn vote_extension(&self, epoch: u64, height: u64, block_hash: BlockHash) -> VoteExtension {
        VoteExtension {
            signer: self.address,
            validator_address: self.address,
            block_hash,
            epoch_num: epoch,
            height,
            bls_sig: self.bls_sig(epoch, block_hash),
        }
    }

    pub fn genesis_key(&self) -> GenesisKey {
        GenesisKey {
            validator_address: self.address,
            bls_key: BlsKey {
                pubkey: self.bls.public_key,
                pop: self.pop(),
            },
            val_pubkey: self.consensus_key(),
        }
    }
}

/// A validator set sitting in one epoch
#[derive(Clone, Debug)]
pub struct TestNetwork {
    /// Sorted by address, so a validator's index is its bitmap position
    pub validators: Vec<TestValidator>,
    pub epoch: Epoch,
}

impl TestNetwork {
    pub fn new(powers: &[u64], epoch: Epoch) -> anyhow::Result<Self> {
        let validators = powers
            .iter()
            .enumerate()
            .map(|(i, power)| TestValidator::new(i, *power))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self { validators, epoch })
    }

    pub fn config(&self) -> CheckpointingConfig {
        CheckpointingConfig {
            chain_id: TEST_CHAIN_ID.into(),
            ..Default::default()
        }
    }

    pub fn validator_set(&self) -> ValidatorSet {
        ValidatorSet::new(
            self.validators
                .iter()
                .map(|v| Validator { address: v.address, power: v.power })
                .collect(),
        )
    }

    /// Epoch provider reporting this network's epoch and validator set
    pub fn epoch_provider(&self) -> StaticEpochProvider {
        let mut provider = StaticEpochProvider::new(self.epoch);
        provider.set_validator_set(self.epoch.epoch_number, self.validator_set());
        for v in &self.validators {
            provider.set_consensus_key(v.address, v.consensus_key());
        }
        provider
    }

    pub fn genesis_state(&self) -> GenesisState {
        GenesisState::new(self.validators.iter().map(TestValidator::genesis_key).collect())
    }

    /// Keeper on a temporary database with every BLS key registered and
    /// the epoch's validator BLS set stored
    pub fn keeper(&self) -> anyhow::Result<Checkpointing> {
        let keeper = Checkpointing::new(
            self.config(),
            Arc::new(Storage::new_temp()?),
            Box::new(self.epoch_provider()),
            MultiCheckpointingHooks::default(),
        );
        keeper.init_genesis(&self.genesis_state())?;
        keeper.begin_block(self.epoch.first_block_height)?;
        Ok(keeper)
    }

    /// Last commit as the engine would deliver it: `signers` voted `Commit`
    /// with an extension over `block_hash`, everyone else is absent
    pub fn extended_commit(
        &self,
        epoch: u64,
        block_hash: BlockHash,
        signers: &[usize],
        chain_id: &str,
    ) -> anyhow::Result<ExtendedCommitInfo> {
        let height = self.epoch.last_block_height();
        let mut votes = Vec::with_capacity(self.validators.len());

        for (i, v) in self.validators.iter().enumerate() {
            let validator = Validator { address: v.address, power: v.power };
            if !signers.contains(&i) {
                votes.push(ExtendedVoteInfo {
                    validator,
                    vote_extension: Vec::new(),
                    extension_signature: Vec::new(),
                    block_id_flag: BlockIdFlag::Absent,
                });
                continue;
            }

            let vote_extension = v.vote_extension(epoch, height, block_hash).encode()?;
            let sign_bytes = vote_extension_sign_bytes(&vote_extension, height, 0, chain_id);
            votes.push(ExtendedVoteInfo {
                validator,
                extension_signature: v.consensus_sk.sign(&sign_bytes).as_bytes().to_vec(),
                vote_extension,
                block_id_flag: BlockIdFlag::Commit,
            });
        }

        Ok(ExtendedCommitInfo { round: 0, votes })
    }

    /// Checkpoint for `epoch` carrying the signatures of `signers`, in order.
    /// Signers past the sealing point are not added.
    pub fn sealed_checkpoint(
        &self,
        epoch: u64,
        block_hash: BlockHash,
        signers: &[usize],
    ) -> anyhow::Result<RawCheckpointWithMeta> {
        let vals = self.validator_set();
        let total_power = vals.total_power();
        let mut ckpt =
            RawCheckpointWithMeta::accumulating(epoch, block_hash, self.config().max_validators);

        for &i in signers {
            if ckpt.status != CheckpointStatus::Accumulating {
                break;
            }
            let v = &self.validators[i];
            let sig = v.bls_sig(epoch, block_hash).bls_sig;
            ckpt.accumulate(&vals, &v.address, &v.bls.public_key, &sig, total_power)?;
        }
        Ok(ckpt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash;

    #[test]
    fn test_validators_are_sorted_and_deterministic() {
        let a = TestNetwork::new(&[1, 2, 3], Epoch::new(1, 5, 1)).unwrap();
        let b = TestNetwork::new(&[1, 2, 3], Epoch::new(1, 5, 1)).unwrap();

        let set = a.validator_set();
        for (i, v) in a.validators.iter().enumerate() {
            assert_eq!(set.get(i).unwrap().address, v.address);
            assert_eq!(v.bls.public_key, b.validators[i].bls.public_key);
        }
        assert!(a.genesis_state().validate().is_ok());
    }

    #[test]
    fn test_sealed_checkpoint_fixture() {
        let net = TestNetwork::new(&[10, 10, 10], Epoch::new(2, 5, 6)).unwrap();
        let ckpt = net.sealed_checkpoint(2, Hash::new([1; 32]), &[0, 1, 2]).unwrap();
        assert_eq!(ckpt.status, CheckpointStatus::Sealed);
        assert_eq!(ckpt.power_sum, 30);

        let ckpt = net.sealed_checkpoint(2, Hash::new([1; 32]), &[0, 1]).unwrap();
        assert_eq!(ckpt.status, CheckpointStatus::Accumulating);
    }
}
