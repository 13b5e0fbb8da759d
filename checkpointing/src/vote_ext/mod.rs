/// BLS vote extensions
/// 
/// At the last block of an epoch every validator extends its precommit
/// with a BLS signature over `epoch || block hash`. Peers check those
/// extensions before counting the precommit.

pub mod types;

use crate::checkpoint::{get_sign_bytes, BlsSig};
use crate::keeper::Checkpointing;
use crate::signer::BlsSigner;
use tracing::{debug, info, warn};

pub use types::{
    RequestExtendVote, RequestVerifyVoteExtension, Result, VerifyStatus, VoteExtension,
    VoteExtensionError,
};

/// Produces and verifies BLS vote extensions
pub struct VoteExtensionHandler<'k> {
    keeper: &'k Checkpointing,
    signer: &'k dyn BlsSigner,
}

impl<'k> VoteExtensionHandler<'k> {
    pub fn new(keeper: &'k Checkpointing, signer: &'k dyn BlsSigner) -> Self {
        Self { keeper, signer }
    }

    /// Extension bytes for our precommit at `req.height`.
    ///
    /// Empty outside an epoch's last block, and when this node is not in
    /// the epoch's validator set.
    pub fn extend_vote(&self, req: &RequestExtendVote) -> Result<Vec<u8>> {
        let epoch = self.keeper.epoch_provider().get_epoch();
        if !epoch.is_last_block_by_height(req.height) {
            return Ok(Vec::new());
        }

        let address = self.signer.address();
        let vals = self.keeper.epoch_provider().get_validator_set(epoch.epoch_number);
        if vals.find_validator_with_index(&address).is_err() {
            warn!(
                epoch = epoch.epoch_number,
                height = req.height,
                signer = %address,
                "BLS signer is not in the validator set, abstaining"
            );
            return Ok(Vec::new());
        }

        let bls_sig = BlsSig {
            epoch_num: epoch.epoch_number,
            block_hash: req.hash,
            bls_sig: self.signer.sign(&get_sign_bytes(epoch.epoch_number, &req.hash)),
            signer_address: address,
        };
        let ext = VoteExtension {
            signer: address,
            validator_address: address,
            block_hash: req.hash,
            epoch_num: epoch.epoch_number,
            height: req.height,
            bls_sig,
        };
        let bytes = ext.encode()?;

        info!(epoch = epoch.epoch_number, height = req.height, "Sent BLS signature in vote extension");
        Ok(bytes)
    }

    /// Check a peer's extension. Every failure is a `Reject`, never an error.
    pub fn verify_vote_extension(&self, req: &RequestVerifyVoteExtension) -> VerifyStatus {
        let epoch = self.keeper.epoch_provider().get_epoch();
        if !epoch.is_last_block_by_height(req.height) {
            return VerifyStatus::Accept;
        }

        if req.vote_extension.is_empty() {
            warn!(height = req.height, validator = %req.validator_address, "Received empty vote extension");
            return VerifyStatus::Reject;
        }

        let ext = match VoteExtension::decode(&req.vote_extension) {
            Ok(ext) => ext,
            Err(e) => {
                warn!(height = req.height, error = %e, "Failed to decode vote extension");
                return VerifyStatus::Reject;
            }
        };

        if ext.epoch_num != epoch.epoch_number || ext.bls_sig.epoch_num != epoch.epoch_number {
            warn!(
                want = epoch.epoch_number,
                got = ext.epoch_num,
                sig_epoch = ext.bls_sig.epoch_num,
                "Invalid epoch number in vote extension"
            );
            return VerifyStatus::Reject;
        }

        if ext.validator_address != ext.bls_sig.signer_address {
            warn!(
                extension_signer = %ext.validator_address,
                bls_signer = %ext.bls_sig.signer_address,
                "Vote extension signer does not match BLS signature signer"
            );
            return VerifyStatus::Reject;
        }

        if req.validator_address != ext.validator_address {
            warn!(
                sender = %req.validator_address,
                extension_signer = %ext.validator_address,
                "Vote extension was not sent by its signer"
            );
            return VerifyStatus::Reject;
        }

        if ext.bls_sig.block_hash != req.hash || ext.block_hash != req.hash {
            warn!(want = %req.hash, got = %ext.bls_sig.block_hash, "Invalid block hash in BLS signature");
            return VerifyStatus::Reject;
        }

        let key = match self.keeper.get_bls_pub_key(&ext.bls_sig.signer_address) {
            Ok(key) => key,
            Err(e) => {
                warn!(signer = %ext.bls_sig.signer_address, error = %e, "No BLS key for vote extension signer");
                return VerifyStatus::Reject;
            }
        };
        if !ext.bls_sig.bls_sig.verify(&key, &ext.bls_sig.signed_msg()) {
            warn!(
                height = req.height,
                epoch = epoch.epoch_number,
                signer = %ext.bls_sig.signer_address,
                "Invalid BLS signature in vote extension"
            );
            return VerifyStatus::Reject;
        }

        debug!(
            height = req.height,
            epoch = epoch.epoch_number,
            signer = %ext.signer,
            "Verified vote extension"
        );
        VerifyStatus::Accept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash;
    use crate::epoch::{Epoch, ValidatorAddress};
    use crate::signer::LocalBlsSigner;
    use crate::testckpt::TestNetwork;

    // epoch 1 covers heights 1..=10
    fn network() -> TestNetwork {
        TestNetwork::new(&[100, 100, 100, 100], Epoch::new(1, 10, 1)).unwrap()
    }

    fn block_hash() -> Hash {
        Hash::new([0x42; 32])
    }

    fn verify_req(net: &TestNetwork, ext: &VoteExtension) -> RequestVerifyVoteExtension {
        RequestVerifyVoteExtension {
            height: net.epoch.last_block_height(),
            hash: block_hash(),
            validator_address: ext.validator_address,
            vote_extension: ext.encode().unwrap(),
        }
    }

    #[test]
    fn test_extend_vote_only_at_last_block() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[0].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let bytes = handler
            .extend_vote(&RequestExtendVote { height: 5, hash: block_hash() })
            .unwrap();
        assert!(bytes.is_empty());

        let bytes = handler
            .extend_vote(&RequestExtendVote { height: 10, hash: block_hash() })
            .unwrap();
        let ext = VoteExtension::decode(&bytes).unwrap();
        assert_eq!(ext.epoch_num, 1);
        assert_eq!(ext.height, 10);
        assert_eq!(ext.validator_address, net.validators[0].address);
        assert_eq!(ext.bls_sig.block_hash, block_hash());
        assert!(ext
            .bls_sig
            .bls_sig
            .verify(&net.validators[0].bls.public_key, &get_sign_bytes(1, &block_hash())));
    }

    #[test]
    fn test_extend_vote_abstains_outside_validator_set() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let outsider = LocalBlsSigner::generate(ValidatorAddress::new([0xff; 20]));
        let handler = VoteExtensionHandler::new(&keeper, &outsider);

        let bytes = handler
            .extend_vote(&RequestExtendVote { height: 10, hash: block_hash() })
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_extend_vote_never_in_epoch_zero() {
        let net = TestNetwork::new(&[100, 100], Epoch::new(0, 1, 0)).unwrap();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[0].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let bytes = handler
            .extend_vote(&RequestExtendVote { height: 0, hash: block_hash() })
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_verify_accepts_valid_extension() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[1].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let ext = net.validators[0].vote_extension(1, 10, block_hash());
        assert_eq!(handler.verify_vote_extension(&verify_req(&net, &ext)), VerifyStatus::Accept);
    }

    #[test]
    fn test_verify_accepts_anything_outside_last_block() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[1].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let req = RequestVerifyVoteExtension {
            height: 3,
            hash: block_hash(),
            validator_address: net.validators[0].address,
            vote_extension: vec![1, 2, 3],
        };
        assert_eq!(handler.verify_vote_extension(&req), VerifyStatus::Accept);
    }

    #[test]
    fn test_verify_rejects_empty_and_garbage() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[1].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let mut req = verify_req(&net, &net.validators[0].vote_extension(1, 10, block_hash()));
        req.vote_extension = Vec::new();
        assert_eq!(handler.verify_vote_extension(&req), VerifyStatus::Reject);

        req.vote_extension = vec![0xde, 0xad];
        assert_eq!(handler.verify_vote_extension(&req), VerifyStatus::Reject);
    }

    #[test]
    fn test_verify_rejects_wrong_epoch() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[1].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let ext = net.validators[0].vote_extension(2, 10, block_hash());
        assert_eq!(handler.verify_vote_extension(&verify_req(&net, &ext)), VerifyStatus::Reject);

        let mut ext = net.validators[0].vote_extension(1, 10, block_hash());
        ext.bls_sig.epoch_num = 2;
        assert_eq!(handler.verify_vote_extension(&verify_req(&net, &ext)), VerifyStatus::Reject);
    }

    #[test]
    fn test_verify_rejects_borrowed_signature() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[2].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        // validator 1 forwards validator 0's valid BLS signature as its own
        let mut ext = net.validators[0].vote_extension(1, 10, block_hash());
        ext.validator_address = net.validators[1].address;
        ext.signer = net.validators[1].address;
        assert_eq!(handler.verify_vote_extension(&verify_req(&net, &ext)), VerifyStatus::Reject);
    }

    #[test]
    fn test_verify_rejects_sender_mismatch() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[2].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let ext = net.validators[0].vote_extension(1, 10, block_hash());
        let mut req = verify_req(&net, &ext);
        req.validator_address = net.validators[1].address;
        assert_eq!(handler.verify_vote_extension(&req), VerifyStatus::Reject);
    }

    #[test]
    fn test_verify_rejects_other_block_hash() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[2].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let ext = net.validators[0].vote_extension(1, 10, Hash::new([0x99; 32]));
        assert_eq!(handler.verify_vote_extension(&verify_req(&net, &ext)), VerifyStatus::Reject);
    }

    #[test]
    fn test_verify_rejects_bad_bls_signature() {
        let net = network();
        let keeper = net.keeper().unwrap();
        let signer = net.validators[2].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let mut ext = net.validators[0].vote_extension(1, 10, block_hash());
        ext.bls_sig.bls_sig = net.validators[1].bls.secret_key.sign(&get_sign_bytes(1, &block_hash()));
        assert_eq!(handler.verify_vote_extension(&verify_req(&net, &ext)), VerifyStatus::Reject);
    }

    #[test]
    fn test_verify_rejects_unregistered_signer() {
        let net = network();
        let keeper = net.keeper().unwrap();
        keeper.remove_bls_key(&net.validators[0].address).unwrap();
        let signer = net.validators[2].signer();
        let handler = VoteExtensionHandler::new(&keeper, &signer);

        let ext = net.validators[0].vote_extension(1, 10, block_hash());
        assert_eq!(handler.verify_vote_extension(&verify_req(&net, &ext)), VerifyStatus::Reject);
    }
}
