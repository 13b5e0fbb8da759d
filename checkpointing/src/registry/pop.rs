/// Proof-of-possession binding a BLS key to a validator's consensus key
/// 
/// - `ed25519_sig = Ed25519_Sign(consensus_sk, bls_pk)`
/// - `bls_sig = BLS_Sign(bls_sk, ed25519_sig)`

use crate::crypto::{BLSPublicKey, BLSSecretKey, BLSSignature, Ed25519PublicKey, Ed25519SecretKey, Ed25519Signature};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfPossession {
    pub ed25519_sig: Ed25519Signature,
    pub bls_sig: BLSSignature,
}

impl ProofOfPossession {
    /// Build a proof for `bls_sk`'s public key under `val_sk`
    pub fn build(val_sk: &Ed25519SecretKey, bls_sk: &BLSSecretKey) -> Self {
        let bls_pk = bls_sk.public_key();
        let ed25519_sig = val_sk.sign(bls_pk.as_bytes());
        let bls_sig = bls_sk.sign(ed25519_sig.as_bytes());
        Self { ed25519_sig, bls_sig }
    }

    /// Both signatures must verify
    pub fn is_valid(&self, bls_pub_key: &BLSPublicKey, val_pub_key: &Ed25519PublicKey) -> bool {
        self.bls_sig.verify(bls_pub_key, self.ed25519_sig.as_bytes())
            && val_pub_key.verify(bls_pub_key.as_bytes(), &self.ed25519_sig)
    }
}

/// A BLS public key together with its proof-of-possession
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlsKey {
    pub pubkey: BLSPublicKey,
    pub pop: ProofOfPossession,
}

impl BlsKey {
    pub fn is_valid(&self, val_pub_key: &Ed25519PublicKey) -> bool {
        self.pop.is_valid(&self.pubkey, val_pub_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BLSKeyPair;

    fn keys() -> (Ed25519SecretKey, BLSKeyPair) {
        (Ed25519SecretKey::generate(), BLSKeyPair::generate())
    }

    #[test]
    fn test_valid_pop() {
        let (val_sk, bls) = keys();
        let pop = ProofOfPossession::build(&val_sk, &bls.secret_key);
        assert!(pop.is_valid(&bls.public_key, &val_sk.public_key()));
    }

    #[test]
    fn test_pop_for_other_bls_key_rejected() {
        let (val_sk, bls) = keys();
        let other = BLSKeyPair::generate();
        let pop = ProofOfPossession::build(&val_sk, &bls.secret_key);
        assert!(!pop.is_valid(&other.public_key, &val_sk.public_key()));
    }

    #[test]
    fn test_pop_for_other_consensus_key_rejected() {
        let (val_sk, bls) = keys();
        let pop = ProofOfPossession::build(&val_sk, &bls.secret_key);
        let other = Ed25519SecretKey::generate().public_key();
        assert!(!pop.is_valid(&bls.public_key, &other));
    }

    #[test]
    fn test_flipped_bit_in_either_signature_rejected() {
        let (val_sk, bls) = keys();
        let pop = ProofOfPossession::build(&val_sk, &bls.secret_key);
        let val_pk = val_sk.public_key();

        let mut ed_bytes = *pop.ed25519_sig.as_bytes();
        ed_bytes[10] ^= 0x01;
        let tampered = ProofOfPossession {
            ed25519_sig: Ed25519Signature::from_bytes(&ed_bytes).unwrap(),
            bls_sig: pop.bls_sig,
        };
        assert!(!tampered.is_valid(&bls.public_key, &val_pk));

        // a flipped BLS signature bit may not even decode to a curve point
        let mut bls_bytes = *pop.bls_sig.as_bytes();
        bls_bytes[20] ^= 0x01;
        if let Ok(bls_sig) = BLSSignature::from_bytes(&bls_bytes) {
            let tampered = ProofOfPossession { ed25519_sig: pop.ed25519_sig, bls_sig };
            assert!(!tampered.is_valid(&bls.public_key, &val_pk));
        }
    }

    #[test]
    fn test_bls_key_validity() {
        let (val_sk, bls) = keys();
        let key = BlsKey {
            pubkey: bls.public_key,
            pop: ProofOfPossession::build(&val_sk, &bls.secret_key),
        };
        assert!(key.is_valid(&val_sk.public_key()));
    }
}
