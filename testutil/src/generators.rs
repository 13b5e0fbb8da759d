/// Test data generators

use proptest::prelude::*;
use rand::Rng;

/// Generate a random 32-byte digest (block hash, app hash)
pub fn random_hash_bytes() -> [u8; 32] {
    let mut out = [0u8; 32];
    rand::thread_rng().fill(&mut out[..]);
    out
}

/// Generate a random 32-byte key seed (IKM for BLS, secret for Ed25519)
pub fn random_seed() -> [u8; 32] {
    random_hash_bytes()
}

/// Strategy producing a list of validator voting powers
pub fn voting_powers(max_validators: usize, max_power: u64) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(1..=max_power, 1..=max_validators)
}

/// Strategy producing voting powers together with a participation mask
pub fn powers_with_participation(
    max_validators: usize,
    max_power: u64,
) -> impl Strategy<Value = (Vec<u64>, Vec<bool>)> {
    voting_powers(max_validators, max_power).prop_flat_map(|powers| {
        let n = powers.len();
        (Just(powers), prop::collection::vec(any::<bool>(), n))
    })
}
