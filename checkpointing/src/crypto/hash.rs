/// SHA-256 content addresses
/// 
/// Checkpoints and BLS signatures are identified by the digest of their
/// fields concatenated in a fixed order. Block hashes use the same type.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const HASH_SIZE: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }
}

// short form for log fields
impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..6]))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&hex::encode(self.0)).finish()
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Digest of `fields` laid end to end. No separators are inserted, so
/// every field but the last must have a fixed width.
pub fn hash_fields(fields: &[&[u8]]) -> Hash {
    let digest = fields
        .iter()
        .fold(Sha256::new(), |hasher, field| hasher.chain_update(field))
        .finalize();
    Hash(digest.into())
}
