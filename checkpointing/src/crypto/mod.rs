/// Cryptography for epoch checkpointing
/// 
/// Implements:
/// - BLS12-381 signatures (48-byte signatures, 96-byte public keys) with
///   accumulative aggregation
/// - Ed25519 consensus-key signatures
/// - SHA-256 content hashing

#[macro_use]
mod serde_bytes;

pub mod bls;
pub mod ed25519;
pub mod hash;

pub use bls::{
    BLSError, BLSKeyPair, BLSPublicKey, BLSSecretKey, BLSSignature,
    aggr_pk, aggr_sig, aggregate_public_keys, aggregate_signatures, verify_multi_sig,
};
pub use ed25519::{Ed25519Error, Ed25519PublicKey, Ed25519SecretKey, Ed25519Signature};
pub use hash::{hash_fields, Hash};
