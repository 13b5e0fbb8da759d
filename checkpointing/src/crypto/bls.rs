/// BLS12-381 signatures for checkpoint attestation
///
/// Uses the minimal-signature-size variant:
/// - Signatures on G1, 48 bytes compressed
/// - Public keys on G2, 96 bytes compressed
/// - Signatures and public keys aggregate one at a time, so a checkpoint
///   can fold in each validator's signature as it is verified

use blst::min_sig::{
    AggregatePublicKey, AggregateSignature, PublicKey as BlstPublicKey,
    SecretKey as BlstSecretKey, Signature as BlstSignature,
};
use blst::BLST_ERROR;
use std::fmt;
use thiserror::Error;

pub const BLS_SIGNATURE_SIZE: usize = 48;
pub const BLS_PUBLIC_KEY_SIZE: usize = 96;
pub const BLS_SECRET_KEY_SIZE: usize = 32;

/// Domain separation tag for signatures on G1
pub const DST: &[u8] = b"BLS_SIG_BLS12381G1_XMD:SHA-256_SSWU_RO_NUL_";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BLSError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid key")]
    InvalidKey,
    #[error("Invalid length: expected {expected}, got {got}")]
    InvalidLength { expected: usize, got: usize },
    #[error("Failed to aggregate BLS {0}")]
    AggregationFailed(&'static str),
    #[error("Empty public key set")]
    EmptyKeySet,
}

/// BLS secret key wrapper
#[derive(Clone)]
pub struct BLSSecretKey {
    inner: BlstSecretKey,
}

impl BLSSecretKey {
    /// Generate a new random secret key
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut ikm);
        // 32 bytes of IKM is always accepted by key_gen
        Self::from_seed(&ikm).unwrap_or_else(|_| unreachable!("32-byte IKM is valid"))
    }

    /// Derive a secret key from input keying material (at least 32 bytes)
    pub fn from_seed(ikm: &[u8]) -> Result<Self, BLSError> {
        if ikm.len() < 32 {
            return Err(BLSError::InvalidLength { expected: 32, got: ikm.len() });
        }
        let inner = BlstSecretKey::key_gen(ikm, &[]).map_err(|_| BLSError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        if bytes.len() != BLS_SECRET_KEY_SIZE {
            return Err(BLSError::InvalidLength {
                expected: BLS_SECRET_KEY_SIZE,
                got: bytes.len(),
            });
        }
        let inner = BlstSecretKey::from_bytes(bytes).map_err(|_| BLSError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; BLS_SECRET_KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> BLSPublicKey {
        BLSPublicKey(self.inner.sk_to_pk().compress())
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> BLSSignature {
        BLSSignature(self.inner.sign(message, DST, &[]).compress())
    }
}

impl fmt::Debug for BLSSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BLSSecretKey(..)")
    }
}

/// Compressed BLS public key (96 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BLSPublicKey([u8; BLS_PUBLIC_KEY_SIZE]);

impl BLSPublicKey {
    /// Create from compressed bytes, rejecting points not on the curve
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        if bytes.len() != BLS_PUBLIC_KEY_SIZE {
            return Err(BLSError::InvalidLength {
                expected: BLS_PUBLIC_KEY_SIZE,
                got: bytes.len(),
            });
        }
        BlstPublicKey::key_validate(bytes).map_err(|_| BLSError::InvalidKey)?;
        let mut out = [0u8; BLS_PUBLIC_KEY_SIZE];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; BLS_PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn point(&self) -> Result<BlstPublicKey, BLSError> {
        BlstPublicKey::uncompress(&self.0).map_err(|_| BLSError::InvalidKey)
    }
}

impl fmt::Display for BLSPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for BLSPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BLSPublicKey({})", hex::encode(self.0))
    }
}

impl_bytes_serde!(BLSPublicKey, "a 96-byte compressed BLS public key");

/// Compressed BLS signature (48 bytes)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BLSSignature([u8; BLS_SIGNATURE_SIZE]);

impl BLSSignature {
    /// Create from compressed bytes, rejecting points not on the curve
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        if bytes.len() != BLS_SIGNATURE_SIZE {
            return Err(BLSError::InvalidLength {
                expected: BLS_SIGNATURE_SIZE,
                got: bytes.len(),
            });
        }
        BlstSignature::uncompress(bytes).map_err(|_| BLSError::InvalidSignature)?;
        let mut out = [0u8; BLS_SIGNATURE_SIZE];
        out.copy_from_slice(bytes);
        Ok(Self(out))
    }

    pub fn as_bytes(&self) -> &[u8; BLS_SIGNATURE_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn point(&self) -> Result<BlstSignature, BLSError> {
        BlstSignature::uncompress(&self.0).map_err(|_| BLSError::InvalidSignature)
    }

    /// Verify this signature over `message` against a single public key
    pub fn verify(&self, public_key: &BLSPublicKey, message: &[u8]) -> bool {
        let (sig, pk) = match (self.point(), public_key.point()) {
            (Ok(sig), Ok(pk)) => (sig, pk),
            _ => return false,
        };
        sig.verify(true, message, DST, &[], &pk, true) == BLST_ERROR::BLST_SUCCESS
    }
}

impl fmt::Display for BLSSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for BLSSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BLSSignature({})", hex::encode(self.0))
    }
}

impl_bytes_serde!(BLSSignature, "a 48-byte compressed BLS signature");

/// BLS Key pair (secret + public key)
#[derive(Clone, Debug)]
pub struct BLSKeyPair {
    pub secret_key: BLSSecretKey,
    pub public_key: BLSPublicKey,
}

impl BLSKeyPair {
    /// Generate a new key pair
    pub fn generate() -> Self {
        Self::from_secret(BLSSecretKey::generate())
    }

    /// Deterministic key pair from a 32-byte seed
    pub fn from_seed(seed: &[u8]) -> Result<Self, BLSError> {
        Ok(Self::from_secret(BLSSecretKey::from_seed(seed)?))
    }

    pub fn from_secret(secret_key: BLSSecretKey) -> Self {
        let public_key = secret_key.public_key();
        Self { secret_key, public_key }
    }
}

/// Verify a BLS signature over `message`
pub fn verify(signature: &BLSSignature, public_key: &BLSPublicKey, message: &[u8]) -> bool {
    signature.verify(public_key, message)
}

/// Aggregate a list of signatures into one
pub fn aggregate_signatures(signatures: &[BLSSignature]) -> Result<BLSSignature, BLSError> {
    let points = signatures
        .iter()
        .map(BLSSignature::point)
        .collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&BlstSignature> = points.iter().collect();
    let aggregated = AggregateSignature::aggregate(&refs, false)
        .map_err(|_| BLSError::AggregationFailed("signatures"))?
        .to_signature();
    Ok(BLSSignature(aggregated.compress()))
}

/// Aggregate a list of public keys into one
pub fn aggregate_public_keys(public_keys: &[BLSPublicKey]) -> Result<BLSPublicKey, BLSError> {
    if public_keys.is_empty() {
        return Err(BLSError::EmptyKeySet);
    }
    let points = public_keys
        .iter()
        .map(BLSPublicKey::point)
        .collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&BlstPublicKey> = points.iter().collect();
    let aggregated = AggregatePublicKey::aggregate(&refs, false)
        .map_err(|_| BLSError::AggregationFailed("public keys"))?
        .to_public_key();
    Ok(BLSPublicKey(aggregated.compress()))
}

/// Fold `new` into an existing running aggregate signature
pub fn aggr_sig(
    existing: Option<&BLSSignature>,
    new: &BLSSignature,
) -> Result<BLSSignature, BLSError> {
    match existing {
        None => Ok(*new),
        Some(existing) => aggregate_signatures(&[*existing, *new]),
    }
}

/// Fold `new` into an existing running aggregate public key
pub fn aggr_pk(
    existing: Option<&BLSPublicKey>,
    new: &BLSPublicKey,
) -> Result<BLSPublicKey, BLSError> {
    match existing {
        None => Ok(*new),
        Some(existing) => aggregate_public_keys(&[*existing, *new]),
    }
}

/// Verify an aggregate signature over `message` against the signer keys
pub fn verify_multi_sig(
    signature: &BLSSignature,
    public_keys: &[BLSPublicKey],
    message: &[u8],
) -> Result<bool, BLSError> {
    let aggregated = aggregate_public_keys(public_keys)?;
    Ok(signature.verify(&aggregated, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let keypair = BLSKeyPair::generate();
        let message = b"epoch 5 block hash";

        let sig = keypair.secret_key.sign(message);
        assert!(verify(&sig, &keypair.public_key, message));
        assert!(!verify(&sig, &keypair.public_key, b"another message"));

        let other = BLSKeyPair::generate();
        assert!(!verify(&sig, &other.public_key, message));
    }

    #[test]
    fn test_compressed_sizes() {
        let keypair = BLSKeyPair::generate();
        let sig = keypair.secret_key.sign(b"m");

        assert_eq!(sig.as_bytes().len(), BLS_SIGNATURE_SIZE);
        assert_eq!(keypair.public_key.as_bytes().len(), BLS_PUBLIC_KEY_SIZE);
    }

    #[test]
    fn test_deterministic_from_seed() {
        let a = BLSKeyPair::from_seed(&[7u8; 32]).unwrap();
        let b = BLSKeyPair::from_seed(&[7u8; 32]).unwrap();
        assert_eq!(a.public_key, b.public_key);

        assert!(BLSKeyPair::from_seed(&[7u8; 16]).is_err());
    }

    #[test]
    fn test_accumulative_aggregation_matches_batch() {
        let message = b"checkpoint";
        let keypairs: Vec<_> = (0..4).map(|_| BLSKeyPair::generate()).collect();
        let sigs: Vec<_> = keypairs.iter().map(|k| k.secret_key.sign(message)).collect();
        let pks: Vec<_> = keypairs.iter().map(|k| k.public_key).collect();

        let mut running_sig: Option<BLSSignature> = None;
        let mut running_pk: Option<BLSPublicKey> = None;
        for (sig, pk) in sigs.iter().zip(pks.iter()) {
            running_sig = Some(aggr_sig(running_sig.as_ref(), sig).unwrap());
            running_pk = Some(aggr_pk(running_pk.as_ref(), pk).unwrap());
        }
        let running_sig = running_sig.unwrap();

        assert_eq!(running_sig, aggregate_signatures(&sigs).unwrap());
        assert!(verify(&running_sig, &running_pk.unwrap(), message));
        assert!(verify_multi_sig(&running_sig, &pks, message).unwrap());

        // missing one signer's key
        assert!(!verify_multi_sig(&running_sig, &pks[..3], message).unwrap());
    }

    #[test]
    fn test_verify_multi_sig_empty_keys() {
        let keypair = BLSKeyPair::generate();
        let sig = keypair.secret_key.sign(b"m");
        assert_eq!(verify_multi_sig(&sig, &[], b"m"), Err(BLSError::EmptyKeySet));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(BLSPublicKey::from_bytes(&[0u8; 10]).is_err());
        assert!(BLSPublicKey::from_bytes(&[0xffu8; BLS_PUBLIC_KEY_SIZE]).is_err());
        assert!(BLSSignature::from_bytes(&[0xffu8; BLS_SIGNATURE_SIZE]).is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let keypair = BLSKeyPair::generate();
        let sig = keypair.secret_key.sign(b"m");

        let bytes = bincode::serialize(&(keypair.public_key, sig)).unwrap();
        let (pk, restored): (BLSPublicKey, BLSSignature) = bincode::deserialize(&bytes).unwrap();
        assert_eq!(pk, keypair.public_key);
        assert_eq!(restored, sig);

        let json = serde_json::to_string(&keypair.public_key).unwrap();
        let from_json: BLSPublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(from_json, keypair.public_key);
    }
}
