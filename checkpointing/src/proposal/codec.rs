/// Injected checkpoint tx codec
/// 
/// Layout: 4-byte big-endian body length, then the bincode body.

use super::types::{CodecError, InjectedCheckpoint};

/// Index of the injected tx in a vote-extension proposal
pub const INJECTED_TX_INDEX: usize = 0;

const LENGTH_PREFIX: usize = 4;

pub fn encode_injected_checkpoint(injected: &InjectedCheckpoint) -> Result<Vec<u8>, CodecError> {
    let body = bincode::serialize(injected).map_err(|e| CodecError::Bincode(e.to_string()))?;
    let len = u32::try_from(body.len()).map_err(|_| CodecError::TooLarge(body.len()))?;

    let mut tx = Vec::with_capacity(LENGTH_PREFIX + body.len());
    tx.extend_from_slice(&len.to_be_bytes());
    tx.extend_from_slice(&body);
    Ok(tx)
}

pub fn decode_injected_checkpoint(tx: &[u8]) -> Result<InjectedCheckpoint, CodecError> {
    if tx.is_empty() {
        return Err(CodecError::Empty);
    }
    if tx.len() < LENGTH_PREFIX {
        return Err(CodecError::LengthMismatch { declared: LENGTH_PREFIX, actual: tx.len() });
    }

    let (prefix, body) = tx.split_at(LENGTH_PREFIX);
    let mut raw = [0u8; LENGTH_PREFIX];
    raw.copy_from_slice(prefix);
    let declared = u32::from_be_bytes(raw) as usize;
    if declared != body.len() {
        return Err(CodecError::LengthMismatch { declared, actual: body.len() });
    }

    bincode::deserialize(body).map_err(|e| CodecError::Bincode(e.to_string()))
}

/// Decode the injected checkpoint at its fixed index
pub fn extract_injected_checkpoint(txs: &[Vec<u8>]) -> Result<InjectedCheckpoint, CodecError> {
    let tx = txs.get(INJECTED_TX_INDEX).ok_or(CodecError::Missing)?;
    decode_injected_checkpoint(tx)
}

/// The tx set without the injected tx
pub fn remove_injected_tx(mut txs: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, CodecError> {
    if txs.len() <= INJECTED_TX_INDEX {
        return Err(CodecError::Missing);
    }
    txs.remove(INJECTED_TX_INDEX);
    Ok(txs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::RawCheckpointWithMeta;
    use crate::crypto::Hash;
    use crate::proposal::types::ExtendedCommitInfo;

    fn injected() -> InjectedCheckpoint {
        InjectedCheckpoint {
            ckpt: RawCheckpointWithMeta::accumulating(3, Hash::new([5; 32]), 104),
            extended_commit_info: ExtendedCommitInfo { round: 2, votes: Vec::new() },
        }
    }

    #[test]
    fn test_length_prefix() {
        let tx = encode_injected_checkpoint(&injected()).unwrap();
        let declared = u32::from_be_bytes([tx[0], tx[1], tx[2], tx[3]]) as usize;
        assert_eq!(declared, tx.len() - 4);
        assert_eq!(decode_injected_checkpoint(&tx).unwrap(), injected());
    }

    #[test]
    fn test_truncated_or_padded_tx_rejected() {
        let tx = encode_injected_checkpoint(&injected()).unwrap();

        let truncated = &tx[..tx.len() - 1];
        assert!(matches!(
            decode_injected_checkpoint(truncated),
            Err(CodecError::LengthMismatch { .. })
        ));

        let mut padded = tx.clone();
        padded.push(0);
        assert!(matches!(
            decode_injected_checkpoint(&padded),
            Err(CodecError::LengthMismatch { .. })
        ));

        assert_eq!(decode_injected_checkpoint(&[]), Err(CodecError::Empty));
        assert!(decode_injected_checkpoint(&[0, 0]).is_err());
    }

    #[test]
    fn test_garbage_body_rejected() {
        let mut tx = 3u32.to_be_bytes().to_vec();
        tx.extend_from_slice(&[0xff, 0xff, 0xff]);
        assert!(matches!(decode_injected_checkpoint(&tx), Err(CodecError::Bincode(_))));
    }

    #[test]
    fn test_extract_and_remove() {
        let tx = encode_injected_checkpoint(&injected()).unwrap();
        let txs = vec![tx, b"transfer".to_vec()];

        assert_eq!(extract_injected_checkpoint(&txs).unwrap(), injected());
        assert_eq!(remove_injected_tx(txs).unwrap(), vec![b"transfer".to_vec()]);

        assert_eq!(extract_injected_checkpoint(&[]), Err(CodecError::Missing));
        assert_eq!(remove_injected_tx(Vec::new()), Err(CodecError::Missing));
    }
}
