//! Per-block undo data: the coins a block spent, in spend order.

use cashd_primitives::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use cashd_primitives::outpoint::OutPoint;

use crate::utxo::UtxoEntry;

const BLOCK_UNDO_VERSION: u8 = 1;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SpentOutput {
    pub outpoint: OutPoint,
    pub entry: UtxoEntry,
}

/// Spent coins of every non-coinbase input, ordered by transaction then input.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockUndo {
    pub spent: Vec<SpentOutput>,
}

impl BlockUndo {
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_u8(BLOCK_UNDO_VERSION);
        encoder.write_varint(self.spent.len() as u64);
        for spent in &self.spent {
            spent.outpoint.consensus_encode(&mut encoder);
            encoder.write_bytes(&spent.entry.encode());
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        if decoder.read_u8()? != BLOCK_UNDO_VERSION {
            return Err(DecodeError::InvalidData("unsupported block undo version"));
        }
        let count = decoder.read_varint()? as usize;
        let mut spent = Vec::with_capacity(count.min(decoder.remaining() / 45));
        for _ in 0..count {
            let outpoint = OutPoint::consensus_decode(&mut decoder)?;
            let entry = UtxoEntry::decode_from(&mut decoder)?;
            spent.push(SpentOutput { outpoint, entry });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { spent })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = BlockUndo::default().encode();
        bytes[0] = 9;
        assert!(matches!(
            BlockUndo::decode(&bytes),
            Err(DecodeError::InvalidData(_))
        ));
    }

    #[test]
    fn preserves_spend_order() {
        let undo = BlockUndo {
            spent: (0..3u32)
                .map(|index| SpentOutput {
                    outpoint: OutPoint::new([index as u8; 32], index),
                    entry: UtxoEntry {
                        value: i64::from(index) * 10,
                        script_pubkey: vec![0x51; index as usize],
                        height: index,
                        is_coinbase: index == 0,
                    },
                })
                .collect(),
        };
        assert_eq!(BlockUndo::decode(&undo.encode()).expect("decode"), undo);
    }
}
