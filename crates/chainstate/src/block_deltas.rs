//! Per-block address deltas, stored under the block hash.
//!
//! Every transaction of the block has a slot, in block order. Inputs and outputs that do
//! not touch a P2PKH/P2SH address are left out of their slot, so the coinbase and
//! non-address transactions have empty lists.

use cashd_consensus::Hash256;
use cashd_primitives::address::AddressType;
use cashd_primitives::block::Block;
use cashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use cashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::address_index::AddressId;
use crate::undo::SpentOutput;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InputDelta {
    pub index: u32,
    pub address: AddressId,
    /// Negative: the value leaving the address.
    pub satoshis: i64,
    pub prev_txid: Hash256,
    pub prev_index: u32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OutputDelta {
    pub index: u32,
    pub address: AddressId,
    pub satoshis: i64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxDeltas {
    pub txid: Hash256,
    pub index: u32,
    pub inputs: Vec<InputDelta>,
    pub outputs: Vec<OutputDelta>,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BlockDeltas {
    pub txs: Vec<TxDeltas>,
}

impl BlockDeltas {
    /// Builds the deltas of `block` given the coins its inputs spent, in spend order.
    pub fn build(block: &Block, spent: &[SpentOutput]) -> Result<Self, DecodeError> {
        let mut spent = spent.iter();
        let mut txs = Vec::with_capacity(block.transactions.len());
        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let mut deltas = TxDeltas {
                txid: tx.txid(),
                index: tx_index as u32,
                inputs: Vec::new(),
                outputs: Vec::new(),
            };
            if tx.is_coinbase() {
                txs.push(deltas);
                continue;
            }
            for (input_index, input) in tx.vin.iter().enumerate() {
                let coin = spent
                    .next()
                    .ok_or(DecodeError::InvalidData("undo shorter than block inputs"))?;
                if coin.outpoint != input.prevout {
                    return Err(DecodeError::InvalidData("undo does not match block inputs"));
                }
                if let Some(address) = AddressId::from_script(&coin.entry.script_pubkey) {
                    deltas.inputs.push(InputDelta {
                        index: input_index as u32,
                        address,
                        satoshis: -coin.entry.value,
                        prev_txid: input.prevout.hash,
                        prev_index: input.prevout.index,
                    });
                }
            }
            for (output_index, output) in tx.vout.iter().enumerate() {
                if let Some(address) = AddressId::from_script(&output.script_pubkey) {
                    deltas.outputs.push(OutputDelta {
                        index: output_index as u32,
                        address,
                        satoshis: output.value,
                    });
                }
            }
            txs.push(deltas);
        }
        Ok(Self { txs })
    }

    /// Sum of every delta in the block.
    pub fn net_satoshis(&self) -> i64 {
        self.txs
            .iter()
            .flat_map(|tx| {
                tx.inputs
                    .iter()
                    .map(|input| input.satoshis)
                    .chain(tx.outputs.iter().map(|output| output.satoshis))
            })
            .sum()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_varint(self.txs.len() as u64);
        for tx in &self.txs {
            encoder.write_bytes(&tx.txid);
            encoder.write_u32_le(tx.index);
            encoder.write_varint(tx.inputs.len() as u64);
            for input in &tx.inputs {
                encoder.write_u32_le(input.index);
                write_address(&mut encoder, &input.address);
                encoder.write_i64_le(input.satoshis);
                encoder.write_bytes(&input.prev_txid);
                encoder.write_u32_le(input.prev_index);
            }
            encoder.write_varint(tx.outputs.len() as u64);
            for output in &tx.outputs {
                encoder.write_u32_le(output.index);
                write_address(&mut encoder, &output.address);
                encoder.write_i64_le(output.satoshis);
            }
        }
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let tx_count = decoder.read_varint()? as usize;
        let mut txs = Vec::with_capacity(tx_count.min(decoder.remaining() / 38));
        for _ in 0..tx_count {
            let txid = decoder.read_fixed::<32>()?;
            let index = decoder.read_u32_le()?;
            let input_count = decoder.read_varint()? as usize;
            let mut inputs = Vec::with_capacity(input_count.min(decoder.remaining() / 69));
            for _ in 0..input_count {
                inputs.push(InputDelta {
                    index: decoder.read_u32_le()?,
                    address: read_address(&mut decoder)?,
                    satoshis: decoder.read_i64_le()?,
                    prev_txid: decoder.read_fixed::<32>()?,
                    prev_index: decoder.read_u32_le()?,
                });
            }
            let output_count = decoder.read_varint()? as usize;
            let mut outputs = Vec::with_capacity(output_count.min(decoder.remaining() / 33));
            for _ in 0..output_count {
                outputs.push(OutputDelta {
                    index: decoder.read_u32_le()?,
                    address: read_address(&mut decoder)?,
                    satoshis: decoder.read_i64_le()?,
                });
            }
            txs.push(TxDeltas {
                txid,
                index,
                inputs,
                outputs,
            });
        }
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(Self { txs })
    }
}

fn write_address(encoder: &mut Encoder, address: &AddressId) {
    encoder.write_u8(address.address_type as u8);
    encoder.write_bytes(&address.hash);
}

fn read_address(decoder: &mut Decoder<'_>) -> Result<AddressId, DecodeError> {
    let address_type = AddressType::from_u8(decoder.read_u8()?)
        .ok_or(DecodeError::InvalidData("unknown address type"))?;
    Ok(AddressId {
        address_type,
        hash: decoder.read_fixed::<20>()?,
    })
}

pub struct BlockDeltaIndex<S> {
    store: S,
}

impl<S> BlockDeltaIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> BlockDeltaIndex<S> {
    pub fn put(&self, batch: &mut WriteBatch, hash: &Hash256, deltas: &BlockDeltas) {
        batch.put(Column::BlockDeltas, hash, deltas.encode());
    }

    pub fn delete(&self, batch: &mut WriteBatch, hash: &Hash256) {
        batch.delete(Column::BlockDeltas, hash);
    }

    pub fn get(&self, hash: &Hash256) -> Result<Option<BlockDeltas>, StoreError> {
        let Some(bytes) = self.store.get(Column::BlockDeltas, hash)? else {
            return Ok(None);
        };
        BlockDeltas::decode(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Backend(format!("invalid block deltas entry: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utxo::UtxoEntry;
    use cashd_primitives::address::{p2pkh_script, p2sh_script};
    use cashd_primitives::block::BlockHeader;
    use cashd_primitives::outpoint::OutPoint;
    use cashd_primitives::transaction::{Transaction, TxIn, TxOut};

    fn coinbase() -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn::new(OutPoint::null(), vec![0x01, 0x07])],
            vout: vec![TxOut {
                value: 50,
                script_pubkey: p2pkh_script(&[0xcc; 20]),
            }],
            lock_time: 0,
        }
    }

    fn block(transactions: Vec<Transaction>) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_block: [0u8; 32],
                merkle_root: [0u8; 32],
                time: 0,
                bits: 0x207f_ffff,
                nonce: 0,
            },
            transactions,
        }
    }

    #[test]
    fn preserves_input_and_output_order() {
        let first = OutPoint::new([1; 32], 0);
        let second = OutPoint::new([2; 32], 3);
        let bare = OutPoint::new([3; 32], 1);
        let spend = Transaction {
            version: 2,
            vin: vec![
                TxIn::new(second.clone(), Vec::new()),
                TxIn::new(bare.clone(), Vec::new()),
                TxIn::new(first.clone(), Vec::new()),
            ],
            vout: vec![
                TxOut {
                    value: 10,
                    script_pubkey: p2sh_script(&[0xaa; 20]),
                },
                TxOut {
                    value: 0,
                    script_pubkey: vec![0x6a],
                },
                TxOut {
                    value: 25,
                    script_pubkey: p2pkh_script(&[0xbb; 20]),
                },
            ],
            lock_time: 0,
        };
        let coin = |value: i64, script: Vec<u8>| UtxoEntry {
            value,
            script_pubkey: script,
            height: 1,
            is_coinbase: false,
        };
        let spent = vec![
            SpentOutput {
                outpoint: second,
                entry: coin(20, p2pkh_script(&[0x02; 20])),
            },
            SpentOutput {
                outpoint: bare,
                entry: coin(5, vec![0x51]),
            },
            SpentOutput {
                outpoint: first,
                entry: coin(15, p2sh_script(&[0x01; 20])),
            },
        ];
        let deltas = BlockDeltas::build(&block(vec![coinbase(), spend]), &spent).expect("build");

        assert_eq!(deltas.txs.len(), 2);
        assert!(deltas.txs[0].inputs.is_empty());
        assert!(deltas.txs[0].outputs.is_empty());

        let tx = &deltas.txs[1];
        assert_eq!(tx.index, 1);
        let inputs: Vec<(u32, i64)> = tx.inputs.iter().map(|d| (d.index, d.satoshis)).collect();
        assert_eq!(inputs, vec![(0, -20), (2, -15)]);
        let outputs: Vec<(u32, i64)> = tx.outputs.iter().map(|d| (d.index, d.satoshis)).collect();
        assert_eq!(outputs, vec![(0, 10), (2, 25)]);
        assert_eq!(deltas.net_satoshis(), 0);

        assert_eq!(BlockDeltas::decode(&deltas.encode()).expect("decode"), deltas);
    }

    #[test]
    fn mismatched_undo_is_rejected() {
        let spend = Transaction {
            version: 2,
            vin: vec![TxIn::new(OutPoint::new([9; 32], 0), Vec::new())],
            vout: Vec::new(),
            lock_time: 0,
        };
        let wrong = SpentOutput {
            outpoint: OutPoint::new([8; 32], 0),
            entry: UtxoEntry {
                value: 1,
                script_pubkey: Vec::new(),
                height: 0,
                is_coinbase: false,
            },
        };
        assert!(BlockDeltas::build(&block(vec![coinbase(), spend.clone()]), &[wrong]).is_err());
        assert!(BlockDeltas::build(&block(vec![coinbase(), spend]), &[]).is_err());
    }
}
