//! Block index: per-block metadata, the main-chain height map and the best block pointer.

use cashd_consensus::Hash256;
use cashd_primitives::block::BlockHeader;
use cashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use cashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

const META_BEST_BLOCK_KEY: &[u8] = b"best_block";

pub const STATUS_HAVE_DATA: u8 = 1 << 0;
pub const STATUS_HAVE_UNDO: u8 = 1 << 1;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockIndexEntry {
    pub header: BlockHeader,
    pub height: i32,
    pub tx_count: u32,
    /// Serialized block size in bytes.
    pub size: u32,
    pub status: u8,
}

impl BlockIndexEntry {
    pub fn has_data(&self) -> bool {
        self.status & STATUS_HAVE_DATA != 0
    }

    pub fn has_undo(&self) -> bool {
        self.status & STATUS_HAVE_UNDO != 0
    }

    fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(80 + 13);
        encoder.write_bytes(&self.header.consensus_encode());
        encoder.write_i32_le(self.height);
        encoder.write_u32_le(self.tx_count);
        encoder.write_u32_le(self.size);
        encoder.write_u8(self.status);
        encoder.into_inner()
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let header = BlockHeader {
            version: decoder.read_i32_le()?,
            prev_block: decoder.read_hash_le()?,
            merkle_root: decoder.read_hash_le()?,
            time: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
        };
        let entry = Self {
            header,
            height: decoder.read_i32_le()?,
            tx_count: decoder.read_u32_le()?,
            size: decoder.read_u32_le()?,
            status: decoder.read_u8()?,
        };
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(entry)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChainTip {
    pub hash: Hash256,
    pub height: i32,
}

pub struct ChainIndex<S> {
    store: S,
}

impl<S> ChainIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> ChainIndex<S> {
    pub fn get(&self, hash: &Hash256) -> Result<Option<BlockIndexEntry>, StoreError> {
        let Some(bytes) = self.store.get(Column::BlockIndex, hash)? else {
            return Ok(None);
        };
        BlockIndexEntry::decode(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Backend(format!("invalid block index entry: {err}")))
    }

    pub fn put(&self, batch: &mut WriteBatch, hash: &Hash256, entry: &BlockIndexEntry) {
        batch.put(Column::BlockIndex, hash, entry.encode());
    }

    pub fn best_block(&self) -> Result<Option<ChainTip>, StoreError> {
        let Some(bytes) = self.store.get(Column::Meta, META_BEST_BLOCK_KEY)? else {
            return Ok(None);
        };
        let hash = decode_hash(&bytes)?;
        let entry = self
            .get(&hash)?
            .ok_or_else(|| StoreError::Backend("best block missing from block index".to_string()))?;
        Ok(Some(ChainTip {
            hash,
            height: entry.height,
        }))
    }

    pub fn set_best_block(&self, batch: &mut WriteBatch, hash: &Hash256) {
        batch.put(Column::Meta, META_BEST_BLOCK_KEY, *hash);
    }

    pub fn clear_best_block(&self, batch: &mut WriteBatch) {
        batch.delete(Column::Meta, META_BEST_BLOCK_KEY);
    }

    /// Main-chain block at `height`.
    pub fn height_hash(&self, height: i32) -> Result<Option<Hash256>, StoreError> {
        let Some(bytes) = self.store.get(Column::HeightIndex, &height_key(height))? else {
            return Ok(None);
        };
        decode_hash(&bytes).map(Some)
    }

    pub fn set_height_hash(&self, batch: &mut WriteBatch, height: i32, hash: &Hash256) {
        batch.put(Column::HeightIndex, height_key(height), *hash);
    }

    pub fn clear_height_hash(&self, batch: &mut WriteBatch, height: i32) {
        batch.delete(Column::HeightIndex, height_key(height));
    }

    /// Median of the last `span` block times ending at `hash`.
    pub fn median_time_past(&self, hash: &Hash256, span: usize) -> Result<i64, StoreError> {
        let mut times = Vec::with_capacity(span);
        let mut cursor = *hash;
        while times.len() < span {
            let Some(entry) = self.get(&cursor)? else {
                break;
            };
            times.push(i64::from(entry.header.time));
            if entry.height == 0 {
                break;
            }
            cursor = entry.header.prev_block;
        }
        if times.is_empty() {
            return Ok(0);
        }
        times.sort_unstable();
        Ok(times[times.len() / 2])
    }
}

/// Big-endian so the height column iterates in chain order.
pub fn height_key(height: i32) -> [u8; 4] {
    (height as u32).to_be_bytes()
}

fn decode_hash(bytes: &[u8]) -> Result<Hash256, StoreError> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Backend("invalid hash length".to_string()))
}
