//! Block hashes ordered by header time.

use cashd_consensus::Hash256;
use cashd_primitives::encoding::{Decoder, Encoder};
use cashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

const KEY_LEN: usize = 4 + 32;

fn timestamp_key(time: u32, hash: &Hash256) -> Vec<u8> {
    let mut encoder = Encoder::with_capacity(KEY_LEN);
    encoder.write_u32_be(time);
    encoder.write_hash_le(hash);
    encoder.into_inner()
}

pub struct TimestampIndex<S> {
    store: S,
}

impl<S> TimestampIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> TimestampIndex<S> {
    pub fn insert(&self, batch: &mut WriteBatch, time: u32, hash: &Hash256) {
        batch.put(Column::TimestampIndex, timestamp_key(time, hash), []);
    }

    pub fn delete(&self, batch: &mut WriteBatch, time: u32, hash: &Hash256) {
        batch.delete(Column::TimestampIndex, timestamp_key(time, hash));
    }

    /// Hashes of blocks with `low <= time < high`, oldest first.
    pub fn block_hashes_by_time(&self, high: u32, low: u32) -> Result<Vec<Hash256>, StoreError> {
        let mut out = Vec::new();
        if high <= low {
            return Ok(out);
        }
        let mut visitor = |key: &[u8], _: &[u8]| -> Result<(), StoreError> {
            let invalid = || StoreError::Backend("invalid timestamp index key".to_string());
            if key.len() != KEY_LEN {
                return Err(invalid());
            }
            let mut decoder = Decoder::new(key);
            let time = decoder.read_u32_be().map_err(|_| invalid())?;
            if (low..high).contains(&time) {
                out.push(decoder.read_hash_le().map_err(|_| invalid())?);
            }
            Ok(())
        };
        self.store
            .for_each_prefix(Column::TimestampIndex, &[], &mut visitor)?;
        Ok(out)
    }
}
