//! Spent output index.
//!
//! Maps an outpoint to the transaction input that spends it, and the height at which the
//! spend happened. Spends by unconfirmed transactions are stored with
//! [`SpendHeight::Mempool`] and move to a confirmed height when the spender is mined.

use cashd_consensus::Hash256;
use cashd_primitives::address::AddressType;
use cashd_primitives::outpoint::OutPoint;
use cashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::utxo::{outpoint_key_bytes, OutPointKey};

const SPENT_INDEX_VALUE_LEN: usize = 69;
const MEMPOOL_HEIGHT: i32 = -1;

/// Where the spending transaction currently lives.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpendHeight {
    Mempool,
    Confirmed(u32),
}

impl SpendHeight {
    /// Height as reported over RPC, `-1` for an unconfirmed spender.
    pub fn as_i64(self) -> i64 {
        match self {
            SpendHeight::Mempool => i64::from(MEMPOOL_HEIGHT),
            SpendHeight::Confirmed(height) => i64::from(height),
        }
    }

    pub fn is_mempool(self) -> bool {
        matches!(self, SpendHeight::Mempool)
    }

    fn encode(self) -> i32 {
        match self {
            SpendHeight::Mempool => MEMPOOL_HEIGHT,
            SpendHeight::Confirmed(height) => height as i32,
        }
    }

    fn decode(raw: i32) -> Option<Self> {
        match raw {
            MEMPOOL_HEIGHT => Some(SpendHeight::Mempool),
            height if height >= 0 => Some(SpendHeight::Confirmed(height as u32)),
            _ => None,
        }
    }
}

/// The spent output itself: its value and the address it paid.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpentIndexDetails {
    pub satoshis: i64,
    pub address_type: AddressType,
    pub address_hash: [u8; 20],
}

impl SpentIndexDetails {
    pub fn from_output(satoshis: i64, script_pubkey: &[u8]) -> Self {
        let (address_type, address_hash) = AddressType::from_script(script_pubkey);
        Self {
            satoshis,
            address_type,
            address_hash,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SpentIndexValue {
    pub txid: Hash256,
    pub input_index: u32,
    pub height: SpendHeight,
    pub details: SpentIndexDetails,
}

impl SpentIndexValue {
    pub fn encode(&self) -> [u8; SPENT_INDEX_VALUE_LEN] {
        let mut out = [0u8; SPENT_INDEX_VALUE_LEN];
        out[0..32].copy_from_slice(&self.txid);
        out[32..36].copy_from_slice(&self.input_index.to_le_bytes());
        out[36..40].copy_from_slice(&self.height.encode().to_le_bytes());
        out[40..48].copy_from_slice(&self.details.satoshis.to_le_bytes());
        out[48] = self.details.address_type as u8;
        out[49..69].copy_from_slice(&self.details.address_hash);
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != SPENT_INDEX_VALUE_LEN {
            return None;
        }
        let txid: Hash256 = bytes[0..32].try_into().ok()?;
        let input_index = u32::from_le_bytes(bytes[32..36].try_into().ok()?);
        let height = SpendHeight::decode(i32::from_le_bytes(bytes[36..40].try_into().ok()?))?;
        let satoshis = i64::from_le_bytes(bytes[40..48].try_into().ok()?);
        let address_type = AddressType::from_u8(bytes[48])?;
        let address_hash: [u8; 20] = bytes[49..69].try_into().ok()?;
        Some(Self {
            txid,
            input_index,
            height,
            details: SpentIndexDetails {
                satoshis,
                address_type,
                address_hash,
            },
        })
    }

    /// True when this record is the mempool spend by input `input_index` of `txid`.
    pub fn is_mempool_spend_by(&self, txid: &Hash256, input_index: u32) -> bool {
        self.height.is_mempool() && self.txid == *txid && self.input_index == input_index
    }
}

pub struct SpentIndex<S> {
    store: S,
}

impl<S> SpentIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> SpentIndex<S> {
    /// Upsert. Writing the same record twice leaves the index unchanged.
    pub fn record_spend(&self, batch: &mut WriteBatch, outpoint: &OutPoint, value: &SpentIndexValue) {
        let key = outpoint_key_bytes(outpoint);
        batch.put(Column::SpentIndex, key.as_bytes(), value.encode());
    }

    pub fn remove_spend(&self, batch: &mut WriteBatch, outpoint: &OutPoint) {
        let key = outpoint_key_bytes(outpoint);
        batch.delete(Column::SpentIndex, key.as_bytes());
    }

    /// `Ok(None)` means the outpoint is unspent or was never indexed.
    pub fn lookup_spend(&self, outpoint: &OutPoint) -> Result<Option<SpentIndexValue>, StoreError> {
        let key = outpoint_key_bytes(outpoint);
        let Some(bytes) = self.store.get(Column::SpentIndex, key.as_bytes())? else {
            return Ok(None);
        };
        SpentIndexValue::decode(&bytes)
            .ok_or_else(|| StoreError::Backend("invalid spent index entry".to_string()))
            .map(Some)
    }

    /// Every outpoint whose recorded spender is still unconfirmed.
    pub fn mempool_spends(&self) -> Result<Vec<OutPoint>, StoreError> {
        let mut out = Vec::new();
        let mut visitor = |key: &[u8], value: &[u8]| -> Result<(), StoreError> {
            let value = SpentIndexValue::decode(value)
                .ok_or_else(|| StoreError::Backend("invalid spent index entry".to_string()))?;
            if value.height.is_mempool() {
                let key = OutPointKey::from_slice(key)
                    .ok_or_else(|| StoreError::Backend("invalid spent index key".to_string()))?;
                out.push(key.to_outpoint());
            }
            Ok(())
        };
        self.store
            .for_each_prefix(Column::SpentIndex, &[], &mut visitor)?;
        Ok(out)
    }

    /// Deletes every record, for a rebuild from the main chain.
    pub fn clear(&self, batch: &mut WriteBatch) -> Result<usize, StoreError> {
        let entries = self.store.scan_prefix(Column::SpentIndex, &[])?;
        let count = entries.len();
        for (key, _) in entries {
            batch.delete(Column::SpentIndex, key);
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashd_primitives::address::p2sh_script;
    use cashd_storage::memory::MemoryStore;
    use std::sync::Arc;

    fn value(height: SpendHeight) -> SpentIndexValue {
        SpentIndexValue {
            txid: [0x11; 32],
            input_index: 3,
            height,
            details: SpentIndexDetails::from_output(7_500, &p2sh_script(&[0x22; 20])),
        }
    }

    #[test]
    fn mempool_height_encodes_as_minus_one() {
        let encoded = value(SpendHeight::Mempool).encode();
        assert_eq!(&encoded[36..40], &(-1i32).to_le_bytes());
        assert_eq!(SpendHeight::Mempool.as_i64(), -1);
        assert_eq!(SpendHeight::Confirmed(42).as_i64(), 42);
        assert_eq!(
            SpentIndexValue::decode(&encoded).expect("decode").height,
            SpendHeight::Mempool
        );
    }

    #[test]
    fn details_carry_address() {
        let details = value(SpendHeight::Confirmed(1)).details;
        assert_eq!(details.address_type, AddressType::P2sh);
        assert_eq!(details.address_hash, [0x22; 20]);
    }

    #[test]
    fn record_is_idempotent_and_lookup_distinguishes_miss() {
        let store = Arc::new(MemoryStore::new());
        let index = SpentIndex::new(Arc::clone(&store));
        let outpoint = OutPoint::new([0x33; 32], 0);
        assert_eq!(index.lookup_spend(&outpoint).expect("lookup"), None);

        for _ in 0..2 {
            let mut batch = WriteBatch::new();
            index.record_spend(&mut batch, &outpoint, &value(SpendHeight::Confirmed(9)));
            store.write_batch(&batch).expect("write");
        }
        assert_eq!(
            index.lookup_spend(&outpoint).expect("lookup"),
            Some(value(SpendHeight::Confirmed(9)))
        );

        let mut batch = WriteBatch::new();
        index.remove_spend(&mut batch, &outpoint);
        store.write_batch(&batch).expect("write");
        assert_eq!(index.lookup_spend(&outpoint).expect("lookup"), None);
    }

    #[test]
    fn corrupt_entry_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        let outpoint = OutPoint::new([0x44; 32], 1);
        store
            .put(
                Column::SpentIndex,
                outpoint_key_bytes(&outpoint).as_bytes(),
                &[1, 2, 3],
            )
            .expect("put");
        let index = SpentIndex::new(store);
        assert!(index.lookup_spend(&outpoint).is_err());
    }

    #[test]
    fn lists_only_mempool_spends() {
        let store = Arc::new(MemoryStore::new());
        let index = SpentIndex::new(Arc::clone(&store));
        let confirmed = OutPoint::new([0x01; 32], 0);
        let pending = OutPoint::new([0x02; 32], 5);
        let mut batch = WriteBatch::new();
        index.record_spend(&mut batch, &confirmed, &value(SpendHeight::Confirmed(3)));
        index.record_spend(&mut batch, &pending, &value(SpendHeight::Mempool));
        store.write_batch(&batch).expect("write");
        assert_eq!(index.mempool_spends().expect("scan"), vec![pending]);
    }
}
