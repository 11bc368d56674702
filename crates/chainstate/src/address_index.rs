//! Address activity index.
//!
//! Two row kinds per P2PKH/P2SH address:
//! - delta rows, one per input or output touching the address, ordered by height and
//!   position in block so a prefix scan yields history in chain order;
//! - unspent rows, one per currently unspent output paying the address.

use cashd_consensus::Hash256;
use cashd_primitives::address::AddressType;
use cashd_primitives::encoding::{Decoder, Encoder};
use cashd_primitives::outpoint::OutPoint;
use cashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

use crate::utxo::{outpoint_key_bytes, OUTPOINT_KEY_LEN};

const ADDRESS_KEY_LEN: usize = 21;
const DELTA_KEY_LEN: usize = ADDRESS_KEY_LEN + 4 + 4 + 32 + 4 + 1;
const UNSPENT_KEY_LEN: usize = ADDRESS_KEY_LEN + OUTPOINT_KEY_LEN;

/// An address the index tracks: type byte plus the 20-byte key or script hash.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct AddressId {
    pub address_type: AddressType,
    pub hash: [u8; 20],
}

impl AddressId {
    /// `None` for scripts that pay neither a key hash nor a script hash.
    pub fn from_script(script_pubkey: &[u8]) -> Option<Self> {
        match AddressType::from_script(script_pubkey) {
            (AddressType::Unknown, _) => None,
            (address_type, hash) => Some(Self { address_type, hash }),
        }
    }

    fn key(&self) -> [u8; ADDRESS_KEY_LEN] {
        let mut out = [0u8; ADDRESS_KEY_LEN];
        out[0] = self.address_type as u8;
        out[1..].copy_from_slice(&self.hash);
        out
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddressDeltaEntry {
    pub height: u32,
    pub tx_index: u32,
    pub txid: Hash256,
    pub index: u32,
    pub spending: bool,
    pub satoshis: i64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressUnspentEntry {
    pub outpoint: OutPoint,
    pub satoshis: i64,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AddressBalance {
    pub balance: i64,
    pub received: i64,
}

pub struct AddressIndex<S> {
    store: S,
}

impl<S> AddressIndex<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> AddressIndex<S> {
    pub fn insert_delta(&self, batch: &mut WriteBatch, address: &AddressId, entry: &AddressDeltaEntry) {
        batch.put(
            Column::AddressDelta,
            delta_key(address, entry),
            entry.satoshis.to_le_bytes(),
        );
    }

    pub fn delete_delta(&self, batch: &mut WriteBatch, address: &AddressId, entry: &AddressDeltaEntry) {
        batch.delete(Column::AddressDelta, delta_key(address, entry));
    }

    pub fn put_unspent(&self, batch: &mut WriteBatch, address: &AddressId, entry: &AddressUnspentEntry) {
        let mut encoder = Encoder::new();
        encoder.write_i64_le(entry.satoshis);
        encoder.write_var_bytes(&entry.script_pubkey);
        encoder.write_u32_le(entry.height);
        batch.put(
            Column::AddressUnspent,
            unspent_key(address, &entry.outpoint),
            encoder.into_inner(),
        );
    }

    pub fn delete_unspent(&self, batch: &mut WriteBatch, address: &AddressId, outpoint: &OutPoint) {
        batch.delete(Column::AddressUnspent, unspent_key(address, outpoint));
    }

    /// Address history in chain order.
    pub fn address_deltas(&self, address: &AddressId) -> Result<Vec<AddressDeltaEntry>, StoreError> {
        let entries = self.store.scan_prefix(Column::AddressDelta, &address.key())?;
        entries
            .iter()
            .map(|(key, value)| {
                decode_delta(key, value)
                    .ok_or_else(|| StoreError::Backend("invalid address delta entry".to_string()))
            })
            .collect()
    }

    pub fn address_utxos(&self, address: &AddressId) -> Result<Vec<AddressUnspentEntry>, StoreError> {
        let entries = self.store.scan_prefix(Column::AddressUnspent, &address.key())?;
        let mut out = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let entry = decode_unspent(&key, &value)
                .ok_or_else(|| StoreError::Backend("invalid address unspent entry".to_string()))?;
            out.push(entry);
        }
        Ok(out)
    }

    pub fn address_balance(&self, address: &AddressId) -> Result<AddressBalance, StoreError> {
        let mut totals = AddressBalance::default();
        let mut visitor = |key: &[u8], value: &[u8]| -> Result<(), StoreError> {
            let entry = decode_delta(key, value)
                .ok_or_else(|| StoreError::Backend("invalid address delta entry".to_string()))?;
            totals.balance += entry.satoshis;
            if entry.satoshis > 0 {
                totals.received += entry.satoshis;
            }
            Ok(())
        };
        self.store
            .for_each_prefix(Column::AddressDelta, &address.key(), &mut visitor)?;
        Ok(totals)
    }
}

fn delta_key(address: &AddressId, entry: &AddressDeltaEntry) -> [u8; DELTA_KEY_LEN] {
    let mut out = [0u8; DELTA_KEY_LEN];
    out[..21].copy_from_slice(&address.key());
    out[21..25].copy_from_slice(&entry.height.to_be_bytes());
    out[25..29].copy_from_slice(&entry.tx_index.to_be_bytes());
    out[29..61].copy_from_slice(&entry.txid);
    out[61..65].copy_from_slice(&entry.index.to_le_bytes());
    out[65] = u8::from(entry.spending);
    out
}

fn decode_delta(key: &[u8], value: &[u8]) -> Option<AddressDeltaEntry> {
    if key.len() != DELTA_KEY_LEN {
        return None;
    }
    Some(AddressDeltaEntry {
        height: u32::from_be_bytes(key[21..25].try_into().ok()?),
        tx_index: u32::from_be_bytes(key[25..29].try_into().ok()?),
        txid: key[29..61].try_into().ok()?,
        index: u32::from_le_bytes(key[61..65].try_into().ok()?),
        spending: key[65] != 0,
        satoshis: i64::from_le_bytes(value.try_into().ok()?),
    })
}

fn unspent_key(address: &AddressId, outpoint: &OutPoint) -> [u8; UNSPENT_KEY_LEN] {
    let mut out = [0u8; UNSPENT_KEY_LEN];
    out[..ADDRESS_KEY_LEN].copy_from_slice(&address.key());
    out[ADDRESS_KEY_LEN..].copy_from_slice(outpoint_key_bytes(outpoint).as_bytes());
    out
}

fn decode_unspent(key: &[u8], value: &[u8]) -> Option<AddressUnspentEntry> {
    if key.len() != UNSPENT_KEY_LEN {
        return None;
    }
    let outpoint = crate::utxo::OutPointKey::from_slice(&key[ADDRESS_KEY_LEN..])?.to_outpoint();
    let mut decoder = Decoder::new(value);
    let satoshis = decoder.read_i64_le().ok()?;
    let script_pubkey = decoder.read_var_bytes().ok()?;
    let height = decoder.read_u32_le().ok()?;
    if !decoder.is_empty() {
        return None;
    }
    Some(AddressUnspentEntry {
        outpoint,
        satoshis,
        script_pubkey,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashd_primitives::address::{p2pkh_script, p2sh_script};
    use cashd_storage::memory::MemoryStore;
    use std::sync::Arc;

    fn delta(height: u32, tx_index: u32, satoshis: i64) -> AddressDeltaEntry {
        AddressDeltaEntry {
            height,
            tx_index,
            txid: [height as u8; 32],
            index: 0,
            spending: satoshis < 0,
            satoshis,
        }
    }

    #[test]
    fn only_hash_addresses_are_tracked() {
        assert!(AddressId::from_script(&[0x51]).is_none());
        let p2sh = AddressId::from_script(&p2sh_script(&[9; 20])).expect("p2sh");
        assert_eq!(p2sh.address_type, AddressType::P2sh);
        let p2pkh = AddressId::from_script(&p2pkh_script(&[9; 20])).expect("p2pkh");
        assert_ne!(p2sh, p2pkh);
    }

    #[test]
    fn deltas_come_back_in_chain_order() {
        let store = Arc::new(MemoryStore::new());
        let index = AddressIndex::new(Arc::clone(&store));
        let address = AddressId::from_script(&p2pkh_script(&[1; 20])).expect("address");
        let other = AddressId::from_script(&p2sh_script(&[1; 20])).expect("address");

        let mut batch = WriteBatch::new();
        index.insert_delta(&mut batch, &address, &delta(300, 1, -40));
        index.insert_delta(&mut batch, &address, &delta(2, 7, 100));
        index.insert_delta(&mut batch, &address, &delta(256, 0, 15));
        index.insert_delta(&mut batch, &other, &delta(1, 0, 999));
        store.write_batch(&batch).expect("write");

        let heights: Vec<u32> = index
            .address_deltas(&address)
            .expect("scan")
            .iter()
            .map(|entry| entry.height)
            .collect();
        assert_eq!(heights, vec![2, 256, 300]);
        assert_eq!(
            index.address_balance(&address).expect("balance"),
            AddressBalance {
                balance: 75,
                received: 115,
            }
        );
    }

    #[test]
    fn unspent_rows_roundtrip_and_delete() {
        let store = Arc::new(MemoryStore::new());
        let index = AddressIndex::new(Arc::clone(&store));
        let script = p2sh_script(&[4; 20]);
        let address = AddressId::from_script(&script).expect("address");
        let entry = AddressUnspentEntry {
            outpoint: OutPoint::new([5; 32], 2),
            satoshis: 1_234,
            script_pubkey: script,
            height: 77,
        };
        let mut batch = WriteBatch::new();
        index.put_unspent(&mut batch, &address, &entry);
        store.write_batch(&batch).expect("write");
        assert_eq!(index.address_utxos(&address).expect("scan"), vec![entry.clone()]);

        let mut batch = WriteBatch::new();
        index.delete_unspent(&mut batch, &address, &entry.outpoint);
        store.write_batch(&batch).expect("write");
        assert!(index.address_utxos(&address).expect("scan").is_empty());
    }
}
