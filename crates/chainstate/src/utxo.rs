//! Unspent output set keyed by outpoint.

use cashd_primitives::encoding::{DecodeError, Decoder, Encoder};
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::TxOut;
use cashd_storage::{Column, KeyValueStore, StoreError, WriteBatch};

pub const OUTPOINT_KEY_LEN: usize = 36;

/// A coin: the output itself plus where it was created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoEntry {
    pub value: i64,
    pub script_pubkey: Vec<u8>,
    pub height: u32,
    pub is_coinbase: bool,
}

impl UtxoEntry {
    pub fn from_output(output: &TxOut, height: u32, is_coinbase: bool) -> Self {
        Self {
            value: output.value,
            script_pubkey: output.script_pubkey.clone(),
            height,
            is_coinbase,
        }
    }

    pub fn to_output(&self) -> TxOut {
        TxOut {
            value: self.value,
            script_pubkey: self.script_pubkey.clone(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(8 + 1 + self.script_pubkey.len() + 5);
        encoder.write_i64_le(self.value);
        encoder.write_var_bytes(&self.script_pubkey);
        encoder.write_u32_le(self.height);
        encoder.write_u8(u8::from(self.is_coinbase));
        encoder.into_inner()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut decoder = Decoder::new(bytes);
        let entry = Self::decode_from(&mut decoder)?;
        if !decoder.is_empty() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(entry)
    }

    pub(crate) fn decode_from(decoder: &mut Decoder<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            value: decoder.read_i64_le()?,
            script_pubkey: decoder.read_var_bytes()?,
            height: decoder.read_u32_le()?,
            is_coinbase: decoder.read_u8()? != 0,
        })
    }
}

/// Storage key of an outpoint: txid followed by the little-endian output index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPointKey([u8; OUTPOINT_KEY_LEN]);

impl OutPointKey {
    pub fn new(outpoint: &OutPoint) -> Self {
        let mut bytes = [0u8; OUTPOINT_KEY_LEN];
        bytes[..32].copy_from_slice(&outpoint.hash);
        bytes[32..].copy_from_slice(&outpoint.index.to_le_bytes());
        Self(bytes)
    }

    pub fn to_outpoint(&self) -> OutPoint {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&self.0[..32]);
        let mut index = [0u8; 4];
        index.copy_from_slice(&self.0[32..]);
        OutPoint::new(hash, u32::from_le_bytes(index))
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; OUTPOINT_KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

pub fn outpoint_key_bytes(outpoint: &OutPoint) -> OutPointKey {
    OutPointKey::new(outpoint)
}

pub struct UtxoSet<S> {
    store: S,
}

impl<S> UtxoSet<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: KeyValueStore> UtxoSet<S> {
    pub fn get(&self, outpoint: &OutPoint) -> Result<Option<UtxoEntry>, StoreError> {
        let key = outpoint_key_bytes(outpoint);
        let Some(bytes) = self.store.get(Column::Utxo, key.as_bytes())? else {
            return Ok(None);
        };
        UtxoEntry::decode(&bytes)
            .map(Some)
            .map_err(|err| StoreError::Backend(format!("invalid utxo entry: {err}")))
    }

    pub fn put(&self, batch: &mut WriteBatch, outpoint: &OutPoint, entry: &UtxoEntry) {
        let key = outpoint_key_bytes(outpoint);
        batch.put(Column::Utxo, key.as_bytes(), entry.encode());
    }

    pub fn delete(&self, batch: &mut WriteBatch, outpoint: &OutPoint) {
        let key = outpoint_key_bytes(outpoint);
        batch.delete(Column::Utxo, key.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outpoint_key_layout() {
        let outpoint = OutPoint::new([7u8; 32], 0x0102_0304);
        let key = OutPointKey::new(&outpoint);
        assert_eq!(&key.as_bytes()[32..], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(key.to_outpoint(), outpoint);
        assert!(OutPointKey::from_slice(&[0u8; 35]).is_none());
    }

    #[test]
    fn entry_rejects_trailing_bytes() {
        let entry = UtxoEntry {
            value: 5_000,
            script_pubkey: vec![0x51],
            height: 12,
            is_coinbase: true,
        };
        let mut bytes = entry.encode();
        assert_eq!(UtxoEntry::decode(&bytes).expect("decode"), entry);
        bytes.push(0);
        assert!(matches!(
            UtxoEntry::decode(&bytes),
            Err(DecodeError::TrailingBytes)
        ));
    }
}
