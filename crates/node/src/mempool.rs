use std::collections::{HashMap, HashSet};

use cashd_consensus::params::hash256_to_hex;
use cashd_consensus::Hash256;
use cashd_primitives::block::Block;
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxOut};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MempoolErrorKind {
    AlreadyInMempool,
    ConflictingInput,
    MissingInput,
    InsufficientFee,
    NonStandard,
    InvalidTransaction,
    InvalidScript,
}

#[derive(Clone, Debug)]
pub struct MempoolError {
    pub kind: MempoolErrorKind,
    pub message: String,
}

impl MempoolError {
    pub fn new(kind: MempoolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for MempoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for MempoolError {}

pub struct MempoolEntry {
    pub txid: Hash256,
    pub tx: Transaction,
    pub raw: Vec<u8>,
    pub fee: i64,
    /// Outputs spent by `tx`, in input order.
    pub prevouts: Vec<TxOut>,
}

impl MempoolEntry {
    pub fn new(tx: Transaction, fee: i64, prevouts: Vec<TxOut>) -> Self {
        let raw = tx.consensus_encode();
        Self {
            txid: tx.txid(),
            tx,
            raw,
            fee,
            prevouts,
        }
    }

    pub fn size(&self) -> usize {
        self.raw.len()
    }

    pub fn spent_outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.tx.vin.iter().map(|input| &input.prevout)
    }
}

/// Unconfirmed transactions keyed by txid, with the outpoints they spend.
#[derive(Default)]
pub struct Mempool {
    entries: HashMap<Hash256, MempoolEntry>,
    spent: HashMap<OutPoint, Hash256>,
    total_bytes: usize,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn spender(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent.get(outpoint).copied()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn txids(&self) -> Vec<Hash256> {
        let mut txids: Vec<Hash256> = self.entries.keys().copied().collect();
        txids.sort();
        txids
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn entries(&self) -> impl Iterator<Item = &MempoolEntry> {
        self.entries.values()
    }

    /// Output created by an unconfirmed transaction.
    pub fn output(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        self.entries
            .get(&outpoint.hash)?
            .tx
            .vout
            .get(outpoint.index as usize)
    }

    /// Output spent by an unconfirmed transaction's input.
    pub fn spent_output(&self, outpoint: &OutPoint) -> Option<&TxOut> {
        let spender = self.spent.get(outpoint)?;
        let entry = self.entries.get(spender)?;
        let position = entry
            .tx
            .vin
            .iter()
            .position(|input| &input.prevout == outpoint)?;
        entry.prevouts.get(position)
    }

    pub fn insert(&mut self, entry: MempoolEntry) -> Result<(), MempoolError> {
        if self.entries.contains_key(&entry.txid) {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyInMempool,
                "txn-already-in-mempool",
            ));
        }
        for outpoint in entry.spent_outpoints() {
            if let Some(conflict) = self.spent.get(outpoint) {
                return Err(MempoolError::new(
                    MempoolErrorKind::ConflictingInput,
                    format!(
                        "txn-mempool-conflict: input {}:{} already spent by {}",
                        hash256_to_hex(&outpoint.hash),
                        outpoint.index,
                        hash256_to_hex(conflict)
                    ),
                ));
            }
        }
        for outpoint in entry.spent_outpoints() {
            self.spent.insert(outpoint.clone(), entry.txid);
        }
        self.total_bytes = self.total_bytes.saturating_add(entry.size());
        self.entries.insert(entry.txid, entry);
        Ok(())
    }

    pub fn remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        let entry = self.entries.remove(txid)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size());
        for outpoint in entry.spent_outpoints() {
            if self.spent.get(outpoint) == Some(txid) {
                self.spent.remove(outpoint);
            }
        }
        Some(entry)
    }

    /// Removes `txid` and every unconfirmed transaction spending its outputs, parents first.
    pub fn remove_with_descendants(&mut self, txid: &Hash256) -> Vec<MempoolEntry> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![*txid];
        while let Some(current) = stack.pop() {
            if !visited.insert(current) {
                continue;
            }
            let Some(entry) = self.entries.get(&current) else {
                continue;
            };
            order.push(current);
            for index in 0..entry.tx.vout.len() {
                if let Some(child) = self.spent.get(&OutPoint::new(current, index as u32)) {
                    stack.push(*child);
                }
            }
        }
        order
            .iter()
            .filter_map(|txid| self.remove(txid))
            .collect()
    }

    /// Drops the transactions mined in `block` and returns the entries it conflicts with.
    pub fn remove_for_block(&mut self, block: &Block) -> Vec<MempoolEntry> {
        let mut conflicts = Vec::new();
        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            let txid = tx.txid();
            if self.remove(&txid).is_some() {
                continue;
            }
            for input in &tx.vin {
                if let Some(spender) = self.spender(&input.prevout) {
                    conflicts.extend(self.remove_with_descendants(&spender));
                }
            }
        }
        conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashd_primitives::block::BlockHeader;
    use cashd_primitives::transaction::TxIn;

    fn tx(prevouts: &[OutPoint], value: i64) -> Transaction {
        Transaction {
            version: 2,
            vin: prevouts
                .iter()
                .map(|prevout| TxIn::new(prevout.clone(), vec![0x51]))
                .collect(),
            vout: vec![TxOut {
                value,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        }
    }

    fn entry(tx: Transaction) -> MempoolEntry {
        let prevouts = tx
            .vin
            .iter()
            .map(|_| TxOut {
                value: 1_000,
                script_pubkey: vec![0x51],
            })
            .collect();
        MempoolEntry::new(tx, 0, prevouts)
    }

    #[test]
    fn conflicting_spend_is_rejected() {
        let mut pool = Mempool::new();
        let funding = OutPoint::new([1u8; 32], 0);
        pool.insert(entry(tx(&[funding.clone()], 900))).expect("first");
        let err = pool
            .insert(entry(tx(&[funding.clone()], 800)))
            .expect_err("conflict");
        assert_eq!(err.kind, MempoolErrorKind::ConflictingInput);
        assert_eq!(pool.size(), 1);
        assert_eq!(pool.spent_output(&funding).map(|out| out.value), Some(1_000));
    }

    #[test]
    fn remove_with_descendants_takes_children() {
        let mut pool = Mempool::new();
        let parent = tx(&[OutPoint::new([1u8; 32], 0)], 900);
        let parent_txid = parent.txid();
        let child = tx(&[OutPoint::new(parent_txid, 0)], 800);
        let child_txid = child.txid();
        pool.insert(entry(parent)).expect("parent");
        pool.insert(entry(child)).expect("child");
        assert!(pool.output(&OutPoint::new(parent_txid, 0)).is_some());

        let removed = pool.remove_with_descendants(&parent_txid);
        let removed: Vec<Hash256> = removed.iter().map(|entry| entry.txid).collect();
        assert_eq!(removed, vec![parent_txid, child_txid]);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.bytes(), 0);
    }

    #[test]
    fn block_removes_mined_and_conflicting() {
        let mut pool = Mempool::new();
        let a = tx(&[OutPoint::new([1u8; 32], 0)], 900);
        let b = tx(&[OutPoint::new([2u8; 32], 0)], 900);
        let b_txid = b.txid();
        pool.insert(entry(a.clone())).expect("a");
        pool.insert(entry(b)).expect("b");

        let double_spend = tx(&[OutPoint::new([2u8; 32], 0)], 500);
        let coinbase = Transaction {
            version: 1,
            vin: vec![TxIn::new(OutPoint::null(), vec![0x01, 0x01])],
            vout: vec![TxOut {
                value: 50,
                script_pubkey: vec![0x51],
            }],
            lock_time: 0,
        };
        let block = Block {
            header: BlockHeader {
                version: 4,
                prev_block: [0u8; 32],
                merkle_root: [0u8; 32],
                time: 0,
                bits: 0,
                nonce: 0,
            },
            transactions: vec![coinbase, a, double_spend],
        };
        let conflicts = pool.remove_for_block(&block);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].txid, b_txid);
        assert_eq!(pool.size(), 0);
    }
}
