//! Chain and mempool glue: every path that changes either one goes through [`Node`], so
//! the spent index hears about each acceptance, eviction, connect and disconnect.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use cashd_chainstate::index::ChainTip;
use cashd_chainstate::{ChainState, ChainStateError};
use cashd_consensus::params::hash256_to_hex;
use cashd_consensus::Hash256;
use cashd_log::Category;
use cashd_primitives::block::Block;
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxOut};
use cashd_script::flags::block_script_flags;
use cashd_script::interpreter::verify_script;
use cashd_storage::KeyValueStore;

use crate::mempool::{Mempool, MempoolEntry, MempoolError, MempoolErrorKind};
use crate::oracle::{TransactionOracle, ValidationVerdict};
use crate::policy::MempoolPolicy;

#[derive(Debug)]
pub enum NodeError {
    Chain(ChainStateError),
    Mempool(MempoolError),
    InvalidBlock(String),
    LockPoisoned,
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeError::Chain(err) => write!(f, "{err}"),
            NodeError::Mempool(err) => write!(f, "{err}"),
            NodeError::InvalidBlock(message) => write!(f, "{message}"),
            NodeError::LockPoisoned => write!(f, "mempool lock poisoned"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<ChainStateError> for NodeError {
    fn from(err: ChainStateError) -> Self {
        NodeError::Chain(err)
    }
}

impl From<MempoolError> for NodeError {
    fn from(err: MempoolError) -> Self {
        NodeError::Mempool(err)
    }
}

pub struct Node<S> {
    chain: ChainState<S>,
    mempool: Mutex<Mempool>,
    policy: MempoolPolicy,
}

impl<S: KeyValueStore> Node<S> {
    pub fn new(chain: ChainState<S>, policy: MempoolPolicy) -> Self {
        Self {
            chain,
            mempool: Mutex::new(Mempool::new()),
            policy,
        }
    }

    /// Drops spend records left behind by the previous run's mempool.
    pub fn startup(&self) -> Result<usize, NodeError> {
        Ok(self.chain.purge_mempool_spends()?)
    }

    pub fn chain(&self) -> &ChainState<S> {
        &self.chain
    }

    pub fn policy(&self) -> &MempoolPolicy {
        &self.policy
    }

    pub fn mempool(&self) -> Result<MutexGuard<'_, Mempool>, NodeError> {
        self.mempool.lock().map_err(|_| NodeError::LockPoisoned)
    }

    pub fn validate_transaction(&self, tx: &Transaction) -> Result<ValidationVerdict, NodeError> {
        let mempool = self.mempool()?;
        Ok(TransactionOracle::new(&self.chain, &mempool, &self.policy).evaluate(tx)?)
    }

    /// Admits `tx` to the mempool and records its spends at mempool height.
    pub fn accept_transaction(&self, tx: Transaction) -> Result<Hash256, NodeError> {
        let mut mempool = self.mempool()?;
        self.accept_locked(&mut mempool, tx)
    }

    /// Checks the scripts of `block` against the tip, connects it and drops what it mined
    /// or invalidated from the mempool.
    pub fn submit_block(&self, block: &Block) -> Result<ChainTip, NodeError> {
        let mut mempool = self.mempool()?;
        self.verify_block_scripts(block)?;
        let tip = self.chain.connect_block(block)?;
        for entry in mempool.remove_for_block(block) {
            self.evict(&entry)?;
        }
        Ok(tip)
    }

    /// Disconnects the tip and returns its transactions to the mempool.
    ///
    /// Spends of the returned transactions move to mempool height in the same batch that
    /// disconnects the block; those that no longer pass acceptance are evicted afterwards.
    pub fn invalidate_tip(&self) -> Result<Block, NodeError> {
        let mut mempool = self.mempool()?;
        let returning: HashSet<Hash256> = self
            .chain
            .best_block()?
            .and_then(|tip| self.chain.read_block(&tip.hash).transpose())
            .transpose()?
            .map(|block| {
                block
                    .transactions
                    .iter()
                    .filter(|tx| !tx.is_coinbase())
                    .map(Transaction::txid)
                    .collect()
            })
            .unwrap_or_default();
        let block = self
            .chain
            .disconnect_tip(&|txid: &Hash256| returning.contains(txid))?;

        for tx in block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            match self.accept_locked(&mut mempool, tx.clone()) {
                Ok(_) => {}
                Err(NodeError::Mempool(err)) => {
                    cashd_log::log_category!(
                        Category::Reorg,
                        "dropping disconnected tx {}: {}",
                        hash256_to_hex(&tx.txid()),
                        err
                    );
                    self.chain.mempool_evicted(tx)?;
                }
                Err(err) => return Err(err),
            }
        }
        self.prune_unresolved(&mut mempool)?;
        Ok(block)
    }

    /// Removes `txid` and its descendants from the mempool.
    pub fn remove_transaction(&self, txid: &Hash256) -> Result<usize, NodeError> {
        let mut mempool = self.mempool()?;
        let removed = mempool.remove_with_descendants(txid);
        for entry in &removed {
            self.evict(entry)?;
        }
        Ok(removed.len())
    }

    fn accept_locked(&self, mempool: &mut Mempool, tx: Transaction) -> Result<Hash256, NodeError> {
        let txid = tx.txid();
        if mempool.contains(&txid) {
            return Err(MempoolError::new(
                MempoolErrorKind::AlreadyInMempool,
                "txn-already-in-mempool",
            )
            .into());
        }
        let verdict = TransactionOracle::new(&self.chain, mempool, &self.policy).evaluate(&tx)?;
        if !verdict.minable {
            return Err(rejection(&verdict).into());
        }

        let mut prevouts = Vec::with_capacity(tx.vin.len());
        for input in &tx.vin {
            let output = match self.chain.utxo(&input.prevout)? {
                Some(coin) => coin.to_output(),
                None => mempool
                    .output(&input.prevout)
                    .cloned()
                    .ok_or_else(|| MempoolError::new(MempoolErrorKind::MissingInput, "missing inputs"))?,
            };
            prevouts.push(output);
        }

        self.chain.mempool_accepted(&tx, &prevouts)?;
        mempool.insert(MempoolEntry::new(tx, verdict.txfee, prevouts))?;
        cashd_log::log_category!(
            Category::Mempool,
            "accepted {} (fee {})",
            hash256_to_hex(&txid),
            verdict.txfee
        );
        Ok(txid)
    }

    fn evict(&self, entry: &MempoolEntry) -> Result<(), NodeError> {
        let removed = self.chain.mempool_evicted(&entry.tx)?;
        cashd_log::log_category!(
            Category::Mempool,
            "evicted {} ({} spend records dropped)",
            hash256_to_hex(&entry.txid),
            removed
        );
        Ok(())
    }

    /// Evicts entries whose inputs resolve neither to a coin nor to another entry.
    fn prune_unresolved(&self, mempool: &mut Mempool) -> Result<(), NodeError> {
        let mut orphaned = Vec::new();
        for entry in mempool.entries() {
            for input in &entry.tx.vin {
                if self.chain.utxo(&input.prevout)?.is_none()
                    && mempool.output(&input.prevout).is_none()
                {
                    orphaned.push(entry.txid);
                    break;
                }
            }
        }
        for txid in orphaned {
            for entry in mempool.remove_with_descendants(&txid) {
                self.evict(&entry)?;
            }
        }
        Ok(())
    }

    fn verify_block_scripts(&self, block: &Block) -> Result<(), NodeError> {
        let flags = block_script_flags(&self.chain.params().consensus, self.chain.tip_context()?);
        let mut created: HashMap<OutPoint, TxOut> = HashMap::new();
        for tx in &block.transactions {
            let txid = tx.txid();
            if !tx.is_coinbase() {
                for (index, input) in tx.vin.iter().enumerate() {
                    let prevout = match created.get(&input.prevout) {
                        Some(output) => output.clone(),
                        None => match self.chain.utxo(&input.prevout)? {
                            Some(coin) => coin.to_output(),
                            // Left for connect_block to reject.
                            None => continue,
                        },
                    };
                    verify_script(
                        &input.script_sig,
                        &prevout.script_pubkey,
                        tx,
                        index,
                        prevout.value,
                        flags,
                    )
                    .map_err(|err| {
                        NodeError::InvalidBlock(format!(
                            "blk-bad-inputs: {}:{} {err}",
                            hash256_to_hex(&txid),
                            index
                        ))
                    })?;
                }
            }
            for (index, output) in tx.vout.iter().enumerate() {
                created.insert(OutPoint::new(txid, index as u32), output.clone());
            }
        }
        Ok(())
    }
}

/// Maps a non-minable verdict to the mempool rejection it causes.
fn rejection(verdict: &ValidationVerdict) -> MempoolError {
    if let Some(input) = verdict.inputscheck.errors.first() {
        let kind = if input.failure.is_invalid() {
            MempoolErrorKind::InvalidScript
        } else {
            MempoolErrorKind::NonStandard
        };
        return MempoolError::new(kind, input.reject.clone());
    }
    let Some(code) = verdict.errors.first() else {
        return MempoolError::new(
            MempoolErrorKind::InsufficientFee,
            format!(
                "insufficient fee: {} < {}",
                verdict.txfee, verdict.txfeeneeded
            ),
        );
    };
    let kind = match code.as_str() {
        "txn-mempool-conflict" => MempoolErrorKind::ConflictingInput,
        "bad-txns-inputs-missingorspent" => MempoolErrorKind::MissingInput,
        code if code.starts_with("bad-txns") || code == "coinbase" => {
            MempoolErrorKind::InvalidTransaction
        }
        _ => MempoolErrorKind::NonStandard,
    };
    MempoolError::new(kind, code.clone())
}
