#![allow(dead_code)]

use std::sync::Arc;

use cashd_chainstate::{ChainState, IndexConfig};
use cashd_consensus::{chain_params, Hash256, Network};
use cashd_primitives::address::p2pkh_script;
use cashd_primitives::block::{Block, BlockHeader};
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxIn, TxOut};
use cashd_storage::memory::MemoryStore;

pub const START_TIME: u32 = 1_600_000_000;
pub const SUBSIDY: i64 = 50_0000_0000;

pub fn chainstate(store: &Arc<MemoryStore>) -> ChainState<MemoryStore> {
    ChainState::new(
        Arc::clone(store),
        chain_params(Network::Regtest),
        IndexConfig::all(),
    )
}

pub fn miner_script(tag: u8) -> Vec<u8> {
    p2pkh_script(&[tag; 20])
}

pub fn coinbase(height: u32, tag: u8) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn::new(OutPoint::null(), height.to_le_bytes().to_vec())],
        vout: vec![TxOut {
            value: SUBSIDY,
            script_pubkey: miner_script(tag),
        }],
        lock_time: 0,
    }
}

pub fn spend(prevouts: &[OutPoint], outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 2,
        vin: prevouts
            .iter()
            .map(|prevout| TxIn::new(prevout.clone(), vec![0x51]))
            .collect(),
        vout: outputs,
        lock_time: 0,
    }
}

pub fn block(prev_block: Hash256, height: u32, tag: u8, txs: Vec<Transaction>) -> Block {
    let mut transactions = vec![coinbase(height, tag)];
    transactions.extend(txs);
    let mut block = Block {
        header: BlockHeader {
            version: 4,
            prev_block,
            merkle_root: [0u8; 32],
            time: START_TIME + height * 600,
            bits: 0x207f_ffff,
            nonce: u32::from(tag),
        },
        transactions,
    };
    block.header.merkle_root = block.compute_merkle_root();
    block
}

/// Connects `count` coinbase-only blocks and returns their hashes.
pub fn mine_empty(chain: &ChainState<MemoryStore>, count: u32, tag: u8) -> Vec<Hash256> {
    let mut hashes = Vec::new();
    for _ in 0..count {
        let (prev, height) = match chain.best_block().expect("tip") {
            Some(tip) => (tip.hash, tip.height as u32 + 1),
            None => ([0u8; 32], 0),
        };
        let block = block(prev, height, tag, Vec::new());
        hashes.push(chain.connect_block(&block).expect("connect").hash);
    }
    hashes
}

/// Connects a block holding `txs` on top of the tip.
pub fn mine(chain: &ChainState<MemoryStore>, tag: u8, txs: Vec<Transaction>) -> Block {
    let tip = chain.best_block().expect("tip").expect("some tip");
    let block = block(tip.hash, tip.height as u32 + 1, tag, txs);
    chain.connect_block(&block).expect("connect");
    block
}

pub fn coinbase_outpoint(chain: &ChainState<MemoryStore>, height: i32) -> OutPoint {
    let hash = chain
        .hash_at_height(height)
        .expect("height")
        .expect("main chain block");
    let block = chain.read_block(&hash).expect("read").expect("block");
    OutPoint::new(block.transactions[0].txid(), 0)
}
