#![allow(dead_code)]

use std::sync::Arc;

use cashd_chainstate::{ChainState, IndexConfig};
use cashd_consensus::upgrades::NetworkUpgrade;
use cashd_consensus::{chain_params, ChainParams, Hash256, Network, UpgradeIndex};
use cashd_node::node::Node;
use cashd_node::policy::MempoolPolicy;
use cashd_primitives::address::p2pkh_script;
use cashd_primitives::block::{Block, BlockHeader};
use cashd_primitives::hash::hash160;
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxIn, TxOut};
use cashd_script::flags::standard_script_flags;
use cashd_script::opcodes::push_data;
use cashd_script::sighash::SighashType;
use cashd_script::sign::{produce_script_sig, KeyStore, SignatureCreator, SignatureScheme};
use cashd_storage::memory::MemoryStore;
use secp256k1::SecretKey;

pub const START_TIME: u32 = 1_600_000_000;
pub const SUBSIDY: i64 = 50_0000_0000;
pub const FEE: i64 = 10_000;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub node: Node<MemoryStore>,
    pub keys: KeyStore,
    pub secret: SecretKey,
    pub pubkey: Vec<u8>,
    pub miner_script: Vec<u8>,
}

pub fn secret(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).expect("secret key")
}

pub fn regtest_params() -> ChainParams {
    chain_params(Network::Regtest)
}

pub fn pre_graviton_params() -> ChainParams {
    let mut params = chain_params(Network::Regtest);
    params
        .consensus
        .set_activation(UpgradeIndex::Graviton, NetworkUpgrade::NEVER);
    params
}

pub fn strict_policy() -> MempoolPolicy {
    MempoolPolicy::default()
}

pub fn permissive_policy() -> MempoolPolicy {
    MempoolPolicy::standard(1_000, false)
}

pub fn harness(params: ChainParams, policy: MempoolPolicy) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let chain = ChainState::new(Arc::clone(&store), params, IndexConfig::all());
    let mut keys = KeyStore::new();
    let secret = secret(0x11);
    let pubkey = keys.add_key(secret);
    let miner_script = p2pkh_script(&hash160(&pubkey));
    Harness {
        store,
        node: Node::new(chain, policy),
        keys,
        secret,
        pubkey,
        miner_script,
    }
}

/// A harness whose first coinbase is mature for the next block.
pub fn funded(params: ChainParams, policy: MempoolPolicy) -> Harness {
    let harness = harness(params, policy);
    mine_empty(&harness, 101);
    harness
}

/// Reopens the node over the same store with an empty mempool.
pub fn restart(harness: &Harness, policy: MempoolPolicy) -> Node<MemoryStore> {
    let chain = ChainState::new(
        Arc::clone(&harness.store),
        harness.node.chain().params().clone(),
        harness.node.chain().index_config(),
    );
    Node::new(chain, policy)
}

pub fn coinbase(height: u32, script_pubkey: &[u8]) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn::new(OutPoint::null(), height.to_le_bytes().to_vec())],
        vout: vec![TxOut {
            value: SUBSIDY,
            script_pubkey: script_pubkey.to_vec(),
        }],
        lock_time: 0,
    }
}

pub fn next_block(harness: &Harness, txs: Vec<Transaction>) -> Block {
    let (prev_block, height) = match harness.node.chain().best_block().expect("tip") {
        Some(tip) => (tip.hash, tip.height as u32 + 1),
        None => ([0u8; 32], 0),
    };
    let mut transactions = vec![coinbase(height, &harness.miner_script)];
    transactions.extend(txs);
    let mut block = Block {
        header: BlockHeader {
            version: 4,
            prev_block,
            merkle_root: [0u8; 32],
            time: START_TIME + height * 600,
            bits: 0x207f_ffff,
            nonce: 0,
        },
        transactions,
    };
    block.header.merkle_root = block.compute_merkle_root();
    block
}

pub fn mine(harness: &Harness, txs: Vec<Transaction>) -> Block {
    let block = next_block(harness, txs);
    harness.node.submit_block(&block).expect("submit block");
    block
}

pub fn mine_empty(harness: &Harness, count: u32) -> Vec<Hash256> {
    (0..count)
        .map(|_| mine(harness, Vec::new()).hash())
        .collect()
}

pub fn coinbase_outpoint(harness: &Harness, height: i32) -> OutPoint {
    let hash = harness
        .node
        .chain()
        .hash_at_height(height)
        .expect("height")
        .expect("main chain block");
    let block = harness
        .node
        .chain()
        .read_block(&hash)
        .expect("read")
        .expect("block");
    OutPoint::new(block.transactions[0].txid(), 0)
}

pub fn unsigned(prevout: OutPoint, outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 2,
        vin: vec![TxIn::new(prevout, Vec::new())],
        vout: outputs,
        lock_time: 0,
    }
}

pub fn pay_to_miner(harness: &Harness, value: i64) -> TxOut {
    TxOut {
        value,
        script_pubkey: harness.miner_script.clone(),
    }
}

pub fn relay_flags(harness: &Harness) -> u32 {
    let chain = harness.node.chain();
    standard_script_flags(
        &chain.params().consensus,
        chain.tip_context().expect("tip context"),
    )
}

pub fn creator<'a>(
    harness: &Harness,
    tx: &'a Transaction,
    amount: i64,
    scheme: SignatureScheme,
) -> SignatureCreator<'a> {
    SignatureCreator {
        tx,
        input_index: 0,
        amount,
        sighash_type: SighashType::ALL_FORKID,
        scheme,
        flags: relay_flags(harness),
    }
}

/// Signs input 0 of `tx`, which spends `script_pubkey` holding `amount`.
pub fn sign_input(
    harness: &Harness,
    tx: &mut Transaction,
    script_pubkey: &[u8],
    amount: i64,
    scheme: SignatureScheme,
) {
    let script_sig = {
        let creator = creator(harness, tx, amount, scheme);
        produce_script_sig(&harness.keys, &creator, script_pubkey).expect("sign")
    };
    tx.vin[0].script_sig = script_sig;
}

/// A signed spend of the coinbase at `height` paying `SUBSIDY - FEE` back to the miner.
pub fn spend_coinbase(harness: &Harness, height: i32, scheme: SignatureScheme) -> Transaction {
    let mut tx = unsigned(
        coinbase_outpoint(harness, height),
        vec![pay_to_miner(harness, SUBSIDY - FEE)],
    );
    let script_pubkey = harness.miner_script.clone();
    sign_input(harness, &mut tx, &script_pubkey, SUBSIDY, scheme);
    tx
}

/// Funds `script_pubkey` from the coinbase at `height` in a mined block.
pub fn fund_script(harness: &Harness, height: i32, script_pubkey: Vec<u8>, value: i64) -> OutPoint {
    let mut tx = unsigned(
        coinbase_outpoint(harness, height),
        vec![TxOut {
            value,
            script_pubkey,
        }],
    );
    let miner_script = harness.miner_script.clone();
    sign_input(harness, &mut tx, &miner_script, SUBSIDY, SignatureScheme::Ecdsa);
    let txid = tx.txid();
    mine(harness, vec![tx]);
    OutPoint::new(txid, 0)
}

pub fn script_of(pushes: &[&[u8]]) -> Vec<u8> {
    let mut script = Vec::new();
    for push in pushes {
        push_data(&mut script, push);
    }
    script
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

pub fn unhex(text: &str) -> Vec<u8> {
    (0..text.len())
        .step_by(2)
        .map(|at| u8::from_str_radix(&text[at..at + 2], 16).expect("hex digit"))
        .collect()
}
