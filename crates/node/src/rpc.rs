//! JSON-RPC over HTTP.
//!
//! Every method is a plain function over the shared [`Node`]; the HTTP layer only parses the
//! request envelope and writes the response.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use cashd_chainstate::address_index::AddressId;
use cashd_chainstate::ChainStateError;
use cashd_consensus::money::COIN;
use cashd_consensus::params::{hash256_from_hex, hash256_to_hex};
use cashd_consensus::{Hash256, Network};
use cashd_log::Category;
use cashd_primitives::address::{address_from_hash, address_to_script_pubkey, script_pubkey_to_address};
use cashd_primitives::block::Block;
use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxOut};
use cashd_storage::KeyValueStore;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::mempool::{MempoolError, MempoolErrorKind};
use crate::node::{Node, NodeError};

const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

pub const RPC_MISC_ERROR: i64 = -1;
pub const RPC_INVALID_PARAMETER: i64 = -8;
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
pub const RPC_DESERIALIZATION_ERROR: i64 = -22;
pub const RPC_TRANSACTION_ERROR: i64 = -25;
pub const RPC_TRANSACTION_REJECTED: i64 = -26;
pub const RPC_TRANSACTION_ALREADY_IN_CHAIN: i64 = -27;
pub const RPC_METHOD_NOT_FOUND: i64 = -32601;
pub const RPC_INVALID_REQUEST: i64 = -32600;
pub const RPC_PARSE_ERROR: i64 = -32700;
pub const RPC_INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Eq, PartialEq)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

pub type RpcHandler<S> = fn(&Node<S>, Vec<Value>) -> Result<Value, RpcError>;

pub async fn serve_rpc<S: KeyValueStore + Send + Sync + 'static>(
    addr: SocketAddr,
    node: Arc<Node<S>>,
) -> Result<(), String> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| format!("rpc bind failed: {err}"))?;
    cashd_log::log_info!("RPC listening on http://{addr}");

    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .map_err(|err| format!("rpc accept failed: {err}"))?;
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, node).await {
                cashd_log::log_category!(Category::Rpc, "rpc connection {peer}: {err}");
            }
        });
    }
}

async fn handle_connection<S: KeyValueStore>(
    mut stream: tokio::net::TcpStream,
    node: Arc<Node<S>>,
) -> Result<(), String> {
    let request = read_http_request(&mut stream).await?;
    let response = if request.method != "POST" {
        build_response("405 Method Not Allowed", "text/plain", "only POST is supported")
    } else {
        let body = handle_rpc_request(&request.body, node.as_ref()).to_string();
        build_response("200 OK", "application/json", &body)
    };
    stream
        .write_all(&response)
        .await
        .map_err(|err| err.to_string())?;
    Ok(())
}

/// Parses one JSON-RPC request and returns the response envelope.
pub fn handle_rpc_request<S: KeyValueStore>(body: &[u8], node: &Node<S>) -> Value {
    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(err) => return rpc_error(Value::Null, RPC_PARSE_ERROR, format!("parse error: {err}")),
    };
    if value.is_array() {
        return rpc_error(
            Value::Null,
            RPC_INVALID_REQUEST,
            "batch requests are not supported",
        );
    }

    let id = value.get("id").cloned().unwrap_or(Value::Null);
    let Some(method) = value.get("method").and_then(Value::as_str) else {
        return rpc_error(id, RPC_INVALID_REQUEST, "missing method");
    };
    let params = match value.get("params").cloned().unwrap_or(Value::Null) {
        Value::Array(values) => values,
        Value::Null => Vec::new(),
        _ => return rpc_error(id, RPC_INVALID_REQUEST, "params must be an array"),
    };

    match dispatch_method(node, method, params) {
        Ok(result) => rpc_ok(id, result),
        Err(err) => rpc_error(id, err.code, err.message),
    }
}

pub fn dispatch_method<S: KeyValueStore>(
    node: &Node<S>,
    method: &str,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    let handler: RpcHandler<S> = match method {
        "getblockcount" => rpc_getblockcount,
        "getbestblockhash" => rpc_getbestblockhash,
        "validaterawtransaction" => rpc_validaterawtransaction,
        "sendrawtransaction" => rpc_sendrawtransaction,
        "getrawtransaction" => rpc_getrawtransaction,
        "getrawmempool" => rpc_getrawmempool,
        "getmempoolinfo" => rpc_getmempoolinfo,
        "getspentinfo" => rpc_getspentinfo,
        "getblockdeltas" => rpc_getblockdeltas,
        "getaddressdeltas" => rpc_getaddressdeltas,
        "getaddressutxos" => rpc_getaddressutxos,
        "getaddressbalance" => rpc_getaddressbalance,
        "getblockhashes" => rpc_getblockhashes,
        "submitblock" => rpc_submitblock,
        "invalidateblock" => rpc_invalidateblock,
        _ => {
            return Err(RpcError::new(
                RPC_METHOD_NOT_FOUND,
                format!("method not found: {method}"),
            ))
        }
    };
    cashd_log::log_category!(Category::Rpc, "rpc {method} ({} params)", params.len());
    handler(node, params)
}

fn rpc_getblockcount<S: KeyValueStore>(node: &Node<S>, params: Vec<Value>) -> Result<Value, RpcError> {
    ensure_no_params(&params)?;
    let height = node
        .chain()
        .best_block()
        .map_err(map_internal)?
        .map_or(-1, |tip| tip.height);
    Ok(Value::from(height))
}

fn rpc_getbestblockhash<S: KeyValueStore>(
    node: &Node<S>,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    ensure_no_params(&params)?;
    let tip = node
        .chain()
        .best_block()
        .map_err(map_internal)?
        .ok_or_else(|| RpcError::new(RPC_MISC_ERROR, "no blocks connected"))?;
    Ok(Value::String(hash256_to_hex(&tip.hash)))
}

fn rpc_validaterawtransaction<S: KeyValueStore>(
    node: &Node<S>,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    let tx = decode_tx_param(&params, "validaterawtransaction")?;
    let verdict = node.validate_transaction(&tx).map_err(map_internal)?;
    serde_json::to_value(&verdict).map_err(map_internal)
}

fn rpc_sendrawtransaction<S: KeyValueStore>(
    node: &Node<S>,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    let tx = decode_tx_param(&params, "sendrawtransaction")?;
    let txid = tx.txid();
    if node.chain().transaction(&txid).map_err(map_internal)?.is_some() {
        return Err(RpcError::new(
            RPC_TRANSACTION_ALREADY_IN_CHAIN,
            "transaction already in block chain",
        ));
    }
    match node.accept_transaction(tx) {
        Ok(txid) => Ok(Value::String(hash256_to_hex(&txid))),
        Err(NodeError::Mempool(err)) => Err(map_mempool_error(err)),
        Err(err) => Err(map_internal(err)),
    }
}

fn rpc_getrawtransaction<S: KeyValueStore>(
    node: &Node<S>,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    if params.is_empty() || params.len() > 2 {
        return Err(RpcError::new(
            RPC_INVALID_PARAMETER,
            "getrawtransaction expects txid and optional verbose flag",
        ));
    }
    let txid = parse_hash(&params[0])?;
    let verbose = match params.get(1) {
        Some(value) => parse_verbose_flag(value)?,
        None => false,
    };

    let chain = node.chain();
    let mempool = node.mempool().map_err(map_internal)?;
    let (tx, location) = match mempool.get(&txid) {
        Some(entry) => (entry.tx.clone(), None),
        None => {
            let lookup = chain.transaction(&txid).map_err(map_internal)?.ok_or_else(|| {
                RpcError::new(
                    RPC_INVALID_ADDRESS_OR_KEY,
                    "No information available about transaction",
                )
            })?;
            (lookup.tx, Some((lookup.block_hash, lookup.height)))
        }
    };
    let raw = tx.consensus_encode();
    if !verbose {
        return Ok(Value::String(hex_bytes(&raw)));
    }

    let network = chain.params().network;
    let mut vin = Vec::with_capacity(tx.vin.len());
    for input in &tx.vin {
        if tx.is_coinbase() {
            vin.push(json!({
                "coinbase": hex_bytes(&input.script_sig),
                "sequence": input.sequence,
            }));
            continue;
        }
        let mut entry = json!({
            "txid": hash256_to_hex(&input.prevout.hash),
            "vout": input.prevout.index,
            "scriptSig": { "hex": hex_bytes(&input.script_sig) },
            "sequence": input.sequence,
        });
        if let Some((satoshis, address)) =
            resolve_input_value(node, &mempool, &txid, &input.prevout, network)?
        {
            entry["value"] = amount_value(satoshis);
            entry["valueSat"] = Value::from(satoshis);
            if let Some(address) = address {
                entry["address"] = Value::String(address);
            }
        }
        vin.push(entry);
    }

    let mut vout = Vec::with_capacity(tx.vout.len());
    for (index, output) in tx.vout.iter().enumerate() {
        let mut script = json!({ "hex": hex_bytes(&output.script_pubkey) });
        if let Some(address) = script_pubkey_to_address(&output.script_pubkey, network) {
            script["addresses"] = json!([address]);
        }
        let mut entry = json!({
            "value": amount_value(output.value),
            "valueSat": output.value,
            "n": index,
            "scriptPubKey": script,
        });
        let outpoint = OutPoint::new(txid, index as u32);
        if let Some(spend) = chain.lookup_spend(&outpoint).map_err(map_internal)? {
            entry["spentTxId"] = Value::String(hash256_to_hex(&spend.txid));
            entry["spentIndex"] = Value::from(spend.input_index);
            entry["spentHeight"] = Value::from(spend.height.as_i64());
        }
        vout.push(entry);
    }

    let mut result = json!({
        "hex": hex_bytes(&raw),
        "txid": hash256_to_hex(&txid),
        "size": raw.len(),
        "version": tx.version,
        "locktime": tx.lock_time,
        "vin": vin,
        "vout": vout,
    });
    match location {
        Some((block_hash, height)) => {
            let tip_height = chain
                .best_block()
                .map_err(map_internal)?
                .map_or(height, |tip| tip.height);
            let time = chain
                .block_entry(&block_hash)
                .map_err(map_internal)?
                .map(|entry| entry.header.time);
            result["blockhash"] = Value::String(hash256_to_hex(&block_hash));
            result["height"] = Value::from(height);
            result["confirmations"] = Value::from(tip_height - height + 1);
            if let Some(time) = time {
                result["time"] = Value::from(time);
                result["blocktime"] = Value::from(time);
            }
        }
        None => {
            result["height"] = Value::from(-1);
            result["confirmations"] = Value::from(0);
        }
    }
    Ok(result)
}

/// Value and address of the output spent by `prevout`, preferring the spent index record.
fn resolve_input_value<S: KeyValueStore>(
    node: &Node<S>,
    mempool: &crate::mempool::Mempool,
    spender: &Hash256,
    prevout: &OutPoint,
    network: Network,
) -> Result<Option<(i64, Option<String>)>, RpcError> {
    let chain = node.chain();
    if let Some(spend) = chain.lookup_spend(prevout).map_err(map_internal)? {
        if spend.txid == *spender {
            let details = spend.details;
            return Ok(Some((
                details.satoshis,
                address_from_hash(details.address_type, &details.address_hash, network),
            )));
        }
    }
    let output: Option<TxOut> = match mempool.spent_output(prevout) {
        Some(output) => Some(output.clone()),
        None => match chain.utxo(prevout).map_err(map_internal)? {
            Some(coin) => Some(coin.to_output()),
            None => chain
                .transaction(&prevout.hash)
                .map_err(map_internal)?
                .and_then(|lookup| lookup.tx.vout.get(prevout.index as usize).cloned())
                .or_else(|| mempool.output(prevout).cloned()),
        },
    };
    Ok(output.map(|output| {
        (
            output.value,
            script_pubkey_to_address(&output.script_pubkey, network),
        )
    }))
}

fn rpc_getrawmempool<S: KeyValueStore>(node: &Node<S>, params: Vec<Value>) -> Result<Value, RpcError> {
    ensure_no_params(&params)?;
    let mempool = node.mempool().map_err(map_internal)?;
    Ok(Value::Array(
        mempool
            .txids()
            .iter()
            .map(|txid| Value::String(hash256_to_hex(txid)))
            .collect(),
    ))
}

fn rpc_getmempoolinfo<S: KeyValueStore>(node: &Node<S>, params: Vec<Value>) -> Result<Value, RpcError> {
    ensure_no_params(&params)?;
    let mempool = node.mempool().map_err(map_internal)?;
    Ok(json!({
        "size": mempool.size(),
        "bytes": mempool.bytes(),
        "minrelaytxfee": amount_value(node.policy().min_relay_fee_per_kb),
    }))
}

fn rpc_getspentinfo<S: KeyValueStore>(node: &Node<S>, params: Vec<Value>) -> Result<Value, RpcError> {
    let (txid, index) = match params.as_slice() {
        [Value::Object(map)] => {
            let txid_value = map
                .get("txid")
                .ok_or_else(|| RpcError::new(RPC_INVALID_PARAMETER, "getspentinfo missing txid"))?;
            let index_value = map.get("index").ok_or_else(|| {
                RpcError::new(RPC_INVALID_PARAMETER, "getspentinfo missing index")
            })?;
            (parse_hash(txid_value)?, parse_u32(index_value, "index")?)
        }
        [txid_value, index_value] => (parse_hash(txid_value)?, parse_u32(index_value, "index")?),
        _ => {
            return Err(RpcError::new(
                RPC_INVALID_PARAMETER,
                "getspentinfo expects {\"txid\": \"...\", \"index\": n}",
            ))
        }
    };

    let spend = node
        .chain()
        .lookup_spend(&OutPoint::new(txid, index))
        .map_err(map_internal)?
        .ok_or_else(|| RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Unable to get spent info"))?;
    Ok(json!({
        "txid": hash256_to_hex(&spend.txid),
        "index": spend.input_index,
        "height": spend.height.as_i64(),
    }))
}

fn rpc_getblockdeltas<S: KeyValueStore>(node: &Node<S>, params: Vec<Value>) -> Result<Value, RpcError> {
    if params.len() != 1 {
        return Err(RpcError::new(
            RPC_INVALID_PARAMETER,
            "getblockdeltas expects 1 parameter",
        ));
    }
    let chain = node.chain();
    let hash = parse_hash(&params[0])?;
    let entry = chain
        .block_entry(&hash)
        .map_err(map_internal)?
        .ok_or_else(|| RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Block not found"))?;
    if !chain.is_main_chain(&hash).map_err(map_internal)? {
        return Err(RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Block is an orphan"));
    }
    if !chain.index_config().spent {
        return Err(RpcError::new(RPC_MISC_ERROR, "Spent index not enabled"));
    }
    let block_deltas = chain
        .block_deltas(&hash)
        .map_err(map_internal)?
        .ok_or_else(|| RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Block deltas not available"))?;

    let network = chain.params().network;
    let address = |id: &AddressId| {
        address_from_hash(id.address_type, &id.hash, network).unwrap_or_default()
    };
    let deltas: Vec<Value> = block_deltas
        .txs
        .iter()
        .map(|tx| {
            let inputs: Vec<Value> = tx
                .inputs
                .iter()
                .map(|input| {
                    json!({
                        "address": address(&input.address),
                        "satoshis": input.satoshis,
                        "index": input.index,
                        "prevtxid": hash256_to_hex(&input.prev_txid),
                        "prevout": input.prev_index,
                    })
                })
                .collect();
            let outputs: Vec<Value> = tx
                .outputs
                .iter()
                .map(|output| {
                    json!({
                        "address": address(&output.address),
                        "satoshis": output.satoshis,
                        "index": output.index,
                    })
                })
                .collect();
            json!({
                "txid": hash256_to_hex(&tx.txid),
                "index": tx.index,
                "inputs": inputs,
                "outputs": outputs,
            })
        })
        .collect();

    let tip_height = chain
        .best_block()
        .map_err(map_internal)?
        .map_or(entry.height, |tip| tip.height);
    let median_time = chain.median_time_past(&hash).map_err(map_internal)?;
    let mut result = json!({
        "hash": hash256_to_hex(&hash),
        "confirmations": tip_height - entry.height + 1,
        "size": entry.size,
        "height": entry.height,
        "version": entry.header.version,
        "merkleroot": hash256_to_hex(&entry.header.merkle_root),
        "deltas": deltas,
        "time": entry.header.time,
        "mediantime": median_time,
        "nonce": entry.header.nonce,
        "bits": format!("{:08x}", entry.header.bits),
    });
    if entry.height > 0 {
        result["previousblockhash"] = Value::String(hash256_to_hex(&entry.header.prev_block));
    }
    if let Some(next) = chain.hash_at_height(entry.height + 1).map_err(map_internal)? {
        result["nextblockhash"] = Value::String(hash256_to_hex(&next));
    }
    Ok(result)
}

fn rpc_getaddressdeltas<S: KeyValueStore>(
    node: &Node<S>,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    let addresses = parse_addresses(node, &params)?;
    let network = node.chain().params().network;
    let mut out = Vec::new();
    for (label, id) in addresses {
        for delta in node.chain().address_deltas(&id).map_err(map_internal)? {
            out.push(json!({
                "satoshis": delta.satoshis,
                "txid": hash256_to_hex(&delta.txid),
                "index": delta.index,
                "blockindex": delta.tx_index,
                "height": delta.height,
                "address": address_from_hash(id.address_type, &id.hash, network)
                    .unwrap_or_else(|| label.clone()),
            }));
        }
    }
    Ok(Value::Array(out))
}

fn rpc_getaddressutxos<S: KeyValueStore>(
    node: &Node<S>,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    let addresses = parse_addresses(node, &params)?;
    let mut out = Vec::new();
    for (label, id) in addresses {
        for utxo in node.chain().address_utxos(&id).map_err(map_internal)? {
            out.push(json!({
                "address": label.as_str(),
                "txid": hash256_to_hex(&utxo.outpoint.hash),
                "outputIndex": utxo.outpoint.index,
                "script": hex_bytes(&utxo.script_pubkey),
                "satoshis": utxo.satoshis,
                "height": utxo.height,
            }));
        }
    }
    Ok(Value::Array(out))
}

fn rpc_getaddressbalance<S: KeyValueStore>(
    node: &Node<S>,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    let addresses = parse_addresses(node, &params)?;
    let mut balance = 0i64;
    let mut received = 0i64;
    for (_, id) in addresses {
        let totals = node.chain().address_balance(&id).map_err(map_internal)?;
        balance = balance.saturating_add(totals.balance);
        received = received.saturating_add(totals.received);
    }
    Ok(json!({ "balance": balance, "received": received }))
}

fn rpc_getblockhashes<S: KeyValueStore>(node: &Node<S>, params: Vec<Value>) -> Result<Value, RpcError> {
    if params.len() != 2 {
        return Err(RpcError::new(
            RPC_INVALID_PARAMETER,
            "getblockhashes expects high and low timestamps",
        ));
    }
    if !node.chain().index_config().timestamp {
        return Err(RpcError::new(RPC_MISC_ERROR, "Timestamp index not enabled"));
    }
    let high = parse_u32(&params[0], "high")?;
    let low = parse_u32(&params[1], "low")?;
    let hashes = node
        .chain()
        .block_hashes_by_time(high, low)
        .map_err(map_internal)?;
    Ok(Value::Array(
        hashes
            .iter()
            .map(|hash| Value::String(hash256_to_hex(hash)))
            .collect(),
    ))
}

fn rpc_submitblock<S: KeyValueStore>(node: &Node<S>, params: Vec<Value>) -> Result<Value, RpcError> {
    let hex = match params.as_slice() {
        [Value::String(hex)] => hex,
        _ => {
            return Err(RpcError::new(
                RPC_INVALID_PARAMETER,
                "submitblock expects a hex string",
            ))
        }
    };
    let block = bytes_from_hex(hex)
        .and_then(|bytes| Block::consensus_decode(&bytes).ok())
        .ok_or_else(|| RpcError::new(RPC_DESERIALIZATION_ERROR, "Block decode failed"))?;
    match node.submit_block(&block) {
        Ok(_) => Ok(Value::Null),
        Err(NodeError::InvalidBlock(reason)) => Ok(Value::String(reason)),
        Err(NodeError::Chain(ChainStateError::InvalidBlock(reason))) => {
            Ok(Value::String(reason.to_string()))
        }
        Err(NodeError::Chain(ChainStateError::MissingInput)) => {
            Ok(Value::String("bad-txns-inputs-missingorspent".to_string()))
        }
        Err(err) => Err(map_internal(err)),
    }
}

/// Disconnects the tip when `hash` names it; deeper invalidation is not supported.
fn rpc_invalidateblock<S: KeyValueStore>(
    node: &Node<S>,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    if params.len() != 1 {
        return Err(RpcError::new(
            RPC_INVALID_PARAMETER,
            "invalidateblock expects 1 parameter",
        ));
    }
    let hash = parse_hash(&params[0])?;
    let tip = node
        .chain()
        .best_block()
        .map_err(map_internal)?
        .ok_or_else(|| RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Block not found"))?;
    if tip.hash != hash {
        if node.chain().block_entry(&hash).map_err(map_internal)?.is_none() {
            return Err(RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Block not found"));
        }
        return Err(RpcError::new(
            RPC_INVALID_PARAMETER,
            "only the current tip can be invalidated",
        ));
    }
    node.invalidate_tip().map_err(map_internal)?;
    Ok(Value::Null)
}

fn decode_tx_param(params: &[Value], method: &str) -> Result<Transaction, RpcError> {
    let hex = match params {
        [Value::String(hex)] => hex,
        [_] => return Err(RpcError::new(RPC_DESERIALIZATION_ERROR, "TX decode failed")),
        _ => {
            return Err(RpcError::new(
                RPC_INVALID_PARAMETER,
                format!("{method} expects a hex string"),
            ))
        }
    };
    bytes_from_hex(hex)
        .and_then(|bytes| Transaction::consensus_decode(&bytes).ok())
        .ok_or_else(|| RpcError::new(RPC_DESERIALIZATION_ERROR, "TX decode failed"))
}

/// Accepts a single address string or `{"addresses": [..]}`.
fn parse_addresses<S: KeyValueStore>(
    node: &Node<S>,
    params: &[Value],
) -> Result<Vec<(String, AddressId)>, RpcError> {
    if !node.chain().index_config().address {
        return Err(RpcError::new(RPC_MISC_ERROR, "Address index not enabled"));
    }
    let labels: Vec<String> = match params {
        [Value::String(address)] => vec![address.clone()],
        [Value::Object(map)] => match map.get("addresses") {
            Some(Value::Array(values)) => values
                .iter()
                .map(|value| {
                    value.as_str().map(str::to_string).ok_or_else(|| {
                        RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Invalid address")
                    })
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(RpcError::new(
                    RPC_INVALID_PARAMETER,
                    "addresses must be an array",
                ))
            }
        },
        _ => {
            return Err(RpcError::new(
                RPC_INVALID_PARAMETER,
                "expected an address or {\"addresses\": [..]}",
            ))
        }
    };

    let network = node.chain().params().network;
    let mut out = Vec::with_capacity(labels.len());
    for label in labels {
        let id = address_to_script_pubkey(&label, network)
            .ok()
            .and_then(|script| AddressId::from_script(&script))
            .ok_or_else(|| RpcError::new(RPC_INVALID_ADDRESS_OR_KEY, "Invalid address"))?;
        out.push((label, id));
    }
    Ok(out)
}

fn map_mempool_error(err: MempoolError) -> RpcError {
    match err.kind {
        MempoolErrorKind::MissingInput => RpcError::new(RPC_TRANSACTION_ERROR, "Missing inputs"),
        _ => RpcError::new(RPC_TRANSACTION_REJECTED, err.message),
    }
}

fn map_internal(err: impl ToString) -> RpcError {
    let message = err.to_string();
    cashd_log::log_error!("rpc internal error: {message}");
    RpcError::new(RPC_INTERNAL_ERROR, message)
}

fn ensure_no_params(params: &[Value]) -> Result<(), RpcError> {
    if params.is_empty() {
        Ok(())
    } else {
        Err(RpcError::new(
            RPC_INVALID_PARAMETER,
            "method takes no parameters",
        ))
    }
}

fn parse_hash(value: &Value) -> Result<Hash256, RpcError> {
    let text = value
        .as_str()
        .ok_or_else(|| RpcError::new(RPC_INVALID_PARAMETER, "hash must be a string"))?;
    hash256_from_hex(text).map_err(|_| RpcError::new(RPC_INVALID_PARAMETER, "invalid hash"))
}

fn parse_u32(value: &Value, label: &str) -> Result<u32, RpcError> {
    if let Some(num) = value.as_u64() {
        if let Ok(num) = u32::try_from(num) {
            return Ok(num);
        }
    }
    if let Some(text) = value.as_str() {
        if let Ok(num) = text.parse::<u32>() {
            return Ok(num);
        }
    }
    Err(RpcError::new(
        RPC_INVALID_PARAMETER,
        format!("{label} must be numeric"),
    ))
}

fn parse_verbose_flag(value: &Value) -> Result<bool, RpcError> {
    if let Some(flag) = value.as_bool() {
        return Ok(flag);
    }
    if let Some(flag) = value.as_i64() {
        return Ok(flag != 0);
    }
    Err(RpcError::new(
        RPC_INVALID_PARAMETER,
        "verbose must be a boolean or number",
    ))
}

fn amount_value(satoshis: i64) -> Value {
    json!(satoshis as f64 / COIN as f64)
}

pub fn hex_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

pub fn bytes_from_hex(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.trim();
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(hex.len() / 2);
    let mut iter = hex.as_bytes().iter().copied();
    while let (Some(high), Some(low)) = (iter.next(), iter.next()) {
        let high = (high as char).to_digit(16)? as u8;
        let low = (low as char).to_digit(16)? as u8;
        bytes.push(high << 4 | low);
    }
    Some(bytes)
}

pub fn rpc_ok(id: Value, result: Value) -> Value {
    json!({
        "result": result,
        "error": Value::Null,
        "id": id,
    })
}

pub fn rpc_error(id: Value, code: i64, message: impl Into<String>) -> Value {
    json!({
        "result": Value::Null,
        "error": {
            "code": code,
            "message": message.into(),
        },
        "id": id,
    })
}

struct HttpRequest {
    method: String,
    body: Vec<u8>,
}

async fn read_http_request(stream: &mut tokio::net::TcpStream) -> Result<HttpRequest, String> {
    let mut buffer = Vec::new();
    let mut temp = [0u8; 4096];
    let mut header_end = None;
    while buffer.len() < MAX_REQUEST_BYTES {
        let read = stream
            .read(&mut temp)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&temp[..read]);
        if let Some(pos) = find_header_end(&buffer) {
            header_end = Some(pos);
            break;
        }
    }

    let header_end = header_end.ok_or_else(|| "invalid http request".to_string())?;
    let mut lines = buffer[..header_end].split(|byte| *byte == b'\n');
    let request_line = lines
        .next()
        .ok_or_else(|| "invalid http request".to_string())?;
    let method = String::from_utf8_lossy(request_line)
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string();

    let mut headers = HashMap::new();
    for line in lines {
        let line = String::from_utf8_lossy(line).trim().to_string();
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let mut body = buffer[header_end..].to_vec();
    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(body.len());
    if content_length > MAX_REQUEST_BYTES {
        return Err("request too large".to_string());
    }
    while body.len() < content_length {
        let read = stream
            .read(&mut temp)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&temp[..read]);
    }
    body.truncate(content_length);

    Ok(HttpRequest { method, body })
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

fn build_response(status: &str, content_type: &str, body: &str) -> Vec<u8> {
    let mut response = String::new();
    response.push_str("HTTP/1.1 ");
    response.push_str(status);
    response.push_str("\r\nContent-Type: ");
    response.push_str(content_type);
    response.push_str("\r\nContent-Length: ");
    response.push_str(&body.len().to_string());
    response.push_str("\r\nConnection: close\r\n\r\n");
    response.push_str(body);
    response.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_helpers() {
        assert_eq!(hex_bytes(&[0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(bytes_from_hex("00AB10"), Some(vec![0x00, 0xab, 0x10]));
        assert_eq!(bytes_from_hex("abc"), None);
        assert_eq!(bytes_from_hex("zz"), None);
    }

    #[test]
    fn envelopes_carry_id() {
        let ok = rpc_ok(json!(7), json!(true));
        assert_eq!(ok["id"], 7);
        assert_eq!(ok["result"], true);
        assert!(ok["error"].is_null());

        let err = rpc_error(json!("a"), RPC_DESERIALIZATION_ERROR, "TX decode failed");
        assert_eq!(err["error"]["code"], -22);
        assert_eq!(err["error"]["message"], "TX decode failed");
        assert!(err["result"].is_null());
    }

    #[test]
    fn header_end_and_response_framing() {
        assert_eq!(find_header_end(b"POST / HTTP/1.1\r\n\r\n{}"), Some(19));
        assert_eq!(find_header_end(b"POST / HTTP/1.1\r\n"), None);
        let response = String::from_utf8(build_response("200 OK", "application/json", "{}"))
            .expect("utf8");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("Content-Length: 2\r\n"));
        assert!(response.ends_with("\r\n\r\n{}"));
    }

    #[test]
    fn tx_param_decoding() {
        let err = decode_tx_param(&[json!("zz")], "validaterawtransaction").expect_err("bad hex");
        assert_eq!(err, RpcError::new(RPC_DESERIALIZATION_ERROR, "TX decode failed"));
        let err = decode_tx_param(&[json!("00")], "validaterawtransaction").expect_err("short");
        assert_eq!(err.code, RPC_DESERIALIZATION_ERROR);
        let err = decode_tx_param(&[], "validaterawtransaction").expect_err("missing");
        assert_eq!(err.code, RPC_INVALID_PARAMETER);
    }
}
