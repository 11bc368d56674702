//! Standard script classification and relay standardness.

use cashd_primitives::transaction::{Transaction, TxOut};

use crate::opcodes::{
    is_push_only, next_op, OP_1, OP_16, OP_CHECKMULTISIG, OP_CHECKSIG, OP_DUP, OP_EQUAL,
    OP_EQUALVERIFY, OP_HASH160, OP_RETURN,
};

/// Largest serialized transaction relayed by default.
pub const MAX_STANDARD_TX_SIZE: usize = 100_000;
/// Largest scriptSig relayed, enough for a 15-of-15 P2SH multisig.
pub const MAX_TX_IN_SCRIPT_SIG_SIZE: usize = 1_650;
/// OP_RETURN outputs larger than this (including the opcode) are not relayed.
pub const MAX_OP_RETURN_RELAY: usize = 223;
pub const MAX_STANDARD_VERSION: i32 = 2;
pub const DUST_RELAY_TX_FEE: i64 = 1_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptType {
    P2Pk,
    P2Pkh,
    P2Sh,
    Multisig,
    NullData,
    Nonstandard,
}

/// A classified script together with the data needed to satisfy it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Solution {
    PubKey(Vec<u8>),
    PubKeyHash([u8; 20]),
    ScriptHash([u8; 20]),
    Multisig { required: usize, pubkeys: Vec<Vec<u8>> },
    NullData,
    Nonstandard,
}

impl Solution {
    pub fn script_type(&self) -> ScriptType {
        match self {
            Solution::PubKey(_) => ScriptType::P2Pk,
            Solution::PubKeyHash(_) => ScriptType::P2Pkh,
            Solution::ScriptHash(_) => ScriptType::P2Sh,
            Solution::Multisig { .. } => ScriptType::Multisig,
            Solution::NullData => ScriptType::NullData,
            Solution::Nonstandard => ScriptType::Nonstandard,
        }
    }
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptType {
    solve(script).script_type()
}

pub fn solve(script: &[u8]) -> Solution {
    if is_p2sh(script) {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[2..22]);
        return Solution::ScriptHash(hash);
    }
    if is_p2pkh(script) {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script[3..23]);
        return Solution::PubKeyHash(hash);
    }
    if script.first() == Some(&OP_RETURN) && is_push_only(&script[1..]) {
        return Solution::NullData;
    }
    if let Some(pubkey) = p2pk_key(script) {
        return Solution::PubKey(pubkey.to_vec());
    }
    if let Some((required, pubkeys)) = multisig_keys(script) {
        return Solution::Multisig { required, pubkeys };
    }
    Solution::Nonstandard
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn p2pk_key(script: &[u8]) -> Option<&[u8]> {
    let key_len = match script.first().copied() {
        Some(len @ 33) | Some(len @ 65) => len as usize,
        _ => return None,
    };
    if script.len() != key_len + 2 || script[script.len() - 1] != OP_CHECKSIG {
        return None;
    }
    let key = &script[1..=key_len];
    is_pubkey_shape(key).then_some(key)
}

fn is_pubkey_shape(key: &[u8]) -> bool {
    match key.len() {
        33 => key[0] == 0x02 || key[0] == 0x03,
        65 => key[0] == 0x04,
        _ => false,
    }
}

fn small_int(opcode: u8) -> Option<usize> {
    (OP_1..=OP_16)
        .contains(&opcode)
        .then(|| (opcode - OP_1 + 1) as usize)
}

/// `m <key>... n OP_CHECKMULTISIG` with 1 <= m <= n.
fn multisig_keys(script: &[u8]) -> Option<(usize, Vec<Vec<u8>>)> {
    let mut cursor = 0usize;
    let (first, _) = next_op(script, &mut cursor).ok()?;
    let required = small_int(first)?;

    let mut pubkeys = Vec::new();
    loop {
        let (opcode, data) = next_op(script, &mut cursor).ok()?;
        if is_pubkey_shape(data) && opcode as usize == data.len() {
            pubkeys.push(data.to_vec());
            continue;
        }
        let count = small_int(opcode)?;
        if count != pubkeys.len() || required > count {
            return None;
        }
        break;
    }
    let (last, _) = next_op(script, &mut cursor).ok()?;
    if last != OP_CHECKMULTISIG || cursor != script.len() {
        return None;
    }
    Some((required, pubkeys))
}

pub fn multisig_script(required: usize, pubkeys: &[Vec<u8>]) -> Vec<u8> {
    let mut script = Vec::with_capacity(3 + pubkeys.len() * 34);
    script.push(crate::opcodes::encode_small_int(required as u8));
    for key in pubkeys {
        crate::opcodes::push_data(&mut script, key);
    }
    script.push(crate::opcodes::encode_small_int(pubkeys.len() as u8));
    script.push(OP_CHECKMULTISIG);
    script
}

/// Relay standardness of an output script.
pub fn is_standard_script_pubkey(script: &[u8]) -> bool {
    match solve(script) {
        Solution::Nonstandard => false,
        Solution::Multisig { required, pubkeys } => {
            (1..=3).contains(&pubkeys.len()) && required >= 1 && required <= pubkeys.len()
        }
        Solution::NullData => script.len() <= MAX_OP_RETURN_RELAY,
        _ => true,
    }
}

/// Smallest output value that is not dust at `dust_relay_fee` satoshis per kB.
///
/// An output is dust when spending it costs more than a third of its value.
pub fn dust_threshold(output: &TxOut, dust_relay_fee: i64) -> i64 {
    if output.script_pubkey.first() == Some(&OP_RETURN) {
        return 0;
    }
    let output_size = 8 + varint_size(output.script_pubkey.len()) + output.script_pubkey.len();
    // Outpoint, sequence and a typical signature plus key.
    let spend_size = output_size + 32 + 4 + 1 + 107 + 4;
    3 * (spend_size as i64 * dust_relay_fee / 1_000)
}

pub fn is_dust(output: &TxOut, dust_relay_fee: i64) -> bool {
    output.value < dust_threshold(output, dust_relay_fee)
}

fn varint_size(len: usize) -> usize {
    match len {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

/// Returns the reject reason of the first relay standardness rule `tx` breaks.
pub fn check_standard_tx(tx: &Transaction, dust_relay_fee: i64) -> Result<(), &'static str> {
    if tx.version < 1 || tx.version > MAX_STANDARD_VERSION {
        return Err("version");
    }
    if tx.serialized_size() > MAX_STANDARD_TX_SIZE {
        return Err("tx-size");
    }
    for input in &tx.vin {
        if input.script_sig.len() > MAX_TX_IN_SCRIPT_SIG_SIZE {
            return Err("scriptsig-size");
        }
        if !is_push_only(&input.script_sig) {
            return Err("scriptsig-not-pushonly");
        }
    }

    let mut data_outputs = 0usize;
    for output in &tx.vout {
        if !is_standard_script_pubkey(&output.script_pubkey) {
            return Err("scriptpubkey");
        }
        if classify_script_pubkey(&output.script_pubkey) == ScriptType::NullData {
            data_outputs += 1;
        } else if is_dust(output, dust_relay_fee) {
            return Err("dust");
        }
    }
    if data_outputs > 1 {
        return Err("multi-op-return");
    }
    Ok(())
}
