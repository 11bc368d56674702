//! Signature hashing for transparent inputs.
//!
//! Signatures carrying `SIGHASH_FORKID` commit to the spent amount through the
//! BIP143-style digest; everything else falls back to the legacy serialization.

use cashd_consensus::Hash256;
use cashd_primitives::encoding::{Encodable, Encoder};
use cashd_primitives::hash::sha256d;
use cashd_primitives::transaction::{Transaction, TxOut};

use crate::interpreter::{
    ScriptFlags, SCRIPT_ENABLE_REPLAY_PROTECTION, SCRIPT_ENABLE_SIGHASH_FORKID,
};
use crate::opcodes::OP_CODESEPARATOR;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_FORKID: u32 = 0x40;
pub const SIGHASH_ANYONECANPAY: u32 = 0x80;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SighashType(pub u32);

impl SighashType {
    pub const ALL_FORKID: SighashType = SighashType(SIGHASH_ALL | SIGHASH_FORKID);

    pub fn base_type(self) -> u32 {
        self.0 & 0x1f
    }

    pub fn has_anyone_can_pay(self) -> bool {
        (self.0 & SIGHASH_ANYONECANPAY) != 0
    }

    pub fn has_fork_id(self) -> bool {
        (self.0 & SIGHASH_FORKID) != 0
    }

    /// Base type is one of ALL, NONE or SINGLE and no unknown bits are set below the fork value.
    pub fn is_defined(self) -> bool {
        let base = self.0 & !(SIGHASH_FORKID | SIGHASH_ANYONECANPAY);
        (SIGHASH_ALL..=SIGHASH_SINGLE).contains(&base)
    }

    pub fn fork_value(self) -> u32 {
        self.0 >> 8
    }

    pub fn with_fork_value(self, fork_value: u32) -> Self {
        SighashType((fork_value << 8) | (self.0 & 0xff))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SighashError {
    InputIndexOutOfRange,
}

impl std::fmt::Display for SighashError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SighashError::InputIndexOutOfRange => write!(f, "input index out of range"),
        }
    }
}

impl std::error::Error for SighashError {}

/// Hash returned by the legacy algorithm for SIGHASH_SINGLE without a matching output.
const LEGACY_SINGLE_BUG_HASH: Hash256 = {
    let mut one = [0u8; 32];
    one[0] = 1;
    one
};

pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: i64,
    sighash_type: SighashType,
    flags: ScriptFlags,
) -> Result<Hash256, SighashError> {
    if input_index >= tx.vin.len() {
        return Err(SighashError::InputIndexOutOfRange);
    }

    let mut sighash_type = sighash_type;
    if (flags & SCRIPT_ENABLE_REPLAY_PROTECTION) != 0 {
        // Legacy chain fork values have the form 0xffxxxx.
        let fork_value = sighash_type.fork_value() ^ 0xdead;
        sighash_type = sighash_type.with_fork_value(0x00ff_0000 | fork_value);
    }

    if sighash_type.has_fork_id() && (flags & SCRIPT_ENABLE_SIGHASH_FORKID) != 0 {
        Ok(signature_hash_forkid(
            tx,
            input_index,
            script_code,
            amount,
            sighash_type,
        ))
    } else {
        Ok(signature_hash_legacy(
            tx,
            input_index,
            script_code,
            sighash_type,
        ))
    }
}

fn signature_hash_legacy(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: SighashType,
) -> Hash256 {
    let hash_single = sighash_type.base_type() == SIGHASH_SINGLE;
    let hash_none = sighash_type.base_type() == SIGHASH_NONE;
    if hash_single && input_index >= tx.vout.len() {
        return LEGACY_SINGLE_BUG_HASH;
    }

    let anyone_can_pay = sighash_type.has_anyone_can_pay();
    let script_code = strip_code_separators(script_code);

    let mut encoder = Encoder::new();
    encoder.write_i32_le(tx.version);

    let input_count = if anyone_can_pay { 1 } else { tx.vin.len() };
    encoder.write_varint(input_count as u64);
    for idx in 0..input_count {
        let actual_index = if anyone_can_pay { input_index } else { idx };
        let input = &tx.vin[actual_index];
        input.prevout.consensus_encode(&mut encoder);
        let is_signing = actual_index == input_index;
        if is_signing {
            encoder.write_var_bytes(&script_code);
        } else {
            encoder.write_varint(0);
        }

        if !is_signing && (hash_single || hash_none) {
            encoder.write_u32_le(0);
        } else {
            encoder.write_u32_le(input.sequence);
        }
    }

    let output_count = if hash_none {
        0
    } else if hash_single {
        input_index + 1
    } else {
        tx.vout.len()
    };
    encoder.write_varint(output_count as u64);
    for idx in 0..output_count {
        if hash_single && idx != input_index {
            encoder.write_i64_le(-1);
            encoder.write_varint(0);
        } else {
            tx.vout[idx].consensus_encode(&mut encoder);
        }
    }

    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);

    sha256d(&encoder.into_inner())
}

fn signature_hash_forkid(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    amount: i64,
    sighash_type: SighashType,
) -> Hash256 {
    let anyone_can_pay = sighash_type.has_anyone_can_pay();
    let base = sighash_type.base_type();

    let hash_prevouts = if !anyone_can_pay {
        hash_prevouts(tx)
    } else {
        [0u8; 32]
    };

    let hash_sequence = if !anyone_can_pay && base != SIGHASH_SINGLE && base != SIGHASH_NONE {
        hash_sequence(tx)
    } else {
        [0u8; 32]
    };

    let hash_outputs = if base != SIGHASH_SINGLE && base != SIGHASH_NONE {
        hash_outputs_all(tx)
    } else if base == SIGHASH_SINGLE && input_index < tx.vout.len() {
        hash_outputs_single(&tx.vout[input_index])
    } else {
        [0u8; 32]
    };

    let input = &tx.vin[input_index];
    let mut encoder = Encoder::with_capacity(156 + script_code.len());
    encoder.write_i32_le(tx.version);
    encoder.write_bytes(&hash_prevouts);
    encoder.write_bytes(&hash_sequence);
    input.prevout.consensus_encode(&mut encoder);
    encoder.write_var_bytes(script_code);
    encoder.write_i64_le(amount);
    encoder.write_u32_le(input.sequence);
    encoder.write_bytes(&hash_outputs);
    encoder.write_u32_le(tx.lock_time);
    encoder.write_u32_le(sighash_type.0);

    sha256d(&encoder.into_inner())
}

fn hash_prevouts(tx: &Transaction) -> Hash256 {
    let mut encoder = Encoder::with_capacity(tx.vin.len() * 36);
    for input in &tx.vin {
        input.prevout.consensus_encode(&mut encoder);
    }
    sha256d(&encoder.into_inner())
}

fn hash_sequence(tx: &Transaction) -> Hash256 {
    let mut encoder = Encoder::with_capacity(tx.vin.len() * 4);
    for input in &tx.vin {
        encoder.write_u32_le(input.sequence);
    }
    sha256d(&encoder.into_inner())
}

fn hash_outputs_all(tx: &Transaction) -> Hash256 {
    let mut encoder = Encoder::new();
    for output in &tx.vout {
        output.consensus_encode(&mut encoder);
    }
    sha256d(&encoder.into_inner())
}

fn hash_outputs_single(output: &TxOut) -> Hash256 {
    let mut encoder = Encoder::new();
    output.consensus_encode(&mut encoder);
    sha256d(&encoder.into_inner())
}

fn strip_code_separators(script: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(script.len());
    let mut cursor = 0usize;
    while cursor < script.len() {
        let start = cursor;
        match crate::opcodes::next_op(script, &mut cursor) {
            Ok((OP_CODESEPARATOR, _)) => {}
            Ok(_) => out.extend_from_slice(&script[start..cursor]),
            Err(_) => {
                out.extend_from_slice(&script[start..]);
                break;
            }
        }
    }
    out
}
