//! Script interpreter and validation.

use cashd_consensus::constants::{
    LOCKTIME_THRESHOLD, MAX_OPS_PER_SCRIPT, MAX_PUBKEYS_PER_MULTISIG, MAX_SCRIPT_ELEMENT_SIZE,
    MAX_SCRIPT_SIZE, MAX_STACK_SIZE,
};
use cashd_log::Category;
use cashd_primitives::hash::{hash160, ripemd160, sha256, sha256d};
use cashd_primitives::transaction::{Transaction, SEQUENCE_FINAL};
use secp256k1::{ecdsa::Signature, Message, PublicKey};
use sha1::{Digest, Sha1};

use crate::opcodes::*;
use crate::schnorr::{self, SCHNORR_SIG_SIZE};
use crate::secp::secp256k1_context;
use crate::sighash::{signature_hash, SighashType};

pub type ScriptFlags = u32;

pub const SCRIPT_VERIFY_NONE: ScriptFlags = 0;
pub const SCRIPT_VERIFY_P2SH: ScriptFlags = 1 << 0;
pub const SCRIPT_VERIFY_STRICTENC: ScriptFlags = 1 << 1;
pub const SCRIPT_VERIFY_DERSIG: ScriptFlags = 1 << 2;
pub const SCRIPT_VERIFY_LOW_S: ScriptFlags = 1 << 3;
pub const SCRIPT_VERIFY_NULLDUMMY: ScriptFlags = 1 << 4;
pub const SCRIPT_VERIFY_SIGPUSHONLY: ScriptFlags = 1 << 5;
pub const SCRIPT_VERIFY_MINIMALDATA: ScriptFlags = 1 << 6;
pub const SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS: ScriptFlags = 1 << 7;
pub const SCRIPT_VERIFY_CLEANSTACK: ScriptFlags = 1 << 8;
pub const SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY: ScriptFlags = 1 << 9;
pub const SCRIPT_VERIFY_CHECKSEQUENCEVERIFY: ScriptFlags = 1 << 10;
pub const SCRIPT_VERIFY_NULLFAIL: ScriptFlags = 1 << 14;
pub const SCRIPT_ENABLE_SIGHASH_FORKID: ScriptFlags = 1 << 16;
pub const SCRIPT_ENABLE_REPLAY_PROTECTION: ScriptFlags = 1 << 17;
pub const SCRIPT_ENABLE_CHECKDATASIG: ScriptFlags = 1 << 18;
pub const SCRIPT_DISALLOW_SEGWIT_RECOVERY: ScriptFlags = 1 << 20;
pub const SCRIPT_ENABLE_SCHNORR_MULTISIG: ScriptFlags = 1 << 21;

/// Flags every relayed transaction must satisfy regardless of upgrade state.
pub const MANDATORY_SCRIPT_VERIFY_FLAGS: ScriptFlags = SCRIPT_VERIFY_P2SH
    | SCRIPT_VERIFY_STRICTENC
    | SCRIPT_ENABLE_SIGHASH_FORKID
    | SCRIPT_VERIFY_LOW_S
    | SCRIPT_VERIFY_NULLFAIL;

/// Policy flags; upgrade-dependent flags are added by [`crate::flags::standard_script_flags`].
pub const STANDARD_SCRIPT_VERIFY_FLAGS: ScriptFlags = MANDATORY_SCRIPT_VERIFY_FLAGS
    | SCRIPT_VERIFY_DERSIG
    | SCRIPT_VERIFY_MINIMALDATA
    | SCRIPT_VERIFY_NULLDUMMY
    | SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS
    | SCRIPT_VERIFY_CLEANSTACK
    | SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY
    | SCRIPT_VERIFY_CHECKSEQUENCEVERIFY
    | SCRIPT_DISALLOW_SEGWIT_RECOVERY;

const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

const DEFAULT_SCRIPT_NUM_SIZE: usize = 4;
const LOCKTIME_SCRIPT_NUM_SIZE: usize = 5;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptError {
    Unknown,
    EvalFalse,
    OpReturn,

    ScriptSize,
    PushSize,
    OpCount,
    StackSize,
    SigCount,
    PubkeyCount,

    InvalidOperandSize,
    InvalidNumberRange,
    ImpossibleEncoding,
    InvalidSplitRange,
    ScriptNumOverflow,

    Verify,
    EqualVerify,
    CheckMultisigVerify,
    CheckSigVerify,
    CheckDataSigVerify,
    NumEqualVerify,

    BadOpcode,
    DisabledOpcode,
    InvalidStackOperation,
    InvalidAltstackOperation,
    UnbalancedConditional,

    NegativeLockTime,
    UnsatisfiedLockTime,

    SigHashType,
    SigDer,
    MinimalData,
    SigPushOnly,
    SigHighS,
    SigNullDummy,
    PubkeyType,
    CleanStack,
    SigNullFail,
    DiscourageUpgradableNops,

    IllegalForkId,
    MustUseForkId,

    DivByZero,
    ModByZero,

    InvalidBitfieldSize,
    InvalidBitRange,
    InvalidBitCount,

    SigBadLength,
    SigNonSchnorr,
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            ScriptError::Unknown => "unknown error",
            ScriptError::EvalFalse => {
                "Script evaluated without error but finished with a false/empty top stack element"
            }
            ScriptError::OpReturn => "OP_RETURN was encountered",
            ScriptError::ScriptSize => "Script is too big",
            ScriptError::PushSize => "Push value size limit exceeded",
            ScriptError::OpCount => "Operation limit exceeded",
            ScriptError::StackSize => "Stack size limit exceeded",
            ScriptError::SigCount => "Signature count negative or greater than pubkey count",
            ScriptError::PubkeyCount => "Pubkey count negative or limit exceeded",
            ScriptError::InvalidOperandSize => "Invalid operand size",
            ScriptError::InvalidNumberRange => {
                "Given operand is not a number within the valid range [-2^31...2^31]"
            }
            ScriptError::ImpossibleEncoding => "The requested encoding is impossible to satisfy",
            ScriptError::InvalidSplitRange => "Invalid OP_SPLIT range",
            ScriptError::ScriptNumOverflow => "Script number overflow",
            ScriptError::Verify => "Script failed an OP_VERIFY operation",
            ScriptError::EqualVerify => "Script failed an OP_EQUALVERIFY operation",
            ScriptError::CheckMultisigVerify => "Script failed an OP_CHECKMULTISIGVERIFY operation",
            ScriptError::CheckSigVerify => "Script failed an OP_CHECKSIGVERIFY operation",
            ScriptError::CheckDataSigVerify => "Script failed an OP_CHECKDATASIGVERIFY operation",
            ScriptError::NumEqualVerify => "Script failed an OP_NUMEQUALVERIFY operation",
            ScriptError::BadOpcode => "Opcode missing or not understood",
            ScriptError::DisabledOpcode => "Attempted to use a disabled opcode",
            ScriptError::InvalidStackOperation => "Operation not valid with the current stack size",
            ScriptError::InvalidAltstackOperation => {
                "Operation not valid with the current altstack size"
            }
            ScriptError::UnbalancedConditional => "Invalid OP_IF construction",
            ScriptError::NegativeLockTime => "Negative locktime",
            ScriptError::UnsatisfiedLockTime => "Locktime requirement not satisfied",
            ScriptError::SigHashType => "Signature hash type missing or not understood",
            ScriptError::SigDer => "Non-canonical DER signature",
            ScriptError::MinimalData => "Data push larger than necessary",
            ScriptError::SigPushOnly => "Only push operators allowed in signatures",
            ScriptError::SigHighS => "Non-canonical signature: S value is unnecessarily high",
            ScriptError::SigNullDummy => "Dummy CHECKMULTISIG argument must be zero",
            ScriptError::PubkeyType => "Public key is neither compressed or uncompressed",
            ScriptError::CleanStack => "Extra items left on stack after execution",
            ScriptError::SigNullFail => {
                "Signature must be zero for failed CHECK(MULTI)SIG operation"
            }
            ScriptError::DiscourageUpgradableNops => "NOPx reserved for soft-fork upgrades",
            ScriptError::IllegalForkId => "Illegal use of SIGHASH_FORKID",
            ScriptError::MustUseForkId => "Signature must use SIGHASH_FORKID",
            ScriptError::DivByZero => "Division by zero error",
            ScriptError::ModByZero => "Modulo by zero error",
            ScriptError::InvalidBitfieldSize => "Bitfield of unexpected size error",
            ScriptError::InvalidBitRange => "Bitfield's bit out of the expected range",
            ScriptError::InvalidBitCount => "Invalid number of bit set in OP_CHECKMULTISIG",
            ScriptError::SigBadLength => "Signature cannot be 65 bytes in CHECKMULTISIG",
            ScriptError::SigNonSchnorr => "Only Schnorr signatures allowed in this operation",
        };
        f.write_str(message)
    }
}

impl std::error::Error for ScriptError {}

pub fn verify_script(
    script_sig: &[u8],
    script_pubkey: &[u8],
    tx: &Transaction,
    input_index: usize,
    amount: i64,
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_SIGPUSHONLY) != 0 && !is_push_only(script_sig) {
        return Err(ScriptError::SigPushOnly);
    }

    let checker = SignatureChecker {
        tx,
        input_index,
        amount,
        flags,
    };

    let mut stack = Vec::new();
    eval_script(script_sig, &mut stack, &checker)?;

    let mut stack_copy = if (flags & SCRIPT_VERIFY_P2SH) != 0 {
        stack.clone()
    } else {
        Vec::new()
    };
    eval_script(script_pubkey, &mut stack, &checker)?;

    if !stack.last().is_some_and(|top| cast_to_bool(top)) {
        return Err(ScriptError::EvalFalse);
    }

    if (flags & SCRIPT_VERIFY_P2SH) != 0 && is_p2sh(script_pubkey) {
        if !is_push_only(script_sig) {
            return Err(ScriptError::SigPushOnly);
        }
        let redeem_script = stack_copy.pop().ok_or(ScriptError::InvalidStackOperation)?;

        // A P2SH-wrapped witness program pushed alone cannot be spent on this chain; coins
        // sent to one are recoverable unless the policy disallows it.
        if (flags & SCRIPT_DISALLOW_SEGWIT_RECOVERY) == 0
            && stack_copy.is_empty()
            && is_witness_program(&redeem_script)
        {
            return Ok(());
        }

        stack = stack_copy;
        eval_script(&redeem_script, &mut stack, &checker)?;
        if !stack.last().is_some_and(|top| cast_to_bool(top)) {
            return Err(ScriptError::EvalFalse);
        }
    }

    if (flags & SCRIPT_VERIFY_CLEANSTACK) != 0 && stack.len() != 1 {
        return Err(ScriptError::CleanStack);
    }

    Ok(())
}

struct SignatureChecker<'a> {
    tx: &'a Transaction,
    input_index: usize,
    amount: i64,
    flags: ScriptFlags,
}

impl<'a> SignatureChecker<'a> {
    /// Verifies a transaction signature whose encoding has already been checked.
    fn check_sig(&self, sig_bytes: &[u8], pubkey_bytes: &[u8], script_code: &[u8]) -> bool {
        let Some((&hash_type, sig)) = sig_bytes.split_last() else {
            return false;
        };
        let Ok(pubkey) = PublicKey::from_slice(pubkey_bytes) else {
            return false;
        };
        let sighash_type = SighashType(u32::from(hash_type));

        let cleaned;
        let script_code = if sighash_type.has_fork_id()
            && (self.flags & SCRIPT_ENABLE_SIGHASH_FORKID) != 0
        {
            script_code
        } else {
            cleaned = find_and_delete(script_code, sig_bytes);
            cleaned.as_slice()
        };

        let sighash = match signature_hash(
            self.tx,
            self.input_index,
            script_code,
            self.amount,
            sighash_type,
            self.flags,
        ) {
            Ok(hash) => hash,
            Err(_) => return false,
        };
        verify_signature(sig, &pubkey, &sighash)
    }

    fn check_lock_time(&self, lock_time: i64) -> bool {
        let tx_lock_time = i64::from(self.tx.lock_time);
        let threshold = i64::from(LOCKTIME_THRESHOLD);
        if (tx_lock_time < threshold) != (lock_time < threshold) {
            return false;
        }
        if lock_time > tx_lock_time {
            return false;
        }
        self.tx.vin[self.input_index].sequence != SEQUENCE_FINAL
    }

    fn check_sequence(&self, sequence: i64) -> bool {
        let tx_sequence = self.tx.vin[self.input_index].sequence;
        if self.tx.version < 2 || (tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG) != 0 {
            return false;
        }
        let mask = SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK;
        let tx_masked = tx_sequence & mask;
        let script_masked = (sequence as u32) & mask;
        let by_height = |value: u32| value < SEQUENCE_LOCKTIME_TYPE_FLAG;
        if by_height(tx_masked) != by_height(script_masked) {
            return false;
        }
        script_masked <= tx_masked
    }
}

/// Schnorr when the raw signature is 64 bytes, ECDSA otherwise.
fn verify_signature(sig: &[u8], pubkey: &PublicKey, message: &[u8; 32]) -> bool {
    if sig.len() == SCHNORR_SIG_SIZE {
        return schnorr::verify(sig, message, pubkey);
    }
    let Ok(mut signature) = Signature::from_der_lax(sig) else {
        return false;
    };
    signature.normalize_s();
    let msg = Message::from_digest(*message);
    secp256k1_context()
        .verify_ecdsa(&msg, &signature, pubkey)
        .is_ok()
}

type Stack = Vec<Vec<u8>>;

fn eval_script(
    script: &[u8],
    stack: &mut Stack,
    checker: &SignatureChecker<'_>,
) -> Result<(), ScriptError> {
    if script.len() > MAX_SCRIPT_SIZE {
        return Err(ScriptError::ScriptSize);
    }
    let flags = checker.flags;
    let require_minimal = (flags & SCRIPT_VERIFY_MINIMALDATA) != 0;

    let mut cursor = 0usize;
    let mut code_start = 0usize;
    let mut exec_stack: Vec<bool> = Vec::new();
    let mut alt_stack: Stack = Vec::new();
    let mut op_count = 0usize;

    while cursor < script.len() {
        let exec = !exec_stack.contains(&false);
        let (opcode, push) = next_op(script, &mut cursor)?;

        if push.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(ScriptError::PushSize);
        }
        if opcode > OP_16 {
            op_count += 1;
            if op_count > MAX_OPS_PER_SCRIPT {
                return Err(ScriptError::OpCount);
            }
        }
        if is_disabled(opcode) {
            return Err(ScriptError::DisabledOpcode);
        }

        if exec && opcode <= OP_PUSHDATA4 {
            if require_minimal && !check_minimal_push(push, opcode) {
                cashd_log::log_category!(
                    Category::Script,
                    "non-minimal push opcode 0x{opcode:02x} len {}",
                    push.len()
                );
                return Err(ScriptError::MinimalData);
            }
            stack.push(push.to_vec());
        } else if exec || (OP_IF..=OP_ENDIF).contains(&opcode) {
            match opcode {
                OP_1NEGATE | OP_1..=OP_16 => {
                    let value = i64::from(opcode) - i64::from(OP_1 - 1);
                    stack.push(script_num_to_vec(value));
                }

                OP_NOP => {}
                OP_CHECKLOCKTIMEVERIFY => {
                    if (flags & SCRIPT_VERIFY_CHECKLOCKTIMEVERIFY) == 0 {
                        discourage_nop(flags)?;
                    } else {
                        let top = top(stack, 1)?;
                        let lock_time =
                            decode_script_num(top, require_minimal, LOCKTIME_SCRIPT_NUM_SIZE)?;
                        if lock_time < 0 {
                            return Err(ScriptError::NegativeLockTime);
                        }
                        if !checker.check_lock_time(lock_time) {
                            return Err(ScriptError::UnsatisfiedLockTime);
                        }
                    }
                }
                OP_CHECKSEQUENCEVERIFY => {
                    if (flags & SCRIPT_VERIFY_CHECKSEQUENCEVERIFY) == 0 {
                        discourage_nop(flags)?;
                    } else {
                        let top = top(stack, 1)?;
                        let sequence =
                            decode_script_num(top, require_minimal, LOCKTIME_SCRIPT_NUM_SIZE)?;
                        if sequence < 0 {
                            return Err(ScriptError::NegativeLockTime);
                        }
                        if (sequence as u32 & SEQUENCE_LOCKTIME_DISABLE_FLAG) == 0
                            && !checker.check_sequence(sequence)
                        {
                            return Err(ScriptError::UnsatisfiedLockTime);
                        }
                    }
                }
                OP_NOP1 | OP_NOP4..=OP_NOP10 => discourage_nop(flags)?,

                OP_IF | OP_NOTIF => {
                    let mut value = false;
                    if exec {
                        let top = stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
                        value = cast_to_bool(&top);
                        if opcode == OP_NOTIF {
                            value = !value;
                        }
                    }
                    exec_stack.push(value);
                }
                OP_ELSE => {
                    let current = exec_stack
                        .last_mut()
                        .ok_or(ScriptError::UnbalancedConditional)?;
                    *current = !*current;
                }
                OP_ENDIF => {
                    exec_stack.pop().ok_or(ScriptError::UnbalancedConditional)?;
                }
                OP_VERIFY => {
                    if !cast_to_bool(top(stack, 1)?) {
                        return Err(ScriptError::Verify);
                    }
                    stack.pop();
                }
                OP_RETURN => return Err(ScriptError::OpReturn),

                OP_TOALTSTACK => alt_stack.push(pop(stack)?),
                OP_FROMALTSTACK => {
                    let value = alt_stack
                        .pop()
                        .ok_or(ScriptError::InvalidAltstackOperation)?;
                    stack.push(value);
                }
                OP_2DROP => {
                    require(stack, 2)?;
                    stack.truncate(stack.len() - 2);
                }
                OP_2DUP => {
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.extend_from_within(len - 2..);
                }
                OP_3DUP => {
                    require(stack, 3)?;
                    let len = stack.len();
                    stack.extend_from_within(len - 3..);
                }
                OP_2OVER => {
                    require(stack, 4)?;
                    let len = stack.len();
                    stack.extend_from_within(len - 4..len - 2);
                }
                OP_2ROT => {
                    require(stack, 6)?;
                    let len = stack.len();
                    let moved: Vec<_> = stack.drain(len - 6..len - 4).collect();
                    stack.extend(moved);
                }
                OP_2SWAP => {
                    require(stack, 4)?;
                    let len = stack.len();
                    stack.swap(len - 4, len - 2);
                    stack.swap(len - 3, len - 1);
                }
                OP_IFDUP => {
                    let top = top(stack, 1)?.clone();
                    if cast_to_bool(&top) {
                        stack.push(top);
                    }
                }
                OP_DEPTH => stack.push(script_num_to_vec(stack.len() as i64)),
                OP_DROP => {
                    pop(stack)?;
                }
                OP_DUP => {
                    let top = top(stack, 1)?.clone();
                    stack.push(top);
                }
                OP_NIP => {
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.remove(len - 2);
                }
                OP_OVER => {
                    let value = top(stack, 2)?.clone();
                    stack.push(value);
                }
                OP_PICK | OP_ROLL => {
                    let depth = decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
                    if depth < 0 || depth as usize >= stack.len() {
                        return Err(ScriptError::InvalidStackOperation);
                    }
                    let index = stack.len() - 1 - depth as usize;
                    let value = if opcode == OP_ROLL {
                        stack.remove(index)
                    } else {
                        stack[index].clone()
                    };
                    stack.push(value);
                }
                OP_ROT => {
                    require(stack, 3)?;
                    let len = stack.len();
                    let value = stack.remove(len - 3);
                    stack.push(value);
                }
                OP_SWAP => {
                    require(stack, 2)?;
                    let len = stack.len();
                    stack.swap(len - 2, len - 1);
                }
                OP_TUCK => {
                    require(stack, 2)?;
                    let len = stack.len();
                    let value = stack[len - 1].clone();
                    stack.insert(len - 2, value);
                }

                OP_CAT => {
                    require(stack, 2)?;
                    let tail = pop(stack)?;
                    let head = top_mut(stack)?;
                    if head.len() + tail.len() > MAX_SCRIPT_ELEMENT_SIZE {
                        return Err(ScriptError::PushSize);
                    }
                    head.extend_from_slice(&tail);
                }
                OP_SPLIT => {
                    require(stack, 2)?;
                    let position =
                        decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
                    let data = top_mut(stack)?;
                    if position < 0 || position as usize > data.len() {
                        return Err(ScriptError::InvalidSplitRange);
                    }
                    let tail = data.split_off(position as usize);
                    stack.push(tail);
                }
                OP_NUM2BIN => {
                    require(stack, 2)?;
                    let size =
                        decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
                    if size < 0 || size as usize > MAX_SCRIPT_ELEMENT_SIZE {
                        return Err(ScriptError::PushSize);
                    }
                    let size = size as usize;
                    let raw = top_mut(stack)?;
                    minimally_encode(raw);
                    if raw.len() > size {
                        return Err(ScriptError::ImpossibleEncoding);
                    }
                    if raw.len() < size {
                        let sign = match raw.last_mut() {
                            Some(last) => {
                                let sign = *last & 0x80;
                                *last &= 0x7f;
                                sign
                            }
                            None => 0,
                        };
                        raw.resize(size - 1, 0);
                        raw.push(sign);
                    }
                }
                OP_BIN2NUM => {
                    let raw = top_mut(stack)?;
                    minimally_encode(raw);
                    if !is_minimally_encoded(raw, DEFAULT_SCRIPT_NUM_SIZE) {
                        return Err(ScriptError::InvalidNumberRange);
                    }
                }
                OP_SIZE => {
                    let len = top(stack, 1)?.len();
                    stack.push(script_num_to_vec(len as i64));
                }

                OP_AND | OP_OR | OP_XOR => {
                    require(stack, 2)?;
                    let right = pop(stack)?;
                    let left = top_mut(stack)?;
                    if left.len() != right.len() {
                        return Err(ScriptError::InvalidOperandSize);
                    }
                    for (l, r) in left.iter_mut().zip(right.iter()) {
                        match opcode {
                            OP_AND => *l &= r,
                            OP_OR => *l |= r,
                            _ => *l ^= r,
                        }
                    }
                }
                OP_EQUAL | OP_EQUALVERIFY => {
                    require(stack, 2)?;
                    let a = pop(stack)?;
                    let b = pop(stack)?;
                    let equal = a == b;
                    if opcode == OP_EQUALVERIFY {
                        if !equal {
                            return Err(ScriptError::EqualVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(equal));
                    }
                }

                OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                    let value =
                        decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
                    let result = match opcode {
                        OP_1ADD => value + 1,
                        OP_1SUB => value - 1,
                        OP_NEGATE => -value,
                        OP_ABS => value.abs(),
                        OP_NOT => i64::from(value == 0),
                        _ => i64::from(value != 0),
                    };
                    stack.push(script_num_to_vec(result));
                }
                OP_ADD | OP_SUB | OP_DIV | OP_MOD | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL
                | OP_NUMEQUALVERIFY | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN
                | OP_LESSTHANOREQUAL | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                    require(stack, 2)?;
                    let b = decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
                    let a = decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
                    let result = match opcode {
                        OP_ADD => a + b,
                        OP_SUB => a - b,
                        OP_DIV => {
                            if b == 0 {
                                return Err(ScriptError::DivByZero);
                            }
                            a / b
                        }
                        OP_MOD => {
                            if b == 0 {
                                return Err(ScriptError::ModByZero);
                            }
                            a % b
                        }
                        OP_BOOLAND => i64::from(a != 0 && b != 0),
                        OP_BOOLOR => i64::from(a != 0 || b != 0),
                        OP_NUMEQUAL | OP_NUMEQUALVERIFY => i64::from(a == b),
                        OP_NUMNOTEQUAL => i64::from(a != b),
                        OP_LESSTHAN => i64::from(a < b),
                        OP_GREATERTHAN => i64::from(a > b),
                        OP_LESSTHANOREQUAL => i64::from(a <= b),
                        OP_GREATERTHANOREQUAL => i64::from(a >= b),
                        OP_MIN => a.min(b),
                        _ => a.max(b),
                    };
                    if opcode == OP_NUMEQUALVERIFY {
                        if result == 0 {
                            return Err(ScriptError::NumEqualVerify);
                        }
                    } else {
                        stack.push(script_num_to_vec(result));
                    }
                }
                OP_WITHIN => {
                    require(stack, 3)?;
                    let max = decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
                    let min = decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
                    let value = decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
                    stack.push(bool_to_vec(min <= value && value < max));
                }

                OP_RIPEMD160 => {
                    let data = pop(stack)?;
                    stack.push(ripemd160(&data).to_vec());
                }
                OP_SHA1 => {
                    let data = pop(stack)?;
                    let mut hasher = Sha1::new();
                    hasher.update(data);
                    stack.push(hasher.finalize().to_vec());
                }
                OP_SHA256 => {
                    let data = pop(stack)?;
                    stack.push(sha256(&data).to_vec());
                }
                OP_HASH160 => {
                    let data = pop(stack)?;
                    stack.push(hash160(&data).to_vec());
                }
                OP_HASH256 => {
                    let data = pop(stack)?;
                    stack.push(sha256d(&data).to_vec());
                }
                OP_CODESEPARATOR => code_start = cursor,

                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    require(stack, 2)?;
                    let pubkey = pop(stack)?;
                    let sig = pop(stack)?;
                    check_transaction_signature_encoding(&sig, flags)?;
                    check_pubkey_encoding(&pubkey, flags)?;
                    let ok = !sig.is_empty()
                        && checker.check_sig(&sig, &pubkey, &script[code_start..]);
                    if !ok && (flags & SCRIPT_VERIFY_NULLFAIL) != 0 && !sig.is_empty() {
                        return Err(ScriptError::SigNullFail);
                    }
                    if opcode == OP_CHECKSIGVERIFY {
                        if !ok {
                            return Err(ScriptError::CheckSigVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(ok));
                    }
                }
                OP_CHECKDATASIG | OP_CHECKDATASIGVERIFY => {
                    if (flags & SCRIPT_ENABLE_CHECKDATASIG) == 0 {
                        return Err(ScriptError::BadOpcode);
                    }
                    require(stack, 3)?;
                    let pubkey = pop(stack)?;
                    let message = pop(stack)?;
                    let sig = pop(stack)?;
                    check_data_signature_encoding(&sig, flags)?;
                    check_pubkey_encoding(&pubkey, flags)?;
                    let ok = !sig.is_empty()
                        && PublicKey::from_slice(&pubkey)
                            .is_ok_and(|key| verify_signature(&sig, &key, &sha256(&message)));
                    if !ok && (flags & SCRIPT_VERIFY_NULLFAIL) != 0 && !sig.is_empty() {
                        return Err(ScriptError::SigNullFail);
                    }
                    if opcode == OP_CHECKDATASIGVERIFY {
                        if !ok {
                            return Err(ScriptError::CheckDataSigVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(ok));
                    }
                }
                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    let ok = eval_checkmultisig(stack, checker, &script[code_start..], &mut op_count)?;
                    if opcode == OP_CHECKMULTISIGVERIFY {
                        if !ok {
                            return Err(ScriptError::CheckMultisigVerify);
                        }
                    } else {
                        stack.push(bool_to_vec(ok));
                    }
                }

                _ => {
                    cashd_log::log_category!(
                        Category::Script,
                        "bad opcode 0x{opcode:02x} at offset {}",
                        cursor - 1
                    );
                    return Err(ScriptError::BadOpcode);
                }
            }
        }

        if stack.len() + alt_stack.len() > MAX_STACK_SIZE {
            return Err(ScriptError::StackSize);
        }
    }

    if !exec_stack.is_empty() {
        return Err(ScriptError::UnbalancedConditional);
    }

    Ok(())
}

/// Pops the multisig arguments and returns whether the signatures verify.
///
/// A null dummy selects the legacy ECDSA scan. Once Schnorr multisig is enabled a non-null
/// dummy is a bitfield naming which keys are checked, each against a Schnorr signature.
fn eval_checkmultisig(
    stack: &mut Stack,
    checker: &SignatureChecker<'_>,
    script_code: &[u8],
    op_count: &mut usize,
) -> Result<bool, ScriptError> {
    let flags = checker.flags;
    let require_minimal = (flags & SCRIPT_VERIFY_MINIMALDATA) != 0;

    let key_count = decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
    if key_count < 0 || key_count as usize > MAX_PUBKEYS_PER_MULTISIG {
        return Err(ScriptError::PubkeyCount);
    }
    let key_count = key_count as usize;
    *op_count += key_count;
    if *op_count > MAX_OPS_PER_SCRIPT {
        return Err(ScriptError::OpCount);
    }
    require(stack, key_count + 1)?;
    // Push order: keys[0] is the first key in the script.
    let keys = stack.split_off(stack.len() - key_count);

    let sig_count = decode_script_num(&pop(stack)?, require_minimal, DEFAULT_SCRIPT_NUM_SIZE)?;
    if sig_count < 0 || sig_count as usize > key_count {
        return Err(ScriptError::SigCount);
    }
    let sig_count = sig_count as usize;
    require(stack, sig_count + 1)?;
    let sigs = stack.split_off(stack.len() - sig_count);
    let dummy = pop(stack)?;

    let mut cleaned = script_code.to_vec();
    for sig in &sigs {
        cleaned = find_and_delete(&cleaned, sig);
    }

    if (flags & SCRIPT_ENABLE_SCHNORR_MULTISIG) != 0 && !dummy.is_empty() {
        let bitfield = decode_bitfield(&dummy, key_count)?;
        if bitfield.count_ones() as usize != sig_count {
            return Err(ScriptError::InvalidBitCount);
        }

        let mut key_index = 0usize;
        for sig in &sigs {
            while (bitfield >> key_index) & 1 == 0 {
                key_index += 1;
            }
            let key = &keys[key_index];
            check_transaction_schnorr_signature_encoding(sig, flags)?;
            check_pubkey_encoding(key, flags)?;
            if !checker.check_sig(sig, key, &cleaned) {
                return Err(ScriptError::SigNullFail);
            }
            key_index += 1;
        }
        return Ok(true);
    }

    if !dummy.is_empty() && (flags & SCRIPT_VERIFY_NULLDUMMY) != 0 {
        return Err(ScriptError::SigNullDummy);
    }

    // Legacy scan runs from the last signature and key towards the first.
    let mut remaining_sigs = sig_count;
    let mut remaining_keys = key_count;
    let mut success = true;
    while success && remaining_sigs > 0 {
        let sig = &sigs[remaining_sigs - 1];
        let key = &keys[remaining_keys - 1];
        check_transaction_ecdsa_signature_encoding(sig, flags)?;
        check_pubkey_encoding(key, flags)?;
        if !sig.is_empty() && checker.check_sig(sig, key, &cleaned) {
            remaining_sigs -= 1;
        }
        remaining_keys -= 1;
        if remaining_sigs > remaining_keys {
            success = false;
        }
    }

    if !success && (flags & SCRIPT_VERIFY_NULLFAIL) != 0 && sigs.iter().any(|sig| !sig.is_empty()) {
        return Err(ScriptError::SigNullFail);
    }
    Ok(success)
}

fn decode_bitfield(dummy: &[u8], size: usize) -> Result<u32, ScriptError> {
    if size > 32 || dummy.len() != size.div_ceil(8) {
        return Err(ScriptError::InvalidBitfieldSize);
    }
    let mut bitfield = 0u32;
    for (index, byte) in dummy.iter().enumerate() {
        bitfield |= u32::from(*byte) << (8 * index);
    }
    let mask = if size == 32 { u32::MAX } else { (1u32 << size) - 1 };
    if bitfield & !mask != 0 {
        return Err(ScriptError::InvalidBitRange);
    }
    Ok(bitfield)
}

fn discourage_nop(flags: ScriptFlags) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_NOPS) != 0 {
        return Err(ScriptError::DiscourageUpgradableNops);
    }
    Ok(())
}

fn check_transaction_signature_encoding(sig: &[u8], flags: ScriptFlags) -> Result<(), ScriptError> {
    check_transaction_signature_with(sig, flags, check_raw_signature_encoding)
}

fn check_transaction_ecdsa_signature_encoding(
    sig: &[u8],
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    check_transaction_signature_with(sig, flags, |raw, flags| {
        if raw.len() == SCHNORR_SIG_SIZE {
            return Err(ScriptError::SigBadLength);
        }
        check_raw_ecdsa_signature_encoding(raw, flags)
    })
}

fn check_transaction_schnorr_signature_encoding(
    sig: &[u8],
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    check_transaction_signature_with(sig, flags, |raw, _| {
        if raw.len() != SCHNORR_SIG_SIZE {
            return Err(ScriptError::SigNonSchnorr);
        }
        Ok(())
    })
}

fn check_transaction_signature_with(
    sig: &[u8],
    flags: ScriptFlags,
    check_raw: impl Fn(&[u8], ScriptFlags) -> Result<(), ScriptError>,
) -> Result<(), ScriptError> {
    let Some((&hash_type, raw)) = sig.split_last() else {
        return Ok(());
    };
    check_raw(raw, flags)?;
    if (flags & SCRIPT_VERIFY_STRICTENC) != 0 {
        let sighash_type = SighashType(u32::from(hash_type));
        if !sighash_type.is_defined() {
            return Err(ScriptError::SigHashType);
        }
        let fork_id_enabled = (flags & SCRIPT_ENABLE_SIGHASH_FORKID) != 0;
        match (fork_id_enabled, sighash_type.has_fork_id()) {
            (false, true) => return Err(ScriptError::IllegalForkId),
            (true, false) => return Err(ScriptError::MustUseForkId),
            _ => {}
        }
    }
    Ok(())
}

fn check_data_signature_encoding(sig: &[u8], flags: ScriptFlags) -> Result<(), ScriptError> {
    if sig.is_empty() {
        return Ok(());
    }
    check_raw_signature_encoding(sig, flags)
}

fn check_raw_signature_encoding(sig: &[u8], flags: ScriptFlags) -> Result<(), ScriptError> {
    if sig.len() == SCHNORR_SIG_SIZE {
        return Ok(());
    }
    check_raw_ecdsa_signature_encoding(sig, flags)
}

fn check_raw_ecdsa_signature_encoding(sig: &[u8], flags: ScriptFlags) -> Result<(), ScriptError> {
    if (flags & (SCRIPT_VERIFY_DERSIG | SCRIPT_VERIFY_LOW_S | SCRIPT_VERIFY_STRICTENC)) != 0
        && !is_valid_der_encoding(sig)
    {
        return Err(ScriptError::SigDer);
    }
    if (flags & SCRIPT_VERIFY_LOW_S) != 0 && !is_low_der_signature(sig) {
        return Err(ScriptError::SigHighS);
    }
    Ok(())
}

fn check_pubkey_encoding(pubkey: &[u8], flags: ScriptFlags) -> Result<(), ScriptError> {
    if (flags & SCRIPT_VERIFY_STRICTENC) != 0 && !is_valid_pubkey(pubkey) {
        return Err(ScriptError::PubkeyType);
    }
    Ok(())
}

/// Strict DER as required by BIP66, without the trailing hash type byte.
fn is_valid_der_encoding(sig: &[u8]) -> bool {
    let size = sig.len();
    if !(8..=72).contains(&size) {
        return false;
    }
    if sig[0] != 0x30 || sig[1] as usize != size - 2 {
        return false;
    }
    let len_r = sig[3] as usize;
    if 5 + len_r >= size {
        return false;
    }
    let len_s = sig[5 + len_r] as usize;
    if len_r + len_s + 6 != size {
        return false;
    }
    if sig[2] != 0x02 || len_r == 0 || (sig[4] & 0x80) != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && (sig[5] & 0x80) == 0 {
        return false;
    }
    if sig[len_r + 4] != 0x02 || len_s == 0 || (sig[len_r + 6] & 0x80) != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && (sig[len_r + 7] & 0x80) == 0 {
        return false;
    }
    true
}

fn is_low_der_signature(sig: &[u8]) -> bool {
    let Ok(parsed) = Signature::from_der_lax(sig) else {
        return false;
    };
    let mut normalized = parsed;
    normalized.normalize_s();
    normalized == parsed
}

fn is_valid_pubkey(data: &[u8]) -> bool {
    match data.len() {
        33 => data[0] == 0x02 || data[0] == 0x03,
        65 => data[0] == 0x04,
        _ => false,
    }
}

/// Removes every push of exactly `sig` from the script code.
fn find_and_delete(script: &[u8], sig: &[u8]) -> Vec<u8> {
    if sig.is_empty() {
        return script.to_vec();
    }
    let mut pattern = Vec::with_capacity(sig.len() + 3);
    push_data(&mut pattern, sig);

    let mut out = Vec::with_capacity(script.len());
    let mut cursor = 0usize;
    while cursor < script.len() {
        let start = cursor;
        if next_op(script, &mut cursor).is_err() {
            out.extend_from_slice(&script[start..]);
            break;
        }
        if script[start..cursor] != pattern[..] {
            out.extend_from_slice(&script[start..cursor]);
        }
    }
    out
}

/// Version byte followed by a single 2 to 40 byte push.
pub fn is_witness_program(script: &[u8]) -> bool {
    if !(4..=42).contains(&script.len()) {
        return false;
    }
    if script[0] != OP_0 && !(OP_1..=OP_16).contains(&script[0]) {
        return false;
    }
    script[1] as usize + 2 == script.len()
}

fn pop(stack: &mut Stack) -> Result<Vec<u8>, ScriptError> {
    stack.pop().ok_or(ScriptError::InvalidStackOperation)
}

fn require(stack: &Stack, count: usize) -> Result<(), ScriptError> {
    if stack.len() < count {
        return Err(ScriptError::InvalidStackOperation);
    }
    Ok(())
}

/// Element `depth` positions from the top (1 is the top).
fn top(stack: &Stack, depth: usize) -> Result<&Vec<u8>, ScriptError> {
    require(stack, depth)?;
    Ok(&stack[stack.len() - depth])
}

fn top_mut(stack: &mut Stack) -> Result<&mut Vec<u8>, ScriptError> {
    stack.last_mut().ok_or(ScriptError::InvalidStackOperation)
}

fn bool_to_vec(value: bool) -> Vec<u8> {
    if value {
        vec![1]
    } else {
        Vec::new()
    }
}

pub(crate) fn cast_to_bool(data: &[u8]) -> bool {
    for (index, byte) in data.iter().enumerate() {
        if *byte != 0 {
            return !(index == data.len() - 1 && *byte == 0x80);
        }
    }
    false
}

fn is_p2sh(script_pubkey: &[u8]) -> bool {
    script_pubkey.len() == 23
        && script_pubkey[0] == OP_HASH160
        && script_pubkey[1] == 0x14
        && script_pubkey[22] == OP_EQUAL
}

pub(crate) fn decode_script_num(
    data: &[u8],
    require_minimal: bool,
    max_size: usize,
) -> Result<i64, ScriptError> {
    if data.len() > max_size {
        return Err(ScriptError::ScriptNumOverflow);
    }
    if require_minimal && !is_minimally_encoded(data, max_size) {
        return Err(ScriptError::MinimalData);
    }
    let Some(&last) = data.last() else {
        return Ok(0);
    };
    let mut result: i64 = 0;
    for (i, byte) in data.iter().enumerate() {
        result |= i64::from(*byte) << (8 * i);
    }
    if (last & 0x80) != 0 {
        let mask = !(0x80i64 << (8 * (data.len() - 1)));
        result = -(result & mask);
    }
    Ok(result)
}

pub(crate) fn script_num_to_vec(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut abs = value.unsigned_abs();
    let mut result = Vec::new();
    while abs > 0 {
        result.push((abs & 0xff) as u8);
        abs >>= 8;
    }
    let sign_bit = 0x80u8;
    if let Some(last) = result.last_mut() {
        if (*last & sign_bit) != 0 {
            result.push(if value < 0 { sign_bit } else { 0 });
        } else if value < 0 {
            *last |= sign_bit;
        }
    }
    result
}

fn is_minimally_encoded(data: &[u8], max_size: usize) -> bool {
    if data.len() > max_size {
        return false;
    }
    match data {
        [] => true,
        [.., last] if last & 0x7f != 0 => true,
        [_] => false,
        [.., before, _] => before & 0x80 != 0,
    }
}

fn minimally_encode(data: &mut Vec<u8>) {
    let Some(&last) = data.last() else {
        return;
    };
    if last & 0x7f != 0 {
        return;
    }
    if data.len() == 1 {
        data.clear();
        return;
    }
    if data[data.len() - 2] & 0x80 != 0 {
        return;
    }
    let mut i = data.len() - 1;
    while i > 0 {
        if data[i - 1] != 0 {
            if data[i - 1] & 0x80 != 0 {
                data[i] = last;
                data.truncate(i + 1);
            } else {
                data[i - 1] |= last;
                data.truncate(i);
            }
            return;
        }
        i -= 1;
    }
    data.clear();
}
