//! Opcode values and script tokenization.

use crate::interpreter::ScriptError;

pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4c;
pub const OP_PUSHDATA2: u8 = 0x4d;
pub const OP_PUSHDATA4: u8 = 0x4e;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_RESERVED: u8 = 0x50;
pub const OP_1: u8 = 0x51;
pub const OP_2: u8 = 0x52;
pub const OP_16: u8 = 0x60;

pub const OP_NOP: u8 = 0x61;
pub const OP_VER: u8 = 0x62;
pub const OP_IF: u8 = 0x63;
pub const OP_NOTIF: u8 = 0x64;
pub const OP_VERIF: u8 = 0x65;
pub const OP_VERNOTIF: u8 = 0x66;
pub const OP_ELSE: u8 = 0x67;
pub const OP_ENDIF: u8 = 0x68;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6a;

pub const OP_TOALTSTACK: u8 = 0x6b;
pub const OP_FROMALTSTACK: u8 = 0x6c;
pub const OP_2DROP: u8 = 0x6d;
pub const OP_2DUP: u8 = 0x6e;
pub const OP_3DUP: u8 = 0x6f;
pub const OP_2OVER: u8 = 0x70;
pub const OP_2ROT: u8 = 0x71;
pub const OP_2SWAP: u8 = 0x72;
pub const OP_IFDUP: u8 = 0x73;
pub const OP_DEPTH: u8 = 0x74;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_NIP: u8 = 0x77;
pub const OP_OVER: u8 = 0x78;
pub const OP_PICK: u8 = 0x79;
pub const OP_ROLL: u8 = 0x7a;
pub const OP_ROT: u8 = 0x7b;
pub const OP_SWAP: u8 = 0x7c;
pub const OP_TUCK: u8 = 0x7d;

pub const OP_CAT: u8 = 0x7e;
pub const OP_SPLIT: u8 = 0x7f;
pub const OP_NUM2BIN: u8 = 0x80;
pub const OP_BIN2NUM: u8 = 0x81;
pub const OP_SIZE: u8 = 0x82;

pub const OP_INVERT: u8 = 0x83;
pub const OP_AND: u8 = 0x84;
pub const OP_OR: u8 = 0x85;
pub const OP_XOR: u8 = 0x86;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_RESERVED1: u8 = 0x89;
pub const OP_RESERVED2: u8 = 0x8a;

pub const OP_1ADD: u8 = 0x8b;
pub const OP_1SUB: u8 = 0x8c;
pub const OP_2MUL: u8 = 0x8d;
pub const OP_2DIV: u8 = 0x8e;
pub const OP_NEGATE: u8 = 0x8f;
pub const OP_ABS: u8 = 0x90;
pub const OP_NOT: u8 = 0x91;
pub const OP_0NOTEQUAL: u8 = 0x92;
pub const OP_ADD: u8 = 0x93;
pub const OP_SUB: u8 = 0x94;
pub const OP_MUL: u8 = 0x95;
pub const OP_DIV: u8 = 0x96;
pub const OP_MOD: u8 = 0x97;
pub const OP_LSHIFT: u8 = 0x98;
pub const OP_RSHIFT: u8 = 0x99;
pub const OP_BOOLAND: u8 = 0x9a;
pub const OP_BOOLOR: u8 = 0x9b;
pub const OP_NUMEQUAL: u8 = 0x9c;
pub const OP_NUMEQUALVERIFY: u8 = 0x9d;
pub const OP_NUMNOTEQUAL: u8 = 0x9e;
pub const OP_LESSTHAN: u8 = 0x9f;
pub const OP_GREATERTHAN: u8 = 0xa0;
pub const OP_LESSTHANOREQUAL: u8 = 0xa1;
pub const OP_GREATERTHANOREQUAL: u8 = 0xa2;
pub const OP_MIN: u8 = 0xa3;
pub const OP_MAX: u8 = 0xa4;
pub const OP_WITHIN: u8 = 0xa5;

pub const OP_RIPEMD160: u8 = 0xa6;
pub const OP_SHA1: u8 = 0xa7;
pub const OP_SHA256: u8 = 0xa8;
pub const OP_HASH160: u8 = 0xa9;
pub const OP_HASH256: u8 = 0xaa;
pub const OP_CODESEPARATOR: u8 = 0xab;
pub const OP_CHECKSIG: u8 = 0xac;
pub const OP_CHECKSIGVERIFY: u8 = 0xad;
pub const OP_CHECKMULTISIG: u8 = 0xae;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

pub const OP_NOP1: u8 = 0xb0;
pub const OP_CHECKLOCKTIMEVERIFY: u8 = 0xb1;
pub const OP_CHECKSEQUENCEVERIFY: u8 = 0xb2;
pub const OP_NOP4: u8 = 0xb3;
pub const OP_NOP10: u8 = 0xb9;

pub const OP_CHECKDATASIG: u8 = 0xba;
pub const OP_CHECKDATASIGVERIFY: u8 = 0xbb;

/// Opcodes that fail the script even inside an unexecuted branch.
pub fn is_disabled(opcode: u8) -> bool {
    matches!(
        opcode,
        OP_INVERT | OP_2MUL | OP_2DIV | OP_MUL | OP_LSHIFT | OP_RSHIFT
    )
}

/// Reads the next operation, returning the opcode and any pushed bytes.
pub fn next_op<'a>(script: &'a [u8], cursor: &mut usize) -> Result<(u8, &'a [u8]), ScriptError> {
    let opcode = *script.get(*cursor).ok_or(ScriptError::BadOpcode)?;
    *cursor += 1;
    let len = match opcode {
        0x01..=0x4b => opcode as usize,
        OP_PUSHDATA1 => read_len::<1>(script, cursor)?,
        OP_PUSHDATA2 => read_len::<2>(script, cursor)?,
        OP_PUSHDATA4 => read_len::<4>(script, cursor)?,
        _ => return Ok((opcode, &[])),
    };
    let end = cursor.checked_add(len).ok_or(ScriptError::BadOpcode)?;
    let data = script.get(*cursor..end).ok_or(ScriptError::BadOpcode)?;
    *cursor = end;
    Ok((opcode, data))
}

fn read_len<const N: usize>(script: &[u8], cursor: &mut usize) -> Result<usize, ScriptError> {
    let bytes = script
        .get(*cursor..*cursor + N)
        .ok_or(ScriptError::BadOpcode)?;
    *cursor += N;
    let mut buf = [0u8; 4];
    buf[..N].copy_from_slice(bytes);
    Ok(u32::from_le_bytes(buf) as usize)
}

/// True when the script consists solely of push operations (OP_RESERVED included).
pub fn is_push_only(script: &[u8]) -> bool {
    let mut cursor = 0usize;
    while cursor < script.len() {
        match next_op(script, &mut cursor) {
            Ok((opcode, _)) if opcode <= OP_16 => {}
            _ => return false,
        }
    }
    true
}

/// Whether `data` pushed with `opcode` uses the shortest possible encoding.
pub fn check_minimal_push(data: &[u8], opcode: u8) -> bool {
    if data.is_empty() {
        return opcode == OP_0;
    }
    if data.len() == 1 && (1..=16).contains(&data[0]) {
        return opcode == OP_1 + (data[0] - 1);
    }
    if data.len() == 1 && data[0] == 0x81 {
        return opcode == OP_1NEGATE;
    }
    if data.len() <= 75 {
        return opcode as usize == data.len();
    }
    if data.len() <= 255 {
        return opcode == OP_PUSHDATA1;
    }
    if data.len() <= 65535 {
        return opcode == OP_PUSHDATA2;
    }
    true
}

/// Shortest push of `data`.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    match data.len() {
        0 => script.push(OP_0),
        1 if (1..=16).contains(&data[0]) => script.push(OP_1 + data[0] - 1),
        1 if data[0] == 0x81 => script.push(OP_1NEGATE),
        len @ 1..=75 => {
            script.push(len as u8);
            script.extend_from_slice(data);
        }
        len @ 76..=255 => {
            script.push(OP_PUSHDATA1);
            script.push(len as u8);
            script.extend_from_slice(data);
        }
        len @ 256..=65535 => {
            script.push(OP_PUSHDATA2);
            script.extend_from_slice(&(len as u16).to_le_bytes());
            script.extend_from_slice(data);
        }
        len => {
            script.push(OP_PUSHDATA4);
            script.extend_from_slice(&(len as u32).to_le_bytes());
            script.extend_from_slice(data);
        }
    }
}

/// Small integer opcode for `n` in 0..=16.
pub fn encode_small_int(n: u8) -> u8 {
    if n == 0 {
        OP_0
    } else {
        OP_1 + n - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_pushes() {
        let script = [0x02, 0xaa, 0xbb, OP_PUSHDATA1, 0x01, 0xcc, OP_DUP];
        let mut cursor = 0;
        assert_eq!(next_op(&script, &mut cursor).expect("op"), (0x02, &[0xaa, 0xbb][..]));
        assert_eq!(next_op(&script, &mut cursor).expect("op"), (OP_PUSHDATA1, &[0xcc][..]));
        assert_eq!(next_op(&script, &mut cursor).expect("op"), (OP_DUP, &[][..]));
        assert_eq!(cursor, script.len());
    }

    #[test]
    fn truncated_push_is_bad_opcode() {
        let mut cursor = 0;
        assert!(matches!(
            next_op(&[0x05, 0x01], &mut cursor),
            Err(ScriptError::BadOpcode)
        ));
    }

    #[test]
    fn minimal_push_rules() {
        assert!(check_minimal_push(&[], OP_0));
        assert!(!check_minimal_push(&[0x01], 0x01));
        assert!(check_minimal_push(&[0x01], OP_1));
        assert!(check_minimal_push(&[0x81], OP_1NEGATE));
        assert!(check_minimal_push(&[0x11], 0x01));
        assert!(!check_minimal_push(&[0u8; 10], OP_PUSHDATA1));
    }

    #[test]
    fn push_data_is_minimal() {
        for len in [0usize, 1, 75, 76, 255, 256] {
            let data = vec![0x42u8; len];
            let mut script = Vec::new();
            push_data(&mut script, &data);
            let mut cursor = 0;
            let (opcode, pushed) = next_op(&script, &mut cursor).expect("op");
            assert!(check_minimal_push(pushed, opcode), "len {len}");
        }
    }
}
