//! Base58 address decoding and script construction.

use cashd_consensus::Network;

use crate::hash::sha256d;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl std::fmt::Display for AddressError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid address length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "invalid address checksum"),
            AddressError::UnknownPrefix => write!(f, "unknown address prefix"),
        }
    }
}

impl std::error::Error for AddressError {}

/// Address kinds tracked by the spent and address indexes.
///
/// The discriminants are persisted in index keys and values.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum AddressType {
    Unknown = 0,
    P2pkh = 1,
    P2sh = 2,
}

impl AddressType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(AddressType::Unknown),
            1 => Some(AddressType::P2pkh),
            2 => Some(AddressType::P2sh),
            _ => None,
        }
    }

    /// Extracts the address type and 20-byte hash paid to by `script`.
    ///
    /// Scripts that are neither P2PKH nor P2SH yield `Unknown` with a zero hash.
    pub fn from_script(script: &[u8]) -> (Self, [u8; 20]) {
        let mut hash = [0u8; 20];
        if is_p2sh(script) {
            hash.copy_from_slice(&script[2..22]);
            return (AddressType::P2sh, hash);
        }
        if is_p2pkh(script) {
            hash.copy_from_slice(&script[3..23]);
            return (AddressType::P2pkh, hash);
        }
        (AddressType::Unknown, hash)
    }
}

/// Renders an indexed (type, hash) pair as a base58 address.
pub fn address_from_hash(
    address_type: AddressType,
    hash: &[u8; 20],
    network: Network,
) -> Option<String> {
    let (pubkey_prefix, script_prefix) = network_prefixes(network);
    let prefix = match address_type {
        AddressType::P2pkh => pubkey_prefix,
        AddressType::P2sh => script_prefix,
        AddressType::Unknown => return None,
    };
    let mut payload = Vec::with_capacity(1 + hash.len());
    payload.push(prefix);
    payload.extend_from_slice(hash);
    Some(base58check_encode(&payload))
}

pub fn address_to_script_pubkey(address: &str, network: Network) -> Result<Vec<u8>, AddressError> {
    let payload = base58check_decode(address)?;
    let (pubkey_prefix, script_prefix) = network_prefixes(network);
    let (prefix, hash) = payload.split_first().ok_or(AddressError::InvalidLength)?;
    if hash.len() != 20 {
        return Err(AddressError::InvalidLength);
    }
    if *prefix == pubkey_prefix {
        return Ok(p2pkh_script(hash));
    }
    if *prefix == script_prefix {
        return Ok(p2sh_script(hash));
    }
    Err(AddressError::UnknownPrefix)
}

pub fn script_pubkey_to_address(script: &[u8], network: Network) -> Option<String> {
    let (address_type, hash) = AddressType::from_script(script);
    address_from_hash(address_type, &hash, network)
}

fn network_prefixes(network: Network) -> (u8, u8) {
    match network {
        Network::Mainnet => (0x00, 0x05),
        Network::Testnet | Network::Regtest => (0x6f, 0xc4),
    }
}

pub fn p2pkh_script(hash: &[u8]) -> Vec<u8> {
    const OP_DUP: u8 = 0x76;
    const OP_HASH160: u8 = 0xa9;
    const OP_EQUALVERIFY: u8 = 0x88;
    const OP_CHECKSIG: u8 = 0xac;

    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

pub fn p2sh_script(hash: &[u8]) -> Vec<u8> {
    const OP_HASH160: u8 = 0xa9;
    const OP_EQUAL: u8 = 0x87;

    let mut script = Vec::with_capacity(23);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(hash);
    script.push(OP_EQUAL);
    script
}

pub fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == 0x76
        && script[1] == 0xa9
        && script[2] == 0x14
        && script[23] == 0x88
        && script[24] == 0xac
}

pub fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == 0xa9 && script[1] == 0x14 && script[22] == 0x87
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let bytes = base58_decode(input)?;
    if bytes.len() < 4 {
        return Err(AddressError::InvalidLength);
    }
    let (payload, checksum) = bytes.split_at(bytes.len() - 4);
    let digest = sha256d(payload);
    if checksum != &digest[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(payload.to_vec())
}

fn base58check_encode(payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(payload.len() + 4);
    data.extend_from_slice(payload);
    let checksum = sha256d(payload);
    data.extend_from_slice(&checksum[..4]);
    base58_encode(&data)
}

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let mut bytes = Vec::new();
    for ch in input.bytes() {
        let value = base58_value(ch).ok_or(AddressError::InvalidCharacter)? as u32;
        let mut carry = value;
        for byte in bytes.iter_mut().rev() {
            let val = (*byte as u32) * 58 + carry;
            *byte = (val & 0xff) as u8;
            carry = val >> 8;
        }
        while carry > 0 {
            bytes.insert(0, (carry & 0xff) as u8);
            carry >>= 8;
        }
    }

    let leading_zeros = input.bytes().take_while(|b| *b == b'1').count();
    let mut out = vec![0u8; leading_zeros];
    out.extend_from_slice(&bytes);
    Ok(out)
}

fn base58_encode(data: &[u8]) -> String {
    const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    if data.is_empty() {
        return String::new();
    }
    let mut digits = vec![0u8];
    for byte in data {
        let mut carry = *byte as u32;
        for digit in digits.iter_mut().rev() {
            let value = (*digit as u32) * 256 + carry;
            *digit = (value % 58) as u8;
            carry = value / 58;
        }
        while carry > 0 {
            digits.insert(0, (carry % 58) as u8);
            carry /= 58;
        }
    }
    let leading_zeros = data.iter().take_while(|b| **b == 0u8).count();
    let mut out = String::with_capacity(leading_zeros + digits.len());
    for _ in 0..leading_zeros {
        out.push('1');
    }
    for digit in digits {
        out.push(ALPHABET[digit as usize] as char);
    }
    out
}

fn base58_value(byte: u8) -> Option<u8> {
    const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
    ALPHABET
        .iter()
        .position(|value| *value == byte)
        .map(|pos| pos as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: [u8; 20] = [
        11, 47, 10, 12, 49, 191, 224, 64, 107, 12, 204, 19, 129, 253, 190, 49, 25, 70, 218, 220,
    ];

    #[test]
    fn regtest_p2pkh_address() {
        let script = p2pkh_script(&HASH);
        assert_eq!(
            script_pubkey_to_address(&script, Network::Regtest).as_deref(),
            Some("mgY65WSfEmsyYaYPQaXhmXMeBhwp4EcsQW")
        );
        let decoded = address_to_script_pubkey("mgY65WSfEmsyYaYPQaXhmXMeBhwp4EcsQW", Network::Regtest)
            .expect("decode address");
        assert_eq!(decoded, script);
    }

    #[test]
    fn address_type_extraction() {
        assert_eq!(
            AddressType::from_script(&p2pkh_script(&HASH)),
            (AddressType::P2pkh, HASH)
        );
        assert_eq!(
            AddressType::from_script(&p2sh_script(&HASH)),
            (AddressType::P2sh, HASH)
        );
        assert_eq!(
            AddressType::from_script(&[0x51]),
            (AddressType::Unknown, [0u8; 20])
        );
    }

    #[test]
    fn rejects_other_network_prefix() {
        let mainnet = address_from_hash(AddressType::P2pkh, &HASH, Network::Mainnet)
            .expect("mainnet address");
        assert!(mainnet.starts_with('1'));
        assert_eq!(
            address_to_script_pubkey(&mainnet, Network::Regtest),
            Err(AddressError::UnknownPrefix)
        );
    }
}
