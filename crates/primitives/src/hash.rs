//! Digests used for txids, block hashes, address payloads and script opcodes.
//!
//! `sha256d` names transactions and blocks; `hash160` is the P2PKH/P2SH payload
//! and the result of `OP_HASH160`.

use cashd_consensus::Hash256;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

fn finish<const N: usize>(digest: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(digest);
    out
}

pub fn sha256(data: &[u8]) -> Hash256 {
    finish(&Sha256::digest(data))
}

/// Double SHA-256. Txids and block hashes are displayed byte-reversed.
pub fn sha256d(data: &[u8]) -> Hash256 {
    finish(&Sha256::digest(Sha256::digest(data)))
}

pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    finish(&Ripemd160::digest(data))
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|byte| format!("{byte:02x}")).collect()
    }

    #[test]
    fn empty_input_digests() {
        assert_eq!(
            hex(&sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hex(&sha256d(b"")),
            "5df6e0e2761359d30a8275058e299fcc0381534545f55cf43e41983f5d4c9456"
        );
        assert_eq!(hex(&ripemd160(b"")), "9c1185a5c5e9fc54612808977ee8f548b2258d31");
    }

    #[test]
    fn hash160_chains_sha256_into_ripemd160() {
        let data = b"cashd";
        assert_eq!(hash160(data), ripemd160(&sha256(data)));
        assert_ne!(hash160(data), hash160(b"cashd "));
    }
}
