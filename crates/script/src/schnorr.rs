//! Schnorr signatures over secp256k1 as used by Bitcoin Cash.
//!
//! A signature is `(r, s)` with `r` the x coordinate of a nonce point whose y coordinate is a
//! quadratic residue, and `s = k + e*x` where `e = sha256(r || compressed(P) || m) mod n`.

use cashd_consensus::Hash256;
use cashd_primitives::hash::sha256;
use primitive_types::{U256, U512};
use secp256k1::{PublicKey, Scalar, SecretKey};

use crate::secp::secp256k1_context;

pub const SCHNORR_SIG_SIZE: usize = 64;

const FIELD_PRIME: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe, 0xff, 0xff, 0xfc, 0x2f,
];

const CURVE_ORDER: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfe,
    0xba, 0xae, 0xdc, 0xe6, 0xaf, 0x48, 0xa0, 0x3b, 0xbf, 0xd2, 0x5e, 0x8c, 0xd0, 0x36, 0x41, 0x41,
];

const NONCE_TAG: &[u8; 16] = b"Schnorr+SHA256  ";

pub fn verify(sig: &[u8], message: &Hash256, pubkey: &PublicKey) -> bool {
    if sig.len() != SCHNORR_SIG_SIZE {
        return false;
    }
    let mut r_bytes = [0u8; 32];
    r_bytes.copy_from_slice(&sig[..32]);
    if U256::from_big_endian(&r_bytes) >= U256::from_big_endian(&FIELD_PRIME) {
        return false;
    }
    // Rejects s == 0 and s >= n.
    let Ok(s_key) = SecretKey::from_slice(&sig[32..]) else {
        return false;
    };
    let Ok(e) = Scalar::from_be_bytes(challenge(&r_bytes, pubkey, message)) else {
        return false;
    };

    let secp = secp256k1_context();
    let s_point = PublicKey::from_secret_key(secp, &s_key);
    let Ok(e_point) = pubkey.mul_tweak(secp, &e) else {
        return false;
    };
    let Ok(r_point) = s_point.combine(&e_point.negate(secp)) else {
        return false;
    };
    let serialized = r_point.serialize_uncompressed();
    serialized[1..33] == r_bytes && is_quadratic_residue(&serialized[33..65])
}

/// Deterministic signature; the nonce is derived from the key and message.
pub fn sign(secret: &SecretKey, message: &Hash256) -> [u8; SCHNORR_SIG_SIZE] {
    let secp = secp256k1_context();
    let pubkey = PublicKey::from_secret_key(secp, secret);
    let mut attempt = 0u32;
    loop {
        let nonce = derive_nonce(secret, message, attempt);
        attempt = attempt.wrapping_add(1);
        let Ok(mut k) = SecretKey::from_slice(&nonce) else {
            continue;
        };
        let nonce_point = PublicKey::from_secret_key(secp, &k).serialize_uncompressed();
        if !is_quadratic_residue(&nonce_point[33..65]) {
            k = k.negate();
        }
        let mut r_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&nonce_point[1..33]);

        let Ok(e) = Scalar::from_be_bytes(challenge(&r_bytes, &pubkey, message)) else {
            continue;
        };
        let Ok(ex) = secret.mul_tweak(&e) else {
            continue;
        };
        let Ok(s) = k.add_tweak(&Scalar::from(ex)) else {
            continue;
        };

        let mut sig = [0u8; SCHNORR_SIG_SIZE];
        sig[..32].copy_from_slice(&r_bytes);
        sig[32..].copy_from_slice(&s.secret_bytes());
        return sig;
    }
}

fn challenge(r_bytes: &[u8; 32], pubkey: &PublicKey, message: &Hash256) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(32 + 33 + 32);
    preimage.extend_from_slice(r_bytes);
    preimage.extend_from_slice(&pubkey.serialize());
    preimage.extend_from_slice(message);
    let digest = U256::from_big_endian(&sha256(&preimage));
    let order = U256::from_big_endian(&CURVE_ORDER);
    // digest < 2^256 < 2n, one subtraction reduces it.
    let reduced = if digest >= order { digest - order } else { digest };
    reduced.to_big_endian()
}

fn derive_nonce(secret: &SecretKey, message: &Hash256, attempt: u32) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(32 + 32 + NONCE_TAG.len() + 4);
    preimage.extend_from_slice(&secret.secret_bytes());
    preimage.extend_from_slice(message);
    preimage.extend_from_slice(NONCE_TAG);
    preimage.extend_from_slice(&attempt.to_le_bytes());
    sha256(&preimage)
}

/// Euler's criterion: `y^((p-1)/2) == 1 (mod p)`.
fn is_quadratic_residue(y_bytes: &[u8]) -> bool {
    let prime = U256::from_big_endian(&FIELD_PRIME);
    let y = U256::from_big_endian(y_bytes);
    let exponent = (prime - U256::one()) >> 1;
    pow_mod(y, exponent, prime) == U256::one()
}

fn mul_mod(a: U256, b: U256, modulus: U256) -> U256 {
    let remainder: U512 = a.full_mul(b) % U512::from(modulus);
    U256([remainder.0[0], remainder.0[1], remainder.0[2], remainder.0[3]])
}

fn pow_mod(base: U256, exponent: U256, modulus: U256) -> U256 {
    let mut result = U256::one();
    for bit in (0..exponent.bits()).rev() {
        result = mul_mod(result, result, modulus);
        if exponent.bit(bit) {
            result = mul_mod(result, base, modulus);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(input: &str) -> Vec<u8> {
        (0..input.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&input[i..i + 2], 16).expect("hex"))
            .collect()
    }

    fn key(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).expect("secret key")
    }

    #[test]
    fn known_vector_verifies() {
        let pubkey = PublicKey::from_slice(&hex(
            "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798",
        ))
        .expect("pubkey");
        let sig = hex(
            "787A848E71043D280C50470E8E1532B2DD5D20EE912A45DBDD2BD1DFBF187EF6\
             7031A98831859DC34DFFEEDDA86831842CCD0079E1F92AF177F7F22CC1DCED05",
        );
        assert!(verify(&sig, &[0u8; 32], &pubkey));
        assert!(!verify(&sig, &[1u8; 32], &pubkey));
    }

    #[test]
    fn sign_then_verify() {
        let secret = key(0x11);
        let pubkey = PublicKey::from_secret_key(secp256k1_context(), &secret);
        let message = sha256(b"spent index");
        let sig = sign(&secret, &message);
        assert!(verify(&sig, &message, &pubkey));
        assert_eq!(sig, sign(&secret, &message));

        let other = PublicKey::from_secret_key(secp256k1_context(), &key(0x22));
        assert!(!verify(&sig, &message, &other));
    }

    #[test]
    fn rejects_out_of_range_components() {
        let secret = key(0x33);
        let pubkey = PublicKey::from_secret_key(secp256k1_context(), &secret);
        let message = [7u8; 32];
        let sig = sign(&secret, &message);

        let mut high_r = sig;
        high_r[..32].copy_from_slice(&FIELD_PRIME);
        assert!(!verify(&high_r, &message, &pubkey));

        let mut zero_s = sig;
        zero_s[32..].fill(0);
        assert!(!verify(&zero_s, &message, &pubkey));

        assert!(!verify(&sig[..63], &message, &pubkey));
    }

    #[test]
    fn quadratic_residue_check() {
        let mut four = [0u8; 32];
        four[31] = 4;
        assert!(is_quadratic_residue(&four));
        // -1 is a non-residue because p = 3 mod 4.
        let mut minus_one = FIELD_PRIME;
        minus_one[31] -= 1;
        assert!(!is_quadratic_residue(&minus_one));
    }
}
