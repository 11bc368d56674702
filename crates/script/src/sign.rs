//! Transaction input signing.
//!
//! [`produce_script_sig`] solves a locking script against a [`SigningProvider`], builds the
//! unlocking script and checks it with the interpreter before returning it.

use std::collections::HashMap;

use cashd_primitives::hash::hash160;
use cashd_primitives::transaction::Transaction;
use secp256k1::{Message, PublicKey, SecretKey};

use crate::interpreter::{verify_script, ScriptError, ScriptFlags};
use crate::opcodes::push_data;
use crate::schnorr;
use crate::secp::secp256k1_context;
use crate::sighash::{signature_hash, SighashError, SighashType};
use crate::standard::{solve, Solution};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignatureScheme {
    Ecdsa,
    Schnorr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignError {
    Sighash(SighashError),
    MissingKey,
    MissingRedeemScript,
    Unsolvable,
    Incomplete(ScriptError),
}

impl std::fmt::Display for SignError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignError::Sighash(err) => write!(f, "{err}"),
            SignError::MissingKey => write!(f, "signing key not available"),
            SignError::MissingRedeemScript => write!(f, "redeem script not available"),
            SignError::Unsolvable => write!(f, "script type cannot be signed"),
            SignError::Incomplete(err) => write!(f, "signature verification failed: {err}"),
        }
    }
}

impl std::error::Error for SignError {}

impl From<SighashError> for SignError {
    fn from(err: SighashError) -> Self {
        SignError::Sighash(err)
    }
}

/// Source of keys and redeem scripts, addressed by hash160.
pub trait SigningProvider {
    fn secret_key(&self, key_hash: &[u8; 20]) -> Option<SecretKey>;
    fn public_key(&self, key_hash: &[u8; 20]) -> Option<Vec<u8>>;
    fn redeem_script(&self, script_hash: &[u8; 20]) -> Option<Vec<u8>>;
}

/// In-memory provider keyed by compressed public key hash.
#[derive(Default)]
pub struct KeyStore {
    keys: HashMap<[u8; 20], (SecretKey, Vec<u8>)>,
    scripts: HashMap<[u8; 20], Vec<u8>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `secret` and returns its compressed public key.
    pub fn add_key(&mut self, secret: SecretKey) -> Vec<u8> {
        let pubkey = PublicKey::from_secret_key(secp256k1_context(), &secret)
            .serialize()
            .to_vec();
        self.keys.insert(hash160(&pubkey), (secret, pubkey.clone()));
        pubkey
    }

    pub fn add_redeem_script(&mut self, script: Vec<u8>) -> [u8; 20] {
        let hash = hash160(&script);
        self.scripts.insert(hash, script);
        hash
    }
}

impl SigningProvider for KeyStore {
    fn secret_key(&self, key_hash: &[u8; 20]) -> Option<SecretKey> {
        self.keys.get(key_hash).map(|(secret, _)| *secret)
    }

    fn public_key(&self, key_hash: &[u8; 20]) -> Option<Vec<u8>> {
        self.keys.get(key_hash).map(|(_, pubkey)| pubkey.clone())
    }

    fn redeem_script(&self, script_hash: &[u8; 20]) -> Option<Vec<u8>> {
        self.scripts.get(script_hash).cloned()
    }
}

/// What is being signed: one input of `tx` spending `amount`.
#[derive(Clone, Copy)]
pub struct SignatureCreator<'a> {
    pub tx: &'a Transaction,
    pub input_index: usize,
    pub amount: i64,
    pub sighash_type: SighashType,
    pub scheme: SignatureScheme,
    pub flags: ScriptFlags,
}

impl<'a> SignatureCreator<'a> {
    /// Signature over `script_code` with the sighash type byte appended.
    pub fn create_sig(&self, secret: &SecretKey, script_code: &[u8]) -> Result<Vec<u8>, SignError> {
        let hash = signature_hash(
            self.tx,
            self.input_index,
            script_code,
            self.amount,
            self.sighash_type,
            self.flags,
        )?;
        let mut sig = match self.scheme {
            SignatureScheme::Schnorr => schnorr::sign(secret, &hash).to_vec(),
            SignatureScheme::Ecdsa => secp256k1_context()
                .sign_ecdsa(&Message::from_digest(hash), secret)
                .serialize_der()
                .to_vec(),
        };
        sig.push((self.sighash_type.0 & 0xff) as u8);
        Ok(sig)
    }
}

pub fn produce_script_sig(
    provider: &impl SigningProvider,
    creator: &SignatureCreator<'_>,
    script_pubkey: &[u8],
) -> Result<Vec<u8>, SignError> {
    let pushes = match solve(script_pubkey) {
        Solution::ScriptHash(hash) => {
            let redeem_script = provider
                .redeem_script(&hash)
                .ok_or(SignError::MissingRedeemScript)?;
            if matches!(solve(&redeem_script), Solution::ScriptHash(_)) {
                return Err(SignError::Unsolvable);
            }
            let mut pushes = sign_step(provider, creator, &redeem_script)?;
            pushes.push(redeem_script);
            pushes
        }
        _ => sign_step(provider, creator, script_pubkey)?,
    };

    let script_sig = push_all(&pushes);
    verify_script(
        &script_sig,
        script_pubkey,
        creator.tx,
        creator.input_index,
        creator.amount,
        creator.flags,
    )
    .map_err(SignError::Incomplete)?;
    Ok(script_sig)
}

fn sign_step(
    provider: &impl SigningProvider,
    creator: &SignatureCreator<'_>,
    script: &[u8],
) -> Result<Vec<Vec<u8>>, SignError> {
    match solve(script) {
        Solution::PubKey(pubkey) => {
            let secret = provider
                .secret_key(&hash160(&pubkey))
                .ok_or(SignError::MissingKey)?;
            Ok(vec![creator.create_sig(&secret, script)?])
        }
        Solution::PubKeyHash(hash) => {
            let secret = provider.secret_key(&hash).ok_or(SignError::MissingKey)?;
            let pubkey = provider.public_key(&hash).ok_or(SignError::MissingKey)?;
            Ok(vec![creator.create_sig(&secret, script)?, pubkey])
        }
        Solution::Multisig { required, pubkeys } => {
            sign_multisig(provider, creator, script, required, &pubkeys)
        }
        Solution::ScriptHash(_) | Solution::NullData | Solution::Nonstandard => {
            Err(SignError::Unsolvable)
        }
    }
}

/// Dummy followed by signatures in key order.
///
/// Schnorr signatures use the bitfield dummy naming the signing keys; ECDSA keeps the null
/// dummy of the legacy scan.
fn sign_multisig(
    provider: &impl SigningProvider,
    creator: &SignatureCreator<'_>,
    script: &[u8],
    required: usize,
    pubkeys: &[Vec<u8>],
) -> Result<Vec<Vec<u8>>, SignError> {
    let mut sigs = Vec::with_capacity(required);
    let mut bitfield = 0u32;
    for (index, pubkey) in pubkeys.iter().enumerate() {
        if sigs.len() == required {
            break;
        }
        if let Some(secret) = provider.secret_key(&hash160(pubkey)) {
            sigs.push(creator.create_sig(&secret, script)?);
            bitfield |= 1 << index;
        }
    }
    if sigs.len() < required {
        return Err(SignError::MissingKey);
    }

    let dummy = match creator.scheme {
        SignatureScheme::Ecdsa => Vec::new(),
        SignatureScheme::Schnorr => {
            let bytes = pubkeys.len().div_ceil(8);
            bitfield.to_le_bytes()[..bytes].to_vec()
        }
    };
    let mut pushes = Vec::with_capacity(required + 1);
    pushes.push(dummy);
    pushes.extend(sigs);
    Ok(pushes)
}

fn push_all(values: &[Vec<u8>]) -> Vec<u8> {
    let mut script = Vec::new();
    for value in values {
        push_data(&mut script, value);
    }
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::standard_script_flags;
    use crate::standard::multisig_script;
    use cashd_consensus::{consensus_params, Network, TipContext};
    use cashd_primitives::address::{p2pkh_script, p2sh_script};
    use cashd_primitives::outpoint::OutPoint;
    use cashd_primitives::transaction::{TxIn, TxOut};

    fn secret(byte: u8) -> SecretKey {
        SecretKey::from_slice(&[byte; 32]).expect("secret key")
    }

    fn spend() -> Transaction {
        Transaction {
            version: 1,
            vin: vec![TxIn::new(OutPoint::new([3u8; 32], 1), Vec::new())],
            vout: vec![TxOut {
                value: 40_000,
                script_pubkey: p2pkh_script(&[0x55; 20]),
            }],
            lock_time: 0,
        }
    }

    fn flags() -> ScriptFlags {
        let params = consensus_params(Network::Mainnet);
        standard_script_flags(
            &params,
            TipContext {
                height: 620_000,
                median_time_past: 0,
            },
        )
    }

    fn creator(tx: &Transaction, scheme: SignatureScheme) -> SignatureCreator<'_> {
        SignatureCreator {
            tx,
            input_index: 0,
            amount: 50_000,
            sighash_type: SighashType::ALL_FORKID,
            scheme,
            flags: flags(),
        }
    }

    #[test]
    fn signs_p2pkh_with_both_schemes() {
        let mut keys = KeyStore::new();
        let pubkey = keys.add_key(secret(0x01));
        let script_pubkey = p2pkh_script(&hash160(&pubkey));
        let tx = spend();
        for scheme in [SignatureScheme::Ecdsa, SignatureScheme::Schnorr] {
            let script_sig =
                produce_script_sig(&keys, &creator(&tx, scheme), &script_pubkey).expect("sign");
            assert!(!script_sig.is_empty());
        }
    }

    #[test]
    fn signs_p2sh_multisig() {
        let mut keys = KeyStore::new();
        let a = keys.add_key(secret(0x01));
        let b = keys.add_key(secret(0x02));
        let c = PublicKey::from_secret_key(secp256k1_context(), &secret(0x03))
            .serialize()
            .to_vec();
        let redeem = multisig_script(2, &[a, c, b]);
        let script_pubkey = p2sh_script(&keys.add_redeem_script(redeem));
        let tx = spend();
        for scheme in [SignatureScheme::Ecdsa, SignatureScheme::Schnorr] {
            produce_script_sig(&keys, &creator(&tx, scheme), &script_pubkey).expect("sign");
        }
    }

    #[test]
    fn missing_key_is_reported() {
        let keys = KeyStore::new();
        let tx = spend();
        let err = produce_script_sig(
            &keys,
            &creator(&tx, SignatureScheme::Ecdsa),
            &p2pkh_script(&[0x77; 20]),
        )
        .unwrap_err();
        assert_eq!(err, SignError::MissingKey);
    }

    #[test]
    fn null_data_is_unsolvable() {
        let keys = KeyStore::new();
        let tx = spend();
        let err = produce_script_sig(&keys, &creator(&tx, SignatureScheme::Ecdsa), &[0x6a])
            .unwrap_err();
        assert_eq!(err, SignError::Unsolvable);
    }
}
