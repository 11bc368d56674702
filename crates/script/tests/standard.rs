use cashd_primitives::outpoint::OutPoint;
use cashd_primitives::transaction::{Transaction, TxIn, TxOut};
use cashd_script::standard::{
    check_standard_tx, classify_script_pubkey, dust_threshold, is_standard_script_pubkey,
    multisig_script, solve, ScriptType, Solution, DUST_RELAY_TX_FEE,
};

fn p2pkh(byte: u8) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[byte; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

fn pubkey(byte: u8) -> Vec<u8> {
    let mut key = vec![0x02];
    key.extend_from_slice(&[byte; 32]);
    key
}

fn tx_with_outputs(outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn::new(OutPoint::new([1u8; 32], 0), vec![0x01, 0x01])],
        vout: outputs,
        lock_time: 0,
    }
}

#[test]
fn classify_p2pkh() {
    assert_eq!(classify_script_pubkey(&p2pkh(0x11)), ScriptType::P2Pkh);
    assert_eq!(solve(&p2pkh(0x11)), Solution::PubKeyHash([0x11; 20]));
}

#[test]
fn classify_p2sh() {
    let mut script = vec![0xa9, 0x14];
    script.extend_from_slice(&[0x22; 20]);
    script.push(0x87);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Sh);
}

#[test]
fn witness_programs_are_nonstandard_outputs() {
    let mut script = vec![0x00, 0x14];
    script.extend_from_slice(&[0x33; 20]);
    assert_eq!(classify_script_pubkey(&script), ScriptType::Nonstandard);
    assert!(!is_standard_script_pubkey(&script));
}

#[test]
fn classify_p2pk() {
    let mut script = vec![33];
    script.extend_from_slice(&pubkey(0x02));
    script.push(0xac);
    assert_eq!(classify_script_pubkey(&script), ScriptType::P2Pk);
}

#[test]
fn classify_multisig() {
    let script = multisig_script(2, &[pubkey(1), pubkey(2), pubkey(3)]);
    assert_eq!(
        solve(&script),
        Solution::Multisig {
            required: 2,
            pubkeys: vec![pubkey(1), pubkey(2), pubkey(3)],
        }
    );
    assert!(is_standard_script_pubkey(&script));

    let wide = multisig_script(1, &[pubkey(1), pubkey(2), pubkey(3), pubkey(4)]);
    assert_eq!(classify_script_pubkey(&wide), ScriptType::Multisig);
    assert!(!is_standard_script_pubkey(&wide));
}

#[test]
fn classify_null_data() {
    assert_eq!(classify_script_pubkey(&[0x6a, 0x01, 0x01]), ScriptType::NullData);
    assert_eq!(classify_script_pubkey(&[0x6a, 0x76]), ScriptType::Nonstandard);
}

#[test]
fn p2pkh_dust_threshold() {
    let output = TxOut {
        value: 546,
        script_pubkey: p2pkh(0x01),
    };
    assert_eq!(dust_threshold(&output, DUST_RELAY_TX_FEE), 546);
}

#[test]
fn standard_tx_reject_reasons() {
    let good = tx_with_outputs(vec![TxOut {
        value: 10_000,
        script_pubkey: p2pkh(0x01),
    }]);
    assert_eq!(check_standard_tx(&good, DUST_RELAY_TX_FEE), Ok(()));

    let dust = tx_with_outputs(vec![TxOut {
        value: 545,
        script_pubkey: p2pkh(0x01),
    }]);
    assert_eq!(check_standard_tx(&dust, DUST_RELAY_TX_FEE), Err("dust"));

    let data = TxOut {
        value: 0,
        script_pubkey: vec![0x6a, 0x01, 0x01],
    };
    let two_data = tx_with_outputs(vec![data.clone(), data]);
    assert_eq!(
        check_standard_tx(&two_data, DUST_RELAY_TX_FEE),
        Err("multi-op-return")
    );

    let mut not_push = good.clone();
    not_push.vin[0].script_sig = vec![0x76];
    assert_eq!(
        check_standard_tx(&not_push, DUST_RELAY_TX_FEE),
        Err("scriptsig-not-pushonly")
    );

    let odd = tx_with_outputs(vec![TxOut {
        value: 10_000,
        script_pubkey: vec![0x51],
    }]);
    assert_eq!(check_standard_tx(&odd, DUST_RELAY_TX_FEE), Err("scriptpubkey"));
}
