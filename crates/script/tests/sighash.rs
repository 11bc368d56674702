use cashd_script::sighash::{
    SighashType, SIGHASH_ALL, SIGHASH_ANYONECANPAY, SIGHASH_FORKID, SIGHASH_NONE, SIGHASH_SINGLE,
};

#[test]
fn sighash_type_flags() {
    let combined = SighashType(SIGHASH_ALL | SIGHASH_FORKID | SIGHASH_ANYONECANPAY);
    assert_eq!(combined.base_type(), SIGHASH_ALL);
    assert!(combined.has_anyone_can_pay());
    assert!(combined.has_fork_id());
    assert!(combined.is_defined());

    let none = SighashType(SIGHASH_NONE);
    assert_eq!(none.base_type(), SIGHASH_NONE);
    assert!(!none.has_anyone_can_pay());
    assert!(!none.has_fork_id());

    let single = SighashType(SIGHASH_SINGLE | SIGHASH_ANYONECANPAY);
    assert_eq!(single.base_type(), SIGHASH_SINGLE);
    assert!(single.has_anyone_can_pay());
}

#[test]
fn undefined_base_types() {
    assert!(!SighashType(0).is_defined());
    assert!(!SighashType(0x04 | SIGHASH_FORKID).is_defined());
    assert!(!SighashType(0x21).is_defined());
}

#[test]
fn fork_value_occupies_upper_bits() {
    let with_value = SighashType::ALL_FORKID.with_fork_value(0xff_dead);
    assert_eq!(with_value.fork_value(), 0xff_dead);
    assert_eq!(with_value.0 & 0xff, SIGHASH_ALL | SIGHASH_FORKID);
}
