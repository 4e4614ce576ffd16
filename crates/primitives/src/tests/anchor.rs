use super::*;
use crate::ssi::SeedSsi;

#[test]
fn test_signed_anchor_value_verifies() {
    let ssi = SeedSsi::from_seed("default", [7; 32]);
    let previous = HashLink::from([1; 32]);

    let value = AnchorValue::signed(&ssi, HashLink::from([2; 32]), Some(previous));

    assert!(value.verify());
    assert_eq!(value.signer(), Some(ssi.anchor_id()));
}

#[test]
fn test_tampered_anchor_value_fails_verification() {
    let ssi = SeedSsi::from_seed("default", [7; 32]);

    let mut value = AnchorValue::signed(&ssi, HashLink::from([2; 32]), None);
    value.previous = Some(HashLink::from([3; 32]));

    assert!(!value.verify());
}

#[test]
fn test_anchor_value_from_other_key_has_other_signer() {
    let ours = SeedSsi::from_seed("default", [7; 32]);
    let theirs = SeedSsi::from_seed("default", [8; 32]);

    let value = AnchorValue::signed(&theirs, HashLink::from([2; 32]), None);

    assert!(value.verify());
    assert_ne!(value.signer(), Some(ours.anchor_id()));
}
