use super::*;

#[test]
fn test_hash_display_round_trips_through_from_str() {
    let hash = Hash::new(b"Hello, World");

    let encoded = hash.to_string();
    let decoded: Hash = encoded.parse().expect("valid base58");

    assert_eq!(hash, decoded);
    assert_eq!(hash.as_bytes(), decoded.as_bytes());
}

#[test]
fn test_hash_of_parts_is_length_prefixed() {
    let left = Hash::of_parts(&[b"ab", b"c"]);
    let right = Hash::of_parts(&[b"a", b"bc"]);

    assert_ne!(left, right);
}

#[test]
fn test_hash_rejects_wrong_length() {
    let short = bs58::encode([1_u8; 8]).into_string();
    let long = bs58::encode([1_u8; 40]).into_string();

    assert!(matches!(short.parse::<Hash>(), Err(Error::InvalidLength)));
    assert!(matches!(long.parse::<Hash>(), Err(Error::InvalidLength)));
    assert!(matches!("0OIl".parse::<Hash>(), Err(Error::DecodeError(_))));
}

#[test]
fn test_hash_serde_uses_base58_strings() {
    let hash = Hash::new(b"brick");

    let json = serde_json::to_string(&hash).expect("serializable");
    assert_eq!(json, format!("\"{hash}\""));

    let back: Hash = serde_json::from_str(&json).expect("deserializable");
    assert_eq!(back, hash);
}
