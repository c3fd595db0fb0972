use rand::RngCore;

/// Random bytes per access key. Encoded as lowercase hex, so keys are twice this long.
pub const ACCESS_KEY_BYTES: usize = 16;

/// Generate a new opaque access-key token.
pub fn generate_access_key() -> String {
    let mut key = [0u8; ACCESS_KEY_BYTES];
    rand::rng().fill_bytes(&mut key);
    hex::encode(key)
}

/// Cheap shape check used before touching the store.
pub fn looks_like_access_key(value: &str) -> bool {
    value.len() == ACCESS_KEY_BYTES * 2 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_hex_of_expected_length() {
        let key = generate_access_key();
        assert_eq!(key.len(), ACCESS_KEY_BYTES * 2);
        assert!(looks_like_access_key(&key));
    }

    #[test]
    fn keys_are_distinct() {
        assert_ne!(generate_access_key(), generate_access_key());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(!looks_like_access_key(""));
        assert!(!looks_like_access_key("zz"));
        assert!(!looks_like_access_key(&"g".repeat(ACCESS_KEY_BYTES * 2)));
    }
}
