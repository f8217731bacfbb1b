use crate::constants::{PHYSICAL_KEY_HEX_LEN, TAG_INDEX_PREFIX};

/// Maps a logical cache name to its physical key.
///
/// The key is the first 128 bits of `BLAKE3(prefix + name)` rendered as 32
/// lowercase hex characters. It is stable across processes that share the
/// same prefix, so warm file or Redis state survives restarts.
///
/// # Example
/// ```rust
/// use tagcache::hashing::physical_key;
///
/// let key = physical_key("site_", "topic_10");
/// assert_eq!(key.len(), 32);
/// assert_eq!(key, physical_key("site_", "topic_10"));
/// ```
#[inline]
pub fn physical_key(prefix: &str, name: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prefix.as_bytes());
    hasher.update(name.as_bytes());
    let hex = hasher.finalize().to_hex();
    hex[..PHYSICAL_KEY_HEX_LEN].to_string()
}

/// Reserved key holding the member set of `tag`.
#[inline]
pub fn tag_index_key(tag: &str) -> String {
    format!("{TAG_INDEX_PREFIX}{tag}")
}

/// Returns `true` if `key` lives in the reserved tag-index namespace.
#[inline]
pub fn is_reserved_key(key: &str) -> bool {
    key.starts_with(TAG_INDEX_PREFIX)
}

/// Computes a 64-bit hash of the input, truncated from BLAKE3.
///
/// Used for shard selection, where only distribution matters.
#[inline]
pub fn hash_to_u64(data: &[u8]) -> u64 {
    let hash = blake3::hash(data);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[0..8]);
    u64::from_le_bytes(bytes)
}

/// BLAKE3 digest of a payload, stored next to file entries for read control.
#[inline]
pub fn payload_checksum(payload: &[u8]) -> [u8; 32] {
    *blake3::hash(payload).as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_physical_key_determinism() {
        let key1 = physical_key("prefix_", "user_login_admin");
        let key2 = physical_key("prefix_", "user_login_admin");
        let key3 = physical_key("prefix_", "user_login_admin");

        assert_eq!(key1, key2);
        assert_eq!(key2, key3);
    }

    #[test]
    fn test_physical_key_fixed_length_lowercase_hex() {
        for name in ["", "a", "topic_1", "x".repeat(4096).as_str()] {
            let key = physical_key("p", name);
            assert_eq!(key.len(), PHYSICAL_KEY_HEX_LEN);
            assert!(
                key.chars()
                    .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
            );
        }
    }

    #[test]
    fn test_physical_key_prefix_sensitivity() {
        let a = physical_key("site_a_", "topic_1");
        let b = physical_key("site_b_", "topic_1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_physical_key_uniqueness() {
        let names = ["topic_1", "topic_2", "Topic_1", "topic_1 ", "topic_10"];
        let keys: HashSet<_> = names.iter().map(|n| physical_key("p_", n)).collect();
        assert_eq!(keys.len(), names.len());
    }

    #[test]
    fn test_physical_key_known_value() {
        let hex = blake3::hash(b"p_name").to_hex();
        assert_eq!(physical_key("p_", "name"), &hex[..PHYSICAL_KEY_HEX_LEN]);
    }

    #[test]
    fn test_tag_index_key_is_reserved_and_never_physical() {
        let key = tag_index_key("topic_update");
        assert_eq!(key, "tag::topic_update");
        assert!(is_reserved_key(&key));
        assert!(!is_reserved_key(&physical_key("p_", "tag::topic_update")));
    }

    #[test]
    fn test_hash_to_u64_determinism() {
        assert_eq!(hash_to_u64(b"node-key"), hash_to_u64(b"node-key"));
        assert_ne!(hash_to_u64(b"node-key-1"), hash_to_u64(b"node-key-2"));
    }

    #[test]
    fn test_payload_checksum_sensitivity() {
        assert_eq!(payload_checksum(b"abc"), payload_checksum(b"abc"));
        assert_ne!(payload_checksum(b"abc"), payload_checksum(b"abd"));
    }
}
