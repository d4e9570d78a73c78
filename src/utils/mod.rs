/// Utility functions and helpers
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of hash slots in a cluster keyspace
pub const SLOT_COUNT: u16 = 16384;

/// Generate a unique ID based on timestamp and random component
///
/// Used to tag pooled connections so log lines from concurrent callers can
/// be correlated.
pub fn generate_id(prefix: &str) -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let random: u32 = rand::random();
    format!("{}-{}-{:x}", prefix, timestamp, random)
}

/// Calculate CRC16/XMODEM checksum (used for cluster slot calculation)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= (*byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Extract the hash tag from a key, if present
///
/// Only the text between the first `{` and the first following `}` is
/// hashed, so related keys can be pinned to the same slot. An empty tag
/// (`{}`) does not count.
pub fn extract_hash_tag(key: &[u8]) -> &[u8] {
    if let Some(start) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[start + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[start + 1..start + 1 + len];
            }
        }
    }
    key
}

/// Calculate the hash slot for a key
pub fn slot_for_key(key: &[u8]) -> u16 {
    crc16(extract_hash_tag(key)) % SLOT_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc16() {
        // Known XMODEM test vector
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(b"foo"), 44950);
    }

    #[test]
    fn test_extract_hash_tag() {
        assert_eq!(extract_hash_tag(b"foo{bar}baz"), b"bar");
        assert_eq!(extract_hash_tag(b"no_tag"), b"no_tag");
        assert_eq!(extract_hash_tag(b"empty{}tag"), b"empty{}tag");
        assert_eq!(extract_hash_tag(b"{user1000}.following"), b"user1000");
    }

    #[test]
    fn test_slot_for_key_in_range() {
        assert!(slot_for_key(b"hello") < SLOT_COUNT);
    }

    #[test]
    fn test_hash_tag_keys_colocate() {
        assert_eq!(slot_for_key(b"{user1}.profile"), slot_for_key(b"{user1}.cart"));
    }

    #[test]
    fn test_generate_id() {
        let id1 = generate_id("conn");
        let id2 = generate_id("conn");

        assert!(id1.starts_with("conn-"));
        assert_ne!(id1, id2);
    }
}
