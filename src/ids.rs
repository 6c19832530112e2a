// src/ids.rs

use rand::Rng;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Stable content digest of an uploaded file (SHA-256, lowercase hex).
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Generate a run identifier: `run_<base36 millis>_<6 random chars>`.
///
/// The time prefix keeps ids roughly sortable by creation; the suffix keeps
/// two runs created in the same millisecond apart.
pub fn generate_run_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("run_{}_{}", to_base36(now_millis().max(0) as u64), suffix)
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_content_hash() {
        let h1 = content_hash(b"%PDF-1.4 invoice");
        let h2 = content_hash(b"%PDF-1.4 invoice");
        let h3 = content_hash(b"%PDF-1.4 invoice 2");

        assert_eq!(h1, h2); // Same bytes = same hash
        assert_ne!(h1, h3);
        assert_eq!(h1.len(), 64);
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_run_ids_are_unique() {
        let ids: HashSet<String> = (0..500).map(|_| generate_run_id()).collect();
        assert_eq!(ids.len(), 500);
        assert!(ids.iter().all(|id| id.starts_with("run_")));
    }

    #[test]
    fn test_base36() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
    }
}
