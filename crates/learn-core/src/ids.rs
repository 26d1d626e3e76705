//! Opaque identifier generation for sessions, checkpoints, and log entries.

use chrono::Utc;
use rand::Rng;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SUFFIX_LEN: usize = 9;

/// Generates an opaque, unique-enough identifier.
///
/// Millisecond timestamp plus a random base36 suffix. Not cryptographic;
/// collision resistance only needs to hold within one deployment.
pub fn new_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{:x}-{}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct() {
        let a = new_id();
        let b = new_id();
        assert_ne!(a, b);
    }
}
