//! Stable cache keys.

use sha2::{Digest, Sha256};

/// Length of a key in characters.
pub const KEY_LEN: usize = 64;

/// Derives file-name-safe keys from arbitrary strings.
///
/// Keys are the lowercase hex SHA-256 of the UTF-8 input, so they are
/// identical across processes, platforms and managers.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyHasher;

impl KeyHasher {
    pub fn hash(input: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Whether `candidate` has the shape of a key produced by [`KeyHasher::hash`].
    pub fn is_key(candidate: &str) -> bool {
        candidate.len() == KEY_LEN
            && candidate
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}
