// SPDX-License-Identifier: Apache-2.0

//! Session identity: a 128-bit UUID rendered lowercase with dashes
//! (spec §3, "Session" - "Identity").

use std::fmt;

/// A session's identity. Generated once at construction, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Generates a fresh random (v4) session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Hashes this id into one of `shard_count` shards (spec §3, "Session
    /// table"). `shard_count` must be greater than zero.
    #[must_use]
    pub fn shard_index(&self, shard_count: usize) -> usize {
        let bytes = self.0.as_bytes();
        let mut hash: u64 = 0xcbf29ce484222325;
        for byte in bytes {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x100000001b3);
        }
        (hash as usize) % shard_count.max(1)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_render_lowercase_with_dashes() {
        let id = SessionId::generate();
        let rendered = id.to_string();
        assert_eq!(rendered.len(), 36);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
        assert_eq!(rendered, rendered.to_lowercase());
    }

    #[test]
    fn shard_index_is_stable_and_in_range() {
        let id = SessionId::generate();
        let first = id.shard_index(1024);
        let second = id.shard_index(1024);
        assert_eq!(first, second);
        assert!(first < 1024);
    }

    #[test]
    fn two_random_ids_are_distinct() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
