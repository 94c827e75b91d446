//! Key to partition mapping.
//!
//! Uses 64-bit FNV-1a rather than the standard library hasher, whose output
//! is not guaranteed to match across processes or releases.

use fnv::FnvHasher;
use std::hash::Hasher;

/// FNV-1a over the raw bytes, without the length or terminator that
/// `Hash` impls would add.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

#[derive(Debug, Clone, Copy)]
pub struct PartitionManager {
    num_partitions: u32,
}

impl PartitionManager {
    pub fn new(num_partitions: u32) -> Self {
        Self {
            num_partitions: num_partitions.max(1),
        }
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    pub fn get_partition(&self, key: &str) -> u32 {
        (fnv1a(key.as_bytes()) % u64::from(self.num_partitions)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_vectors() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_partition_deterministic() {
        let manager = PartitionManager::new(271);

        let p1 = manager.get_partition("session_100");
        let p2 = PartitionManager::new(271).get_partition("session_100");
        assert_eq!(p1, p2);
        assert!(p1 < 271);
    }
}
