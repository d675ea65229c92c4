use std::path::PathBuf;

use xxhash_rust::xxh64::xxh64;

/// Number of shards a dataset is partitioned into for parallel scans.
pub const DEFAULT_SHARD_COUNT: u32 = 4;

/// Number of entities per committed ingestion batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Current change-feed generation. Tokens carrying another generation trigger
/// a full resync.
pub const GENERATION: u32 = 1;

/// Default prefix for bare local names when an ingestion supplies no context.
pub const DEFAULT_PREFIX: &str = "http://data.webofdata.io/things/";

/// Default shared block cache size (256 MiB).
pub const DEFAULT_BLOCK_CACHE_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the RocksDB files of the store
    pub path: PathBuf,
    /// Entities accumulated before an ingestion batch is committed
    pub batch_size: usize,
    /// Shards a dataset is partitioned into for scans
    pub shard_count: u32,
    /// Prefix bare names resolve against when no `@context` supplies one
    pub default_prefix: String,
    /// Size of the LRU block cache shared by all column families
    pub block_cache_bytes: usize,
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/store"),
            batch_size: DEFAULT_BATCH_SIZE,
            shard_count: DEFAULT_SHARD_COUNT,
            default_prefix: DEFAULT_PREFIX.to_string(),
            block_cache_bytes: DEFAULT_BLOCK_CACHE_BYTES,
            create_if_missing: true,
        }
    }
}

impl StoreConfig {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }
}

/// Shard an entity belongs to. Entity listings and the change feed both shard
/// by RID, so one entity always lives in the same shard.
pub fn shard_of(rid: &str, shard_count: u32) -> u32 {
    (xxh64(rid.as_bytes(), 0) % u64::from(shard_count.max(1))) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_is_stable_and_in_range() {
        for rid in ["ns1:a", "ns1:b", "ns2:some-longer-local-name", ""] {
            let shard = shard_of(rid, 4);
            assert!(shard < 4);
            assert_eq!(shard, shard_of(rid, 4));
        }
    }

    #[test]
    fn test_shards_spread_entities() {
        let mut seen = [0usize; 4];
        for i in 0..200 {
            seen[shard_of(&format!("ns1:entity-{}", i), 4) as usize] += 1;
        }
        assert!(seen.iter().all(|&count| count > 0));
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.shard_count, 4);
        assert!(config.create_if_missing);
    }
}
