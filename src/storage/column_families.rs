//! RocksDB column family definitions.
//!
//! Dataset-scoped column families are shared by all datasets; keys carry the
//! dataset id as a 4-byte prefix (see [`crate::core::encoding`]).
//!
//! | Name | Purpose | Key |
//! |------|---------|-----|
//! | data | Entity JSON | dataset:rid |
//! | size | Byte length of stored JSON | dataset:rid |
//! | log | Change log | dataset:seq |
//! | outrefs | Forward references | dataset:RefKey |
//! | inrefs | Inverse references | dataset:RefKey |
//! | system | Counters, dataset registry, metadata entities | string key |
//! | namespaces | Prefix interning | tagged |
//! | properties | Property interning | tagged |

use rocksdb::{BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, Options};

pub mod cf_names {
    pub const DATA: &str = "data";
    pub const SIZE: &str = "size";
    pub const LOG: &str = "log";
    pub const OUTREFS: &str = "outrefs";
    pub const INREFS: &str = "inrefs";
    pub const SYSTEM: &str = "system";
    pub const NAMESPACES: &str = "namespaces";
    pub const PROPERTIES: &str = "properties";

    /// The five stores every dataset owns.
    pub const DATASET: &[&str] = &[DATA, SIZE, LOG, OUTREFS, INREFS];

    pub const ALL: &[&str] = &[DATA, SIZE, LOG, OUTREFS, INREFS, SYSTEM, NAMESPACES, PROPERTIES];
}

/// Options for point-lookup heavy families (data, size, interning).
/// Bloom filter at 10 bits per key, shared block cache, LZ4.
pub fn point_lookup_options(cache: &Cache) -> Options {
    let mut block_opts = BlockBasedOptions::default();
    block_opts.set_block_cache(cache);
    block_opts.set_bloom_filter(10.0, false);
    block_opts.set_cache_index_and_filter_blocks(true);

    let mut opts = Options::default();
    opts.set_block_based_table_factory(&block_opts);
    opts.set_compression_type(DBCompressionType::Lz4);
    opts
}

/// Options for families read by forward range scans (log, reference indexes).
pub fn scan_options(cache: &Cache) -> Options {
    let mut block_opts = BlockBasedOptions::default();
    block_opts.set_block_cache(cache);
    block_opts.set_block_size(16 * 1024);

    let mut opts = Options::default();
    opts.set_block_based_table_factory(&block_opts);
    opts.set_compression_type(DBCompressionType::Lz4);
    opts
}

/// Small, rarely written system metadata. No compression.
pub fn system_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(DBCompressionType::None);
    opts
}

pub fn column_family_descriptors(cache: &Cache) -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(cf_names::DATA, point_lookup_options(cache)),
        ColumnFamilyDescriptor::new(cf_names::SIZE, point_lookup_options(cache)),
        ColumnFamilyDescriptor::new(cf_names::LOG, scan_options(cache)),
        ColumnFamilyDescriptor::new(cf_names::OUTREFS, scan_options(cache)),
        ColumnFamilyDescriptor::new(cf_names::INREFS, scan_options(cache)),
        ColumnFamilyDescriptor::new(cf_names::SYSTEM, system_options()),
        ColumnFamilyDescriptor::new(cf_names::NAMESPACES, point_lookup_options(cache)),
        ColumnFamilyDescriptor::new(cf_names::PROPERTIES, point_lookup_options(cache)),
    ]
}
