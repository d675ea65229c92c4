//! # webofdata
//!
//! An embedded graph-entity store. JSON entities identified by URIs or CURIEs
//! are ingested into named datasets, their identifiers are interned into
//! compact resource ids, and references between entities are indexed in both
//! directions for traversal.
//!
//! ## Features
//!
//! - Streaming single-pass ingestion with batched commits
//! - Forward and inverse reference indexes
//! - Ordered, resumable and sharded change feed per dataset
//! - Cross-dataset merge on read
//!
//! ## Example
//!
//! ```no_run
//! use webofdata::{Store, StoreConfig};
//!
//! fn example() -> webofdata::Result<()> {
//!     let store = Store::open(StoreConfig::with_path("./data/store"))?;
//!     store.store_entities("people", br#"[{"@id":"http://example.org/people/alice"}]"#)?;
//!     let rid = store.resource_id("http://example.org/people/alice")?;
//!     println!("{}", store.get_entity(&rid, &[])?);
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::redundant_closure_for_method_calls)]

/// Core data structures and key encoding
pub mod core;

pub mod error;

/// HTTP transport over the engine
pub mod http;

/// Streaming ingestion and identifier normalization
pub mod parsing;

pub mod storage;

pub use error::{Result, StoreError};
pub use storage::{Store, StoreConfig};
