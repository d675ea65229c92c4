pub mod changes;
pub mod column_families;
pub mod dataset;
pub mod graph;
pub mod scan;
pub mod store;
pub mod util;
pub mod indexing {
    pub mod dictionary;
}

pub use changes::{ChangeHandler, DatasetCopier, Pipe};
pub use dataset::{Dataset, WriteOutcome};
pub use scan::{ChangePage, ChangeToken, EntityPage, EntityToken};
pub use store::Store;
pub use util::StoreConfig;
