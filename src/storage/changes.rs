//! Push-style change propagation driven by a dataset's change log.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::Result;
use crate::storage::store::Store;

/// Receives entities read from a change feed.
pub trait ChangeHandler: Send + Sync {
    fn process_entity(&self, entity: &Value) -> Result<()>;
}

impl Store {
    /// Feed changes after `after` to `handler`. Returns the sequence to
    /// resume from next time.
    pub fn write_changes_to_handler(
        &self,
        dataset: &str,
        after: u64,
        take: Option<usize>,
        shard: Option<u32>,
        handler: &dyn ChangeHandler,
    ) -> Result<u64> {
        self.for_each_change(dataset, after, take, shard, |_, entity| handler.process_entity(&entity))
    }
}

/// Writes every changed entity unmodified into a target dataset.
pub struct DatasetCopier {
    store: Arc<Store>,
    target: String,
}

impl DatasetCopier {
    pub fn new(store: Arc<Store>, target: impl Into<String>) -> Self {
        Self { store, target: target.into() }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl ChangeHandler for DatasetCopier {
    fn process_entity(&self, entity: &Value) -> Result<()> {
        self.store.put_entity(&self.target, entity).map(|_| ())
    }
}

/// A change handler bound to a source dataset that remembers how far it got.
/// Only one pass runs at a time.
pub struct Pipe {
    name: String,
    source: String,
    shard: Option<u32>,
    handler: Box<dyn ChangeHandler>,
    position: Mutex<u64>,
}

impl Pipe {
    pub fn new(name: impl Into<String>, source: impl Into<String>, handler: Box<dyn ChangeHandler>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            shard: None,
            handler,
            position: Mutex::new(0),
        }
    }

    pub fn with_shard(mut self, shard: u32) -> Self {
        self.shard = Some(shard);
        self
    }

    /// Continue from a previously saved position.
    pub fn starting_after(self, sequence: u64) -> Self {
        *self.position.lock() = sequence;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> u64 {
        *self.position.lock()
    }

    /// Run one pass over the source's new changes. Returns `None` if another
    /// pass is still running, otherwise the new position.
    pub fn run_once(&self, store: &Store, take: Option<usize>) -> Result<Option<u64>> {
        let Some(mut position) = self.position.try_lock() else {
            debug!(pipe = %self.name, "pass already running");
            return Ok(None);
        };

        let start = *position;
        let end = store.write_changes_to_handler(&self.source, start, take, self.shard, self.handler.as_ref())?;
        *position = end;

        if end != start {
            info!(pipe = %self.name, source = %self.source, from = start, to = end, "pipe pass finished");
        }
        Ok(Some(end))
    }
}
