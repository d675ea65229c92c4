//! Bounded, resumable and sharded scans over entities and the change log.
//!
//! Every scan follows the same loop: seek to the resume point (or the start of
//! the dataset), emit matching items while the iterator stays inside the
//! dataset and fewer than `take` items were emitted, then advance. Resume
//! points are exclusive.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::core::{dataset_prefix, decode_log_key, entity_key, entity_key_rid, log_key};
use crate::error::{Result, StoreError};
use crate::storage::column_families::cf_names;
use crate::storage::dataset::Dataset;
use crate::storage::indexing::dictionary::column_family;
use crate::storage::store::Store;
use crate::storage::util::{shard_of, GENERATION};

/// Continuation of an entity listing: `shard_lastRid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityToken {
    pub shard: Option<u32>,
    /// RID of the last emitted entity. Empty means from the start.
    pub last_rid: String,
}

/// Continuation of a change feed: `shard_lastSequence_generation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeToken {
    pub shard: Option<u32>,
    pub sequence: u64,
    pub generation: u32,
}

fn format_shard(shard: Option<u32>) -> String {
    shard.map_or_else(|| "-1".to_string(), |s| s.to_string())
}

fn parse_shard(raw: &str, token: &str) -> Result<Option<u32>> {
    if raw == "-1" {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| StoreError::BadRequest(format!("invalid shard in token '{}'", token)))
}

impl fmt::Display for EntityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", format_shard(self.shard), self.last_rid)
    }
}

impl FromStr for EntityToken {
    type Err = StoreError;

    fn from_str(token: &str) -> Result<Self> {
        let (shard, last_rid) = token
            .split_once('_')
            .ok_or_else(|| StoreError::BadRequest(format!("malformed entity token '{}'", token)))?;
        Ok(Self { shard: parse_shard(shard, token)?, last_rid: last_rid.to_string() })
    }
}

impl fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", format_shard(self.shard), self.sequence, self.generation)
    }
}

impl FromStr for ChangeToken {
    type Err = StoreError;

    fn from_str(token: &str) -> Result<Self> {
        let malformed = || StoreError::BadRequest(format!("malformed change token '{}'", token));
        let mut parts = token.split('_');
        let (Some(shard), Some(sequence), Some(generation), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed());
        };
        Ok(Self {
            shard: parse_shard(shard, token)?,
            sequence: sequence.parse().map_err(|_| malformed())?,
            generation: generation.parse().map_err(|_| malformed())?,
        })
    }
}

/// One page of an entity listing.
#[derive(Debug, Clone, Serialize)]
pub struct EntityPage {
    pub items: Vec<Value>,
    /// Present when the page was cut short by `take`
    pub next_token: Option<String>,
}

/// One page of a change feed.
#[derive(Debug, Clone, Serialize)]
pub struct ChangePage {
    pub items: Vec<Value>,
    /// Resume point after this page. Always present.
    pub next_token: String,
    pub last_sequence: u64,
    /// The caller's token was issued by another generation and the feed
    /// restarted from the beginning
    pub full_resync: bool,
}

impl Store {
    fn check_shard(&self, shard: Option<u32>) -> Result<()> {
        match shard {
            Some(s) if s >= self.config.shard_count => Err(StoreError::BadRequest(format!(
                "shard {} out of range, store has {} shards",
                s, self.config.shard_count
            ))),
            _ => Ok(()),
        }
    }

    /// List entities of a dataset in RID order, resuming after `after`.
    pub fn scan_entities(
        &self,
        dataset: &str,
        after: Option<&str>,
        take: Option<usize>,
        shard: Option<u32>,
    ) -> Result<EntityPage> {
        self.check_shard(shard)?;
        let dataset = self.require_dataset(dataset)?;
        let data_cf = column_family(&self.db, cf_names::DATA)?;
        let prefix = dataset_prefix(dataset.id());

        let mut iter = self.db.raw_iterator_cf(data_cf);
        match after.filter(|rid| !rid.is_empty()) {
            Some(rid) => {
                let resume = entity_key(dataset.id(), rid);
                iter.seek(&resume);
                if iter.valid() && iter.key() == Some(resume.as_slice()) {
                    iter.next();
                }
            }
            None => iter.seek(prefix),
        }

        let mut items = Vec::new();
        let mut last_rid = None;
        while iter.valid() && take.map_or(true, |t| items.len() < t) {
            let (Some(key), Some(value)) = (iter.key(), iter.value()) else { break };
            let Some(rid) = entity_key_rid(dataset.id(), key) else { break };
            if shard.map_or(true, |s| shard_of(rid, self.config.shard_count) == s) {
                items.push(serde_json::from_slice(value)?);
                last_rid = Some(rid.to_string());
            }
            iter.next();
        }
        iter.status()?;

        let next_token = match (take, last_rid) {
            (Some(t), Some(last_rid)) if items.len() == t => {
                Some(EntityToken { shard, last_rid }.to_string())
            }
            _ => None,
        };
        Ok(EntityPage { items, next_token })
    }

    /// Entity listing driven by a continuation token. No token lists the
    /// whole dataset unsharded.
    pub fn scan_entities_from_token(
        &self,
        dataset: &str,
        token: Option<&str>,
        take: Option<usize>,
    ) -> Result<EntityPage> {
        match token {
            Some(token) => {
                let token: EntityToken = token.parse()?;
                self.scan_entities(dataset, Some(&token.last_rid), take, token.shard)
            }
            None => self.scan_entities(dataset, None, take, None),
        }
    }

    /// Changes of a dataset with a sequence greater than `after`, in log order.
    pub fn scan_changes(
        &self,
        dataset: &str,
        after: u64,
        take: Option<usize>,
        shard: Option<u32>,
    ) -> Result<ChangePage> {
        let mut items = Vec::new();
        let last_sequence = self.for_each_change(dataset, after, take, shard, |_, entity| {
            items.push(entity);
            Ok(())
        })?;

        Ok(ChangePage {
            items,
            next_token: ChangeToken { shard, sequence: last_sequence, generation: GENERATION }
                .to_string(),
            last_sequence,
            full_resync: false,
        })
    }

    /// Change feed driven by a continuation token. A token from another
    /// generation restarts the feed and flags a full resync.
    pub fn scan_changes_from_token(
        &self,
        dataset: &str,
        token: Option<&str>,
        take: Option<usize>,
    ) -> Result<ChangePage> {
        let Some(token) = token else {
            return self.scan_changes(dataset, 0, take, None);
        };
        let token: ChangeToken = token.parse()?;
        if token.generation != GENERATION {
            let mut page = self.scan_changes(dataset, 0, take, token.shard)?;
            page.full_resync = true;
            return Ok(page);
        }
        self.scan_changes(dataset, token.sequence, take, token.shard)
    }

    /// Initial entity listing tokens, one per shard.
    pub fn shard_tokens(&self, dataset: &str, shard_count: u32) -> Result<Vec<String>> {
        self.check_shard_count(dataset, shard_count)?;
        Ok((0..shard_count)
            .map(|shard| EntityToken { shard: Some(shard), last_rid: String::new() }.to_string())
            .collect())
    }

    /// Initial change feed tokens, one per shard.
    pub fn change_shard_tokens(&self, dataset: &str, shard_count: u32) -> Result<Vec<String>> {
        self.check_shard_count(dataset, shard_count)?;
        Ok((0..shard_count)
            .map(|shard| {
                ChangeToken { shard: Some(shard), sequence: 0, generation: GENERATION }.to_string()
            })
            .collect())
    }

    fn check_shard_count(&self, dataset: &str, shard_count: u32) -> Result<()> {
        self.require_dataset(dataset)?;
        if shard_count != self.config.shard_count {
            return Err(StoreError::BadRequest(format!(
                "store is partitioned into {} shards, not {}",
                self.config.shard_count, shard_count
            )));
        }
        Ok(())
    }

    /// Walk the log after `after`, resolving each entry to the current entity
    /// JSON. Returns the last sequence scanned, or `after` if none was.
    pub(crate) fn for_each_change<F>(
        &self,
        dataset: &str,
        after: u64,
        take: Option<usize>,
        shard: Option<u32>,
        mut emit: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, Value) -> Result<()>,
    {
        self.check_shard(shard)?;
        let dataset = self.require_dataset(dataset)?;
        let log_cf = column_family(&self.db, cf_names::LOG)?;
        let data_cf = column_family(&self.db, cf_names::DATA)?;

        let mut iter = self.db.raw_iterator_cf(log_cf);
        iter.seek(log_key(dataset.id(), after.saturating_add(1)));

        let mut last_sequence = after;
        let mut emitted = 0usize;
        while iter.valid() && take.map_or(true, |t| emitted < t) {
            let (Some(key), Some(rid)) = (iter.key(), iter.value()) else { break };
            let Some((dataset_id, sequence)) = decode_log_key(key) else { break };
            if dataset_id != dataset.id() {
                break;
            }
            let rid = std::str::from_utf8(rid).map_err(|_| {
                StoreError::DataIntegrity(format!("non UTF-8 log entry {}", sequence))
            })?;

            if shard.map_or(true, |s| shard_of(rid, self.config.shard_count) == s) {
                let entity = self.load_logged_entity(&dataset, data_cf, rid, sequence)?;
                emit(sequence, entity)?;
                emitted += 1;
            }
            last_sequence = sequence;
            iter.next();
        }
        iter.status()?;
        Ok(last_sequence)
    }

    fn load_logged_entity(
        &self,
        dataset: &Dataset,
        data_cf: &rocksdb::ColumnFamily,
        rid: &str,
        sequence: u64,
    ) -> Result<Value> {
        match self.db.get_cf(data_cf, entity_key(dataset.id(), rid))? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => {
                error!(dataset = dataset.name(), rid, sequence, "log entry without entity");
                Err(StoreError::DataIntegrity(format!(
                    "log entry {} refers to missing entity '{}' in dataset '{}'",
                    sequence,
                    rid,
                    dataset.name()
                )))
            }
        }
    }
}
