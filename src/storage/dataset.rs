use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};
use rocksdb::{WriteBatch, DB};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::core::{
    decode_log_key, decode_size, encode_size, entity_key, log_key, CompactId, RefKey, Reference,
};
use crate::error::{Result, StoreError};
use crate::parsing::entity_handler::PendingEntity;
use crate::storage::column_families::cf_names;
use crate::storage::indexing::dictionary::column_family;

/// Registry entry persisted in the system column family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub id: CompactId,
    pub name: String,
}

/// A named dataset. Owns one contiguous key range in each dataset column
/// family and holds no reference back to its store.
#[derive(Debug)]
pub struct Dataset {
    id: CompactId,
    name: String,
    next_sequence: Mutex<u64>,
    writer: Mutex<()>,
    deleted: AtomicBool,
}

impl Dataset {
    /// Open a registered dataset, recovering the next sequence number from
    /// the tail of its log.
    pub(crate) fn open(db: &DB, record: DatasetRecord) -> Result<Self> {
        let log = column_family(db, cf_names::LOG)?;
        let mut iter = db.raw_iterator_cf(log);
        iter.seek_for_prev(log_key(record.id, u64::MAX));

        let mut next_sequence = 1;
        if iter.valid() {
            if let Some((dataset_id, sequence)) = iter.key().and_then(decode_log_key) {
                if dataset_id == record.id {
                    next_sequence = sequence + 1;
                }
            }
        }
        iter.status()?;

        Ok(Self::with_sequence(record, next_sequence))
    }

    pub(crate) fn with_sequence(record: DatasetRecord, next_sequence: u64) -> Self {
        Self {
            id: record.id,
            name: record.name,
            next_sequence: Mutex::new(next_sequence),
            writer: Mutex::new(()),
            deleted: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> CompactId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record(&self) -> DatasetRecord {
        DatasetRecord { id: self.id, name: self.name.clone() }
    }

    /// Highest sequence number handed out so far, 0 for an empty log.
    pub fn last_sequence(&self) -> u64 {
        *self.next_sequence.lock() - 1
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
    }

    pub(crate) fn allocate_sequence(&self) -> u64 {
        let mut next = self.next_sequence.lock();
        let sequence = *next;
        *next += 1;
        sequence
    }

    /// Serializes commits to this dataset so log order equals commit order.
    pub(crate) fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted(u64),
    Updated(u64),
    Unchanged,
}

/// Stage the write of one entity into `batch`.
///
/// Byte length decides first; on equal length the stored JSON is compared
/// structurally. An unchanged entity produces no mutation at all. Otherwise
/// data, size and a new log entry are written and the reference indexes are
/// moved from the stored set to `entity.refs`.
pub(crate) fn write_entity(
    db: &DB,
    batch: &mut WriteBatch,
    dataset: &Dataset,
    entity: &PendingEntity,
) -> Result<WriteOutcome> {
    let data_cf = column_family(db, cf_names::DATA)?;
    let size_cf = column_family(db, cf_names::SIZE)?;
    let log_cf = column_family(db, cf_names::LOG)?;
    let outrefs_cf = column_family(db, cf_names::OUTREFS)?;
    let inrefs_cf = column_family(db, cf_names::INREFS)?;

    let key = entity_key(dataset.id, &entity.rid);
    let json = serde_json::to_vec(&entity.json)?;

    let is_update = match db.get_cf(size_cf, &key)? {
        None => false,
        Some(raw) => {
            let stored_len = decode_size(&raw).ok_or_else(|| {
                StoreError::DataIntegrity(format!("corrupt size entry for '{}'", entity.rid))
            })?;
            if stored_len == json.len() as u64 {
                let Some(stored) = db.get_cf(data_cf, &key)? else {
                    error!(dataset = %dataset.name, rid = %entity.rid, "size entry without data");
                    return Err(StoreError::DataIntegrity(format!(
                        "size entry present but data missing for '{}' in dataset '{}'",
                        entity.rid, dataset.name
                    )));
                };
                let stored: Value = serde_json::from_slice(&stored)?;
                if stored == entity.json {
                    return Ok(WriteOutcome::Unchanged);
                }
            }
            true
        }
    };

    let sequence = dataset.allocate_sequence();
    batch.put_cf(data_cf, &key, &json);
    batch.put_cf(size_cf, &key, encode_size(json.len() as u64));
    batch.put_cf(log_cf, log_key(dataset.id, sequence), entity.rid.as_bytes());

    let mut new_refs: BTreeSet<Reference> = entity
        .refs
        .iter()
        .map(|(property, object)| Reference::new(&entity.rid, *property, object))
        .collect();

    if is_update {
        let prefix = RefKey::from_prefix(dataset.id, &entity.rid);
        let mut iter = db.raw_iterator_cf(outrefs_cf);
        iter.seek(&prefix);
        while iter.valid() {
            let Some(raw_key) = iter.key() else { break };
            if !raw_key.starts_with(&prefix) {
                break;
            }
            let (_, ref_key) = RefKey::decode(raw_key).ok_or_else(|| {
                StoreError::DataIntegrity(format!("corrupt reference key for '{}'", entity.rid))
            })?;
            let existing = ref_key.to_reference(false);
            if !new_refs.remove(&existing) {
                batch.delete_cf(outrefs_cf, raw_key);
                batch.delete_cf(inrefs_cf, RefKey::incoming(&existing).encode(dataset.id));
            }
            iter.next();
        }
        iter.status()?;
    }

    for reference in &new_refs {
        batch.put_cf(
            outrefs_cf,
            RefKey::outgoing(reference).encode(dataset.id),
            reference.object.as_bytes(),
        );
        batch.put_cf(
            inrefs_cf,
            RefKey::incoming(reference).encode(dataset.id),
            reference.subject.as_bytes(),
        );
    }

    Ok(if is_update { WriteOutcome::Updated(sequence) } else { WriteOutcome::Inserted(sequence) })
}
