use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rocksdb::{WriteBatch, DB};
use tracing::debug;

use crate::core::{decode_id, encode_id, CompactId};
use crate::error::{Result, StoreError};
use crate::storage::column_families::cf_names;

const NAME_TAG: u8 = b'n';
const ID_TAG: u8 = b'i';

/// What a [`Dictionary`] interns. Decides the column family and the persisted
/// counter key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DictionaryKind {
    Namespace,
    Property,
}

impl DictionaryKind {
    fn column_family(self) -> &'static str {
        match self {
            DictionaryKind::Namespace => cf_names::NAMESPACES,
            DictionaryKind::Property => cf_names::PROPERTIES,
        }
    }

    fn counter_key(self) -> &'static [u8] {
        match self {
            DictionaryKind::Namespace => b"_next_namespace_id",
            DictionaryKind::Property => b"_next_property_id",
        }
    }

    fn label(self) -> &'static str {
        match self {
            DictionaryKind::Namespace => "namespace",
            DictionaryKind::Property => "property",
        }
    }
}

#[derive(Debug, Default)]
struct DictionaryState {
    string_to_id: HashMap<String, CompactId>,
    id_to_string: HashMap<CompactId, String>,
    next_id: CompactId,
}

/// Persistent bidirectional string interning with an in-memory cache.
///
/// Ids are assigned sequentially from 1. The counter and both directions of
/// a new entry are written in one RocksDB batch. The write lock of `state`
/// is the critical section around check-then-create, so two callers racing
/// on the same new string always get the same id.
#[derive(Debug)]
pub struct Dictionary {
    kind: DictionaryKind,
    state: RwLock<DictionaryState>,
}

impl Dictionary {
    /// Load every persisted entry and the id counter into memory.
    pub fn load(db: &DB, kind: DictionaryKind) -> Result<Self> {
        let cf = column_family(db, kind.column_family())?;
        let system = column_family(db, cf_names::SYSTEM)?;

        let mut state = DictionaryState::default();
        if let Some(raw) = db.get_cf(system, kind.counter_key())? {
            state.next_id = decode_id(&raw).ok_or_else(|| {
                StoreError::DataIntegrity(format!("corrupt {} counter", kind.label()))
            })?;
        }

        let mut iter = db.raw_iterator_cf(cf);
        iter.seek(&[NAME_TAG]);
        while iter.valid() {
            let (Some(key), Some(value)) = (iter.key(), iter.value()) else { break };
            if key.first() != Some(&NAME_TAG) {
                break;
            }
            let name = String::from_utf8(key[1..].to_vec()).map_err(|_| {
                StoreError::DataIntegrity(format!("non UTF-8 {} entry", kind.label()))
            })?;
            let id = decode_id(value).ok_or_else(|| {
                StoreError::DataIntegrity(format!("corrupt id for {} '{}'", kind.label(), name))
            })?;
            state.next_id = state.next_id.max(id);
            state.id_to_string.insert(id, name.clone());
            state.string_to_id.insert(name, id);
            iter.next();
        }
        iter.status()?;

        debug!(kind = kind.label(), entries = state.string_to_id.len(), "dictionary loaded");
        Ok(Dictionary { kind, state: RwLock::new(state) })
    }

    /// Return the id of `value`, allocating and persisting a new one on first use.
    pub fn assert(&self, db: &DB, value: &str) -> Result<CompactId> {
        if value.is_empty() {
            return Err(StoreError::BadRequest(format!("{} cannot be empty", self.kind.label())));
        }

        if let Some(&id) = self.state.read().string_to_id.get(value) {
            return Ok(id);
        }

        let mut state = self.state.write();
        if let Some(&id) = state.string_to_id.get(value) {
            return Ok(id);
        }

        let cf = column_family(db, self.kind.column_family())?;
        let persisted = db.get_cf(cf, name_key(value)).map_err(|e| {
            StoreError::Integrity(format!("reading {} '{}': {}", self.kind.label(), value, e))
        })?;
        if let Some(raw) = persisted {
            let id = decode_id(&raw).ok_or_else(|| {
                StoreError::DataIntegrity(format!("corrupt id for {} '{}'", self.kind.label(), value))
            })?;
            state.id_to_string.insert(id, value.to_string());
            state.string_to_id.insert(value.to_string(), id);
            return Ok(id);
        }

        let id = state.next_id + 1;
        let system = column_family(db, cf_names::SYSTEM)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(system, self.kind.counter_key(), encode_id(id));
        batch.put_cf(cf, name_key(value), encode_id(id));
        batch.put_cf(cf, id_key(id), value.as_bytes());
        db.write(batch).map_err(|e| {
            StoreError::Integrity(format!("persisting {} '{}': {}", self.kind.label(), value, e))
        })?;

        state.next_id = id;
        state.id_to_string.insert(id, value.to_string());
        state.string_to_id.insert(value.to_string(), id);
        debug!(kind = self.kind.label(), id, value, "interned");
        Ok(id)
    }

    /// Id of an already interned string. Never allocates.
    pub fn encode(&self, value: &str) -> Option<CompactId> {
        self.state.read().string_to_id.get(value).copied()
    }

    pub fn decode(&self, id: CompactId) -> Option<String> {
        self.state.read().id_to_string.get(&id).cloned()
    }

    /// All entries ordered by id.
    pub fn entries(&self) -> Vec<(CompactId, String)> {
        let state = self.state.read();
        let mut entries: Vec<_> =
            state.id_to_string.iter().map(|(id, value)| (*id, value.clone())).collect();
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    pub fn len(&self) -> usize {
        self.state.read().string_to_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Namespace and property dictionaries of one store.
#[derive(Debug)]
pub struct Interner {
    db: Arc<DB>,
    namespaces: Dictionary,
    properties: Dictionary,
}

impl Interner {
    pub fn open(db: Arc<DB>) -> Result<Self> {
        let namespaces = Dictionary::load(&db, DictionaryKind::Namespace)?;
        let properties = Dictionary::load(&db, DictionaryKind::Property)?;
        Ok(Interner { db, namespaces, properties })
    }

    pub fn assert_namespace(&self, prefix: &str) -> Result<CompactId> {
        self.namespaces.assert(&self.db, prefix)
    }

    pub fn assert_property(&self, qualified_name: &str) -> Result<CompactId> {
        self.properties.assert(&self.db, qualified_name)
    }

    pub fn namespace_id(&self, prefix: &str) -> Option<CompactId> {
        self.namespaces.encode(prefix)
    }

    pub fn property_id(&self, qualified_name: &str) -> Option<CompactId> {
        self.properties.encode(qualified_name)
    }

    pub fn namespace_prefix(&self, id: CompactId) -> Option<String> {
        self.namespaces.decode(id)
    }

    pub fn property_name(&self, id: CompactId) -> Option<String> {
        self.properties.decode(id)
    }

    pub fn namespaces(&self) -> Vec<(CompactId, String)> {
        self.namespaces.entries()
    }
}

fn name_key(value: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(value.len() + 1);
    key.push(NAME_TAG);
    key.extend_from_slice(value.as_bytes());
    key
}

fn id_key(id: CompactId) -> [u8; 5] {
    let mut key = [ID_TAG; 5];
    key[1..].copy_from_slice(&encode_id(id));
    key
}

pub(crate) fn column_family<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::DataIntegrity(format!("column family '{}' missing", name)))
}
