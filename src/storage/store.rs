use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Read;
use std::mem;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use rocksdb::{Cache, Options, WriteBatch, DB};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::{dataset_range, decode_id, encode_id, make_rid, split_rid};
use crate::error::{Result, StoreError};
use crate::parsing::entity_handler::{EntityHandler, PendingEntity};
use crate::parsing::normalizer::{reference_target, Identifier};
use crate::storage::column_families::{cf_names, column_family_descriptors};
use crate::storage::dataset::{write_entity, Dataset, DatasetRecord, WriteOutcome};
use crate::storage::indexing::dictionary::{column_family, Interner};
use crate::storage::util::StoreConfig;

const NEXT_DATASET_ID_KEY: &[u8] = b"_next_dataset_id";
const DATASET_RECORD_PREFIX: &str = "datasets/";
const STORE_METADATA_KEY: &[u8] = b"store_entity";
const DATASET_METADATA_PREFIX: &str = "dataset_entity_";

/// Embedded graph-entity store backed by one RocksDB instance.
pub struct Store {
    pub(super) db: Arc<DB>,
    pub(super) config: StoreConfig,
    pub(super) interner: Interner,
    datasets: RwLock<BTreeMap<String, Arc<Dataset>>>,
    dataset_name: Regex,
}

impl Store {
    /// Open (or create) the store at `config.path`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let block_cache = Cache::new_lru_cache(config.block_cache_bytes);
        let mut opts = Options::default();
        opts.create_if_missing(config.create_if_missing);
        opts.create_missing_column_families(true);

        let db = DB::open_cf_descriptors(&opts, &config.path, column_family_descriptors(&block_cache))?;
        let db = Arc::new(db);
        let interner = Interner::open(Arc::clone(&db))?;
        let datasets = load_datasets(&db)?;

        info!(
            path = %config.path.display(),
            datasets = datasets.len(),
            namespaces = interner.namespaces().len(),
            "store opened"
        );

        let dataset_name = Regex::new(r"^[a-zA-Z0-9 ._-]+$")
            .map_err(|e| StoreError::BadRequest(format!("invalid dataset name pattern: {}", e)))?;

        Ok(Self {
            db,
            config,
            interner,
            datasets: RwLock::new(datasets),
            dataset_name,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    /// Return the named dataset, creating and registering it on first use.
    pub fn assert_dataset(&self, name: &str) -> Result<Arc<Dataset>> {
        if !self.dataset_name.is_match(name) {
            return Err(StoreError::BadRequest(format!("invalid dataset name '{}'", name)));
        }

        if let Some(dataset) = self.datasets.read().get(name) {
            return Ok(Arc::clone(dataset));
        }

        let mut datasets = self.datasets.write();
        if let Some(dataset) = datasets.get(name) {
            return Ok(Arc::clone(dataset));
        }

        let system = column_family(&self.db, cf_names::SYSTEM)?;
        let last_id = match self.db.get_cf(system, NEXT_DATASET_ID_KEY)? {
            Some(raw) => decode_id(&raw)
                .ok_or_else(|| StoreError::DataIntegrity("corrupt dataset counter".to_string()))?,
            None => 0,
        };
        let record = DatasetRecord { id: last_id + 1, name: name.to_string() };

        let mut batch = WriteBatch::default();
        batch.put_cf(system, NEXT_DATASET_ID_KEY, encode_id(record.id));
        batch.put_cf(system, dataset_record_key(name), bincode::serialize(&record)?);
        self.db
            .write(batch)
            .map_err(|e| StoreError::Integrity(format!("registering dataset '{}': {}", name, e)))?;

        info!(dataset = name, id = record.id, "dataset created");
        let dataset = Arc::new(Dataset::with_sequence(record, 1));
        datasets.insert(name.to_string(), Arc::clone(&dataset));
        Ok(dataset)
    }

    pub fn get_dataset(&self, name: &str) -> Option<Arc<Dataset>> {
        self.datasets.read().get(name).cloned()
    }

    pub fn require_dataset(&self, name: &str) -> Result<Arc<Dataset>> {
        self.get_dataset(name)
            .ok_or_else(|| StoreError::NotFound(format!("dataset '{}'", name)))
    }

    /// All datasets ordered by name.
    pub fn datasets(&self) -> Vec<Arc<Dataset>> {
        self.datasets.read().values().cloned().collect()
    }

    /// Remove a dataset and every key it owns in the five dataset stores.
    /// Holds the dataset's writer lock and then the registry lock until the
    /// batch is durable. The registry entry is dropped only after that.
    pub fn delete_dataset(&self, name: &str) -> Result<()> {
        let dataset = self.require_dataset(name)?;
        let _writer = dataset.lock_writer();
        let mut datasets = self.datasets.write();
        match datasets.get(name) {
            Some(current) if Arc::ptr_eq(current, &dataset) => {}
            _ => return Err(StoreError::NotFound(format!("dataset '{}'", name))),
        }

        let (start, end) = dataset_range(dataset.id());
        let system = column_family(&self.db, cf_names::SYSTEM)?;

        let mut batch = WriteBatch::default();
        for cf_name in cf_names::DATASET {
            let cf = column_family(&self.db, cf_name)?;
            batch.delete_range_cf(cf, &start, &end);
        }
        batch.delete_cf(system, dataset_record_key(name));
        batch.delete_cf(system, dataset_metadata_key(name));
        self.db.write(batch)?;

        datasets.remove(name);
        dataset.mark_deleted();

        info!(dataset = name, id = dataset.id(), "dataset deleted");
        Ok(())
    }

    /// Ingest a complete JSON array held in memory.
    pub fn store_entities(&self, dataset: &str, data: &[u8]) -> Result<usize> {
        self.store_entity_stream(dataset, data)
    }

    /// Ingest a JSON array from a stream in one pass.
    ///
    /// Entities are committed in batches of `batch_size`. On error, batches
    /// already committed stay durable and the pending batch is discarded.
    pub fn store_entity_stream<R: Read>(&self, dataset: &str, reader: R) -> Result<usize> {
        let dataset = self.assert_dataset(dataset)?;
        let writer = |entities: Vec<PendingEntity>| -> Result<()> {
            self.commit_entities(&dataset, entities).map(|_| ())
        };
        let handler =
            EntityHandler::new(&self.interner, &self.config.default_prefix, self.config.batch_size, writer);
        let count = handler.run(reader)?;

        info!(dataset = dataset.name(), entities = count, "ingestion finished");
        Ok(count)
    }

    /// Write one already normalized entity: `@id` holds a RID, keys are
    /// property tokens and references are `<RID>` strings.
    pub fn put_entity(&self, dataset: &str, entity: &Value) -> Result<WriteOutcome> {
        let Value::Object(fields) = entity else {
            return Err(StoreError::BadRequest("entity must be a JSON object".to_string()));
        };
        let rid = fields
            .get("@id")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::BadRequest("entity without @id".to_string()))?
            .to_string();

        let mut refs = BTreeSet::new();
        for (key, value) in fields {
            if key == "@id" {
                continue;
            }
            let property = self.interner.assert_property(key)?;
            let candidates = match value {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            };
            for target in candidates.into_iter().filter_map(Value::as_str).filter_map(reference_target) {
                refs.insert((property, target.to_string()));
            }
        }

        let dataset = self.assert_dataset(dataset)?;
        let mut outcomes =
            self.commit_entities(&dataset, vec![PendingEntity { rid, json: entity.clone(), refs }])?;
        Ok(outcomes.pop().unwrap_or(WriteOutcome::Unchanged))
    }

    /// Commit entities to a dataset under its writer lock. A RID that repeats
    /// inside the batch forces a commit first, so the diff of the repeat sees
    /// the earlier version.
    pub(crate) fn commit_entities(
        &self,
        dataset: &Dataset,
        entities: Vec<PendingEntity>,
    ) -> Result<Vec<WriteOutcome>> {
        let _writer = dataset.lock_writer();
        if dataset.is_deleted() {
            return Err(StoreError::NotFound(format!("dataset '{}'", dataset.name())));
        }

        let mut batch = WriteBatch::default();
        let mut staged: HashSet<String> = HashSet::new();
        let mut outcomes = Vec::with_capacity(entities.len());

        for entity in &entities {
            if !staged.insert(entity.rid.clone()) {
                self.db.write(mem::take(&mut batch))?;
                staged.clear();
                staged.insert(entity.rid.clone());
            }
            outcomes.push(write_entity(&self.db, &mut batch, dataset, entity)?);
        }
        if !batch.is_empty() {
            self.db.write(batch)?;
        }

        debug!(
            dataset = dataset.name(),
            entities = entities.len(),
            changed = outcomes.iter().filter(|o| **o != WriteOutcome::Unchanged).count(),
            last_sequence = dataset.last_sequence(),
            "batch committed"
        );
        Ok(outcomes)
    }

    /// Resolve an identifier to its RID without creating namespaces.
    /// Canonical RIDs with a known namespace are returned as is.
    pub fn resource_id(&self, raw: &str) -> Result<String> {
        if let Some((id, _)) = split_rid(raw) {
            if self.interner.namespace_prefix(id).is_some() {
                return Ok(raw.to_string());
            }
        }

        let (prefix, local) = match Identifier::classify(raw) {
            Identifier::Local(local) => (self.config.default_prefix.as_str(), local),
            Identifier::Expanded { prefix, local } | Identifier::Curie { prefix, local } => {
                (prefix, local)
            }
        };
        let id = self
            .interner
            .namespace_id(prefix)
            .ok_or_else(|| StoreError::NotFound(format!("namespace '{}'", prefix)))?;
        Ok(make_rid(id, local))
    }

    /// Expand a RID back into its full identifier.
    pub fn expand_rid(&self, rid: &str) -> Result<String> {
        let (id, local) = split_rid(rid)
            .ok_or_else(|| StoreError::BadRequest(format!("'{}' is not a resource id", rid)))?;
        let prefix = self
            .interner
            .namespace_prefix(id)
            .ok_or_else(|| StoreError::NotFound(format!("namespace ns{}", id)))?;
        Ok(format!("{}{}", prefix, local))
    }

    /// `{"@id":"@context","namespaces":{"ns1":"<prefix>",...}}`
    pub fn namespaces_context(&self) -> Value {
        let namespaces: Map<String, Value> = self
            .interner
            .namespaces()
            .into_iter()
            .map(|(id, prefix)| (format!("ns{}", id), Value::String(prefix)))
            .collect();

        let mut context = Map::new();
        context.insert("@id".to_string(), Value::String("@context".to_string()));
        context.insert("namespaces".to_string(), Value::Object(namespaces));
        Value::Object(context)
    }

    pub fn put_store_metadata(&self, entity: &Value) -> Result<()> {
        self.put_metadata(STORE_METADATA_KEY, entity)
    }

    pub fn get_store_metadata(&self) -> Result<Option<Value>> {
        self.get_metadata(STORE_METADATA_KEY)
    }

    /// Replace a dataset's metadata entity. The registry stays read-locked
    /// so a concurrent delete cannot leave the entity behind.
    pub fn put_dataset_metadata(&self, dataset: &str, entity: &Value) -> Result<()> {
        let datasets = self.datasets.read();
        if !datasets.contains_key(dataset) {
            return Err(StoreError::NotFound(format!("dataset '{}'", dataset)));
        }
        self.put_metadata(&dataset_metadata_key(dataset), entity)
    }

    pub fn get_dataset_metadata(&self, dataset: &str) -> Result<Option<Value>> {
        self.require_dataset(dataset)?;
        self.get_metadata(&dataset_metadata_key(dataset))
    }

    fn put_metadata(&self, key: &[u8], entity: &Value) -> Result<()> {
        if !entity.is_object() {
            return Err(StoreError::BadRequest("metadata must be a JSON object".to_string()));
        }
        let system = column_family(&self.db, cf_names::SYSTEM)?;
        let bytes = serde_json::to_vec(entity)?;
        self.db.put_cf(system, key, bytes).map_err(|e| {
            StoreError::Integrity(format!("writing metadata '{}': {}", String::from_utf8_lossy(key), e))
        })
    }

    fn get_metadata(&self, key: &[u8]) -> Result<Option<Value>> {
        let system = column_family(&self.db, cf_names::SYSTEM)?;
        match self.db.get_cf(system, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}

fn dataset_record_key(name: &str) -> Vec<u8> {
    format!("{}{}", DATASET_RECORD_PREFIX, name).into_bytes()
}

fn dataset_metadata_key(name: &str) -> Vec<u8> {
    format!("{}{}", DATASET_METADATA_PREFIX, name).into_bytes()
}

fn load_datasets(db: &DB) -> Result<BTreeMap<String, Arc<Dataset>>> {
    let system = column_family(db, cf_names::SYSTEM)?;
    let mut records = Vec::new();

    let mut iter = db.raw_iterator_cf(system);
    iter.seek(DATASET_RECORD_PREFIX.as_bytes());
    while iter.valid() {
        let (Some(key), Some(value)) = (iter.key(), iter.value()) else { break };
        if !key.starts_with(DATASET_RECORD_PREFIX.as_bytes()) {
            break;
        }
        records.push(bincode::deserialize::<DatasetRecord>(value)?);
        iter.next();
    }
    iter.status()?;

    let mut datasets = BTreeMap::new();
    for record in records {
        let dataset = Dataset::open(db, record)?;
        debug!(dataset = dataset.name(), id = dataset.id(), last_sequence = dataset.last_sequence(), "dataset loaded");
        datasets.insert(dataset.name().to_string(), Arc::new(dataset));
    }
    Ok(datasets)
}
