//! Streaming ingestion state machine.
//!
//! Consumes the token stream of a top-level JSON array of entities, rewrites
//! identifiers to RIDs and hands finished entities to an [`EntityBatchWriter`]
//! in batches.
//!
//! ```text
//! Start --[--> Ready --{--> InEntity --key--> InEntityField --value--> InEntity --}--> Ready
//!                |                                 | "@id":"@context"
//!                |                                 v
//!                |            InContext --"namespaces":{--> InNamespaces --}--> InContext --}--> Ready
//!                +--]--> Done
//! ```

use std::collections::BTreeSet;
use std::io::Read;
use std::mem;

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::CompactId;
use crate::error::{Result, StoreError};
use crate::parsing::json_events::{self, JsonEventSink};
use crate::parsing::normalizer::Normalizer;
use crate::storage::indexing::dictionary::Interner;

const ID_KEY: &str = "@id";
const CONTEXT_ID: &str = "@context";
const NAMESPACES_KEY: &str = "namespaces";
const DEFAULT_PREFIX_KEY: &str = "_";

/// An entity ready to be written: normalized JSON plus its outgoing
/// references as `(property id, object RID)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntity {
    pub rid: String,
    pub json: Value,
    pub refs: BTreeSet<(CompactId, String)>,
}

/// Destination of ingestion batches.
pub trait EntityBatchWriter {
    fn write_batch(&mut self, entities: Vec<PendingEntity>) -> Result<()>;
}

impl<F> EntityBatchWriter for F
where
    F: FnMut(Vec<PendingEntity>) -> Result<()>,
{
    fn write_batch(&mut self, entities: Vec<PendingEntity>) -> Result<()> {
        self(entities)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Start,
    Ready,
    InContext,
    InNamespaces,
    InEntity,
    InEntityField,
    Done,
}

#[derive(Debug, Clone)]
enum Field {
    Id,
    Property { token: String, id: CompactId },
}

#[derive(Debug)]
enum Frame {
    Object { map: Map<String, Value>, key: Option<Field> },
    Array(Vec<Value>),
}

pub struct EntityHandler<'a, W> {
    state: HandlerState,
    interner: &'a Interner,
    normalizer: Normalizer<'a>,
    writer: W,
    batch_size: usize,
    pending: Vec<PendingEntity>,
    count: usize,
    /// Array elements opened so far, the context element included.
    elements: usize,

    entity: Map<String, Value>,
    rid: Option<String>,
    refs: BTreeSet<(CompactId, String)>,
    field: Option<Field>,
    nested: Vec<Frame>,

    context_key: Option<String>,
    skip_depth: usize,
}

impl<'a, W: EntityBatchWriter> EntityHandler<'a, W> {
    pub fn new(interner: &'a Interner, default_prefix: &str, batch_size: usize, writer: W) -> Self {
        Self {
            state: HandlerState::Start,
            interner,
            normalizer: Normalizer::new(interner, default_prefix),
            writer,
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            count: 0,
            elements: 0,
            entity: Map::new(),
            rid: None,
            refs: BTreeSet::new(),
            field: None,
            nested: Vec::new(),
            context_key: None,
            skip_depth: 0,
        }
    }

    pub fn state(&self) -> HandlerState {
        self.state
    }

    /// Entities handed to the writer so far, pending ones included.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Run the handler over `reader` to the end of the input.
    /// Returns the number of entities written.
    pub fn run<R: Read>(mut self, reader: R) -> Result<usize> {
        json_events::drive(reader, &mut self)?;
        if self.state != HandlerState::Done {
            return Err(StoreError::parse("input ended before the entity array was closed"));
        }
        Ok(self.count)
    }

    fn unexpected(&self, event: &str) -> StoreError {
        StoreError::parse(format!("unexpected {} in state {:?}", event, self.state))
    }

    fn field_for(&mut self, key: &str) -> Result<Field> {
        if key == ID_KEY {
            return Ok(Field::Id);
        }
        let token = if key.starts_with('@') {
            key.to_string()
        } else {
            self.normalizer.normalize(key)?
        };
        let id = self.interner.assert_property(&token)?;
        Ok(Field::Property { token, id })
    }

    fn begin_entity(&mut self) {
        self.elements += 1;
        self.entity.clear();
        self.rid = None;
        self.refs.clear();
        self.field = None;
        self.nested.clear();
        self.state = HandlerState::InEntity;
    }

    fn finish_entity(&mut self) -> Result<()> {
        let rid = self.rid.take().ok_or_else(|| StoreError::parse("entity without @id"))?;
        self.pending.push(PendingEntity {
            rid,
            json: Value::Object(mem::take(&mut self.entity)),
            refs: mem::take(&mut self.refs),
        });
        self.count += 1;
        self.state = HandlerState::Ready;

        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = mem::take(&mut self.pending);
        debug!(entities = batch.len(), total = self.count, "committing ingestion batch");
        self.writer.write_batch(batch)
    }

    /// The context may only be the first element, and `@id` must be its
    /// first field.
    fn enter_context(&mut self) -> Result<()> {
        if self.elements != 1 || !self.entity.is_empty() {
            return Err(StoreError::parse(
                "@context must be the first element and start with its @id",
            ));
        }
        self.refs.clear();
        self.rid = None;
        self.context_key = None;
        self.skip_depth = 0;
        self.state = HandlerState::InContext;
        Ok(())
    }

    /// Only the `@id` field may not hold a structured value.
    fn check_structured_value(&self) -> Result<()> {
        if self.nested.is_empty() && matches!(self.field, Some(Field::Id)) {
            return Err(StoreError::parse("@id must be a string"));
        }
        Ok(())
    }

    /// References count for the entity only when no object sits between the
    /// value and the entity itself.
    fn at_entity_level(&self) -> bool {
        self.nested.iter().all(|frame| matches!(frame, Frame::Array(_)))
    }

    fn entity_string(&mut self, value: String) -> Result<()> {
        if !self.nested.is_empty() {
            let value = self.nested_string(value)?;
            return self.place(value);
        }

        match self.field.take() {
            Some(Field::Id) if value == CONTEXT_ID => self.enter_context(),
            Some(Field::Id) => {
                let rid = self.normalizer.normalize(&value)?;
                self.entity.insert(ID_KEY.to_string(), Value::String(rid.clone()));
                self.rid = Some(rid);
                self.state = HandlerState::InEntity;
                Ok(())
            }
            Some(field @ Field::Property { .. }) => {
                self.field = Some(field);
                let value = self.reference_or_plain(value)?;
                self.place(value)
            }
            None => Err(self.unexpected("string")),
        }
    }

    fn nested_string(&mut self, value: String) -> Result<Value> {
        if let Some(Frame::Object { key: Some(Field::Id), .. }) = self.nested.last() {
            return Ok(Value::String(self.normalizer.normalize(&value)?));
        }
        self.reference_or_plain(value)
    }

    fn reference_or_plain(&mut self, value: String) -> Result<Value> {
        match self.normalizer.normalize_reference(&value)? {
            Some(target) => {
                if self.at_entity_level() {
                    if let Some(Field::Property { id, .. }) = &self.field {
                        self.refs.insert((*id, target.clone()));
                    }
                }
                Ok(Value::String(format!("<{}>", target)))
            }
            None => Ok(Value::String(value)),
        }
    }

    /// Put a finished value into the innermost open container, or into the
    /// entity when no nested container is open.
    fn place(&mut self, value: Value) -> Result<()> {
        match self.nested.last_mut() {
            Some(Frame::Object { map, key }) => {
                let name = match key.take() {
                    Some(Field::Id) => ID_KEY.to_string(),
                    Some(Field::Property { token, .. }) => token,
                    None => return Err(StoreError::parse("object value without a key")),
                };
                map.insert(name, value);
            }
            Some(Frame::Array(items)) => items.push(value),
            None => {
                match self.field.take() {
                    Some(Field::Property { token, .. }) => {
                        self.entity.insert(token, value);
                    }
                    Some(Field::Id) => return Err(StoreError::parse("@id must be a string")),
                    None => return Err(self.unexpected("value")),
                }
                self.state = HandlerState::InEntity;
            }
        }
        Ok(())
    }

    fn namespace_value(&mut self, value: String) -> Result<()> {
        let short = self
            .context_key
            .take()
            .ok_or_else(|| StoreError::parse("namespace expansion without a prefix"))?;
        if short == DEFAULT_PREFIX_KEY {
            self.normalizer.set_default_prefix(value);
        } else {
            let id = self.normalizer.declare_prefix(&short, &value)?;
            debug!(prefix = %short, expansion = %value, namespace = id, "context prefix declared");
        }
        Ok(())
    }
}

impl<'a, W: EntityBatchWriter> JsonEventSink for EntityHandler<'a, W> {
    fn start_object(&mut self) -> Result<()> {
        match self.state {
            HandlerState::Ready => {
                self.begin_entity();
                Ok(())
            }
            HandlerState::InEntityField => {
                self.check_structured_value()?;
                self.nested.push(Frame::Object { map: Map::new(), key: None });
                Ok(())
            }
            HandlerState::InContext => {
                if self.skip_depth > 0 {
                    self.skip_depth += 1;
                } else if self.context_key.as_deref() == Some(NAMESPACES_KEY) {
                    self.context_key = None;
                    self.state = HandlerState::InNamespaces;
                } else {
                    self.skip_depth = 1;
                }
                Ok(())
            }
            HandlerState::Start => Err(StoreError::parse("expected a top-level JSON array")),
            HandlerState::InNamespaces => {
                Err(StoreError::parse("namespace expansions must be strings"))
            }
            HandlerState::InEntity | HandlerState::Done => Err(self.unexpected("object")),
        }
    }

    fn key(&mut self, key: String) -> Result<()> {
        match self.state {
            HandlerState::InEntity => {
                self.field = Some(self.field_for(&key)?);
                self.state = HandlerState::InEntityField;
                Ok(())
            }
            HandlerState::InEntityField => {
                let field = self.field_for(&key)?;
                match self.nested.last_mut() {
                    Some(Frame::Object { key: slot, .. }) => {
                        *slot = Some(field);
                        Ok(())
                    }
                    _ => Err(self.unexpected("key")),
                }
            }
            HandlerState::InContext => {
                if self.skip_depth == 0 {
                    self.context_key = Some(key);
                }
                Ok(())
            }
            HandlerState::InNamespaces => {
                self.context_key = Some(key);
                Ok(())
            }
            _ => Err(self.unexpected("key")),
        }
    }

    fn end_object(&mut self) -> Result<()> {
        match self.state {
            HandlerState::InEntity => self.finish_entity(),
            HandlerState::InEntityField => match self.nested.pop() {
                Some(Frame::Object { map, .. }) => self.place(Value::Object(map)),
                _ => Err(self.unexpected("end of object")),
            },
            HandlerState::InContext => {
                if self.skip_depth > 0 {
                    self.skip_depth -= 1;
                    if self.skip_depth == 0 {
                        self.context_key = None;
                    }
                } else {
                    debug!(default_prefix = %self.normalizer.default_prefix(), "ingestion context applied");
                    self.state = HandlerState::Ready;
                }
                Ok(())
            }
            HandlerState::InNamespaces => {
                self.context_key = None;
                self.state = HandlerState::InContext;
                Ok(())
            }
            _ => Err(self.unexpected("end of object")),
        }
    }

    fn start_array(&mut self) -> Result<()> {
        match self.state {
            HandlerState::Start => {
                self.state = HandlerState::Ready;
                Ok(())
            }
            HandlerState::InEntityField => {
                self.check_structured_value()?;
                self.nested.push(Frame::Array(Vec::new()));
                Ok(())
            }
            HandlerState::InContext => {
                self.skip_depth += 1;
                Ok(())
            }
            HandlerState::Ready => Err(StoreError::parse("expected an entity object")),
            _ => Err(self.unexpected("array")),
        }
    }

    fn end_array(&mut self) -> Result<()> {
        match self.state {
            HandlerState::Ready => {
                self.flush()?;
                self.state = HandlerState::Done;
                Ok(())
            }
            HandlerState::InEntityField => match self.nested.pop() {
                Some(Frame::Array(items)) => self.place(Value::Array(items)),
                _ => Err(self.unexpected("end of array")),
            },
            HandlerState::InContext if self.skip_depth > 0 => {
                self.skip_depth -= 1;
                if self.skip_depth == 0 {
                    self.context_key = None;
                }
                Ok(())
            }
            _ => Err(self.unexpected("end of array")),
        }
    }

    fn string(&mut self, value: String) -> Result<()> {
        match self.state {
            HandlerState::InEntityField => self.entity_string(value),
            HandlerState::InNamespaces => self.namespace_value(value),
            HandlerState::InContext => {
                if self.skip_depth == 0 {
                    self.context_key = None;
                }
                Ok(())
            }
            HandlerState::Ready => Err(StoreError::parse("expected an entity object")),
            HandlerState::Start => Err(StoreError::parse("expected a top-level JSON array")),
            _ => Err(self.unexpected("string")),
        }
    }

    fn scalar(&mut self, value: Value) -> Result<()> {
        match self.state {
            HandlerState::InEntityField => {
                if self.nested.is_empty() && matches!(self.field, Some(Field::Id)) {
                    return Err(StoreError::parse("@id must be a string"));
                }
                self.place(value)
            }
            HandlerState::InContext => {
                if self.skip_depth == 0 {
                    self.context_key = None;
                }
                Ok(())
            }
            HandlerState::InNamespaces => {
                Err(StoreError::parse("namespace expansions must be strings"))
            }
            HandlerState::Ready => Err(StoreError::parse("expected an entity object")),
            HandlerState::Start => Err(StoreError::parse("expected a top-level JSON array")),
            _ => Err(self.unexpected("value")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::column_families::column_family_descriptors;
    use rocksdb::{Cache, Options, DB};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn interner(dir: &TempDir) -> Interner {
        let cache = Cache::new_lru_cache(1024 * 1024);
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf_descriptors(&opts, dir.path(), column_family_descriptors(&cache)).unwrap();
        Interner::open(Arc::new(db)).unwrap()
    }

    fn ingest(interner: &Interner, input: &str, batch_size: usize) -> (Result<usize>, Vec<Vec<PendingEntity>>) {
        let mut batches = Vec::new();
        let writer = |batch: Vec<PendingEntity>| -> Result<()> {
            batches.push(batch);
            Ok(())
        };
        let result = EntityHandler::new(interner, "http://default.org/", batch_size, writer)
            .run(input.as_bytes());
        (result, batches)
    }

    #[test]
    fn test_context_and_entities() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);
        let input = r#"[
            {"@id":"@context","namespaces":{"_":"http://people.org/","foaf":"http://xmlns.com/foaf/0.1/"}},
            {"@id":"alice","foaf:name":"Alice","foaf:knows":"<bob>"},
            {"@id":"bob","foaf:name":"Bob"}
        ]"#;

        let (result, batches) = ingest(&interner, input, 100);
        assert_eq!(result.unwrap(), 2);
        assert_eq!(batches.len(), 1);

        let foaf = interner.namespace_id("http://xmlns.com/foaf/0.1/").unwrap();
        let people = interner.namespace_id("http://people.org/").unwrap();
        let alice = &batches[0][0];
        assert_eq!(alice.rid, format!("ns{}:alice", people));
        assert_eq!(
            alice.json,
            json!({
                "@id": format!("ns{}:alice", people),
                format!("ns{}:name", foaf): "Alice",
                format!("ns{}:knows", foaf): format!("<ns{}:bob>", people),
            })
        );

        let knows = interner.property_id(&format!("ns{}:knows", foaf)).unwrap();
        let expected: BTreeSet<_> = [(knows, format!("ns{}:bob", people))].into_iter().collect();
        assert_eq!(alice.refs, expected);
        assert!(batches[0][1].refs.is_empty());
    }

    #[test]
    fn test_refs_inside_top_level_arrays_are_recorded() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);
        let input = r#"[{"@id":"a","links":["<b>","<c>","text"],"nested":{"inner":"<d>"}}]"#;

        let (result, batches) = ingest(&interner, input, 100);
        assert_eq!(result.unwrap(), 1);

        let entity = &batches[0][0];
        let targets: Vec<_> = entity.refs.iter().map(|(_, rid)| rid.as_str()).collect();
        assert_eq!(targets, vec!["ns1:b", "ns1:c"]);
        assert_eq!(entity.json["ns1:nested"]["ns1:inner"], json!("<ns1:d>"));
        assert_eq!(entity.json["ns1:links"][2], json!("text"));
    }

    #[test]
    fn test_batches_commit_every_batch_size() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);
        let input = r#"[{"@id":"a"},{"@id":"b"},{"@id":"c"},{"@id":"d"},{"@id":"e"}]"#;

        let (result, batches) = ingest(&interner, input, 2);
        assert_eq!(result.unwrap(), 5);
        let sizes: Vec<_> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn test_entity_without_id_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);

        let (result, _) = ingest(&interner, r#"[{"name":"nobody"}]"#, 100);
        match result {
            Err(StoreError::Parse { message, offset, .. }) => {
                assert_eq!(message, "entity without @id");
                assert!(offset > 0);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_top_level_object_is_rejected() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);
        let (result, _) = ingest(&interner, r#"{"@id":"a"}"#, 100);
        assert!(matches!(result, Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_non_string_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);
        let (result, _) = ingest(&interner, r#"[{"@id":42}]"#, 100);
        assert!(matches!(result, Err(StoreError::Parse { .. })));

        let (result, _) = ingest(&interner, r#"[{"@id":["a"]}]"#, 100);
        assert!(matches!(result, Err(StoreError::Parse { .. })));
    }

    #[test]
    fn test_malformed_stream_keeps_committed_batches_only() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);
        let input = r#"[{"@id":"a"},{"@id":"b"},{"@id":"c"}, {"@id": ]"#;

        let (result, batches) = ingest(&interner, input, 2);
        assert!(matches!(result, Err(StoreError::Parse { .. })));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[test]
    fn test_unknown_context_fields_are_skipped() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);
        let input = r#"[
            {"@id":"@context","version":[1,{"x":2}],"namespaces":{"ex":"http://ex.org/"},"note":"hi"},
            {"@id":"ex:thing"}
        ]"#;

        let (result, batches) = ingest(&interner, input, 100);
        assert_eq!(result.unwrap(), 1);
        let ex = interner.namespace_id("http://ex.org/").unwrap();
        assert_eq!(batches[0][0].rid, format!("ns{}:thing", ex));
    }

    #[test]
    fn test_context_only_as_first_element() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);

        let late = r#"[{"@id":"a"},{"@id":"@context","namespaces":{"ex":"http://ex.org/"}}]"#;
        let (result, batches) = ingest(&interner, late, 100);
        match result {
            Err(StoreError::Parse { message, .. }) => assert!(message.contains("@context")),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(batches.is_empty());

        let (result, _) = ingest(&interner, r#"[{"name":"x","@id":"@context"}]"#, 100);
        assert!(matches!(result, Err(StoreError::Parse { .. })));
        assert_eq!(interner.namespace_id("http://ex.org/"), None);
    }

    #[test]
    fn test_empty_array() {
        let dir = TempDir::new().unwrap();
        let interner = interner(&dir);
        let (result, batches) = ingest(&interner, "[]", 100);
        assert_eq!(result.unwrap(), 0);
        assert!(batches.is_empty());
    }
}
