use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::{entity_key, split_rid, RefKey};
use crate::error::{Result, StoreError};
use crate::storage::column_families::cf_names;
use crate::storage::dataset::Dataset;
use crate::storage::indexing::dictionary::column_family;
use crate::storage::store::Store;

/// `{"@id": rid}`, returned for entities no dataset holds.
pub fn stub_entity(rid: &str) -> Value {
    let mut stub = Map::new();
    stub.insert("@id".to_string(), Value::String(rid.to_string()));
    Value::Object(stub)
}

/// Merge `source` into `target`. New fields are copied, equal values are left
/// alone and conflicting values become an array of the distinct values.
pub fn merge_entity(target: &mut Map<String, Value>, source: Map<String, Value>) {
    for (key, incoming) in source {
        let Some(existing) = target.get_mut(&key) else {
            target.insert(key, incoming);
            continue;
        };
        if *existing == incoming {
            continue;
        }

        if !existing.is_array() {
            let scalar = existing.take();
            *existing = Value::Array(vec![scalar]);
        }
        let Value::Array(values) = existing else { continue };
        let incoming = match incoming {
            Value::Array(items) => items,
            other => vec![other],
        };
        for value in incoming {
            if !values.contains(&value) {
                values.push(value);
            }
        }
    }
}

impl Store {
    /// Datasets a read spans: all of them (by name) when `names` is empty,
    /// otherwise the named ones that exist.
    fn read_datasets(&self, names: &[String]) -> Vec<Arc<Dataset>> {
        if names.is_empty() {
            self.datasets()
        } else {
            names.iter().filter_map(|name| self.get_dataset(name)).collect()
        }
    }

    fn read_entity(&self, dataset: &Dataset, rid: &str) -> Result<Option<Value>> {
        let data_cf = column_family(&self.db, cf_names::DATA)?;
        match self.db.get_cf(data_cf, entity_key(dataset.id(), rid))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Entity `rid` as seen through `datasets`, merged left to right.
    pub fn get_entity(&self, rid: &str, datasets: &[String]) -> Result<Value> {
        if let [name] = datasets {
            return match self.get_dataset(name) {
                Some(dataset) => Ok(self.read_entity(&dataset, rid)?.unwrap_or_else(|| stub_entity(rid))),
                None => Ok(stub_entity(rid)),
            };
        }

        let mut merged: Option<Map<String, Value>> = None;
        for dataset in self.read_datasets(datasets) {
            let Some(entity) = self.read_entity(&dataset, rid)? else { continue };
            let Value::Object(fields) = entity else {
                return Err(StoreError::DataIntegrity(format!(
                    "entity '{}' in dataset '{}' is not an object",
                    rid,
                    dataset.name()
                )));
            };
            match merged.as_mut() {
                Some(target) => merge_entity(target, fields),
                None => merged = Some(fields),
            }
        }
        Ok(merged.map_or_else(|| stub_entity(rid), Value::Object))
    }

    /// Entities referenced by `subject` (or referencing it when `inverse`),
    /// optionally restricted to one property.
    pub fn get_related(
        &self,
        subject: &str,
        property: Option<&str>,
        inverse: bool,
        skip: usize,
        take: Option<usize>,
        datasets: &[String],
    ) -> Result<Vec<Value>> {
        let property_id = match property {
            Some(raw) => match self.property_token(raw).and_then(|t| self.interner.property_id(&t)) {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let cf = column_family(&self.db, if inverse { cf_names::INREFS } else { cf_names::OUTREFS })?;
        let mut seen = HashSet::new();
        let mut related = Vec::new();

        for dataset in self.read_datasets(datasets) {
            let prefix = match property_id {
                Some(id) => RefKey::from_property_prefix(dataset.id(), subject, id),
                None => RefKey::from_prefix(dataset.id(), subject),
            };
            let mut iter = self.db.raw_iterator_cf(cf);
            iter.seek(&prefix);
            while iter.valid() {
                let Some(key) = iter.key() else { break };
                if !key.starts_with(&prefix) {
                    break;
                }
                let (_, ref_key) = RefKey::decode(key).ok_or_else(|| {
                    StoreError::DataIntegrity(format!("corrupt reference key under '{}'", subject))
                })?;
                if seen.insert(ref_key.to.clone()) {
                    related.push(ref_key.to);
                }
                iter.next();
            }
            iter.status()?;
        }

        related
            .into_iter()
            .skip(skip)
            .take(take.unwrap_or(usize::MAX))
            .map(|rid| self.get_entity(&rid, datasets))
            .collect()
    }

    /// Property token for a caller-supplied property name, without interning.
    fn property_token(&self, raw: &str) -> Option<String> {
        if raw.starts_with('@') || split_rid(raw).is_some() {
            return Some(raw.to_string());
        }
        self.resource_id(raw).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_merge_copies_new_fields() {
        let mut target = object(json!({"@id": "ns1:a", "name": "A"}));
        merge_entity(&mut target, object(json!({"@id": "ns1:a", "age": 3})));
        assert_eq!(Value::Object(target), json!({"@id": "ns1:a", "name": "A", "age": 3}));
    }

    #[test]
    fn test_merge_conflict_becomes_distinct_array() {
        let mut target = object(json!({"@id": "ns1:a", "name": "A"}));
        merge_entity(&mut target, object(json!({"@id": "ns1:a", "name": "B"})));
        assert_eq!(target["name"], json!(["A", "B"]));

        merge_entity(&mut target, object(json!({"name": "A"})));
        assert_eq!(target["name"], json!(["A", "B"]));

        merge_entity(&mut target, object(json!({"name": ["B", "C"]})));
        assert_eq!(target["name"], json!(["A", "B", "C"]));
    }

    #[test]
    fn test_merge_into_existing_array() {
        let mut target = object(json!({"tags": ["x"]}));
        merge_entity(&mut target, object(json!({"tags": "y"})));
        assert_eq!(target["tags"], json!(["x", "y"]));
    }

    #[test]
    fn test_stub_entity() {
        assert_eq!(stub_entity("ns2:x"), json!({"@id": "ns2:x"}));
    }
}
