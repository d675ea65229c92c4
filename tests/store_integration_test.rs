//! Store Integration Tests
//!
//! End-to-end behavior of ingestion, the reference indexes, merge on read,
//! the change feed and dataset lifecycle, driven through the public `Store` API.

use serde_json::{json, Value};
use std::collections::BTreeSet;
use tempfile::TempDir;
use webofdata::{Store, StoreConfig, StoreError};

fn open(dir: &TempDir) -> Store {
    Store::open(StoreConfig::with_path(dir.path())).unwrap()
}

fn ids(items: &[Value]) -> Vec<String> {
    items.iter().map(|e| e["@id"].as_str().unwrap().to_string()).collect()
}

fn people() -> Vec<String> {
    vec!["people".to_string()]
}

#[test]
fn test_expanded_uri_is_normalized_to_curie() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.store_entities("people", br#"[{"@id":"http://x.org/a#b","http://x.org/a#name":"B"}]"#).unwrap();

    let rid = store.resource_id("http://x.org/a#b").unwrap();
    assert_eq!(rid, "ns1:b");
    assert_eq!(
        store.get_entity(&rid, &people()).unwrap(),
        json!({"@id": "ns1:b", "ns1:name": "B"})
    );
    assert_eq!(store.expand_rid("ns1:b").unwrap(), "http://x.org/a#b");
}

#[test]
fn test_context_declares_prefixes() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let data = br#"[
        {"@id":"@context","namespaces":{"_":"http://example.org/things/","foaf":"http://xmlns.com/foaf/0.1/"}},
        {"@id":"alice","foaf:knows":"<bob>"},
        {"@id":"bob"}
    ]"#;
    assert_eq!(store.store_entities("people", data).unwrap(), 2);

    let alice = store.resource_id("http://example.org/things/alice").unwrap();
    let entity = store.get_entity(&alice, &people()).unwrap();
    let knows = store.resource_id("http://xmlns.com/foaf/0.1/knows").unwrap();
    let bob = store.resource_id("http://example.org/things/bob").unwrap();
    assert_eq!(entity[knows.as_str()], json!(format!("<{}>", bob)));
}

#[test]
fn test_reordered_rewrite_is_not_a_change() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.store_entities("people", br#"[{"@id":"a","x":1,"y":[1,2]}]"#).unwrap();
    store.store_entities("people", br#"[{"@id":"a","y":[1,2],"x":1}]"#).unwrap();

    assert_eq!(store.get_dataset("people").unwrap().last_sequence(), 1);
    let page = store.scan_changes("people", 0, None, None).unwrap();
    assert_eq!(page.items.len(), 1);
}

#[test]
fn test_reference_diff_updates_both_directions() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.store_entities("people", br#"[{"@id":"x","knows":["<a>","<b>"]}]"#).unwrap();
    store.store_entities("people", br#"[{"@id":"x","knows":["<b>","<c>"]}]"#).unwrap();

    let outgoing = store.get_related("ns1:x", None, false, 0, None, &people()).unwrap();
    assert_eq!(ids(&outgoing), vec!["ns1:b", "ns1:c"]);

    let by_property = store.get_related("ns1:x", Some("knows"), false, 0, None, &people()).unwrap();
    assert_eq!(ids(&by_property), vec!["ns1:b", "ns1:c"]);
    assert!(store.get_related("ns1:x", Some("likes"), false, 0, None, &people()).unwrap().is_empty());

    assert!(store.get_related("ns1:a", None, true, 0, None, &people()).unwrap().is_empty());
    let incoming = store.get_related("ns1:c", None, true, 0, None, &people()).unwrap();
    assert_eq!(ids(&incoming), vec!["ns1:x"]);

    let paged = store.get_related("ns1:x", None, false, 1, Some(1), &people()).unwrap();
    assert_eq!(ids(&paged), vec!["ns1:c"]);
}

#[test]
fn test_merge_across_datasets() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.store_entities("one", br#"[{"@id":"a","name":"A","age":3}]"#).unwrap();
    store.store_entities("two", br#"[{"@id":"a","name":"B"}]"#).unwrap();

    let merged = store.get_entity("ns1:a", &[]).unwrap();
    assert_eq!(merged["ns1:name"], json!(["A", "B"]));
    assert_eq!(merged["ns1:age"], json!(3));

    let single = store.get_entity("ns1:a", &["two".to_string()]).unwrap();
    assert_eq!(single, json!({"@id": "ns1:a", "ns1:name": "B"}));

    assert_eq!(store.get_entity("ns1:zzz", &[]).unwrap(), json!({"@id": "ns1:zzz"}));
}

#[test]
fn test_change_feed_resumes_one_at_a_time() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.store_entities("people", br#"[{"@id":"a"},{"@id":"b"},{"@id":"c"}]"#).unwrap();

    let mut token: Option<String> = None;
    let mut seen = Vec::new();
    for _ in 0..3 {
        let page = store.scan_changes_from_token("people", token.as_deref(), Some(1)).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(!page.full_resync);
        seen.extend(ids(&page.items));
        token = Some(page.next_token);
    }
    assert_eq!(seen, vec!["ns1:a", "ns1:b", "ns1:c"]);

    let page = store.scan_changes_from_token("people", token.as_deref(), Some(1)).unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.last_sequence, 3);
    assert_eq!(Some(page.next_token), token);
}

#[test]
fn test_foreign_generation_token_triggers_full_resync() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.store_entities("people", br#"[{"@id":"a"},{"@id":"b"}]"#).unwrap();

    let page = store.scan_changes_from_token("people", Some("-1_2_999"), None).unwrap();
    assert!(page.full_resync);
    assert_eq!(ids(&page.items), vec!["ns1:a", "ns1:b"]);

    assert!(matches!(
        store.scan_changes_from_token("people", Some("garbage"), None),
        Err(StoreError::BadRequest(_))
    ));
}

#[test]
fn test_entity_listing_pages() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.store_entities("people", br#"[{"@id":"c"},{"@id":"a"},{"@id":"b"}]"#).unwrap();

    let first = store.scan_entities_from_token("people", None, Some(2)).unwrap();
    assert_eq!(ids(&first.items), vec!["ns1:a", "ns1:b"]);
    let token = first.next_token.unwrap();

    let second = store.scan_entities_from_token("people", Some(&token), Some(2)).unwrap();
    assert_eq!(ids(&second.items), vec!["ns1:c"]);
    assert_eq!(second.next_token, None);
}

#[test]
fn test_shards_partition_a_dataset() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let entities: Vec<Value> = (0..40).map(|i| json!({"@id": format!("e{}", i)})).collect();
    store.store_entities("people", &serde_json::to_vec(&entities).unwrap()).unwrap();

    let shard_count = store.config().shard_count;
    let mut from_listing = BTreeSet::new();
    for token in store.shard_tokens("people", shard_count).unwrap() {
        for id in ids(&store.scan_entities_from_token("people", Some(&token), None).unwrap().items) {
            assert!(from_listing.insert(id), "entity listed in two shards");
        }
    }
    assert_eq!(from_listing.len(), 40);

    let mut from_changes = BTreeSet::new();
    for token in store.change_shard_tokens("people", shard_count).unwrap() {
        for id in ids(&store.scan_changes_from_token("people", Some(&token), None).unwrap().items) {
            assert!(from_changes.insert(id), "change emitted in two shards");
        }
    }
    assert_eq!(from_changes, from_listing);

    assert!(matches!(
        store.shard_tokens("people", shard_count + 1),
        Err(StoreError::BadRequest(_))
    ));
    assert!(matches!(
        store.scan_entities("people", None, None, Some(shard_count)),
        Err(StoreError::BadRequest(_))
    ));
}

#[test]
fn test_deleted_dataset_reads_as_stub() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store.store_entities("people", br#"[{"@id":"a","knows":"<b>"},{"@id":"b"}]"#).unwrap();
    store.store_entities("places", br#"[{"@id":"p"}]"#).unwrap();

    store.delete_dataset("people").unwrap();

    assert!(store.get_dataset("people").is_none());
    assert_eq!(store.get_entity("ns1:a", &people()).unwrap(), json!({"@id": "ns1:a"}));
    assert!(store.get_related("ns1:b", None, true, 0, None, &[]).unwrap().is_empty());
    assert!(matches!(store.scan_changes("people", 0, None, None), Err(StoreError::NotFound(_))));
    assert!(matches!(store.delete_dataset("people"), Err(StoreError::NotFound(_))));

    store.assert_dataset("people").unwrap();
    assert!(store.scan_entities("people", None, None, None).unwrap().items.is_empty());
    assert_eq!(store.scan_entities("places", None, None, None).unwrap().items.len(), 1);
}

#[test]
fn test_sequence_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir);
        store.store_entities("people", br#"[{"@id":"a"},{"@id":"b"}]"#).unwrap();
    }

    let store = open(&dir);
    assert_eq!(store.get_dataset("people").unwrap().last_sequence(), 2);
    store.store_entities("people", br#"[{"@id":"c"}]"#).unwrap();

    let page = store.scan_changes("people", 2, None, None).unwrap();
    assert_eq!(ids(&page.items), vec!["ns1:c"]);
    assert_eq!(page.last_sequence, 3);
}

#[test]
fn test_parse_error_keeps_committed_batches() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(StoreConfig { batch_size: 2, ..StoreConfig::with_path(dir.path()) }).unwrap();

    let err = store
        .store_entities("people", br#"[{"@id":"a"},{"@id":"b"},{"@id":"c"},{"name":"no id"}]"#)
        .unwrap_err();
    assert!(matches!(err, StoreError::Parse { .. }));

    let listed = store.scan_entities("people", None, None, None).unwrap();
    assert_eq!(ids(&listed.items), vec!["ns1:a", "ns1:b"]);
}
