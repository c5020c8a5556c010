#![forbid(unsafe_code)]

use hubsync_core::{EventAction, ResourceRecord, WatchEvent};
use hubsync_store::kinds::{BindingSpec, KindSpec};
use hubsync_store::{Engine, Registry};

fn record(gv: &str, kind: &str, ns: Option<&str>, name: &str) -> ResourceRecord {
    let mut meta = serde_json::json!({ "name": name });
    if let Some(ns) = ns {
        meta["namespace"] = serde_json::Value::String(ns.to_string());
    }
    ResourceRecord(serde_json::json!({
        "apiVersion": gv,
        "kind": kind,
        "metadata": meta,
    }))
}

fn added(rec: ResourceRecord) -> WatchEvent {
    WatchEvent::new(EventAction::Added, rec)
}

fn modified(rec: ResourceRecord) -> WatchEvent {
    WatchEvent::new(EventAction::Modified, rec)
}

fn deleted(rec: ResourceRecord) -> WatchEvent {
    WatchEvent::new(EventAction::Deleted, rec)
}

// Small two-kind table so tests don't depend on the full console table.
const TEST_KINDS: &[KindSpec] = &[
    KindSpec { group_version: "test.io/v1", kind: "Alpha", binding: BindingSpec::Direct },
    KindSpec { group_version: "test.io/v1", kind: "Beta", binding: BindingSpec::Direct },
    KindSpec { group_version: "test.io/v1", kind: "Grouped", binding: BindingSpec::ByNamespace },
];

fn test_engine() -> Engine {
    Engine::new(Registry::with_kinds(TEST_KINDS))
}

#[test]
fn upsert_is_idempotent() {
    let engine = test_engine();
    let rec = record("test.io/v1", "Alpha", Some("ns"), "a");
    engine.queue().push(added(rec.clone()));
    engine.queue().push(added(rec.clone()));
    engine.drain();

    let reader = engine.reader("test.io/v1", "Alpha").unwrap();
    let items = reader.current();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0], rec);
}

#[test]
fn delete_after_add_removes_the_record() {
    let engine = test_engine();
    let rec = record("test.io/v1", "Alpha", Some("ns"), "a");
    engine.queue().push(added(rec.clone()));
    engine.queue().push(deleted(rec));
    engine.drain();

    let reader = engine.reader("test.io/v1", "Alpha").unwrap();
    assert!(reader.current().is_empty());
}

#[test]
fn delete_before_add_is_a_noop_then_add_lands() {
    let engine = test_engine();
    let rec = record("test.io/v1", "Alpha", Some("ns"), "a");
    engine.queue().push(deleted(rec.clone()));
    engine.queue().push(added(rec.clone()));
    engine.drain();

    let reader = engine.reader("test.io/v1", "Alpha").unwrap();
    let items = reader.current();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0], rec);
}

#[test]
fn collection_always_mirrors_identity_cache() {
    let engine = test_engine();
    let reader = engine.reader("test.io/v1", "Alpha").unwrap();

    // Several drains with overlapping identities; after each one the
    // collection must hold exactly one record per surviving identity.
    engine.queue().push(added(record("test.io/v1", "Alpha", Some("ns1"), "a")));
    engine.queue().push(added(record("test.io/v1", "Alpha", Some("ns2"), "a")));
    engine.queue().push(added(record("test.io/v1", "Alpha", Some("ns1"), "b")));
    engine.drain();

    engine.queue().push(modified(record("test.io/v1", "Alpha", Some("ns1"), "a")));
    engine.queue().push(deleted(record("test.io/v1", "Alpha", Some("ns1"), "b")));
    engine.drain();

    let items = reader.current();
    let keys: Vec<String> = items.iter().map(|r| r.identity().unwrap().key()).collect();
    let mut deduped = keys.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(keys.len(), deduped.len(), "collection holds duplicate identities");
    assert_eq!(keys, vec!["ns1/a".to_string(), "ns2/a".to_string()]);
}

#[test]
fn collection_is_sorted_by_identity_key() {
    let engine = test_engine();
    engine.queue().push(added(record("test.io/v1", "Alpha", Some("zeta"), "z")));
    engine.queue().push(added(record("test.io/v1", "Alpha", Some("alpha"), "a")));
    engine.queue().push(added(record("test.io/v1", "Alpha", Some("mid"), "m")));
    engine.drain();

    let reader = engine.reader("test.io/v1", "Alpha").unwrap();
    let items = reader.current();
    let names: Vec<&str> = items.iter().map(|r| r.name().unwrap()).collect();
    assert_eq!(names, vec!["a", "m", "z"]);
}

#[test]
fn unknown_kind_is_dropped_without_touching_partitions() {
    let engine = test_engine();
    engine.queue().push(added(record("test.io/v1", "Alpha", Some("ns"), "a")));
    engine.drain();

    let reader = engine.reader("test.io/v1", "Alpha").unwrap();
    let mut version = reader.subscribe();
    version.mark_unchanged();

    engine.queue().push(added(record("untracked.io/v1", "Mystery", Some("ns"), "x")));
    engine.drain();

    assert_eq!(reader.current().len(), 1);
    assert!(!version.has_changed().unwrap(), "untracked kind republished a partition");
}

#[test]
fn empty_drain_is_a_noop() {
    let engine = test_engine();
    let reader = engine.reader("test.io/v1", "Alpha").unwrap();
    let mut version = reader.subscribe();
    version.mark_unchanged();

    engine.drain();
    engine.drain();

    assert!(!version.has_changed().unwrap(), "empty drain invoked a setter");
    assert!(reader.current().is_empty());
}

#[test]
fn one_drain_groups_interleaved_kinds() {
    let engine = test_engine();
    let x = record("test.io/v1", "Alpha", Some("ns"), "x");
    let y = record("test.io/v1", "Beta", Some("ns"), "y");
    engine.queue().push(added(x.clone()));
    engine.queue().push(added(y.clone()));
    engine.queue().push(deleted(x));
    engine.drain();

    assert!(engine.reader("test.io/v1", "Alpha").unwrap().current().is_empty());
    let beta = engine.reader("test.io/v1", "Beta").unwrap().current();
    assert_eq!(beta.len(), 1);
    assert_eq!(beta[0], y);
}

#[test]
fn cleared_queue_events_are_never_applied() {
    let engine = test_engine();
    engine.queue().push(added(record("test.io/v1", "Alpha", Some("ns"), "a")));
    engine.queue().push(added(record("test.io/v1", "Beta", Some("ns"), "b")));
    assert_eq!(engine.queue().len(), 2);

    // START from the stream: the prior generation is discarded wholesale.
    engine.queue().clear();
    assert!(engine.queue().is_empty());
    engine.drain();

    assert!(engine.reader("test.io/v1", "Alpha").unwrap().current().is_empty());
    assert!(engine.reader("test.io/v1", "Beta").unwrap().current().is_empty());
}

#[test]
fn grouped_binding_buckets_by_namespace() {
    let engine = test_engine();
    engine.queue().push(added(record("test.io/v1", "Grouped", Some("cluster-1"), "info")));
    engine.queue().push(added(record("test.io/v1", "Grouped", Some("cluster-2"), "info")));
    // duplicate identity within a group collapses to one record
    engine.queue().push(modified(record("test.io/v1", "Grouped", Some("cluster-1"), "info")));
    engine.queue().push(added(record("test.io/v1", "Grouped", Some("cluster-2"), "extra")));
    engine.drain();

    let reader = engine.grouped_reader("test.io/v1", "Grouped").unwrap();
    let groups = reader.current();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups["cluster-1"].len(), 1);
    assert_eq!(groups["cluster-2"].len(), 2);

    // direct reader must not alias a grouped partition
    assert!(engine.reader("test.io/v1", "Grouped").is_none());
}

#[test]
fn modified_event_replaces_the_record_wholesale() {
    let engine = Engine::new(Registry::build());
    let mut v1 = record("v1", "Secret", Some("ns1"), "s1");
    v1.0["data"] = serde_json::json!({ "field": "before" });
    let mut v2 = record("v1", "Secret", Some("ns1"), "s1");
    v2.0["data"] = serde_json::json!({ "field": "after" });

    engine.queue().push(added(v1));
    engine.queue().push(modified(v2));
    engine.drain();

    let reader = engine.reader("v1", "Secret").unwrap();
    let items = reader.current();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].0["data"]["field"], "after");
}

#[test]
fn rebuilt_registry_starts_from_fresh_caches() {
    let first = Engine::new(Registry::with_kinds(TEST_KINDS));
    first.queue().push(added(record("test.io/v1", "Alpha", Some("ns"), "a")));
    first.drain();
    assert_eq!(first.reader("test.io/v1", "Alpha").unwrap().current().len(), 1);

    // remount: a new session must not see the previous session's records
    let second = Engine::new(Registry::with_kinds(TEST_KINDS));
    assert!(second.reader("test.io/v1", "Alpha").unwrap().current().is_empty());
    // and the first session's collections are untouched by the rebuild
    assert_eq!(first.reader("test.io/v1", "Alpha").unwrap().current().len(), 1);
}
