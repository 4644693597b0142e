//! # Validation Tier Tests (T0-T4)
//!
//! End-to-end behavior of one audit store, driven through the public API.
//!
//! ## Tiers
//! - T0: Codec and Identity
//! - T1: Entity Graph
//! - T2: Pipeline Stages and History
//! - T3: Shared Coordination Primitives
//! - T4: Lifecycle and Remote Calls

use auditdb_core::{
    AddOutcome, AuditError, AuditStore, DataKey, Entity, Identity, Properties, Record,
    SharedValue, decode, encode,
};
use std::collections::BTreeSet;

fn id(s: &str) -> Identity {
    Identity::new(s).expect("valid identity")
}

fn store(name: &str) -> AuditStore {
    AuditStore::in_memory(name).expect("in-memory store")
}

fn url(s: &str) -> Entity {
    Entity::new(id(s), "resource/url", Properties::new().with("url", s)).expect("entity")
}

fn links_of(store: &AuditStore, identity: &Identity) -> BTreeSet<Identity> {
    match store
        .get::<Properties>(&DataKey::Plain(identity.clone()))
        .expect("get")
    {
        Some(Record::Entity(e)) => e.links,
        other => unreachable!("expected an entity, got {:?}", other),
    }
}

// =============================================================================
// TIER T0: CODEC AND IDENTITY
// =============================================================================

mod t0_codec_identity {
    use super::*;

    /// T0.1: Decoding an encoded value yields the value.
    #[test]
    fn round_trip() {
        let value = SharedValue::List(vec![
            SharedValue::Null,
            SharedValue::from("text"),
            SharedValue::Int(-7),
            SharedValue::Bytes(vec![0, 1, 2]),
        ]);
        let blob = encode(&value).expect("encode");
        assert_eq!(decode::<SharedValue>(&blob).expect("decode"), value);
    }

    /// T0.2: Identities reject the relationship separator.
    #[test]
    fn dash_in_identity_rejected() {
        assert!(matches!(Identity::new("a-b"), Err(AuditError::Validation(_))));
    }

    /// T0.3: Relationship keys are canonical regardless of order.
    #[test]
    fn edge_keys_canonical() {
        assert_eq!(DataKey::edge(id("b"), id("a")), DataKey::edge(id("a"), id("b")));
        assert_eq!(DataKey::edge(id("b"), id("a")).to_string(), "a-b");
    }
}

// =============================================================================
// TIER T1: ENTITY GRAPH
// =============================================================================

mod t1_entity_graph {
    use super::*;

    /// T1.1: Adding the same identity twice merges instead of duplicating.
    #[test]
    fn idempotent_add_unions_links() {
        let s = store("t1-idempotent");
        assert_eq!(s.add(url("a").with_link(id("b"))).expect("add"), AddOutcome::Inserted);
        assert_eq!(s.add(url("a").with_link(id("c"))).expect("add"), AddOutcome::Merged);

        assert_eq!(s.count(None, None).expect("count"), 1);
        assert_eq!(links_of(&s, &id("a")), BTreeSet::from([id("b"), id("c")]));
    }

    /// T1.2: Links declared from both sides are stored once.
    #[test]
    fn canonical_edges() {
        let s = store("t1-canonical");
        s.add(url("a").with_link(id("b"))).expect("add a");
        s.add(url("b").with_link(id("a"))).expect("add b");

        assert_eq!(links_of(&s, &id("a")), BTreeSet::from([id("b")]));
        assert_eq!(links_of(&s, &id("b")), BTreeSet::from([id("a")]));
        let snapshot = s.snapshot().expect("snapshot");
        assert_eq!(snapshot.links.len(), 1);
    }

    /// T1.3: Removing an entity removes its edges but not its neighbors.
    #[test]
    fn cascading_remove() {
        let s = store("t1-cascade");
        s.add(url("a").with_link(id("b"))).expect("add a");
        s.add(url("b")).expect("add b");

        assert!(s.remove(&DataKey::Plain(id("a"))).expect("remove"));
        assert!(!s.has(&DataKey::Plain(id("a"))).expect("has"));
        assert!(!s.has(&DataKey::edge(id("a"), id("b"))).expect("has edge"));
        assert!(s.has(&DataKey::Plain(id("b"))).expect("has b"));
        assert!(links_of(&s, &id("b")).is_empty());
    }

    /// T1.4: A relationship key resolves to both endpoints.
    #[test]
    fn relationship_view() {
        let s = store("t1-relationship");
        s.add(url("a").with_link(id("b"))).expect("add a");
        assert!(
            s.get::<Properties>(&DataKey::edge(id("a"), id("b")))
                .expect("get")
                .is_none(),
            "dangling endpoint resolves to nothing"
        );
        assert!(!s.has(&DataKey::edge(id("a"), id("b"))).expect("has dangling edge"));

        s.add(url("b")).expect("add b");
        assert!(s.has(&DataKey::edge(id("b"), id("a"))).expect("has edge"));
        match s.get::<Properties>(&DataKey::edge(id("b"), id("a"))).expect("get") {
            Some(Record::Relationship(rel)) => {
                assert_eq!(rel.left.identity, id("a"));
                assert_eq!(rel.right.identity, id("b"));
            }
            other => unreachable!("expected a relationship, got {:?}", other),
        }

        assert!(s.remove(&DataKey::edge(id("a"), id("b"))).expect("remove edge"));
        assert!(s.has(&DataKey::Plain(id("a"))).expect("a survives"));
        assert!(links_of(&s, &id("a")).is_empty());
    }

    /// T1.5: Subtype filters must agree with the family.
    #[test]
    fn subtype_family_mismatch_rejected() {
        let s = store("t1-filters");
        s.add(url("a")).expect("add");
        assert!(matches!(
            s.count(Some(auditdb_core::DataType::Vulnerability), Some("resource/url")),
            Err(AuditError::Validation(_))
        ));
        assert_eq!(s.count(None, Some("resource/url")).expect("count"), 1);
        assert_eq!(s.count(None, Some("resource/domain")).expect("count"), 0);
    }
}

// =============================================================================
// TIER T2: PIPELINE STAGES AND HISTORY
// =============================================================================

mod t2_stages_history {
    use super::*;

    /// T2.1: Stage marks never move backwards.
    #[test]
    fn monotonic_stage() {
        let s = store("t2-monotonic");
        s.add(url("a")).expect("add");
        let key = DataKey::Plain(id("a"));
        s.mark_stage_finished(&key, 3).expect("mark 3");
        s.mark_stage_finished(&key, 1).expect("mark 1");
        assert_eq!(s.stage_of(&key).expect("stage"), 3);
    }

    /// T2.2: Pending work lists every entity below the stage.
    #[test]
    fn pending_below() {
        let s = store("t2-pending");
        for name in ["s0", "s1", "s2"] {
            s.add(url(name)).expect("add");
        }
        s.mark_stage_finished(&DataKey::Plain(id("s1")), 1).expect("mark");
        s.mark_stage_finished(&DataKey::Plain(id("s2")), 2).expect("mark");

        assert_eq!(
            s.pending_below(2).expect("pending"),
            BTreeSet::from([DataKey::Plain(id("s0")), DataKey::Plain(id("s1"))])
        );

        s.clear_all_stage_marks().expect("clear");
        assert_eq!(s.pending_below(1).expect("pending").len(), 3);
    }

    /// T2.3: Removing an entity forgets its history.
    #[test]
    fn remove_clears_history() {
        let s = store("t2-history");
        s.add(url("a")).expect("add");
        s.mark_plugin_finished(&id("a"), "spider").expect("mark");
        s.remove(&DataKey::Plain(id("a"))).expect("remove");
        assert!(s.past_plugins(&id("a")).expect("history").is_empty());
    }
}

// =============================================================================
// TIER T3: SHARED COORDINATION PRIMITIVES
// =============================================================================

mod t3_shared {
    use super::*;

    /// T3.1: Heap pops partition the heap.
    #[test]
    fn heap_scenario() {
        let s = store("t3-heap");
        s.heap_add("fake_set", &["x", "y", "z"]).expect("add");

        let first: Vec<String> = s.heap_pop("fake_set", Some(2)).expect("pop 2");
        assert_eq!(first.len(), 2);
        assert!(!s.heap_has_any("fake_set", &first).expect("has"));

        let second: Vec<String> = s.heap_pop("fake_set", Some(10)).expect("pop 10");
        assert_eq!(second.len(), 1);

        let all: BTreeSet<String> = first.into_iter().chain(second).collect();
        assert_eq!(
            all,
            BTreeSet::from(["x".to_string(), "y".to_string(), "z".to_string()])
        );

        let third: Vec<String> = s.heap_pop("fake_set", Some(10)).expect("pop empty");
        assert!(third.is_empty());
    }

    /// T3.2: A batch read fails when any key is missing.
    #[test]
    fn map_batch_failure() {
        let s = store("t3-map");
        s.map_put("m", &[("a", 1i64)]).expect("put");
        let result = s.map_get::<&str, i64>("m", &["a", "b"]);
        assert!(matches!(result, Err(AuditError::NotFound(_))));

        let popped = s.map_pop::<&str, i64>("m", &["a", "b"]);
        assert!(matches!(popped, Err(AuditError::NotFound(_))));
        assert!(s.map_has_all("m", &["a"]).expect("a kept"));
    }

    /// T3.3: Swap returns the previous values.
    #[test]
    fn swap_semantics() {
        let s = store("t3-swap");
        s.map_put("m", &[("k", "old".to_string())]).expect("put");
        let previous = s
            .map_swap("m", &[("k", "new".to_string()), ("fresh", "v".to_string())])
            .expect("swap");
        assert_eq!(previous, vec![Some("old".to_string()), None]);
        assert_eq!(
            s.map_get::<&str, String>("m", &["k"]).expect("get"),
            vec!["new".to_string()]
        );
    }

    /// T3.4: Namespaces do not leak into each other.
    #[test]
    fn namespaces_isolated() {
        let s = store("t3-namespaces");
        s.map_put("one", &[("k", 1i64)]).expect("put");
        s.heap_add("one", &["k"]).expect("heap add");
        assert!(!s.map_has_any("two", &["k"]).expect("has"));
        assert!(s.map_keys::<String>("two").expect("keys").is_empty());
        assert_eq!(
            s.map_keys::<String>("one").expect("keys"),
            BTreeSet::from(["k".to_string()])
        );
    }
}

// =============================================================================
// TIER T4: LIFECYCLE AND REMOTE CALLS
// =============================================================================

mod t4_lifecycle_rpc {
    use super::*;
    use auditdb_core::{Call, Dispatcher, ErrorKind, Reply, Request, StoreConfig};
    use tempfile::tempdir;

    /// T4.1: Everything written survives close and reopen.
    #[test]
    fn file_store_persists() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("audit.db");
        let config = StoreConfig::new()
            .with_audit_name("persist")
            .with_audit_db(path.display().to_string());

        let s = AuditStore::open(config.clone()).expect("open");
        s.add(url("a").with_link(id("b"))).expect("add");
        s.mark_stage_finished(&DataKey::Plain(id("a")), 4).expect("stage");
        s.heap_add("h", &["x"]).expect("heap");
        s.close().expect("close");

        let s = AuditStore::open(config).expect("reopen");
        assert_eq!(s.stage_of(&DataKey::Plain(id("a"))).expect("stage"), 4);
        assert_eq!(links_of(&s, &id("a")), BTreeSet::from([id("b")]));
        assert!(s.heap_has_all("h", &["x"]).expect("heap"));
    }

    /// T4.2: The dispatcher reports store failures by kind.
    #[test]
    fn dispatcher_reports_kinds() {
        let mut d = Dispatcher::new();
        d.register(store("t4-rpc")).expect("register");

        let reply = d
            .handle(Request::new(
                "t4-rpc",
                Call::HeapAdd {
                    shared_id: "h".to_string(),
                    values: vec![SharedValue::from("x"), SharedValue::from("y")],
                },
            ))
            .expect("heap add");
        assert_eq!(reply, Reply::Done);

        let reply = d
            .handle(Request::new(
                "t4-rpc",
                Call::HeapPop {
                    shared_id: "h".to_string(),
                    maximum: None,
                },
            ))
            .expect("heap pop");
        assert!(matches!(reply, Reply::Values(ref v) if v.len() == 2));

        d.handle(Request::new("t4-rpc", Call::DataAdd(url("a"))))
            .expect("add url");
        let domain = Entity::new(id("a"), "resource/domain", Properties::new()).expect("entity");
        let failure = d
            .handle(Request::new("t4-rpc", Call::DataAdd(domain)))
            .expect_err("same identity, different subtype");
        assert_eq!(failure.kind, ErrorKind::Validation);

        let failure = d
            .handle(Request::new("ghost", Call::StageClearAll))
            .expect_err("unknown audit");
        assert_eq!(failure.kind, ErrorKind::NotFound);
    }
}
