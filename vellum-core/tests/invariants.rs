//! Black-box-ish tests against `vellum_core::Engine` directly (no network
//! hop), covering the properties that don't require a second process:
//! insert/version (1), concurrent `$inc` (2), transfer conservation (3),
//! repeatable read (4), index/full-scan parity (8), drop/recreate
//! isolation (9), replay equivalence (10), the OCC conflict scenario (A),
//! vector top-k (D), and aggregation (F).

use serde_json::json;
use std::sync::Arc;
use std::thread;
use vellum_core::collection::{WriteEntry, WriteKind};
use vellum_core::config::EngineConfig;
use vellum_core::document::Id;
use vellum_core::engine::Engine;
use vellum_core::index::{IndexDef, IndexKind, VectorMetric};
use vellum_core::query::{self, FindOptions};
use vellum_core::value::Value;
use vellum_core::{aggregate, update};

fn open_engine() -> (Engine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::open(EngineConfig::new(dir.path())).unwrap();
    (engine, dir)
}

fn v(j: serde_json::Value) -> Value {
    Value::from(j)
}

#[test]
fn invariant_1_insert_then_find_by_id() {
    let (engine, _dir) = open_engine();
    let col = engine.collection_or_create("docs").unwrap();
    let id = Id::new();
    col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"a": 1}))), read_version: None })])
        .unwrap();

    let q = query::parse(&v(json!({"_id": id.to_string()}))).unwrap();
    // `_id` isn't stored in the body; fetch directly instead, mirroring
    // how the server translates find({_id: X}) into a point lookup.
    let doc = col.get(&id).unwrap().unwrap();
    assert_eq!(doc.version, 1);
    assert_eq!(doc.body.get_path("a"), Some(&Value::Int(1)));
    let _ = q;
}

#[test]
fn invariant_2_concurrent_inc_yields_exact_sum() {
    let (engine, _dir) = open_engine();
    let col = engine.collection_or_create("counters").unwrap();
    let id = Id::new();
    col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"value": 0}))), read_version: None })])
        .unwrap();

    let col = Arc::new(col);
    let n_threads = 8;
    let incs_per_thread = 50;
    let handles: Vec<_> = (0..n_threads)
        .map(|_| {
            let col = col.clone();
            thread::spawn(move || {
                for _ in 0..incs_per_thread {
                    loop {
                        let current = col.get(&id).unwrap().unwrap();
                        let new_body = update::apply(&current.body, &v(json!({"$inc": {"value": 1}}))).unwrap();
                        let result = col.commit(vec![(
                            id,
                            WriteEntry {
                                kind: WriteKind::Update,
                                new_doc: Some(new_body),
                                read_version: Some(current.version),
                            },
                        )]);
                        if result.is_ok() {
                            break;
                        }
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let final_doc = col.get(&id).unwrap().unwrap();
    assert_eq!(final_doc.body.get_path("value"), Some(&Value::Int((n_threads * incs_per_thread) as i64)));
}

#[test]
fn invariant_3_transfers_conserve_total_balance() {
    let (engine, _dir) = open_engine();
    let col = engine.collection_or_create("accounts").unwrap();
    let m = 5;
    let balance = 100i64;
    let mut ids = Vec::new();
    for _ in 0..m {
        let id = Id::new();
        col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"balance": balance}))), read_version: None })])
            .unwrap();
        ids.push(id);
    }

    for i in 0..20 {
        let from = ids[i % m];
        let to = ids[(i + 1) % m];
        loop {
            let from_doc = col.get(&from).unwrap().unwrap();
            let to_doc = col.get(&to).unwrap().unwrap();
            let amount = 10i64;
            let from_new = update::apply(&from_doc.body, &v(json!({"$inc": {"balance": -amount}}))).unwrap();
            let to_new = update::apply(&to_doc.body, &v(json!({"$inc": {"balance": amount}}))).unwrap();
            let result = col.commit(vec![
                (from, WriteEntry { kind: WriteKind::Update, new_doc: Some(from_new), read_version: Some(from_doc.version) }),
                (to, WriteEntry { kind: WriteKind::Update, new_doc: Some(to_new), read_version: Some(to_doc.version) }),
            ]);
            if result.is_ok() {
                break;
            }
        }
    }

    let total: i64 = ids.iter().map(|id| col.get(id).unwrap().unwrap().body.get_path("balance").unwrap().as_f64().unwrap() as i64).sum();
    assert_eq!(total, m as i64 * balance);
}

#[test]
fn invariant_4_repeatable_find_within_snapshot() {
    let (engine, _dir) = open_engine();
    let col = engine.collection_or_create("docs").unwrap();
    for i in 0..10 {
        let id = Id::new();
        col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"seq": i}))), read_version: None })])
            .unwrap();
    }
    let q = query::parse(&v(json!({}))).unwrap();
    let first = query::find(&col, &q, &FindOptions::default()).unwrap();
    let second = query::find(&col, &q, &FindOptions::default()).unwrap();
    assert_eq!(first.len(), second.len());
}

#[test]
fn invariant_8_indexed_query_matches_full_scan() {
    let (engine, _dir) = open_engine();
    let col = engine.collection_or_create("docs").unwrap();
    for i in 0..20 {
        let id = Id::new();
        col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"k": i % 4}))), read_version: None })])
            .unwrap();
    }
    let q = query::parse(&v(json!({"k": 2}))).unwrap();
    let before = query::find(&col, &q, &FindOptions::default()).unwrap();
    let mut before_ids: Vec<_> = before.iter().map(|d| d.id).collect();
    before_ids.sort();

    col.create_index(IndexDef { name: "by_k".into(), kind: IndexKind::Equality, fields: vec!["k".into()], dimension: None, metric: None })
        .unwrap();

    let after = query::find(&col, &q, &FindOptions::default()).unwrap();
    let mut after_ids: Vec<_> = after.iter().map(|d| d.id).collect();
    after_ids.sort();
    assert_eq!(before_ids, after_ids);
}

#[test]
fn invariant_9_drop_and_recreate_yields_empty_collection() {
    let (engine, _dir) = open_engine();
    let stable = engine.collection_or_create("stable").unwrap();
    for i in 0..5 {
        let id = Id::new();
        stable.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"seq": i}))), read_version: None })])
            .unwrap();
    }
    engine.create_collection("volatile").unwrap();
    engine.drop_collection("volatile").unwrap();
    engine.create_collection("volatile").unwrap();

    let volatile = engine.collection("volatile").unwrap();
    assert_eq!(volatile.count(), 0);
    assert_eq!(stable.count(), 5);
}

#[test]
fn invariant_10_replay_matches_live_state() {
    let (engine, dir) = open_engine();
    let col = engine.collection_or_create("docs").unwrap();
    let mut ids = Vec::new();
    for i in 0..15 {
        let id = Id::new();
        col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"seq": i}))), read_version: None })])
            .unwrap();
        ids.push(id);
    }
    let doc0 = col.get(&ids[0]).unwrap().unwrap();
    col.commit(vec![(ids[0], WriteEntry { kind: WriteKind::Update, new_doc: Some(v(json!({"seq": 999}))), read_version: Some(doc0.version) })])
        .unwrap();
    col.commit(vec![(ids[1], WriteEntry { kind: WriteKind::Delete, new_doc: None, read_version: None })])
        .unwrap();

    drop(col);
    drop(engine);

    let reopened = Engine::open(EngineConfig::new(dir.path())).unwrap();
    let reopened_col = reopened.collection("docs").unwrap();
    assert_eq!(reopened_col.count(), 14);
    assert_eq!(reopened_col.get(&ids[0]).unwrap().unwrap().body.get_path("seq"), Some(&Value::Int(999)));
    assert!(reopened_col.get(&ids[1]).unwrap().is_none());
}

#[test]
fn scenario_a_occ_conflict_on_stale_read_version() {
    let (engine, _dir) = open_engine();
    let col = engine.collection_or_create("accounts").unwrap();
    let id = Id::new();
    col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"owner": "Alice", "balance": 100}))), read_version: None })])
        .unwrap();

    let tx1_read = col.get(&id).unwrap().unwrap();

    // TX2, outside TX1, sets balance = 200.
    let tx2_read = col.get(&id).unwrap().unwrap();
    col.commit(vec![(id, WriteEntry { kind: WriteKind::Update, new_doc: Some(v(json!({"owner": "Alice", "balance": 200}))), read_version: Some(tx2_read.version) })])
        .unwrap();

    // TX1 commits against its now-stale read version.
    let result = col.commit(vec![(id, WriteEntry { kind: WriteKind::Update, new_doc: Some(v(json!({"owner": "Alice", "balance": 150}))), read_version: Some(tx1_read.version) })]);
    assert!(matches!(result, Err(vellum_core::Error::TransactionConflict)));
    assert!(result.unwrap_err().to_string().to_lowercase().contains("conflict"));

    let current = col.get(&id).unwrap().unwrap();
    assert_eq!(current.body.get_path("balance"), Some(&Value::Int(200)));
}

#[test]
fn scenario_d_vector_top_k_returns_cluster() {
    let (engine, _dir) = open_engine();
    let col = engine.collection_or_create("embeddings").unwrap();
    col.create_index(IndexDef {
        name: "vec_idx".into(),
        kind: IndexKind::Vector,
        fields: vec!["embedding".into()],
        dimension: Some(8),
        metric: Some(VectorMetric::Cosine),
    })
    .unwrap();

    let target = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
    for i in 0..5 {
        let mut vec = target.clone();
        vec[1] = 0.01 * i as f64;
        let id = Id::new();
        col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"embedding": vec}))), read_version: None })])
            .unwrap();
    }
    for i in 0..45 {
        let mut vec = vec![0.0; 8];
        vec[i % 8] = -1.0;
        let id = Id::new();
        col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"embedding": vec}))), read_version: None })])
            .unwrap();
    }

    let (_, index) = col.index("vec_idx").unwrap();
    let results = match &*index {
        vellum_core::index::Index::Vector(vi) => vi.search(&target, 5).unwrap(),
        _ => panic!("expected a vector index"),
    };
    assert_eq!(results.len(), 5);
    for (_, similarity) in &results {
        assert!(*similarity > 0.9);
    }
}

#[test]
fn scenario_f_aggregation_group_and_avg() {
    let (engine, _dir) = open_engine();
    let col = engine.collection_or_create("salaries").unwrap();
    for (dept, salary) in [("eng", 100), ("eng", 120), ("sales", 80)] {
        let id = Id::new();
        col.commit(vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(v(json!({"dept": dept, "salary": salary}))), read_version: None })])
            .unwrap();
    }

    let q = query::parse(&v(json!({}))).unwrap();
    let all = query::find(&col, &q, &FindOptions::default()).unwrap();
    let input: Vec<Value> = all.iter().map(|d| d.body.clone()).collect();

    let pipeline = vec![
        v(json!({"$match": {"dept": "eng"}})),
        v(json!({"$group": {"_id": null, "avg": {"$avg": "$salary"}}})),
    ];
    let out = aggregate::run(input, &pipeline).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].get_path("avg"), Some(&Value::Float(110.0)));
}
