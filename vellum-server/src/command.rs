//! Command dispatch table: one pure match arm per wire command,
//! translating the JSON request into calls against
//! `vellum_core::Engine` and the JSON response shapes the protocol
//! promises. Holds no network state of its own -- `session.rs` owns the
//! socket and the connection's open transaction, if any.

use serde_json::{json, Value as Json};
use std::sync::Arc;
use vellum_core::collection::{Collection, WriteEntry, WriteKind};
use vellum_core::document::Id;
use vellum_core::index::{IndexDef, IndexKind, VectorMetric};
use vellum_core::query::{self, FindOptions, SortDirection};
use vellum_core::txn::{run_implicit, Transaction};
use vellum_core::value::Value;
use vellum_core::{aggregate, update, CResult, Engine, Error};

pub async fn dispatch(engine: &Engine, txn: &mut Option<Transaction>, req: Json) -> Json {
    match run(engine, txn, &req) {
        Ok(data) => json!({"ok": true, "data": data}),
        Err(e) => json!({"ok": false, "error": e.to_string()}),
    }
}

fn run(engine: &Engine, txn: &mut Option<Transaction>, req: &Json) -> CResult<Json> {
    let cmd = req
        .get("cmd")
        .and_then(Json::as_str)
        .ok_or_else(|| Error::InvalidQuery("missing `cmd`".into()))?;

    match cmd {
        "ping" => Ok(json!("pong")),

        "create_collection" => {
            engine.create_collection(str_field(req, "collection")?)?;
            Ok(Json::Null)
        }
        "list_collections" => Ok(json!(engine.list_collections())),
        "drop_collection" => {
            engine.drop_collection(str_field(req, "collection")?)?;
            Ok(Json::Null)
        }

        "create_index" => {
            create_index(engine, req, IndexKind::Equality)?;
            Ok(Json::Null)
        }
        "create_unique_index" => {
            create_index(engine, req, IndexKind::Unique)?;
            Ok(Json::Null)
        }
        "create_composite_index" => {
            create_index(engine, req, IndexKind::Composite)?;
            Ok(Json::Null)
        }
        "create_vector_index" => {
            create_vector_index(engine, req)?;
            Ok(Json::Null)
        }
        "create_text_index" => Err(Error::InvalidQuery(
            "full-text search is not implemented; it lives outside the document store".into(),
        )),
        "list_indexes" => {
            let collection = collection_for(engine, req)?;
            let defs = collection.list_indexes();
            Ok(json!(defs
                .iter()
                .map(|d| json!({"name": d.name, "kind": format!("{:?}", d.kind), "fields": d.fields}))
                .collect::<Vec<_>>()))
        }
        "drop_index" => {
            let collection = collection_for(engine, req)?;
            collection.drop_index(str_field(req, "name")?)?;
            Ok(Json::Null)
        }

        "insert" => {
            let collection = collection_for_or_create(engine, req)?;
            let body = vellum_core::document::strip_metadata(Value::from(
                req.get("doc").cloned().unwrap_or(Json::Null),
            ));
            let id = insert_one(&collection, txn, body)?;
            Ok(json!({"id": id.to_string()}))
        }
        "insert_many" => {
            let collection = collection_for_or_create(engine, req)?;
            let docs = req
                .get("docs")
                .and_then(Json::as_array)
                .ok_or_else(|| Error::InvalidQuery("`docs` must be an array".into()))?;
            let mut ids = Vec::with_capacity(docs.len());
            for doc in docs {
                let body = vellum_core::document::strip_metadata(Value::from(doc.clone()));
                ids.push(insert_one(&collection, txn, body)?.to_string());
            }
            Ok(json!(ids))
        }

        "find" => {
            let collection = collection_for(engine, req)?;
            let docs = find_many(&collection, req)?;
            Ok(json!(docs
                .into_iter()
                .map(|d| Json::from(d.to_client_value()))
                .collect::<Vec<_>>()))
        }
        "find_one" => {
            let collection = collection_for(engine, req)?;
            let mut docs = find_many(&collection, req)?;
            Ok(match docs.pop() {
                Some(doc) => Json::from(doc.to_client_value()),
                None => Json::Null,
            })
        }
        "count" => {
            let collection = collection_for(engine, req)?;
            Ok(json!({"count": count_matching(&collection, req)?}))
        }

        "update" => {
            let collection = collection_for(engine, req)?;
            let modified = update_matching(&collection, txn, req, false)?;
            Ok(json!({"modified": modified}))
        }
        "update_one" => {
            let collection = collection_for(engine, req)?;
            let modified = update_matching(&collection, txn, req, true)?;
            Ok(json!({"modified": modified}))
        }
        "delete" => {
            let collection = collection_for(engine, req)?;
            let deleted = delete_matching(&collection, txn, req, false)?;
            Ok(json!({"deleted": deleted}))
        }
        "delete_one" => {
            let collection = collection_for(engine, req)?;
            let deleted = delete_matching(&collection, txn, req, true)?;
            Ok(json!({"deleted": deleted}))
        }

        "aggregate" => {
            let collection = collection_for(engine, req)?;
            let pipeline: Vec<Value> = req
                .get("pipeline")
                .and_then(Json::as_array)
                .ok_or_else(|| Error::InvalidQuery("`pipeline` must be an array".into()))?
                .iter()
                .map(|stage| Value::from(stage.clone()))
                .collect();
            let match_all = query::parse(&Value::from(json!({})))?;
            let all = query::find(&collection, &match_all, &FindOptions::default())?;
            let input: Vec<Value> = all.into_iter().map(|d| d.to_client_value()).collect();
            let out = aggregate::run(input, &pipeline)?;
            Ok(json!(out.into_iter().map(Json::from).collect::<Vec<_>>()))
        }

        "vector_search" => vector_search(engine, req),

        "compact" => {
            engine.compact(str_field(req, "collection")?)?;
            Ok(Json::Null)
        }

        "begin_tx" => {
            if txn.is_some() {
                return Err(Error::TransactionAlreadyActive);
            }
            let collection = str_field(req, "collection")?;
            engine.collection(collection)?;
            *txn = Some(Transaction::begin(collection));
            Ok(Json::Null)
        }
        "commit_tx" => {
            let active = txn.take().ok_or(Error::NoActiveTransaction)?;
            let (collection_name, writes) = active.take_write_set();
            let collection = engine.collection(&collection_name)?;
            let results = collection.commit(writes)?;
            Ok(json!(results
                .into_iter()
                .map(|(id, version)| json!({"id": id.to_string(), "version": version}))
                .collect::<Vec<_>>()))
        }
        "rollback_tx" => {
            txn.take().ok_or(Error::NoActiveTransaction)?;
            Ok(Json::Null)
        }

        other => Err(Error::InvalidQuery(format!("unknown command: {other}"))),
    }
}

fn str_field<'a>(req: &'a Json, key: &str) -> CResult<&'a str> {
    req.get(key)
        .and_then(Json::as_str)
        .ok_or_else(|| Error::InvalidQuery(format!("missing `{key}`")))
}

fn collection_for(engine: &Engine, req: &Json) -> CResult<Arc<Collection>> {
    engine.collection(str_field(req, "collection")?)
}

fn collection_for_or_create(engine: &Engine, req: &Json) -> CResult<Arc<Collection>> {
    engine.collection_or_create(str_field(req, "collection")?)
}

fn create_index(engine: &Engine, req: &Json, kind: IndexKind) -> CResult<()> {
    let collection = str_field(req, "collection")?;
    let fields = match req.get("fields").and_then(Json::as_array) {
        Some(arr) => arr.iter().filter_map(Json::as_str).map(String::from).collect(),
        None => vec![str_field(req, "field")?.to_string()],
    };
    let name = req
        .get("name")
        .and_then(Json::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("{}_{}", fields.join("_"), index_suffix(kind)));
    engine.create_index(collection, IndexDef { name, kind, fields, dimension: None, metric: None })
}

fn index_suffix(kind: IndexKind) -> &'static str {
    match kind {
        IndexKind::Equality => "idx",
        IndexKind::Unique => "uniq",
        IndexKind::Range => "range",
        IndexKind::Composite => "composite",
        IndexKind::Vector => "vec",
    }
}

fn create_vector_index(engine: &Engine, req: &Json) -> CResult<()> {
    let collection = str_field(req, "collection")?;
    let field = str_field(req, "field")?.to_string();
    let dimension = req
        .get("dimension")
        .and_then(Json::as_u64)
        .ok_or_else(|| Error::InvalidQuery("missing `dimension`".into()))? as usize;
    let metric = match req.get("metric").and_then(Json::as_str) {
        Some("euclidean") => VectorMetric::Euclidean,
        Some("dot") => VectorMetric::Dot,
        _ => VectorMetric::Cosine,
    };
    let name = req
        .get("name")
        .and_then(Json::as_str)
        .map(String::from)
        .unwrap_or_else(|| format!("{field}_vec"));
    engine.create_index(
        collection,
        IndexDef { name, kind: IndexKind::Vector, fields: vec![field], dimension: Some(dimension), metric: Some(metric) },
    )
}

fn vector_search(engine: &Engine, req: &Json) -> CResult<Json> {
    let collection = collection_for(engine, req)?;
    let field = str_field(req, "field")?;
    let query_vector: Vec<f64> = req
        .get("query_vector")
        .and_then(Json::as_array)
        .ok_or_else(|| Error::InvalidQuery("`query_vector` must be an array".into()))?
        .iter()
        .filter_map(Json::as_f64)
        .collect();
    let limit = req.get("limit").and_then(Json::as_u64).unwrap_or(10) as usize;

    let index_name = format!("{field}_vec");
    let (_, index) = collection
        .indexes_snapshot()
        .into_iter()
        .find(|(def, _)| def.fields == [field.to_string()] && def.kind == IndexKind::Vector)
        .or_else(|| collection.index(&index_name))
        .ok_or_else(|| Error::IndexNotFound(index_name.clone()))?;

    let hits = match &*index {
        vellum_core::index::Index::Vector(vi) => vi.search(&query_vector, limit)?,
        _ => return Err(Error::IndexNotFound(index_name)),
    };

    let mut out = Vec::with_capacity(hits.len());
    for (id, similarity) in hits {
        let Some(doc) = collection.get(&id)? else { continue };
        let mut value = doc.to_client_value();
        if let Value::Object(obj) = &mut value {
            obj.insert("_similarity", Value::Float(similarity));
            obj.insert("_distance", Value::Float(1.0 - similarity));
        }
        out.push(Json::from(value));
    }
    Ok(json!(out))
}

/// Inserts one document, routing through the open transaction's write set
/// if present, otherwise an implicit single-statement commit.
fn insert_one(collection: &Collection, txn: &mut Option<Transaction>, body: Value) -> CResult<Id> {
    let id = Id::new();
    match txn {
        Some(active) if active.collection == collection.name() => {
            active.stage_insert(id, body);
            Ok(id)
        }
        Some(_) => Err(Error::InvalidQuery(
            "the open transaction is scoped to a different collection".into(),
        )),
        None => {
            let writes = vec![(id, WriteEntry { kind: WriteKind::Insert, new_doc: Some(body), read_version: None })];
            run_implicit(false, || collection.commit(writes.clone()))?;
            Ok(id)
        }
    }
}

fn find_options(req: &Json) -> FindOptions {
    let mut opts = FindOptions::default();
    if let Some(sort) = req.get("sort").and_then(Json::as_object) {
        for (field, dir) in sort {
            let direction = if dir.as_i64() == Some(-1) { SortDirection::Desc } else { SortDirection::Asc };
            opts.sort.push((field.clone(), direction));
        }
    }
    if let Some(skip) = req.get("skip").and_then(Json::as_u64) {
        opts.skip = skip as usize;
    }
    if let Some(limit) = req.get("limit").and_then(Json::as_u64) {
        opts.limit = Some(limit as usize);
    }
    opts
}

/// Resolves the `_id` fast path (a point lookup bypassing the query
/// engine, since `_id` is metadata injected at the response boundary, not
/// a field stored in the document body) or falls through to a planned
/// query over the filter.
fn find_many(collection: &Collection, req: &Json) -> CResult<Vec<vellum_core::Document>> {
    let filter = req.get("query").cloned().unwrap_or(json!({}));
    if let Some(id) = sole_id_filter(&filter) {
        return Ok(collection.get(&id)?.into_iter().collect());
    }
    let query = query::parse(&Value::from(filter))?;
    query::find(collection, &query, &find_options(req))
}

fn count_matching(collection: &Collection, req: &Json) -> CResult<usize> {
    let filter = req.get("query").cloned().unwrap_or(json!({}));
    if let Some(id) = sole_id_filter(&filter) {
        return Ok(if collection.get(&id)?.is_some() { 1 } else { 0 });
    }
    query::count(collection, &query::parse(&Value::from(filter))?)
}

fn sole_id_filter(filter: &Json) -> Option<Id> {
    let obj = filter.as_object()?;
    if obj.len() != 1 {
        return None;
    }
    obj.get("_id")?.as_str()?.parse().ok()
}

fn matching_ids(collection: &Collection, req: &Json) -> CResult<Vec<Id>> {
    let filter = req.get("query").cloned().unwrap_or(json!({}));
    if let Some(id) = sole_id_filter(&filter) {
        return Ok(if collection.get(&id)?.is_some() { vec![id] } else { vec![] });
    }
    query::matching_ids(collection, &query::parse(&Value::from(filter))?)
}

fn update_matching(
    collection: &Collection,
    txn: &mut Option<Transaction>,
    req: &Json,
    one: bool,
) -> CResult<usize> {
    let update_doc = Value::from(req.get("update").cloned().unwrap_or(json!({})));
    let mut ids = matching_ids(collection, req)?;
    if one {
        ids.truncate(1);
    }
    let mut modified = 0;
    for id in ids {
        match txn {
            Some(active) if active.collection == collection.name() => {
                let Some(current) = collection.get(&id)? else { continue };
                let new_body = update::apply(&current.body, &update_doc)?;
                active.record_read(id, current.version);
                active.stage_update(id, new_body);
            }
            Some(_) => {
                return Err(Error::InvalidQuery(
                    "the open transaction is scoped to a different collection".into(),
                ))
            }
            None => {
                let found = run_implicit(true, || {
                    let Some(current) = collection.get(&id)? else { return Ok(Vec::new()) };
                    let new_body = update::apply(&current.body, &update_doc)?;
                    let writes = vec![(
                        id,
                        WriteEntry { kind: WriteKind::Update, new_doc: Some(new_body), read_version: Some(current.version) },
                    )];
                    collection.commit(writes)
                })?;
                if found.is_empty() {
                    continue;
                }
            }
        }
        modified += 1;
    }
    Ok(modified)
}

fn delete_matching(
    collection: &Collection,
    txn: &mut Option<Transaction>,
    req: &Json,
    one: bool,
) -> CResult<usize> {
    let mut ids = matching_ids(collection, req)?;
    if one {
        ids.truncate(1);
    }
    let mut deleted = 0;
    for id in ids {
        match txn {
            Some(active) if active.collection == collection.name() => {
                active.stage_delete(id);
            }
            Some(_) => {
                return Err(Error::InvalidQuery(
                    "the open transaction is scoped to a different collection".into(),
                ))
            }
            None => {
                let writes = vec![(id, WriteEntry { kind: WriteKind::Delete, new_doc: None, read_version: None })];
                run_implicit(false, || collection.commit(writes.clone()))?;
            }
        }
        deleted += 1;
    }
    Ok(deleted)
}
