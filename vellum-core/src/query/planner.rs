//! Query planner: picks SIDX lookups where they apply and
//! otherwise falls back to a full DIDX scan. Every candidate set produced
//! here is potentially an overapproximation -- the residual filter
//! (`query::eval`) always re-checks the full query against the decoded
//! document.

use super::ast::{CmpOp, Query};
use crate::collection::Collection;
use crate::document::Id;
use crate::index::{Index, IndexKind};
use crate::value::Value;
use std::ops::Bound;

pub fn plan(query: &Query, collection: &Collection) -> Vec<Id> {
    match try_plan(query, collection) {
        Some(ids) => ids,
        None => collection.didx().snapshot_ids(),
    }
}

/// Returns `Some(candidates)` when an index could narrow the scan, or
/// `None` to signal "fall back to a full scan".
fn try_plan(query: &Query, collection: &Collection) -> Option<Vec<Id>> {
    match query {
        Query::MatchAll | Query::Not(_) | Query::NotIn(_, _) | Query::Exists(_, _) => None,
        Query::Eq(field, value) => lookup_eq(collection, field, value),
        Query::In(field, values) => {
            let mut out = Vec::new();
            for v in values {
                out.extend(lookup_eq(collection, field, v)?);
            }
            Some(dedup_sorted(out))
        }
        Query::Cmp(field, op, value) => lookup_range(collection, field, *op, value),
        Query::And(clauses) => {
            if let Some(ids) = try_composite(clauses, collection) {
                return Some(ids);
            }
            let mut result: Option<Vec<Id>> = None;
            for clause in clauses {
                let Some(ids) = try_plan(clause, collection) else { continue };
                result = Some(match result {
                    Some(acc) => intersect_sorted(acc, ids),
                    None => ids,
                });
            }
            result
        }
        Query::Or(clauses) => {
            let mut out = Vec::new();
            for clause in clauses {
                out.extend(try_plan(clause, collection)?);
            }
            Some(dedup_sorted(out))
        }
    }
}

fn lookup_eq(collection: &Collection, field: &str, value: &Value) -> Option<Vec<Id>> {
    for (def, index) in collection.indexes_snapshot() {
        if def.fields == [field.to_string()] {
            match &*index {
                Index::Equality(m) | Index::Unique(m) => return Some(sorted(m.lookup(value))),
                Index::Range(r) => return Some(sorted(r.lookup(value))),
                _ => {}
            }
        }
    }
    None
}

fn lookup_range(collection: &Collection, field: &str, op: CmpOp, value: &Value) -> Option<Vec<Id>> {
    for (def, index) in collection.indexes_snapshot() {
        if def.fields == [field.to_string()] {
            if let Index::Range(r) = &*index {
                let ids = match op {
                    CmpOp::Gt => r.range(Bound::Excluded(value), Bound::Unbounded),
                    CmpOp::Gte => r.range(Bound::Included(value), Bound::Unbounded),
                    CmpOp::Lt => r.range(Bound::Unbounded, Bound::Excluded(value)),
                    CmpOp::Lte => r.range(Bound::Unbounded, Bound::Included(value)),
                    CmpOp::Ne => return None,
                };
                return Some(sorted(ids));
            }
        }
    }
    None
}

/// If every conjunct is a bare equality and together they cover a
/// composite index's fields (in its defined order), use a single prefix
/// lookup instead of intersecting per-field plans.
fn try_composite(clauses: &[Query], collection: &Collection) -> Option<Vec<Id>> {
    let mut eqs: Vec<(&str, &Value)> = Vec::new();
    for c in clauses {
        match c {
            Query::Eq(f, v) => eqs.push((f.as_str(), v)),
            _ => return None,
        }
    }
    for (def, index) in collection.indexes_snapshot() {
        if def.kind != IndexKind::Composite || def.fields.len() > eqs.len() {
            continue;
        }
        let matches_prefix = def
            .fields
            .iter()
            .all(|f| eqs.iter().any(|(ef, _)| *ef == f));
        if !matches_prefix {
            continue;
        }
        if let Index::Composite(c) = &*index {
            let prefix: Vec<Value> = def
                .fields
                .iter()
                .map(|f| eqs.iter().find(|(ef, _)| *ef == f).unwrap().1.clone())
                .collect();
            return Some(sorted(c.prefix(&prefix)));
        }
    }
    None
}

fn sorted(mut ids: Vec<Id>) -> Vec<Id> {
    ids.sort();
    ids
}

fn dedup_sorted(mut ids: Vec<Id>) -> Vec<Id> {
    ids.sort();
    ids.dedup();
    ids
}

fn intersect_sorted(a: Vec<Id>, b: Vec<Id>) -> Vec<Id> {
    let b_sorted = sorted(b);
    a.into_iter().filter(|id| b_sorted.binary_search(id).is_ok()).collect()
}
