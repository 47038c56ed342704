//! Query planner / evaluator.

pub mod ast;
pub mod eval;
pub mod planner;

pub use ast::{parse, Query};

use crate::collection::Collection;
use crate::document::{Document, Id};
use crate::error::CResult;

#[derive(Clone, Debug, Default)]
pub struct FindOptions {
    pub sort: Vec<(String, SortDirection)>,
    pub skip: usize,
    pub limit: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Runs `find` end to end: plan, fetch, residual-filter, sort, skip, limit.
pub fn find(collection: &Collection, query: &Query, opts: &FindOptions) -> CResult<Vec<Document>> {
    let candidates = planner::plan(query, collection);
    let mut matched = Vec::new();
    for id in candidates {
        let Some(doc) = collection.get(&id)? else { continue };
        if eval::matches(query, &doc.body) {
            matched.push(doc);
        }
    }
    sort_in_place(&mut matched, &opts.sort);
    apply_skip_limit(matched, opts.skip, opts.limit)
}

pub fn count(collection: &Collection, query: &Query) -> CResult<usize> {
    let candidates = planner::plan(query, collection);
    let mut n = 0;
    for id in candidates {
        if let Some(doc) = collection.get(&id)? {
            if eval::matches(query, &doc.body) {
                n += 1;
            }
        }
    }
    Ok(n)
}

/// Finds the ids matching `query`, without decoding past what the filter
/// needs -- used by `update`/`delete` to determine their target set.
pub fn matching_ids(collection: &Collection, query: &Query) -> CResult<Vec<Id>> {
    let candidates = planner::plan(query, collection);
    let mut out = Vec::new();
    for id in candidates {
        if let Some(doc) = collection.get(&id)? {
            if eval::matches(query, &doc.body) {
                out.push(id);
            }
        }
    }
    Ok(out)
}

fn sort_in_place(docs: &mut [Document], sort: &[(String, SortDirection)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (field, dir) in sort {
            let av = a.body.get_path(field);
            let bv = b.body.get_path(field);
            let ord = match (av, bv) {
                (Some(x), Some(y)) => x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (None, None) => std::cmp::Ordering::Equal,
            };
            let ord = if *dir == SortDirection::Desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

fn apply_skip_limit(docs: Vec<Document>, skip: usize, limit: Option<usize>) -> CResult<Vec<Document>> {
    let skipped: Vec<Document> = docs.into_iter().skip(skip).collect();
    Ok(match limit {
        Some(n) => skipped.into_iter().take(n).collect(),
        None => skipped,
    })
}
