//! Vector index: flat storage, exact brute-force nearest-neighbor search.
//! The contract is top-k by metric, descending similarity -- an ANN
//! structure could replace the scan without changing callers.

use crate::document::Id;
use crate::error::{CResult, Error};
use crate::value::Value;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorMetric {
    Cosine,
    Euclidean,
    Dot,
}

pub struct VectorIndex {
    dimension: usize,
    metric: VectorMetric,
    vectors: RwLock<Vec<(Id, Vec<f64>)>>,
}

impl VectorIndex {
    pub fn new(dimension: usize, metric: VectorMetric) -> Self {
        VectorIndex { dimension, metric, vectors: RwLock::new(Vec::new()) }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn insert(&self, key: &Value, id: Id) {
        let Some(vec) = value_to_vec(key) else { return };
        if vec.len() != self.dimension {
            return;
        }
        let mut vectors = self.vectors.write();
        vectors.retain(|(existing, _)| *existing != id);
        vectors.push((id, vec));
    }

    pub fn remove(&self, id: Id) {
        self.vectors.write().retain(|(existing, _)| *existing != id);
    }

    /// Returns the top-`k` ids by descending similarity to `query`.
    pub fn search(&self, query: &[f64], k: usize) -> CResult<Vec<(Id, f64)>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch { expected: self.dimension, actual: query.len() });
        }
        let vectors = self.vectors.read();
        let mut scored: Vec<(Id, f64)> = vectors
            .iter()
            .map(|(id, v)| (*id, similarity(self.metric, query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }
}

fn value_to_vec(v: &Value) -> Option<Vec<f64>> {
    let arr = v.as_array()?;
    arr.iter().map(|e| e.as_f64()).collect()
}

fn similarity(metric: VectorMetric, a: &[f64], b: &[f64]) -> f64 {
    match metric {
        VectorMetric::Cosine => {
            let dist = cosine_distance(a, b);
            1.0 - dist / 2.0
        }
        VectorMetric::Euclidean => {
            let d = euclidean_distance(a, b);
            1.0 / (1.0 + d)
        }
        VectorMetric::Dot => dot(a, b),
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// Cosine distance in [0, 2]: `1 - cos_similarity`.
fn cosine_distance(a: &[f64], b: &[f64]) -> f64 {
    let denom = norm(a) * norm(b);
    if denom == 0.0 {
        return 1.0;
    }
    1.0 - dot(a, b) / denom
}

fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_max_cosine_similarity() {
        let idx = VectorIndex::new(3, VectorMetric::Cosine);
        let id = Id::new();
        idx.insert(&Value::Array(vec![Value::Float(1.0), Value::Float(0.0), Value::Float(0.0)]), id);
        let results = idx.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results[0].0, id);
        assert!((results[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn dimension_mismatch_errors() {
        let idx = VectorIndex::new(3, VectorMetric::Dot);
        assert!(idx.search(&[1.0, 0.0], 1).is_err());
    }

    #[test]
    fn topk_orders_by_descending_similarity() {
        let idx = VectorIndex::new(2, VectorMetric::Euclidean);
        let near = Id::new();
        let far = Id::new();
        idx.insert(&Value::Array(vec![Value::Float(0.0), Value::Float(0.0)]), near);
        idx.insert(&Value::Array(vec![Value::Float(10.0), Value::Float(10.0)]), far);
        let results = idx.search(&[0.1, 0.1], 2).unwrap();
        assert_eq!(results[0].0, near);
        assert_eq!(results[1].0, far);
    }
}
