//! Residual filter evaluator: tests one document against the full query,
//! regardless of what an index candidate scan may have overapproximated.

use super::ast::{CmpOp, Query};
use crate::value::Value;

pub fn matches(query: &Query, doc: &Value) -> bool {
    match query {
        Query::MatchAll => true,
        Query::Eq(field, expected) => doc.get_path(field).map(|v| v == expected).unwrap_or(false),
        Query::Cmp(field, op, expected) => match doc.get_path(field) {
            Some(actual) => compare(op, actual, expected),
            None => false,
        },
        Query::In(field, options) => {
            doc.get_path(field).map(|v| options.iter().any(|o| o == v)).unwrap_or(false)
        }
        Query::NotIn(field, options) => {
            !doc.get_path(field).map(|v| options.iter().any(|o| o == v)).unwrap_or(false)
        }
        Query::Exists(field, want) => doc.get_path(field).is_some() == *want,
        Query::And(clauses) => clauses.iter().all(|c| matches(c, doc)),
        Query::Or(clauses) => clauses.iter().any(|c| matches(c, doc)),
        Query::Not(inner) => !matches(inner, doc),
    }
}

fn compare(op: &CmpOp, actual: &Value, expected: &Value) -> bool {
    match op {
        CmpOp::Ne => actual != expected,
        CmpOp::Gt => actual.partial_cmp(expected) == Some(std::cmp::Ordering::Greater),
        CmpOp::Gte => {
            matches!(actual.partial_cmp(expected), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))
        }
        CmpOp::Lt => actual.partial_cmp(expected) == Some(std::cmp::Ordering::Less),
        CmpOp::Lte => {
            matches!(actual.partial_cmp(expected), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::parse;
    use serde_json::json;

    fn doc(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn nested_field_equality() {
        let q = parse(&doc(json!({"a.b": 1}))).unwrap();
        assert!(matches(&q, &doc(json!({"a": {"b": 1}}))));
        assert!(!matches(&q, &doc(json!({"a": {"b": 2}}))));
    }

    #[test]
    fn numeric_cross_type_comparison() {
        let q = parse(&doc(json!({"a": {"$gte": 5}}))).unwrap();
        assert!(matches(&q, &doc(json!({"a": 5.0}))));
    }

    #[test]
    fn or_union_semantics() {
        let q = parse(&doc(json!({"$or": [{"a": 1}, {"a": 2}]}))).unwrap();
        assert!(matches(&q, &doc(json!({"a": 2}))));
        assert!(!matches(&q, &doc(json!({"a": 3}))));
    }
}
