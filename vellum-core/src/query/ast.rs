//! Query grammar AST. The grammar is a closed operator set
//! parsed directly out of a JSON query document -- no free-form expression
//! language.

use crate::error::{CResult, Error};
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Query {
    Eq(String, Value),
    Cmp(String, CmpOp, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    Exists(String, bool),
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Box<Query>),
    /// The empty query matches every document.
    MatchAll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// Parses a query document of the form `{field: value | {$op: value, ...}, $and: [...], ...}`.
pub fn parse(doc: &Value) -> CResult<Query> {
    let obj = match doc {
        Value::Object(o) => o,
        Value::Null => return Ok(Query::MatchAll),
        _ => return Err(Error::InvalidQuery("query must be a JSON object".into())),
    };
    if obj.is_empty() {
        return Ok(Query::MatchAll);
    }

    let mut conjuncts = Vec::new();
    for (key, value) in obj.iter() {
        conjuncts.push(parse_top_level(key, value)?);
    }
    if conjuncts.len() == 1 {
        Ok(conjuncts.into_iter().next().unwrap())
    } else {
        Ok(Query::And(conjuncts))
    }
}

fn parse_top_level(key: &str, value: &Value) -> CResult<Query> {
    match key {
        "$and" => Ok(Query::And(parse_query_list(value)?)),
        "$or" => Ok(Query::Or(parse_query_list(value)?)),
        "$not" => Ok(Query::Not(Box::new(parse(value)?))),
        field => parse_field_condition(field, value),
    }
}

fn parse_query_list(value: &Value) -> CResult<Vec<Query>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::InvalidQuery("$and/$or expects an array of queries".into()))?;
    items.iter().map(parse).collect()
}

fn parse_field_condition(field: &str, value: &Value) -> CResult<Query> {
    if let Value::Object(ops) = value {
        // Disambiguate an operator object from a literal object value: if
        // every key starts with '$', treat it as an operator bag.
        let is_operator_bag = !ops.is_empty() && ops.keys().all(|k| k.starts_with('$'));
        if is_operator_bag {
            let mut clauses = Vec::new();
            for (op, arg) in ops.iter() {
                clauses.push(parse_operator(field, op, arg)?);
            }
            return Ok(if clauses.len() == 1 {
                clauses.into_iter().next().unwrap()
            } else {
                Query::And(clauses)
            });
        }
    }
    Ok(Query::Eq(field.to_string(), value.clone()))
}

fn parse_operator(field: &str, op: &str, arg: &Value) -> CResult<Query> {
    match op {
        "$eq" => Ok(Query::Eq(field.to_string(), arg.clone())),
        "$ne" => Ok(Query::Cmp(field.to_string(), CmpOp::Ne, arg.clone())),
        "$gt" => Ok(Query::Cmp(field.to_string(), CmpOp::Gt, arg.clone())),
        "$gte" => Ok(Query::Cmp(field.to_string(), CmpOp::Gte, arg.clone())),
        "$lt" => Ok(Query::Cmp(field.to_string(), CmpOp::Lt, arg.clone())),
        "$lte" => Ok(Query::Cmp(field.to_string(), CmpOp::Lte, arg.clone())),
        "$in" => Ok(Query::In(field.to_string(), expect_array(arg)?)),
        "$nin" => Ok(Query::NotIn(field.to_string(), expect_array(arg)?)),
        "$exists" => {
            let b = match arg {
                Value::Bool(b) => *b,
                _ => return Err(Error::InvalidQuery("$exists expects a boolean".into())),
            };
            Ok(Query::Exists(field.to_string(), b))
        }
        other => Err(Error::InvalidQuery(format!("unknown operator {other}"))),
    }
}

fn expect_array(v: &Value) -> CResult<Vec<Value>> {
    v.as_array()
        .map(|s| s.to_vec())
        .ok_or_else(|| Error::InvalidQuery("$in/$nin expects an array".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn q(j: serde_json::Value) -> Query {
        parse(&Value::from(j)).unwrap()
    }

    #[test]
    fn bare_equality() {
        assert_eq!(q(json!({"a": 1})), Query::Eq("a".into(), Value::Int(1)));
    }

    #[test]
    fn comparison_operator() {
        assert_eq!(q(json!({"a": {"$gt": 5}})), Query::Cmp("a".into(), CmpOp::Gt, Value::Int(5)));
    }

    #[test]
    fn and_or_not() {
        let parsed = q(json!({"$and": [{"a": 1}, {"b": 2}]}));
        assert!(matches!(parsed, Query::And(v) if v.len() == 2));
    }

    #[test]
    fn empty_query_matches_all() {
        assert_eq!(q(json!({})), Query::MatchAll);
    }
}
