//! Update operators: `$set`, `$unset`, `$inc`, `$push`, `$pull`, `$rename`.
//! Operator application produces a brand new document value; SIDX deltas
//! are derived separately by diffing old vs new on indexed fields (see
//! `collection::Collection::commit`).

use crate::error::{CResult, Error};
use crate::value::Value;

/// Applies an update document (e.g. `{"$set": {"a": 1}, "$inc": {"n": 1}}`)
/// to `doc`, returning the new document. `doc` is never mutated in place.
pub fn apply(doc: &Value, update: &Value) -> CResult<Value> {
    let ops = update
        .as_object()
        .ok_or_else(|| Error::InvalidQuery("update document must be a JSON object".into()))?;

    let mut result = doc.clone();
    for (op, args) in ops.iter() {
        let args = args
            .as_object()
            .ok_or_else(|| Error::InvalidQuery(format!("{op} expects an object of field: value")))?;
        match op.as_str() {
            "$set" => {
                for (field, value) in args.iter() {
                    result.set_path(field, value.clone());
                }
            }
            "$unset" => {
                for (field, _) in args.iter() {
                    result.remove_path(field);
                }
            }
            "$inc" => {
                for (field, delta) in args.iter() {
                    let delta = delta
                        .as_f64()
                        .ok_or_else(|| Error::InvalidQuery("$inc expects a numeric delta".into()))?;
                    let current = result.get_path(field).and_then(|v| v.as_f64()).unwrap_or(0.0);
                    let new_value = current + delta;
                    let is_int = matches!(result.get_path(field), None | Some(Value::Int(_)))
                        && delta_is_int(args.get(field));
                    result.set_path(
                        field,
                        if is_int { Value::Int(new_value as i64) } else { Value::Float(new_value) },
                    );
                }
            }
            "$push" => {
                for (field, value) in args.iter() {
                    let mut arr = match result.get_path(field) {
                        Some(Value::Array(a)) => a.clone(),
                        Some(_) => {
                            return Err(Error::InvalidQuery(format!(
                                "$push target {field} is not an array"
                            )))
                        }
                        None => Vec::new(),
                    };
                    arr.push(value.clone());
                    result.set_path(field, Value::Array(arr));
                }
            }
            "$pull" => {
                for (field, value) in args.iter() {
                    if let Some(Value::Array(a)) = result.get_path(field) {
                        let filtered: Vec<Value> =
                            a.iter().filter(|e| *e != value).cloned().collect();
                        result.set_path(field, Value::Array(filtered));
                    }
                }
            }
            "$rename" => {
                for (from, to) in args.iter() {
                    let Some(to) = to.as_str() else {
                        return Err(Error::InvalidQuery("$rename target must be a string".into()));
                    };
                    if let Some(value) = result.get_path(from).cloned() {
                        result.remove_path(from);
                        result.set_path(to, value);
                    }
                }
            }
            other => return Err(Error::InvalidQuery(format!("unknown update operator {other}"))),
        }
    }
    Ok(result)
}

fn delta_is_int(v: Option<&Value>) -> bool {
    matches!(v, Some(Value::Int(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn set_and_unset() {
        let doc = v(json!({"a": 1, "b": 2}));
        let out = apply(&doc, &v(json!({"$set": {"a": 10}, "$unset": {"b": ""}}))).unwrap();
        assert_eq!(out.get_path("a"), Some(&Value::Int(10)));
        assert!(out.get_path("b").is_none());
    }

    #[test]
    fn inc_preserves_integer_when_delta_is_integer() {
        let doc = v(json!({"n": 5}));
        let out = apply(&doc, &v(json!({"$inc": {"n": 3}}))).unwrap();
        assert_eq!(out.get_path("n"), Some(&Value::Int(8)));
    }

    #[test]
    fn push_appends_and_pull_removes_all_equal() {
        let doc = v(json!({"tags": ["a", "b", "a"]}));
        let out = apply(&doc, &v(json!({"$push": {"tags": "c"}}))).unwrap();
        assert_eq!(out.get_path("tags"), Some(&v(json!(["a", "b", "a", "c"]))));

        let out2 = apply(&out, &v(json!({"$pull": {"tags": "a"}}))).unwrap();
        assert_eq!(out2.get_path("tags"), Some(&v(json!(["b", "c"]))));
    }

    #[test]
    fn rename_moves_value() {
        let doc = v(json!({"old": 1}));
        let out = apply(&doc, &v(json!({"$rename": {"old": "new"}}))).unwrap();
        assert!(out.get_path("old").is_none());
        assert_eq!(out.get_path("new"), Some(&Value::Int(1)));
    }
}
