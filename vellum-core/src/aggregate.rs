//! Aggregation pipeline: `$match`, `$group`, `$sort`, `$limit`, `$skip`,
//! `$project`, `$addFields`, `$unwind`. Execution is pull-based over an
//! in-memory `Vec<Value>` stream; `$group`/`$sort` are the two blocking
//! stages.

use crate::error::{CResult, Error};
use crate::query::{ast, eval};
use crate::value::{Object, Value};
use std::collections::HashMap;

/// Accumulator for one `$group` field expression. Mirrors the
/// accumulate/finalize/clone_empty shape used for SQL-style aggregates.
pub trait Accumulator: Send {
    fn accumulate(&mut self, value: &Value);
    fn finalize(&self) -> Value;
    fn clone_empty(&self) -> Box<dyn Accumulator>;
}

struct SumAcc {
    sum: f64,
    is_integer: bool,
}
impl Accumulator for SumAcc {
    fn accumulate(&mut self, v: &Value) {
        match v {
            Value::Int(i) => self.sum += *i as f64,
            Value::Float(f) => {
                self.sum += f;
                self.is_integer = false;
            }
            _ => {}
        }
    }
    fn finalize(&self) -> Value {
        numeric(self.sum, self.is_integer)
    }
    fn clone_empty(&self) -> Box<dyn Accumulator> {
        Box::new(SumAcc { sum: 0.0, is_integer: true })
    }
}

struct AvgAcc {
    sum: f64,
    count: i64,
}
impl Accumulator for AvgAcc {
    fn accumulate(&mut self, v: &Value) {
        if let Some(f) = v.as_f64() {
            self.sum += f;
            self.count += 1;
        }
    }
    fn finalize(&self) -> Value {
        if self.count == 0 {
            Value::Null
        } else {
            Value::Float(self.sum / self.count as f64)
        }
    }
    fn clone_empty(&self) -> Box<dyn Accumulator> {
        Box::new(AvgAcc { sum: 0.0, count: 0 })
    }
}

struct MinMaxAcc {
    best: Option<Value>,
    want_max: bool,
}
impl Accumulator for MinMaxAcc {
    fn accumulate(&mut self, v: &Value) {
        let better = match &self.best {
            None => true,
            Some(cur) => {
                let ord = v.partial_cmp(cur).unwrap_or(std::cmp::Ordering::Equal);
                if self.want_max { ord == std::cmp::Ordering::Greater } else { ord == std::cmp::Ordering::Less }
            }
        };
        if better {
            self.best = Some(v.clone());
        }
    }
    fn finalize(&self) -> Value {
        self.best.clone().unwrap_or(Value::Null)
    }
    fn clone_empty(&self) -> Box<dyn Accumulator> {
        Box::new(MinMaxAcc { best: None, want_max: self.want_max })
    }
}

struct CountAcc {
    count: i64,
}
impl Accumulator for CountAcc {
    fn accumulate(&mut self, _v: &Value) {
        self.count += 1;
    }
    fn finalize(&self) -> Value {
        Value::Int(self.count)
    }
    fn clone_empty(&self) -> Box<dyn Accumulator> {
        Box::new(CountAcc { count: 0 })
    }
}

fn numeric(sum: f64, is_integer: bool) -> Value {
    if is_integer && sum.fract() == 0.0 {
        Value::Int(sum as i64)
    } else {
        Value::Float(sum)
    }
}

/// Runs a pipeline (a JSON array of single-key stage documents) over
/// `input`, returning the final document stream.
pub fn run(input: Vec<Value>, pipeline: &[Value]) -> CResult<Vec<Value>> {
    let mut stream = input;
    for stage in pipeline {
        stream = run_stage(stream, stage)?;
    }
    Ok(stream)
}

fn run_stage(input: Vec<Value>, stage: &Value) -> CResult<Vec<Value>> {
    let obj = stage
        .as_object()
        .ok_or_else(|| Error::InvalidQuery("pipeline stage must be an object".into()))?;
    if obj.len() != 1 {
        return Err(Error::InvalidQuery("pipeline stage must have exactly one key".into()));
    }
    let (name, arg) = obj.iter().next().unwrap();
    match name.as_str() {
        "$match" => {
            let q = ast::parse(arg)?;
            Ok(input.into_iter().filter(|d| eval::matches(&q, d)).collect())
        }
        "$group" => run_group(input, arg),
        "$sort" => Ok(run_sort(input, arg)?),
        "$limit" => {
            let n = expect_usize(arg, "$limit")?;
            Ok(input.into_iter().take(n).collect())
        }
        "$skip" => {
            let n = expect_usize(arg, "$skip")?;
            Ok(input.into_iter().skip(n).collect())
        }
        "$project" => run_project(input, arg),
        "$addFields" => run_add_fields(input, arg),
        "$unwind" => run_unwind(input, arg),
        "$count" => {
            let field = arg
                .as_str()
                .ok_or_else(|| Error::InvalidQuery("{$count: name} expects a string".into()))?;
            let mut obj = Object::new();
            obj.insert(field, Value::Int(input.len() as i64));
            Ok(vec![Value::Object(obj)])
        }
        other => Err(Error::InvalidQuery(format!("unknown pipeline stage {other}"))),
    }
}

fn expect_usize(v: &Value, stage: &str) -> CResult<usize> {
    match v {
        Value::Int(i) if *i >= 0 => Ok(*i as usize),
        _ => Err(Error::InvalidQuery(format!("{stage} expects a non-negative integer"))),
    }
}

fn group_key_expr(doc: &Value, expr: &Value) -> Value {
    match expr {
        Value::String(s) if s.starts_with('$') => {
            doc.get_path(&s[1..]).cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}

fn make_accumulator(spec: &Value) -> CResult<(String, Box<dyn Accumulator>)> {
    let obj = spec
        .as_object()
        .ok_or_else(|| Error::InvalidQuery("group field spec must be an object".into()))?;
    if obj.len() != 1 {
        return Err(Error::InvalidQuery("group field spec must have one accumulator key".into()));
    }
    let (op, field_ref) = obj.iter().next().unwrap();
    let field = field_ref.as_str().map(|s| s.trim_start_matches('$').to_string());
    let acc: Box<dyn Accumulator> = match op.as_str() {
        "$sum" => Box::new(SumAcc { sum: 0.0, is_integer: true }),
        "$avg" => Box::new(AvgAcc { sum: 0.0, count: 0 }),
        "$min" => Box::new(MinMaxAcc { best: None, want_max: false }),
        "$max" => Box::new(MinMaxAcc { best: None, want_max: true }),
        "$count" => Box::new(CountAcc { count: 0 }),
        other => return Err(Error::InvalidQuery(format!("unknown accumulator {other}"))),
    };
    Ok((field.unwrap_or_default(), acc))
}

fn run_group(input: Vec<Value>, arg: &Value) -> CResult<Vec<Value>> {
    let obj = arg.as_object().ok_or_else(|| Error::InvalidQuery("$group expects an object".into()))?;
    let id_expr = obj.get("_id").cloned().unwrap_or(Value::Null);

    let mut field_templates: Vec<(String, Box<dyn Accumulator>, String)> = Vec::new();
    for (key, spec) in obj.iter() {
        if key == "_id" {
            continue;
        }
        let (source_field, acc) = make_accumulator(spec)?;
        field_templates.push((key.clone(), acc, source_field));
    }

    struct Bucket {
        key: Value,
        accs: Vec<(String, Box<dyn Accumulator>)>,
    }

    let mut buckets: Vec<Bucket> = Vec::new();
    let mut index_of: HashMap<crate::value::SortKey, usize> = HashMap::new();

    for doc in &input {
        let key = group_key_expr(doc, &id_expr);
        let sk = crate::value::SortKey::from_value(&key);
        let idx = *index_of.entry(sk).or_insert_with(|| {
            let accs = field_templates
                .iter()
                .map(|(name, acc, _)| (name.clone(), acc.clone_empty()))
                .collect();
            buckets.push(Bucket { key: key.clone(), accs });
            buckets.len() - 1
        });
        for (i, (_, _, source_field)) in field_templates.iter().enumerate() {
            let value = if source_field.is_empty() {
                Value::Null
            } else {
                doc.get_path(source_field).cloned().unwrap_or(Value::Null)
            };
            buckets[idx].accs[i].1.accumulate(&value);
        }
    }

    let mut out = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let mut obj = Object::new();
        obj.insert("_id", bucket.key);
        for (name, acc) in bucket.accs {
            obj.insert(name, acc.finalize());
        }
        out.push(Value::Object(obj));
    }
    Ok(out)
}

fn run_sort(mut input: Vec<Value>, arg: &Value) -> CResult<Vec<Value>> {
    let obj = arg.as_object().ok_or_else(|| Error::InvalidQuery("$sort expects an object".into()))?;
    let keys: Vec<(String, bool)> = obj
        .iter()
        .map(|(k, v)| {
            let descending = matches!(v, Value::Int(n) if *n < 0);
            (k.clone(), descending)
        })
        .collect();
    input.sort_by(|a, b| {
        for (field, desc) in &keys {
            let av = a.get_path(field);
            let bv = b.get_path(field);
            let ord = av.partial_cmp(&bv).unwrap_or(std::cmp::Ordering::Equal);
            let ord = if *desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
    Ok(input)
}

fn run_project(input: Vec<Value>, arg: &Value) -> CResult<Vec<Value>> {
    let obj = arg.as_object().ok_or_else(|| Error::InvalidQuery("$project expects an object".into()))?;
    let include = obj.iter().any(|(k, v)| k != "_id" && truthy(v));
    let exclude = obj.iter().any(|(k, v)| k != "_id" && !truthy(v));
    if include && exclude {
        return Err(Error::InvalidQuery("$project cannot mix inclusion and exclusion".into()));
    }

    Ok(input
        .into_iter()
        .map(|doc| {
            let mut out = Object::new();
            if include {
                for (field, spec) in obj.iter() {
                    if field == "_id" {
                        continue;
                    }
                    if truthy(spec) {
                        if let Some(v) = doc.get_path(field) {
                            out.insert(field.clone(), v.clone());
                        }
                    }
                }
                if obj.get("_id").map(truthy).unwrap_or(true) {
                    if let Some(id) = doc.get_path("_id") {
                        out.insert("_id", id.clone());
                    }
                }
            } else if let Some(source) = doc.as_object() {
                for (field, value) in source.iter() {
                    let excluded = obj.get(field).map(|v| !truthy(v)).unwrap_or(false);
                    if !excluded {
                        out.insert(field.clone(), value.clone());
                    }
                }
            }
            Value::Object(out)
        })
        .collect())
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        _ => true,
    }
}

fn run_add_fields(input: Vec<Value>, arg: &Value) -> CResult<Vec<Value>> {
    let obj = arg.as_object().ok_or_else(|| Error::InvalidQuery("$addFields expects an object".into()))?;
    Ok(input
        .into_iter()
        .map(|mut doc| {
            for (field, expr) in obj.iter() {
                let value = eval_expr(&doc, expr);
                doc.set_path(field, value);
            }
            doc
        })
        .collect())
}

fn eval_expr(doc: &Value, expr: &Value) -> Value {
    match expr {
        Value::String(s) if s.starts_with('$') => doc.get_path(&s[1..]).cloned().unwrap_or(Value::Null),
        Value::Object(obj) if obj.len() == 1 => {
            let (op, arg) = obj.iter().next().unwrap();
            let operands: Vec<Value> = match arg {
                Value::Array(items) => items.iter().map(|e| eval_expr(doc, e)).collect(),
                other => vec![eval_expr(doc, other)],
            };
            match op.as_str() {
                "$sum" => numeric(operands.iter().filter_map(|v| v.as_f64()).sum(), true),
                "$multiply" => {
                    numeric(operands.iter().filter_map(|v| v.as_f64()).product(), true)
                }
                "$avg" => {
                    let nums: Vec<f64> = operands.iter().filter_map(|v| v.as_f64()).collect();
                    if nums.is_empty() {
                        Value::Null
                    } else {
                        Value::Float(nums.iter().sum::<f64>() / nums.len() as f64)
                    }
                }
                _ => Value::Null,
            }
        }
        other => other.clone(),
    }
}

fn run_unwind(input: Vec<Value>, arg: &Value) -> CResult<Vec<Value>> {
    let (field, preserve_empty) = match arg {
        Value::String(s) => (s.trim_start_matches('$').to_string(), false),
        Value::Object(obj) => {
            let path = obj
                .get("path")
                .and_then(|v| v.as_str())
                .map(|s| s.trim_start_matches('$').to_string())
                .ok_or_else(|| Error::InvalidQuery("$unwind object form requires a path".into()))?;
            let preserve = obj
                .get("preserveNullAndEmptyArrays")
                .map(truthy)
                .unwrap_or(false);
            (path, preserve)
        }
        _ => return Err(Error::InvalidQuery("$unwind expects a field path or object".into())),
    };

    let mut out = Vec::new();
    for doc in input {
        match doc.get_path(&field) {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items.clone() {
                    let mut copy = doc.clone();
                    copy.set_path(&field, item);
                    out.push(copy);
                }
            }
            _ => {
                if preserve_empty {
                    out.push(doc);
                }
            }
        }
    }
    Ok(out)
}
