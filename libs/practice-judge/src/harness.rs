/// Test Harness - Argument Inference and Canonical Values
///
/// **Core Responsibility:**
/// Map a fixture's loosely-typed `input` onto the entry point's call
/// arguments, and reduce values to a canonical form for grading.
///
/// **Critical Properties:**
/// - Pure and deterministic: same input, same arguments
/// - Knows nothing about Docker or the runner protocol
/// - Total: canonicalization never fails, an unrepresentable value simply
///   has no canonical form and grades as unequal
///
/// **Argument Rules (first match wins):**
/// 1. Explicit parameter schema + record input: values in schema order
/// 2. Record with `nums` and `target` -> `[nums, target]`
/// 3. Record with `arr` -> `[arr]`
/// 4. Record with `s` -> `[s]`
/// 5. Record with `head` -> `[head]`
/// 6. Record with `root` -> `[root]`
/// 7. Sequence -> its elements, positionally
/// 8. Anything else -> `[input]`
///
/// Rules 2-8 are a closed heuristic; records with other key names fall
/// through to rule 8 and are passed as one opaque argument.
use serde_json::{Map, Value};

/// Keys recognized by the single-argument heuristic, in priority order
const SINGLE_ARG_KEYS: [&str; 4] = ["arr", "s", "head", "root"];

/// Build the ordered call arguments for one fixture input
pub fn build_args(input: &Value, parameters: Option<&[String]>) -> Vec<Value> {
    match (parameters, input) {
        (Some(names), Value::Object(record)) if !names.is_empty() => names
            .iter()
            .map(|name| record.get(name).cloned().unwrap_or(Value::Null))
            .collect(),
        _ => infer_args(input),
    }
}

/// Closed key-sniffing heuristic used when no schema is available
fn infer_args(input: &Value) -> Vec<Value> {
    match input {
        Value::Object(record) => {
            if let (Some(nums), Some(target)) = (record.get("nums"), record.get("target")) {
                return vec![nums.clone(), target.clone()];
            }
            SINGLE_ARG_KEYS
                .iter()
                .find_map(|key| record.get(*key))
                .map(|value| vec![value.clone()])
                .unwrap_or_else(|| vec![input.clone()])
        }
        Value::Array(items) => items.clone(),
        scalar => vec![scalar.clone()],
    }
}

/// What the entry point produced for one call
#[derive(Debug, Clone, PartialEq)]
pub enum ReturnValue {
    Value(Value),
    Undefined,
    /// Produced something JSON cannot carry (cycle, BigInt, function)
    Unserializable,
}

impl ReturnValue {
    /// The `actual` field as reported on the wire
    pub fn as_actual(&self) -> Option<Value> {
        match self {
            ReturnValue::Value(value) => Some(value.clone()),
            ReturnValue::Undefined | ReturnValue::Unserializable => None,
        }
    }
}

/// Canonical string form of a returned value.
///
/// `undefined` and `null` stay distinct; unserializable values have none.
pub fn canonical_form(value: &ReturnValue) -> Option<String> {
    match value {
        ReturnValue::Value(value) => Some(canonical_value(value)),
        ReturnValue::Undefined => Some("undefined".to_string()),
        ReturnValue::Unserializable => None,
    }
}

/// Canonical form of a JSON value: sorted keys, integral floats written as
/// integers, no whitespace.
pub fn canonical_value(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                out.push_str(&(f as i64).to_string())
            }
            _ => out.push_str(&n.to_string()),
        },
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(record) => write_record(record, out),
    }
}

fn write_record(record: &Map<String, Value>, out: &mut String) {
    let mut keys: Vec<&String> = record.keys().collect();
    keys.sort();

    out.push('{');
    for (idx, key) in keys.into_iter().enumerate() {
        if idx > 0 {
            out.push(',');
        }
        out.push_str(&Value::String(key.clone()).to_string());
        out.push(':');
        write_canonical(&record[key], out);
    }
    out.push('}');
}

/// Structural equality between what the entry point returned and the
/// fixture's expectation
pub fn values_match(actual: &ReturnValue, expected: &Value) -> bool {
    match canonical_form(actual) {
        Some(actual) => actual == canonical_value(expected),
        None => false,
    }
}
