//! Dynamic value model shared by assertions, lock keys, and snapshots.

use indexmap::IndexMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Shared list storage. `Arc` identity doubles as object identity.
pub type ListRef = Arc<RwLock<Vec<Value>>>;

/// Shared map storage; insertion order is preserved.
pub type MapRef = Arc<RwLock<IndexMap<String, Value>>>;

/// A dynamically typed value the runtime asserts over.
///
/// Lists and maps are shared references, so cyclic structures are
/// representable. The equality helpers below track container identity to
/// stay terminating on cycles.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(ListRef),
    Map(MapRef),
}

impl Value {
    /// Create a string value.
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Create a list value with fresh shared storage.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items.into_iter().collect())))
    }

    /// Create a map value with fresh shared storage.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(Arc::new(RwLock::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

/// Same-value semantics: `NaN` equals `NaN`, `+0` and `-0` are distinct,
/// containers compare by identity rather than by structure.
pub fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => {
            if x.is_nan() && y.is_nan() {
                true
            } else {
                x.to_bits() == y.to_bits()
            }
        }
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(x), Value::List(y)) => Arc::ptr_eq(x, y),
        (Value::Map(x), Value::Map(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

/// Structural equality over nested containers.
///
/// A pair of containers already under comparison higher up the stack is
/// treated as equal, which makes cyclic structures terminate.
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    deep_eq(a, b, &mut Vec::new())
}

fn deep_eq(a: &Value, b: &Value, in_progress: &mut Vec<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::List(x), Value::List(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let pair = (Arc::as_ptr(x) as usize, Arc::as_ptr(y) as usize);
            if in_progress.contains(&pair) {
                return true;
            }
            in_progress.push(pair);
            let xs = x.read();
            let ys = y.read();
            let eq = xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(u, v)| deep_eq(u, v, in_progress));
            in_progress.pop();
            eq
        }
        (Value::Map(x), Value::Map(y)) => {
            if Arc::ptr_eq(x, y) {
                return true;
            }
            let pair = (Arc::as_ptr(x) as usize, Arc::as_ptr(y) as usize);
            if in_progress.contains(&pair) {
                return true;
            }
            in_progress.push(pair);
            let xs = x.read();
            let ys = y.read();
            let eq = xs.len() == ys.len()
                && xs.iter().all(|(k, u)| match ys.get(k) {
                    Some(v) => deep_eq(u, v, in_progress),
                    None => false,
                });
            in_progress.pop();
            eq
        }
        _ => same_value(a, b),
    }
}

/// Canonical string form of a value.
///
/// Structurally equal values always render to the same string: map keys
/// are sorted, floats render with their shortest round-trip form, and a
/// container revisited while still being rendered becomes a back-reference
/// (`@<depth>`). This string is the cross-process lock key and the stored
/// snapshot payload.
pub fn canonical(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut Vec::new(), &mut out);
    out
}

fn write_canonical(value: &Value, stack: &mut Vec<usize>, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => out.push_str(&i.to_string()),
        Value::Float(f) => {
            if f.is_nan() {
                out.push_str("nan");
            } else {
                out.push_str(&format!("{f:?}"));
            }
        }
        Value::Str(s) => push_escaped(s, out),
        Value::List(items) => {
            let id = Arc::as_ptr(items) as usize;
            if let Some(depth) = stack.iter().position(|&p| p == id) {
                out.push('@');
                out.push_str(&depth.to_string());
                return;
            }
            stack.push(id);
            out.push('[');
            let items = items.read();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, stack, out);
            }
            out.push(']');
            stack.pop();
        }
        Value::Map(entries) => {
            let id = Arc::as_ptr(entries) as usize;
            if let Some(depth) = stack.iter().position(|&p| p == id) {
                out.push('@');
                out.push_str(&depth.to_string());
                return;
            }
            stack.push(id);
            out.push('{');
            let entries = entries.read();
            let mut pairs: Vec<(&String, &Value)> = entries.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            for (i, (key, item)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_escaped(key, out);
                out.push(':');
                write_canonical(item, stack, out);
            }
            out.push('}');
            stack.pop();
        }
    }
}

fn push_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&canonical(self))
    }
}
