//! Wire-format serialization.
//!
//! The wire form is plain JSON in which database-specific types appear as
//! single-key tagged objects: `{"@ref": "users/1"}`, `{"@ts": "..."}`,
//! `{"@bytes": "<base64>"}`, and so on. The tag keys are reserved; a user
//! object whose keys collide with one is escaped under `@obj` so decoding
//! can never misclassify it. `decode(encode(v))` returns `v` for every
//! representable native value.

use std::collections::BTreeMap;

use base64::Engine;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde_json::{json, Map};

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::values::{Ref, SetRef, Value};

/// Reserved single-key tags that mark extended types on the wire.
pub const RESERVED_TAGS: &[&str] = &["@ref", "@set", "@ts", "@date", "@bytes", "@query", "@obj"];

fn is_reserved(key: &str) -> bool {
  RESERVED_TAGS.contains(&key)
}

/// Lower a native value to its wire representation.
pub fn encode(value: &Value) -> serde_json::Value {
  match value {
    Value::Null => serde_json::Value::Null,
    Value::Bool(b) => json!(b),
    Value::Int(i) => json!(i),
    Value::Double(d) => json!(d),
    Value::String(s) => json!(s),
    Value::Array(items) => serde_json::Value::Array(items.iter().map(encode).collect()),
    Value::Object(map) => {
      let inner = encode_map(map);
      if map.keys().any(|k| is_reserved(k)) {
        // A genuine user object shadowing a reserved tag; escape it so the
        // decoder sees a plain object again.
        json!({ "@obj": inner })
      } else {
        serde_json::Value::Object(inner)
      }
    }
    Value::Ref(r) => json!({ "@ref": r.path() }),
    Value::SetRef(s) => json!({ "@set": encode_map(&s.parameters) }),
    Value::Timestamp(ts) => {
      json!({ "@ts": ts.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
    }
    Value::Date(d) => json!({ "@date": d.format("%Y-%m-%d").to_string() }),
    Value::Bytes(b) => {
      json!({ "@bytes": base64::engine::general_purpose::STANDARD.encode(b) })
    }
    Value::Query(q) => json!({ "@query": q }),
  }
}

fn encode_map(map: &BTreeMap<String, Value>) -> Map<String, serde_json::Value> {
  map.iter().map(|(k, v)| (k.clone(), encode(v))).collect()
}

/// Lower an expression tree to the wire form the query engine interprets.
///
/// A call serializes with the function name as the key and its arguments as
/// an ordered array; a single argument is inlined without the array, and
/// named parameters become sibling keys of the function name. Object
/// literals are wrapped as `{"object": {...}}` so user mappings are never
/// read as calls.
pub fn encode_expr(expr: &Expr) -> serde_json::Value {
  match expr {
    Expr::Literal(v) => encode(v),
    Expr::Array(items) => serde_json::Value::Array(items.iter().map(encode_expr).collect()),
    Expr::Object(map) => {
      let inner: Map<String, serde_json::Value> =
        map.iter().map(|(k, v)| (k.clone(), encode_expr(v))).collect();
      json!({ "object": inner })
    }
    Expr::Call { name, args, params } => {
      let lowered = if args.len() == 1 {
        encode_expr(&args[0])
      } else {
        serde_json::Value::Array(args.iter().map(encode_expr).collect())
      };
      let mut map = Map::new();
      map.insert(name.clone(), lowered);
      for (key, value) in params {
        map.insert(key.clone(), encode_expr(value));
      }
      serde_json::Value::Object(map)
    }
  }
}

/// Raise a wire value back into a native value.
///
/// Single-key objects carrying a reserved tag become the corresponding
/// extended type; `@obj` unwraps to the plain object it escaped; an object
/// with an unrecognized `@`-prefixed tag decodes as an ordinary mapping so
/// newer servers stay readable. A reserved tag mixed with other keys is
/// malformed and rejected.
pub fn decode(wire: serde_json::Value) -> Result<Value> {
  match wire {
    serde_json::Value::Null => Ok(Value::Null),
    serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
    serde_json::Value::Number(n) => {
      if let Some(i) = n.as_i64() {
        Ok(Value::Int(i))
      } else if n.is_f64() {
        Ok(Value::Double(n.as_f64().unwrap_or_default()))
      } else {
        // An integer wider than i64 would round through f64; reject it.
        Err(Error::Serialization(format!("unrepresentable number: {}", n)))
      }
    }
    serde_json::Value::String(s) => Ok(Value::String(s)),
    serde_json::Value::Array(items) => Ok(Value::Array(
      items.into_iter().map(decode).collect::<Result<_>>()?,
    )),
    serde_json::Value::Object(map) => decode_object(map),
  }
}

fn decode_object(map: Map<String, serde_json::Value>) -> Result<Value> {
  let reserved = map.keys().find(|k| is_reserved(k)).cloned();
  match reserved {
    Some(tag) if map.len() == 1 => {
      let mut map = map;
      let body = map.remove(&tag).unwrap_or(serde_json::Value::Null);
      decode_tagged(&tag, body)
    }
    Some(tag) => Err(Error::Serialization(format!(
      "reserved tag {} must appear alone",
      tag
    ))),
    None => decode_plain(map),
  }
}

fn decode_plain(map: Map<String, serde_json::Value>) -> Result<Value> {
  let mut out = BTreeMap::new();
  for (k, v) in map {
    out.insert(k, decode(v)?);
  }
  Ok(Value::Object(out))
}

fn decode_tagged(tag: &str, body: serde_json::Value) -> Result<Value> {
  match tag {
    "@ref" => match body {
      serde_json::Value::String(path) => Ok(Value::Ref(Ref::new(path))),
      other => Err(malformed(tag, &other)),
    },
    "@obj" => match body {
      serde_json::Value::Object(inner) => decode_plain(inner),
      other => Err(malformed(tag, &other)),
    },
    "@set" => match body {
      serde_json::Value::Object(inner) => match decode_plain(inner)? {
        Value::Object(parameters) => Ok(Value::SetRef(SetRef::new(parameters))),
        _ => unreachable!("decode_plain returns an object"),
      },
      other => Err(malformed(tag, &other)),
    },
    "@ts" => match body {
      serde_json::Value::String(s) => DateTime::parse_from_rfc3339(&s)
        .map(|ts| Value::Timestamp(ts.with_timezone(&Utc)))
        .map_err(|e| Error::Serialization(format!("bad @ts {:?}: {}", s, e))),
      other => Err(malformed(tag, &other)),
    },
    "@date" => match body {
      serde_json::Value::String(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map(Value::Date)
        .map_err(|e| Error::Serialization(format!("bad @date {:?}: {}", s, e))),
      other => Err(malformed(tag, &other)),
    },
    "@bytes" => match body {
      serde_json::Value::String(s) => base64::engine::general_purpose::STANDARD
        .decode(&s)
        .map(Value::Bytes)
        .map_err(|e| Error::Serialization(format!("bad @bytes: {}", e))),
      other => Err(malformed(tag, &other)),
    },
    "@query" => Ok(Value::Query(body)),
    _ => unreachable!("decode_tagged only called with reserved tags"),
  }
}

fn malformed(tag: &str, body: &serde_json::Value) -> Error {
  Error::Serialization(format!("malformed {} payload: {}", tag, body))
}
