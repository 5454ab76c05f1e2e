//! Native value types exchanged with WrenDB.
//!
//! These are the driver-side counterparts of the server's extended wire
//! types. Plain JSON scalars, arrays, and objects pass through untouched;
//! refs, set refs, timestamps, dates, byte blobs, and query literals have
//! a reserved tagged form on the wire (see [`crate::wire`]).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};

/// A reference to a document or collection, e.g. `users/123`.
///
/// A thin wrapper around a path string. Query functions that expect a ref
/// will not accept a bare string; wrap it so the server sees a `@ref`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ref {
  path: String,
}

impl Ref {
  /// Build a ref from a full path, such as `Ref::new("collections/users")`.
  pub fn new(path: impl Into<String>) -> Self {
    Self { path: path.into() }
  }

  /// Build a ref from a collection path and a document id.
  pub fn instance(collection: impl Into<String>, id: impl std::fmt::Display) -> Self {
    Self {
      path: format!("{}/{}", collection.into(), id),
    }
  }

  /// The collection part of the path: `Ref::instance("users", 1).collection()`
  /// is `users`.
  pub fn collection(&self) -> &str {
    match self.path.rfind('/') {
      Some(idx) => &self.path[..idx],
      None => &self.path,
    }
  }

  /// Everything after the last `/`, typically the document id.
  pub fn id(&self) -> &str {
    match self.path.rfind('/') {
      Some(idx) => &self.path[idx + 1..],
      None => &self.path,
    }
  }

  pub fn path(&self) -> &str {
    &self.path
  }
}

impl std::fmt::Display for Ref {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.path)
  }
}

/// An opaque handle to a server-side set, carried as `@set` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct SetRef {
  pub parameters: BTreeMap<String, Value>,
}

impl SetRef {
  pub fn new(parameters: BTreeMap<String, Value>) -> Self {
    Self { parameters }
  }
}

/// A driver-native runtime value.
///
/// The result of every query decodes into one of these. `Object` keys are
/// ordered so values compare deterministically.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Bool(bool),
  Int(i64),
  Double(f64),
  String(String),
  Array(Vec<Value>),
  Object(BTreeMap<String, Value>),
  Ref(Ref),
  SetRef(SetRef),
  Timestamp(DateTime<Utc>),
  Date(NaiveDate),
  Bytes(Vec<u8>),
  /// An unevaluated query expression, as returned by the server for stored
  /// functions. Held in its raw wire form.
  Query(serde_json::Value),
}

impl Value {
  pub fn object(entries: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
    Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Value::Int(i) => Some(*i),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Value::String(s) => Some(s),
      _ => None,
    }
  }

  pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
    match self {
      Value::Object(m) => Some(m),
      _ => None,
    }
  }

  pub fn as_array(&self) -> Option<&[Value]> {
    match self {
      Value::Array(a) => Some(a),
      _ => None,
    }
  }

  /// Fetch a field of an object value, `None` for anything else.
  pub fn get(&self, key: &str) -> Option<&Value> {
    self.as_object().and_then(|m| m.get(key))
  }
}

impl From<bool> for Value {
  fn from(v: bool) -> Self {
    Value::Bool(v)
  }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self {
    Value::Int(v)
  }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self {
    Value::Int(v as i64)
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self {
    Value::Double(v)
  }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self {
    Value::String(v.to_string())
  }
}

impl From<String> for Value {
  fn from(v: String) -> Self {
    Value::String(v)
  }
}

impl From<Ref> for Value {
  fn from(v: Ref) -> Self {
    Value::Ref(v)
  }
}

impl From<SetRef> for Value {
  fn from(v: SetRef) -> Self {
    Value::SetRef(v)
  }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self {
    Value::Timestamp(v)
  }
}

impl From<NaiveDate> for Value {
  fn from(v: NaiveDate) -> Self {
    Value::Date(v)
  }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
  fn from(v: Vec<T>) -> Self {
    Value::Array(v.into_iter().map(Into::into).collect())
  }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self {
    match v {
      Some(v) => v.into(),
      None => Value::Null,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ref_parts() {
    let r = Ref::instance("collections/users", 123);
    assert_eq!(r.path(), "collections/users/123");
    assert_eq!(r.collection(), "collections/users");
    assert_eq!(r.id(), "123");
  }

  #[test]
  fn test_ref_without_slash() {
    let r = Ref::new("users");
    assert_eq!(r.collection(), "users");
    assert_eq!(r.id(), "users");
  }

  #[test]
  fn test_value_accessors() {
    let v = Value::object([("a", Value::Int(1)), ("b", Value::String("x".into()))]);
    assert_eq!(v.get("a").and_then(Value::as_i64), Some(1));
    assert_eq!(v.get("b").and_then(Value::as_str), Some("x"));
    assert!(v.get("c").is_none());
  }

  #[test]
  fn test_from_impls() {
    assert_eq!(Value::from(3i64), Value::Int(3));
    assert_eq!(Value::from("hi"), Value::String("hi".to_string()));
    assert_eq!(Value::from(vec![1i64, 2]), Value::Array(vec![Value::Int(1), Value::Int(2)]));
    assert_eq!(Value::from(None::<i64>), Value::Null);
  }
}
