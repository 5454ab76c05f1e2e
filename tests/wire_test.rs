//! Wire-format round-trip tests through the public API.

use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use wrendb::wire::{decode, encode, encode_expr};
use wrendb::{query, Expr, Ref, SetRef, Value};

#[test]
fn test_roundtrip_deeply_nested() {
  let value = Value::object([
    ("name", Value::String("Taran".into())),
    ("age", Value::Int(19)),
    ("score", Value::Double(0.5)),
    ("tags", Value::from(vec!["a", "b"])),
    (
      "profile",
      Value::object([
        ("ref", Value::Ref(Ref::instance("collections/users", 7))),
        (
          "joined",
          Value::Timestamp(Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap()),
        ),
        ("birthday", Value::Date(NaiveDate::from_ymd_opt(2004, 6, 1).unwrap())),
        ("avatar", Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef])),
        (
          "feed",
          Value::SetRef(SetRef::new(
            [(
              "match".to_string(),
              Value::Ref(Ref::new("indexes/posts_by_user")),
            )]
            .into(),
          )),
        ),
        ("stored_fn", Value::Query(json!({"lambda": "x", "expr": {"var": "x"}}))),
      ]),
    ),
    ("missing", Value::Null),
  ]);

  assert_eq!(decode(encode(&value)).unwrap(), value);
}

#[test]
fn test_roundtrip_every_extended_type_in_arrays() {
  let value = Value::Array(vec![
    Value::Ref(Ref::new("collections/users")),
    Value::Timestamp(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 1).unwrap()),
    Value::Date(NaiveDate::from_ymd_opt(1970, 1, 1).unwrap()),
    Value::Bytes(Vec::new()),
    Value::Query(json!({"add": [1, 2]})),
    Value::Array(vec![Value::Array(vec![Value::Int(1)])]),
  ]);
  assert_eq!(decode(encode(&value)).unwrap(), value);
}

#[test]
fn test_reserved_key_objects_survive_roundtrip() {
  for tag in ["@ref", "@set", "@ts", "@date", "@bytes", "@query", "@obj"] {
    let sneaky = Value::object([(tag, Value::String("just a key".into()))]);
    let wire = encode(&sneaky);
    assert_eq!(
      decode(wire).unwrap(),
      sneaky,
      "tag {} was misclassified",
      tag
    );
  }
}

#[test]
fn test_wire_shape_of_composed_query() {
  let expr = query::map(
    query::lambda("x", query::add(vec![query::var("x"), Expr::literal(1)])),
    Expr::array([Expr::literal(1), Expr::literal(2), Expr::literal(3)]),
  );
  assert_eq!(
    encode_expr(&expr),
    json!({"map": [
      {"lambda": ["x", {"add": [{"var": "x"}, 1]}]},
      [1, 2, 3]
    ]})
  );
}

#[test]
fn test_expression_literals_use_value_encoding() {
  let expr = query::create(
    Expr::literal(Ref::new("collections/events")),
    Expr::object([(
      "data",
      Expr::object([(
        "at",
        Expr::literal(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
      )]),
    )]),
  );
  let wire = encode_expr(&expr);
  assert_eq!(wire["create"][0], json!({"@ref": "collections/events"}));
  assert_eq!(
    wire["create"][1]["object"]["data"]["object"]["at"],
    json!({"@ts": "2024-01-01T00:00:00Z"})
  );
}

#[test]
fn test_decode_of_server_style_response() {
  let body = json!({
    "ref": {"@ref": "collections/users/42"},
    "ts": 1_700_000_000_000_000i64,
    "data": {"name": "Eilonwy", "@weird": true}
  });
  let decoded = decode(body).unwrap();
  assert!(matches!(decoded.get("ref"), Some(Value::Ref(r)) if r.id() == "42"));
  assert_eq!(decoded.get("ts").and_then(Value::as_i64), Some(1_700_000_000_000_000));
  // Unreserved @-keys pass through untouched.
  assert_eq!(
    decoded.get("data").and_then(|d| d.get("@weird")),
    Some(&Value::Bool(true))
  );
}
