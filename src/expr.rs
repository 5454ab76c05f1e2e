//! Query expression trees.
//!
//! An [`Expr`] is an immutable tree built by the constructors in
//! [`crate::query`] (or directly, for functions the driver has no helper
//! for). Trees are fully owned, so they are acyclic by construction, and
//! nodes never change after they are built; cloning a subtree into several
//! queries is safe and cheap.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::values::Value;

/// One node of a query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  /// A literal scalar or extended value, passed through the value encoder.
  Literal(Value),
  /// A user-supplied mapping. Lowered as `{"object": {...}}` on the wire so
  /// it can never be mistaken for a function call.
  Object(BTreeMap<String, Expr>),
  /// An ordered sequence of expressions.
  Array(Vec<Expr>),
  /// A call to a named query function with ordered arguments. Some
  /// functions (currently `paginate`) also take named parameters, lowered
  /// as sibling keys of the function name.
  Call {
    name: String,
    args: Vec<Expr>,
    params: Vec<(String, Expr)>,
  },
}

impl Expr {
  /// A literal from any native-convertible value.
  pub fn literal(value: impl Into<Value>) -> Self {
    Expr::Literal(value.into())
  }

  pub fn null() -> Self {
    Expr::Literal(Value::Null)
  }

  /// An object literal from key/expression pairs.
  pub fn object(entries: impl IntoIterator<Item = (impl Into<String>, Expr)>) -> Self {
    Expr::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
  }

  pub fn array(items: impl IntoIterator<Item = Expr>) -> Self {
    Expr::Array(items.into_iter().collect())
  }

  /// A call node for an arbitrary query function.
  ///
  /// Argument arity and types are not checked here; the server is
  /// authoritative. An empty function name is rejected immediately.
  pub fn call(name: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Result<Self> {
    let name = name.into();
    if name.is_empty() {
      return Err(Error::InvalidExpression(
        "function name must not be empty".to_string(),
      ));
    }
    Ok(Expr::Call {
      name,
      args: args.into_iter().collect(),
      params: Vec::new(),
    })
  }

  /// Internal constructor for the leaf helpers in [`crate::query`], which
  /// only ever use static non-empty names.
  pub(crate) fn call_static(name: &'static str, args: Vec<Expr>) -> Self {
    debug_assert!(!name.is_empty());
    Expr::Call {
      name: name.to_string(),
      args,
      params: Vec::new(),
    }
  }

  /// Like [`call_static`], for the functions that carry named parameters.
  ///
  /// [`call_static`]: Expr::call_static
  pub(crate) fn call_static_params(
    name: &'static str,
    args: Vec<Expr>,
    params: Vec<(String, Expr)>,
  ) -> Self {
    debug_assert!(!name.is_empty());
    Expr::Call {
      name: name.to_string(),
      args,
      params,
    }
  }
}

impl<T: Into<Value>> From<T> for Expr {
  fn from(v: T) -> Self {
    Expr::Literal(v.into())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_call_rejects_empty_name() {
    let err = Expr::call("", [Expr::literal(1)]).unwrap_err();
    assert!(matches!(err, Error::InvalidExpression(_)));
  }

  #[test]
  fn test_call_accepts_any_arity() {
    let call = Expr::call("add", [Expr::literal(1), Expr::literal(2)]).unwrap();
    match call {
      Expr::Call { name, args, .. } => {
        assert_eq!(name, "add");
        assert_eq!(args.len(), 2);
      }
      other => panic!("expected call, got {:?}", other),
    }
  }

  #[test]
  fn test_subtree_sharing() {
    let shared = Expr::object([("n", Expr::literal(1))]);
    let a = Expr::call("create", [shared.clone()]).unwrap();
    let b = Expr::call("update", [shared.clone()]).unwrap();
    // Clones are structurally equal and independent.
    assert_ne!(a, b);
    assert_eq!(shared, Expr::object([("n", Expr::literal(1))]));
  }
}
