//! Leaf constructors for query expressions.
//!
//! Each function here is a pure constructor producing a [`Expr::Call`]
//! node; composing them builds the expression tree submitted by
//! [`crate::Client::query`]. This is a representative subset of the query
//! language surface; any function the driver has no helper for can be
//! reached through [`Expr::call`].
//!
//! # Example
//! ```
//! use wrendb::query;
//! use wrendb::Expr;
//!
//! let q = query::add(vec![Expr::literal(1), Expr::literal(2)]);
//! ```

use crate::expr::Expr;
use crate::values::Value;

// Basic forms

pub fn var(name: impl Into<String>) -> Expr {
  Expr::call_static("var", vec![Expr::literal(name.into())])
}

/// Bind variables for use (via [`var`]) inside `body`.
pub fn let_in(bindings: impl IntoIterator<Item = (impl Into<String>, Expr)>, body: Expr) -> Expr {
  Expr::call_static("let", vec![Expr::object(bindings), body])
}

pub fn if_then(condition: Expr, then: Expr, otherwise: Expr) -> Expr {
  Expr::call_static("if", vec![condition, then, otherwise])
}

/// Evaluate expressions in order, producing the last result.
pub fn do_(expressions: Vec<Expr>) -> Expr {
  Expr::call_static("do", expressions)
}

pub fn lambda(param: impl Into<String>, body: Expr) -> Expr {
  Expr::call_static("lambda", vec![Expr::literal(param.into()), body])
}

// Collection functions

pub fn map(function: Expr, collection: Expr) -> Expr {
  Expr::call_static("map", vec![function, collection])
}

pub fn foreach(function: Expr, collection: Expr) -> Expr {
  Expr::call_static("foreach", vec![function, collection])
}

// Read functions

pub fn get(reference: Expr) -> Expr {
  Expr::call_static("get", vec![reference])
}

pub fn paginate(set: Expr) -> Expr {
  Expr::call_static("paginate", vec![set])
}

/// Window and cursor parameters for [`paginate_with`]. Cursors are opaque
/// values taken from a previous page's `before`/`after` fields.
#[derive(Debug, Clone, Default)]
pub struct PaginateOptions {
  pub size: Option<i64>,
  pub after: Option<Value>,
  pub before: Option<Value>,
}

impl PaginateOptions {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_size(mut self, size: i64) -> Self {
    self.size = Some(size);
    self
  }

  pub fn with_after(mut self, cursor: impl Into<Value>) -> Self {
    self.after = Some(cursor.into());
    self
  }

  pub fn with_before(mut self, cursor: impl Into<Value>) -> Self {
    self.before = Some(cursor.into());
    self
  }
}

/// [`paginate`] with an explicit window size and/or cursor.
pub fn paginate_with(set: Expr, options: &PaginateOptions) -> Expr {
  let mut params = Vec::new();
  if let Some(size) = options.size {
    params.push(("size".to_string(), Expr::literal(size)));
  }
  if let Some(after) = &options.after {
    params.push(("after".to_string(), Expr::Literal(after.clone())));
  }
  if let Some(before) = &options.before {
    params.push(("before".to_string(), Expr::Literal(before.clone())));
  }
  Expr::call_static_params("paginate", vec![set], params)
}

pub fn exists(reference: Expr) -> Expr {
  Expr::call_static("exists", vec![reference])
}

// Write functions

pub fn create(collection: Expr, params: Expr) -> Expr {
  Expr::call_static("create", vec![collection, params])
}

pub fn update(reference: Expr, params: Expr) -> Expr {
  Expr::call_static("update", vec![reference, params])
}

pub fn replace(reference: Expr, params: Expr) -> Expr {
  Expr::call_static("replace", vec![reference, params])
}

pub fn delete(reference: Expr) -> Expr {
  Expr::call_static("delete", vec![reference])
}

// Set functions

pub fn match_index(index: Expr, terms: Vec<Expr>) -> Expr {
  let mut args = vec![index];
  args.extend(terms);
  Expr::call_static("match", args)
}

pub fn union(sets: Vec<Expr>) -> Expr {
  Expr::call_static("union", sets)
}

pub fn intersection(sets: Vec<Expr>) -> Expr {
  Expr::call_static("intersection", sets)
}

pub fn difference(sets: Vec<Expr>) -> Expr {
  Expr::call_static("difference", sets)
}

pub fn join(source: Expr, target: Expr) -> Expr {
  Expr::call_static("join", vec![source, target])
}

// Miscellaneous

pub fn select(path: Vec<Expr>, from: Expr) -> Expr {
  Expr::call_static("select", vec![Expr::array(path), from])
}

pub fn equals(values: Vec<Expr>) -> Expr {
  Expr::call_static("equals", values)
}

pub fn concat(strings: Vec<Expr>) -> Expr {
  Expr::call_static("concat", strings)
}

pub fn add(numbers: Vec<Expr>) -> Expr {
  Expr::call_static("add", numbers)
}

pub fn subtract(numbers: Vec<Expr>) -> Expr {
  Expr::call_static("subtract", numbers)
}

pub fn multiply(numbers: Vec<Expr>) -> Expr {
  Expr::call_static("multiply", numbers)
}

pub fn divide(numbers: Vec<Expr>) -> Expr {
  Expr::call_static("divide", numbers)
}
