//! Lazy pagination over set queries.
//!
//! A `paginate` result is one window of a set: a `data` array plus opaque
//! `before`/`after` cursors. [`SetPager`] walks those windows on demand,
//! issuing one query per page through the client's ordinary execution
//! engine, so retry policy and transaction tracking apply to each fetch.

use crate::client::Client;
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::query::{self, PaginateOptions};
use crate::values::Value;

/// One decoded `paginate` result.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
  pub data: Vec<Value>,
  /// Cursor for the window preceding this one, if any.
  pub before: Option<Value>,
  /// Cursor for the window following this one, if any.
  pub after: Option<Value>,
}

impl Page {
  /// Read a page out of a decoded `paginate` result.
  pub fn from_value(value: Value) -> Result<Self> {
    let Value::Object(mut map) = value else {
      return Err(Error::Serialization(format!(
        "page result is not an object: {:?}",
        value
      )));
    };
    let data = match map.remove("data") {
      Some(Value::Array(items)) => items,
      _ => {
        return Err(Error::Serialization(
          "page result missing \"data\" array".to_string(),
        ))
      }
    };
    Ok(Self {
      data,
      before: map.remove("before"),
      after: map.remove("after"),
    })
  }

  /// Apply `f` to every element, keeping the cursors.
  pub fn map_data(self, f: impl FnMut(Value) -> Value) -> Self {
    Self {
      data: self.data.into_iter().map(f).collect(),
      before: self.before,
      after: self.after,
    }
  }
}

/// Walks every page of a set query, following `after` cursors forward.
///
/// Built by [`Client::paginate`]. Nothing is fetched until [`next_page`]
/// is called.
///
/// [`next_page`]: SetPager::next_page
#[derive(Debug)]
pub struct SetPager {
  client: Client,
  set: Expr,
  size: Option<i64>,
  cursor: Option<Value>,
  done: bool,
}

impl Client {
  /// Page through the set named by `set`, one `paginate` query per page.
  ///
  /// `options.size` sets the window size and `options.after` seeds the
  /// walk; iteration always proceeds forward from there.
  pub fn paginate(&self, set: &Expr, options: PaginateOptions) -> SetPager {
    SetPager {
      client: self.clone(),
      set: set.clone(),
      size: options.size,
      cursor: options.after,
      done: false,
    }
  }
}

impl SetPager {
  /// Fetch the next page, or `None` once the final page has been seen.
  pub async fn next_page(&mut self) -> Result<Option<Page>> {
    if self.done {
      return Ok(None);
    }
    let options = PaginateOptions {
      size: self.size,
      after: self.cursor.take(),
      before: None,
    };
    let result = self
      .client
      .query(&query::paginate_with(self.set.clone(), &options))
      .await?;
    let page = Page::from_value(result)?;
    match &page.after {
      Some(cursor) => self.cursor = Some(cursor.clone()),
      None => self.done = true,
    }
    Ok(Some(page))
  }

  /// Drain every remaining page into a flat list of elements.
  pub async fn flatten(mut self) -> Result<Vec<Value>> {
    let mut items = Vec::new();
    while let Some(page) = self.next_page().await? {
      items.extend(page.data);
    }
    Ok(items)
  }
}
