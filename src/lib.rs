//! WrenDB Rust Client SDK
//!
//! An HTTP client for WrenDB, a schema-flexible document database. Queries
//! are built as expression trees, serialized to the server's tagged JSON
//! wire format, and submitted with bounded retries; document changes can be
//! followed through a live stream subscription.
//!
//! # Example
//!
//! ```no_run
//! use wrendb::{Client, ClientOptions, Expr, query};
//! use wrendb::values::Ref;
//!
//! #[tokio::main]
//! async fn main() -> wrendb::Result<()> {
//!     // Connect to WrenDB
//!     let client = Client::new(
//!         ClientOptions::new("db.wrendb.example").with_secret("my-secret"),
//!     )?;
//!
//!     // Create a document
//!     let doc = client.query(&query::create(
//!         Expr::literal(Ref::new("collections/users")),
//!         Expr::object([("data", Expr::object([("name", Expr::literal("Alice"))]))]),
//!     )).await?;
//!
//!     println!("Created: {:?}", doc);
//!
//!     // Read it back
//!     if let Some(wrendb::values::Value::Ref(user)) = doc.get("ref").cloned() {
//!         let fetched = client.query(&query::get(Expr::literal(user))).await?;
//!         println!("Fetched: {:?}", fetched);
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod expr;
mod page;
pub mod query;
mod stream;
pub mod values;
pub mod wire;

pub use client::{Client, ClientOptions, Metrics, Observer, QueryOptions, Scheme, DRIVER_IDENT};
pub use error::{Error, ErrorDetail, Result, ValidationFailure};
pub use expr::Expr;
pub use page::{Page, SetPager};
pub use query::PaginateOptions;
pub use stream::{
  StartEvent, StreamErrorEvent, StreamEvent, StreamField, StreamHandle, StreamHandlers,
  StreamOptions, Subscription, VersionEvent,
};
pub use values::{Ref, SetRef, Value};
