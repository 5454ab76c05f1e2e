//! Basic example demonstrating WrenDB Rust SDK usage.

use std::time::Duration;

use wrendb::{query, Client, ClientOptions, Expr, Ref, Scheme, StreamHandlers, StreamOptions, Value};

#[tokio::main]
async fn main() -> wrendb::Result<()> {
  // Connect to a local WrenDB server
  let client = Client::new(
    ClientOptions::new("localhost")
      .with_scheme(Scheme::Http)
      .with_port(8443)
      .with_secret("secret")
      .with_timeout(Duration::from_secs(10)),
  )?;

  // Create a document
  let created = client
    .query(&query::create(
      Expr::literal(Ref::new("collections/users")),
      Expr::object([(
        "data",
        Expr::object([
          ("name", Expr::literal("Alice")),
          ("email", Expr::literal("alice@example.com")),
          ("active", Expr::literal(true)),
        ]),
      )]),
    ))
    .await?;
  println!("Created document: {:?}", created);

  let Some(Value::Ref(user)) = created.get("ref").cloned() else {
    return Ok(());
  };

  // Compute something server-side
  let sum = client
    .query(&query::add(vec![Expr::literal(1), Expr::literal(2)]))
    .await?;
  println!("1 + 2 = {:?}", sum);
  println!("Last seen txn: {:?}", client.last_txn_time());

  // Subscribe to changes on the document
  println!("\nSubscribing to document changes...");
  println!("(Update the document from another client to see events)");
  println!("Press Ctrl+C to exit.\n");

  let handlers = StreamHandlers::new()
    .on_start(|start| println!("Subscribed at txn {}", start.txn))
    .on_version(|version| println!("Version: {:?}", version.payload))
    .on_error(|err| println!("Stream error: {:?} {:?}", err.code, err.description));

  let mut sub = client.stream(
    &query::get(Expr::literal(user)),
    StreamOptions::default(),
    handlers,
  )?;
  let handle = sub.handle();
  tokio::spawn(async move {
    let _ = tokio::signal::ctrl_c().await;
    handle.close();
  });
  sub.start().await
}
