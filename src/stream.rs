//! Document change streaming.
//!
//! A [`Subscription`] holds one long-lived HTTP connection to the `/stream`
//! endpoint. The server writes newline-delimited JSON records; each record
//! decodes into a [`StreamEvent`] and is dispatched, in arrival order, to
//! the matching caller-supplied handler. The connection is owned by the
//! subscription alone and is never shared with the query pool.
//!
//! # Example
//! ```no_run
//! use wrendb::{Client, ClientOptions, Expr, query, StreamHandlers, StreamOptions};
//! use wrendb::values::Ref;
//!
//! #[tokio::main]
//! async fn main() -> wrendb::Result<()> {
//!   let client = Client::new(ClientOptions::new("db.wrendb.example").with_secret("secret"))?;
//!   let doc = query::get(Expr::literal(Ref::instance("collections/users", 1)));
//!   let handlers = StreamHandlers::new()
//!     .on_start(|start| println!("subscribed at txn {}", start.txn))
//!     .on_version(|version| println!("document changed: {:?}", version.payload));
//!   let mut sub = client.stream(&doc, StreamOptions::default(), handlers)?;
//!   let handle = sub.handle();
//!   tokio::spawn(async move {
//!     tokio::time::sleep(std::time::Duration::from_secs(30)).await;
//!     handle.close();
//!   });
//!   sub.start().await
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tokio::sync::Notify;

use crate::client::{Client, DRIVER_IDENT};
use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::values::Value;
use crate::wire;

/// Fields of a version event the server should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamField {
  Diff,
  Prev,
  Document,
  Action,
  Index,
}

impl StreamField {
  fn as_str(&self) -> &'static str {
    match self {
      StreamField::Diff => "diff",
      StreamField::Prev => "prev",
      StreamField::Document => "document",
      StreamField::Action => "action",
      StreamField::Index => "index",
    }
  }
}

/// Subscription configuration.
///
/// Reconnection limits are explicit: on a transport-level drop the driver
/// silently resubscribes, resuming from the last-seen transaction time, up
/// to `max_reconnect_attempts` consecutive times with doubling backoff. A
/// connection that delivers a document event (version or history rewrite)
/// restores the full budget, so the limit bounds back-to-back failed
/// resubscriptions rather than the drops a long-lived stream accumulates
/// over its lifetime; the `start` handshake alone does not count as
/// progress. Server-reported error events never trigger reconnection.
#[derive(Debug, Clone)]
pub struct StreamOptions {
  pub fields: Vec<StreamField>,
  pub max_reconnect_attempts: u32,
  pub reconnect_backoff: Duration,
  pub reconnect_backoff_cap: Duration,
}

impl Default for StreamOptions {
  fn default() -> Self {
    Self {
      fields: Vec::new(),
      max_reconnect_attempts: 3,
      reconnect_backoff: Duration::from_millis(500),
      reconnect_backoff_cap: Duration::from_secs(8),
    }
  }
}

/// First event on every stream; carries the subscription's starting
/// transaction time.
#[derive(Debug, Clone, PartialEq)]
pub struct StartEvent {
  pub txn: i64,
}

/// A change to the subscribed document, shaped by the requested fields.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionEvent {
  pub payload: Value,
  pub txn: Option<i64>,
}

/// A server-reported stream fault, or a terminal transport failure after
/// reconnection attempts are exhausted.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamErrorEvent {
  pub code: Option<String>,
  pub description: Option<String>,
}

/// One decoded record from the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
  Start(StartEvent),
  Version(VersionEvent),
  HistoryRewrite(VersionEvent),
  Error(StreamErrorEvent),
  /// An event type this driver version does not know. Logged and dropped.
  Unknown(serde_json::Value),
}

impl StreamEvent {
  /// Transaction time carried by this event, if any.
  pub fn txn(&self) -> Option<i64> {
    match self {
      StreamEvent::Start(e) => Some(e.txn),
      StreamEvent::Version(e) | StreamEvent::HistoryRewrite(e) => e.txn,
      _ => None,
    }
  }
}

/// Parse one newline-delimited record into a stream event.
pub(crate) fn parse_event(line: &str) -> Result<StreamEvent> {
  let parsed: serde_json::Value = serde_json::from_str(line)?;
  let event_type = parsed.get("type").and_then(|t| t.as_str());
  let txn = parsed.get("txn").and_then(|t| t.as_i64());

  match event_type {
    Some("start") => {
      let txn = txn
        .or_else(|| parsed.get("event").and_then(|e| e.as_i64()))
        .ok_or_else(|| Error::Serialization("start event missing txn".to_string()))?;
      Ok(StreamEvent::Start(StartEvent { txn }))
    }
    Some("version") => Ok(StreamEvent::Version(version_event(&parsed, txn)?)),
    Some("history_rewrite") => Ok(StreamEvent::HistoryRewrite(version_event(&parsed, txn)?)),
    Some("error") => Ok(StreamEvent::Error(error_event(&parsed))),
    None if parsed.get("errors").is_some() => Ok(StreamEvent::Error(error_event(&parsed))),
    _ => Ok(StreamEvent::Unknown(parsed)),
  }
}

fn version_event(parsed: &serde_json::Value, txn: Option<i64>) -> Result<VersionEvent> {
  let payload = match parsed.get("event") {
    Some(event) => wire::decode(event.clone())?,
    None => Value::Null,
  };
  Ok(VersionEvent { payload, txn })
}

fn error_event(parsed: &serde_json::Value) -> StreamErrorEvent {
  let body = parsed.get("event").unwrap_or(parsed);
  StreamErrorEvent {
    code: body.get("code").and_then(|c| c.as_str()).map(String::from),
    description: body
      .get("description")
      .and_then(|d| d.as_str())
      .map(String::from),
  }
}

type StartFn = Box<dyn FnMut(&StartEvent) + Send>;
type VersionFn = Box<dyn FnMut(&VersionEvent) + Send>;
type ErrorFn = Box<dyn FnMut(&StreamErrorEvent) + Send>;

/// Callbacks a subscription dispatches into. All are optional; an event
/// with no registered handler is logged at debug and dropped.
#[derive(Default)]
pub struct StreamHandlers {
  on_start: Option<StartFn>,
  on_version: Option<VersionFn>,
  on_history_rewrite: Option<VersionFn>,
  on_error: Option<ErrorFn>,
}

impl StreamHandlers {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn on_start(mut self, f: impl FnMut(&StartEvent) + Send + 'static) -> Self {
    self.on_start = Some(Box::new(f));
    self
  }

  pub fn on_version(mut self, f: impl FnMut(&VersionEvent) + Send + 'static) -> Self {
    self.on_version = Some(Box::new(f));
    self
  }

  pub fn on_history_rewrite(mut self, f: impl FnMut(&VersionEvent) + Send + 'static) -> Self {
    self.on_history_rewrite = Some(Box::new(f));
    self
  }

  pub fn on_error(mut self, f: impl FnMut(&StreamErrorEvent) + Send + 'static) -> Self {
    self.on_error = Some(Box::new(f));
    self
  }

  fn dispatch(&mut self, event: &StreamEvent) {
    match event {
      StreamEvent::Start(e) => call(&mut self.on_start, e),
      StreamEvent::Version(e) => call(&mut self.on_version, e),
      StreamEvent::HistoryRewrite(e) => call(&mut self.on_history_rewrite, e),
      StreamEvent::Error(e) => call(&mut self.on_error, e),
      StreamEvent::Unknown(raw) => {
        tracing::debug!(?raw, "dropping unknown stream event");
      }
    }
  }
}

fn call<E: std::fmt::Debug>(handler: &mut Option<Box<dyn FnMut(&E) + Send>>, event: &E) {
  match handler {
    Some(f) => f(event),
    None => tracing::debug!(?event, "unhandled stream event"),
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
  Idle,
  Connecting,
  Streaming,
  Closed,
}

/// Cancellation handle for a running subscription. Cloneable; `close` may
/// be called from any task and is idempotent.
#[derive(Clone)]
pub struct StreamHandle {
  closed: Arc<AtomicBool>,
  notify: Arc<Notify>,
}

impl StreamHandle {
  /// Signal the read loop to stop at the next record boundary and release
  /// the connection. Subsequent calls are no-ops.
  pub fn close(&self) {
    if !self.closed.swap(true, Ordering::AcqRel) {
      self.notify.notify_one();
    }
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }
}

/// A single document-change subscription.
///
/// Construct with [`Client::stream`], then drive it with [`start`]
/// (which occupies the calling task until closed) and stop it with the
/// [`StreamHandle`] from [`handle`].
///
/// [`start`]: Subscription::start
/// [`handle`]: Subscription::handle
pub struct Subscription {
  client: Client,
  http: reqwest::Client,
  body: Vec<u8>,
  path: String,
  options: StreamOptions,
  handlers: StreamHandlers,
  state: StreamState,
  // Whether the current connection has dispatched a document event.
  delivered: bool,
  closed: Arc<AtomicBool>,
  notify: Arc<Notify>,
}

impl Client {
  /// Subscribe to changes of the document (or set) named by `expr`.
  ///
  /// The subscription uses the client's host, credentials, and last-seen
  /// transaction time, but owns a dedicated connection.
  pub fn stream(
    &self,
    expr: &Expr,
    options: StreamOptions,
    handlers: StreamHandlers,
  ) -> Result<Subscription> {
    let body = serde_json::to_vec(&wire::encode_expr(expr))?;
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| Error::Network(format!("failed to build stream client: {}", e)))?;

    let mut path = format!("{}/stream", self.base_url());
    if !options.fields.is_empty() {
      let fields: Vec<&str> = options.fields.iter().map(StreamField::as_str).collect();
      path.push_str(&format!("?fields={}", urlencoding::encode(&fields.join(","))));
    }

    Ok(Subscription {
      client: self.clone(),
      http,
      body,
      path,
      options,
      handlers,
      state: StreamState::Idle,
      delivered: false,
      closed: Arc::new(AtomicBool::new(false)),
      notify: Arc::new(Notify::new()),
    })
  }
}

impl Subscription {
  /// A handle that can close this subscription from another task.
  pub fn handle(&self) -> StreamHandle {
    StreamHandle {
      closed: self.closed.clone(),
      notify: self.notify.clone(),
    }
  }

  /// Close the subscription. Idempotent; equivalent to `handle().close()`.
  pub fn close(&mut self) {
    self.handle().close();
    self.state = StreamState::Closed;
  }

  /// Whether the subscription has reached its terminal state.
  pub fn is_closed(&self) -> bool {
    self.state == StreamState::Closed || self.closed.load(Ordering::Acquire)
  }

  /// Open the connection and consume events until closed or a fatal error.
  ///
  /// Events are dispatched strictly in arrival order on the calling task.
  /// After [`close`] no handler runs again. Transport-level drops are
  /// retried silently per [`StreamOptions`], resuming from the last-seen
  /// transaction time; exhaustion dispatches a final error to `on_error`
  /// and returns it.
  ///
  /// [`close`]: Subscription::close
  pub async fn start(&mut self) -> Result<()> {
    if self.state != StreamState::Idle {
      return Err(Error::Stream("subscription already started".to_string()));
    }

    let mut reconnects = 0u32;
    loop {
      if self.closed.load(Ordering::Acquire) {
        self.state = StreamState::Closed;
        return Ok(());
      }

      self.state = StreamState::Connecting;
      match self.run_connection().await {
        ConnectionEnd::Closed => {
          self.state = StreamState::Closed;
          return Ok(());
        }
        ConnectionEnd::Fatal(err) => {
          // Server-reported failure; never silently retried.
          self.handlers.dispatch(&StreamEvent::Error(StreamErrorEvent {
            code: None,
            description: Some(err.to_string()),
          }));
          self.state = StreamState::Closed;
          return Err(err);
        }
        ConnectionEnd::TransportDrop(detail) => {
          if self.delivered {
            // The budget bounds consecutive failed resubscriptions; a
            // connection that delivered document progress restores it in
            // full. A bare start handshake does not, so a flapping server
            // still exhausts the budget.
            reconnects = 0;
          }
          if reconnects >= self.options.max_reconnect_attempts {
            let err = Error::Stream(format!(
              "connection lost after {} reconnect attempt(s): {}",
              reconnects, detail
            ));
            if !self.closed.load(Ordering::Acquire) {
              self.handlers.dispatch(&StreamEvent::Error(StreamErrorEvent {
                code: None,
                description: Some(err.to_string()),
              }));
            }
            self.state = StreamState::Closed;
            return Err(err);
          }
          let delay = self
            .options
            .reconnect_backoff
            .checked_mul(2u32.saturating_pow(reconnects.min(16)))
            .unwrap_or(self.options.reconnect_backoff_cap)
            .min(self.options.reconnect_backoff_cap);
          reconnects += 1;
          tracing::warn!(reconnects, ?delay, detail = %detail, "stream dropped, resubscribing");
          tokio::time::sleep(delay).await;
        }
      }
    }
  }

  /// Run one connection to completion. The caller decides whether the
  /// ending warrants a resubscription.
  async fn run_connection(&mut self) -> ConnectionEnd {
    self.delivered = false;
    let options = self.client.options();
    let mut req = self
      .http
      .post(&self.path)
      .header(CONTENT_TYPE, "application/json;charset=utf-8")
      .header("X-Driver", DRIVER_IDENT);
    if let Some(secret) = &options.secret {
      req = req.bearer_auth(secret);
    }
    if let Some(timeout) = options.timeout {
      req = req.header("X-Query-Timeout", timeout.as_millis().to_string());
    }
    // Resume point for reconnects.
    if let Some(txn) = self.client.last_txn_time() {
      req = req.header("X-Last-Seen-Txn", txn.to_string());
    }

    let send = req.body(self.body.clone()).send();
    tokio::pin!(send);
    let response = tokio::select! {
      _ = self.notify.notified() => return ConnectionEnd::Closed,
      resp = &mut send => match resp {
        Ok(r) => r,
        Err(e) => return ConnectionEnd::TransportDrop(e.to_string()),
      },
    };

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return ConnectionEnd::Fatal(Error::Stream(format!(
        "stream request rejected with status {}: {}",
        status.as_u16(),
        body.chars().take(200).collect::<String>()
      )));
    }

    self.state = StreamState::Streaming;
    if let Some(txn) = response
      .headers()
      .get("x-txn-time")
      .and_then(|v| v.to_str().ok())
      .and_then(|s| s.parse().ok())
    {
      self.client.sync_last_txn_time(txn);
    }

    let body = response.bytes_stream();
    tokio::pin!(body);
    let mut buffer: Vec<u8> = Vec::new();

    loop {
      if self.closed.load(Ordering::Acquire) {
        return ConnectionEnd::Closed;
      }
      let chunk = tokio::select! {
        _ = self.notify.notified() => return ConnectionEnd::Closed,
        chunk = body.next() => chunk,
      };
      match chunk {
        None => return ConnectionEnd::TransportDrop("server closed the stream".to_string()),
        Some(Err(e)) => return ConnectionEnd::TransportDrop(e.to_string()),
        Some(Ok(bytes)) => {
          buffer.extend_from_slice(&bytes);
          if let Some(end) = self.drain_records(&mut buffer) {
            return end;
          }
        }
      }
    }
  }

  /// Dispatch every complete record currently buffered. Returns an ending
  /// if close was requested at a record boundary.
  fn drain_records(&mut self, buffer: &mut Vec<u8>) -> Option<ConnectionEnd> {
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
      let record: Vec<u8> = buffer.drain(..=pos).collect();
      if self.closed.load(Ordering::Acquire) {
        return Some(ConnectionEnd::Closed);
      }
      let line = String::from_utf8_lossy(&record[..record.len() - 1]);
      let line = line.trim();
      if line.is_empty() {
        continue;
      }
      match parse_event(line) {
        Ok(event) => {
          if let Some(txn) = event.txn() {
            self.client.sync_last_txn_time(txn);
          }
          if matches!(
            event,
            StreamEvent::Version(_) | StreamEvent::HistoryRewrite(_)
          ) {
            self.delivered = true;
          }
          self.handlers.dispatch(&event);
        }
        Err(e) => {
          tracing::debug!(error = %e, "skipping unparseable stream record");
        }
      }
    }
    None
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("path", &self.path)
      .field("state", &self.state)
      .finish()
  }
}

enum ConnectionEnd {
  /// `close()` was observed; terminal, nothing dispatched afterwards.
  Closed,
  /// Server rejected the subscription; terminal, no reconnect.
  Fatal(Error),
  /// Transport-level drop; eligible for silent resubscription.
  TransportDrop(String),
}
