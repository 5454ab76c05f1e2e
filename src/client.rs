//! WrenDB client: query submission, retry policy, and transaction tracking.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tokio::time::Instant;

use crate::error::{Error, ErrorDetail, Result};
use crate::expr::Expr;
use crate::values::Value;
use crate::wire;

/// Driver identity sent with every request.
pub const DRIVER_IDENT: &str = concat!("wrendb-rust/", env!("CARGO_PKG_VERSION"));

/// Callback invoked with per-call metrics after each successful response.
pub type Observer = Arc<dyn Fn(&Metrics) + Send + Sync>;

/// URL scheme for the server endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
  #[default]
  Https,
  Http,
}

impl Scheme {
  fn as_str(&self) -> &'static str {
    match self {
      Scheme::Https => "https",
      Scheme::Http => "http",
    }
  }

  fn default_port(&self) -> u16 {
    match self {
      Scheme::Https => 443,
      Scheme::Http => 80,
    }
  }
}

/// Connection and policy configuration for a [`Client`].
#[derive(Clone, Default)]
pub struct ClientOptions {
  pub domain: String,
  pub scheme: Scheme,
  pub port: Option<u16>,
  pub secret: Option<String>,
  /// Whole-call deadline covering every attempt and backoff sleep.
  pub timeout: Option<Duration>,
  /// Maximum attempts for transient failures. At least 1.
  pub max_attempts: u32,
  pub backoff_base: Option<Duration>,
  pub backoff_cap: Option<Duration>,
  pub linearized: Option<bool>,
  pub tags: Vec<(String, String)>,
  pub observer: Option<Observer>,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(4);

impl ClientOptions {
  pub fn new(domain: impl Into<String>) -> Self {
    Self {
      domain: domain.into(),
      max_attempts: DEFAULT_MAX_ATTEMPTS,
      ..Default::default()
    }
  }

  pub fn with_scheme(mut self, scheme: Scheme) -> Self {
    self.scheme = scheme;
    self
  }

  pub fn with_port(mut self, port: u16) -> Self {
    self.port = Some(port);
    self
  }

  pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
    self.secret = Some(secret.into());
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn with_max_attempts(mut self, attempts: u32) -> Self {
    self.max_attempts = attempts.max(1);
    self
  }

  pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
    self.backoff_base = Some(base);
    self.backoff_cap = Some(cap);
    self
  }

  pub fn with_linearized(mut self, linearized: bool) -> Self {
    self.linearized = Some(linearized);
    self
  }

  pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.tags.push((key.into(), value.into()));
    self
  }

  pub fn with_observer(mut self, observer: Observer) -> Self {
    self.observer = Some(observer);
    self
  }

  pub(crate) fn base_url(&self) -> String {
    let port = self.port.unwrap_or_else(|| self.scheme.default_port());
    format!("{}://{}:{}", self.scheme.as_str(), self.domain, port)
  }

  pub(crate) fn timeout_or_default(&self) -> Duration {
    self.timeout.unwrap_or(DEFAULT_TIMEOUT)
  }
}

impl std::fmt::Debug for ClientOptions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ClientOptions")
      .field("domain", &self.domain)
      .field("scheme", &self.scheme)
      .field("port", &self.port)
      .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
      .field("timeout", &self.timeout)
      .field("max_attempts", &self.max_attempts)
      .field("linearized", &self.linearized)
      .field("tags", &self.tags)
      .finish()
  }
}

/// Per-call overrides for [`Client::query_with_options`].
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
  pub timeout: Option<Duration>,
  pub linearized: Option<bool>,
  pub tags: Vec<(String, String)>,
}

/// Read-only snapshot of the server's per-response metrics headers, plus
/// the attempt count the driver actually performed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metrics {
  pub compute_ops: Option<u64>,
  pub byte_read_ops: Option<u64>,
  pub byte_write_ops: Option<u64>,
  pub query_time_ms: Option<u64>,
  pub attempts: u32,
}

impl Metrics {
  fn from_headers(headers: &reqwest::header::HeaderMap, attempts: u32) -> Self {
    Self {
      compute_ops: header_u64(headers, "x-compute-ops"),
      byte_read_ops: header_u64(headers, "x-byte-read-ops"),
      byte_write_ops: header_u64(headers, "x-byte-write-ops"),
      query_time_ms: header_u64(headers, "x-query-time"),
      attempts,
    }
  }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .and_then(|s| s.parse().ok())
}

fn header_i64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<i64> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .and_then(|s| s.parse().ok())
}

/// Last-observed transaction time, shared by queries and streams.
///
/// Advances monotonically under concurrent writers; a response arriving
/// late with an older timestamp never regresses the cell.
#[derive(Debug, Default)]
pub(crate) struct TxnCell {
  // 0 means "never observed"; server txn times are positive microsecond
  // timestamps.
  micros: AtomicI64,
}

impl TxnCell {
  pub(crate) fn get(&self) -> Option<i64> {
    match self.micros.load(Ordering::Acquire) {
      0 => None,
      t => Some(t),
    }
  }

  pub(crate) fn advance(&self, txn: i64) {
    if txn > 0 {
      self.micros.fetch_max(txn, Ordering::AcqRel);
    }
  }
}

struct Inner {
  http: reqwest::Client,
  options: ClientOptions,
  base_url: String,
  last_txn: TxnCell,
}

/// Asynchronous WrenDB client.
///
/// Cheap to clone; all clones share one connection pool and one
/// last-seen-transaction cell, and may issue queries concurrently.
///
/// # Example
/// ```no_run
/// use wrendb::{Client, ClientOptions, Expr, query};
///
/// #[tokio::main]
/// async fn main() -> wrendb::Result<()> {
///   let client = Client::new(
///     ClientOptions::new("db.wrendb.example").with_secret("secret"),
///   )?;
///   let three = client.query(&query::add(vec![Expr::literal(1), Expr::literal(2)])).await?;
///   println!("1 + 2 = {:?}", three);
///   Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
  inner: Arc<Inner>,
}

impl Client {
  pub fn new(options: ClientOptions) -> Result<Self> {
    let http = reqwest::Client::builder()
      .build()
      .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;
    let base_url = options.base_url();
    Ok(Self {
      inner: Arc::new(Inner {
        http,
        options,
        base_url,
        last_txn: TxnCell::default(),
      }),
    })
  }

  /// The last transaction time observed from any response, in microseconds.
  pub fn last_txn_time(&self) -> Option<i64> {
    self.inner.last_txn.get()
  }

  /// Advance the last-seen transaction time. Older values are ignored.
  pub fn sync_last_txn_time(&self, txn_micros: i64) {
    self.inner.last_txn.advance(txn_micros);
  }

  pub(crate) fn options(&self) -> &ClientOptions {
    &self.inner.options
  }

  pub(crate) fn base_url(&self) -> &str {
    &self.inner.base_url
  }

  /// Submit a query expression and decode the result.
  pub async fn query(&self, expr: &Expr) -> Result<Value> {
    self.query_with_options(expr, &QueryOptions::default()).await
  }

  /// Submit a query with per-call option overrides.
  ///
  /// The expression is serialized once and the identical body is re-sent on
  /// every retry; only the last-seen-transaction and timeout-budget headers
  /// are refreshed per attempt. The configured timeout bounds the whole
  /// attempt sequence, backoff sleeps included.
  pub async fn query_with_options(&self, expr: &Expr, opts: &QueryOptions) -> Result<Value> {
    let body = serde_json::to_vec(&wire::encode_expr(expr))?;
    let timeout = opts.timeout.unwrap_or_else(|| self.inner.options.timeout_or_default());
    let deadline = Instant::now() + timeout;
    let max_attempts = self.inner.options.max_attempts.max(1);

    let mut attempt = 0u32;
    loop {
      attempt += 1;
      let now = Instant::now();
      if now >= deadline {
        return Err(Error::Timeout { attempts: attempt - 1 });
      }
      let remaining = deadline - now;

      let outcome =
        tokio::time::timeout(remaining, self.attempt_once(&body, opts, attempt, remaining)).await;
      let err = match outcome {
        Err(_) => return Err(Error::Timeout { attempts: attempt }),
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(e)) => e,
      };

      if !err.is_transient() {
        return Err(err);
      }
      if attempt >= max_attempts {
        return Err(Error::TransientExhausted {
          attempts: attempt,
          source: Box::new(err),
        });
      }

      let delay = self.backoff_delay(attempt);
      if Instant::now() + delay >= deadline {
        return Err(Error::Timeout { attempts: attempt });
      }
      tracing::warn!(attempt, ?delay, error = %err, "transient query failure, retrying");
      tokio::time::sleep(delay).await;
    }
  }

  /// Exponential backoff with equal jitter, capped.
  fn backoff_delay(&self, attempt: u32) -> Duration {
    let base = self.inner.options.backoff_base.unwrap_or(DEFAULT_BACKOFF_BASE);
    let cap = self.inner.options.backoff_cap.unwrap_or(DEFAULT_BACKOFF_CAP);
    let exp = base
      .checked_mul(1u32 << (attempt - 1).min(16))
      .unwrap_or(cap)
      .min(cap);
    let half = exp / 2;
    half + rand::thread_rng().gen_range(Duration::ZERO..=half.max(Duration::from_millis(1)))
  }

  async fn attempt_once(
    &self,
    body: &[u8],
    opts: &QueryOptions,
    attempt: u32,
    remaining: Duration,
  ) -> Result<Value> {
    let options = &self.inner.options;
    let mut req = self
      .inner
      .http
      .post(format!("{}/", self.inner.base_url))
      .header(CONTENT_TYPE, "application/json;charset=utf-8")
      .header("X-Driver", DRIVER_IDENT)
      .header("X-Query-Timeout", remaining.as_millis().to_string());

    if let Some(secret) = &options.secret {
      req = req.bearer_auth(secret);
    }
    if let Some(txn) = self.last_txn_time() {
      req = req.header("X-Last-Seen-Txn", txn.to_string());
    }
    if let Some(linearized) = opts.linearized.or(options.linearized) {
      req = req.header("X-Linearized", linearized.to_string());
    }
    let tags: Vec<String> = options
      .tags
      .iter()
      .chain(opts.tags.iter())
      .map(|(k, v)| format!("{}={}", k, v))
      .collect();
    if !tags.is_empty() {
      req = req.header("X-Query-Tags", tags.join(","));
    }

    tracing::debug!(attempt, bytes = body.len(), "sending query");
    let response = req.body(body.to_vec()).send().await?;
    let status = response.status();
    let headers = response.headers().clone();
    let text = response.text().await?;

    if status.is_success() {
      if let Some(txn) = header_i64(&headers, "x-txn-time") {
        self.sync_last_txn_time(txn);
      }
      let parsed: serde_json::Value = serde_json::from_str(&text)?;
      let resource = parsed
        .get("resource")
        .cloned()
        .ok_or_else(|| Error::Serialization("response body missing \"resource\"".to_string()))?;
      let value = wire::decode(resource)?;
      self.notify_observer(&headers, attempt);
      Ok(value)
    } else {
      Err(classify_failure(status, &text))
    }
  }

  /// Hand a metrics snapshot to the observer, if one is configured. The
  /// observer runs on the query's task but its panics never reach the
  /// caller.
  fn notify_observer(&self, headers: &reqwest::header::HeaderMap, attempts: u32) {
    if let Some(observer) = &self.inner.options.observer {
      let metrics = Metrics::from_headers(headers, attempts);
      if catch_unwind(AssertUnwindSafe(|| observer(&metrics))).is_err() {
        tracing::warn!("metrics observer panicked; ignoring");
      }
    }
  }
}

impl std::fmt::Debug for Client {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Client")
      .field("base_url", &self.inner.base_url)
      .field("last_txn", &self.inner.last_txn.get())
      .finish()
  }
}

/// Map a non-2xx response onto the error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> Error {
  let detail = parse_error_detail(body);
  match status.as_u16() {
    400 => Error::BadRequest(detail),
    401 => Error::Unauthorized(detail),
    403 => Error::PermissionDenied(detail),
    404 => Error::NotFound(detail),
    409 => Error::Conflict(detail),
    500 => Error::Internal(detail),
    503 => Error::Unavailable(detail),
    code => Error::UnexpectedStatus { status: code, detail },
  }
}

fn parse_error_detail(body: &str) -> ErrorDetail {
  #[derive(serde::Deserialize)]
  struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
  }

  match serde_json::from_str::<ErrorBody>(body) {
    Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.into_iter().next().unwrap_or_default(),
    _ => ErrorDetail {
      description: body.chars().take(200).collect(),
      ..Default::default()
    },
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_options_builder() {
    let opts = ClientOptions::new("db.example.com")
      .with_scheme(Scheme::Http)
      .with_port(8443)
      .with_secret("s3cret")
      .with_max_attempts(5)
      .with_linearized(true)
      .with_tag("env", "test");
    assert_eq!(opts.base_url(), "http://db.example.com:8443");
    assert_eq!(opts.max_attempts, 5);
    assert_eq!(opts.linearized, Some(true));
    assert_eq!(opts.tags, vec![("env".to_string(), "test".to_string())]);
  }

  #[test]
  fn test_default_ports() {
    assert_eq!(ClientOptions::new("x").base_url(), "https://x:443");
    assert_eq!(
      ClientOptions::new("x").with_scheme(Scheme::Http).base_url(),
      "http://x:80"
    );
  }

  #[test]
  fn test_max_attempts_floor() {
    let opts = ClientOptions::new("x").with_max_attempts(0);
    assert_eq!(opts.max_attempts, 1);
  }

  #[test]
  fn test_txn_cell_monotonic() {
    let cell = TxnCell::default();
    assert_eq!(cell.get(), None);
    cell.advance(10);
    cell.advance(30);
    cell.advance(20);
    assert_eq!(cell.get(), Some(30));
    cell.advance(-5);
    assert_eq!(cell.get(), Some(30));
  }

  #[test]
  fn test_txn_cell_concurrent_out_of_order() {
    use std::sync::Arc;
    let cell = Arc::new(TxnCell::default());
    let mut handles = Vec::new();
    for txn in [3i64, 1, 2] {
      let cell = cell.clone();
      handles.push(std::thread::spawn(move || cell.advance(txn)));
    }
    for h in handles {
      h.join().unwrap();
    }
    assert_eq!(cell.get(), Some(3));
  }

  #[test]
  fn test_classify_failure() {
    let body = r#"{"errors": [{"code": "instance not found", "description": "missing"}]}"#;
    match classify_failure(StatusCode::NOT_FOUND, body) {
      Error::NotFound(detail) => {
        assert_eq!(detail.code, "instance not found");
        assert_eq!(detail.description, "missing");
      }
      other => panic!("expected NotFound, got {:?}", other),
    }
    assert!(classify_failure(StatusCode::CONFLICT, "{}").is_transient());
    assert!(classify_failure(StatusCode::SERVICE_UNAVAILABLE, "").is_transient());
    assert!(!classify_failure(StatusCode::BAD_REQUEST, "").is_transient());
    assert!(matches!(
      classify_failure(StatusCode::IM_A_TEAPOT, ""),
      Error::UnexpectedStatus { status: 418, .. }
    ));
  }

  #[test]
  fn test_error_detail_from_unparseable_body() {
    let detail = parse_error_detail("<html>gateway</html>");
    assert!(detail.description.contains("gateway"));
  }

  #[test]
  fn test_metrics_from_headers() {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert("x-compute-ops", "12".parse().unwrap());
    headers.insert("x-byte-read-ops", "34".parse().unwrap());
    headers.insert("x-query-time", "7".parse().unwrap());
    let m = Metrics::from_headers(&headers, 2);
    assert_eq!(m.compute_ops, Some(12));
    assert_eq!(m.byte_read_ops, Some(34));
    assert_eq!(m.byte_write_ops, None);
    assert_eq!(m.query_time_ms, Some(7));
    assert_eq!(m.attempts, 2);
  }
}
