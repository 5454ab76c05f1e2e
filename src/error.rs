//! Error types for the WrenDB client SDK.

use thiserror::Error;

/// Structured error detail returned by the server.
///
/// Query failures carry one or more of these in the response body; the
/// driver parses them so callers can branch on `code` rather than on
/// message text.
#[derive(Debug, Clone, PartialEq, Default, serde::Deserialize)]
pub struct ErrorDetail {
  #[serde(default)]
  pub code: String,
  #[serde(default)]
  pub description: String,
  /// Path into the expression the error refers to, when the server reports one.
  #[serde(default)]
  pub position: Vec<String>,
  #[serde(default)]
  pub failures: Vec<ValidationFailure>,
}

/// Per-field validation failure nested inside an [`ErrorDetail`].
#[derive(Debug, Clone, PartialEq, Default, serde::Deserialize)]
pub struct ValidationFailure {
  #[serde(default)]
  pub field: Vec<String>,
  #[serde(default)]
  pub code: String,
  #[serde(default)]
  pub description: String,
}

#[derive(Error, Debug)]
pub enum Error {
  #[error("Bad request: {0}")]
  BadRequest(ErrorDetail),

  #[error("Unauthorized: {0}")]
  Unauthorized(ErrorDetail),

  #[error("Permission denied: {0}")]
  PermissionDenied(ErrorDetail),

  #[error("Not found: {0}")]
  NotFound(ErrorDetail),

  #[error("Transaction conflict: {0}")]
  Conflict(ErrorDetail),

  #[error("Internal server error: {0}")]
  Internal(ErrorDetail),

  #[error("Service unavailable: {0}")]
  Unavailable(ErrorDetail),

  #[error("Unexpected HTTP status {status}: {detail}")]
  UnexpectedStatus { status: u16, detail: ErrorDetail },

  #[error("Stream error: {0}")]
  Stream(String),

  #[error("Network error: {0}")]
  Network(String),

  #[error("Query timed out after {attempts} attempt(s)")]
  Timeout { attempts: u32 },

  #[error("Transient error persisted through {attempts} attempt(s): {source}")]
  TransientExhausted {
    attempts: u32,
    #[source]
    source: Box<Error>,
  },

  #[error("Invalid expression: {0}")]
  InvalidExpression(String),

  #[error("Serialization error: {0}")]
  Serialization(String),
}

impl Error {
  /// Whether the retry policy may re-send the query after this failure.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Error::Conflict(_) | Error::Internal(_) | Error::Unavailable(_) | Error::Network(_)
    )
  }

  /// Attempt count reported by a terminal retry failure, if any.
  pub fn attempts(&self) -> Option<u32> {
    match self {
      Error::Timeout { attempts } => Some(*attempts),
      Error::TransientExhausted { attempts, .. } => Some(*attempts),
      _ => None,
    }
  }
}

impl std::fmt::Display for ErrorDetail {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if self.code.is_empty() && self.description.is_empty() {
      return write!(f, "(no detail)");
    }
    write!(f, "[{}] {}", self.code, self.description)
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    Self::Network(e.to_string())
  }
}

pub type Result<T> = std::result::Result<T, Error>;
