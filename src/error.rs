//! Error types for the Fluxez client SDK.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
  /// The API answered with a non-success status.
  #[error("API error ({status}): {message}")]
  Api {
    status: u16,
    message: String,
    code: Option<String>,
    details: Option<serde_json::Value>,
  },

  #[error("Network error: {0}")]
  Network(String),

  /// Rejected client-side before any request was sent.
  #[error("Validation error: {0}")]
  Validation(String),

  #[error("Timeout")]
  Timeout,

  #[error("Serialization error: {0}")]
  Serialization(String),

  #[error("Configuration error: {0}")]
  Config(String),

  #[error("Connection error: {0}")]
  Connection(String),

  #[error("Protocol error: {0}")]
  Protocol(String),

  #[error("Not connected")]
  NotConnected,

  #[error("Channel closed")]
  ChannelClosed,

  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
}

impl Error {
  /// HTTP status of an API error.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Api { status, .. } => Some(*status),
      _ => None,
    }
  }

  /// Whether the transport should retry the request that produced this error.
  pub fn is_retryable(&self) -> bool {
    match self {
      Self::Network(_) | Self::Timeout => true,
      Self::Api { status, .. } => *status >= 500 || *status == 429,
      _ => false,
    }
  }
}

impl From<serde_json::Error> for Error {
  fn from(e: serde_json::Error) -> Self {
    Self::Serialization(e.to_string())
  }
}

impl From<reqwest::Error> for Error {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      Self::Timeout
    } else if e.is_decode() {
      Self::Serialization(e.to_string())
    } else {
      Self::Network(e.to_string())
    }
  }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
  fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
    Self::Connection(e.to_string())
  }
}

impl From<url::ParseError> for Error {
  fn from(e: url::ParseError) -> Self {
    Self::Config(format!("invalid URL: {}", e))
  }
}

pub type Result<T> = std::result::Result<T, Error>;
