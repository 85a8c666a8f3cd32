//! Client configuration.

use std::collections::HashMap;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::ENGINE_IO_VERSION;

/// Default API endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.fluxez.com/api/v1";

/// Realtime connection settings.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
  /// Reconnect automatically when the socket drops.
  pub auto_reconnect: bool,
  /// Give up after this many consecutive failed attempts.
  pub max_reconnect_attempts: u32,
  /// First backoff step; doubled per attempt.
  pub reconnect_delay: Duration,
  /// Upper bound on a single backoff step.
  pub max_reconnect_delay: Duration,
  /// How long `connect()` waits for the namespace handshake.
  pub connect_timeout: Duration,
}

impl Default for RealtimeConfig {
  fn default() -> Self {
    Self {
      auto_reconnect: true,
      max_reconnect_attempts: 5,
      reconnect_delay: Duration::from_secs(1),
      max_reconnect_delay: Duration::from_secs(30),
      connect_timeout: Duration::from_secs(10),
    }
  }
}

/// Analytics batching settings.
#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
  pub batch_size: usize,
  pub flush_interval: Duration,
  /// Events kept when flushes keep failing; the oldest are dropped first.
  pub max_queue_size: usize,
}

impl Default for AnalyticsConfig {
  fn default() -> Self {
    Self {
      batch_size: 20,
      flush_interval: Duration::from_secs(10),
      max_queue_size: 1000,
    }
  }
}

/// Configuration for [`FluxezClient`](crate::FluxezClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
  pub api_key: String,
  pub base_url: String,
  pub timeout: Duration,
  /// Retries after the first attempt for retryable failures.
  pub retries: u32,
  pub retry_delay: Duration,
  pub debug: bool,
  /// Extra headers sent with every request.
  pub headers: HashMap<String, String>,
  pub realtime: RealtimeConfig,
  pub analytics: AnalyticsConfig,
}

impl ClientConfig {
  pub fn new(api_key: impl Into<String>) -> Self {
    Self {
      api_key: api_key.into(),
      base_url: DEFAULT_BASE_URL.to_string(),
      timeout: Duration::from_secs(30),
      retries: 3,
      retry_delay: Duration::from_secs(1),
      debug: false,
      headers: HashMap::new(),
      realtime: RealtimeConfig::default(),
      analytics: AnalyticsConfig::default(),
    }
  }

  /// Create a configuration from environment variables.
  ///
  /// Environment variables:
  /// - `FLUXEZ_API_KEY`: API key (required)
  /// - `FLUXEZ_BASE_URL`: API base URL (default: "https://api.fluxez.com/api/v1")
  /// - `FLUXEZ_TIMEOUT_MS`: Request timeout in milliseconds (default: 30000)
  /// - `FLUXEZ_RETRIES`: Retry count (default: 3)
  /// - `FLUXEZ_DEBUG`: Verbose request logging (default: "false")
  pub fn from_env() -> Result<Self> {
    let api_key = std::env::var("FLUXEZ_API_KEY")
      .map_err(|_| Error::Config("FLUXEZ_API_KEY is not set".to_string()))?;

    let mut config = Self::new(api_key);

    if let Ok(base_url) = std::env::var("FLUXEZ_BASE_URL") {
      config.base_url = base_url;
    }

    if let Ok(v) = std::env::var("FLUXEZ_TIMEOUT_MS") {
      let ms: u64 = v
        .parse()
        .map_err(|e| Error::Config(format!("invalid FLUXEZ_TIMEOUT_MS: {}", e)))?;
      config.timeout = Duration::from_millis(ms);
    }

    if let Ok(v) = std::env::var("FLUXEZ_RETRIES") {
      config.retries = v
        .parse()
        .map_err(|e| Error::Config(format!("invalid FLUXEZ_RETRIES: {}", e)))?;
    }

    config.debug = std::env::var("FLUXEZ_DEBUG")
      .map(|v| v.to_lowercase() == "true" || v == "1")
      .unwrap_or(false);

    config.validate()?;
    Ok(config)
  }

  pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
    self.base_url = url.into();
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn with_retries(mut self, retries: u32) -> Self {
    self.retries = retries;
    self
  }

  pub fn with_retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  pub fn with_debug(mut self, debug: bool) -> Self {
    self.debug = debug;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn with_realtime(mut self, realtime: RealtimeConfig) -> Self {
    self.realtime = realtime;
    self
  }

  pub fn with_analytics(mut self, analytics: AnalyticsConfig) -> Self {
    self.analytics = analytics;
    self
  }

  /// Check that the configuration can produce a working client.
  pub fn validate(&self) -> Result<()> {
    if self.api_key.trim().is_empty() {
      return Err(Error::Config("api key must not be empty".to_string()));
    }
    let url = Url::parse(&self.base_url)?;
    if url.scheme() != "http" && url.scheme() != "https" {
      return Err(Error::Config(format!(
        "base URL must be http or https, got {}",
        url.scheme()
      )));
    }
    if self.analytics.flush_interval.is_zero() {
      return Err(Error::Config(
        "analytics flush interval must be greater than zero".to_string(),
      ));
    }
    Ok(())
  }

  /// Base URL without a trailing slash.
  pub(crate) fn api_root(&self) -> &str {
    self.base_url.trim_end_matches('/')
  }

  /// socket.io endpoint at the API host root.
  pub fn websocket_url(&self) -> Result<String> {
    let base = Url::parse(&self.base_url)?;
    let scheme = match base.scheme() {
      "https" => "wss",
      "http" => "ws",
      other => return Err(Error::Config(format!("unsupported scheme: {}", other))),
    };
    let host = base
      .host_str()
      .ok_or_else(|| Error::Config("base URL has no host".to_string()))?;

    let mut url = format!("{}://{}", scheme, host);
    if let Some(port) = base.port() {
      url.push_str(&format!(":{}", port));
    }
    url.push_str(&format!(
      "/socket.io/?EIO={}&transport=websocket&apiKey={}",
      ENGINE_IO_VERSION,
      urlencoding::encode(&self.api_key)
    ));
    Ok(url)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = ClientConfig::new("key");
    assert_eq!(config.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.timeout, Duration::from_secs(30));
    assert_eq!(config.retries, 3);
    assert!(config.realtime.auto_reconnect);
    assert_eq!(config.analytics.batch_size, 20);
  }

  #[test]
  fn test_websocket_url_drops_path() {
    let config = ClientConfig::new("k y").with_base_url("https://api.example.com/api/v1");
    assert_eq!(
      config.websocket_url().unwrap(),
      "wss://api.example.com/socket.io/?EIO=4&transport=websocket&apiKey=k%20y"
    );
  }

  #[test]
  fn test_websocket_url_keeps_port() {
    let config = ClientConfig::new("key").with_base_url("http://127.0.0.1:3000/api/v1");
    assert_eq!(
      config.websocket_url().unwrap(),
      "ws://127.0.0.1:3000/socket.io/?EIO=4&transport=websocket&apiKey=key"
    );
  }

  #[test]
  fn test_validate() {
    assert!(ClientConfig::new("").validate().is_err());
    assert!(ClientConfig::new("key")
      .with_base_url("ftp://example.com")
      .validate()
      .is_err());
    assert!(ClientConfig::new("key").with_base_url("not a url").validate().is_err());
    assert!(ClientConfig::new("key").validate().is_ok());
  }

  #[test]
  fn test_validate_rejects_zero_flush_interval() {
    let config = ClientConfig::new("key").with_analytics(AnalyticsConfig {
      flush_interval: Duration::ZERO,
      ..AnalyticsConfig::default()
    });
    match config.validate() {
      Err(Error::Config(message)) => assert!(message.contains("flush interval")),
      other => panic!("expected config error, got {:?}", other),
    }
  }

  #[test]
  fn test_api_root_trims_slash() {
    let config = ClientConfig::new("key").with_base_url("http://localhost/api/");
    assert_eq!(config.api_root(), "http://localhost/api");
  }
}
