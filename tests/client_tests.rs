//! Client tests for the Fluxez Rust SDK.

use std::time::Duration;

use fluxez::{ClientConfig, Error, FluxezClient};

#[test]
fn test_client_config_builder_chain() {
  let config = ClientConfig::new("key")
    .with_base_url("http://localhost:3000/api/v1")
    .with_timeout(Duration::from_secs(5))
    .with_retries(1)
    .with_header("x-tenant", "acme");

  assert_eq!(config.api_key, "key");
  assert_eq!(config.base_url, "http://localhost:3000/api/v1");
  assert_eq!(config.timeout, Duration::from_secs(5));
  assert_eq!(config.retries, 1);
  assert_eq!(config.headers.get("x-tenant").map(String::as_str), Some("acme"));
}

#[test]
fn test_client_rejects_bad_config() {
  assert!(matches!(
    FluxezClient::new(ClientConfig::new("")),
    Err(Error::Config(_))
  ));
  assert!(matches!(
    FluxezClient::new(ClientConfig::new("key").with_base_url("nope")),
    Err(Error::Config(_))
  ));
  assert!(matches!(
    FluxezClient::new(ClientConfig::new("key").with_header("bad header", "v")),
    Err(Error::Config(_))
  ));
}

#[test]
fn test_token_is_shared() {
  let client = FluxezClient::with_api_key("key").unwrap();
  assert!(!client.auth().is_authenticated());
  client.set_token(Some("abc".to_string()));
  assert!(client.auth().is_authenticated());
  assert_eq!(client.http().token().as_deref(), Some("abc"));
}

#[test]
fn test_error_display() {
  let err = Error::Api {
    status: 404,
    message: "not found".to_string(),
    code: None,
    details: None,
  };
  assert_eq!(format!("{}", err), "API error (404): not found");
  assert_eq!(err.status(), Some(404));

  let err = Error::Network("refused".to_string());
  assert_eq!(format!("{}", err), "Network error: refused");

  let err = Error::Validation("bad email".to_string());
  assert_eq!(format!("{}", err), "Validation error: bad email");

  assert_eq!(format!("{}", Error::Timeout), "Timeout");
  assert_eq!(format!("{}", Error::NotConnected), "Not connected");
  assert_eq!(format!("{}", Error::ChannelClosed), "Channel closed");
}

#[test]
fn test_error_retryable() {
  let api = |status| Error::Api {
    status,
    message: String::new(),
    code: None,
    details: None,
  };
  assert!(api(500).is_retryable());
  assert!(api(503).is_retryable());
  assert!(api(429).is_retryable());
  assert!(!api(400).is_retryable());
  assert!(!api(404).is_retryable());
  assert!(Error::Timeout.is_retryable());
  assert!(Error::Network("x".to_string()).is_retryable());
  assert!(!Error::Validation("x".to_string()).is_retryable());
}

#[test]
fn test_error_from_io() {
  let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
  let err: Error = io_err.into();
  match err {
    Error::Io(_) => {}
    _ => panic!("Expected Io error"),
  }
}

#[test]
fn test_error_from_json() {
  let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
  let err: Error = json_err.into();
  match err {
    Error::Serialization(_) => {}
    _ => panic!("Expected Serialization error"),
  }
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
  let config = ClientConfig::new("key")
    .with_base_url("http://127.0.0.1:59999/api/v1")
    .with_retries(0);
  let client = FluxezClient::new(config).unwrap();

  let result = client.schema().list_tables().await;
  match result.unwrap_err() {
    Error::Network(_) | Error::Timeout => {}
    e => panic!("Expected Network error, got: {:?}", e),
  }
}
