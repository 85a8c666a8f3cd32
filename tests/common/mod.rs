//! Shared fixtures for the HTTP contract tests.

#![allow(dead_code)]

use std::time::Duration;

use fluxez::{ClientConfig, FluxezClient};
use wiremock::MockServer;

pub const API_KEY: &str = "test-api-key";

pub fn config(server: &MockServer) -> ClientConfig {
  ClientConfig::new(API_KEY)
    .with_base_url(format!("{}/api/v1", server.uri()))
    .with_retries(0)
    .with_timeout(Duration::from_secs(5))
}

pub async fn setup() -> (MockServer, FluxezClient) {
  let server = MockServer::start().await;
  let client = FluxezClient::new(config(&server)).unwrap();
  (server, client)
}
