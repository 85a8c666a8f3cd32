//! HTTP transport shared by every resource client.

use std::sync::RwLock;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::multipart::Form;
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};

/// Header carrying the tenant API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Authenticated JSON transport with retry and envelope unwrapping.
pub struct HttpClient {
  client: reqwest::Client,
  base_url: String,
  token: RwLock<Option<String>>,
  retries: u32,
  retry_delay: Duration,
  debug: bool,
}

impl HttpClient {
  pub fn new(config: &ClientConfig) -> Result<Self> {
    let mut headers = HeaderMap::new();
    if !config.api_key.is_empty() {
      headers.insert(API_KEY_HEADER, header_value(&config.api_key)?);
    }
    for (name, value) in &config.headers {
      let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| Error::Config(format!("invalid header name {}: {}", name, e)))?;
      headers.insert(name, header_value(value)?);
    }

    let client = reqwest::Client::builder()
      .default_headers(headers)
      .timeout(config.timeout)
      .build()
      .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      client,
      base_url: config.api_root().to_string(),
      token: RwLock::new(None),
      retries: config.retries,
      retry_delay: config.retry_delay,
      debug: config.debug,
    })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }

  /// Set or clear the bearer token sent with every request.
  pub fn set_token(&self, token: Option<String>) {
    if let Ok(mut guard) = self.token.write() {
      *guard = token;
    }
  }

  pub fn token(&self) -> Option<String> {
    self.token.read().ok().and_then(|guard| guard.clone())
  }

  pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
    let value = self.send(Method::GET, path, query, None).await?;
    decode(value)
  }

  pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T> {
    let body = serde_json::to_value(body)?;
    let value = self.send(Method::POST, path, &[], Some(body)).await?;
    decode(value)
  }

  pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T> {
    let body = serde_json::to_value(body)?;
    let value = self.send(Method::PUT, path, &[], Some(body)).await?;
    decode(value)
  }

  pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T> {
    let body = serde_json::to_value(body)?;
    let value = self.send(Method::PATCH, path, &[], Some(body)).await?;
    decode(value)
  }

  pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
    let value = self.send(Method::DELETE, path, &[], None).await?;
    decode(value)
  }

  pub async fn delete_with_body<T: DeserializeOwned, B: Serialize + ?Sized>(
    &self,
    path: &str,
    body: &B,
  ) -> Result<T> {
    let body = serde_json::to_value(body)?;
    let value = self.send(Method::DELETE, path, &[], Some(body)).await?;
    decode(value)
  }

  /// Multipart uploads are sent once; a `Form` cannot be replayed.
  pub async fn post_multipart<T: DeserializeOwned>(&self, path: &str, form: Form) -> Result<T> {
    let url = self.url(path);
    if self.debug {
      debug!(method = "POST", %url, "multipart request");
    }
    let request = self.authorize(self.client.post(&url)).multipart(form);
    let response = request.send().await?;
    let value = read_json(response).await?;
    decode(value)
  }

  /// Raw response body, for downloads.
  pub async fn get_bytes(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<u8>> {
    let url = self.url(path);
    let mut attempt = 0;
    loop {
      let result: Result<Vec<u8>> = async {
        let response = self
          .authorize(self.client.get(&url))
          .query(query)
          .send()
          .await?;
        let status = response.status();
        if !status.is_success() {
          let text = response.text().await.unwrap_or_default();
          return Err(api_error(status.as_u16(), status.canonical_reason(), &text));
        }
        Ok(response.bytes().await?.to_vec())
      }
      .await;

      match result {
        Err(e) if e.is_retryable() && attempt < self.retries => {
          self.backoff(attempt, &e).await;
          attempt += 1;
        }
        other => return other,
      }
    }
  }

  async fn send(
    &self,
    method: Method,
    path: &str,
    query: &[(&str, String)],
    body: Option<Value>,
  ) -> Result<Value> {
    let url = self.url(path);
    let mut attempt = 0;
    loop {
      if self.debug {
        debug!(method = %method, %url, attempt, "request");
      }

      let mut request = self.authorize(self.client.request(method.clone(), &url));
      if !query.is_empty() {
        request = request.query(query);
      }
      if let Some(ref body) = body {
        request = request.json(body);
      }

      let result = match request.send().await {
        Ok(response) => read_json(response).await,
        Err(e) => Err(Error::from(e)),
      };

      match result {
        Err(e) if e.is_retryable() && attempt < self.retries => {
          self.backoff(attempt, &e).await;
          attempt += 1;
        }
        other => return other,
      }
    }
  }

  async fn backoff(&self, attempt: u32, error: &Error) {
    let delay = self.retry_delay.saturating_mul(2u32.saturating_pow(attempt));
    warn!(attempt = attempt + 1, ?delay, %error, "retrying request");
    tokio::time::sleep(delay).await;
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match self.token() {
      Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
      None => request,
    }
  }

  fn url(&self, path: &str) -> String {
    if path.starts_with('/') {
      format!("{}{}", self.base_url, path)
    } else {
      format!("{}/{}", self.base_url, path)
    }
  }
}

fn header_value(value: &str) -> Result<HeaderValue> {
  HeaderValue::from_str(value).map_err(|e| Error::Config(format!("invalid header value: {}", e)))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
  if value.is_null() {
    // empty bodies also satisfy structs whose fields all default
    return serde_json::from_value(Value::Null)
      .or_else(|_| serde_json::from_value(Value::Object(Default::default())))
      .map_err(Error::from);
  }
  // a paginated envelope still decodes into a bare list
  let data = match &value {
    Value::Object(map) => map.get("data").cloned(),
    _ => None,
  };
  match serde_json::from_value(value) {
    Ok(decoded) => Ok(decoded),
    Err(e) => match data {
      Some(data) => serde_json::from_value(data).map_err(|_| Error::from(e)),
      None => Err(Error::from(e)),
    },
  }
}

async fn read_json(response: Response) -> Result<Value> {
  let status = response.status();
  let text = response.text().await?;

  if !status.is_success() {
    return Err(api_error(status.as_u16(), status.canonical_reason(), &text));
  }

  if text.trim().is_empty() {
    return Ok(Value::Null);
  }

  let value = match serde_json::from_str::<Value>(&text) {
    Ok(value) => value,
    Err(_) => return Ok(Value::String(text)),
  };

  if value.get("success").and_then(Value::as_bool) == Some(false) {
    return Err(api_error(status.as_u16(), status.canonical_reason(), &text));
  }

  Ok(unwrap_envelope(value))
}

/// Keys that travel next to `data` in a paginated envelope.
const PAGINATION_KEYS: &[&str] = &[
  "total",
  "page",
  "limit",
  "offset",
  "hasMore",
  "pagination",
];

/// Strip the `{ success, data }` envelope the API wraps most responses in.
/// Paginated envelopes keep `data` beside its pagination fields.
pub fn unwrap_envelope(value: Value) -> Value {
  match value {
    Value::Object(mut map) if map.contains_key("success") && map.contains_key("data") => {
      if PAGINATION_KEYS.iter().any(|key| map.contains_key(*key)) {
        map.remove("success");
        map.remove("message");
        Value::Object(map)
      } else {
        map.remove("data").unwrap_or(Value::Null)
      }
    }
    other => other,
  }
}

/// Build an `Error::Api` from a failed response body.
pub fn api_error(status: u16, reason: Option<&str>, body: &str) -> Error {
  let parsed: Option<Value> = serde_json::from_str(body).ok();
  let field = |name: &str| {
    parsed
      .as_ref()
      .and_then(|v| v.get(name))
      .and_then(Value::as_str)
      .map(str::to_string)
  };

  let message = field("message")
    .or_else(|| field("error"))
    .or_else(|| {
      let trimmed = body.trim();
      (!trimmed.is_empty() && parsed.is_none()).then(|| trimmed.to_string())
    })
    .or_else(|| reason.map(str::to_string))
    .unwrap_or_else(|| format!("HTTP {}", status));

  Error::Api {
    status,
    message,
    code: field("code"),
    details: parsed.as_ref().and_then(|v| v.get("details")).cloned(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_unwrap_envelope() {
    let v = unwrap_envelope(json!({"success": true, "data": {"id": 1}}));
    assert_eq!(v, json!({"id": 1}));
  }

  #[test]
  fn test_unwrap_envelope_passthrough() {
    let v = unwrap_envelope(json!({"data": [1, 2], "total": 2}));
    assert_eq!(v, json!({"data": [1, 2], "total": 2}));

    let v = unwrap_envelope(json!([1, 2]));
    assert_eq!(v, json!([1, 2]));
  }

  #[test]
  fn test_unwrap_envelope_keeps_pagination() {
    let v = unwrap_envelope(json!({
      "success": true,
      "data": [{"id": 1}],
      "total": 11,
      "page": 2,
      "limit": 10
    }));
    assert_eq!(v, json!({"data": [{"id": 1}], "total": 11, "page": 2, "limit": 10}));
  }

  #[test]
  fn test_decode_list_from_paginated_envelope() {
    let ids: Vec<Value> = decode(json!({"data": [{"id": 1}, {"id": 2}], "total": 2})).unwrap();
    assert_eq!(ids.len(), 2);

    let err = decode::<Vec<Value>>(json!({"total": 2})).unwrap_err();
    assert!(matches!(err, Error::Serialization(_)));
  }

  #[test]
  fn test_api_error_from_json_body() {
    let err = api_error(
      404,
      Some("Not Found"),
      r#"{"message":"table missing","code":"NOT_FOUND","details":{"table":"x"}}"#,
    );
    match err {
      Error::Api { status, message, code, details } => {
        assert_eq!(status, 404);
        assert_eq!(message, "table missing");
        assert_eq!(code.as_deref(), Some("NOT_FOUND"));
        assert_eq!(details, Some(json!({"table": "x"})));
      }
      e => panic!("unexpected error: {:?}", e),
    }
  }

  #[test]
  fn test_api_error_falls_back() {
    let err = api_error(500, Some("Internal Server Error"), "");
    assert_eq!(err.to_string(), "API error (500): Internal Server Error");

    let err = api_error(502, None, "bad gateway");
    assert_eq!(err.to_string(), "API error (502): bad gateway");

    let err = api_error(400, None, r#"{"error":"bad input"}"#);
    assert_eq!(err.to_string(), "API error (400): bad input");
  }
}
