//! Managed key/value cache
//!
//! Redis-style commands executed by the platform. Every command is a single
//! POST to `/cache/operation` carrying `{operation, key, ...}`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::http::HttpClient;

/// Endpoint every cache command is sent to
pub const OPERATION_PATH: &str = "/cache/operation";

/// Pull the command result out of `{result: x}` / `{value: x}` / `{data: x}`
/// or take the body as is.
fn result_of(value: Value) -> Value {
    match value {
        Value::Object(mut map) => {
            if let Some(v) = map.remove("result") {
                v
            } else if let Some(v) = map.remove("value") {
                v
            } else if let Some(v) = map.remove("data") {
                v
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// Key/value cache client
pub struct CacheClient {
    http: Arc<HttpClient>,
}

impl CacheClient {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Send a command and receive the unwrapped result
    async fn command(&self, operation: &str, args: Value) -> Result<Value> {
        let mut body = Map::new();
        body.insert("operation".to_string(), Value::from(operation));
        if let Value::Object(args) = args {
            body.extend(args);
        }
        let resp: Value = self.http.post(OPERATION_PATH, &body).await?;
        Ok(result_of(resp))
    }

    async fn integer(&self, operation: &str, args: Value) -> Result<i64> {
        let resp = self.command(operation, args).await?;
        as_integer(&resp).ok_or_else(|| {
            Error::Serialization(format!("{} did not return an integer: {}", operation, resp))
        })
    }

    /// Get a value by key
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let resp = self.command("get", json!({ "key": key })).await?;
        Ok(as_string(resp))
    }

    /// Get and deserialize a JSON value
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.command("get", json!({ "key": key })).await? {
            Value::Null => Ok(None),
            // values stored through set_json come back as JSON text
            Value::String(s) => match serde_json::from_str(&s) {
                Ok(v) => Ok(Some(v)),
                Err(_) => Ok(Some(serde_json::from_value(Value::String(s))?)),
            },
            other => Ok(Some(serde_json::from_value(other)?)),
        }
    }

    /// Set a value with optional TTL in seconds
    pub async fn set(&self, key: &str, value: &str, ttl: Option<u64>) -> Result<()> {
        let mut args = json!({ "key": key, "value": value });
        if let Some(seconds) = ttl {
            args["ttl"] = Value::from(seconds);
        }
        self.command("set", args).await?;
        Ok(())
    }

    /// Serialize `value` as JSON text and store it
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<u64>,
    ) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.set(key, &text, ttl).await
    }

    /// Delete a key, returns true if key existed
    pub async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.integer("del", json!({ "key": key })).await? > 0)
    }

    /// Check if a key exists
    pub async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.integer("exists", json!({ "key": key })).await? > 0)
    }

    /// Set expiration on a key
    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        Ok(self
            .integer("expire", json!({ "key": key, "ttl": seconds }))
            .await?
            > 0)
    }

    /// Get TTL of a key in seconds (-1 = no expiry, -2 = key doesn't exist)
    pub async fn ttl(&self, key: &str) -> Result<i64> {
        let resp = self.command("ttl", json!({ "key": key })).await?;
        Ok(as_integer(&resp).unwrap_or(-2))
    }

    /// Increment a key's integer value by 1
    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.integer("incr", json!({ "key": key })).await
    }

    /// Decrement a key's integer value by 1
    pub async fn decr(&self, key: &str) -> Result<i64> {
        self.integer("decr", json!({ "key": key })).await
    }

    /// Increment a key's integer value by amount
    pub async fn incr_by(&self, key: &str, amount: i64) -> Result<i64> {
        self.integer("incrby", json!({ "key": key, "value": amount }))
            .await
    }

    /// Get all keys matching a pattern
    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        match self.command("keys", json!({ "pattern": pattern })).await? {
            Value::Array(items) => Ok(items.into_iter().filter_map(as_string).collect()),
            _ => Ok(Vec::new()),
        }
    }

    /// Get multiple values at once
    pub async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        match self.command("mget", json!({ "keys": keys })).await? {
            Value::Array(items) => Ok(items.into_iter().map(as_string).collect()),
            // keyed form: {"a": "1", "b": null}
            Value::Object(mut map) => Ok(keys
                .iter()
                .map(|k| map.remove(*k).and_then(as_string))
                .collect()),
            _ => Ok(vec![None; keys.len()]),
        }
    }

    /// Set multiple key-value pairs at once
    pub async fn mset(&self, pairs: &[(&str, &str)]) -> Result<()> {
        let entries: HashMap<&str, &str> = pairs.iter().copied().collect();
        self.command("mset", json!({ "entries": entries })).await?;
        Ok(())
    }

    /// Delete every key in the tenant cache
    pub async fn flush(&self) -> Result<()> {
        self.command("flush", json!({})).await?;
        Ok(())
    }
}
