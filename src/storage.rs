//! Object storage (`/storage/*`).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::types::Ack;

/// Bucket info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Stored object info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageObject {
    #[serde(alias = "key")]
    pub path: String,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct StorageClient {
    http: Arc<HttpClient>,
}

impl StorageClient {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    /// Upload `data` to `bucket/path`.
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<StorageObject> {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(content_type)
            .map_err(|e| Error::Validation(format!("invalid content type: {}", e)))?;
        let form = Form::new()
            .text("bucket", bucket.to_string())
            .text("path", path.to_string())
            .part("file", part);

        self.http.post_multipart("/storage/upload", form).await
    }

    pub async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>> {
        self.http
            .get_bytes(
                "/storage/download",
                &[("bucket", bucket.to_string()), ("path", path.to_string())],
            )
            .await
    }

    pub async fn delete(&self, bucket: &str, path: &str) -> Result<Ack> {
        self.http
            .delete_with_body("/storage/delete", &json!({ "bucket": bucket, "path": path }))
            .await
    }

    /// Objects in `bucket`, optionally under `prefix`.
    pub async fn list(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<StorageObject>> {
        let mut query = vec![("bucket", bucket.to_string())];
        if let Some(prefix) = prefix {
            query.push(("prefix", prefix.to_string()));
        }
        self.http.get("/storage/list", &query).await
    }

    /// Time-limited download link; `expires_in` is in seconds.
    pub async fn signed_url(&self, bucket: &str, path: &str, expires_in: u64) -> Result<SignedUrl> {
        self.http
            .post(
                "/storage/signed-url",
                &json!({ "bucket": bucket, "path": path, "expiresIn": expires_in }),
            )
            .await
    }

    /// Public URL of an object in a public bucket. No request is made.
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        let path = path
            .trim_start_matches('/')
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/storage/public/{}/{}",
            self.http.base_url(),
            urlencoding::encode(bucket),
            path
        )
    }

    pub async fn create_bucket(&self, name: &str, public: bool) -> Result<Bucket> {
        self.http
            .post("/storage/buckets", &json!({ "name": name, "public": public }))
            .await
    }

    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        self.http.get("/storage/buckets", &[]).await
    }

    pub async fn delete_bucket(&self, name: &str) -> Result<Ack> {
        self.http
            .delete(&format!("/storage/buckets/{}", urlencoding::encode(name)))
            .await
    }
}
