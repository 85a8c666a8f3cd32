//! Full-text search (`/search/*`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::http::HttpClient;
use crate::types::Ack;

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub highlight: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, alias = "source")]
    pub document: Value,
    #[serde(default)]
    pub highlights: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    #[serde(default)]
    pub hits: Vec<SearchHit>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub took_ms: Option<u64>,
}

pub struct SearchClient {
    http: Arc<HttpClient>,
}

impl SearchClient {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    pub async fn search(
        &self,
        index: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResults> {
        self.http
            .post(
                "/search/query",
                &json!({ "index": index, "query": query, "options": options }),
            )
            .await
    }

    pub async fn index_document(&self, index: &str, id: &str, document: &Value) -> Result<Ack> {
        self.http
            .post(
                "/search/index",
                &json!({ "index": index, "id": id, "document": document }),
            )
            .await
    }

    pub async fn delete_document(&self, index: &str, id: &str) -> Result<Ack> {
        self.http
            .delete(&format!(
                "/search/index/{}/{}",
                urlencoding::encode(index),
                urlencoding::encode(id)
            ))
            .await
    }
}
