//! AI generation endpoints (`/ai/*`). Generation happens server-side.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::http::HttpClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageOptions {
    /// e.g. "1024x1024"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiCompletion {
    #[serde(alias = "content", alias = "result")]
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedImage {
    pub url: String,
    #[serde(default)]
    pub revised_prompt: Option<String>,
}

pub struct AiModule {
    http: Arc<HttpClient>,
}

impl AiModule {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    pub async fn generate_text(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<AiCompletion> {
        if prompt.trim().is_empty() {
            return Err(Error::Validation("prompt must not be empty".to_string()));
        }
        self.http
            .post("/ai/generate/text", &with_options(json!({ "prompt": prompt }), options)?)
            .await
    }

    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
    ) -> Result<AiCompletion> {
        if messages.is_empty() {
            return Err(Error::Validation("chat needs at least one message".to_string()));
        }
        self.http
            .post("/ai/chat", &with_options(json!({ "messages": messages }), options)?)
            .await
    }

    pub async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageOptions,
    ) -> Result<Vec<GeneratedImage>> {
        let body = with_options(json!({ "prompt": prompt }), options)?;
        let value: Value = self.http.post("/ai/generate/image", &body).await?;
        // single image or `{images: [...]}`
        let images = match value {
            Value::Object(mut map) if map.contains_key("images") => {
                map.remove("images").unwrap_or(Value::Null)
            }
            Value::Array(items) => Value::Array(items),
            other => Value::Array(vec![other]),
        };
        Ok(serde_json::from_value(images)?)
    }

    pub async fn embeddings(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let value: Value = self
            .http
            .post("/ai/embeddings", &json!({ "input": inputs }))
            .await?;
        let vectors = match value {
            Value::Object(mut map) => map.remove("embeddings").unwrap_or(Value::Null),
            other => other,
        };
        Ok(serde_json::from_value(vectors)?)
    }

    pub async fn summarize(&self, text: &str, max_length: Option<u32>) -> Result<AiCompletion> {
        let mut body = json!({ "text": text });
        if let Some(max_length) = max_length {
            body["maxLength"] = Value::from(max_length);
        }
        self.http.post("/ai/summarize", &body).await
    }

    pub async fn translate(&self, text: &str, target_language: &str) -> Result<AiCompletion> {
        self.http
            .post(
                "/ai/translate",
                &json!({ "text": text, "targetLanguage": target_language }),
            )
            .await
    }
}

/// Merge serialized options into the request body.
fn with_options<O: Serialize>(mut body: Value, options: &O) -> Result<Value> {
    if let (Value::Object(body), Value::Object(extra)) = (&mut body, serde_json::to_value(options)?) {
        body.extend(extra);
    }
    Ok(body)
}
