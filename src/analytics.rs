//! Event tracking with client-side batching (`/analytics/*`).
//!
//! `track` only enqueues. The queue is sent when it reaches the batch size,
//! on the flush timer, or on an explicit `flush`/`shutdown`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::http::HttpClient;
use crate::types::Ack;

/// Event name used by [`AnalyticsClient::page`]
pub const PAGE_VIEW_EVENT: &str = "$pageview";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    /// Client-generated, lets the server drop duplicates after a retry
    pub id: Uuid,
    pub event: String,
    #[serde(default)]
    pub properties: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// e.g. "hour", "day"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Value>,
}

struct State {
    queue: VecDeque<AnalyticsEvent>,
    user_id: Option<String>,
    timer: Option<JoinHandle<()>>,
}

pub struct AnalyticsClient {
    http: Arc<HttpClient>,
    config: AnalyticsConfig,
    state: Arc<Mutex<State>>,
}

impl AnalyticsClient {
    pub fn new(http: Arc<HttpClient>, config: AnalyticsConfig) -> Self {
        Self {
            http,
            config,
            state: Arc::new(Mutex::new(State {
                queue: VecDeque::new(),
                user_id: None,
                timer: None,
            })),
        }
    }

    /// Queue an event. Sends the batch once `batch_size` events are waiting.
    pub async fn track(&self, event: &str, properties: Value) {
        let full = {
            let mut state = lock(&self.state);
            let user_id = state.user_id.clone();
            state.queue.push_back(AnalyticsEvent {
                id: Uuid::new_v4(),
                event: event.to_string(),
                properties,
                user_id,
                timestamp: Utc::now(),
            });
            trim(&mut state.queue, self.config.max_queue_size);
            state.queue.len() >= self.config.batch_size
        };

        self.ensure_timer();

        if full {
            self.flush().await;
        }
    }

    pub async fn page(&self, name: &str, properties: Value) {
        let mut properties = match properties {
            Value::Object(map) => Value::Object(map),
            Value::Null => json!({}),
            other => json!({ "value": other }),
        };
        properties["name"] = Value::from(name);
        self.track(PAGE_VIEW_EVENT, properties).await;
    }

    /// Attach `user_id` to subsequent events and send the traits.
    pub async fn identify(&self, user_id: &str, traits: Value) -> Result<Ack> {
        lock(&self.state).user_id = Some(user_id.to_string());
        self.http
            .post(
                "/analytics/identify",
                &json!({ "userId": user_id, "traits": traits }),
            )
            .await
    }

    /// Forget the identified user.
    pub fn reset(&self) {
        lock(&self.state).user_id = None;
    }

    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Send everything queued. Returns how many events were accepted; on
    /// failure the events go back on the queue and 0 is returned.
    pub async fn flush(&self) -> usize {
        flush_queue(&self.http, &self.state, self.config.max_queue_size).await
    }

    pub async fn query(&self, query: &AnalyticsQuery) -> Result<Value> {
        self.http.post("/analytics/query", query).await
    }

    /// Stop the flush timer and send what is left.
    pub async fn shutdown(&self) -> usize {
        let timer = lock(&self.state).timer.take();
        if let Some(timer) = timer {
            timer.abort();
        }
        self.flush().await
    }

    /// Start the periodic flush on first use. Without a runtime, or with a
    /// zero interval, the queue is only flushed by size or explicitly.
    fn ensure_timer(&self) {
        let mut state = lock(&self.state);
        if state.timer.is_some() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        // interval() cannot tick at zero
        if self.config.flush_interval.is_zero() {
            return;
        }

        let http = Arc::clone(&self.http);
        let queue = Arc::clone(&self.state);
        let interval = self.config.flush_interval;
        let max = self.config.max_queue_size;
        state.timer = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                flush_queue(&http, &queue, max).await;
            }
        }));
    }
}

impl Drop for AnalyticsClient {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.state).timer.take() {
            timer.abort();
        }
    }
}

fn lock(state: &Mutex<State>) -> std::sync::MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn trim(queue: &mut VecDeque<AnalyticsEvent>, max: usize) {
    while queue.len() > max {
        queue.pop_front();
    }
}

async fn flush_queue(http: &HttpClient, state: &Mutex<State>, max: usize) -> usize {
    let events: Vec<AnalyticsEvent> = lock(state).queue.drain(..).collect();
    if events.is_empty() {
        return 0;
    }

    let count = events.len();
    let result: Result<Value> = http
        .post("/analytics/track", &json!({ "events": &events }))
        .await;

    match result {
        Ok(_) => {
            debug!(count, "analytics batch sent");
            count
        }
        Err(e) => {
            warn!(error = %e, count, "analytics flush failed, requeueing");
            let mut state = lock(state);
            // failed batch goes ahead of anything tracked meanwhile
            for event in events.into_iter().rev() {
                state.queue.push_front(event);
            }
            trim(&mut state.queue, max);
            0
        }
    }
}
