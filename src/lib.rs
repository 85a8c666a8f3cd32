//! Fluxez Rust Client SDK
//!
//! A client for the Fluxez backend platform: tenant auth, queries, storage,
//! schema migrations, cache, analytics, AI, search and realtime channels.
//!
//! # Example
//!
//! ```no_run
//! use fluxez::{ClientConfig, FluxezClient};
//! use fluxez::query::{field, SortDir};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> fluxez::Result<()> {
//!     let client = FluxezClient::new(ClientConfig::new("fx_live_key"))?;
//!
//!     // Sign in; the token is used by every later request
//!     client.auth().login("alice@example.com", "correct horse").await?;
//!
//!     // Query rows
//!     let adults = client
//!         .query("users")
//!         .filter(field("age").gte(18))
//!         .order_by("name", SortDir::Asc)
//!         .limit(10)
//!         .execute()
//!         .await?;
//!     println!("Found: {:?}", adults.rows);
//!
//!     // Insert a row
//!     client.query("users").insert(json!({ "name": "Bob", "age": 30 })).await?;
//!
//!     // Listen for changes
//!     client.realtime().connect().await?;
//!     let mut sub = client.realtime().subscribe_table("users", None)?;
//!     while let Some(event) = sub.next().await {
//!         println!("Change: {:?}", event);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod ai;
pub mod analytics;
pub mod auth;
pub mod cache;
mod client;
pub mod config;
mod error;
pub mod http;
pub mod protocol;
pub mod query;
pub mod realtime;
pub mod schema;
pub mod search;
pub mod storage;
pub mod tenant;
pub mod types;

pub use ai::AiModule;
pub use analytics::AnalyticsClient;
pub use auth::AuthClient;
pub use cache::CacheClient;
pub use client::FluxezClient;
pub use config::{AnalyticsConfig, ClientConfig, RealtimeConfig};
pub use error::{Error, Result};
pub use http::HttpClient;
pub use query::{and, field, not, or, table, Filter, QueryBuilder, QueryResult, SortDir};
pub use realtime::{ConnectionStatus, RealtimeEvent, RealtimeModule, Subscription};
pub use schema::{MigrateOptions, MigrationResult, SchemaClient, SchemaDefinition};
pub use search::SearchClient;
pub use storage::StorageClient;
pub use tenant::TenantClient;
pub use types::{ApiKey, App, AuthResponse, AuthToken, Organization, Project, User};
