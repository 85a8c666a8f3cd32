//! Composition root wiring every resource client to one transport.

use std::sync::Arc;

use crate::ai::AiModule;
use crate::analytics::AnalyticsClient;
use crate::auth::AuthClient;
use crate::cache::CacheClient;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::http::HttpClient;
use crate::query::QueryBuilder;
use crate::realtime::RealtimeModule;
use crate::schema::SchemaClient;
use crate::search::SearchClient;
use crate::storage::StorageClient;
use crate::tenant::TenantClient;

/// Entry point of the SDK.
///
/// All resource clients share one [`HttpClient`], so the token stored by
/// `auth().login(..)` authenticates every later call.
pub struct FluxezClient {
  config: ClientConfig,
  http: Arc<HttpClient>,
  auth: AuthClient,
  tenant: TenantClient,
  storage: StorageClient,
  schema: SchemaClient,
  cache: CacheClient,
  analytics: AnalyticsClient,
  ai: AiModule,
  search: SearchClient,
  realtime: RealtimeModule,
}

impl FluxezClient {
  pub fn new(config: ClientConfig) -> Result<Self> {
    config.validate()?;
    let http = Arc::new(HttpClient::new(&config)?);
    let realtime = RealtimeModule::new(
      config.websocket_url()?,
      config.api_key.clone(),
      config.realtime.clone(),
    );

    Ok(Self {
      auth: AuthClient::new(Arc::clone(&http)),
      tenant: TenantClient::new(Arc::clone(&http)),
      storage: StorageClient::new(Arc::clone(&http)),
      schema: SchemaClient::new(Arc::clone(&http)),
      cache: CacheClient::new(Arc::clone(&http)),
      analytics: AnalyticsClient::new(Arc::clone(&http), config.analytics.clone()),
      ai: AiModule::new(Arc::clone(&http)),
      search: SearchClient::new(Arc::clone(&http)),
      realtime,
      http,
      config,
    })
  }

  /// Shorthand for `FluxezClient::new(ClientConfig::new(api_key))`.
  pub fn with_api_key(api_key: impl Into<String>) -> Result<Self> {
    Self::new(ClientConfig::new(api_key))
  }

  pub fn from_env() -> Result<Self> {
    Self::new(ClientConfig::from_env()?)
  }

  pub fn config(&self) -> &ClientConfig {
    &self.config
  }

  pub fn http(&self) -> &Arc<HttpClient> {
    &self.http
  }

  /// Use an externally obtained bearer token.
  pub fn set_token(&self, token: Option<String>) {
    self.http.set_token(token);
  }

  pub fn auth(&self) -> &AuthClient {
    &self.auth
  }

  pub fn tenant(&self) -> &TenantClient {
    &self.tenant
  }

  pub fn storage(&self) -> &StorageClient {
    &self.storage
  }

  pub fn schema(&self) -> &SchemaClient {
    &self.schema
  }

  pub fn cache(&self) -> &CacheClient {
    &self.cache
  }

  pub fn analytics(&self) -> &AnalyticsClient {
    &self.analytics
  }

  pub fn ai(&self) -> &AiModule {
    &self.ai
  }

  pub fn search(&self) -> &SearchClient {
    &self.search
  }

  pub fn realtime(&self) -> &RealtimeModule {
    &self.realtime
  }

  /// Start a query against `table`.
  pub fn query(&self, table: impl Into<String>) -> QueryBuilder {
    QueryBuilder::bound(Arc::clone(&self.http), table)
  }
}
