//! Schema management and migrations (`/schema/*`).
//!
//! The migration engine runs server-side; these calls only ship definitions
//! and report what the server did.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::types::Ack;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// `table.column` this column points at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            primary_key: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn references(mut self, target: impl Into<String>) -> Self {
        self.references = Some(target.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: IndexDefinition) -> Self {
        self.indexes.push(index);
        self
    }
}

/// Desired state of the tenant database
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableDefinition>,
}

impl SchemaDefinition {
    /// Catch definitions the server would reject anyway.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(Error::Validation("table name must not be empty".to_string()));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(Error::Validation(format!("duplicate table: {}", table.name)));
            }
            if table.columns.is_empty() {
                return Err(Error::Validation(format!("table {} has no columns", table.name)));
            }
            let mut columns = std::collections::HashSet::new();
            for column in &table.columns {
                if !columns.insert(column.name.as_str()) {
                    return Err(Error::Validation(format!(
                        "duplicate column {}.{}",
                        table.name, column.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateOptions {
    /// Report the plan without applying it
    pub dry_run: bool,
    /// Allow destructive changes such as dropping columns
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    #[serde(default = "crate::types::succeeded")]
    pub success: bool,
    #[serde(default)]
    pub migration_id: Option<String>,
    /// Statements the server ran, or would run on a dry run
    #[serde(default, alias = "statements")]
    pub changes: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub applied_at: Option<DateTime<Utc>>,
}

pub struct SchemaClient {
    http: Arc<HttpClient>,
}

impl SchemaClient {
    pub fn new(http: Arc<HttpClient>) -> Self {
        Self { http }
    }

    pub async fn get_schema(&self) -> Result<SchemaDefinition> {
        self.http.get("/schema", &[]).await
    }

    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let value: Value = self.http.get("/schema/tables", &[]).await?;
        let value = match value {
            Value::Object(mut map) => map
                .remove("tables")
                .or_else(|| map.remove("data"))
                .unwrap_or(Value::Null),
            other => other,
        };
        // either `["a", "b"]` or `[{"name": "a"}, ...]`
        let names = match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(name) => Some(name),
                    Value::Object(map) => map.get("name").and_then(Value::as_str).map(String::from),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };
        Ok(names)
    }

    pub async fn get_table(&self, name: &str) -> Result<TableDefinition> {
        self.http
            .get(&format!("/schema/tables/{}", urlencoding::encode(name)), &[])
            .await
    }

    pub async fn create_table(&self, table: &TableDefinition) -> Result<Ack> {
        self.http.post("/schema/tables", table).await
    }

    pub async fn drop_table(&self, name: &str) -> Result<Ack> {
        self.http
            .delete(&format!("/schema/tables/{}", urlencoding::encode(name)))
            .await
    }

    pub async fn add_column(&self, table: &str, column: &ColumnDefinition) -> Result<Ack> {
        self.http
            .post(
                &format!("/schema/tables/{}/columns", urlencoding::encode(table)),
                column,
            )
            .await
    }

    pub async fn drop_column(&self, table: &str, column: &str) -> Result<Ack> {
        self.http
            .delete(&format!(
                "/schema/tables/{}/columns/{}",
                urlencoding::encode(table),
                urlencoding::encode(column)
            ))
            .await
    }

    pub async fn create_index(&self, table: &str, index: &IndexDefinition) -> Result<Ack> {
        self.http
            .post(
                &format!("/schema/tables/{}/indexes", urlencoding::encode(table)),
                index,
            )
            .await
    }

    /// Diff `schema` against the live database and apply the result.
    pub async fn migrate(
        &self,
        schema: &SchemaDefinition,
        options: MigrateOptions,
    ) -> Result<MigrationResult> {
        schema.validate()?;
        self.http
            .post(
                "/schema/migrate",
                &json!({
                    "schema": schema,
                    "dryRun": options.dry_run,
                    "force": options.force,
                }),
            )
            .await
    }

    /// Make the live database match `schema` exactly.
    pub async fn sync_schema(&self, schema: &SchemaDefinition) -> Result<MigrationResult> {
        schema.validate()?;
        self.http
            .post("/schema/sync", &json!({ "schema": schema }))
            .await
    }

    pub async fn migration_history(&self) -> Result<Vec<MigrationRecord>> {
        self.http.get("/schema/migrations", &[]).await
    }
}
