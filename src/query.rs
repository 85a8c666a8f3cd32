//! Query builder for Fluxez
//!
//! Accumulates a query descriptor and sends it to the server-side executor at
//! `/query/execute`. Nothing is evaluated locally.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::http::HttpClient;

/// Endpoint every descriptor is posted to
pub const EXECUTE_PATH: &str = "/query/execute";

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

impl fmt::Display for SortDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortDir::Asc => write!(f, "asc"),
            SortDir::Desc => write!(f, "desc"),
        }
    }
}

/// Sort specification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub column: String,
    pub direction: SortDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
}

/// `table` joined where `left = right`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSpec {
    #[serde(rename = "type")]
    pub kind: JoinKind,
    pub table: String,
    pub on: JoinOn,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOn {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Select,
    Count,
    Insert,
    Update,
    Delete,
}

/// Structured query object sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDescriptor {
    pub operation: Operation,
    pub table: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<JoinSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<SortSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub distinct: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub returning: Vec<String>,
}

/// Filter condition for queries
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    Like(String, String),
    ILike(String, String),
    IsNull(String, bool),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Convert filter to the structured `where` format
    pub fn to_structured(&self) -> Map<String, Value> {
        let mut result = Map::new();
        match self {
            Filter::Eq(field, value) => {
                result.insert(field.clone(), json!({"$eq": value}));
            }
            Filter::Ne(field, value) => {
                result.insert(field.clone(), json!({"$ne": value}));
            }
            Filter::Gt(field, value) => {
                result.insert(field.clone(), json!({"$gt": value}));
            }
            Filter::Gte(field, value) => {
                result.insert(field.clone(), json!({"$gte": value}));
            }
            Filter::Lt(field, value) => {
                result.insert(field.clone(), json!({"$lt": value}));
            }
            Filter::Lte(field, value) => {
                result.insert(field.clone(), json!({"$lte": value}));
            }
            Filter::In(field, values) => {
                result.insert(field.clone(), json!({"$in": values}));
            }
            Filter::NotIn(field, values) => {
                result.insert(field.clone(), json!({"$nin": values}));
            }
            Filter::Like(field, pattern) => {
                result.insert(field.clone(), json!({"$like": pattern}));
            }
            Filter::ILike(field, pattern) => {
                result.insert(field.clone(), json!({"$ilike": pattern}));
            }
            Filter::IsNull(field, is_null) => {
                result.insert(field.clone(), json!({"$null": is_null}));
            }
            Filter::And(conditions) => {
                let structured: Vec<Value> = conditions
                    .iter()
                    .map(|c| Value::Object(c.to_structured()))
                    .collect();
                result.insert("$and".to_string(), Value::Array(structured));
            }
            Filter::Or(conditions) => {
                let structured: Vec<Value> = conditions
                    .iter()
                    .map(|c| Value::Object(c.to_structured()))
                    .collect();
                result.insert("$or".to_string(), Value::Array(structured));
            }
            Filter::Not(condition) => {
                result.insert("$not".to_string(), Value::Object(condition.to_structured()));
            }
        }
        result
    }
}

/// Field expression builder for fluent filter construction
pub struct Field {
    name: String,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn eq(self, value: impl Into<Value>) -> Filter {
        Filter::Eq(self.name, value.into())
    }

    pub fn ne(self, value: impl Into<Value>) -> Filter {
        Filter::Ne(self.name, value.into())
    }

    pub fn gt(self, value: impl Into<Value>) -> Filter {
        Filter::Gt(self.name, value.into())
    }

    pub fn gte(self, value: impl Into<Value>) -> Filter {
        Filter::Gte(self.name, value.into())
    }

    pub fn lt(self, value: impl Into<Value>) -> Filter {
        Filter::Lt(self.name, value.into())
    }

    pub fn lte(self, value: impl Into<Value>) -> Filter {
        Filter::Lte(self.name, value.into())
    }

    pub fn is_in(self, values: Vec<Value>) -> Filter {
        Filter::In(self.name, values)
    }

    pub fn not_in(self, values: Vec<Value>) -> Filter {
        Filter::NotIn(self.name, values)
    }

    /// SQL `LIKE`, `%` and `_` wildcards pass through
    pub fn like(self, pattern: impl Into<String>) -> Filter {
        Filter::Like(self.name, pattern.into())
    }

    pub fn ilike(self, pattern: impl Into<String>) -> Filter {
        Filter::ILike(self.name, pattern.into())
    }

    pub fn is_null(self) -> Filter {
        Filter::IsNull(self.name, true)
    }

    pub fn is_not_null(self) -> Filter {
        Filter::IsNull(self.name, false)
    }
}

/// Create a field expression
pub fn field(name: impl Into<String>) -> Field {
    Field::new(name)
}

/// Combine filters with AND
pub fn and(filters: Vec<Filter>) -> Filter {
    Filter::And(filters)
}

/// Combine filters with OR
pub fn or(filters: Vec<Filter>) -> Filter {
    Filter::Or(filters)
}

/// Negate a filter
pub fn not(filter: Filter) -> Filter {
    Filter::Not(Box::new(filter))
}

const COUNT_KEYS: &[&str] = &["count", "total", "rowCount", "affectedRows"];
/// Keys of a result object that carries no rows of its own
const RESULT_META_KEYS: &[&str] = &[
    "count",
    "total",
    "rowCount",
    "affectedRows",
    "success",
    "message",
];

/// Rows returned by the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Value>,
    /// Total or affected row count, when the server reports one
    pub count: Option<u64>,
}

impl QueryResult {
    /// Accepts a bare row array, an object carrying `rows`/`data` and
    /// `count`/`total`/`rowCount`, or a single returned row.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(rows) => Self { rows, count: None },
            Value::Object(map)
                if !map.contains_key("rows")
                    && !map.contains_key("data")
                    && !map.keys().all(|k| RESULT_META_KEYS.contains(&k.as_str())) =>
            {
                Self {
                    rows: vec![Value::Object(map)],
                    count: Some(1),
                }
            }
            Value::Object(mut map) => {
                let count = COUNT_KEYS
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_u64));
                let rows = match map.remove("rows").or_else(|| map.remove("data")) {
                    Some(Value::Array(rows)) => rows,
                    Some(Value::Null) | None => Vec::new(),
                    Some(other) => vec![other],
                };
                Self { rows, count }
            }
            Value::Null => Self::default(),
            other => Self {
                rows: vec![other],
                count: None,
            },
        }
    }

    /// Deserialize every row into `T`.
    pub fn rows_as<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|row| serde_json::from_value(row.clone()).map_err(Error::from))
            .collect()
    }
}

/// Query builder for Fluxez
///
/// # Example
/// ```
/// use fluxez::query::{QueryBuilder, field, SortDir};
///
/// let descriptor = QueryBuilder::table("users")
///     .select(&["id", "name"])
///     .filter(field("age").gt(21))
///     .order_by("name", SortDir::Asc)
///     .limit(10)
///     .build();
/// assert_eq!(descriptor.table, "users");
/// ```
#[derive(Clone)]
pub struct QueryBuilder {
    http: Option<Arc<HttpClient>>,
    table_name: String,
    columns: Vec<String>,
    filters: Vec<Filter>,
    joins: Vec<JoinSpec>,
    sort_specs: Vec<SortSpec>,
    group_by: Vec<String>,
    having: Vec<Filter>,
    limit_value: Option<usize>,
    offset_value: Option<usize>,
    distinct: bool,
    returning: Vec<String>,
    allow_all: bool,
}

impl QueryBuilder {
    /// Create an unbound query builder for a table. It can build descriptors
    /// but not execute them.
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            http: None,
            table_name: name.into(),
            columns: Vec::new(),
            filters: Vec::new(),
            joins: Vec::new(),
            sort_specs: Vec::new(),
            group_by: Vec::new(),
            having: Vec::new(),
            limit_value: None,
            offset_value: None,
            distinct: false,
            returning: Vec::new(),
            allow_all: false,
        }
    }

    pub(crate) fn bound(http: Arc<HttpClient>, name: impl Into<String>) -> Self {
        let mut builder = Self::table(name);
        builder.http = Some(http);
        builder
    }

    /// Restrict the returned columns; the default is every column
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Add a filter condition. Repeated calls are ANDed.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Shorthand for `filter(field(column).eq(value))`
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field(column).eq(value))
    }

    pub fn join(
        mut self,
        kind: JoinKind,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.joins.push(JoinSpec {
            kind,
            table: table.into(),
            on: JoinOn {
                left: left.into(),
                right: right.into(),
            },
            alias: None,
        });
        self
    }

    pub fn inner_join(
        self,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.join(JoinKind::Inner, table, left, right)
    }

    pub fn left_join(
        self,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.join(JoinKind::Left, table, left, right)
    }

    /// Sort by column
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDir) -> Self {
        self.sort_specs.push(SortSpec {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn having(mut self, filter: Filter) -> Self {
        self.having.push(filter);
        self
    }

    /// Limit number of results
    pub fn limit(mut self, n: usize) -> Self {
        self.limit_value = Some(n);
        self
    }

    /// Skip results
    pub fn offset(mut self, n: usize) -> Self {
        self.offset_value = Some(n);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Columns to return from insert/update/delete
    pub fn returning(mut self, columns: &[&str]) -> Self {
        self.returning.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Permit update/delete without a where clause.
    pub fn allow_all(mut self) -> Self {
        self.allow_all = true;
        self
    }

    /// Descriptor for a select, without sending it.
    pub fn build(&self) -> QueryDescriptor {
        self.descriptor(Operation::Select, None)
    }

    fn descriptor(&self, operation: Operation, data: Option<Value>) -> QueryDescriptor {
        QueryDescriptor {
            operation,
            table: self.table_name.clone(),
            columns: self.columns.clone(),
            where_clause: combine(&self.filters),
            joins: self.joins.clone(),
            order_by: self.sort_specs.clone(),
            group_by: self.group_by.clone(),
            having: combine(&self.having),
            limit: self.limit_value,
            offset: self.offset_value,
            distinct: self.distinct,
            data,
            returning: self.returning.clone(),
        }
    }

    /// Run as a select.
    pub async fn execute(self) -> Result<QueryResult> {
        let descriptor = self.descriptor(Operation::Select, None);
        self.send(&descriptor).await
    }

    /// Run as a select and deserialize the rows.
    pub async fn fetch<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        self.execute().await?.rows_as()
    }

    /// First matching row, if any.
    pub async fn first<T: DeserializeOwned>(self) -> Result<Option<T>> {
        let result = self.limit(1).execute().await?;
        match result.rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_value(row)?)),
            None => Ok(None),
        }
    }

    pub async fn count(self) -> Result<u64> {
        let descriptor = self.descriptor(Operation::Count, None);
        let result = self.send(&descriptor).await?;
        if let Some(count) = result.count {
            return Ok(count);
        }
        // some deployments answer `[{"count": n}]`
        Ok(result
            .rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0))
    }

    /// Insert one row (object) or many (array).
    pub async fn insert(self, data: impl Serialize) -> Result<QueryResult> {
        let data = serde_json::to_value(data)?;
        if !data.is_object() && !data.is_array() {
            return Err(Error::Validation(
                "insert data must be an object or an array of objects".to_string(),
            ));
        }
        let descriptor = self.descriptor(Operation::Insert, Some(data));
        self.send(&descriptor).await
    }

    pub async fn update(self, data: impl Serialize) -> Result<QueryResult> {
        self.guard_unfiltered("update")?;
        let data = serde_json::to_value(data)?;
        if !data.is_object() {
            return Err(Error::Validation("update data must be an object".to_string()));
        }
        let descriptor = self.descriptor(Operation::Update, Some(data));
        self.send(&descriptor).await
    }

    pub async fn delete(self) -> Result<QueryResult> {
        self.guard_unfiltered("delete")?;
        let descriptor = self.descriptor(Operation::Delete, None);
        self.send(&descriptor).await
    }

    fn guard_unfiltered(&self, operation: &str) -> Result<()> {
        if self.filters.is_empty() && !self.allow_all {
            return Err(Error::Validation(format!(
                "{} on {} has no where clause; call allow_all() to affect every row",
                operation, self.table_name
            )));
        }
        Ok(())
    }

    async fn send(&self, descriptor: &QueryDescriptor) -> Result<QueryResult> {
        let http = self.http.as_ref().ok_or_else(|| {
            Error::Config("query builder is not bound to a client".to_string())
        })?;
        let value: Value = http.post(EXECUTE_PATH, descriptor).await?;
        Ok(QueryResult::from_value(value))
    }
}

fn combine(filters: &[Filter]) -> Option<Map<String, Value>> {
    match filters {
        [] => None,
        [single] => Some(single.to_structured()),
        many => Some(Filter::And(many.to_vec()).to_structured()),
    }
}

/// Create an unbound table query builder
pub fn table(name: impl Into<String>) -> QueryBuilder {
    QueryBuilder::table(name)
}
