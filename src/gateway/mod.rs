//! Remote Data Gateway
//!
//! The hosted backend (auth, row storage, object storage) behind one trait.
//! [`supabase::SupabaseClient`] talks to the real service over HTTP;
//! [`memory::MemoryGateway`] keeps everything in process for tests and the
//! demo.

pub mod memory;
pub mod supabase;

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::GatewayError;
use crate::models::{AuthEvent, Session, SignUpMetadata};

/// Request/response surface of the hosted backend
#[allow(async_fn_in_trait)]
pub trait Gateway {
    /// Create an account. Returns a session when the backend signs the new
    /// account in immediately (no email confirmation step).
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Option<Session>, GatewayError>;

    /// Sign in with email and password
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError>;

    /// End the current session
    async fn sign_out(&self) -> Result<(), GatewayError>;

    /// The current (possibly rehydrated) session
    async fn current_session(&self) -> Result<Option<Session>, GatewayError>;

    /// Subscribe to auth state change notifications
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;

    /// Select rows
    async fn select(&self, query: &Select) -> Result<Vec<Value>, GatewayError>;

    /// Exact row count without fetching rows
    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, GatewayError>;

    /// Insert a row, returning it as stored
    async fn insert(&self, table: &str, row: Value) -> Result<Value, GatewayError>;

    /// Delete matching rows, returning how many were removed
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, GatewayError>;

    /// Insert or merge a row on its primary key
    async fn upsert(&self, table: &str, row: Value) -> Result<Value, GatewayError>;

    /// Store an object
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), GatewayError>;

    /// Delete a stored object
    async fn remove(&self, bucket: &str, path: &str) -> Result<(), GatewayError>;

    /// Public URL of a stored object
    fn public_url(&self, bucket: &str, path: &str) -> String;
}

/// Row filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column = value`
    Eq(String, Value),
    /// `column IN (values)`
    In(String, Vec<Value>),
}

impl Filter {
    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    /// `column IN (values)`
    pub fn in_list<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// Filtered column
    pub fn column(&self) -> &str {
        match self {
            Self::Eq(c, _) | Self::In(c, _) => c,
        }
    }

    /// Whether a row satisfies this filter
    pub fn matches(&self, row: &Value) -> bool {
        let field = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Self::Eq(_, v) => field == v,
            Self::In(_, vs) => vs.iter().any(|v| v == field),
        }
    }

    /// `(column, operator.value)` pair in REST query syntax
    pub fn to_query(&self) -> (String, String) {
        match self {
            Self::Eq(c, v) => (c.clone(), format!("eq.{}", scalar(v))),
            Self::In(c, vs) => {
                let list = vs
                    .iter()
                    .map(|v| format!("\"{}\"", scalar(v).replace('"', "\\\"")))
                    .collect::<Vec<_>>()
                    .join(",");
                (c.clone(), format!("in.({list})"))
            }
        }
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Sort order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Sorted column
    pub column: String,
    /// Ascending when true
    pub ascending: bool,
}

/// A select query
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Table name
    pub table: String,
    /// Column list (`*` for all)
    pub columns: String,
    /// Conjunction of filters
    pub filters: Vec<Filter>,
    /// Optional ordering
    pub order: Option<Order>,
    /// Optional row limit
    pub limit: Option<usize>,
}

impl Select {
    /// `select * from table`
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    /// Restrict the column list
    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = columns.into();
        self
    }

    /// Add a filter
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add several filters
    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Add an equality filter
    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    /// Add a membership filter
    pub fn in_list<V: Into<Value>>(
        self,
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filter(Filter::in_list(column, values))
    }

    /// Order descending
    pub fn order_desc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending: false,
        });
        self
    }

    /// Order ascending
    pub fn order_asc(mut self, column: impl Into<String>) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending: true,
        });
        self
    }

    /// Limit the number of rows
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Filter-only query string, used by deletes
    pub fn filter_query_string(&self) -> String {
        self.filters
            .iter()
            .map(|filter| {
                let (column, value) = filter.to_query();
                format!("{}={}", urlencoding::encode(&column), urlencoding::encode(&value))
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// REST query string (without the leading `?`)
    pub fn to_query_string(&self) -> String {
        let mut parts = vec![format!("select={}", urlencoding::encode(&self.columns))];
        if !self.filters.is_empty() {
            parts.push(self.filter_query_string());
        }
        if let Some(order) = &self.order {
            let dir = if order.ascending { "asc" } else { "desc" };
            parts.push(format!("order={}.{dir}", urlencoding::encode(&order.column)));
        }
        if let Some(limit) = self.limit {
            parts.push(format!("limit={limit}"));
        }
        parts.join("&")
    }
}

/// Total ordering over JSON scalars used for client-side sorting
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Decode rows into a typed shape, dropping (and logging) rows that don't fit
pub fn decode_rows<T: DeserializeOwned>(table: &str, rows: Vec<Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("Skipping malformed {table} row: {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches() {
        let row = json!({"user_id": "u1", "post_id": "p1"});
        assert!(Filter::eq("user_id", "u1").matches(&row));
        assert!(!Filter::eq("user_id", "u2").matches(&row));
        assert!(Filter::in_list("post_id", ["p0", "p1"]).matches(&row));
        assert!(!Filter::in_list("post_id", Vec::<String>::new()).matches(&row));
        assert!(!Filter::eq("missing", "x").matches(&row));
    }

    #[test]
    fn test_query_string() {
        let q = Select::from("posts")
            .eq("author_id", "a b")
            .in_list("id", ["1", "2"])
            .order_desc("created_at")
            .limit(20);
        assert_eq!(
            q.to_query_string(),
            "select=%2A&author_id=eq.a%20b&id=in.%28%221%22%2C%222%22%29&order=created_at.desc&limit=20"
        );
    }

    #[test]
    fn test_compare_values_nulls_last() {
        assert_eq!(compare_values(&json!("a"), &json!("b")), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert_eq!(compare_values(&Value::Null, &json!("a")), Ordering::Greater);
    }

    #[test]
    fn test_decode_rows_skips_bad_rows() {
        #[derive(serde::Deserialize)]
        struct Row {
            id: String,
        }
        let rows = vec![json!({"id": "ok"}), json!({"id": 5}), json!({"nope": true})];
        let decoded: Vec<Row> = decode_rows("things", rows);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].id, "ok");
    }
}
