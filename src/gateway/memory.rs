//! In-process gateway
//!
//! Tables are vectors of JSON rows. Edge tables and `profiles` enforce the
//! same uniqueness the hosted database does, so duplicate inserts fail with
//! [`GatewayError::Conflict`]. Every async call yields once before touching
//! state, which keeps suspension points realistic in tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{Filter, Gateway, Select, compare_values};
use crate::error::GatewayError;
use crate::models::{AuthEvent, Session, SignUpMetadata, User, UserMetadata};

const BASE_URL: &str = "https://memory.local";

/// Columns forming each table's uniqueness key
fn unique_key(table: &str) -> &'static [&'static str] {
    match table {
        "likes" | "reposts" => &["user_id", "post_id"],
        "follows" => &["follower_id", "following_id"],
        "favorites" => &["user_id", "podcast_id"],
        _ => &["id"],
    }
}

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Value>>,
    accounts: Vec<Account>,
    session: Option<Session>,
    objects: HashMap<(String, String), (Vec<u8>, String)>,
    failures: HashMap<String, usize>,
    calls: Vec<String>,
    clock: i64,
}

/// Gateway backed by process memory
pub struct MemoryGateway {
    state: Mutex<State>,
    events: broadcast::Sender<AuthEvent>,
    epoch: DateTime<Utc>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    /// Create an empty gateway
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(State::default()),
            events,
            epoch: Utc::now() - Duration::days(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert rows directly, bypassing uniqueness checks and the call log
    pub fn seed(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut state = self.state();
        for row in rows {
            let row = self.stamp(&mut state, table, row);
            state.tables.entry(table.to_string()).or_default().push(row);
        }
    }

    /// Register an account that can sign in
    pub fn seed_account(&self, id: &str, email: &str, password: &str, username: Option<&str>) -> User {
        let user = User {
            id: id.to_string(),
            email: Some(email.to_string()),
            user_metadata: UserMetadata {
                username: username.map(str::to_string),
                ..UserMetadata::default()
            },
        };
        self.state().accounts.push(Account {
            user: user.clone(),
            password: password.to_string(),
        });
        user
    }

    /// Replace the current session without emitting an event (simulates a
    /// session persisted by an earlier run)
    pub fn restore_session(&self, session: Option<Session>) {
        self.state().session = session;
    }

    /// Make the next `n` calls touching `target` (table or bucket) fail
    pub fn fail_next(&self, target: &str, n: usize) {
        *self.state().failures.entry(target.to_string()).or_default() += n;
    }

    /// Snapshot of a table
    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state().tables.get(table).cloned().unwrap_or_default()
    }

    /// Stored object bytes and content type
    pub fn object(&self, bucket: &str, path: &str) -> Option<(Vec<u8>, String)> {
        self.state()
            .objects
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
    }

    /// Log of operations issued through the trait, as `op:target`
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Emit an auth event as if another part of the process changed the session
    pub fn emit(&self, event: AuthEvent) {
        let mut state = self.state();
        match &event {
            AuthEvent::SignedIn(s) | AuthEvent::TokenRefreshed(s) => state.session = Some(s.clone()),
            AuthEvent::SignedOut => state.session = None,
        }
        drop(state);
        let _ = self.events.send(event);
    }

    /// Fill `id` and `created_at` when missing. Timestamps advance by one
    /// second per row so ordering is deterministic.
    fn stamp(&self, state: &mut State, table: &str, row: Value) -> Value {
        let Value::Object(mut map) = row else {
            return row;
        };
        state.clock += 1;
        if !map.contains_key("id") && unique_key(table) == ["id"] {
            map.insert("id".into(), Value::String(Uuid::new_v4().to_string()));
        }
        if !map.contains_key("created_at") {
            let at = self.epoch + Duration::seconds(state.clock);
            map.insert(
                "created_at".into(),
                Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
        }
        Value::Object(map)
    }

    /// Record the call and consume an injected failure, if any
    fn enter(&self, op: &str, target: &str) -> Result<MutexGuard<'_, State>, GatewayError> {
        let mut state = self.state();
        state.calls.push(format!("{op}:{target}"));
        if let Some(remaining) = state.failures.get_mut(target)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(GatewayError::Status {
                status: 503,
                message: format!("injected failure on {target}"),
            });
        }
        Ok(state)
    }

    fn new_session(user: &User) -> Session {
        Session {
            access_token: format!("mem-{}", Uuid::new_v4()),
            refresh_token: format!("mem-refresh-{}", Uuid::new_v4()),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            user: user.clone(),
        }
    }
}

fn same_key(table: &str, a: &Value, b: &Value) -> bool {
    unique_key(table).iter().all(|col| {
        let x = a.get(*col);
        x.is_some() && x == b.get(*col)
    })
}

impl Gateway for MemoryGateway {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Option<Session>, GatewayError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("sign_up", "auth")?;
        if state
            .accounts
            .iter()
            .any(|a| a.user.email.as_deref() == Some(email))
        {
            return Err(GatewayError::Status {
                status: 422,
                message: "User already registered".into(),
            });
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            user_metadata: UserMetadata {
                username: Some(metadata.username.clone()).filter(|u| !u.is_empty()),
                ..UserMetadata::default()
            },
        };
        state.accounts.push(Account {
            user: user.clone(),
            password: password.to_string(),
        });
        let session = Self::new_session(&user);
        state.session = Some(session.clone());
        drop(state);
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("sign_in", "auth")?;
        let user = state
            .accounts
            .iter()
            .find(|a| a.user.email.as_deref() == Some(email) && a.password == password)
            .map(|a| a.user.clone())
            .ok_or_else(|| GatewayError::Unauthorized("Invalid login credentials".into()))?;
        let session = Self::new_session(&user);
        state.session = Some(session.clone());
        drop(state);
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("sign_out", "auth")?;
        state.session = None;
        drop(state);
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, GatewayError> {
        tokio::task::yield_now().await;
        let state = self.enter("session", "auth")?;
        Ok(state.session.clone())
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn select(&self, query: &Select) -> Result<Vec<Value>, GatewayError> {
        tokio::task::yield_now().await;
        let state = self.enter("select", &query.table)?;
        let mut rows: Vec<Value> = state
            .tables
            .get(&query.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.filters.iter().all(|f| f.matches(r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ord = compare_values(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.ascending { ord } else { ord.reverse() }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, GatewayError> {
        tokio::task::yield_now().await;
        let state = self.enter("count", table)?;
        let n = state
            .tables
            .get(table)
            .map_or(0, |rows| rows.iter().filter(|r| filters.iter().all(|f| f.matches(r))).count());
        Ok(n as u64)
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, GatewayError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("insert", table)?;
        let row = self.stamp(&mut state, table, row);
        let rows = state.tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| same_key(table, r, &row)) {
            return Err(GatewayError::Conflict(format!(
                "duplicate key value violates unique constraint on {table}"
            )));
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, GatewayError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("delete", table)?;
        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !filters.iter().all(|f| f.matches(r)));
        Ok((before - rows.len()) as u64)
    }

    async fn upsert(&self, table: &str, row: Value) -> Result<Value, GatewayError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("upsert", table)?;
        let rows = state.tables.entry(table.to_string()).or_default();
        if let Some(existing) = rows.iter_mut().find(|r| same_key(table, r, &row)) {
            if let (Value::Object(target), Value::Object(patch)) = (&mut *existing, &row) {
                for (k, v) in patch {
                    target.insert(k.clone(), v.clone());
                }
            }
            return Ok(existing.clone());
        }
        let row = self.stamp(&mut state, table, row);
        state.tables.entry(table.to_string()).or_default().push(row.clone());
        Ok(row)
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), GatewayError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("upload", bucket)?;
        let key = (bucket.to_string(), path.to_string());
        if !upsert && state.objects.contains_key(&key) {
            return Err(GatewayError::Conflict(format!(
                "object {bucket}/{path} already exists"
            )));
        }
        state.objects.insert(key, (bytes, content_type.to_string()));
        Ok(())
    }

    async fn remove(&self, bucket: &str, path: &str) -> Result<(), GatewayError> {
        tokio::task::yield_now().await;
        let mut state = self.enter("remove", bucket)?;
        state.objects.remove(&(bucket.to_string(), path.to_string()));
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{BASE_URL}/storage/v1/object/public/{bucket}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_edge_uniqueness() {
        let gw = MemoryGateway::new();
        let row = json!({"follower_id": "a", "following_id": "b"});
        gw.insert("follows", row.clone()).await.unwrap();
        let err = gw.insert("follows", row).await.unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert_eq!(gw.count("follows", &[Filter::eq("following_id", "b")]).await.unwrap(), 1);
        assert!(gw.rows("follows")[0].get("id").is_none());
    }

    #[tokio::test]
    async fn test_posts_get_ids_and_increasing_timestamps() {
        let gw = MemoryGateway::new();
        let a = gw.insert("posts", json!({"author_id": "u", "text": "one"})).await.unwrap();
        let b = gw.insert("posts", json!({"author_id": "u", "text": "two"})).await.unwrap();
        assert!(a.get("id").is_some());
        assert_ne!(a["id"], b["id"]);

        let rows = gw
            .select(&Select::from("posts").order_desc("created_at"))
            .await
            .unwrap();
        assert_eq!(rows[0]["text"], "two");
        assert_eq!(rows[1]["text"], "one");
    }

    #[tokio::test]
    async fn test_delete_reports_affected_rows() {
        let gw = MemoryGateway::new();
        gw.seed("likes", [json!({"user_id": "u", "post_id": "p"})]);
        let filters = [Filter::eq("user_id", "u"), Filter::eq("post_id", "p")];
        assert_eq!(gw.delete("likes", &filters).await.unwrap(), 1);
        assert_eq!(gw.delete("likes", &filters).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_merges_on_id() {
        let gw = MemoryGateway::new();
        gw.upsert("profiles", json!({"id": "u", "username": "ada"})).await.unwrap();
        gw.upsert("profiles", json!({"id": "u", "bio": "hi"})).await.unwrap();
        let rows = gw.rows("profiles");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["username"], "ada");
        assert_eq!(rows[0]["bio"], "hi");
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let gw = MemoryGateway::new();
        gw.fail_next("posts", 1);
        assert!(gw.select(&Select::from("posts")).await.is_err());
        assert!(gw.select(&Select::from("posts")).await.is_ok());
    }

    #[tokio::test]
    async fn test_auth_round_trip_emits_events() {
        let gw = MemoryGateway::new();
        let mut events = gw.auth_events();
        gw.seed_account("u1", "ada@example.com", "secret1", Some("ada"));

        assert!(gw.sign_in("ada@example.com", "wrong").await.is_err());
        let session = gw.sign_in("ada@example.com", "secret1").await.unwrap();
        assert_eq!(session.user.id, "u1");
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedIn(session.clone()));
        assert_eq!(gw.current_session().await.unwrap(), Some(session));

        gw.sign_out().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
        assert_eq!(gw.current_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upload_refuses_overwrite() {
        let gw = MemoryGateway::new();
        gw.upload("avatars", "u/a.jpg", vec![1], "image/jpeg", false).await.unwrap();
        let err = gw
            .upload("avatars", "u/a.jpg", vec![2], "image/jpeg", false)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
        assert_eq!(gw.object("avatars", "u/a.jpg").unwrap().0, vec![1]);
        assert_eq!(
            gw.public_url("avatars", "u/a.jpg"),
            "https://memory.local/storage/v1/object/public/avatars/u/a.jpg"
        );
    }
}
