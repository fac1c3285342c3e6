//! Hosted backend client (auth, REST rows, object storage)

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;

use super::{Filter, Gateway, Select};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::models::{AuthEvent, Session, SignUpMetadata, User};
use crate::session::SessionStore;

/// HTTP client for a Supabase-compatible project
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    store: Option<SessionStore>,
    events: broadcast::Sender<AuthEvent>,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| self.expires_in.map(|secs| now + chrono::Duration::seconds(secs)))
            .or_else(|| token_expiry(&self.access_token));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Decode the (unverified) claims segment of a JWT
fn jwt_claims(token: &str) -> Option<Value> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// `exp` claim of a JWT
fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let exp = jwt_claims(token)?.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Pull a human-readable message out of an error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Parse the total from a `Content-Range` header (`0-9/42` or `*/42`)
fn parse_content_range(value: &str) -> Option<u64> {
    value.rsplit('/').next()?.parse().ok()
}

/// Percent-encode each segment of an object path, keeping the separators
fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

async fn check(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::from_status(status.as_u16(), error_message(&body)))
}

async fn check_storage(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    // Storage reports duplicates as 400 with a nested "409" status code
    let duplicate = status.as_u16() == 409
        || serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("statusCode").and_then(Value::as_str).map(|s| s == "409"))
            .unwrap_or(false);
    if duplicate {
        return Err(GatewayError::Conflict(message));
    }
    match GatewayError::from_status(status.as_u16(), message) {
        GatewayError::Status { message, .. } => Err(GatewayError::Storage(message)),
        other => Err(other),
    }
}

impl SupabaseClient {
    /// Build a client from connection settings. `store` persists the session
    /// across runs when given.
    pub fn new(config: &GatewayConfig, store: Option<SessionStore>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let (events, _) = broadcast::channel(16);
        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            session: RwLock::new(None),
            store,
            events,
        })
    }

    fn cached_session(&self) -> Option<Session> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_session(&self, session: Option<Session>) {
        if let Some(store) = &self.store {
            let result = match &session {
                Some(s) => store.save(s),
                None => store.clear(),
            };
            if let Err(e) = result {
                tracing::warn!("Failed to persist session: {e:#}");
            }
        }
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn bearer(&self) -> String {
        self.cached_session()
            .map_or_else(|| self.anon_key.clone(), |s| s.access_token)
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", self.bearer()))
    }

    fn rest_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/rest/v1/{table}", self.base_url)
        } else {
            format!("{}/rest/v1/{table}?{query}", self.base_url)
        }
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<Session, GatewayError> {
        let url = format!("{}/auth/v1/token?grant_type={grant_type}", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;
        let token: TokenResponse = check(response).await?.json().await?;
        Ok(token.into_session(Utc::now()))
    }

    /// Exchange the refresh token for a new session
    async fn refresh(&self, refresh_token: &str) -> Result<Session, GatewayError> {
        tracing::debug!("Refreshing access token");
        self.token_grant("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }

    fn publish(&self, event: AuthEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }
}

impl Gateway for SupabaseClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<Option<Session>, GatewayError> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("apikey", &self.anon_key)
            .json(&json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await?;
        let body: Value = check(response).await?.json().await?;

        // Without auto-confirm the backend returns the bare user
        if body.get("access_token").is_none() {
            tracing::info!("Sign-up pending email confirmation");
            return Ok(None);
        }
        let token: TokenResponse = serde_json::from_value(body)?;
        let session = token.into_session(Utc::now());
        self.set_session(Some(session.clone()));
        self.publish(AuthEvent::SignedIn(session.clone()));
        Ok(Some(session))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, GatewayError> {
        let session = self
            .token_grant("password", json!({ "email": email, "password": password }))
            .await
            .map_err(|e| match e {
                // Bad credentials come back as 400 invalid_grant
                GatewayError::Status { status: 400, message } => GatewayError::Unauthorized(message),
                other => other,
            })?;
        self.set_session(Some(session.clone()));
        self.publish(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        if self.cached_session().is_some() {
            let url = format!("{}/auth/v1/logout", self.base_url);
            match self.request(Method::POST, &url).send().await {
                Ok(response) => {
                    if let Err(e) = check(response).await {
                        tracing::warn!("Remote sign-out failed: {e}");
                    }
                }
                Err(e) => tracing::warn!("Remote sign-out failed: {e}"),
            }
        }
        self.set_session(None);
        self.publish(AuthEvent::SignedOut);
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, GatewayError> {
        let session = match self.cached_session() {
            Some(s) => Some(s),
            None => self.store.as_ref().and_then(|store| {
                store
                    .load()
                    .inspect_err(|e| tracing::warn!("Ignoring unreadable session file: {e:#}"))
                    .ok()
                    .flatten()
            }),
        };
        let Some(session) = session else {
            return Ok(None);
        };

        if !session.is_expired(Utc::now()) {
            *self.session.write().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
            return Ok(Some(session));
        }

        match self.refresh(&session.refresh_token).await {
            Ok(fresh) => {
                self.set_session(Some(fresh.clone()));
                self.publish(AuthEvent::TokenRefreshed(fresh.clone()));
                Ok(Some(fresh))
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                tracing::info!("Stored session could not be refreshed: {e}");
                self.set_session(None);
                Ok(None)
            }
        }
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn select(&self, query: &Select) -> Result<Vec<Value>, GatewayError> {
        let url = self.rest_url(&query.table, &query.to_query_string());
        let response = self.request(Method::GET, &url).send().await?;
        Ok(check(response).await?.json().await?)
    }

    async fn count(&self, table: &str, filters: &[Filter]) -> Result<u64, GatewayError> {
        let query = Select::from(table)
            .columns("*")
            .filters(filters.iter().cloned())
            .to_query_string();
        let response = self
            .request(Method::HEAD, &self.rest_url(table, &query))
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let response = check(response).await?;
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| GatewayError::Status {
                status: response.status().as_u16(),
                message: format!("missing row count for {table}"),
            })
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value, GatewayError> {
        let response = self
            .request(Method::POST, &self.rest_url(table, ""))
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let mut rows: Vec<Value> = check(response).await?.json().await?;
        rows.pop()
            .ok_or_else(|| GatewayError::NotFound(format!("insert into {table} returned no row")))
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, GatewayError> {
        let query = Select::from(table)
            .filters(filters.iter().cloned())
            .filter_query_string();
        let response = self
            .request(Method::DELETE, &self.rest_url(table, &query))
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let rows: Vec<Value> = check(response).await?.json().await?;
        Ok(rows.len() as u64)
    }

    async fn upsert(&self, table: &str, row: Value) -> Result<Value, GatewayError> {
        let response = self
            .request(Method::POST, &self.rest_url(table, ""))
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row)
            .send()
            .await?;
        let mut rows: Vec<Value> = check(response).await?.json().await?;
        rows.pop()
            .ok_or_else(|| GatewayError::NotFound(format!("upsert into {table} returned no row")))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
        upsert: bool,
    ) -> Result<(), GatewayError> {
        let url = format!(
            "{}/storage/v1/object/{bucket}/{}",
            self.base_url,
            encode_object_path(path)
        );
        tracing::debug!("Uploading {} bytes to {bucket}/{path}", bytes.len());
        let response = self
            .request(Method::POST, &url)
            .header("Content-Type", content_type)
            .header("x-upsert", if upsert { "true" } else { "false" })
            .body(bytes)
            .send()
            .await?;
        check_storage(response).await?;
        Ok(())
    }

    async fn remove(&self, bucket: &str, path: &str) -> Result<(), GatewayError> {
        let url = format!(
            "{}/storage/v1/object/{bucket}/{}",
            self.base_url,
            encode_object_path(path)
        );
        tracing::debug!("Removing {bucket}/{path}");
        let response = self.request(Method::DELETE, &url).send().await?;
        check_storage(response).await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{bucket}/{}",
            self.base_url,
            encode_object_path(path)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SupabaseClient {
        let config = GatewayConfig {
            url: "https://proj.supabase.co/".into(),
            anon_key: "anon".into(),
            timeout_secs: 5,
        };
        SupabaseClient::new(&config, None).unwrap()
    }

    #[test]
    fn test_jwt_expiry() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"u1","exp":1700000000}"#);
        let token = format!("h.{payload}.sig");
        assert_eq!(token_expiry(&token).unwrap().timestamp(), 1_700_000_000);
        assert!(token_expiry("not-a-jwt").is_none());
    }

    #[test]
    fn test_token_expiry_precedence() {
        let now = Utc::now();
        let response = TokenResponse {
            access_token: "x.y.z".into(),
            refresh_token: "r".into(),
            expires_in: Some(3600),
            expires_at: None,
            user: User {
                id: "u1".into(),
                email: None,
                user_metadata: crate::models::UserMetadata::default(),
            },
        };
        let session = response.into_session(now);
        assert_eq!(session.expires_at, Some(now + chrono::Duration::seconds(3600)));
    }

    #[test]
    fn test_content_range() {
        assert_eq!(parse_content_range("0-9/42"), Some(42));
        assert_eq!(parse_content_range("*/0"), Some(0));
        assert_eq!(parse_content_range("*/*"), None);
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(error_message(r#"{"message":"duplicate key"}"#), "duplicate key");
        assert_eq!(error_message(r#"{"error_description":"Invalid login credentials"}"#), "Invalid login credentials");
        assert_eq!(error_message(" plain text "), "plain text");
    }

    #[test]
    fn test_urls() {
        let c = client();
        assert_eq!(c.rest_url("posts", ""), "https://proj.supabase.co/rest/v1/posts");
        assert_eq!(
            c.public_url("avatars", "u1/avatar_1_abc.jpg"),
            "https://proj.supabase.co/storage/v1/object/public/avatars/u1/avatar_1_abc.jpg"
        );
        assert_eq!(encode_object_path("a b/c.png"), "a%20b/c.png");
    }

    #[test]
    fn test_anonymous_bearer_is_anon_key() {
        assert_eq!(client().bearer(), "anon");
    }
}
