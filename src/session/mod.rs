//! Session/Profile Provider
//!
//! Single source of truth for who is signed in and their profile row. The
//! state moves `Uninitialized → Checking → Authenticated | Anonymous` at
//! startup and is re-driven by every auth event afterwards. Consumers watch
//! it through a [`tokio::sync::watch`] channel and must treat
//! [`SessionState::is_loading`] as "unknown", not "signed out".

mod store;

pub use store::SessionStore;

use std::cell::RefCell;
use std::rc::Rc;

use chrono::Utc;
use regex_lite::Regex;
use serde_json::json;
use tokio::sync::{broadcast, watch};

use crate::error::{Error, GatewayError, Result, ValidationError};
use crate::gateway::{Gateway, Select, decode_rows};
use crate::models::{AuthEvent, Profile, Session, SignUpMetadata, User};

/// Minimum password length accepted by the backend
pub const MIN_PASSWORD_LEN: usize = 6;

const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Identity state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Provider created, startup check not begun
    #[default]
    Uninitialized,
    /// Asking the gateway for a persisted session
    Checking,
    /// Signed in; the profile arrives after the session
    Authenticated {
        /// Active session
        session: Session,
        /// Profile row, `None` while it loads
        profile: Option<Profile>,
    },
    /// Nobody signed in
    Anonymous,
}

impl SessionState {
    /// Identity is not known yet
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Uninitialized | Self::Checking)
    }

    /// Signed-in account
    pub const fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated { session, .. } => Some(&session.user),
            _ => None,
        }
    }

    /// Signed-in account id
    pub fn user_id(&self) -> Option<&str> {
        self.user().map(|u| u.id.as_str())
    }

    /// Loaded profile row
    pub const fn profile(&self) -> Option<&Profile> {
        match self {
            Self::Authenticated { profile, .. } => profile.as_ref(),
            _ => None,
        }
    }
}

/// Check an email address shape
pub fn is_valid_email(email: &str) -> bool {
    Regex::new(EMAIL_PATTERN).is_ok_and(|re| re.is_match(email.trim()))
}

fn validate_credentials(email: &str, password: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() || password.is_empty() {
        return Err(ValidationError::MissingField);
    }
    if !is_valid_email(email) {
        return Err(ValidationError::InvalidEmail);
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::WeakPassword(MIN_PASSWORD_LEN));
    }
    Ok(())
}

/// Username for a freshly created profile row
fn default_username(user: &User) -> String {
    user.user_metadata
        .username
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| user.email_name())
        .unwrap_or("user")
        .to_string()
}

/// Load the account's profile row, creating it when missing
pub async fn fetch_or_create_profile<G: Gateway>(gateway: &G, user: &User) -> Result<Profile, GatewayError> {
    let rows = gateway
        .select(&Select::from("profiles").eq("id", user.id.as_str()).limit(1))
        .await?;
    if let Some(profile) = decode_rows::<Profile>("profiles", rows).into_iter().next() {
        return Ok(profile);
    }

    tracing::info!("Creating profile row for {}", user.id);
    let row = gateway
        .upsert(
            "profiles",
            json!({
                "id": user.id,
                "username": default_username(user),
                "updated_at": Utc::now(),
            }),
        )
        .await?;
    Ok(serde_json::from_value(row)?)
}

/// Process-wide identity holder
pub struct SessionProvider<G> {
    gateway: Rc<G>,
    state: watch::Sender<SessionState>,
    /// Account whose profile fetch is in flight
    profile_pending: RefCell<Option<String>>,
}

impl<G: Gateway> SessionProvider<G> {
    /// Create a provider in the `Uninitialized` state
    pub fn new(gateway: Rc<G>) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            gateway,
            state,
            profile_pending: RefCell::new(None),
        }
    }

    /// Observe state changes
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Current state snapshot
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Signed-in account id
    pub fn viewer_id(&self) -> Option<String> {
        self.state.borrow().user_id().map(str::to_string)
    }

    /// Shared gateway handle
    pub fn gateway(&self) -> &Rc<G> {
        &self.gateway
    }

    /// Startup check: rehydrate a persisted session, then load its profile.
    /// Gateway failures degrade to `Anonymous`.
    pub async fn initialize(&self) {
        self.state.send_replace(SessionState::Checking);
        match self.gateway.current_session().await {
            Ok(Some(session)) => self.authenticate(session).await,
            Ok(None) => {
                self.state.send_replace(SessionState::Anonymous);
            }
            Err(e) => {
                tracing::warn!("Session check failed, continuing signed out: {e}");
                self.state.send_replace(SessionState::Anonymous);
            }
        }
    }

    /// Apply one auth state change notification
    pub async fn handle_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                self.authenticate(session).await;
            }
            AuthEvent::SignedOut => {
                self.state.send_replace(SessionState::Anonymous);
            }
        }
    }

    /// Follow gateway auth events until the gateway goes away
    pub async fn run(&self, mut events: broadcast::Receiver<AuthEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(event).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!("Missed {missed} auth events, re-checking session");
                    self.initialize().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Enter `Authenticated` and load the profile. A profile already held
    /// for the same account is kept across token refreshes.
    async fn authenticate(&self, session: Session) {
        let user = session.user.clone();
        let mut needs_profile = true;
        self.state.send_modify(|state| {
            let kept = match state {
                SessionState::Authenticated { session: old, profile } if old.user.id == user.id => {
                    profile.take()
                }
                _ => None,
            };
            needs_profile = kept.is_none();
            *state = SessionState::Authenticated { session, profile: kept };
        });
        if needs_profile {
            self.load_profile(&user).await;
        }
    }

    /// Fetch the profile for `user` and store it if `user` is still the one
    /// signed in when the fetch resolves. A fetch already running for the
    /// same account is not repeated.
    async fn load_profile(&self, user: &User) {
        if self.profile_pending.borrow().as_deref() == Some(user.id.as_str()) {
            tracing::debug!("Profile for {} is already loading", user.id);
            return;
        }
        *self.profile_pending.borrow_mut() = Some(user.id.clone());
        let fetched = fetch_or_create_profile(self.gateway.as_ref(), user).await;
        {
            let mut pending = self.profile_pending.borrow_mut();
            if pending.as_deref() == Some(user.id.as_str()) {
                *pending = None;
            }
        }

        let profile = match fetched {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("Failed to load profile for {}: {e}", user.id);
                return;
            }
        };
        self.state.send_if_modified(|state| match state {
            SessionState::Authenticated { session, profile: slot } if session.user.id == user.id => {
                *slot = Some(profile);
                true
            }
            _ => {
                tracing::debug!("Discarding profile for {}: identity changed", user.id);
                false
            }
        });
    }

    /// Re-read the signed-in account's profile (after an edit)
    pub async fn refresh_profile(&self) {
        let user = self.state.borrow().user().cloned();
        if let Some(user) = user {
            self.load_profile(&user).await;
        }
    }

    /// Sign in with email and password
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ValidationError::MissingField.into());
        }
        let session = self.gateway.sign_in(email.trim(), password).await?;
        self.authenticate(session.clone()).await;
        Ok(session)
    }

    /// Create an account. Returns `None` when the backend requires email
    /// confirmation before a session exists.
    pub async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<Option<Session>> {
        if username.trim().is_empty() {
            return Err(ValidationError::MissingField.into());
        }
        validate_credentials(email, password)?;
        let metadata = SignUpMetadata {
            username: username.trim().to_string(),
        };
        let session = self.gateway.sign_up(email.trim(), password, &metadata).await?;
        if let Some(session) = &session {
            self.authenticate(session.clone()).await;
        }
        Ok(session)
    }

    /// End the session
    pub async fn sign_out(&self) -> Result<()> {
        self.gateway.sign_out().await.map_err(Error::from)?;
        self.state.send_replace(SessionState::Anonymous);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryGateway;
    use tokio_test::assert_ok;

    fn provider() -> (Rc<MemoryGateway>, SessionProvider<MemoryGateway>) {
        let gw = Rc::new(MemoryGateway::new());
        let provider = SessionProvider::new(Rc::clone(&gw));
        (gw, provider)
    }

    #[test]
    fn test_credential_validation() {
        assert_eq!(validate_credentials("", "secret1"), Err(ValidationError::MissingField));
        assert_eq!(validate_credentials("nope", "secret1"), Err(ValidationError::InvalidEmail));
        assert_eq!(
            validate_credentials("ada@example.com", "12345"),
            Err(ValidationError::WeakPassword(6))
        );
        assert_ok!(validate_credentials("ada@example.com", "123456"));
    }

    #[test]
    fn test_loading_gates_anonymous() {
        assert!(SessionState::Uninitialized.is_loading());
        assert!(SessionState::Checking.is_loading());
        assert!(SessionState::Checking.user().is_none());
        assert!(!SessionState::Anonymous.is_loading());
    }

    #[tokio::test]
    async fn test_initialize_without_session_is_anonymous() {
        let (_, provider) = provider();
        let rx = provider.subscribe();
        assert_eq!(*rx.borrow(), SessionState::Uninitialized);
        provider.initialize().await;
        assert_eq!(provider.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_initialize_failure_degrades_to_anonymous() {
        let (gw, provider) = provider();
        gw.fail_next("auth", 1);
        provider.initialize().await;
        assert_eq!(provider.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_rehydrated_session_creates_profile_from_email() {
        let (gw, provider) = provider();
        gw.seed_account("u1", "grace@example.com", "secret1", None);
        let session = gw.sign_in("grace@example.com", "secret1").await.unwrap();
        gw.restore_session(Some(session));

        provider.initialize().await;

        let state = provider.state();
        assert_eq!(state.user_id(), Some("u1"));
        assert_eq!(state.profile().unwrap().username.as_deref(), Some("grace"));
        assert_eq!(gw.rows("profiles").len(), 1);
    }

    #[tokio::test]
    async fn test_sign_up_uses_metadata_username() {
        let (gw, provider) = provider();
        let session = provider
            .sign_up("ada@example.com", "secret1", "lovelace")
            .await
            .unwrap()
            .unwrap();
        let state = provider.state();
        assert_eq!(state.user_id(), Some(session.user_id()));
        assert_eq!(state.profile().unwrap().username.as_deref(), Some("lovelace"));
        assert_eq!(gw.rows("profiles")[0]["username"], "lovelace");
    }

    #[tokio::test]
    async fn test_sign_up_rejects_before_gateway_call() {
        let (gw, provider) = provider();
        let err = provider.sign_up("ada@example.com", "123", "ada").await.unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::WeakPassword(6))));
        assert!(gw.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sign_out_event_returns_to_anonymous() {
        let (gw, provider) = provider();
        gw.seed_account("u1", "ada@example.com", "secret1", Some("ada"));
        provider.sign_in("ada@example.com", "secret1").await.unwrap();
        assert!(provider.state().profile().is_some());

        provider.handle_event(AuthEvent::SignedOut).await;
        assert_eq!(provider.state(), SessionState::Anonymous);
        assert_eq!(provider.viewer_id(), None);
    }

    #[tokio::test]
    async fn test_token_refresh_keeps_profile() {
        let (gw, provider) = provider();
        gw.seed_account("u1", "ada@example.com", "secret1", Some("ada"));
        let session = provider.sign_in("ada@example.com", "secret1").await.unwrap();
        let profile_reads = gw.calls().iter().filter(|c| *c == "select:profiles").count();

        provider.handle_event(AuthEvent::TokenRefreshed(session)).await;
        assert!(provider.state().profile().is_some());
        let after = gw.calls().iter().filter(|c| *c == "select:profiles").count();
        assert_eq!(profile_reads, after);
    }

    #[tokio::test]
    async fn test_sign_in_with_event_loop_loads_profile_once() {
        let (gw, provider) = provider();
        gw.seed_account("u1", "ada@example.com", "secret1", None);
        let events = gw.auth_events();

        tokio::task::LocalSet::new()
            .run_until(async {
                let provider = Rc::new(provider);
                let runner = Rc::clone(&provider);
                let task = tokio::task::spawn_local(async move { runner.run(events).await });

                provider.sign_in("ada@example.com", "secret1").await.unwrap();
                assert!(provider.state().profile().is_some());
                for _ in 0..10 {
                    tokio::task::yield_now().await;
                }

                let calls = gw.calls();
                assert_eq!(calls.iter().filter(|c| *c == "select:profiles").count(), 1);
                assert_eq!(calls.iter().filter(|c| *c == "upsert:profiles").count(), 1);
                assert!(provider.state().profile().is_some());
                task.abort();
            })
            .await;
    }

    #[tokio::test]
    async fn test_late_profile_for_previous_identity_is_discarded() {
        let (gw, provider) = provider();
        let ada = gw.seed_account("u1", "ada@example.com", "secret1", Some("ada"));
        provider.sign_in("ada@example.com", "secret1").await.unwrap();
        provider.handle_event(AuthEvent::SignedOut).await;

        provider.load_profile(&ada).await;
        assert_eq!(provider.state(), SessionState::Anonymous);
    }

    #[tokio::test]
    async fn test_run_follows_external_events() {
        let (gw, provider) = provider();
        gw.seed_account("u1", "ada@example.com", "secret1", Some("ada"));
        let events = gw.auth_events();
        let mut rx = provider.subscribe();

        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let provider = Rc::new(provider);
                let runner = Rc::clone(&provider);
                let task = tokio::task::spawn_local(async move { runner.run(events).await });

                gw.sign_in("ada@example.com", "secret1").await.unwrap();
                rx.wait_for(|s| s.profile().is_some()).await.unwrap();
                assert_eq!(provider.viewer_id().as_deref(), Some("u1"));

                gw.sign_out().await.unwrap();
                rx.wait_for(|s| *s == SessionState::Anonymous).await.unwrap();
                task.abort();
            })
            .await;
    }
}
