//! Authenticated identity as reported by the gateway

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata attached to an account at sign-up
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserMetadata {
    /// Chosen username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Full name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    /// Avatar URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    /// Bio
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// An account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Account id (also the profile id)
    pub id: String,
    /// Sign-in email
    #[serde(default)]
    pub email: Option<String>,
    /// Sign-up metadata
    #[serde(default)]
    pub user_metadata: UserMetadata,
}

impl User {
    /// Local part of the email address
    pub fn email_name(&self) -> Option<&str> {
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|s| !s.is_empty())
    }
}

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Bearer token for row and storage calls
    pub access_token: String,
    /// Token used to mint a new access token
    pub refresh_token: String,
    /// Access token expiry
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Signed-in account
    pub user: User,
}

impl Session {
    /// Whether the access token is past (or within a minute of) expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|at| at <= now + chrono::Duration::seconds(60))
    }

    /// Account id shortcut
    pub fn user_id(&self) -> &str {
        &self.user.id
    }
}

/// Extra fields sent with sign-up
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignUpMetadata {
    /// Chosen username
    pub username: String,
}

/// Auth state change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// A session was established
    SignedIn(Session),
    /// The access token was refreshed
    TokenRefreshed(Session),
    /// The session ended
    SignedOut,
}
