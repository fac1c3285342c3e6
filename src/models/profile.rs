//! Profiles (one per account, id equal to the account id)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::non_empty;

/// A `profiles` table row
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Profile {
    /// Account id
    pub id: String,
    /// Unique handle without the `@`
    #[serde(default)]
    pub username: Option<String>,
    /// Free-form display name
    #[serde(default)]
    pub display_name: Option<String>,
    /// Avatar URL
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// Banner URL
    #[serde(default)]
    pub banner_url: Option<String>,
    /// Short bio
    #[serde(default)]
    pub bio: Option<String>,
    /// Comma-separated interests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interests: Option<String>,
    /// Verified badge
    #[serde(default)]
    pub is_verified: bool,
    /// Subscription plan name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    /// Last edit time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Profile {
    /// Name to show: display name, then username
    pub fn shown_name(&self) -> Option<&str> {
        non_empty(self.display_name.as_deref()).or_else(|| non_empty(self.username.as_deref()))
    }

    /// `@username`, if a username is set
    pub fn handle(&self) -> Option<String> {
        non_empty(self.username.as_deref()).map(|u| format!("@{u}"))
    }
}

/// A profile display record with follow statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileView {
    /// Account id
    pub id: String,
    /// Display name or "User"
    pub name: String,
    /// `@username` or "@user"
    pub handle: String,
    /// Avatar URL or placeholder
    pub avatar: String,
    /// Banner URL or placeholder
    pub banner: String,
    /// Bio (may be empty)
    pub bio: String,
    /// Verified badge
    pub is_verified: bool,
    /// Accounts following this profile
    pub followers: u32,
    /// Accounts this profile follows
    pub following: u32,
    /// Whether this is the viewer's own profile
    pub is_own: bool,
    /// Whether the viewer follows this profile
    pub is_following: bool,
}
