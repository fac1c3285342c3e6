//! Display-only fallback images and labels
//!
//! Everything here is a pure function of an id. Results are shown when a
//! profile or podcast has no image of its own and are never written back.

use crate::config::PlaceholderConfig;
use crate::models::{Author, Profile, non_empty};

/// Name shown for an author without a profile
pub const UNKNOWN_NAME: &str = "User";

/// Handle shown for an author without a username
pub const UNKNOWN_HANDLE: &str = "@user";

/// Deterministic placeholder generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders {
    avatar_base: String,
    banner_base: String,
    cover_base: String,
}

impl Default for Placeholders {
    fn default() -> Self {
        Self::new(&PlaceholderConfig::default())
    }
}

impl Placeholders {
    /// Build from configured base URLs
    pub fn new(config: &PlaceholderConfig) -> Self {
        Self {
            avatar_base: config.avatar_base.trim_end_matches('/').to_string(),
            banner_base: config.banner_base.trim_end_matches('/').to_string(),
            cover_base: config.cover_base.trim_end_matches('/').to_string(),
        }
    }

    /// Avatar keyed by account id
    pub fn avatar(&self, id: &str) -> String {
        format!("{}?u={}", self.avatar_base, urlencoding::encode(id))
    }

    /// Profile banner keyed by account id
    pub fn banner(&self, id: &str) -> String {
        format!("{}/{}/800/300", self.banner_base, urlencoding::encode(id))
    }

    /// Podcast cover keyed by podcast id
    pub fn cover(&self, id: &str) -> String {
        format!("{}/{}/800/450", self.cover_base, urlencoding::encode(id))
    }

    /// Avatar URL from a profile, or the placeholder for `id`
    pub fn avatar_or(&self, profile: Option<&Profile>, id: &str) -> String {
        profile
            .and_then(|p| non_empty(p.avatar_url.as_deref()))
            .map_or_else(|| self.avatar(id), str::to_string)
    }

    /// Author display fields. Never empty, whatever is missing.
    pub fn author(&self, profile: Option<&Profile>, author_id: Option<&str>) -> Author {
        Author {
            name: profile
                .and_then(Profile::shown_name)
                .unwrap_or(UNKNOWN_NAME)
                .to_string(),
            handle: profile
                .and_then(Profile::handle)
                .unwrap_or_else(|| UNKNOWN_HANDLE.to_string()),
            avatar: self.avatar_or(profile, author_id.unwrap_or("anonymous")),
        }
    }
}
