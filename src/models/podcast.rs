//! Podcast rows and display records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A `podcasts` table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastRow {
    /// Row id
    pub id: String,
    /// Owning account
    #[serde(default)]
    pub user_id: Option<String>,
    /// Episode title
    #[serde(default)]
    pub title: Option<String>,
    /// Creator name captured at upload time
    #[serde(default)]
    pub artist: Option<String>,
    /// Public cover image URL
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Public video URL
    #[serde(default)]
    pub media_url: Option<String>,
    /// Length in seconds
    #[serde(default)]
    pub duration: Option<u32>,
    /// View counter maintained server-side
    #[serde(default)]
    pub views: Option<u64>,
    /// Insert time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Podcast list filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PodcastFilter {
    /// Newest first
    #[default]
    New,
    /// Recommended (currently the same list as `New`)
    ForYou,
    /// Only the viewer's favorites
    Favorites,
}

impl PodcastFilter {
    /// Parse a CLI value
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "new" => Some(Self::New),
            "for-you" | "foryou" | "for_you" => Some(Self::ForYou),
            "favorites" | "favs" | "fav" => Some(Self::Favorites),
            _ => None,
        }
    }
}

/// A podcast display record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastView {
    /// Podcast id
    pub id: String,
    /// Owning account
    pub owner_id: Option<String>,
    /// Title ("Untitled" when missing)
    pub title: String,
    /// Creator name ("Unknown" when missing)
    pub artist: String,
    /// Cover URL or placeholder
    pub cover_url: String,
    /// Creator avatar URL or placeholder
    pub creator_avatar: String,
    /// Video URL
    pub media_url: Option<String>,
    /// Length in seconds
    pub duration_secs: u32,
    /// Views, when tracked
    pub views: Option<u64>,
    /// Number of viewers who favorited this podcast
    pub favorites: u32,
    /// Whether the viewer favorited this podcast
    pub is_favorite: bool,
}

impl PodcastView {
    /// Duration as `m:ss`
    pub fn duration_label(&self) -> String {
        crate::player::format_time(self.duration_secs)
    }
}
