//! Post rows and the denormalized post display record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{non_empty, time_ago};

/// A `posts` table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRow {
    /// Row id
    pub id: String,
    /// Account that wrote the post
    #[serde(default)]
    pub author_id: Option<String>,
    /// Body text
    #[serde(default)]
    pub text: Option<String>,
    /// Legacy body column, read when `text` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Public URL of the attached media
    #[serde(default)]
    pub media_url: Option<String>,
    /// `image` or `video`
    #[serde(default)]
    pub media_type: Option<String>,
    /// Insert time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl PostRow {
    /// Body text, falling back to the legacy column
    pub fn body(&self) -> &str {
        non_empty(self.text.as_deref())
            .or_else(|| non_empty(self.content.as_deref()))
            .unwrap_or("")
    }

    /// Attached media, if any
    pub fn media(&self) -> Option<Media> {
        let url = non_empty(self.media_url.as_deref())?;
        Some(Media {
            url: url.to_string(),
            kind: self
                .media_type
                .as_deref()
                .and_then(MediaKind::from_str)
                .unwrap_or(MediaKind::Image),
        })
    }
}

/// Media kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image
    Image,
    /// Video clip
    Video,
}

impl MediaKind {
    /// Column value
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// Parse a column value
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "image" | "photo" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Media attached to a post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    /// Public URL
    pub url: String,
    /// Image or video
    pub kind: MediaKind,
}

/// Author fields as shown next to a post or comment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Display name ("User" when unknown)
    pub name: String,
    /// `@username` ("@user" when unknown)
    pub handle: String,
    /// Avatar URL, a generated placeholder when the profile has none
    pub avatar: String,
}

/// A post display record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    /// Post id
    pub id: String,
    /// Author account id, used for profile navigation
    pub author_id: Option<String>,
    /// Author display fields
    pub author: Author,
    /// Body text (may be empty for media-only posts)
    pub text: String,
    /// Attached media
    pub media: Option<Media>,
    /// When the post was created, if the row carried a timestamp
    pub created_at: Option<DateTime<Utc>>,
    /// Number of likes
    pub likes: u32,
    /// Number of comments
    pub comments: u32,
    /// Number of reposts
    pub reposts: u32,
    /// Whether the viewer liked this post
    pub liked_by_me: bool,
    /// Whether the viewer reposted this post
    pub is_reposted: bool,
}

impl Post {
    /// Relative time string (e.g., "5m", "2h", "3d"), empty when unknown
    pub fn relative_time(&self) -> String {
        self.created_at
            .map(|t| time_ago(t, Utc::now()))
            .unwrap_or_default()
    }

    /// Short single-line preview of the body
    pub fn preview(&self, max_chars: usize) -> String {
        let content = self.text.replace('\n', " ");
        if content.chars().count() <= max_chars {
            content
        } else {
            let cut: String = content.chars().take(max_chars.saturating_sub(3)).collect();
            format!("{cut}...")
        }
    }
}
