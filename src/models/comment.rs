//! Comments (append-only from the client's perspective)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Author, non_empty, time_ago};

/// A `comments` table row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRow {
    /// Row id
    pub id: String,
    /// Commented post
    pub post_id: String,
    /// Commenting account
    #[serde(default)]
    pub author_id: Option<String>,
    /// Body text
    #[serde(default)]
    pub text: Option<String>,
    /// Legacy body column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Insert time
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl CommentRow {
    /// Body text, falling back to the legacy column
    pub fn body(&self) -> &str {
        non_empty(self.text.as_deref())
            .or_else(|| non_empty(self.content.as_deref()))
            .unwrap_or("")
    }
}

/// A comment display record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment id
    pub id: String,
    /// Author display fields
    pub author: Author,
    /// Body text
    pub text: String,
    /// When the comment was written
    pub created_at: Option<DateTime<Utc>>,
}

impl Comment {
    /// Relative time string, empty when unknown
    pub fn relative_time(&self) -> String {
        self.created_at
            .map(|t| time_ago(t, Utc::now()))
            .unwrap_or_default()
    }
}
