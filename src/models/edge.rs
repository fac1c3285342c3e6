//! Edge tables: binary relationships between an account and a subject

use serde_json::{Value, json};

use crate::gateway::Filter;

/// Kind of relationship row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// account → liked post
    Like,
    /// account → reposted post
    Repost,
    /// follower → followed account
    Follow,
    /// account → favorited podcast
    Favorite,
}

impl EdgeKind {
    /// Backing table
    pub const fn table(&self) -> &'static str {
        match self {
            Self::Like => "likes",
            Self::Repost => "reposts",
            Self::Follow => "follows",
            Self::Favorite => "favorites",
        }
    }

    /// Column holding the acting account
    pub const fn subject_column(&self) -> &'static str {
        match self {
            Self::Follow => "follower_id",
            Self::Like | Self::Repost | Self::Favorite => "user_id",
        }
    }

    /// Column holding the target entity
    pub const fn target_column(&self) -> &'static str {
        match self {
            Self::Like | Self::Repost => "post_id",
            Self::Follow => "following_id",
            Self::Favorite => "podcast_id",
        }
    }

    /// Human-readable verb for notices
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Like => "like",
            Self::Repost => "repost",
            Self::Follow => "follow",
            Self::Favorite => "favorite",
        }
    }
}

/// A single (subject, target) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Relationship kind
    pub kind: EdgeKind,
    /// Acting account
    pub subject_id: String,
    /// Target post, account or podcast
    pub target_id: String,
}

impl Edge {
    /// Create an edge
    pub fn new(kind: EdgeKind, subject_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self {
            kind,
            subject_id: subject_id.into(),
            target_id: target_id.into(),
        }
    }

    /// Row payload for insert
    pub fn to_row(&self) -> Value {
        json!({
            self.kind.subject_column(): self.subject_id,
            self.kind.target_column(): self.target_id,
        })
    }

    /// Filters matching exactly this edge
    pub fn filters(&self) -> Vec<Filter> {
        vec![
            Filter::eq(self.kind.subject_column(), self.subject_id.as_str()),
            Filter::eq(self.kind.target_column(), self.target_id.as_str()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_row_shape() {
        let edge = Edge::new(EdgeKind::Follow, "a", "b");
        assert_eq!(edge.to_row(), json!({"follower_id": "a", "following_id": "b"}));
        assert_eq!(edge.kind.table(), "follows");
    }

    #[test]
    fn test_favorite_filters() {
        let edge = Edge::new(EdgeKind::Favorite, "u1", "pod9");
        let filters = edge.filters();
        assert_eq!(filters[0], Filter::eq("user_id", "u1"));
        assert_eq!(filters[1], Filter::eq("podcast_id", "pod9"));
    }
}
