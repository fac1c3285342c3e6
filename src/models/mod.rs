//! Data models for Murmur
//!
//! `*Row` types mirror gateway tables one-to-one. Display records
//! ([`Post`], [`Comment`], [`PodcastView`], [`ProfileView`]) are the joined,
//! placeholder-filled shapes handed to the presentation layer.

mod comment;
mod edge;
mod podcast;
mod post;
mod profile;
mod session;

pub use comment::{Comment, CommentRow};
pub use edge::{Edge, EdgeKind};
pub use podcast::{PodcastFilter, PodcastRow, PodcastView};
pub use post::{Author, Media, MediaKind, Post, PostRow};
pub use profile::{Profile, ProfileView};
pub use session::{AuthEvent, Session, SignUpMetadata, User, UserMetadata};

use chrono::{DateTime, Utc};

/// Compact "time ago" label (`42s`, `5m`, `3h`, `2d`)
pub fn time_ago(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(created_at).num_seconds().max(0);

    if seconds < 60 {
        return format!("{seconds}s");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes}m");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours}h");
    }
    format!("{}d", hours / 24)
}

/// Treat blank strings the same as missing values
pub(crate) fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
