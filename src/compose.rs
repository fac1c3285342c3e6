//! Write path: posts, comments, podcasts and profile edits
//!
//! Input is validated before any gateway call. Media is uploaded first and
//! the owning row is written only once every URL is known; a failed upload
//! aborts the whole action. Podcast objects already stored by an aborted
//! action are removed again.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::error::{Error, GatewayError, Result, ValidationError};
use crate::gateway::Gateway;
use crate::models::{CommentRow, PodcastRow, PostRow, Profile, User, non_empty};
use crate::session::{SessionProvider, SessionState};
use crate::upload::{Bucket, MediaUpload, discard, store, upload};

/// Maximum bio length in characters
pub const BIO_MAX_CHARS: usize = 150;

/// Artist name used when the creator has no name at all
pub const UNKNOWN_CREATOR: &str = "Unknown Creator";

/// A post being composed
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    /// Body text
    pub text: String,
    /// Optional image or video
    pub media: Option<MediaUpload>,
}

/// A podcast being uploaded
#[derive(Debug, Clone, Default)]
pub struct NewPodcast {
    /// Title
    pub title: String,
    /// Cover image (required)
    pub cover: Option<MediaUpload>,
    /// Video file (required)
    pub video: Option<MediaUpload>,
    /// Length in seconds
    pub duration_secs: u32,
}

/// Profile fields to change. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct ProfileEdit {
    /// New display name
    pub display_name: Option<String>,
    /// New username
    pub username: Option<String>,
    /// New bio
    pub bio: Option<String>,
    /// New avatar image
    pub avatar: Option<MediaUpload>,
    /// New banner image
    pub banner: Option<MediaUpload>,
}

/// Reject a post with neither text nor media
pub fn validate_post(post: &NewPost) -> Result<(), ValidationError> {
    if post.text.trim().is_empty() && post.media.is_none() {
        return Err(ValidationError::EmptyPost);
    }
    Ok(())
}

/// Reject an incomplete podcast
pub fn validate_podcast(podcast: &NewPodcast) -> Result<(), ValidationError> {
    if podcast.title.trim().is_empty() {
        return Err(ValidationError::MissingTitle);
    }
    if podcast.cover.is_none() {
        return Err(ValidationError::MissingMedia("cover image"));
    }
    if podcast.video.is_none() {
        return Err(ValidationError::MissingMedia("video file"));
    }
    Ok(())
}

/// Reject an over-long bio
pub fn validate_profile_edit(edit: &ProfileEdit) -> Result<(), ValidationError> {
    if edit
        .bio
        .as_deref()
        .is_some_and(|bio| bio.chars().count() > BIO_MAX_CHARS)
    {
        return Err(ValidationError::BioTooLong(BIO_MAX_CHARS));
    }
    Ok(())
}

/// Creator name stored on a podcast: display name, username, email local
/// part, then [`UNKNOWN_CREATOR`]
pub fn artist_name(profile: Option<&Profile>, user: &User) -> String {
    profile
        .and_then(|p| non_empty(p.display_name.as_deref()).or_else(|| non_empty(p.username.as_deref())))
        .or_else(|| user.email_name())
        .unwrap_or(UNKNOWN_CREATOR)
        .to_string()
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T> {
    serde_json::from_value(row).map_err(|e| Error::Gateway(GatewayError::from(e)))
}

fn signed_in(state: &SessionState) -> Result<User> {
    state.user().cloned().ok_or(Error::NotSignedIn)
}

/// Publish a post
pub async fn create_post<G: Gateway>(session: &SessionProvider<G>, post: NewPost) -> Result<PostRow> {
    validate_post(&post)?;
    let user = signed_in(&session.state())?;
    let gateway = session.gateway().as_ref();

    let (media_url, media_type) = match post.media {
        Some(media) => {
            let kind = media.kind;
            let url = upload(gateway, &user.id, Bucket::PostMedia, media).await?;
            (Some(url), Some(kind.as_str()))
        }
        None => (None, None),
    };

    let row = gateway
        .insert(
            "posts",
            json!({
                "author_id": user.id,
                "text": post.text.trim(),
                "media_url": media_url,
                "media_type": media_type,
            }),
        )
        .await?;
    tracing::info!("Created post for {}", user.id);
    decode(row)
}

/// Append a comment to a post
pub async fn add_comment<G: Gateway>(session: &SessionProvider<G>, post_id: &str, text: &str) -> Result<CommentRow> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ValidationError::EmptyComment.into());
    }
    let user = signed_in(&session.state())?;

    let row = session
        .gateway()
        .insert(
            "comments",
            json!({ "post_id": post_id, "author_id": user.id, "text": text }),
        )
        .await?;
    decode(row)
}

/// Upload a podcast's cover and video, then insert its row
pub async fn create_podcast<G: Gateway>(session: &SessionProvider<G>, podcast: NewPodcast) -> Result<PodcastRow> {
    validate_podcast(&podcast)?;
    let state = session.state();
    let user = signed_in(&state)?;
    let gateway = session.gateway().as_ref();

    let (Some(cover), Some(video)) = (podcast.cover, podcast.video) else {
        return Err(ValidationError::MissingMedia("cover image").into());
    };
    let cover = store(gateway, &user.id, Bucket::PodcastCovers, cover).await?;
    let video = match store(gateway, &user.id, Bucket::PodcastVideos, video).await {
        Ok(video) => video,
        Err(e) => {
            discard(gateway, &cover).await;
            return Err(e);
        }
    };

    let inserted = gateway
        .insert(
            "podcasts",
            json!({
                "user_id": user.id,
                "title": podcast.title.trim(),
                "artist": artist_name(state.profile(), &user),
                "cover_url": cover.url,
                "media_url": video.url,
                "duration": podcast.duration_secs,
            }),
        )
        .await;
    match inserted {
        Ok(row) => decode(row),
        Err(e) => {
            discard(gateway, &cover).await;
            discard(gateway, &video).await;
            Err(e.into())
        }
    }
}

/// Save profile changes and refresh the provider's copy
pub async fn update_profile<G: Gateway>(session: &SessionProvider<G>, edit: ProfileEdit) -> Result<Profile> {
    validate_profile_edit(&edit)?;
    let user = signed_in(&session.state())?;
    let gateway = session.gateway().as_ref();

    let mut row = Map::new();
    row.insert("id".into(), Value::String(user.id.clone()));
    if let Some(avatar) = edit.avatar {
        let url = upload(gateway, &user.id, Bucket::Avatars, avatar).await?;
        row.insert("avatar_url".into(), Value::String(url));
    }
    if let Some(banner) = edit.banner {
        let url = upload(gateway, &user.id, Bucket::Banners, banner).await?;
        row.insert("banner_url".into(), Value::String(url));
    }
    for (column, value) in [
        ("display_name", edit.display_name),
        ("username", edit.username),
        ("bio", edit.bio),
    ] {
        if let Some(value) = value {
            row.insert(column.into(), Value::String(value.trim().to_string()));
        }
    }
    row.insert("updated_at".into(), json!(Utc::now()));

    let saved = gateway.upsert("profiles", Value::Object(row)).await?;
    let profile: Profile = decode(saved)?;
    session.refresh_profile().await;
    Ok(profile)
}
