//! Media Upload Pipeline
//!
//! Turns a local file into a public URL. Paths are
//! `{owner}/{prefix}_{unix_millis}_{suffix}.{ext}` with a random suffix, and
//! uploads never overwrite, so a path is never reused.

use std::path::Path;

use chrono::Utc;
use rand::Rng;
use rand::distr::Alphanumeric;

use crate::error::Error;
use crate::gateway::Gateway;
use crate::models::MediaKind;

const SUFFIX_LEN: usize = 7;

/// Storage bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Profile pictures
    Avatars,
    /// Profile banners
    Banners,
    /// Images and videos attached to posts
    PostMedia,
    /// Podcast cover art
    PodcastCovers,
    /// Podcast video files
    PodcastVideos,
}

impl Bucket {
    /// Bucket name on the gateway
    pub const fn name(self) -> &'static str {
        match self {
            Self::Avatars => "avatars",
            Self::Banners => "banners",
            Self::PostMedia => "post-media",
            Self::PodcastCovers => "podcast-covers",
            Self::PodcastVideos => "podcast-videos",
        }
    }

    /// File name prefix
    const fn prefix(self) -> &'static str {
        match self {
            Self::Avatars => "avatar",
            Self::Banners => "banner",
            Self::PostMedia => "post",
            Self::PodcastCovers => "cover",
            Self::PodcastVideos => "video",
        }
    }
}

/// A file picked by the viewer, read into memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUpload {
    /// File contents
    pub bytes: Vec<u8>,
    /// Lowercase extension without the dot
    pub extension: String,
    /// Image or video
    pub kind: MediaKind,
}

impl MediaUpload {
    /// Wrap in-memory bytes
    pub fn new(bytes: Vec<u8>, extension: &str, kind: MediaKind) -> Self {
        Self {
            bytes,
            extension: normalize_extension(extension),
            kind,
        }
    }

    /// Read a local file. The kind is taken from the extension.
    pub async fn from_path(path: &Path) -> Result<Self, Error> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)
            .unwrap_or_default();
        let kind = kind_for_extension(&extension);
        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            bytes,
            extension,
            kind,
        })
    }

    /// MIME type sent with the upload
    pub fn content_type(&self) -> String {
        content_type(self.kind, &self.extension)
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    if ext.is_empty() { "bin".to_string() } else { ext }
}

/// Guess the media kind from a file extension
pub fn kind_for_extension(ext: &str) -> MediaKind {
    match ext {
        "mp4" | "mov" | "m4v" | "webm" | "mkv" | "avi" => MediaKind::Video,
        _ => MediaKind::Image,
    }
}

/// MIME type for a kind and extension
pub fn content_type(kind: MediaKind, ext: &str) -> String {
    let subtype = match (kind, ext) {
        (MediaKind::Image, "jpg" | "jpeg") => "jpeg",
        (MediaKind::Image, "svg") => "svg+xml",
        (MediaKind::Video, "mov") => "quicktime",
        (MediaKind::Video, "mkv") => "x-matroska",
        (MediaKind::Video, "avi") => "x-msvideo",
        (MediaKind::Video, "m4v") => "x-m4v",
        (_, "bin") => return "application/octet-stream".to_string(),
        (_, other) => other,
    };
    format!("{}/{subtype}", kind.as_str())
}

/// Object path for an upload
pub fn object_path(owner_id: &str, bucket: Bucket, extension: &str, unix_millis: i64, suffix: &str) -> String {
    format!("{owner_id}/{}_{unix_millis}_{suffix}.{extension}", bucket.prefix())
}

fn random_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(char::from)
        .collect()
}

/// An object written by [`store`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Bucket it lives in
    pub bucket: Bucket,
    /// Path inside the bucket
    pub path: String,
    /// Public URL
    pub url: String,
}

/// Upload `media` for `owner_id`
pub async fn store<G: Gateway>(
    gateway: &G,
    owner_id: &str,
    bucket: Bucket,
    media: MediaUpload,
) -> Result<StoredObject, Error> {
    let path = object_path(
        owner_id,
        bucket,
        &media.extension,
        Utc::now().timestamp_millis(),
        &random_suffix(),
    );
    let content_type = media.content_type();
    tracing::debug!("Uploading {} ({content_type}) to {}", path, bucket.name());

    gateway
        .upload(bucket.name(), &path, media.bytes, &content_type, false)
        .await
        .map_err(|source| Error::Upload {
            bucket: bucket.name(),
            source,
        })?;

    Ok(StoredObject {
        url: gateway.public_url(bucket.name(), &path),
        path,
        bucket,
    })
}

/// Upload `media` for `owner_id` and return its public URL
pub async fn upload<G: Gateway>(
    gateway: &G,
    owner_id: &str,
    bucket: Bucket,
    media: MediaUpload,
) -> Result<String, Error> {
    store(gateway, owner_id, bucket, media).await.map(|o| o.url)
}

/// Delete an object nothing will point to. Failures are logged only.
pub async fn discard<G: Gateway>(gateway: &G, object: &StoredObject) {
    if let Err(e) = gateway.remove(object.bucket.name(), &object.path).await {
        tracing::warn!("Failed to remove {}/{}: {e}", object.bucket.name(), object.path);
    }
}
