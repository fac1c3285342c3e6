//! Feed Aggregator
//!
//! Builds display records from several independent queries joined on the
//! client. Every slice other than the base rows is optional: a failing
//! slice is logged and treated as empty, so a screen always gets a list.
//! Base row order (newest first) is kept as returned.

mod placeholder;

pub use placeholder::{Placeholders, UNKNOWN_HANDLE, UNKNOWN_NAME};

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use futures::future::join_all;
use serde_json::Value;

use crate::config::Config;
use crate::gateway::{Filter, Gateway, Select, decode_rows};
use crate::models::{
    Comment, CommentRow, PodcastFilter, PodcastRow, PodcastView, Post, PostRow, Profile,
    ProfileView, non_empty,
};

/// Per-post data fetched alongside the base rows
#[derive(Debug, Clone, Default)]
pub struct PostSlices {
    /// Author profiles by account id
    pub profiles: HashMap<String, Profile>,
    /// Like edges per post
    pub likes: HashMap<String, u32>,
    /// Comments per post
    pub comments: HashMap<String, u32>,
    /// Repost edges per post
    pub reposts: HashMap<String, u32>,
    /// Posts the viewer liked
    pub liked: HashSet<String>,
    /// Posts the viewer reposted
    pub reposted: HashSet<String>,
}

/// A post with its comments, oldest comment first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetail {
    /// The post
    pub post: Post,
    /// Its comments
    pub comments: Vec<Comment>,
}

/// Join base rows with their slices. Total: every row yields a record.
pub fn merge_posts(rows: Vec<PostRow>, slices: &PostSlices, placeholders: &Placeholders) -> Vec<Post> {
    rows.into_iter()
        .map(|row| {
            let count = |map: &HashMap<String, u32>| map.get(&row.id).copied().unwrap_or(0);
            let profile = row.author_id.as_deref().and_then(|id| slices.profiles.get(id));
            Post {
                author: placeholders.author(profile, row.author_id.as_deref()),
                text: row.body().to_string(),
                media: row.media(),
                likes: count(&slices.likes),
                comments: count(&slices.comments),
                reposts: count(&slices.reposts),
                liked_by_me: slices.liked.contains(&row.id),
                is_reposted: slices.reposted.contains(&row.id),
                created_at: row.created_at,
                author_id: row.author_id,
                id: row.id,
            }
        })
        .collect()
}

/// Join podcast rows with creator profiles and favorite edges
pub fn merge_podcasts(
    rows: Vec<PodcastRow>,
    profiles: &HashMap<String, Profile>,
    favorites: &HashMap<String, u32>,
    my_favorites: &HashSet<String>,
    placeholders: &Placeholders,
) -> Vec<PodcastView> {
    rows.into_iter()
        .map(|row| {
            let owner = row.user_id.as_deref().and_then(|id| profiles.get(id));
            PodcastView {
                title: non_empty(row.title.as_deref()).unwrap_or("Untitled").to_string(),
                artist: non_empty(row.artist.as_deref())
                    .or_else(|| owner.and_then(Profile::shown_name))
                    .unwrap_or("Unknown")
                    .to_string(),
                cover_url: non_empty(row.cover_url.as_deref())
                    .map_or_else(|| placeholders.cover(&row.id), str::to_string),
                creator_avatar: placeholders.avatar_or(owner, row.user_id.as_deref().unwrap_or(&row.id)),
                media_url: non_empty(row.media_url.as_deref()).map(str::to_string),
                duration_secs: row.duration.unwrap_or(0),
                views: row.views,
                favorites: favorites.get(&row.id).copied().unwrap_or(0),
                is_favorite: my_favorites.contains(&row.id),
                owner_id: row.user_id,
                id: row.id,
            }
        })
        .collect()
}

/// Distinct values of `column`
fn column_set(rows: &[Value], column: &str) -> HashSet<String> {
    rows.iter()
        .filter_map(|r| r.get(column).and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

fn clamp_count(n: u64) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

/// Read-side aggregator over a gateway
pub struct FeedAggregator<G> {
    gateway: Rc<G>,
    placeholders: Placeholders,
    limit: usize,
}

impl<G: Gateway> FeedAggregator<G> {
    /// Create an aggregator with explicit settings
    pub const fn new(gateway: Rc<G>, placeholders: Placeholders, limit: usize) -> Self {
        Self {
            gateway,
            placeholders,
            limit,
        }
    }

    /// Create an aggregator from the app config
    pub fn from_config(gateway: Rc<G>, config: &Config) -> Self {
        Self::new(gateway, Placeholders::new(&config.placeholders), config.feed_limit)
    }

    /// Placeholder generator in use
    pub const fn placeholders(&self) -> &Placeholders {
        &self.placeholders
    }

    /// Run a query, degrading failures to an empty slice
    async fn slice(&self, query: Select) -> Vec<Value> {
        match self.gateway.select(&query).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!("Failed to load {} slice: {e}", query.table);
                Vec::new()
            }
        }
    }

    /// Exact count, degrading failures to zero
    async fn count(&self, table: &str, filters: &[Filter]) -> u32 {
        match self.gateway.count(table, filters).await {
            Ok(n) => clamp_count(n),
            Err(e) => {
                tracing::warn!("Failed to count {table}: {e}");
                0
            }
        }
    }

    /// Exact row count of `table` per target id, one count query each.
    /// Counting server-side keeps totals right past the REST row cap.
    async fn counts_by(&self, table: &str, column: &str, ids: &[String]) -> HashMap<String, u32> {
        let counts = join_all(ids.iter().map(|id| async move {
            let filters = [Filter::eq(column, id.as_str())];
            (id.clone(), self.count(table, &filters).await)
        }))
        .await;
        counts.into_iter().filter(|(_, n)| *n > 0).collect()
    }

    /// Edge rows of `table` by `viewer`, restricted to `targets`
    async fn viewer_edges(&self, table: &str, subject: &str, viewer: Option<&str>, target: &str, targets: &[String]) -> HashSet<String> {
        let Some(viewer) = viewer else {
            return HashSet::new();
        };
        let rows = self
            .slice(
                Select::from(table)
                    .columns(target)
                    .eq(subject, viewer)
                    .in_list(target, targets.iter().map(String::as_str)),
            )
            .await;
        column_set(&rows, target)
    }

    /// Profiles for a set of account ids
    async fn profiles(&self, ids: &[String]) -> HashMap<String, Profile> {
        if ids.is_empty() {
            return HashMap::new();
        }
        let rows = self
            .slice(Select::from("profiles").in_list("id", ids.iter().map(String::as_str)))
            .await;
        decode_rows::<Profile>("profiles", rows)
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect()
    }

    /// Fetch every per-post slice for `rows`, concurrently
    async fn post_slices(&self, rows: &[PostRow], viewer: Option<&str>) -> PostSlices {
        if rows.is_empty() {
            return PostSlices::default();
        }
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut authors: Vec<String> = rows.iter().filter_map(|r| r.author_id.clone()).collect();
        authors.sort();
        authors.dedup();

        let (profiles, likes, comments, reposts, liked, reposted) = tokio::join!(
            self.profiles(&authors),
            self.counts_by("likes", "post_id", &ids),
            self.counts_by("comments", "post_id", &ids),
            self.counts_by("reposts", "post_id", &ids),
            self.viewer_edges("likes", "user_id", viewer, "post_id", &ids),
            self.viewer_edges("reposts", "user_id", viewer, "post_id", &ids),
        );

        PostSlices {
            profiles,
            likes,
            comments,
            reposts,
            liked,
            reposted,
        }
    }

    /// Base rows plus slices, merged
    async fn enrich(&self, rows: Vec<PostRow>, viewer: Option<&str>) -> Vec<Post> {
        let slices = self.post_slices(&rows, viewer).await;
        merge_posts(rows, &slices, &self.placeholders)
    }

    async fn post_rows(&self, query: Select) -> Vec<PostRow> {
        decode_rows("posts", self.slice(query).await)
    }

    /// Every post, newest first
    pub async fn home_feed(&self, viewer: Option<&str>) -> Vec<Post> {
        let rows = self
            .post_rows(Select::from("posts").order_desc("created_at").limit(self.limit))
            .await;
        tracing::debug!("Home feed: {} posts", rows.len());
        self.enrich(rows, viewer).await
    }

    /// Posts written by one account, newest first
    pub async fn user_posts(&self, author_id: &str, viewer: Option<&str>) -> Vec<Post> {
        let rows = self
            .post_rows(
                Select::from("posts")
                    .eq("author_id", author_id)
                    .order_desc("created_at")
                    .limit(self.limit),
            )
            .await;
        self.enrich(rows, viewer).await
    }

    /// Posts reposted by one account, most recent repost first
    pub async fn user_reposts(&self, user_id: &str, viewer: Option<&str>) -> Vec<Post> {
        let edges = self
            .slice(
                Select::from("reposts")
                    .columns("post_id,created_at")
                    .eq("user_id", user_id)
                    .order_desc("created_at")
                    .limit(self.limit),
            )
            .await;
        let order: Vec<String> = edges
            .iter()
            .filter_map(|r| r.get("post_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect();
        if order.is_empty() {
            return Vec::new();
        }

        let rows = self
            .post_rows(Select::from("posts").in_list("id", order.iter().map(String::as_str)))
            .await;
        let mut by_id: HashMap<String, PostRow> = rows.into_iter().map(|r| (r.id.clone(), r)).collect();
        let mut seen = HashSet::new();
        let rows: Vec<PostRow> = order
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .filter_map(|id| by_id.remove(id))
            .collect();
        self.enrich(rows, viewer).await
    }

    /// One post with its comments. `None` when the post cannot be loaded.
    pub async fn post_detail(&self, post_id: &str, viewer: Option<&str>) -> Option<PostDetail> {
        let base = Select::from("posts").eq("id", post_id).limit(1);
        let comment_query = Select::from("comments")
            .eq("post_id", post_id)
            .order_asc("created_at");
        let (rows, comment_rows) = tokio::join!(self.post_rows(base), self.slice(comment_query));

        let post = self.enrich(rows, viewer).await.into_iter().next()?;
        let comment_rows: Vec<CommentRow> = decode_rows("comments", comment_rows);

        let mut authors: Vec<String> = comment_rows.iter().filter_map(|c| c.author_id.clone()).collect();
        authors.sort();
        authors.dedup();
        let profiles = self.profiles(&authors).await;

        let comments = comment_rows
            .into_iter()
            .map(|row| Comment {
                author: self.placeholders.author(
                    row.author_id.as_deref().and_then(|id| profiles.get(id)),
                    row.author_id.as_deref(),
                ),
                text: row.body().to_string(),
                created_at: row.created_at,
                id: row.id,
            })
            .collect();

        Some(PostDetail { post, comments })
    }

    /// Podcast rows joined with creator profiles and favorite edges
    async fn enrich_podcasts(&self, rows: Vec<PodcastRow>, viewer: Option<&str>) -> Vec<PodcastView> {
        if rows.is_empty() {
            return Vec::new();
        }
        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut owners: Vec<String> = rows.iter().filter_map(|r| r.user_id.clone()).collect();
        owners.sort();
        owners.dedup();

        let (profiles, favorites, mine) = tokio::join!(
            self.profiles(&owners),
            self.counts_by("favorites", "podcast_id", &ids),
            self.viewer_edges("favorites", "user_id", viewer, "podcast_id", &ids),
        );
        merge_podcasts(rows, &profiles, &favorites, &mine, &self.placeholders)
    }

    async fn podcast_rows(&self, query: Select) -> Vec<PodcastRow> {
        decode_rows("podcasts", self.slice(query).await)
    }

    /// Podcast list, newest first
    pub async fn podcasts(&self, viewer: Option<&str>, filter: PodcastFilter) -> Vec<PodcastView> {
        if filter == PodcastFilter::Favorites && viewer.is_none() {
            return Vec::new();
        }
        let rows = self
            .podcast_rows(Select::from("podcasts").order_desc("created_at").limit(self.limit))
            .await;
        let mut views = self.enrich_podcasts(rows, viewer).await;
        if filter == PodcastFilter::Favorites {
            views.retain(|v| v.is_favorite);
        }
        views
    }

    /// Podcasts published by one account, newest first
    pub async fn user_podcasts(&self, user_id: &str, viewer: Option<&str>) -> Vec<PodcastView> {
        let rows = self
            .podcast_rows(
                Select::from("podcasts")
                    .eq("user_id", user_id)
                    .order_desc("created_at")
                    .limit(self.limit),
            )
            .await;
        self.enrich_podcasts(rows, viewer).await
    }

    /// Profile header with follow statistics. Missing rows fall back to
    /// placeholders.
    pub async fn profile_view(&self, user_id: &str, viewer: Option<&str>) -> ProfileView {
        let follows_me = viewer
            .filter(|v| *v != user_id)
            .map(|v| vec![Filter::eq("follower_id", v), Filter::eq("following_id", user_id)]);

        let followed_by = [Filter::eq("following_id", user_id)];
        let follows = [Filter::eq("follower_id", user_id)];

        let (rows, followers, following, is_following) = tokio::join!(
            self.slice(Select::from("profiles").eq("id", user_id).limit(1)),
            self.count("follows", &followed_by),
            self.count("follows", &follows),
            async {
                match &follows_me {
                    Some(filters) => self.count("follows", filters).await > 0,
                    None => false,
                }
            },
        );
        let profile = decode_rows::<Profile>("profiles", rows).into_iter().next();
        let author = self.placeholders.author(profile.as_ref(), Some(user_id));

        ProfileView {
            id: user_id.to_string(),
            name: author.name,
            handle: author.handle,
            avatar: author.avatar,
            banner: profile
                .as_ref()
                .and_then(|p| non_empty(p.banner_url.as_deref()))
                .map_or_else(|| self.placeholders.banner(user_id), str::to_string),
            bio: profile.as_ref().and_then(|p| p.bio.clone()).unwrap_or_default(),
            is_verified: profile.as_ref().is_some_and(|p| p.is_verified),
            followers,
            following,
            is_own: viewer == Some(user_id),
            is_following,
        }
    }
}
