//! Application controller
//!
//! [`App`] owns the screen state and talks to the async worker. It must be
//! created inside a [`tokio::task::LocalSet`]: the worker and the session
//! event loop run as local tasks on the same thread.

mod async_ops;
mod state;

pub use async_ops::{AsyncCommand, AsyncHandle, AsyncResult, spawn_worker};
pub use state::{AppState, LoadToken, ProfilePage, Screen};

use std::rc::Rc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::compose::NewPost;
use crate::feed::FeedAggregator;
use crate::gateway::Gateway;
use crate::models::{EdgeKind, PodcastFilter};
use crate::optimistic::{EntityKey, MutationState, Toggle};
use crate::player::Track;
use crate::session::SessionProvider;

/// Controller tying screens, session and worker together
pub struct App<G: Gateway + 'static> {
    /// Screen state
    pub state: AppState,
    session: Rc<SessionProvider<G>>,
    handle: AsyncHandle,
    outstanding: usize,
    failures: Vec<String>,
    auth_task: JoinHandle<()>,
}

impl<G: Gateway + 'static> App<G> {
    /// Start the worker and the auth event loop, then resolve the session
    pub async fn start(session: Rc<SessionProvider<G>>, feed: Rc<FeedAggregator<G>>) -> Self {
        let events = session.gateway().auth_events();
        let runner = Rc::clone(&session);
        let auth_task = tokio::task::spawn_local(async move { runner.run(events).await });
        session.initialize().await;

        let handle = spawn_worker(Rc::clone(&session), feed);
        Self {
            state: AppState::new(),
            session,
            handle,
            outstanding: 0,
            failures: Vec::new(),
            auth_task,
        }
    }

    /// Session provider
    pub fn session(&self) -> &SessionProvider<G> {
        &self.session
    }

    /// Signed-in account id
    pub fn viewer(&self) -> Option<String> {
        self.session.viewer_id()
    }

    /// Sign out and drop optimistic state owned by the old viewer
    pub async fn sign_out(&mut self) -> Result<()> {
        self.session.sign_out().await?;
        self.state.tracker.clear();
        Ok(())
    }

    async fn send(&mut self, cmd: AsyncCommand) -> Result<()> {
        self.handle
            .cmd_tx
            .send(cmd)
            .await
            .context("Async worker is not running")?;
        self.outstanding += 1;
        Ok(())
    }

    /// Mount and (re)load the home feed
    pub async fn open_home(&mut self) -> Result<()> {
        self.state.home.mount();
        let token = self.state.home.begin_load(self.state.tracker.mark());
        let viewer = self.viewer();
        self.send(AsyncCommand::LoadHome { token, viewer }).await
    }

    /// Mount and load the podcast list with `filter`
    pub async fn open_podcasts(&mut self, filter: PodcastFilter) -> Result<()> {
        self.state.podcast_filter = filter;
        self.state.podcasts.mount();
        let token = self.state.podcasts.begin_load(self.state.tracker.mark());
        let viewer = self.viewer();
        self.send(AsyncCommand::LoadPodcasts {
            token,
            viewer,
            filter,
        })
        .await
    }

    /// Mount and load a profile; `None` opens the viewer's own
    pub async fn open_profile(&mut self, user_id: Option<&str>) -> Result<()> {
        let viewer = self.viewer();
        let Some(user_id) = user_id.map(str::to_string).or_else(|| viewer.clone()) else {
            self.state.notify("Sign in to see your profile");
            return Ok(());
        };
        self.state.profile.mount();
        let token = self.state.profile.begin_load(self.state.tracker.mark());
        self.send(AsyncCommand::LoadProfile {
            token,
            user_id,
            viewer,
        })
        .await
    }

    /// Mount and load a post's detail screen
    pub async fn open_post(&mut self, post_id: &str) -> Result<()> {
        self.state.detail.mount();
        let token = self.state.detail.begin_load(self.state.tracker.mark());
        let viewer = self.viewer();
        self.send(AsyncCommand::LoadDetail {
            token,
            post_id: post_id.to_string(),
            viewer,
        })
        .await
    }

    /// Leave the post detail screen
    pub fn close_post(&mut self) {
        self.state.detail.unmount();
    }

    /// Leave the profile screen
    pub fn close_profile(&mut self) {
        self.state.profile.unmount();
    }

    /// Press a like/repost/favorite/follow control
    pub async fn toggle(&mut self, kind: EdgeKind, target_id: &str) -> Result<()> {
        let current = self
            .state
            .find_toggle(kind, target_id)
            .unwrap_or_default();
        let viewer = self.viewer();
        let key = EntityKey::new(kind, target_id);
        let press = match self.state.tracker.press(viewer.as_deref(), key, current) {
            Ok(press) => press,
            Err(e) => {
                self.state.notify(format!("Can't {}: {e}", kind.verb()));
                return Ok(());
            }
        };
        self.state.apply_toggle(kind, target_id, press.displayed);
        if let Some(ticket) = press.ticket {
            self.send(AsyncCommand::Commit { ticket }).await?;
        }
        Ok(())
    }

    /// Publish a post; the home feed reloads once it is stored
    pub async fn post(&mut self, post: NewPost) -> Result<()> {
        self.send(AsyncCommand::CreatePost { post }).await
    }

    /// Comment on a post; its detail screen reloads once it is stored
    pub async fn comment(&mut self, post_id: &str, text: &str) -> Result<()> {
        self.send(AsyncCommand::AddComment {
            post_id: post_id.to_string(),
            text: text.to_string(),
        })
        .await
    }

    /// Start playing a podcast from the loaded list
    pub fn play(&mut self, podcast_id: &str) -> bool {
        let Some(podcast) = self
            .state
            .podcasts
            .content()
            .iter()
            .find(|p| p.id == podcast_id)
        else {
            return false;
        };
        let track = Track::from(podcast);
        self.state.player.play(track);
        true
    }

    /// Wait for one worker result and apply it
    pub async fn next_result(&mut self) -> Result<()> {
        let result = self
            .handle
            .result_rx
            .recv()
            .await
            .context("Async worker stopped")?;
        self.outstanding = self.outstanding.saturating_sub(1);
        self.handle_async_result(result).await
    }

    /// Apply results until nothing is outstanding
    pub async fn run_until_idle(&mut self) -> Result<()> {
        while self.outstanding > 0 {
            self.next_result().await?;
        }
        Ok(())
    }

    async fn handle_async_result(&mut self, result: AsyncResult) -> Result<()> {
        match result {
            AsyncResult::HomeLoaded { token, mut posts } => {
                let mark = token.mark();
                self.state.tracker.overlay(EdgeKind::Like, &mut posts, mark);
                self.state.tracker.overlay(EdgeKind::Repost, &mut posts, mark);
                self.state.home.finish_load(token, posts);
            }
            AsyncResult::PodcastsLoaded {
                token,
                mut podcasts,
            } => {
                self.state
                    .tracker
                    .overlay(EdgeKind::Favorite, &mut podcasts, token.mark());
                self.state.podcasts.finish_load(token, podcasts);
            }
            AsyncResult::ProfileLoaded { token, mut page } => {
                let mark = token.mark();
                for kind in [EdgeKind::Like, EdgeKind::Repost] {
                    self.state.tracker.overlay(kind, &mut page.posts, mark);
                    self.state.tracker.overlay(kind, &mut page.reposts, mark);
                }
                self.state
                    .tracker
                    .overlay(EdgeKind::Favorite, &mut page.podcasts, mark);
                if let Some(view) = page.view.as_mut() {
                    self.state
                        .tracker
                        .overlay(EdgeKind::Follow, std::slice::from_mut(view), mark);
                }
                self.state.profile.finish_load(token, page);
            }
            AsyncResult::DetailLoaded { token, mut detail } => {
                if let Some(d) = detail.as_mut() {
                    let post = std::slice::from_mut(&mut d.post);
                    self.state.tracker.overlay(EdgeKind::Like, post, token.mark());
                    self.state.tracker.overlay(EdgeKind::Repost, post, token.mark());
                }
                let missing = detail.is_none();
                if self.state.detail.finish_load(token, detail) && missing {
                    self.state.notify("Could not load post details.");
                }
            }
            AsyncResult::Committed { ticket, result } => {
                if let Some(settled) = self.state.tracker.settle(&ticket, result.as_ref().copied()) {
                    self.state
                        .apply_toggle(settled.key.kind, &settled.key.target_id, settled.displayed);
                    if settled.state == MutationState::RolledBack
                        && let Some(notice) = settled.notice
                    {
                        self.state.notify(notice);
                    }
                    if let Some(follow_up) = settled.follow_up {
                        self.send(AsyncCommand::Commit { ticket: follow_up }).await?;
                    }
                }
            }
            AsyncResult::PostCreated { row } => {
                tracing::debug!("Post {} stored", row.id);
                self.state.notify("Posted!");
                if self.state.home.is_mounted() {
                    self.open_home().await?;
                }
            }
            AsyncResult::CommentAdded { post_id } => {
                let showing = self
                    .state
                    .detail
                    .content()
                    .as_ref()
                    .is_some_and(|d| d.post.id == post_id);
                if showing {
                    self.open_post(&post_id).await?;
                }
            }
            AsyncResult::Error { message } => {
                tracing::warn!("{message}");
                self.failures.push(message.clone());
                self.state.notify(message);
            }
        }
        Ok(())
    }

    /// Take the messages of writes that failed since the last call. They
    /// are also queued as notices.
    pub fn take_failures(&mut self) -> Vec<String> {
        std::mem::take(&mut self.failures)
    }

    /// Toggle shown for an entity right now
    pub fn displayed(&self, kind: EdgeKind, target_id: &str) -> Option<Toggle> {
        self.state.find_toggle(kind, target_id)
    }

    /// Stop the worker and the auth loop
    pub async fn shutdown(self) {
        let _ = self.handle.cmd_tx.send(AsyncCommand::Shutdown).await;
        self.auth_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::Placeholders;
    use crate::gateway::memory::MemoryGateway;
    use crate::models::MediaKind;
    use crate::upload::MediaUpload;
    use serde_json::json;
    use tokio::task::LocalSet;

    async fn app(gw: &Rc<MemoryGateway>) -> App<MemoryGateway> {
        let session = Rc::new(SessionProvider::new(Rc::clone(gw)));
        let feed = Rc::new(FeedAggregator::new(Rc::clone(gw), Placeholders::default(), 50));
        App::start(session, feed).await
    }

    fn seeded() -> Rc<MemoryGateway> {
        let gw = Rc::new(MemoryGateway::new());
        gw.seed_account("a", "a@example.com", "secret1", Some("alice"));
        gw.seed(
            "posts",
            [json!({"id": "p1", "author_id": "b", "text": "hello", "created_at": "2026-01-01T00:00:00Z"})],
        );
        gw.seed("likes", [json!({"user_id": "c", "post_id": "p1"})]);
        gw
    }

    #[tokio::test]
    async fn test_like_round_trip() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                let mut app = app(&gw).await;
                app.session().sign_in("a@example.com", "secret1").await.unwrap();

                app.open_home().await.unwrap();
                app.run_until_idle().await.unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(false, 1)));

                app.toggle(EdgeKind::Like, "p1").await.unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(true, 2)));
                app.toggle(EdgeKind::Like, "p1").await.unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(false, 1)));

                app.run_until_idle().await.unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(false, 1)));
                assert_eq!(gw.rows("likes").len(), 1);
                assert!(app.state.notices.is_empty());
                app.shutdown().await;
            })
            .await;
    }

    #[tokio::test]
    async fn test_refresh_issued_before_settle_keeps_confirmed_like() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                let mut app = app(&gw).await;
                app.session().sign_in("a@example.com", "secret1").await.unwrap();
                app.open_home().await.unwrap();
                app.run_until_idle().await.unwrap();

                // Refresh goes out, then the like is pressed and confirmed
                // before the refresh answers with pre-like data
                let token = app.state.home.begin_load(app.state.tracker.mark());
                let snapshot = app.state.home.content().clone();
                app.toggle(EdgeKind::Like, "p1").await.unwrap();
                app.run_until_idle().await.unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(true, 2)));

                app.handle_async_result(AsyncResult::HomeLoaded { token, posts: snapshot })
                    .await
                    .unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(true, 2)));
                assert_eq!(gw.rows("likes").len(), 2);

                app.open_home().await.unwrap();
                app.run_until_idle().await.unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(true, 2)));
            })
            .await;
    }

    #[tokio::test]
    async fn test_anonymous_toggle_is_noop_with_notice() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                let mut app = app(&gw).await;
                app.open_home().await.unwrap();
                app.run_until_idle().await.unwrap();

                app.toggle(EdgeKind::Like, "p1").await.unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(false, 1)));
                assert_eq!(app.state.drain_notices().len(), 1);
                assert!(!gw.calls().iter().any(|c| c == "insert:likes"));
            })
            .await;
    }

    #[tokio::test]
    async fn test_failed_like_rolls_back() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                let mut app = app(&gw).await;
                app.session().sign_in("a@example.com", "secret1").await.unwrap();
                app.open_home().await.unwrap();
                app.run_until_idle().await.unwrap();

                gw.fail_next("likes", 1);
                app.toggle(EdgeKind::Like, "p1").await.unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(true, 2)));
                app.run_until_idle().await.unwrap();
                assert_eq!(app.displayed(EdgeKind::Like, "p1"), Some(Toggle::new(false, 1)));
                assert_eq!(app.state.drain_notices().len(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_closed_detail_ignores_late_result() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                let mut app = app(&gw).await;
                app.open_post("p1").await.unwrap();
                app.close_post();
                app.run_until_idle().await.unwrap();
                assert!(app.state.detail.content().is_none());
                assert!(app.state.notices.is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn test_missing_post_notice() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                let mut app = app(&gw).await;
                app.open_post("nope").await.unwrap();
                app.run_until_idle().await.unwrap();
                assert_eq!(app.state.drain_notices(), ["Could not load post details."]);
            })
            .await;
    }

    #[tokio::test]
    async fn test_post_reloads_home() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                let mut app = app(&gw).await;
                app.session().sign_in("a@example.com", "secret1").await.unwrap();
                app.open_home().await.unwrap();
                app.run_until_idle().await.unwrap();

                let media = MediaUpload::new(vec![1], "png", MediaKind::Image);
                app.post(NewPost { text: String::new(), media: Some(media) }).await.unwrap();
                app.run_until_idle().await.unwrap();
                assert_eq!(app.state.home.content().len(), 2);
                assert_eq!(app.state.home.content()[0].author.handle, "@alice");
            })
            .await;
    }

    #[tokio::test]
    async fn test_failed_post_is_reported() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                let mut app = app(&gw).await;
                app.session().sign_in("a@example.com", "secret1").await.unwrap();

                gw.fail_next("posts", 1);
                app.post(NewPost { text: "hi".into(), media: None }).await.unwrap();
                app.run_until_idle().await.unwrap();
                let failures = app.take_failures();
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("Post failed"));
                assert!(app.take_failures().is_empty());
                assert_eq!(gw.rows("posts").len(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_favorite_from_profile_podcasts_tab() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                gw.seed(
                    "podcasts",
                    [json!({"id": "c1", "user_id": "b", "title": "Talk", "created_at": "2026-01-01T00:00:00Z"})],
                );
                let mut app = app(&gw).await;
                app.session().sign_in("a@example.com", "secret1").await.unwrap();
                app.open_profile(Some("b")).await.unwrap();
                app.run_until_idle().await.unwrap();
                assert_eq!(app.state.profile.content().podcasts.len(), 1);

                app.toggle(EdgeKind::Favorite, "c1").await.unwrap();
                app.run_until_idle().await.unwrap();
                let podcast = &app.state.profile.content().podcasts[0];
                assert!(podcast.is_favorite);
                assert_eq!(podcast.favorites, 1);
                assert_eq!(gw.rows("favorites").len(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn test_follow_from_profile_screen() {
        LocalSet::new()
            .run_until(async {
                let gw = seeded();
                let mut app = app(&gw).await;
                app.session().sign_in("a@example.com", "secret1").await.unwrap();
                app.open_profile(Some("b")).await.unwrap();
                app.run_until_idle().await.unwrap();

                app.toggle(EdgeKind::Follow, "b").await.unwrap();
                app.run_until_idle().await.unwrap();
                let view = app.state.profile.content().view.clone().unwrap();
                assert!(view.is_following);
                assert_eq!(view.followers, 1);
                assert_eq!(app.state.profile.content().posts.len(), 1);

                app.open_profile(None).await.unwrap();
                app.run_until_idle().await.unwrap();
                let own = app.state.profile.content().view.clone().unwrap();
                assert!(own.is_own);
                assert_eq!(own.following, 1);
            })
            .await;
    }
}
