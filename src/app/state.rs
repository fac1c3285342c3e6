//! Screen state
//!
//! Each screen owns its content plus a generation counter. Starting a load
//! bumps the generation and hands out a [`LoadToken`]; a result is applied
//! only if its token is still current and the screen is still mounted. The
//! token also remembers the mutation tracker's mark at issue time.

use crate::feed::PostDetail;
use crate::models::{EdgeKind, PodcastFilter, PodcastView, Post, ProfileView};
use crate::optimistic::{MutationTracker, Toggle, Toggleable};
use crate::player::Player;

/// Proof that a load was started for a given screen generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadToken {
    generation: u64,
    mark: u64,
}

impl LoadToken {
    /// Tracker mark when the load was issued
    pub const fn mark(self) -> u64 {
        self.mark
    }
}

/// Content of one screen plus its load bookkeeping
#[derive(Debug, Clone, Default)]
pub struct Screen<T> {
    content: T,
    loading: bool,
    mounted: bool,
    generation: u64,
}

impl<T: Default> Screen<T> {
    /// Unmounted, empty screen
    pub fn new() -> Self {
        Self::default()
    }

    /// Screen became visible
    pub fn mount(&mut self) {
        self.mounted = true;
    }

    /// Screen went away. In-flight loads are invalidated and the content
    /// dropped.
    pub fn unmount(&mut self) {
        self.mounted = false;
        self.loading = false;
        self.generation += 1;
        self.content = T::default();
    }

    /// Start a load, superseding any earlier one. `mark` is the current
    /// [`MutationTracker::mark`].
    pub fn begin_load(&mut self, mark: u64) -> LoadToken {
        self.generation += 1;
        self.loading = true;
        LoadToken {
            generation: self.generation,
            mark,
        }
    }

    /// Apply a load result. Returns false, leaving the screen untouched,
    /// when the result is stale or the screen is gone.
    pub fn finish_load(&mut self, token: LoadToken, content: T) -> bool {
        if !self.mounted || token.generation != self.generation {
            tracing::debug!("Discarding stale screen result");
            return false;
        }
        self.content = content;
        self.loading = false;
        true
    }

    /// Current content
    pub const fn content(&self) -> &T {
        &self.content
    }

    /// Mutable content, for optimistic edits
    pub const fn content_mut(&mut self) -> &mut T {
        &mut self.content
    }

    /// A load is in progress
    pub const fn is_loading(&self) -> bool {
        self.loading
    }

    /// The screen is visible
    pub const fn is_mounted(&self) -> bool {
        self.mounted
    }
}

/// Profile screen content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilePage {
    /// Header with follow statistics
    pub view: Option<ProfileView>,
    /// Posts tab
    pub posts: Vec<Post>,
    /// Reposts tab
    pub reposts: Vec<Post>,
    /// Podcasts tab
    pub podcasts: Vec<PodcastView>,
}

/// Everything the presentation layer reads
#[derive(Debug, Default)]
pub struct AppState {
    /// Home feed
    pub home: Screen<Vec<Post>>,
    /// Podcast list
    pub podcasts: Screen<Vec<PodcastView>>,
    /// Active podcast filter
    pub podcast_filter: PodcastFilter,
    /// Profile screen
    pub profile: Screen<ProfilePage>,
    /// Post detail screen
    pub detail: Screen<Option<PostDetail>>,
    /// Optimistic toggles
    pub tracker: MutationTracker,
    /// Now playing
    pub player: Player,
    /// Messages for the viewer, oldest first
    pub notices: Vec<String>,
}

impl AppState {
    /// Fresh state
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message for the viewer
    pub fn notify(&mut self, message: impl Into<String>) {
        self.notices.push(message.into());
    }

    /// Take all queued messages
    pub fn drain_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    /// Current toggle of an entity as shown on any mounted screen
    pub fn find_toggle(&self, kind: EdgeKind, target_id: &str) -> Option<Toggle> {
        fn find<T: Toggleable>(items: &[T], kind: EdgeKind, id: &str) -> Option<Toggle> {
            items
                .iter()
                .find(|i| i.entity_id() == id)
                .and_then(|i| i.toggle(kind))
        }

        let page = self.profile.content();
        let detail = self.detail.content().as_ref().map(|d| std::slice::from_ref(&d.post));
        find(self.home.content(), kind, target_id)
            .or_else(|| find(&page.posts, kind, target_id))
            .or_else(|| find(&page.reposts, kind, target_id))
            .or_else(|| detail.and_then(|d| find(d, kind, target_id)))
            .or_else(|| find(self.podcasts.content(), kind, target_id))
            .or_else(|| find(&page.podcasts, kind, target_id))
            .or_else(|| page.view.as_ref().and_then(|v| find(std::slice::from_ref(v), kind, target_id)))
    }

    /// Show `toggle` for the entity on every screen that lists it
    pub fn apply_toggle(&mut self, kind: EdgeKind, target_id: &str, toggle: Toggle) {
        fn set<T: Toggleable>(items: &mut [T], kind: EdgeKind, id: &str, toggle: Toggle) {
            for item in items.iter_mut().filter(|i| i.entity_id() == id) {
                item.set_toggle(kind, toggle);
            }
        }

        set(self.home.content_mut(), kind, target_id, toggle);
        set(self.podcasts.content_mut(), kind, target_id, toggle);
        let page = self.profile.content_mut();
        set(&mut page.posts, kind, target_id, toggle);
        set(&mut page.reposts, kind, target_id, toggle);
        set(&mut page.podcasts, kind, target_id, toggle);
        if let Some(view) = page.view.as_mut() {
            set(std::slice::from_mut(view), kind, target_id, toggle);
        }
        if let Some(detail) = self.detail.content_mut().as_mut() {
            set(std::slice::from_mut(&mut detail.post), kind, target_id, toggle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Author;
    use chrono::Utc;

    fn post(id: &str, likes: u32) -> Post {
        Post {
            id: id.into(),
            author_id: None,
            author: Author {
                name: "User".into(),
                handle: "@user".into(),
                avatar: String::new(),
            },
            text: String::new(),
            media: None,
            created_at: Some(Utc::now()),
            likes,
            comments: 0,
            reposts: 0,
            liked_by_me: false,
            is_reposted: false,
        }
    }

    #[test]
    fn test_stale_token_is_discarded() {
        let mut screen: Screen<Vec<u32>> = Screen::new();
        screen.mount();
        let first = screen.begin_load(0);
        let second = screen.begin_load(0);

        assert!(screen.finish_load(second, vec![2]));
        assert!(!screen.finish_load(first, vec![1]));
        assert_eq!(screen.content(), &vec![2]);
        assert!(!screen.is_loading());
    }

    #[test]
    fn test_result_after_unmount_is_discarded() {
        let mut screen: Screen<Vec<u32>> = Screen::new();
        screen.mount();
        let token = screen.begin_load(0);
        screen.unmount();

        assert!(!screen.finish_load(token, vec![1]));
        assert!(screen.content().is_empty());

        screen.mount();
        assert!(!screen.finish_load(token, vec![1]));
    }

    #[test]
    fn test_apply_toggle_reaches_every_screen() {
        let mut state = AppState::new();
        state.home.mount();
        let token = state.home.begin_load(0);
        state.home.finish_load(token, vec![post("p1", 3), post("p2", 0)]);
        state.profile.content_mut().posts = vec![post("p1", 3)];

        state.apply_toggle(EdgeKind::Like, "p1", Toggle::new(true, 4));
        assert_eq!(state.home.content()[0].likes, 4);
        assert!(state.home.content()[0].liked_by_me);
        assert_eq!(state.home.content()[1].likes, 0);
        assert_eq!(state.profile.content().posts[0].likes, 4);
        assert_eq!(state.find_toggle(EdgeKind::Like, "p1"), Some(Toggle::new(true, 4)));
        assert_eq!(state.find_toggle(EdgeKind::Like, "zzz"), None);
    }
}
