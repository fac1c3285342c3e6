//! Optimistic Mutation Applier
//!
//! Toggle actions (like, repost, favorite, follow) flip the displayed state
//! as soon as they are pressed. Each entity has at most one mutation in
//! flight; presses made meanwhile collapse into a single queued follow-up
//! that is issued once the in-flight one settles, and only if it still
//! differs from what the gateway confirmed.
//!
//! Every ticket ends `Confirmed` or `RolledBack`. A rollback restores the
//! last confirmed state and yields a notice for the viewer.
//!
//! Settling bumps the tracker's mark. Lists loaded from a query issued
//! before that mark may predate the mutation, so the settled state is laid
//! over them as well.

use std::collections::HashMap;

use crate::error::{Error, GatewayError, ValidationError};
use crate::gateway::Gateway;
use crate::models::{Edge, EdgeKind, PodcastView, Post, ProfileView};

/// Viewer-relative flag plus its adjacent counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Toggle {
    /// Whether the viewer has the edge
    pub active: bool,
    /// Total edges on the target
    pub count: u32,
}

impl Toggle {
    /// Create a toggle
    pub const fn new(active: bool, count: u32) -> Self {
        Self { active, count }
    }

    /// The state after moving the flag to `active`. The counter moves by
    /// exactly one and never below zero.
    #[must_use]
    pub const fn toward(self, active: bool) -> Self {
        if self.active == active {
            return self;
        }
        let count = if active {
            self.count.saturating_add(1)
        } else {
            self.count.saturating_sub(1)
        };
        Self { active, count }
    }
}

/// Entity a toggle belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey {
    /// Edge table
    pub kind: EdgeKind,
    /// Post, podcast or account id
    pub target_id: String,
}

impl EntityKey {
    /// Create a key
    pub fn new(kind: EdgeKind, target_id: impl Into<String>) -> Self {
        Self {
            kind,
            target_id: target_id.into(),
        }
    }
}

/// A mutation to send to the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationTicket {
    /// Ticket number, unique per tracker
    pub id: u64,
    /// Edge to insert or delete
    pub edge: Edge,
    /// Insert when true, delete when false
    pub desired: bool,
}

impl MutationTicket {
    /// Entity this ticket mutates
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.edge.kind, self.edge.target_id.clone())
    }
}

/// Lifecycle of a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Sent, no response yet
    Pending,
    /// Gateway accepted the mutation
    Confirmed,
    /// Gateway rejected it; displayed state restored
    RolledBack,
}

/// What an edge mutation actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOutcome {
    /// Row inserted or deleted
    Applied,
    /// Insert hit the uniqueness constraint; the edge already existed
    AlreadyPresent,
    /// Delete matched nothing; the edge was already gone
    AlreadyAbsent,
}

/// Result of a press
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Press {
    /// State to show immediately
    pub displayed: Toggle,
    /// Mutation to send, or `None` when one is already in flight and this
    /// press was queued
    pub ticket: Option<MutationTicket>,
}

/// Result of settling a ticket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settled {
    /// Entity the ticket belonged to
    pub key: EntityKey,
    /// Final state of the ticket
    pub state: MutationState,
    /// State to show now
    pub displayed: Toggle,
    /// Queued follow-up to send next
    pub follow_up: Option<MutationTicket>,
    /// Message for the viewer after a rollback
    pub notice: Option<String>,
}

#[derive(Debug, Clone)]
struct Entry {
    subject_id: String,
    confirmed: Toggle,
    displayed: Toggle,
    in_flight: Option<(u64, bool)>,
    queued: Option<bool>,
}

/// Per-entity optimistic state for one viewer session
#[derive(Debug, Default)]
pub struct MutationTracker {
    entries: HashMap<EntityKey, Entry>,
    settled: HashMap<EntityKey, (u64, Toggle)>,
    next_ticket: u64,
    settles: u64,
}

impl MutationTracker {
    /// Empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of settles so far. Store it when issuing a load and pass it
    /// back to [`overlay`](Self::overlay) with the result.
    pub const fn mark(&self) -> u64 {
        self.settles
    }

    fn record(&mut self, key: &EntityKey, confirmed: Toggle) {
        self.settles += 1;
        self.settled.insert(key.clone(), (self.settles, confirmed));
    }

    fn issue(&mut self, key: &EntityKey, subject_id: &str, desired: bool) -> MutationTicket {
        self.next_ticket += 1;
        MutationTicket {
            id: self.next_ticket,
            edge: Edge::new(key.kind, subject_id, key.target_id.clone()),
            desired,
        }
    }

    /// Flip the displayed state of `key`.
    ///
    /// `current` is what the screen shows and is used only when nothing is
    /// tracked for `key` yet. Anonymous viewers and self-follows are rejected
    /// without touching any state.
    pub fn press(&mut self, viewer: Option<&str>, key: EntityKey, current: Toggle) -> Result<Press, Error> {
        let viewer = viewer.ok_or(Error::NotSignedIn)?;
        if key.kind == EdgeKind::Follow && key.target_id == viewer {
            return Err(ValidationError::SelfFollow.into());
        }

        let entry = self.entries.entry(key.clone()).or_insert_with(|| Entry {
            subject_id: viewer.to_string(),
            confirmed: current,
            displayed: current,
            in_flight: None,
            queued: None,
        });
        let desired = !entry.displayed.active;
        entry.displayed = entry.confirmed.toward(desired);
        let displayed = entry.displayed;

        if entry.in_flight.is_some() {
            entry.queued = Some(desired);
            tracing::debug!("Queued {} of {} behind in-flight mutation", key.kind.verb(), key.target_id);
            return Ok(Press { displayed, ticket: None });
        }

        let subject_id = entry.subject_id.clone();
        let ticket = self.issue(&key, &subject_id, desired);
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.in_flight = Some((ticket.id, desired));
        }
        Ok(Press {
            displayed,
            ticket: Some(ticket),
        })
    }

    /// Record the gateway's answer for `ticket`. Returns `None` for a ticket
    /// this tracker is not waiting on.
    pub fn settle(&mut self, ticket: &MutationTicket, result: Result<EdgeOutcome, &GatewayError>) -> Option<Settled> {
        let key = ticket.key();
        let entry = self.entries.get_mut(&key)?;
        if entry.in_flight.map(|(id, _)| id) != Some(ticket.id) {
            return None;
        }
        entry.in_flight = None;

        match result {
            Ok(outcome) => {
                entry.confirmed = match outcome {
                    EdgeOutcome::Applied => entry.confirmed.toward(ticket.desired),
                    EdgeOutcome::AlreadyPresent | EdgeOutcome::AlreadyAbsent => Toggle {
                        active: ticket.desired,
                        ..entry.confirmed
                    },
                };
                let next = entry.queued.take().filter(|q| *q != entry.confirmed.active);
                entry.displayed = entry.confirmed.toward(next.unwrap_or(entry.confirmed.active));
                let displayed = entry.displayed;
                let confirmed = entry.confirmed;
                let subject_id = entry.subject_id.clone();
                self.record(&key, confirmed);

                let follow_up = match next {
                    Some(desired) => {
                        let follow_up = self.issue(&key, &subject_id, desired);
                        if let Some(entry) = self.entries.get_mut(&key) {
                            entry.in_flight = Some((follow_up.id, desired));
                        }
                        Some(follow_up)
                    }
                    None => {
                        self.entries.remove(&key);
                        None
                    }
                };
                Some(Settled {
                    key,
                    state: MutationState::Confirmed,
                    displayed,
                    follow_up,
                    notice: None,
                })
            }
            Err(e) => {
                let displayed = entry.confirmed;
                self.entries.remove(&key);
                self.record(&key, displayed);
                tracing::warn!("Rolling back {} of {}: {e}", key.kind.verb(), key.target_id);
                Some(Settled {
                    state: MutationState::RolledBack,
                    displayed,
                    follow_up: None,
                    notice: Some(format!("Couldn't {} right now: {e}", key.kind.verb())),
                    key,
                })
            }
        }
    }

    /// State of a ticket as far as this tracker knows
    pub fn state_of(&self, ticket: &MutationTicket) -> Option<MutationState> {
        let entry = self.entries.get(&ticket.key())?;
        (entry.in_flight.map(|(id, _)| id) == Some(ticket.id)).then_some(MutationState::Pending)
    }

    /// Displayed state of a tracked entity
    pub fn displayed(&self, key: &EntityKey) -> Option<Toggle> {
        self.entries.get(key).map(|e| e.displayed)
    }

    /// Whether a mutation is in flight for `key`
    pub fn is_pending(&self, key: &EntityKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.in_flight.is_some())
    }

    /// Replace toggles in a freshly loaded list. Entities with a mutation
    /// in flight show their displayed state; entities settled after `mark`
    /// (the tracker mark when the load was issued) show what was confirmed.
    pub fn overlay<T: Toggleable>(&self, kind: EdgeKind, items: &mut [T], mark: u64) {
        if self.entries.is_empty() && self.settles <= mark {
            return;
        }
        for item in items {
            let key = EntityKey::new(kind, item.entity_id());
            if let Some(entry) = self.entries.get(&key) {
                item.set_toggle(kind, entry.displayed);
            } else if let Some((at, confirmed)) = self.settled.get(&key)
                && *at > mark
            {
                item.set_toggle(kind, *confirmed);
            }
        }
    }

    /// Forget everything (viewer changed)
    pub fn clear(&mut self) {
        self.entries.clear();
        self.settled.clear();
    }
}

/// Display records carrying one or more toggles
pub trait Toggleable {
    /// Id used as [`EntityKey::target_id`]
    fn entity_id(&self) -> &str;

    /// Current toggle of `kind`, if this record has one
    fn toggle(&self, kind: EdgeKind) -> Option<Toggle>;

    /// Overwrite the toggle of `kind`; ignored when the record has none
    fn set_toggle(&mut self, kind: EdgeKind, toggle: Toggle);
}

impl Toggleable for Post {
    fn entity_id(&self) -> &str {
        &self.id
    }

    fn toggle(&self, kind: EdgeKind) -> Option<Toggle> {
        match kind {
            EdgeKind::Like => Some(Toggle::new(self.liked_by_me, self.likes)),
            EdgeKind::Repost => Some(Toggle::new(self.is_reposted, self.reposts)),
            EdgeKind::Follow | EdgeKind::Favorite => None,
        }
    }

    fn set_toggle(&mut self, kind: EdgeKind, toggle: Toggle) {
        match kind {
            EdgeKind::Like => {
                self.liked_by_me = toggle.active;
                self.likes = toggle.count;
            }
            EdgeKind::Repost => {
                self.is_reposted = toggle.active;
                self.reposts = toggle.count;
            }
            EdgeKind::Follow | EdgeKind::Favorite => {}
        }
    }
}

impl Toggleable for PodcastView {
    fn entity_id(&self) -> &str {
        &self.id
    }

    fn toggle(&self, kind: EdgeKind) -> Option<Toggle> {
        (kind == EdgeKind::Favorite).then_some(Toggle::new(self.is_favorite, self.favorites))
    }

    fn set_toggle(&mut self, kind: EdgeKind, toggle: Toggle) {
        if kind == EdgeKind::Favorite {
            self.is_favorite = toggle.active;
            self.favorites = toggle.count;
        }
    }
}

impl Toggleable for ProfileView {
    fn entity_id(&self) -> &str {
        &self.id
    }

    fn toggle(&self, kind: EdgeKind) -> Option<Toggle> {
        (kind == EdgeKind::Follow).then_some(Toggle::new(self.is_following, self.followers))
    }

    fn set_toggle(&mut self, kind: EdgeKind, toggle: Toggle) {
        if kind == EdgeKind::Follow {
            self.is_following = toggle.active;
            self.followers = toggle.count;
        }
    }
}

/// Send a ticket's edge mutation to the gateway
pub async fn commit<G: Gateway>(gateway: &G, ticket: &MutationTicket) -> Result<EdgeOutcome, GatewayError> {
    let table = ticket.edge.kind.table();
    if ticket.desired {
        match gateway.insert(table, ticket.edge.to_row()).await {
            Ok(_) => Ok(EdgeOutcome::Applied),
            Err(GatewayError::Conflict(_)) => Ok(EdgeOutcome::AlreadyPresent),
            Err(e) => Err(e),
        }
    } else {
        match gateway.delete(table, &ticket.edge.filters()).await? {
            0 => Ok(EdgeOutcome::AlreadyAbsent),
            _ => Ok(EdgeOutcome::Applied),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::memory::MemoryGateway;
    use crate::gateway::Filter;

    fn like(post: &str) -> EntityKey {
        EntityKey::new(EdgeKind::Like, post)
    }

    async fn settle_with(tracker: &mut MutationTracker, gw: &MemoryGateway, ticket: &MutationTicket) -> Settled {
        let result = commit(gw, ticket).await;
        tracker.settle(ticket, result.as_ref().copied()).unwrap()
    }

    #[test]
    fn test_toward_never_negative() {
        assert_eq!(Toggle::new(false, 3).toward(true), Toggle::new(true, 4));
        assert_eq!(Toggle::new(true, 0).toward(false), Toggle::new(false, 0));
        assert_eq!(Toggle::new(true, 5).toward(true), Toggle::new(true, 5));
    }

    #[test]
    fn test_press_flips_synchronously_and_back() {
        let mut tracker = MutationTracker::new();
        let first = tracker.press(Some("me"), like("p1"), Toggle::new(false, 7)).unwrap();
        assert_eq!(first.displayed, Toggle::new(true, 8));
        let ticket = first.ticket.unwrap();
        assert!(ticket.desired);
        assert_eq!(tracker.state_of(&ticket), Some(MutationState::Pending));

        let second = tracker.press(Some("me"), like("p1"), Toggle::new(true, 8)).unwrap();
        assert_eq!(second.displayed, Toggle::new(false, 7));
        assert!(second.ticket.is_none());
        assert!(tracker.is_pending(&like("p1")));
    }

    #[test]
    fn test_anonymous_and_self_follow_rejected() {
        let mut tracker = MutationTracker::new();
        assert!(matches!(
            tracker.press(None, like("p1"), Toggle::default()),
            Err(Error::NotSignedIn)
        ));
        assert!(matches!(
            tracker.press(Some("me"), EntityKey::new(EdgeKind::Follow, "me"), Toggle::default()),
            Err(Error::Validation(ValidationError::SelfFollow))
        ));
        assert_eq!(tracker.displayed(&like("p1")), None);
    }

    #[tokio::test]
    async fn test_double_press_collapses_to_follow_up() {
        let gw = MemoryGateway::new();
        let mut tracker = MutationTracker::new();

        let ticket = tracker
            .press(Some("me"), like("p1"), Toggle::new(false, 0))
            .unwrap()
            .ticket
            .unwrap();
        tracker.press(Some("me"), like("p1"), Toggle::new(true, 1)).unwrap();

        let settled = settle_with(&mut tracker, &gw, &ticket).await;
        assert_eq!(settled.state, MutationState::Confirmed);
        assert_eq!(settled.displayed, Toggle::new(false, 0));
        let follow_up = settled.follow_up.unwrap();
        assert!(!follow_up.desired);

        let settled = settle_with(&mut tracker, &gw, &follow_up).await;
        assert_eq!(settled.displayed, Toggle::new(false, 0));
        assert!(settled.follow_up.is_none());
        assert!(gw.rows("likes").is_empty());
        assert_eq!(tracker.displayed(&like("p1")), None);
    }

    #[tokio::test]
    async fn test_triple_press_needs_no_follow_up() {
        let gw = MemoryGateway::new();
        let mut tracker = MutationTracker::new();

        let ticket = tracker
            .press(Some("me"), like("p1"), Toggle::new(false, 2))
            .unwrap()
            .ticket
            .unwrap();
        tracker.press(Some("me"), like("p1"), Toggle::default()).unwrap();
        let third = tracker.press(Some("me"), like("p1"), Toggle::default()).unwrap();
        assert_eq!(third.displayed, Toggle::new(true, 3));

        let settled = settle_with(&mut tracker, &gw, &ticket).await;
        assert!(settled.follow_up.is_none());
        assert_eq!(settled.displayed, Toggle::new(true, 3));
        assert_eq!(gw.rows("likes").len(), 1);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_with_notice() {
        let gw = MemoryGateway::new();
        gw.fail_next("likes", 1);
        let mut tracker = MutationTracker::new();

        let ticket = tracker
            .press(Some("me"), like("p1"), Toggle::new(false, 4))
            .unwrap()
            .ticket
            .unwrap();
        tracker.press(Some("me"), like("p1"), Toggle::default()).unwrap();
        tracker.press(Some("me"), like("p1"), Toggle::default()).unwrap();

        let settled = settle_with(&mut tracker, &gw, &ticket).await;
        assert_eq!(settled.state, MutationState::RolledBack);
        assert_eq!(settled.displayed, Toggle::new(false, 4));
        assert!(settled.follow_up.is_none());
        assert!(settled.notice.unwrap().contains("like"));
        assert_eq!(tracker.state_of(&ticket), None);
    }

    #[tokio::test]
    async fn test_stale_edge_does_not_double_count() {
        let gw = MemoryGateway::new();
        gw.seed("likes", [serde_json::json!({"user_id": "me", "post_id": "p1"})]);
        let mut tracker = MutationTracker::new();

        // Screen believes the viewer has not liked p1, count already includes it
        let ticket = tracker
            .press(Some("me"), like("p1"), Toggle::new(false, 1))
            .unwrap()
            .ticket
            .unwrap();
        let settled = settle_with(&mut tracker, &gw, &ticket).await;
        assert_eq!(settled.state, MutationState::Confirmed);
        assert_eq!(settled.displayed, Toggle::new(true, 1));
        assert_eq!(gw.rows("likes").len(), 1);
    }

    #[tokio::test]
    async fn test_follow_unfollow_scenario() {
        let gw = MemoryGateway::new();
        gw.seed("follows", [serde_json::json!({"follower_id": "c", "following_id": "b"})]);
        let filters = [Filter::eq("following_id", "b")];
        let followers = || gw.count("follows", &filters);
        let mut tracker = MutationTracker::new();
        let key = EntityKey::new(EdgeKind::Follow, "b");

        assert_eq!(followers().await.unwrap(), 1);

        let press = tracker.press(Some("a"), key.clone(), Toggle::new(false, 1)).unwrap();
        assert_eq!(press.displayed, Toggle::new(true, 2));
        settle_with(&mut tracker, &gw, &press.ticket.unwrap()).await;
        assert_eq!(followers().await.unwrap(), 2);

        let press = tracker.press(Some("a"), key.clone(), Toggle::new(true, 2)).unwrap();
        assert_eq!(press.displayed, Toggle::new(false, 1));
        settle_with(&mut tracker, &gw, &press.ticket.unwrap()).await;
        assert_eq!(followers().await.unwrap(), 1);

        // Unfollowing again from a stale screen is a no-op and the count stays
        let press = tracker.press(Some("a"), key, Toggle::new(true, 1)).unwrap();
        let settled = settle_with(&mut tracker, &gw, &press.ticket.unwrap()).await;
        assert_eq!(settled.displayed, Toggle::new(false, 1));
        assert_eq!(followers().await.unwrap(), 1);
    }

    #[test]
    fn test_unknown_ticket_is_ignored() {
        let mut tracker = MutationTracker::new();
        let ticket = MutationTicket {
            id: 99,
            edge: Edge::new(EdgeKind::Like, "me", "p1"),
            desired: true,
        };
        assert!(tracker.settle(&ticket, Ok(EdgeOutcome::Applied)).is_none());
    }

    #[test]
    fn test_overlay_applies_in_flight_state() {
        let mut tracker = MutationTracker::new();
        tracker
            .press(Some("me"), EntityKey::new(EdgeKind::Follow, "b"), Toggle::new(false, 3))
            .unwrap();

        let mut views = vec![ProfileView {
            id: "b".into(),
            name: "B".into(),
            handle: "@b".into(),
            avatar: String::new(),
            banner: String::new(),
            bio: String::new(),
            is_verified: false,
            followers: 3,
            following: 0,
            is_own: false,
            is_following: false,
        }];
        tracker.overlay(EdgeKind::Follow, &mut views, tracker.mark());
        assert_eq!(views[0].toggle(EdgeKind::Follow), Some(Toggle::new(true, 4)));
    }

    #[tokio::test]
    async fn test_settled_state_covers_older_loads() {
        let gw = MemoryGateway::new();
        let mut tracker = MutationTracker::new();
        let before = tracker.mark();

        let ticket = tracker
            .press(Some("me"), like("p1"), Toggle::new(false, 0))
            .unwrap()
            .ticket
            .unwrap();
        settle_with(&mut tracker, &gw, &ticket).await;
        assert!(!tracker.is_pending(&like("p1")));

        let stale = || vec![Post {
            id: "p1".into(),
            author_id: None,
            author: crate::models::Author {
                name: "User".into(),
                handle: "@user".into(),
                avatar: String::new(),
            },
            text: String::new(),
            media: None,
            created_at: None,
            likes: 0,
            comments: 0,
            reposts: 0,
            liked_by_me: false,
            is_reposted: false,
        }];

        let mut old = stale();
        tracker.overlay(EdgeKind::Like, &mut old, before);
        assert_eq!(old[0].toggle(EdgeKind::Like), Some(Toggle::new(true, 1)));

        // A load issued after the settle is taken as is
        let mut fresh = stale();
        tracker.overlay(EdgeKind::Like, &mut fresh, tracker.mark());
        assert_eq!(fresh[0].toggle(EdgeKind::Like), Some(Toggle::new(false, 0)));

        tracker.clear();
        let mut old = stale();
        tracker.overlay(EdgeKind::Like, &mut old, before);
        assert_eq!(old[0].toggle(EdgeKind::Like), Some(Toggle::new(false, 0)));
    }
}
