//! Async operations
//!
//! Channels connect the controller to a worker on the same thread. The
//! worker runs each command as its own local task, so responses may come
//! back in any order; every result carries what the controller needs to
//! tell whether it still applies.

use std::rc::Rc;

use tokio::sync::mpsc;

use crate::compose::{self, NewPost};
use crate::error::GatewayError;
use crate::feed::{FeedAggregator, PostDetail};
use crate::gateway::Gateway;
use crate::models::{PodcastFilter, PodcastView, Post, PostRow};
use crate::optimistic::{EdgeOutcome, MutationTicket, commit};
use crate::session::SessionProvider;

use super::state::{LoadToken, ProfilePage};

/// Commands sent from the controller to the worker
#[derive(Debug, Clone)]
pub enum AsyncCommand {
    /// Load the home feed
    LoadHome { token: LoadToken, viewer: Option<String> },
    /// Load the podcast list
    LoadPodcasts {
        token: LoadToken,
        viewer: Option<String>,
        filter: PodcastFilter,
    },
    /// Load a profile with its posts, reposts and podcasts
    LoadProfile {
        token: LoadToken,
        user_id: String,
        viewer: Option<String>,
    },
    /// Load one post and its comments
    LoadDetail {
        token: LoadToken,
        post_id: String,
        viewer: Option<String>,
    },
    /// Send an edge mutation
    Commit { ticket: MutationTicket },
    /// Publish a post
    CreatePost { post: NewPost },
    /// Comment on a post
    AddComment { post_id: String, text: String },
    /// Stop the worker
    Shutdown,
}

/// Results sent back from the worker
#[derive(Debug)]
pub enum AsyncResult {
    /// Home feed loaded
    HomeLoaded { token: LoadToken, posts: Vec<Post> },
    /// Podcasts loaded
    PodcastsLoaded {
        token: LoadToken,
        podcasts: Vec<PodcastView>,
    },
    /// Profile loaded
    ProfileLoaded { token: LoadToken, page: ProfilePage },
    /// Post detail loaded (`None` when the post could not be read)
    DetailLoaded {
        token: LoadToken,
        detail: Option<PostDetail>,
    },
    /// Edge mutation answered
    Committed {
        ticket: MutationTicket,
        result: Result<EdgeOutcome, GatewayError>,
    },
    /// Post published
    PostCreated { row: PostRow },
    /// Comment stored
    CommentAdded { post_id: String },
    /// A write failed
    Error { message: String },
}

/// Channel handles for communicating with the worker
pub struct AsyncHandle {
    /// Send commands to the worker
    pub cmd_tx: mpsc::Sender<AsyncCommand>,
    /// Receive results from the worker
    pub result_rx: mpsc::Receiver<AsyncResult>,
}

/// Spawn the worker on the current `LocalSet` and return its handles
pub fn spawn_worker<G: Gateway + 'static>(
    session: Rc<SessionProvider<G>>,
    feed: Rc<FeedAggregator<G>>,
) -> AsyncHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<AsyncCommand>(32);
    let (result_tx, result_rx) = mpsc::channel::<AsyncResult>(32);

    tokio::task::spawn_local(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if matches!(cmd, AsyncCommand::Shutdown) {
                break;
            }
            let session = Rc::clone(&session);
            let feed = Rc::clone(&feed);
            let result_tx = result_tx.clone();
            tokio::task::spawn_local(async move {
                let result = handle(&session, &feed, cmd).await;
                // Controller gone means nobody wants the answer
                let _ = result_tx.send(result).await;
            });
        }
        tracing::debug!("Async worker stopped");
    });

    AsyncHandle { cmd_tx, result_rx }
}

async fn handle<G: Gateway>(
    session: &SessionProvider<G>,
    feed: &FeedAggregator<G>,
    cmd: AsyncCommand,
) -> AsyncResult {
    match cmd {
        AsyncCommand::LoadHome { token, viewer } => AsyncResult::HomeLoaded {
            token,
            posts: feed.home_feed(viewer.as_deref()).await,
        },
        AsyncCommand::LoadPodcasts {
            token,
            viewer,
            filter,
        } => AsyncResult::PodcastsLoaded {
            token,
            podcasts: feed.podcasts(viewer.as_deref(), filter).await,
        },
        AsyncCommand::LoadProfile {
            token,
            user_id,
            viewer,
        } => {
            let viewer = viewer.as_deref();
            let (view, posts, reposts, podcasts) = tokio::join!(
                feed.profile_view(&user_id, viewer),
                feed.user_posts(&user_id, viewer),
                feed.user_reposts(&user_id, viewer),
                feed.user_podcasts(&user_id, viewer),
            );
            AsyncResult::ProfileLoaded {
                token,
                page: ProfilePage {
                    view: Some(view),
                    posts,
                    reposts,
                    podcasts,
                },
            }
        }
        AsyncCommand::LoadDetail {
            token,
            post_id,
            viewer,
        } => AsyncResult::DetailLoaded {
            token,
            detail: feed.post_detail(&post_id, viewer.as_deref()).await,
        },
        AsyncCommand::Commit { ticket } => {
            let result = commit(session.gateway().as_ref(), &ticket).await;
            AsyncResult::Committed { ticket, result }
        }
        AsyncCommand::CreatePost { post } => match compose::create_post(session, post).await {
            Ok(row) => AsyncResult::PostCreated { row },
            Err(e) => AsyncResult::Error {
                message: format!("Post failed: {e}"),
            },
        },
        AsyncCommand::AddComment { post_id, text } => {
            match compose::add_comment(session, &post_id, &text).await {
                Ok(_) => AsyncResult::CommentAdded { post_id },
                Err(e) => AsyncResult::Error {
                    message: format!("Comment failed: {e}"),
                },
            }
        }
        AsyncCommand::Shutdown => AsyncResult::Error {
            message: "worker is shutting down".to_string(),
        },
    }
}
