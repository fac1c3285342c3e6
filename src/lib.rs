//! # Murmur 🎙️
//!
//! A social client for short posts, video podcasts and profiles stored on a
//! hosted backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          App                                │
//! │  Screens, optimistic toggles, async worker, now playing     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │      Feed       │ │   Optimistic    │ │    Session      │
//! │                 │ │                 │ │                 │
//! │ • Home / user   │ │ • Press/settle  │ │ • Auth events   │
//! │ • Post detail   │ │ • Rollback      │ │ • Profile load  │
//! │ • Podcasts      │ │ • Follow-ups    │ │ • Encrypted     │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!          │                   │                   │
//!          └───────────────────┼───────────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Gateway (+ Upload pipeline)                 │
//! │   Supabase over HTTP, or in memory for tests and the demo   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`app`]: Screen state and the controller driving the async worker
//! - [`compose`]: Posts, comments, podcasts and profile edits
//! - [`config`]: Configuration management
//! - [`feed`]: Feed aggregation and placeholder fallbacks
//! - [`gateway`]: Remote data gateway trait and implementations
//! - [`models`]: Rows and display records
//! - [`optimistic`]: Optimistic like/repost/favorite/follow toggles
//! - [`session`]: Session state and encrypted persistence
//! - [`upload`]: Media upload pipeline
//!
//! ## Example
//!
//! ```no_run
//! use murmur::demo;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> anyhow::Result<()> {
//!     tokio::task::LocalSet::new().run_until(demo::run()).await
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::if_not_else)]
#![allow(clippy::single_match_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::trivially_copy_pass_by_ref)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::use_self)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::should_implement_trait)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::similar_names)]
#![allow(clippy::future_not_send)]

pub mod app;
pub mod compose;
pub mod config;
pub mod demo;
pub mod error;
pub mod feed;
pub mod gateway;
pub mod models;
pub mod optimistic;
pub mod paths;
pub mod player;
pub mod render;
pub mod session;
pub mod upload;

// Re-export main types for convenience
pub use app::{App, AppState};
pub use config::Config;
pub use error::{Error, GatewayError, ValidationError};
pub use feed::FeedAggregator;
pub use gateway::Gateway;
pub use models::{Comment, EdgeKind, PodcastView, Post, Profile, ProfileView};
pub use optimistic::{MutationTracker, Toggle};
pub use session::{SessionProvider, SessionState};

/// ASCII logo for the application
pub const LOGO: &str = r"
  _ __ ___  _   _ _ __ _ __ ___  _   _ _ __
 | '_ ` _ \| | | | '__| '_ ` _ \| | | | '__|
 | | | | | | |_| | |  | | | | | | |_| | |
 |_| |_| |_|\__,_|_|  |_| |_| |_|\__,_|_|
";

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
