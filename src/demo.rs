//! Demo mode: a seeded in-memory backend and a scripted session
//!
//! Runs without network access or credentials.

use std::rc::Rc;

use anyhow::Result;
use chrono::{Duration, Utc};
use serde_json::{Value, json};

use crate::app::App;
use crate::compose::NewPost;
use crate::feed::{FeedAggregator, Placeholders};
use crate::gateway::memory::MemoryGateway;
use crate::models::{EdgeKind, PodcastFilter};
use crate::render;
use crate::session::SessionProvider;

/// Email of the seeded demo account
pub const DEMO_EMAIL: &str = "demo@murmur.local";
/// Password of the seeded demo account
pub const DEMO_PASSWORD: &str = "murmur-demo";

/// Seed timestamps sit behind the memory gateway's clock, which starts a
/// day back, so rows written during the demo sort first
fn ago(minutes: i64) -> String {
    (Utc::now() - Duration::days(1) - Duration::minutes(minutes)).to_rfc3339()
}

fn demo_profiles() -> Vec<Value> {
    vec![
        json!({"id": "demo", "username": "demo", "display_name": "Demo Listener", "bio": "Trying things out."}),
        json!({"id": "ada", "username": "ada", "display_name": "Ada Lovelace", "bio": "Notes on engines and poetry.", "is_verified": true}),
        json!({"id": "grace", "username": "grace", "display_name": "Grace Hopper", "bio": "It's easier to ask forgiveness than it is to get permission."}),
        json!({"id": "linus", "username": "linus"}),
    ]
}

fn demo_posts() -> Vec<Value> {
    vec![
        json!({"id": "post-1", "author_id": "ada", "text": "The engine might compose elaborate pieces of music of any degree of complexity.", "created_at": ago(12)}),
        json!({"id": "post-2", "author_id": "grace", "text": "A ship in port is safe, but that's not what ships are built for.", "created_at": ago(45)}),
        json!({"id": "post-3", "author_id": "linus", "text": "", "media_url": "https://picsum.photos/seed/kernel/800/450", "media_type": "image", "created_at": ago(90)}),
        json!({"id": "post-4", "author_id": "ada", "text": "New episode is up: bernoulli numbers, explained slowly.", "created_at": ago(300)}),
    ]
}

fn demo_podcasts() -> Vec<Value> {
    vec![
        json!({"id": "pod-1", "user_id": "ada", "title": "Analytical Engines", "artist": "Ada Lovelace", "duration": 1845, "created_at": ago(60)}),
        json!({"id": "pod-2", "user_id": "grace", "title": "Nanoseconds", "duration": 642, "created_at": ago(600)}),
        json!({"id": "pod-3", "user_id": "linus", "duration": 95, "created_at": ago(1200)}),
    ]
}

/// In-memory gateway holding the demo data set
pub fn seeded_gateway() -> MemoryGateway {
    let gw = MemoryGateway::new();
    gw.seed_account("demo", DEMO_EMAIL, DEMO_PASSWORD, Some("demo"));
    gw.seed("profiles", demo_profiles());
    gw.seed("posts", demo_posts());
    gw.seed("podcasts", demo_podcasts());
    gw.seed(
        "likes",
        [
            json!({"user_id": "grace", "post_id": "post-1"}),
            json!({"user_id": "linus", "post_id": "post-1"}),
            json!({"user_id": "ada", "post_id": "post-2"}),
        ],
    );
    gw.seed("reposts", [json!({"user_id": "grace", "post_id": "post-4", "created_at": ago(30)})]);
    gw.seed(
        "comments",
        [
            json!({"post_id": "post-1", "author_id": "grace", "text": "Still true.", "created_at": ago(10)}),
            json!({"post_id": "post-1", "author_id": "linus", "text": "Talk is cheap.", "created_at": ago(5)}),
        ],
    );
    gw.seed(
        "follows",
        [
            json!({"follower_id": "grace", "following_id": "ada"}),
            json!({"follower_id": "demo", "following_id": "grace"}),
        ],
    );
    gw.seed("favorites", [json!({"user_id": "grace", "podcast_id": "pod-1"})]);
    gw
}

fn flush(app: &mut App<MemoryGateway>) {
    for notice in app.state.drain_notices() {
        println!("» {notice}");
    }
}

/// Walk through the main flows against the demo data set
pub async fn run() -> Result<()> {
    let gw = Rc::new(seeded_gateway());
    let session = Rc::new(SessionProvider::new(Rc::clone(&gw)));
    let feed = Rc::new(FeedAggregator::new(
        Rc::clone(&gw),
        Placeholders::default(),
        50,
    ));
    let mut app = App::start(session, feed).await;

    println!("Signed out, the feed is public:\n");
    app.open_home().await?;
    app.run_until_idle().await?;
    println!("{}", render::posts("Home", app.state.home.content()));

    app.toggle(EdgeKind::Like, "post-1").await?;
    flush(&mut app);

    app.session().sign_in(DEMO_EMAIL, DEMO_PASSWORD).await?;
    println!("\nSigned in as {DEMO_EMAIL}\n");
    app.open_home().await?;
    app.run_until_idle().await?;

    app.toggle(EdgeKind::Like, "post-1").await?;
    app.toggle(EdgeKind::Repost, "post-2").await?;
    app.run_until_idle().await?;
    app.post(NewPost {
        text: "Hello from demo mode!".to_string(),
        media: None,
    })
    .await?;
    app.run_until_idle().await?;
    flush(&mut app);
    println!("{}", render::posts("Home", app.state.home.content()));

    app.open_post("post-1").await?;
    app.run_until_idle().await?;
    app.comment("post-1", "Queued behind two others.").await?;
    app.run_until_idle().await?;
    if let Some(detail) = app.state.detail.content() {
        println!("{}\n", render::detail(detail));
    }
    app.close_post();

    app.open_profile(Some("ada")).await?;
    app.run_until_idle().await?;
    app.toggle(EdgeKind::Follow, "ada").await?;
    app.run_until_idle().await?;
    if let Some(view) = &app.state.profile.content().view {
        println!("{}\n", render::profile(view));
    }

    app.open_podcasts(PodcastFilter::New).await?;
    app.run_until_idle().await?;
    app.toggle(EdgeKind::Favorite, "pod-2").await?;
    app.run_until_idle().await?;
    println!("{}", render::podcasts(app.state.podcasts.content()));

    if app.play("pod-1") {
        app.state.player.tick(75);
        if let Some(line) = render::now_playing(&app.state.player) {
            println!("{line}");
        }
    }
    flush(&mut app);

    app.shutdown().await;
    Ok(())
}
