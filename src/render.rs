//! Plain-text rendering for the command line

use std::fmt::Write as _;

use crate::feed::PostDetail;
use crate::models::{Comment, PodcastView, Post, ProfileView};
use crate::player::Player;

/// Column width for wrapped bodies
pub const WIDTH: usize = 72;

fn rule() -> String {
    "─".repeat(WIDTH)
}

fn byline(name: &str, handle: &str, time: &str) -> String {
    if time.is_empty() {
        format!("{name} {handle}")
    } else {
        format!("{name} {handle} · {time}")
    }
}

fn wrapped(text: &str, indent: &str) -> String {
    let options = textwrap::Options::new(WIDTH)
        .initial_indent(indent)
        .subsequent_indent(indent);
    textwrap::fill(text, options)
}

/// One post with its counters
pub fn post(post: &Post) -> String {
    let mut out = format!(
        "{}  [{}]\n",
        byline(&post.author.name, &post.author.handle, &post.relative_time()),
        post.id
    );
    if !post.text.is_empty() {
        out.push_str(&wrapped(&post.text, "  "));
        out.push('\n');
    }
    if let Some(media) = &post.media {
        let _ = writeln!(out, "  [{}] {}", media.kind.as_str(), media.url);
    }
    let heart = if post.liked_by_me { "♥" } else { "♡" };
    let repost = if post.is_reposted { "🔁" } else { "⇄" };
    let _ = write!(
        out,
        "  {heart} {}  {repost} {}  💬 {}",
        post.likes, post.reposts, post.comments
    );
    out
}

/// A list of posts separated by rules
pub fn posts(title: &str, posts: &[Post]) -> String {
    let mut out = format!("{title}\n{}\n", rule());
    if posts.is_empty() {
        out.push_str("Nothing here yet.\n");
    }
    for p in posts {
        out.push_str(&post(p));
        out.push_str("\n\n");
    }
    out
}

fn comment(comment: &Comment) -> String {
    format!(
        "  {}\n{}",
        byline(&comment.author.name, &comment.author.handle, &comment.relative_time()),
        wrapped(&comment.text, "    ")
    )
}

/// A post followed by its comments
pub fn detail(detail: &PostDetail) -> String {
    let mut out = post(&detail.post);
    let _ = write!(out, "\n{}\n", rule());
    if detail.comments.is_empty() {
        out.push_str("  No comments yet.\n");
    }
    for c in &detail.comments {
        out.push_str(&comment(c));
        out.push('\n');
    }
    out
}

/// Profile header with follow statistics
pub fn profile(view: &ProfileView) -> String {
    let badge = if view.is_verified { " ✓" } else { "" };
    let mut out = format!("{}{badge} {}\n", view.name, view.handle);
    if !view.bio.is_empty() {
        out.push_str(&wrapped(&view.bio, "  "));
        out.push('\n');
    }
    let relation = if view.is_own {
        " · you"
    } else if view.is_following {
        " · following"
    } else {
        ""
    };
    let _ = write!(
        out,
        "  {} followers · {} following{relation}",
        view.followers, view.following
    );
    out
}

/// Podcast list
pub fn podcasts(podcasts: &[PodcastView]) -> String {
    let mut out = format!("Podcasts\n{}\n", rule());
    if podcasts.is_empty() {
        out.push_str("Nothing here yet.\n");
    }
    for p in podcasts {
        let star = if p.is_favorite { "★" } else { "☆" };
        let _ = writeln!(
            out,
            "{star} {} · {} ({})  {} favorites  [{}]",
            p.title,
            p.artist,
            p.duration_label(),
            p.favorites,
            p.id
        );
    }
    out
}

/// Now-playing line
pub fn now_playing(player: &Player) -> Option<String> {
    let track = player.current()?;
    let state = if player.is_playing() { "▶" } else { "⏸" };
    Some(format!(
        "{state} {} · {}  {}",
        track.title,
        track.artist,
        player.progress_label()
    ))
}
