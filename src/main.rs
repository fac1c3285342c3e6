//! Murmur - posts, podcasts and profiles from the terminal
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::future_not_send)]

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Result, anyhow, bail};
use tokio::task::LocalSet;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use murmur::app::App;
use murmur::compose::{self, NewPodcast, ProfileEdit};
use murmur::gateway::Gateway;
use murmur::gateway::supabase::SupabaseClient;
use murmur::models::{EdgeKind, PodcastFilter};
use murmur::session::SessionStore;
use murmur::upload::MediaUpload;
use murmur::{Config, FeedAggregator, SessionProvider, SessionState, render};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging (RUST_LOG=debug for verbose output)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;
    LocalSet::new().run_until(run(command)).await
}

/// CLI commands
#[derive(Debug, PartialEq, Eq)]
enum Command {
    SignUp {
        email: String,
        password: String,
        username: String,
    },
    SignIn {
        email: String,
        password: String,
    },
    SignOut,
    WhoAmI,
    Feed,
    Show {
        post_id: String,
    },
    Post {
        text: String,
        media: Option<PathBuf>,
    },
    Comment {
        post_id: String,
        text: String,
    },
    Toggle {
        kind: EdgeKind,
        target_id: String,
    },
    Profile {
        user_id: Option<String>,
    },
    Podcasts {
        filter: PodcastFilter,
    },
    Podcast {
        title: String,
        cover: PathBuf,
        video: PathBuf,
        duration_secs: u32,
    },
    EditProfile {
        display_name: Option<String>,
        username: Option<String>,
        bio: Option<String>,
        avatar: Option<PathBuf>,
        banner: Option<PathBuf>,
    },
    Demo,
    Help,
    Version,
}

fn arg(args: &[String], index: usize, what: &str) -> Result<String> {
    args.get(index)
        .filter(|a| !a.starts_with("--"))
        .cloned()
        .ok_or_else(|| anyhow!("Missing {what}\nRun 'murmur --help' for usage"))
}

fn option(args: &[String], names: &[&str]) -> Option<String> {
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_args(args: &[String]) -> Result<Command> {
    let Some(command) = args.get(1) else {
        return Ok(Command::Feed);
    };

    match command.as_str() {
        "-h" | "--help" | "help" => Ok(Command::Help),
        "-v" | "--version" | "version" => Ok(Command::Version),
        "--demo" | "demo" => Ok(Command::Demo),

        "signup" => Ok(Command::SignUp {
            email: arg(args, 2, "email")?,
            password: arg(args, 3, "password")?,
            username: arg(args, 4, "username")?,
        }),
        "signin" | "login" => Ok(Command::SignIn {
            email: arg(args, 2, "email")?,
            password: arg(args, 3, "password")?,
        }),
        "signout" | "logout" => Ok(Command::SignOut),
        "whoami" => Ok(Command::WhoAmI),

        "feed" | "home" => Ok(Command::Feed),
        "show" => Ok(Command::Show {
            post_id: arg(args, 2, "post id")?,
        }),
        "post" => {
            let media = option(args, &["--media", "-m"]).map(PathBuf::from);
            let text = arg(args, 2, "post text").or_else(|e| {
                if media.is_some() { Ok(String::new()) } else { Err(e) }
            })?;
            Ok(Command::Post { text, media })
        }
        "comment" => Ok(Command::Comment {
            post_id: arg(args, 2, "post id")?,
            text: arg(args, 3, "comment text")?,
        }),

        "like" | "repost" | "favorite" | "follow" => {
            let kind = match command.as_str() {
                "like" => EdgeKind::Like,
                "repost" => EdgeKind::Repost,
                "favorite" => EdgeKind::Favorite,
                _ => EdgeKind::Follow,
            };
            Ok(Command::Toggle {
                kind,
                target_id: arg(args, 2, "target id")?,
            })
        }

        "profile" => Ok(Command::Profile {
            user_id: arg(args, 2, "user id").ok(),
        }),
        "podcasts" => {
            let filter = match args.get(2) {
                Some(name) => PodcastFilter::from_str(name)
                    .ok_or_else(|| anyhow!("Unknown filter: {name}\nUse new, for-you or favorites"))?,
                None => PodcastFilter::New,
            };
            Ok(Command::Podcasts { filter })
        }
        "podcast" => {
            let duration_secs = match option(args, &["--duration", "-d"]) {
                Some(d) => d.parse().map_err(|_| anyhow!("Invalid duration: {d}"))?,
                None => 0,
            };
            Ok(Command::Podcast {
                title: arg(args, 2, "podcast title")?,
                cover: option(args, &["--cover", "-c"])
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow!("Missing --cover <image>"))?,
                video: option(args, &["--video", "-V"])
                    .map(PathBuf::from)
                    .ok_or_else(|| anyhow!("Missing --video <file>"))?,
                duration_secs,
            })
        }
        "edit-profile" => Ok(Command::EditProfile {
            display_name: option(args, &["--name"]),
            username: option(args, &["--username"]),
            bio: option(args, &["--bio"]),
            avatar: option(args, &["--avatar"]).map(PathBuf::from),
            banner: option(args, &["--banner"]).map(PathBuf::from),
        }),

        other => Err(anyhow!("Unknown command: {other}\nRun 'murmur --help' for usage")),
    }
}

fn print_help() {
    let config_path = Config::default_path()
        .map_or_else(|_| "Unknown".to_string(), |p| p.display().to_string());

    println!(
        r#"{}
🎙️ Murmur - posts, podcasts and profiles

USAGE:
    murmur                             Show the home feed
    murmur [COMMAND]

ACCOUNT:
    signup <email> <password> <username>
    signin <email> <password>
    signout
    whoami
    edit-profile [--name N] [--username U] [--bio B] [--avatar IMG] [--banner IMG]

READ:
    feed                               Home feed
    show <post-id>                     A post and its comments
    profile [user-id]                  A profile (default: yours)
    podcasts [new|for-you|favorites]   Podcast list

WRITE:
    post <text> [--media FILE]         Publish a post
    comment <post-id> <text>           Comment on a post
    like <post-id>                     Toggle like
    repost <post-id>                   Toggle repost
    favorite <podcast-id>              Toggle favorite
    follow <user-id>                   Toggle follow
    podcast <title> --cover IMG --video FILE [--duration SECS]

OTHER:
    demo                               Scripted walkthrough on sample data
    -h, --help                         Show this help message
    -v, --version                      Show version information

ENVIRONMENT:
    {}                 Backend URL
    {}                    Publishable API key
    RUST_LOG                           Log filter (default: warn)

CONFIG:
    {}
"#,
        murmur::LOGO,
        murmur::config::ENV_GATEWAY_URL,
        murmur::config::ENV_ANON_KEY,
        config_path
    );
}

fn print_version() {
    println!("murmur {}", murmur::VERSION);
}

async fn connect() -> Result<App<SupabaseClient>> {
    let config = Config::load()?;
    if !config.gateway.is_configured() {
        bail!(
            "No backend configured.\nSet {} and {}, or edit {}",
            murmur::config::ENV_GATEWAY_URL,
            murmur::config::ENV_ANON_KEY,
            Config::default_path()?.display()
        );
    }

    let store = match SessionStore::open_default() {
        Ok(store) => Some(store),
        Err(e) => {
            tracing::warn!("Session will not be remembered: {e}");
            None
        }
    };
    let gateway = Rc::new(SupabaseClient::new(&config.gateway, store)?);
    let session = Rc::new(SessionProvider::new(Rc::clone(&gateway)));
    let feed = Rc::new(FeedAggregator::from_config(Rc::clone(&gateway), &config));
    Ok(App::start(session, feed).await)
}

fn flush(app: &mut App<SupabaseClient>) {
    for notice in app.state.drain_notices() {
        println!("» {notice}");
    }
}

/// Turn a write the worker reported as failed into the command's error
fn write_outcome<G: Gateway + 'static>(app: &mut App<G>) -> Result<()> {
    let Some(message) = app.take_failures().into_iter().next() else {
        return Ok(());
    };
    app.state.notices.retain(|n| *n != message);
    Err(anyhow!(message))
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Help => {
            print_help();
            return Ok(());
        }
        Command::Version => {
            print_version();
            return Ok(());
        }
        Command::Demo => return murmur::demo::run().await,
        _ => {}
    }

    let mut app = connect().await?;
    let outcome = execute(&mut app, command).await;
    flush(&mut app);
    app.shutdown().await;
    outcome
}

async fn execute(app: &mut App<SupabaseClient>, command: Command) -> Result<()> {
    match command {
        Command::SignUp {
            email,
            password,
            username,
        } => match app.session().sign_up(&email, &password, &username).await? {
            Some(_) => println!("✓ Signed up and signed in as @{username}"),
            None => println!("✓ Account created. Check {email} to confirm it, then sign in."),
        },

        Command::SignIn { email, password } => {
            app.session().sign_in(&email, &password).await?;
            println!("✓ Signed in as {email}");
        }

        Command::SignOut => {
            app.sign_out().await?;
            println!("✓ Signed out");
        }

        Command::WhoAmI => match app.session().state() {
            SessionState::Authenticated { session, profile } => {
                let handle = profile.as_ref().and_then(murmur::Profile::handle);
                let email = session.user.email.unwrap_or_default();
                match handle {
                    Some(handle) => println!("{handle} ({email})"),
                    None => println!("{email}"),
                }
            }
            _ => println!("Not signed in"),
        },

        Command::Feed => {
            app.open_home().await?;
            app.run_until_idle().await?;
            println!("{}", render::posts("Home", app.state.home.content()));
        }

        Command::Show { post_id } => {
            app.open_post(&post_id).await?;
            app.run_until_idle().await?;
            if let Some(detail) = app.state.detail.content() {
                println!("{}", render::detail(detail));
            }
        }

        Command::Post { text, media } => {
            let media = match media {
                Some(path) => Some(MediaUpload::from_path(&path).await?),
                None => None,
            };
            app.post(compose::NewPost { text, media }).await?;
            app.run_until_idle().await?;
            write_outcome(app)?;
        }

        Command::Comment { post_id, text } => {
            app.open_post(&post_id).await?;
            app.run_until_idle().await?;
            app.comment(&post_id, &text).await?;
            app.run_until_idle().await?;
            write_outcome(app)?;
            if let Some(detail) = app.state.detail.content() {
                println!("{}", render::detail(detail));
            }
        }

        Command::Toggle { kind, target_id } => {
            match kind {
                EdgeKind::Like | EdgeKind::Repost => app.open_post(&target_id).await?,
                EdgeKind::Follow => app.open_profile(Some(&target_id)).await?,
                EdgeKind::Favorite => app.open_podcasts(PodcastFilter::New).await?,
            }
            app.run_until_idle().await?;
            if app.displayed(kind, &target_id).is_none() {
                bail!("Nothing to {} with id {target_id}", kind.verb());
            }

            app.toggle(kind, &target_id).await?;
            app.run_until_idle().await?;
            if let Some(toggle) = app.displayed(kind, &target_id) {
                let state = if toggle.active { "on" } else { "off" };
                println!("{} {target_id}: {state} ({})", kind.verb(), toggle.count);
            }
            if let Some(detail) = app.state.detail.content() {
                println!("  \"{}\"", detail.post.preview(60));
            }
        }

        Command::Profile { user_id } => {
            app.open_profile(user_id.as_deref()).await?;
            app.run_until_idle().await?;
            let page = app.state.profile.content();
            if let Some(view) = &page.view {
                println!("{}\n", render::profile(view));
                println!("{}", render::posts("Posts", &page.posts));
                println!("{}", render::posts("Reposts", &page.reposts));
                println!("{}", render::podcasts(&page.podcasts));
            }
        }

        Command::Podcasts { filter } => {
            app.open_podcasts(filter).await?;
            app.run_until_idle().await?;
            println!("{}", render::podcasts(app.state.podcasts.content()));
        }

        Command::Podcast {
            title,
            cover,
            video,
            duration_secs,
        } => {
            println!("⏫ Uploading {}...", video.display());
            let podcast = NewPodcast {
                title,
                cover: Some(MediaUpload::from_path(&cover).await?),
                video: Some(MediaUpload::from_path(&video).await?),
                duration_secs,
            };
            let row = compose::create_podcast(app.session(), podcast).await?;
            println!("✓ Podcast published [{}]", row.id);
        }

        Command::EditProfile {
            display_name,
            username,
            bio,
            avatar,
            banner,
        } => {
            let avatar = match avatar {
                Some(path) => Some(MediaUpload::from_path(&path).await?),
                None => None,
            };
            let banner = match banner {
                Some(path) => Some(MediaUpload::from_path(&path).await?),
                None => None,
            };
            let edit = ProfileEdit {
                display_name,
                username,
                bio,
                avatar,
                banner,
            };
            let profile = compose::update_profile(app.session(), edit).await?;
            println!(
                "✓ Profile updated{}",
                profile.handle().map(|h| format!(" ({h})")).unwrap_or_default()
            );
        }

        Command::Demo | Command::Help | Command::Version => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use murmur::demo::{DEMO_EMAIL, DEMO_PASSWORD, seeded_gateway};
    use murmur::feed::Placeholders;

    fn args(line: &str) -> Vec<String> {
        std::iter::once("murmur")
            .chain(line.split_whitespace())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_toggles() {
        assert_eq!(
            parse_args(&args("follow u42")).unwrap(),
            Command::Toggle {
                kind: EdgeKind::Follow,
                target_id: "u42".into()
            }
        );
        assert!(parse_args(&args("like")).is_err());
    }

    #[test]
    fn test_parse_media_only_post() {
        assert_eq!(
            parse_args(&args("post --media cat.png")).unwrap(),
            Command::Post {
                text: String::new(),
                media: Some(PathBuf::from("cat.png"))
            }
        );
    }

    #[test]
    fn test_parse_podcast_requires_files() {
        assert!(parse_args(&args("podcast Title --cover c.png")).is_err());
        let cmd = parse_args(&args("podcast Title --cover c.png --video v.mp4 -d 90")).unwrap();
        assert!(matches!(cmd, Command::Podcast { duration_secs: 90, .. }));
    }

    #[test]
    fn test_defaults() {
        assert_eq!(parse_args(&args("")).unwrap(), Command::Feed);
        assert_eq!(
            parse_args(&args("podcasts")).unwrap(),
            Command::Podcasts {
                filter: PodcastFilter::New
            }
        );
        assert!(parse_args(&args("podcasts loud")).is_err());
    }

    #[tokio::test]
    async fn test_failed_post_becomes_error() {
        LocalSet::new()
            .run_until(async {
                let gw = Rc::new(seeded_gateway());
                let session = Rc::new(SessionProvider::new(Rc::clone(&gw)));
                let feed = Rc::new(FeedAggregator::new(Rc::clone(&gw), Placeholders::default(), 50));
                let mut app = App::start(session, feed).await;
                app.session().sign_in(DEMO_EMAIL, DEMO_PASSWORD).await.unwrap();

                gw.fail_next("posts", 1);
                let post = compose::NewPost {
                    text: "hi".into(),
                    media: None,
                };
                app.post(post).await.unwrap();
                app.run_until_idle().await.unwrap();

                let err = write_outcome(&mut app).unwrap_err();
                assert!(err.to_string().starts_with("Post failed"));
                assert!(app.state.notices.is_empty());
                assert!(write_outcome(&mut app).is_ok());
            })
            .await;
    }
}
