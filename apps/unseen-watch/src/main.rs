mod commands;
mod config;

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use unseen_poller::feed::{HttpFeedBackend, NotificationFeed};
use unseen_poller::{
    FileStore, HttpCountFetcher, KeyValueStore, MemoryStore, Poller, PollerDeps, Snapshot, Switch,
};

use commands::Command;
use config::Config;

/// What the operator's commands act on.
struct Console {
    poller: Poller,
    visible: Switch,
    online: Switch,
    feed: Option<NotificationFeed<HttpFeedBackend>>,
}

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let file_store = config
        .store_path
        .clone()
        .or_else(FileStore::default_location)
        .map(|path| Arc::new(FileStore::open(path)));
    let store: Arc<dyn KeyValueStore> = match &file_store {
        Some(fs) => {
            tracing::info!(path = %fs.path().display(), "acknowledgments on disk");
            fs.clone()
        }
        None => {
            tracing::warn!("no data directory, acknowledgments will not survive restarts");
            Arc::new(MemoryStore::new())
        }
    };

    let mut fetcher = HttpCountFetcher::new(&config.count_url).with_field(&config.count_field);
    if let Some(token) = &config.api_token {
        fetcher = fetcher.with_bearer_token(token);
    }

    let feed = config.notifications_url.as_deref().map(|url| {
        let mut backend = HttpFeedBackend::new(url);
        if let Some(token) = &config.api_token {
            backend = backend.with_bearer_token(token);
        }
        NotificationFeed::new(backend)
    });

    let visible = Switch::on();
    let online = Switch::on();
    let deps = PollerDeps {
        fetcher: Arc::new(fetcher),
        store,
        visibility: Arc::new(visible.clone()),
        connectivity: Arc::new(online.clone()),
    };

    tracing::info!(
        url = %config.count_url,
        user = ?config.user_id,
        foreground = ?config.interval_foreground,
        background = ?config.interval_background,
        "unseen-watch starting"
    );
    let poller = Poller::start(config.poller_config(), deps);

    let mut badge = poller.subscribe();
    tokio::spawn(async move {
        while badge.changed().await.is_ok() {
            let snap = badge.borrow_and_update().clone();
            tracing::info!(
                has_new = snap.has_new,
                current = snap.current_count,
                last_seen = ?snap.last_seen_count,
                failures = snap.failure_streak,
                "badge updated"
            );
        }
    });

    let console = Console {
        poller,
        visible,
        online,
        feed,
    };

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut reload = tokio::time::interval(config.store_reload);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = reload.tick(), if file_store.is_some() => {
                if let Some(fs) = &file_store {
                    if let Err(err) = fs.reload() {
                        tracing::warn!(%err, "failed to reload acknowledgments");
                    }
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match commands::parse(&line) {
                    Ok(cmd) => {
                        if !console.run(cmd).await {
                            break;
                        }
                    }
                    Err(msg) => println!("{msg}"),
                },
                Ok(None) => {
                    tracing::debug!("stdin closed, running until interrupted");
                    stdin_open = false;
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to read stdin");
                    stdin_open = false;
                }
            },
        }
    }

    console.poller.stop();
    tracing::info!("unseen-watch stopped");
}

impl Console {
    /// Returns `false` once the operator asks to quit.
    async fn run(&self, cmd: Command) -> bool {
        match cmd {
            Command::Seen => {
                let seen = self.poller.mark_as_seen();
                println!("acknowledged {seen}");
            }
            Command::Pause => self.poller.set_paused(true),
            Command::Resume => self.poller.set_paused(false),
            Command::User(user) => {
                self.poller.set_user_id(user);
                println!("now scoped to {}", self.poller.storage_key());
            }
            Command::Hide => self.visible.set(false),
            Command::Show => self.visible.set(true),
            Command::Offline => self.online.set(false),
            Command::Online => self.online.set(true),
            Command::Status => print_status(&self.poller.snapshot(), self.poller.is_paused()),
            Command::Feed => self.open_feed().await,
            Command::More => self.load_more().await,
            Command::Read(id) => self.mark_read(&id).await,
            Command::ReadAll => self.mark_all_read().await,
            Command::Help => println!("{}", commands::HELP),
            Command::Quit => return false,
        }
        true
    }

    fn feed(&self) -> Option<&NotificationFeed<HttpFeedBackend>> {
        if self.feed.is_none() {
            println!("feed disabled: set NOTIFICATIONS_URL");
        }
        self.feed.as_ref()
    }

    /// Opening the list counts as seeing the badge.
    async fn open_feed(&self) {
        let Some(feed) = self.feed() else { return };
        self.poller.mark_as_seen();
        match feed.refresh().await {
            Ok(()) => print_feed(feed),
            Err(err) => println!("could not load notifications: {err}"),
        }
    }

    async fn load_more(&self) {
        let Some(feed) = self.feed() else { return };
        match feed.load_more().await {
            Ok(0) => println!("no more notifications"),
            Ok(_) => print_feed(feed),
            Err(err) => println!("could not load notifications: {err}"),
        }
    }

    async fn mark_read(&self, id: &str) {
        let Some(feed) = self.feed() else { return };
        if let Err(err) = feed.mark_read(id).await {
            println!("could not mark {id} read: {err}");
        }
    }

    async fn mark_all_read(&self) {
        let Some(feed) = self.feed() else { return };
        if let Err(err) = feed.mark_all_read().await {
            println!("could not mark notifications read: {err}");
        }
    }
}

fn print_status(snap: &Snapshot, paused: bool) {
    let seen = snap
        .last_seen_count
        .map(|n| n.to_string())
        .unwrap_or_else(|| "-".to_string());
    let last_ok = snap
        .last_success_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{} in analysis, last seen {seen}{}{} (last ok: {last_ok}, failures: {})",
        snap.current_count,
        if snap.has_new { ", NEW" } else { "" },
        if paused { ", paused" } else { "" },
        snap.failure_streak,
    );
}

fn print_feed(feed: &NotificationFeed<HttpFeedBackend>) {
    for item in feed.items() {
        let mark = if item.read { ' ' } else { '*' };
        println!(
            "{mark} {}  {}  {}",
            item.id,
            item.created_at.format("%Y-%m-%d %H:%M"),
            item.title
        );
    }
    println!(
        "{} unread, {} of {} shown{}",
        feed.unread_count(),
        feed.items().len(),
        feed.total_count(),
        if feed.has_more() { " (more)" } else { "" }
    );
}
