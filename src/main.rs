//! Command line client: listen to a relay feed, post notes, and check
//! signatures.

use std::{
    fs,
    io::{self, Read},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use relayfeed::{
    client,
    config::Settings,
    identity::{self, EventTemplate, SigningKey},
    sink::PrintSink,
    store::{EventStore, FileStore},
    verify_event, Event, EventSink, RelaySession,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command line interface entry point.
#[derive(Parser)]
#[command(name = "relayfeed", author, version, about = "Minimal Nostr relay client")]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default `.env` and create the store directories.
    Init,
    /// Subscribe to the relay and print stored history, backlog, then live events.
    Listen {
        /// Subscription id; a random UUID when omitted.
        #[arg(long)]
        sub: Option<String>,
    },
    /// Sign and publish an event.
    Post {
        /// Event content; read from stdin when omitted.
        content: Option<String>,
        /// Event kind.
        #[arg(long, default_value_t = relayfeed::event::kind::TEXT_NOTE)]
        kind: u32,
        /// Tags as a JSON array of string arrays, e.g. `[["t","nostr"]]`.
        #[arg(long)]
        tags: Option<String>,
        /// Wait for the relay's OK and print it.
        #[arg(long)]
        wait_ack: bool,
        /// Seconds to wait for the OK.
        #[arg(long, default_value_t = 10)]
        ack_timeout: u64,
    },
    /// Verify ids and signatures of event JSON files and/or stored events.
    Verify {
        /// Event JSON files to check.
        files: Vec<PathBuf>,
        /// Also check a random sample of this many stored events.
        #[arg(long)]
        sample: Option<usize>,
    },
    /// Print the newest stored events, oldest first.
    Recent {
        #[arg(long)]
        limit: Option<usize>,
    },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    init_logging(&cfg);
    let store = FileStore::new(cfg.store_root.clone());
    match cli.command {
        Commands::Init => {
            store.init()?;
        }
        Commands::Listen { sub } => {
            store.init()?;
            listen(&cfg, Arc::new(store), sub).await?;
        }
        Commands::Post {
            content,
            kind,
            tags,
            wait_ack,
            ack_timeout,
        } => {
            let Some(secret) = cfg.secret_key.as_deref() else {
                bail!("SECRET_KEY is not set in {}", cli.env);
            };
            let key = SigningKey::from_hex(secret)?;
            let content = match content {
                Some(c) => c,
                None => {
                    let mut buf = Vec::new();
                    io::stdin().read_to_end(&mut buf)?;
                    identity::content_from_bytes(buf)?
                }
            };
            let tags = match tags {
                Some(raw) => {
                    let value = serde_json::from_str(&raw).context("--tags is not JSON")?;
                    identity::tags_from_value(&value)?
                }
                None => Vec::new(),
            };
            let template = EventTemplate::text_note(content).with_kind(kind).with_tags(tags);
            let wait = wait_ack.then(|| Duration::from_secs(ack_timeout));
            post(&cfg, &key, template, wait).await?;
        }
        Commands::Verify { files, sample } => {
            for path in &files {
                let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
                let ev: Event = serde_json::from_slice(&data)
                    .with_context(|| format!("parsing {}", path.display()))?;
                verify_event(&ev).with_context(|| format!("{} is invalid", path.display()))?;
                println!("ok {}", ev.id);
            }
            if let Some(sample) = sample {
                let checked = store.verify_sample(sample)?;
                println!("verified {checked} stored events");
            }
        }
        Commands::Recent { limit } => {
            let mut sink = PrintSink::new(io::stdout());
            for ev in store.most_recent(limit.unwrap_or(cfg.limit))? {
                sink.on_event(&ev);
            }
        }
    }
    Ok(())
}

async fn listen(cfg: &Settings, store: Arc<dyn EventStore>, sub: Option<String>) -> anyhow::Result<()> {
    let filter = cfg.filter();
    let mut session = match sub {
        Some(id) => RelaySession::new(id, filter, store),
        None => RelaySession::with_random_id(filter, store),
    };
    let mut sink = PrintSink::new(io::stdout());
    session.prime_from_store(cfg.limit, &mut sink)?;
    let (publisher, mut inbound) = client::connect(&cfg.relay_url, cfg.tor_socks.as_deref()).await?;
    publisher.subscribe(&session).await?;
    inbound.drive(&mut session, &mut sink, cfg.eose_timeout).await?;
    Ok(())
}

async fn post(
    cfg: &Settings,
    key: &SigningKey,
    template: EventTemplate,
    wait: Option<Duration>,
) -> anyhow::Result<()> {
    let (publisher, mut inbound) = client::connect(&cfg.relay_url, cfg.tor_socks.as_deref()).await?;
    let submission = publisher.submit(key, template).await?;
    println!("{}", submission.id);
    if let Some(wait) = wait {
        let mut sink = PrintSink::new(io::stdout());
        match inbound.await_ack(&submission.id, &mut sink, wait).await? {
            Some(ack) if ack.accepted => println!("{ack}"),
            Some(ack) => bail!("{ack}"),
            None => bail!("relay closed the connection before acknowledging"),
        }
    }
    if let Err(e) = publisher.close().await {
        info!(error = %e, "close after post failed");
    }
    Ok(())
}

/// Install the global `tracing` subscriber. Logs go to stderr so stdout stays
/// reserved for feed output.
fn init_logging(cfg: &Settings) {
    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    let _ = if cfg.log_json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent)?;
            parent.to_path_buf()
        }
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("relayfeed-data");
    let mut content = String::new();
    content.push_str("RELAY_URL=wss://nostr-pub.wellorder.net\n");
    content.push_str(&format!("STORE_ROOT={}\n", store_root.to_string_lossy()));
    content.push_str("SECRET_KEY=\n");
    content.push_str(&format!("SUBSCRIPTION_LIMIT={}\n", relayfeed::config::DEFAULT_LIMIT));
    content.push_str("FILTER_SINCE=\n");
    content.push_str("FILTER_KINDS=\n");
    content.push_str("FILTER_AUTHORS=\n");
    content.push_str("TOR_SOCKS=\n");
    content.push_str("EOSE_TIMEOUT_SECS=\n");
    content.push_str("LOG_LEVEL=info\n");
    fs::write(env_path, content)?;
    Ok(())
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run(cli).await
}
