//! Relato CLI - Command line interface for the offline submission queue.
//!
//! This tool stands in for the app's UI surfaces: it reports occurrences,
//! shows the pending badge count and retry list, drains the queue when
//! connectivity returns, and inspects the offline read cache.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use relato_common::{
    Coordinates, Occurrence, OccurrenceCategory, OccurrencePayload, SubmissionId, UrgencyLevel,
};
use relato_store::{FileBackend, OccurrenceCache, QueueStore, QueuedSubmission};
use relato_sync::{ConnectivityEvent, ConnectivityObserver, HttpTransport, SyncEngine};

const PROBE_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "relato")]
#[command(about = "Relato - Offline-first municipal occurrence reporting")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Base URL of the occurrences backend.
    #[arg(long, env = "RELATO_ENDPOINT", default_value = "http://localhost:8080")]
    endpoint: Url,

    /// Bearer token forwarded to the backend.
    #[arg(long, env = "RELATO_TOKEN")]
    token: Option<String>,

    /// Directory for the durable queue and read cache.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CategoryArg {
    UrbanMaintenance,
    Lighting,
    WasteDisposal,
    UrbanFurniture,
    Incident,
    Accessibility,
    Vulnerability,
    Environmental,
}

impl From<CategoryArg> for OccurrenceCategory {
    fn from(arg: CategoryArg) -> Self {
        match arg {
            CategoryArg::UrbanMaintenance => Self::UrbanMaintenance,
            CategoryArg::Lighting => Self::Lighting,
            CategoryArg::WasteDisposal => Self::WasteDisposal,
            CategoryArg::UrbanFurniture => Self::UrbanFurniture,
            CategoryArg::Incident => Self::Incident,
            CategoryArg::Accessibility => Self::Accessibility,
            CategoryArg::Vulnerability => Self::Vulnerability,
            CategoryArg::Environmental => Self::Environmental,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum UrgencyArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<UrgencyArg> for UrgencyLevel {
    fn from(arg: UrgencyArg) -> Self {
        match arg {
            UrgencyArg::Low => Self::Low,
            UrgencyArg::Medium => Self::Medium,
            UrgencyArg::High => Self::High,
            UrgencyArg::Critical => Self::Critical,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Report a new occurrence (queued if the send fails).
    Report {
        #[arg(short, long)]
        category: CategoryArg,

        #[arg(short, long)]
        description: String,

        #[arg(long)]
        longitude: f64,

        #[arg(long)]
        latitude: f64,

        /// Approximate street address of the occurrence.
        #[arg(short, long)]
        address: String,

        #[arg(short, long, default_value = "medium")]
        urgency: UrgencyArg,

        /// URL of an already-uploaded photo.
        #[arg(long)]
        photo_url: Option<String>,

        /// Report without attaching a reporter identity.
        #[arg(long)]
        anonymous: bool,

        /// Consent to the privacy terms (required).
        #[arg(long)]
        consent: bool,

        /// Queue only; skip the immediate send attempt.
        #[arg(long)]
        offline: bool,
    },

    /// List every queued submission.
    List,

    /// List failed submissions awaiting retry.
    Failed,

    /// Show the pending badge count.
    Pending,

    /// Retry one failed submission.
    Retry {
        /// Submission identifier.
        id: String,
    },

    /// Discard one queued submission.
    Discard {
        /// Submission identifier.
        id: String,
    },

    /// Discard every failed submission.
    ClearFailed,

    /// Attempt to send everything pending or failed.
    Drain,

    /// Fetch the occurrences list, refreshing the offline cache.
    Fetch,

    /// Show read-cache freshness.
    CacheStatus,

    /// Clear the read cache.
    CacheClear,

    /// Probe connectivity and drain the queue whenever it comes back.
    Watch,
}

/// Spring-style page wrapper some deployments return instead of a bare array.
#[derive(Deserialize)]
struct ApiPage {
    content: Vec<Occurrence>,
}

struct App {
    engine: SyncEngine,
    cache: OccurrenceCache,
    endpoint: Url,
    token: Option<String>,
}

impl App {
    async fn open(cli: &Cli) -> Result<Self> {
        let data_dir = match &cli.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::data_dir()
                .context("no data directory available; pass --data-dir")?
                .join("relato"),
        };

        let backend = Arc::new(
            FileBackend::new(&data_dir)
                .with_context(|| format!("failed to open data dir {}", data_dir.display()))?,
        );

        let store = QueueStore::open(backend.clone()).await;
        let transport = Arc::new(HttpTransport::new(&cli.endpoint, cli.token.clone())?);
        let engine = SyncEngine::new(Arc::new(RwLock::new(store)), transport);
        let cache = OccurrenceCache::new(backend);

        Ok(Self {
            engine,
            cache,
            endpoint: cli.endpoint.clone(),
            token: cli.token.clone(),
        })
    }

    async fn fetch_occurrences(&self) -> Result<Vec<Occurrence>> {
        let url = self.endpoint.join("api/occurrences")?;
        let client = reqwest::Client::builder()
            .timeout(relato_sync::SEND_TIMEOUT)
            .build()?;

        let mut request = client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let body = request
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        // Bare array or Spring page, depending on the deployment.
        if let Ok(records) = serde_json::from_str::<Vec<Occurrence>>(&body) {
            return Ok(records);
        }
        let page: ApiPage = serde_json::from_str(&body)
            .context("occurrences response was neither an array nor a page")?;
        Ok(page.content)
    }
}

fn print_submission(item: &QueuedSubmission) {
    let error = item.last_error.as_deref().unwrap_or("-");
    println!(
        "{}  {:?}  attempts={}  enqueued={}  [{}] {}",
        item.id,
        item.state,
        item.attempts,
        item.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
        error,
        item.payload.description,
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let app = App::open(&cli).await?;

    match cli.command {
        Commands::Report {
            category,
            description,
            longitude,
            latitude,
            address,
            urgency,
            photo_url,
            anonymous,
            consent,
            offline,
        } => {
            anyhow::ensure!(consent, "privacy consent is required to submit a report");

            let payload = OccurrencePayload {
                category: category.into(),
                description,
                location: Coordinates {
                    longitude,
                    latitude,
                    approx_address: address,
                },
                urgency: urgency.into(),
                photo_url,
                anonymous,
                privacy_consent: consent,
                reporter_identity_id: None,
            };

            if offline {
                let store = app.engine.store();
                let id = store.write().await.enqueue(payload).await?;
                println!("Queued {id} for later sync");
            } else {
                let (id, outcome) = app.engine.submit(payload).await?;
                println!("{id}: {outcome:?}");
            }
        }

        Commands::List => {
            let store = app.engine.store();
            let items = store.read().await.list_all();
            if items.is_empty() {
                println!("Queue is empty");
            }
            for item in &items {
                print_submission(item);
            }
        }

        Commands::Failed => {
            let store = app.engine.store();
            for item in &store.read().await.list_failed() {
                print_submission(item);
            }
        }

        Commands::Pending => {
            let store = app.engine.store();
            println!("{}", store.read().await.count_pending());
        }

        Commands::Retry { id } => {
            let id = SubmissionId::new(id)?;
            if app.engine.retry(&id).await {
                println!("{id}: sent");
            } else {
                println!("{id}: still failed (or unknown)");
                std::process::exit(1);
            }
        }

        Commands::Discard { id } => {
            let id = SubmissionId::new(id)?;
            let store = app.engine.store();
            store.write().await.remove(&id).await;
            println!("Discarded {id}");
        }

        Commands::ClearFailed => {
            let cleared = app.engine.clear_failed().await;
            println!("Discarded {cleared} failed submissions");
        }

        Commands::Drain => {
            let report = app.engine.drain_queue().await;
            println!("Drained: {} sent, {} failed", report.sent, report.failed);
        }

        Commands::Fetch => match app.fetch_occurrences().await {
            Ok(records) => {
                app.cache.save(&records).await;
                println!("Fetched {} occurrences (cache refreshed)", records.len());
            }
            Err(e) => {
                warn!("Fetch failed, falling back to cache: {}", e);
                match app.cache.load().await {
                    Some(records) => {
                        println!("Offline: showing {} cached occurrences", records.len());
                    }
                    None => {
                        anyhow::bail!("fetch failed and no fresh cache is available: {e}");
                    }
                }
            }
        },

        Commands::CacheStatus => match app.cache.timestamp().await {
            Some(ts) => {
                let count = app.cache.load().await.map(|r| r.len());
                match count {
                    Some(count) => println!("Cached {count} occurrences at {ts}"),
                    None => println!("Cache expired (was captured at {ts})"),
                }
            }
            None => println!("Cache is empty"),
        },

        Commands::CacheClear => {
            app.cache.clear().await;
            println!("Cache cleared");
        }

        Commands::Watch => watch(&app).await?,
    }

    Ok(())
}

/// Probe the backend on an interval, feed the connectivity observer, and
/// drain the queue on every offline-to-online transition. Queue changes
/// reprint the badge count, the way the UI surfaces re-render.
async fn watch(app: &App) -> Result<()> {
    let observer = Arc::new(ConnectivityObserver::new(false));
    let mut transitions = observer.subscribe();
    let store = app.engine.store();
    let mut queue_changes = store.read().await.subscribe();

    {
        let observer = observer.clone();
        let endpoint = app.endpoint.clone();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROBE_INTERVAL);
            loop {
                ticker.tick().await;
                // Any response at all means the backend is reachable.
                let online = client.get(endpoint.clone()).send().await.is_ok();
                observer.set_online(online);
            }
        });
    }

    info!(
        "Watching; {} submissions pending",
        store.read().await.count_pending()
    );

    loop {
        tokio::select! {
            transition = transitions.recv() => {
                match transition {
                    Ok(ConnectivityEvent::Online) => {
                        info!("Back online, draining queue");
                        let report = app.engine.drain_queue().await;
                        info!("Drained: {} sent, {} failed", report.sent, report.failed);
                    }
                    Ok(ConnectivityEvent::Offline) => {
                        warn!("Offline; new reports will be queued");
                    }
                    Err(_) => break,
                }
            }
            changed = queue_changes.recv() => {
                if changed.is_ok() {
                    let pending = store.read().await.count_pending();
                    info!("Queue changed; {} pending", pending);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping watch");
                break;
            }
        }
    }

    Ok(())
}
