mod art;
mod control;
mod core;
mod engine;
mod sink;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::art::{ArtResolver, HttpArtFetcher};
use crate::core::{AppCore, AppEvent, RemoteFeed, Recognizer};
use crate::engine::{Engine, EnginePlayer};
use crate::sink::LogSink;
use nightwave_core::config::Config;
use nightwave_core::protocol::ControlCommand;
use nightwave_core::station::{StationStore, TomlStationStore};
use nightwave_core::{feed, platform, recognition};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // With a command token as argument we are the client: drive the
    // already-running instance instead of starting a competing one.
    if let Some(arg) = std::env::args().nth(1) {
        return run_client(&arg).await;
    }

    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    init_logging(&data_dir)?;

    let config = Config::load().context("loading config")?;
    info!("config loaded from {:?}", Config::config_path());

    let store = TomlStationStore::open(config.stations.path.clone())
        .with_context(|| format!("loading stations from {:?}", config.stations.path))?;
    if store.list().is_empty() {
        warn!("no stations configured at {:?}", config.stations.path);
    }

    // Everything funnels into this channel; the orchestrator is its only
    // consumer.
    let (event_tx, event_rx) = mpsc::channel::<AppEvent>(256);

    // Playback engine.  Failing to bring mpv up is fatal, not retried.
    let (engine_tx, mut engine_rx) = mpsc::channel(64);
    let mut engine = Engine::new();
    let handle = engine
        .spawn_and_connect(engine_tx, config.player.default_volume)
        .await
        .context("failed to initialize playback engine")?;
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            while let Some(ev) = engine_rx.recv().await {
                if tx.send(AppEvent::Engine(ev)).await.is_err() {
                    break;
                }
            }
        });
    }

    // Control channel server, for the lifetime of the process.
    let _control = control::start_server(event_tx.clone())?;

    // Regular polling cadence for remote-tracked stations.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(core::POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if tx.send(AppEvent::PollTick).await.is_err() {
                    break;
                }
            }
        });
    }

    spawn_console(event_tx.clone());

    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let app = AppCore::new(
        Box::new(EnginePlayer::new(handle)),
        Box::new(HttpFeed {
            client: http.clone(),
            url: config.feed.url.clone(),
            tx: event_tx.clone(),
        }),
        Box::new(PipelineRecognizer {
            capture_secs: config.recognition.capture_secs,
            client: http,
            tx: event_tx.clone(),
        }),
        ArtResolver::new(Box::new(HttpArtFetcher::new(event_tx.clone())?)),
        Box::new(LogSink::new(data_dir)),
        Box::new(store),
        config.feed_host(),
        event_tx,
    );

    info!("nightwave initialised, running event loop");
    app.run(event_rx).await;
    Ok(())
}

async fn run_client(arg: &str) -> anyhow::Result<()> {
    let Some(cmd) = ControlCommand::from_token(arg) else {
        anyhow::bail!(
            "unknown command {:?} (expected one of: play-pause, next-station, prev-station)",
            arg
        );
    };
    control::send_command(cmd).await?;
    println!("sent {}", cmd.as_token());
    Ok(())
}

fn init_logging(data_dir: &std::path::Path) -> anyhow::Result<()> {
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join("nightwave.log"))?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,nightwave_app=debug")),
        )
        .init();
    Ok(())
}

/// Minimal interactive shell on stdin, standing in for the excluded UI:
/// the control tokens plus `identify` and `volume <0-100>`.
fn spawn_console(tx: mpsc::Sender<AppEvent>) {
    tokio::spawn(async move {
        use tokio::io::AsyncBufReadExt;
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let ev = if let Some(cmd) = ControlCommand::from_token(line) {
                AppEvent::Control(cmd)
            } else if line == "identify" {
                AppEvent::RecognizeRequested
            } else if let Some(v) = line.strip_prefix("volume ") {
                match v.trim().parse::<f32>() {
                    Ok(percent) => AppEvent::SetVolume(percent),
                    Err(_) => {
                        warn!("console: bad volume {:?}", v);
                        continue;
                    }
                }
            } else {
                warn!("console: unknown command {:?}", line);
                continue;
            };
            if tx.send(ev).await.is_err() {
                break;
            }
        }
    });
}

// ── worker implementations ────────────────────────────────────────────────────

/// Polls the remote now-playing endpoint; a fetch failure degrades to "no
/// update" until the next cycle.
struct HttpFeed {
    client: reqwest::Client,
    url: String,
    tx: mpsc::Sender<AppEvent>,
}

impl RemoteFeed for HttpFeed {
    fn request(&self, requested_for: String) {
        if self.url.is_empty() {
            return;
        }
        let client = self.client.clone();
        let url = self.url.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            match feed::fetch_now_playing(&client, &url).await {
                Ok(entries) => {
                    let _ = tx
                        .send(AppEvent::FeedArrived {
                            requested_for,
                            entries,
                        })
                        .await;
                }
                Err(e) => warn!("feed poll failed: {}", e),
            }
        });
    }
}

/// Runs the capture + fingerprint pipeline on a worker task and reports the
/// outcome, success or structured failure, back through the channel.
struct PipelineRecognizer {
    capture_secs: u32,
    client: reqwest::Client,
    tx: mpsc::Sender<AppEvent>,
}

impl Recognizer for PipelineRecognizer {
    fn start(&self, stream_url: String) {
        let secs = self.capture_secs;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let outcome = recognition::identify_stream(&stream_url, secs).await;
            let _ = tx
                .send(AppEvent::RecognitionDone {
                    for_url: stream_url,
                    outcome,
                })
                .await;
        });
    }

    fn enrich(&self, index: usize, artist: String, title: String) {
        let client = self.client.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let catalog_url = recognition::lookup_catalog_url(&client, &artist, &title).await;
            let _ = tx.send(AppEvent::TrackEnriched { index, catalog_url }).await;
        });
    }
}
