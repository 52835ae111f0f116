mod core;
mod engine;
mod http;
mod mpv;
mod notify;
mod socket;

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tune_proto::config::Config;
use tune_proto::protocol::NowPlaying;
use tune_proto::store::PlaylistStore;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    /// Now-playing notification; `None` removes it.
    NowPlaying(Option<NowPlaying>),
    Log(String),
    /// Something the user should see (a file that would not play, a dead engine).
    Error(String),
}

#[derive(Parser, Debug)]
#[command(name = "tune-daemon", about = "Local music playback daemon")]
struct Args {
    /// Config file (default: ~/.config/tune/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the client socket port
    #[arg(long)]
    port: Option<u16>,
}

/// Tracing layer that forwards WARN and ERROR lines to attached clients.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Broadcast channel first so logging can feed it
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = tune_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tune-daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tune_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config_path = args.config.unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)?;
    if let Some(port) = args.port {
        config.daemon.port = port;
    }
    info!("Config loaded from: {:?}", config_path);

    // The one store handle for this process
    if let Some(parent) = config.store.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = PlaylistStore::open(&config.store.database_path)?.into_shared();
    info!("Playlist store: {:?}", config.store.database_path);

    // All external inputs funnel into DaemonCore
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<core::DaemonEvent>(256);

    let engine = mpv::MpvEngine::new(&config.mpv);
    let daemon_core = core::DaemonCore::new(
        config.playback.clone(),
        engine,
        broadcast_tx.clone(),
        event_tx.clone(),
    );
    let state_manager = daemon_core.state_manager();

    let listener = TcpListener::bind(config.daemon_address()).await?;
    let _socket_handle = socket::start_server(
        listener,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
            store,
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received");
                let _ = shutdown_tx.send(core::DaemonEvent::Shutdown).await;
            }
            Err(e) => warn!("Failed to listen for interrupt: {}", e),
        }
    });

    info!("Daemon initialised, running event loop");
    daemon_core.run(event_rx).await?;

    Ok(())
}
