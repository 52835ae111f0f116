mod adapters;
mod app;
mod connection;
mod player;
mod presenter;
mod rows;
mod theme;
mod widgets;
mod worker;

use std::path::PathBuf;

use clap::Parser;
use tune_proto::config::Config;
use tune_proto::store::PlaylistStore;

#[derive(Parser, Debug)]
#[command(name = "tune", about = "Terminal music player")]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Daemon address, e.g. 127.0.0.1:9191
    #[arg(long)]
    daemon: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let data_dir = tune_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tune.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tune=debug".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("tune log: {}", log_path.display());
    tracing::info!("tune starting…");

    let config_path = args.config.unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;

    if let Some(parent) = config.store.database_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = PlaylistStore::open(&config.store.database_path)?.into_shared();

    let address = args.daemon.unwrap_or_else(|| config.daemon_address());
    tracing::info!("Daemon address: {}", address);
    let link = connection::DaemonLink::spawn(address);

    let app = app::App::new(
        link,
        store,
        config.library.music_dirs.clone(),
        config.recognition.clone(),
    );
    app.run().await
}
