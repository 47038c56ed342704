mod command;
mod config;
mod protocol;
mod session;
mod trace;

use clap::Parser;
use config::ServerConfig;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use vellum_core::config::EngineConfig;
use vellum_core::Engine;

/// `vellumd`: the Vellum document database network server.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[clap(long, help = "Listen address, e.g. 127.0.0.1:4444")]
    addr: Option<String>,

    #[clap(long, help = "Data directory")]
    data: Option<String>,

    #[clap(long, help = "Worker pool size (defaults to the number of CPUs)")]
    pool_size: Option<usize>,

    #[clap(long, help = "Idle connection timeout in seconds, 0 to disable")]
    idle_timeout: Option<u64>,

    #[clap(long, help = "Path to a file containing the hex-encoded AES-256 encryption key")]
    encryption_key: Option<String>,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn main() {
    let args = Args::parse();

    let log_dir = format!("{}/.vellumd", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = match trace::init_logging(&log_dir, &args.log_level) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("failed to initialize logging: {e}");
            std::process::exit(1);
        }
    };

    let config = match ServerConfig::resolve(&args) {
        Ok(c) => c,
        Err(e) => {
            log::error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    info!("vellumd starting with config: {config:?}");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.pool_size)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            log::error!("failed to start the async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(config)) {
        log::error!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let mut engine_config = EngineConfig::new(&config.data_dir);
    if let Some(key) = &config.encryption_key_hex {
        engine_config = engine_config.with_encryption_key_hex(key.clone());
    }
    let engine = Arc::new(Engine::open(engine_config)?);

    let listener = TcpListener::bind(config.addr).await?;
    info!("listening on {}", config.addr);

    let idle_timeout = Duration::from_secs(config.idle_timeout_secs);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                info!("accepted connection from {peer}");
                let engine = engine.clone();
                tokio::spawn(async move {
                    session::handle(engine, stream, idle_timeout).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal, draining connections");
                return Ok(());
            }
        }
    }
}
