//! Server configuration: CLI flag > environment variable > default. There
//! is no config-file layer here -- unlike the
//! teacher's `kvcli` YAML file, `vellumd` is meant to run under a process
//! supervisor that already owns config-file conventions, so env vars fill
//! that role instead.

use std::net::SocketAddr;
use std::path::PathBuf;

pub const DEFAULT_ADDR: &str = "127.0.0.1:4444";
pub const DEFAULT_DATA_DIR: &str = "./vellum-data";
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: PathBuf,
    pub pool_size: usize,
    pub idle_timeout_secs: u64,
    pub encryption_key_hex: Option<String>,
    pub log_level: String,
}

impl ServerConfig {
    pub fn resolve(args: &crate::Args) -> anyhow::Result<Self> {
        let addr = resolve_string(args.addr.clone(), "VELLUM_ADDR", DEFAULT_ADDR.to_string());
        let data_dir = resolve_string(
            args.data.clone(),
            "VELLUM_DATA",
            DEFAULT_DATA_DIR.to_string(),
        );
        let pool_size = resolve_string(
            args.pool_size.map(|n| n.to_string()),
            "VELLUM_POOL_SIZE",
            num_cpus(),
        )
        .parse()?;
        let idle_timeout_secs = resolve_string(
            args.idle_timeout.map(|n| n.to_string()),
            "VELLUM_IDLE_TIMEOUT",
            DEFAULT_IDLE_TIMEOUT_SECS.to_string(),
        )
        .parse()?;
        let encryption_key_hex = args
            .encryption_key
            .clone()
            .or_else(|| std::env::var("VELLUM_ENCRYPTION_KEY").ok());
        let encryption_key_hex = match encryption_key_hex {
            Some(path) => Some(std::fs::read_to_string(&path)?.trim().to_string()),
            None => None,
        };

        Ok(ServerConfig {
            addr: addr.parse()?,
            data_dir: PathBuf::from(data_dir),
            pool_size,
            idle_timeout_secs,
            encryption_key_hex,
            log_level: args.log_level.clone(),
        })
    }
}

fn resolve_string(flag: Option<String>, env_var: &str, default: String) -> String {
    flag.or_else(|| std::env::var(env_var).ok()).unwrap_or(default)
}

fn num_cpus() -> String {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .to_string()
}
