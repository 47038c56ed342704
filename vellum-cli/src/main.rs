use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::io::{stdin, IsTerminal};
use std::time::Duration;
use vellum_cli::client::Client;
use vellum_cli::repl::Session;
use vellum_cli::trace;

/// `vellum-cli`: an interactive/scripted client for a running `vellumd`.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    #[clap(long, default_value = "127.0.0.1:4444", help = "Address of the vellumd server")]
    addr: String,

    #[clap(short = 'n', long, help = "Force non-interactive mode")]
    non_interactive: bool,

    #[clap(long, help = "Run a single command line and exit, e.g. --query='ping'")]
    query: Option<String>,

    #[clap(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_dir = format!("{}/.vellum-cli", std::env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let _guards = trace::init_logging(&log_dir, &args.log_level)?;
    info!("vellum-cli starting, connecting to {}", args.addr);

    let client = Client::connect(&args.addr, Duration::from_secs(5))
        .with_context(|| format!("could not connect to vellumd at {}", args.addr))?;
    let mut session = Session::new(client);

    let is_terminal = stdin().is_terminal();
    let is_repl = is_terminal && !args.non_interactive && args.query.is_none();

    if is_repl {
        session.handle_repl();
        return Ok(());
    }

    match args.query {
        Some(query) => session.handle_reader(std::io::Cursor::new(query)),
        None => session.handle_reader(stdin().lock()),
    }
}
