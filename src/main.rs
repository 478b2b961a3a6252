use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use searchd_reindexer::config::ServerConfig;
use searchd_reindexer::server::{daemon, ReindexClient, Request, Response};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "searchd-reindexer")]
#[command(about = "Rebuild Sphinx indexes on request and wait for searchd to rotate them")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbosity level (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server in the foreground (default)
    Serve {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the listen host
        #[arg(long)]
        host: Option<String>,

        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Check that a server is answering
    Ping {
        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:5018")]
        addr: String,
    },
    /// Ask a server to rebuild an index and wait for the rotation
    Reindex {
        /// Index name passed to the indexer
        index: String,

        /// Server address
        #[arg(short, long, default_value = "127.0.0.1:5018")]
        addr: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Some(Commands::Serve { config, host, port }) => serve(config, host, port)?,
        Some(Commands::Ping { addr }) => {
            let response = send(&addr, &Request::ping())?;
            println!("{}", response.message);
        }
        Some(Commands::Reindex { index, addr }) => {
            let response = send(&addr, &Request::reindex(index))?;
            println!("{}", response.message);
        }
        None => serve(None, None, None)?,
    }

    Ok(())
}

fn serve(config: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = ServerConfig::load(config.as_deref())?;
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(port) = port {
        config.port = port;
    }

    tracing::info!(
        searchd_log = %config.searchd.log.display(),
        indexer = %config.indexer.bin.display(),
        "starting reindex server"
    );
    daemon::run_foreground(&config)
}

/// Send one request; an error field in the response becomes an error exit
fn send(addr: &str, request: &Request) -> Result<Response> {
    let response = ReindexClient::new(addr)
        .send(request)
        .with_context(|| format!("Failed to talk to {}", addr))?;

    if response.is_error() {
        anyhow::bail!("{}", response.error);
    }
    Ok(response)
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
