//! Firenze — long-polling (comet) client
//!
//! Connects to a Firenze server and keeps a single self-renewing poll
//! stream open, logging every update it receives. Failed polls are
//! retried after a fixed delay; the client never gives up on its own.
//!
//! Usage:
//!   firenze --host example.com                       # http://example.com:4020/comet/
//!   firenze --host example.com --port 8003 --debug   # Log every poll URL
//!   firenze --base-url http://localhost:4020         # Relative polling (/comet/...)
//!   firenze --host example.com --reconnect-with uid/3

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use firenze_client::{Connection, LoggingDispatcher, ReqwestTransport};
use firenze_protocol::{ConnectionConfig, DEFAULT_RETRY_DELAY_MS};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "firenze", about = "Firenze long-polling client")]
struct Cli {
    /// Server host (empty for relative polling against --base-url)
    #[arg(long, default_value = "")]
    host: String,

    /// Server port
    #[arg(long, default_value = "4020")]
    port: u16,

    /// URL scheme
    #[arg(long, default_value = "http")]
    protocol: String,

    /// Path segment placed before the continuation token
    #[arg(long, default_value = "comet/")]
    prefix: String,

    /// Continuation token for the first poll
    #[arg(long, default_value = "")]
    reconnect_with: String,

    /// Delay before retrying a failed poll, in milliseconds
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_MS)]
    retry_delay_ms: u64,

    /// Give up on a single poll request after this many seconds
    #[arg(long)]
    request_timeout_secs: Option<u64>,

    /// Base URL used to resolve relative poll URLs
    #[arg(long)]
    base_url: Option<String>,

    /// Declare intent to relax same-origin restrictions (informational)
    #[arg(long)]
    cross_origin_relax: bool,

    /// Log every poll URL before it is requested
    #[arg(long)]
    debug: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.host.clone(),
            port: self.port,
            protocol: self.protocol.clone(),
            path_prefix: self.prefix.clone(),
            cross_origin_relax: self.cross_origin_relax,
            debug_logging: self.debug,
            reconnect_with: self.reconnect_with.clone(),
            retry_delay_ms: self.retry_delay_ms,
        }
    }

    fn transport(&self) -> Result<ReqwestTransport, Box<dyn std::error::Error>> {
        let mut transport = match self.request_timeout_secs {
            Some(secs) => ReqwestTransport::with_timeout(Duration::from_secs(secs))?,
            None => ReqwestTransport::new(),
        };
        if let Some(ref base) = self.base_url {
            transport = transport.with_base_url(reqwest::Url::parse(base)?);
        }
        Ok(transport)
    }
}

fn init_tracing(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    if let Some(ref log_path) = cli.log_file {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();

        eprintln!("Logging to {}", log_path.display());
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = cli.connection_config();
    if config.is_relative() && cli.base_url.is_none() {
        error!("--host is empty; relative polling needs --base-url");
        std::process::exit(1);
    }

    let transport = match cli.transport() {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to configure HTTP transport: {e}");
            std::process::exit(1);
        }
    };

    info!(
        url = %config.poll_url(&config.reconnect_with),
        retry_delay_ms = config.retry_delay_ms,
        "starting long-poll client"
    );

    let mut connection = Connection::spawn(config, transport, LoggingDispatcher);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {e}");
    }

    info!("shutting down");
    connection.stop().await;
    let status = connection.status();
    info!(
        polls = status.stats.polls_sent,
        failures = status.stats.polls_failed,
        updates = status.stats.updates_dispatched,
        token = %status.continuation_token,
        "client stopped"
    );
}
