mod config;
mod drift;
mod error;
mod models;
mod monitor;
mod orchestrator;
mod report;
mod rpc;
mod scheduler;
#[cfg(test)]
mod testing;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{load_config, AppConfig, RpcEndpoint};
use crate::models::RunStatus;
use crate::monitor::{spawn_server, Monitor};
use crate::orchestrator::Orchestrator;
use crate::report::OutputFormat;
use crate::rpc::{HttpTransport, RpcTransport};

/// CLI arguments
#[derive(Parser, Debug)]
#[command(
    name = "rpc-drift-probe",
    version,
    about = "Compare EVM RPC endpoints for chain id, block height and block time drift"
)]
struct Cli {
    /// Primary RPC endpoint URL
    #[arg(long)]
    rpc_primary: Option<String>,

    /// Secondary RPC endpoint URL to compare against (repeatable)
    #[arg(long)]
    rpc_secondary: Vec<String>,

    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Per-call timeout in seconds
    #[arg(long)]
    timeout: Option<f64>,

    /// Retry attempts on transient transport failures
    #[arg(long)]
    max_retries: Option<u32>,

    /// Base delay for exponential backoff between retries, in milliseconds
    #[arg(long)]
    backoff_ms: Option<u64>,

    /// Output format
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,

    /// Shorthand for --format json
    #[arg(long, conflicts_with = "format")]
    json: bool,

    /// Warn when block height drift exceeds this many blocks
    #[arg(long)]
    max_block_drift: Option<u64>,

    /// Warn when block timestamp drift exceeds this many seconds
    #[arg(long)]
    max_time_drift: Option<u64>,

    /// Keep probing on an interval instead of running once
    #[arg(long)]
    watch: bool,

    /// Seconds between cycles in watch mode
    #[arg(long, requires = "watch")]
    interval: Option<f64>,

    /// Number of recent cycles kept in memory in watch mode
    #[arg(long, requires = "watch")]
    history: Option<usize>,

    /// Serve the drift API on this address in watch mode
    #[arg(long, requires = "watch")]
    listen: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Layers CLI flags over the file configuration.
    fn apply(self, config: &mut AppConfig) {
        // each flag replaces only its own side of the file's endpoint list
        if let Some(primary) = self.rpc_primary {
            match config.endpoints.first_mut() {
                Some(first) => *first = RpcEndpoint::new(primary),
                None => config.endpoints.push(RpcEndpoint::new(primary)),
            }
        }
        if !self.rpc_secondary.is_empty() {
            config.endpoints.truncate(1);
            config
                .endpoints
                .extend(self.rpc_secondary.into_iter().map(RpcEndpoint::new));
        }
        if let Some(timeout) = self.timeout {
            config.probe.timeout_secs = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            config.probe.max_retries = max_retries;
        }
        if let Some(backoff_ms) = self.backoff_ms {
            config.probe.backoff_base_ms = backoff_ms;
        }
        if self.json {
            config.format = OutputFormat::Json;
        } else if let Some(format) = self.format {
            config.format = format;
        }
        if let Some(max) = self.max_block_drift {
            config.thresholds.max_block_drift = Some(max);
        }
        if let Some(max) = self.max_time_drift {
            config.thresholds.max_time_drift_sec = Some(max);
        }
        if let Some(interval) = self.interval {
            config.monitor.interval_secs = interval;
        }
        if let Some(history) = self.history {
            config.monitor.history = history;
        }
        if let Some(listen) = self.listen {
            config.monitor.listen = Some(listen);
        }
    }
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}

fn shutdown_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupt received, cancelling in-flight probes");
                cancel.cancel();
            }
            Err(e) => error!("failed to listen for interrupt: {}", e),
        }
    });
}

async fn run(cli: Cli) -> Result<RunStatus> {
    let watch = cli.watch;
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => AppConfig::default(),
    };
    cli.apply(&mut config);

    let transport: Arc<dyn RpcTransport> = Arc::new(HttpTransport::new()?);
    let cancel = CancellationToken::new();
    shutdown_on_ctrl_c(cancel.clone());

    if !watch {
        let mut orchestrator = Orchestrator::new(config, transport, cancel);
        let result = orchestrator.run(&mut io::stdout()).await;
        info!(state = ?orchestrator.state(), "run finished");
        return match result {
            Ok(outcome) => Ok(outcome.status),
            // configuration errors are already logged by the orchestrator
            Err(e) => e.status().ok_or_else(|| e.into()),
        };
    }

    let monitor = match Monitor::new(config.clone(), transport) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return Ok(RunStatus::Inconsistent);
        }
    };
    let server = match config.monitor.listen {
        Some(addr) => Some(spawn_server(addr, monitor.history(), cancel.clone())?),
        None => None,
    };

    info!(
        endpoints = config.endpoints.len(),
        interval_secs = config.monitor.interval_secs,
        "starting drift monitor"
    );
    let status = monitor.run(&mut io::stdout(), cancel.clone()).await;

    cancel.cancel();
    if let Some((_, handle)) = server {
        let _ = handle.await;
    }
    status
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = init_logging(&cli.log_level, cli.json_logs) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(status) => ExitCode::from(status.exit_code() as u8),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
