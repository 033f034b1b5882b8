use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use turnstile::config::{LoggingSettings, TurnstileConfig};
use turnstile::ratelimit::VisitorStore;

/// Admit or deny identifiers read from stdin, one per line.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Tokens added per second to each identifier
    #[arg(long)]
    rate: Option<f64>,

    /// Bucket capacity per identifier
    #[arg(long)]
    burst: Option<u32>,

    /// Seconds an identifier may go unseen before eviction
    #[arg(long)]
    expires_in_secs: Option<u64>,

    /// Print decisions as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct DecisionLine<'a> {
    identifier: &'a str,
    allowed: bool,
    remaining: u32,
    retry_after_ms: u128,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = TurnstileConfig::load(args.config.as_deref())?;
    if let Some(rate) = args.rate {
        config.limiter.rate = rate;
    }
    if let Some(burst) = args.burst {
        config.limiter.burst = burst;
    }
    if let Some(expires_in_secs) = args.expires_in_secs {
        config.limiter.expires_in_secs = expires_in_secs;
    }

    init_tracing(&config.logging);

    info!("Starting Turnstile admission controller");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Configuration loaded from defaults and environment"),
    }

    let store = VisitorStore::start(config.limiter.store_config())?;
    info!(
        rate = store.rate(),
        burst = store.burst(),
        expires_in = ?store.expires_in(),
        "Visitor store initialized"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = &mut shutdown => break,
        };
        let Some(line) = line else {
            info!("End of input");
            break;
        };

        let identifier = line.trim();
        if identifier.is_empty() {
            warn!("Skipping empty identifier");
            continue;
        }

        let decision = store.check(identifier);
        let output = if args.json {
            serde_json::to_string(&DecisionLine {
                identifier,
                allowed: decision.allowed,
                remaining: decision.remaining,
                retry_after_ms: decision.retry_after.as_millis(),
            })?
        } else {
            let verdict = if decision.allowed { "allow" } else { "deny" };
            format!("{}\t{}", identifier, verdict)
        };

        stdout.write_all(output.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    store.stop_cleanup();
    info!(visitors = store.visitor_count(), "Turnstile stopped");
    Ok(())
}

/// Initialize tracing; `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Logs go to stderr so stdout carries only decisions
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
