//! Hooksink CLI

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use hooksink::config::{
    FileConfig, ForwardConfig, LimitsConfig, Mode, ReplayConfig, ServerConfig,
};
use hooksink::dispatch::DispatchPool;
use hooksink::forward::DeliveryOutcome;
use hooksink::replay::ReplaySession;
use hooksink::server::Server;

#[derive(Parser)]
#[command(
    name = "hooksink",
    version,
    about = "Local webhook sink: capture, mock, forward, and replay HTTP requests"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the webhook listener
    Listen {
        /// Port to listen on
        port: u16,
        /// Append captured events to this JSONL file
        #[arg(long)]
        save: Option<PathBuf>,
        /// Forward captured requests to this base URL
        #[arg(long)]
        forward: Option<String>,
        /// Retry attempts per forwarded event
        #[arg(long)]
        forward_retries: Option<u32>,
        /// Backoff base delay in milliseconds
        #[arg(long)]
        forward_base_delay_ms: Option<u64>,
        /// Maximum concurrent outbound dispatches
        #[arg(long)]
        forward_concurrency: Option<usize>,
        /// Pretty-print JSON bodies to the console
        #[arg(long)]
        pretty: bool,
        /// Suppress per-event console output
        #[arg(long)]
        quiet: bool,
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Shut down gracefully after this many captured events
        #[arg(long)]
        exit_after: Option<u64>,
        /// TOML file supplying limits and forward defaults
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Start a mock server with scripted responses
    Mock {
        /// Port to listen on
        port: u16,
        /// Mock response specification (JSON)
        #[arg(long)]
        spec: PathBuf,
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Suppress per-request console output
        #[arg(long)]
        quiet: bool,
    },
    /// Replay saved webhook events
    Replay {
        /// Saved JSONL event log
        events_file: PathBuf,
        /// Playback rate multiplier (1.0 = original timing)
        #[arg(long, default_value_t = 1.0)]
        rate: f64,
        /// Stop after a single full pass
        #[arg(long)]
        once: bool,
        /// Target base URL; omit to describe events without dispatching
        #[arg(long)]
        target: Option<String>,
        /// Fixed delay between events in seconds, overriding original gaps
        #[arg(long)]
        delay: Option<f64>,
        /// Maximum dispatch rate in requests per second
        #[arg(long)]
        max_rps: Option<f64>,
        /// Retry attempts per event
        #[arg(long, default_value_t = 3)]
        retries: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Listen {
            port,
            save,
            forward,
            forward_retries,
            forward_base_delay_ms,
            forward_concurrency,
            pretty,
            quiet,
            host,
            exit_after,
            config,
        } => {
            let overrides = match config {
                Some(ref path) => FileConfig::from_file(path)
                    .with_context(|| format!("loading config file {}", path.display()))?,
                None => FileConfig::default(),
            };

            let mut limits = overrides.limits.clone().unwrap_or_default();
            if let Some(concurrency) = forward_concurrency {
                limits.max_concurrency = concurrency;
            }

            let forward = forward.map(|target_url| {
                let defaults = overrides.forward.as_ref();
                ForwardConfig {
                    target_url,
                    max_retries: forward_retries
                        .or_else(|| defaults.and_then(|d| d.max_retries))
                        .unwrap_or(3),
                    base_delay_ms: forward_base_delay_ms
                        .or_else(|| defaults.and_then(|d| d.base_delay_ms))
                        .unwrap_or(1000),
                }
            });

            let server_config = ServerConfig {
                host,
                port,
                mode: Mode::Listen,
                save_path: save,
                mock_spec: None,
                forward,
                pretty,
                quiet,
                exit_after,
                limits,
            };

            let server = Server::build(server_config).context("starting listener")?;
            server.run().await.context("running listener")?;
        }
        Command::Mock {
            port,
            spec,
            host,
            quiet,
        } => {
            let server_config = ServerConfig {
                host,
                port,
                mode: Mode::Mock,
                save_path: None,
                mock_spec: Some(spec),
                forward: None,
                pretty: false,
                quiet,
                exit_after: None,
                limits: LimitsConfig::default(),
            };

            let server = Server::build(server_config).context("starting mock server")?;
            server.run().await.context("running mock server")?;
        }
        Command::Replay {
            events_file,
            rate,
            once,
            target,
            delay,
            max_rps,
            retries,
        } => {
            let replay_config = ReplayConfig {
                events_file,
                target_url: target,
                rate,
                max_rps,
                fixed_delay_ms: delay.map(|seconds| (seconds * 1000.0) as u64),
                once,
                max_retries: retries,
                base_delay_ms: 1000,
                limits: LimitsConfig::default(),
            };

            run_replay(&replay_config).await?;
        }
    }

    Ok(())
}

async fn run_replay(config: &ReplayConfig) -> anyhow::Result<()> {
    let pool = DispatchPool::new(&config.limits);
    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, stopping replay");
                cancel.cancel();
            }
        });
    }

    let mut pass = 0u64;
    loop {
        pass += 1;
        let session = ReplaySession::from_config(config, &pool)
            .context("building replay session")?
            .with_cancellation(cancel.clone());

        let once = session.once();
        let total = session.event_count();
        let dry_run = config.target_url.is_none();

        let mut rx = session.start();
        let mut delivered = 0u64;
        let mut rejected = 0u64;
        let mut failed = 0u64;

        while let Some(report) = rx.recv().await {
            let position = format!("[{}/{}]", report.index + 1, report.total);
            match report.outcome {
                Some(DeliveryOutcome::Delivered { status, attempts }) => {
                    delivered += 1;
                    info!(
                        "{position} {} {} -> {status} ({attempts} attempt(s))",
                        report.method, report.path
                    );
                }
                Some(DeliveryOutcome::Rejected { status, attempts }) => {
                    rejected += 1;
                    warn!(
                        "{position} {} {} rejected with {status} ({attempts} attempt(s))",
                        report.method, report.path
                    );
                }
                Some(DeliveryOutcome::Failed { error, attempts }) => {
                    failed += 1;
                    error!(
                        "{position} {} {} failed after {attempts} attempt(s): {error}",
                        report.method, report.path
                    );
                }
                None => {
                    info!("{position} {} {}", report.method, report.path);
                }
            }
        }

        if dry_run {
            info!("Replay pass {pass} complete: {total} event(s) described (dry run)");
        } else {
            info!(
                "Replay pass {pass} complete: {total} event(s), {delivered} delivered, \
                 {rejected} rejected, {failed} failed"
            );
        }

        if once || cancel.is_cancelled() {
            break;
        }
    }

    Ok(())
}
