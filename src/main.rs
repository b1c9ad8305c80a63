use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ci_traffic_light::app::{BackendKind, Config, PollConfig};
use ci_traffic_light::indicator::IndicatorController;
use ci_traffic_light::poll::PollLoop;
use ci_traffic_light::status::CircleCiSource;

/// Rounds of the green -> yellow -> red sweep for --lamp-test
const LAMP_TEST_ROUNDS: usize = 5;

/// CI Traffic Light - shows the latest CircleCI build on a green/yellow/red lamp
#[derive(Parser, Debug)]
#[command(name = "ci-traffic-light")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// CircleCI API token
    token: String,

    /// CircleCI user or organisation
    user: String,

    /// Repository name
    repo_name: String,

    /// Branch to watch
    #[arg(short, long, default_value = "master")]
    branch: String,

    /// Poll interval in seconds
    #[arg(short = 'n', long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,

    /// Config file (default: ~/.config/ci-traffic-light/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Output backend, overrides the config file
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Sweep the lamps once at start-up
    #[arg(long)]
    lamp_test: bool,
}

impl Cli {
    fn poll_config(&self) -> PollConfig {
        PollConfig {
            token: self.token.clone(),
            user: self.user.clone(),
            repo: self.repo_name.clone(),
            branch: self.branch.clone(),
            interval_secs: self.interval,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(backend) = cli.backend {
        config.indicator.backend = backend;
    }

    init_logging(&cli.log_level, config.logging.file.as_deref())?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    runtime.block_on(run(cli.poll_config(), config, cli.lamp_test))
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(file),
            )
        }
        None => None,
    };
    let stderr_layer = if file_layer.is_none() {
        Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    info!("CI Traffic Light starting");
    Ok(())
}

async fn run(poll: PollConfig, config: Config, lamp_test: bool) -> Result<()> {
    let cancel = CancellationToken::new();
    listen_for_shutdown(cancel.clone()).context("Failed to install signal handlers")?;

    let source = CircleCiSource::new(&poll, &config.api)?;
    info!(
        "Watching {}/{} branch {} via {}",
        poll.user,
        poll.repo,
        poll.branch,
        source.redacted_endpoint()
    );

    // No display means nothing useful to do
    let mut indicator = IndicatorController::from_config(&config.indicator)
        .context("Failed to initialise indicator")?;

    if lamp_test {
        tokio::select! {
            _ = cancel.cancelled() => {}
            result = indicator.lamp_test(LAMP_TEST_ROUNDS) => {
                if let Err(e) = result {
                    error!("Lamp test failed: {}", e);
                }
            }
        }
    }

    PollLoop::new(source, poll.interval())
        .run(&mut indicator, cancel)
        .await;

    indicator
        .shutdown()
        .context("Failed to release indicator")?;
    info!("CI Traffic Light stopped");
    Ok(())
}

/// Cancel on SIGINT, SIGTERM or SIGHUP
///
/// Handlers are registered before returning, so a signal that arrives right
/// after this call still goes through teardown.
#[cfg(unix)]
fn listen_for_shutdown(cancel: CancellationToken) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT, shutting down"),
            _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
            _ = hangup.recv() => info!("Received SIGHUP, shutting down"),
        }
        cancel.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn listen_for_shutdown(cancel: CancellationToken) -> std::io::Result<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, shutting down");
                cancel.cancel();
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });
    Ok(())
}
