//! Watch-and-relay binary for cuke-relay.
//!
//! Watches `<tests-path>/<framework>` for spec changes, runs the configured
//! cucumber-compatible engine on each debounced change and relays per-step
//! results to the reporting service (or to the log when no service URL is
//! configured).

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use regex::Regex;
use tracing::{error, info};

use cuke_relay::config::{ConfigOverrides, LogLevel, RelayConfig};
use cuke_relay::controller::{RunController, RunError};
use cuke_relay::engine::command::CommandEngine;
use cuke_relay::error::ConfigError;
use cuke_relay::logging::init_logging;
use cuke_relay::report::{HttpReporter, LogReporter, Reporter};
use cuke_relay::watcher::RunScheduler;
use cuke_relay::watcher::readiness::ReadinessNotifier;
use cuke_relay::watcher::registry::{PollingRegistry, SpecFile};

/// Runs Gherkin specs on change and relays per-step results.
#[derive(Parser, Debug)]
#[command(name = "cuke-relay", version, about)]
struct Args {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Quiet period in milliseconds before a burst of changes triggers a run.
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Root of the test tree.
    #[arg(long)]
    tests_path: Option<PathBuf>,

    /// Framework tag; also the directory below the test tree.
    #[arg(long)]
    framework: Option<String>,

    /// Tag filter; may be given more than once.
    #[arg(long = "tags")]
    tags: Vec<String>,

    /// Engine output format.
    #[arg(long)]
    format: Option<String>,

    /// Support-code directory passed to the engine.
    #[arg(long)]
    require: Option<PathBuf>,

    /// Base URL of the reporting service.
    #[arg(long)]
    report_url: Option<String>,

    /// Run once and exit instead of watching.
    #[arg(long)]
    once: bool,
}

fn main() {
    let args = Args::parse();

    let (config, pattern) = match build_config(&args) {
        Ok(built) => built,
        Err(e) => {
            let fallback = RelayConfig::default();
            init_logging(&fallback);
            error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "starting cuke-relay");

    let features = config.features_path();
    if !features.is_dir() {
        info!(
            path = %features.display(),
            "features directory not found, nothing to watch"
        );
        return;
    }

    if let Err(e) = run_relay(config, pattern, args.once) {
        error!(error = %e, "relay exited with error");
        std::process::exit(1);
    }
}

fn build_config(args: &Args) -> Result<(RelayConfig, Regex), ConfigError> {
    let config = RelayConfig::from_env()?.apply_overrides(ConfigOverrides {
        log_level: args.log_level,
        debounce_ms: args.debounce_ms,
        tests_path: args.tests_path.clone(),
        framework: args.framework.clone(),
        tags: args.tags.clone(),
        format: args.format.clone(),
        require: args.require.clone(),
        report_url: args.report_url.clone(),
    });
    let pattern = config.framework_pattern()?;
    Ok((config, pattern))
}

/// Build the runtime and pick the reporter.
fn run_relay(config: RelayConfig, pattern: Regex, once: bool) -> Result<(), RunError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(cuke_relay::engine::EngineError::from)?;
    runtime.block_on(async move {
        if let Some(url) = config.report_url.clone() {
            serve(config, pattern, HttpReporter::new(url), once).await
        } else {
            serve(config, pattern, LogReporter, once).await
        }
    })
}

async fn serve<R>(
    config: RelayConfig,
    pattern: Regex,
    reporter: R,
    once: bool,
) -> Result<(), RunError>
where
    R: Reporter + 'static,
{
    let controller = Arc::new(RunController::new(
        config.framework.clone(),
        config.run_settings(),
        CommandEngine::new(),
        reporter,
    ));

    if once {
        let trigger = SpecFile::new(config.features_path(), config.framework.clone());
        let outcome = controller.run(&trigger).await?;
        info!(
            records = outcome.records.len(),
            failed = outcome.failed(),
            "run complete"
        );
        return Ok(());
    }

    controller.engine().probe(&config.program).await?;

    let notifier = ReadinessNotifier::new();
    let registry = Arc::new(PollingRegistry::new(
        &config.tests_path,
        pattern,
        config.poll_interval(),
    ));
    let mut scheduler = RunScheduler::new(
        Arc::clone(&controller),
        Arc::clone(&registry),
        notifier.subscribe(),
        config.debounce(),
    );
    scheduler.start();
    notifier.mark_ready();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutting down");
    notifier.stop();
    registry.shutdown();
    scheduler.stop().await;
    Ok(())
}
