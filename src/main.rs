//! Harvester Binary Entry Point
//!
//! Runs the configured modules and prints their events as JSON lines.
//! Core functionality is provided by the `harvester` library crate.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use harvester::{
    Wrapper, builtin,
    config::{AppConfig, parse_duration},
    mb::{BaseModule, Module, add_service_type},
    stats::StatsRegistry,
    telemetry::STATS_NAMESPACE,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Harvester - Metricset Scheduler
#[derive(Parser, Debug)]
#[command(name = "harvester", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "configs/harvester.yaml", env = "HARVESTER_CONFIG")]
    config: String,

    /// Maximum random start delay, e.g. "2s" (overrides config file)
    #[arg(long, env = "HARVESTER_MAX_START_DELAY", value_parser = parse_duration)]
    max_start_delay: Option<Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run all enabled modules until Ctrl+C
    Run,
    /// Fetch one event from every enabled metricset and exit
    Test,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr; stdout carries events.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,harvester=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    tracing::info!("Loading configuration from: {}", cli.config);
    let mut config = AppConfig::load_with_module_path(&cli.config)?;

    match cli.command {
        Command::Run => {
            if let Some(delay) = cli.max_start_delay {
                config.max_start_delay = delay;
            }
            run(&config).await
        }
        Command::Test => {
            config.max_start_delay = cli.max_start_delay.unwrap_or(Duration::ZERO);
            test(&config).await
        }
    }
}

/// Build one wrapper per enabled module, all sharing `stats`.
fn build_wrappers(
    config: &AppConfig,
    stats: &StatsRegistry,
) -> Result<Vec<Wrapper>, Box<dyn std::error::Error>> {
    let mut wrappers = Vec::new();

    for module_config in config.enabled_modules() {
        let module = Arc::new(BaseModule::new(&module_config.module, module_config.period));
        watch_status(&module);

        let wrapper = Wrapper::builder(module)
            .metric_sets(builtin::metric_sets(module_config)?)
            .max_start_delay(config.max_start_delay)
            .event_modifier(Arc::new(add_service_type))
            .stats_registry(stats.clone())
            .build()?;

        tracing::info!(
            module = %wrapper.name(),
            metricsets = wrapper.metric_sets().len(),
            period = %humantime::format_duration(module_config.period),
            "Configured {wrapper}"
        );
        wrappers.push(wrapper);
    }

    Ok(wrappers)
}

/// Log every status change of `module` until it is dropped.
fn watch_status(module: &Arc<BaseModule>) {
    let mut updates = module.subscribe();
    let name = module.name().to_owned();

    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let update = updates.borrow_and_update().clone();
            if let Some(update) = update {
                tracing::info!(
                    module = %name,
                    status = %update.status,
                    message = %update.message,
                    "Module status changed"
                );
            }
        }
    });
}

async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let stats = StatsRegistry::default();
    let wrappers = build_wrappers(config, &stats)?;
    if wrappers.is_empty() {
        tracing::warn!("No enabled modules configured");
        return Ok(());
    }

    let done = CancellationToken::new();
    tokio::spawn(shutdown_signal(done.clone(), stats.clone()));

    let streams = wrappers.into_iter().map(|wrapper| {
        let rx = wrapper.start(done.clone());
        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed()
    });
    let mut events = futures::stream::select_all(streams);

    tracing::info!("Press Ctrl+C to shutdown");

    let mut stdout = std::io::stdout().lock();
    while let Some(event) = events.next().await {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize event");
                continue;
            }
        };
        if let Err(e) = writeln!(stdout, "{line}") {
            tracing::error!(error = %e, "Failed to write event, shutting down");
            done.cancel();
            break;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn test(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let stats = StatsRegistry::default();
    let wrappers = build_wrappers(config, &stats)?;

    let mut failed = 0usize;
    for wrapper in &wrappers {
        for outcome in wrapper.probe().await {
            let label = if outcome.host.is_empty() {
                format!("{}/{}", wrapper.name(), outcome.metric_set)
            } else {
                format!("{}/{} ({})", wrapper.name(), outcome.metric_set, outcome.host)
            };
            match outcome.result {
                Ok(event) => println!("{label}... OK\n{}", serde_json::to_string_pretty(&event)?),
                Err(e) => {
                    failed += 1;
                    println!("{label}... ERROR: {e}");
                }
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} metricset(s) failed").into());
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, log final stats, then cancel `done`.
async fn shutdown_signal(done: CancellationToken, stats: StatsRegistry) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal");
        }
    }

    tracing::info!(
        stats = %stats.telemetry().snapshot(STATS_NAMESPACE),
        "Stopping modules"
    );
    done.cancel();
}
