//! Binary entrypoint for the rescuegrid dispatcher.
//!
//! Runs with no arguments: reads `environment.txt`, `rescuers.txt` and
//! `emergency.txt` from the working directory, opens the configured message
//! queue and dispatches until SIGINT/SIGTERM. Exit code 0 on graceful
//! shutdown, non-zero when startup fails (unreadable or invalid
//! configuration, unusable message queue).
//!
//! Optional flags adjust the surface without breaking the no-argument
//! contract: `--dir` points at a different configuration directory,
//! `--workers` overrides the worker pool size, `--log-file` moves the event
//! log, `-v`/`-vv` raise console verbosity.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};

use rescuegrid::config::Config;
use rescuegrid::dispatch::{Dispatcher, ScheduleKnobs, DEFAULT_WORKERS};
use rescuegrid::eventlog::{Category, EventLog};
use rescuegrid::ingress::MqConsumer;
use rescuegrid::metrics;
use rescuegrid::validation::validate_config;

#[derive(Parser)]
#[command(name = "rescuegrid")]
#[command(about = "Emergency-response dispatch simulator")]
#[command(version)]
struct Cli {
    /// Directory containing environment.txt, rescuers.txt and emergency.txt
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Number of dispatcher worker threads
    #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Event log destination
    #[arg(long, default_value = "rescuegrid.log")]
    log_file: PathBuf,

    /// Verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    info!("Starting rescuegrid v{}", env!("CARGO_PKG_VERSION"));

    let events = Arc::new(
        EventLog::to_file(&cli.log_file)
            .with_context(|| format!("failed to open event log {}", cli.log_file.display()))?,
    );
    events.event(Category::System, "SYS-START", "application startup");

    let config = match Config::load(&cli.dir).await {
        Ok(config) => config,
        Err(err) => {
            events.event(
                Category::FileParsing,
                "SYS-ERROR",
                format!("configuration loading failed: {}", err),
            );
            error!("Failed to load configuration: {}", err);
            return Err(err).context("configuration loading failed");
        }
    };
    if let Err(err) = validate_config(&config) {
        events.event(
            Category::Configuration,
            "SYS-ERROR",
            format!("configuration validation failed: {}", err),
        );
        error!("Configuration invalid: {}", err);
        return Err(err).context("configuration validation failed");
    }
    events.event(
        Category::Configuration,
        "CFG-READY",
        format!(
            "configuration loaded: {}x{} grid, {} rescuer types ({} units), {} emergency types",
            config.environment.grid.width,
            config.environment.grid.height,
            config.catalog.rescuer_types.len(),
            config.catalog.total_rescuers(),
            config.catalog.emergency_types.len()
        ),
    );
    if let Ok(summary) = serde_json::to_string(&config.catalog) {
        debug!("catalog: {}", summary);
    }

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(config.catalog.clone()),
        ScheduleKnobs::from_environment(&config.environment),
        Arc::clone(&events),
    ));
    dispatcher
        .start(cli.workers)
        .context("failed to start dispatcher threads")?;

    let consumer = match MqConsumer::start(
        &config.environment,
        Arc::clone(&dispatcher),
        Arc::clone(&events),
    ) {
        Ok(consumer) => consumer,
        Err(err) => {
            error!("Failed to start message queue consumer: {}", err);
            dispatcher.shutdown();
            return Err(err).context("failed to start message queue consumer");
        }
    };
    info!(
        "Dispatcher ready: {} workers, queue '{}'",
        cli.workers.max(1),
        consumer.queue_name()
    );

    wait_for_signal().await?;
    info!("Received shutdown signal");
    events.event(Category::System, "SYS-SIGNAL", "shutdown signal received");

    // Drain order matters: stop accepting before draining in-flight work.
    let dispatcher_for_join = Arc::clone(&dispatcher);
    tokio::task::spawn_blocking(move || {
        consumer.shutdown();
        dispatcher_for_join.shutdown();
    })
    .await
    .context("shutdown task panicked")?;

    let totals = metrics::snapshot();
    events.event(
        Category::System,
        "SYS-SHUTDOWN",
        format!(
            "graceful shutdown (received={} rejected={} completed={} timed_out={} canceled={} preemptions={})",
            totals.requests_received,
            totals.requests_rejected,
            totals.emergencies_completed,
            totals.emergencies_timed_out,
            totals.emergencies_canceled,
            totals.preemptions
        ),
    );
    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for SIGINT")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}

fn init_logging(verbosity: u8) {
    use std::io::Write;

    let level = match verbosity {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    // Plain timestamps when piped, colors only on a real terminal.
    if !atty::is(atty::Stream::Stdout) {
        builder.write_style(env_logger::WriteStyle::Never);
    }
    builder.format(|fmt, record| {
        writeln!(
            fmt,
            "{} [{}] {}",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ"),
            record.level(),
            record.args()
        )
    });
    let _ = builder.try_init();
}
