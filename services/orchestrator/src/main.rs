//! Market signal pipeline runtime
//!
//! Wires the event bus, candle engine, analysis engine and signal pipeline
//! together under the orchestrator and runs until interrupted.

use analysis_engine::{AnalysisEngine, SignalPipeline};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use data_aggregator::CandleEngine;
use service_orchestrator::{RuntimeConfig, ServiceOrchestrator};
use services_common::{
    CandleStorage, Clock, EventBus, EventSubscriber, ManagedService, MemoryCandleStorage,
    MemoryPriceStorage, PriceStorage, SystemClock, init_tracing,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Market signal pipeline runtime
#[derive(Parser)]
#[clap(name = "pipeline-runtime")]
#[clap(about = "Candle aggregation, analysis and signal pipeline under one supervisor")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// JSON configuration file; defaults apply when omitted
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, overrides the configured level
    #[clap(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline until Ctrl-C (default)
    Run,

    /// Validate the configuration and print the effective settings
    CheckConfig,
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };
    let mut config = config.apply_env()?;
    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    config.validate()?;
    Ok(config)
}

async fn run(config: RuntimeConfig) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let candles: Arc<dyn CandleStorage> = Arc::new(MemoryCandleStorage::new());
    let prices: Arc<dyn PriceStorage> = Arc::new(MemoryPriceStorage::new());
    let bus = Arc::new(EventBus::new(config.bus.clone()));

    let candle_engine = Arc::new(CandleEngine::new(
        config.candles.clone(),
        Arc::clone(&candles),
        Arc::clone(&prices),
        Arc::clone(&clock),
    ));
    let analysis_engine = Arc::new(AnalysisEngine::with_defaults(
        config.analysis.clone(),
        Arc::clone(&candles),
        Arc::clone(&prices),
        Some(Arc::clone(&bus)),
        Arc::clone(&clock),
    ));
    let signal_pipeline = Arc::new(SignalPipeline::with_default_stages(
        config.pipeline.clone(),
        Some(Arc::clone(&bus)),
        Arc::clone(&clock),
    ));

    let subscribers: [Arc<dyn EventSubscriber>; 3] = [
        candle_engine.clone(),
        analysis_engine.clone(),
        signal_pipeline.clone(),
    ];
    for subscriber in &subscribers {
        let bound = bus.subscribe_all(subscriber);
        info!(subscriber = subscriber.name(), event_types = bound, "Subscriber attached");
    }

    let orchestrator = ServiceOrchestrator::new(config.lifecycle.clone(), Some(Arc::clone(&bus)));
    let services: [Arc<dyn ManagedService>; 4] = [
        bus.clone(),
        candle_engine,
        analysis_engine,
        signal_pipeline,
    ];
    for service in services {
        orchestrator.register(service).await?;
    }
    orchestrator.add_dependency("candle-engine", "event-bus").await;
    orchestrator.add_dependency("analysis-engine", "event-bus").await;
    orchestrator.add_dependency("analysis-engine", "candle-engine").await;
    orchestrator.add_dependency("signal-pipeline", "event-bus").await;

    orchestrator.start()?;
    let failures = orchestrator.start_all().await;
    for (service, e) in &failures {
        error!(service = %service, error = %e, "Service failed to start");
    }
    info!(
        order = ?orchestrator.start_order().await,
        failed = failures.len(),
        "Pipeline running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    let failures = orchestrator.stop_all().await;
    for (service, e) in &failures {
        warn!(service = %service, error = %e, "Service did not stop cleanly");
    }
    orchestrator.stop().await;
    info!("Pipeline stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                config = ?cli.config,
                "Starting pipeline runtime"
            );
            run(config).await
        }
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
