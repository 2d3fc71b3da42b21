//! Broker Autoscaler - load experiment controller
//!
//! Polls a broker's throughput metrics, scales producer load out while the
//! consumers keep up, and ends the run once output is stable at its peak.

use anyhow::{Context, Result};
use autoscaler_lib::{
    control::ControlServer,
    controller::{ControllerBuilder, RunMode},
    decision::{DecisionPipeline, PeakTracker, ScalingDecider, TerminationDecider},
    fanout::ProducerFanout,
    health::HealthRegistry,
    models::MetricSpec,
    observability::{ScalerMetrics, StructuredLogger},
    source::{JolokiaClient, MetricSource, ProcessLocator},
};
use clap::{error::ErrorKind, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AUTOSCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "broker-autoscaler", version, about = "Autoscaling controller for broker load experiments")]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Control port (default 8888)
    #[arg(long, global = true)]
    listen_port: Option<u16>,

    /// Health/metrics HTTP port; 0 disables it
    #[arg(long, global = true)]
    metrics_port: Option<u16>,

    /// Metric endpoint when the broker command line names none
    #[arg(long, global = true)]
    jolokia_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sample every bean of a bean list from a running process
    Monitor {
        /// Substring of the process command line
        broker: String,
        /// File with one `group#attr1,attr2,...` per line
        beans: PathBuf,
    },
    /// Sample broker throughput and scale producers out
    Scale {
        /// Comma-separated `host:port` producer endpoints
        endpoints: String,
        /// Message rate commanded per scale-out; omit to only monitor
        rate: Option<u64>,
    },
}

/// Parse arguments; usage errors exit with status 1
fn parse_cli() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

/// Resolve the command into the process to look for, the specs to sample
/// and the run mode.
fn plan(command: Command, config: &config::AutoscalerConfig) -> Result<(String, Vec<MetricSpec>, RunMode)> {
    match command {
        Command::Monitor { broker, beans } => {
            let specs = MetricSpec::load_file(&beans)?;
            Ok((broker, specs, RunMode::Generic))
        }
        Command::Scale { endpoints, rate } => {
            let fanout = ProducerFanout::parse(&endpoints)?;
            let specs = MetricSpec::broker_defaults();

            let mode = match rate {
                Some(rate) => {
                    let pipeline = DecisionPipeline::new(
                        PeakTracker::new(config.peaks.clone()),
                        TerminationDecider::new(config.termination.clone())?,
                        ScalingDecider::new(config.scaling.clone(), rate, fanout.len())?,
                    );
                    RunMode::Scaling { pipeline, fanout }
                }
                None => {
                    warn!("No per-producer rate given, running monitor-only");
                    RunMode::MonitorOnly(PeakTracker::new(config.peaks.clone()))
                }
            };

            Ok((config.broker_process.clone(), specs, mode))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = parse_cli();

    let mut config = config::AutoscalerConfig::load()?;
    config.log_json |= cli.log_json;
    if let Some(port) = cli.listen_port {
        config.listen_port = port;
    }
    if let Some(port) = cli.metrics_port {
        config.metrics_port = port;
    }
    if let Some(url) = cli.jolokia_url {
        config.jolokia_url = url;
    }

    init_tracing(config.log_json);
    config.validate()?;

    let (broker, specs, mode) = plan(cli.command, &config)?;
    info!(broker = %broker, mode = mode.name(), specs = specs.len(), "Autoscaler configured");

    let process = ProcessLocator::new(&config.jolokia_url)
        .locate(&broker)
        .await
        .with_context(|| format!("cannot find a process matching \"{}\"", broker))?;

    let client = JolokiaClient::new(&process.endpoint)?;
    let logger = StructuredLogger::new(format!("{}@{}", broker, process.pid));
    logger.log_startup(AUTOSCALER_VERSION, mode.name(), client.endpoint());

    let health_registry = HealthRegistry::new();
    let metrics = ScalerMetrics::new();

    if config.metrics_port > 0 {
        let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics.clone()));
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, app_state).await {
                warn!(error = %e, "Health and metrics server stopped");
            }
        });
    }

    let source = MetricSource::new(Arc::new(client));
    let control = ControlServer::bind(config.listen_port, config.accept_timeout())
        .await
        .with_context(|| format!("cannot listen on control port {}", config.listen_port))?;

    let controller = ControllerBuilder::new()
        .source(source)
        .specs(specs)
        .mode(mode)
        .control(control)
        .logger(logger)
        .metrics(metrics)
        .health(health_registry)
        .build()?;

    let summary = controller
        .run()
        .await
        .context("failed to open the broker metric channel")?;

    info!(
        reason = %summary.reason,
        ticks = summary.ticks,
        scale_outs = summary.scale_outs,
        commanded_rate = summary.commanded_rate,
        "Run finished"
    );

    Ok(())
}
