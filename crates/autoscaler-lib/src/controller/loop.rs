//! The controller loop and its builder

use super::{Clock, RunMode, SystemClock};
use crate::control::{ControlCommand, ControlServer};
use crate::decision::{PeakTracker, TerminationDecision, TickAction};
use crate::error::{ScalerError, ScalerResult};
use crate::health::{HealthRegistry, RunPhase};
use crate::models::{MetricSpec, Sample, StatusLine};
use crate::observability::{ScalerMetrics, StructuredLogger};
use crate::source::MetricSource;
use std::fmt;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Why the loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// An operator sent `bye` or `quit`
    Quit,
    /// The termination decider ended the run
    Terminated(TerminationDecision),
    /// The metric channel broke mid-run
    SourceLost(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Quit => write!(f, "quit requested"),
            StopReason::Terminated(TerminationDecision::PeakDrop { drop_percentage, .. }) => {
                write!(f, "output dropped {:.1}% below peak", drop_percentage)
            }
            StopReason::Terminated(TerminationDecision::Stable { ticks }) => {
                write!(f, "output stable for {} ticks", ticks)
            }
            StopReason::Terminated(TerminationDecision::Continue) => write!(f, "terminated"),
            StopReason::SourceLost(message) => write!(f, "metric source lost: {}", message),
        }
    }
}

/// What a finished run reports
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub reason: StopReason,
    pub ticks: u64,
    pub scale_outs: u64,
    pub commanded_rate: u64,
    /// Peaks of the three broker metrics; absent in generic mode
    pub peaks: Option<PeakTracker>,
}

/// The tick loop
pub struct Controller {
    source: MetricSource,
    specs: Vec<MetricSpec>,
    mode: RunMode,
    control: ControlServer,
    logger: StructuredLogger,
    metrics: ScalerMetrics,
    health: HealthRegistry,
    clock: Arc<dyn Clock>,
    status_out: Box<dyn Write + Send + Sync>,
    last_status: Option<String>,
    ticks: u64,
}

impl Controller {
    pub fn control_addr(&self) -> ScalerResult<SocketAddr> {
        self.control.local_addr()
    }

    /// Open the metric channel and producer connections, then tick until
    /// termination, quit or loss of the metric source.
    ///
    /// Fails only when the metric channel cannot be opened.
    pub async fn run(mut self) -> ScalerResult<RunSummary> {
        self.health.set_phase(RunPhase::Starting).await;

        if let Err(e) = self.source.open().await {
            self.health.source_failed(&e).await;
            self.health.set_phase(RunPhase::Stopped).await;
            return Err(e);
        }

        if let RunMode::Scaling { fanout, .. } = &mut self.mode {
            let connected = fanout.connect_all().await;
            info!(connected = connected, total = fanout.len(), "Producer connections opened");
            self.health.producers_connected(connected, fanout.len()).await;
        }

        info!(
            mode = self.mode.name(),
            specs = self.specs.len(),
            accept_timeout_ms = self.control.accept_timeout().as_millis() as u64,
            "Starting controller loop"
        );
        self.health.set_phase(RunPhase::Running).await;

        let reason = loop {
            match self.tick().await {
                Ok(None) => {}
                Ok(Some(reason)) => break reason,
                Err(e) if e.is_fatal_for_source() => {
                    error!(error = %e, "Metric sampling failed, stopping");
                    self.health.source_failed(&e).await;
                    break StopReason::SourceLost(e.to_string());
                }
                Err(e) => {
                    // The channel is still usable; skip this tick's decisions
                    warn!(error = %e, "Metric sampling failed, skipping tick");
                    self.health.source_failed(&e).await;
                    if let Some(reason) = self.poll_control().await {
                        break reason;
                    }
                }
            }
        };

        Ok(self.shutdown(reason).await)
    }

    /// Run one tick. `Some` ends the loop.
    async fn tick(&mut self) -> ScalerResult<Option<StopReason>> {
        self.ticks += 1;
        self.metrics.inc_ticks();

        let started = Instant::now();
        let readings = match self.source.query(&self.specs).await {
            Ok(readings) => readings,
            Err(e) => {
                self.metrics.inc_sample_errors();
                return Err(e);
            }
        };
        self.metrics
            .observe_sample_latency(started.elapsed().as_secs_f64());
        self.health.source_sampled().await;

        let now = self.clock.now_ms();
        let sample = Sample::from_readings(now, &readings);
        let status = match self.mode {
            RunMode::Generic => StatusLine::new(now, readings.values()),
            _ => StatusLine::new(now, sample.values().to_vec()),
        };
        self.emit_status(status);
        self.metrics.observe_sample(&sample);

        if let Some(reason) = self.decide(&sample).await {
            return Ok(Some(reason));
        }

        Ok(self.poll_control().await)
    }

    /// Write the status line to the status sink and keep it for `get_data`
    fn emit_status(&mut self, status: StatusLine) {
        let line = status.to_string();
        if let Err(e) = writeln!(self.status_out, "{}", line).and_then(|_| self.status_out.flush()) {
            warn!(error = %e, "Failed to write status line");
        }
        self.last_status = Some(line);
    }

    /// Run the decision pipeline in scaling mode; peaks only otherwise.
    async fn decide(&mut self, sample: &Sample) -> Option<StopReason> {
        let (pipeline, fanout) = match &mut self.mode {
            RunMode::Scaling { pipeline, fanout } => (pipeline, fanout),
            RunMode::MonitorOnly(peaks) => {
                peaks.observe(sample);
                self.metrics.set_max_bytes_out(peaks.max_bytes_out());
                return None;
            }
            RunMode::Generic => return None,
        };

        let action = pipeline.evaluate(sample);
        self.metrics.set_max_bytes_out(pipeline.peaks().max_bytes_out());
        self.metrics.set_saturated(pipeline.termination().is_saturated());

        match action {
            TickAction::Terminate(decision) => {
                self.logger.log_termination(&decision);
                return Some(StopReason::Terminated(decision));
            }
            TickAction::ScaleOut { producer, decision } => {
                let rate = pipeline.scaling().per_producer_rate();
                let delivered = match fanout.dispatch(producer, rate).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, producer = producer, "Rate command not delivered");
                        self.metrics.inc_dispatch_failures();
                        false
                    }
                };

                // Committed even when undelivered so the cooldown engages
                pipeline.commit(sample.ts);
                self.metrics.inc_scale_outs();
                self.metrics.set_commanded_rate(pipeline.scaling().commanded_rate());

                let endpoint = fanout
                    .endpoints()
                    .get(producer)
                    .map(|e| e.address())
                    .unwrap_or_default();
                self.logger.log_scale_out(
                    producer,
                    &endpoint,
                    rate,
                    pipeline.scaling().commanded_rate(),
                    &decision,
                    delivered,
                );
                self.health
                    .producers_connected(fanout.connected_count(), fanout.len())
                    .await;
            }
            TickAction::Hold(decision) => {
                debug!(reason = %decision, "No scale-out this tick");
            }
        }

        None
    }

    /// Wait on the control port for at most one client
    async fn poll_control(&mut self) -> Option<StopReason> {
        let command = match self.control.poll().await {
            Ok(Some(command)) => command,
            Ok(None) => {
                self.health.control_polled().await;
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Control port I/O error");
                self.health.control_failed(&e).await;
                return None;
            }
        };

        match command {
            ControlCommand::Quit => {
                self.logger.log_control_command("quit");
                Some(StopReason::Quit)
            }
            ControlCommand::GetData(reply) => {
                self.logger.log_control_command("get_data");
                let line = self.last_status.clone().unwrap_or_default();
                match reply.send(&line).await {
                    Ok(()) => self.health.control_polled().await,
                    Err(e) => {
                        warn!(error = %e, "Failed to reply to get_data");
                        self.health.control_failed(&e).await;
                    }
                }
                None
            }
            ControlCommand::Unknown(line) => {
                warn!(command = %line, "Unknown control command");
                self.health.control_polled().await;
                None
            }
        }
    }

    /// Log the summary and release the metric channel and producer sockets.
    async fn shutdown(mut self, reason: StopReason) -> RunSummary {
        let (peaks, scale_outs, commanded_rate) = match &mut self.mode {
            RunMode::Scaling { pipeline, fanout, .. } => {
                fanout.close_all().await;
                let scaling = pipeline.scaling();
                (
                    Some(pipeline.peaks().clone()),
                    scaling.scale_outs(),
                    scaling.commanded_rate(),
                )
            }
            RunMode::MonitorOnly(peaks) => (Some(peaks.clone()), 0, 0),
            RunMode::Generic => (None, 0, 0),
        };

        if let Some(peaks) = &peaks {
            self.logger.log_peaks(peaks, scale_outs, commanded_rate);
        }

        self.source.close().await;
        self.health.set_phase(RunPhase::Stopped).await;
        self.logger.log_shutdown(&reason.to_string());

        RunSummary {
            reason,
            ticks: self.ticks,
            scale_outs,
            commanded_rate,
            peaks,
        }
    }
}

/// Builder for the controller
pub struct ControllerBuilder {
    source: Option<MetricSource>,
    specs: Vec<MetricSpec>,
    mode: RunMode,
    control: Option<ControlServer>,
    logger: Option<StructuredLogger>,
    metrics: Option<ScalerMetrics>,
    health: Option<HealthRegistry>,
    clock: Arc<dyn Clock>,
    status_out: Option<Box<dyn Write + Send + Sync>>,
}

impl ControllerBuilder {
    /// Create a builder for the three broker metrics in monitor-only mode
    pub fn new() -> Self {
        Self {
            source: None,
            specs: MetricSpec::broker_defaults(),
            mode: RunMode::MonitorOnly(PeakTracker::default()),
            control: None,
            logger: None,
            metrics: None,
            health: None,
            clock: Arc::new(SystemClock),
            status_out: None,
        }
    }

    pub fn source(mut self, source: MetricSource) -> Self {
        self.source = Some(source);
        self
    }

    /// Replace the sampled metric specs
    pub fn specs(mut self, specs: Vec<MetricSpec>) -> Self {
        self.specs = specs;
        self
    }

    pub fn mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn control(mut self, control: ControlServer) -> Self {
        self.control = Some(control);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn metrics(mut self, metrics: ScalerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Where status lines go (stdout by default)
    pub fn status_out(mut self, out: Box<dyn Write + Send + Sync>) -> Self {
        self.status_out = Some(out);
        self
    }

    pub fn build(self) -> ScalerResult<Controller> {
        let source = self
            .source
            .ok_or_else(|| ScalerError::BadConfig("metric source is required".to_string()))?;
        let control = self
            .control
            .ok_or_else(|| ScalerError::BadConfig("control server is required".to_string()))?;
        if self.specs.is_empty() {
            return Err(ScalerError::BadConfig("no metric specs to sample".to_string()));
        }

        Ok(Controller {
            source,
            specs: self.specs,
            mode: self.mode,
            control,
            logger: self
                .logger
                .unwrap_or_else(|| StructuredLogger::new("unknown")),
            metrics: self.metrics.unwrap_or_default(),
            health: self.health.unwrap_or_default(),
            clock: self.clock,
            status_out: self
                .status_out
                .unwrap_or_else(|| Box::new(std::io::stdout())),
            last_status: None,
            ticks: 0,
        })
    }
}

impl Default for ControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
