use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};

use super::launcher::{OutcomeCallback, PortOutcome, PortRange, PortRangeLauncher};
use super::process::{CommandSpawner, Spawner};
use super::registry::{DaemonRegistry, DaemonStatus};
use super::visibility::{Indicator, VisibilityGate, VisibilitySink};
use crate::config::Settings;
use crate::{Error, Result};

/// Slack on top of the stop timeout before a termination is abandoned.
const TERMINATE_SLACK: Duration = Duration::from_secs(5);

/// Receives per-port results of `start`.
pub trait RunListener: Send + Sync {
    fn on_run(&self, port: u16);
    fn on_error(&self, port: u16, error: &Error);
}

/// Receives per-instance results of `stop_all`, then one summary call.
pub trait StopListener: Send + Sync {
    fn on_stopped(&self, port: u16);
    fn on_error(&self, port: u16, error: &Error);
    fn on_stop_all(&self, _report: &StopReport) {}
}

/// Receives the result of `list`.
pub trait ListListener: Send + Sync {
    fn on_list(&self, daemons: &[DaemonStatus]);
    fn on_error(&self, error: &Error);
}

/// Listener that ignores everything.
pub struct NoopListener;

impl RunListener for NoopListener {
    fn on_run(&self, _port: u16) {}
    fn on_error(&self, _port: u16, _error: &Error) {}
}

impl StopListener for NoopListener {
    fn on_stopped(&self, _port: u16) {}
    fn on_error(&self, _port: u16, _error: &Error) {}
}

impl ListListener for NoopListener {
    fn on_list(&self, _daemons: &[DaemonStatus]) {}
    fn on_error(&self, _error: &Error) {}
}

#[derive(Debug, Default)]
pub struct StartReport {
    pub outcomes: Vec<PortOutcome>,
}

impl StartReport {
    pub fn running_ports(&self) -> Vec<u16> {
        self.outcomes.iter().filter(|o| o.is_running()).map(PortOutcome::port).collect()
    }

    pub fn failures(&self) -> Vec<(u16, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                PortOutcome::Failed { port, error } => Some((*port, error)),
                PortOutcome::Running { .. } => None,
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct StopReport {
    pub stopped: Vec<u16>,
    pub failed: Vec<(u16, Error)>,
}

/// Orchestrates launches, teardown and enumeration of daemon instances and
/// owns the empty ⇄ non-empty visibility transition.
pub struct DaemonSupervisor {
    registry: Arc<DaemonRegistry>,
    launcher: PortRangeLauncher,
    gate: Arc<VisibilityGate>,
    terminate_timeout: Duration,
}

impl DaemonSupervisor {
    pub fn new(spawner: Arc<dyn Spawner>, sink: Arc<dyn VisibilitySink>) -> Self {
        let registry = Arc::new(DaemonRegistry::new());
        Self {
            launcher: PortRangeLauncher::new(spawner, Arc::clone(&registry)),
            registry,
            gate: Arc::new(VisibilityGate::new(sink, Indicator::default())),
            terminate_timeout: Duration::from_secs(5) + TERMINATE_SLACK,
        }
    }

    pub fn from_settings(settings: &Settings, sink: Arc<dyn VisibilitySink>) -> Self {
        let spawner = CommandSpawner::from_settings(settings);
        Self::new(Arc::new(spawner), sink)
            .with_startup_grace(settings.startup_grace())
            .with_stop_timeout(settings.stop_timeout())
    }

    pub fn with_indicator(mut self, indicator: Indicator) -> Self {
        let sink = self.gate.sink();
        self.gate = Arc::new(VisibilityGate::new(sink, indicator));
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.launcher = self.launcher.with_spawn_timeout(grace);
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.terminate_timeout = timeout + TERMINATE_SLACK;
        self
    }

    pub fn registry(&self) -> &Arc<DaemonRegistry> {
        &self.registry
    }

    pub fn is_visible(&self) -> bool {
        self.gate.is_visible()
    }

    /// Launch `range` in the background; results go to `listener`.
    pub fn start(self: &Arc<Self>, range: PortRange, listener: Arc<dyn RunListener>) -> JoinHandle<StartReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_start(range, listener).await })
    }

    /// Stop every running daemon in the background.
    pub fn stop_all(self: &Arc<Self>, listener: Arc<dyn StopListener>) -> JoinHandle<StopReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_stop_all(listener).await })
    }

    /// Enumerate running daemons in the background.
    pub fn list(self: &Arc<Self>, listener: Arc<dyn ListListener>) -> JoinHandle<Result<Vec<DaemonStatus>>> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.run_list().await;
            match &result {
                Ok(daemons) => listener.on_list(daemons),
                Err(e) => listener.on_error(e),
            }
            result
        })
    }

    pub async fn run_start(&self, range: PortRange, listener: Arc<dyn RunListener>) -> StartReport {
        tracing::info!("Starting daemons on ports {}", range);
        let registry = Arc::clone(&self.registry);
        let gate = Arc::clone(&self.gate);
        let on_outcome: OutcomeCallback = Arc::new(move |outcome: &PortOutcome| match outcome {
            PortOutcome::Running { port, .. } => {
                gate.reconcile(&registry);
                listener.on_run(*port);
            }
            PortOutcome::Failed { port, error } => listener.on_error(*port, error),
        });

        let outcomes = self.launcher.launch(range, on_outcome).await;
        StartReport { outcomes }
    }

    pub async fn run_stop_all(&self, listener: Arc<dyn StopListener>) -> StopReport {
        let stopping = self.registry.begin_stop_all();
        if stopping.is_empty() {
            tracing::debug!("stop_all: nothing running");
        } else {
            tracing::info!("Stopping {} daemon(s)", stopping.len());
        }

        let mut tasks = JoinSet::new();
        for instance in stopping {
            let port = instance.port;
            let registry = Arc::clone(&self.registry);
            let timeout = self.terminate_timeout;
            tasks.spawn(async move {
                let terminate = tokio::task::spawn_blocking(move || {
                    let mut instance = instance;
                    instance.process.terminate()
                });
                let result = match tokio::time::timeout(timeout, terminate).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join)) => Err(Error::TerminationFailed { port, reason: join.to_string() }),
                    Err(_) => Err(Error::TerminationFailed {
                        port,
                        reason: format!("terminate did not return within {:?}", timeout),
                    }),
                };
                // Release the port only once terminate has answered or timed out.
                registry.finish_stop(port);
                (port, result)
            });
        }

        let mut report = StopReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((port, Ok(()))) => {
                    listener.on_stopped(port);
                    report.stopped.push(port);
                }
                Ok((port, Err(error))) => {
                    tracing::warn!("{}", error);
                    let error = match error {
                        e @ Error::TerminationFailed { .. } => e,
                        other => Error::TerminationFailed { port, reason: other.to_string() },
                    };
                    listener.on_error(port, &error);
                    report.failed.push((port, error));
                }
                Err(e) => tracing::error!("Stop task failed: {}", e),
            }
        }
        report.stopped.sort_unstable();
        report.failed.sort_by_key(|(port, _)| *port);

        self.gate.reconcile(&self.registry);
        listener.on_stop_all(&report);
        report
    }

    /// Reap dead instances, then snapshot the registry.
    pub async fn run_list(&self) -> Result<Vec<DaemonStatus>> {
        let registry = Arc::clone(&self.registry);
        let reaped = tokio::task::spawn_blocking(move || registry.reap_dead())
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("process state unavailable: {}", e))))?;
        if !reaped.is_empty() {
            tracing::warn!("Daemon(s) on port(s) {:?} exited on their own", reaped);
            self.gate.reconcile(&self.registry);
        }
        Ok(self.registry.snapshot())
    }
}
