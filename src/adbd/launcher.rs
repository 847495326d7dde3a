use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use super::process::{ProcessHandle, Spawner};
use super::registry::DaemonRegistry;
use crate::{Error, Result};

/// Slack on top of the startup grace before a spawn is abandoned.
const SPAWN_SLACK: Duration = Duration::from_secs(5);

/// Inclusive port range `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || start > end {
            return Err(Error::InvalidRange { start: start as u32, end: end as u32 });
        }
        Ok(Self { start, end })
    }

    pub fn single(port: u16) -> Result<Self> {
        Self::new(port, port)
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Result of one port's launch attempt.
#[derive(Debug)]
pub enum PortOutcome {
    Running { port: u16, pid: Option<u32> },
    Failed { port: u16, error: Error },
}

impl PortOutcome {
    pub fn port(&self) -> u16 {
        match self {
            PortOutcome::Running { port, .. } | PortOutcome::Failed { port, .. } => *port,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, PortOutcome::Running { .. })
    }
}

pub type OutcomeCallback = Arc<dyn Fn(&PortOutcome) + Send + Sync>;

/// Fans a port range out into independent spawn attempts. Holds no state;
/// every successful attempt lands in the registry before its outcome is
/// reported.
pub struct PortRangeLauncher {
    spawner: Arc<dyn Spawner>,
    registry: Arc<DaemonRegistry>,
    spawn_timeout: Duration,
}

impl PortRangeLauncher {
    pub fn new(spawner: Arc<dyn Spawner>, registry: Arc<DaemonRegistry>) -> Self {
        Self { spawner, registry, spawn_timeout: SPAWN_SLACK }
    }

    pub fn with_spawn_timeout(mut self, startup_grace: Duration) -> Self {
        self.spawn_timeout = startup_grace + SPAWN_SLACK;
        self
    }

    /// Attempt every port concurrently. `on_outcome` is called exactly once
    /// per port, as soon as that port settles. Returns outcomes in port order.
    pub async fn launch(&self, range: PortRange, on_outcome: OutcomeCallback) -> Vec<PortOutcome> {
        let mut tasks = JoinSet::new();

        for port in range.ports() {
            let spawner = Arc::clone(&self.spawner);
            let registry = Arc::clone(&self.registry);
            let on_outcome = Arc::clone(&on_outcome);
            let timeout = self.spawn_timeout;
            tasks.spawn(async move {
                let outcome = launch_one(port, spawner, registry, timeout).await;
                on_outcome(&outcome);
                outcome
            });
        }

        let mut outcomes = Vec::with_capacity(range.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("Launch task failed: {}", e),
            }
        }
        outcomes.sort_by_key(PortOutcome::port);
        outcomes
    }
}

async fn launch_one(
    port: u16,
    spawner: Arc<dyn Spawner>,
    registry: Arc<DaemonRegistry>,
    timeout: Duration,
) -> PortOutcome {
    let reservation = match registry.reserve(port) {
        Ok(r) => r,
        Err(error) => {
            tracing::warn!("Port {} skipped: {}", port, error);
            return PortOutcome::Failed { port, error };
        }
    };

    let mut spawn = tokio::task::spawn_blocking(move || spawner.spawn_daemon(port));
    let spawned: Result<Box<dyn ProcessHandle>> = match tokio::time::timeout(timeout, &mut spawn).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(Error::SpawnFailed { port, reason: format!("spawn task failed: {}", join) }),
        Err(_) => {
            // The blocking call cannot be interrupted; reap whatever it yields.
            tokio::spawn(async move {
                if let Ok(Ok(late)) = spawn.await {
                    tracing::warn!("Late spawn on port {} returned, tearing down", port);
                    teardown(late).await;
                }
            });
            Err(Error::SpawnFailed {
                port,
                reason: format!("spawn did not return within {:?}", timeout),
            })
        }
    };

    match spawned {
        Ok(process) => {
            let pid = process.pid();
            match registry.commit(reservation, process) {
                Ok(()) => {
                    tracing::info!("Daemon running on port {} (pid {:?})", port, pid);
                    PortOutcome::Running { port, pid }
                }
                Err(rejected) => {
                    tracing::warn!("Port {} came up after stop-all, tearing down", port);
                    teardown(rejected.process).await;
                    PortOutcome::Failed { port, error: rejected.error }
                }
            }
        }
        Err(error) => {
            tracing::warn!("Port {} failed: {}", port, error);
            registry.release(reservation);
            PortOutcome::Failed { port, error }
        }
    }
}

async fn teardown(mut process: Box<dyn ProcessHandle>) {
    let result = tokio::task::spawn_blocking(move || process.terminate()).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Teardown failed: {}", e),
        Err(e) => tracing::warn!("Teardown task failed: {}", e),
    }
}
