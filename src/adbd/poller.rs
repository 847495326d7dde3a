use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::registry::DaemonStatus;
use super::supervisor::DaemonSupervisor;
use crate::device::SocketTable;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Consumer of periodic status snapshots.
pub trait StatusDisplay: Send + Sync {
    fn show(&self, ip_summary: &str, daemon_summary: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Active,
    /// Terminal: the display went away.
    Stopped,
}

/// One line per interface with a non-loopback IPv4 address:
/// `wlan0=192.168.1.7 `.
pub fn format_ip_summary(interfaces: &BTreeMap<String, Vec<IpAddr>>) -> String {
    let mut out = String::new();
    for (name, addrs) in interfaces {
        let mut line = String::new();
        for addr in addrs {
            if let IpAddr::V4(v4) = addr {
                if !v4.is_loopback() {
                    line.push_str(&v4.to_string());
                    line.push(' ');
                }
            }
        }
        if !line.is_empty() {
            out.push_str(name);
            out.push('=');
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

/// `opening: 5555, 5556`, or empty when nothing runs.
pub fn format_daemon_summary(daemons: &[DaemonStatus]) -> String {
    if daemons.is_empty() {
        return String::new();
    }
    let ports: Vec<String> = daemons.iter().map(|d| d.port.to_string()).collect();
    format!("opening: {}", ports.join(", "))
}

/// Self-rescheduling status loop. Holds only a weak reference to its
/// display and stops for good once that reference no longer resolves.
pub struct StatusPoller {
    supervisor: Arc<DaemonSupervisor>,
    sockets: Arc<dyn SocketTable>,
    display: Weak<dyn StatusDisplay>,
    interval: Duration,
}

pub struct PollerHandle {
    state: watch::Receiver<PollerState>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }

    /// Resolves once the poller has reached `Stopped`.
    pub async fn wait_stopped(mut self) {
        let _ = self.state.wait_for(|s| *s == PollerState::Stopped).await;
        let _ = self.task.await;
    }

    /// Abort the loop without waiting for the display to go away.
    pub fn abort(&self) {
        self.task.abort();
    }
}

impl StatusPoller {
    pub fn new(
        supervisor: Arc<DaemonSupervisor>,
        sockets: Arc<dyn SocketTable>,
        display: Weak<dyn StatusDisplay>,
    ) -> Self {
        Self { supervisor, sockets, display, interval: DEFAULT_POLL_INTERVAL }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn spawn(self) -> PollerHandle {
        let (tx, rx) = watch::channel(PollerState::Active);
        let task = tokio::spawn(async move {
            self.run().await;
            let _ = tx.send(PollerState::Stopped);
        });
        PollerHandle { state: rx, task }
    }

    /// Tick until the display is gone. Each tick finishes delivering before
    /// the next one is scheduled.
    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.interval).await;
            if !self.tick().await {
                tracing::debug!("Status display gone, poller stopped");
                return;
            }
        }
    }

    /// Run one tick. Returns false when the display could not be resolved.
    pub async fn tick(&self) -> bool {
        if self.display.strong_count() == 0 {
            return false;
        }

        let ip_summary = match self.sockets.local_interface_addresses() {
            Ok(interfaces) => format_ip_summary(&interfaces),
            Err(e) => {
                tracing::warn!("Interface enumeration failed: {}", e);
                String::new()
            }
        };
        let daemon_summary = match self.supervisor.run_list().await {
            Ok(daemons) => format_daemon_summary(&daemons),
            Err(e) => {
                tracing::warn!("Daemon listing failed: {}", e);
                String::new()
            }
        };

        // Resolve again: the owner may have dropped the display meanwhile.
        let Some(display) = self.display.upgrade() else { return false };
        display.show(&ip_summary, &daemon_summary);
        true
    }
}
