use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::{Error, Result};

/// Handle to one spawned daemon process bound to one port.
///
/// Calls may block; async callers run them under `spawn_blocking`.
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;
    fn is_alive(&mut self) -> bool;
    fn terminate(&mut self) -> Result<()>;
}

/// Spawn primitive. Must be callable concurrently for distinct ports.
pub trait Spawner: Send + Sync {
    fn spawn_daemon(&self, port: u16) -> Result<Box<dyn ProcessHandle>>;
}

/// Check if a process is alive. Returns true if the process exists,
/// even if we lack permission to signal it (EPERM).
pub fn is_process_alive(pid: u32) -> bool {
    let result = unsafe { libc::kill(pid as i32, 0) };
    if result == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

pub struct ChildProcess {
    port: u16,
    child: Child,
    stop_timeout: Duration,
    exited: bool,
}

impl ChildProcess {
    pub fn new(port: u16, child: Child, stop_timeout: Duration) -> Self {
        Self { port, child, stop_timeout, exited: false }
    }

    /// Poll `try_wait` until the child is reaped or the deadline passes.
    fn wait_until(&mut self, deadline: Instant) -> bool {
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    tracing::debug!("Daemon on port {} exited with {}", self.port, status);
                    self.exited = true;
                    return true;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => {
                    tracing::warn!("try_wait failed for daemon on port {}: {}", self.port, e);
                    return false;
                }
            }
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn is_alive(&mut self) -> bool {
        if self.exited {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(_)) => {
                self.exited = true;
                false
            }
            Ok(None) => true,
            Err(_) => is_process_alive(self.child.id()),
        }
    }

    fn terminate(&mut self) -> Result<()> {
        if !self.is_alive() {
            return Ok(());
        }

        let pid = self.child.id();
        tracing::info!("Stopping daemon on port {} (pid {})", self.port, pid);
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }

        if self.wait_until(Instant::now() + self.stop_timeout) {
            return Ok(());
        }

        tracing::warn!("Daemon on port {} did not stop in time, force killing", self.port);
        if let Err(e) = self.child.kill() {
            return Err(Error::TerminationFailed { port: self.port, reason: e.to_string() });
        }
        if self.wait_until(Instant::now() + Duration::from_secs(1)) {
            Ok(())
        } else {
            Err(Error::TerminationFailed {
                port: self.port,
                reason: format!("pid {} still present after SIGKILL", pid),
            })
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // Reap if already gone so no zombie is left behind.
        if !self.exited {
            let _ = self.child.try_wait();
        }
    }
}

/// Spawns the configured daemon command, one process per port.
pub struct CommandSpawner {
    command: String,
    args: Vec<String>,
    port_env: Option<String>,
    startup_grace: Duration,
    stop_timeout: Duration,
}

impl CommandSpawner {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            port_env: None,
            startup_grace: Duration::from_millis(300),
            stop_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            command: settings.daemon_command.clone(),
            args: settings.daemon_args.clone(),
            port_env: settings.daemon_port_env.clone(),
            startup_grace: settings.startup_grace(),
            stop_timeout: settings.stop_timeout(),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    fn render_args(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args.iter().map(|a| a.replace("{port}", &port)).collect()
    }
}

/// Fail fast when something else already holds the port.
fn probe_port(port: u16) -> Result<()> {
    match TcpListener::bind(("0.0.0.0", port)) {
        Ok(listener) => {
            drop(listener);
            Ok(())
        }
        Err(e) => Err(Error::SpawnFailed { port, reason: format!("port unavailable: {}", e) }),
    }
}

impl Spawner for CommandSpawner {
    fn spawn_daemon(&self, port: u16) -> Result<Box<dyn ProcessHandle>> {
        probe_port(port)?;

        let mut cmd = Command::new(&self.command);
        cmd.args(self.render_args(port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(ref name) = self.port_env {
            cmd.env(name, port.to_string());
        }

        let child = cmd.spawn().map_err(|e| Error::SpawnFailed {
            port,
            reason: format!("{}: {}", self.command, e),
        })?;
        tracing::info!("Spawned {} for port {} with PID {}", self.command, port, child.id());

        let mut process = ChildProcess::new(port, child, self.stop_timeout);
        if process.wait_until(Instant::now() + self.startup_grace) {
            let status = process
                .child
                .try_wait()
                .ok()
                .flatten()
                .map(|s| s.to_string())
                .unwrap_or_else(|| "exited".to_string());
            return Err(Error::SpawnFailed {
                port,
                reason: format!("daemon exited during startup ({})", status),
            });
        }

        Ok(Box::new(process))
    }
}
