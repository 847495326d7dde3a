use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};

use super::protocol::*;
use crate::adbd::{
    format_daemon_summary, format_ip_summary, DaemonStatus, DaemonSupervisor, ListListener,
    MarkerFileVisibility, PortRange, RunListener, StatusDisplay, StatusPoller, StopListener,
    StopReport, VisibilitySink,
};
use crate::config::{self, Settings};
use crate::device::{ProcSocketTable, SocketTable};
use crate::{Error, Result};

pub const SOCKET_NAME: &str = "devbridge.sock";
pub const PID_NAME: &str = "devbridge.pid";
pub const MARKER_NAME: &str = "visible.json";

/// Logs supervisor results as they arrive.
struct LogListener;

impl RunListener for LogListener {
    fn on_run(&self, port: u16) {
        tracing::info!("start port {}", port);
    }

    fn on_error(&self, port: u16, error: &Error) {
        tracing::warn!("port {}: {}", port, error);
    }
}

impl StopListener for LogListener {
    fn on_stopped(&self, port: u16) {
        tracing::info!("stopped port {}", port);
    }

    fn on_error(&self, port: u16, error: &Error) {
        tracing::warn!("port {}: {}", port, error);
    }

    fn on_stop_all(&self, report: &StopReport) {
        tracing::info!("stop all adbd ({} stopped, {} failed)", report.stopped.len(), report.failed.len());
    }
}

impl ListListener for LogListener {
    fn on_list(&self, daemons: &[DaemonStatus]) {
        tracing::debug!("{} daemon(s) running", daemons.len());
    }

    fn on_error(&self, error: &Error) {
        tracing::warn!("list failed: {}", error);
    }
}

/// Display that writes each status tick to the log.
struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn show(&self, ip_summary: &str, daemon_summary: &str) {
        tracing::debug!("ips: {:?} status: {:?}", ip_summary.trim_end(), daemon_summary);
    }
}

/// Control daemon: owns the supervisor and serves line-delimited JSON-RPC
/// on a unix socket.
pub struct Daemon {
    socket_path: PathBuf,
    pid_path: PathBuf,
    settings: Settings,
    supervisor: Arc<DaemonSupervisor>,
    sockets: Arc<dyn SocketTable>,
}

impl Daemon {
    pub fn new(
        state_dir: &Path,
        settings: Settings,
        supervisor: Arc<DaemonSupervisor>,
        sockets: Arc<dyn SocketTable>,
    ) -> Self {
        Self {
            socket_path: state_dir.join(SOCKET_NAME),
            pid_path: state_dir.join(PID_NAME),
            settings,
            supervisor,
            sockets,
        }
    }

    /// Run with the default state directory until SIGINT/SIGTERM.
    pub async fn run(settings: Settings) -> Result<()> {
        let state_dir = config::state_dir();
        std::fs::create_dir_all(&state_dir)?;

        let sink = Arc::new(MarkerFileVisibility::new(state_dir.join(MARKER_NAME)));
        // A marker left by a crashed daemon describes processes we do not own.
        sink.become_invisible();
        let supervisor = Arc::new(DaemonSupervisor::from_settings(&settings, sink));
        let daemon = Arc::new(Self::new(
            &state_dir,
            settings,
            supervisor,
            Arc::new(ProcSocketTable::default()),
        ));
        daemon.serve().await
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        // Remove stale socket
        let _ = std::fs::remove_file(&self.socket_path);
        std::fs::write(&self.pid_path, std::process::id().to_string())?;

        let listener = UnixListener::bind(&self.socket_path)?;
        tracing::info!("Daemon listening on {:?}", self.socket_path);

        // The poller lives exactly as long as this display.
        let display: Arc<dyn StatusDisplay> = Arc::new(LogDisplay);
        let poller = StatusPoller::new(
            Arc::clone(&self.supervisor),
            Arc::clone(&self.sockets),
            Arc::downgrade(&display),
        )
        .with_interval(self.settings.poll_interval())
        .spawn();

        let mut sigterm = signal(SignalKind::terminate())?;
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let daemon = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = daemon.handle_connection(stream).await {
                                tracing::error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => tracing::error!("Accept error: {}", e),
                },
                _ = tokio::signal::ctrl_c() => break,
                _ = sigterm.recv() => break,
            }
        }

        tracing::info!("Shutting down");
        drop(display);
        poller.wait_stopped().await;
        self.supervisor.run_stop_all(Arc::new(LogListener)).await;
        self.cleanup();
        Ok(())
    }

    fn cleanup(&self) {
        let _ = std::fs::remove_file(&self.socket_path);
        let _ = std::fs::remove_file(&self.pid_path);
    }

    async fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                break; // EOF
            }

            let response = self.handle_message(&line).await;
            let response_json = serde_json::to_string(&response)?;
            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    pub async fn handle_message(&self, message: &str) -> JsonRpcResponse {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(r) => r,
            Err(e) => {
                return JsonRpcResponse::error(Value::Null, -32700, format!("Parse error: {}", e), None);
            }
        };

        let result = match request.method.as_str() {
            METHOD_START => self.handle_start(&request.params).await,
            METHOD_STOP => self.handle_stop().await,
            METHOD_LIST => self.handle_list().await,
            METHOD_STATUS => self.handle_status().await,
            _ => Err(Error::Protocol(format!("Unknown method: {}", request.method))),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(e) => JsonRpcResponse::error(request.id, -32000, e.to_string(), Some(Value::from(e.code()))),
        }
    }

    async fn handle_start(&self, params: &Value) -> Result<Value> {
        let params: StartParams = if params.is_null() {
            StartParams::default()
        } else {
            serde_json::from_value(params.clone())?
        };
        let start = config::parse_port_or(params.start_text().as_deref(), self.settings.start_port);
        let end = config::parse_port_or(params.end_text().as_deref(), self.settings.end_port);
        let range = PortRange::new(start, end)?;

        let report = self.supervisor.start(range, Arc::new(LogListener)).await.map_err(join_error)?;
        Ok(serde_json::to_value(StartResult::from(&report))?)
    }

    async fn handle_stop(&self) -> Result<Value> {
        let report = self.supervisor.stop_all(Arc::new(LogListener)).await.map_err(join_error)?;
        Ok(serde_json::to_value(StopResult::from(&report))?)
    }

    async fn handle_list(&self) -> Result<Value> {
        let daemons = self.supervisor.list(Arc::new(LogListener)).await.map_err(join_error)??;
        Ok(serde_json::to_value(ListResult { daemons })?)
    }

    async fn handle_status(&self) -> Result<Value> {
        let ips = self
            .sockets
            .local_interface_addresses()
            .map(|i| format_ip_summary(&i))
            .unwrap_or_default();
        let daemons = format_daemon_summary(&self.supervisor.run_list().await?);
        Ok(serde_json::to_value(StatusResult { ips, daemons, visible: self.supervisor.is_visible() })?)
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Protocol(format!("supervisor task failed: {}", e))
}
