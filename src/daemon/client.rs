use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use super::protocol::{JsonRpcRequest, JsonRpcResponse};
use super::server::{PID_NAME, SOCKET_NAME};
use crate::adbd::is_process_alive;
use crate::{Error, Result};

/// Client side of the control socket. Launches the daemon if it is not
/// already running.
pub struct DaemonClient {
    socket_path: PathBuf,
    pid_path: PathBuf,
    next_id: u64,
}

impl DaemonClient {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            socket_path: state_dir.join(SOCKET_NAME),
            pid_path: state_dir.join(PID_NAME),
            next_id: 1,
        }
    }

    pub fn is_daemon_running(&self) -> bool {
        if !self.pid_path.exists() || !self.socket_path.exists() {
            return false;
        }
        std::fs::read_to_string(&self.pid_path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .is_some_and(is_process_alive)
    }

    /// Start `devbridge daemon` in the background and wait for its socket.
    pub async fn ensure_daemon(&self, config: Option<&Path>) -> Result<()> {
        if self.is_daemon_running() {
            return Ok(());
        }

        let exe = std::env::current_exe()?;
        let mut cmd = std::process::Command::new(exe);
        if let Some(path) = config {
            cmd.arg("--config").arg(path);
        }
        cmd.arg("daemon")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        for _ in 0..50 {
            if self.socket_path.exists() {
                tokio::time::sleep(Duration::from_millis(100)).await;
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err(Error::Protocol(format!("daemon did not create {:?}", self.socket_path)))
    }

    /// Send one request and read its response line.
    pub async fn call(&mut self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest::new(self.next_id, method, params);
        self.next_id += 1;

        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();
        let mut line = serde_json::to_string(&request)?;
        line.push('\n');
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();
        if reader.read_line(&mut response_line).await? == 0 {
            return Err(Error::Protocol("daemon closed the connection".to_string()));
        }

        into_result(serde_json::from_str(&response_line)?)
    }
}

/// Unwrap a response, keeping the daemon's error code and message intact.
fn into_result(response: JsonRpcResponse) -> Result<Value> {
    match (response.result, response.error) {
        (_, Some(err)) => Err(Error::Daemon {
            code: err
                .data
                .as_ref()
                .and_then(Value::as_str)
                .unwrap_or("PROTOCOL")
                .to_string(),
            message: err.message,
        }),
        (Some(result), None) => Ok(result),
        (None, None) => Ok(Value::Null),
    }
}
