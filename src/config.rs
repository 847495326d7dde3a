use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_START_PORT: u16 = 5555;
pub const DEFAULT_END_PORT: u16 = 5558;

/// All configurable settings with their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub start_port: u16,
    pub end_port: u16,
    pub daemon_command: String,
    pub daemon_args: Vec<String>,
    pub daemon_port_env: Option<String>,
    pub startup_grace_ms: u64,
    pub stop_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub device_command_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            start_port: DEFAULT_START_PORT,
            end_port: DEFAULT_END_PORT,
            daemon_command: "adbd".to_string(),
            daemon_args: Vec::new(),
            daemon_port_env: Some("ADBD_PORT".to_string()),
            startup_grace_ms: 300,
            stop_timeout_ms: 5_000,
            poll_interval_ms: 1_000,
            device_command_timeout_ms: 5_000,
        }
    }
}

impl Settings {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn device_command_timeout(&self) -> Duration {
        Duration::from_millis(self.device_command_timeout_ms)
    }
}

/// Raw JSON representation; all fields optional for partial overrides.
#[derive(Debug, Deserialize, Default)]
struct SettingsFile {
    #[serde(rename = "ports.start")]
    start_port: Option<u16>,
    #[serde(rename = "ports.end")]
    end_port: Option<u16>,
    #[serde(rename = "daemon.command")]
    daemon_command: Option<String>,
    #[serde(rename = "daemon.args")]
    daemon_args: Option<Vec<String>>,
    #[serde(rename = "daemon.portEnv")]
    daemon_port_env: Option<String>,
    #[serde(rename = "daemon.startupGraceMs")]
    startup_grace_ms: Option<u64>,
    #[serde(rename = "daemon.stopTimeoutMs")]
    stop_timeout_ms: Option<u64>,
    #[serde(rename = "poll.intervalMs")]
    poll_interval_ms: Option<u64>,
    #[serde(rename = "device.commandTimeoutMs")]
    device_command_timeout_ms: Option<u64>,
}

/// Directory holding the control socket, PID file and visibility marker.
pub fn state_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".devbridge")
}

/// Resolve settings: defaults → user global → explicit file.
pub fn resolve(explicit: Option<&Path>) -> Settings {
    let global_path = state_dir().join("settings.json");
    resolve_with_paths(Some(&global_path), explicit)
}

fn resolve_with_paths(global_path: Option<&Path>, explicit_path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    if let Some(path) = global_path {
        apply_file(&mut settings, path);
    }
    if let Some(path) = explicit_path {
        apply_file(&mut settings, path);
    }

    settings
}

fn apply_file(settings: &mut Settings, path: &Path) {
    let Ok(content) = std::fs::read_to_string(path) else { return };
    let Ok(file) = serde_json::from_str::<SettingsFile>(&content) else {
        tracing::warn!("Invalid settings file, ignoring: {}", path.display());
        return;
    };

    if let Some(v) = file.start_port {
        if v > 0 {
            settings.start_port = v;
        } else {
            tracing::warn!("ports.start (0) out of range, using default");
        }
    }
    if let Some(v) = file.end_port {
        if v > 0 {
            settings.end_port = v;
        } else {
            tracing::warn!("ports.end (0) out of range, using default");
        }
    }
    if let Some(v) = file.daemon_command {
        if !v.trim().is_empty() {
            settings.daemon_command = v;
        }
    }
    if let Some(v) = file.daemon_args {
        settings.daemon_args = v;
    }
    if let Some(v) = file.daemon_port_env {
        // An empty name disables passing the port through the environment.
        settings.daemon_port_env = if v.is_empty() { None } else { Some(v) };
    }

    apply_ranged(&mut settings.startup_grace_ms, file.startup_grace_ms, 0, 10_000, "daemon.startupGraceMs");
    apply_ranged(&mut settings.stop_timeout_ms, file.stop_timeout_ms, 100, 60_000, "daemon.stopTimeoutMs");
    apply_ranged(&mut settings.poll_interval_ms, file.poll_interval_ms, 50, 60_000, "poll.intervalMs");
    apply_ranged(
        &mut settings.device_command_timeout_ms,
        file.device_command_timeout_ms,
        100,
        60_000,
        "device.commandTimeoutMs",
    );
}

fn apply_ranged(slot: &mut u64, value: Option<u64>, min: u64, max: u64, key: &str) {
    let Some(v) = value else { return };
    if (min..=max).contains(&v) {
        *slot = v;
    } else {
        tracing::warn!("{} ({}) out of range ({}..{}), using default", key, v, min, max);
    }
}

/// Parse user-entered port text. Empty, malformed or zero input falls back
/// to `default` instead of being rejected.
pub fn parse_port_or(text: Option<&str>, default: u16) -> u16 {
    match text.map(str::trim) {
        Some(t) if !t.is_empty() => match t.parse::<u16>() {
            Ok(0) | Err(_) => {
                tracing::debug!("Ignoring malformed port {:?}, using {}", t, default);
                default
            }
            Ok(port) => port,
        },
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_no_files_exist() {
        let settings = resolve_with_paths(None, None);
        assert_eq!(settings.start_port, 5555);
        assert_eq!(settings.end_port, 5558);
        assert_eq!(settings.poll_interval_ms, 1_000);
        assert_eq!(settings.daemon_command, "adbd");
    }

    #[test]
    fn test_explicit_overrides_global() {
        let dir = tempdir().unwrap();
        let global = dir.path().join("global.json");
        let explicit = dir.path().join("explicit.json");
        std::fs::write(&global, r#"{"ports.start": 6000, "poll.intervalMs": 250}"#).unwrap();
        std::fs::write(&explicit, r#"{"ports.start": 7000}"#).unwrap();

        let settings = resolve_with_paths(Some(&global), Some(&explicit));
        assert_eq!(settings.start_port, 7000);
        assert_eq!(settings.poll_interval_ms, 250);
        assert_eq!(settings.end_port, 5558);
    }

    #[test]
    fn test_invalid_json_ignored() {
        let dir = tempdir().unwrap();
        let bad_file = dir.path().join("bad.json");
        std::fs::write(&bad_file, "not json {{{").unwrap();

        let settings = resolve_with_paths(Some(&bad_file), None);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_missing_file_ignored() {
        let settings = resolve_with_paths(Some(Path::new("/nonexistent/settings.json")), None);
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_out_of_range_values_use_default() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, r#"{"poll.intervalMs": 10, "daemon.stopTimeoutMs": 120000, "ports.end": 0}"#)
            .unwrap();

        let settings = resolve_with_paths(Some(&file), None);
        assert_eq!(settings.poll_interval_ms, 1_000);
        assert_eq!(settings.stop_timeout_ms, 5_000);
        assert_eq!(settings.end_port, 5558);
    }

    #[test]
    fn test_empty_port_env_disables_it() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("settings.json");
        std::fs::write(&file, r#"{"daemon.portEnv": "", "daemon.args": ["-p", "{port}"]}"#).unwrap();

        let settings = resolve_with_paths(Some(&file), None);
        assert_eq!(settings.daemon_port_env, None);
        assert_eq!(settings.daemon_args, vec!["-p".to_string(), "{port}".to_string()]);
    }

    #[test]
    fn test_parse_port_falls_back_on_bad_input() {
        assert_eq!(parse_port_or(Some("6000"), 5555), 6000);
        assert_eq!(parse_port_or(Some(" 6001 "), 5555), 6001);
        assert_eq!(parse_port_or(Some(""), 5555), 5555);
        assert_eq!(parse_port_or(Some("abc"), 5555), 5555);
        assert_eq!(parse_port_or(Some("70000"), 5558), 5558);
        assert_eq!(parse_port_or(Some("0"), 5555), 5555);
        assert_eq!(parse_port_or(None, 5558), 5558);
    }
}
