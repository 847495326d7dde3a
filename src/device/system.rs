use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::Serialize;

use super::pattern::{parse_pattern_dump, IntentFilterPattern};
use crate::{Error, Result};

/// `package/class` of a UI component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentName {
    pub package: String,
    pub class_name: String,
}

impl ComponentName {
    /// Parse `com.foo/.Main` or `com.foo/com.foo.Main`; a leading-dot class
    /// is expanded with the package name.
    pub fn parse(text: &str) -> Option<Self> {
        let (package, class) = text.split_once('/')?;
        if package.is_empty() || class.is_empty() {
            return None;
        }
        let class_name = if class.starts_with('.') {
            format!("{}{}", package, class)
        } else {
            class.to_string()
        };
        Some(Self { package: package.to_string(), class_name })
    }
}

/// Installed package whose archive lives at `source_file_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    pub package_name: String,
    pub source_file_path: String,
}

/// Package/activity system APIs consumed by the introspector.
pub trait DeviceServices: Send + Sync {
    /// The resumed (foreground) component, if any.
    fn foreground_component(&self) -> Result<Option<ComponentName>>;

    /// Installed packages whose source archive is `path`, in enumeration order.
    fn packages_for_path(&self, path: &str) -> Result<Vec<PackageRecord>>;

    /// Intent-filter path patterns declared by `package`.
    fn path_patterns(&self, package: &str) -> Result<Vec<IntentFilterPattern>>;
}

/// Queries the platform through its shell tools (`dumpsys`, `pm`).
pub struct ShellDeviceServices {
    timeout: Duration,
}

impl Default for ShellDeviceServices {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ShellDeviceServices {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        run_with_timeout(program, args, self.timeout)
    }
}

impl DeviceServices for ShellDeviceServices {
    fn foreground_component(&self) -> Result<Option<ComponentName>> {
        let dump = self.run("dumpsys", &["activity", "activities"])?;
        Ok(parse_resumed_activity(&dump))
    }

    fn packages_for_path(&self, path: &str) -> Result<Vec<PackageRecord>> {
        let listing = self.run("pm", &["list", "packages", "-f"])?;
        let canonical = std::fs::canonicalize(path)
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        Ok(parse_package_list(&listing)
            .into_iter()
            .filter(|r| r.source_file_path == path || Some(&r.source_file_path) == canonical.as_ref())
            .collect())
    }

    fn path_patterns(&self, package: &str) -> Result<Vec<IntentFilterPattern>> {
        let dump = self.run("dumpsys", &["package", package])?;
        Ok(parse_pattern_dump(&dump))
    }
}

/// Run a system tool, capturing stdout. A tool that cannot be started,
/// exits non-zero, or exceeds `timeout` is reported as unavailable.
fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| Error::IntrospectionUnavailable(format!("{}: {}", program, e)))?;

    // Drain stdout on a helper thread so a large dump cannot fill the pipe
    // while we wait.
    let mut stdout = child.stdout.take();
    let reader = std::thread::spawn(move || {
        let mut buf = String::new();
        if let Some(ref mut out) = stdout {
            let _ = out.read_to_string(&mut buf);
        }
        buf
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(Error::IntrospectionUnavailable(format!(
                        "{} timed out after {:?}",
                        program, timeout
                    )));
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(Error::IntrospectionUnavailable(format!("{}: {}", program, e))),
        }
    };

    let output = reader.join().unwrap_or_default();
    if !status.success() {
        return Err(Error::IntrospectionUnavailable(format!("{} exited with {}", program, status)));
    }
    Ok(output)
}

fn resumed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(?:mResumedActivity|topResumedActivity|ResumedActivity|mFocusedActivity)\s*[:=]\s*ActivityRecord\{\S+ \S+ ([^\s/}]+/[^\s}]+)",
        )
        .expect("valid regex")
    })
}

/// Find the resumed activity in `dumpsys activity activities` output.
pub fn parse_resumed_activity(dump: &str) -> Option<ComponentName> {
    resumed_regex()
        .captures_iter(dump)
        .find_map(|caps| ComponentName::parse(&caps[1]))
}

/// Parse `pm list packages -f` lines: `package:<path>=<name>`. Paths may
/// themselves contain `=`, so the split is at the last one.
pub fn parse_package_list(listing: &str) -> Vec<PackageRecord> {
    listing
        .lines()
        .filter_map(|line| {
            let rest = line.trim().strip_prefix("package:")?;
            let (path, name) = rest.rsplit_once('=')?;
            if path.is_empty() || name.is_empty() {
                return None;
            }
            Some(PackageRecord {
                package_name: name.to_string(),
                source_file_path: path.to_string(),
            })
        })
        .collect()
}
