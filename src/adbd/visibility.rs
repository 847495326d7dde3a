use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use super::registry::DaemonRegistry;

/// Title, description and tap action shown while daemons run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Indicator {
    pub title: String,
    pub description: String,
    pub on_tap_action: String,
}

impl Default for Indicator {
    fn default() -> Self {
        Self {
            title: "Adbd".to_string(),
            description: "adbd is running ...".to_string(),
            on_tap_action: "devbridge adbd list".to_string(),
        }
    }
}

/// Persistent "visible while running" side effect.
pub trait VisibilitySink: Send + Sync {
    fn become_visible(&self, indicator: &Indicator);
    fn become_invisible(&self);
}

/// Tracks empty ⇄ non-empty and forwards only real transitions to the sink.
pub struct VisibilityGate {
    sink: Arc<dyn VisibilitySink>,
    indicator: Indicator,
    visible: Mutex<bool>,
}

impl VisibilityGate {
    pub fn new(sink: Arc<dyn VisibilitySink>, indicator: Indicator) -> Self {
        Self { sink, indicator, visible: Mutex::new(false) }
    }

    pub fn sink(&self) -> Arc<dyn VisibilitySink> {
        Arc::clone(&self.sink)
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-read registry emptiness and fire the sink if it changed since the
    /// last call. Emptiness is read under the gate lock so concurrent
    /// mutation batches converge on one notification per transition.
    pub fn reconcile(&self, registry: &DaemonRegistry) {
        let mut visible = self.visible.lock().unwrap_or_else(|e| e.into_inner());
        let running = !registry.is_empty();
        if running == *visible {
            return;
        }
        *visible = running;
        if running {
            tracing::info!("Daemons running, showing indicator");
            self.sink.become_visible(&self.indicator);
        } else {
            tracing::info!("No daemons running, hiding indicator");
            self.sink.become_invisible();
        }
    }
}

/// Sink that only logs.
pub struct LogVisibility;

impl VisibilitySink for LogVisibility {
    fn become_visible(&self, indicator: &Indicator) {
        tracing::info!("[visible] {}: {}", indicator.title, indicator.description);
    }

    fn become_invisible(&self) {
        tracing::info!("[invisible]");
    }
}

/// Sink that keeps a marker file present while daemons run, so other tools
/// on the device can show the state.
pub struct MarkerFileVisibility {
    path: PathBuf,
}

impl MarkerFileVisibility {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl VisibilitySink for MarkerFileVisibility {
    fn become_visible(&self, indicator: &Indicator) {
        let body = match serde_json::to_string_pretty(indicator) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Failed to encode indicator: {}", e);
                return;
            }
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&self.path, body) {
            tracing::warn!("Failed to write {}: {}", self.path.display(), e);
        }
    }

    fn become_invisible(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}
