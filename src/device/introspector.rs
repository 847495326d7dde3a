use std::sync::Arc;

use super::pattern::IntentFilterPattern;
use super::sockets::{SocketTable, UnixSocket};
use super::system::DeviceServices;
use crate::Result;

/// Read-only queries against live device state. Each query is independent;
/// an empty answer is `None`/empty, never an error.
pub struct DeviceIntrospector {
    services: Arc<dyn DeviceServices>,
    sockets: Arc<dyn SocketTable>,
}

impl DeviceIntrospector {
    pub fn new(services: Arc<dyn DeviceServices>, sockets: Arc<dyn SocketTable>) -> Self {
        Self { services, sockets }
    }

    pub fn top_package(&self) -> Result<Option<String>> {
        Ok(self.services.foreground_component()?.map(|c| c.package))
    }

    pub fn top_activity(&self) -> Result<Option<String>> {
        Ok(self.services.foreground_component()?.map(|c| c.class_name))
    }

    /// Source file of the first installed package matching `path`. When
    /// several match, the first in enumeration order wins.
    pub fn resolve_package_file(&self, path: &str) -> Result<Option<String>> {
        let records = self.services.packages_for_path(path)?;
        if records.len() > 1 {
            tracing::debug!("{} packages match {}, taking the first", records.len(), path);
        }
        Ok(records.into_iter().next().map(|r| r.source_file_path))
    }

    pub fn list_local_sockets(&self) -> Result<Vec<UnixSocket>> {
        self.sockets.unix_sockets()
    }

    pub fn path_patterns(&self, package: &str) -> Result<Vec<IntentFilterPattern>> {
        self.services.path_patterns(package)
    }
}
