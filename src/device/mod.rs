mod introspector;
mod pattern;
mod sockets;
mod system;

pub use introspector::DeviceIntrospector;
pub use pattern::{parse_pattern_dump, IntentFilterPattern, PatternKind};
pub use sockets::{
    interface_addresses, parse_inet_table, parse_unix_table, InetSocket, ProcSocketTable,
    SocketRecord, SocketTable, UnixSocket,
};
pub use system::{
    parse_package_list, parse_resumed_activity, ComponentName, DeviceServices, PackageRecord,
    ShellDeviceServices,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct FixedServices {
        component: Option<ComponentName>,
        packages: Vec<PackageRecord>,
    }

    impl DeviceServices for FixedServices {
        fn foreground_component(&self) -> crate::Result<Option<ComponentName>> {
            Ok(self.component.clone())
        }

        fn packages_for_path(&self, path: &str) -> crate::Result<Vec<PackageRecord>> {
            Ok(self.packages.iter().filter(|p| p.source_file_path == path).cloned().collect())
        }

        fn path_patterns(&self, _package: &str) -> crate::Result<Vec<IntentFilterPattern>> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_introspector_with_nothing_in_foreground() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("unix"), "Num RefCount Protocol Flags Type St Inode Path\n").unwrap();

        let introspector = DeviceIntrospector::new(
            Arc::new(FixedServices { component: None, packages: vec![] }),
            Arc::new(ProcSocketTable::new(dir.path())),
        );

        assert_eq!(introspector.top_package().unwrap(), None);
        assert_eq!(introspector.top_activity().unwrap(), None);
        assert_eq!(introspector.resolve_package_file("/x/y.apk").unwrap(), None);
        assert!(introspector.list_local_sockets().unwrap().is_empty());
    }
}
