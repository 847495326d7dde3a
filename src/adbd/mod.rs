mod launcher;
mod poller;
mod process;
mod registry;
mod supervisor;
mod visibility;

pub use launcher::{PortOutcome, PortRange, PortRangeLauncher};
pub use poller::{
    format_daemon_summary, format_ip_summary, PollerHandle, PollerState, StatusDisplay,
    StatusPoller, DEFAULT_POLL_INTERVAL,
};
pub use process::{is_process_alive, ChildProcess, CommandSpawner, ProcessHandle, Spawner};
pub use registry::{DaemonInstance, DaemonRegistry, DaemonStatus, Rejected, Reservation};
pub use supervisor::{
    DaemonSupervisor, ListListener, NoopListener, RunListener, StartReport, StopListener,
    StopReport,
};
pub use visibility::{Indicator, LogVisibility, MarkerFileVisibility, VisibilityGate, VisibilitySink};
