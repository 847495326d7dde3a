mod client;
pub mod protocol;
mod server;

pub use client::DaemonClient;
pub use server::{Daemon, MARKER_NAME, PID_NAME, SOCKET_NAME};
