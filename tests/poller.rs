use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devbridge::adbd::{
    DaemonSupervisor, LogVisibility, NoopListener, PollerState, PortRange, ProcessHandle, Spawner,
    StatusDisplay, StatusPoller,
};
use devbridge::device::{SocketRecord, SocketTable, UnixSocket};
use devbridge::Result;

struct IdleProcess;

impl ProcessHandle for IdleProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_alive(&mut self) -> bool {
        true
    }

    fn terminate(&mut self) -> Result<()> {
        Ok(())
    }
}

struct IdleSpawner;

impl Spawner for IdleSpawner {
    fn spawn_daemon(&self, _port: u16) -> Result<Box<dyn ProcessHandle>> {
        Ok(Box::new(IdleProcess))
    }
}

struct FixedInterfaces;

impl SocketTable for FixedInterfaces {
    fn current_sockets(&self) -> Result<Vec<SocketRecord>> {
        Ok(vec![])
    }

    fn unix_sockets(&self) -> Result<Vec<UnixSocket>> {
        Ok(vec![])
    }

    fn local_interface_addresses(&self) -> Result<BTreeMap<String, Vec<IpAddr>>> {
        let mut map = BTreeMap::new();
        map.insert("lo".to_string(), vec!["127.0.0.1".parse().unwrap()]);
        map.insert("wlan0".to_string(), vec!["192.168.1.20".parse().unwrap()]);
        Ok(map)
    }
}

#[derive(Default)]
struct RecordingDisplay {
    shown: Mutex<Vec<(String, String)>>,
}

impl StatusDisplay for RecordingDisplay {
    fn show(&self, ip_summary: &str, daemon_summary: &str) {
        self.shown.lock().unwrap().push((ip_summary.to_string(), daemon_summary.to_string()));
    }
}

fn supervisor() -> Arc<DaemonSupervisor> {
    Arc::new(DaemonSupervisor::new(Arc::new(IdleSpawner), Arc::new(LogVisibility)))
}

#[tokio::test]
async fn test_ticks_deliver_summaries_while_display_lives() {
    let sup = supervisor();
    sup.start(PortRange::new(5555, 5556).unwrap(), Arc::new(NoopListener)).await.unwrap();

    let display = Arc::new(RecordingDisplay::default());
    let weak = Arc::downgrade(&(Arc::clone(&display) as Arc<dyn StatusDisplay>));
    let handle = StatusPoller::new(sup, Arc::new(FixedInterfaces), weak)
        .with_interval(Duration::from_millis(20))
        .spawn();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.state(), PollerState::Active);

    let shown = display.shown.lock().unwrap().clone();
    assert!(shown.len() >= 2);
    assert_eq!(shown[0].0, "wlan0=192.168.1.20 \n");
    assert_eq!(shown[0].1, "opening: 5555, 5556");
    handle.abort();
}

#[tokio::test]
async fn test_poller_stops_once_display_is_dropped() {
    let display: Arc<dyn StatusDisplay> = Arc::new(RecordingDisplay::default());
    let handle = StatusPoller::new(supervisor(), Arc::new(FixedInterfaces), Arc::downgrade(&display))
        .with_interval(Duration::from_millis(20))
        .spawn();

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(handle.state(), PollerState::Active);

    drop(display);
    tokio::time::timeout(Duration::from_secs(2), handle.wait_stopped())
        .await
        .expect("poller should stop after the display is dropped");
}

#[tokio::test]
async fn test_tick_without_display_reports_stopped() {
    let display: Arc<dyn StatusDisplay> = Arc::new(RecordingDisplay::default());
    let weak = Arc::downgrade(&display);
    drop(display);

    let poller = StatusPoller::new(supervisor(), Arc::new(FixedInterfaces), weak);
    assert!(!poller.tick().await);
}

#[tokio::test]
async fn test_empty_registry_gives_empty_daemon_summary() {
    let display = Arc::new(RecordingDisplay::default());
    let as_dyn: Arc<dyn StatusDisplay> = display.clone();
    let poller = StatusPoller::new(supervisor(), Arc::new(FixedInterfaces), Arc::downgrade(&as_dyn));

    assert!(poller.tick().await);
    assert_eq!(display.shown.lock().unwrap()[0].1, "");
}
