use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use devbridge::adbd::{
    DaemonSupervisor, Indicator, NoopListener, PortRange, ProcessHandle, RunListener, Spawner,
    StopListener, StopReport, VisibilitySink,
};
use devbridge::{Error, Result};

#[derive(Default)]
struct Journal {
    spawned: Mutex<Vec<u16>>,
    terminated: Mutex<Vec<u16>>,
}

struct FakeProcess {
    port: u16,
    alive: Arc<AtomicBool>,
    fail_terminate: bool,
    terminate_delay: Duration,
    journal: Arc<Journal>,
}

impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(10_000 + self.port as u32)
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn terminate(&mut self) -> Result<()> {
        std::thread::sleep(self.terminate_delay);
        self.journal.terminated.lock().unwrap().push(self.port);
        if self.fail_terminate {
            return Err(Error::TerminationFailed { port: self.port, reason: "stuck".to_string() });
        }
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedSpawner {
    journal: Arc<Journal>,
    fail_spawn: HashSet<u16>,
    fail_terminate: HashSet<u16>,
    delay: Duration,
    terminate_delay: Duration,
    alive: Mutex<Vec<(u16, Arc<AtomicBool>)>>,
}

impl ScriptedSpawner {
    fn kill(&self, port: u16) {
        for (p, alive) in self.alive.lock().unwrap().iter() {
            if *p == port {
                alive.store(false, Ordering::SeqCst);
            }
        }
    }
}

impl Spawner for ScriptedSpawner {
    fn spawn_daemon(&self, port: u16) -> Result<Box<dyn ProcessHandle>> {
        std::thread::sleep(self.delay);
        if self.fail_spawn.contains(&port) {
            return Err(Error::SpawnFailed { port, reason: "port unavailable".to_string() });
        }
        self.journal.spawned.lock().unwrap().push(port);
        let alive = Arc::new(AtomicBool::new(true));
        self.alive.lock().unwrap().push((port, Arc::clone(&alive)));
        Ok(Box::new(FakeProcess {
            port,
            alive,
            fail_terminate: self.fail_terminate.contains(&port),
            terminate_delay: self.terminate_delay,
            journal: Arc::clone(&self.journal),
        }))
    }
}

#[derive(Default)]
struct CountingSink {
    visible: AtomicUsize,
    invisible: AtomicUsize,
    last_title: Mutex<Option<String>>,
}

impl VisibilitySink for CountingSink {
    fn become_visible(&self, indicator: &Indicator) {
        self.visible.fetch_add(1, Ordering::SeqCst);
        *self.last_title.lock().unwrap() = Some(indicator.title.clone());
    }

    fn become_invisible(&self) {
        self.invisible.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Recorder {
    runs: Mutex<Vec<u16>>,
    errors: Mutex<Vec<(u16, String)>>,
    stopped: Mutex<Vec<u16>>,
    stop_all_calls: AtomicUsize,
}

impl RunListener for Recorder {
    fn on_run(&self, port: u16) {
        self.runs.lock().unwrap().push(port);
    }

    fn on_error(&self, port: u16, error: &Error) {
        self.errors.lock().unwrap().push((port, error.code().to_string()));
    }
}

impl StopListener for Recorder {
    fn on_stopped(&self, port: u16) {
        self.stopped.lock().unwrap().push(port);
    }

    fn on_error(&self, port: u16, error: &Error) {
        self.errors.lock().unwrap().push((port, error.code().to_string()));
    }

    fn on_stop_all(&self, _report: &StopReport) {
        self.stop_all_calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn supervisor(spawner: ScriptedSpawner) -> (Arc<DaemonSupervisor>, Arc<ScriptedSpawner>, Arc<CountingSink>) {
    let spawner = Arc::new(spawner);
    let sink = Arc::new(CountingSink::default());
    let supervisor = Arc::new(DaemonSupervisor::new(
        Arc::clone(&spawner) as Arc<dyn Spawner>,
        Arc::clone(&sink) as Arc<dyn VisibilitySink>,
    ));
    (supervisor, spawner, sink)
}

fn ports(range: (u16, u16)) -> PortRange {
    PortRange::new(range.0, range.1).unwrap()
}

#[tokio::test]
async fn test_list_matches_reported_runs() {
    let (sup, _, _) = supervisor(ScriptedSpawner::default());
    let recorder = Arc::new(Recorder::default());

    let report = sup.start(ports((5555, 5558)), recorder.clone()).await.unwrap();
    assert_eq!(report.running_ports(), vec![5555, 5556, 5557, 5558]);

    let mut runs = recorder.runs.lock().unwrap().clone();
    runs.sort_unstable();
    let listed: Vec<u16> = sup.run_list().await.unwrap().iter().map(|d| d.port).collect();
    assert_eq!(listed, runs);
    assert!(sup.run_list().await.unwrap().iter().all(|d| d.pid.is_some()));
}

#[tokio::test]
async fn test_stop_all_empties_registry() {
    let (sup, spawner, _) = supervisor(ScriptedSpawner::default());
    sup.start(ports((5555, 5556)), Arc::new(NoopListener)).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let report = sup.stop_all(recorder.clone()).await.unwrap();

    assert_eq!(report.stopped, vec![5555, 5556]);
    assert!(report.failed.is_empty());
    assert!(sup.run_list().await.unwrap().is_empty());
    assert_eq!(recorder.stop_all_calls.load(Ordering::SeqCst), 1);

    let mut terminated = spawner.journal.terminated.lock().unwrap().clone();
    terminated.sort_unstable();
    assert_eq!(terminated, vec![5555, 5556]);
}

#[tokio::test]
async fn test_visibility_fires_once_per_transition() {
    let (sup, _, sink) = supervisor(ScriptedSpawner::default());

    sup.start(ports((5555, 5558)), Arc::new(NoopListener)).await.unwrap();
    assert_eq!(sink.visible.load(Ordering::SeqCst), 1);
    assert_eq!(sink.last_title.lock().unwrap().as_deref(), Some("Adbd"));
    assert!(sup.is_visible());

    sup.stop_all(Arc::new(NoopListener)).await.unwrap();
    assert_eq!(sink.invisible.load(Ordering::SeqCst), 1);
    assert_eq!(sink.visible.load(Ordering::SeqCst), 1);
    assert!(!sup.is_visible());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_starts_spawn_each_port_once() {
    let spawner = ScriptedSpawner { delay: Duration::from_millis(50), ..Default::default() };
    let (sup, spawner, sink) = supervisor(spawner);
    let recorder = Arc::new(Recorder::default());

    let a = sup.start(ports((5555, 5557)), recorder.clone());
    let b = sup.start(ports((5555, 5557)), recorder.clone());
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert_eq!(a.running_ports().len() + b.running_ports().len(), 3);
    assert_eq!(spawner.journal.spawned.lock().unwrap().len(), 3);
    assert_eq!(sup.run_list().await.unwrap().len(), 3);

    let errors = recorder.errors.lock().unwrap();
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|(_, code)| code == "ALREADY_RUNNING"));
    assert_eq!(sink.visible.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_partial_failure_keeps_successes() {
    let spawner = ScriptedSpawner { fail_spawn: HashSet::from([5556]), ..Default::default() };
    let (sup, _, sink) = supervisor(spawner);
    let recorder = Arc::new(Recorder::default());

    let report = sup.start(ports((5555, 5556)), recorder.clone()).await.unwrap();

    assert_eq!(report.running_ports(), vec![5555]);
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, 5556);
    assert!(matches!(failures[0].1, Error::SpawnFailed { port: 5556, .. }));
    assert_eq!(*recorder.errors.lock().unwrap(), vec![(5556, "SPAWN_FAILED".to_string())]);
    assert_eq!(sink.visible.load(Ordering::SeqCst), 1);

    // A failed port is free for a later attempt.
    assert!(sup.registry().reserve(5556).is_ok());
}

#[tokio::test]
async fn test_all_failures_never_become_visible() {
    let spawner = ScriptedSpawner { fail_spawn: HashSet::from([6000, 6001]), ..Default::default() };
    let (sup, _, sink) = supervisor(spawner);

    let report = sup.start(ports((6000, 6001)), Arc::new(NoopListener)).await.unwrap();

    assert!(report.running_ports().is_empty());
    assert_eq!(sink.visible.load(Ordering::SeqCst), 0);
    assert!(sup.registry().is_empty());
}

#[tokio::test]
async fn test_stop_all_on_empty_registry_is_noop() {
    let (sup, _, sink) = supervisor(ScriptedSpawner::default());
    let recorder = Arc::new(Recorder::default());

    let report = sup.stop_all(recorder.clone()).await.unwrap();

    assert!(report.stopped.is_empty());
    assert!(report.failed.is_empty());
    assert_eq!(sink.invisible.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.stop_all_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_stop_all_cancels_in_flight_spawn() {
    let spawner = ScriptedSpawner { delay: Duration::from_millis(300), ..Default::default() };
    let (sup, spawner, sink) = supervisor(spawner);

    let start = sup.start(PortRange::single(5555).unwrap(), Arc::new(NoopListener));
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stop = sup.stop_all(Arc::new(NoopListener)).await.unwrap();
    assert!(stop.stopped.is_empty());

    let report = start.await.unwrap();
    assert!(report.running_ports().is_empty());
    assert!(matches!(report.failures()[0].1, Error::Cancelled(5555)));
    assert!(sup.registry().is_empty());
    assert_eq!(*spawner.journal.terminated.lock().unwrap(), vec![5555]);
    assert_eq!(sink.visible.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_termination_failure_is_reported_and_removed() {
    let spawner = ScriptedSpawner { fail_terminate: HashSet::from([5556]), ..Default::default() };
    let (sup, _, sink) = supervisor(spawner);
    sup.start(ports((5555, 5556)), Arc::new(NoopListener)).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let report = sup.stop_all(recorder.clone()).await.unwrap();

    assert_eq!(report.stopped, vec![5555]);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0], (5556, Error::TerminationFailed { port: 5556, .. })));
    assert_eq!(*recorder.stopped.lock().unwrap(), vec![5555]);
    assert!(sup.registry().is_empty());
    assert_eq!(sink.invisible.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_list_reaps_exited_daemons() {
    let (sup, spawner, sink) = supervisor(ScriptedSpawner::default());
    sup.start(ports((5555, 5556)), Arc::new(NoopListener)).await.unwrap();

    spawner.kill(5555);
    let listed: Vec<u16> = sup.run_list().await.unwrap().iter().map(|d| d.port).collect();
    assert_eq!(listed, vec![5556]);
    assert_eq!(sink.invisible.load(Ordering::SeqCst), 0);

    spawner.kill(5556);
    assert!(sup.run_list().await.unwrap().is_empty());
    assert_eq!(sink.invisible.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_restart_after_stop_becomes_visible_again() {
    let (sup, _, sink) = supervisor(ScriptedSpawner::default());

    sup.start(PortRange::single(5555).unwrap(), Arc::new(NoopListener)).await.unwrap();
    sup.stop_all(Arc::new(NoopListener)).await.unwrap();
    let report = sup.start(PortRange::single(5555).unwrap(), Arc::new(NoopListener)).await.unwrap();

    assert_eq!(report.running_ports(), vec![5555]);
    assert_eq!(sink.visible.load(Ordering::SeqCst), 2);
    assert_eq!(sink.invisible.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_port_stays_claimed_until_termination_confirmed() {
    let spawner = ScriptedSpawner { terminate_delay: Duration::from_millis(400), ..Default::default() };
    let (sup, spawner, sink) = supervisor(spawner);
    sup.start(PortRange::single(5555).unwrap(), Arc::new(NoopListener)).await.unwrap();

    let stop = sup.stop_all(Arc::new(NoopListener));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let listed: Vec<u16> = sup.run_list().await.unwrap().iter().map(|d| d.port).collect();
    assert_eq!(listed, vec![5555]);

    let recorder = Arc::new(Recorder::default());
    let second = sup.start(PortRange::single(5555).unwrap(), recorder.clone()).await.unwrap();
    assert!(second.running_ports().is_empty());
    assert_eq!(*recorder.errors.lock().unwrap(), vec![(5555, "ALREADY_RUNNING".to_string())]);
    assert_eq!(*spawner.journal.spawned.lock().unwrap(), vec![5555]);
    assert!(sup.is_visible());

    let report = stop.await.unwrap();
    assert_eq!(report.stopped, vec![5555]);
    assert!(sup.run_list().await.unwrap().is_empty());
    assert_eq!(sink.invisible.load(Ordering::SeqCst), 1);
}
