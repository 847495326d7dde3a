use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::process::ProcessHandle;
use crate::Error;

const SHARDS: usize = 16;

/// Acquire a lock, recovering from poisoned state.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One daemon believed to be running on `port`.
pub struct DaemonInstance {
    pub port: u16,
    pub process: Box<dyn ProcessHandle>,
    pub started_at: DateTime<Utc>,
}

impl DaemonInstance {
    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            port: self.port,
            pid: self.process.pid(),
            started_at: self.started_at,
        }
    }
}

/// Copy-out view of a running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonStatus {
    pub port: u16,
    pub pid: Option<u32>,
    pub started_at: DateTime<Utc>,
}

enum Slot {
    /// Spawn in flight; not visible in snapshots.
    Reserved { epoch: u64 },
    Running(DaemonInstance),
    /// Handed out for termination; still owns the port until confirmed.
    Stopping(DaemonStatus),
}

/// Claim on a port taken before spawning. Consumed by `commit` or `release`.
#[derive(Debug)]
#[must_use]
pub struct Reservation {
    port: u16,
    epoch: u64,
}

impl Reservation {
    pub fn port(&self) -> u16 {
        self.port
    }
}

/// An insert the registry refused; the process is handed back so the caller
/// can tear it down.
pub struct Rejected {
    pub error: Error,
    pub process: Box<dyn ProcessHandle>,
}

impl std::fmt::Debug for Rejected {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rejected").field("error", &self.error).finish()
    }
}

/// Thread-safe port → daemon mapping.
///
/// Ports are spread over independently locked shards so large ranges do not
/// serialize on one lock. Whole-registry views (`snapshot`, `begin_stop_all`)
/// take every shard lock in index order, which keeps them atomic.
pub struct DaemonRegistry {
    shards: Vec<Mutex<BTreeMap<u16, Slot>>>,
    epoch: AtomicU64,
}

impl Default for DaemonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonRegistry {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(BTreeMap::new())).collect(),
            epoch: AtomicU64::new(0),
        }
    }

    fn shard(&self, port: u16) -> &Mutex<BTreeMap<u16, Slot>> {
        &self.shards[port as usize % SHARDS]
    }

    fn lock_all(&self) -> Vec<MutexGuard<'_, BTreeMap<u16, Slot>>> {
        self.shards.iter().map(lock).collect()
    }

    /// Claim `port` ahead of a spawn attempt.
    pub fn reserve(&self, port: u16) -> Result<Reservation, Error> {
        let mut shard = lock(self.shard(port));
        if shard.contains_key(&port) {
            return Err(Error::AlreadyRunning(port));
        }
        let epoch = self.epoch.load(Ordering::SeqCst);
        shard.insert(port, Slot::Reserved { epoch });
        Ok(Reservation { port, epoch })
    }

    /// Turn a reservation into a running instance. Fails with `Cancelled`
    /// when a stop-all happened while the spawn was in flight.
    pub fn commit(
        &self,
        reservation: Reservation,
        process: Box<dyn ProcessHandle>,
    ) -> Result<(), Rejected> {
        let port = reservation.port;
        let mut shard = lock(self.shard(port));
        let current = self.epoch.load(Ordering::SeqCst);
        match shard.get(&port) {
            Some(Slot::Reserved { epoch }) if *epoch == reservation.epoch && *epoch == current => {
                shard.insert(
                    port,
                    Slot::Running(DaemonInstance { port, process, started_at: Utc::now() }),
                );
                Ok(())
            }
            Some(Slot::Reserved { epoch }) if *epoch == reservation.epoch => {
                shard.remove(&port);
                Err(Rejected { error: Error::Cancelled(port), process })
            }
            _ => Err(Rejected { error: Error::Cancelled(port), process }),
        }
    }

    /// Drop a reservation whose spawn failed.
    pub fn release(&self, reservation: Reservation) {
        let mut shard = lock(self.shard(reservation.port));
        if let Some(Slot::Reserved { epoch }) = shard.get(&reservation.port) {
            if *epoch == reservation.epoch {
                shard.remove(&reservation.port);
            }
        }
    }

    /// Insert an already-spawned process. Fails with `AlreadyRunning` if the
    /// port is taken.
    pub fn insert(&self, port: u16, process: Box<dyn ProcessHandle>) -> Result<(), Rejected> {
        match self.reserve(port) {
            Ok(reservation) => self.commit(reservation, process),
            Err(error) => Err(Rejected { error, process }),
        }
    }

    /// Remove the running instance on `port`, if any.
    pub fn remove(&self, port: u16) -> Option<DaemonInstance> {
        let mut shard = lock(self.shard(port));
        match shard.get(&port) {
            Some(Slot::Running(_)) => match shard.remove(&port) {
                Some(Slot::Running(instance)) => Some(instance),
                _ => None,
            },
            _ => None,
        }
    }

    /// Running instances in ascending port order.
    pub fn snapshot(&self) -> Vec<DaemonStatus> {
        let shards = self.lock_all();
        let mut out: Vec<DaemonStatus> = shards
            .iter()
            .flat_map(|shard| shard.values())
            .filter_map(|slot| match slot {
                Slot::Running(instance) => Some(instance.status()),
                Slot::Stopping(status) => Some(status.clone()),
                Slot::Reserved { .. } => None,
            })
            .collect();
        out.sort_by_key(|s| s.port);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.running_count() == 0
    }

    /// Instances that hold a port: running or awaiting confirmed termination.
    pub fn running_count(&self) -> usize {
        self.lock_all()
            .iter()
            .map(|shard| {
                shard
                    .values()
                    .filter(|s| matches!(s, Slot::Running(_) | Slot::Stopping(_)))
                    .count()
            })
            .sum()
    }

    /// Invalidate in-flight reservations and hand out every running instance
    /// for termination, in port order. Each port stays claimed (and listed)
    /// until `finish_stop` confirms it.
    pub fn begin_stop_all(&self) -> Vec<DaemonInstance> {
        let mut shards = self.lock_all();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let mut stopping = Vec::new();
        for shard in shards.iter_mut() {
            let ports: Vec<u16> = shard
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Running(_)))
                .map(|(port, _)| *port)
                .collect();
            for port in ports {
                let Some(Slot::Running(instance)) = shard.remove(&port) else { continue };
                shard.insert(port, Slot::Stopping(instance.status()));
                stopping.push(instance);
            }
        }
        stopping.sort_by_key(|instance| instance.port);
        stopping
    }

    /// Release a port handed out by `begin_stop_all`, whatever the outcome
    /// of its termination.
    pub fn finish_stop(&self, port: u16) {
        let mut shard = lock(self.shard(port));
        if let Some(Slot::Stopping(_)) = shard.get(&port) {
            shard.remove(&port);
        }
    }

    /// Remove instances whose process has died. Returns their ports.
    pub fn reap_dead(&self) -> Vec<u16> {
        let mut reaped = Vec::new();
        for shard in &self.shards {
            let mut shard = lock(shard);
            let dead: Vec<u16> = shard
                .iter_mut()
                .filter_map(|(port, slot)| match slot {
                    Slot::Running(instance) => (!instance.process.is_alive()).then_some(*port),
                    _ => None,
                })
                .collect();
            for port in dead {
                shard.remove(&port);
                reaped.push(port);
            }
        }
        reaped.sort_unstable();
        reaped
    }
}
