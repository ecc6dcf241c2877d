//! Tracks connections that are still being served so shutdown can wait for
//! them.

use std::collections::HashMap;
use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use super::LISTENER_TARGET;

/// Outcome of draining in-flight connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Connections that finished on their own during the grace period.
    pub completed: usize,
    /// Connections still open when the grace period expired, which were
    /// shut down forcibly.
    pub forced: usize,
}

impl DrainReport {
    /// Returns `true` when no connection had to be forced closed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.forced == 0
    }
}

#[derive(Default)]
struct Connections {
    next_id: u64,
    open: HashMap<u64, UnixStream>,
}

/// Registry of in-flight connections shared by the accept loop and the
/// connection threads.
#[derive(Default)]
pub(crate) struct InFlight {
    connections: Mutex<Connections>,
    idle: Condvar,
}

impl InFlight {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Connections> {
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Records `stream` as in flight until the returned guard drops.
    ///
    /// A duplicate handle is kept so the registry can shut the socket down
    /// without owning the connection.
    pub(crate) fn register(self: &Arc<Self>, stream: &UnixStream) -> io::Result<InFlightGuard> {
        let handle = stream.try_clone()?;
        let mut connections = self.lock();
        let id = connections.next_id;
        connections.next_id = connections.next_id.wrapping_add(1);
        connections.open.insert(id, handle);
        Ok(InFlightGuard {
            registry: Arc::clone(self),
            id,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().open.len()
    }

    fn release(&self, id: u64) {
        let mut connections = self.lock();
        connections.open.remove(&id);
        if connections.open.is_empty() {
            self.idle.notify_all();
        }
    }

    /// Waits until every registered connection has finished or `grace`
    /// elapses, then shuts down whatever remains.
    ///
    /// Callers must stop registering connections before draining.
    pub(crate) fn drain(&self, grace: Duration) -> DrainReport {
        let deadline = Instant::now() + grace;
        let mut connections = self.lock();
        let pending = connections.open.len();
        while !connections.open.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            connections = self
                .idle
                .wait_timeout(connections, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let forced = connections.open.len();
        for (id, stream) in &connections.open {
            debug!(
                target: LISTENER_TARGET,
                event = "connection_forced",
                connection = id,
                "closing connection after grace period"
            );
            if let Err(error) = stream.shutdown(Shutdown::Both)
                && error.kind() != io::ErrorKind::NotConnected
            {
                debug!(
                    target: LISTENER_TARGET,
                    connection = id,
                    error = %error,
                    "failed to shut down connection"
                );
            }
        }
        DrainReport {
            completed: pending.saturating_sub(forced),
            forced,
        }
    }
}

/// Keeps a connection registered while it is being served.
pub(crate) struct InFlightGuard {
    registry: Arc<InFlight>,
    id: u64,
}

impl InFlightGuard {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.release(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;

    #[test]
    fn idle_registry_drains_immediately() {
        let registry = InFlight::new();
        let report = registry.drain(Duration::from_secs(5));
        assert_eq!(report, DrainReport::default());
        assert!(report.is_clean());
    }

    #[test]
    fn drain_waits_for_released_connections() {
        let registry = InFlight::new();
        let (local, _peer) = UnixStream::pair().expect("socket pair");
        let guard = registry.register(&local).expect("register");
        assert_eq!(registry.len(), 1);

        let worker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            drop(guard);
        });
        let report = registry.drain(Duration::from_secs(5));
        worker.join().expect("join worker");

        assert_eq!(
            report,
            DrainReport {
                completed: 1,
                forced: 0
            }
        );
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn stragglers_are_shut_down() {
        let registry = InFlight::new();
        let (mut local, _peer) = UnixStream::pair().expect("socket pair");
        let _guard = registry.register(&local).expect("register");

        let report = registry.drain(Duration::from_millis(20));
        assert_eq!(
            report,
            DrainReport {
                completed: 0,
                forced: 1
            }
        );

        let mut buffer = [0_u8; 8];
        let read = local.read(&mut buffer).expect("read after shutdown");
        assert_eq!(read, 0, "forced shutdown should surface as end of stream");
    }

    #[test]
    fn guards_carry_distinct_ids() {
        let registry = InFlight::new();
        let (first, _a) = UnixStream::pair().expect("socket pair");
        let (second, _b) = UnixStream::pair().expect("socket pair");
        let one = registry.register(&first).expect("register");
        let two = registry.register(&second).expect("register");
        assert_ne!(one.id(), two.id());
    }
}
