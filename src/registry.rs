//! Live-connection registry and the adaptive idle timeout.
//!
//! The registry never owns a connection: workers own their sockets and hold a
//! `Registration` that removes their entry when dropped. The only thing read
//! back is the live count, which drives the idle deadline.

use chrono::{DateTime, Utc};
use slab::Slab;
use std::net::SocketAddr;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Bookkeeping for one accepted connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Native socket handle.
    pub fd: RawFd,
    pub peer: SocketAddr,
    pub accepted_at: DateTime<Utc>,
}

/// Registry of live connections using slab allocation.
///
/// All access goes through one mutex so the count a worker reads is never
/// torn by a concurrent accept or close.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<Slab<ConnectionInfo>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Slab<ConnectionInfo>> {
        // A panicked worker cannot leave the slab half-updated
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a connection; the entry lives as long as the returned guard.
    pub fn register(self: &Arc<Self>, fd: RawFd, peer: SocketAddr) -> Registration {
        let info = ConnectionInfo {
            fd,
            peer,
            accepted_at: Utc::now(),
        };
        let id = self.lock().insert(info.clone());
        Registration {
            registry: Arc::clone(self),
            id,
            info,
        }
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: usize) -> bool {
        self.lock().contains(id)
    }

    fn remove(&self, id: usize) {
        let mut connections = self.lock();
        if connections.contains(id) {
            connections.remove(id);
        }
    }
}

/// A worker's membership in the registry.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: usize,
    info: ConnectionInfo,
}

impl Registration {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Time since accept.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.info.accepted_at
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

/// Idle deadline that shrinks as more clients connect: `base / live_count`.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutPolicy {
    base: Duration,
}

impl TimeoutPolicy {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }

    /// Deadline for a worker when `live` connections are registered.
    ///
    /// A count of zero is treated as one.
    pub fn deadline(&self, live: usize) -> Duration {
        let live = u32::try_from(live.max(1)).unwrap_or(u32::MAX);
        self.base / live
    }
}
