//! Connection id allocation
//!
//! Every live connection holds a small integer id, unique for as long as
//! the connection is alive. Freed ids are reused lowest-first so the id
//! space stays compact instead of growing with every accept.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Identifier for one active connection. Ids start at 1 and are reissued
/// only after release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u32);

impl ClientId {
    /// Raw integer value
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Id pool error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdPoolError {
    #[error("id pool exhausted")]
    Exhausted,
    #[error("id {0} is not currently allocated")]
    InvalidRelease(ClientId),
}

#[derive(Debug)]
struct IdPoolInner {
    /// Ids currently held by live connections
    in_use: BTreeSet<u32>,
    /// Released ids available for reuse
    free: BTreeSet<u32>,
    /// Next never-issued id
    next: u32,
}

/// Bounded allocator for connection ids.
///
/// Allocate and release are cheap and never block on I/O; all state sits
/// behind a single mutex.
#[derive(Debug)]
pub struct IdPool {
    capacity: u32,
    inner: Mutex<IdPoolInner>,
}

impl IdPool {
    /// Create a pool that will hand out at most `capacity` ids at a time
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            inner: Mutex::new(IdPoolInner {
                in_use: BTreeSet::new(),
                free: BTreeSet::new(),
                next: 1,
            }),
        }
    }

    /// Allocate an unused id
    pub fn allocate(&self) -> Result<ClientId, IdPoolError> {
        let mut inner = self.inner.lock();

        let raw = if let Some(lowest) = inner.free.pop_first() {
            lowest
        } else if inner.in_use.len() < self.capacity as usize {
            let raw = inner.next;
            inner.next += 1;
            raw
        } else {
            return Err(IdPoolError::Exhausted);
        };

        inner.in_use.insert(raw);
        debug!(id = raw, "allocated connection id");
        Ok(ClientId(raw))
    }

    /// Return an id to the free set
    pub fn release(&self, id: ClientId) -> Result<(), IdPoolError> {
        let mut inner = self.inner.lock();

        if !inner.in_use.remove(&id.0) {
            return Err(IdPoolError::InvalidRelease(id));
        }

        inner.free.insert(id.0);
        debug!(id = id.0, "released connection id");
        Ok(())
    }

    /// Number of ids currently held by live connections
    pub fn allocated_count(&self) -> usize {
        self.inner.lock().in_use.len()
    }

    /// Maximum number of simultaneously allocated ids
    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

// ============================================================================
// TESTS
// ============================================================================
