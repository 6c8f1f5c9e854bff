//! Connection handle
//!
//! A [`Remote`] represents one live client socket: its connection id, its
//! metadata store, its outbound write sink, and the handler chain installed
//! on accept. Handles are cheap to clone; all clones refer to the same
//! connection.

use crate::handler::Handler;
use crate::id_pool::ClientId;
use crate::meta::MetaStore;
use crate::protocol::OutboundFrame;
use parking_lot::RwLock;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use thiserror::Error;
use tokio::sync::mpsc;

/// Outbound sink error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("outbound channel closed")]
    Closed,
}

/// Write side of one connection's outbound channel.
///
/// Frames pushed here are drained to the socket in program order by the
/// single consumer owned by the acceptor, which serializes writes per
/// connection while leaving different connections independent.
#[derive(Debug, Clone)]
pub struct OutboundSink {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

impl OutboundSink {
    /// Create a sink along with the receiver the writer task drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a frame for this connection
    pub fn send(&self, frame: OutboundFrame) -> Result<(), SinkError> {
        self.tx.send(frame).map_err(|_| SinkError::Closed)
    }
}

struct RemoteInner {
    out: OutboundSink,
    id: OnceLock<ClientId>,
    meta: MetaStore,
    chain: RwLock<Vec<Arc<dyn Handler>>>,
}

/// Handle to one active connection
#[derive(Clone)]
pub struct Remote {
    inner: Arc<RemoteInner>,
}

impl Remote {
    /// Create a bare handle around an outbound sink. The connection id and
    /// handler chain are attached by the creation handler on accept.
    pub fn new(out: OutboundSink) -> Self {
        Self {
            inner: Arc::new(RemoteInner {
                out,
                id: OnceLock::new(),
                meta: MetaStore::new(),
                chain: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Connection id, once assigned
    pub fn id(&self) -> Option<ClientId> {
        self.inner.id.get().copied()
    }

    /// Stamp the connection id. Write-once: returns `false` if an id was
    /// already assigned.
    pub fn assign_id(&self, id: ClientId) -> bool {
        self.inner.id.set(id).is_ok()
    }

    /// Metadata scratch space scoped to this connection
    pub fn meta(&self) -> &MetaStore {
        &self.inner.meta
    }

    /// Outbound write sink
    pub fn out(&self) -> &OutboundSink {
        &self.inner.out
    }

    /// Install the handler chain dispatched for this connection's inbound
    /// events. Replaces any previous chain.
    pub fn install_handlers(&self, handlers: Vec<Arc<dyn Handler>>) {
        *self.inner.chain.write() = handlers;
    }

    /// Snapshot of the installed chain, in dispatch order
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        self.inner.chain.read().clone()
    }

    /// Whether two handles refer to the same underlying connection
    pub fn same_connection(&self, other: &Remote) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Weak handle that does not keep the connection alive
    pub fn downgrade(&self) -> WeakRemote {
        WeakRemote {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("id", &self.id())
            .field("handlers", &self.inner.chain.read().len())
            .finish()
    }
}

/// Weak counterpart of [`Remote`], used for the PEER metadata link
#[derive(Clone)]
pub struct WeakRemote {
    inner: Weak<RemoteInner>,
}

impl WeakRemote {
    /// Upgrade back to a live handle if the connection still exists
    pub fn upgrade(&self) -> Option<Remote> {
        self.inner.upgrade().map(|inner| Remote { inner })
    }
}

// ============================================================================
// TESTS
// ============================================================================
