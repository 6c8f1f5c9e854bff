//! Protocol handler chain
//!
//! Each connection carries an ordered list of handlers, each performing
//! one unit of protocol work against the connection's [`Remote`]. A
//! handler failure is connection-scoped: the dispatcher closes that
//! connection and the failure never reaches the accept loop or sibling
//! connections.

use crate::id_pool::{IdPool, IdPoolError};
use crate::protocol::OutboundFrame;
use crate::remote::{Remote, SinkError};
use crate::tag_pool::{TagPool, TagPoolError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Handler error types. Any of these during dispatch terminates the
/// connection it occurred on.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// A metadata key that decoding must populate before dispatch was
    /// absent. An internal invariant violation, not a user error.
    #[error("required metadata missing: {0}")]
    MissingMetadata(&'static str),
    #[error(transparent)]
    IdPool(#[from] IdPoolError),
    #[error(transparent)]
    TagPool(#[from] TagPoolError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// One unit of protocol work against a connection
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, remote: &Remote) -> Result<(), HandlerError>;
}

/// Bootstraps a freshly accepted connection: allocates its id and installs
/// the rest of the handler chain. Runs exactly once, on accept, before the
/// connection can participate in tag matching.
pub struct ClientCreationHandler {
    id_pool: Arc<IdPool>,
    chain: Vec<Arc<dyn Handler>>,
}

impl ClientCreationHandler {
    /// `chain` is the template installed on every accepted connection, in
    /// dispatch order.
    pub fn new(id_pool: Arc<IdPool>, chain: Vec<Arc<dyn Handler>>) -> Self {
        Self { id_pool, chain }
    }
}

#[async_trait]
impl Handler for ClientCreationHandler {
    async fn handle(&self, remote: &Remote) -> Result<(), HandlerError> {
        let id = self.id_pool.allocate()?;
        remote.assign_id(id);
        remote.install_handlers(self.chain.clone());
        debug!(id = %id, "connection bootstrapped");
        Ok(())
    }
}

/// Pairs a connection with whoever waits on its requested tag.
///
/// Reads TAG from metadata (populated by message decoding before
/// dispatch). A hit removes the waiter atomically and links both sides'
/// PEER metadata; a miss answers PeerNotFound and registers the caller as
/// the new waiter.
pub struct TagSearchHandler {
    tag_pool: Arc<TagPool>,
}

impl TagSearchHandler {
    pub fn new(tag_pool: Arc<TagPool>) -> Self {
        Self { tag_pool }
    }
}

#[async_trait]
impl Handler for TagSearchHandler {
    async fn handle(&self, remote: &Remote) -> Result<(), HandlerError> {
        let tag = remote
            .meta()
            .tag()
            .ok_or(HandlerError::MissingMetadata("tag"))?;

        match self.tag_pool.find_and_remove(&tag) {
            Some(peer) => {
                // The removal was exclusive, so nobody else can touch this
                // waiter; linking both sides here is race-free.
                peer.meta().set_peer(remote);
                remote.meta().set_peer(&peer);
                info!(tag = %tag, a = ?peer.id(), b = ?remote.id(), "pairing completed");
            }
            None => {
                remote.out().send(OutboundFrame::PeerNotFound)?;
                self.tag_pool.register(tag, remote.clone())?;
            }
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
