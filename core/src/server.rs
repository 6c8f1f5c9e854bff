//! Rendezvous server facade
//!
//! Owns the id pool, the tag pool, the handler chain template, the
//! registry of live connections, and running statistics. The acceptor and
//! wire codec live outside the core: they hand in a fresh outbound sink
//! per accepted socket and decoded events per inbound message.

use crate::handler::{ClientCreationHandler, Handler, HandlerError, TagSearchHandler};
use crate::id_pool::{ClientId, IdPool};
use crate::protocol::{InboundEvent, OutboundFrame};
use crate::remote::{OutboundSink, Remote};
use crate::shutdown::ShutdownStep;
use crate::tag_pool::TagPool;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Rendezvous server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent connections (bounds the id pool)
    pub max_connections: u32,
    /// How long an unmatched waiter may sit in the tag pool
    pub waiter_ttl: Duration,
    /// Window granted to live connections when shutting down
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 1000,
            waiter_ttl: Duration::from_secs(3600), // 1 hour
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Statistics about rendezvous operations
#[derive(Debug, Clone, Default)]
pub struct RendezvousStats {
    /// Number of active connections
    pub connections_active: usize,
    /// Total pairings completed
    pub pairings_completed: u64,
    /// Total tag lookups that found no waiter
    pub lookups_missed: u64,
    /// Total waiters dropped by TTL expiry
    pub waiters_expired: u64,
}

/// Rendezvous server error types
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// The rendezvous server core
pub struct RendezvousServer {
    config: ServerConfig,
    id_pool: Arc<IdPool>,
    tag_pool: Arc<TagPool>,
    creation: ClientCreationHandler,
    /// Live connections keyed by id
    connections: RwLock<HashMap<ClientId, Remote>>,
    accepting: AtomicBool,
    stats: RwLock<RendezvousStats>,
}

impl RendezvousServer {
    /// Create a server with default configuration
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a server with custom configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let id_pool = Arc::new(IdPool::new(config.max_connections));
        let tag_pool = Arc::new(TagPool::new());

        let chain: Vec<Arc<dyn Handler>> =
            vec![Arc::new(TagSearchHandler::new(Arc::clone(&tag_pool)))];
        let creation = ClientCreationHandler::new(Arc::clone(&id_pool), chain);

        Self {
            config,
            id_pool,
            tag_pool,
            creation,
            connections: RwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            stats: RwLock::new(RendezvousStats::default()),
        }
    }

    /// Accept a new connection.
    ///
    /// Runs the creation handler, which allocates the connection id and
    /// installs the handler chain; the returned Remote is fully installed
    /// and eligible for tag matching. Refused once shutdown has begun.
    pub async fn accept(&self, out: OutboundSink) -> Result<Remote, ServerError> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ServerError::ShuttingDown);
        }

        let remote = Remote::new(out);
        self.creation.handle(&remote).await?;

        let id = remote
            .id()
            .expect("creation handler left the id unassigned");
        self.connections.write().insert(id, remote.clone());
        let active = self.connections.read().len();
        self.stats.write().connections_active = active;

        info!(id = %id, "connection accepted");
        Ok(remote)
    }

    /// Dispatch a decoded inbound event through the connection's handler
    /// chain.
    ///
    /// Any handler failure is connection-scoped: this Remote is
    /// disconnected and its resources released, while the accept loop and
    /// sibling connections are unaffected. The error is returned so the
    /// caller can log it, but nothing remains to clean up.
    pub async fn dispatch(&self, remote: &Remote, event: InboundEvent) -> Result<(), ServerError> {
        match event {
            InboundEvent::TagRequest { tag } => remote.meta().set_tag(tag),
        }

        let had_peer = remote.meta().peer_is_set();

        for handler in remote.handlers() {
            if let Err(err) = handler.handle(remote).await {
                warn!(id = ?remote.id(), error = %err, "handler failed, closing connection");
                self.disconnect(remote);
                return Err(err.into());
            }
        }

        let has_peer = remote.meta().peer_is_set();
        let mut stats = self.stats.write();
        if !had_peer && has_peer {
            stats.pairings_completed += 1;
        } else if !has_peer {
            stats.lookups_missed += 1;
        }

        Ok(())
    }

    /// Tear down a connection, releasing its id and any pending tag
    /// registration it owns. Idempotent: a second call is a no-op.
    pub fn disconnect(&self, remote: &Remote) {
        let Some(id) = remote.id() else {
            // Never got through creation; nothing was allocated.
            return;
        };

        if self.connections.write().remove(&id).is_none() {
            return;
        }

        if let Some(tag) = remote.meta().tag() {
            self.tag_pool.unregister_if_waiting(&tag, remote);
        }

        if let Err(err) = self.id_pool.release(id) {
            warn!(id = %id, error = %err, "id release failed on disconnect");
        }

        let active = self.connections.read().len();
        self.stats.write().connections_active = active;
        info!(id = %id, "connection closed");
    }

    /// Drop every waiter older than the configured TTL, telling each to
    /// halt and disconnecting it. Driven periodically by the owner.
    pub fn expire_waiters(&self) {
        let expired = self.tag_pool.expire_waiters(self.config.waiter_ttl);
        if expired.is_empty() {
            return;
        }

        for (tag, remote) in &expired {
            debug!(tag = %tag, id = ?remote.id(), "waiter expired");
            // The sink may already be gone; the disconnect still runs.
            let _ = remote.out().send(OutboundFrame::Halt {
                reason: "tag wait expired".to_string(),
            });
            self.disconnect(remote);
        }

        self.stats.write().waiters_expired += expired.len() as u64;
    }

    /// Snapshot of the current statistics
    pub fn stats(&self) -> RendezvousStats {
        let mut stats = self.stats.read().clone();
        stats.connections_active = self.connections.read().len();
        stats
    }

    /// Whether new connections are still admitted
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Number of connections currently waiting in the tag pool
    pub fn waiting_count(&self) -> usize {
        self.tag_pool.waiting_count()
    }
}

impl Default for RendezvousServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShutdownStep for RendezvousServer {
    fn name(&self) -> &str {
        "rendezvous-server"
    }

    /// Stop accepting, then halt and tear down every live connection.
    /// In-flight handlers finish against the still-registered connection
    /// state; the pipeline's time bound caps the whole drain.
    async fn shutdown(&self) -> anyhow::Result<()> {
        self.accepting.store(false, Ordering::SeqCst);

        let remotes: Vec<Remote> = self.connections.read().values().cloned().collect();
        info!(connections = remotes.len(), "rendezvous server draining");

        for remote in &remotes {
            let _ = remote.out().send(OutboundFrame::Halt {
                reason: "server shutting down".to_string(),
            });
        }

        // Bounded window for in-flight handler executions and writer
        // tasks before the connections are torn down.
        if !remotes.is_empty() {
            tokio::time::sleep(self.config.shutdown_grace).await;
        }

        for remote in &remotes {
            self.disconnect(remote);
        }

        info!("rendezvous server shutdown complete");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Tag;

    #[tokio::test]
    async fn test_accept_assigns_unique_ids() {
        let server = RendezvousServer::new();

        let (sink_a, _rx_a) = OutboundSink::channel();
        let (sink_b, _rx_b) = OutboundSink::channel();
        let a = server.accept(sink_a).await.unwrap();
        let b = server.accept(sink_b).await.unwrap();

        assert_ne!(a.id(), b.id());
        assert_eq!(server.stats().connections_active, 2);
    }

    #[tokio::test]
    async fn test_disconnect_releases_id_for_reuse() {
        let server = RendezvousServer::with_config(ServerConfig {
            max_connections: 1,
            ..Default::default()
        });

        let (sink, _rx) = OutboundSink::channel();
        let remote = server.accept(sink).await.unwrap();
        let first_id = remote.id().unwrap();

        server.disconnect(&remote);
        assert_eq!(server.stats().connections_active, 0);

        let (sink, _rx) = OutboundSink::channel();
        let again = server.accept(sink).await.unwrap();
        assert_eq!(again.id(), Some(first_id));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let server = RendezvousServer::new();
        let (sink, _rx) = OutboundSink::channel();
        let remote = server.accept(sink).await.unwrap();

        server.disconnect(&remote);
        server.disconnect(&remote);
        assert_eq!(server.stats().connections_active, 0);
    }

    #[tokio::test]
    async fn test_disconnect_removes_pending_waiter() {
        let server = RendezvousServer::new();

        let (sink, _rx) = OutboundSink::channel();
        let remote = server.accept(sink).await.unwrap();
        server
            .dispatch(
                &remote,
                InboundEvent::TagRequest {
                    tag: Tag::from("abc"),
                },
            )
            .await
            .unwrap();
        assert_eq!(server.waiting_count(), 1);

        server.disconnect(&remote);
        assert_eq!(server.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_handler_failure_closes_only_that_connection() {
        let server = RendezvousServer::new();

        let (sink_a, _rx_a) = OutboundSink::channel();
        let healthy = server.accept(sink_a).await.unwrap();

        // This connection's outbound side is already gone, so answering
        // PeerNotFound must fail.
        let (sink_b, rx_b) = OutboundSink::channel();
        let doomed = server.accept(sink_b).await.unwrap();
        drop(rx_b);

        let err = server
            .dispatch(
                &doomed,
                InboundEvent::TagRequest {
                    tag: Tag::from("abc"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Handler(_)));

        // The doomed connection is gone, the healthy one is untouched
        assert_eq!(server.stats().connections_active, 1);
        let id = healthy.id().unwrap();
        assert!(server.connections.read().contains_key(&id));
    }

    #[tokio::test]
    async fn test_stats_track_pairings_and_misses() {
        let server = RendezvousServer::new();

        let (sink_a, _rx_a) = OutboundSink::channel();
        let a = server.accept(sink_a).await.unwrap();
        server
            .dispatch(
                &a,
                InboundEvent::TagRequest {
                    tag: Tag::from("abc"),
                },
            )
            .await
            .unwrap();

        let (sink_b, _rx_b) = OutboundSink::channel();
        let b = server.accept(sink_b).await.unwrap();
        server
            .dispatch(
                &b,
                InboundEvent::TagRequest {
                    tag: Tag::from("abc"),
                },
            )
            .await
            .unwrap();

        let stats = server.stats();
        assert_eq!(stats.lookups_missed, 1);
        assert_eq!(stats.pairings_completed, 1);
    }

    #[tokio::test]
    async fn test_expire_waiters_halts_and_disconnects() {
        let server = RendezvousServer::with_config(ServerConfig {
            waiter_ttl: Duration::from_millis(1),
            ..Default::default()
        });

        let (sink, mut rx) = OutboundSink::channel();
        let remote = server.accept(sink).await.unwrap();
        server
            .dispatch(
                &remote,
                InboundEvent::TagRequest {
                    tag: Tag::from("abc"),
                },
            )
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::PeerNotFound);

        tokio::time::sleep(Duration::from_millis(20)).await;
        server.expire_waiters();

        assert_eq!(server.waiting_count(), 0);
        assert_eq!(server.stats().connections_active, 0);
        assert_eq!(server.stats().waiters_expired, 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            OutboundFrame::Halt {
                reason: "tag wait expired".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_accept_refused_after_shutdown() {
        let server = RendezvousServer::new();
        ShutdownStep::shutdown(&server).await.unwrap();

        let (sink, _rx) = OutboundSink::channel();
        let err = server.accept(sink).await.unwrap_err();
        assert!(matches!(err, ServerError::ShuttingDown));
    }

    #[tokio::test]
    async fn test_shutdown_drains_connections() {
        let server = RendezvousServer::with_config(ServerConfig {
            shutdown_grace: Duration::from_millis(1),
            ..Default::default()
        });

        let (sink, mut rx) = OutboundSink::channel();
        let remote = server.accept(sink).await.unwrap();
        server
            .dispatch(
                &remote,
                InboundEvent::TagRequest {
                    tag: Tag::from("abc"),
                },
            )
            .await
            .unwrap();

        ShutdownStep::shutdown(&server).await.unwrap();

        assert_eq!(server.stats().connections_active, 0);
        assert_eq!(server.waiting_count(), 0);
        assert!(!server.is_accepting());

        assert_eq!(rx.try_recv().unwrap(), OutboundFrame::PeerNotFound);
        assert_eq!(
            rx.try_recv().unwrap(),
            OutboundFrame::Halt {
                reason: "server shutting down".to_string()
            }
        );
    }
}
