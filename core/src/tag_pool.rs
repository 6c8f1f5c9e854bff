//! Tag pool: the pairing engine
//!
//! Holds at most one waiting connection per tag and atomically matches it
//! against a later lookup. All operations take the same lock over the tag
//! map, so two near-simultaneous lookups for one tag can never both
//! succeed; the lock is never held across I/O.

use crate::protocol::Tag;
use crate::remote::Remote;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Tag pool error types
#[derive(Debug, Clone, Error)]
pub enum TagPoolError {
    #[error("a peer is already waiting on tag {0}")]
    TagConflict(Tag),
}

#[derive(Debug)]
struct Waiter {
    remote: Remote,
    registered_at: Instant,
}

/// Maps each tag to the single connection waiting on it
#[derive(Default)]
pub struct TagPool {
    waiters: RwLock<HashMap<Tag, Waiter>>,
}

impl TagPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `remote` as the sole waiter for `tag`.
    ///
    /// A second registration for an occupied tag is rejected rather than
    /// silently overwriting or queueing, so an already-waiting peer is
    /// never lost invisibly.
    pub fn register(&self, tag: Tag, remote: Remote) -> Result<(), TagPoolError> {
        let mut waiters = self.waiters.write();

        if waiters.contains_key(&tag) {
            return Err(TagPoolError::TagConflict(tag));
        }

        debug!(tag = %tag, id = ?remote.id(), "registered waiter");
        waiters.insert(
            tag,
            Waiter {
                remote,
                registered_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Atomically test for and remove the current waiter for `tag`.
    ///
    /// The compare-and-clear primitive pairing correctness rests on:
    /// exactly one caller can receive a given waiter.
    pub fn find_and_remove(&self, tag: &Tag) -> Option<Remote> {
        let removed = self.waiters.write().remove(tag);

        if let Some(waiter) = removed {
            debug!(tag = %tag, id = ?waiter.remote.id(), "matched waiter");
            Some(waiter.remote)
        } else {
            None
        }
    }

    /// Remove the waiting entry for `tag` only if it still refers to
    /// `remote`. Returns whether an entry was removed.
    ///
    /// Used when a waiting connection disconnects before being matched;
    /// the identity check keeps a newer waiter that reused the tag safe.
    pub fn unregister_if_waiting(&self, tag: &Tag, remote: &Remote) -> bool {
        let mut waiters = self.waiters.write();

        match waiters.get(tag) {
            Some(waiter) if waiter.remote.same_connection(remote) => {
                waiters.remove(tag);
                debug!(tag = %tag, id = ?remote.id(), "unregistered waiter");
                true
            }
            _ => false,
        }
    }

    /// Remove every waiter registered longer than `max_age` ago and return
    /// them with their tags, so the owner can notify and disconnect each.
    /// The pool keeps no timer of its own.
    pub fn expire_waiters(&self, max_age: Duration) -> Vec<(Tag, Remote)> {
        let mut waiters = self.waiters.write();
        let now = Instant::now();

        let expired_tags: Vec<Tag> = waiters
            .iter()
            .filter(|(_, waiter)| now.duration_since(waiter.registered_at) > max_age)
            .map(|(tag, _)| tag.clone())
            .collect();

        expired_tags
            .into_iter()
            .filter_map(|tag| {
                waiters.remove(&tag).map(|waiter| {
                    debug!(tag = %tag, id = ?waiter.remote.id(), "expired waiter");
                    (tag, waiter.remote)
                })
            })
            .collect()
    }

    /// Number of connections currently waiting
    pub fn waiting_count(&self) -> usize {
        self.waiters.read().len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
