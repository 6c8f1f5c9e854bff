//! Per-connection metadata store
//!
//! Typed scratch space that protocol handlers use to pass state along the
//! chain. The key set is fixed: TAG (the rendezvous tag requested by this
//! connection, set by message decoding) and PEER (the matched partner, set
//! exactly once when a pairing completes).

use crate::protocol::Tag;
use crate::remote::{Remote, WeakRemote};
use parking_lot::RwLock;

#[derive(Default)]
struct MetaValues {
    tag: Option<Tag>,
    /// Held weakly so two paired connections do not keep each other alive
    peer: Option<WeakRemote>,
}

/// Metadata attached to one [`Remote`] for its lifetime
#[derive(Default)]
pub struct MetaStore {
    inner: RwLock<MetaValues>,
}

impl MetaStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The rendezvous tag this connection asked for, if any
    pub fn tag(&self) -> Option<Tag> {
        self.inner.read().tag.clone()
    }

    /// Record the requested tag. Overwrites any previous value.
    pub fn set_tag(&self, tag: Tag) {
        self.inner.write().tag = Some(tag);
    }

    /// The matched partner, if a pairing completed and the partner is
    /// still alive
    pub fn peer(&self) -> Option<Remote> {
        self.inner.read().peer.as_ref().and_then(WeakRemote::upgrade)
    }

    /// Whether the PEER slot has been written, regardless of whether the
    /// partner is still alive
    pub fn peer_is_set(&self) -> bool {
        self.inner.read().peer.is_some()
    }

    /// Install the partner link. The slot is write-once: returns `true` if
    /// the link was installed, `false` if a pairing already claimed it.
    pub fn set_peer(&self, peer: &Remote) -> bool {
        let mut inner = self.inner.write();
        if inner.peer.is_some() {
            return false;
        }
        inner.peer = Some(peer.downgrade());
        true
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::OutboundSink;

    fn test_remote() -> Remote {
        let (sink, _rx) = OutboundSink::channel();
        Remote::new(sink)
    }

    #[test]
    fn test_tag_absent_until_set() {
        let meta = MetaStore::new();
        assert!(meta.tag().is_none());

        meta.set_tag(Tag::from("abc"));
        assert_eq!(meta.tag(), Some(Tag::from("abc")));
    }

    #[test]
    fn test_tag_overwrites() {
        let meta = MetaStore::new();
        meta.set_tag(Tag::from("abc"));
        meta.set_tag(Tag::from("xyz"));
        assert_eq!(meta.tag(), Some(Tag::from("xyz")));
    }

    #[test]
    fn test_peer_set_once() {
        let meta = MetaStore::new();
        let first = test_remote();
        let second = test_remote();

        assert!(meta.set_peer(&first));
        assert!(!meta.set_peer(&second));

        // The first link survives
        let peer = meta.peer().expect("peer link lost");
        assert!(peer.same_connection(&first));
    }

    #[test]
    fn test_peer_link_is_weak() {
        let meta = MetaStore::new();
        let peer = test_remote();
        assert!(meta.set_peer(&peer));
        assert!(meta.peer().is_some());

        drop(peer);
        assert!(meta.peer().is_none());
        // The slot itself stays claimed
        assert!(meta.peer_is_set());
    }
}
