//! Rendezvous protocol surface: decoded events in, response frames out
//!
//! The byte-level codec lives outside the core. Inbound bytes are decoded
//! into [`InboundEvent`]s before dispatch; the core answers with
//! [`OutboundFrame`]s that the codec writes back to the wire. Both derive
//! serde so the codec can frame them directly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol version expected by this engine
pub const PROTOCOL_VERSION: u32 = 1;

/// Opaque rendezvous tag.
///
/// Two peers agree on the tag out-of-band; the server attaches no meaning
/// to its content beyond equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag(String);

impl Tag {
    /// Create a tag from its client-supplied representation
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Tag contents as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Tag {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An inbound protocol event, already decoded from wire bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InboundEvent {
    /// The client asks to be paired with whoever else holds `tag`
    TagRequest {
        /// Rendezvous tag shared out-of-band with the partner
        tag: Tag,
    },
}

/// An outbound protocol response produced by the core.
///
/// Endpoint-exchange messages for a completed pairing are emitted by a
/// downstream component that watches for the PEER metadata side effect;
/// they are not part of this enum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundFrame {
    /// Nobody is waiting on the requested tag; the caller has been
    /// registered as the new waiter
    PeerNotFound,
    /// The server is done with this connection
    Halt {
        /// Human-readable reason, e.g. "tag wait expired"
        reason: String,
    },
}

impl fmt::Display for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboundFrame::PeerNotFound => write!(f, "PeerNotFound"),
            OutboundFrame::Halt { reason } => write!(f, "Halt {{ reason: {reason} }}"),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
