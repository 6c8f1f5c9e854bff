//! Puncher Core: rendezvous engine for NAT hole punching
//!
//! Two peers that agree on an opaque tag out-of-band meet through this
//! engine and receive each other's identity, the prerequisite for a
//! direct hole-punched connection. The engine owns the hard parts:
//! race-free pairing under concurrent registration and lookup, safe
//! allocation and reuse of connection ids, per-connection metadata shared
//! across an ordered handler chain, and deterministic best-effort
//! shutdown.
//!
//! The socket acceptor, wire codec, transport security, and process
//! wiring live outside this crate. The acceptor hands in one
//! [`remote::OutboundSink`] per accepted socket; the codec decodes bytes
//! into [`protocol::InboundEvent`]s and frames the
//! [`protocol::OutboundFrame`]s the engine answers with.

pub mod handler;
pub mod id_pool;
pub mod meta;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod shutdown;
pub mod tag_pool;

pub use handler::{ClientCreationHandler, Handler, HandlerError, TagSearchHandler};
pub use id_pool::{ClientId, IdPool, IdPoolError};
pub use meta::MetaStore;
pub use protocol::{InboundEvent, OutboundFrame, Tag, PROTOCOL_VERSION};
pub use remote::{OutboundSink, Remote, SinkError, WeakRemote};
pub use server::{RendezvousServer, RendezvousStats, ServerConfig, ServerError};
pub use shutdown::{ShutdownError, ShutdownPipeline, ShutdownReport, ShutdownStep};
pub use tag_pool::{TagPool, TagPoolError};
