//! Core model for the tether messaging engine.
//!
//! This crate provides the transport-independent primitives shared by both
//! connection roles: connection identity, the callback pipeline invoked on
//! every send/receive event, structural message filters, and an in-memory
//! event store used to synchronize tests. Applications define their own
//! message content; the engine only dispatches it.

mod callback;
mod conid;
mod filter;
mod filtered;
mod store;

pub use callback::{
    Callback, CallbackChain, CounterCallback, DevNullCallback, LoggerCallback, dispatch_recv,
    dispatch_sent,
};
pub use conid::{ConId, ConRole};
pub use filter::Filter;
pub use filtered::FilteredCallback;
pub use store::{Direction, MemoryStore, StoredEvent, poll_quantum};

/// Opaque structured payload exchanged over a connection.
///
/// By convention a message is a single-key object mapping a variant tag to
/// its fields, e.g. `{"Ping": {"ty": "P", "text": "ping"}}`. The engine never
/// inspects content except through [`Filter`] matching.
pub type Message = serde_json::Value;
