//! Connection lifecycle and message dispatch engine.
//!
//! Symmetric client ([`Clt`]) and server ([`Svc`]) roles over TCP, each in a
//! manual variant (caller controls lifecycle) and an auto variant
//! ([`CltAuto`], [`SvcAuto`]; the engine retries connect/bind in the
//! background). Every message sent or received on a connection is delivered
//! to the configured callback pipeline from `tether-core`.
//!
//! Wire format: one JSON object per line over the stream. The engine treats
//! message content as opaque; codec correctness beyond framing is the
//! application's contract.

mod clt;
mod config;
mod conn;
mod error;
mod pool;
mod svc;

pub use clt::{Clt, CltAuto};
pub use config::{CltConfig, SvcConfig};
pub use conn::Connection;
pub use error::NetError;
pub use pool::ConnectionPool;
pub use svc::{Svc, SvcAuto};
