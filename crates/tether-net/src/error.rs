//! Engine error taxonomy.
//!
//! Errors from caller-invoked operations propagate synchronously; errors in
//! background loops (acceptor, auto retry) are logged and observable only
//! through state queries. Callback panics are caught and logged at the
//! dispatch site and never surface here.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Error returned by engine operations.
#[derive(Debug, Error)]
pub enum NetError {
    /// A single connect attempt was refused or failed outright.
    #[error("connect to {addr} failed: {source}")]
    Connect { addr: String, source: io::Error },

    /// A single connect attempt exceeded its deadline.
    #[error("connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    /// The listening socket could not be bound.
    #[error("bind to {addr} failed: {source}")]
    Bind { addr: String, source: io::Error },

    /// An operation required a live connection and none exists.
    #[error("no live connection")]
    NotConnected,

    /// The send queue did not accept the message before the deadline.
    #[error("send timed out after {timeout:?}")]
    SendTimeout { timeout: Duration },

    /// Mid-stream IO failure.
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
}
