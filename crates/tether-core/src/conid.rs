//! Connection identity.
//!
//! A [`ConId`] names one established duplex endpoint. It is assigned when the
//! handshake completes and never changes afterwards; callbacks and logs refer
//! to connections exclusively through it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Which side initiated the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConRole {
    /// Client side; dialed the peer.
    Initiator,
    /// Server side; accepted from the listener.
    Acceptor,
}

/// Identity metadata for an established connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConId {
    /// Role of this endpoint.
    pub role: ConRole,
    /// Diagnostic label, defaults to `"clt"` / `"svc"`.
    pub name: String,
    /// Local address, if known.
    pub local: Option<SocketAddr>,
    /// Peer address, if known.
    pub peer: Option<SocketAddr>,
}

impl ConId {
    /// Identity for a client-side connection.
    pub fn initiator(name: Option<&str>, local: Option<SocketAddr>, peer: Option<SocketAddr>) -> Self {
        Self {
            role: ConRole::Initiator,
            name: name.unwrap_or("clt").to_string(),
            local,
            peer,
        }
    }

    /// Identity for a server-side connection.
    pub fn acceptor(name: Option<&str>, local: Option<SocketAddr>, peer: Option<SocketAddr>) -> Self {
        Self {
            role: ConRole::Acceptor,
            name: name.unwrap_or("svc").to_string(),
            local,
            peer,
        }
    }

    /// The diagnostic label.
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn addr_or_pending(addr: &Option<SocketAddr>) -> String {
    match addr {
        Some(a) => a.to_string(),
        None => "pending".to_string(),
    }
}

impl fmt::Display for ConId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = addr_or_pending(&self.local);
        let peer = addr_or_pending(&self.peer);
        match self.role {
            ConRole::Initiator => write!(f, "Initiator({}@{}->{})", self.name, local, peer),
            ConRole::Acceptor => write!(f, "Acceptor({}@{}<-{})", self.name, local, peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_names() {
        let clt = ConId::initiator(None, None, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(clt.name(), "clt");
        assert_eq!(clt.role, ConRole::Initiator);

        let svc = ConId::acceptor(None, Some("127.0.0.1:8080".parse().unwrap()), None);
        assert_eq!(svc.name(), "svc");
        assert_eq!(svc.role, ConRole::Acceptor);
    }

    #[test]
    fn display_shapes() {
        let clt = ConId::initiator(Some("sim"), None, Some("127.0.0.1:8080".parse().unwrap()));
        assert_eq!(clt.to_string(), "Initiator(sim@pending->127.0.0.1:8080)");

        let svc = ConId::acceptor(None, Some("127.0.0.1:8080".parse().unwrap()), None);
        assert_eq!(svc.to_string(), "Acceptor(svc@127.0.0.1:8080<-pending)");
    }
}
