//! Pool of live server-side connections.
//!
//! The acceptor task hands freshly accepted connections over a bounded
//! channel; pool queries drain-and-merge that channel before answering, so a
//! connection sitting in the hand-off never makes a probe conclude "not
//! connected" spuriously. The only component that removes an entry is the
//! dying connection's own IO task, through the close hook installed at
//! accept time.

use crate::conn::Connection;
use crate::error::NetError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tether_core::Message;
use tokio::sync::mpsc;

struct PoolInner {
    members: Mutex<HashMap<u64, Connection>>,
    pending: Mutex<mpsc::Receiver<(u64, Connection)>>,
    next_key: AtomicU64,
    capacity: usize,
}

/// Membership tracker for a `Svc`'s live connections.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Pool bounded at `capacity` members, plus the sender side of its
    /// hand-off channel.
    pub(crate) fn new(capacity: usize) -> (Self, mpsc::Sender<(u64, Connection)>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let inner = Arc::new(PoolInner {
            members: Mutex::new(HashMap::new()),
            pending: Mutex::new(rx),
            next_key: AtomicU64::new(0),
            capacity,
        });
        (Self { inner }, tx)
    }

    pub(crate) fn next_key(&self) -> u64 {
        self.inner.next_key.fetch_add(1, Ordering::SeqCst)
    }

    /// Close hook for the connection stored under `key`: self-removal is the
    /// single authoritative signal of death.
    pub(crate) fn remover(&self, key: u64) -> Box<dyn FnOnce() + Send> {
        let inner = Arc::downgrade(&self.inner);
        Box::new(move || remove(&inner, key))
    }

    /// Merges connections waiting in the hand-off channel into membership.
    pub fn drain_pending(&self) {
        let mut pending = self.inner.pending.lock().unwrap();
        while let Ok((key, conn)) = pending.try_recv() {
            self.insert(key, conn);
        }
    }

    fn insert(&self, key: u64, conn: Connection) {
        let mut members = self.inner.members.lock().unwrap();
        if members.len() >= self.inner.capacity {
            tracing::warn!(
                "Pool at capacity ({}), dropping {}",
                self.inner.capacity,
                conn
            );
            drop(members);
            conn.close();
            return;
        }
        tracing::debug!("Adding {} to pool", conn);
        members.insert(key, conn);
        // The close hook may have fired while the entry was still pending.
        if members.get(&key).is_some_and(|c| !c.is_open()) {
            members.remove(&key);
        }
    }

    /// Is any member currently live? Call [`Self::drain_pending`] first when
    /// a just-accepted connection may still be in flight.
    pub fn any_live(&self) -> bool {
        self.inner
            .members
            .lock()
            .unwrap()
            .values()
            .any(|c| c.is_open())
    }

    pub fn len(&self) -> usize {
        self.inner.members.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.members.lock().unwrap().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.members.lock().unwrap().len() >= self.inner.capacity
    }

    pub fn max_connections(&self) -> usize {
        self.inner.capacity
    }

    /// Snapshot of the current members.
    pub fn connections(&self) -> Vec<Connection> {
        self.inner.members.lock().unwrap().values().cloned().collect()
    }

    /// Delivers `msg` to every currently live member.
    ///
    /// A member that dies mid-broadcast is skipped without aborting delivery
    /// to the remainder; its own IO task performs the removal. Errors only
    /// when there is no live member at all.
    pub async fn broadcast(&self, msg: &Message, timeout: Duration) -> Result<(), NetError> {
        self.drain_pending();
        let live: Vec<Connection> = self
            .inner
            .members
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.is_open())
            .cloned()
            .collect();
        if live.is_empty() {
            return Err(NetError::NotConnected);
        }
        for conn in live {
            if let Err(e) = conn.send(msg.clone(), timeout).await {
                tracing::debug!("Skipping {} during broadcast: {}", conn, e);
            }
        }
        Ok(())
    }

    /// Closes every member, drained or pending.
    pub fn close_all(&self) {
        self.drain_pending();
        let members: Vec<Connection> = self.connections();
        for conn in members {
            conn.close();
        }
    }
}

fn remove(inner: &Weak<PoolInner>, key: u64) {
    if let Some(inner) = inner.upgrade() {
        if let Some(conn) = inner.members.lock().unwrap().remove(&key) {
            tracing::debug!("Removing {} from pool", conn);
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
