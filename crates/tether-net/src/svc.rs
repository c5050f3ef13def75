//! Server role: non-blocking acceptor plus the connection pool.

use crate::config::SvcConfig;
use crate::conn::Connection;
use crate::error::NetError;
use crate::pool::ConnectionPool;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tether_core::{Callback, ConId, Message, poll_quantum};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

/// Manual server: binds immediately or fails, then accepts in the
/// background. Caller observes accepted connections only through pool
/// queries.
#[derive(Debug)]
pub struct Svc {
    con_id: ConId,
    local_addr: SocketAddr,
    pool: ConnectionPool,
    io_timeout: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl Svc {
    /// Binds the listener (failure surfaces immediately) and spawns the
    /// acceptor loop.
    pub async fn bind(config: SvcConfig, callback: Arc<dyn Callback>) -> Result<Self, NetError> {
        let listener = TcpListener::bind(config.addr.as_str())
            .await
            .map_err(|e| NetError::Bind {
                addr: config.addr.clone(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        let con_id = ConId::acceptor(config.name.as_deref(), Some(local_addr), None);
        let (pool, pending_tx) = ConnectionPool::new(config.max_connections);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tracing::info!("{} listening", con_id);
        tokio::spawn(accept_loop(
            listener,
            con_id.clone(),
            callback,
            pool.clone(),
            pending_tx,
            shutdown_rx,
        ));
        Ok(Self {
            con_id,
            local_addr,
            pool,
            io_timeout: config.io_timeout,
            shutdown_tx,
        })
    }

    pub fn con_id(&self) -> &ConId {
        &self.con_id
    }

    /// Address the listener actually bound, useful with port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Single race-aware probe: merge pending hand-offs, then check.
    pub fn is_connected_now(&self) -> bool {
        self.pool.drain_pending();
        self.pool.any_live()
    }

    /// [`Self::is_connected_timeout`] with the configured `io_timeout`.
    pub async fn is_connected(&self) -> bool {
        self.is_connected_timeout(self.io_timeout).await
    }

    /// Busy-waits in sleep quanta until a live connection is observed or
    /// `timeout` elapses. A just-accepted connection may still be in the
    /// hand-off channel, so each iteration merges before concluding "not
    /// connected". Returns false promptly once the server is shut down —
    /// no further connections are expected.
    pub async fn is_connected_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let quantum = poll_quantum(timeout);
        loop {
            if self.is_connected_now() {
                return true;
            }
            if *self.shutdown_tx.borrow() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(quantum.min(deadline - now)).await;
        }
    }

    /// Delivers `msg` to every live pooled connection; `NotConnected` when
    /// the pool is empty.
    pub async fn send(&self, msg: &Message) -> Result<(), NetError> {
        self.pool.broadcast(msg, self.io_timeout).await
    }

    /// Stops the acceptor and closes every pooled connection. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        self.pool.close_all();
    }
}

impl Drop for Svc {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Display for Svc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Svc({}, {} of max {})",
            self.con_id,
            self.pool.len(),
            self.pool.max_connections()
        )
    }
}

async fn accept_loop(
    listener: TcpListener,
    con_id: ConId,
    callback: Arc<dyn Callback>,
    pool: ConnectionPool,
    pending: mpsc::Sender<(u64, Connection)>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                if pool.is_full() {
                    tracing::warn!("{} at capacity, rejecting {}", con_id, peer);
                    drop(stream);
                    continue;
                }
                let id = ConId::acceptor(Some(con_id.name()), stream.local_addr().ok(), Some(peer));
                tracing::debug!("{} accepted", id);
                let key = pool.next_key();
                let conn = Connection::spawn(stream, id, callback.clone(), Some(pool.remover(key)));
                let sent = tokio::select! {
                    _ = shutdown.changed() => break,
                    sent = pending.send((key, conn)) => sent,
                };
                if sent.is_err() {
                    break;
                }
            }
            Err(e) => {
                // Transient accept failures must never kill the server.
                tracing::warn!("{} accept error: {}", con_id, e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
    tracing::debug!("{} acceptor stopped", con_id);
}

/// Auto server: a background supervisor retries the bind on a fixed interval
/// (address still in use, etc.) until success or shutdown.
#[derive(Debug)]
pub struct SvcAuto {
    slot: Arc<Mutex<Option<Svc>>>,
    shutdown_tx: watch::Sender<bool>,
    io_timeout: Duration,
}

impl SvcAuto {
    /// Returns immediately; bind failures are logged and retried, never
    /// propagated.
    pub fn bind(config: SvcConfig, callback: Arc<dyn Callback>) -> Self {
        let slot = Arc::new(Mutex::new(None));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let io_timeout = config.io_timeout;
        tokio::spawn(bind_loop(config, callback, slot.clone(), shutdown_rx));
        Self {
            slot,
            shutdown_tx,
            io_timeout,
        }
    }

    /// True once bound and a live connection has been accepted.
    pub fn is_connected_now(&self) -> bool {
        self.slot
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|svc| svc.is_connected_now())
    }

    /// [`Self::is_connected_timeout`] with the configured `io_timeout`.
    pub async fn is_connected(&self) -> bool {
        self.is_connected_timeout(self.io_timeout).await
    }

    /// Busy-waits in sleep quanta until bound-and-connected, shutdown, or
    /// `timeout`.
    pub async fn is_connected_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let quantum = poll_quantum(timeout);
        loop {
            if self.is_connected_now() {
                return true;
            }
            if *self.shutdown_tx.borrow() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(quantum.min(deadline - now)).await;
        }
    }

    /// Broadcasts through the bound server; `NotConnected` while the
    /// supervisor is still retrying the bind.
    pub async fn send(&self, msg: &Message) -> Result<(), NetError> {
        let pool = self
            .slot
            .lock()
            .unwrap()
            .as_ref()
            .map(|svc| svc.pool().clone());
        match pool {
            Some(pool) => pool.broadcast(msg, self.io_timeout).await,
            None => Err(NetError::NotConnected),
        }
    }

    /// Stops the supervisor and tears down the bound server. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(svc) = self.slot.lock().unwrap().take() {
            svc.shutdown();
        }
    }
}

impl Drop for SvcAuto {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Display for SvcAuto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.slot.lock().unwrap() {
            Some(svc) => write!(f, "SvcAuto({})", svc),
            None => write!(f, "SvcAuto(binding)"),
        }
    }
}

async fn bind_loop(
    config: SvcConfig,
    callback: Arc<dyn Callback>,
    slot: Arc<Mutex<Option<Svc>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match Svc::bind(config.clone(), callback.clone()).await {
            Ok(svc) => {
                *slot.lock().unwrap() = Some(svc);
                // Bound; park until shutdown, then tear down whatever is
                // still in the slot.
                let _ = shutdown.changed().await;
                if let Some(svc) = slot.lock().unwrap().take() {
                    svc.shutdown();
                }
                break;
            }
            Err(e) => {
                tracing::warn!("{}; retrying in {:?}", e, config.retry_interval);
            }
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(config.retry_interval) => {}
        }
    }
    tracing::debug!("Bind loop for {} stopped", config.addr);
}
