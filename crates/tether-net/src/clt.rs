//! Client role: manual and auto connectors.

use crate::config::CltConfig;
use crate::conn::Connection;
use crate::error::NetError;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tether_core::{Callback, ConId, Message, poll_quantum};
use tokio::net::TcpStream;
use tokio::sync::watch;

/// One handshake attempt bounded by `connect_timeout`.
async fn attempt(config: &CltConfig) -> Result<TcpStream, NetError> {
    match tokio::time::timeout(config.connect_timeout, TcpStream::connect(config.addr.as_str()))
        .await
    {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(NetError::Connect {
            addr: config.addr.clone(),
            source: e,
        }),
        Err(_) => Err(NetError::ConnectTimeout {
            addr: config.addr.clone(),
            timeout: config.connect_timeout,
        }),
    }
}

fn con_id_for(config: &CltConfig, stream: &TcpStream) -> ConId {
    ConId::initiator(
        config.name.as_deref(),
        stream.local_addr().ok(),
        stream.peer_addr().ok(),
    )
}

/// Manual client: exactly one connect attempt, caller-driven lifecycle.
#[derive(Debug)]
pub struct Clt {
    conn: Connection,
    io_timeout: Duration,
}

impl Clt {
    /// Connects once; refused/unreachable/deadline surface immediately, no
    /// retry. On success the connection's IO tasks are already running.
    pub async fn connect(config: CltConfig, callback: Arc<dyn Callback>) -> Result<Self, NetError> {
        let stream = attempt(&config).await?;
        let con_id = con_id_for(&config, &stream);
        tracing::info!("{} connected", con_id);
        let conn = Connection::spawn(stream, con_id, callback, None);
        Ok(Self {
            conn,
            io_timeout: config.io_timeout,
        })
    }

    pub fn con_id(&self) -> &ConId {
        self.conn.id()
    }

    /// Current transport health; never blocks. Closure is terminal, so there
    /// is nothing to wait for.
    pub fn is_connected(&self) -> bool {
        self.conn.is_open()
    }

    /// Enqueues `msg`; `NotConnected` once the connection has died.
    pub async fn send(&self, msg: Message) -> Result<(), NetError> {
        self.conn.send(msg, self.io_timeout).await
    }

    /// Closes the connection. Idempotent.
    pub fn shutdown(&self) {
        self.conn.close();
    }
}

impl Drop for Clt {
    fn drop(&mut self) {
        self.conn.close();
    }
}

impl fmt::Display for Clt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Clt({}, is_connected: {})", self.conn, self.is_connected())
    }
}

/// Auto client: a background supervisor repeats connect attempts on a fixed
/// interval until success or shutdown, and resumes retrying after a live
/// connection dies. The caller observes state, never the loop.
#[derive(Debug)]
pub struct CltAuto {
    current: Arc<Mutex<Option<Connection>>>,
    shutdown_tx: watch::Sender<bool>,
    io_timeout: Duration,
}

impl CltAuto {
    /// Returns immediately; connection establishment happens in the
    /// background. Failures are logged, never propagated.
    pub fn connect(config: CltConfig, callback: Arc<dyn Callback>) -> Self {
        let current = Arc::new(Mutex::new(None));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let io_timeout = config.io_timeout;
        tokio::spawn(retry_loop(config, callback, current.clone(), shutdown_rx));
        Self {
            current,
            shutdown_tx,
            io_timeout,
        }
    }

    /// True only while a background-established connection is live.
    pub fn is_connected(&self) -> bool {
        self.current
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|c| c.is_open())
    }

    /// Busy-waits in sleep quanta until connected, shutdown, or `timeout`.
    pub async fn is_connected_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let quantum = poll_quantum(timeout);
        loop {
            if self.is_connected() {
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

    /// Sends over the current connection; `NotConnected` while the
    /// supervisor is still retrying.
    pub async fn send(&self, msg: Message) -> Result<(), NetError> {
        let conn = self.current.lock().unwrap().clone();
        match conn {
            Some(conn) => conn.send(msg, self.io_timeout).await,
            None => Err(NetError::NotConnected),
        }
    }

    /// Stops the supervisor and closes the current connection. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(conn) = self.current.lock().unwrap().take() {
            conn.close();
        }
    }
}

impl Drop for CltAuto {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Display for CltAuto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CltAuto(is_connected: {})", self.is_connected())
    }
}

async fn retry_loop(
    config: CltConfig,
    callback: Arc<dyn Callback>,
    current: Arc<Mutex<Option<Connection>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match attempt(&config).await {
            Ok(stream) => {
                let con_id = con_id_for(&config, &stream);
                tracing::info!("{} connected", con_id);
                let conn = Connection::spawn(stream, con_id.clone(), callback.clone(), None);
                *current.lock().unwrap() = Some(conn.clone());

                let quantum = poll_quantum(config.retry_interval);
                let mut interrupted = false;
                while conn.is_open() {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            interrupted = true;
                            break;
                        }
                        _ = tokio::time::sleep(quantum) => {}
                    }
                }
                if let Some(conn) = current.lock().unwrap().take() {
                    conn.close();
                }
                if interrupted {
                    break;
                }
                tracing::info!("{} lost, reconnecting", con_id);
            }
            Err(e) => {
                tracing::debug!("{}; retrying in {:?}", e, config.retry_interval);
            }
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(config.retry_interval) => {}
        }
    }
    tracing::debug!("Retry loop for {} stopped", config.addr);
}
