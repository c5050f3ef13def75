//! One established duplex stream endpoint.
//!
//! A [`Connection`] is a cloneable handle; the socket halves are exclusively
//! owned by two spawned IO tasks. The reader task decodes one JSON object per
//! line and delivers it to the callback pipeline; the writer task drains the
//! bounded send queue and invokes the sent-hook after each confirmed write.
//! Whichever task first observes stream closure, a protocol error, or an
//! explicit close marks the connection closed — a terminal transition — and
//! runs the close hook (pool self-removal).

use crate::error::NetError;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tether_core::{Callback, ConId, Message, dispatch_recv, dispatch_sent};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};

/// Capacity of the per-connection send queue.
const SEND_QUEUE: usize = 64;

type CloseHook = Box<dyn FnOnce() + Send>;

struct Shared {
    id: ConId,
    open: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    on_close: Mutex<Option<CloseHook>>,
}

impl Shared {
    /// First caller wins; signals both IO tasks and runs the close hook.
    fn mark_closed(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            if let Some(hook) = self.on_close.lock().unwrap().take() {
                hook();
            }
            let _ = self.shutdown_tx.send(true);
        }
    }
}

/// Handle to an established connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
    tx: mpsc::Sender<Message>,
}

impl Connection {
    /// Takes ownership of the stream and spawns the reader/writer tasks.
    pub(crate) fn spawn(
        stream: TcpStream,
        id: ConId,
        callback: Arc<dyn Callback>,
        on_close: Option<CloseHook>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(SEND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            id,
            open: AtomicBool::new(true),
            shutdown_tx,
            on_close: Mutex::new(on_close),
        });
        let (read_half, write_half) = stream.into_split();
        tokio::spawn(read_loop(
            read_half,
            shared.clone(),
            callback.clone(),
            shutdown_rx.clone(),
        ));
        tokio::spawn(write_loop(write_half, rx, shared.clone(), callback, shutdown_rx));
        Self { shared, tx }
    }

    pub fn id(&self) -> &ConId {
        &self.shared.id
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Enqueues `msg` for transmission.
    ///
    /// The sent-hook fires exactly once, after the writer task confirms the
    /// write, in enqueue order.
    pub async fn send(&self, msg: Message, timeout: Duration) -> Result<(), NetError> {
        if !self.is_open() {
            return Err(NetError::NotConnected);
        }
        match tokio::time::timeout(timeout, self.tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(NetError::NotConnected),
            Err(_) => Err(NetError::SendTimeout { timeout }),
        }
    }

    /// Closes the connection. Terminal and idempotent; a new connection
    /// requires a new handshake.
    pub fn close(&self) {
        self.shared.mark_closed();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.shared.id)
            .field("open", &self.is_open())
            .finish()
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.shared.id)
    }
}

async fn read_loop(
    read_half: OwnedReadHalf,
    shared: Arc<Shared>,
    callback: Arc<dyn Callback>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    loop {
        line.clear();
        let read = tokio::select! {
            _ = shutdown.changed() => break,
            read = reader.read_line(&mut line) => read,
        };
        match read {
            Ok(0) => {
                tracing::debug!("{} closed by peer", shared.id);
                break;
            }
            Ok(_) => {
                let frame = line.trim();
                if frame.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Message>(frame) {
                    Ok(msg) => dispatch_recv(callback.as_ref(), &shared.id, &msg),
                    Err(e) => {
                        tracing::warn!("{} protocol error: {}", shared.id, e);
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::warn!("{} transport error: {}", shared.id, e);
                break;
            }
        }
    }
    shared.mark_closed();
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Message>,
    shared: Arc<Shared>,
    callback: Arc<dyn Callback>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let msg = tokio::select! {
            _ = shutdown.changed() => break,
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
        };
        let mut frame = match serde_json::to_string(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("{} encode error, dropping message: {}", shared.id, e);
                continue;
            }
        };
        frame.push('\n');
        if let Err(e) = write_half.write_all(frame.as_bytes()).await {
            tracing::warn!("{} transport error: {}", shared.id, e);
            break;
        }
        dispatch_sent(callback.as_ref(), &shared.id, &msg);
    }
    shared.mark_closed();
}
