//! The callback pipeline.
//!
//! Every message the engine sends or receives is delivered to a [`Callback`].
//! Callbacks compose into an ordered [`CallbackChain`] with `+`; a chain
//! delivers each event to every member in order, and a panicking member is
//! logged and skipped rather than allowed to break delivery to the rest.

use crate::{ConId, Message};
use std::fmt;
use std::ops::Add;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::Level;

/// Observer invoked on send/receive events of a connection.
///
/// Both hooks are side-effecting with no return contract. Implementations
/// must be cheap or hand work off elsewhere; they run on the connection's IO
/// tasks.
pub trait Callback: fmt::Debug + Send + Sync {
    /// A message arrived on the connection.
    fn on_recv(&self, con_id: &ConId, msg: &Message);
    /// A message was written to the connection.
    fn on_sent(&self, con_id: &ConId, msg: &Message);
}

/// Deliver a receive event, containing any panic to this one callback.
pub fn dispatch_recv(callback: &dyn Callback, con_id: &ConId, msg: &Message) {
    guarded(con_id, "on_recv", || callback.on_recv(con_id, msg));
}

/// Deliver a send event, containing any panic to this one callback.
pub fn dispatch_sent(callback: &dyn Callback, con_id: &ConId, msg: &Message) {
    guarded(con_id, "on_sent", || callback.on_sent(con_id, msg));
}

fn guarded(con_id: &ConId, hook: &str, f: impl FnOnce()) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(f)) {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_string());
        tracing::warn!("Callback panicked in {} for {}: {}", hook, con_id, reason);
    }
}

/// Ordered sequence of callbacks, every member invoked per event.
///
/// Composition builds a new chain rather than mutating shared state:
/// `CallbackChain::from(a) + b + c` delivers to `a`, then `b`, then `c`.
#[derive(Debug, Clone, Default)]
pub struct CallbackChain {
    members: Vec<Arc<dyn Callback>>,
}

impl CallbackChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a member, returning the extended chain.
    pub fn with(mut self, callback: Arc<dyn Callback>) -> Self {
        self.members.push(callback);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Callback for CallbackChain {
    fn on_recv(&self, con_id: &ConId, msg: &Message) {
        for member in &self.members {
            dispatch_recv(member.as_ref(), con_id, msg);
        }
    }

    fn on_sent(&self, con_id: &ConId, msg: &Message) {
        for member in &self.members {
            dispatch_sent(member.as_ref(), con_id, msg);
        }
    }
}

impl From<Arc<dyn Callback>> for CallbackChain {
    fn from(callback: Arc<dyn Callback>) -> Self {
        Self::new().with(callback)
    }
}

impl Add for CallbackChain {
    type Output = CallbackChain;

    fn add(mut self, rhs: CallbackChain) -> CallbackChain {
        self.members.extend(rhs.members);
        self
    }
}

impl Add<Arc<dyn Callback>> for CallbackChain {
    type Output = CallbackChain;

    fn add(self, rhs: Arc<dyn Callback>) -> CallbackChain {
        self.with(rhs)
    }
}

/// Logs every event at configurable levels.
#[derive(Debug)]
pub struct LoggerCallback {
    sent_level: Level,
    recv_level: Level,
}

impl LoggerCallback {
    pub fn new(sent_level: Level, recv_level: Level) -> Self {
        Self {
            sent_level,
            recv_level,
        }
    }

    pub fn new_ref() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_level_ref(sent_level: Level, recv_level: Level) -> Arc<Self> {
        Arc::new(Self::new(sent_level, recv_level))
    }
}

impl Default for LoggerCallback {
    fn default() -> Self {
        Self::new(Level::INFO, Level::INFO)
    }
}

// event! requires a const level, hence the dispatch by value.
fn log_event(level: Level, hook: &str, con_id: &ConId, msg: &Message) {
    if level == Level::ERROR {
        tracing::error!("{}: {} {}", hook, con_id, msg);
    } else if level == Level::WARN {
        tracing::warn!("{}: {} {}", hook, con_id, msg);
    } else if level == Level::INFO {
        tracing::info!("{}: {} {}", hook, con_id, msg);
    } else if level == Level::DEBUG {
        tracing::debug!("{}: {} {}", hook, con_id, msg);
    } else {
        tracing::trace!("{}: {} {}", hook, con_id, msg);
    }
}

impl Callback for LoggerCallback {
    fn on_recv(&self, con_id: &ConId, msg: &Message) {
        log_event(self.recv_level, "on_recv", con_id, msg);
    }

    fn on_sent(&self, con_id: &ConId, msg: &Message) {
        log_event(self.sent_level, "on_sent", con_id, msg);
    }
}

/// Counts events, useful for asserting delivery in tests.
#[derive(Debug, Default)]
pub struct CounterCallback {
    sent: AtomicUsize,
    recv: AtomicUsize,
}

impl CounterCallback {
    pub fn new_ref() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn recv_count(&self) -> usize {
        self.recv.load(Ordering::SeqCst)
    }
}

impl Callback for CounterCallback {
    fn on_recv(&self, _con_id: &ConId, _msg: &Message) {
        self.recv.fetch_add(1, Ordering::SeqCst);
    }

    fn on_sent(&self, _con_id: &ConId, _msg: &Message) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct DevNullCallback;

impl DevNullCallback {
    pub fn new_ref() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl Callback for DevNullCallback {
    fn on_recv(&self, _con_id: &ConId, _msg: &Message) {}
    fn on_sent(&self, _con_id: &ConId, _msg: &Message) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Tagging {
        tag: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Callback for Tagging {
        fn on_recv(&self, _con_id: &ConId, _msg: &Message) {
            self.seen.lock().unwrap().push(self.tag);
        }
        fn on_sent(&self, _con_id: &ConId, _msg: &Message) {
            self.seen.lock().unwrap().push(self.tag);
        }
    }

    #[derive(Debug)]
    struct Panicking;

    impl Callback for Panicking {
        fn on_recv(&self, _con_id: &ConId, _msg: &Message) {
            panic!("observer failure");
        }
        fn on_sent(&self, _con_id: &ConId, _msg: &Message) {
            panic!("observer failure");
        }
    }

    fn con_id() -> ConId {
        ConId::initiator(Some("test"), None, None)
    }

    #[test]
    fn chain_preserves_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = CallbackChain::new()
            .with(Arc::new(Tagging { tag: "a", seen: seen.clone() }))
            .with(Arc::new(Tagging { tag: "b", seen: seen.clone() }))
            + (Arc::new(Tagging { tag: "c", seen: seen.clone() }) as Arc<dyn Callback>);

        assert_eq!(chain.len(), 3);
        chain.on_recv(&con_id(), &json!({"Ping": {}}));
        assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn panicking_member_does_not_block_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = CallbackChain::new()
            .with(Arc::new(Tagging { tag: "before", seen: seen.clone() }))
            .with(Arc::new(Panicking))
            .with(Arc::new(Tagging { tag: "after", seen: seen.clone() }));

        chain.on_sent(&con_id(), &json!({"Ping": {}}));
        chain.on_sent(&con_id(), &json!({"Ping": {}}));
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["before", "after", "before", "after"]
        );
    }

    #[test]
    fn counter_counts_directions() {
        let counter = CounterCallback::new_ref();
        let chain = CallbackChain::from(LoggerCallback::new_ref() as Arc<dyn Callback>)
            + (counter.clone() as Arc<dyn Callback>);

        for _ in 0..2 {
            chain.on_sent(&con_id(), &json!({"Ping": {}}));
        }
        chain.on_recv(&con_id(), &json!({"Pong": {}}));
        assert_eq!(counter.sent_count(), 2);
        assert_eq!(counter.recv_count(), 1);
    }
}
