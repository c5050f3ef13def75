//! In-memory event store.
//!
//! [`MemoryStore`] is a [`Callback`] that records every send/receive event
//! and answers blocking, filtered lookups. Tests use it to synchronize on
//! "the other side observed this message" without sleeping blind. Lookups
//! busy-wait in bounded sleep quanta rather than parking on a condition
//! variable, so they always return by their deadline.

use crate::{Callback, ConId, Filter, Message};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Which way a stored message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Sent,
    Received,
}

/// One recorded send/receive event.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub con_id: ConId,
    pub direction: Direction,
    pub message: Message,
    pub at: SystemTime,
}

impl fmt::Display for StoredEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} {}", self.con_id, self.direction, self.message)
    }
}

/// Sleep quantum for a bounded busy-wait against `timeout`.
///
/// One tenth of the timeout, clamped to [1ms, 10ms] so short timeouts stay
/// responsive and long ones do not spin.
pub fn poll_quantum(timeout: Duration) -> Duration {
    (timeout / 10).clamp(Duration::from_millis(1), Duration::from_millis(10))
}

/// Records events and supports blocking, filtered lookup.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: Mutex<Vec<StoredEvent>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_ref() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Appends an event; safe under concurrent writers.
    pub fn record(&self, con_id: ConId, direction: Direction, message: Message) {
        self.events.lock().unwrap().push(StoredEvent {
            con_id,
            direction,
            message,
            at: SystemTime::now(),
        });
    }

    /// Oldest event matching `name` (any connection if `None`), `direction`
    /// (either if `None`), and `filter`.
    ///
    /// Rescans in sleep quanta until a match appears or `timeout` elapses;
    /// returns `None` only once the full timeout has passed. A zero timeout
    /// still performs exactly one scan.
    pub async fn find_where(
        &self,
        name: Option<&str>,
        direction: Option<Direction>,
        filter: &Filter,
        timeout: Duration,
    ) -> Option<StoredEvent> {
        let deadline = Instant::now() + timeout;
        let quantum = poll_quantum(timeout);
        loop {
            {
                let events = self.events.lock().unwrap();
                let found = events.iter().find(|e| {
                    name.is_none_or(|n| e.con_id.name() == n)
                        && direction.is_none_or(|d| e.direction == d)
                        && filter.matches(&e.message)
                });
                if let Some(event) = found {
                    return Some(event.clone());
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(quantum.min(deadline - now)).await;
        }
    }

    /// [`Self::find_where`] over both directions.
    pub async fn find(
        &self,
        name: Option<&str>,
        filter: &Filter,
        timeout: Duration,
    ) -> Option<StoredEvent> {
        self.find_where(name, None, filter, timeout).await
    }

    /// [`Self::find_where`] restricted to received events.
    pub async fn find_recv(
        &self,
        name: Option<&str>,
        filter: &Filter,
        timeout: Duration,
    ) -> Option<StoredEvent> {
        self.find_where(name, Some(Direction::Received), filter, timeout)
            .await
    }

    /// [`Self::find_where`] restricted to sent events.
    pub async fn find_sent(
        &self,
        name: Option<&str>,
        filter: &Filter,
        timeout: Duration,
    ) -> Option<StoredEvent> {
        self.find_where(name, Some(Direction::Sent), filter, timeout)
            .await
    }

    /// Drops all stored events; connections are unaffected.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }

    /// Most recently recorded event.
    pub fn last(&self) -> Option<StoredEvent> {
        self.events.lock().unwrap().last().cloned()
    }
}

impl fmt::Display for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events = self.events.lock().unwrap();
        writeln!(f, "MemoryStore<{}>", events.len())?;
        for (idx, event) in events.iter().enumerate() {
            writeln!(f, "{:<4} {}", idx + 1, event)?;
        }
        Ok(())
    }
}

impl Callback for MemoryStore {
    fn on_recv(&self, con_id: &ConId, msg: &Message) {
        self.record(con_id.clone(), Direction::Received, msg.clone());
    }

    fn on_sent(&self, con_id: &ConId, msg: &Message) {
        self.record(con_id.clone(), Direction::Sent, msg.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn clt() -> ConId {
        ConId::initiator(None, None, None)
    }

    fn svc() -> ConId {
        ConId::acceptor(None, None, None)
    }

    #[tokio::test]
    async fn find_by_name_and_filter() {
        let store = MemoryStore::new_ref();
        store.on_sent(&clt(), &json!({"Ping": {"ty": "P", "text": "ping"}}));
        store.on_recv(&svc(), &json!({"Ping": {"ty": "P", "text": "ping"}}));
        store.on_sent(&svc(), &json!({"Pong": {"ty": "P", "text": "pong"}}));

        let ping = Filter::new(json!({"Ping": {}}));
        let found = store
            .find_recv(Some("svc"), &ping, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(found.direction, Direction::Received);
        assert_eq!(found.con_id.name(), "svc");

        assert!(store.find_sent(Some("svc"), &ping, Duration::ZERO).await.is_none());
        assert!(store.find(Some("nobody"), &Filter::any(), Duration::ZERO).await.is_none());
    }

    #[tokio::test]
    async fn unmatched_filter_times_out_not_earlier() {
        let store = MemoryStore::new_ref();
        store.on_sent(&clt(), &json!({"Ping": {}}));

        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        let found = store
            .find(None, &Filter::new(json!({"Missing": {}})), timeout)
            .await;
        assert!(found.is_none());
        assert!(start.elapsed() >= timeout);
    }

    #[tokio::test]
    async fn find_observes_concurrent_writer() {
        let store = MemoryStore::new_ref();
        let writer = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.on_recv(&svc(), &json!({"Pong": {"ty": "P"}}));
        });

        let found = store
            .find(Some("svc"), &Filter::new(json!({"Pong": {}})), Duration::from_millis(500))
            .await;
        assert!(found.is_some());
    }

    #[test]
    fn clear_resets_without_touching_order() {
        let store = MemoryStore::new();
        store.on_sent(&clt(), &json!({"Ping": {}}));
        store.on_sent(&clt(), &json!({"Pong": {}}));
        assert_eq!(store.len(), 2);
        assert_eq!(store.last().unwrap().message, json!({"Pong": {}}));

        store.clear();
        assert!(store.is_empty());
    }
}
