//! Filter-keyed callback dispatch.
//!
//! A [`FilteredCallback`] holds a registration table fixed at construction:
//! each handler is keyed by a structural [`Filter`] and fires only for
//! messages the filter matches. A handler registered with [`Filter::any`]
//! fires unconditionally.

use crate::{Callback, ConId, Filter, Message};
use std::fmt;

type Handler = Box<dyn Fn(&ConId, &Message) + Send + Sync>;

/// Callback dispatching to handlers by structural filter.
#[derive(Default)]
pub struct FilteredCallback {
    recv_handlers: Vec<(Filter, Handler)>,
    sent_handlers: Vec<(Filter, Handler)>,
}

impl FilteredCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a receive handler for messages matching `filter`.
    pub fn when_recv(
        mut self,
        filter: Filter,
        handler: impl Fn(&ConId, &Message) + Send + Sync + 'static,
    ) -> Self {
        self.recv_handlers.push((filter, Box::new(handler)));
        self
    }

    /// Registers a send handler for messages matching `filter`.
    pub fn when_sent(
        mut self,
        filter: Filter,
        handler: impl Fn(&ConId, &Message) + Send + Sync + 'static,
    ) -> Self {
        self.sent_handlers.push((filter, Box::new(handler)));
        self
    }
}

impl fmt::Debug for FilteredCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilteredCallback")
            .field("recv_handlers", &self.recv_handlers.len())
            .field("sent_handlers", &self.sent_handlers.len())
            .finish()
    }
}

impl Callback for FilteredCallback {
    fn on_recv(&self, con_id: &ConId, msg: &Message) {
        for (filter, handler) in &self.recv_handlers {
            if filter.matches(msg) {
                handler(con_id, msg);
            }
        }
    }

    fn on_sent(&self, con_id: &ConId, msg: &Message) {
        for (filter, handler) in &self.sent_handlers {
            if filter.matches(msg) {
                handler(con_id, msg);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[test]
    fn handlers_fire_by_filter() {
        let pings = Arc::new(Mutex::new(0usize));
        let all = Arc::new(Mutex::new(0usize));

        let callback = FilteredCallback::new()
            .when_recv(Filter::new(json!({"Ping": {}})), {
                let pings = pings.clone();
                move |_con_id, _msg| *pings.lock().unwrap() += 1
            })
            .when_recv(Filter::any(), {
                let all = all.clone();
                move |_con_id, _msg| *all.lock().unwrap() += 1
            });

        let con_id = ConId::acceptor(None, None, None);
        callback.on_recv(&con_id, &json!({"Ping": {"ty": "P"}}));
        callback.on_recv(&con_id, &json!({"Pong": {"ty": "P"}}));

        assert_eq!(*pings.lock().unwrap(), 1);
        assert_eq!(*all.lock().unwrap(), 2);
    }

    #[test]
    fn sent_and_recv_tables_are_independent() {
        let fired = Arc::new(Mutex::new(Vec::new()));

        let callback = FilteredCallback::new()
            .when_recv(Filter::any(), {
                let fired = fired.clone();
                move |_con_id, _msg| fired.lock().unwrap().push("recv")
            })
            .when_sent(Filter::any(), {
                let fired = fired.clone();
                move |_con_id, _msg| fired.lock().unwrap().push("sent")
            });

        let con_id = ConId::initiator(None, None, None);
        callback.on_sent(&con_id, &json!({"Ping": {}}));
        callback.on_recv(&con_id, &json!({"Pong": {}}));
        assert_eq!(*fired.lock().unwrap(), vec!["sent", "recv"]);
    }
}
