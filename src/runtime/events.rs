/// Per-run event log with live, replayable subscriptions
///
/// Every event is appended to the run's history and then fanned out on a
/// `tokio::sync::broadcast` channel. The producer never waits on consumers:
/// `broadcast::Sender::send` is non-blocking and a slow subscriber only lags.
/// Subscribers recover from lag (or from subscribing late) by reading the
/// history, so each stream is gapless and ordered from its starting sequence
/// and ends after the run's terminal event.

use crate::runtime::run::RunId;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStarted,
    NodeStarted,
    NodeCompleted,
    NodeFailed,
    StateChanged,
    Routed,
    LoopBoundReached,
    RunCompleted,
    RunFailed,
}

impl EventKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::RunCompleted | EventKind::RunFailed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub run_id: RunId,
    pub sequence: u64,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

/// Where a new subscription starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeFrom {
    /// Only events published after subscribing
    Now,
    /// Replay history from this sequence number, then follow live
    Sequence(u64),
}

pub type EventStream = BoxStream<'static, Event>;

#[derive(Debug, Default)]
struct History {
    events: Vec<Event>,
    sealed: bool,
}

#[derive(Debug)]
pub struct EventLog {
    run_id: RunId,
    history: Mutex<History>,
    tx: broadcast::Sender<Event>,
}

enum Lookup {
    Ready(Event),
    Pending,
    Sealed,
}

impl EventLog {
    pub fn new(run_id: RunId, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            run_id,
            history: Mutex::new(History::default()),
            tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event and broadcast it. Terminal events seal the log.
    ///
    /// Returns `None` if the log was already sealed.
    pub fn publish(&self, kind: EventKind, node: Option<&str>, payload: Value) -> Option<Event> {
        let mut history = self.lock();
        if history.sealed {
            tracing::warn!("🚫 Dropping {:?} event for finished run {}", kind, self.run_id);
            return None;
        }

        let event = Event {
            run_id: self.run_id.clone(),
            sequence: history.events.len() as u64,
            kind,
            node: node.map(str::to_string),
            timestamp: Utc::now(),
            payload,
        };
        history.events.push(event.clone());
        history.sealed = kind.is_terminal();

        // Sent under the lock so broadcast order matches sequence order.
        // An error only means nobody is subscribed right now.
        let _ = self.tx.send(event.clone());
        Some(event)
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_sealed(&self) -> bool {
        self.lock().sealed
    }

    /// Copy of every event published so far
    pub fn history(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    fn lookup(&self, sequence: u64) -> Lookup {
        let history = self.lock();
        match history.events.get(sequence as usize) {
            Some(event) => Lookup::Ready(event.clone()),
            None if history.sealed => Lookup::Sealed,
            None => Lookup::Pending,
        }
    }

    /// Lazy, finite stream of this run's events
    pub fn subscribe(self: &Arc<Self>, from: SubscribeFrom) -> EventStream {
        // Receiver is created under the lock so nothing published after the
        // starting point can slip past both the history and the channel.
        let (rx, next) = {
            let history = self.lock();
            let next = match from {
                SubscribeFrom::Now => history.events.len() as u64,
                SubscribeFrom::Sequence(sequence) => sequence,
            };
            (self.tx.subscribe(), next)
        };

        let cursor = Cursor {
            log: Arc::clone(self),
            rx,
            next,
            done: false,
            closed: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            let event = cursor.next_event().await?;
            Some((event, cursor))
        })
        .boxed()
    }
}

struct Cursor {
    log: Arc<EventLog>,
    rx: broadcast::Receiver<Event>,
    next: u64,
    done: bool,
    closed: bool,
}

impl Cursor {
    async fn next_event(&mut self) -> Option<Event> {
        loop {
            if self.done {
                return None;
            }

            match self.log.lookup(self.next) {
                Lookup::Ready(event) => return Some(self.advance(event)),
                Lookup::Sealed => return None,
                Lookup::Pending if self.closed => return None,
                Lookup::Pending => {}
            }

            match self.rx.recv().await {
                Ok(event) if event.sequence == self.next => return Some(self.advance(event)),
                // Older than our position (already served from history) or
                // ahead of it after a lag; the history check above sorts it out.
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("🐢 Subscriber on run {} lagged by {} events", self.log.run_id, skipped);
                }
                Err(RecvError::Closed) => self.closed = true,
            }
        }
    }

    fn advance(&mut self, event: Event) -> Event {
        self.next = event.sequence + 1;
        if event.kind.is_terminal() {
            self.done = true;
        }
        event
    }
}
