//! Request/response bridge.
//!
//! Turns the asynchronous reply stream into blocking calls. A caller opens
//! a [`Slot`] under a request id, issues the command, and blocks on the
//! slot; the dispatch thread delivers payloads, a terminal sentinel, or an
//! error into it. Slot channels are unbounded so the dispatch thread never
//! blocks on a slow or departed caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;

use crate::domain::RequestId;
use crate::error::{SessionError, SessionResult};
use crate::observability;

/// Message delivered into a slot.
#[derive(Debug, Clone)]
pub enum SlotMessage<T> {
    /// One payload.
    Item(T),
    /// No more payloads follow.
    End,
    /// The request failed.
    Failed(SessionError),
}

/// Strictly increasing request id source.
#[derive(Debug, Default)]
pub struct RequestIds(AtomicI64);

impl RequestIds {
    /// Counter whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    /// Take the next id.
    pub fn next(&self) -> RequestId {
        RequestId::new(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

/// Outstanding requests of one kind, keyed by request id.
#[derive(Debug)]
pub struct PendingRequests<T> {
    kind: &'static str,
    slots: Mutex<HashMap<RequestId, Sender<SlotMessage<T>>>>,
}

impl<T> PendingRequests<T> {
    /// Empty table; `kind` labels log lines.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Open a slot. At most one slot may be outstanding per id.
    pub fn open(&self, id: RequestId) -> SessionResult<Slot<T>> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&id) {
            return Err(SessionError::DuplicateRequest(id));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        slots.insert(id, tx);
        tracing::debug!(kind = self.kind, request_id = %id, "Slot opened");
        Ok(Slot { id, rx })
    }

    /// Deliver one payload. Returns false if no slot is open for `id`.
    pub fn deliver(&self, id: RequestId, item: T) -> bool {
        let slots = self.slots.lock();
        let Some(tx) = slots.get(&id) else {
            tracing::debug!(kind = self.kind, request_id = %id, "Dropping payload for closed slot");
            return false;
        };
        tx.send(SlotMessage::Item(item)).is_ok()
    }

    /// Deliver the terminal sentinel and close the slot.
    pub fn finish(&self, id: RequestId) -> bool {
        self.close_with(id, SlotMessage::End)
    }

    /// Deliver an error and close the slot.
    pub fn fail(&self, id: RequestId, error: SessionError) -> bool {
        self.close_with(id, SlotMessage::Failed(error))
    }

    /// Close a slot without delivering anything, e.g. after the caller
    /// gave up waiting.
    pub fn cancel(&self, id: RequestId) -> bool {
        self.slots.lock().remove(&id).is_some()
    }

    /// Fail every outstanding slot.
    pub fn fail_all(&self, error: &SessionError) -> usize {
        let drained: Vec<_> = self.slots.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(SlotMessage::Failed(error.clone()));
        }
        count
    }

    /// Returns true if a slot is open for `id`.
    #[must_use]
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.slots.lock().contains_key(&id)
    }

    /// Number of open slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Returns true if no slot is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    fn close_with(&self, id: RequestId, message: SlotMessage<T>) -> bool {
        let Some(tx) = self.slots.lock().remove(&id) else {
            tracing::debug!(kind = self.kind, request_id = %id, "No slot to close");
            return false;
        };
        let _ = tx.send(message);
        tracing::debug!(kind = self.kind, request_id = %id, "Slot closed");
        true
    }
}

/// Receiving end of one request.
#[derive(Debug)]
pub struct Slot<T> {
    id: RequestId,
    rx: Receiver<SlotMessage<T>>,
}

impl<T> Slot<T> {
    /// Request id the slot was opened under.
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Collect payloads until the sentinel, an error, or `timeout`.
    pub fn collect(&self, timeout: Duration, operation: &'static str) -> SessionResult<Vec<T>> {
        self.collect_until(Instant::now() + timeout, timeout, operation)
    }

    /// Like [`collect`](Self::collect), against an absolute deadline.
    /// `budget` is only reported in the timeout error.
    pub fn collect_until(
        &self,
        deadline: Instant,
        budget: Duration,
        operation: &'static str,
    ) -> SessionResult<Vec<T>> {
        let mut items = Vec::new();
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(SlotMessage::Item(item)) => items.push(item),
                Ok(SlotMessage::End) => return Ok(items),
                Ok(SlotMessage::Failed(error)) => return Err(error),
                Err(RecvTimeoutError::Timeout) => {
                    observability::record_request_timeout(operation);
                    return Err(SessionError::timeout(operation, budget));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(SessionError::Disconnected),
            }
        }
    }
}

/// Open a slot, issue the command, and block for the reply.
///
/// The slot is closed on every failure path so late replies are dropped.
pub fn request_and_wait<T, F>(
    pending: &PendingRequests<T>,
    id: RequestId,
    timeout: Duration,
    operation: &'static str,
    issue: F,
) -> SessionResult<Vec<T>>
where
    F: FnOnce() -> SessionResult<()>,
{
    let slot = pending.open(id)?;
    if let Err(error) = issue() {
        pending.cancel(id);
        return Err(error);
    }
    let result = slot.collect(timeout, operation);
    if result.is_err() {
        pending.cancel(id);
    }
    result
}

/// Single-shot wake-up for a waiter on an unkeyed event (connection,
/// end of open orders, next valid id).
#[derive(Debug)]
pub struct Notifier<T> {
    waiter: Mutex<Option<Sender<T>>>,
}

impl<T> Default for Notifier<T> {
    fn default() -> Self {
        Self {
            waiter: Mutex::new(None),
        }
    }
}

impl<T> Notifier<T> {
    /// Notifier with no waiter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter, replacing any previous one. Arm before issuing
    /// the command whose reply will notify.
    pub fn arm(&self) -> Armed<T> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        *self.waiter.lock() = Some(tx);
        Armed { rx }
    }

    /// Wake the waiter, if one is armed. Returns true if one was woken.
    pub fn notify(&self, value: T) -> bool {
        self.waiter
            .lock()
            .take()
            .is_some_and(|tx| tx.try_send(value).is_ok())
    }

    /// Drop the waiter without waking it.
    pub fn disarm(&self) {
        self.waiter.lock().take();
    }
}

/// An armed waiter.
#[derive(Debug)]
pub struct Armed<T> {
    rx: Receiver<T>,
}

impl<T> Armed<T> {
    /// Block until notified or `timeout`.
    pub fn wait(self, timeout: Duration, operation: &'static str) -> SessionResult<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => {
                observability::record_request_timeout(operation);
                Err(SessionError::timeout(operation, timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::Disconnected),
        }
    }

    /// Returns the value if the notification already arrived.
    pub fn poll(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}
