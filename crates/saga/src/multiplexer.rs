//! Signal mailboxes and the decision wait.
//!
//! A running saga owns exactly one [`Mailbox`]. External callers drop
//! signals into it; the saga task parks in [`EventMultiplexer::wait_next`]
//! until a signal arrives, the decision deadline passes, or the mailbox is
//! closed.

use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;

use crate::error::SignalError;

/// The decision carried by a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Finish the order.
    Complete,
    /// Cancel the order and compensate.
    Cancel,
}

impl SignalKind {
    /// Returns the wire name of the signal.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Complete => "complete",
            SignalKind::Cancel => "cancel",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a signal name other than `complete` or `cancel`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status: {0}. Must be 'complete' or 'cancel'")]
pub struct InvalidSignalKind(pub String);

impl FromStr for SignalKind {
    type Err = InvalidSignalKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(SignalKind::Complete),
            "cancel" => Ok(SignalKind::Cancel),
            other => Err(InvalidSignalKind(other.to_string())),
        }
    }
}

/// An external event addressed to one saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// The saga the signal is for.
    pub saga_id: OrderId,
    /// The decision.
    pub kind: SignalKind,
    /// When the signal was received.
    pub arrived_at: DateTime<Utc>,
}

impl Signal {
    /// Creates a signal stamped with the current time.
    pub fn new(saga_id: OrderId, kind: SignalKind) -> Self {
        Self {
            saga_id,
            kind,
            arrived_at: Utc::now(),
        }
    }
}

/// Whether a delivered signal was kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The saga checkpointed the signal and acts on it, even after a
    /// restart.
    Accepted,
    /// An earlier signal is already waiting; this one was dropped.
    Dropped,
}

/// Result of offering a signal to a [`Mailbox`].
#[derive(Debug)]
pub enum Admission {
    /// The signal is in the slot. The receiver resolves once the saga has
    /// checkpointed it, and errors if the saga stopped first.
    Pending(oneshot::Receiver<()>),
    /// An earlier signal is already waiting; this one was dropped.
    Dropped,
}

/// A signal taken from a mailbox, acknowledged once it is durable.
#[derive(Debug)]
pub struct Decision {
    signal: Signal,
    recorded: oneshot::Sender<()>,
}

impl Decision {
    /// Returns the signal.
    pub fn signal(&self) -> &Signal {
        &self.signal
    }

    /// Tells the sender that the signal was checkpointed.
    pub fn acknowledge(self) {
        // The sender may have given up waiting.
        let _ = self.recorded.send(());
    }
}

#[derive(Debug, Default)]
struct Slot {
    pending: Option<Decision>,
    awaiting: bool,
    closed: bool,
}

/// Single-slot signal mailbox of one running saga.
///
/// Signals are admitted only while the saga waits for its decision. The
/// first signal admitted wins; later signals are dropped until the saga
/// takes it. Cloning yields another handle to the same mailbox.
#[derive(Debug, Clone)]
pub struct Mailbox {
    saga_id: OrderId,
    slot: Arc<Mutex<Slot>>,
    notify: Arc<Notify>,
}

impl Mailbox {
    /// Creates an open, empty mailbox that does not yet admit signals.
    pub fn new(saga_id: OrderId) -> Self {
        Self {
            saga_id,
            slot: Arc::new(Mutex::new(Slot::default())),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Returns the saga this mailbox belongs to.
    pub fn saga_id(&self) -> OrderId {
        self.saga_id
    }

    /// Starts admitting signals. Has no effect once closed.
    pub fn open_for_decision(&self) {
        let mut slot = self.lock();
        if !slot.closed {
            slot.awaiting = true;
        }
    }

    /// Offers a signal to the saga.
    pub fn deliver(&self, signal: Signal) -> Result<Admission, SignalError> {
        let admission = {
            let mut slot = self.lock();
            if slot.closed {
                return Err(SignalError::NotRunning(self.saga_id));
            }
            if !slot.awaiting {
                return Err(SignalError::NotAwaitingDecision(self.saga_id));
            }
            if slot.pending.is_some() {
                Admission::Dropped
            } else {
                let (recorded, receiver) = oneshot::channel();
                slot.pending = Some(Decision { signal, recorded });
                Admission::Pending(receiver)
            }
        };
        if matches!(admission, Admission::Pending(_)) {
            self.notify.notify_one();
        }
        Ok(admission)
    }

    /// Closes the mailbox, waking the waiter. A signal still in the slot is
    /// discarded unacknowledged, and future signals are rejected.
    pub fn close(&self) {
        {
            let mut slot = self.lock();
            slot.closed = true;
            slot.awaiting = false;
            slot.pending = None;
        }
        self.notify.notify_one();
    }

    /// Returns true once the mailbox has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn take(&self) -> Option<Decision> {
        self.lock().pending.take()
    }

    /// Takes the waiting signal, or closes the mailbox if there is none.
    fn take_or_close(&self) -> Option<Decision> {
        let mut slot = self.lock();
        let taken = slot.pending.take();
        if taken.is_none() {
            slot.closed = true;
            slot.awaiting = false;
        }
        taken
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What woke a waiting saga.
#[derive(Debug)]
pub enum Wakeup {
    /// A signal arrived.
    Signal(Decision),
    /// The decision deadline passed without a signal. The mailbox is
    /// closed.
    TimedOut,
    /// The mailbox was closed while waiting.
    Closed,
}

/// Cap for deadlines too far away to represent as an `Instant`.
const FAR_FUTURE: std::time::Duration = std::time::Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Waits on a saga's mailbox with a deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventMultiplexer;

impl EventMultiplexer {
    /// Creates a new multiplexer.
    pub fn new() -> Self {
        Self
    }

    /// Opens the mailbox for decisions and suspends until the next wake-up
    /// condition.
    ///
    /// A signal already waiting in the mailbox is returned immediately, even
    /// if the deadline has passed.
    pub async fn wait_next(&self, mailbox: &Mailbox, deadline: Instant) -> Wakeup {
        mailbox.open_for_decision();
        loop {
            let notified = mailbox.notify.notified();
            if let Some(decision) = mailbox.take() {
                return Wakeup::Signal(decision);
            }
            if mailbox.is_closed() {
                return Wakeup::Closed;
            }

            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    // A signal may have raced the timer.
                    return match mailbox.take_or_close() {
                        Some(decision) => Wakeup::Signal(decision),
                        None => Wakeup::TimedOut,
                    };
                }
            }
        }
    }

    /// Converts a wall-clock deadline into a runtime instant.
    ///
    /// Deadlines in the past map to now, so the wait times out at once.
    /// Deadlines beyond what the runtime clock can represent are capped.
    pub fn instant_for(deadline: DateTime<Utc>) -> Instant {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or_default();
        let now = Instant::now();
        now.checked_add(remaining)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }
}
