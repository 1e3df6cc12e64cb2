//! Generation tokens for superseding in-flight operations.
//!
//! Each coordinator owns a [`Publisher`] that holds the latest snapshot of its
//! state machine in a `watch` channel. Starting an operation bumps the
//! snapshot's epoch in the same critical section that resets the state, and
//! every later update is applied only if the epoch still matches. A late
//! result from a superseded operation therefore can never reach the view.
//!
//! The [`Ticket`] also carries a [`CancellationToken`]; beginning a new
//! operation cancels the previous one so its request future is dropped
//! instead of running to completion in the background.

use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A snapshot type that records which operation produced it.
pub trait Epoched {
    fn epoch(&self) -> u64;
}

/// Proof of ownership of the current operation.
#[derive(Debug, Clone)]
pub struct Ticket {
    pub epoch: u64,
    pub token: CancellationToken,
}

/// Latest-snapshot channel with epoch-guarded updates.
pub struct Publisher<S> {
    tx: watch::Sender<S>,
    inflight: Mutex<CancellationToken>,
}

impl<S: Epoched> Publisher<S> {
    pub fn new(initial: S) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            tx,
            inflight: Mutex::new(CancellationToken::new()),
        }
    }

    /// Subscribe to snapshot changes. The view layer only reads from this.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> S
    where
        S: Clone,
    {
        self.tx.borrow().clone()
    }

    /// Start a new operation, superseding whatever was in flight.
    ///
    /// `reset` builds the fresh snapshot for the new epoch.
    pub fn begin(&self, reset: impl FnOnce(u64) -> S) -> Ticket {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        inflight.cancel();
        let token = CancellationToken::new();
        *inflight = token.clone();

        let mut epoch = 0;
        self.tx.send_modify(|snapshot| {
            epoch = snapshot.epoch() + 1;
            *snapshot = reset(epoch);
        });
        Ticket { epoch, token }
    }

    /// Apply `f` only if `ticket` still owns the snapshot.
    ///
    /// Returns `false` when the operation has been superseded; the snapshot
    /// is left untouched and receivers are not notified.
    pub fn update(&self, ticket: &Ticket, f: impl FnOnce(&mut S)) -> bool {
        self.tx.send_if_modified(|snapshot| {
            if snapshot.epoch() == ticket.epoch {
                f(snapshot);
                true
            } else {
                false
            }
        })
    }
}
