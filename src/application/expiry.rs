use crate::domain::ports::{ExpiryScheduler, ExpiryTicket};
use crate::domain::session::ExpiryToken;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

type Timers = HashMap<ExpiryToken, JoinHandle<()>>;

/// Runs one tokio sleep task per armed ticket.
///
/// Timers are keyed by the session's token, so arming a ticket again only
/// replaces that session's timer and never touches another session of the
/// same user. A task that reaches its deadline forwards the ticket on the
/// channel returned by [`TokioExpiryScheduler::new`]; it never touches
/// sessions itself.
#[derive(Clone)]
pub struct TokioExpiryScheduler {
    timers: Arc<Mutex<Timers>>,
    fired: mpsc::UnboundedSender<ExpiryTicket>,
}

impl TokioExpiryScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExpiryTicket>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Arc::new(Mutex::new(Timers::new())),
            fired,
        };
        (scheduler, rx)
    }

    /// Number of timers still armed.
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Timers> {
        // a poisoned map is still structurally sound
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ExpiryScheduler for TokioExpiryScheduler {
    fn schedule(&self, ticket: ExpiryTicket) -> ExpiryToken {
        let token = ticket.token;
        let user_id = ticket.user_id;
        let delay = (ticket.deadline - Utc::now()).to_std().unwrap_or_default();

        let mut timers = self.lock();
        if let Some(previous) = timers.remove(&token) {
            debug!(user = %user_id, "replacing armed expiry timer");
            previous.abort();
        }

        let registry = Arc::clone(&self.timers);
        let fired = self.fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let armed = registry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&token)
                .is_some();
            if !armed {
                return;
            }
            trace!(user = %user_id, "expiry timer fired");
            // receiver gone means the coordinator is shutting down
            let _ = fired.send(ticket);
        });

        timers.insert(token, handle);
        token
    }

    fn cancel(&self, token: ExpiryToken) {
        if let Some(handle) = self.lock().remove(&token) {
            handle.abort();
            trace!("expiry timer cancelled");
        }
    }
}
