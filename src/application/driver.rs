use super::coordinator::PaymentCoordinator;
use crate::domain::message::{InboundEvent, Outbound};
use crate::domain::ports::{ExpiryTicket, Notifier};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Transport-facing wrapper around the coordinator.
///
/// Each event runs on its own task so a panic in one user's flow is caught
/// here instead of taking the process down, and every outcome is delivered
/// through the notifier.
#[derive(Clone)]
pub struct FlowDriver {
    coordinator: Arc<PaymentCoordinator>,
    notifier: Arc<dyn Notifier>,
    expiring: Arc<AtomicUsize>,
}

impl FlowDriver {
    pub fn new(coordinator: Arc<PaymentCoordinator>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            coordinator,
            notifier,
            expiring: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn coordinator(&self) -> &PaymentCoordinator {
        &self.coordinator
    }

    /// No fired expiry is between its transition and its notice.
    pub fn is_idle(&self) -> bool {
        self.expiring.load(Ordering::SeqCst) == 0
    }

    pub async fn dispatch(&self, event: InboundEvent) {
        let user_id = event.user_id;
        let coordinator = Arc::clone(&self.coordinator);
        match tokio::spawn(async move { coordinator.handle(event).await }).await {
            Ok(outbound) => self.deliver(outbound).await,
            Err(e) => error!(user = %user_id, error = %e, "event handler crashed"),
        }
    }

    /// Consumes fired expiry tickets until the scheduler is dropped.
    pub fn spawn_expiry_worker(
        &self,
        mut fired: mpsc::UnboundedReceiver<ExpiryTicket>,
    ) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move {
            while let Some(ticket) = fired.recv().await {
                driver.expiring.fetch_add(1, Ordering::SeqCst);
                let user_id = ticket.user_id;
                let coordinator = Arc::clone(&driver.coordinator);
                match tokio::spawn(async move { coordinator.expire(ticket).await }).await {
                    Ok(Some(outbound)) => driver.deliver(outbound).await,
                    Ok(None) => {}
                    Err(e) => error!(user = %user_id, error = %e, "expiry handler crashed"),
                }
                driver.expiring.fetch_sub(1, Ordering::SeqCst);
            }
        })
    }

    async fn deliver(&self, outbound: Outbound) {
        let user_id = outbound.user_id;
        let kind = outbound.notice.kind();
        if let Err(e) = self.notifier.send(outbound).await {
            warn!(user = %user_id, notice = kind, error = %e, "could not deliver notice");
        }
    }
}
