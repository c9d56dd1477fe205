use crate::domain::claim::Claim;
use crate::domain::message::Outbound;
use crate::domain::ports::{
    ClaimPublisher, Notifier, Order, OrderCatalog, SessionMutator, SessionStore,
};
use crate::domain::session::{OrderId, PaymentSession, SessionState, UserId};
use crate::error::{PaymentError, Result, SessionError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, RwLock};

const SHARD_COUNT: usize = 16;

type Shard = RwLock<HashMap<UserId, PaymentSession>>;

/// A thread-safe in-memory session registry.
///
/// Sessions are spread over `RwLock<HashMap<..>>` shards keyed by a hash of
/// the user id, so users in different shards never touch the same lock. No
/// lock is held across an await point, which keeps every operation on a
/// single user linearized without blocking other users' flows.
#[derive(Clone)]
pub struct InMemorySessionStore {
    shards: Arc<[Shard]>,
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        let shards: Vec<Shard> = (0..SHARD_COUNT).map(|_| RwLock::default()).collect();
        Self {
            shards: shards.into(),
        }
    }
}

impl InMemorySessionStore {
    /// Creates a new, empty in-memory session store.
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, user_id: UserId) -> &Shard {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: PaymentSession) -> std::result::Result<PaymentSession, SessionError> {
        let mut sessions = self.shard(session.user_id).write().await;
        if sessions.contains_key(&session.user_id) {
            return Err(SessionError::AlreadyActive);
        }
        sessions.insert(session.user_id, session.clone());
        Ok(session)
    }

    async fn get(&self, user_id: UserId) -> std::result::Result<PaymentSession, SessionError> {
        let sessions = self.shard(user_id).read().await;
        sessions.get(&user_id).cloned().ok_or(SessionError::NotFound)
    }

    async fn transition(
        &self,
        user_id: UserId,
        expected: SessionState,
        next: SessionState,
        mutator: SessionMutator,
    ) -> std::result::Result<PaymentSession, SessionError> {
        let mut sessions = self.shard(user_id).write().await;
        let session = sessions.get_mut(&user_id).ok_or(SessionError::NotFound)?;

        if session.state != expected {
            return Err(SessionError::StateMismatch {
                expected,
                actual: session.state,
            });
        }
        if !expected.can_become(next) {
            return Err(SessionError::IllegalTransition {
                from: expected,
                to: next,
            });
        }

        mutator(session);
        session.state = next;

        if next.is_terminal() {
            // Terminal sessions never stay in the store.
            sessions.remove(&user_id).ok_or(SessionError::NotFound)
        } else {
            Ok(session.clone())
        }
    }

    async fn remove(&self, user_id: UserId) -> std::result::Result<(), SessionError> {
        self.shard(user_id).write().await.remove(&user_id);
        Ok(())
    }

    async fn active_count(&self) -> std::result::Result<usize, SessionError> {
        let mut count = 0;
        for shard in self.shards.iter() {
            count += shard.read().await.len();
        }
        Ok(count)
    }
}

/// A fixed in-memory order catalog.
#[derive(Default, Clone)]
pub struct InMemoryOrderCatalog {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, order: Order) {
        self.orders
            .write()
            .await
            .insert(order.order_id.clone(), order);
    }
}

#[async_trait]
impl OrderCatalog for InMemoryOrderCatalog {
    async fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(order_id).cloned())
    }
}

/// An in-memory review queue.
///
/// Claims are kept in arrival order and deduplicated by `order_id`.
/// `fail_next` makes the following publishes fail, which is how tests model
/// an unreachable queue.
#[derive(Default, Clone)]
pub struct InMemoryReviewQueue {
    claims: Arc<Mutex<Vec<Claim>>>,
    failures: Arc<AtomicUsize>,
}

impl InMemoryReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, times: usize) {
        self.failures.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl ClaimPublisher for InMemoryReviewQueue {
    async fn publish(&self, claim: &Claim) -> Result<()> {
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(PaymentError::PublishError(
                "review queue unavailable".to_string(),
            ));
        }

        let mut claims = self.claims.lock().await;
        if !claims.iter().any(|c| c.order_id == claim.order_id) {
            claims.push(claim.clone());
        }
        Ok(())
    }

    async fn published(&self) -> Result<Vec<Claim>> {
        Ok(self.claims.lock().await.clone())
    }
}

/// Keeps every outbound message instead of delivering it.
#[derive(Default, Clone)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Outbound>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, outbound: Outbound) -> Result<()> {
        self.sent.lock().await.push(outbound);
        Ok(())
    }
}
