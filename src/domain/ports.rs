use super::claim::Claim;
use super::destination::Destination;
use super::message::Outbound;
use super::session::{
    Amount, ChatId, DestinationId, ExpiryToken, OrderId, PaymentSession, SessionState, UserId,
};
use crate::error::{Result, SessionError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Applied to a session together with its state change.
pub type SessionMutator = Box<dyn FnOnce(&mut PaymentSession) + Send>;

/// Registry of the one unfinished session each user may have.
///
/// Every operation on a given user is linearized; operations on different
/// users must not wait on each other.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts `session`, failing with `AlreadyActive` if the user has one.
    async fn create(&self, session: PaymentSession) -> std::result::Result<PaymentSession, SessionError>;

    async fn get(&self, user_id: UserId) -> std::result::Result<PaymentSession, SessionError>;

    /// Compare-and-swap: moves the session from `expected` to `next` and
    /// applies `mutator` in the same step, or fails with `StateMismatch`.
    ///
    /// When `next` is terminal the session leaves the store and the returned
    /// value is its final snapshot.
    async fn transition(
        &self,
        user_id: UserId,
        expected: SessionState,
        next: SessionState,
        mutator: SessionMutator,
    ) -> std::result::Result<PaymentSession, SessionError>;

    /// Drops the user's session if there is one.
    async fn remove(&self, user_id: UserId) -> std::result::Result<(), SessionError>;

    async fn active_count(&self) -> std::result::Result<usize, SessionError>;
}

/// Hands out payment destinations.
#[async_trait]
pub trait DestinationRotator: Send + Sync {
    /// Picks the next destination, preferring one other than `exclude_last`.
    ///
    /// `None` means there is no active destination at all.
    async fn next(&self, exclude_last: Option<&DestinationId>) -> Option<Destination>;
}

/// Everything a fired timer needs to expire a session and tell the user.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryTicket {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub token: ExpiryToken,
    pub deadline: DateTime<Utc>,
}

impl ExpiryTicket {
    pub fn for_session(session: &PaymentSession) -> Self {
        Self {
            user_id: session.user_id,
            chat_id: session.chat_id,
            token: session.expiry_token,
            deadline: session.expires_at,
        }
    }
}

pub trait ExpiryScheduler: Send + Sync {
    /// Arms a timer for the ticket. A timer still armed for the same token
    /// is disarmed first.
    fn schedule(&self, ticket: ExpiryTicket) -> ExpiryToken;

    /// Disarms a timer. Unknown, fired or already cancelled tokens are ignored.
    fn cancel(&self, token: ExpiryToken);
}

/// The downstream review queue.
#[async_trait]
pub trait ClaimPublisher: Send + Sync {
    /// Delivers a claim. The queue treats a repeated `order_id` as delivered.
    async fn publish(&self, claim: &Claim) -> Result<()>;

    async fn published(&self) -> Result<Vec<Claim>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub order_id: OrderId,
    pub amount: Amount,
}

#[async_trait]
pub trait OrderCatalog: Send + Sync {
    async fn get_order(&self, order_id: &OrderId) -> Result<Option<Order>>;
}

/// Outbound side of the messaging transport.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, outbound: Outbound) -> Result<()>;
}

pub type SessionStoreBox = Box<dyn SessionStore>;
pub type DestinationRotatorBox = Box<dyn DestinationRotator>;
pub type ExpirySchedulerBox = Box<dyn ExpiryScheduler>;
pub type ClaimPublisherBox = Box<dyn ClaimPublisher>;
pub type OrderCatalogBox = Box<dyn OrderCatalog>;
