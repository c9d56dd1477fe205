use crate::domain::claim::Claim;
use crate::domain::message::{Choice, Command, EventKind, InboundEvent, Notice, Outbound};
use crate::domain::ports::{
    ClaimPublisherBox, DestinationRotatorBox, ExpirySchedulerBox, ExpiryTicket, OrderCatalogBox,
    SessionStoreBox,
};
use crate::domain::session::{
    ChatId, DestinationId, MAX_REFERENCE_LEN, MIN_REFERENCE_LEN, OrderId, PaymentSession,
    ProofRef, ReferenceCode, SessionState, UserId,
};
use crate::error::{PaymentError, SessionError};
use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// How often a handler re-reads the session after losing a CAS race.
const MAX_ATTEMPTS: usize = 4;

/// Users whose last destination is remembered by default.
pub const DEFAULT_RECENT_USERS: usize = 4096;

/// Last destination handed to each recently served user.
///
/// Bounded: once `capacity` users are remembered, the one served longest
/// ago is forgotten.
#[derive(Debug)]
struct RecentDestinations {
    capacity: usize,
    by_user: HashMap<UserId, DestinationId>,
    order: VecDeque<UserId>,
}

impl RecentDestinations {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            by_user: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, user_id: UserId) -> Option<DestinationId> {
        self.by_user.get(&user_id).cloned()
    }

    fn remember(&mut self, user_id: UserId, destination_id: DestinationId) {
        if self.capacity == 0 {
            return;
        }
        if self.by_user.insert(user_id, destination_id).is_some() {
            self.order.retain(|u| *u != user_id);
        }
        self.order.push_back(user_id);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.by_user.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.by_user.len()
    }
}

/// Counters exposed to operators as health signals.
#[derive(Debug, Default)]
struct Stats {
    started: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    expired: AtomicU64,
    publish_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub active_sessions: usize,
    pub started: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub expired: u64,
    pub publish_failures: u64,
}

impl HealthSnapshot {
    /// Share of finished sessions that ran out of time.
    pub fn expiry_rate(&self) -> f64 {
        let finished = self.completed + self.cancelled + self.expired;
        if finished == 0 {
            0.0
        } else {
            self.expired as f64 / finished as f64
        }
    }
}

/// Drives each user's offline payment from destination hand-out to a
/// published claim.
///
/// Every state change goes through [`SessionStore::transition`]. A handler
/// that loses a race re-reads the session and decides again, so user events
/// and expiry timers for the same user resolve to exactly one winner.
///
/// [`SessionStore::transition`]: crate::domain::ports::SessionStore::transition
pub struct PaymentCoordinator {
    sessions: SessionStoreBox,
    rotator: DestinationRotatorBox,
    scheduler: ExpirySchedulerBox,
    publisher: ClaimPublisherBox,
    catalog: OrderCatalogBox,
    timeout: Duration,
    recent: Mutex<RecentDestinations>,
    stats: Stats,
}

/// Result of one attempt at handling an event.
type Attempt = Result<Outbound, SessionError>;

impl PaymentCoordinator {
    /// Creates a coordinator.
    ///
    /// # Arguments
    ///
    /// * `sessions` - Registry of active sessions.
    /// * `rotator` - Source of payment destinations.
    /// * `scheduler` - Arms the per-session deadline.
    /// * `publisher` - The review queue completed claims go to.
    /// * `catalog` - Order lookup used to price a new session.
    /// * `timeout` - Fixed lifetime of a session from its creation.
    pub fn new(
        sessions: SessionStoreBox,
        rotator: DestinationRotatorBox,
        scheduler: ExpirySchedulerBox,
        publisher: ClaimPublisherBox,
        catalog: OrderCatalogBox,
        timeout: Duration,
    ) -> Self {
        Self {
            sessions,
            rotator,
            scheduler,
            publisher,
            catalog,
            timeout,
            recent: Mutex::new(RecentDestinations::new(DEFAULT_RECENT_USERS)),
            stats: Stats::default(),
        }
    }

    /// Caps how many users' last destinations are remembered.
    pub fn with_recent_users(mut self, capacity: usize) -> Self {
        self.recent = Mutex::new(RecentDestinations::new(capacity));
        self
    }

    /// Handles one user event and returns the single message to send back.
    pub async fn handle(&self, event: InboundEvent) -> Outbound {
        let InboundEvent {
            user_id,
            chat_id,
            kind,
        } = event;
        let reply = |notice| Outbound::new(user_id, chat_id, notice);

        if let EventKind::Command(Command::Start { order_id }) = &kind {
            return self.start(user_id, chat_id, order_id.clone()).await;
        }

        for _ in 0..MAX_ATTEMPTS {
            let session = match self.sessions.get(user_id).await {
                Ok(session) => session,
                Err(SessionError::NotFound) => return reply(Notice::NoActiveSession),
                Err(e) => return self.internal_failure(user_id, chat_id, e),
            };

            if session.is_past_deadline(Utc::now())
                && let Some(notice) = self.expire_now(&ExpiryTicket::for_session(&session)).await
            {
                return notice;
            }

            let attempt = match &kind {
                EventKind::Command(Command::Cancel) => self.cancel(&session, chat_id).await,
                EventKind::Command(Command::Ack) => self.acknowledge(&session, chat_id).await,
                EventKind::Artifact(proof) => self.attach_proof(&session, chat_id, proof).await,
                EventKind::Text(text) => self.text(&session, chat_id, text).await,
                EventKind::Command(Command::Start { .. }) => Ok(reply(Notice::AlreadyActive {
                    order_id: session.order_id.clone(),
                })),
            };

            match attempt {
                Ok(outbound) => return outbound,
                Err(SessionError::StateMismatch { expected, actual }) => {
                    debug!(user = %user_id, ?expected, ?actual, "lost session race, retrying");
                }
                Err(SessionError::NotFound) => return reply(Notice::NoActiveSession),
                Err(e) => return self.internal_failure(user_id, chat_id, e),
            }
        }

        warn!(user = %user_id, "session kept changing under the handler");
        reply(Notice::ServiceUnavailable)
    }

    /// Expires the session a fired timer was armed for.
    ///
    /// Returns `None` when there is nothing to do: the session already
    /// finished, a newer session replaced it, or a claim is being submitted.
    pub async fn expire(&self, ticket: ExpiryTicket) -> Option<Outbound> {
        self.expire_now(&ticket).await
    }

    pub async fn health(&self) -> HealthSnapshot {
        let active_sessions = self.sessions.active_count().await.unwrap_or_else(|e| {
            error!(error = %e, "could not count active sessions");
            0
        });
        HealthSnapshot {
            active_sessions,
            started: self.stats.started.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
            cancelled: self.stats.cancelled.load(Ordering::Relaxed),
            expired: self.stats.expired.load(Ordering::Relaxed),
            publish_failures: self.stats.publish_failures.load(Ordering::Relaxed),
        }
    }

    async fn start(&self, user_id: UserId, chat_id: ChatId, order_id: OrderId) -> Outbound {
        let reply = |notice| Outbound::new(user_id, chat_id, notice);

        let order = match self.catalog.get_order(&order_id).await {
            Ok(Some(order)) => order,
            Ok(None) => return reply(Notice::OrderNotFound { order_id }),
            Err(e) => {
                error!(user = %user_id, order = %order_id, error = %e, "order lookup failed");
                return reply(Notice::ServiceUnavailable);
            }
        };

        // Refuse early so a rejected start does not use up a rotation slot.
        match self.sessions.get(user_id).await {
            Ok(active) => return self.already_active(user_id, chat_id, active.order_id),
            Err(SessionError::NotFound) => {}
            Err(e) => return self.internal_failure(user_id, chat_id, e),
        }

        let previous = self.recent.lock().await.get(user_id);
        let Some(destination) = self.rotator.next(previous.as_ref()).await else {
            warn!(user = %user_id, order = %order.order_id, "no payment destination available");
            return reply(Notice::ServiceUnavailable);
        };
        let destination_id = destination.destination_id;

        // The session becomes visible to other events only once it carries
        // its destination.
        let mut draft = PaymentSession::new(
            user_id,
            chat_id,
            order.order_id,
            order.amount,
            Utc::now(),
            self.timeout,
        );
        draft.assign_destination(destination_id.clone());
        let session = match self.sessions.create(draft).await {
            Ok(session) => session,
            Err(SessionError::AlreadyActive) => {
                debug!(
                    user = %user_id,
                    destination = %destination_id,
                    "lost start race, slot not returned"
                );
                let active = self
                    .sessions
                    .get(user_id)
                    .await
                    .map(|s| s.order_id)
                    .unwrap_or(order_id);
                return self.already_active(user_id, chat_id, active);
            }
            Err(e) => return self.internal_failure(user_id, chat_id, e),
        };

        let token = self.scheduler.schedule(ExpiryTicket::for_session(&session));
        // A session finished before its timer was armed leaves nothing to
        // cancel it, so disarm it here.
        match self.sessions.get(user_id).await {
            Ok(current) if current.expiry_token == token => {}
            _ => self.scheduler.cancel(token),
        }
        self.recent
            .lock()
            .await
            .remember(user_id, destination_id.clone());
        self.stats.started.fetch_add(1, Ordering::Relaxed);

        info!(
            user = %user_id,
            order = %session.order_id,
            destination = %destination_id,
            amount = session.amount.value(),
            expires_at = %session.expires_at,
            "payment session started"
        );

        reply(Notice::DestinationAssigned {
            order_id: session.order_id.clone(),
            destination_id,
            amount: session.amount,
            expires_at: session.expires_at,
        })
        .with_choices(&[Choice::Ack, Choice::Cancel])
    }

    async fn cancel(&self, session: &PaymentSession, chat_id: ChatId) -> Attempt {
        let reply = |notice| Outbound::new(session.user_id, chat_id, notice);
        if session.state == SessionState::Submitting {
            return Ok(reply(Notice::SubmissionInProgress));
        }

        let last = self
            .sessions
            .transition(
                session.user_id,
                session.state,
                SessionState::Cancelled,
                Box::new(|_| {}),
            )
            .await?;
        self.scheduler.cancel(last.expiry_token);
        self.stats.cancelled.fetch_add(1, Ordering::Relaxed);

        info!(user = %last.user_id, order = %last.order_id, "payment session cancelled");
        Ok(reply(Notice::Cancelled {
            order_id: last.order_id,
        }))
    }

    async fn acknowledge(&self, session: &PaymentSession, chat_id: ChatId) -> Attempt {
        let reply = |notice| Outbound::new(session.user_id, chat_id, notice);
        match session.state {
            SessionState::AwaitingAck => {
                self.sessions
                    .transition(
                        session.user_id,
                        SessionState::AwaitingAck,
                        SessionState::AwaitingProof,
                        Box::new(|_| {}),
                    )
                    .await?;
                debug!(user = %session.user_id, "transfer acknowledged");
                Ok(reply(Notice::SendReceipt).with_choices(&[Choice::Cancel]))
            }
            SessionState::AwaitingProof => {
                Ok(reply(Notice::SendReceipt).with_choices(&[Choice::Cancel]))
            }
            state => Ok(self.prompt_for(session.user_id, chat_id, state)),
        }
    }

    async fn attach_proof(
        &self,
        session: &PaymentSession,
        chat_id: ChatId,
        proof: &ProofRef,
    ) -> Attempt {
        if !session.state.awaits_proof() {
            return Ok(self.prompt_for(session.user_id, chat_id, session.state));
        }

        let proof = proof.clone();
        self.sessions
            .transition(
                session.user_id,
                session.state,
                SessionState::AwaitingReference,
                Box::new(move |s| {
                    s.attach_proof(proof);
                }),
            )
            .await?;
        debug!(user = %session.user_id, "receipt received");
        Ok(Outbound::new(session.user_id, chat_id, Notice::SendReference)
            .with_choices(&[Choice::Cancel]))
    }

    async fn text(&self, session: &PaymentSession, chat_id: ChatId, text: &str) -> Attempt {
        match session.state {
            SessionState::AwaitingReference => self.submit_reference(session, chat_id, text).await,
            state => Ok(self.prompt_for(session.user_id, chat_id, state)),
        }
    }

    /// Publishes the claim and completes the session as one unit.
    ///
    /// The session sits in `Submitting` while the review queue is called, so
    /// neither a second submission nor the expiry timer can interleave. A
    /// failed publish rolls the session back to `AwaitingReference`.
    async fn submit_reference(
        &self,
        session: &PaymentSession,
        chat_id: ChatId,
        text: &str,
    ) -> Attempt {
        let user_id = session.user_id;
        let reply = |notice| Outbound::new(user_id, chat_id, notice);

        let Ok(code) = ReferenceCode::parse(text) else {
            return Ok(reply(Notice::InvalidReference {
                min: MIN_REFERENCE_LEN,
                max: MAX_REFERENCE_LEN,
            })
            .with_choices(&[Choice::Cancel]));
        };

        let submitting = self
            .sessions
            .transition(
                user_id,
                SessionState::AwaitingReference,
                SessionState::Submitting,
                Box::new(|_| {}),
            )
            .await?;

        let published = match Claim::from_session(&submitting, code.clone(), Utc::now()) {
            Some(claim) => self.publisher.publish(&claim).await.map(|()| claim),
            None => {
                error!(user = %user_id, "session reached the reference step without a receipt");
                Err(PaymentError::ValidationError(
                    "incomplete claim".to_string(),
                ))
            }
        };

        match published {
            Ok(claim) => {
                let completed = self
                    .sessions
                    .transition(
                        user_id,
                        SessionState::Submitting,
                        SessionState::Completed,
                        Box::new(move |s| {
                            s.set_reference(code);
                        }),
                    )
                    .await;
                if let Err(e) = completed {
                    // the claim is already with the reviewers; only our record is off
                    error!(user = %user_id, error = %e, "published claim but could not complete session");
                    self.sessions.remove(user_id).await.ok();
                }
                self.scheduler.cancel(submitting.expiry_token);
                self.stats.completed.fetch_add(1, Ordering::Relaxed);

                info!(
                    user = %user_id,
                    order = %claim.order_id,
                    destination = %claim.destination_id,
                    "claim published for review"
                );
                Ok(reply(Notice::Completed {
                    order_id: claim.order_id,
                }))
            }
            Err(e) => {
                self.stats.publish_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    user = %user_id,
                    order = %submitting.order_id,
                    error = %e,
                    "review queue rejected claim, session rolled back"
                );

                let restored = self
                    .sessions
                    .transition(
                        user_id,
                        SessionState::Submitting,
                        SessionState::AwaitingReference,
                        Box::new(|_| {}),
                    )
                    .await?;

                // the timer skipped this session while it was submitting
                if restored.is_past_deadline(Utc::now())
                    && let Some(expired) =
                        self.expire_now(&ExpiryTicket::for_session(&restored)).await
                {
                    return Ok(Outbound::new(user_id, chat_id, expired.notice));
                }

                Ok(reply(Notice::SubmissionFailed).with_choices(&[Choice::Cancel]))
            }
        }
    }

    /// Moves the ticket's session to `Expired` if it still belongs to the
    /// ticket. Retries while the user keeps advancing the session, because
    /// the deadline does not move.
    async fn expire_now(&self, ticket: &ExpiryTicket) -> Option<Outbound> {
        for _ in 0..MAX_ATTEMPTS {
            let session = match self.sessions.get(ticket.user_id).await {
                Ok(session) => session,
                Err(SessionError::NotFound) => {
                    debug!(user = %ticket.user_id, "expiry for a finished session ignored");
                    return None;
                }
                Err(e) => {
                    error!(user = %ticket.user_id, error = %e, "could not load session to expire");
                    return None;
                }
            };

            if session.expiry_token != ticket.token {
                debug!(user = %ticket.user_id, "stale expiry timer ignored");
                return None;
            }
            if session.state == SessionState::Submitting {
                debug!(user = %ticket.user_id, "expiry deferred while claim is submitting");
                return None;
            }

            match self
                .sessions
                .transition(
                    ticket.user_id,
                    session.state,
                    SessionState::Expired,
                    Box::new(|_| {}),
                )
                .await
            {
                Ok(last) => {
                    self.scheduler.cancel(last.expiry_token);
                    self.stats.expired.fetch_add(1, Ordering::Relaxed);
                    info!(
                        user = %last.user_id,
                        order = %last.order_id,
                        state = ?session.state,
                        "payment session expired"
                    );
                    return Some(Outbound::new(
                        ticket.user_id,
                        ticket.chat_id,
                        Notice::Expired {
                            order_id: last.order_id,
                        },
                    ));
                }
                Err(SessionError::StateMismatch { .. }) => continue,
                Err(SessionError::NotFound) => return None,
                Err(e) => {
                    error!(user = %ticket.user_id, error = %e, "could not expire session");
                    return None;
                }
            }
        }
        None
    }

    /// Re-prompt for whatever input `state` is waiting on.
    fn prompt_for(&self, user_id: UserId, chat_id: ChatId, state: SessionState) -> Outbound {
        let notice = match state {
            SessionState::AwaitingAck | SessionState::AwaitingProof => Notice::ExpectedReceipt,
            SessionState::AwaitingReference => Notice::SendReference,
            SessionState::Submitting => {
                return Outbound::new(user_id, chat_id, Notice::SubmissionInProgress);
            }
            SessionState::Completed | SessionState::Cancelled | SessionState::Expired => {
                Notice::NoActiveSession
            }
        };
        Outbound::new(user_id, chat_id, notice).with_choices(&[Choice::Cancel])
    }

    fn already_active(&self, user_id: UserId, chat_id: ChatId, active: OrderId) -> Outbound {
        debug!(user = %user_id, order = %active, "payment already in progress");
        Outbound::new(user_id, chat_id, Notice::AlreadyActive { order_id: active })
    }

    fn internal_failure(&self, user_id: UserId, chat_id: ChatId, err: SessionError) -> Outbound {
        error!(user = %user_id, error = %err, "session store failure");
        Outbound::new(user_id, chat_id, Notice::ServiceUnavailable)
    }
}
