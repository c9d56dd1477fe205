//! Application layer containing the payment flow orchestration.
//!
//! `PaymentCoordinator` owns the per-user state machine, `LeastRecentRotator`
//! hands out destinations, `TokioExpiryScheduler` arms session deadlines and
//! `FlowDriver` connects all of it to a messaging transport. Fired timers
//! reach the coordinator over a `tokio` channel rather than by callback.

pub mod coordinator;
pub mod driver;
pub mod expiry;
pub mod rotator;
