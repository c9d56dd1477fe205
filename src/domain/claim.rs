use super::session::{
    Amount, DestinationId, OrderId, PaymentSession, ProofRef, ReferenceCode, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A finished payment attempt, ready for a human reviewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub destination_id: DestinationId,
    pub proof_artifact_ref: ProofRef,
    pub reference_code: ReferenceCode,
    pub amount: Amount,
    pub completed_at: DateTime<Utc>,
}

impl Claim {
    /// Builds the claim for a session that has a destination and a receipt.
    ///
    /// Returns `None` when either is missing, which means the session never
    /// went through the proof step.
    pub fn from_session(
        session: &PaymentSession,
        reference_code: ReferenceCode,
        completed_at: DateTime<Utc>,
    ) -> Option<Self> {
        Some(Self {
            order_id: session.order_id.clone(),
            user_id: session.user_id,
            destination_id: session.destination_id()?.clone(),
            proof_artifact_ref: session.proof_artifact_ref()?.clone(),
            reference_code,
            amount: session.amount,
            completed_at,
        })
    }
}
