use crate::error::PaymentError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shortest accepted bank reference code, in characters.
pub const MIN_REFERENCE_LEN: usize = 5;
/// Longest accepted bank reference code, in characters.
pub const MAX_REFERENCE_LEN: usize = 30;

/// Transport-level identifier of the paying user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Transport-level conversation the user is reachable in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationId(String);

/// Opaque handle to a receipt image held by the messaging transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRef(String);

macro_rules! non_empty_id {
    ($name:ident, $what:literal) => {
        impl $name {
            pub fn new(value: impl Into<String>) -> Result<Self, PaymentError> {
                let value = value.into();
                if value.trim().is_empty() {
                    Err(PaymentError::ValidationError(concat!($what, " must not be empty").to_string()))
                } else {
                    Ok(Self(value.trim().to_string()))
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

non_empty_id!(OrderId, "order id");
non_empty_id!(DestinationId, "destination id");
non_empty_id!(ProofRef, "proof artifact reference");

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A positive amount in the minor currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Amount(u64);

impl Amount {
    pub fn new(value: u64) -> Result<Self, PaymentError> {
        if value > 0 {
            Ok(Self(value))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Amount {
    type Error = PaymentError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The bank transfer reference a user types after uploading the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCode(String);

impl ReferenceCode {
    /// Trims the input and checks its character count is within
    /// [`MIN_REFERENCE_LEN`]..=[`MAX_REFERENCE_LEN`].
    pub fn parse(input: &str) -> Result<Self, PaymentError> {
        let code = input.trim();
        let len = code.chars().count();
        if (MIN_REFERENCE_LEN..=MAX_REFERENCE_LEN).contains(&len) {
            Ok(Self(code.to_string()))
        } else {
            Err(PaymentError::ValidationError(format!(
                "reference code must be {MIN_REFERENCE_LEN}-{MAX_REFERENCE_LEN} characters, got {len}"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReferenceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle to the one scheduled expiry of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExpiryToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl ExpiryToken {
    /// Mints a token that is unique for the lifetime of the process.
    pub fn mint() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingAck,
    AwaitingProof,
    AwaitingReference,
    /// A claim for this session is being handed to the review queue.
    Submitting,
    Completed,
    Cancelled,
    Expired,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Expired
        )
    }

    /// States in which the user still owes us a receipt image.
    pub fn awaits_proof(self) -> bool {
        matches!(self, SessionState::AwaitingAck | SessionState::AwaitingProof)
    }

    /// Whether `next` is a legal successor of `self`.
    ///
    /// `Submitting -> AwaitingReference` is the rollback taken when the review
    /// queue rejects a claim; every other edge moves forward or terminates.
    /// A submitting session can be neither cancelled nor expired. Staying in
    /// the same non-terminal state is allowed so fields can be set under CAS.
    pub fn can_become(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (from, to) if from == to => true,
            (Submitting, Cancelled | Expired) => false,
            (_, Cancelled | Expired) => true,
            (AwaitingAck, AwaitingProof | AwaitingReference) => true,
            (AwaitingProof, AwaitingReference) => true,
            (AwaitingReference, Submitting) => true,
            (Submitting, Completed | AwaitingReference) => true,
            _ => false,
        }
    }
}

/// The per-user record of one in-progress offline payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub user_id: UserId,
    /// Where notices for this session go, captured when the flow starts.
    pub chat_id: ChatId,
    pub order_id: OrderId,
    pub amount: Amount,
    pub state: SessionState,
    destination_id: Option<DestinationId>,
    proof_artifact_ref: Option<ProofRef>,
    reference_code: Option<ReferenceCode>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expiry_token: ExpiryToken,
}

impl PaymentSession {
    pub fn new(
        user_id: UserId,
        chat_id: ChatId,
        order_id: OrderId,
        amount: Amount,
        created_at: DateTime<Utc>,
        timeout: Duration,
    ) -> Self {
        Self {
            user_id,
            chat_id,
            order_id,
            amount,
            state: SessionState::AwaitingAck,
            destination_id: None,
            proof_artifact_ref: None,
            reference_code: None,
            created_at,
            expires_at: created_at + timeout,
            expiry_token: ExpiryToken::mint(),
        }
    }

    pub fn destination_id(&self) -> Option<&DestinationId> {
        self.destination_id.as_ref()
    }

    pub fn proof_artifact_ref(&self) -> Option<&ProofRef> {
        self.proof_artifact_ref.as_ref()
    }

    pub fn reference_code(&self) -> Option<&ReferenceCode> {
        self.reference_code.as_ref()
    }

    /// Binds the payment destination. A second call keeps the first value.
    pub fn assign_destination(&mut self, destination: DestinationId) -> bool {
        if self.destination_id.is_some() {
            return false;
        }
        self.destination_id = Some(destination);
        true
    }

    /// Records the receipt handle. A second call keeps the first value.
    pub fn attach_proof(&mut self, proof: ProofRef) -> bool {
        if self.proof_artifact_ref.is_some() {
            return false;
        }
        self.proof_artifact_ref = Some(proof);
        true
    }

    pub fn set_reference(&mut self, code: ReferenceCode) -> bool {
        if self.reference_code.is_some() {
            return false;
        }
        self.reference_code = Some(code);
        true
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
