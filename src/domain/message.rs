use super::session::{Amount, ChatId, DestinationId, OrderId, ProofRef, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something a user did in the chat.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Text(String),
    /// An uploaded file or photo, already stored by the transport.
    Artifact(ProofRef),
    Command(Command),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start { order_id: OrderId },
    /// "I have made the transfer".
    Ack,
    Cancel,
}

impl InboundEvent {
    pub fn new(user_id: UserId, chat_id: ChatId, kind: EventKind) -> Self {
        Self {
            user_id,
            chat_id,
            kind,
        }
    }

    pub fn start(user_id: UserId, chat_id: ChatId, order_id: OrderId) -> Self {
        Self::new(user_id, chat_id, EventKind::Command(Command::Start { order_id }))
    }

    pub fn ack(user_id: UserId, chat_id: ChatId) -> Self {
        Self::new(user_id, chat_id, EventKind::Command(Command::Ack))
    }

    pub fn cancel(user_id: UserId, chat_id: ChatId) -> Self {
        Self::new(user_id, chat_id, EventKind::Command(Command::Cancel))
    }

    pub fn artifact(user_id: UserId, chat_id: ChatId, proof: ProofRef) -> Self {
        Self::new(user_id, chat_id, EventKind::Artifact(proof))
    }

    pub fn text(user_id: UserId, chat_id: ChatId, text: impl Into<String>) -> Self {
        Self::new(user_id, chat_id, EventKind::Text(text.into()))
    }
}

/// Buttons the transport may attach to a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Choice {
    Ack,
    Cancel,
}

/// What the user should be told. Rendering is left to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    DestinationAssigned {
        order_id: OrderId,
        destination_id: DestinationId,
        amount: Amount,
        expires_at: DateTime<Utc>,
    },
    AlreadyActive {
        order_id: OrderId,
    },
    ServiceUnavailable,
    OrderNotFound {
        order_id: OrderId,
    },
    NoActiveSession,
    SendReceipt,
    ExpectedReceipt,
    SendReference,
    InvalidReference {
        min: usize,
        max: usize,
    },
    SubmissionInProgress,
    SubmissionFailed,
    Completed {
        order_id: OrderId,
    },
    Cancelled {
        order_id: OrderId,
    },
    Expired {
        order_id: OrderId,
    },
}

impl Notice {
    /// Short machine name used by adapters and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Notice::DestinationAssigned { .. } => "destination_assigned",
            Notice::AlreadyActive { .. } => "already_active",
            Notice::ServiceUnavailable => "service_unavailable",
            Notice::OrderNotFound { .. } => "order_not_found",
            Notice::NoActiveSession => "no_active_session",
            Notice::SendReceipt => "send_receipt",
            Notice::ExpectedReceipt => "expected_receipt",
            Notice::SendReference => "send_reference",
            Notice::InvalidReference { .. } => "invalid_reference",
            Notice::SubmissionInProgress => "submission_in_progress",
            Notice::SubmissionFailed => "submission_failed",
            Notice::Completed { .. } => "completed",
            Notice::Cancelled { .. } => "cancelled",
            Notice::Expired { .. } => "expired",
        }
    }
}

/// One message to send back through the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    pub user_id: UserId,
    pub chat_id: ChatId,
    pub notice: Notice,
    pub choices: Vec<Choice>,
}

impl Outbound {
    pub fn new(user_id: UserId, chat_id: ChatId, notice: Notice) -> Self {
        Self {
            user_id,
            chat_id,
            notice,
            choices: Vec::new(),
        }
    }

    pub fn with_choices(mut self, choices: &[Choice]) -> Self {
        self.choices = choices.to_vec();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_is_tagged_by_kind() {
        let notice = Notice::Expired {
            order_id: OrderId::new("O1").unwrap(),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["notice"], notice.kind());
        assert_eq!(json["order_id"], "O1");

        let json = serde_json::to_value(Notice::InvalidReference { min: 5, max: 30 }).unwrap();
        assert_eq!(json["notice"], "invalid_reference");
    }

    #[test]
    fn test_outbound_choices() {
        let outbound = Outbound::new(UserId(1), ChatId(2), Notice::SendReference)
            .with_choices(&[Choice::Cancel]);
        let json = serde_json::to_string(&outbound).unwrap();
        assert!(json.contains(r#""choices":["cancel"]"#));
    }
}
