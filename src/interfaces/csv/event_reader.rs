use crate::domain::message::{Command, EventKind, InboundEvent};
use crate::domain::ports::Order;
use crate::domain::session::{Amount, ChatId, OrderId, ProofRef, UserId};
use crate::error::{PaymentError, Result};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum RecordKind {
    Text,
    Artifact,
    Command,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    delay_ms: Option<u64>,
    user: i64,
    chat: Option<i64>,
    kind: RecordKind,
    payload: Option<String>,
}

/// An inbound event together with the pause to take before delivering it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub delay: Duration,
    pub event: InboundEvent,
}

impl TryFrom<EventRecord> for ScheduledEvent {
    type Error = PaymentError;

    fn try_from(record: EventRecord) -> Result<Self> {
        let user_id = UserId(record.user);
        let chat_id = ChatId(record.chat.unwrap_or(record.user));
        let payload = record.payload.unwrap_or_default();

        let kind = match record.kind {
            RecordKind::Text => EventKind::Text(payload),
            RecordKind::Artifact => EventKind::Artifact(ProofRef::new(payload)?),
            RecordKind::Command => EventKind::Command(parse_command(&payload)?),
        };

        Ok(Self {
            delay: Duration::from_millis(record.delay_ms.unwrap_or(0)),
            event: InboundEvent::new(user_id, chat_id, kind),
        })
    }
}

/// Parses `start:<order>`, `ack` or `cancel`.
fn parse_command(payload: &str) -> Result<Command> {
    let payload = payload.trim();
    match payload.split_once(':') {
        Some(("start", order)) => Ok(Command::Start {
            order_id: OrderId::new(order)?,
        }),
        None if payload == "ack" => Ok(Command::Ack),
        None if payload == "cancel" => Ok(Command::Cancel),
        _ => Err(PaymentError::ValidationError(format!(
            "unknown command '{payload}'"
        ))),
    }
}

/// Reads inbound chat events from a CSV source.
///
/// Expected header: `delay_ms,user,chat,kind,payload`. Rows are yielded
/// lazily, and a bad row only fails that row.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    pub fn events(self) -> impl Iterator<Item = Result<ScheduledEvent>> {
        self.reader
            .into_deserialize::<EventRecord>()
            .map(|result| -> Result<ScheduledEvent> { ScheduledEvent::try_from(result?) })
    }
}

#[derive(Debug, Deserialize)]
struct OrderRecord {
    order: String,
    amount: u64,
}

/// Reads the order catalog from a CSV source with header `order,amount`.
pub struct OrderReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> OrderReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        Self { reader }
    }

    pub fn orders(self) -> impl Iterator<Item = Result<Order>> {
        self.reader.into_deserialize::<OrderRecord>().map(|result| -> Result<Order> {
            let record = result?;
            Ok(Order {
                order_id: OrderId::new(record.order)?,
                amount: Amount::new(record.amount)?,
            })
        })
    }
}
