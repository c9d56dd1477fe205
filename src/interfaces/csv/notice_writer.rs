use crate::domain::message::{Choice, Notice, Outbound};
use crate::domain::ports::Notifier;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::io::Write;
use tokio::sync::Mutex;

#[derive(Debug, Serialize)]
struct NoticeRecord {
    user: i64,
    chat: i64,
    notice: &'static str,
    detail: String,
    choices: String,
}

/// Renders the parameters of a notice as `key=value` pairs.
fn detail(notice: &Notice) -> String {
    match notice {
        Notice::DestinationAssigned {
            order_id,
            destination_id,
            amount,
            expires_at,
        } => format!(
            "order={order_id} destination={destination_id} amount={amount} expires_at={}",
            expires_at.to_rfc3339()
        ),
        Notice::AlreadyActive { order_id }
        | Notice::OrderNotFound { order_id }
        | Notice::Completed { order_id }
        | Notice::Cancelled { order_id }
        | Notice::Expired { order_id } => format!("order={order_id}"),
        Notice::InvalidReference { min, max } => format!("min={min} max={max}"),
        Notice::ServiceUnavailable
        | Notice::NoActiveSession
        | Notice::SendReceipt
        | Notice::ExpectedReceipt
        | Notice::SendReference
        | Notice::SubmissionInProgress
        | Notice::SubmissionFailed => String::new(),
    }
}

fn choices(choices: &[Choice]) -> String {
    choices
        .iter()
        .map(|c| match c {
            Choice::Ack => "ack",
            Choice::Cancel => "cancel",
        })
        .collect::<Vec<_>>()
        .join("|")
}

/// Writes outbound notices as CSV rows, one flushed row per notice.
///
/// Header: `user,chat,notice,detail,choices`.
pub struct CsvNotifier<W: Write + Send> {
    writer: Mutex<csv::Writer<W>>,
}

impl<W: Write + Send> CsvNotifier<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: Mutex::new(csv::Writer::from_writer(sink)),
        }
    }

    /// Flushes and returns the underlying sink.
    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .into_inner()
            .map_err(|e| e.into_error().into())
    }
}

#[async_trait]
impl<W: Write + Send> Notifier for CsvNotifier<W> {
    async fn send(&self, outbound: Outbound) -> Result<()> {
        let record = NoticeRecord {
            user: outbound.user_id.0,
            chat: outbound.chat_id.0,
            notice: outbound.notice.kind(),
            detail: detail(&outbound.notice),
            choices: choices(&outbound.choices),
        };

        let mut writer = self.writer.lock().await;
        writer.serialize(record)?;
        writer.flush()?;
        Ok(())
    }
}
