use crate::domain::claim::Claim;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct ClaimRecord<'a> {
    order: &'a str,
    user: i64,
    destination: &'a str,
    proof: &'a str,
    reference: &'a str,
    amount: u64,
    completed_at: String,
}

/// Writes published claims to any `Write` sink (e.g., a file or stdout).
pub struct ClaimWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ClaimWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_claims(&mut self, claims: &[Claim]) -> Result<()> {
        for claim in claims {
            self.writer.serialize(ClaimRecord {
                order: claim.order_id.as_str(),
                user: claim.user_id.0,
                destination: claim.destination_id.as_str(),
                proof: claim.proof_artifact_ref.as_str(),
                reference: claim.reference_code.as_str(),
                amount: claim.amount.value(),
                completed_at: claim.completed_at.to_rfc3339(),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
