use super::session::DestinationId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bank card or account a paying user can transfer to.
///
/// Activation is owned by whoever manages the destination list; the rotator
/// only reads `is_active` and stamps `last_assigned_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Destination {
    pub destination_id: DestinationId,
    pub is_active: bool,
    pub last_assigned_at: Option<DateTime<Utc>>,
}

impl Destination {
    pub fn new(destination_id: DestinationId) -> Self {
        Self {
            destination_id,
            is_active: true,
            last_assigned_at: None,
        }
    }
}
