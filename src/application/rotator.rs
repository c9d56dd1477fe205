use crate::domain::destination::Destination;
use crate::domain::ports::DestinationRotator;
use crate::domain::session::DestinationId;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug)]
struct Slot {
    destination: Destination,
    /// Monotonic stamp of the last assignment; `None` sorts first.
    stamp: Option<u64>,
}

#[derive(Debug, Default)]
struct Pool {
    slots: Vec<Slot>,
    clock: u64,
}

/// Least-recently-assigned rotation over the active destinations.
///
/// Selection and the `last_assigned_at` update happen under one lock, so
/// concurrent callers never observe the same stamp. Ties go to the
/// destination registered first.
#[derive(Clone, Default)]
pub struct LeastRecentRotator {
    pool: Arc<Mutex<Pool>>,
}

impl LeastRecentRotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_destinations<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = DestinationId>,
    {
        let rotator = Self::new();
        for id in ids {
            rotator.register(Destination::new(id)).await;
        }
        rotator
    }

    /// Adds a destination, or replaces the activity flag of a known one.
    pub async fn register(&self, destination: Destination) {
        let mut pool = self.pool.lock().await;
        match pool
            .slots
            .iter_mut()
            .find(|s| s.destination.destination_id == destination.destination_id)
        {
            Some(slot) => slot.destination.is_active = destination.is_active,
            None => pool.slots.push(Slot {
                destination,
                stamp: None,
            }),
        }
    }

    /// Returns `false` when the destination is unknown.
    pub async fn set_active(&self, id: &DestinationId, active: bool) -> bool {
        let mut pool = self.pool.lock().await;
        match pool
            .slots
            .iter_mut()
            .find(|s| &s.destination.destination_id == id)
        {
            Some(slot) => {
                slot.destination.is_active = active;
                true
            }
            None => false,
        }
    }

    pub async fn snapshot(&self) -> Vec<Destination> {
        let pool = self.pool.lock().await;
        pool.slots.iter().map(|s| s.destination.clone()).collect()
    }
}

#[async_trait]
impl DestinationRotator for LeastRecentRotator {
    async fn next(&self, exclude_last: Option<&DestinationId>) -> Option<Destination> {
        let mut pool = self.pool.lock().await;

        // stable sort keeps registration order among equal stamps
        let mut order: Vec<usize> = (0..pool.slots.len())
            .filter(|&i| pool.slots[i].destination.is_active)
            .collect();
        order.sort_by_key(|&i| pool.slots[i].stamp);

        let pick = match order.as_slice() {
            [] => {
                warn!("no active payment destination");
                return None;
            }
            [first, second, ..]
                if Some(&pool.slots[*first].destination.destination_id) == exclude_last =>
            {
                *second
            }
            [first, ..] => *first,
        };

        pool.clock += 1;
        let stamp = pool.clock;
        let slot = &mut pool.slots[pick];
        slot.stamp = Some(stamp);
        slot.destination.last_assigned_at = Some(Utc::now());

        debug!(destination = %slot.destination.destination_id, stamp, "destination assigned");
        Some(slot.destination.clone())
    }
}
