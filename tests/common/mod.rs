#![allow(dead_code)]

use payflow::application::coordinator::PaymentCoordinator;
use payflow::application::driver::FlowDriver;
use payflow::application::expiry::TokioExpiryScheduler;
use payflow::application::rotator::LeastRecentRotator;
use payflow::domain::ports::{ExpiryTicket, Order, OrderCatalogBox};
use payflow::domain::session::{Amount, DestinationId, OrderId};
use payflow::infrastructure::in_memory::{
    InMemoryOrderCatalog, InMemoryReviewQueue, InMemorySessionStore, RecordingNotifier,
};
use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct Flow {
    pub driver: FlowDriver,
    pub store: InMemorySessionStore,
    pub queue: InMemoryReviewQueue,
    pub rotator: LeastRecentRotator,
    pub notifier: RecordingNotifier,
    pub fired: Option<mpsc::UnboundedReceiver<ExpiryTicket>>,
}

impl Flow {
    pub fn coordinator(&self) -> &PaymentCoordinator {
        self.driver.coordinator()
    }
}

pub fn order(id: &str) -> OrderId {
    OrderId::new(id).unwrap()
}

/// Catalog with orders `O1`..=`O{count}`, `O1` priced at 150000.
pub async fn catalog(count: usize) -> InMemoryOrderCatalog {
    let catalog = InMemoryOrderCatalog::new();
    for i in 1..=count {
        let amount = if i == 1 { 150_000 } else { 1_000 * i as u64 };
        catalog
            .insert(Order {
                order_id: order(&format!("O{i}")),
                amount: Amount::new(amount).unwrap(),
            })
            .await;
    }
    catalog
}

pub async fn flow(destinations: &[&str], timeout: chrono::Duration) -> Flow {
    flow_with_catalog(destinations, timeout, Box::new(catalog(10).await)).await
}

pub async fn flow_with_catalog(
    destinations: &[&str],
    timeout: chrono::Duration,
    catalog: OrderCatalogBox,
) -> Flow {
    let store = InMemorySessionStore::new();
    let queue = InMemoryReviewQueue::new();
    let rotator = LeastRecentRotator::with_destinations(
        destinations.iter().map(|d| DestinationId::new(*d).unwrap()),
    )
    .await;
    let (scheduler, fired) = TokioExpiryScheduler::new();
    let notifier = RecordingNotifier::new();

    let coordinator = PaymentCoordinator::new(
        Box::new(store.clone()),
        Box::new(rotator.clone()),
        Box::new(scheduler),
        Box::new(queue.clone()),
        catalog,
        timeout,
    );
    let driver = FlowDriver::new(Arc::new(coordinator), Arc::new(notifier.clone()));

    Flow {
        driver,
        store,
        queue,
        rotator,
        notifier,
        fired: Some(fired),
    }
}

pub fn write_file(path: &Path, lines: &[&str]) -> Result<(), Error> {
    let mut file = File::create(path)?;
    for line in lines {
        writeln!(file, "{line}")?;
    }
    Ok(())
}
