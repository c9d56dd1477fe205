use clap::Parser;
use miette::{IntoDiagnostic, Result};
use payflow::application::coordinator::PaymentCoordinator;
use payflow::application::driver::FlowDriver;
use payflow::application::expiry::TokioExpiryScheduler;
use payflow::application::rotator::LeastRecentRotator;
use payflow::config::{Cli, LogFormat, Settings};
use payflow::domain::ports::ClaimPublisherBox;
use payflow::infrastructure::in_memory::{
    InMemoryOrderCatalog, InMemoryReviewQueue, InMemorySessionStore,
};
use payflow::interfaces::csv::claim_writer::ClaimWriter;
use payflow::interfaces::csv::event_reader::{EventReader, OrderReader};
use payflow::interfaces::csv::notice_writer::CsvNotifier;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Returns the queue handed to the coordinator and a second handle used to
/// read back what was published.
fn open_review_queue(db_path: Option<&Path>) -> Result<(ClaimPublisherBox, ClaimPublisherBox)> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let queue = payflow::infrastructure::rocksdb::RocksDBReviewQueue::open(path)
                .into_diagnostic()?;
            Ok((Box::new(queue.clone()), Box::new(queue)))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            let queue = InMemoryReviewQueue::new();
            Ok((Box::new(queue.clone()), Box::new(queue)))
        }
        None => {
            let queue = InMemoryReviewQueue::new();
            Ok((Box::new(queue.clone()), Box::new(queue)))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);
    let settings = Settings::try_from(cli).into_diagnostic()?;

    // Load the order catalog
    let catalog = InMemoryOrderCatalog::new();
    let orders = File::open(&settings.orders).into_diagnostic()?;
    for order in OrderReader::new(orders).orders() {
        match order {
            Ok(order) => catalog.insert(order).await,
            Err(e) => error!(error = %e, "Error reading order"),
        }
    }

    let rotator = LeastRecentRotator::with_destinations(settings.destinations.clone()).await;
    let (publisher, review_queue) = open_review_queue(settings.db_path.as_deref())?;
    let (scheduler, fired) = TokioExpiryScheduler::new();
    let timeout = chrono::Duration::from_std(settings.session_timeout).into_diagnostic()?;

    let coordinator = PaymentCoordinator::new(
        Box::new(InMemorySessionStore::new()),
        Box::new(rotator),
        Box::new(scheduler),
        publisher,
        Box::new(catalog),
        timeout,
    );
    let driver = FlowDriver::new(Arc::new(coordinator), Arc::new(CsvNotifier::new(io::stdout())));
    let worker = driver.spawn_expiry_worker(fired);

    // Replay inbound events
    let input = File::open(&settings.input).into_diagnostic()?;
    for scheduled in EventReader::new(input).events() {
        match scheduled {
            Ok(scheduled) => {
                if !scheduled.delay.is_zero() {
                    tokio::time::sleep(scheduled.delay).await;
                }
                driver.dispatch(scheduled.event).await;
            }
            Err(e) => error!(error = %e, "Error reading event"),
        }
    }

    // Give open sessions a chance to finish or expire
    let linger_until = Instant::now() + settings.linger;
    while Instant::now() < linger_until
        && (driver.coordinator().health().await.active_sessions > 0 || !driver.is_idle())
    {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    worker.abort();

    let health = driver.coordinator().health().await;
    info!(
        active_sessions = health.active_sessions,
        started = health.started,
        completed = health.completed,
        cancelled = health.cancelled,
        expired = health.expired,
        publish_failures = health.publish_failures,
        expiry_rate = health.expiry_rate(),
        "run finished"
    );

    if let Some(path) = &settings.claims_out {
        let claims = review_queue.published().await.into_diagnostic()?;
        let file = File::create(path).into_diagnostic()?;
        ClaimWriter::new(file).write_claims(&claims).into_diagnostic()?;
    }

    Ok(())
}
