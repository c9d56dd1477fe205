mod common;

use common::{flow, order};
use payflow::domain::message::{Choice, InboundEvent, Notice};
use payflow::domain::ports::{ClaimPublisher, DestinationRotatorBox, SessionStore, SessionStoreBox};
use payflow::domain::session::{ChatId, DestinationId, ProofRef, SessionState, UserId};
use std::collections::HashMap;
use std::sync::Arc;

fn proof(name: &str) -> ProofRef {
    ProofRef::new(name).unwrap()
}

#[tokio::test]
async fn test_happy_path_publishes_one_claim() {
    let flow = flow(&["D3"], chrono::Duration::minutes(15)).await;
    let (user, chat) = (UserId(7), ChatId(70));

    flow.driver.dispatch(InboundEvent::start(user, chat, order("O1"))).await;
    flow.driver.dispatch(InboundEvent::ack(user, chat)).await;
    flow.driver.dispatch(InboundEvent::artifact(user, chat, proof("photo-1"))).await;
    flow.driver.dispatch(InboundEvent::text(user, chat, "AB12345")).await;

    let sent = flow.notifier.sent().await;
    let kinds: Vec<&str> = sent.iter().map(|o| o.notice.kind()).collect();
    assert_eq!(
        kinds,
        vec!["destination_assigned", "send_receipt", "send_reference", "completed"]
    );
    assert_eq!(sent[0].choices, vec![Choice::Ack, Choice::Cancel]);
    assert!(sent.iter().all(|o| o.chat_id == chat));

    let claims = flow.queue.published().await.unwrap();
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].order_id, order("O1"));
    assert_eq!(claims[0].destination_id.as_str(), "D3");
    assert_eq!(claims[0].proof_artifact_ref.as_str(), "photo-1");
    assert_eq!(claims[0].reference_code.as_str(), "AB12345");
    assert_eq!(claims[0].amount.value(), 150_000);

    assert!(matches!(
        flow.store.get(user).await,
        Err(payflow::error::SessionError::NotFound)
    ));
}

#[tokio::test]
async fn test_text_instead_of_receipt_keeps_state() {
    let flow = flow(&["D1"], chrono::Duration::minutes(15)).await;
    let (user, chat) = (UserId(1), ChatId(1));

    flow.driver.dispatch(InboundEvent::start(user, chat, order("O1"))).await;
    flow.driver.dispatch(InboundEvent::ack(user, chat)).await;
    flow.driver.dispatch(InboundEvent::text(user, chat, "here you go")).await;

    let sent = flow.notifier.sent().await;
    assert_eq!(sent[2].notice, Notice::ExpectedReceipt);
    let session = flow.store.get(user).await.unwrap();
    assert_eq!(session.state, SessionState::AwaitingProof);
}

#[tokio::test]
async fn test_short_reference_is_rejected_then_accepted() {
    let flow = flow(&["D1"], chrono::Duration::minutes(15)).await;
    let (user, chat) = (UserId(2), ChatId(2));

    flow.driver.dispatch(InboundEvent::start(user, chat, order("O2"))).await;
    flow.driver.dispatch(InboundEvent::ack(user, chat)).await;
    flow.driver.dispatch(InboundEvent::artifact(user, chat, proof("p"))).await;
    flow.driver.dispatch(InboundEvent::text(user, chat, "A1")).await;

    assert_eq!(
        flow.store.get(user).await.unwrap().state,
        SessionState::AwaitingReference
    );
    flow.driver.dispatch(InboundEvent::text(user, chat, "A1B2C3")).await;

    let sent = flow.notifier.sent().await;
    assert_eq!(sent[3].notice, Notice::InvalidReference { min: 5, max: 30 });
    assert_eq!(sent[4].notice, Notice::Completed { order_id: order("O2") });
    assert_eq!(flow.queue.published().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_start_is_refused_while_active() {
    let flow = flow(&["D1", "D2"], chrono::Duration::minutes(15)).await;
    let (user, chat) = (UserId(3), ChatId(3));

    flow.driver.dispatch(InboundEvent::start(user, chat, order("O1"))).await;
    flow.driver.dispatch(InboundEvent::start(user, chat, order("O2"))).await;

    let sent = flow.notifier.sent().await;
    assert_eq!(sent[1].notice, Notice::AlreadyActive { order_id: order("O1") });
    let session = flow.store.get(user).await.unwrap();
    assert_eq!(session.order_id, order("O1"));
    assert_eq!(session.state, SessionState::AwaitingAck);
}

#[tokio::test]
async fn test_cancel_then_start_again() {
    let flow = flow(&["D1"], chrono::Duration::minutes(15)).await;
    let (user, chat) = (UserId(4), ChatId(4));

    flow.driver.dispatch(InboundEvent::start(user, chat, order("O1"))).await;
    flow.driver.dispatch(InboundEvent::cancel(user, chat)).await;
    flow.driver.dispatch(InboundEvent::ack(user, chat)).await;
    flow.driver.dispatch(InboundEvent::start(user, chat, order("O2"))).await;

    let sent = flow.notifier.sent().await;
    assert_eq!(sent[1].notice, Notice::Cancelled { order_id: order("O1") });
    assert_eq!(sent[2].notice, Notice::NoActiveSession);
    assert_eq!(sent[3].notice.kind(), "destination_assigned");

    let health = flow.coordinator().health().await;
    assert_eq!(health.cancelled, 1);
    assert_eq!(health.started, 2);
    assert_eq!(health.active_sessions, 1);
}

#[tokio::test]
async fn test_unknown_order_creates_nothing() {
    let flow = flow(&["D1"], chrono::Duration::minutes(15)).await;
    flow.driver
        .dispatch(InboundEvent::start(UserId(5), ChatId(5), order("NOPE")))
        .await;

    let sent = flow.notifier.sent().await;
    assert_eq!(sent[0].notice, Notice::OrderNotFound { order_id: order("NOPE") });
    assert_eq!(flow.store.active_count().await.unwrap(), 0);
    assert!(flow.rotator.snapshot().await.iter().all(|d| d.last_assigned_at.is_none()));
}

#[tokio::test]
async fn test_all_destinations_inactive_reports_unavailable() {
    let flow = flow(&["D1"], chrono::Duration::minutes(15)).await;
    assert!(flow.rotator.set_active(&DestinationId::new("D1").unwrap(), false).await);

    flow.driver
        .dispatch(InboundEvent::start(UserId(6), ChatId(6), order("O1")))
        .await;

    let sent = flow.notifier.sent().await;
    assert_eq!(sent[0].notice, Notice::ServiceUnavailable);
    assert_eq!(flow.store.active_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failed_publish_can_be_retried() {
    let flow = flow(&["D1"], chrono::Duration::minutes(15)).await;
    let (user, chat) = (UserId(8), ChatId(8));
    flow.queue.fail_next(1);

    flow.driver.dispatch(InboundEvent::start(user, chat, order("O1"))).await;
    flow.driver.dispatch(InboundEvent::artifact(user, chat, proof("p"))).await;
    flow.driver.dispatch(InboundEvent::text(user, chat, "REF-00001")).await;
    assert_eq!(
        flow.store.get(user).await.unwrap().state,
        SessionState::AwaitingReference
    );
    flow.driver.dispatch(InboundEvent::text(user, chat, "REF-00001")).await;

    let sent = flow.notifier.sent().await;
    assert_eq!(sent[2].notice, Notice::SubmissionFailed);
    assert_eq!(sent[3].notice, Notice::Completed { order_id: order("O1") });
    assert_eq!(flow.queue.published().await.unwrap().len(), 1);
    assert_eq!(flow.coordinator().health().await.publish_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timer_expires_idle_session() {
    let mut flow = flow(&["D1"], chrono::Duration::seconds(30)).await;
    let worker = flow.driver.spawn_expiry_worker(flow.fired.take().unwrap());
    let (user, chat) = (UserId(9), ChatId(90));

    flow.driver.dispatch(InboundEvent::start(user, chat, order("O1"))).await;
    flow.driver.dispatch(InboundEvent::ack(user, chat)).await;
    tokio::time::sleep(std::time::Duration::from_secs(31)).await;

    let sent = flow.notifier.sent().await;
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[2].notice, Notice::Expired { order_id: order("O1") });
    assert_eq!(sent[2].chat_id, chat);
    assert_eq!(flow.store.active_count().await.unwrap(), 0);
    // expiry does not hand the destination back early
    assert!(flow.rotator.snapshot().await[0].last_assigned_at.is_some());

    // A late artifact finds nothing to attach to
    flow.driver.dispatch(InboundEvent::artifact(user, chat, proof("late"))).await;
    assert_eq!(flow.notifier.sent().await[3].notice, Notice::NoActiveSession);
    assert!(flow.queue.published().await.unwrap().is_empty());
    worker.abort();
}

#[tokio::test(start_paused = true)]
async fn test_completion_disarms_timer() {
    let mut flow = flow(&["D1"], chrono::Duration::seconds(30)).await;
    let worker = flow.driver.spawn_expiry_worker(flow.fired.take().unwrap());
    let (user, chat) = (UserId(10), ChatId(10));

    flow.driver.dispatch(InboundEvent::start(user, chat, order("O1"))).await;
    flow.driver.dispatch(InboundEvent::artifact(user, chat, proof("p"))).await;
    flow.driver.dispatch(InboundEvent::text(user, chat, "AB12345")).await;
    tokio::time::sleep(std::time::Duration::from_secs(60)).await;

    let sent = flow.notifier.sent().await;
    assert_eq!(sent.last().unwrap().notice.kind(), "completed");
    assert!(sent.iter().all(|o| o.notice.kind() != "expired"));
    let health = flow.coordinator().health().await;
    assert_eq!((health.completed, health.expired), (1, 0));
    worker.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_for_one_user_yield_one_session() {
    let flow = flow(&["D1", "D2"], chrono::Duration::minutes(15)).await;
    let driver = Arc::new(flow.driver.clone());

    let mut handles = Vec::new();
    for i in 1..=8 {
        let driver = Arc::clone(&driver);
        handles.push(tokio::spawn(async move {
            driver
                .dispatch(InboundEvent::start(UserId(11), ChatId(11), order(&format!("O{i}"))))
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let sent = flow.notifier.sent().await;
    let assigned = sent
        .iter()
        .filter(|o| o.notice.kind() == "destination_assigned")
        .count();
    let refused = sent
        .iter()
        .filter(|o| o.notice.kind() == "already_active")
        .count();
    assert_eq!(assigned, 1);
    assert_eq!(refused, 7);
    assert_eq!(flow.store.active_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rotation_is_balanced_across_users() {
    let flow = flow(&["D1", "D2", "D3"], chrono::Duration::minutes(15)).await;
    let driver = Arc::new(flow.driver.clone());

    let mut handles = Vec::new();
    for user in 0..30 {
        let driver = Arc::clone(&driver);
        handles.push(tokio::spawn(async move {
            driver
                .dispatch(InboundEvent::start(UserId(user), ChatId(user), order("O1")))
                .await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut per_destination: HashMap<String, usize> = HashMap::new();
    for outbound in flow.notifier.sent().await {
        if let Notice::DestinationAssigned { destination_id, .. } = outbound.notice {
            *per_destination.entry(destination_id.to_string()).or_default() += 1;
        }
    }
    assert_eq!(per_destination.len(), 3);
    assert!(per_destination.values().all(|n| *n == 10));
}

#[test]
fn test_ports_are_object_safe_and_shareable() {
    fn assert_send_sync<T: Send + Sync + ?Sized>() {}
    assert_send_sync::<SessionStoreBox>();
    assert_send_sync::<DestinationRotatorBox>();
    assert_send_sync::<dyn ClaimPublisher>();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_and_expiry_race_has_one_winner() {
    use payflow::domain::ports::ExpiryTicket;
    use rand::Rng;

    const USERS: i64 = 50;
    let flow = flow(&["D1", "D2"], chrono::Duration::minutes(15)).await;
    let driver = Arc::new(flow.driver.clone());

    let mut handles = Vec::new();
    for user in 0..USERS {
        let (user_id, chat_id) = (UserId(user), ChatId(user));
        driver.dispatch(InboundEvent::start(user_id, chat_id, order("O1"))).await;
        driver
            .dispatch(InboundEvent::artifact(user_id, chat_id, proof("p")))
            .await;
        let ticket = ExpiryTicket::for_session(&flow.store.get(user_id).await.unwrap());

        let (submit_yields, expire_yields) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(0..4), rng.gen_range(0..4))
        };
        let submitter = Arc::clone(&driver);
        handles.push(tokio::spawn(async move {
            for _ in 0..submit_yields {
                tokio::task::yield_now().await;
            }
            submitter
                .dispatch(InboundEvent::text(user_id, chat_id, "AB12345"))
                .await;
        }));
        let expirer = Arc::clone(&driver);
        handles.push(tokio::spawn(async move {
            for _ in 0..expire_yields {
                tokio::task::yield_now().await;
            }
            expirer.coordinator().expire(ticket).await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let health = flow.coordinator().health().await;
    assert_eq!(health.completed + health.expired, USERS as u64);
    assert_eq!(
        flow.queue.published().await.unwrap().len() as u64,
        health.completed
    );
    assert_eq!(health.active_sessions, 0);
}
