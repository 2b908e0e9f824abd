//! Tests for the dispatch hand-off.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use missive::activation;
use missive::dispatch::{
    record_feedback, DispatchError, DispatchReport, Dispatcher, LoggingSender, MessageSender,
};
use missive::message::{DeliveryState, MessageError, MessageId, PersistedMessage};
use missive::store::Store;
use missive::thread::{self, ThreadId};

/// Records every message it is handed; optionally refuses them all.
#[derive(Default)]
struct RecordingSender {
    seen: Mutex<Vec<MessageId>>,
    refuse: bool,
}

#[async_trait]
impl MessageSender for RecordingSender {
    async fn send(&self, message: &PersistedMessage) -> Result<(), DispatchError> {
        self.seen.lock().expect("lock").push(message.id());
        if self.refuse {
            return Err(DispatchError::Transport("peer unreachable".to_owned()));
        }
        Ok(())
    }
}

async fn store_with_thread(store: Store) -> (Store, ThreadId) {
    let mut tx = store.begin().await.expect("begin");
    let created = thread::create_contact_thread(&mut tx, "+15550100")
        .await
        .expect("create thread");
    tx.commit().await.expect("commit");
    (store, created.id)
}

async fn queue_request(store: &Store, thread_id: &ThreadId) -> MessageId {
    let mut tx = store.begin().await.expect("begin");
    let outcome = activation::request_payment_activation(&mut tx, thread_id)
        .await
        .expect("request");
    tx.commit().await.expect("commit");
    outcome.message.id()
}

#[tokio::test]
async fn pending_messages_are_sent_once() {
    let (store, thread_id) =
        store_with_thread(Store::open_in_memory().await.expect("store")).await;
    let first = queue_request(&store, &thread_id).await;
    let second = queue_request(&store, &thread_id).await;

    let sender = Arc::new(RecordingSender::default());
    let dispatcher = Dispatcher::new(sender.clone(), 10);

    let report = dispatcher.dispatch_pending(&store).await.expect("dispatch");
    assert_eq!(report, DispatchReport { sent: 2, failed: 0, skipped: 0 });
    assert_eq!(*sender.seen.lock().expect("lock"), vec![first, second]);

    let again = dispatcher.dispatch_pending(&store).await.expect("dispatch");
    assert_eq!(again, DispatchReport::default());

    let stored = store.load_message(&first).await.expect("load").expect("exists");
    assert_eq!(stored.delivery_state(), DeliveryState::Sent);
}

#[tokio::test]
async fn transport_failure_marks_message_failed() {
    let (store, thread_id) =
        store_with_thread(Store::open_in_memory().await.expect("store")).await;
    let id = queue_request(&store, &thread_id).await;

    let sender = Arc::new(RecordingSender {
        refuse: true,
        ..RecordingSender::default()
    });
    let report = Dispatcher::new(sender, 10)
        .dispatch_pending(&store)
        .await
        .expect("dispatch");
    assert_eq!(report, DispatchReport { sent: 0, failed: 1, skipped: 0 });

    let stored = store.load_message(&id).await.expect("load").expect("exists");
    assert_eq!(stored.delivery_state(), DeliveryState::Failed);
}

#[tokio::test]
async fn batch_size_limits_one_pass() {
    let (store, thread_id) =
        store_with_thread(Store::open_in_memory().await.expect("store")).await;
    for _ in 0..3 {
        queue_request(&store, &thread_id).await;
    }

    let dispatcher = Dispatcher::new(Arc::new(LoggingSender), 2);
    let first = dispatcher.dispatch_pending(&store).await.expect("dispatch");
    assert_eq!(first.sent, 2);
    let second = dispatcher.dispatch_pending(&store).await.expect("dispatch");
    assert_eq!(second.sent, 1);
}

#[tokio::test]
async fn uncommitted_messages_are_not_dispatched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("missive.db"), 2)
        .await
        .expect("file store");
    let (store, thread_id) = store_with_thread(store).await;

    let mut tx = store.begin().await.expect("begin");
    activation::request_payment_activation(&mut tx, &thread_id)
        .await
        .expect("request");

    let sender = Arc::new(RecordingSender::default());
    let report = Dispatcher::new(sender.clone(), 10)
        .dispatch_pending(&store)
        .await
        .expect("dispatch");
    assert_eq!(report, DispatchReport::default());
    assert!(sender.seen.lock().expect("lock").is_empty());

    tx.abort().await.expect("abort");
    store.close().await;
}

#[tokio::test]
async fn delivery_receipt_after_send() {
    let (store, thread_id) =
        store_with_thread(Store::open_in_memory().await.expect("store")).await;
    let id = queue_request(&store, &thread_id).await;
    Dispatcher::new(Arc::new(LoggingSender), 10)
        .dispatch_pending(&store)
        .await
        .expect("dispatch");

    let delivered = record_feedback(&store, &id, DeliveryState::Delivered)
        .await
        .expect("receipt");
    assert_eq!(delivered.delivery_state(), DeliveryState::Delivered);

    let late = record_feedback(&store, &id, DeliveryState::Sent).await;
    assert!(matches!(
        late,
        Err(DispatchError::Message(MessageError::InvalidTransition {
            from: DeliveryState::Delivered,
            to: DeliveryState::Sent,
        }))
    ));
}

/// Counts hand-offs and holds each one briefly so passes overlap.
#[derive(Default)]
struct SlowCountingSender {
    sends: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl MessageSender for SlowCountingSender {
    async fn send(&self, _message: &PersistedMessage) -> Result<(), DispatchError> {
        self.sends.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        Ok(())
    }
}

async fn file_store_with_thread(dir: &tempfile::TempDir) -> (Store, ThreadId) {
    let store = Store::open(&dir.path().join("missive.db"), 3)
        .await
        .expect("file store");
    store_with_thread(store).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_passes_send_each_message_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (store, thread_id) = file_store_with_thread(&dir).await;
    let id = queue_request(&store, &thread_id).await;

    let sender = Arc::new(SlowCountingSender::default());
    let first = Dispatcher::new(sender.clone(), 10);
    let second = Dispatcher::new(sender.clone(), 10);

    let (a, b) = tokio::join!(first.dispatch_pending(&store), second.dispatch_pending(&store));
    let a = a.expect("first pass");
    let b = b.expect("second pass");

    assert_eq!(sender.sends.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(a.sent.saturating_add(b.sent), 1);
    let stored = store.load_message(&id).await.expect("load").expect("exists");
    assert_eq!(stored.delivery_state(), DeliveryState::Sent);
    store.close().await;
}

#[tokio::test]
async fn fresh_claim_is_left_to_its_pass() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (store, thread_id) = file_store_with_thread(&dir).await;
    let id = queue_request(&store, &thread_id).await;

    sqlx::query("UPDATE outgoing_messages SET dispatch_claimed_at_ms = ?1")
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(store.pool())
        .await
        .expect("claim");

    let sender = Arc::new(RecordingSender::default());
    let report = Dispatcher::new(sender.clone(), 10)
        .dispatch_pending(&store)
        .await
        .expect("dispatch");
    assert_eq!(report, DispatchReport::default());
    assert!(sender.seen.lock().expect("lock").is_empty());

    let stored = store.load_message(&id).await.expect("load").expect("exists");
    assert_eq!(stored.delivery_state(), DeliveryState::Pending);
    store.close().await;
}

#[tokio::test]
async fn stale_claim_is_taken_over() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (store, thread_id) = file_store_with_thread(&dir).await;
    let id = queue_request(&store, &thread_id).await;

    let an_hour_ago = chrono::Utc::now()
        .checked_sub_signed(chrono::Duration::hours(1))
        .expect("an hour ago");
    sqlx::query("UPDATE outgoing_messages SET dispatch_claimed_at_ms = ?1")
        .bind(an_hour_ago.timestamp_millis())
        .execute(store.pool())
        .await
        .expect("claim");

    let sender = Arc::new(RecordingSender::default());
    let report = Dispatcher::new(sender.clone(), 10)
        .with_claim_timeout(std::time::Duration::from_secs(60))
        .dispatch_pending(&store)
        .await
        .expect("dispatch");
    assert_eq!(report.sent, 1);
    assert_eq!(*sender.seen.lock().expect("lock"), vec![id]);
    store.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn racing_feedback_reports_the_moved_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (store, thread_id) = file_store_with_thread(&dir).await;
    let id = queue_request(&store, &thread_id).await;

    let (a, b) = tokio::join!(
        record_feedback(&store, &id, DeliveryState::Sent),
        record_feedback(&store, &id, DeliveryState::Sent),
    );
    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(DispatchError::Message(MessageError::InvalidTransition {
            from: DeliveryState::Sent,
            to: DeliveryState::Sent,
        }))
    )));
    store.close().await;
}
