//! Tests for paired request + notice creation.

use missive::activation::{self, ActivationError};
use missive::message::{DeliveryState, MessageError, VariantKind};
use missive::notice::{self, NoticeError, NoticeKind};
use missive::store::{Store, TransactionState};
use missive::thread::{self, ThreadId};

async fn store_with_thread() -> (Store, ThreadId) {
    let store = Store::open_in_memory().await.expect("in-memory store");
    let mut tx = store.begin().await.expect("begin");
    let created = thread::create_contact_thread(&mut tx, "+15550100")
        .await
        .expect("create thread");
    tx.commit().await.expect("commit");
    (store, created.id)
}

#[tokio::test]
async fn request_creates_message_and_notice_together() {
    let (store, thread_id) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");
    let outcome = activation::request_payment_activation(&mut tx, &thread_id)
        .await
        .expect("request");
    assert_eq!(outcome.message.created_at(), outcome.notice.created_at);
    tx.commit().await.expect("commit");

    let messages = store.thread_messages(&thread_id).await.expect("messages");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message(), &outcome.message);
    assert_eq!(messages[0].kind(), VariantKind::PaymentActivationRequest);
    assert_eq!(messages[0].delivery_state(), DeliveryState::Pending);

    let notices = store.thread_notices(&thread_id).await.expect("notices");
    assert_eq!(notices, vec![outcome.notice]);
    assert_eq!(notices[0].kind, NoticeKind::PaymentsActivationRequested);
}

#[tokio::test]
async fn confirm_creates_activated_message_and_notice() {
    let (store, thread_id) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");
    let outcome = activation::confirm_payment_activation(&mut tx, &thread_id)
        .await
        .expect("confirm");
    tx.commit().await.expect("commit");

    assert_eq!(outcome.message.kind(), VariantKind::PaymentActivated);
    assert_eq!(outcome.notice.kind, NoticeKind::PaymentsActivated);
}

#[tokio::test]
async fn failed_request_aborts_scope_and_leaves_nothing() {
    let (store, thread_id) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");
    // A notice written earlier in the same scope must be discarded too.
    notice::insert_notice(&mut tx, &thread_id, NoticeKind::PaymentsActivated)
        .await
        .expect("notice");

    let result = activation::request_payment_activation(&mut tx, &ThreadId::generate()).await;
    assert!(matches!(
        result,
        Err(ActivationError::Message(MessageError::UnresolvableThread(_)))
    ));
    assert_eq!(tx.state(), TransactionState::Aborted);

    assert!(store.thread_messages(&thread_id).await.expect("messages").is_empty());
    assert!(store.thread_notices(&thread_id).await.expect("notices").is_empty());
}

#[tokio::test]
async fn request_on_inactive_scope_fails() {
    let (store, thread_id) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");
    tx.commit().await.expect("commit");

    let result = activation::request_payment_activation(&mut tx, &thread_id).await;
    assert!(matches!(
        result,
        Err(ActivationError::Message(MessageError::InactiveTransaction(
            TransactionState::Committed
        )))
    ));
}

#[tokio::test]
async fn repeated_requests_are_not_deduplicated() {
    let (store, thread_id) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");
    let first = activation::request_payment_activation(&mut tx, &thread_id)
        .await
        .expect("first");
    let second = activation::request_payment_activation(&mut tx, &thread_id)
        .await
        .expect("second");
    tx.commit().await.expect("commit");

    assert_ne!(first.message.id(), second.message.id());
    assert_eq!(store.thread_messages(&thread_id).await.expect("messages").len(), 2);
    assert_eq!(store.thread_notices(&thread_id).await.expect("notices").len(), 2);
}

#[tokio::test]
async fn notice_requires_resolvable_thread() {
    let (store, _) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");
    let result = notice::insert_notice(
        &mut tx,
        &ThreadId::generate(),
        NoticeKind::PaymentsActivationRequested,
    )
    .await;
    assert!(matches!(result, Err(NoticeError::UnresolvableThread(_))));
}
