//! Tests for `src/message/builder.rs` (the generic builder path).

use missive::message::{
    MessageError, MessageVariant, OutgoingMessageBuilder, TextBody, VariantKind,
};
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
async fn builder_produces_text_message() {
    let (store, thread_id) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");

    let message = OutgoingMessageBuilder::new(thread_id.clone())
        .text("hello there")
        .build(&mut tx)
        .await
        .expect("build");

    assert_eq!(message.kind(), VariantKind::Text);
    assert_eq!(
        message.variant(),
        &MessageVariant::Text {
            body: TextBody::new("hello there")
        }
    );
    assert!(message.renders_in_conversation());
    assert_eq!(message.thread_id(), &thread_id);
}

#[tokio::test]
async fn builder_rejects_blank_body() {
    let (store, thread_id) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");

    let result = OutgoingMessageBuilder::new(thread_id)
        .payload(TextBody::new("   "))
        .build(&mut tx)
        .await;
    assert!(matches!(result, Err(MessageError::EmptyBody)));
}

#[tokio::test]
async fn builder_still_requires_active_scope() {
    let (store, thread_id) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");
    tx.abort().await.expect("abort");

    let result = OutgoingMessageBuilder::new(thread_id)
        .text("too late")
        .build(&mut tx)
        .await;
    assert!(matches!(
        result,
        Err(MessageError::InactiveTransaction(TransactionState::Aborted))
    ));
}

#[tokio::test]
async fn builder_still_requires_resolvable_thread() {
    let (store, _) = store_with_thread().await;
    let mut tx = store.begin().await.expect("begin");

    let result = OutgoingMessageBuilder::new(ThreadId::generate())
        .text("anyone?")
        .build(&mut tx)
        .await;
    assert!(matches!(result, Err(MessageError::UnresolvableThread(_))));
}
