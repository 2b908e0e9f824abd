//! Tests for delivery-state transitions through `persist::update_delivery_state`.

use missive::message::{
    persist, DeliveryState, MessageError, MessageId, OutgoingMessage, PaymentActivationRequest,
};
use missive::store::Store;
use missive::thread;

async fn saved_request(timer_secs: u32) -> (Store, OutgoingMessage) {
    let store = Store::open_in_memory().await.expect("in-memory store");
    let mut tx = store.begin().await.expect("begin");
    let created = thread::create_contact_thread(&mut tx, "+15550100")
        .await
        .expect("create thread");
    thread::set_disappearing_timer(&mut tx, &created.id, timer_secs)
        .await
        .expect("timer");
    let message = PaymentActivationRequest::for_thread(&mut tx, &created.id)
        .await
        .expect("construct");
    persist::save(&mut tx, &message).await.expect("save");
    tx.commit().await.expect("commit");
    (store, message)
}

async fn transition(
    store: &Store,
    id: &MessageId,
    next: DeliveryState,
) -> Result<OutgoingMessage, MessageError> {
    let mut tx = store.begin().await.expect("begin");
    let result = persist::update_delivery_state(&mut tx, id, next).await;
    if result.is_ok() {
        tx.commit().await.expect("commit");
    }
    result
}

#[tokio::test]
async fn pending_sent_delivered() {
    let (store, message) = saved_request(0).await;
    let sent = transition(&store, &message.id(), DeliveryState::Sent)
        .await
        .expect("pending -> sent");
    assert_eq!(sent.delivery_state(), DeliveryState::Sent);

    let delivered = transition(&store, &message.id(), DeliveryState::Delivered)
        .await
        .expect("sent -> delivered");
    assert_eq!(delivered.delivery_state(), DeliveryState::Delivered);

    let stored = store
        .load_message(&message.id())
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(stored.delivery_state(), DeliveryState::Delivered);
    assert_eq!(stored.id(), message.id());
    assert_eq!(stored.thread_id(), message.thread_id());
    assert_eq!(stored.created_at(), message.created_at());
}

#[tokio::test]
async fn nothing_returns_to_pending() {
    let sequences: [&[DeliveryState]; 3] = [
        &[DeliveryState::Sent],
        &[DeliveryState::Sent, DeliveryState::Delivered],
        &[DeliveryState::Failed],
    ];
    for sequence in sequences {
        let (store, message) = saved_request(0).await;
        for &state in sequence {
            transition(&store, &message.id(), state)
                .await
                .expect("forward transition");
        }
        let back = transition(&store, &message.id(), DeliveryState::Pending).await;
        assert!(
            matches!(back, Err(MessageError::InvalidTransition { to: DeliveryState::Pending, .. })),
            "after {sequence:?}"
        );
    }
}

#[tokio::test]
async fn terminal_states_reject_late_feedback() {
    let (store, message) = saved_request(0).await;
    transition(&store, &message.id(), DeliveryState::Sent)
        .await
        .expect("sent");
    transition(&store, &message.id(), DeliveryState::Failed)
        .await
        .expect("failed");

    for late in [DeliveryState::Sent, DeliveryState::Delivered, DeliveryState::Failed] {
        let result = transition(&store, &message.id(), late).await;
        assert!(matches!(
            result,
            Err(MessageError::InvalidTransition {
                from: DeliveryState::Failed,
                ..
            })
        ));
    }

    let stored = store
        .load_message(&message.id())
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(stored.delivery_state(), DeliveryState::Failed);
}

#[tokio::test]
async fn sending_starts_expiration_countdown() {
    let (store, message) = saved_request(60).await;
    assert!(message.expiration().started_at.is_none());

    let sent = transition(&store, &message.id(), DeliveryState::Sent)
        .await
        .expect("sent");
    let started = sent
        .expiration()
        .started_at
        .expect("countdown should start on send");
    assert!(started >= message.created_at());
    assert_eq!(
        sent.expiration().expires_at(),
        started.checked_add_signed(chrono::Duration::seconds(60))
    );

    let stored = store
        .load_message(&message.id())
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(stored.expiration(), sent.expiration());
}

#[tokio::test]
async fn unknown_message_is_not_found() {
    let (store, _) = saved_request(0).await;
    let missing: MessageId = "0b7c8a7e-1b7e-4c1a-8f0e-6a1d2c3b4a59".parse().expect("uuid");
    let result = transition(&store, &missing, DeliveryState::Sent).await;
    assert!(matches!(result, Err(MessageError::MessageNotFound(id)) if id == missing));
}
