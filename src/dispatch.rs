//! Hand-off from committed storage to the transport.
//!
//! The transport itself lives outside this crate behind [`MessageSender`].
//! The [`Dispatcher`] first claims a batch of pending rows in a short write
//! scope, then hands each claimed message to the sender as a
//! [`PersistedMessage`] read back after commit, and records the feedback as
//! delivery-state transitions in fresh transactions. Overlapping passes skip
//! rows another pass has claimed until that claim goes stale. Retry policy
//! belongs to the sender.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::message::{persist, DeliveryState, MessageError, MessageId, PersistedMessage};
use crate::store::{Store, StoreError};

/// Default number of pending messages handled per dispatch pass.
pub const DEFAULT_BATCH_SIZE: u32 = 50;

/// Default age after which another pass may take over a claimed message.
pub const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 300;

/// Errors from the dispatch layer.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The transport rejected or failed to send the message.
    #[error("transport error: {0}")]
    Transport(String),

    /// The message could not be encoded for transport.
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),

    /// Loading or updating the message failed.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Opening or committing the feedback transaction failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transport for outgoing messages.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Transmit one persisted message.
    async fn send(&self, message: &PersistedMessage) -> Result<(), DispatchError>;
}

/// Sender that only logs the hand-off; used by the CLI's dry runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSender;

#[async_trait]
impl MessageSender for LoggingSender {
    async fn send(&self, message: &PersistedMessage) -> Result<(), DispatchError> {
        let encoded = serde_json::to_string(message.message())?;
        info!(
            message_id = %message.id(),
            thread_id = %message.thread_id(),
            variant = message.kind().as_str(),
            payload = %encoded,
            "message handed to transport"
        );
        Ok(())
    }
}

/// Outcome of one dispatch pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Messages the sender accepted.
    pub sent: usize,
    /// Messages the sender rejected.
    pub failed: usize,
    /// Messages whose state another pass or receipt had already moved.
    pub skipped: usize,
}

/// Drains pending messages into a [`MessageSender`].
pub struct Dispatcher {
    sender: Arc<dyn MessageSender>,
    batch_size: u32,
    claim_timeout: Duration,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("batch_size", &self.batch_size)
            .field("claim_timeout", &self.claim_timeout)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher handling at most `batch_size` messages per pass.
    pub fn new(sender: Arc<dyn MessageSender>, batch_size: u32) -> Self {
        Self {
            sender,
            batch_size: batch_size.max(1),
            claim_timeout: Duration::from_secs(DEFAULT_CLAIM_TIMEOUT_SECS),
        }
    }

    /// Let other passes take over a claimed message once its claim is older
    /// than `timeout`.
    pub fn with_claim_timeout(mut self, timeout: Duration) -> Self {
        self.claim_timeout = timeout;
        self
    }

    /// Send every pending message (up to the batch size), oldest first.
    ///
    /// Each accepted message moves to `Sent`, each rejected one to `Failed`.
    /// A message whose state changed before its feedback was recorded is
    /// counted as skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if claiming, loading, or recording feedback fails
    /// at the store. Transport failures are recorded, not returned.
    pub async fn dispatch_pending(&self, store: &Store) -> Result<DispatchReport, DispatchError> {
        let mut report = DispatchReport::default();
        let claimed = self.claim_batch(store).await?;

        for id in claimed {
            let message = match store.load_message(&id).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    report.skipped = report.skipped.saturating_add(1);
                    continue;
                }
                Err(err @ MessageError::Database(_)) => return Err(err.into()),
                Err(err) => {
                    warn!(message_id = %id, error = %err, "skipping unrestorable message");
                    report.skipped = report.skipped.saturating_add(1);
                    continue;
                }
            };
            if message.delivery_state() != DeliveryState::Pending {
                report.skipped = report.skipped.saturating_add(1);
                continue;
            }

            let outcome = match self.sender.send(&message).await {
                Ok(()) => DeliveryState::Sent,
                Err(err) => {
                    warn!(message_id = %id, error = %err, "dispatch failed");
                    DeliveryState::Failed
                }
            };

            match record_feedback(store, &id, outcome).await {
                Ok(_) => match outcome {
                    DeliveryState::Sent => report.sent = report.sent.saturating_add(1),
                    _ => report.failed = report.failed.saturating_add(1),
                },
                Err(DispatchError::Message(MessageError::InvalidTransition { from, to })) => {
                    warn!(
                        message_id = %id,
                        from = %from,
                        to = %to,
                        "delivery state already moved, feedback dropped"
                    );
                    report.skipped = report.skipped.saturating_add(1);
                }
                Err(err) => return Err(err),
            }
        }

        if report != DispatchReport::default() {
            info!(
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                "dispatch pass finished"
            );
        }
        Ok(report)
    }

    /// Claim up to one batch of pending messages and commit the claim.
    async fn claim_batch(&self, store: &Store) -> Result<Vec<MessageId>, DispatchError> {
        let stale_before = chrono::Duration::from_std(self.claim_timeout)
            .ok()
            .and_then(|timeout| Utc::now().checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        // Committed read first, so an idle pass never waits on the write lock.
        if !store.has_claimable(stale_before).await? {
            return Ok(Vec::new());
        }

        let mut tx = store.begin().await?;
        let claimed = persist::claim_pending(&mut tx, self.batch_size, stale_before).await?;
        tx.commit().await?;
        debug!(claimed = claimed.len(), "dispatch batch claimed");
        Ok(claimed)
    }
}

/// Record transport or recipient feedback for a message in its own
/// transaction.
///
/// # Errors
///
/// Returns [`MessageError::InvalidTransition`] (wrapped) for non-monotonic
/// feedback, e.g. a late `Sent` after `Delivered`; nothing is written then.
pub async fn record_feedback(
    store: &Store,
    id: &MessageId,
    state: DeliveryState,
) -> Result<PersistedMessage, DispatchError> {
    let mut tx = store.begin().await?;
    persist::update_delivery_state(&mut tx, id, state).await?;
    tx.commit().await?;

    store
        .load_message(id)
        .await?
        .ok_or(DispatchError::Message(MessageError::MessageNotFound(*id)))
}
