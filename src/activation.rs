//! Payment activation as one unit: the control message for the peer and the
//! notice for the local user.
//!
//! The message core leaves pairing the two to callers. These helpers make the
//! pairing all-or-nothing: both rows are written in the caller's scope, and
//! if either step fails the scope is aborted so neither can be committed.

use serde::Serialize;
use tracing::{info, warn};

use crate::message::{
    persist, MessageError, OutgoingMessage, PaymentActivated, PaymentActivationRequest,
};
use crate::notice::{self, LocalNotice, NoticeError, NoticeKind};
use crate::store::WriteTransaction;
use crate::thread::ThreadId;

/// Errors from the paired activation helpers.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    /// Building or saving the control message failed.
    #[error(transparent)]
    Message(#[from] MessageError),

    /// Creating the local notice failed.
    #[error(transparent)]
    Notice(#[from] NoticeError),
}

/// The two records created by one activation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivationOutcome {
    /// Control message to dispatch after commit.
    pub message: OutgoingMessage,
    /// History entry for the local user.
    pub notice: LocalNotice,
}

/// Ask the peer of `thread_id` to activate payments.
///
/// Creates and saves a [`PaymentActivationRequest`] and a
/// [`NoticeKind::PaymentsActivationRequested`] notice in `tx`. The caller
/// commits; dispatch happens after that.
///
/// # Errors
///
/// Propagates construction, persistence, and notice errors. On any error
/// `tx` is aborted before returning.
pub async fn request_payment_activation(
    tx: &mut WriteTransaction,
    thread_id: &ThreadId,
) -> Result<ActivationOutcome, ActivationError> {
    let result = create_request(tx, thread_id).await;
    finish(tx, thread_id, "payment activation requested", result).await
}

/// Tell the peer of `thread_id` that payments are now active.
///
/// # Errors
///
/// Same as [`request_payment_activation`].
pub async fn confirm_payment_activation(
    tx: &mut WriteTransaction,
    thread_id: &ThreadId,
) -> Result<ActivationOutcome, ActivationError> {
    let result = create_confirmation(tx, thread_id).await;
    finish(tx, thread_id, "payment activation confirmed", result).await
}

async fn create_request(
    tx: &mut WriteTransaction,
    thread_id: &ThreadId,
) -> Result<ActivationOutcome, ActivationError> {
    let message = PaymentActivationRequest::for_thread(tx, thread_id).await?;
    persist::save(tx, &message).await?;
    let notice =
        notice::insert_notice(tx, thread_id, NoticeKind::PaymentsActivationRequested).await?;
    Ok(ActivationOutcome { message, notice })
}

async fn create_confirmation(
    tx: &mut WriteTransaction,
    thread_id: &ThreadId,
) -> Result<ActivationOutcome, ActivationError> {
    let message = PaymentActivated::for_thread(tx, thread_id).await?;
    persist::save(tx, &message).await?;
    let notice = notice::insert_notice(tx, thread_id, NoticeKind::PaymentsActivated).await?;
    Ok(ActivationOutcome { message, notice })
}

async fn finish(
    tx: &mut WriteTransaction,
    thread_id: &ThreadId,
    what: &'static str,
    result: Result<ActivationOutcome, ActivationError>,
) -> Result<ActivationOutcome, ActivationError> {
    match result {
        Ok(outcome) => {
            info!(thread_id = %thread_id, message_id = %outcome.message.id(), "{what}");
            Ok(outcome)
        }
        Err(err) => {
            if tx.is_active() {
                if let Err(abort_err) = tx.abort().await {
                    warn!(error = %abort_err, "abort after failed activation also failed");
                }
            }
            warn!(thread_id = %thread_id, error = %err, "{what} failed; scope aborted");
            Err(err)
        }
    }
}
