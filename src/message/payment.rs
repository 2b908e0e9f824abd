//! Payment activation control messages.
//!
//! [`PaymentActivationRequest`] asks the peer to turn on payments;
//! [`PaymentActivated`] tells the peer the local user has done so. Neither
//! carries a payload beyond the base record, and neither is rendered in the
//! conversation: callers create a [`LocalNotice`](crate::notice::LocalNotice)
//! for the user at the same time (see [`crate::activation`]).
//!
//! Both types are namespaces that are never instantiated. `for_thread` is the
//! only way to obtain their messages; there is no builder payload and no
//! decoder. Repeated calls produce distinct messages, so duplicate
//! suppression is up to the caller.

use super::{construct_for_thread, ConstructionPath, MessageError, MessageVariant, OutgoingMessage};
use crate::store::WriteTransaction;
use crate::thread::ThreadId;

/// Outgoing request asking a contact to activate payments.
#[derive(Debug)]
pub struct PaymentActivationRequest {
    _private: (),
}

impl PaymentActivationRequest {
    /// Construct a request for `thread_id` inside `tx`.
    ///
    /// The message is allocated but not persisted; pass it to
    /// [`persist::save`](super::persist::save) in the same scope.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InactiveTransaction`] if the scope is not
    /// active, or [`MessageError::UnresolvableThread`] if the thread does not
    /// exist in it.
    pub async fn for_thread(
        tx: &mut WriteTransaction,
        thread_id: &ThreadId,
    ) -> Result<OutgoingMessage, MessageError> {
        construct_for_thread(
            tx,
            thread_id,
            MessageVariant::PaymentActivationRequest,
            ConstructionPath::ForThread,
        )
        .await
    }
}

/// Outgoing notice telling a contact that payments were activated in
/// response to their request.
#[derive(Debug)]
pub struct PaymentActivated {
    _private: (),
}

impl PaymentActivated {
    /// Construct an activation confirmation for `thread_id` inside `tx`.
    ///
    /// # Errors
    ///
    /// Same as [`PaymentActivationRequest::for_thread`].
    pub async fn for_thread(
        tx: &mut WriteTransaction,
        thread_id: &ThreadId,
    ) -> Result<OutgoingMessage, MessageError> {
        construct_for_thread(
            tx,
            thread_id,
            MessageVariant::PaymentActivated,
            ConstructionPath::ForThread,
        )
        .await
    }
}
