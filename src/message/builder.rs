//! Generic builder for content variants.
//!
//! The builder only accepts payloads implementing the sealed
//! [`BuilderPayload`] trait. Text bodies do:
//!
//! ```
//! use missive::message::{
//!     BuilderPayload, MessageVariant, OutgoingMessageBuilder, PaymentActivationRequest, TextBody,
//! };
//! use missive::store::WriteTransaction;
//! use missive::thread::ThreadId;
//!
//! fn accepts<P: BuilderPayload>() {}
//! accepts::<TextBody>();
//!
//! let _builder = OutgoingMessageBuilder::new(ThreadId::generate())
//!     .payload(TextBody::new("hello"));
//! let _variant = MessageVariant::PaymentActivationRequest;
//!
//! async fn build_both(tx: &mut WriteTransaction, thread_id: ThreadId) {
//!     let _request = PaymentActivationRequest::for_thread(tx, &thread_id).await;
//!     let _text = OutgoingMessageBuilder::new(thread_id)
//!         .payload(TextBody::new("hello"))
//!         .build(tx)
//!         .await;
//! }
//! ```
//!
//! Control variants do not, so naming one as a payload is a type error:
//!
//! ```compile_fail
//! use missive::message::{BuilderPayload, PaymentActivationRequest};
//!
//! fn accepts<P: BuilderPayload>() {}
//! accepts::<PaymentActivationRequest>();
//! ```
//!
//! ```compile_fail
//! use missive::message::{BuilderPayload, PaymentActivated};
//!
//! fn accepts<P: BuilderPayload>() {}
//! accepts::<PaymentActivated>();
//! ```
//!
//! Neither the public variant value nor a message already constructed for a
//! thread can be fed back through the builder:
//!
//! ```compile_fail
//! use missive::message::{MessageVariant, OutgoingMessageBuilder};
//! use missive::thread::ThreadId;
//!
//! let _builder = OutgoingMessageBuilder::new(ThreadId::generate())
//!     .payload(MessageVariant::PaymentActivationRequest);
//! ```
//!
//! ```compile_fail
//! use missive::message::{OutgoingMessageBuilder, PaymentActivationRequest};
//! use missive::store::WriteTransaction;
//! use missive::thread::ThreadId;
//!
//! async fn rebuild(tx: &mut WriteTransaction, thread_id: ThreadId) {
//!     let request = PaymentActivationRequest::for_thread(tx, &thread_id)
//!         .await
//!         .unwrap();
//!     let _builder = OutgoingMessageBuilder::new(thread_id).payload(request);
//! }
//! ```

use serde::Serialize;

use super::{construct_for_thread, ConstructionPath, MessageError, MessageVariant, OutgoingMessage};
use crate::store::WriteTransaction;
use crate::thread::ThreadId;

mod sealed {
    pub trait Sealed {}
}

/// Payloads that may be assembled through [`OutgoingMessageBuilder`].
///
/// Sealed: the set of builder-constructible variants is fixed by this crate.
pub trait BuilderPayload: sealed::Sealed {
    /// Validate the payload and turn it into a message variant.
    #[doc(hidden)]
    fn into_variant(self) -> Result<MessageVariant, MessageError>;
}

/// Body of a text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TextBody(String);

impl TextBody {
    /// Wrap a message body.
    pub fn new(body: impl Into<String>) -> Self {
        Self(body.into())
    }

    /// Returns the body text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl sealed::Sealed for TextBody {}

impl BuilderPayload for TextBody {
    fn into_variant(self) -> Result<MessageVariant, MessageError> {
        if self.0.trim().is_empty() {
            return Err(MessageError::EmptyBody);
        }
        Ok(MessageVariant::Text { body: self })
    }
}

/// Assembles a content message from caller-supplied fields.
///
/// Building still goes through the transaction gate: the scope must be
/// active and the thread must resolve inside it.
#[derive(Debug, Clone)]
pub struct OutgoingMessageBuilder<P = ()> {
    thread_id: ThreadId,
    payload: P,
}

impl OutgoingMessageBuilder<()> {
    /// Start a message for `thread_id`.
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            payload: (),
        }
    }

    /// Set the message payload.
    pub fn payload<P: BuilderPayload>(self, payload: P) -> OutgoingMessageBuilder<P> {
        OutgoingMessageBuilder {
            thread_id: self.thread_id,
            payload,
        }
    }

    /// Shorthand for `.payload(TextBody::new(body))`.
    pub fn text(self, body: impl Into<String>) -> OutgoingMessageBuilder<TextBody> {
        self.payload(TextBody::new(body))
    }
}

impl<P: BuilderPayload> OutgoingMessageBuilder<P> {
    /// Construct the message inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InactiveTransaction`] if the scope is not
    /// active, [`MessageError::UnresolvableThread`] if the thread does not
    /// exist in it, or [`MessageError::EmptyBody`] for a blank text body.
    pub async fn build(self, tx: &mut WriteTransaction) -> Result<OutgoingMessage, MessageError> {
        let variant = self.payload.into_variant()?;
        construct_for_thread(
            tx,
            &self.thread_id,
            variant,
            ConstructionPath::GenericBuilder,
        )
        .await
    }
}
