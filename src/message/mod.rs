//! Outgoing messages: the shared base record, its delivery state machine, and
//! the per-variant construction rules.
//!
//! # Construction paths
//!
//! Each [`VariantKind`] declares which [`ConstructionPath`]s may produce it.
//! The rules are enforced by omission first: control variants such as
//! [`PaymentActivationRequest`] expose nothing but a `for_thread`
//! constructor, [`OutgoingMessageBuilder`] accepts only builder payloads, and
//! [`OutgoingMessage`] has no `Deserialize` impl. [`VariantKind::permits`] is
//! the runtime backstop for the one path the type system cannot see, rows
//! restored from the store.
//!
//! Every path funnels into a single gate that requires an active
//! [`WriteTransaction`] and a thread that resolves inside it. Nothing is
//! persisted until the caller hands the result to [`persist::save`].

pub mod builder;
pub mod payment;
pub mod persist;
pub mod record;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::store::{StoreError, TransactionState, WriteTransaction};
use crate::thread::{self, ThreadId};

pub use self::builder::{BuilderPayload, OutgoingMessageBuilder, TextBody};
pub use self::payment::{PaymentActivated, PaymentActivationRequest};
pub use self::persist::PersistedMessage;
pub use self::record::{MessageRecord, CURRENT_SCHEMA_VERSION};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from constructing, persisting, or restoring outgoing messages.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The transaction scope was committed or aborted before use.
    #[error("transaction is {0}, not active")]
    InactiveTransaction(TransactionState),

    /// The thread does not exist in the caller's transaction.
    #[error("thread {0} does not resolve in this transaction")]
    UnresolvableThread(ThreadId),

    /// A variant was produced through a path it does not permit.
    #[error("{variant} cannot be constructed via {path}")]
    DisallowedConstructionPath {
        /// The variant that was requested.
        variant: VariantKind,
        /// The path that was attempted.
        path: ConstructionPath,
    },

    /// Delivery state transition is not allowed.
    #[error("invalid delivery transition: {from} -> {to}")]
    InvalidTransition {
        /// The current state.
        from: DeliveryState,
        /// The requested state.
        to: DeliveryState,
    },

    /// No message with this identifier exists.
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),

    /// A text message was built without a body.
    #[error("message body is empty")]
    EmptyBody,

    /// A persisted record named a variant this build does not know.
    #[error("unknown message variant: {0:?}")]
    UnknownVariant(String),

    /// A persisted record was written by a newer schema.
    #[error("record schema version {found} is newer than supported version {supported}")]
    UnsupportedSchemaVersion {
        /// Version stored in the record.
        found: i64,
        /// Newest version this build understands.
        supported: i64,
    },

    /// A persisted record is missing a field or holds an out-of-range value.
    #[error("invalid message record: {0}")]
    InvalidRecord(String),

    /// Variant payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Store-level failure.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for MessageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InactiveTransaction(state) => Self::InactiveTransaction(state),
            StoreError::Database(err) => Self::Database(err),
            other => Self::Store(other),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Unique identifier of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// Delivery state
// ---------------------------------------------------------------------------

/// Delivery progress of an outgoing message.
///
/// `Pending` is initial, `Delivered` and `Failed` are terminal. Transitions
/// are driven by dispatch feedback and never return to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Persisted, not yet handed to transport.
    Pending,
    /// Accepted by transport.
    Sent,
    /// Acknowledged by the recipient.
    Delivered,
    /// Transport gave up.
    Failed,
}

impl DeliveryState {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::InvalidRecord`] if the value is not a known state.
    pub fn parse(s: &str) -> Result<Self, MessageError> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "failed" => Ok(Self::Failed),
            other => Err(MessageError::InvalidRecord(format!(
                "unknown delivery state {other:?}"
            ))),
        }
    }

    /// Returns `true` if no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Check if transitioning to `target` is valid.
    pub fn can_transition_to(&self, target: DeliveryState) -> bool {
        matches!(
            (self, target),
            (Self::Pending, DeliveryState::Sent)
                | (Self::Pending, DeliveryState::Failed)
                | (Self::Sent, DeliveryState::Delivered)
                | (Self::Sent, DeliveryState::Failed)
        )
    }
}

impl fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Variants
// ---------------------------------------------------------------------------

/// Ways an outgoing message can come into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructionPath {
    /// Derived from a thread inside an active transaction.
    ForThread,
    /// Assembled from caller-supplied fields by [`OutgoingMessageBuilder`].
    GenericBuilder,
    /// Rehydrated from a columnar row this store wrote.
    PersistedRecord,
    /// Decoded from an opaque archive blob.
    ExternalEncoding,
}

impl ConstructionPath {
    /// Returns a short human-readable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForThread => "for_thread",
            Self::GenericBuilder => "generic_builder",
            Self::PersistedRecord => "persisted_record",
            Self::ExternalEncoding => "external_encoding",
        }
    }
}

impl fmt::Display for ConstructionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminator of an outgoing message variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    /// Plain text content.
    Text,
    /// Ask the peer to activate payments.
    PaymentActivationRequest,
    /// Tell the peer payments are now active.
    PaymentActivated,
}

impl VariantKind {
    /// Every known variant.
    pub const ALL: [VariantKind; 3] = [
        Self::Text,
        Self::PaymentActivationRequest,
        Self::PaymentActivated,
    ];

    /// Returns the discriminator stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::PaymentActivationRequest => "payment_activation_request",
            Self::PaymentActivated => "payment_activated",
        }
    }

    /// Parse a stored discriminator.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::UnknownVariant`] if the value is unrecognised.
    pub fn parse(s: &str) -> Result<Self, MessageError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MessageError::UnknownVariant(s.to_owned()))
    }

    /// Payload fields the serialization contract persists for this variant,
    /// beyond the shared base columns.
    pub fn payload_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Text => &["body"],
            Self::PaymentActivationRequest | Self::PaymentActivated => &[],
        }
    }

    /// Control variants carry protocol signals and are never shown as chat
    /// bubbles; a local notice stands in for them.
    pub fn is_control(&self) -> bool {
        !matches!(self, Self::Text)
    }

    /// Whether `path` may produce this variant.
    pub fn permits(&self, path: ConstructionPath) -> bool {
        match path {
            ConstructionPath::ForThread | ConstructionPath::PersistedRecord => true,
            ConstructionPath::GenericBuilder | ConstructionPath::ExternalEncoding => {
                !self.is_control()
            }
        }
    }

    /// Fail with [`MessageError::DisallowedConstructionPath`] unless `path`
    /// may produce this variant.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::DisallowedConstructionPath`] for forbidden paths.
    pub fn ensure_permits(&self, path: ConstructionPath) -> Result<(), MessageError> {
        if self.permits(path) {
            return Ok(());
        }
        error!(variant = self.as_str(), path = path.as_str(), "disallowed construction path");
        Err(MessageError::DisallowedConstructionPath {
            variant: *self,
            path,
        })
    }
}

impl fmt::Display for VariantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific content of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum MessageVariant {
    /// Plain text content.
    Text {
        /// Message body.
        body: TextBody,
    },
    /// Ask the peer to activate payments.
    PaymentActivationRequest,
    /// Tell the peer payments are now active.
    PaymentActivated,
}

impl MessageVariant {
    /// The discriminator of this variant.
    pub fn kind(&self) -> VariantKind {
        match self {
            Self::Text { .. } => VariantKind::Text,
            Self::PaymentActivationRequest => VariantKind::PaymentActivationRequest,
            Self::PaymentActivated => VariantKind::PaymentActivated,
        }
    }
}

// ---------------------------------------------------------------------------
// Base record
// ---------------------------------------------------------------------------

/// Disappearing-message state of an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Expiration {
    /// Lifetime after the timer starts, `0` when the message never expires.
    pub expires_in_secs: u32,
    /// When the countdown began; starts once the message is sent.
    pub started_at: Option<DateTime<Utc>>,
}

impl Expiration {
    /// An expiration that never fires.
    pub const NEVER: Expiration = Expiration {
        expires_in_secs: 0,
        started_at: None,
    };

    /// Returns `true` if this message disappears after its timer.
    pub fn is_enabled(&self) -> bool {
        self.expires_in_secs > 0
    }

    /// When the message expires, if its timer is running.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let started = self.started_at?;
        started.checked_add_signed(chrono::Duration::seconds(i64::from(self.expires_in_secs)))
    }
}

/// An outgoing message bound to a conversation thread.
///
/// Identity, thread, creation time, and variant are fixed at construction.
/// Only the delivery state moves, and only forward. There is deliberately
/// no `Deserialize` impl: the only way back from bytes is through a row
/// this crate persisted, see [`persist::load`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    id: MessageId,
    thread_id: ThreadId,
    created_at: DateTime<Utc>,
    delivery_state: DeliveryState,
    expiration: Expiration,
    variant: MessageVariant,
}

impl OutgoingMessage {
    /// Unique identifier.
    pub fn id(&self) -> MessageId {
        self.id
    }

    /// Owning thread.
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// Creation time, the transaction-consistent "now" of the creating scope.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current delivery state.
    pub fn delivery_state(&self) -> DeliveryState {
        self.delivery_state
    }

    /// Disappearing-message state.
    pub fn expiration(&self) -> Expiration {
        self.expiration
    }

    /// Variant payload.
    pub fn variant(&self) -> &MessageVariant {
        &self.variant
    }

    /// Variant discriminator.
    pub fn kind(&self) -> VariantKind {
        self.variant.kind()
    }

    /// Whether the conversation view shows this message as a bubble.
    pub fn renders_in_conversation(&self) -> bool {
        !self.kind().is_control()
    }

    /// Advance the delivery state, starting the expiration countdown the
    /// first time the message leaves `Pending` as sent.
    pub(crate) fn apply_transition(
        &mut self,
        next: DeliveryState,
        at: DateTime<Utc>,
    ) -> Result<(), MessageError> {
        if !self.delivery_state.can_transition_to(next) {
            return Err(MessageError::InvalidTransition {
                from: self.delivery_state,
                to: next,
            });
        }
        if next == DeliveryState::Sent
            && self.expiration.is_enabled()
            && self.expiration.started_at.is_none()
        {
            self.expiration.started_at = Some(at);
        }
        self.delivery_state = next;
        Ok(())
    }
}

/// The single gate every construction path passes through.
///
/// Checks the scope is active and the thread resolves inside it, then
/// allocates a fresh `Pending` message. Allocation only: persisting is the
/// caller's explicit next step.
pub(crate) async fn construct_for_thread(
    tx: &mut WriteTransaction,
    thread_id: &ThreadId,
    variant: MessageVariant,
    path: ConstructionPath,
) -> Result<OutgoingMessage, MessageError> {
    let kind = variant.kind();
    kind.ensure_permits(path)?;

    if !tx.is_active() {
        return Err(MessageError::InactiveTransaction(tx.state()));
    }
    let thread = thread::resolve(tx, thread_id)
        .await?
        .ok_or_else(|| MessageError::UnresolvableThread(thread_id.clone()))?;

    let message = OutgoingMessage {
        id: MessageId::generate(),
        thread_id: thread.id,
        created_at: tx.now(),
        delivery_state: DeliveryState::Pending,
        expiration: Expiration {
            expires_in_secs: thread.disappearing_timer_secs,
            started_at: None,
        },
        variant,
    };

    debug!(
        message_id = %message.id,
        thread_id = %message.thread_id,
        variant = kind.as_str(),
        path = path.as_str(),
        "outgoing message constructed"
    );
    Ok(message)
}
