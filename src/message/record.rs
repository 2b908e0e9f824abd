//! Serialization contract between [`OutgoingMessage`] and its stored row.
//!
//! A record is the base columns plus a JSON `payload` holding the variant
//! fields listed by [`VariantKind::payload_fields`]. `schema_version` says
//! which layout wrote the row:
//!
//! | version | layout | restore rule |
//! |---|---|---|
//! | 0 | legacy archive blob in `payload` | content variants only |
//! | 1 | columnar, no expiration columns | expiration defaults to never |
//! | 2 | columnar with expiration | all columns required |
//!
//! Rows newer than [`CURRENT_SCHEMA_VERSION`] are refused rather than
//! guessed at.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    ConstructionPath, DeliveryState, Expiration, MessageError, MessageId, MessageVariant,
    OutgoingMessage, TextBody, VariantKind,
};
use crate::thread::ThreadId;

/// Layout version written by this build.
pub const CURRENT_SCHEMA_VERSION: i64 = 2;

/// Rows whose payload is a legacy keyed-archive blob.
pub const LEGACY_ARCHIVE_VERSION: i64 = 0;

/// First columnar layout, before expiration columns existed.
pub const COLUMNAR_V1: i64 = 1;

/// Row type returned by SQLite queries for outgoing messages.
pub(crate) type MessageRow = (
    String,
    String,
    String,
    i64,
    String,
    Option<i64>,
    Option<i64>,
    i64,
    String,
);

#[derive(Debug, Serialize, Deserialize)]
struct TextPayload {
    body: String,
}

/// The persisted form of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageRecord {
    /// Message identifier (UUID text).
    pub id: String,
    /// Owning thread identifier.
    pub thread_id: String,
    /// Variant discriminator, see [`VariantKind::as_str`].
    pub variant: String,
    /// Creation time in epoch milliseconds.
    pub created_at_ms: i64,
    /// Delivery state, see [`DeliveryState::as_str`].
    pub delivery_state: String,
    /// Disappearing timer; `NULL` in rows older than version 2.
    pub expires_in_secs: Option<i64>,
    /// When the expiration countdown started, in epoch milliseconds.
    pub expire_started_at_ms: Option<i64>,
    /// Layout version that wrote this row.
    pub schema_version: i64,
    /// Variant fields as a JSON object.
    pub payload: String,
}

impl From<MessageRow> for MessageRecord {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.0,
            thread_id: row.1,
            variant: row.2,
            created_at_ms: row.3,
            delivery_state: row.4,
            expires_in_secs: row.5,
            expire_started_at_ms: row.6,
            schema_version: row.7,
            payload: row.8,
        }
    }
}

impl MessageRecord {
    /// Encode a message in the current layout.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Codec`] if the payload cannot be encoded.
    pub fn from_message(message: &OutgoingMessage) -> Result<Self, MessageError> {
        let payload = match message.variant() {
            MessageVariant::Text { body } => serde_json::to_string(&TextPayload {
                body: body.as_str().to_owned(),
            })?,
            MessageVariant::PaymentActivationRequest | MessageVariant::PaymentActivated => {
                "{}".to_owned()
            }
        };
        let expiration = message.expiration();
        Ok(Self {
            id: message.id().to_string(),
            thread_id: message.thread_id().to_string(),
            variant: message.kind().as_str().to_owned(),
            created_at_ms: message.created_at().timestamp_millis(),
            delivery_state: message.delivery_state().as_str().to_owned(),
            expires_in_secs: Some(i64::from(expiration.expires_in_secs)),
            expire_started_at_ms: expiration.started_at.map(|t| t.timestamp_millis()),
            schema_version: CURRENT_SCHEMA_VERSION,
            payload,
        })
    }

    /// The construction path a restore of this record takes.
    pub fn restore_path(&self) -> ConstructionPath {
        if self.schema_version == LEGACY_ARCHIVE_VERSION {
            ConstructionPath::ExternalEncoding
        } else {
            ConstructionPath::PersistedRecord
        }
    }

    /// Rebuild the in-memory message.
    ///
    /// Only reachable from rows read out of the store; there is no public
    /// decoder for caller-supplied bytes.
    pub(crate) fn restore(self) -> Result<OutgoingMessage, MessageError> {
        if self.schema_version > CURRENT_SCHEMA_VERSION {
            return Err(MessageError::UnsupportedSchemaVersion {
                found: self.schema_version,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }
        if self.schema_version < LEGACY_ARCHIVE_VERSION {
            return Err(MessageError::InvalidRecord(format!(
                "negative schema version {}",
                self.schema_version
            )));
        }

        let kind = VariantKind::parse(&self.variant)?;
        kind.ensure_permits(self.restore_path())?;

        let id = MessageId::from_str(&self.id)
            .map_err(|e| MessageError::InvalidRecord(format!("bad message id {:?}: {e}", self.id)))?;
        let thread_id = ThreadId::from_str(&self.thread_id).map_err(|e| {
            MessageError::InvalidRecord(format!("bad thread id {:?}: {e}", self.thread_id))
        })?;
        let created_at = timestamp(self.created_at_ms)?;
        let delivery_state = DeliveryState::parse(&self.delivery_state)?;
        let expiration = self.expiration()?;

        let variant = match kind {
            VariantKind::Text => {
                let payload: TextPayload = serde_json::from_str(&self.payload)?;
                MessageVariant::Text {
                    body: TextBody::new(payload.body),
                }
            }
            VariantKind::PaymentActivationRequest => {
                empty_payload(&self.payload)?;
                MessageVariant::PaymentActivationRequest
            }
            VariantKind::PaymentActivated => {
                empty_payload(&self.payload)?;
                MessageVariant::PaymentActivated
            }
        };

        Ok(OutgoingMessage {
            id,
            thread_id,
            created_at,
            delivery_state,
            expiration,
            variant,
        })
    }

    fn expiration(&self) -> Result<Expiration, MessageError> {
        let expires_in_secs = match (self.expires_in_secs, self.schema_version) {
            (Some(secs), _) => u32::try_from(secs).map_err(|_| {
                MessageError::InvalidRecord(format!("expires_in_secs out of range: {secs}"))
            })?,
            // Older layouts had no timer column: those messages never expire.
            (None, version) if version <= COLUMNAR_V1 => 0,
            (None, _) => {
                return Err(MessageError::InvalidRecord(
                    "expires_in_secs missing".to_owned(),
                ))
            }
        };
        let started_at = self.expire_started_at_ms.map(timestamp).transpose()?;
        Ok(Expiration {
            expires_in_secs,
            started_at,
        })
    }
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, MessageError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| MessageError::InvalidRecord(format!("timestamp out of range: {ms}")))
}

/// Control variants persist an empty object; unknown keys written by a
/// newer build are tolerated.
fn empty_payload(payload: &str) -> Result<(), MessageError> {
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(payload)?;
    Ok(())
}
