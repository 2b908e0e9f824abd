//! Saving and loading outgoing messages.
//!
//! Writes take the caller's [`WriteTransaction`]. Reads through [`Store`]
//! only ever see committed rows and hand them out as [`PersistedMessage`],
//! the one type the dispatch layer accepts.

use std::ops::Deref;

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite};
use tracing::{debug, trace, warn};

use super::record::{MessageRecord, MessageRow};
use super::{DeliveryState, MessageError, MessageId, OutgoingMessage};
use crate::store::{Store, WriteTransaction};
use crate::thread::ThreadId;

/// An outgoing message read back from committed storage.
///
/// Only the store produces these, so holding one proves the message was
/// fully constructed and persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedMessage(OutgoingMessage);

impl PersistedMessage {
    /// The underlying message.
    pub fn message(&self) -> &OutgoingMessage {
        &self.0
    }
}

impl Deref for PersistedMessage {
    type Target = OutgoingMessage;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

async fn fetch_by_id<'e, E>(executor: E, id: &MessageId) -> Result<Option<OutgoingMessage>, MessageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: Option<MessageRow> = sqlx::query_as(
        "SELECT id, thread_id, variant, created_at_ms, delivery_state, \
         expires_in_secs, expire_started_at_ms, schema_version, payload \
         FROM outgoing_messages WHERE id = ?1",
    )
    .bind(id.to_string())
    .fetch_optional(executor)
    .await?;

    row.map(|row| MessageRecord::from(row).restore()).transpose()
}

async fn fetch_for_thread<'e, E>(executor: E, thread_id: &ThreadId) -> Result<Vec<MessageRow>, MessageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT id, thread_id, variant, created_at_ms, delivery_state, \
         expires_in_secs, expire_started_at_ms, schema_version, payload \
         FROM outgoing_messages WHERE thread_id = ?1 \
         ORDER BY created_at_ms ASC, rowid ASC",
    )
    .bind(thread_id.as_str())
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

/// Persist a newly constructed message inside `tx`.
///
/// # Errors
///
/// Returns [`MessageError::InactiveTransaction`] if the scope is not active,
/// or [`MessageError::Database`] on SQLite failure (including saving the same
/// message twice).
pub async fn save(tx: &mut WriteTransaction, message: &OutgoingMessage) -> Result<(), MessageError> {
    let record = MessageRecord::from_message(message)?;

    sqlx::query(
        "INSERT INTO outgoing_messages (id, thread_id, variant, created_at_ms, delivery_state, \
         expires_in_secs, expire_started_at_ms, schema_version, payload) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )
    .bind(&record.id)
    .bind(&record.thread_id)
    .bind(&record.variant)
    .bind(record.created_at_ms)
    .bind(&record.delivery_state)
    .bind(record.expires_in_secs)
    .bind(record.expire_started_at_ms)
    .bind(record.schema_version)
    .bind(&record.payload)
    .execute(tx.connection()?)
    .await?;

    debug!(
        message_id = %record.id,
        thread_id = %record.thread_id,
        variant = %record.variant,
        "outgoing message saved"
    );
    Ok(())
}

/// Load a message visible inside `tx`, including uncommitted writes.
///
/// # Errors
///
/// Returns [`MessageError::InactiveTransaction`] if the scope is not active,
/// or a restore error if the stored row is invalid.
pub async fn load(
    tx: &mut WriteTransaction,
    id: &MessageId,
) -> Result<Option<OutgoingMessage>, MessageError> {
    fetch_by_id(tx.connection()?, id).await
}

/// All messages of a thread visible inside `tx`, oldest first.
///
/// # Errors
///
/// Returns [`MessageError::InactiveTransaction`] if the scope is not active,
/// or a restore error if any stored row is invalid.
pub async fn messages_for_thread(
    tx: &mut WriteTransaction,
    thread_id: &ThreadId,
) -> Result<Vec<OutgoingMessage>, MessageError> {
    fetch_for_thread(tx.connection()?, thread_id)
        .await?
        .into_iter()
        .map(|row| MessageRecord::from(row).restore())
        .collect()
}

/// Advance a message's delivery state inside `tx`.
///
/// The current state is read in the same scope, so the check and the write
/// see one consistent view. Returns the updated message.
///
/// # Errors
///
/// Returns [`MessageError::MessageNotFound`] if no such message exists,
/// [`MessageError::InvalidTransition`] if the move is not monotonic from the
/// state the row holds when written, or
/// [`MessageError::InactiveTransaction`] if the scope is not active.
pub async fn update_delivery_state(
    tx: &mut WriteTransaction,
    id: &MessageId,
    next: DeliveryState,
) -> Result<OutgoingMessage, MessageError> {
    let mut message = load(tx, id)
        .await?
        .ok_or(MessageError::MessageNotFound(*id))?;
    let previous = message.delivery_state();
    message.apply_transition(next, tx.now())?;

    let result = sqlx::query(
        "UPDATE outgoing_messages SET delivery_state = ?1, expire_started_at_ms = ?2 \
         WHERE id = ?3 AND delivery_state = ?4",
    )
    .bind(next.as_str())
    .bind(message.expiration().started_at.map(|t| t.timestamp_millis()))
    .bind(id.to_string())
    .bind(previous.as_str())
    .execute(tx.connection()?)
    .await?;

    if result.rows_affected() == 0 {
        // The row moved on between the read and the write.
        let current = load(tx, id)
            .await?
            .ok_or(MessageError::MessageNotFound(*id))?;
        return Err(MessageError::InvalidTransition {
            from: current.delivery_state(),
            to: next,
        });
    }

    trace!(message_id = %id, from = %previous, to = %next, "delivery state updated");
    Ok(message)
}

async fn select_claimable<'e, E>(
    executor: E,
    limit: u32,
    stale_before_ms: i64,
) -> Result<Vec<String>, MessageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT id FROM outgoing_messages \
         WHERE delivery_state = 'pending' \
         AND (dispatch_claimed_at_ms IS NULL OR dispatch_claimed_at_ms < ?1) \
         ORDER BY created_at_ms ASC, rowid ASC \
         LIMIT ?2",
    )
    .bind(stale_before_ms)
    .bind(i64::from(limit))
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Stamp up to `limit` pending messages as claimed by the caller's dispatch
/// pass, oldest first. Claims older than `stale_before` are taken over.
///
/// Returns the identifiers claimed. The claim becomes visible to other
/// passes when `tx` commits.
pub(crate) async fn claim_pending(
    tx: &mut WriteTransaction,
    limit: u32,
    stale_before: DateTime<Utc>,
) -> Result<Vec<MessageId>, MessageError> {
    let now_ms = tx.now().timestamp_millis();
    let ids = select_claimable(tx.connection()?, limit, stale_before.timestamp_millis()).await?;

    let mut claimed = Vec::with_capacity(ids.len());
    for id in ids {
        sqlx::query("UPDATE outgoing_messages SET dispatch_claimed_at_ms = ?1 WHERE id = ?2")
            .bind(now_ms)
            .bind(&id)
            .execute(tx.connection()?)
            .await?;
        let parsed = id.parse::<MessageId>().map_err(|e| {
            MessageError::InvalidRecord(format!("message id {id:?}: {e}"))
        })?;
        claimed.push(parsed);
    }
    Ok(claimed)
}

impl Store {
    /// Returns `true` if a committed pending message is waiting for a
    /// dispatch pass, ignoring rows claimed at or after `stale_before`.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Database`] on SQLite failure.
    pub(crate) async fn has_claimable(&self, stale_before: DateTime<Utc>) -> Result<bool, MessageError> {
        let ids = select_claimable(self.pool(), 1, stale_before.timestamp_millis()).await?;
        Ok(!ids.is_empty())
    }

    /// Load a committed message.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Database`] on SQLite failure, or a restore
    /// error if the stored row is invalid.
    pub async fn load_message(&self, id: &MessageId) -> Result<Option<PersistedMessage>, MessageError> {
        Ok(fetch_by_id(self.pool(), id).await?.map(PersistedMessage))
    }

    /// Committed messages of a thread, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Database`] on SQLite failure, or a restore
    /// error if any stored row is invalid.
    pub async fn thread_messages(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<PersistedMessage>, MessageError> {
        fetch_for_thread(self.pool(), thread_id)
            .await?
            .into_iter()
            .map(|row| MessageRecord::from(row).restore().map(PersistedMessage))
            .collect()
    }

    /// Up to `limit` committed messages still waiting for dispatch, oldest
    /// first, whether or not a dispatch pass has claimed them.
    ///
    /// Rows that cannot be restored are logged and skipped so one bad row
    /// does not stall the outbox.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Database`] on SQLite failure.
    pub async fn pending_messages(&self, limit: u32) -> Result<Vec<PersistedMessage>, MessageError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, thread_id, variant, created_at_ms, delivery_state, \
             expires_in_secs, expire_started_at_ms, schema_version, payload \
             FROM outgoing_messages WHERE delivery_state = 'pending' \
             ORDER BY created_at_ms ASC, rowid ASC \
             LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.0.clone();
            match MessageRecord::from(row).restore() {
                Ok(message) => pending.push(PersistedMessage(message)),
                Err(err) => warn!(message_id = %id, error = %err, "skipping unrestorable message"),
            }
        }
        Ok(pending)
    }
}
