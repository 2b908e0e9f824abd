//! Conversation threads that outgoing messages belong to.
//!
//! Threads are owned by collaborators outside the message core; the core only
//! needs [`resolve`] to confirm a thread exists inside the caller's
//! [`WriteTransaction`]. Deleting a thread cascades to its messages and
//! notices through SQLite foreign keys.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::store::{timestamp_from_ms, StoreError, WriteTransaction};

/// Row type returned by SQLite queries for threads.
type ThreadRow = (String, String, Option<String>, Option<String>, i64, i64);

/// Opaque identifier of a conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    /// Allocate a fresh random thread identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as stored in SQLite.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ThreadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = Uuid::parse_str(s)?;
        Ok(Self(id.to_string()))
    }
}

/// What kind of conversation a thread is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ThreadKind {
    /// One-to-one conversation with a contact.
    Contact {
        /// The peer's service address.
        address: String,
    },
    /// Group conversation.
    Group {
        /// Group identifier.
        group_id: String,
    },
}

/// A persisted conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Thread identity.
    pub id: ThreadId,
    /// Contact or group.
    pub kind: ThreadKind,
    /// Disappearing-message timer in seconds, `0` when disabled.
    pub disappearing_timer_secs: u32,
    /// When the thread was created.
    pub created_at: DateTime<Utc>,
}

impl Thread {
    /// Returns `true` if new messages in this thread should expire.
    pub fn has_disappearing_messages(&self) -> bool {
        self.disappearing_timer_secs > 0
    }
}

fn thread_from_row(row: ThreadRow) -> Result<Thread, StoreError> {
    let (id, kind, address, group_id, timer, created_at_ms) = row;
    let kind = match (kind.as_str(), address, group_id) {
        ("contact", Some(address), _) => ThreadKind::Contact { address },
        ("group", _, Some(group_id)) => ThreadKind::Group { group_id },
        (other, _, _) => {
            return Err(StoreError::InvalidRow {
                table: "threads",
                detail: format!("thread {id} has unusable kind {other:?}"),
            })
        }
    };
    let disappearing_timer_secs = u32::try_from(timer).map_err(|_| StoreError::InvalidRow {
        table: "threads",
        detail: format!("disappearing timer out of range: {timer}"),
    })?;
    Ok(Thread {
        id: ThreadId(id),
        kind,
        disappearing_timer_secs,
        created_at: timestamp_from_ms("threads", created_at_ms)?,
    })
}

async fn insert_thread(tx: &mut WriteTransaction, kind: ThreadKind) -> Result<Thread, StoreError> {
    let thread = Thread {
        id: ThreadId::generate(),
        kind,
        disappearing_timer_secs: 0,
        created_at: tx.now(),
    };
    let (kind_str, address, group_id) = match &thread.kind {
        ThreadKind::Contact { address } => ("contact", Some(address.as_str()), None),
        ThreadKind::Group { group_id } => ("group", None, Some(group_id.as_str())),
    };

    sqlx::query(
        "INSERT INTO threads (id, kind, address, group_id, disappearing_timer_secs, created_at_ms) \
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
    )
    .bind(thread.id.as_str())
    .bind(kind_str)
    .bind(address)
    .bind(group_id)
    .bind(thread.created_at.timestamp_millis())
    .execute(tx.connection()?)
    .await?;

    debug!(thread_id = %thread.id, kind = kind_str, "thread created");
    Ok(thread)
}

/// Create a one-to-one thread with `address`.
///
/// # Errors
///
/// Returns [`StoreError::InactiveTransaction`] if the scope is not active,
/// or [`StoreError::Database`] on SQLite failure.
pub async fn create_contact_thread(
    tx: &mut WriteTransaction,
    address: &str,
) -> Result<Thread, StoreError> {
    insert_thread(
        tx,
        ThreadKind::Contact {
            address: address.to_owned(),
        },
    )
    .await
}

/// Create a group thread for `group_id`.
///
/// # Errors
///
/// Returns [`StoreError::InactiveTransaction`] if the scope is not active,
/// or [`StoreError::Database`] on SQLite failure.
pub async fn create_group_thread(
    tx: &mut WriteTransaction,
    group_id: &str,
) -> Result<Thread, StoreError> {
    insert_thread(
        tx,
        ThreadKind::Group {
            group_id: group_id.to_owned(),
        },
    )
    .await
}

/// Look up a thread inside the caller's scope.
///
/// Returns `Ok(None)` if no such thread is visible in this transaction.
///
/// # Errors
///
/// Returns [`StoreError::InactiveTransaction`] if the scope is not active,
/// or [`StoreError::InvalidRow`] if the stored row is malformed.
pub async fn resolve(
    tx: &mut WriteTransaction,
    id: &ThreadId,
) -> Result<Option<Thread>, StoreError> {
    let row: Option<ThreadRow> = sqlx::query_as(
        "SELECT id, kind, address, group_id, disappearing_timer_secs, created_at_ms \
         FROM threads WHERE id = ?1",
    )
    .bind(id.as_str())
    .fetch_optional(tx.connection()?)
    .await?;

    trace!(thread_id = %id, found = row.is_some(), "thread resolved");
    row.map(thread_from_row).transpose()
}

/// Set the disappearing-message timer for future messages in a thread.
///
/// Returns `false` if the thread does not exist.
///
/// # Errors
///
/// Returns [`StoreError::InactiveTransaction`] if the scope is not active,
/// or [`StoreError::Database`] on SQLite failure.
pub async fn set_disappearing_timer(
    tx: &mut WriteTransaction,
    id: &ThreadId,
    secs: u32,
) -> Result<bool, StoreError> {
    let result = sqlx::query("UPDATE threads SET disappearing_timer_secs = ?1 WHERE id = ?2")
        .bind(i64::from(secs))
        .bind(id.as_str())
        .execute(tx.connection()?)
        .await?;
    debug!(thread_id = %id, secs, "disappearing timer updated");
    Ok(result.rows_affected() > 0)
}

/// Delete a thread together with its messages and notices.
///
/// Returns `false` if the thread did not exist.
///
/// # Errors
///
/// Returns [`StoreError::InactiveTransaction`] if the scope is not active,
/// or [`StoreError::Database`] on SQLite failure.
pub async fn delete_thread(tx: &mut WriteTransaction, id: &ThreadId) -> Result<bool, StoreError> {
    let result = sqlx::query("DELETE FROM threads WHERE id = ?1")
        .bind(id.as_str())
        .execute(tx.connection()?)
        .await?;
    debug!(thread_id = %id, "thread deleted");
    Ok(result.rows_affected() > 0)
}
