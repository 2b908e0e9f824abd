//! Local notices: user-visible history entries that accompany control
//! messages.
//!
//! A notice is a sibling of the outgoing message it accompanies, not part of
//! it. It is never sent, and it is never re-derived from the message later;
//! both are simply created at the same logical moment.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::store::{timestamp_from_ms, Store, StoreError, TransactionState, WriteTransaction};
use crate::thread::{self, ThreadId};

/// Row type returned by SQLite queries for local notices.
type NoticeRow = (String, String, String, i64);

/// Errors from notice operations.
#[derive(Debug, thiserror::Error)]
pub enum NoticeError {
    /// The transaction scope was committed or aborted before use.
    #[error("transaction is {0}, not active")]
    InactiveTransaction(TransactionState),

    /// The thread does not exist in the caller's transaction.
    #[error("thread {0} does not resolve in this transaction")]
    UnresolvableThread(ThreadId),

    /// A stored notice kind is not recognised.
    #[error("unknown notice kind: {0:?}")]
    UnknownKind(String),

    /// Store-level failure.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<StoreError> for NoticeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InactiveTransaction(state) => Self::InactiveTransaction(state),
            StoreError::Database(err) => Self::Database(err),
            other => Self::Store(other),
        }
    }
}

/// What a notice tells the local user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// "You asked this contact to activate payments."
    PaymentsActivationRequested,
    /// "You activated payments."
    PaymentsActivated,
}

impl NoticeKind {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentsActivationRequested => "payments_activation_requested",
            Self::PaymentsActivated => "payments_activated",
        }
    }

    /// Parse from a SQLite text value.
    ///
    /// # Errors
    ///
    /// Returns [`NoticeError::UnknownKind`] if the value is unrecognised.
    pub fn parse(s: &str) -> Result<Self, NoticeError> {
        match s {
            "payments_activation_requested" => Ok(Self::PaymentsActivationRequested),
            "payments_activated" => Ok(Self::PaymentsActivated),
            other => Err(NoticeError::UnknownKind(other.to_owned())),
        }
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally visible history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalNotice {
    /// Notice identifier.
    pub id: Uuid,
    /// Thread whose history shows the notice.
    pub thread_id: ThreadId,
    /// What happened.
    pub kind: NoticeKind,
    /// When it happened.
    pub created_at: DateTime<Utc>,
}

fn notice_from_row(row: NoticeRow) -> Result<LocalNotice, NoticeError> {
    let (id, thread_id, kind, created_at_ms) = row;
    let id = Uuid::parse_str(&id).map_err(|e| StoreError::InvalidRow {
        table: "local_notices",
        detail: format!("bad notice id {id:?}: {e}"),
    })?;
    let thread_id = thread_id.parse::<ThreadId>().map_err(|e| StoreError::InvalidRow {
        table: "local_notices",
        detail: format!("bad thread id {thread_id:?}: {e}"),
    })?;
    Ok(LocalNotice {
        id,
        thread_id,
        kind: NoticeKind::parse(&kind)?,
        created_at: timestamp_from_ms("local_notices", created_at_ms)?,
    })
}

/// Record a notice in `thread_id`'s history inside `tx`.
///
/// # Errors
///
/// Returns [`NoticeError::InactiveTransaction`] if the scope is not active,
/// or [`NoticeError::UnresolvableThread`] if the thread does not exist in it.
pub async fn insert_notice(
    tx: &mut WriteTransaction,
    thread_id: &ThreadId,
    kind: NoticeKind,
) -> Result<LocalNotice, NoticeError> {
    if !tx.is_active() {
        return Err(NoticeError::InactiveTransaction(tx.state()));
    }
    if thread::resolve(tx, thread_id).await?.is_none() {
        return Err(NoticeError::UnresolvableThread(thread_id.clone()));
    }

    let notice = LocalNotice {
        id: Uuid::new_v4(),
        thread_id: thread_id.clone(),
        kind,
        created_at: tx.now(),
    };

    sqlx::query(
        "INSERT INTO local_notices (id, thread_id, kind, created_at_ms) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(notice.id.to_string())
    .bind(notice.thread_id.as_str())
    .bind(kind.as_str())
    .bind(notice.created_at.timestamp_millis())
    .execute(tx.connection()?)
    .await?;

    debug!(notice_id = %notice.id, thread_id = %thread_id, kind = kind.as_str(), "local notice created");
    Ok(notice)
}

impl Store {
    /// Committed notices of a thread, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`NoticeError::Database`] on SQLite failure.
    pub async fn thread_notices(&self, thread_id: &ThreadId) -> Result<Vec<LocalNotice>, NoticeError> {
        let rows: Vec<NoticeRow> = sqlx::query_as(
            "SELECT id, thread_id, kind, created_at_ms FROM local_notices \
             WHERE thread_id = ?1 ORDER BY created_at_ms ASC, rowid ASC",
        )
        .bind(thread_id.as_str())
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(notice_from_row).collect()
    }
}
