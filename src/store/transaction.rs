//! The transaction scope every outgoing message is constructed under.

use std::fmt;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use tracing::{debug, warn};

use super::StoreError;

/// Lifecycle of a [`WriteTransaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    /// Open for reads and writes.
    Active,
    /// Changes were committed; the scope can no longer be used.
    Committed,
    /// Changes were rolled back; the scope can no longer be used.
    Aborted,
}

impl TransactionState {
    /// Returns the lowercase name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scoped read/write unit of work over the message store.
///
/// Obtained from [`Store::begin`](super::Store::begin) and used through
/// `&mut` only, so a scope is never shared between concurrent callers.
/// The handle outlives [`commit`](Self::commit) and [`abort`](Self::abort)
/// so that late use is reported as [`StoreError::InactiveTransaction`]
/// instead of silently opening a new unit of work. Dropping an active
/// scope rolls it back.
pub struct WriteTransaction {
    inner: Option<Transaction<'static, Sqlite>>,
    state: TransactionState,
    now: DateTime<Utc>,
}

impl fmt::Debug for WriteTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("state", &self.state)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

impl WriteTransaction {
    pub(crate) fn new(inner: Transaction<'static, Sqlite>) -> Self {
        Self {
            inner: Some(inner),
            state: TransactionState::Active,
            // Millisecond precision matches what the store persists.
            now: Utc::now().trunc_subsecs(3),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns `true` while the scope accepts reads and writes.
    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    /// The transaction-consistent "now", captured when the scope began.
    ///
    /// Every record created inside one scope carries this timestamp.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Borrow the underlying connection for a statement.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InactiveTransaction`] once the scope has been
    /// committed or aborted.
    pub(crate) fn connection(&mut self) -> Result<&mut SqliteConnection, StoreError> {
        match self.inner.as_mut() {
            Some(tx) if self.state == TransactionState::Active => Ok(&mut **tx),
            _ => Err(StoreError::InactiveTransaction(self.state)),
        }
    }

    /// Commit all changes made in this scope.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InactiveTransaction`] if the scope is not active,
    /// or [`StoreError::Database`] if SQLite rejects the commit. A failed
    /// commit leaves the scope aborted.
    pub async fn commit(&mut self) -> Result<(), StoreError> {
        let inner = self.take_active()?;
        match inner.commit().await {
            Ok(()) => {
                self.state = TransactionState::Committed;
                debug!("transaction committed");
                Ok(())
            }
            Err(err) => {
                self.state = TransactionState::Aborted;
                warn!(error = %err, "transaction commit failed");
                Err(err.into())
            }
        }
    }

    /// Roll back all changes made in this scope.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InactiveTransaction`] if the scope is not active,
    /// or [`StoreError::Database`] if the rollback statement fails. The scope
    /// is aborted either way.
    pub async fn abort(&mut self) -> Result<(), StoreError> {
        let inner = self.take_active()?;
        self.state = TransactionState::Aborted;
        inner.rollback().await?;
        debug!("transaction aborted");
        Ok(())
    }

    fn take_active(&mut self) -> Result<Transaction<'static, Sqlite>, StoreError> {
        if self.state != TransactionState::Active {
            return Err(StoreError::InactiveTransaction(self.state));
        }
        self.inner
            .take()
            .ok_or(StoreError::InactiveTransaction(self.state))
    }
}
