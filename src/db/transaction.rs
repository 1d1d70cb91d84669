//! Database transactions bound to an open `Connection`.
//!
//! A `Transaction` mutably borrows its connection for its whole lifetime, so
//! the connection cannot be closed or reused until the transaction is
//! committed, rolled back or dropped. Dropping an active transaction rolls
//! it back.

use crate::db::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, TransactionState};
use serde::{Deserialize, Serialize};
use sqlx::Connection as _;
use sqlx::AnyConnection;
use sqlx::any::Any;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{Span, debug, debug_span, info, warn};
use uuid::Uuid;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Use the database default.
    #[default]
    Unspecified,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword form, or `None` for the database default.
    pub fn as_sql(&self) -> Option<&'static str> {
        match self {
            Self::Unspecified => None,
            Self::ReadUncommitted => Some("READ UNCOMMITTED"),
            Self::ReadCommitted => Some("READ COMMITTED"),
            Self::RepeatableRead => Some("REPEATABLE READ"),
            Self::Serializable => Some("SERIALIZABLE"),
        }
    }

    fn set_statement(&self) -> Option<String> {
        self.as_sql()
            .map(|level| format!("SET TRANSACTION ISOLATION LEVEL {}", level))
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql().unwrap_or("DEFAULT"))
    }
}

/// An open transaction on a borrowed connection.
pub struct Transaction<'c> {
    inner: Option<sqlx::Transaction<'c, Any>>,
    id: Uuid,
    connection: String,
    session_id: Uuid,
    db_type: DatabaseType,
    isolation: IsolationLevel,
    state: TransactionState,
    started: Instant,
    span: Span,
}

impl<'c> Transaction<'c> {
    /// Begin a transaction on an open connection.
    ///
    /// On PostgreSQL the isolation level is set right after `BEGIN`, on
    /// MySQL right before it. SQLite transactions are always serializable,
    /// so a requested level is ignored there.
    pub async fn begin(connection: &'c mut Connection, isolation: IsolationLevel) -> DbResult<Self> {
        let id = Uuid::new_v4();
        let name = connection.name().to_string();
        let db_type = connection.db_type();
        let session_id = connection.session().id();
        let span = debug_span!(
            parent: connection.session().span(),
            "db_transaction",
            transaction_id = %id
        );

        let conn = connection.executor()?;
        let set_isolation = isolation.set_statement();

        if set_isolation.is_some() && !db_type.supports_isolation_levels() {
            debug!(
                connection = %name,
                isolation = %isolation,
                "Isolation level ignored; {} transactions are serializable",
                db_type
            );
        }

        if let (Some(statement), DatabaseType::MySQL) = (&set_isolation, db_type) {
            sqlx::raw_sql(statement)
                .execute(&mut *conn)
                .await
                .map_err(|e| begin_failed(&e, id))?;
        }

        let mut tx = conn.begin().await.map_err(|e| begin_failed(&e, id))?;

        if let (Some(statement), DatabaseType::PostgreSQL) = (&set_isolation, db_type) {
            // Dropping `tx` here rolls back the half-started transaction
            sqlx::raw_sql(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| begin_failed(&e, id))?;
        }

        debug!(
            transaction_id = %id,
            connection = %name,
            session_id = %session_id,
            isolation = %isolation,
            "Transaction started"
        );

        Ok(Self {
            inner: Some(tx),
            id,
            connection: name,
            session_id,
            db_type,
            isolation,
            state: TransactionState::Active,
            started: Instant::now(),
            span,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Logical name of the connection this transaction runs on.
    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> DbResult<()> {
        let tx = self.take_active()?;
        tx.commit()
            .await
            .map_err(|e| DbError::transaction(format!("Commit failed: {}", e), self.id.to_string()))?;

        self.state = TransactionState::Committed;
        info!(
            transaction_id = %self.id,
            connection = %self.connection,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Transaction committed"
        );
        Ok(())
    }

    /// Roll the transaction back.
    pub async fn rollback(mut self) -> DbResult<()> {
        let tx = self.take_active()?;
        tx.rollback().await.map_err(|e| {
            DbError::transaction(format!("Rollback failed: {}", e), self.id.to_string())
        })?;

        self.state = TransactionState::RolledBack;
        info!(
            transaction_id = %self.id,
            connection = %self.connection,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Transaction rolled back"
        );
        Ok(())
    }

    /// The driver connection inside the transaction.
    pub(crate) fn executor(&mut self) -> DbResult<&mut AnyConnection> {
        match self.inner.as_mut() {
            Some(tx) => Ok(&mut **tx),
            None => Err(DbError::transaction(
                format!("Transaction is {}", self.state),
                self.id.to_string(),
            )),
        }
    }

    fn take_active(&mut self) -> DbResult<sqlx::Transaction<'c, Any>> {
        self.inner.take().ok_or_else(|| {
            DbError::transaction(format!("Transaction is {}", self.state), self.id.to_string())
        })
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.inner.is_some() && self.state.is_active() {
            warn!(
                transaction_id = %self.id,
                connection = %self.connection,
                "Transaction dropped while active, rolling back"
            );
        }
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("db_type", &self.db_type)
            .field("isolation", &self.isolation)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn begin_failed(err: &sqlx::Error, id: Uuid) -> DbError {
    DbError::transaction(format!("Failed to begin transaction: {}", err), id.to_string())
}
