//! Data access operations.
//!
//! `DataAccess` runs statements against one logical connection name. Every
//! operation accepts an optional caller transaction: when supplied, the
//! statement runs inside it and its connection is left open; otherwise a
//! connection is opened for the call and released when it finishes,
//! whether it succeeded or not.

use crate::db::connection::Connection;
use crate::db::registry::ConnectionRegistry;
use crate::db::transaction::{IsolationLevel, Transaction};
use crate::db::types::{data_columns, data_table_from_rows};
use crate::error::{DbError, DbResult};
use crate::models::{DEFAULT_TABLE_NAME, DataSet, DataTable, SqlValue};
use futures_util::TryStreamExt;
use sqlx::any::{Any, AnyRow};
use sqlx::{AnyConnection, FromRow};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, Span, debug, trace};

/// Receives every statement before it is executed.
pub trait StatementLogger: Send + Sync {
    fn log_statement(&self, sql: &str, params: &[SqlValue]);
}

/// Discards statements.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatementLogger;

impl StatementLogger for NoopStatementLogger {
    fn log_statement(&self, _sql: &str, _params: &[SqlValue]) {}
}

/// Emits each statement as a `debug!` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatementLogger;

impl StatementLogger for TracingStatementLogger {
    fn log_statement(&self, sql: &str, params: &[SqlValue]) {
        debug!(sql = %sql, params = ?params, "Statement");
    }
}

/// Connection used by a single operation.
enum Lease<'a, 'c> {
    /// Opened for this operation; closed by `release`.
    Owned(Connection),
    /// Belongs to the caller's transaction; never closed here.
    Borrowed(&'a mut Transaction<'c>),
}

impl Lease<'_, '_> {
    fn executor(&mut self) -> DbResult<&mut AnyConnection> {
        match self {
            Lease::Owned(connection) => connection.executor(),
            Lease::Borrowed(tx) => tx.executor(),
        }
    }

    fn span(&self) -> Span {
        match self {
            Lease::Owned(connection) => connection.session().span().clone(),
            Lease::Borrowed(tx) => tx.span().clone(),
        }
    }

    fn release(self) {
        if let Lease::Owned(mut connection) = self {
            connection.safe_close();
        }
    }
}

/// Statement execution for one logical connection.
#[derive(Clone)]
pub struct DataAccess {
    registry: Arc<ConnectionRegistry>,
    connection_name: String,
    logger: Arc<dyn StatementLogger>,
}

impl DataAccess {
    /// Create data access for a logical connection name, using the
    /// registry's statement logger.
    pub fn new(registry: Arc<ConnectionRegistry>, connection_name: impl Into<String>) -> Self {
        let logger = registry.statement_logger();
        Self {
            registry,
            connection_name: connection_name.into(),
            logger,
        }
    }

    pub fn with_statement_logger(mut self, logger: Arc<dyn StatementLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn connection_name(&self) -> &str {
        &self.connection_name
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Open a connection for this name.
    ///
    /// Use it with `Transaction::begin` to share one transaction across
    /// several operations. The caller closes it (or drops it).
    pub async fn open_connection(&self) -> DbResult<Connection> {
        let mut connection = self.registry.open_connection(&self.connection_name).await?;
        connection.safe_open().await?;
        Ok(connection)
    }

    /// Execute a statement and return the number of affected rows.
    ///
    /// Without parameters the SQL is sent as-is, so scripts with several
    /// statements are allowed.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[SqlValue],
        transaction: Option<&mut Transaction<'_>>,
    ) -> DbResult<u64> {
        self.logger.log_statement(sql, params);
        let start = Instant::now();
        let mut lease = self.lease(transaction).await?;
        let span = lease.span();

        let result = match lease.executor() {
            Ok(conn) => execute_on(conn, sql, params).instrument(span).await,
            Err(e) => Err(e),
        };
        lease.release();

        if let Ok(rows_affected) = &result {
            debug!(
                connection = %self.connection_name,
                rows_affected = rows_affected,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Statement executed"
            );
        }
        result
    }

    /// Return the first column of the first row.
    ///
    /// Use `Option<_>` for `T` when the value may be NULL. `Option<_>` only
    /// covers a NULL cell: a query that returns no rows is an
    /// `Execution` error even then. Use `get` to treat "no row" as `None`.
    pub async fn scalar<T>(
        &self,
        sql: &str,
        params: &[SqlValue],
        transaction: Option<&mut Transaction<'_>>,
    ) -> DbResult<T>
    where
        T: Send + Unpin,
        (T,): for<'r> FromRow<'r, AnyRow>,
    {
        self.logger.log_statement(sql, params);
        let mut lease = self.lease(transaction).await?;
        let span = lease.span();

        let result = match lease.executor() {
            Ok(conn) => {
                let query = bind_params!(sqlx::query_scalar::<Any, T>(sql), params);
                query
                    .fetch_one(conn)
                    .instrument(span)
                    .await
                    .map_err(DbError::from)
            }
            Err(e) => Err(e),
        };
        lease.release();
        result
    }

    /// Map the first row to `T`, or `None` when the query returns no rows.
    pub async fn get<T>(
        &self,
        sql: &str,
        params: &[SqlValue],
        transaction: Option<&mut Transaction<'_>>,
    ) -> DbResult<Option<T>>
    where
        T: for<'r> FromRow<'r, AnyRow> + Send + Unpin,
    {
        self.logger.log_statement(sql, params);
        let mut lease = self.lease(transaction).await?;
        let span = lease.span();

        let result = match lease.executor() {
            Ok(conn) => {
                let query = bind_params!(sqlx::query_as::<Any, T>(sql), params);
                query
                    .fetch_optional(conn)
                    .instrument(span)
                    .await
                    .map_err(DbError::from)
            }
            Err(e) => Err(e),
        };
        lease.release();
        result
    }

    /// Like `get`, returning `T::default()` when there are no rows.
    pub async fn get_or_default<T>(
        &self,
        sql: &str,
        params: &[SqlValue],
        transaction: Option<&mut Transaction<'_>>,
    ) -> DbResult<T>
    where
        T: for<'r> FromRow<'r, AnyRow> + Default + Send + Unpin,
    {
        Ok(self.get(sql, params, transaction).await?.unwrap_or_default())
    }

    /// Map every row to `T`, in the order returned.
    pub async fn get_list<T>(
        &self,
        sql: &str,
        params: &[SqlValue],
        transaction: Option<&mut Transaction<'_>>,
    ) -> DbResult<Vec<T>>
    where
        T: for<'r> FromRow<'r, AnyRow> + Send + Unpin,
    {
        self.logger.log_statement(sql, params);
        let start = Instant::now();
        let mut lease = self.lease(transaction).await?;
        let span = lease.span();

        let result = match lease.executor() {
            Ok(conn) => {
                let query = bind_params!(sqlx::query_as::<Any, T>(sql), params);
                query
                    .fetch(conn)
                    .try_collect::<Vec<T>>()
                    .instrument(span)
                    .await
                    .map_err(DbError::from)
            }
            Err(e) => Err(e),
        };
        lease.release();

        if let Ok(rows) = &result {
            debug!(
                connection = %self.connection_name,
                row_count = rows.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Rows fetched"
            );
        }
        result
    }

    /// Fetch all rows into an un-typed `DataSet` with a single table.
    ///
    /// An empty result still carries the statement's columns when the
    /// driver can describe it.
    pub async fn get_data_set(
        &self,
        sql: &str,
        params: &[SqlValue],
        transaction: Option<&mut Transaction<'_>>,
    ) -> DbResult<DataSet> {
        self.logger.log_statement(sql, params);
        let mut lease = self.lease(transaction).await?;
        let span = lease.span();

        let result = match lease.executor() {
            Ok(conn) => fetch_table(conn, sql, params).instrument(span).await,
            Err(e) => Err(e),
        };
        lease.release();

        Ok(DataSet::new(vec![result?]))
    }

    /// Run `action` inside a transaction.
    ///
    /// With a caller transaction the action simply runs in it; committing or
    /// rolling back stays with the caller. Otherwise a connection is opened,
    /// a transaction begun at `isolation`, and the action's result decides
    /// between commit and rollback. The connection is closed on every path.
    ///
    /// If both the action and the rollback fail, the error is
    /// `DbError::RollbackFailed` carrying both.
    pub async fn trans_scope<T, F>(
        &self,
        transaction: Option<&mut Transaction<'_>>,
        isolation: IsolationLevel,
        action: F,
    ) -> DbResult<T>
    where
        F: AsyncFnOnce(&mut Transaction<'_>) -> DbResult<T>,
    {
        if let Some(tx) = transaction {
            trace!(
                transaction_id = %tx.id(),
                connection = %self.connection_name,
                "Running scope in caller transaction"
            );
            return action(tx).await;
        }

        let mut connection = self.open_connection().await?;
        trace!(
            connection = %self.connection_name,
            session_id = %connection.session().id(),
            "Scope connection opened"
        );

        let result = run_scope(&mut connection, isolation, action).await;

        connection.safe_close();
        trace!(connection = %self.connection_name, "Scope disposed");
        result
    }

    async fn lease<'a, 'c>(
        &self,
        transaction: Option<&'a mut Transaction<'c>>,
    ) -> DbResult<Lease<'a, 'c>> {
        match transaction {
            Some(tx) => Ok(Lease::Borrowed(tx)),
            None => Ok(Lease::Owned(self.open_connection().await?)),
        }
    }
}

impl std::fmt::Debug for DataAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("connection_name", &self.connection_name)
            .finish_non_exhaustive()
    }
}

async fn execute_on(conn: &mut AnyConnection, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
    let done = if params.is_empty() {
        sqlx::raw_sql(sql).execute(&mut *conn).await?
    } else {
        bind_params!(sqlx::query::<Any>(sql), params)
            .execute(&mut *conn)
            .await?
    };
    Ok(done.rows_affected())
}

async fn fetch_table(
    conn: &mut AnyConnection,
    sql: &str,
    params: &[SqlValue],
) -> DbResult<DataTable> {
    let rows = bind_params!(sqlx::query::<Any>(sql), params)
        .fetch_all(&mut *conn)
        .await?;
    if !rows.is_empty() {
        return Ok(data_table_from_rows(DEFAULT_TABLE_NAME, &rows));
    }

    let columns = match sqlx::Executor::describe(conn, sql).await {
        Ok(describe) => data_columns(describe.columns()),
        Err(e) => {
            debug!(error = %e, "Could not describe empty result, returning no columns");
            Vec::new()
        }
    };
    Ok(DataTable::new(DEFAULT_TABLE_NAME, columns))
}

/// Begin, run the action, then commit or roll back.
async fn run_scope<T, F>(
    connection: &mut Connection,
    isolation: IsolationLevel,
    action: F,
) -> DbResult<T>
where
    F: AsyncFnOnce(&mut Transaction<'_>) -> DbResult<T>,
{
    let mut tx = Transaction::begin(connection, isolation).await?;
    let transaction_id = tx.id();
    trace!(transaction_id = %transaction_id, "Running transaction action");

    match action(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            debug!(
                transaction_id = %transaction_id,
                error = %err,
                "Transaction action failed, rolling back"
            );
            match tx.rollback().await {
                Ok(()) => Err(err),
                Err(rollback) => Err(DbError::rollback_failed(err, rollback)),
            }
        }
    }
}
