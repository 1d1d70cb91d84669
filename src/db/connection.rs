//! Connection handles and diagnostic sessions.
//!
//! A `Connection` is created unopened by the registry. `safe_open` acquires a
//! pooled sqlx connection and `safe_close` returns it; both are idempotent.
//! Dropping an open connection closes it, so release happens on every exit
//! path including early returns, panics and cancelled futures.

use crate::db::registry::ConnectionMonitor;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionState, DatabaseType};
use chrono::{DateTime, Utc};
use sqlx::any::Any;
use sqlx::{AnyConnection, AnyPool};
use sqlx::pool::PoolConnection;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Span, debug, debug_span};
use uuid::Uuid;

/// Per-connection diagnostic record.
///
/// Carried explicitly on the `Connection` rather than in thread-local state,
/// so it follows the connection across tasks.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    connection: String,
    started_at: DateTime<Utc>,
    started: Instant,
    stopped: Option<Duration>,
    span: Span,
}

impl Session {
    /// Start a new session for a logical connection name.
    pub fn new(connection: &str) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            connection: connection.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            stopped: None,
            span: debug_span!("db_session", session_id = %id, connection = %connection),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection(&self) -> &str {
        &self.connection
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Time since the session started, frozen once stopped.
    pub fn elapsed(&self) -> Duration {
        self.stopped.unwrap_or_else(|| self.started.elapsed())
    }

    pub fn is_running(&self) -> bool {
        self.stopped.is_none()
    }

    /// Tracing span that statements on this connection run under.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Stop the timer. Returns the final elapsed time.
    fn stop(&mut self) -> Duration {
        *self.stopped.get_or_insert_with(|| self.started.elapsed())
    }
}

/// A logical connection handle backed by the registry's pool.
pub struct Connection {
    name: String,
    db_type: DatabaseType,
    pool: AnyPool,
    inner: Option<PoolConnection<Any>>,
    session: Session,
    monitor: Arc<ConnectionMonitor>,
}

impl Connection {
    pub(crate) fn new(
        name: &str,
        db_type: DatabaseType,
        pool: AnyPool,
        session: Session,
        monitor: Arc<ConnectionMonitor>,
    ) -> Self {
        Self {
            name: name.to_string(),
            db_type,
            pool,
            inner: None,
            session,
            monitor,
        }
    }

    /// Logical connection name this handle was created for.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn state(&self) -> ConnectionState {
        if self.inner.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Open the connection unless it is already open.
    ///
    /// Returns `true` if this call performed the open. Reopening a closed
    /// handle starts a new session.
    pub async fn safe_open(&mut self) -> DbResult<bool> {
        if self.inner.is_some() {
            return Ok(false);
        }

        if !self.session.is_running() {
            self.session = Session::new(&self.name);
        }

        let connection = self.pool.acquire().await.map_err(DbError::from)?;
        self.inner = Some(connection);
        self.monitor.record_open();

        debug!(
            connection = %self.name,
            session_id = %self.session.id,
            "Connection opened"
        );
        Ok(true)
    }

    /// Close the connection if it is open.
    ///
    /// Returns `true` if this call performed the close. Closing a handle that
    /// is not open does nothing and emits no trace.
    pub fn safe_close(&mut self) -> bool {
        let Some(connection) = self.inner.take() else {
            return false;
        };
        // Returns the physical connection to the pool
        drop(connection);

        let elapsed = self.session.stop();
        debug!(
            connection = %self.name,
            session_id = %self.session.id,
            elapsed_ms = elapsed.as_millis() as u64,
            "Connection closed"
        );
        self.monitor.record_close();
        true
    }

    /// The open driver connection.
    pub(crate) fn executor(&mut self) -> DbResult<&mut AnyConnection> {
        match self.inner.as_mut() {
            Some(connection) => Ok(&mut **connection),
            None => Err(not_open(&self.name)),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.inner.is_some() {
            self.safe_close();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .field("db_type", &self.db_type)
            .field("state", &self.state())
            .field("session", &self.session.id)
            .finish_non_exhaustive()
    }
}

fn not_open(name: &str) -> DbError {
    DbError::connection(
        format!("Connection '{}' is not open", name),
        "Call safe_open before executing statements",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_timer_stops_once() {
        let mut session = Session::new("main");
        assert!(session.is_running());
        assert_eq!(session.connection(), "main");

        let first = session.stop();
        std::thread::sleep(Duration::from_millis(5));
        let second = session.stop();

        assert!(!session.is_running());
        assert_eq!(first, second);
        assert_eq!(session.elapsed(), first);
    }

    #[test]
    fn test_sessions_have_unique_ids() {
        let a = Session::new("main");
        let b = Session::new("main");
        assert_ne!(a.id(), b.id());
        assert!(a.started_at() <= Utc::now());
    }
}
