//! Integration tests for connection registry and connection lifecycle.
//!
//! Tests verify that:
//! - Unknown names fail with a configuration error and leave the cache alone
//! - Connection strings are read from the source once
//! - safe_open / safe_close are idempotent, counted and traced once
//! - Dropping an open connection releases it
//! - The reclaim hook runs behind its cooldown gate

use sql_access::db::{ConnectionRegistry, ConnectionSource, NamedConnections, RegistryStats};
use sql_access::models::ConnectionState;
use sql_access::DbError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempPath};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

/// Source that counts lookups.
struct CountingSource {
    inner: NamedConnections,
    reads: AtomicUsize,
}

impl ConnectionSource for CountingSource {
    fn connection_string(&self, name: &str) -> Option<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.connection_string(name)
    }
}

/// Layer that counts every event it sees.
#[derive(Clone, Default)]
struct EventCounter(Arc<AtomicUsize>);

impl EventCounter {
    fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Run `f` with this counter as the thread's subscriber.
    fn capture<T>(&self, f: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::with_default(subscriber, f)
    }
}

impl<S: tracing::Subscriber> Layer<S> for EventCounter {
    fn on_event(&self, _event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Create an empty SQLite database file and a source pointing at it.
fn sqlite_source() -> (TempPath, NamedConnections) {
    let path = NamedTempFile::new().unwrap().into_temp_path();
    let url = format!("sqlite:{}", path.to_str().unwrap());
    (path, NamedConnections::new().with("main", url))
}

#[tokio::test]
async fn test_unknown_name_leaves_cache_unchanged() {
    let (_path, source) = sqlite_source();
    let registry = ConnectionRegistry::new(Arc::new(source));

    registry.resolve_connection_string("main").await.unwrap();
    let err = registry.open_connection("nope").await.unwrap_err();

    assert!(matches!(err, DbError::Configuration { ref name, .. } if name == "nope"));
    assert_eq!(registry.cached_names().await, vec!["main".to_string()]);
}

#[tokio::test]
async fn test_cached_name_does_not_read_source_again() {
    let (_path, inner) = sqlite_source();
    let source = Arc::new(CountingSource {
        inner,
        reads: AtomicUsize::new(0),
    });
    let registry = ConnectionRegistry::new(source.clone());

    let first = registry.open_connection("main").await.unwrap();
    let second = registry.open_connection("main").await.unwrap();

    assert_eq!(source.reads.load(Ordering::SeqCst), 1);
    assert_ne!(first.session().id(), second.session().id());
}

#[tokio::test]
async fn test_double_open_counts_once() {
    let (_path, source) = sqlite_source();
    let registry = ConnectionRegistry::new(Arc::new(source));

    let mut connection = registry.open_connection("main").await.unwrap();
    assert_eq!(connection.state(), ConnectionState::Closed);

    assert!(connection.safe_open().await.unwrap());
    assert!(!connection.safe_open().await.unwrap());
    assert_eq!(connection.state(), ConnectionState::Open);
    assert_eq!(registry.stats().opened, 1);
    assert_eq!(registry.stats().active(), 1);
}

#[tokio::test]
async fn test_double_close_counts_once() {
    let (_path, source) = sqlite_source();
    let registry = ConnectionRegistry::new(Arc::new(source));

    let mut connection = registry.open_connection("main").await.unwrap();
    assert!(!connection.safe_close(), "closing an unopened connection is a no-op");

    connection.safe_open().await.unwrap();

    let first = EventCounter::default();
    assert!(first.capture(|| connection.safe_close()));
    assert!(first.count() > 0, "the real close is traced");

    let second = EventCounter::default();
    assert!(!second.capture(|| connection.safe_close()));
    assert_eq!(second.count(), 0, "a repeated close emits nothing");

    assert!(!connection.session().is_running());
    assert_eq!(
        registry.stats(),
        RegistryStats {
            opened: 1,
            closed: 1,
            reclaims: 0,
        }
    );
}

#[tokio::test]
async fn test_reopen_starts_new_session() {
    let (_path, source) = sqlite_source();
    let registry = ConnectionRegistry::new(Arc::new(source));

    let mut connection = registry.open_connection("main").await.unwrap();
    connection.safe_open().await.unwrap();
    let first = connection.session().id();
    connection.safe_close();

    connection.safe_open().await.unwrap();
    assert_ne!(connection.session().id(), first);
    assert!(connection.session().is_running());
}

#[tokio::test]
async fn test_drop_closes_open_connection() {
    let (_path, source) = sqlite_source();
    let registry = ConnectionRegistry::new(Arc::new(source));

    {
        let mut connection = registry.open_connection("main").await.unwrap();
        connection.safe_open().await.unwrap();
    }

    let stats = registry.stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.closed, 1);
}

#[tokio::test]
async fn test_reclaim_hook_runs_after_close() {
    let (_path, source) = sqlite_source();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let registry = ConnectionRegistry::builder(Arc::new(source))
        .reclaim_cooldown(Duration::ZERO)
        .reclaim_hook(move |_: &RegistryStats| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    for _ in 0..2 {
        let mut connection = registry.open_connection("main").await.unwrap();
        connection.safe_open().await.unwrap();
        connection.safe_close();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(registry.stats().reclaims, 2);
}

#[tokio::test]
async fn test_reclaim_hook_respects_cooldown() {
    let (_path, source) = sqlite_source();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let registry = ConnectionRegistry::builder(Arc::new(source))
        .reclaim_cooldown(Duration::from_secs(3600))
        .reclaim_hook(move |_: &RegistryStats| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    let mut connection = registry.open_connection("main").await.unwrap();
    connection.safe_open().await.unwrap();
    connection.safe_close();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(registry.stats().closed, 1);
}

#[tokio::test]
async fn test_check_health_reports_pool() {
    let (_path, source) = sqlite_source();
    let registry = ConnectionRegistry::new(Arc::new(source));
    registry.open_connection("main").await.unwrap();

    let report = registry.check_health().await;
    assert_eq!(report.len(), 1);
    assert_eq!(report[0].connection, "main");
    assert!(report[0].healthy, "error: {:?}", report[0].error);
}

#[tokio::test]
async fn test_close_all_closes_pools() {
    let (_path, source) = sqlite_source();
    let registry = ConnectionRegistry::new(Arc::new(source));
    registry.open_connection("main").await.unwrap();

    registry.close_all().await;
    assert!(registry.check_health().await.is_empty());
    // Connection strings survive; a new pool is created on demand
    let mut connection = registry.open_connection("main").await.unwrap();
    assert!(connection.safe_open().await.unwrap());
}
