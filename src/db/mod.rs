//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection string resolution and pooled connections
//! - Connection handles with diagnostic sessions
//! - Transactions with isolation levels
//! - Typed and un-typed statement execution
//! - Type mappings for un-typed results

#[macro_use]
mod macros;

pub mod access;
pub mod connection;
pub mod registry;
pub mod source;
pub mod transaction;
pub mod types;

pub use access::{DataAccess, NoopStatementLogger, StatementLogger, TracingStatementLogger};
pub use connection::{Connection, Session};
pub use registry::{ConnectionRegistry, PoolHealth, ReclaimHook, RegistryBuilder, RegistryStats};
pub use source::{ConnectionSource, EnvSource, LayeredSource, NamedConnections};
pub use transaction::{IsolationLevel, Transaction};
