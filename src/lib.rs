//! SQL Access Library
//!
//! Transaction-scoped access to SQL databases (SQLite, PostgreSQL, MySQL)
//! over pooled connections resolved from logical names.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;

pub use config::AccessConfig;
pub use db::{
    Connection, ConnectionRegistry, ConnectionSource, DataAccess, IsolationLevel, Transaction,
};
pub use error::{DbError, DbResult};
pub use models::{DataSet, DataTable, SqlValue};
