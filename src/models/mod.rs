//! Data models for the SQL access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod dataset;
pub mod value;

// Re-export commonly used types
pub use connection::{
    ConnectionState, DatabaseType, TransactionState, masked_connection_string,
};
pub use dataset::{DEFAULT_TABLE_NAME, DataColumn, DataSet, DataTable};
pub use value::SqlValue;
