//! Un-typed tabular results.
//!
//! A `DataSet` holds one `DataTable` per result set. It serves consumers that
//! want rows as plain values rather than mapped structs.

use super::SqlValue;
use serde::{Deserialize, Serialize};

/// Name given to the table filled by a single query.
pub const DEFAULT_TABLE_NAME: &str = "Table";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataColumn {
    pub name: String,
    /// Driver type name (e.g., "BIGINT", "TEXT")
    pub type_name: String,
}

impl DataColumn {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataTable {
    pub name: String,
    pub columns: Vec<DataColumn>,
    /// Row values in column order.
    pub rows: Vec<Vec<SqlValue>>,
}

impl DataTable {
    /// Create an empty table with the given columns.
    pub fn new(name: impl Into<String>, columns: Vec<DataColumn>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column, compared case-insensitively.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Look up a cell by row index and column name.
    pub fn value(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    /// Convert rows to JSON objects keyed by column name.
    pub fn to_json_rows(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .map(|(col, value)| (col.name.clone(), value.to_json()))
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub tables: Vec<DataTable>,
}

impl DataSet {
    pub fn new(tables: Vec<DataTable>) -> Self {
        Self { tables }
    }

    /// The first table, if any.
    pub fn table(&self) -> Option<&DataTable> {
        self.tables.first()
    }

    pub fn table_by_name(&self, name: &str) -> Option<&DataTable> {
        self.tables.iter().find(|t| t.name == name)
    }
}
