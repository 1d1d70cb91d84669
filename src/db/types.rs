//! Database-agnostic type mappings.
//!
//! Turns driver rows into un-typed `DataTable`s.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. A per-category decoder extracts the `SqlValue`, falling back to trying every
//!    type when the declared type does not match the stored value (SQLite's
//!    dynamic typing makes this common)

use crate::models::{DataColumn, DataTable, SqlValue};
use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Null,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }

    // Integer types
    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    // Boolean
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Float types
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "numeric"
    {
        return TypeCategory::Float;
    }

    // Binary types
    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "string" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Column names and type names, in order.
pub fn data_columns<C: Column>(columns: &[C]) -> Vec<DataColumn> {
    columns
        .iter()
        .map(|col| DataColumn::new(col.name(), col.type_info().name()))
        .collect()
}

/// Build a `DataTable` from fetched rows.
///
/// Columns come from the first row. For an empty result the caller has to
/// supply them from a statement description.
pub fn data_table_from_rows(name: &str, rows: &[AnyRow]) -> DataTable {
    let Some(first) = rows.first() else {
        return DataTable::new(name, Vec::new());
    };

    let columns = data_columns(first.columns());
    let mut table = DataTable::new(name, columns);
    table.rows = rows.iter().map(decode_row).collect();
    table
}

/// Decode every cell of a row in column order.
pub fn decode_row(row: &AnyRow) -> Vec<SqlValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = categorize_type(col.type_info().name());
            decode_cell(row, idx, category)
        })
        .collect()
}

fn decode_cell(row: &AnyRow, idx: usize, category: TypeCategory) -> SqlValue {
    let is_null = row
        .try_get_raw(idx)
        .map(|value| value.is_null())
        .unwrap_or(true);
    if is_null {
        return SqlValue::Null;
    }

    let decoded = match category {
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Text => decode_text(row, idx),
        TypeCategory::Binary => decode_binary(row, idx),
        TypeCategory::Null | TypeCategory::Unknown => None,
    };

    decoded.or_else(|| decode_any(row, idx)).unwrap_or_else(|| {
        tracing::warn!(
            column = idx,
            "Failed to decode column value, returning NULL"
        );
        SqlValue::Null
    })
}

/// Try each supported representation in turn.
fn decode_any(row: &AnyRow, idx: usize) -> Option<SqlValue> {
    decode_integer(row, idx)
        .or_else(|| decode_float(row, idx))
        .or_else(|| decode_boolean(row, idx))
        .or_else(|| decode_text(row, idx))
        .or_else(|| decode_binary(row, idx))
}

fn decode_integer(row: &AnyRow, idx: usize) -> Option<SqlValue> {
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return Some(SqlValue::Int(v));
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return Some(SqlValue::Int(v.into()));
    }
    None
}

fn decode_float(row: &AnyRow, idx: usize) -> Option<SqlValue> {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return Some(SqlValue::Float(v));
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
        return Some(SqlValue::Float(v.into()));
    }
    None
}

fn decode_boolean(row: &AnyRow, idx: usize) -> Option<SqlValue> {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(SqlValue::Bool)
}

fn decode_text(row: &AnyRow, idx: usize) -> Option<SqlValue> {
    row.try_get::<Option<String>, _>(idx)
        .ok()
        .flatten()
        .map(SqlValue::String)
}

fn decode_binary(row: &AnyRow, idx: usize) -> Option<SqlValue> {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(SqlValue::Bytes)
}
