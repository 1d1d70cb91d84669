//! Parameter binding macros.
//!
//! sqlx's `Query`, `QueryAs` and `QueryScalar` each carry their own inherent
//! `bind` method with no shared trait, so binding a `SqlValue` slice is
//! expressed once as a macro and expanded for each query kind.

/// Bind every `SqlValue` in a slice onto a sqlx query, in order.
///
/// # Example
///
/// ```ignore
/// let query = bind_params!(sqlx::query_as::<_, User>(sql), params);
/// ```
macro_rules! bind_params {
    ($query:expr, $params:expr) => {{
        let mut query = $query;
        for param in $params {
            query = match param {
                $crate::models::SqlValue::Null => query.bind(None::<String>),
                $crate::models::SqlValue::Bool(v) => query.bind(*v),
                $crate::models::SqlValue::Int(v) => query.bind(*v),
                $crate::models::SqlValue::Float(v) => query.bind(*v),
                $crate::models::SqlValue::String(v) => query.bind(v.as_str()),
                $crate::models::SqlValue::Bytes(v) => query.bind(v.as_slice()),
            };
        }
        query
    }};
}

/// Build a `Vec<SqlValue>` from a list of values.
///
/// ```
/// use sql_access::{SqlValue, params};
///
/// let params = params![1, "alice", None::<i64>];
/// assert_eq!(params[1], SqlValue::String("alice".to_string()));
/// assert!(params[2].is_null());
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::models::SqlValue>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::SqlValue::from($value)),+]
    };
}
