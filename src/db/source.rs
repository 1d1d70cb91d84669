//! Connection string sources.
//!
//! A `ConnectionSource` maps a logical connection name to a connection string.
//! The registry consults it once per name and caches the answer.

use crate::config::{AccessConfig, ConnectionEntry};
use crate::error::{DbError, DbResult};
use std::collections::HashMap;

/// Lookup of connection strings by logical name.
pub trait ConnectionSource: Send + Sync {
    /// Return the connection string for `name`, or `None` if not configured.
    fn connection_string(&self, name: &str) -> Option<String>;
}

/// In-memory name → connection string mapping.
#[derive(Debug, Clone, Default)]
pub struct NamedConnections {
    entries: HashMap<String, String>,
}

impl NamedConnections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a named connection string.
    pub fn with(mut self, name: impl Into<String>, connection_string: impl Into<String>) -> Self {
        self.insert(name, connection_string);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, connection_string: impl Into<String>) {
        self.entries.insert(name.into(), connection_string.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build from parsed configuration entries.
    pub fn from_entries(entries: impl IntoIterator<Item = ConnectionEntry>) -> Self {
        entries.into_iter().fold(Self::new(), |acc, entry| {
            acc.with(entry.name, entry.connection_string)
        })
    }
}

impl ConnectionSource for NamedConnections {
    fn connection_string(&self, name: &str) -> Option<String> {
        self.entries.get(name).cloned()
    }
}

impl ConnectionSource for HashMap<String, String> {
    fn connection_string(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Reads connection strings from `<PREFIX><NAME>` environment variables.
///
/// Names are upper-cased and `-`/`.` become `_`, so `"read-replica"` with the
/// default prefix reads `DB_CONNECTION_READ_REPLICA`.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable consulted for a logical name.
    pub fn variable_name(&self, name: &str) -> String {
        let normalized: String = name
            .chars()
            .map(|c| match c {
                '-' | '.' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_ENV_PREFIX)
    }
}

impl ConnectionSource for EnvSource {
    fn connection_string(&self, name: &str) -> Option<String> {
        std::env::var(self.variable_name(name))
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

/// Tries each source in order; the first hit wins.
#[derive(Default)]
pub struct LayeredSource {
    layers: Vec<Box<dyn ConnectionSource>>,
}

impl LayeredSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, source: impl ConnectionSource + 'static) -> Self {
        self.layers.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl ConnectionSource for LayeredSource {
    fn connection_string(&self, name: &str) -> Option<String> {
        self.layers
            .iter()
            .find_map(|layer| layer.connection_string(name))
    }
}

impl std::fmt::Debug for LayeredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredSource")
            .field("layers", &self.layers.len())
            .finish()
    }
}

/// Build the connection source described by `config`.
///
/// Named entries are consulted first, then environment variables when an
/// env prefix is configured.
pub fn source_from_config(config: &AccessConfig) -> DbResult<LayeredSource> {
    let entries = config
        .parse_connections()
        .map_err(|e| DbError::configuration("<config>", e))?;

    let mut source = LayeredSource::new().with_layer(NamedConnections::from_entries(entries));
    if let Some(prefix) = &config.env_prefix {
        source = source.with_layer(EnvSource::new(prefix.clone()));
    }
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_connections_lookup() {
        let source = NamedConnections::new()
            .with("main", "sqlite:main.db")
            .with("reports", "postgres://host/reports");
        assert_eq!(source.len(), 2);
        assert_eq!(
            source.connection_string("main").as_deref(),
            Some("sqlite:main.db")
        );
        assert!(source.connection_string("missing").is_none());
    }

    #[test]
    fn test_named_connections_later_entry_wins() {
        let entries = vec![
            ConnectionEntry::parse("main=sqlite:one.db").unwrap(),
            ConnectionEntry::parse("main=sqlite:two.db").unwrap(),
        ];
        let source = NamedConnections::from_entries(entries);
        assert_eq!(
            source.connection_string("main").as_deref(),
            Some("sqlite:two.db")
        );
    }

    #[test]
    fn test_hash_map_source() {
        let mut map = HashMap::new();
        map.insert("main".to_string(), "sqlite:main.db".to_string());
        assert!(map.connection_string("main").is_some());
        assert!(map.connection_string("other").is_none());
    }

    #[test]
    fn test_env_variable_name() {
        let source = EnvSource::default();
        assert_eq!(source.variable_name("main"), "DB_CONNECTION_MAIN");
        assert_eq!(
            source.variable_name("read-replica.eu"),
            "DB_CONNECTION_READ_REPLICA_EU"
        );
        assert_eq!(EnvSource::new("APP_").variable_name("db"), "APP_DB");
    }

    #[test]
    fn test_env_source_missing_variable() {
        let source = EnvSource::new("SQL_ACCESS_TEST_UNSET_PREFIX_");
        assert!(source.connection_string("nothing").is_none());
    }

    #[test]
    fn test_layered_source_first_hit_wins() {
        let source = LayeredSource::new()
            .with_layer(NamedConnections::new().with("main", "sqlite:first.db"))
            .with_layer(
                NamedConnections::new()
                    .with("main", "sqlite:second.db")
                    .with("audit", "sqlite:audit.db"),
            );

        assert_eq!(source.len(), 2);
        assert_eq!(
            source.connection_string("main").as_deref(),
            Some("sqlite:first.db")
        );
        assert_eq!(
            source.connection_string("audit").as_deref(),
            Some("sqlite:audit.db")
        );
        assert!(source.connection_string("none").is_none());
    }

    #[test]
    fn test_source_from_config() {
        let config = AccessConfig {
            connections: vec!["main=sqlite:main.db".to_string()],
            env_prefix: Some("SQL_ACCESS_TEST_UNSET_PREFIX_".to_string()),
            ..AccessConfig::default()
        };
        let source = source_from_config(&config).unwrap();
        assert_eq!(source.len(), 2);
        assert!(source.connection_string("main").is_some());
    }

    #[test]
    fn test_source_from_config_invalid_entry() {
        let config = AccessConfig {
            connections: vec!["main=not a url".to_string()],
            ..AccessConfig::default()
        };
        let err = source_from_config(&config).unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }
}
