//! Strongly typed configuration schemas.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use memory_primitives::MemoryType;
use serde::{Deserialize, Serialize};

use crate::loader::ConfigMap;
use crate::{ConfigError, ConfigResult};

/// Backend kinds the factory knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Bounded in-process store with context windows.
    ShortTerm,
    /// Networked TTL key-value cache.
    Cache,
    /// Similarity-searchable vector store.
    Vector,
}

impl StoreKind {
    /// Returns the configuration tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortTerm => "short_term",
            Self::Cache => "cache",
            Self::Vector => "vector",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "short_term" => Ok(Self::ShortTerm),
            "cache" => Ok(Self::Cache),
            "vector" => Ok(Self::Vector),
            other => Err(ConfigError::UnknownStoreKind(other.to_owned())),
        }
    }
}

/// URL selecting the in-process implementation of a networked backend.
pub const IN_PROCESS_URL: &str = "memory://";

/// Settings for the bounded in-process store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShortTermConfig {
    /// Global FIFO capacity across all windows.
    pub max_total_entries: usize,
    /// Capacity of a context window unless an entry overrides it.
    pub default_window_size: usize,
    /// Seconds between background sweeps.
    pub cleanup_interval_secs: u64,
    /// Lifetime of entries without an explicit TTL.
    pub entry_ttl_secs: u64,
    /// Idle time after which an untouched window is dropped.
    pub window_ttl_secs: u64,
}

impl Default for ShortTermConfig {
    fn default() -> Self {
        Self {
            max_total_entries: 1000,
            default_window_size: 100,
            cleanup_interval_secs: 60,
            entry_ttl_secs: 3600,
            window_ttl_secs: 7200,
        }
    }
}

impl ShortTermConfig {
    /// Parses and validates the configuration map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the map is malformed or fails validation.
    pub fn from_map(map: &ConfigMap) -> ConfigResult<Self> {
        let config: Self = crate::loader::decode(map)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when any capacity or interval is zero.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_total_entries == 0 {
            return Err(ConfigError::Invalid("max_total_entries must be greater than zero"));
        }
        if self.default_window_size == 0 {
            return Err(ConfigError::Invalid("default_window_size must be greater than zero"));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid("cleanup_interval_secs must be greater than zero"));
        }
        if self.entry_ttl_secs == 0 {
            return Err(ConfigError::Invalid("entry_ttl_secs must be greater than zero"));
        }
        if self.window_ttl_secs == 0 {
            return Err(ConfigError::Invalid("window_ttl_secs must be greater than zero"));
        }
        Ok(())
    }

    /// Interval between sweeps.
    #[must_use]
    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Default entry lifetime.
    #[must_use]
    pub const fn entry_ttl(&self) -> Duration {
        Duration::from_secs(self.entry_ttl_secs)
    }

    /// Window idle lifetime.
    #[must_use]
    pub const fn window_ttl(&self) -> Duration {
        Duration::from_secs(self.window_ttl_secs)
    }
}

/// Settings for the networked cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Connection URL; `memory://` selects the in-process connection.
    pub url: String,
    /// Prefix prepended to every key the store writes.
    pub key_prefix: String,
    /// Expiry applied when neither the call nor the entry sets one.
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: IN_PROCESS_URL.to_owned(),
            key_prefix: "memory:".to_owned(),
            default_ttl_secs: 3600,
        }
    }
}

impl CacheConfig {
    /// Parses and validates the configuration map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the map is malformed or fails validation.
    pub fn from_map(map: &ConfigMap) -> ConfigResult<Self> {
        let config: Self = crate::loader::decode(map)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty URL or a zero default TTL.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("cache url must not be empty"));
        }
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::Invalid("default_ttl_secs must be greater than zero"));
        }
        Ok(())
    }

    /// Returns `true` when the in-process connection is requested.
    #[must_use]
    pub fn is_in_process(&self) -> bool {
        self.url.trim() == IN_PROCESS_URL
    }

    /// Default expiry.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Settings for the vector store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VectorConfig {
    /// Service URL; `memory://` selects the in-process collection.
    pub url: String,
    /// Collection (class) name; must start with an uppercase ASCII letter.
    pub class_name: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            url: IN_PROCESS_URL.to_owned(),
            class_name: "MemoryEntry".to_owned(),
        }
    }
}

impl VectorConfig {
    /// Parses and validates the configuration map.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the map is malformed or fails validation.
    pub fn from_map(map: &ConfigMap) -> ConfigResult<Self> {
        let config: Self = crate::loader::decode(map)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an empty URL or a malformed class name.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::Invalid("vector url must not be empty"));
        }
        let mut chars = self.class_name.chars();
        match chars.next() {
            Some(first) if first.is_ascii_uppercase() => {}
            _ => {
                return Err(ConfigError::Invalid(
                    "class_name must start with an uppercase ASCII letter",
                ));
            }
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ConfigError::Invalid(
                "class_name may only contain ASCII letters, digits and underscores",
            ));
        }
        Ok(())
    }

    /// Returns `true` when the in-process collection is requested.
    #[must_use]
    pub fn is_in_process(&self) -> bool {
        self.url.trim() == IN_PROCESS_URL
    }
}

/// One backend the manager should build and register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSpec {
    /// Registry name.
    pub name: String,
    /// Backend kind.
    #[serde(rename = "type")]
    pub kind: StoreKind,
    /// Backend-specific configuration map.
    #[serde(default)]
    pub config: ConfigMap,
}

/// Manager configuration: stores to build and routing overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ManagerConfig {
    /// Stores to build, in registration order.
    pub stores: Vec<StoreSpec>,
    /// Overrides of the default `memory_type -> store name` mapping.
    pub type_mapping: BTreeMap<String, String>,
}

impl ManagerConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the document is malformed or fails validation.
    pub fn from_json_str(raw: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates store names and type-mapping targets.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for blank or duplicate store names, or
    /// mapping entries naming an unknown memory type or an unlisted store.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut names = HashSet::new();
        for spec in &self.stores {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::Invalid("store names must not be empty"));
            }
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::Invalid("store names must be unique"));
            }
        }
        for (memory_type, target) in &self.type_mapping {
            if memory_type.parse::<MemoryType>().is_err() {
                return Err(ConfigError::Invalid("type_mapping names an unknown memory type"));
            }
            if !names.contains(target.as_str()) {
                return Err(ConfigError::Invalid("type_mapping targets an unlisted store"));
            }
        }
        Ok(())
    }

    /// Returns the parsed type-mapping overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a key is not a memory type label.
    pub fn type_overrides(&self) -> ConfigResult<Vec<(MemoryType, String)>> {
        self.type_mapping
            .iter()
            .map(|(memory_type, target)| {
                memory_type
                    .parse::<MemoryType>()
                    .map(|parsed| (parsed, target.clone()))
                    .map_err(|_| ConfigError::Invalid("type_mapping names an unknown memory type"))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> ConfigMap {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn short_term_defaults_fill_missing_keys() {
        let config = ShortTermConfig::from_map(&map(json!({"max_total_entries": 5}))).unwrap();
        assert_eq!(config.max_total_entries, 5);
        assert_eq!(config.default_window_size, 100);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));
    }

    #[test]
    fn short_term_rejects_zero_capacity() {
        let err = ShortTermConfig::from_map(&map(json!({"default_window_size": 0})))
            .expect_err("zero window should fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = CacheConfig::from_map(&map(json!({"ttl": 5}))).expect_err("typo should fail");
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn vector_class_name_must_be_capitalised() {
        assert!(VectorConfig::from_map(&map(json!({"class_name": "memory"}))).is_err());
        assert!(VectorConfig::from_map(&map(json!({"class_name": "Memory_2"}))).is_ok());
    }

    #[test]
    fn vector_rejects_credentials_it_cannot_use() {
        let err = VectorConfig::from_map(&map(json!({"api_key": "secret"}))).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }), "{err}");
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn store_kind_tags_parse() {
        assert_eq!("short_term".parse::<StoreKind>().unwrap(), StoreKind::ShortTerm);
        assert!(matches!(
            "sqlite".parse::<StoreKind>(),
            Err(ConfigError::UnknownStoreKind(tag)) if tag == "sqlite"
        ));
    }

    #[test]
    fn manager_config_validates_mapping_targets() {
        let raw = r#"{
            "stores": [
                {"name": "short_term", "type": "short_term"},
                {"name": "cache", "type": "cache", "config": {"key_prefix": "app:"}}
            ],
            "type_mapping": {"long_term": "cache"}
        }"#;
        let config = ManagerConfig::from_json_str(raw).unwrap();
        assert_eq!(config.stores.len(), 2);
        assert_eq!(
            config.type_overrides().unwrap(),
            vec![(MemoryType::LongTerm, "cache".to_owned())]
        );

        let raw = r#"{"stores": [], "type_mapping": {"cache": "redis"}}"#;
        assert!(ManagerConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn manager_config_rejects_duplicate_names() {
        let raw = r#"{"stores": [
            {"name": "a", "type": "cache"},
            {"name": "a", "type": "vector"}
        ]}"#;
        assert!(matches!(
            ManagerConfig::from_json_str(raw),
            Err(ConfigError::Invalid(_))
        ));
    }
}
