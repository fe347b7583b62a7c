//! Configuration loader implementations.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

use crate::schema::ManagerConfig;
use crate::ConfigResult;

/// String-keyed configuration map handed to backends and the factory.
pub type ConfigMap = Map<String, Value>;

pub(crate) fn decode<T: DeserializeOwned>(map: &ConfigMap) -> ConfigResult<T> {
    Ok(serde_json::from_value(Value::Object(map.clone()))?)
}

/// Reads and validates a manager configuration file (JSON).
///
/// # Errors
///
/// Returns [`crate::ConfigError`] when the file cannot be read, decoded, or
/// fails validation.
pub async fn load_manager_config(path: impl AsRef<Path>) -> ConfigResult<ManagerConfig> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path).await?;
    let config = ManagerConfig::from_json_str(&raw)?;
    debug!(path = %path.display(), stores = config.stores.len(), "loaded memory manager config");
    Ok(config)
}
