//! arbor.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArborConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Fallbacks applied to generic tasks whose config leaves them unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub resource_pool: String,
    /// Upper bound on `resources.slots`; unset means unbounded.
    pub max_slots: Option<u32>,
    /// Whether resumed allocations may be preempted.
    pub preemptible: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/arbor/arbor.redb"),
        }
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            resource_pool: "default".to_string(),
            max_slots: None,
            preemptible: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info,arbord=debug,arbor_scheduler=debug".to_string(),
        }
    }
}

impl ArborConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ArborConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold an arbor.toml rooted at the given data directory.
    pub fn scaffold(data_dir: &Path) -> Self {
        ArborConfig {
            store: StoreConfig {
                path: data_dir.join("arbor.redb"),
            },
            ..ArborConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold() {
        let config = ArborConfig::scaffold(Path::new("/tmp/arbor"));
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("/tmp/arbor/arbor.redb"));
        assert!(toml_str.contains("resource_pool"));
    }

    #[test]
    fn test_parse_empty() {
        let config: ArborConfig = toml::from_str("").unwrap();
        assert_eq!(config.defaults.resource_pool, "default");
        assert!(config.defaults.preemptible);
        assert!(config.defaults.max_slots.is_none());
    }

    #[test]
    fn test_parse_partial() {
        let toml_str = r#"
[store]
path = "/data/tasks.redb"

[defaults]
resource_pool = "gpu"
max_slots = 8
preemptible = false
"#;
        let config: ArborConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/data/tasks.redb"));
        assert_eq!(config.defaults.resource_pool, "gpu");
        assert_eq!(config.defaults.max_slots, Some(8));
        assert!(!config.defaults.preemptible);
        assert_eq!(config.log.filter, LogConfig::default().filter);
    }
}
