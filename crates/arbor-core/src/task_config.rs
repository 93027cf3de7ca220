//! Generic task launch configuration.
//!
//! The launch config travels through the control plane as a string-keyed JSON
//! map. Only the handful of fields the control plane acts on are typed; every
//! other key is carried through untouched.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Untyped launch configuration, as submitted.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Shallow last-writer-wins merge: every top-level key of `overrides`
/// replaces the same key of `base`. Nested objects are not merged.
pub fn merge(base: &ConfigMap, overrides: &ConfigMap) -> ConfigMap {
    let mut merged = base.clone();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

/// Typed view of a generic task's launch configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenericTaskConfig {
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default)]
    pub resources: TaskResources,
    /// Keys the control plane does not interpret.
    #[serde(flatten)]
    pub extra: ConfigMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResources {
    #[serde(default = "default_slots")]
    pub slots: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_pool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

fn default_slots() -> u32 {
    1
}

impl Default for TaskResources {
    fn default() -> Self {
        Self {
            slots: default_slots(),
            resource_pool: None,
            priority: None,
        }
    }
}

impl GenericTaskConfig {
    pub fn from_map(map: &ConfigMap) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::Value::Object(map.clone()))
    }

    pub fn to_map(&self) -> serde_json::Result<ConfigMap> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            // A struct always serializes to an object.
            _ => Ok(ConfigMap::new()),
        }
    }

    /// Resource pool named by the config, or `default` when it names none.
    pub fn resource_pool_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.resources
            .resource_pool
            .as_deref()
            .filter(|pool| !pool.is_empty())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> ConfigMap {
        match value {
            serde_json::Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn merge_is_last_writer_wins() {
        let base = map(json!({"entrypoint": ["python", "a.py"], "work_dir": "/a"}));
        let overrides = map(json!({"work_dir": "/b", "description": "x"}));

        let merged = merge(&base, &overrides);
        assert_eq!(merged["entrypoint"], json!(["python", "a.py"]));
        assert_eq!(merged["work_dir"], json!("/b"));
        assert_eq!(merged["description"], json!("x"));
    }

    #[test]
    fn merge_is_shallow() {
        let base = map(json!({"resources": {"slots": 4, "resource_pool": "gpu"}}));
        let overrides = map(json!({"resources": {"slots": 2}}));

        let merged = merge(&base, &overrides);
        assert_eq!(merged["resources"], json!({"slots": 2}));
    }

    #[test]
    fn merge_does_not_touch_inputs() {
        let base = map(json!({"a": 1}));
        let overrides = map(json!({"a": 2}));
        let _ = merge(&base, &overrides);
        assert_eq!(base["a"], json!(1));
    }

    #[test]
    fn parse_applies_defaults() {
        let config = GenericTaskConfig::from_map(&map(json!({"entrypoint": ["sleep", "1"]}))).unwrap();
        assert_eq!(config.resources.slots, 1);
        assert_eq!(config.resource_pool_or("default"), "default");
        assert!(config.work_dir.is_none());
    }

    #[test]
    fn parse_keeps_unknown_keys() {
        let config =
            GenericTaskConfig::from_map(&map(json!({"description": "hello", "resources": {"slots": 0}})))
                .unwrap();
        assert_eq!(config.resources.slots, 0);
        assert_eq!(config.extra["description"], json!("hello"));

        let back = config.to_map().unwrap();
        assert_eq!(back["description"], json!("hello"));
    }

    #[test]
    fn parse_rejects_malformed_resources() {
        let bad = map(json!({"resources": {"slots": -1}}));
        assert!(GenericTaskConfig::from_map(&bad).is_err());

        let bad = map(json!({"resources": "lots"}));
        assert!(GenericTaskConfig::from_map(&bad).is_err());
    }

    #[test]
    fn empty_pool_name_falls_back() {
        let config = GenericTaskConfig::from_map(&map(json!({"resources": {"resource_pool": ""}}))).unwrap();
        assert_eq!(config.resource_pool_or("cpu"), "cpu");
    }
}
