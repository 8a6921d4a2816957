// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Layered Configuration Tree
//!
//! Hierarchical, source-layered key/value store with provenance.
//!
//! ## Overview
//!
//! Configuration is a tree addressed by dotted keys (`time.step_days`).
//! Each leaf keeps every value ever set for it together with the source
//! that set it; the *effective* value is the last one set by the
//! highest-priority source. Priority order (low → high):
//!
//! 1. **BaseDefaults** — built-in framework defaults
//! 2. **ComponentConfigs** — component-declared defaults
//! 3. **ModelOverride** — the model specification document
//! 4. **RuntimeOverride** — interactive runtime overrides
//!
//! ## Contracts
//!
//! - Writes after setup fail with `ConfigurationFrozen`
//! - Reading an unset key fails with `ConfigurationMissing`
//! - Two components declaring the same default leaf with different values
//!   fail at registration with `ConfigurationConflict`
//! - The `Display` rendering shows every source and its value, so a
//!   surprising effective value can always be traced to whoever set it
//!
//! ## Usage Examples
//!
//! ```rust
//! use microsim::infrastructure::config::{ConfigSource, LayeredConfigTree};
//!
//! let tree = LayeredConfigTree::new();
//! tree.set("time.step_days", ConfigSource::BaseDefaults, "framework", 1.0.into())
//!     .unwrap();
//! tree.set("time.step_days", ConfigSource::ModelOverride, "model.yaml", 3.0.into())
//!     .unwrap();
//! assert_eq!(tree.get_float("time.step_days").unwrap(), 3.0);
//! ```

use microsim_domain::SimulationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;

/// The provenance layer a configuration value was set by.
///
/// Later variants take priority over earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigSource {
    BaseDefaults,
    ComponentConfigs,
    ModelOverride,
    RuntimeOverride,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigSource::BaseDefaults => "base_defaults",
            ConfigSource::ComponentConfigs => "component_configs",
            ConfigSource::ModelOverride => "model_override",
            ConfigSource::RuntimeOverride => "runtime_override",
        };
        write!(f, "{}", name)
    }
}

/// One (source, label, value) record on a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    pub source: ConfigSource,
    pub label: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ConfigNode {
    Branch(BTreeMap<String, ConfigNode>),
    Leaf(Vec<LayerEntry>),
}

impl ConfigNode {
    fn effective(&self) -> Option<&LayerEntry> {
        match self {
            ConfigNode::Branch(_) => None,
            // Entries are kept in insertion order; the effective value is
            // the last entry of the highest-priority source.
            ConfigNode::Leaf(entries) => entries
                .iter()
                .enumerate()
                .max_by_key(|(position, entry)| (entry.source, *position))
                .map(|(_, entry)| entry),
        }
    }
}

/// Hierarchical, source-layered configuration with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayeredConfigTree {
    root: RefCell<ConfigNode>,
    frozen: Cell<bool>,
}

impl LayeredConfigTree {
    pub fn new() -> Self {
        Self {
            root: RefCell::new(ConfigNode::Branch(BTreeMap::new())),
            frozen: Cell::new(false),
        }
    }

    /// Marks the tree read-only. Called by the context at the end of setup.
    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    /// Reopens a tree restored from a snapshot so the restoring context
    /// can replay component defaults before freezing again. Engine-internal.
    pub(crate) fn thaw(&self) {
        self.frozen.set(false);
    }

    /// Sets one value at a dotted key.
    ///
    /// Mapping values recurse so `set("time", ..., {"start": ...})` and
    /// `set("time.start", ...)` are equivalent.
    pub fn set(
        &self,
        key: &str,
        source: ConfigSource,
        label: &str,
        value: Value,
    ) -> Result<(), SimulationError> {
        if self.frozen.get() {
            return Err(SimulationError::config_frozen(format!(
                "cannot set `{}` after setup",
                key
            )));
        }
        if let Value::Object(map) = &value {
            for (child, child_value) in map {
                self.set(&format!("{}.{}", key, child), source, label, child_value.clone())?;
            }
            return Ok(());
        }
        let mut root = self.root.borrow_mut();
        let mut node = &mut *root;
        let segments: Vec<&str> = key.split('.').collect();
        for (depth, segment) in segments.iter().enumerate() {
            let children = match node {
                ConfigNode::Branch(children) => children,
                ConfigNode::Leaf(_) => {
                    return Err(SimulationError::config_type(format!(
                        "`{}` is a value, not a mapping; cannot descend into `{}`",
                        segments[..depth].join("."),
                        key
                    )));
                }
            };
            let last = depth + 1 == segments.len();
            let entry = children.entry((*segment).to_string()).or_insert_with(|| {
                if last {
                    ConfigNode::Leaf(Vec::new())
                } else {
                    ConfigNode::Branch(BTreeMap::new())
                }
            });
            node = entry;
        }
        match node {
            ConfigNode::Leaf(entries) => {
                entries.push(LayerEntry {
                    source,
                    label: label.to_string(),
                    value,
                });
                Ok(())
            }
            ConfigNode::Branch(_) => Err(SimulationError::config_type(format!(
                "`{}` is a mapping, not a value",
                key
            ))),
        }
    }

    /// Layers a whole nested mapping onto the tree.
    pub fn update(&self, map: &Value, source: ConfigSource, label: &str) -> Result<(), SimulationError> {
        let object = match map {
            Value::Object(object) => object,
            Value::Null => return Ok(()),
            other => {
                return Err(SimulationError::config_type(format!(
                    "configuration layer `{}` must be a mapping, got {}",
                    label, other
                )));
            }
        };
        for (key, value) in object {
            self.set(key, source, label, value.clone())?;
        }
        Ok(())
    }

    /// Layers one component's declared defaults.
    ///
    /// A leaf already holding a component default with a *different* value
    /// is a conflict and fails the registration.
    pub fn declare_component_defaults(
        &self,
        component: &str,
        defaults: &Value,
    ) -> Result<(), SimulationError> {
        self.check_default_conflicts(component, "", defaults)?;
        self.update(defaults, ConfigSource::ComponentConfigs, component)
    }

    fn check_default_conflicts(
        &self,
        component: &str,
        prefix: &str,
        value: &Value,
    ) -> Result<(), SimulationError> {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    self.check_default_conflicts(component, &path, child)?;
                }
                Ok(())
            }
            Value::Null => Ok(()),
            scalar => {
                if let Some(existing) = self.component_default(prefix) {
                    if &existing.value != scalar {
                        return Err(SimulationError::config_conflict(format!(
                            "`{}` declares default `{}` = {} but `{}` already declared {}",
                            component, prefix, scalar, existing.label, existing.value
                        )));
                    }
                }
                Ok(())
            }
        }
    }

    fn component_default(&self, key: &str) -> Option<LayerEntry> {
        let root = self.root.borrow();
        let mut node = &*root;
        for segment in key.split('.') {
            match node {
                ConfigNode::Branch(children) => node = children.get(segment)?,
                ConfigNode::Leaf(_) => return None,
            }
        }
        match node {
            ConfigNode::Leaf(entries) => entries
                .iter()
                .rev()
                .find(|entry| entry.source == ConfigSource::ComponentConfigs)
                .cloned(),
            ConfigNode::Branch(_) => None,
        }
    }

    /// Reads the effective value at a dotted key.
    pub fn get(&self, key: &str) -> Result<Value, SimulationError> {
        let root = self.root.borrow();
        let mut node = &*root;
        for segment in key.split('.') {
            match node {
                ConfigNode::Branch(children) => {
                    node = children
                        .get(segment)
                        .ok_or_else(|| SimulationError::config_missing(key.to_string()))?;
                }
                ConfigNode::Leaf(_) => {
                    return Err(SimulationError::config_missing(key.to_string()));
                }
            }
        }
        node.effective()
            .map(|entry| entry.value.clone())
            .ok_or_else(|| SimulationError::config_missing(key.to_string()))
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    pub fn get_int(&self, key: &str) -> Result<i64, SimulationError> {
        let value = self.get(key)?;
        value
            .as_i64()
            .ok_or_else(|| SimulationError::config_type(format!("`{}` is not an integer: {}", key, value)))
    }

    pub fn get_float(&self, key: &str) -> Result<f64, SimulationError> {
        let value = self.get(key)?;
        value
            .as_f64()
            .ok_or_else(|| SimulationError::config_type(format!("`{}` is not a number: {}", key, value)))
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, SimulationError> {
        let value = self.get(key)?;
        value
            .as_bool()
            .ok_or_else(|| SimulationError::config_type(format!("`{}` is not a boolean: {}", key, value)))
    }

    pub fn get_str(&self, key: &str) -> Result<String, SimulationError> {
        let value = self.get(key)?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| SimulationError::config_type(format!("`{}` is not a string: {}", key, value)))
    }

    pub fn get_list(&self, key: &str) -> Result<Vec<Value>, SimulationError> {
        let value = self.get(key)?;
        value
            .as_array()
            .cloned()
            .ok_or_else(|| SimulationError::config_type(format!("`{}` is not a list: {}", key, value)))
    }

    /// Returns the effective values under `prefix` as a nested mapping.
    pub fn subtree(&self, prefix: &str) -> Result<Value, SimulationError> {
        let root = self.root.borrow();
        let mut node = &*root;
        for segment in prefix.split('.') {
            match node {
                ConfigNode::Branch(children) => {
                    node = children
                        .get(segment)
                        .ok_or_else(|| SimulationError::config_missing(prefix.to_string()))?;
                }
                ConfigNode::Leaf(_) => {
                    return Err(SimulationError::config_missing(prefix.to_string()));
                }
            }
        }
        Ok(Self::effective_value(node))
    }

    fn effective_value(node: &ConfigNode) -> Value {
        match node {
            ConfigNode::Leaf(_) => node.effective().map(|entry| entry.value.clone()).unwrap_or(Value::Null),
            ConfigNode::Branch(children) => Value::Object(
                children
                    .iter()
                    .map(|(key, child)| (key.clone(), Self::effective_value(child)))
                    .collect(),
            ),
        }
    }

    fn render(node: &ConfigNode, path: &str, out: &mut String) {
        match node {
            ConfigNode::Leaf(entries) => {
                let effective = node.effective();
                for entry in entries {
                    let marker = if effective == Some(entry) { "*" } else { " " };
                    out.push_str(&format!(
                        "{} {} = {} [{}:{}]\n",
                        marker, path, entry.value, entry.source, entry.label
                    ));
                }
            }
            ConfigNode::Branch(children) => {
                for (key, child) in children {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", path, key)
                    };
                    Self::render(child, &child_path, out);
                }
            }
        }
    }
}

impl Default for LayeredConfigTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LayeredConfigTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        Self::render(&self.root.borrow(), "", &mut out);
        write!(f, "{}", out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_highest_priority_source_wins() {
        let tree = LayeredConfigTree::new();
        tree.set("randomness.seed", ConfigSource::BaseDefaults, "framework", json!(0))
            .unwrap();
        tree.set("randomness.seed", ConfigSource::ModelOverride, "model.yaml", json!(17))
            .unwrap();
        tree.set("randomness.seed", ConfigSource::ComponentConfigs, "mortality", json!(3))
            .unwrap();
        assert_eq!(tree.get_int("randomness.seed").unwrap(), 17);
    }

    #[test]
    fn test_last_write_wins_within_source() {
        let tree = LayeredConfigTree::new();
        tree.set("time.step_days", ConfigSource::ModelOverride, "model.yaml", json!(1.0))
            .unwrap();
        tree.set("time.step_days", ConfigSource::ModelOverride, "model.yaml", json!(3.0))
            .unwrap();
        assert_eq!(tree.get_float("time.step_days").unwrap(), 3.0);
    }

    #[test]
    fn test_missing_key_fails() {
        let tree = LayeredConfigTree::new();
        let err = tree.get("time.start").unwrap_err();
        assert_eq!(err.category(), "configuration");
        assert!(err.to_string().contains("time.start"));
    }

    #[test]
    fn test_frozen_tree_rejects_writes() {
        let tree = LayeredConfigTree::new();
        tree.set("a", ConfigSource::BaseDefaults, "framework", json!(1)).unwrap();
        tree.freeze();
        let err = tree
            .set("a", ConfigSource::RuntimeOverride, "interactive", json!(2))
            .unwrap_err();
        assert!(matches!(err, SimulationError::ConfigurationFrozen(_)));
        assert_eq!(tree.get_int("a").unwrap(), 1);
    }

    #[test]
    fn test_conflicting_component_defaults_fail() {
        let tree = LayeredConfigTree::new();
        tree.declare_component_defaults("mortality", &json!({"mortality": {"rate": 0.01}}))
            .unwrap();
        // Same value from another component is fine.
        tree.declare_component_defaults("observer", &json!({"mortality": {"rate": 0.01}}))
            .unwrap();
        let err = tree
            .declare_component_defaults("disease", &json!({"mortality": {"rate": 0.05}}))
            .unwrap_err();
        assert!(matches!(err, SimulationError::ConfigurationConflict(_)));
        assert!(err.to_string().contains("mortality"));
    }

    #[test]
    fn test_nested_mapping_writes_recurse() {
        let tree = LayeredConfigTree::new();
        tree.update(
            &json!({"population": {"size": 100, "age_start": 0.0}}),
            ConfigSource::ModelOverride,
            "model.yaml",
        )
        .unwrap();
        assert_eq!(tree.get_int("population.size").unwrap(), 100);
        assert_eq!(tree.get_float("population.age_start").unwrap(), 0.0);
    }

    #[test]
    fn test_subtree_extraction() {
        let tree = LayeredConfigTree::new();
        tree.update(
            &json!({"mortality": {"rate": 0.01, "conversion": "exponential"}}),
            ConfigSource::ComponentConfigs,
            "mortality",
        )
        .unwrap();
        let subtree = tree.subtree("mortality").unwrap();
        assert_eq!(subtree, json!({"rate": 0.01, "conversion": "exponential"}));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let tree = LayeredConfigTree::new();
        tree.set("time.step_days", ConfigSource::BaseDefaults, "framework", json!("one"))
            .unwrap();
        let err = tree.get_float("time.step_days").unwrap_err();
        assert!(matches!(err, SimulationError::ConfigurationType(_)));
    }

    #[test]
    fn test_display_shows_provenance() {
        let tree = LayeredConfigTree::new();
        tree.set("seed", ConfigSource::BaseDefaults, "framework", json!(0)).unwrap();
        tree.set("seed", ConfigSource::ModelOverride, "model.yaml", json!(7)).unwrap();
        let rendered = tree.to_string();
        assert!(rendered.contains("base_defaults:framework"));
        assert!(rendered.contains("model_override:model.yaml"));
        // The effective entry is starred.
        assert!(rendered.contains("* seed = 7"));
    }

    #[test]
    fn test_leaf_branch_collision_fails() {
        let tree = LayeredConfigTree::new();
        tree.set("time", ConfigSource::BaseDefaults, "framework", json!(1)).unwrap();
        let err = tree
            .set("time.start", ConfigSource::BaseDefaults, "framework", json!(2))
            .unwrap_err();
        assert!(matches!(err, SimulationError::ConfigurationType(_)));
    }
}
