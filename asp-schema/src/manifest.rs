//! `space.toml`: the per-space manifest.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::SpaceId;
use crate::selector::SpaceRef;

/// The only schema version this crate understands for `space.toml`.
pub const SPACE_MANIFEST_SCHEMA: u32 = 1;

/// A `plugin { name?, version? }` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PluginMeta {
    /// Overrides the materialized plugin's kebab-case name; defaults to the space id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Overrides the materialized plugin's version; defaults to the manifest's `version`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A `[deps] spaces = [...]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DepsTable {
    /// Declared space dependencies, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spaces: Vec<SpaceRef>,
}

/// The manifest describing a single space: `spaces/<id>/space.toml` in the
/// registry, or `<project>/spaces/<id>/space.toml` on disk for dev spaces.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SpaceManifest {
    /// Schema version; must be `1`.
    pub schema: u32,
    /// The space's own id; must match the directory it lives under.
    pub id: SpaceId,
    /// Free-form semver-ish version string, used for dist-tag resolution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Overrides for the materialized plugin's identity.
    #[serde(default, skip_serializing_if = "is_default_plugin_meta")]
    pub plugin: PluginMeta,
    /// Transitive space dependencies.
    #[serde(default, skip_serializing_if = "is_default_deps")]
    pub deps: DepsTable,
    /// Settings composed into the materialized target's `settings.json`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    /// Declarative allow/deny permission facets (`permissions.toml`-shaped).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Value>,
    /// Harness-specific extension tables, e.g. `[claude]`, `[codex]`.
    #[serde(flatten)]
    pub harness_extensions: BTreeMap<String, Value>,
}

fn is_default_plugin_meta(p: &PluginMeta) -> bool {
    p.name.is_none() && p.version.is_none()
}

fn is_default_deps(d: &DepsTable) -> bool {
    d.spaces.is_empty()
}

impl SpaceManifest {
    /// The plugin name to materialize under: the manifest override, or the space id.
    pub fn plugin_name(&self) -> String {
        self.plugin
            .name
            .clone()
            .unwrap_or_else(|| self.id.as_str().to_string())
    }

    /// The plugin version to report: the manifest override, or the space version.
    pub fn plugin_version(&self) -> Option<String> {
        self.plugin.version.clone().or_else(|| self.version.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_manifest() {
        let toml = r#"
            schema = 1
            id = "base"
        "#;
        let m: SpaceManifest = toml::from_str(toml).unwrap();
        assert_eq!(m.id.as_str(), "base");
        assert_eq!(m.plugin_name(), "base");
        assert!(m.deps.spaces.is_empty());
    }

    #[test]
    fn deserializes_deps_and_plugin_overrides() {
        let toml = r#"
            schema = 1
            id = "frontend"
            version = "1.0.0"

            [plugin]
            name = "shared"

            [deps]
            spaces = ["space:base@stable"]
        "#;
        let m: SpaceManifest = toml::from_str(toml).unwrap();
        assert_eq!(m.plugin_name(), "shared");
        assert_eq!(m.deps.spaces.len(), 1);
        assert_eq!(m.deps.spaces[0].id.as_str(), "base");
    }
}
