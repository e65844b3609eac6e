//! The Harness Adapter capability: materialization and validation variants
//! per coding-agent harness. Modeled as a small trait plus a name→adapter
//! registry (per the design notes: avoid inheritance, prefer a flat map)
//! rather than a class hierarchy. The default adapter mirrors the "claude
//! plugin" shape described by the materializer.

use std::collections::BTreeMap;

use asp_schema::{Warning, WarningSeverity};
use serde_json::Value;

/// State machine for a materialized target, per adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializationState {
    /// Nothing has been built yet.
    Absent,
    /// Being populated under a staging path; not yet visible.
    StagingTmp,
    /// Atomically renamed into place; visible to readers.
    Committed,
}

/// Harness-identifying metadata, returned by [`HarnessAdapter::metadata`].
#[derive(Debug, Clone)]
pub struct HarnessMetadata {
    /// Stable harness id, e.g. `claude`.
    pub id: String,
    /// The adapter's own version (mixed into cache keys, not env hashes).
    pub version: String,
    /// Model ids this harness defaults to when a space doesn't specify one.
    pub default_models: Vec<String>,
    /// Which cache-key algorithm version this adapter expects (see `store`).
    pub cache_key_version: u32,
}

/// A pluggable per-harness materialization and validation capability.
///
/// `materialize_space`/`compose_target`/`validate` are intentionally thin:
/// the actual linking and composition algorithm lives in `materialize`,
/// shared across adapters. What varies per-harness is *shape*: the
/// descriptor's relative path, the native hook config format, and how
/// permissions map onto the harness's own model.
pub trait HarnessAdapter: Send + Sync {
    /// This adapter's identifying metadata.
    fn metadata(&self) -> HarnessMetadata;

    /// Path (relative to a plugin's root) of its descriptor file, e.g.
    /// `.claude-plugin/plugin.json`.
    fn descriptor_path(&self) -> &str;

    /// Path (relative to a plugin's root) the translated hook config is
    /// written to, e.g. `hooks/hooks.json`.
    fn hooks_output_path(&self) -> &str;

    /// Translate a canonical `hooks.toml` table (already parsed as JSON) into
    /// this harness's native hook config shape.
    fn translate_hooks(&self, canonical: &Value) -> Value;

    /// Translate a canonical `permissions.toml` table into this harness's
    /// native permission model.
    fn translate_permissions(&self, canonical: &Value) -> Value;

    /// Validate a fully composed target, returning non-fatal warnings.
    fn validate(&self, _descriptor_names: &[String]) -> Vec<Warning> {
        Vec::new()
    }
}

/// The default adapter: materializes the "claude plugin" shape described in
/// the materializer component — `.claude-plugin/plugin.json`, native
/// `hooks/hooks.json`, `${CLAUDE_PLUGIN_ROOT}` as the hook path placeholder.
pub struct ClaudeAdapter {
    version: String,
}

impl ClaudeAdapter {
    /// The `${CLAUDE_PLUGIN_ROOT}`-equivalent placeholder hook commands must
    /// reference instead of a plugin-relative literal path.
    pub const PLUGIN_ROOT_VAR: &'static str = "${CLAUDE_PLUGIN_ROOT}";

    /// Build the default adapter, stamped with its own version string.
    pub fn new(version: impl Into<String>) -> Self {
        Self { version: version.into() }
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_VERSION"))
    }
}

impl HarnessAdapter for ClaudeAdapter {
    fn metadata(&self) -> HarnessMetadata {
        HarnessMetadata {
            id: "claude".to_string(),
            version: self.version.clone(),
            default_models: vec!["claude-sonnet".to_string(), "claude-opus".to_string()],
            cache_key_version: 2,
        }
    }

    fn descriptor_path(&self) -> &str {
        ".claude-plugin/plugin.json"
    }

    fn hooks_output_path(&self) -> &str {
        "hooks/hooks.json"
    }

    fn translate_hooks(&self, canonical: &Value) -> Value {
        // The canonical shape (declarative event bindings keyed by event
        // name) already matches Claude's native `hooks.json` table, so this
        // is the identity transform. A harness with a differently-shaped
        // native format would diverge here.
        canonical.clone()
    }

    fn translate_permissions(&self, canonical: &Value) -> Value {
        canonical.clone()
    }

    fn validate(&self, descriptor_names: &[String]) -> Vec<Warning> {
        let mut seen = BTreeMap::new();
        let mut warnings = Vec::new();
        for name in descriptor_names {
            *seen.entry(name.clone()).or_insert(0u32) += 1;
        }
        for (name, count) in seen {
            if count > 1 {
                warnings.push(Warning::new(
                    "W205",
                    format!("plugin name {name:?} is shared by multiple spaces"),
                    WarningSeverity::Warning,
                ));
            }
        }
        warnings
    }
}

/// A name→adapter registry, selected by a target's `harness` option.
pub struct HarnessRegistry {
    adapters: BTreeMap<String, Box<dyn HarnessAdapter>>,
}

impl HarnessRegistry {
    /// The registry pre-populated with the default `claude` adapter.
    pub fn with_default() -> Self {
        let mut adapters: BTreeMap<String, Box<dyn HarnessAdapter>> = BTreeMap::new();
        adapters.insert("claude".to_string(), Box::new(ClaudeAdapter::default()));
        Self { adapters }
    }

    /// Register (or replace) an adapter under `id`.
    pub fn register(&mut self, id: impl Into<String>, adapter: Box<dyn HarnessAdapter>) {
        self.adapters.insert(id.into(), adapter);
    }

    /// Look up an adapter by id, falling back to `claude` when `id` is `None`.
    pub fn get(&self, id: Option<&str>) -> Option<&dyn HarnessAdapter> {
        self.adapters.get(id.unwrap_or("claude")).map(|b| b.as_ref())
    }
}

impl Default for HarnessRegistry {
    fn default() -> Self {
        Self::with_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_resolves_claude_by_default_and_by_name() {
        let registry = HarnessRegistry::with_default();
        assert!(registry.get(None).is_some());
        assert!(registry.get(Some("claude")).is_some());
        assert!(registry.get(Some("nonexistent")).is_none());
    }

    #[test]
    fn claude_adapter_validate_flags_duplicate_plugin_names() {
        let adapter = ClaudeAdapter::default();
        let warnings = adapter.validate(&["shared".to_string(), "shared".to_string(), "unique".to_string()]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "W205");
    }
}
