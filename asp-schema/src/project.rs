//! `asp-targets.toml`: the per-project manifest declaring named targets.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::selector::SpaceRef;

/// The only schema version this crate understands for `asp-targets.toml`.
pub const PROJECT_MANIFEST_SCHEMA: u32 = 1;

/// `[targets.<name>.resolver]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResolverOptions {
    /// If true, refuse to resolve anything not already present in the lock file.
    #[serde(default, skip_serializing_if = "is_false")]
    pub locked: bool,
    /// If true, allow installing from a dirty dev space without error.
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_dirty: bool,
}

fn is_false(b: &bool) -> bool {
    !b
}

/// `[targets.<name>]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct TargetDef {
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The non-empty list of space refs composing this target.
    pub compose: Vec<SpaceRef>,
    /// The harness this target materializes for; defaults to the project default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harness: Option<String>,
    /// Resolver behavior overrides for this target.
    #[serde(default, skip_serializing_if = "is_default_resolver")]
    pub resolver: ResolverOptions,
}

fn is_default_resolver(r: &ResolverOptions) -> bool {
    r == &ResolverOptions::default()
}

/// The root of `asp-targets.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ProjectManifest {
    /// Schema version; must be `1`.
    pub schema: u32,
    /// The default harness for targets that don't override it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harness: Option<String>,
    /// Named target compositions. An `IndexMap` so `installAll`/`buildAll`
    /// can process targets in manifest-insertion order, per the ordering
    /// guarantee in the concurrency model.
    pub targets: IndexMap<String, TargetDef>,
}

impl ProjectManifest {
    /// Validate structural invariants not expressible in the type alone:
    /// every target's `compose` must be non-empty.
    pub fn validate(&self) -> Result<(), ProjectManifestError> {
        for (name, target) in &self.targets {
            if target.compose.is_empty() {
                return Err(ProjectManifestError::EmptyCompose {
                    target: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Structural validation failures for a [`ProjectManifest`].
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProjectManifestError {
    /// A target's `compose` list was empty.
    #[error("target {target:?} has an empty `compose` list")]
    EmptyCompose {
        /// The offending target's name
        target: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_project() {
        let toml = r#"
            schema = 1
            [targets.dev]
            compose = ["space:frontend@stable", "space:backend@stable"]
        "#;
        let m: ProjectManifest = toml::from_str(toml).unwrap();
        assert!(m.validate().is_ok());
        assert_eq!(m.targets["dev"].compose.len(), 2);
    }

    #[test]
    fn rejects_empty_compose() {
        let toml = r#"
            schema = 1
            [targets.dev]
            compose = []
        "#;
        let m: ProjectManifest = toml::from_str(toml).unwrap();
        assert!(m.validate().is_err());
    }
}
