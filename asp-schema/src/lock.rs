//! `asp-lock.json`: the reproducible, diff-friendly lock representation.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{CommitSha, Sha256Integrity, SpaceId, SpaceKey};
use crate::selector::{Selector, SpaceRef};

/// The lock-file schema version this crate writes and understands.
pub const LOCKFILE_VERSION: u32 = 1;
/// The resolver algorithm version that produced this lock file. Bumped when
/// closure/load-order semantics change in a way that could reorder an
/// otherwise-identical lock file.
pub const RESOLVER_VERSION: u32 = 1;

/// `registry { type: "git", url }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct RegistryInfo {
    /// Always `"git"` today; reserved for future registry backends.
    #[serde(rename = "type")]
    pub kind: String,
    /// The registry's URL or local path.
    pub url: String,
}

/// The `plugin{name, version?}` sub-table of a lock entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LockPluginInfo {
    /// The materialized plugin's kebab-case name.
    pub name: String,
    /// The materialized plugin's version, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Where a space's resolved commit came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ResolvedFromInfo {
    /// The selector that was resolved, re-serialized for readability.
    pub selector: String,
    /// The dist-tag channel consulted, if the selector was a dist-tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// The semver string matched, if the selector was semver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semver: Option<String>,
}

/// A single resolved space entry in the lock file, keyed by [`SpaceKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LockSpaceEntry {
    /// The space's own id.
    pub id: SpaceId,
    /// The resolved commit (or the `dev` sentinel).
    pub commit: CommitSha,
    /// The path within the registry this space lives at, e.g. `spaces/base`.
    pub path: String,
    /// The space's content integrity.
    pub integrity: Sha256Integrity,
    /// The materialized plugin identity.
    pub plugin: LockPluginInfo,
    /// This space's own transitive dependencies, by key.
    pub deps: LockDeps,
    /// How this entry's commit was resolved.
    pub resolved_from: ResolvedFromInfo,
}

/// `deps { spaces: SpaceKey[] }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LockDeps {
    /// Dependency keys, in declaration order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spaces: Vec<SpaceKey>,
}

/// Severity of a non-fatal finding surfaced in a lock/build result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WarningSeverity {
    /// Informational; no action needed.
    Info,
    /// Something a user should probably look at.
    Warning,
}

/// A warning surfaced by the lock generator or linter. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Warning {
    /// Short machine-readable code, e.g. `W205`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Severity; always `warning` or `info`.
    pub severity: WarningSeverity,
    /// The space this warning concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space_key: Option<SpaceKey>,
    /// A path this warning concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Structured extra details, for programmatic consumers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Warning {
    /// Build a new warning with the given code/message/severity, no extras.
    pub fn new(code: impl Into<String>, message: impl Into<String>, severity: WarningSeverity) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity,
            space_key: None,
            path: None,
            details: None,
        }
    }

    /// Attach a space key to this warning.
    pub fn with_space(mut self, key: SpaceKey) -> Self {
        self.space_key = Some(key);
        self
    }

    /// Attach a path to this warning.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// A single target's resolved composition, as recorded in the lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LockTargetEntry {
    /// The refs originally listed in the target's `compose`.
    pub compose: Vec<SpaceRef>,
    /// The root space keys directly named by `compose`.
    pub roots: Vec<SpaceKey>,
    /// Full dependency-ordered load order (deps strictly precede dependents).
    pub load_order: Vec<SpaceKey>,
    /// The deterministic hash of this target's resolved composition.
    pub env_hash: Sha256Integrity,
    /// Non-fatal findings surfaced while building this target's lock entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

/// The root of `asp-lock.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LockFile {
    /// The lock-file schema version.
    pub lockfile_version: u32,
    /// The resolver algorithm version that produced this lock file.
    pub resolver_version: u32,
    /// ISO-8601 timestamp of generation.
    pub generated_at: String,
    /// The registry this lock file was resolved against.
    pub registry: RegistryInfo,
    /// All resolved spaces across all targets, keyed by [`SpaceKey`].
    pub spaces: BTreeMap<SpaceKey, LockSpaceEntry>,
    /// All targets' resolved compositions, keyed by target name.
    pub targets: BTreeMap<String, LockTargetEntry>,
}

impl LockFile {
    /// Validate the cross-referential invariants from the data model:
    /// every key referenced by a target's `loadOrder`/`roots` or by a space's
    /// `deps.spaces` must exist in `spaces`; `roots` must be a subset of
    /// `loadOrder`; and every space's deps must precede it in `loadOrder`.
    pub fn validate(&self) -> Result<(), LockValidationError> {
        for (target_name, target) in &self.targets {
            let mut position = BTreeMap::new();
            for (idx, key) in target.load_order.iter().enumerate() {
                if !self.spaces.contains_key(key) {
                    return Err(LockValidationError::DanglingKey {
                        target: target_name.clone(),
                        key: key.clone(),
                    });
                }
                position.insert(key.clone(), idx);
            }
            for root in &target.roots {
                if !position.contains_key(root) {
                    return Err(LockValidationError::RootNotInLoadOrder {
                        target: target_name.clone(),
                        key: root.clone(),
                    });
                }
            }
            for key in &target.load_order {
                let Some(entry) = self.spaces.get(key) else {
                    continue;
                };
                let Some(&idx) = position.get(key) else {
                    continue;
                };
                for dep in &entry.deps.spaces {
                    match position.get(dep) {
                        Some(&dep_idx) if dep_idx < idx => {}
                        _ => {
                            return Err(LockValidationError::DepNotBeforeDependent {
                                target: target_name.clone(),
                                space: key.clone(),
                                dep: dep.clone(),
                            })
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Validation failures for [`LockFile::validate`]. A lock whose `loadOrder`
/// references a space missing from `spaces` is rejected (E031).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LockValidationError {
    /// `loadOrder` or `deps.spaces` named a key absent from `spaces`.
    #[error("target {target:?} references unknown space {key} (E031)")]
    DanglingKey {
        /// The offending target
        target: String,
        /// The dangling key
        key: SpaceKey,
    },
    /// A root was not present in its own target's `loadOrder`.
    #[error("target {target:?} root {key} is missing from its own loadOrder")]
    RootNotInLoadOrder {
        /// The offending target
        target: String,
        /// The missing root
        key: SpaceKey,
    },
    /// A space's dependency did not precede it in `loadOrder`.
    #[error("target {target:?}: {space} depends on {dep} but {dep} does not precede it in loadOrder")]
    DepNotBeforeDependent {
        /// The offending target
        target: String,
        /// The dependent space
        space: SpaceKey,
        /// The dependency that should have preceded it
        dep: SpaceKey,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, deps: Vec<&str>) -> LockSpaceEntry {
        LockSpaceEntry {
            id: SpaceId::parse(id).unwrap(),
            commit: CommitSha::parse("a".repeat(40)).unwrap(),
            path: format!("spaces/{id}"),
            integrity: Sha256Integrity::from_digest([0; 32]),
            plugin: LockPluginInfo { name: id.to_string(), version: None },
            deps: LockDeps {
                spaces: deps.into_iter().map(|d| SpaceKey::new(&SpaceId::parse(d).unwrap(), &CommitSha::parse("a".repeat(40)).unwrap())).collect(),
            },
            resolved_from: ResolvedFromInfo { selector: "stable".into(), tag: Some("stable".into()), semver: None },
        }
    }

    fn key(id: &str) -> SpaceKey {
        SpaceKey::new(&SpaceId::parse(id).unwrap(), &CommitSha::parse("a".repeat(40)).unwrap())
    }

    #[test]
    fn validates_well_formed_lock() {
        let mut spaces = BTreeMap::new();
        spaces.insert(key("base"), entry("base", vec![]));
        spaces.insert(key("frontend"), entry("frontend", vec!["base"]));

        let mut targets = BTreeMap::new();
        targets.insert(
            "dev".to_string(),
            LockTargetEntry {
                compose: vec![],
                roots: vec![key("frontend")],
                load_order: vec![key("base"), key("frontend")],
                env_hash: Sha256Integrity::from_digest([1; 32]),
                warnings: vec![],
            },
        );

        let lock = LockFile {
            lockfile_version: LOCKFILE_VERSION,
            resolver_version: RESOLVER_VERSION,
            generated_at: "2026-01-01T00:00:00Z".into(),
            registry: RegistryInfo { kind: "git".into(), url: "file:///tmp/repo".into() },
            spaces,
            targets,
        };
        assert!(lock.validate().is_ok());
    }

    #[test]
    fn rejects_dangling_load_order_key() {
        let spaces = BTreeMap::new();
        let mut targets = BTreeMap::new();
        targets.insert(
            "dev".to_string(),
            LockTargetEntry {
                compose: vec![],
                roots: vec![key("base")],
                load_order: vec![key("base")],
                env_hash: Sha256Integrity::from_digest([1; 32]),
                warnings: vec![],
            },
        );
        let lock = LockFile {
            lockfile_version: LOCKFILE_VERSION,
            resolver_version: RESOLVER_VERSION,
            generated_at: "2026-01-01T00:00:00Z".into(),
            registry: RegistryInfo { kind: "git".into(), url: "file:///tmp/repo".into() },
            spaces,
            targets,
        };
        assert!(matches!(lock.validate(), Err(LockValidationError::DanglingKey { .. })));
    }

    #[test]
    fn rejects_dep_after_dependent() {
        let mut spaces = BTreeMap::new();
        spaces.insert(key("base"), entry("base", vec![]));
        spaces.insert(key("frontend"), entry("frontend", vec!["base"]));
        let mut targets = BTreeMap::new();
        targets.insert(
            "dev".to_string(),
            LockTargetEntry {
                compose: vec![],
                roots: vec![key("frontend")],
                // out of order: base should precede frontend
                load_order: vec![key("frontend"), key("base")],
                env_hash: Sha256Integrity::from_digest([1; 32]),
                warnings: vec![],
            },
        );
        let lock = LockFile {
            lockfile_version: LOCKFILE_VERSION,
            resolver_version: RESOLVER_VERSION,
            generated_at: "2026-01-01T00:00:00Z".into(),
            registry: RegistryInfo { kind: "git".into(), url: "file:///tmp/repo".into() },
            spaces,
            targets,
        };
        assert!(matches!(lock.validate(), Err(LockValidationError::DepNotBeforeDependent { .. })));
    }
}
