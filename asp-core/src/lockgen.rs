//! Building `asp-lock.json` from resolved closures: integrity computation,
//! plugin-name-collision warnings, and the merge policy used to preserve
//! unrelated targets across a partial `install`.

use std::collections::BTreeMap;

use asp_registry::{ClosureResult, GitExecutor};
use asp_schema::{
    CommitSha, LockDeps, LockFile, LockPluginInfo, LockSpaceEntry, LockTargetEntry, RegistryInfo, Sha256Integrity,
    SpaceKey, SpaceRef, Warning, WarningSeverity, LOCKFILE_VERSION, RESOLVER_VERSION,
};

use crate::errors::AspResult;
use crate::integrity::{compute_env_hash, compute_git_integrity, EnvEntry};

/// One target's resolved input to lock generation.
pub struct TargetResolution<'a> {
    /// The target's name.
    pub name: String,
    /// The target's original `compose` list, for round-tripping and the
    /// `up_to_date` check.
    pub compose: Vec<SpaceRef>,
    /// The target's resolved closure.
    pub closure: &'a ClosureResult,
    /// The harness this target materializes for, if not the default.
    pub harness_id: Option<&'a str>,
}

fn plugin_name_for(resolved: &asp_registry::ResolvedSpace) -> String {
    resolved.manifest.plugin_name()
}

/// Build a fresh lock file from a set of resolved targets. Integrity is
/// computed once per unique space across all targets.
pub fn build_lock_file(
    git: &GitExecutor,
    registry_url: &str,
    generated_at: String,
    targets: &[TargetResolution<'_>],
) -> AspResult<LockFile> {
    let mut spaces: BTreeMap<SpaceKey, LockSpaceEntry> = BTreeMap::new();
    let mut integrities: BTreeMap<SpaceKey, Sha256Integrity> = BTreeMap::new();
    let mut lock_targets: BTreeMap<String, LockTargetEntry> = BTreeMap::new();

    for target in targets {
        for (key, resolved) in &target.closure.spaces {
            if spaces.contains_key(key) {
                continue;
            }
            let integrity = space_integrity(git, &resolved.commit, &resolved.path)?;
            integrities.insert(key.clone(), integrity.clone());
            spaces.insert(
                key.clone(),
                LockSpaceEntry {
                    id: resolved.id.clone(),
                    commit: resolved.commit.clone(),
                    path: resolved.path.clone(),
                    integrity,
                    plugin: LockPluginInfo {
                        name: plugin_name_for(resolved),
                        version: resolved.manifest.plugin_version(),
                    },
                    deps: LockDeps { spaces: resolved.deps.clone() },
                    resolved_from: resolved.resolved_from.clone(),
                },
            );
        }
    }

    for target in targets {
        let mut env_entries = Vec::with_capacity(target.closure.load_order.len());
        let mut plugin_names: Vec<(&SpaceKey, String)> = Vec::with_capacity(target.closure.load_order.len());
        for key in &target.closure.load_order {
            let entry = &spaces[key];
            plugin_names.push((key, entry.plugin.name.clone()));
        }
        for (key, name) in &plugin_names {
            env_entries.push(EnvEntry { key, integrity: &integrities[*key], plugin_name: name });
        }
        let env_hash = compute_env_hash(&env_entries, target.harness_id);

        let warnings = plugin_name_collisions(&plugin_names);

        lock_targets.insert(
            target.name.clone(),
            LockTargetEntry {
                compose: target.compose.clone(),
                roots: target.closure.roots.clone(),
                load_order: target.closure.load_order.clone(),
                env_hash,
                warnings,
            },
        );
    }

    let lock = LockFile {
        lockfile_version: LOCKFILE_VERSION,
        resolver_version: RESOLVER_VERSION,
        generated_at,
        registry: RegistryInfo { kind: "git".to_string(), url: registry_url.to_string() },
        spaces,
        targets: lock_targets,
    };
    lock.validate()?;
    Ok(lock)
}

fn space_integrity(git: &GitExecutor, commit: &CommitSha, path: &str) -> AspResult<Sha256Integrity> {
    if commit.is_dev() {
        return Ok(Sha256Integrity::dev());
    }
    Ok(compute_git_integrity(git, commit.as_str(), path)?)
}

/// W205: group a target's load order by derived plugin name; any group of
/// size >1 is a collision.
fn plugin_name_collisions(entries: &[(&SpaceKey, String)]) -> Vec<Warning> {
    let mut by_name: BTreeMap<&str, Vec<&SpaceKey>> = BTreeMap::new();
    for (key, name) in entries {
        by_name.entry(name.as_str()).or_default().push(key);
    }
    by_name
        .into_iter()
        .filter(|(_, keys)| keys.len() > 1)
        .map(|(name, keys)| {
            let ids = keys.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ");
            Warning::new(
                "W205",
                format!("plugin name {name:?} is shared by multiple spaces: {ids}"),
                WarningSeverity::Warning,
            )
        })
        .collect()
}

/// `mergeLockFiles(existing, updates)`: shallow-merges both `spaces` and
/// `targets` maps, with `updates` winning on key collision; `generatedAt` is
/// refreshed to `updates`'s.
pub fn merge_lock_files(mut existing: LockFile, updates: LockFile) -> LockFile {
    existing.generated_at = updates.generated_at;
    existing.spaces.extend(updates.spaces);
    existing.targets.extend(updates.targets);
    existing
}

/// `up-to-date(target, compose)`: the existing lock target's `compose`
/// deep-equals the requested `compose`, order-sensitive.
pub fn target_up_to_date(target: &LockTargetEntry, compose: &[SpaceRef]) -> bool {
    target.compose == compose
}

#[cfg(test)]
mod tests {
    use super::*;
    use asp_schema::SpaceId;

    #[test]
    fn plugin_name_collisions_flags_only_shared_names() {
        let id_a = SpaceId::parse("a").unwrap();
        let id_b = SpaceId::parse("b").unwrap();
        let commit = CommitSha::parse("a".repeat(40)).unwrap();
        let key_a = SpaceKey::new(&id_a, &commit);
        let key_b = SpaceKey::new(&id_b, &commit);

        let warnings = plugin_name_collisions(&[(&key_a, "shared".to_string()), (&key_b, "shared".to_string())]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "W205");
        assert!(warnings[0].message.contains("shared"));

        let none = plugin_name_collisions(&[(&key_a, "a".to_string()), (&key_b, "b".to_string())]);
        assert!(none.is_empty());
    }

    #[test]
    fn merge_keeps_unrelated_targets_and_refreshes_timestamp() {
        let git_info = RegistryInfo { kind: "git".to_string(), url: "file:///tmp/repo".to_string() };
        let base = LockFile {
            lockfile_version: LOCKFILE_VERSION,
            resolver_version: RESOLVER_VERSION,
            generated_at: "2026-01-01T00:00:00Z".into(),
            registry: git_info.clone(),
            spaces: BTreeMap::new(),
            targets: {
                let mut m = BTreeMap::new();
                m.insert(
                    "staging".to_string(),
                    LockTargetEntry {
                        compose: vec![],
                        roots: vec![],
                        load_order: vec![],
                        env_hash: Sha256Integrity::from_digest([0; 32]),
                        warnings: vec![],
                    },
                );
                m
            },
        };
        let update = LockFile {
            lockfile_version: LOCKFILE_VERSION,
            resolver_version: RESOLVER_VERSION,
            generated_at: "2026-02-01T00:00:00Z".into(),
            registry: git_info,
            spaces: BTreeMap::new(),
            targets: {
                let mut m = BTreeMap::new();
                m.insert(
                    "dev".to_string(),
                    LockTargetEntry {
                        compose: vec![],
                        roots: vec![],
                        load_order: vec![],
                        env_hash: Sha256Integrity::from_digest([1; 32]),
                        warnings: vec![],
                    },
                );
                m
            },
        };
        let merged = merge_lock_files(base, update);
        assert_eq!(merged.generated_at, "2026-02-01T00:00:00Z");
        assert!(merged.targets.contains_key("staging"));
        assert!(merged.targets.contains_key("dev"));
    }
}
