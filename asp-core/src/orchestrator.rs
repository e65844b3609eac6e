//! High-level flows that tie every other component together: `install`
//! (resolve -> lock -> populate store), `build` (install-if-needed ->
//! materialize -> compose -> lint), `explain` (pure read path over a lock),
//! and `gc` (compute reachable set -> delete orphans).

use std::collections::{BTreeMap, HashMap, HashSet};

use asp_registry::{GitExecutor, Resolver};
use asp_schema::{
    CommitSha, LockFile, ProjectManifest, Sha256Integrity, SpaceId, SpaceKey, SpaceRef, Warning, WarningSeverity,
};
use camino::{Utf8Path, Utf8PathBuf};

use crate::config;
use crate::errors::{AspError, AspResult};
use crate::fs::{FileLock, LockOptions};
use crate::harness::HarnessRegistry;
use crate::lint;
use crate::lockgen::{self, TargetResolution};
use crate::materialize::{self, MaterializedSpace};
use crate::store::{GcResult, Store};

/// Everything an orchestrator call needs to find things on disk.
#[derive(Debug, Clone)]
pub struct Paths {
    /// The project root (where `asp-targets.toml` and `.asp.lock` live).
    pub project_root: Utf8PathBuf,
    /// `<aspHome>`, containing the store, cache, and registry working copy.
    pub asp_home: Utf8PathBuf,
    /// The registry's remote URL or local path, for `git fetch`/clone and
    /// for recording in the lock file.
    pub registry_url: String,
}

impl Paths {
    fn project_lock_path(&self) -> Utf8PathBuf {
        self.project_root.join(".asp.lock")
    }

    fn lock_file_path(&self) -> Utf8PathBuf {
        self.project_root.join("asp-lock.json")
    }
}

/// `install(options)` inputs beyond `Paths`.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Restrict to these target names; empty means "all targets".
    pub targets: Vec<String>,
    /// `git fetch` the registry working copy before resolving.
    pub fetch_registry: bool,
    /// Per-space commit pins, bypassing selector resolution (for
    /// `upgradeSpaceIds`-style selective upgrades).
    pub pinned_spaces: HashMap<SpaceId, CommitSha>,
}

/// `install`'s return value.
#[derive(Debug, Clone)]
pub struct InstallResult {
    /// The merged, freshly written lock file.
    pub lock: LockFile,
    /// How many snapshots were newly created by this call.
    pub snapshots_created: u64,
    /// Which target names were resolved by this call.
    pub resolved_targets: Vec<String>,
    /// Where the lock file was written.
    pub lock_path: Utf8PathBuf,
}

fn selected_targets<'a>(manifest: &'a ProjectManifest, requested: &[String]) -> AspResult<Vec<(&'a str, &'a asp_schema::TargetDef)>> {
    if requested.is_empty() {
        return Ok(manifest.targets.iter().map(|(name, def)| (name.as_str(), def)).collect());
    }
    requested
        .iter()
        .map(|name| {
            manifest
                .targets
                .get_key_value(name.as_str())
                .map(|(k, v)| (k.as_str(), v))
                .ok_or_else(|| AspError::UnknownTarget { name: name.clone() })
        })
        .collect()
}

/// Resolve every requested target's closure, generate and merge a lock
/// file, populate the store with missing snapshots, and atomically write
/// the lock. See the module-level flow summary.
pub fn install(paths: &Paths, opts: &InstallOptions) -> AspResult<InstallResult> {
    let _project_lock = FileLock::acquire(&paths.project_lock_path(), LockOptions::default())?;

    let store = Store::new(paths.asp_home.clone());
    store.ensure_dirs()?;

    let repo_dir = store.repo_dir();
    let git = if repo_dir.join(".git").is_dir() {
        GitExecutor::new(repo_dir).with_git_bin("git")
    } else if paths.registry_url.is_empty() {
        GitExecutor::init(&repo_dir, "git").map_err(asp_registry::RegistryError::from)?
    } else {
        GitExecutor::clone(&paths.registry_url, &repo_dir, "git").map_err(asp_registry::RegistryError::from)?
    };
    if opts.fetch_registry {
        git.fetch(None).map_err(asp_registry::RegistryError::from)?;
    }

    let manifest = config::load_project_manifest(&paths.project_root)?;
    let targets = selected_targets(&manifest, &opts.targets)?;

    let resolver = Resolver::new(git.clone(), paths.project_root.clone());
    let mut closures = Vec::with_capacity(targets.len());
    for (name, def) in &targets {
        let closure = resolver.resolve_closure(&def.compose, &opts.pinned_spaces)?;
        closures.push((*name, *def, closure));
    }

    let target_resolutions: Vec<TargetResolution<'_>> = closures
        .iter()
        .map(|(name, def, closure)| TargetResolution {
            name: (*name).to_string(),
            compose: def.compose.clone(),
            closure,
            harness_id: def.harness.as_deref().or(manifest.harness.as_deref()),
        })
        .collect();

    let generated_lock = lockgen::build_lock_file(&git, &paths.registry_url, now_iso8601(), &target_resolutions)?;

    let lock_path = paths.lock_file_path();
    let merged_lock = match read_existing_lock(&lock_path)? {
        Some(existing) => lockgen::merge_lock_files(existing, generated_lock),
        None => generated_lock,
    };

    let mut snapshots_created = 0u64;
    for entry in merged_lock.spaces.values() {
        if entry.commit.is_dev() {
            continue;
        }
        let dest = store.snapshot_path(&entry.integrity);
        let already_present = dest.is_dir();
        store.create_snapshot(&git, &entry.id, &entry.commit, &entry.path)?;
        if !already_present {
            snapshots_created += 1;
        }
    }

    crate::fs::write_atomic(&lock_path, &serde_json::to_vec_pretty(&merged_lock)?)?;

    Ok(InstallResult {
        lock: merged_lock,
        snapshots_created,
        resolved_targets: targets.iter().map(|(name, _)| name.to_string()).collect(),
        lock_path,
    })
}

/// True iff the lock is absent, or any target in scope is missing or its
/// `compose` no longer matches the project manifest.
pub fn install_needed(paths: &Paths, opts: &InstallOptions) -> AspResult<bool> {
    let Some(lock) = read_existing_lock(&paths.lock_file_path())? else {
        return Ok(true);
    };
    let manifest = config::load_project_manifest(&paths.project_root)?;
    let targets = selected_targets(&manifest, &opts.targets)?;
    for (name, def) in targets {
        match lock.targets.get(name) {
            Some(entry) if lockgen::target_up_to_date(entry, &def.compose) => {}
            _ => return Ok(true),
        }
    }
    Ok(false)
}

fn read_existing_lock(path: &Utf8Path) -> AspResult<Option<LockFile>> {
    if !path.is_file() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path.as_std_path())?;
    let lock: LockFile = serde_json::from_str(&raw).map_err(|source| AspError::ConfigParseJson { path: path.to_owned(), source })?;
    Ok(Some(lock))
}

fn now_iso8601() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .expect("Rfc3339 formatting cannot fail for now_utc()")
}

/// `build(target, options)` inputs beyond `Paths`.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Where materialized plugin directories are written.
    pub output_dir: Utf8PathBuf,
    /// Remove `output_dir`'s prior contents before materializing.
    pub clean: bool,
    /// Run `install` first if the lock is missing or stale for this target.
    pub auto_install: bool,
    /// Run the linter and include its findings in the result.
    pub run_lint: bool,
    /// The harness id to materialize for; falls back to the target's /
    /// project's configured harness, then `claude`.
    pub harness: Option<String>,
    /// Passed through to `install` if `auto_install` triggers one.
    pub install: InstallOptions,
}

/// `build`'s return value.
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Every materialized plugin directory, in the target's load order.
    pub plugin_dirs: Vec<Utf8PathBuf>,
    /// Where the composed MCP config was written, if any space had one.
    pub mcp_config_path: Option<Utf8PathBuf>,
    /// Where the composed settings were written, if any space had one.
    pub settings_path: Option<Utf8PathBuf>,
    /// Lint findings plus any orchestrator-level informational warnings
    /// (e.g. W101 when the lock was autogenerated by this call).
    pub warnings: Vec<Warning>,
    /// The lock this build materialized against.
    pub lock: LockFile,
}

/// Materialize a single target's full load order into `opts.output_dir`,
/// compose its MCP/settings, and run the linter.
pub fn build(paths: &Paths, target_name: &str, opts: &BuildOptions) -> AspResult<BuildResult> {
    let mut prelude_warnings = Vec::new();

    let lock = match read_existing_lock(&paths.lock_file_path())? {
        Some(lock) if lock.targets.contains_key(target_name) => lock,
        _ => {
            if !opts.auto_install {
                return Err(AspError::LockedTargetNeedsResolve { target: target_name.to_string() });
            }
            let result = install(paths, &opts.install)?;
            prelude_warnings.push(Warning::new(
                "W101",
                format!("lock file was autogenerated for target {target_name:?}"),
                WarningSeverity::Info,
            ));
            result.lock
        }
    };

    let target_entry = lock.targets.get(target_name).ok_or_else(|| AspError::UnknownTarget { name: target_name.to_string() })?;

    let store = Store::new(paths.asp_home.clone());
    let registry = HarnessRegistry::with_default();
    let adapter = registry
        .get(opts.harness.as_deref())
        .ok_or_else(|| AspError::Harness {
            harness_id: opts.harness.clone().unwrap_or_else(|| "claude".to_string()),
            message: "unknown harness id".to_string(),
        })?;

    if opts.clean && opts.output_dir.is_dir() {
        std::fs::remove_dir_all(opts.output_dir.as_std_path())?;
    }
    std::fs::create_dir_all(opts.output_dir.as_std_path())?;

    let mut materialized: Vec<MaterializedSpace> = Vec::with_capacity(target_entry.load_order.len());
    for key in &target_entry.load_order {
        let space_entry = lock.spaces.get(key).ok_or_else(|| AspError::IntegrityMismatch {
            what: key.to_string(),
            expected: "a space entry present in the lock".to_string(),
            actual: "missing".to_string(),
        })?;

        let source_dir = if space_entry.commit.is_dev() {
            paths.project_root.join(&space_entry.path)
        } else {
            store.snapshot_path(&space_entry.integrity)
        };

        let dest_dir = opts.output_dir.join(plugin_dir_name(key));
        let manifest = read_space_manifest_from(&source_dir)?;

        let materialized_space = materialize::materialize_space(adapter, key, &manifest, &source_dir, &dest_dir)
            .map_err(|source| AspError::Materialization { space_key: key.to_string(), source: Box::new(source) })?;
        materialized.push(materialized_space);
    }

    let refs: Vec<&MaterializedSpace> = materialized.iter().collect();
    let (mcp, _mcp_collisions) = materialize::compose_mcp(&refs);
    let settings = materialize::compose_settings(&refs);

    let mcp_config_path = if let Some(mcp) = &mcp {
        let path = opts.output_dir.join("mcp.json");
        crate::fs::write_atomic(&path, &serde_json::to_vec_pretty(mcp)?)?;
        Some(path)
    } else {
        None
    };
    let settings_path = if let Some(settings) = &settings {
        let path = opts.output_dir.join("settings.json");
        crate::fs::write_atomic(&path, &serde_json::to_vec_pretty(settings)?)?;
        Some(path)
    } else {
        None
    };

    let mut warnings = prelude_warnings;
    warnings.extend(target_entry.warnings.clone());
    if opts.run_lint {
        warnings.extend(lint::lint_target(&refs));
    }

    Ok(BuildResult {
        plugin_dirs: materialized.iter().map(|m| m.plugin_path.clone()).collect(),
        mcp_config_path,
        settings_path,
        warnings,
        lock,
    })
}

fn plugin_dir_name(key: &SpaceKey) -> String {
    key.as_str().replace([':', '@', '/'], "-")
}

fn read_space_manifest_from(source_dir: &Utf8Path) -> AspResult<asp_schema::SpaceManifest> {
    let path = source_dir.join("space.toml");
    let raw = std::fs::read_to_string(path.as_std_path())?;
    config::parse_space_manifest(&path, &raw)
}

/// One space's row in `explain`'s report.
#[derive(Debug, Clone)]
pub struct ExplainSpaceRow {
    /// The space's key.
    pub key: SpaceKey,
    /// The space's own id.
    pub id: SpaceId,
    /// The resolved commit.
    pub commit: CommitSha,
    /// The materialized plugin name.
    pub plugin_name: String,
    /// The materialized plugin version, if known.
    pub plugin_version: Option<String>,
    /// Content integrity.
    pub integrity: Sha256Integrity,
    /// Registry-relative source path.
    pub path: String,
    /// This space's own dependency keys.
    pub deps: Vec<SpaceKey>,
    /// How the commit was resolved.
    pub resolved_from: asp_schema::ResolvedFromInfo,
    /// Whether a snapshot for this integrity is currently present in the
    /// store (only populated when `check_store` is set).
    pub in_store: Option<bool>,
}

/// One target's row in `explain`'s report.
#[derive(Debug, Clone)]
pub struct ExplainTargetRow {
    /// The target's original `compose` list.
    pub compose: Vec<SpaceRef>,
    /// Root space keys.
    pub roots: Vec<SpaceKey>,
    /// Full dependency-ordered load order.
    pub load_order: Vec<SpaceKey>,
    /// This target's deterministic composition hash.
    pub env_hash: Sha256Integrity,
    /// Spaces in this target's load order, with their per-space detail.
    pub spaces: Vec<ExplainSpaceRow>,
    /// Non-fatal findings recorded for this target at lock-generation time.
    pub warnings: Vec<Warning>,
}

/// `explain(options)` inputs beyond `Paths`.
#[derive(Debug, Clone, Default)]
pub struct ExplainOptions {
    /// Restrict to these target names; empty means "all targets in the lock".
    pub targets: Vec<String>,
    /// Also check whether each space's snapshot is present in the store.
    pub check_store: bool,
}

/// Read-only report over an existing lock: never mutates state, never
/// touches the registry or project manifest.
pub fn explain(paths: &Paths, opts: &ExplainOptions) -> AspResult<BTreeMap<String, ExplainTargetRow>> {
    let lock = read_existing_lock(&paths.lock_file_path())?
        .ok_or_else(|| AspError::NoProjectManifest { path: paths.lock_file_path() })?;
    let store = Store::new(paths.asp_home.clone());

    let target_names: Vec<&str> = if opts.targets.is_empty() {
        lock.targets.keys().map(String::as_str).collect()
    } else {
        opts.targets.iter().map(String::as_str).collect()
    };

    let mut out = BTreeMap::new();
    for name in target_names {
        let target = lock.targets.get(name).ok_or_else(|| AspError::UnknownTarget { name: name.to_string() })?;
        let mut rows = Vec::with_capacity(target.load_order.len());
        for key in &target.load_order {
            let entry = lock.spaces.get(key).ok_or_else(|| AspError::IntegrityMismatch {
                what: key.to_string(),
                expected: "a space entry present in the lock".to_string(),
                actual: "missing".to_string(),
            })?;
            let in_store = opts.check_store.then(|| store.snapshot_path(&entry.integrity).is_dir());
            rows.push(ExplainSpaceRow {
                key: key.clone(),
                id: entry.id.clone(),
                commit: entry.commit.clone(),
                plugin_name: entry.plugin.name.clone(),
                plugin_version: entry.plugin.version.clone(),
                integrity: entry.integrity.clone(),
                path: entry.path.clone(),
                deps: entry.deps.spaces.clone(),
                resolved_from: entry.resolved_from.clone(),
                in_store,
            });
        }
        out.insert(
            name.to_string(),
            ExplainTargetRow {
                compose: target.compose.clone(),
                roots: target.roots.clone(),
                load_order: target.load_order.clone(),
                env_hash: target.env_hash.clone(),
                spaces: rows,
                warnings: target.warnings.clone(),
            },
        );
    }
    Ok(out)
}

/// `gc(lockFiles, options)` inputs beyond `Paths`.
#[derive(Debug, Clone, Default)]
pub struct GcOptions {
    /// Report what would be deleted without deleting it.
    pub dry_run: bool,
}

/// Compute the reachable integrity and cache-key sets across every passed
/// lock file, then delete everything in the store/cache that isn't in
/// either set. Acquires the store lock for the duration of the deletion.
pub fn gc(paths: &Paths, lock_files: &[LockFile], opts: &GcOptions) -> AspResult<GcResult> {
    let store = Store::new(paths.asp_home.clone());
    let _store_lock = FileLock::acquire(&store.lock_path(), LockOptions::default())?;

    let mut reachable_integrities: HashSet<String> = HashSet::new();
    let mut reachable_cache_keys: HashSet<String> = HashSet::new();

    for lock in lock_files {
        for entry in lock.spaces.values() {
            if entry.commit.is_dev() {
                continue;
            }
            reachable_integrities.insert(entry.integrity.hex().to_string());
        }
        for (harness_id, harness_version) in [("claude", env!("CARGO_PKG_VERSION"))] {
            for entry in lock.spaces.values() {
                reachable_cache_keys.insert(crate::store::compute_cache_key_v2(
                    harness_id,
                    harness_version,
                    &entry.integrity,
                    &entry.plugin.name,
                    entry.plugin.version.as_deref(),
                ));
                reachable_cache_keys.insert(crate::store::compute_cache_key_v1(
                    &entry.integrity,
                    &entry.plugin.name,
                    entry.plugin.version.as_deref(),
                ));
            }
        }
    }

    store.gc(&reachable_integrities, &reachable_cache_keys, opts.dry_run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use asp_registry::GitExecutor;
    use camino::Utf8Path;

    fn init_registry(asp_home: &Utf8Path) -> GitExecutor {
        let repo_dir = asp_home.join("repo");
        let exec = GitExecutor::init(&repo_dir, "git").unwrap();
        exec.set_config("user.email", "test@example.com").unwrap();
        exec.set_config("user.name", "Test").unwrap();
        exec
    }

    fn write_space(repo_dir: &Utf8Path, id: &str, toml: &str, commands: &[&str]) {
        let dir = repo_dir.join("spaces").join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("space.toml"), toml).unwrap();
        if !commands.is_empty() {
            let commands_dir = dir.join("commands");
            std::fs::create_dir_all(&commands_dir).unwrap();
            for name in commands {
                std::fs::write(commands_dir.join(name), "do the thing").unwrap();
            }
        }
    }

    fn tag_version(exec: &GitExecutor, id: &str, version: &str, commit: &str) {
        exec.tag(&format!("space/{id}/v{version}"), commit).unwrap();
    }

    /// Builds a registry with `base`, `frontend` (deps: base), `backend`
    /// (deps: base), every one tagged `stable@1.0.0`, plus a project with a
    /// single `dev` target composing `frontend` and `backend`. Mirrors the
    /// transitive-resolution scenario the resolver's own tests cover.
    fn setup(project_root: &Utf8Path, asp_home: &Utf8Path) {
        let exec = init_registry(asp_home);
        let repo_dir = asp_home.join("repo");

        write_space(&repo_dir, "base", "schema = 1\nid = \"base\"\n", &["build.md"]);
        write_space(
            &repo_dir,
            "frontend",
            "schema = 1\nid = \"frontend\"\n[deps]\nspaces = [\"space:base@stable\"]\n",
            &["build.md"],
        );
        write_space(
            &repo_dir,
            "backend",
            "schema = 1\nid = \"backend\"\n[deps]\nspaces = [\"space:base@stable\"]\n",
            &[],
        );
        exec.add(&["."]).unwrap();
        let commit = exec.commit("add spaces").unwrap();
        tag_version(&exec, "base", "1.0.0", &commit);
        tag_version(&exec, "frontend", "1.0.0", &commit);
        tag_version(&exec, "backend", "1.0.0", &commit);

        std::fs::create_dir_all(repo_dir.join("registry")).unwrap();
        std::fs::write(
            repo_dir.join("registry/dist-tags.json"),
            r#"{"base":{"stable":"1.0.0"},"frontend":{"stable":"1.0.0"},"backend":{"stable":"1.0.0"}}"#,
        )
        .unwrap();

        std::fs::write(
            project_root.join("asp-targets.toml"),
            r#"
                schema = 1
                [targets.dev]
                compose = ["space:frontend@stable", "space:backend@stable"]
            "#,
        )
        .unwrap();
    }

    fn paths(project_root: &Utf8Path, asp_home: &Utf8Path) -> Paths {
        Paths {
            project_root: project_root.to_owned(),
            asp_home: asp_home.to_owned(),
            registry_url: String::new(),
        }
    }

    #[test]
    fn install_resolves_closure_and_creates_snapshots() {
        let project_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let project_root = Utf8Path::from_path(project_dir.path()).unwrap();
        let asp_home = Utf8Path::from_path(home_dir.path()).unwrap();
        setup(project_root, asp_home);
        let paths = paths(project_root, asp_home);

        let result = install(&paths, &InstallOptions::default()).unwrap();
        assert_eq!(result.resolved_targets, vec!["dev".to_string()]);
        assert_eq!(result.snapshots_created, 3);

        let target = result.lock.targets.get("dev").unwrap();
        assert_eq!(target.load_order.len(), 3);
        let ids: Vec<&str> = target.load_order.iter().map(|k| k.as_str().split('@').next().unwrap()).collect();
        assert_eq!(ids[0], "base");
        assert!(ids[1..].contains(&"frontend"));
        assert!(ids[1..].contains(&"backend"));

        // A second install with no input change is a no-op.
        let result2 = install(&paths, &InstallOptions::default()).unwrap();
        assert_eq!(result2.snapshots_created, 0);
    }

    #[test]
    fn build_materializes_and_lints_command_collisions() {
        let project_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let project_root = Utf8Path::from_path(project_dir.path()).unwrap();
        let asp_home = Utf8Path::from_path(home_dir.path()).unwrap();
        setup(project_root, asp_home);
        let paths = paths(project_root, asp_home);

        let opts = BuildOptions {
            output_dir: project_root.join("asp_modules/dev"),
            clean: false,
            auto_install: true,
            run_lint: true,
            harness: None,
            install: InstallOptions::default(),
        };
        let result = build(&paths, "dev", &opts).unwrap();

        assert_eq!(result.plugin_dirs.len(), 3);
        for dir in &result.plugin_dirs {
            assert!(dir.join(".claude-plugin/plugin.json").is_file());
        }
        assert!(result.warnings.iter().any(|w| w.code == "W101"));
        assert!(result.warnings.iter().any(|w| w.code == "W201"));
    }

    #[test]
    fn explain_reports_lock_without_mutating_it() {
        let project_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let project_root = Utf8Path::from_path(project_dir.path()).unwrap();
        let asp_home = Utf8Path::from_path(home_dir.path()).unwrap();
        setup(project_root, asp_home);
        let paths = paths(project_root, asp_home);

        install(&paths, &InstallOptions::default()).unwrap();
        let report = explain(&paths, &ExplainOptions { targets: vec![], check_store: true }).unwrap();

        let target = report.get("dev").unwrap();
        assert_eq!(target.spaces.len(), 3);
        assert!(target.spaces.iter().all(|row| row.in_store == Some(true)));
    }

    #[test]
    fn gc_keeps_everything_reachable_from_the_passed_lock() {
        let project_dir = tempfile::tempdir().unwrap();
        let home_dir = tempfile::tempdir().unwrap();
        let project_root = Utf8Path::from_path(project_dir.path()).unwrap();
        let asp_home = Utf8Path::from_path(home_dir.path()).unwrap();
        setup(project_root, asp_home);
        let paths = paths(project_root, asp_home);

        let install_result = install(&paths, &InstallOptions::default()).unwrap();
        let result = gc(&paths, &[install_result.lock], &GcOptions { dry_run: false }).unwrap();
        assert_eq!(result.snapshots_deleted, 0);
    }
}
