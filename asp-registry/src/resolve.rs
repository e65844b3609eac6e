//! Selector resolution and dependency-closure computation.
//!
//! This is C5 from the design: given a target's `compose` list, resolve
//! each ref's selector to a commit against the registry (or the project
//! filesystem, for `dev` refs), then walk `deps.spaces` to build the full
//! transitive closure and a dependency-first load order.

use std::collections::{BTreeMap, HashMap};

use asp_schema::{CommitSha, ResolvedFromInfo, Selector, SpaceId, SpaceKey, SpaceManifest, SpaceRef};
use camino::Utf8PathBuf;
use semver::{Version, VersionReq};

use crate::errors::{CyclicDependencyError, MissingDependencyError, RegistryError, Result, SelectorResolutionError};
use crate::git::GitExecutor;

/// One fully-resolved space, as computed during closure walking.
#[derive(Debug, Clone)]
pub struct ResolvedSpace {
    /// This space's map key.
    pub key: SpaceKey,
    /// The space's own id.
    pub id: SpaceId,
    /// The resolved commit (or the `dev` sentinel).
    pub commit: CommitSha,
    /// The path within the registry this space lives at, e.g. `spaces/base`.
    pub path: String,
    /// The space's manifest, as read at the resolved commit.
    pub manifest: SpaceManifest,
    /// This space's own dependency keys, in declaration order.
    pub deps: Vec<SpaceKey>,
    /// How this space's commit was resolved.
    pub resolved_from: ResolvedFromInfo,
}

/// The result of walking a target's `compose` list to its full transitive
/// closure.
#[derive(Debug, Clone, Default)]
pub struct ClosureResult {
    /// Every space reached, keyed by [`SpaceKey`].
    pub spaces: BTreeMap<SpaceKey, ResolvedSpace>,
    /// The keys directly named by `compose`, in `compose` order.
    pub roots: Vec<SpaceKey>,
    /// Dependency-first load order: every dependency strictly precedes its
    /// dependents; siblings appear in source-declaration order.
    pub load_order: Vec<SpaceKey>,
}

/// Resolves refs against a git-backed registry, with an escape hatch for
/// `dev` spaces living on the project's own filesystem.
pub struct Resolver {
    git: GitExecutor,
    project_root: Utf8PathBuf,
}

impl Resolver {
    /// Build a resolver rooted at a registry working copy and a project
    /// directory (consulted for `dev` refs).
    pub fn new(git: GitExecutor, project_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            git,
            project_root: project_root.into(),
        }
    }

    /// The underlying git executor, for callers that also need raw git ops.
    pub fn git(&self) -> &GitExecutor {
        &self.git
    }

    /// Resolve a single selector to a commit, without touching dependencies.
    pub fn resolve_selector(&self, id: &SpaceId, selector: &Selector) -> Result<(CommitSha, ResolvedFromInfo)> {
        match selector {
            Selector::Dev => {
                let dev_path = self.project_root.join("spaces").join(id.as_str());
                if !dev_path.is_dir() {
                    return Err(SelectorResolutionError::MissingDevSpace {
                        space_id: id.clone(),
                        path: dev_path.to_string(),
                    }
                    .into());
                }
                Ok((
                    CommitSha::dev(),
                    ResolvedFromInfo {
                        selector: selector.to_string(),
                        tag: None,
                        semver: None,
                    },
                ))
            }
            Selector::GitPin { sha } => {
                if sha.len() < 12 {
                    return Err(SelectorResolutionError::ShortGitPin {
                        space_id: id.clone(),
                        sha: sha.clone(),
                    }
                    .into());
                }
                let commit = self
                    .git
                    .resolve_rev(sha)
                    .map_err(RegistryError::from)?
                    .ok_or_else(|| SelectorResolutionError::UnknownVersion {
                        space_id: id.clone(),
                        version: sha.clone(),
                    })?;
                Ok((
                    CommitSha::parse(commit).map_err(RegistryError::from)?,
                    ResolvedFromInfo {
                        selector: selector.to_string(),
                        tag: None,
                        semver: None,
                    },
                ))
            }
            Selector::Semver { range, exact: true } => {
                let (commit, matched) = self.resolve_exact_version(id, range)?;
                Ok((
                    commit,
                    ResolvedFromInfo {
                        selector: selector.to_string(),
                        tag: None,
                        semver: Some(matched),
                    },
                ))
            }
            Selector::Semver { range, exact: false } => {
                let req = VersionReq::parse(range).map_err(|_| SelectorResolutionError::NoVersionSatisfiesRange {
                    space_id: id.clone(),
                    range: range.clone(),
                })?;
                let (commit, matched) = self.resolve_highest_satisfying(id, &req)?;
                Ok((
                    commit,
                    ResolvedFromInfo {
                        selector: selector.to_string(),
                        tag: None,
                        semver: Some(matched),
                    },
                ))
            }
            Selector::DistTag { tag } => {
                let version = self.read_dist_tag(id, tag)?;
                let (commit, matched) = self.resolve_exact_version(id, &version)?;
                Ok((
                    commit,
                    ResolvedFromInfo {
                        selector: selector.to_string(),
                        tag: Some(tag.clone()),
                        semver: Some(matched),
                    },
                ))
            }
        }
    }

    fn read_dist_tag(&self, id: &SpaceId, channel: &str) -> Result<String> {
        let path = self.git.repo_root().join("registry/dist-tags.json");
        let raw = std::fs::read_to_string(&path).map_err(|_| SelectorResolutionError::UnknownDistTag {
            space_id: id.clone(),
            channel: channel.to_string(),
        })?;
        let file: asp_schema::DistTagsFile = serde_json::from_str(&raw).map_err(|_| SelectorResolutionError::UnknownDistTag {
            space_id: id.clone(),
            channel: channel.to_string(),
        })?;
        file.resolve(id.as_str(), channel)
            .map(str::to_string)
            .ok_or_else(|| {
                SelectorResolutionError::UnknownDistTag {
                    space_id: id.clone(),
                    channel: channel.to_string(),
                }
                .into()
            })
    }

    fn version_tag(id: &SpaceId, version: &str) -> String {
        format!("space/{id}/v{version}")
    }

    fn resolve_exact_version(&self, id: &SpaceId, version: &str) -> Result<(CommitSha, String)> {
        let normalized = version.strip_prefix('v').unwrap_or(version);
        let tag = Self::version_tag(id, normalized);
        let commit = self
            .git
            .resolve_rev(&tag)
            .map_err(RegistryError::from)?
            .ok_or_else(|| SelectorResolutionError::UnknownVersion {
                space_id: id.clone(),
                version: normalized.to_string(),
            })?;
        Ok((CommitSha::parse(commit).map_err(RegistryError::from)?, normalized.to_string()))
    }

    fn resolve_highest_satisfying(&self, id: &SpaceId, req: &VersionReq) -> Result<(CommitSha, String)> {
        let glob = format!("space/{id}/v*");
        let tags = self.git.list_tags(&glob).map_err(RegistryError::from)?;
        let prefix = format!("space/{id}/v");

        let mut candidates: Vec<(Version, String)> = tags
            .into_iter()
            .filter_map(|tag_ref| {
                let version_str = tag_ref.name.strip_prefix(prefix.as_str())?;
                let version = Version::parse(version_str).ok()?;
                Some((version, tag_ref.commit))
            })
            .filter(|(version, _)| req.matches(version))
            .collect();

        candidates.sort_by(|(a, _), (b, _)| a.cmp(b));
        let Some((version, commit)) = candidates.into_iter().next_back() else {
            return Err(SelectorResolutionError::NoVersionSatisfiesRange {
                space_id: id.clone(),
                range: req.to_string(),
            }
            .into());
        };
        Ok((CommitSha::parse(commit).map_err(RegistryError::from)?, version.to_string()))
    }

    /// Read a space's manifest at the given resolved commit (or from the
    /// project filesystem, for the `dev` sentinel).
    pub fn read_manifest(&self, id: &SpaceId, commit: &CommitSha) -> Result<(SpaceManifest, String)> {
        let path = format!("spaces/{id}");
        if commit.is_dev() {
            let manifest_path = self.project_root.join(&path).join("space.toml");
            let raw = std::fs::read_to_string(&manifest_path).map_err(|_| SelectorResolutionError::MissingDevSpace {
                space_id: id.clone(),
                path: manifest_path.to_string(),
            })?;
            let manifest = toml::from_str(&raw).map_err(|source| RegistryError::ManifestParse {
                space_id: id.clone(),
                commit: commit.to_string(),
                source,
            })?;
            return Ok((manifest, path));
        }

        let manifest_path = format!("{path}/space.toml");
        let bytes = self.git.read_blob(commit.as_str(), &manifest_path).map_err(RegistryError::from)?;
        let raw = String::from_utf8_lossy(&bytes);
        let manifest = toml::from_str(&raw).map_err(|source| RegistryError::ManifestParse {
            space_id: id.clone(),
            commit: commit.to_string(),
            source,
        })?;
        Ok((manifest, path))
    }

    /// Walk a target's `compose` list to its full transitive closure,
    /// computing a dependency-first load order.
    ///
    /// `pinned` overrides selector resolution for any space id it contains
    /// (used for `upgradeSpaceIds`-style selective upgrades): resolution is
    /// bypassed and the pinned commit is used directly, though the manifest
    /// is still read at that commit.
    pub fn resolve_closure(&self, compose: &[SpaceRef], pinned: &HashMap<SpaceId, CommitSha>) -> Result<ClosureResult> {
        let mut result = ClosureResult::default();
        let mut stack: Vec<SpaceKey> = Vec::new();

        for root_ref in compose {
            let key = self.visit(None, &root_ref.id, &root_ref.selector, pinned, &mut result, &mut stack)?;
            if !result.roots.contains(&key) {
                result.roots.push(key);
            }
        }

        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        dependent: Option<&SpaceId>,
        id: &SpaceId,
        selector: &Selector,
        pinned: &HashMap<SpaceId, CommitSha>,
        result: &mut ClosureResult,
        stack: &mut Vec<SpaceKey>,
    ) -> Result<SpaceKey> {
        let ref_string = format!("space:{id}@{selector}");

        let (commit, resolved_from) = if let Some(pin) = pinned.get(id) {
            (
                pin.clone(),
                ResolvedFromInfo {
                    selector: selector.to_string(),
                    tag: None,
                    semver: None,
                },
            )
        } else {
            self.resolve_selector(id, selector).map_err(|err| {
                if let Some(dependent) = dependent {
                    RegistryError::from(MissingDependencyError {
                        dependent: dependent.clone(),
                        dependency_ref: ref_string.clone(),
                    })
                } else {
                    err
                }
            })?
        };

        let key = SpaceKey::new(id, &commit);

        if stack.contains(&key) {
            let mut cycle: Vec<String> = stack
                .iter()
                .skip_while(|k| **k != key)
                .map(|k| k.to_string())
                .collect();
            cycle.push(key.to_string());
            return Err(CyclicDependencyError { cycle }.into());
        }
        if result.spaces.contains_key(&key) {
            return Ok(key);
        }

        stack.push(key.clone());
        let manifest_result = self.read_manifest(id, &commit).map_err(|err| {
            if let Some(dependent) = dependent {
                RegistryError::from(MissingDependencyError {
                    dependent: dependent.clone(),
                    dependency_ref: ref_string.clone(),
                })
            } else {
                err
            }
        });
        let (manifest, path) = match manifest_result {
            Ok(v) => v,
            Err(e) => {
                stack.pop();
                return Err(e);
            }
        };

        let mut dep_keys = Vec::new();
        for dep_ref in &manifest.deps.spaces {
            match self.visit(Some(id), &dep_ref.id, &dep_ref.selector, pinned, result, stack) {
                Ok(dep_key) => dep_keys.push(dep_key),
                Err(e) => {
                    stack.pop();
                    return Err(e);
                }
            }
        }
        stack.pop();

        result.spaces.insert(
            key.clone(),
            ResolvedSpace {
                key: key.clone(),
                id: id.clone(),
                commit,
                path,
                manifest,
                deps: dep_keys,
                resolved_from,
            },
        );
        result.load_order.push(key.clone());

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8Path;

    fn init_repo(dir: &Utf8Path) -> GitExecutor {
        let exec = GitExecutor::init(dir, "git").unwrap();
        exec.set_config("user.email", "test@example.com").unwrap();
        exec.set_config("user.name", "Test").unwrap();
        exec
    }

    fn write_space(root: &Utf8Path, id: &str, toml: &str) {
        let dir = root.join("spaces").join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("space.toml"), toml).unwrap();
    }

    fn tag_version(exec: &GitExecutor, id: &str, version: &str, commit: &str) {
        exec.tag(&format!("space/{id}/v{version}"), commit).unwrap();
    }

    #[test]
    fn resolves_transitive_closure_with_shared_dependency() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let exec = init_repo(root);

        write_space(root, "base", "schema = 1\nid = \"base\"\n");
        write_space(
            root,
            "frontend",
            "schema = 1\nid = \"frontend\"\n[deps]\nspaces = [\"space:base@stable\"]\n",
        );
        write_space(
            root,
            "backend",
            "schema = 1\nid = \"backend\"\n[deps]\nspaces = [\"space:base@stable\"]\n",
        );
        exec.add(&["."]).unwrap();
        let commit = exec.commit("add spaces").unwrap();
        tag_version(&exec, "base", "1.0.0", &commit);
        tag_version(&exec, "frontend", "1.0.0", &commit);
        tag_version(&exec, "backend", "1.0.0", &commit);

        std::fs::create_dir_all(root.join("registry")).unwrap();
        std::fs::write(
            root.join("registry/dist-tags.json"),
            r#"{"base":{"stable":"1.0.0"},"frontend":{"stable":"1.0.0"},"backend":{"stable":"1.0.0"}}"#,
        )
        .unwrap();

        let resolver = Resolver::new(exec, root.to_owned());
        let compose = vec![
            SpaceRef::parse("space:frontend@stable").unwrap(),
            SpaceRef::parse("space:backend@stable").unwrap(),
        ];
        let closure = resolver.resolve_closure(&compose, &HashMap::new()).unwrap();

        assert_eq!(closure.roots.len(), 2);
        assert_eq!(closure.load_order.len(), 3);

        let base_pos = closure.load_order.iter().position(|k| k.as_str().starts_with("base@")).unwrap();
        let frontend_pos = closure.load_order.iter().position(|k| k.as_str().starts_with("frontend@")).unwrap();
        let backend_pos = closure.load_order.iter().position(|k| k.as_str().starts_with("backend@")).unwrap();
        assert!(base_pos < frontend_pos);
        assert!(base_pos < backend_pos);
    }

    #[test]
    fn detects_cycles() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let exec = init_repo(root);

        write_space(
            root,
            "a",
            "schema = 1\nid = \"a\"\n[deps]\nspaces = [\"space:b@stable\"]\n",
        );
        write_space(
            root,
            "b",
            "schema = 1\nid = \"b\"\n[deps]\nspaces = [\"space:a@stable\"]\n",
        );
        exec.add(&["."]).unwrap();
        let commit = exec.commit("add spaces").unwrap();
        tag_version(&exec, "a", "1.0.0", &commit);
        tag_version(&exec, "b", "1.0.0", &commit);

        std::fs::create_dir_all(root.join("registry")).unwrap();
        std::fs::write(
            root.join("registry/dist-tags.json"),
            r#"{"a":{"stable":"1.0.0"},"b":{"stable":"1.0.0"}}"#,
        )
        .unwrap();

        let resolver = Resolver::new(exec, root.to_owned());
        let compose = vec![SpaceRef::parse("space:a@stable").unwrap()];
        let err = resolver.resolve_closure(&compose, &HashMap::new()).unwrap_err();
        assert!(matches!(err, RegistryError::CyclicDependency(_)));
    }

    #[test]
    fn missing_dependency_is_reported_against_dependent() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let exec = init_repo(root);

        write_space(
            root,
            "frontend",
            "schema = 1\nid = \"frontend\"\n[deps]\nspaces = [\"space:missing@stable\"]\n",
        );
        exec.add(&["."]).unwrap();
        let commit = exec.commit("add space").unwrap();
        tag_version(&exec, "frontend", "1.0.0", &commit);

        std::fs::create_dir_all(root.join("registry")).unwrap();
        std::fs::write(
            root.join("registry/dist-tags.json"),
            r#"{"frontend":{"stable":"1.0.0"}}"#,
        )
        .unwrap();

        let resolver = Resolver::new(exec, root.to_owned());
        let compose = vec![SpaceRef::parse("space:frontend@stable").unwrap()];
        let err = resolver.resolve_closure(&compose, &HashMap::new()).unwrap_err();
        assert!(matches!(err, RegistryError::MissingDependency(_)));
    }

    #[test]
    fn dev_selector_resolves_from_project_filesystem() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let exec = init_repo(root);
        exec.add(&["."]).ok();

        write_space(root, "scratch", "schema = 1\nid = \"scratch\"\n");

        let resolver = Resolver::new(exec, root.to_owned());
        let (commit, resolved_from) = resolver
            .resolve_selector(&SpaceId::parse("scratch").unwrap(), &Selector::Dev)
            .unwrap();
        assert!(commit.is_dev());
        assert_eq!(resolved_from.selector, "dev");
    }
}
