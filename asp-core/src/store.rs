//! Content-addressed store: snapshot extraction and verification, the
//! materialized-plugin cache, and garbage collection over both.
//!
//! Layout under `<aspHome>`:
//! ```text
//! snapshots/<64-hex>/      immutable extracted tree + .asp-snapshot.json
//! cache/<64-hex>/          materialized plugin tree + .asp-cache.json
//! repo/                    registry working copy
//! tmp/                     staging for atomic moves
//! store.lock
//! ```

use std::collections::HashSet;

use asp_registry::GitExecutor;
use asp_schema::{CacheSidecar, CommitSha, Sha256Integrity, SnapshotSidecar, SpaceId, SpaceKey};
use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};

use crate::errors::{AspError, AspResult};
use crate::fs as aspfs;
use crate::integrity::{compute_filesystem_integrity, compute_git_integrity};

const CACHE_KEY_V2_PREAMBLE: &[u8] = b"materializer-v2\0";
const CACHE_KEY_V1_PREAMBLE: &[u8] = b"materializer-v1\0";

fn now_iso8601() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .expect("Rfc3339 formatting cannot fail for now_utc()")
}

/// Handle to the content-addressed store rooted at `<aspHome>`.
pub struct Store {
    asp_home: Utf8PathBuf,
}

impl Store {
    /// Open (without yet creating) the store at `asp_home`.
    pub fn new(asp_home: impl Into<Utf8PathBuf>) -> Self {
        Self { asp_home: asp_home.into() }
    }

    /// `<aspHome>`
    pub fn asp_home(&self) -> &Utf8Path {
        &self.asp_home
    }

    /// `<aspHome>/snapshots`
    pub fn snapshots_dir(&self) -> Utf8PathBuf {
        self.asp_home.join("snapshots")
    }

    /// `<aspHome>/cache`
    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.asp_home.join("cache")
    }

    /// `<aspHome>/repo`
    pub fn repo_dir(&self) -> Utf8PathBuf {
        self.asp_home.join("repo")
    }

    /// `<aspHome>/tmp`
    pub fn tmp_dir(&self) -> Utf8PathBuf {
        self.asp_home.join("tmp")
    }

    /// `<aspHome>/store.lock`
    pub fn lock_path(&self) -> Utf8PathBuf {
        self.asp_home.join("store.lock")
    }

    /// Ensure the store's directory skeleton exists.
    pub fn ensure_dirs(&self) -> AspResult<()> {
        for dir in [self.snapshots_dir(), self.cache_dir(), self.repo_dir(), self.tmp_dir()] {
            std::fs::create_dir_all(dir.as_std_path())?;
        }
        Ok(())
    }

    /// The directory a given integrity's snapshot lives (or would live) at.
    pub fn snapshot_path(&self, integrity: &Sha256Integrity) -> Utf8PathBuf {
        self.snapshots_dir().join(integrity.hex())
    }

    /// The directory a given cache key's plugin tree lives (or would live) at.
    pub fn cache_path(&self, cache_key: &str) -> Utf8PathBuf {
        self.cache_dir().join(cache_key)
    }

    /// Extract `id`'s tree at `commit` (registry-relative `path`) into the
    /// store, keyed by its content integrity. Idempotent: if a snapshot with
    /// that integrity already exists, it is returned unchanged. On any
    /// failure the staging directory is removed and `Snapshot` is raised.
    pub fn create_snapshot(
        &self,
        git: &GitExecutor,
        id: &SpaceId,
        commit: &CommitSha,
        registry_path: &str,
    ) -> AspResult<Sha256Integrity> {
        let integrity = compute_git_integrity(git, commit.as_str(), registry_path)?;
        let dest = self.snapshot_path(&integrity);
        if dest.is_dir() {
            return Ok(integrity);
        }

        let attempt = || -> AspResult<()> {
            aspfs::replace_dir_atomic(&dest, |tmp| {
                git.extract_tree(commit.as_str(), registry_path, tmp)?;
                let sidecar = SnapshotSidecar {
                    space_id: id.clone(),
                    commit: commit.clone(),
                    integrity: integrity.clone(),
                    created_at: now_iso8601(),
                    source_path: registry_path.to_string(),
                };
                let json = serde_json::to_vec_pretty(&sidecar)?;
                aspfs::write_atomic(&tmp.join(".asp-snapshot.json"), &json)?;
                Ok(())
            })
        };

        // Snapshot creation retries once on transient git failure.
        if attempt().is_err() {
            attempt().map_err(|source| AspError::Snapshot {
                space_id: id.as_str().to_string(),
                commit: commit.as_str().to_string(),
                source: Box::new(source),
            })?;
        }
        Ok(integrity)
    }

    /// Recompute a snapshot's integrity from disk and compare to `expected`.
    pub fn verify_snapshot(&self, expected: &Sha256Integrity) -> AspResult<bool> {
        let path = self.snapshot_path(expected);
        if !path.is_dir() {
            return Ok(false);
        }
        Ok(&compute_filesystem_integrity(&path)? == expected)
    }

    /// List every 64-hex snapshot directory currently present.
    pub fn list_snapshots(&self) -> AspResult<Vec<String>> {
        list_hex_entries(&self.snapshots_dir())
    }

    /// List every 64-hex cache directory currently present.
    pub fn list_cache_entries(&self) -> AspResult<Vec<String>> {
        list_hex_entries(&self.cache_dir())
    }

    /// Delete snapshot/cache entries not present in the reachable sets.
    /// Returns counts and total bytes freed; does nothing (but still
    /// reports what *would* be deleted) when `dry_run` is set.
    pub fn gc(&self, reachable_integrities: &HashSet<String>, reachable_cache_keys: &HashSet<String>, dry_run: bool) -> AspResult<GcResult> {
        let mut result = GcResult::default();
        for hex in self.list_snapshots()? {
            if reachable_integrities.contains(&hex) {
                continue;
            }
            let path = self.snapshots_dir().join(&hex);
            result.bytes_freed += aspfs::dir_size(&path)?;
            result.snapshots_deleted += 1;
            if !dry_run {
                std::fs::remove_dir_all(path.as_std_path())?;
            }
        }
        for hex in self.list_cache_entries()? {
            if reachable_cache_keys.contains(&hex) {
                continue;
            }
            let path = self.cache_dir().join(&hex);
            result.bytes_freed += aspfs::dir_size(&path)?;
            result.cache_entries_deleted += 1;
            if !dry_run {
                std::fs::remove_dir_all(path.as_std_path())?;
            }
        }
        Ok(result)
    }

    /// Write a cache entry's sidecar and rename the staged plugin tree into
    /// place, keyed by `cache_key`.
    pub fn commit_cache_entry(
        &self,
        cache_key: &str,
        space_key: &SpaceKey,
        plugin_name: &str,
        plugin_version: Option<&str>,
        integrity: &Sha256Integrity,
        populate: impl FnOnce(&Utf8Path) -> AspResult<()>,
    ) -> AspResult<Utf8PathBuf> {
        let dest = self.cache_path(cache_key);
        aspfs::replace_dir_atomic(&dest, |tmp| {
            populate(tmp)?;
            let sidecar = CacheSidecar {
                plugin_name: plugin_name.to_string(),
                plugin_version: plugin_version.map(str::to_string),
                integrity: integrity.clone(),
                cache_key: cache_key.to_string(),
                created_at: now_iso8601(),
                space_key: space_key.clone(),
            };
            let json = serde_json::to_vec_pretty(&sidecar)?;
            aspfs::write_atomic(&tmp.join(".asp-cache.json"), &json)?;
            Ok(())
        })?;
        Ok(dest)
    }
}

fn list_hex_entries(dir: &Utf8Path) -> AspResult<Vec<String>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir.as_std_path())? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.len() == 64 && name.bytes().all(|b| b.is_ascii_hexdigit()) {
            out.push(name.into_owned());
        }
    }
    Ok(out)
}

/// The result of a [`Store::gc`] call.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcResult {
    /// Snapshots deleted (or that would be, under `dryRun`).
    pub snapshots_deleted: u64,
    /// Cache entries deleted (or that would be, under `dryRun`).
    pub cache_entries_deleted: u64,
    /// Total bytes freed (or that would be).
    pub bytes_freed: u64,
}

/// The harness-aware v2 cache key: SHA-256 of
/// `"materializer-v2\0<harnessId>\0<harnessVersion>\0<integrity>\0<pluginName>\0<pluginVersion>\n"`.
pub fn compute_cache_key_v2(
    harness_id: &str,
    harness_version: &str,
    integrity: &Sha256Integrity,
    plugin_name: &str,
    plugin_version: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(CACHE_KEY_V2_PREAMBLE);
    hasher.update(harness_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(harness_version.as_bytes());
    hasher.update(b"\0");
    hasher.update(integrity.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(plugin_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(plugin_version.unwrap_or("").as_bytes());
    hasher.update(b"\n");
    hex_digest(hasher)
}

/// The legacy (pre-harness) v1 cache key, still recognized on lookup.
pub fn compute_cache_key_v1(integrity: &Sha256Integrity, plugin_name: &str, plugin_version: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(CACHE_KEY_V1_PREAMBLE);
    hasher.update(integrity.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(plugin_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(plugin_version.unwrap_or("").as_bytes());
    hasher.update(b"\n");
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    let mut s = String::with_capacity(64);
    for b in digest {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_v2_is_sensitive_to_every_input() {
        let integrity = Sha256Integrity::from_digest([1; 32]);
        let base = compute_cache_key_v2("claude", "1.0.0", &integrity, "base", None);
        assert_ne!(base, compute_cache_key_v2("codex", "1.0.0", &integrity, "base", None));
        assert_ne!(base, compute_cache_key_v2("claude", "2.0.0", &integrity, "base", None));
        assert_ne!(base, compute_cache_key_v2("claude", "1.0.0", &Sha256Integrity::from_digest([2; 32]), "base", None));
        assert_ne!(base, compute_cache_key_v2("claude", "1.0.0", &integrity, "other", None));
        assert_ne!(base, compute_cache_key_v2("claude", "1.0.0", &integrity, "base", Some("1.0.0")));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn v1_and_v2_keys_differ_for_identical_inputs() {
        let integrity = Sha256Integrity::from_digest([1; 32]);
        let v1 = compute_cache_key_v1(&integrity, "base", None);
        let v2 = compute_cache_key_v2("claude", "1.0.0", &integrity, "base", None);
        assert_ne!(v1, v2);
    }

    #[test]
    fn ensure_dirs_creates_full_skeleton() {
        let dir = tempfile::tempdir().unwrap();
        let home = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let store = Store::new(home.clone());
        store.ensure_dirs().unwrap();
        assert!(store.snapshots_dir().is_dir());
        assert!(store.cache_dir().is_dir());
        assert!(store.repo_dir().is_dir());
        assert!(store.tmp_dir().is_dir());
    }

    #[test]
    fn gc_respects_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let home = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let store = Store::new(home);
        store.ensure_dirs().unwrap();
        let orphan = "a".repeat(64);
        std::fs::create_dir_all(store.snapshots_dir().join(&orphan).as_std_path()).unwrap();

        let result = store.gc(&HashSet::new(), &HashSet::new(), true).unwrap();
        assert_eq!(result.snapshots_deleted, 1);
        assert!(store.snapshots_dir().join(&orphan).is_dir());

        let result = store.gc(&HashSet::new(), &HashSet::new(), false).unwrap();
        assert_eq!(result.snapshots_deleted, 1);
        assert!(!store.snapshots_dir().join(&orphan).is_dir());
    }
}
