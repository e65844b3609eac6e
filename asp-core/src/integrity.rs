//! Canonical content hashing: per-space integrity (from a git tree or a
//! filesystem directory), and per-target environment hashing.
//!
//! The git-backed and filesystem-backed algorithms are deliberately built to
//! agree: a git blob's oid is itself a SHA-1 over `"blob {len}\0{content}"`,
//! so computing the same thing from a checked-out file reproduces it. That
//! parity is what lets a store snapshot's integrity be verified purely from
//! disk, without re-consulting git.

use asp_registry::{EntryKind, GitExecutor, TreeEntry};
use asp_schema::{SpaceKey, Sha256Integrity};
use camino::Utf8Path;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::errors::AspResult;

const TREE_PREAMBLE: &[u8] = b"v1\0";
const ENV_PREAMBLE: &[u8] = b"env-v1\0";
const ENV_HARNESS_PREAMBLE: &[u8] = b"env-harness-v1\0";

const IGNORED_DIR_NAMES: &[&str] = &["node_modules", ".git", ".DS_Store", "Thumbs.db"];
const IGNORED_EXTENSIONS: &[&str] = &["pyc", "pyo", "class"];

fn is_ignored_path(path: &str) -> bool {
    if path.split('/').any(|segment| IGNORED_DIR_NAMES.contains(&segment)) {
        return true;
    }
    if let Some(ext) = path.rsplit('.').next() {
        if path.contains('.') && IGNORED_EXTENSIONS.contains(&ext) {
            return true;
        }
    }
    false
}

/// Compute a space's integrity from its tree at a commit in the registry.
pub fn compute_git_integrity(git: &GitExecutor, rev: &str, subpath: &str) -> AspResult<Sha256Integrity> {
    let mut entries: Vec<TreeEntry> = git
        .list_tree(rev, subpath)?
        .into_iter()
        .filter(|e| !is_ignored_path(&e.path))
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    hasher.update(TREE_PREAMBLE);
    for entry in &entries {
        let kind = match entry.kind {
            EntryKind::Blob => "blob",
            EntryKind::Tree => "tree",
        };
        hasher.update(entry.path.as_bytes());
        hasher.update(b"\0");
        hasher.update(kind.as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.oid.as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.mode.as_bytes());
        hasher.update(b"\n");
    }
    Ok(Sha256Integrity::from_digest(hasher.finalize().into()))
}

struct FsEntry {
    path: String,
    oid: String,
    mode: &'static str,
}

/// The git blob oid (SHA-1) of a file's content: `SHA1("blob {len}\0{content}")`.
pub fn git_blob_oid(content: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(b"blob ");
    hasher.update(content.len().to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(content);
    hex::encode(hasher.finalize())
}

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

fn walk_fs_entries(root: &Utf8Path, dir: &Utf8Path, out: &mut Vec<FsEntry>) -> AspResult<()> {
    for entry in std::fs::read_dir(dir.as_std_path())? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = Utf8Path::from_path(&entry.path())
            .map(|p| p.to_owned())
            .expect("directory entry path is not valid UTF-8");
        let rel = path.strip_prefix(root).unwrap_or(&path).to_string().replace('\\', "/");
        if is_ignored_path(&rel) {
            continue;
        }
        if file_type.is_dir() {
            walk_fs_entries(root, &path, out)?;
        } else if file_type.is_file() {
            let content = std::fs::read(path.as_std_path())?;
            let meta = entry.metadata()?;
            out.push(FsEntry {
                path: rel,
                oid: git_blob_oid(&content),
                mode: if is_executable(&meta) { "100755" } else { "100644" },
            });
        }
        // symlinks are neither: git tracks them as blobs pointing at the
        // link target, which this walk doesn't special-case today.
    }
    Ok(())
}

/// Compute a space's integrity from an on-disk directory (a dev space's
/// working tree, or an extracted store snapshot). Yields the same value as
/// [`compute_git_integrity`] for the equivalent commit, by construction.
pub fn compute_filesystem_integrity(root: &Utf8Path) -> AspResult<Sha256Integrity> {
    let mut entries = Vec::new();
    walk_fs_entries(root, root, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    hasher.update(TREE_PREAMBLE);
    for entry in &entries {
        hasher.update(entry.path.as_bytes());
        hasher.update(b"\0");
        hasher.update(b"blob\0");
        hasher.update(entry.oid.as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.mode.as_bytes());
        hasher.update(b"\n");
    }
    Ok(Sha256Integrity::from_digest(hasher.finalize().into()))
}

/// Verify that an extracted snapshot directory's recomputed integrity
/// matches `expected`.
pub fn verify_snapshot(root: &Utf8Path, expected: &Sha256Integrity) -> AspResult<bool> {
    Ok(&compute_filesystem_integrity(root)? == expected)
}

/// One `loadOrder` entry's contribution to a target's environment hash.
pub struct EnvEntry<'a> {
    /// The resolved space key.
    pub key: &'a SpaceKey,
    /// The space's content integrity.
    pub integrity: &'a Sha256Integrity,
    /// The materialized plugin name.
    pub plugin_name: &'a str,
}

/// Compute a target's environment hash over its ordered `(spaceKey,
/// integrity, pluginName)` triples. `harness_id`, when given, mixes in a
/// harness-aware preamble; the harness *version* is deliberately excluded
/// (it only participates in cache keys).
pub fn compute_env_hash(entries: &[EnvEntry<'_>], harness_id: Option<&str>) -> Sha256Integrity {
    let mut hasher = Sha256::new();
    match harness_id {
        Some(id) => {
            hasher.update(ENV_HARNESS_PREAMBLE);
            hasher.update(id.as_bytes());
            hasher.update(b"\0");
        }
        None => hasher.update(ENV_PREAMBLE),
    }
    for entry in entries {
        hasher.update(entry.key.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.integrity.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.plugin_name.as_bytes());
        hasher.update(b"\n");
    }
    Sha256Integrity::from_digest(hasher.finalize().into())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{b:02x}").unwrap();
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asp_schema::{CommitSha, SpaceId};

    #[test]
    fn ignores_node_modules_and_bytecode() {
        assert!(is_ignored_path("pkg/node_modules/x.js"));
        assert!(is_ignored_path("src/__pycache__/mod.pyc"));
        assert!(is_ignored_path("a/.git/HEAD"));
        assert!(!is_ignored_path("commands/build.md"));
    }

    #[test]
    fn git_blob_oid_matches_known_empty_blob_sha() {
        // the empty blob's git oid is a well-known constant
        assert_eq!(git_blob_oid(b""), "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
    }

    #[test]
    fn filesystem_integrity_is_order_independent_but_content_sensitive() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("b.txt").as_std_path(), b"b").unwrap();
        std::fs::write(root.join("a.txt").as_std_path(), b"a").unwrap();
        let first = compute_filesystem_integrity(&root).unwrap();

        std::fs::write(root.join("a.txt").as_std_path(), b"a-changed").unwrap();
        let second = compute_filesystem_integrity(&root).unwrap();
        assert_ne!(first, second);

        std::fs::write(root.join("a.txt").as_std_path(), b"a-changed").unwrap();
        let third = compute_filesystem_integrity(&root).unwrap();
        assert_eq!(second, third);
    }

    #[test]
    fn env_hash_changes_with_load_order_integrity_or_plugin_name() {
        let id = SpaceId::parse("base").unwrap();
        let commit = CommitSha::parse("a".repeat(40)).unwrap();
        let key = SpaceKey::new(&id, &commit);
        let integrity = Sha256Integrity::from_digest([1; 32]);
        let other_integrity = Sha256Integrity::from_digest([2; 32]);

        let base = compute_env_hash(&[EnvEntry { key: &key, integrity: &integrity, plugin_name: "base" }], None);
        let changed_integrity =
            compute_env_hash(&[EnvEntry { key: &key, integrity: &other_integrity, plugin_name: "base" }], None);
        let changed_name = compute_env_hash(&[EnvEntry { key: &key, integrity: &integrity, plugin_name: "other" }], None);
        let with_harness = compute_env_hash(&[EnvEntry { key: &key, integrity: &integrity, plugin_name: "base" }], Some("claude"));

        assert_ne!(base, changed_integrity);
        assert_ne!(base, changed_name);
        assert_ne!(base, with_harness);

        let repeat = compute_env_hash(&[EnvEntry { key: &key, integrity: &integrity, plugin_name: "base" }], None);
        assert_eq!(base, repeat);
    }
}
