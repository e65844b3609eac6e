//! Typed wrapper around the system `git` binary.
//!
//! Every op here spawns `git` with an explicit argv array (never a shell
//! string) and an explicit working directory, and enforces a timeout,
//! hand-rolled on top of `std::process` and `wait-timeout`.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;
use wait_timeout::ChildExt;

use crate::errors::GitError;

/// Applied to every subprocess call unless a caller overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// The kind of a git tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file (or symlink — git doesn't distinguish at this layer).
    Blob,
    /// A subdirectory.
    Tree,
}

/// One line of `git ls-tree -r`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Path relative to the listed root.
    pub path: String,
    /// Blob or tree.
    pub kind: EntryKind,
    /// The git object id, as lowercase hex.
    pub oid: String,
    /// The git file mode, e.g. `100644`, `100755`, `040000`.
    pub mode: String,
}

/// A tag and the commit it currently points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRef {
    /// The tag name, e.g. `space/base/v1.0.0`.
    pub name: String,
    /// The commit SHA it resolves to (tags are dereferenced; this is never
    /// the tag object's own oid).
    pub commit: String,
}

/// Thin handle to a git repository working copy.
#[derive(Debug, Clone)]
pub struct GitExecutor {
    git_bin: String,
    repo_root: Utf8PathBuf,
    timeout: Duration,
}

impl GitExecutor {
    /// Build an executor rooted at `repo_root`, using the `git` binary found
    /// on `PATH`.
    pub fn new(repo_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            git_bin: "git".to_string(),
            repo_root: repo_root.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the `git` binary path (used in tests).
    pub fn with_git_bin(mut self, git_bin: impl Into<String>) -> Self {
        self.git_bin = git_bin.into();
        self
    }

    /// Override the per-call timeout (used in tests).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The working directory this executor runs `git` in.
    pub fn repo_root(&self) -> &Utf8Path {
        &self.repo_root
    }

    fn run(&self, args: &[&str]) -> Result<std::process::Output, GitError> {
        self.run_in(&self.repo_root, args)
    }

    fn run_in(&self, cwd: &Utf8Path, args: &[&str]) -> Result<std::process::Output, GitError> {
        let joined = args.join(" ");
        debug!(git.args = %joined, git.cwd = %cwd, "running git");

        let mut child = Command::new(&self.git_bin)
            .args(args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| GitError::Spawn {
                args: joined.clone(),
                source,
            })?;

        let status = match child
            .wait_timeout(self.timeout)
            .map_err(|source| GitError::Spawn {
                args: joined.clone(),
                source,
            })? {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(GitError::Timeout {
                    args: joined,
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let Some(mut out) = child.stdout.take() {
            let _ = out.read_to_end(&mut stdout);
        }
        if let Some(mut err) = child.stderr.take() {
            let _ = err.read_to_end(&mut stderr);
        }

        Ok(std::process::Output {
            status,
            stdout,
            stderr,
        })
    }

    fn run_checked(&self, args: &[&str]) -> Result<Vec<u8>, GitError> {
        self.run_checked_in(&self.repo_root, args)
    }

    fn run_checked_in(&self, cwd: &Utf8Path, args: &[&str]) -> Result<Vec<u8>, GitError> {
        let output = self.run_in(cwd, args)?;
        if !output.status.success() {
            return Err(GitError::NonZeroExit {
                args: args.join(" "),
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(output.stdout)
    }

    fn run_checked_utf8(&self, args: &[&str]) -> Result<String, GitError> {
        let bytes = self.run_checked(args)?;
        String::from_utf8(bytes).map_err(|source| GitError::InvalidUtf8 {
            args: args.join(" "),
            source,
        })
    }

    /// List tags whose name matches `glob` (a `git for-each-ref` pattern,
    /// e.g. `"space/base/v*"`), each dereferenced to its commit SHA.
    pub fn list_tags(&self, glob: &str) -> Result<Vec<TagRef>, GitError> {
        let pattern = format!("refs/tags/{glob}");
        let out = self.run_checked_utf8(&[
            "for-each-ref",
            "--format=%(refname:short) %(objectname) %(*objectname)",
            &pattern,
        ])?;

        let mut tags = Vec::new();
        for line in out.lines().filter(|l| !l.trim().is_empty()) {
            let mut parts = line.split_whitespace();
            let name = parts.next().ok_or_else(|| GitError::MalformedOutput {
                what: "for-each-ref",
                line: line.to_string(),
            })?;
            let oid = parts.next().ok_or_else(|| GitError::MalformedOutput {
                what: "for-each-ref",
                line: line.to_string(),
            })?;
            // annotated tags dereference to a third column; lightweight tags
            // (the common case here) leave it empty and `objectname` is
            // already the commit.
            let deref = parts.next();
            let commit = deref.filter(|s| !s.is_empty()).unwrap_or(oid);
            tags.push(TagRef {
                name: name.to_string(),
                commit: commit.to_string(),
            });
        }
        Ok(tags)
    }

    /// Resolve `refname` (tag, branch, or anything `rev-parse` accepts) to a
    /// full commit SHA. Returns `Ok(None)` if it doesn't exist, rather than
    /// erroring, since callers use this for existence checks.
    pub fn resolve_rev(&self, refname: &str) -> Result<Option<String>, GitError> {
        let out = self.run(&["rev-parse", "--verify", &format!("{refname}^{{commit}}")])?;
        if !out.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8(out.stdout)
            .map_err(|source| GitError::InvalidUtf8 {
                args: "rev-parse".to_string(),
                source,
            })?
            .trim()
            .to_string();
        Ok(Some(sha))
    }

    /// Recursively list the tree at `<rev>:<subpath>` (subpath may be empty
    /// for the repo root).
    pub fn list_tree(&self, rev: &str, subpath: &str) -> Result<Vec<TreeEntry>, GitError> {
        let spec = if subpath.is_empty() {
            rev.to_string()
        } else {
            format!("{rev}:{subpath}")
        };
        let out = self.run_checked_utf8(&["ls-tree", "-r", "-t", &spec])?;

        let mut entries = Vec::new();
        for line in out.lines().filter(|l| !l.trim().is_empty()) {
            // `<mode> <type> <oid>\t<path>`
            let (meta, path) = line.split_once('\t').ok_or_else(|| GitError::MalformedOutput {
                what: "ls-tree",
                line: line.to_string(),
            })?;
            let mut meta_parts = meta.split_whitespace();
            let mode = meta_parts.next().ok_or_else(|| GitError::MalformedOutput {
                what: "ls-tree",
                line: line.to_string(),
            })?;
            let kind_str = meta_parts.next().ok_or_else(|| GitError::MalformedOutput {
                what: "ls-tree",
                line: line.to_string(),
            })?;
            let oid = meta_parts.next().ok_or_else(|| GitError::MalformedOutput {
                what: "ls-tree",
                line: line.to_string(),
            })?;
            let kind = match kind_str {
                "blob" => EntryKind::Blob,
                "tree" => EntryKind::Tree,
                // `ls-tree -t` also lists submodule "commit" entries, which
                // this registry format has no use for; skip them.
                _ => continue,
            };
            entries.push(TreeEntry {
                path: path.to_string(),
                kind,
                oid: oid.to_string(),
                mode: mode.to_string(),
            });
        }
        Ok(entries)
    }

    /// Read the raw bytes of the blob at `<rev>:<path>`.
    pub fn read_blob(&self, rev: &str, path: &str) -> Result<Vec<u8>, GitError> {
        let spec = format!("{rev}:{path}");
        self.run_checked(&["show", &spec])
    }

    /// Extract the tree at `<rev>:<subpath>` into `dest`, preserving the
    /// directory structure. `dest` must not already exist; it is created.
    pub fn extract_tree(&self, rev: &str, subpath: &str, dest: &Utf8Path) -> Result<(), GitError> {
        std::fs::create_dir_all(dest).map_err(|source| GitError::Spawn {
            args: format!("mkdir {dest}"),
            source,
        })?;
        for entry in self.list_tree(rev, subpath)? {
            if entry.kind != EntryKind::Blob {
                continue;
            }
            let out_path = dest.join(&entry.path);
            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| GitError::Spawn {
                    args: format!("mkdir {parent}"),
                    source,
                })?;
            }
            let full_path = if subpath.is_empty() {
                entry.path.clone()
            } else {
                format!("{subpath}/{}", entry.path)
            };
            let bytes = self.read_blob(rev, &full_path)?;
            std::fs::write(&out_path, bytes).map_err(|source| GitError::Spawn {
                args: format!("write {out_path}"),
                source,
            })?;
            #[cfg(unix)]
            if entry.mode == "100755" {
                use std::os::unix::fs::PermissionsExt;
                if let Ok(meta) = std::fs::metadata(&out_path) {
                    let mut perms = meta.permissions();
                    perms.set_mode(0o755);
                    let _ = std::fs::set_permissions(&out_path, perms);
                }
            }
        }
        Ok(())
    }

    /// `git init` a bare-ish working repo at `repo_root` if it doesn't
    /// already exist.
    pub fn init(repo_root: &Utf8Path, git_bin: &str) -> Result<Self, GitError> {
        std::fs::create_dir_all(repo_root).map_err(|source| GitError::Spawn {
            args: "mkdir".to_string(),
            source,
        })?;
        let exec = Self::new(repo_root.to_owned()).with_git_bin(git_bin);
        exec.run_checked(&["init"])?;
        Ok(exec)
    }

    /// `git clone <url> <repo_root>`, returning an executor rooted there.
    pub fn clone(url: &str, repo_root: &Utf8Path, git_bin: &str) -> Result<Self, GitError> {
        let parent = repo_root.parent().unwrap_or(Utf8Path::new("."));
        let exec = Self::new(parent.to_owned()).with_git_bin(git_bin);
        exec.run_checked(&[
            "clone",
            url,
            repo_root.file_name().unwrap_or_default(),
        ])?;
        Ok(Self::new(repo_root.to_owned()).with_git_bin(git_bin))
    }

    /// `git fetch` from the configured remote (default: `origin`).
    pub fn fetch(&self, remote: Option<&str>) -> Result<(), GitError> {
        let remote = remote.unwrap_or("origin");
        self.run_checked(&["fetch", remote])?;
        Ok(())
    }

    /// `git add <paths...>`.
    pub fn add(&self, paths: &[&str]) -> Result<(), GitError> {
        let mut args = vec!["add"];
        args.extend(paths);
        self.run_checked(&args)?;
        Ok(())
    }

    /// `git commit -m <message>`.
    pub fn commit(&self, message: &str) -> Result<String, GitError> {
        self.run_checked(&["commit", "-m", message])?;
        let sha = self.run_checked_utf8(&["rev-parse", "HEAD"])?;
        Ok(sha.trim().to_string())
    }

    /// `git tag <name> <commit>`.
    pub fn tag(&self, name: &str, commit: &str) -> Result<(), GitError> {
        self.run_checked(&["tag", name, commit])?;
        Ok(())
    }

    /// `git status --porcelain`; empty output means clean.
    pub fn status(&self) -> Result<String, GitError> {
        self.run_checked_utf8(&["status", "--porcelain"])
    }

    /// `git config <key> <value>`, scoped to this repository.
    pub fn set_config(&self, key: &str, value: &str) -> Result<(), GitError> {
        self.run_checked(&["config", key, value])?;
        Ok(())
    }

    /// The current `HEAD` commit, if any commits exist yet.
    pub fn head(&self) -> Option<String> {
        self.resolve_rev("HEAD").ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Utf8Path) -> GitExecutor {
        let exec = GitExecutor::init(dir, "git").unwrap();
        exec.run(&["config", "user.email", "test@example.com"]).unwrap();
        exec.run(&["config", "user.name", "Test"]).unwrap();
        exec
    }

    #[test]
    fn init_add_commit_tag_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let exec = init_repo(root);

        std::fs::write(root.join("space.toml"), "id = \"base\"\n").unwrap();
        exec.add(&["space.toml"]).unwrap();
        let commit = exec.commit("initial").unwrap();
        assert_eq!(commit.len(), 40);
        exec.tag("space/base/v1.0.0", &commit).unwrap();

        let tags = exec.list_tags("space/base/v*").unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].commit, commit);

        let resolved = exec.resolve_rev(&commit).unwrap();
        assert_eq!(resolved.as_deref(), Some(commit.as_str()));

        assert_eq!(exec.status().unwrap(), "");
    }

    #[test]
    fn list_tree_and_read_blob() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let exec = init_repo(root);

        std::fs::create_dir_all(root.join("spaces/base/commands")).unwrap();
        std::fs::write(root.join("spaces/base/space.toml"), "id = \"base\"\n").unwrap();
        std::fs::write(
            root.join("spaces/base/commands/build.md"),
            "# build\n",
        )
        .unwrap();
        exec.add(&["."]).unwrap();
        let commit = exec.commit("add space").unwrap();

        let entries = exec.list_tree(&commit, "spaces/base").unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert!(paths.contains(&"space.toml"));
        assert!(paths.contains(&"commands/build.md"));

        let blob = exec.read_blob(&commit, "spaces/base/space.toml").unwrap();
        assert_eq!(blob, b"id = \"base\"\n");
    }

    #[test]
    fn extract_tree_writes_files() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        let exec = init_repo(root);

        std::fs::create_dir_all(root.join("spaces/base")).unwrap();
        std::fs::write(root.join("spaces/base/space.toml"), "id = \"base\"\n").unwrap();
        exec.add(&["."]).unwrap();
        let commit = exec.commit("add space").unwrap();

        let dest_tmp = tempfile::tempdir().unwrap();
        let dest = Utf8Path::from_path(dest_tmp.path()).unwrap().join("out");
        exec.extract_tree(&commit, "spaces/base", &dest).unwrap();

        let content = std::fs::read_to_string(dest.join("space.toml")).unwrap();
        assert_eq!(content, "id = \"base\"\n");
    }

    #[test]
    fn timeout_kills_hanging_process() {
        let tmp = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(tmp.path()).unwrap();
        // Swap in `sleep` for the "git" binary to deterministically exercise
        // the timeout path without depending on git's own behavior.
        let exec = GitExecutor::new(root.to_owned())
            .with_git_bin("sleep")
            .with_timeout(Duration::from_millis(100));
        let err = exec.run(&["5"]).unwrap_err();
        assert!(matches!(err, GitError::Timeout { .. }));
    }
}
