//! Atomic filesystem primitives: durable writes, durable directory swaps,
//! hardlink-or-copy component linking, and cross-process advisory locks.
//!
//! Every durable artifact this crate produces (lock file, snapshot
//! directory, cache directory) becomes visible to other processes via a
//! single `rename`. Readers should never observe a partially-written file
//! or directory.

use std::fs::File;
use std::io::Write as _;
use std::time::{Duration, Instant, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use fs4::fs_std::FileExt;

use crate::errors::{AspError, AspResult};

fn rand_suffix() -> String {
    // Not cryptographic; just enough entropy that two concurrent writers to
    // the same directory don't collide on their temp name.
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{pid:x}{nanos:x}")
}

/// Write `contents` to `path` durably: write to a sibling temp file, `fsync`
/// it, then `rename` onto `path`. The temp file is unlinked on any error
/// path, so a crash mid-write never corrupts the existing target.
pub fn write_atomic(path: &Utf8Path, contents: &[u8]) -> AspResult<()> {
    let dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let base = path.file_name().unwrap_or("file");
    let tmp_path = dir.join(format!(".{base}.{}.tmp", rand_suffix()));

    let result = (|| -> AspResult<()> {
        let mut file = File::create(tmp_path.as_std_path())?;
        file.write_all(contents)?;
        file.sync_all()?;
        std::fs::rename(tmp_path.as_std_path(), path.as_std_path())?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(tmp_path.as_std_path());
    }
    result
}

/// Replace a directory atomically: populate a sibling temp directory via
/// `populate`, then rename it onto `path`, removing any existing directory
/// at `path` first. Concurrent replacement of the same `path` by holders of
/// distinct locks is undefined behavior; callers must serialize via
/// [`FileLock`].
pub fn replace_dir_atomic(
    path: &Utf8Path,
    populate: impl FnOnce(&Utf8Path) -> AspResult<()>,
) -> AspResult<()> {
    let dir = path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let base = path.file_name().unwrap_or("dir");
    let tmp_path = dir.join(format!(".{base}.{}.tmp", rand_suffix()));

    std::fs::create_dir_all(tmp_path.as_std_path())?;
    let result = populate(&tmp_path);
    if result.is_err() {
        let _ = std::fs::remove_dir_all(tmp_path.as_std_path());
        return result;
    }

    if path.exists() {
        std::fs::remove_dir_all(path.as_std_path())?;
    }
    if let Err(e) = std::fs::rename(tmp_path.as_std_path(), path.as_std_path()) {
        let _ = std::fs::remove_dir_all(tmp_path.as_std_path());
        return Err(e.into());
    }
    Ok(())
}

/// Link or copy a single file from `src` to `dest`, preserving mode.
/// Attempts a hardlink first; falls back to a copy on `EXDEV`, `EPERM`, or
/// `ENOTSUP` (common across container/CI filesystems and cross-device
/// moves). The fallback copy preserves the source's permission bits.
pub fn link_or_copy_file(src: &Utf8Path, dest: &Utf8Path) -> AspResult<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent.as_std_path())?;
    }
    match std::fs::hard_link(src.as_std_path(), dest.as_std_path()) {
        Ok(()) => Ok(()),
        Err(e) if is_link_fallback_error(&e) => {
            std::fs::copy(src.as_std_path(), dest.as_std_path())?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::metadata(src.as_std_path())?.permissions();
                std::fs::set_permissions(dest.as_std_path(), std::fs::Permissions::from_mode(perms.mode()))?;
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn is_link_fallback_error(e: &std::io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc_exdev) if libc_exdev == 18 /* EXDEV */ || libc_exdev == 1 /* EPERM */ || libc_exdev == 95 /* ENOTSUP */
    ) || e.kind() == std::io::ErrorKind::CrossesDevices
}

/// Recursively link-or-copy every file under `src` into `dest`, preserving
/// the directory structure and symlinks as symlinks.
pub fn link_or_copy_tree(src: &Utf8Path, dest: &Utf8Path) -> AspResult<()> {
    std::fs::create_dir_all(dest.as_std_path())?;
    for entry in std::fs::read_dir(src.as_std_path())? {
        let entry = entry?;
        let file_name = entry.file_name();
        let file_name = file_name.to_string_lossy();
        let src_path = src.join(file_name.as_ref());
        let dest_path = dest.join(file_name.as_ref());
        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, dest_path.as_std_path())?;
            #[cfg(not(unix))]
            std::fs::copy(&target, dest_path.as_std_path())?;
        } else if file_type.is_dir() {
            link_or_copy_tree(&src_path, &dest_path)?;
        } else {
            link_or_copy_file(&src_path, &dest_path)?;
        }
    }
    Ok(())
}

/// Options controlling [`FileLock::acquire`].
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Give up and return `LockTimeout` after this many milliseconds.
    pub timeout_ms: u64,
    /// A lock file older than this is considered abandoned and may be broken.
    pub stale_after_ms: u64,
    /// How long to sleep between lock attempts.
    pub retry_interval_ms: u64,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self { timeout_ms: 30_000, stale_after_ms: 10_000, retry_interval_ms: 100 }
    }
}

/// A held cross-process advisory file lock. Dropping it releases the lock;
/// release is otherwise idempotent via [`FileLock::release`].
pub struct FileLock {
    path: Utf8PathBuf,
    file: Option<File>,
}

impl FileLock {
    /// Acquire an advisory lock on `path`, creating the file if needed.
    /// Retries at `retry_interval_ms` until `timeout_ms` elapses, at which
    /// point a lock held past `stale_after_ms` is broken (the file is
    /// removed and recreated) before one final attempt.
    pub fn acquire(path: &Utf8Path, opts: LockOptions) -> AspResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent.as_std_path())?;
        }
        let deadline = Instant::now() + Duration::from_millis(opts.timeout_ms);
        let mut broke_stale = false;
        loop {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(path.as_std_path())?;
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { path: path.to_owned(), file: Some(file) }),
                Err(_) => {}
            }
            drop(file);

            if Instant::now() >= deadline {
                if !broke_stale && lock_is_stale(path, opts.stale_after_ms) {
                    broke_stale = true;
                    let _ = std::fs::remove_file(path.as_std_path());
                    continue;
                }
                return Err(AspError::LockTimeout { path: path.to_owned(), timeout_ms: opts.timeout_ms });
            }
            std::thread::sleep(Duration::from_millis(opts.retry_interval_ms));
        }
    }

    /// Release the lock. Safe to call more than once.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }

    /// The path this lock guards.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock_is_stale(path: &Utf8Path, stale_after_ms: u64) -> bool {
    let Ok(meta) = std::fs::metadata(path.as_std_path()) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    let Ok(age) = SystemTime::now().duration_since(modified) else {
        return false;
    };
    age >= Duration::from_millis(stale_after_ms)
}

/// Recursively compute the total size in bytes of everything under `path`.
pub fn dir_size(path: &Utf8Path) -> AspResult<u64> {
    let mut total = 0u64;
    if path.is_file() {
        return Ok(std::fs::metadata(path.as_std_path())?.len());
    }
    for entry in std::fs::read_dir(path.as_std_path())? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let child = Utf8PathBuf::try_from(entry.path()).map_err(|e| AspError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        if file_type.is_dir() {
            total += dir_size(&child)?;
        } else {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("out.txt")).unwrap();
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read_to_string(path.as_std_path()).unwrap(), "second");
        // no leftover temp files
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn replace_dir_atomic_swaps_contents() {
        let dir = tempfile::tempdir().unwrap();
        let target = Utf8PathBuf::try_from(dir.path().join("out")).unwrap();
        replace_dir_atomic(&target, |tmp| {
            write_atomic(&tmp.join("a.txt"), b"one")?;
            Ok(())
        })
        .unwrap();
        replace_dir_atomic(&target, |tmp| {
            write_atomic(&tmp.join("b.txt"), b"two")?;
            Ok(())
        })
        .unwrap();
        assert!(!target.join("a.txt").exists());
        assert!(target.join("b.txt").exists());
    }

    #[test]
    fn link_or_copy_file_creates_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = Utf8PathBuf::try_from(dir.path().join("src.txt")).unwrap();
        std::fs::write(src.as_std_path(), b"hello").unwrap();
        let dest = Utf8PathBuf::try_from(dir.path().join("nested/dest.txt")).unwrap();
        link_or_copy_file(&src, &dest).unwrap();
        assert_eq!(std::fs::read_to_string(dest.as_std_path()).unwrap(), "hello");
    }

    #[test]
    fn file_lock_excludes_concurrent_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join(".asp.lock")).unwrap();
        let held = FileLock::acquire(&path, LockOptions::default()).unwrap();
        let opts = LockOptions { timeout_ms: 200, stale_after_ms: 10_000, retry_interval_ms: 20 };
        let err = FileLock::acquire(&path, opts).unwrap_err();
        assert!(matches!(err, AspError::LockTimeout { .. }));
        drop(held);
        FileLock::acquire(&path, LockOptions::default()).unwrap();
    }

    #[test]
    fn dir_size_sums_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::write(root.join("a.txt").as_std_path(), b"12345").unwrap();
        std::fs::create_dir_all(root.join("sub").as_std_path()).unwrap();
        std::fs::write(root.join("sub/b.txt").as_std_path(), b"1234567890").unwrap();
        assert_eq!(dir_size(&root).unwrap(), 15);
    }
}
