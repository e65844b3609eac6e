//! The `AspError` taxonomy: every fallible operation in this crate bottoms
//! out here. Component-local errors (`asp_schema`, `asp_registry`) are
//! wrapped via `#[from]` rather than re-derived, so a `RefParseError` is
//! always the same type whether it surfaced from parsing a ref on the CLI
//! or deep inside closure resolution.

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

/// An alias for the common Result type for this crate.
pub type AspResult<T> = std::result::Result<T, AspError>;

/// Errors this crate can produce.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum AspError {
    /// Random i/o error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Random JSON (de)serialization error, e.g. writing a sidecar.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A raw git subprocess error, surfaced directly from tree/blob reads
    /// that don't go through a resolver-level operation.
    #[error(transparent)]
    Git(#[from] asp_registry::GitError),

    /// A manifest or lock file failed to parse as TOML.
    #[error("failed to parse {path} as TOML")]
    ConfigParseToml {
        /// The file that failed to parse.
        path: Utf8PathBuf,
        /// The underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A lock or dist-tags file failed to parse as JSON.
    #[error("failed to parse {path} as JSON")]
    ConfigParseJson {
        /// The file that failed to parse.
        path: Utf8PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A project manifest failed structural validation.
    #[error(transparent)]
    ProjectManifestInvalid(#[from] asp_schema::ProjectManifestError),

    /// A lock file failed its cross-referential invariants.
    #[error(transparent)]
    LockInvalid(#[from] asp_schema::LockValidationError),

    /// A ref failed to parse.
    #[error(transparent)]
    RefParse(#[from] asp_schema::RefParseError),

    /// An id-like value (space id, commit sha, integrity) failed to parse.
    #[error(transparent)]
    IdParse(#[from] asp_schema::IdParseError),

    /// Resolution, closure, or selector errors from the registry.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] asp_registry::RegistryError),

    /// A recomputed integrity did not match the expected value.
    #[error("integrity mismatch for {what}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        /// What was being verified, e.g. a snapshot path or space id.
        what: String,
        /// The expected integrity.
        expected: String,
        /// The recomputed integrity.
        actual: String,
    },

    /// Snapshot extraction failed; the staging directory was cleaned up.
    #[error("failed to create snapshot for {space_id}@{commit}")]
    Snapshot {
        /// The space being snapshotted.
        space_id: String,
        /// The commit being snapshotted.
        commit: String,
        /// The underlying cause.
        #[source]
        source: Box<AspError>,
    },

    /// A file lock could not be acquired before its timeout elapsed.
    #[error("timed out after {timeout_ms}ms waiting for lock at {path}")]
    LockTimeout {
        /// The lock file path.
        path: Utf8PathBuf,
        /// The configured timeout.
        timeout_ms: u64,
    },

    /// A file lock failed for a reason other than timeout.
    #[error("failed to acquire lock at {path}")]
    Lock {
        /// The lock file path.
        path: Utf8PathBuf,
        /// The underlying cause.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    /// Materialization failed for a specific space.
    #[error("failed to materialize {space_key}")]
    Materialization {
        /// The space that failed to materialize.
        space_key: String,
        /// The underlying cause.
        #[source]
        source: Box<AspError>,
    },

    /// A harness adapter rejected or failed to process a request.
    #[error("harness {harness_id:?}: {message}")]
    Harness {
        /// The harness adapter id.
        harness_id: String,
        /// What went wrong.
        message: String,
    },

    /// The requested target does not exist in the project manifest.
    #[error("no target named {name:?} in the project manifest")]
    UnknownTarget {
        /// The requested target name.
        name: String,
    },

    /// No project manifest was found where one was expected.
    #[error("no asp-targets.toml found at {path}")]
    NoProjectManifest {
        /// Where it was expected.
        path: Utf8PathBuf,
    },

    /// An `install` was requested with `resolver.locked = true` but the lock
    /// is missing or does not cover the requested target.
    #[error("target {target:?} is locked but has no up-to-date lock entry")]
    LockedTargetNeedsResolve {
        /// The target that is locked but unresolved.
        target: String,
    },
}

impl AspError {
    /// Wrap a lock-acquisition failure, downcasting to `LockTimeout` when the
    /// cause indicates a timeout (used by [`crate::fs::FileLock::acquire`]).
    pub fn lock_failed(path: Utf8PathBuf, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        AspError::Lock { path, cause: Box::new(cause) }
    }
}
