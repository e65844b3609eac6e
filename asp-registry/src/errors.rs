//! Errors!

use asp_schema::{IdParseError, RefParseError, SpaceId};
use miette::Diagnostic;
use thiserror::Error;

/// A Result returned by asp-registry.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// A git subprocess exited non-zero, timed out, or its output couldn't be
/// decoded as UTF-8.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum GitError {
    /// `git` exited with a non-zero status.
    #[error("`git {args}` failed (exit {exit_code:?})\n{stderr}")]
    NonZeroExit {
        /// The argv passed after `git`, space-joined for display.
        args: String,
        /// The process's exit code, if it exited normally.
        exit_code: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },

    /// `git` didn't finish within the call's timeout and was killed.
    #[error("`git {args}` timed out after {timeout_secs}s")]
    Timeout {
        /// The argv passed after `git`, space-joined for display.
        args: String,
        /// The timeout that was exceeded.
        timeout_secs: u64,
    },

    /// The subprocess's stdout/stderr wasn't valid UTF-8.
    #[error("`git {args}` produced non-UTF-8 output")]
    InvalidUtf8 {
        /// The argv passed after `git`, space-joined for display.
        args: String,
        /// The underlying decode error.
        #[source]
        source: std::string::FromUtf8Error,
    },

    /// Failed to spawn the `git` binary at all.
    #[error("couldn't spawn `git {args}`")]
    Spawn {
        /// The argv passed after `git`, space-joined for display.
        args: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A tree listing or blob read named a path that doesn't parse as a git
    /// tree entry line.
    #[error("couldn't parse git output for `{what}`: {line:?}")]
    MalformedOutput {
        /// What we were trying to parse (e.g. `"ls-tree"`).
        what: &'static str,
        /// The offending line.
        line: String,
    },
}

/// A selector couldn't be resolved to a commit against the registry.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum SelectorResolutionError {
    /// A dist-tag selector named a channel with no entry in `dist-tags.json`.
    #[error("space {space_id:?} has no dist-tag {channel:?}")]
    UnknownDistTag {
        /// The space being resolved.
        space_id: SpaceId,
        /// The requested channel.
        channel: String,
    },

    /// An exact-semver or dist-tag-resolved-to-version selector named a
    /// version with no matching `space/<id>/v<version>` tag.
    #[error("space {space_id:?} has no tag for version {version}")]
    UnknownVersion {
        /// The space being resolved.
        space_id: SpaceId,
        /// The requested version.
        version: String,
    },

    /// A semver range matched no published version.
    #[error("space {space_id:?} has no published version satisfying {range}")]
    NoVersionSatisfiesRange {
        /// The space being resolved.
        space_id: SpaceId,
        /// The range that went unsatisfied.
        range: String,
    },

    /// A git-pin selector's SHA prefix was too short to be trusted.
    #[error("git pin {sha:?} for space {space_id:?} is shorter than 12 hex characters")]
    ShortGitPin {
        /// The space being resolved.
        space_id: SpaceId,
        /// The offending (too-short) pin.
        sha: String,
    },

    /// A `dev` ref was resolved but the space doesn't exist on disk.
    #[error("space {space_id:?} has no dev directory at {path}")]
    MissingDevSpace {
        /// The space being resolved.
        space_id: SpaceId,
        /// Where we looked.
        path: String,
    },
}

/// The dependency graph contains a cycle.
#[derive(Debug, Error, Diagnostic)]
#[error("dependency cycle detected: {}", cycle.join(" -> "))]
pub struct CyclicDependencyError {
    /// The cycle, in traversal order, with the repeated key listed twice
    /// (first and last) to show the closure.
    pub cycle: Vec<String>,
}

/// A space's `deps.spaces` named a ref that doesn't resolve to anything
/// present in the registry.
#[derive(Debug, Error, Diagnostic)]
#[error("space {dependent:?} depends on {dependency_ref:?}, which could not be found")]
pub struct MissingDependencyError {
    /// The space that declared the missing dependency.
    pub dependent: SpaceId,
    /// The ref string that failed to resolve.
    pub dependency_ref: String,
}

/// The umbrella error type for everything this crate can fail with.
#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum RegistryError {
    /// A git subprocess failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Git(#[from] GitError),

    /// A ref string failed to parse.
    #[error(transparent)]
    #[diagnostic(transparent)]
    RefParse(#[from] RefParseError),

    /// A space id failed to validate.
    #[error(transparent)]
    #[diagnostic(transparent)]
    IdParse(#[from] IdParseError),

    /// A selector failed to resolve against the registry.
    #[error(transparent)]
    #[diagnostic(transparent)]
    SelectorResolution(#[from] SelectorResolutionError),

    /// The dependency graph contains a cycle.
    #[error(transparent)]
    #[diagnostic(transparent)]
    CyclicDependency(#[from] CyclicDependencyError),

    /// A dependency ref could not be found.
    #[error(transparent)]
    #[diagnostic(transparent)]
    MissingDependency(#[from] MissingDependencyError),

    /// A manifest at a resolved commit failed to parse.
    #[error("couldn't parse space.toml for {space_id:?} at {commit}")]
    ManifestParse {
        /// The space in question.
        space_id: SpaceId,
        /// The commit it was read at.
        commit: String,
        /// The underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
}
