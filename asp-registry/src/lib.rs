#![deny(missing_docs)]

//! # asp-registry
//!
//! The git-backed half of Agent Spaces' dependency resolution: a typed
//! wrapper around the system `git` binary ([`git::GitExecutor`]), and the
//! selector resolver and dependency-closure walker ([`resolve::Resolver`])
//! built on top of it.
//!
//! Ref parsing itself (the grammar) lives in `asp-schema`; this crate only
//! resolves already-parsed refs against registry state.

pub mod errors;
pub mod git;
pub mod resolve;

pub use errors::{CyclicDependencyError, GitError, MissingDependencyError, RegistryError, Result, SelectorResolutionError};
pub use git::{EntryKind, GitExecutor, TagRef, TreeEntry, DEFAULT_TIMEOUT};
pub use resolve::{ClosureResult, ResolvedSpace, Resolver};
