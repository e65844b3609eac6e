#![deny(missing_docs)]

//! # asp-schema
//!
//! This crate exists to serialize and deserialize the on-disk and wire
//! formats of Agent Spaces: `space.toml` space manifests, `asp-targets.toml`
//! project manifests, `registry/dist-tags.json`, and the `asp-lock.json`
//! lock file, plus the sidecar metadata written alongside content-addressed
//! store entries.
//!
//! It also owns the Ref Parser: [`SpaceRef`] and [`Selector`] parse and
//! classify `space:<id>@<selector>` strings. Resolving a selector against a
//! registry is `asp-registry`'s job, not this crate's — this crate only
//! knows the grammar.
//!
//! The root type for the lock file is [`LockFile`][lock::LockFile].

#[macro_use]
mod macros;

pub mod disttags;
pub mod ids;
pub mod lock;
pub mod manifest;
pub mod project;
pub mod selector;
pub mod sidecar;

pub use disttags::DistTagsFile;
pub use ids::{CommitSha, IdParseError, Sha256Integrity, SpaceId, SpaceKey, DEV_COMMIT, DEV_INTEGRITY};
pub use lock::{
    LockDeps, LockFile, LockPluginInfo, LockSpaceEntry, LockTargetEntry, LockValidationError,
    RegistryInfo, ResolvedFromInfo, Warning, WarningSeverity, LOCKFILE_VERSION, RESOLVER_VERSION,
};
pub use manifest::{DepsTable, PluginMeta, SpaceManifest, SPACE_MANIFEST_SCHEMA};
pub use project::{ProjectManifest, ProjectManifestError, ResolverOptions, TargetDef, PROJECT_MANIFEST_SCHEMA};
pub use selector::{RefParseError, Selector, SpaceRef};
pub use sidecar::{CacheSidecar, SnapshotSidecar};

declare_strongly_typed_string! {
    /// A harness identifier, e.g. `claude`.
    pub struct HarnessId => &HarnessIdRef;
}

#[test]
fn emit_lock_file_schema() {
    let schema = schemars::schema_for!(lock::LockFile);
    let json_schema = serde_json::to_string_pretty(&schema).unwrap();
    insta::assert_snapshot!(json_schema);
}
