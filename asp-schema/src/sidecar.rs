//! Sidecar metadata files written alongside store/cache content.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ids::{CommitSha, Sha256Integrity, SpaceId, SpaceKey};

/// `.asp-snapshot.json`, written alongside each `snapshots/<hex>/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SnapshotSidecar {
    /// The space this snapshot was extracted from.
    pub space_id: SpaceId,
    /// The commit it was extracted at.
    pub commit: CommitSha,
    /// This snapshot's content integrity (matches the directory name).
    pub integrity: Sha256Integrity,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// The registry-relative path this was extracted from, e.g. `spaces/base`.
    pub source_path: String,
}

/// `.asp-cache.json`, written alongside each `cache/<hex>/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CacheSidecar {
    /// The materialized plugin's name.
    pub plugin_name: String,
    /// The materialized plugin's version, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_version: Option<String>,
    /// The source snapshot's integrity.
    pub integrity: Sha256Integrity,
    /// This cache entry's key (matches the directory name).
    pub cache_key: String,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    /// The space key this was materialized from.
    pub space_key: SpaceKey,
}
