//! `registry/dist-tags.json`: named channels mapping a space to a version.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// `{ spaceId: { channel: versionString } }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct DistTagsFile {
    /// Per-space channel maps.
    pub spaces: BTreeMap<String, BTreeMap<String, String>>,
}

impl DistTagsFile {
    /// Look up the version a channel points to for a space, if any.
    pub fn resolve(&self, space_id: &str, channel: &str) -> Option<&str> {
        self.spaces.get(space_id)?.get(channel).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_channel() {
        let json = r#"{"base": {"stable": "1.0.0"}}"#;
        let tags: DistTagsFile = serde_json::from_str(json).unwrap();
        assert_eq!(tags.resolve("base", "stable"), Some("1.0.0"));
        assert_eq!(tags.resolve("base", "beta"), None);
        assert_eq!(tags.resolve("missing", "stable"), None);
    }
}
