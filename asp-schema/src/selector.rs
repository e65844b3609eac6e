//! Space references: `space:<id>@<selector>`.
//!
//! This is the Ref Parser component: parsing `SpaceRef` strings and
//! classifying their selector. Resolving a `Selector` to a commit is the
//! registry's job (`asp-registry`), not this crate's.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{is_valid_space_id, IdParseError, SpaceId};

/// Errors parsing a `space:<id>@<selector>` string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RefParseError {
    /// Missing the `space:` discriminator prefix.
    #[error("ref {given:?} does not start with `space:`")]
    MissingPrefix {
        /// The offending string
        given: String,
    },
    /// Missing the `@<selector>` suffix.
    #[error("ref {given:?} is missing an `@<selector>` suffix")]
    MissingSelector {
        /// The offending string
        given: String,
    },
    /// The space id portion was invalid.
    #[error("ref {given:?} has an invalid space id")]
    InvalidId {
        /// The offending string
        given: String,
        /// The underlying id error
        #[source]
        source: IdParseError,
    },
    /// A `git:<hex>` selector didn't have enough hex digits to be unambiguous.
    #[error("git pin {given:?} must have at least 12 hex characters")]
    ShortGitPin {
        /// The offending string
        given: String,
    },
}

/// A selector: the right-hand side of a space reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Selector {
    /// A named channel, e.g. `stable`, `latest`, `beta`.
    DistTag {
        /// The channel name
        tag: String,
    },
    /// A semver version or range.
    Semver {
        /// The normalized version requirement string (without a leading `v`)
        range: String,
        /// True if `range` is an exact version rather than a range
        exact: bool,
    },
    /// A pinned git commit.
    GitPin {
        /// The (at least 12 hex char) commit prefix or full sha, lowercase
        sha: String,
    },
    /// The mutable, filesystem-backed dev space.
    Dev,
}

impl Selector {
    /// Classify and parse a raw selector string (the part after `@`).
    pub fn parse(raw: &str) -> Result<Self, RefParseError> {
        if raw == "dev" {
            return Ok(Selector::Dev);
        }
        if let Some(hex) = raw.strip_prefix("git:") {
            let hex = hex.to_lowercase();
            if hex.len() < 12 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(RefParseError::ShortGitPin { given: raw.to_string() });
            }
            return Ok(Selector::GitPin { sha: hex });
        }

        let normalized = raw.strip_prefix('v').unwrap_or(raw);
        if let Ok(version) = Version::parse(normalized) {
            return Ok(Selector::Semver {
                range: version.to_string(),
                exact: true,
            });
        }
        if VersionReq::parse(raw).is_ok() {
            return Ok(Selector::Semver {
                range: raw.to_string(),
                exact: false,
            });
        }

        Ok(Selector::DistTag { tag: raw.to_string() })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::DistTag { tag } => write!(f, "{tag}"),
            Selector::Semver { range, .. } => write!(f, "{range}"),
            Selector::GitPin { sha } => write!(f, "git:{sha}"),
            Selector::Dev => write!(f, "dev"),
        }
    }
}

/// A parsed `space:<id>@<selector>` reference, retaining the original string
/// it was parsed from (used for lock-file round-tripping and diagnostics).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SpaceRef {
    /// The referenced space id
    pub id: SpaceId,
    /// The classified selector
    pub selector: Selector,
    /// The exact string this was parsed from, e.g. `space:base@stable`
    pub original: String,
}

impl SpaceRef {
    /// Parse a `space:<id>@<selector>` string.
    pub fn parse(raw: &str) -> Result<Self, RefParseError> {
        let Some(rest) = raw.strip_prefix("space:") else {
            return Err(RefParseError::MissingPrefix { given: raw.to_string() });
        };
        let Some((id_str, selector_str)) = rest.split_once('@') else {
            return Err(RefParseError::MissingSelector { given: raw.to_string() });
        };
        if !is_valid_space_id(id_str) {
            return Err(RefParseError::InvalidId {
                given: raw.to_string(),
                source: IdParseError::InvalidSpaceId {
                    given: id_str.to_string(),
                },
            });
        }
        let id = SpaceId::parse(id_str).map_err(|source| RefParseError::InvalidId {
            given: raw.to_string(),
            source,
        })?;
        let selector = Selector::parse(selector_str)?;
        Ok(SpaceRef {
            id,
            selector,
            original: raw.to_string(),
        })
    }
}

impl FromStr for SpaceRef {
    type Err = RefParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SpaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space:{}@{}", self.id, self.selector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_dist_tag() {
        let r = SpaceRef::parse("space:base@stable").unwrap();
        assert_eq!(r.id.as_str(), "base");
        assert_eq!(r.selector, Selector::DistTag { tag: "stable".into() });
        assert_eq!(r.to_string(), "space:base@stable");
    }

    #[test]
    fn roundtrip_exact_semver() {
        let r = SpaceRef::parse("space:base@1.2.3").unwrap();
        assert_eq!(
            r.selector,
            Selector::Semver { range: "1.2.3".into(), exact: true }
        );

        let r2 = SpaceRef::parse("space:base@v1.2.3").unwrap();
        assert_eq!(
            r2.selector,
            Selector::Semver { range: "1.2.3".into(), exact: true }
        );
    }

    #[test]
    fn roundtrip_semver_range() {
        let r = SpaceRef::parse("space:base@^1.2").unwrap();
        match r.selector {
            Selector::Semver { exact, .. } => assert!(!exact),
            other => panic!("expected semver range, got {other:?}"),
        }
    }

    #[test]
    fn roundtrip_git_pin() {
        let sha = "a".repeat(12);
        let r = SpaceRef::parse(&format!("space:base@git:{sha}")).unwrap();
        assert_eq!(r.selector, Selector::GitPin { sha: sha.clone() });

        let short = format!("space:base@git:{}", "a".repeat(11));
        assert!(SpaceRef::parse(&short).is_err());
    }

    #[test]
    fn roundtrip_dev() {
        let r = SpaceRef::parse("space:base@dev").unwrap();
        assert_eq!(r.selector, Selector::Dev);
    }

    #[test]
    fn rejects_malformed_refs() {
        assert!(SpaceRef::parse("base@stable").is_err());
        assert!(SpaceRef::parse("space:base").is_err());
        assert!(SpaceRef::parse("space:Bad@stable").is_err());
    }
}
