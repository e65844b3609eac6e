//! Strongly-typed identifiers: space ids, commit shas, and content integrities.

use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The `dev` commit sentinel: a space resolved against the project's on-disk
/// `spaces/<id>/` directory rather than a registry commit.
pub const DEV_COMMIT: &str = "dev";

/// The integrity value reserved for the `dev` sentinel; dev snapshots are
/// never stored, so this is never a real hash.
pub const DEV_INTEGRITY: &str = "sha256:dev";

/// Errors constructing or parsing the id-like types in this module.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum IdParseError {
    /// A space id did not match `^[a-z0-9]+(-[a-z0-9]+)*$`
    #[error("invalid space id {given:?}: must be kebab-case (lowercase alphanumerics and hyphens)")]
    InvalidSpaceId {
        /// The string that failed to parse
        given: String,
    },
    /// A commit sha was not 40 lowercase hex chars and not a known sentinel
    #[error("invalid commit sha {given:?}: must be 40 lowercase hex chars, or `dev`")]
    InvalidCommitSha {
        /// The string that failed to parse
        given: String,
    },
    /// An integrity string did not match `sha256:<64-hex>` or the dev sentinel
    #[error("invalid integrity {given:?}: must be `sha256:<64-hex>` or `sha256:dev`")]
    InvalidIntegrity {
        /// The string that failed to parse
        given: String,
    },
}

fn is_kebab_segment(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Validate a space id against `^[a-z0-9]+(-[a-z0-9]+)*$`.
pub fn is_valid_space_id(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    s.split('-').all(is_kebab_segment)
}

/// A kebab-case identifier for a space, matching `^[a-z0-9]+(-[a-z0-9]+)*$`.
#[derive(Clone, Hash, PartialEq, Eq, Ord, PartialOrd, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct SpaceId(String);

impl SpaceId {
    /// Parse a space id, validating the kebab-case grammar.
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdParseError> {
        let raw = raw.into();
        if is_valid_space_id(&raw) {
            Ok(Self(raw))
        } else {
            Err(IdParseError::InvalidSpaceId { given: raw })
        }
    }

    /// View as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SpaceId {
    type Err = IdParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SpaceId {
    type Error = IdParseError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<SpaceId> for String {
    fn from(id: SpaceId) -> String {
        id.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpaceId({:?})", self.0)
    }
}

impl AsRef<str> for SpaceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

/// A 40-hex-character lowercase commit sha, or one of the reserved sentinels:
/// `dev` (filesystem-backed, mutable).
#[derive(Clone, Hash, PartialEq, Eq, Ord, PartialOrd, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct CommitSha(String);

impl CommitSha {
    /// Parse a full 40-hex commit sha, or the `dev` sentinel.
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdParseError> {
        let raw = raw.into();
        if raw == DEV_COMMIT || (raw.len() == 40 && is_hex(&raw)) {
            Ok(Self(raw))
        } else {
            Err(IdParseError::InvalidCommitSha { given: raw })
        }
    }

    /// The `dev` sentinel commit.
    pub fn dev() -> Self {
        Self(DEV_COMMIT.to_string())
    }

    /// True if this is the `dev` sentinel.
    pub fn is_dev(&self) -> bool {
        self.0 == DEV_COMMIT
    }

    /// View as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first 12 hex characters, used to build `SpaceKey`s.
    ///
    /// Panics if called on the `dev` sentinel; callers should check
    /// [`CommitSha::is_dev`] first.
    pub fn short(&self) -> &str {
        assert!(!self.is_dev(), "dev commits have no short form");
        &self.0[..12]
    }
}

impl FromStr for CommitSha {
    type Err = IdParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CommitSha {
    type Error = IdParseError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<CommitSha> for String {
    fn from(c: CommitSha) -> String {
        c.0
    }
}

impl fmt::Display for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CommitSha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommitSha({:?})", self.0)
    }
}

/// A `sha256:<64-hex>` content integrity, or the reserved `sha256:dev` literal.
#[derive(Clone, Hash, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Integrity(String);

impl Sha256Integrity {
    const PREFIX: &'static str = "sha256:";

    /// Parse a `sha256:<64-hex>` string, or the dev sentinel.
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdParseError> {
        let raw = raw.into();
        let Some(rest) = raw.strip_prefix(Self::PREFIX) else {
            return Err(IdParseError::InvalidIntegrity { given: raw });
        };
        if rest == "dev" || (rest.len() == 64 && is_hex(rest)) {
            Ok(Self(raw))
        } else {
            Err(IdParseError::InvalidIntegrity { given: raw })
        }
    }

    /// Build a `Sha256Integrity` from a raw 32-byte digest.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        let mut hex = String::with_capacity(64 + Self::PREFIX.len());
        hex.push_str(Self::PREFIX);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Self(hex)
    }

    /// The sentinel integrity for `dev` spaces, which are never snapshotted.
    pub fn dev() -> Self {
        Self(DEV_INTEGRITY.to_string())
    }

    /// True if this is the `dev` sentinel.
    pub fn is_dev(&self) -> bool {
        self.0 == DEV_INTEGRITY
    }

    /// View as a string slice, including the `sha256:` prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The bare hex digest, without the `sha256:` prefix. Used to build
    /// store/cache directory names.
    pub fn hex(&self) -> &str {
        &self.0[Self::PREFIX.len()..]
    }
}

impl FromStr for Sha256Integrity {
    type Err = IdParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Sha256Integrity {
    type Error = IdParseError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<Sha256Integrity> for String {
    fn from(i: Sha256Integrity) -> String {
        i.0
    }
}

impl fmt::Display for Sha256Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Sha256Integrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sha256Integrity({:?})", self.0)
    }
}

/// A map key identifying a resolved space: `<SpaceId>@<first-12-of-commit>`,
/// or `<SpaceId>@dev` for dev refs.
#[derive(Clone, Hash, PartialEq, Eq, Ord, PartialOrd, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SpaceKey(String);

impl SpaceKey {
    /// Build a `SpaceKey` from a space id and a resolved commit.
    pub fn new(id: &SpaceId, commit: &CommitSha) -> Self {
        let suffix = if commit.is_dev() {
            DEV_COMMIT.to_string()
        } else {
            commit.short().to_string()
        };
        Self(format!("{id}@{suffix}"))
    }

    /// View as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpaceKey({:?})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn space_id_accepts_kebab_case() {
        assert!(SpaceId::parse("base").is_ok());
        assert!(SpaceId::parse("my-toolkit-2").is_ok());
        assert!(SpaceId::parse("Bad").is_err());
        assert!(SpaceId::parse("bad_id").is_err());
        assert!(SpaceId::parse("-bad").is_err());
        assert!(SpaceId::parse("").is_err());
    }

    #[test]
    fn commit_sha_accepts_40_hex_or_dev() {
        let sha = "a".repeat(40);
        assert!(CommitSha::parse(sha.clone()).is_ok());
        assert!(CommitSha::parse("dev").is_ok());
        assert!(CommitSha::parse("A".repeat(40)).is_err());
        assert!(CommitSha::parse("a".repeat(39)).is_err());
    }

    #[test]
    fn space_key_uses_short_commit_or_dev() {
        let id = SpaceId::parse("base").unwrap();
        let commit = CommitSha::parse("a".repeat(40)).unwrap();
        assert_eq!(SpaceKey::new(&id, &commit).as_str(), "base@aaaaaaaaaaaa");

        let dev = CommitSha::dev();
        assert_eq!(SpaceKey::new(&id, &dev).as_str(), "base@dev");
    }

    #[test]
    fn integrity_roundtrips() {
        let digest = [0u8; 32];
        let i = Sha256Integrity::from_digest(digest);
        assert_eq!(i.hex(), "0".repeat(64));
        assert!(i.as_str().starts_with("sha256:"));
        assert!(!i.is_dev());
        assert!(Sha256Integrity::dev().is_dev());
    }
}
