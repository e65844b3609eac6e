//! Loading and validating the two manifest types: the per-project
//! `asp-targets.toml` and the per-space `space.toml`. The wire shapes
//! themselves live in `asp_schema`; this module is the orchestration layer
//! that finds the files on disk, parses them, and runs structural
//! validation before anything downstream (resolver, materializer) sees them.

use asp_schema::{ProjectManifest, SpaceManifest};
use camino::{Utf8Path, Utf8PathBuf};

use crate::errors::{AspError, AspResult};

/// The project manifest's canonical filename.
pub const PROJECT_MANIFEST_FILE: &str = "asp-targets.toml";

/// Load and validate `asp-targets.toml` from a project directory.
pub fn load_project_manifest(project_root: &Utf8Path) -> AspResult<ProjectManifest> {
    let path = project_root.join(PROJECT_MANIFEST_FILE);
    if !path.is_file() {
        return Err(AspError::NoProjectManifest { path });
    }
    let manifest = parse_project_manifest(&path)?;
    manifest.validate()?;
    Ok(manifest)
}

/// Parse an `asp-targets.toml` at an explicit path, without validating it.
pub fn parse_project_manifest(path: &Utf8Path) -> AspResult<ProjectManifest> {
    let raw = std::fs::read_to_string(path.as_std_path())?;
    toml::from_str(&raw).map_err(|source| AspError::ConfigParseToml { path: path.to_owned(), source })
}

/// Load and validate a `space.toml` at an explicit path (a registry blob's
/// contents, or a dev space's on-disk manifest).
pub fn parse_space_manifest(path: &Utf8Path, raw: &str) -> AspResult<SpaceManifest> {
    let manifest: SpaceManifest =
        toml::from_str(raw).map_err(|source| AspError::ConfigParseToml { path: path.to_owned(), source })?;
    for dep in &manifest.deps.spaces {
        // SpaceRef already validated its own id/selector grammar at parse
        // time; nothing further to check structurally here. Kept as an
        // explicit loop site so a future invariant (e.g. dedup) has a home.
        let _ = dep;
    }
    Ok(manifest)
}

/// Resolve `<aspHome>`: the `--asp-home` flag if given, else `$ASP_HOME`,
/// else `$HOME/.asp`.
pub fn resolve_asp_home(flag: Option<Utf8PathBuf>) -> AspResult<Utf8PathBuf> {
    if let Some(p) = flag {
        return Ok(p);
    }
    if let Ok(env) = std::env::var("ASP_HOME") {
        return Ok(Utf8PathBuf::from(env));
    }
    let home = std::env::var("HOME").map_err(|_| {
        AspError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "ASP_HOME is unset and $HOME could not be determined",
        ))
    })?;
    Ok(Utf8PathBuf::from(home).join(".asp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_project_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::write(
            root.join(PROJECT_MANIFEST_FILE).as_std_path(),
            r#"
                schema = 1
                [targets.dev]
                compose = ["space:base@stable"]
            "#,
        )
        .unwrap();
        let manifest = load_project_manifest(&root).unwrap();
        assert_eq!(manifest.targets.len(), 1);
    }

    #[test]
    fn missing_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        assert!(matches!(load_project_manifest(&root), Err(AspError::NoProjectManifest { .. })));
    }

    #[test]
    fn rejects_structurally_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        std::fs::write(
            root.join(PROJECT_MANIFEST_FILE).as_std_path(),
            r#"
                schema = 1
                [targets.dev]
                compose = []
            "#,
        )
        .unwrap();
        assert!(matches!(load_project_manifest(&root), Err(AspError::ProjectManifestInvalid(_))));
    }
}
