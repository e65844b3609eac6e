//! Materialization: turning a resolved space's snapshot (or, for `dev`
//! spaces, its project-filesystem path) into a plugin directory, plus
//! target-level composition of MCP server configs and settings across a
//! target's full load order.

use std::collections::BTreeMap;

use asp_schema::{SpaceKey, SpaceManifest};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;

use crate::errors::AspResult;
use crate::fs as aspfs;
use crate::harness::HarnessAdapter;

/// Component directories that, when present in a snapshot, get linked
/// straight into the plugin root (never nested under the descriptor dir).
pub const COMPONENT_DIRS: &[&str] = &["commands", "skills", "agents", "hooks", "scripts", "mcp"];

/// What a single space contributed to its target after materialization.
pub struct MaterializedSpace {
    /// The space this was materialized from.
    pub space_key: SpaceKey,
    /// Where its plugin tree landed (a cache entry, or a dev rebuild path).
    pub plugin_path: Utf8PathBuf,
    /// Which of [`COMPONENT_DIRS`] were actually present and linked.
    pub linked_components: Vec<String>,
    /// This space's materialized plugin name (for collision detection).
    pub plugin_name: String,
    /// This space's `mcp/mcp.json` contents, if present.
    pub mcp: Option<Value>,
    /// This space's manifest `settings`, if present.
    pub settings: Option<Value>,
    /// This space's canonical (pre-translation) hooks config, if present.
    pub hooks: Option<Value>,
}

#[derive(Serialize)]
struct PluginDescriptor<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// Build a single space's plugin tree at `dest_plugin_dir`: link its
/// component directories, write the descriptor, and translate its hook
/// config through `adapter`. `source_dir` is either an extracted snapshot
/// or (for `dev` spaces) the project's own `spaces/<id>/` directory.
pub fn materialize_space(
    adapter: &dyn HarnessAdapter,
    space_key: &SpaceKey,
    manifest: &SpaceManifest,
    source_dir: &Utf8Path,
    dest_plugin_dir: &Utf8Path,
) -> AspResult<MaterializedSpace> {
    std::fs::create_dir_all(dest_plugin_dir.as_std_path())?;

    let mut linked_components = Vec::new();
    for component in COMPONENT_DIRS {
        let src = source_dir.join(component);
        if src.is_dir() {
            aspfs::link_or_copy_tree(&src, &dest_plugin_dir.join(component))?;
            linked_components.push((*component).to_string());
        }
    }

    let plugin_name = manifest.plugin_name();
    let plugin_version = manifest.plugin_version();
    let descriptor = PluginDescriptor {
        name: &plugin_name,
        version: plugin_version.as_deref(),
        description: manifest.description.as_deref(),
    };
    let descriptor_path = dest_plugin_dir.join(adapter.descriptor_path());
    aspfs::write_atomic(&descriptor_path, &serde_json::to_vec_pretty(&descriptor)?)?;

    let canonical_hooks = read_hooks(source_dir)?;
    if let Some(canonical_hooks) = &canonical_hooks {
        let translated = adapter.translate_hooks(canonical_hooks);
        let hooks_path = dest_plugin_dir.join(adapter.hooks_output_path());
        aspfs::write_atomic(&hooks_path, &serde_json::to_vec_pretty(&translated)?)?;
    }

    if let Some(canonical_permissions) = &manifest.permissions {
        let translated = adapter.translate_permissions(canonical_permissions);
        aspfs::write_atomic(&dest_plugin_dir.join("permissions.json"), &serde_json::to_vec_pretty(&translated)?)?;
    }

    let mcp = read_mcp(source_dir)?;

    Ok(MaterializedSpace {
        space_key: space_key.clone(),
        plugin_path: dest_plugin_dir.to_owned(),
        linked_components,
        plugin_name,
        mcp,
        settings: manifest.settings.clone(),
        hooks: canonical_hooks,
    })
}

/// Read `hooks/hooks.toml` (canonical) or, failing that, a legacy
/// `hooks/hooks.json` passed through as-is.
fn read_hooks(source_dir: &Utf8Path) -> AspResult<Option<Value>> {
    let toml_path = source_dir.join("hooks/hooks.toml");
    if toml_path.is_file() {
        let raw = std::fs::read_to_string(toml_path.as_std_path())?;
        let parsed: toml::Value = toml::from_str(&raw).map_err(|source| crate::errors::AspError::ConfigParseToml {
            path: toml_path,
            source,
        })?;
        return Ok(Some(serde_json::to_value(parsed)?));
    }
    let json_path = source_dir.join("hooks/hooks.json");
    if json_path.is_file() {
        let raw = std::fs::read_to_string(json_path.as_std_path())?;
        return Ok(Some(serde_json::from_str(&raw)?));
    }
    Ok(None)
}

fn read_mcp(source_dir: &Utf8Path) -> AspResult<Option<Value>> {
    let path = source_dir.join("mcp/mcp.json");
    if !path.is_file() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path.as_std_path())?;
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Hook commands referencing plugin-relative files must include the
/// harness's plugin-root placeholder; violations are lint warnings, never
/// materialization errors. Checked here over the canonical pre-translation
/// shape so it applies uniformly across harnesses.
pub fn hook_commands_missing_plugin_root(canonical_hooks: &Value, plugin_root_var: &str) -> Vec<String> {
    let mut offending = Vec::new();
    collect_hook_strings(canonical_hooks, &mut offending, plugin_root_var);
    offending
}

fn collect_hook_strings(value: &Value, offending: &mut Vec<String>, plugin_root_var: &str) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if (key == "command" || key == "script") && matches!(v, Value::String(_)) {
                    if let Value::String(s) = v {
                        let references_plugin_file = s.contains("./") || s.contains("../");
                        if references_plugin_file && !s.contains(plugin_root_var) {
                            offending.push(s.clone());
                        }
                    }
                } else {
                    collect_hook_strings(v, offending, plugin_root_var);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_hook_strings(item, offending, plugin_root_var);
            }
        }
        _ => {}
    }
}

/// Compose the `mcpServers` maps of every space in a target's load order:
/// later entries override earlier ones on key collision. Returns the
/// composed document (or `None` if no space contributed an `mcp.json`) and
/// the names of any colliding servers.
pub fn compose_mcp(spaces: &[&MaterializedSpace]) -> (Option<Value>, Vec<String>) {
    let mut servers: BTreeMap<String, Value> = BTreeMap::new();
    let mut collisions = Vec::new();
    let mut any = false;
    for space in spaces {
        let Some(mcp) = &space.mcp else { continue };
        any = true;
        let Some(Value::Object(map)) = mcp.get("mcpServers") else { continue };
        for (name, config) in map {
            if servers.contains_key(name) {
                collisions.push(name.clone());
            }
            servers.insert(name.clone(), config.clone());
        }
    }
    if !any {
        return (None, collisions);
    }
    let mut out = serde_json::Map::new();
    out.insert("mcpServers".to_string(), Value::Object(servers.into_iter().collect()));
    (Some(Value::Object(out)), collisions)
}

/// Compose `settings` across a target's load order: later-overrides-earlier
/// on scalar keys, deep-merge on maps, concatenate on arrays.
pub fn compose_settings(spaces: &[&MaterializedSpace]) -> Option<Value> {
    let mut acc: Option<Value> = None;
    for space in spaces {
        let Some(settings) = &space.settings else { continue };
        acc = Some(match acc {
            Some(existing) => deep_merge(existing, settings.clone()),
            None => settings.clone(),
        });
    }
    acc
}

fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (Value::Array(mut base_vec), Value::Array(overlay_vec)) => {
            base_vec.extend(overlay_vec);
            Value::Array(base_vec)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asp_schema::CommitSha;
    use asp_schema::SpaceId;

    fn key(id: &str) -> SpaceKey {
        SpaceKey::new(&SpaceId::parse(id).unwrap(), &CommitSha::parse("a".repeat(40)).unwrap())
    }

    fn space_with(mcp: Option<Value>, settings: Option<Value>) -> MaterializedSpace {
        MaterializedSpace {
            space_key: key("base"),
            plugin_path: Utf8PathBuf::from("/tmp/x"),
            linked_components: vec![],
            plugin_name: "base".to_string(),
            mcp,
            settings,
            hooks: None,
        }
    }

    #[test]
    fn compose_mcp_later_overrides_earlier_and_flags_collision() {
        let a = space_with(Some(serde_json::json!({"mcpServers": {"search": {"cmd": "a"}}})), None);
        let b = space_with(Some(serde_json::json!({"mcpServers": {"search": {"cmd": "b"}, "db": {"cmd": "c"}}})), None);
        let (composed, collisions) = compose_mcp(&[&a, &b]);
        let composed = composed.unwrap();
        assert_eq!(composed["mcpServers"]["search"]["cmd"], "b");
        assert_eq!(composed["mcpServers"]["db"]["cmd"], "c");
        assert_eq!(collisions, vec!["search".to_string()]);
    }

    #[test]
    fn compose_mcp_empty_when_no_space_has_one() {
        let a = space_with(None, None);
        let (composed, collisions) = compose_mcp(&[&a]);
        assert!(composed.is_none());
        assert!(collisions.is_empty());
    }

    #[test]
    fn compose_settings_deep_merges_maps_and_concatenates_arrays() {
        let a = space_with(None, Some(serde_json::json!({"env": {"A": "1"}, "tags": ["x"]})));
        let b = space_with(None, Some(serde_json::json!({"env": {"B": "2"}, "tags": ["y"]})));
        let composed = compose_settings(&[&a, &b]).unwrap();
        assert_eq!(composed["env"]["A"], "1");
        assert_eq!(composed["env"]["B"], "2");
        assert_eq!(composed["tags"], serde_json::json!(["x", "y"]));
    }

    #[test]
    fn compose_settings_scalars_later_overrides_earlier() {
        let a = space_with(None, Some(serde_json::json!({"theme": "light"})));
        let b = space_with(None, Some(serde_json::json!({"theme": "dark"})));
        let composed = compose_settings(&[&a, &b]).unwrap();
        assert_eq!(composed["theme"], "dark");
    }

    #[test]
    fn flags_hook_commands_missing_plugin_root() {
        let hooks = serde_json::json!({
            "PreToolUse": [{"command": "./scripts/check.sh"}],
            "PostToolUse": [{"command": "${CLAUDE_PLUGIN_ROOT}/scripts/ok.sh"}],
        });
        let offending = hook_commands_missing_plugin_root(&hooks, "${CLAUDE_PLUGIN_ROOT}");
        assert_eq!(offending, vec!["./scripts/check.sh".to_string()]);
    }
}
