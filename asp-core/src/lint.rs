//! The Linter: warning-only rules over a target's materialized plugin set.
//! Never fatal — every function here returns `Vec<Warning>`, and the
//! orchestrator always proceeds regardless of what comes back.

use std::collections::BTreeMap;

use asp_schema::{Warning, WarningSeverity};
use serde_json::Value;

use crate::harness::ClaudeAdapter;
use crate::materialize::{hook_commands_missing_plugin_root, MaterializedSpace};

/// Run every lint rule over a target's materialized spaces, in load order.
pub fn lint_target(spaces: &[&MaterializedSpace]) -> Vec<Warning> {
    let mut warnings = Vec::new();
    warnings.extend(command_collisions(spaces));
    warnings.extend(agent_command_namespace(spaces));
    warnings.extend(hook_path_hygiene(spaces));
    warnings.extend(invalid_hooks_config(spaces));
    warnings.extend(plugin_name_collisions(spaces));
    warnings.extend(invalid_plugin_structure(spaces));
    warnings
}

fn command_names(space: &MaterializedSpace) -> Vec<String> {
    if !space.linked_components.iter().any(|c| c == "commands") {
        return Vec::new();
    }
    let commands_dir = space.plugin_path.join("commands");
    let Ok(entries) = std::fs::read_dir(commands_dir.as_std_path()) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter_map(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.rsplit_once('.').map(|(stem, _)| stem.to_string())
        })
        .collect()
}

/// **W201**: multiple spaces in the same target contribute commands with
/// the same invocation name.
fn command_collisions(spaces: &[&MaterializedSpace]) -> Vec<Warning> {
    let mut by_name: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for space in spaces {
        for name in command_names(space) {
            by_name.entry(name).or_default().push(space.space_key.as_str());
        }
    }
    by_name
        .into_iter()
        .filter(|(_, owners)| owners.len() > 1)
        .map(|(name, owners)| {
            Warning::new(
                "W201",
                format!("command {name:?} is defined by multiple spaces: {}", owners.join(", ")),
                WarningSeverity::Warning,
            )
        })
        .collect()
}

/// **W202**: agent-facing command files that aren't namespaced under their
/// owning plugin's name risk colliding across an otherwise-unrelated
/// target composition.
fn agent_command_namespace(spaces: &[&MaterializedSpace]) -> Vec<Warning> {
    let mut warnings = Vec::new();
    for space in spaces {
        if !space.linked_components.iter().any(|c| c == "agents") {
            continue;
        }
        let agents_dir = space.plugin_path.join("agents");
        let Ok(entries) = std::fs::read_dir(agents_dir.as_std_path()) else { continue };
        let prefix = format!("{}-", space.plugin_name);
        for entry in entries.filter_map(|e| e.ok()) {
            let Ok(file_type) = entry.file_type() else { continue };
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.starts_with(&prefix) {
                warnings.push(
                    Warning::new(
                        "W202",
                        format!("agent command {name:?} in {} is not namespaced as {prefix:?}*", space.plugin_name),
                        WarningSeverity::Info,
                    )
                    .with_space(space.space_key.clone()),
                );
            }
        }
    }
    warnings
}

/// **W203**: a hook `command` omits the plugin-root placeholder while
/// referencing a plugin-relative path, or a hook `script` contains `..`.
fn hook_path_hygiene(spaces: &[&MaterializedSpace]) -> Vec<Warning> {
    let mut warnings = Vec::new();
    for space in spaces {
        let Some(hooks) = &space.hooks else { continue };
        for command in hook_commands_missing_plugin_root(hooks, ClaudeAdapter::PLUGIN_ROOT_VAR) {
            warnings.push(
                Warning::new("W203", format!("hook command {command:?} does not reference the plugin-root placeholder"), WarningSeverity::Warning)
                    .with_space(space.space_key.clone()),
            );
        }
        for script in scripts_with_parent_traversal(hooks) {
            warnings.push(
                Warning::new("W203", format!("hook script {script:?} contains `..`"), WarningSeverity::Warning)
                    .with_space(space.space_key.clone()),
            );
        }
    }
    warnings
}

fn scripts_with_parent_traversal(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                if key == "script" {
                    if let Value::String(s) = v {
                        if s.contains("..") {
                            out.push(s.clone());
                        }
                    }
                } else {
                    out.extend(scripts_with_parent_traversal(v));
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                out.extend(scripts_with_parent_traversal(item));
            }
        }
        _ => {}
    }
    out
}

/// **W204**: a space's hooks config exists but has an unexpected top-level
/// shape (must be an object of event name → binding or list of bindings).
fn invalid_hooks_config(spaces: &[&MaterializedSpace]) -> Vec<Warning> {
    spaces
        .iter()
        .filter_map(|space| {
            let hooks = space.hooks.as_ref()?;
            if hooks.is_object() {
                None
            } else {
                Some(
                    Warning::new("W204", "hooks config must be a table of event bindings", WarningSeverity::Warning)
                        .with_space(space.space_key.clone()),
                )
            }
        })
        .collect()
}

/// **W205**: multiple spaces derive the same materialized plugin name.
fn plugin_name_collisions(spaces: &[&MaterializedSpace]) -> Vec<Warning> {
    let mut by_name: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for space in spaces {
        by_name.entry(&space.plugin_name).or_default().push(space.space_key.as_str());
    }
    by_name
        .into_iter()
        .filter(|(_, owners)| owners.len() > 1)
        .map(|(name, owners)| {
            Warning::new("W205", format!("plugin name {name:?} is shared by multiple spaces: {}", owners.join(", ")), WarningSeverity::Warning)
        })
        .collect()
}

/// **W207**: a component directory was found nested inside the plugin
/// descriptor directory instead of at the plugin root.
fn invalid_plugin_structure(spaces: &[&MaterializedSpace]) -> Vec<Warning> {
    let mut warnings = Vec::new();
    for space in spaces {
        let descriptor_dir = space.plugin_path.join(".claude-plugin");
        if !descriptor_dir.is_dir() {
            continue;
        }
        for component in crate::materialize::COMPONENT_DIRS {
            if descriptor_dir.join(component).is_dir() {
                warnings.push(
                    Warning::new(
                        "W207",
                        format!("{component} is nested inside the plugin descriptor directory"),
                        WarningSeverity::Warning,
                    )
                    .with_space(space.space_key.clone()),
                );
            }
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use asp_schema::{CommitSha, SpaceId, SpaceKey};

    fn key(id: &str) -> SpaceKey {
        SpaceKey::new(&SpaceId::parse(id).unwrap(), &CommitSha::parse("a".repeat(40)).unwrap())
    }

    #[test]
    fn command_collisions_require_same_name_across_spaces() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

        let a_path = root.join("a");
        std::fs::create_dir_all(a_path.join("commands").as_std_path()).unwrap();
        std::fs::write(a_path.join("commands/build.md").as_std_path(), "x").unwrap();

        let b_path = root.join("b");
        std::fs::create_dir_all(b_path.join("commands").as_std_path()).unwrap();
        std::fs::write(b_path.join("commands/build.md").as_std_path(), "y").unwrap();

        let a = MaterializedSpace {
            space_key: key("a"),
            plugin_path: a_path,
            linked_components: vec!["commands".to_string()],
            plugin_name: "a".to_string(),
            mcp: None,
            settings: None,
            hooks: None,
        };
        let b = MaterializedSpace {
            space_key: key("b"),
            plugin_path: b_path,
            linked_components: vec!["commands".to_string()],
            plugin_name: "b".to_string(),
            mcp: None,
            settings: None,
            hooks: None,
        };

        let warnings = command_collisions(&[&a, &b]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "W201");
    }

    #[test]
    fn hook_path_hygiene_flags_missing_plugin_root_and_parent_traversal() {
        let space = MaterializedSpace {
            space_key: key("a"),
            plugin_path: camino::Utf8PathBuf::from("/tmp/a"),
            linked_components: vec![],
            plugin_name: "a".to_string(),
            mcp: None,
            settings: None,
            hooks: Some(serde_json::json!({
                "PreToolUse": [{"command": "./scripts/x.sh", "script": "../escape.sh"}],
            })),
        };
        let warnings = hook_path_hygiene(&[&space]);
        assert_eq!(warnings.iter().filter(|w| w.code == "W203").count(), 2);
    }

    #[test]
    fn invalid_hooks_config_flags_non_object_shape() {
        let space = MaterializedSpace {
            space_key: key("a"),
            plugin_path: camino::Utf8PathBuf::from("/tmp/a"),
            linked_components: vec![],
            plugin_name: "a".to_string(),
            mcp: None,
            settings: None,
            hooks: Some(serde_json::json!(["not", "a", "table"])),
        };
        let warnings = invalid_hooks_config(&[&space]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "W204");
    }
}
