// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::OrchestratorConfig;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/wfo/config.yaml"));
    paths.push(PathBuf::from("/etc/wfo/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/wfo/config.yaml"));
        paths.push(home.join(".config/wfo/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("wfo/config.yaml"));
        paths.push(cfg.join("wfo/config.yml"));
    }

    // 3. Workspace-local
    paths.push(PathBuf::from(".wfo/config.yaml"));
    paths.push(PathBuf::from(".wfo/config.yml"));
    paths.push(PathBuf::from(".wfo.yaml"));
    paths.push(PathBuf::from(".wfo.yml"));
    paths.push(PathBuf::from("wfo.yaml"));
    paths.push(PathBuf::from("wfo.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files, then the
/// environment-variable overlay (§6), then an optional explicit path
/// (e.g. `--config`, highest priority).
pub fn load(extra: Option<&Path>) -> anyhow::Result<OrchestratorConfig> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    let mut config: OrchestratorConfig =
        if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
            OrchestratorConfig::default()
        } else {
            serde_yaml::from_value(merged).unwrap_or_default()
        };

    crate::apply_env_overrides(&mut config);
    Ok(config)
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        let src = val("x: 2");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        let src = val("b: 99");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("workflows:\n  builder:\n    system_prompt: a.md\n    default_persistent: false");
        let src = val("workflows:\n  builder:\n    default_persistent: true");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["workflows"]["builder"]["system_prompt"].as_str(), Some("a.md"));
        assert_eq!(dst["workflows"]["builder"]["default_persistent"].as_bool(), Some(true));
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/wfo_nonexistent_config_xyz.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_with_no_extra_path_returns_defaults() {
        let cfg = load(None).unwrap();
        assert_eq!(cfg.max_concurrent_runs, 16);
        assert!(cfg.auto_commit_enabled);
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "max_concurrent_runs: 4\nworkspace_root: /srv/wfo").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.max_concurrent_runs, 4);
        assert_eq!(cfg.workspace_root, "/srv/wfo");
    }
}
