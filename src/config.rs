use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::logging::DEFAULT_MAX_ENTRIES;

pub const DEFAULT_STATE_DIR: &str = ".safereview";
const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DiffToolChoice {
    #[default]
    Builtin,
    Git,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Directory for review state and the change log, relative to the workspace.
    pub state_dir: PathBuf,
    pub save_debounce_ms: u64,
    pub diff_tool: DiffToolChoice,
    /// Fall back to `git show HEAD:<path>` when no pre-edit snapshot exists.
    pub use_git_history: bool,
    pub log_changes: bool,
    pub max_log_entries: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            save_debounce_ms: 500,
            diff_tool: DiffToolChoice::Builtin,
            use_git_history: true,
            log_changes: true,
            max_log_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl ReviewConfig {
    /// Loads `<workspace>/.safereview/config.yaml`, or defaults when absent.
    pub fn load_for_workspace(root: &Path) -> Result<Self> {
        let path = root.join(DEFAULT_STATE_DIR).join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Reads a config file; `.json` is parsed as JSON, anything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).with_context(|| format!("reading config {}", path.display()))?;
        if path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
        {
            serde_json::from_slice(&data)
                .with_context(|| format!("parsing config {}", path.display()))
        } else {
            serde_yaml::from_slice(&data)
                .with_context(|| format!("parsing config {}", path.display()))
        }
    }

    pub fn state_dir_in(&self, root: &Path) -> PathBuf {
        if self.state_dir.is_absolute() {
            self.state_dir.clone()
        } else {
            root.join(&self.state_dir)
        }
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ReviewConfig::load_for_workspace(dir.path()).expect("config");
        assert_eq!(config, ReviewConfig::default());
        assert_eq!(config.save_debounce(), Duration::from_millis(500));
        assert_eq!(config.state_dir_in(dir.path()), dir.path().join(".safereview"));
    }

    #[test]
    fn yaml_overrides_only_given_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = dir.path().join(DEFAULT_STATE_DIR);
        fs::create_dir_all(&state).expect("mkdir");
        fs::write(
            state.join(CONFIG_FILE),
            "diff_tool: git\nsave_debounce_ms: 50\nlog_changes: false\n",
        )
        .expect("write");
        let config = ReviewConfig::load_for_workspace(dir.path()).expect("config");
        assert_eq!(config.diff_tool, DiffToolChoice::Git);
        assert_eq!(config.save_debounce_ms, 50);
        assert!(!config.log_changes);
        assert!(config.use_git_history);
    }

    #[test]
    fn json_config_is_supported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("review.json");
        fs::write(&path, r#"{"use_git_history": false, "state_dir": "/tmp/state"}"#)
            .expect("write");
        let config = ReviewConfig::load(&path).expect("config");
        assert!(!config.use_git_history);
        assert_eq!(config.state_dir_in(dir.path()), PathBuf::from("/tmp/state"));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "diff_tool: [nope").expect("write");
        assert!(ReviewConfig::load(&path).is_err());
    }
}
