//! Turn settings.
//!
//! The orchestrator reads model, spend ceiling, system prompt and permission
//! mode through [`SettingsProvider`]. [`Settings`] is the stock provider,
//! persisted as `settings.json` in the config directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::paths::AgentSearch;

/// Default model passed to the agent when none is configured.
pub const DEFAULT_MODEL: &str = "sonnet";

/// Policy controlling whether file edits need interactive approval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionMode {
    #[default]
    Default,
    Plan,
    #[serde(alias = "accept-edits")]
    AcceptEdits,
    #[serde(alias = "bypass-all")]
    BypassPermissions,
}

impl PermissionMode {
    /// Value for the agent's `--permission-mode` flag.
    pub fn as_cli_arg(self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::Plan => "plan",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }

    /// Whether create/edit tool calls must wait for the host's approval.
    pub fn requires_edit_approval(self) -> bool {
        matches!(self, PermissionMode::Default | PermissionMode::Plan)
    }
}

impl FromStr for PermissionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(PermissionMode::Default),
            "plan" => Ok(PermissionMode::Plan),
            "acceptEdits" | "accept-edits" => Ok(PermissionMode::AcceptEdits),
            "bypassPermissions" | "bypass-all" => Ok(PermissionMode::BypassPermissions),
            other => Err(format!("Unknown permission mode: {other}")),
        }
    }
}

/// Source of per-turn parameters.
pub trait SettingsProvider: Send + Sync {
    fn model(&self) -> String;
    fn spend_ceiling(&self) -> Option<String>;
    fn system_prompt(&self) -> Option<String>;
    fn permission_mode(&self) -> PermissionMode;

    /// Explicit path to the agent binary, checked before any search.
    fn agent_path(&self) -> Option<PathBuf> {
        None
    }

    /// Where to look for the agent when `agent_path` is unset or unusable.
    fn agent_search(&self) -> AgentSearch {
        AgentSearch::from_env()
    }

    /// Directory for per-turn protocol transcripts.
    fn log_dir(&self) -> Option<PathBuf> {
        None
    }
}

/// Application settings as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub spend_ceiling: Option<String>,

    #[serde(default)]
    pub system_prompt: Option<String>,

    #[serde(default)]
    pub permission_mode: PermissionMode,

    #[serde(default)]
    pub agent_path: Option<PathBuf>,

    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: default_model(),
            spend_ceiling: None,
            system_prompt: None,
            permission_mode: PermissionMode::Default,
            agent_path: None,
            log_dir: None,
        }
    }
}

impl Settings {
    pub const FILE_NAME: &'static str = "settings.json";

    /// Load settings from `{dir}/settings.json`, or defaults if absent.
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let path = dir.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save settings atomically (write temp file, then rename).
    pub fn save(&self, dir: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);
        let temp_path = dir.join(format!("{}.tmp", Self::FILE_NAME));
        fs::write(&temp_path, serde_json::to_string_pretty(self)?)?;
        fs::rename(&temp_path, &path)?;
        Ok(())
    }
}

impl SettingsProvider for Settings {
    fn model(&self) -> String {
        self.model.clone()
    }

    fn spend_ceiling(&self) -> Option<String> {
        self.spend_ceiling.clone()
    }

    fn system_prompt(&self) -> Option<String> {
        self.system_prompt.clone()
    }

    fn permission_mode(&self) -> PermissionMode {
        self.permission_mode
    }

    fn agent_path(&self) -> Option<PathBuf> {
        self.agent_path.clone()
    }

    fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    mod permission_mode {
        use super::*;

        #[test]
        fn cli_args() {
            assert_eq!(PermissionMode::Default.as_cli_arg(), "default");
            assert_eq!(PermissionMode::Plan.as_cli_arg(), "plan");
            assert_eq!(PermissionMode::AcceptEdits.as_cli_arg(), "acceptEdits");
            assert_eq!(PermissionMode::BypassPermissions.as_cli_arg(), "bypassPermissions");
        }

        #[test]
        fn parses_aliases() {
            assert_eq!("accept-edits".parse(), Ok(PermissionMode::AcceptEdits));
            assert_eq!("bypass-all".parse(), Ok(PermissionMode::BypassPermissions));
            assert_eq!("plan".parse(), Ok(PermissionMode::Plan));
            assert!("yolo".parse::<PermissionMode>().is_err());
        }

        #[test]
        fn deserializes_aliases() {
            let mode: PermissionMode = serde_json::from_str("\"bypass-all\"").unwrap();
            assert_eq!(mode, PermissionMode::BypassPermissions);
        }
    }

    mod settings_file {
        use super::*;

        #[test]
        fn missing_file_yields_defaults() {
            let dir = tempdir().unwrap();
            let settings = Settings::load(dir.path()).unwrap();
            assert_eq!(settings, Settings::default());
            assert_eq!(settings.model, "sonnet");
        }

        #[test]
        fn save_then_load() {
            let dir = tempdir().unwrap();
            let settings = Settings {
                model: "opus".to_string(),
                spend_ceiling: Some("2.00".to_string()),
                permission_mode: PermissionMode::AcceptEdits,
                ..Settings::default()
            };
            settings.save(dir.path()).unwrap();

            assert!(!dir.path().join("settings.json.tmp").exists());
            assert_eq!(Settings::load(dir.path()).unwrap(), settings);
        }

        #[test]
        fn partial_file_fills_defaults() {
            let dir = tempdir().unwrap();
            fs::write(dir.path().join("settings.json"), r#"{"permissionMode":"plan"}"#).unwrap();
            let settings = Settings::load(dir.path()).unwrap();
            assert_eq!(settings.model, "sonnet");
            assert_eq!(settings.permission_mode, PermissionMode::Plan);
        }
    }
}
