//! Claude agent spawn configuration.

use std::path::PathBuf;

use crate::config::PermissionMode;
use crate::spawn::SpawnConfig;

/// Configuration options for one non-interactive Claude invocation.
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub binary_path: PathBuf,
    pub working_dir: PathBuf,
    pub prompt: String,
    pub resume_token: Option<String>,
    pub model: String,
    pub spend_ceiling: Option<String>,
    pub system_prompt: Option<String>,
    pub permission_mode: PermissionMode,
}

impl ClaudeConfig {
    /// Build a SpawnConfig for Claude CLI.
    ///
    /// The prompt is always the final positional argument.
    pub fn build(self) -> SpawnConfig {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
        ];

        if !self.model.is_empty() {
            args.push("--model".to_string());
            args.push(self.model);
        }

        args.push("--permission-mode".to_string());
        args.push(self.permission_mode.as_cli_arg().to_string());

        if let Some(token) = self.resume_token.filter(|t| !t.is_empty()) {
            args.push("--resume".to_string());
            args.push(token);
        }

        if let Some(ceiling) = self.spend_ceiling.filter(|c| !c.trim().is_empty()) {
            args.push("--max-budget-usd".to_string());
            args.push(ceiling.trim().to_string());
        }

        if let Some(prompt) = self.system_prompt.filter(|p| !p.trim().is_empty()) {
            args.push("--append-system-prompt".to_string());
            args.push(prompt);
        }

        // Keep a prompt starting with '-' from being read as a flag.
        args.push("--".to_string());
        args.push(self.prompt);

        SpawnConfig::new(self.binary_path, args).working_dir(self.working_dir)
    }
}
