//! Workspace configuration stored at `.promptree/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::policy::{AnyOf, Deadline, MaxSteps, ScoreThreshold};
use crate::io::process::CommandLimits;

/// Directory holding a workspace's config and tree.
pub const STATE_DIR: &str = ".promptree";

pub fn config_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("config.toml")
}

/// `promptree` configuration (TOML).
///
/// Edited by hand; every field has a default so partial files load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptreeConfig {
    /// Wall-clock limit for each external command, in seconds.
    pub step_timeout_secs: u64,

    /// Captured stdout/stderr limit per command.
    pub output_limit_bytes: usize,

    /// Executes candidate prompts.
    pub model: CommandConfig,

    /// Scores outputs for the `judge` evaluator. Falls back to `model`.
    pub judge: CommandConfig,

    /// Proposes improved prompts. Falls back to `model`.
    pub optimizer: CommandConfig,

    pub stop: StopConfig,

    /// Optimization directives handed to the strategy on every step.
    pub directives: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    /// Program and arguments, e.g. `["llm-chat", "--json"]`.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StopConfig {
    pub max_steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_elapsed_secs: Option<u64>,
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            max_steps: 5,
            target_percentage: None,
            max_elapsed_secs: None,
        }
    }
}

impl Default for PromptreeConfig {
    fn default() -> Self {
        Self {
            step_timeout_secs: 5 * 60,
            output_limit_bytes: 200_000,
            model: CommandConfig::default(),
            judge: CommandConfig::default(),
            optimizer: CommandConfig::default(),
            stop: StopConfig::default(),
            directives: Vec::new(),
        }
    }
}

/// Which collaborator a command is resolved for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRole {
    Model,
    Judge,
    Optimizer,
}

impl CommandRole {
    fn key(self) -> &'static str {
        match self {
            CommandRole::Model => "model",
            CommandRole::Judge => "judge",
            CommandRole::Optimizer => "optimizer",
        }
    }
}

impl PromptreeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.step_timeout_secs == 0 {
            bail!("step_timeout_secs must be > 0");
        }
        if self.output_limit_bytes == 0 {
            bail!("output_limit_bytes must be > 0");
        }
        for (key, section) in [
            ("model", &self.model),
            ("judge", &self.judge),
            ("optimizer", &self.optimizer),
        ] {
            if section
                .command
                .first()
                .is_some_and(|program| program.trim().is_empty())
            {
                bail!("{key}.command must not start with an empty program");
            }
        }
        if self.stop.max_steps == 0 {
            bail!("stop.max_steps must be > 0");
        }
        if let Some(target) = self.stop.target_percentage
            && !(target.is_finite() && target > 0.0 && target <= 100.0)
        {
            bail!("stop.target_percentage must be in (0, 100], got {target}");
        }
        if self.stop.max_elapsed_secs == Some(0) {
            bail!("stop.max_elapsed_secs must be > 0");
        }
        Ok(())
    }

    pub fn limits(&self) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(self.step_timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }

    /// Command for `role`; judge and optimizer fall back to the model command.
    pub fn command_for(&self, role: CommandRole) -> Result<Vec<String>> {
        let own = match role {
            CommandRole::Model => &self.model,
            CommandRole::Judge => &self.judge,
            CommandRole::Optimizer => &self.optimizer,
        };
        let command = if own.command.is_empty() {
            &self.model.command
        } else {
            &own.command
        };
        if command.is_empty() {
            return Err(anyhow!(
                "no command configured for {} (set {}.command or model.command)",
                role.key(),
                role.key()
            ));
        }
        Ok(command.clone())
    }

    /// Stop policy for `promptree run`; `max_steps` overrides `stop.max_steps`.
    pub fn stop_policy(&self, max_steps: Option<u32>) -> AnyOf {
        let mut policy = AnyOf::new().with(MaxSteps::new(max_steps.unwrap_or(self.stop.max_steps)));
        if let Some(target) = self.stop.target_percentage {
            policy = policy.with(ScoreThreshold::new(target));
        }
        if let Some(secs) = self.stop.max_elapsed_secs {
            policy = policy.with(Deadline::after(Duration::from_secs(secs)));
        }
        policy
    }
}

/// Load config from `path`, or defaults when the file does not exist.
pub fn load_config(path: &Path) -> Result<PromptreeConfig> {
    if !path.exists() {
        let cfg = PromptreeConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PromptreeConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Write config to disk atomically (temp file + rename).
pub fn write_config(path: &Path, cfg: &PromptreeConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path has no parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::StopCondition;
    use crate::core::tree::IterationTree;
    use crate::test_support::scored_candidate;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, PromptreeConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = config_path(temp.path());
        let mut cfg = PromptreeConfig::default();
        cfg.model.command = vec!["chat".to_string(), "--json".to_string()];
        cfg.stop.target_percentage = Some(90.0);
        cfg.directives = vec!["keep it short".to_string()];
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[stop]\nmax_steps = 9\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.stop.max_steps, 9);
        assert_eq!(cfg.step_timeout_secs, 300);
    }

    #[test]
    fn rejects_unusable_values() {
        let mut cfg = PromptreeConfig::default();
        cfg.stop.target_percentage = Some(120.0);
        assert!(cfg.validate().is_err());

        let mut cfg = PromptreeConfig::default();
        cfg.step_timeout_secs = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PromptreeConfig::default();
        cfg.judge.command = vec![String::new()];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn judge_and_optimizer_fall_back_to_model() {
        let mut cfg = PromptreeConfig::default();
        assert!(cfg.command_for(CommandRole::Judge).is_err());

        cfg.model.command = vec!["chat".to_string()];
        cfg.optimizer.command = vec!["optimize".to_string()];
        assert_eq!(cfg.command_for(CommandRole::Judge).expect("judge"), vec!["chat"]);
        assert_eq!(
            cfg.command_for(CommandRole::Optimizer).expect("optimizer"),
            vec!["optimize"]
        );
    }

    #[test]
    fn stop_policy_combines_configured_conditions() {
        let mut cfg = PromptreeConfig::default();
        cfg.stop.target_percentage = Some(75.0);
        let node = IterationTree::new(scored_candidate(8.0, 10.0)).root();

        let mut policy = cfg.stop_policy(Some(10));
        assert!(policy.should_stop(&node));

        let low = IterationTree::new(scored_candidate(1.0, 10.0)).root();
        let mut policy = cfg.stop_policy(Some(2));
        assert!(!policy.should_stop(&low));
        assert!(policy.should_stop(&low));
    }
}
