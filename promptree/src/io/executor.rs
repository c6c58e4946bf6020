//! Prompt execution seam.
//!
//! [`PromptExecutor`] turns prompt messages into the model's output messages.
//! The driver, the judge evaluator and the optimizer strategy all go through
//! it; tests substitute scripted executors that never spawn processes.

use std::process::Command;

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandLimits, run_with_limits};
use crate::message::Message;

/// Runs a prompt against a model.
pub trait PromptExecutor: Send + Sync {
    fn execute(&self, prompt: &[Message]) -> Result<Vec<Message>>;
}

impl<E: PromptExecutor + ?Sized> PromptExecutor for &E {
    fn execute(&self, prompt: &[Message]) -> Result<Vec<Message>> {
        (**self).execute(prompt)
    }
}

/// Executes prompts through an external command.
///
/// The prompt is written to the command's stdin as a JSON array of
/// `{"role", "content"}` objects; whatever it prints on stdout becomes a
/// single assistant message.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    argv: Vec<String>,
    limits: CommandLimits,
}

impl CommandExecutor {
    pub fn new(argv: Vec<String>, limits: CommandLimits) -> Result<Self> {
        match argv.first() {
            Some(program) if !program.trim().is_empty() => Ok(Self { argv, limits }),
            _ => Err(anyhow!("command must be a non-empty array")),
        }
    }
}

impl PromptExecutor for CommandExecutor {
    #[instrument(skip_all, fields(program = %self.argv[0], messages = prompt.len()))]
    fn execute(&self, prompt: &[Message]) -> Result<Vec<Message>> {
        let payload = serde_json::to_vec(prompt).context("serialize prompt messages")?;
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..]);

        info!("executing prompt");
        let output = run_with_limits(cmd, Some(payload), self.limits)
            .with_context(|| format!("run {}", self.argv.join(" ")))?;

        if output.timed_out {
            bail!(
                "{} timed out after {:?}",
                self.argv[0],
                self.limits.timeout
            );
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "prompt command failed");
            bail!(
                "{} exited with status {:?}: {}",
                self.argv[0],
                output.status.code(),
                output.stderr_tail()
            );
        }
        if output.stdout_dropped > 0 {
            bail!(
                "{} reply exceeded {} bytes",
                self.argv[0],
                self.limits.output_limit_bytes
            );
        }

        let reply = String::from_utf8(output.stdout).context("reply is not valid UTF-8")?;
        debug!(bytes = reply.len(), "prompt reply received");
        Ok(vec![Message::assistant(reply.trim_end())])
    }
}
