//! Model-backed iteration strategy.

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument};

use crate::core::candidate::Candidate;
use crate::core::policy::IterationStrategy;
use crate::io::executor::PromptExecutor;
use crate::io::prompt::render_optimizer;
use crate::message::{Message, Role, joined_content};

/// Shows a model the current prompt, its output and grades, and takes its
/// reply as the next prompt text.
pub struct OptimizerStrategy<E> {
    executor: E,
}

impl<E: PromptExecutor> OptimizerStrategy<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }
}

impl<E: PromptExecutor> IterationStrategy for OptimizerStrategy<E> {
    #[instrument(skip_all, fields(candidate_id = candidate.id(), directives = directives.len()))]
    fn generate_next(&self, candidate: &Candidate, directives: &[String]) -> Result<String> {
        let request = render_optimizer(candidate, directives)?;
        let reply = self
            .executor
            .execute(&[Message::user(request)])
            .context("run optimizer")?;
        let text = joined_content(&reply, Role::Assistant);
        let text = text.trim();
        if text.is_empty() {
            bail!("optimizer returned an empty prompt");
        }
        debug!(chars = text.len(), "optimizer proposed a prompt");
        Ok(text.to_string())
    }
}
