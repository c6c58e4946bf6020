//! Grows one branch of an [`IterationTree`].
//!
//! Each step asks the strategy for a new prompt, executes it, scores a fresh
//! candidate built from the parent's criteria and attaches it as a child. A
//! step that fails anywhere attaches nothing. One [`IterationDriver::run`] call
//! yields a linear chain; branching is several runs from the same parent,
//! possibly on different threads.

use tracing::{debug, info, instrument};

use crate::core::error::{DriverError, StrategyFailed, TreeError};
use crate::core::policy::{IterationStrategy, StopCondition};
use crate::core::tree::{IterationNode, IterationTree};
use crate::io::executor::PromptExecutor;
use crate::message::{Message, Role};

pub struct IterationDriver<'t, E> {
    tree: &'t IterationTree,
    executor: E,
    directives: Vec<String>,
}

impl<'t, E: PromptExecutor> IterationDriver<'t, E> {
    pub fn new(tree: &'t IterationTree, executor: E) -> Self {
        Self {
            tree,
            executor,
            directives: Vec::new(),
        }
    }

    /// Directives handed to the strategy on every step.
    pub fn with_directives(mut self, directives: Vec<String>) -> Self {
        self.directives = directives;
        self
    }

    /// Step from `start` until `stop` fires; returns the last attached node.
    pub fn run<S, C>(
        &self,
        start: &str,
        strategy: &S,
        stop: &mut C,
    ) -> Result<IterationNode, DriverError>
    where
        S: IterationStrategy + ?Sized,
        C: StopCondition + ?Sized,
    {
        self.run_with(start, strategy, stop, |_| {})
    }

    /// [`run`](Self::run), calling `on_step` with each attached node.
    #[instrument(skip_all, fields(start = %start))]
    pub fn run_with<S, C, F>(
        &self,
        start: &str,
        strategy: &S,
        stop: &mut C,
        mut on_step: F,
    ) -> Result<IterationNode, DriverError>
    where
        S: IterationStrategy + ?Sized,
        C: StopCondition + ?Sized,
        F: FnMut(&IterationNode),
    {
        let mut current = start.to_string();
        let mut steps = 0u32;
        loop {
            let child = self.step(&current, strategy)?;
            steps += 1;
            on_step(&child);
            if stop.should_stop(&child) {
                info!(
                    steps,
                    version = child.version(),
                    percentage = child.value().percentage(),
                    "branch stopped"
                );
                return Ok(child);
            }
            current = child.version().to_string();
        }
    }

    /// One generate, execute, score, attach cycle from `from`.
    #[instrument(skip_all, fields(from = %from))]
    pub fn step<S>(&self, from: &str, strategy: &S) -> Result<IterationNode, DriverError>
    where
        S: IterationStrategy + ?Sized,
    {
        let parent = self
            .tree
            .node(from)
            .ok_or_else(|| TreeError::UnknownNode {
                version: from.to_string(),
            })?;
        let previous = parent.value();

        let text = strategy
            .generate_next(previous, &self.directives)
            .map_err(|source| StrategyFailed {
                version: from.to_string(),
                source,
            })?;
        let prompt = next_prompt(previous.prompt(), text);
        debug!(messages = prompt.len(), "prompt generated");

        let output = self
            .executor
            .execute(&prompt)
            .map_err(|source| DriverError::Execution {
                version: from.to_string(),
                source,
            })?;

        let mut candidate = previous.next_generation(prompt, output);
        candidate
            .run_all_tasks()
            .map_err(|source| DriverError::Scoring {
                version: from.to_string(),
                source,
            })?;

        let child = self.tree.attach_child(from, candidate)?;
        info!(
            version = child.version(),
            total = child.value().total_score(),
            cap = child.value().score_cap(),
            "step attached"
        );
        Ok(child)
    }
}

/// The previous prompt's system messages followed by the new text as a
/// user message.
fn next_prompt(previous: &[Message], text: String) -> Vec<Message> {
    previous
        .iter()
        .filter(|message| message.role == Role::System)
        .cloned()
        .chain(std::iter::once(Message::user(text)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::MaxSteps;
    use crate::test_support::{ScriptedExecutor, ScriptedStrategy, echoed_candidate};

    #[test]
    fn next_prompt_keeps_system_messages() {
        let previous = vec![
            Message::system("rules"),
            Message::user("old"),
            Message::assistant("example"),
        ];
        let prompt = next_prompt(&previous, "new".to_string());
        assert_eq!(prompt, vec![Message::system("rules"), Message::user("new")]);
    }

    #[test]
    fn step_attaches_scored_child() {
        let tree = IterationTree::with_root_version("root", echoed_candidate("score 2", 10.0));
        let executor = ScriptedExecutor::new(["score 7"]);
        let strategy = ScriptedStrategy::new(["try harder"]);
        let driver = IterationDriver::new(&tree, &executor);

        let child = driver.step("root", &strategy).expect("step");
        assert_eq!(child.parent(), Some("root"));
        assert_eq!(child.value().total_score(), 7.0);
        assert_eq!(
            child.value().prompt().last(),
            Some(&Message::user("try harder"))
        );
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn unknown_start_is_a_tree_error() {
        let tree = IterationTree::new(echoed_candidate("score 2", 10.0));
        let executor = ScriptedExecutor::echo();
        let strategy = ScriptedStrategy::new(["x"]);
        let err = IterationDriver::new(&tree, &executor)
            .run("missing", &strategy, &mut MaxSteps::new(1))
            .unwrap_err();
        assert!(matches!(err, DriverError::Tree(TreeError::UnknownNode { .. })));
        assert!(strategy.calls().is_empty());
    }

    #[test]
    fn directives_reach_the_strategy() {
        let tree = IterationTree::with_root_version("root", echoed_candidate("score 2", 10.0));
        let executor = ScriptedExecutor::echo();
        let strategy = ScriptedStrategy::new(["score 3"]);
        IterationDriver::new(&tree, &executor)
            .with_directives(vec!["be concise".to_string()])
            .step("root", &strategy)
            .expect("step");
        assert_eq!(strategy.calls()[0].directives, vec!["be concise"]);
    }
}
