//! Deterministic collaborators and fixtures for tests.
//!
//! Scripted doubles pop queued responses in call order and record what they
//! were called with. They are `Sync`, so they can back drivers running on
//! several threads.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::candidate::Candidate;
use crate::core::evaluation::Evaluation;
use crate::core::policy::IterationStrategy;
use crate::core::task::{EvaluationTask, Evaluator, Verdict};
use crate::core::unit::units_from_pairs;
use crate::io::executor::PromptExecutor;
use crate::message::{Message, Role, joined_content};

/// Always returns the same score.
#[derive(Debug, Clone, Copy)]
pub struct FixedScore {
    score: f64,
}

impl FixedScore {
    pub fn new(score: f64) -> Self {
        Self { score }
    }
}

impl Evaluator for FixedScore {
    fn name(&self) -> &str {
        "fixed"
    }

    fn evaluate(&self, _: &Evaluation, _: &[Message], _: &[Message]) -> Result<Verdict> {
        Ok(Verdict::new(self.score, format!("fixed score {}", self.score)))
    }
}

/// Always errors.
#[derive(Debug, Clone, Copy)]
pub struct FailingEvaluator;

impl Evaluator for FailingEvaluator {
    fn name(&self) -> &str {
        "failing"
    }

    fn evaluate(&self, _: &Evaluation, _: &[Message], _: &[Message]) -> Result<Verdict> {
        bail!("evaluator unavailable")
    }
}

/// Scores the last number found in the assistant output, so a scripted
/// executor's reply decides the score.
#[derive(Debug, Clone, Copy)]
pub struct EchoedScore;

impl Evaluator for EchoedScore {
    fn name(&self) -> &str {
        "echoed"
    }

    fn evaluate(&self, _: &Evaluation, _: &[Message], output: &[Message]) -> Result<Verdict> {
        let text = joined_content(output, Role::Assistant);
        let score = text
            .split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .filter(|token| !token.is_empty())
            .filter_map(|token| token.parse::<f64>().ok())
            .last()
            .ok_or_else(|| anyhow!("no score in output {text:?}"))?;
        Ok(Verdict::new(score, format!("echoed {score}")))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Evaluator returning queued scores; `Err` entries become evaluator errors.
pub struct ScriptedEvaluator {
    script: Mutex<VecDeque<Result<f64, String>>>,
}

impl ScriptedEvaluator {
    pub fn new(script: impl IntoIterator<Item = Result<f64, &'static str>>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|entry| entry.map_err(str::to_string))
                    .collect(),
            ),
        }
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

impl Evaluator for ScriptedEvaluator {
    fn name(&self) -> &str {
        "scripted"
    }

    fn evaluate(&self, _: &Evaluation, _: &[Message], _: &[Message]) -> Result<Verdict> {
        match lock(&self.script).pop_front() {
            Some(Ok(score)) => Ok(Verdict::new(score, format!("scripted {score}"))),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("evaluator script exhausted"),
        }
    }
}

/// Strategy returning queued prompt texts and recording each call.
pub struct ScriptedStrategy {
    script: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<StrategyCall>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StrategyCall {
    pub candidate_id: String,
    pub percentage: f64,
    pub directives: Vec<String>,
}

impl ScriptedStrategy {
    pub fn new<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            script: Mutex::new(texts.into_iter().map(|t| Ok(t.to_string())).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue a failure after the texts queued so far.
    pub fn then_fail(self, message: &str) -> Self {
        lock(&self.script).push_back(Err(message.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<StrategyCall> {
        lock(&self.calls).clone()
    }
}

impl IterationStrategy for ScriptedStrategy {
    fn generate_next(&self, candidate: &Candidate, directives: &[String]) -> Result<String> {
        lock(&self.calls).push(StrategyCall {
            candidate_id: candidate.id().to_string(),
            percentage: candidate.percentage(),
            directives: directives.to_vec(),
        });
        match lock(&self.script).pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow!(message)),
            None => bail!("strategy script exhausted"),
        }
    }
}

/// Executor returning queued replies as single assistant messages.
///
/// In echo mode, once the queue is empty it replies with the last user
/// message of the prompt.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<Vec<Message>>>,
    echo: bool,
}

impl ScriptedExecutor {
    pub fn new<'a>(replies: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| Ok(r.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
            echo: false,
        }
    }

    pub fn echo() -> Self {
        Self {
            echo: true,
            ..Self::new(Vec::<&str>::new())
        }
    }

    pub fn then_fail(self, message: &str) -> Self {
        lock(&self.script).push_back(Err(message.to_string()));
        self
    }

    /// Every prompt executed so far, in call order.
    pub fn prompts(&self) -> Vec<Vec<Message>> {
        lock(&self.prompts).clone()
    }
}

impl PromptExecutor for ScriptedExecutor {
    fn execute(&self, prompt: &[Message]) -> Result<Vec<Message>> {
        lock(&self.prompts).push(prompt.to_vec());
        let reply = match lock(&self.script).pop_front() {
            Some(Ok(reply)) => reply,
            Some(Err(message)) => bail!(message),
            None if self.echo => prompt
                .iter()
                .rev()
                .find(|message| message.role == Role::User)
                .map(|message| message.content.clone())
                .unwrap_or_default(),
            None => bail!("executor script exhausted"),
        };
        Ok(vec![Message::assistant(reply)])
    }
}

/// An unscored candidate with one `accuracy` criterion (cap 10).
pub fn candidate() -> Candidate {
    let evaluation = Evaluation::new(units_from_pairs(&["1+1=?", "2"]).expect("units"), 10.0)
        .expect("evaluation")
        .with_id("accuracy")
        .with_criterion("arithmetic answers are correct");
    Candidate::new(
        vec![Message::user("Answer the question.")],
        vec![Message::assistant("2")],
        [EvaluationTask::new(evaluation, Arc::new(FixedScore::new(0.0)))],
    )
}

/// A candidate already scored `total` out of `cap` on a single criterion.
pub fn scored_candidate(total: f64, cap: f64) -> Candidate {
    let evaluation = Evaluation::new(Default::default(), cap)
        .expect("evaluation")
        .with_id("score");
    let mut candidate = Candidate::new(
        vec![Message::user(format!("prompt scoring {total}"))],
        vec![Message::assistant(format!("{total}"))],
        [EvaluationTask::new(evaluation, Arc::new(FixedScore::new(total)))],
    );
    candidate.run_all_tasks().expect("score candidate");
    candidate
}

/// A root candidate whose single criterion is scored by [`EchoedScore`].
pub fn echoed_candidate(initial_output: &str, cap: f64) -> Candidate {
    let evaluation = Evaluation::new(Default::default(), cap)
        .expect("evaluation")
        .with_id("echoed")
        .with_criterion("score echoed by the model");
    let mut candidate = Candidate::new(
        vec![
            Message::system("You are a careful assistant."),
            Message::user("initial prompt"),
        ],
        vec![Message::assistant(initial_output)],
        [EvaluationTask::new(evaluation, Arc::new(EchoedScore))],
    );
    candidate.run_all_tasks().expect("score candidate");
    candidate
}

/// A temporary workspace containing `seed.toml` with the given contents.
pub fn workspace_with_seed(seed: &str) -> Result<TempDir> {
    let temp = tempfile::tempdir()?;
    write_file(&temp.path().join("seed.toml"), seed)?;
    Ok(temp)
}

pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
