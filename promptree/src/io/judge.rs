//! LLM-as-judge evaluator.

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::core::evaluation::Evaluation;
use crate::core::task::{Evaluator, Verdict};
use crate::io::executor::PromptExecutor;
use crate::io::prompt::render_judge;
use crate::message::{Message, Role, joined_content};

pub const JUDGE: &str = "judge";

/// Asks a model to grade the output on one criterion and parses its
/// `{"score": .., "rationale": ..}` reply.
pub struct JudgeEvaluator<E> {
    executor: E,
}

impl<E: PromptExecutor> JudgeEvaluator<E> {
    pub fn new(executor: E) -> Self {
        Self { executor }
    }
}

impl<E: PromptExecutor> Evaluator for JudgeEvaluator<E> {
    fn name(&self) -> &str {
        JUDGE
    }

    #[instrument(skip_all, fields(criterion_id = evaluation.id()))]
    fn evaluate(
        &self,
        evaluation: &Evaluation,
        prompt: &[Message],
        actual_output: &[Message],
    ) -> Result<Verdict> {
        let request = render_judge(evaluation, prompt, actual_output)?;
        let reply = self
            .executor
            .execute(&[Message::user(request)])
            .context("run judge")?;
        let verdict = parse_verdict(&joined_content(&reply, Role::Assistant))?;
        debug!(score = verdict.score, "judge verdict");
        Ok(verdict)
    }
}

/// Registered under the judge's name when no judge or model command is
/// configured. Trees with judge criteria still load; scoring them fails.
pub struct UnconfiguredJudge;

impl Evaluator for UnconfiguredJudge {
    fn name(&self) -> &str {
        JUDGE
    }

    fn evaluate(&self, evaluation: &Evaluation, _: &[Message], _: &[Message]) -> Result<Verdict> {
        bail!(
            "criterion {} needs a judge, but neither judge.command nor model.command is set",
            evaluation.id()
        )
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    score: f64,
    #[serde(default, alias = "reason")]
    rationale: String,
}

/// Parse a verdict, tolerating prose or code fences around the JSON object.
pub fn parse_verdict(reply: &str) -> Result<Verdict> {
    let trimmed = reply.trim();
    let raw: RawVerdict = match serde_json::from_str(trimmed) {
        Ok(raw) => raw,
        Err(_) => {
            let object = Regex::new(r"(?s)\{.*\}")?
                .find(trimmed)
                .ok_or_else(|| anyhow!("judge reply has no JSON object: {}", snippet(trimmed)))?;
            serde_json::from_str(object.as_str())
                .with_context(|| format!("unparseable judge verdict: {}", snippet(trimmed)))?
        }
    };
    Ok(Verdict::new(raw.score, raw.rationale.trim()))
}

fn snippet(text: &str) -> String {
    const LIMIT: usize = 120;
    match text.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
