//! Rendering of the judge and optimizer prompts.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::candidate::Candidate;
use crate::core::evaluation::Evaluation;
use crate::message::Message;

const JUDGE_TEMPLATE: &str = include_str!("prompts/judge.md");
const OPTIMIZER_TEMPLATE: &str = include_str!("prompts/optimizer.md");

#[derive(Debug, Serialize)]
struct UnitContext<'a> {
    input: &'a str,
    target: &'a str,
}

#[derive(Debug, Serialize)]
struct CriterionContext<'a> {
    label: &'a str,
    cap: String,
    score: String,
    rationale: &'a str,
    units: Vec<UnitContext<'a>>,
}

impl<'a> CriterionContext<'a> {
    fn from_evaluation(evaluation: &'a Evaluation) -> Self {
        Self {
            label: if evaluation.criterion().is_empty() {
                evaluation.id()
            } else {
                evaluation.criterion()
            },
            cap: evaluation.score_cap().to_string(),
            score: evaluation.obtained_score().to_string(),
            rationale: evaluation.rationale(),
            units: evaluation
                .units()
                .map(|unit| UnitContext {
                    input: unit.input(),
                    target: unit.target(),
                })
                .collect(),
        }
    }
}

fn engine() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("judge", JUDGE_TEMPLATE)
        .context("parse judge template")?;
    env.add_template("optimizer", OPTIMIZER_TEMPLATE)
        .context("parse optimizer template")?;
    Ok(env)
}

/// Prompt asking a judge model to grade `output` on one criterion.
pub fn render_judge(
    evaluation: &Evaluation,
    prompt: &[Message],
    output: &[Message],
) -> Result<String> {
    let env = engine()?;
    let rendered = env.get_template("judge")?.render(context! {
        criterion => CriterionContext::from_evaluation(evaluation),
        prompt => prompt,
        output => output,
    })?;
    Ok(rendered)
}

/// Prompt asking an optimizer model to rewrite the candidate's prompt.
pub fn render_optimizer(candidate: &Candidate, directives: &[String]) -> Result<String> {
    let env = engine()?;
    let criteria: Vec<CriterionContext<'_>> = candidate
        .tasks()
        .map(|task| CriterionContext::from_evaluation(task.evaluation()))
        .collect();
    let directives: Vec<&str> = directives
        .iter()
        .map(|directive| directive.trim())
        .filter(|directive| !directive.is_empty())
        .collect();
    let rendered = env.get_template("optimizer")?.render(context! {
        prompt => candidate.prompt(),
        output => candidate.actual_output(),
        criteria => criteria,
        total => candidate.total_score().to_string(),
        cap => candidate.score_cap().to_string(),
        percentage => format!("{:.1}", candidate.percentage()),
        directives => directives,
    })?;
    Ok(rendered)
}
