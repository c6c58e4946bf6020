//! Static rule checker: scores by how many unit targets appear in the output.

use anyhow::Result;

use crate::core::evaluation::Evaluation;
use crate::core::task::{Evaluator, Verdict};
use crate::message::{Message, Role, joined_content};

pub const TARGET_MATCH: &str = "target_match";

/// Awards `cap * matched / units`, where a unit matches when its target
/// occurs in the assistant output (case-insensitive, whitespace-normalized).
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetMatchEvaluator;

impl Evaluator for TargetMatchEvaluator {
    fn name(&self) -> &str {
        TARGET_MATCH
    }

    fn evaluate(
        &self,
        evaluation: &Evaluation,
        _prompt: &[Message],
        actual_output: &[Message],
    ) -> Result<Verdict> {
        let output = normalize(&joined_content(actual_output, Role::Assistant));
        let total = evaluation.unit_count();
        if total == 0 {
            return Ok(Verdict::new(0.0, "no reference units to match"));
        }

        let mut missed = Vec::new();
        for unit in evaluation.units() {
            if !output.contains(&normalize(unit.target())) {
                missed.push(unit.target());
            }
        }
        let matched = total - missed.len();
        let score = evaluation.score_cap() * matched as f64 / total as f64;
        let mut rationale = format!("{matched}/{total} reference targets found in the output");
        if !missed.is_empty() {
            rationale.push_str("; missing: ");
            rationale.push_str(&missed.join(" | "));
        }
        Ok(Verdict::new(score.min(evaluation.score_cap()), rationale))
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
