//! Binding of one evaluation to the capability that scores it.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::error::EvaluationFailed;
use crate::core::evaluation::Evaluation;
use crate::message::Message;

/// Score and rationale produced by an [`Evaluator`] for one evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub score: f64,
    pub rationale: String,
}

impl Verdict {
    pub fn new(score: f64, rationale: impl Into<String>) -> Self {
        Self {
            score,
            rationale: rationale.into(),
        }
    }
}

/// Scoring capability (LLM judge, static rule checker, similarity scorer, ...).
///
/// Implementations are shared across tasks and must not keep per-task state.
/// Returning `Err` is distinct from a valid zero score; retries, if any,
/// belong inside the implementation.
pub trait Evaluator: Send + Sync {
    /// Stable name used to re-attach the evaluator when a tree is restored.
    fn name(&self) -> &str;

    fn evaluate(
        &self,
        evaluation: &Evaluation,
        prompt: &[Message],
        actual_output: &[Message],
    ) -> Result<Verdict>;
}

/// An evaluation together with the evaluator that scores it.
#[derive(Clone)]
pub struct EvaluationTask {
    evaluation: Evaluation,
    evaluator: Arc<dyn Evaluator>,
}

impl fmt::Debug for EvaluationTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationTask")
            .field("evaluation", &self.evaluation)
            .field("evaluator", &self.evaluator.name())
            .finish()
    }
}

impl EvaluationTask {
    pub fn new(evaluation: Evaluation, evaluator: Arc<dyn Evaluator>) -> Self {
        Self {
            evaluation,
            evaluator,
        }
    }

    /// Criterion id, i.e. the id of the owned evaluation.
    pub fn criterion_id(&self) -> &str {
        self.evaluation.id()
    }

    pub fn evaluation(&self) -> &Evaluation {
        &self.evaluation
    }

    pub fn evaluator(&self) -> &Arc<dyn Evaluator> {
        &self.evaluator
    }

    /// Score the owned evaluation, replacing any earlier score and rationale.
    ///
    /// On failure the evaluation keeps its pre-run state.
    #[instrument(
        skip_all,
        fields(criterion_id = %self.evaluation.id(), evaluator = self.evaluator.name())
    )]
    pub fn run(
        &mut self,
        prompt: &[Message],
        actual_output: &[Message],
    ) -> Result<(), EvaluationFailed> {
        let verdict = self
            .evaluator
            .evaluate(&self.evaluation, prompt, actual_output)
            .map_err(|source| self.failed(source))?;
        self.evaluation
            .record(verdict.score, verdict.rationale)
            .map_err(|err| self.failed(err.into()))?;
        debug!(
            score = self.evaluation.obtained_score(),
            cap = self.evaluation.score_cap(),
            "criterion scored"
        );
        Ok(())
    }

    /// Same definition with the score cleared, for the next generation.
    pub fn reset(&self) -> Self {
        Self {
            evaluation: self.evaluation.reset(),
            evaluator: Arc::clone(&self.evaluator),
        }
    }

    fn failed(&self, source: anyhow::Error) -> EvaluationFailed {
        warn!(err = %source, "criterion evaluation failed");
        EvaluationFailed {
            criterion_id: self.evaluation.id().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::unit::UnitMap;
    use crate::test_support::{FailingEvaluator, FixedScore};

    fn task(evaluator: Arc<dyn Evaluator>) -> EvaluationTask {
        let evaluation = Evaluation::new(UnitMap::new(), 50.0)
            .expect("evaluation")
            .with_id("accuracy");
        EvaluationTask::new(evaluation, evaluator)
    }

    #[test]
    fn run_overwrites_previous_result() {
        let mut task = task(Arc::new(FixedScore::new(30.0)));
        task.run(&[], &[]).expect("first run");
        task.run(&[], &[]).expect("second run");
        assert_eq!(task.evaluation().obtained_score(), 30.0);
        assert_eq!(task.evaluation().rationale(), "fixed score 30");
    }

    #[test]
    fn evaluator_error_carries_criterion_and_keeps_state() {
        let mut ok = task(Arc::new(FixedScore::new(12.0)));
        ok.run(&[], &[]).expect("run");
        let mut failing = EvaluationTask::new(ok.evaluation().clone(), Arc::new(FailingEvaluator));

        let err = failing.run(&[], &[]).unwrap_err();
        assert_eq!(err.criterion_id, "accuracy");
        assert_eq!(failing.evaluation().obtained_score(), 12.0);
        assert_eq!(failing.evaluation().rationale(), "fixed score 12");
    }

    #[test]
    fn out_of_range_verdict_is_a_failure() {
        let mut task = task(Arc::new(FixedScore::new(75.0)));
        let err = task.run(&[], &[]).unwrap_err();
        assert!(err.to_string().contains("outside [0, 50]"));
        assert_eq!(task.evaluation().obtained_score(), 0.0);
        assert!(task.evaluation().rationale().is_empty());
    }
}
