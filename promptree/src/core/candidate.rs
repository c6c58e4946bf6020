//! A prompt, the output it produced, and the criteria it is scored on.

use std::collections::BTreeMap;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::core::error::{EvaluationFailed, ScoringFailed};
use crate::core::task::EvaluationTask;
use crate::message::Message;

/// One point in the optimization space.
///
/// Aggregates (`total_score`, `score_cap`, `percentage`) are recomputed from
/// the tasks on every call. Once attached to an iteration tree a candidate is
/// only reachable through shared references.
#[derive(Debug, Clone)]
pub struct Candidate {
    id: String,
    description: String,
    prompt: Vec<Message>,
    actual_output: Vec<Message>,
    tasks: BTreeMap<String, EvaluationTask>,
}

impl Candidate {
    pub fn new(
        prompt: Vec<Message>,
        actual_output: Vec<Message>,
        tasks: impl IntoIterator<Item = EvaluationTask>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: String::new(),
            prompt,
            actual_output,
            tasks: tasks
                .into_iter()
                .map(|task| (task.criterion_id().to_string(), task))
                .collect(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn prompt(&self) -> &[Message] {
        &self.prompt
    }

    pub fn actual_output(&self) -> &[Message] {
        &self.actual_output
    }

    /// Tasks in criterion-id order.
    pub fn tasks(&self) -> impl Iterator<Item = &EvaluationTask> {
        self.tasks.values()
    }

    pub fn task(&self, criterion_id: &str) -> Option<&EvaluationTask> {
        self.tasks.get(criterion_id)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Add or replace the task for its criterion id.
    pub fn add_task(&mut self, task: EvaluationTask) -> Option<EvaluationTask> {
        self.tasks.insert(task.criterion_id().to_string(), task)
    }

    pub fn remove_task(&mut self, criterion_id: &str) -> Option<EvaluationTask> {
        self.tasks.remove(criterion_id)
    }

    pub fn total_score(&self) -> f64 {
        self.tasks
            .values()
            .map(|task| task.evaluation().obtained_score())
            .sum()
    }

    pub fn score_cap(&self) -> f64 {
        self.tasks
            .values()
            .map(|task| task.evaluation().score_cap())
            .sum()
    }

    /// Total score as a percentage of the cap; `0` when the cap is `0`.
    pub fn percentage(&self) -> f64 {
        let cap = self.score_cap();
        if cap == 0.0 {
            return 0.0;
        }
        self.total_score() / cap * 100.0
    }

    /// Run every task against this candidate's prompt and output.
    ///
    /// A failing criterion does not stop the others; all failures are
    /// reported together once every task has run.
    #[instrument(skip_all, fields(candidate_id = %self.id, tasks = self.tasks.len()))]
    pub fn run_all_tasks(&mut self) -> Result<(), ScoringFailed> {
        let mut failures: Vec<EvaluationFailed> = Vec::new();
        for task in self.tasks.values_mut() {
            if let Err(err) = task.run(&self.prompt, &self.actual_output) {
                failures.push(err);
            }
        }
        if failures.is_empty() {
            info!(
                total = self.total_score(),
                cap = self.score_cap(),
                "candidate scored"
            );
            return Ok(());
        }
        Err(ScoringFailed {
            candidate_id: self.id.clone(),
            attempted: self.tasks.len(),
            failures,
        })
    }

    /// A new candidate for `prompt`/`actual_output` that reuses this
    /// candidate's criteria, units and caps with cleared scores.
    pub fn next_generation(&self, prompt: Vec<Message>, actual_output: Vec<Message>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            description: self.description.clone(),
            prompt,
            actual_output,
            tasks: self
                .tasks
                .iter()
                .map(|(id, task)| (id.clone(), task.reset()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::core::evaluation::Evaluation;
    use crate::core::task::Evaluator;
    use crate::core::unit::UnitMap;
    use crate::test_support::{FailingEvaluator, FixedScore};

    fn task(id: &str, cap: f64, evaluator: Arc<dyn Evaluator>) -> EvaluationTask {
        let evaluation = Evaluation::new(UnitMap::new(), cap)
            .expect("evaluation")
            .with_id(id);
        EvaluationTask::new(evaluation, evaluator)
    }

    #[test]
    fn single_criterion_aggregates() {
        let mut candidate = Candidate::new(
            vec![Message::user("1+1=?")],
            vec![Message::assistant("2")],
            [task("accuracy", 50.0, Arc::new(FixedScore::new(30.0)))],
        );
        candidate.run_all_tasks().expect("score");
        assert_eq!(candidate.total_score(), 30.0);
        assert_eq!(candidate.score_cap(), 50.0);
        assert_eq!(candidate.percentage(), 60.0);
    }

    #[test]
    fn cap_is_sum_of_task_caps() {
        let candidate = Candidate::new(
            Vec::new(),
            Vec::new(),
            [
                task("a", 10.0, Arc::new(FixedScore::new(0.0))),
                task("b", 20.0, Arc::new(FixedScore::new(0.0))),
                task("c", 70.0, Arc::new(FixedScore::new(0.0))),
            ],
        );
        assert_eq!(candidate.score_cap(), 100.0);
    }

    #[test]
    fn zero_cap_yields_zero_percentage() {
        let empty = Candidate::new(Vec::new(), Vec::new(), Vec::<EvaluationTask>::new());
        assert_eq!(empty.percentage(), 0.0);

        let zero_cap = Candidate::new(
            Vec::new(),
            Vec::new(),
            [task("a", 0.0, Arc::new(FixedScore::new(0.0)))],
        );
        assert_eq!(zero_cap.percentage(), 0.0);
    }

    #[test]
    fn one_failing_criterion_does_not_block_the_others() {
        let mut candidate = Candidate::new(
            Vec::new(),
            Vec::new(),
            [
                task("a", 10.0, Arc::new(FixedScore::new(4.0))),
                task("b", 10.0, Arc::new(FailingEvaluator)),
                task("c", 10.0, Arc::new(FixedScore::new(6.0))),
            ],
        );
        let err = candidate.run_all_tasks().unwrap_err();
        assert_eq!(err.criterion_ids(), vec!["b"]);
        assert_eq!(err.attempted, 3);
        assert_eq!(candidate.total_score(), 10.0);
    }

    #[test]
    fn aggregates_follow_task_changes() {
        let mut candidate = Candidate::new(
            Vec::new(),
            Vec::new(),
            [task("a", 10.0, Arc::new(FixedScore::new(5.0)))],
        );
        candidate.run_all_tasks().expect("score");
        assert_eq!(candidate.percentage(), 50.0);

        candidate.add_task(task("b", 10.0, Arc::new(FixedScore::new(0.0))));
        assert_eq!(candidate.percentage(), 25.0);

        candidate.remove_task("b");
        assert_eq!(candidate.percentage(), 50.0);
    }

    #[test]
    fn next_generation_resets_scores_and_keeps_definitions() {
        let mut parent = Candidate::new(
            vec![Message::user("v1")],
            vec![Message::assistant("out1")],
            [task("a", 10.0, Arc::new(FixedScore::new(8.0)))],
        )
        .with_description("math prompt");
        parent.run_all_tasks().expect("score");

        let child = parent.next_generation(
            vec![Message::user("v2")],
            vec![Message::assistant("out2")],
        );
        assert_ne!(child.id(), parent.id());
        assert_eq!(child.description(), "math prompt");
        assert_eq!(child.total_score(), 0.0);
        assert_eq!(child.score_cap(), 10.0);
        assert_eq!(parent.total_score(), 8.0);
        assert_eq!(child.task("a").expect("task").evaluator().name(), "fixed");
    }
}
