//! Serializable, read-only views of candidates and trees.
//!
//! Snapshots carry everything an external writer needs (prompt, output,
//! per-criterion score/cap/rationale, totals) and enough of each evaluation's
//! definition to rebuild a live tree. Evaluators are recorded by name and
//! resolved through an [`EvaluatorRegistry`] on restore.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::candidate::Candidate;
use crate::core::evaluation::Evaluation;
use crate::core::task::{EvaluationTask, Evaluator};
use crate::core::tree::{IterationNode, IterationTree};
use crate::core::unit::EvaluationUnit;
use crate::message::Message;

pub const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSnapshot {
    pub id: String,
    pub criterion: String,
    pub evaluator: String,
    pub units: Vec<EvaluationUnit>,
    pub obtained_score: f64,
    pub score_cap: f64,
    pub rationale: String,
}

impl From<&EvaluationTask> for EvaluationSnapshot {
    fn from(task: &EvaluationTask) -> Self {
        let evaluation = task.evaluation();
        Self {
            id: evaluation.id().to_string(),
            criterion: evaluation.criterion().to_string(),
            evaluator: task.evaluator().name().to_string(),
            units: evaluation.units().cloned().collect(),
            obtained_score: evaluation.obtained_score(),
            score_cap: evaluation.score_cap(),
            rationale: evaluation.rationale().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub prompt: Vec<Message>,
    pub actual_output: Vec<Message>,
    pub evaluations: Vec<EvaluationSnapshot>,
    pub total_score: f64,
    pub score_cap: f64,
    pub percentage: f64,
}

impl From<&Candidate> for CandidateSnapshot {
    fn from(candidate: &Candidate) -> Self {
        Self {
            id: candidate.id().to_string(),
            description: candidate.description().to_string(),
            prompt: candidate.prompt().to_vec(),
            actual_output: candidate.actual_output().to_vec(),
            evaluations: candidate.tasks().map(EvaluationSnapshot::from).collect(),
            total_score: candidate.total_score(),
            score_cap: candidate.score_cap(),
            percentage: candidate.percentage(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub version: String,
    pub candidate: CandidateSnapshot,
    pub children: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub format: u32,
    pub root: NodeSnapshot,
}

impl TreeSnapshot {
    /// Capture the whole tree as one consistent snapshot.
    pub fn capture(tree: &IterationTree) -> Self {
        let nodes = tree.subtree(&tree.root_version());
        let by_version: HashMap<&str, &IterationNode> =
            nodes.iter().map(|node| (node.version(), node)).collect();
        let root = nest(&nodes[0], &by_version);
        Self {
            format: SNAPSHOT_FORMAT,
            root,
        }
    }

    /// Rebuild a live tree, resolving evaluators by name.
    pub fn restore(&self, registry: &EvaluatorRegistry) -> Result<IterationTree> {
        if self.format != SNAPSHOT_FORMAT {
            bail!(
                "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT})",
                self.format
            );
        }
        let root = restore_candidate(&self.root.candidate, registry)
            .with_context(|| format!("restore node {}", self.root.version))?;
        let tree = IterationTree::with_root_version(self.root.version.clone(), root);

        let mut pending: Vec<(&str, &NodeSnapshot)> = self
            .root
            .children
            .iter()
            .rev()
            .map(|child| (self.root.version.as_str(), child))
            .collect();
        while let Some((parent, node)) = pending.pop() {
            let candidate = restore_candidate(&node.candidate, registry)
                .with_context(|| format!("restore node {}", node.version))?;
            tree.attach_child_with_version(parent, node.version.clone(), candidate)?;
            pending.extend(
                node.children
                    .iter()
                    .rev()
                    .map(|child| (node.version.as_str(), child)),
            );
        }
        Ok(tree)
    }

    /// Number of nodes in the snapshot.
    pub fn len(&self) -> usize {
        fn count(node: &NodeSnapshot) -> usize {
            1 + node.children.iter().map(count).sum::<usize>()
        }
        count(&self.root)
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

fn nest(node: &IterationNode, by_version: &HashMap<&str, &IterationNode>) -> NodeSnapshot {
    NodeSnapshot {
        version: node.version().to_string(),
        candidate: CandidateSnapshot::from(node.value()),
        children: node
            .children()
            .iter()
            .filter_map(|child| by_version.get(child.as_str()))
            .map(|child| nest(child, by_version))
            .collect(),
    }
}

fn restore_candidate(
    snapshot: &CandidateSnapshot,
    registry: &EvaluatorRegistry,
) -> Result<Candidate> {
    let mut tasks = Vec::with_capacity(snapshot.evaluations.len());
    let mut seen = HashSet::new();
    for evaluation in &snapshot.evaluations {
        if !seen.insert(evaluation.id.as_str()) {
            bail!(
                "candidate {}: duplicate criterion id '{}'",
                snapshot.id,
                evaluation.id
            );
        }
        let evaluator = registry.get(&evaluation.evaluator)?;
        let units = evaluation
            .units
            .iter()
            .map(|unit| (unit.id().to_string(), unit.clone()))
            .collect::<BTreeMap<_, _>>();
        let mut restored = Evaluation::new(units, evaluation.score_cap)
            .with_context(|| format!("criterion {}", evaluation.id))?
            .with_id(evaluation.id.clone())
            .with_criterion(evaluation.criterion.clone());
        restored
            .record(evaluation.obtained_score, evaluation.rationale.clone())
            .with_context(|| format!("criterion {}", evaluation.id))?;
        tasks.push(EvaluationTask::new(restored, evaluator));
    }
    Ok(Candidate::new(
        snapshot.prompt.clone(),
        snapshot.actual_output.clone(),
        tasks,
    )
    .with_id(snapshot.id.clone())
    .with_description(snapshot.description.clone()))
}

/// Evaluators available for restoring snapshots and building seeds, by name.
#[derive(Clone, Default)]
pub struct EvaluatorRegistry {
    evaluators: HashMap<String, Arc<dyn Evaluator>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register under the evaluator's own name, replacing any previous entry.
    pub fn register(&mut self, evaluator: Arc<dyn Evaluator>) -> &mut Self {
        self.evaluators
            .insert(evaluator.name().to_string(), evaluator);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Evaluator>> {
        self.evaluators.get(name).cloned().ok_or_else(|| {
            anyhow!(
                "unknown evaluator '{name}' (known: {})",
                self.names().join(", ")
            )
        })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.evaluators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::TargetMatchEvaluator;
    use crate::core::unit::units_from_pairs;
    use crate::test_support::FixedScore;

    fn registry() -> EvaluatorRegistry {
        let mut registry = EvaluatorRegistry::new();
        registry
            .register(Arc::new(FixedScore::new(6.0)))
            .register(Arc::new(TargetMatchEvaluator));
        registry
    }

    fn scored(prompt: &str) -> Candidate {
        let evaluation = Evaluation::new(units_from_pairs(&["q", "a"]).expect("units"), 10.0)
            .expect("evaluation")
            .with_id("accuracy")
            .with_criterion("answers match");
        let mut candidate = Candidate::new(
            vec![Message::user(prompt)],
            vec![Message::assistant("a")],
            [EvaluationTask::new(evaluation, Arc::new(FixedScore::new(6.0)))],
        );
        candidate.run_all_tasks().expect("score");
        candidate
    }

    #[test]
    fn candidate_snapshot_carries_scores() {
        let snapshot = CandidateSnapshot::from(&scored("p"));
        assert_eq!(snapshot.total_score, 6.0);
        assert_eq!(snapshot.score_cap, 10.0);
        assert_eq!(snapshot.percentage, 60.0);
        assert_eq!(snapshot.evaluations[0].evaluator, "fixed");
        assert_eq!(snapshot.evaluations[0].rationale, "fixed score 6");
    }

    #[test]
    fn capture_nests_children_in_order() {
        let tree = IterationTree::with_root_version("r", scored("root"));
        tree.attach_child_with_version("r", "a", scored("a"))
            .expect("attach");
        tree.attach_child_with_version("r", "b", scored("b"))
            .expect("attach");
        tree.attach_child_with_version("a", "a1", scored("a1"))
            .expect("attach");

        let snapshot = TreeSnapshot::capture(&tree);
        assert_eq!(snapshot.len(), 4);
        let children: Vec<&str> = snapshot
            .root
            .children
            .iter()
            .map(|child| child.version.as_str())
            .collect();
        assert_eq!(children, vec!["a", "b"]);
        assert_eq!(snapshot.root.children[0].children[0].version, "a1");
    }

    #[test]
    fn restore_rebuilds_structure_and_scores() {
        let tree = IterationTree::with_root_version("r", scored("root"));
        tree.attach_child_with_version("r", "a", scored("a"))
            .expect("attach");
        tree.attach_child_with_version("a", "a1", scored("a1"))
            .expect("attach");
        let snapshot = TreeSnapshot::capture(&tree);

        let restored = snapshot.restore(&registry()).expect("restore");
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.depth("a1"), Some(2));
        assert_eq!(restored.node("a1").expect("a1").value().percentage(), 60.0);
        assert!(restored.check_invariants().is_empty());
        assert_eq!(TreeSnapshot::capture(&restored), snapshot);
    }

    #[test]
    fn restore_rejects_unknown_evaluator() {
        let tree = IterationTree::with_root_version("r", scored("root"));
        let snapshot = TreeSnapshot::capture(&tree);
        let err = snapshot.restore(&EvaluatorRegistry::new()).unwrap_err();
        assert!(format!("{err:#}").contains("unknown evaluator 'fixed'"));
    }

    #[test]
    fn registry_lists_names_in_order() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["fixed", "target_match"]);
        let err = registry.get("judge").err().expect("unknown");
        assert_eq!(
            err.to_string(),
            "unknown evaluator 'judge' (known: fixed, target_match)"
        );
    }

    #[test]
    fn restore_rejects_out_of_range_scores() {
        let tree = IterationTree::with_root_version("r", scored("root"));
        let mut snapshot = TreeSnapshot::capture(&tree);
        snapshot.root.candidate.evaluations[0].obtained_score = 11.0;
        let err = snapshot.restore(&registry()).unwrap_err();
        assert!(format!("{err:#}").contains("outside [0, 10]"));
    }

    #[test]
    fn restore_rejects_duplicate_criterion_ids() {
        let task = |id: &str| {
            let evaluation = Evaluation::new(BTreeMap::new(), 10.0)
                .expect("evaluation")
                .with_id(id);
            EvaluationTask::new(evaluation, Arc::new(FixedScore::new(6.0)))
        };
        let mut candidate = Candidate::new(
            vec![Message::user("p")],
            vec![Message::assistant("a")],
            [task("a"), task("b")],
        );
        candidate.run_all_tasks().expect("score");
        let tree = IterationTree::with_root_version("r", candidate);
        let mut snapshot = TreeSnapshot::capture(&tree);
        assert_eq!(snapshot.root.candidate.score_cap, 20.0);
        snapshot.root.candidate.evaluations[1].id = "a".to_string();

        let err = snapshot.restore(&registry()).unwrap_err();
        assert!(format!("{err:#}").contains("duplicate criterion id 'a'"));
    }
}
