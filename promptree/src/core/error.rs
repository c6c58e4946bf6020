//! Error taxonomy for the evaluation model and the iteration tree.
//!
//! Validation errors are local and synchronous. Collaborator failures
//! (evaluator, strategy, prompt execution) are wrapped with the criterion or
//! node version they belong to so callers can retry or branch elsewhere.

/// A score outside `[0, cap]` (non-finite scores included).
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("score {score} is outside [0, {cap}]")]
pub struct ScoreOutOfRange {
    pub score: f64,
    pub cap: f64,
}

/// A score cap that cannot hold the current obtained score.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum InvalidScoreCap {
    #[error("score cap must be a finite, non-negative number, got {cap}")]
    NotNonNegative { cap: f64 },

    #[error("score cap {cap} is below the obtained score {score}")]
    BelowObtained { cap: f64, score: f64 },
}

/// One criterion could not be scored.
#[derive(Debug, thiserror::Error)]
#[error("evaluation of criterion {criterion_id} failed: {source:#}")]
pub struct EvaluationFailed {
    pub criterion_id: String,
    #[source]
    pub source: anyhow::Error,
}

/// Every criterion of a candidate ran, and at least one failed.
#[derive(Debug, thiserror::Error)]
#[error("{} of {attempted} criteria failed for candidate {candidate_id}", failures.len())]
pub struct ScoringFailed {
    pub candidate_id: String,
    pub attempted: usize,
    pub failures: Vec<EvaluationFailed>,
}

impl ScoringFailed {
    pub fn criterion_ids(&self) -> Vec<&str> {
        self.failures
            .iter()
            .map(|failure| failure.criterion_id.as_str())
            .collect()
    }
}

/// Structural violations of the iteration tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("parent {version} is not attached to this tree")]
    InvalidParent { version: String },

    #[error("root {version} cannot be deleted")]
    CannotDeleteRoot { version: String },

    #[error("node {version} is not attached to this tree")]
    UnknownNode { version: String },

    #[error("version {version} is already used in this tree")]
    DuplicateVersion { version: String },

    #[error("tree is inconsistent: {0}")]
    Inconsistent(String),
}

/// The iteration strategy could not propose a next prompt.
#[derive(Debug, thiserror::Error)]
#[error("strategy failed at node {version}: {source:#}")]
pub struct StrategyFailed {
    pub version: String,
    #[source]
    pub source: anyhow::Error,
}

/// Failure of one driver step. No child is attached for a failed step.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error(transparent)]
    Strategy(#[from] StrategyFailed),

    #[error("executing the prompt generated from node {version} failed: {source:#}")]
    Execution {
        version: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("scoring the candidate generated from node {version} failed: {source}")]
    Scoring {
        version: String,
        #[source]
        source: ScoringFailed,
    },

    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl DriverError {
    /// Version of the node the failing step started from.
    pub fn version(&self) -> Option<&str> {
        match self {
            DriverError::Strategy(err) => Some(&err.version),
            DriverError::Execution { version, .. } | DriverError::Scoring { version, .. } => {
                Some(version)
            }
            DriverError::Tree(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn scoring_failed_lists_failed_criteria() {
        let err = ScoringFailed {
            candidate_id: "c1".to_string(),
            attempted: 3,
            failures: vec![
                EvaluationFailed {
                    criterion_id: "accuracy".to_string(),
                    source: anyhow!("unparseable verdict"),
                },
                EvaluationFailed {
                    criterion_id: "tone".to_string(),
                    source: anyhow!("timeout"),
                },
            ],
        };
        assert_eq!(err.criterion_ids(), vec!["accuracy", "tone"]);
        assert_eq!(err.to_string(), "2 of 3 criteria failed for candidate c1");
    }

    #[test]
    fn driver_error_reports_step_version() {
        let err = DriverError::Execution {
            version: "v-7".to_string(),
            source: anyhow!("connection refused"),
        };
        assert_eq!(err.version(), Some("v-7"));
        assert!(err.to_string().contains("connection refused"));
    }
}
