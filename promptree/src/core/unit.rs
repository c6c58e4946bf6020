//! Reference samples that ground an evaluation.

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One input/target pair (a QA pair, a task description and its expected
/// outcome, or a quality dimension and what it demands).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationUnit {
    id: String,
    input: String,
    target: String,
}

impl EvaluationUnit {
    pub fn new(input: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), input, target)
    }

    pub fn with_id(
        id: impl Into<String>,
        input: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            input: input.into(),
            target: target.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

/// Units keyed by id.
pub type UnitMap = BTreeMap<String, EvaluationUnit>;

/// Build a unit map from alternating `input, target, input, target, ...` strings.
pub fn units_from_pairs(args: &[&str]) -> Result<UnitMap> {
    if args.len() % 2 != 0 {
        bail!("expected input/target pairs, got {} strings", args.len());
    }
    Ok(args
        .chunks_exact(2)
        .map(|pair| {
            let unit = EvaluationUnit::new(pair[0], pair[1]);
            (unit.id.clone(), unit)
        })
        .collect())
}
