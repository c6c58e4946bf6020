//! Seed files describing the root candidate of a new tree.
//!
//! ```toml
//! description = "arithmetic helper"
//!
//! [[prompt]]
//! role = "user"
//! content = "Answer the arithmetic question."
//!
//! [[criteria]]
//! id = "accuracy"
//! criterion = "answers are numerically correct"
//! cap = 50
//! evaluator = "target_match"
//! units = ["1+1=?", "2", "2+2=?", "4"]
//! ```
//!
//! `output` may list the messages the prompt already produced; otherwise
//! `promptree init` executes the prompt to obtain them.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::core::candidate::Candidate;
use crate::core::evaluation::Evaluation;
use crate::core::rules::TARGET_MATCH;
use crate::core::snapshot::EvaluatorRegistry;
use crate::core::task::EvaluationTask;
use crate::core::unit::units_from_pairs;
use crate::message::Message;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Seed {
    #[serde(default)]
    pub description: String,
    pub prompt: Vec<Message>,
    #[serde(default)]
    pub output: Option<Vec<Message>>,
    pub criteria: Vec<CriterionSeed>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CriterionSeed {
    pub id: String,
    #[serde(default)]
    pub criterion: String,
    pub cap: f64,
    #[serde(default = "default_evaluator")]
    pub evaluator: String,
    /// Alternating input/target strings.
    #[serde(default)]
    pub units: Vec<String>,
}

fn default_evaluator() -> String {
    TARGET_MATCH.to_string()
}

pub fn load_seed(path: &Path) -> Result<Seed> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let seed: Seed =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    seed.validate()
        .with_context(|| format!("invalid seed {}", path.display()))?;
    Ok(seed)
}

impl Seed {
    pub fn validate(&self) -> Result<()> {
        if self.prompt.is_empty() {
            bail!("prompt must contain at least one message");
        }
        if self.criteria.is_empty() {
            bail!("at least one criterion is required");
        }
        let mut seen = BTreeSet::new();
        for criterion in &self.criteria {
            if criterion.id.trim().is_empty() {
                bail!("criterion ids must not be empty");
            }
            if !seen.insert(criterion.id.as_str()) {
                bail!("duplicate criterion id '{}'", criterion.id);
            }
        }
        Ok(())
    }

    /// Build the unscored root candidate for `output`.
    pub fn candidate(
        &self,
        output: Vec<Message>,
        registry: &EvaluatorRegistry,
    ) -> Result<Candidate> {
        let mut tasks = Vec::with_capacity(self.criteria.len());
        for criterion in &self.criteria {
            let pairs: Vec<&str> = criterion.units.iter().map(String::as_str).collect();
            let units = units_from_pairs(&pairs)
                .with_context(|| format!("criterion '{}' units", criterion.id))?;
            let evaluation = Evaluation::new(units, criterion.cap)
                .with_context(|| format!("criterion '{}'", criterion.id))?
                .with_id(criterion.id.clone())
                .with_criterion(criterion.criterion.clone());
            let evaluator = registry
                .get(&criterion.evaluator)
                .with_context(|| format!("criterion '{}'", criterion.id))?;
            tasks.push(EvaluationTask::new(evaluation, evaluator));
        }
        Ok(Candidate::new(self.prompt.clone(), output, tasks)
            .with_description(self.description.clone()))
    }
}
