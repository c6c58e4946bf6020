//! Pluggable policies for growing a branch: how to propose the next prompt
//! and when to stop.

use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::debug;

use crate::core::candidate::Candidate;
use crate::core::tree::IterationNode;

/// Proposes the next prompt text from the current candidate and free-form
/// optimization directives.
pub trait IterationStrategy: Send + Sync {
    fn generate_next(&self, candidate: &Candidate, directives: &[String]) -> Result<String>;
}

impl<F> IterationStrategy for F
where
    F: Fn(&Candidate, &[String]) -> Result<String> + Send + Sync,
{
    fn generate_next(&self, candidate: &Candidate, directives: &[String]) -> Result<String> {
        self(candidate, directives)
    }
}

/// Decides whether a branch stops growing.
///
/// Called once per driver step with the node that step just attached.
pub trait StopCondition {
    fn should_stop(&mut self, node: &IterationNode) -> bool;
}

impl<F> StopCondition for F
where
    F: FnMut(&IterationNode) -> bool,
{
    fn should_stop(&mut self, node: &IterationNode) -> bool {
        self(node)
    }
}

/// Stop once `limit` steps have been taken.
#[derive(Debug, Clone)]
pub struct MaxSteps {
    limit: u32,
    taken: u32,
}

impl MaxSteps {
    pub fn new(limit: u32) -> Self {
        Self { limit, taken: 0 }
    }

    pub fn taken(&self) -> u32 {
        self.taken
    }
}

impl StopCondition for MaxSteps {
    fn should_stop(&mut self, _node: &IterationNode) -> bool {
        self.taken = self.taken.saturating_add(1);
        self.taken >= self.limit
    }
}

/// Stop once a candidate reaches `percentage` of its score cap.
#[derive(Debug, Clone, Copy)]
pub struct ScoreThreshold {
    percentage: f64,
}

impl ScoreThreshold {
    pub fn new(percentage: f64) -> Self {
        Self { percentage }
    }
}

impl StopCondition for ScoreThreshold {
    fn should_stop(&mut self, node: &IterationNode) -> bool {
        let reached = node.value().percentage();
        debug!(reached, target = self.percentage, "threshold check");
        reached >= self.percentage
    }
}

/// Stop once a wall-clock budget, counted from construction, is spent.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    deadline: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }

    pub fn at(deadline: Instant) -> Self {
        Self { deadline }
    }
}

impl StopCondition for Deadline {
    fn should_stop(&mut self, _node: &IterationNode) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Stop as soon as any inner condition says so.
///
/// Every inner condition is consulted on every step so stateful ones keep
/// counting.
#[derive(Default)]
pub struct AnyOf {
    conditions: Vec<Box<dyn StopCondition + Send>>,
}

impl AnyOf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, condition: impl StopCondition + Send + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

impl StopCondition for AnyOf {
    fn should_stop(&mut self, node: &IterationNode) -> bool {
        self.conditions
            .iter_mut()
            .fold(false, |stop, condition| condition.should_stop(node) || stop)
    }
}
