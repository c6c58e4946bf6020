//! Pure, deterministic model of evaluated prompts and their iteration tree.
//!
//! Nothing here touches the filesystem or spawns processes. Scoring and prompt
//! generation reach the outside world only through the [`task::Evaluator`] and
//! [`policy::IterationStrategy`] seams.

pub mod candidate;
pub mod error;
pub mod evaluation;
pub mod policy;
pub mod rules;
pub mod snapshot;
pub mod task;
pub mod tree;
pub mod unit;
