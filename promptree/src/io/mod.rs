//! Side-effecting collaborators: processes, model-backed evaluator and
//! strategy, config, seed and tree files.

pub mod config;
pub mod executor;
pub mod judge;
pub mod optimizer;
pub mod process;
pub mod prompt;
pub mod seed;
pub mod tree_store;
