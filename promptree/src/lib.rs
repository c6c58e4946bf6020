//! Iterative prompt optimization over a versioned tree of scored candidates.
//!
//! A prompt and the output it produced form a [`core::candidate::Candidate`],
//! scored against weighted criteria. Candidates live in an
//! [`core::tree::IterationTree`]; the [`driver::IterationDriver`] grows a branch
//! by asking a strategy for a better prompt, executing it, scoring the result
//! and attaching it as a child until a stop condition fires.
//!
//! - **[`core`]**: pure logic (scoring model, tree, policies, snapshots).
//! - **[`io`]**: side effects (config, child processes, LLM-backed evaluator
//!   and strategy, seed and tree files). Isolated behind traits so tests can
//!   script them.

pub mod core;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod message;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
