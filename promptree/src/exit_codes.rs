//! Stable exit codes for `promptree` commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid input, config, seed or stored tree.
pub const INVALID: i32 = 1;
/// A driver step failed (strategy, execution or scoring).
pub const FAILED: i32 = 2;
