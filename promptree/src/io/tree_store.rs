//! Tree persistence: pretty JSON on write, schema and invariant checks on load.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::snapshot::{EvaluatorRegistry, TreeSnapshot};
use crate::core::tree::IterationTree;
use crate::io::config::{STATE_DIR, write_atomic};

const TREE_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/iteration_tree.v1.schema.json"
));

pub fn tree_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("tree.json")
}

/// Snapshot `tree` and write it atomically.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn write_tree(path: &Path, tree: &IterationTree) -> Result<()> {
    let snapshot = TreeSnapshot::capture(tree);
    let mut buf = serde_json::to_string_pretty(&snapshot).context("serialize tree")?;
    buf.push('\n');
    write_atomic(path, &buf)?;
    debug!(nodes = snapshot.len(), "tree written");
    Ok(())
}

/// Read and schema-check a stored snapshot without restoring it.
pub fn load_snapshot(path: &Path) -> Result<TreeSnapshot> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read tree {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse tree {}", path.display()))?;
    validate_schema(&value).with_context(|| format!("validate tree {}", path.display()))?;
    serde_json::from_value(value).with_context(|| format!("deserialize tree {}", path.display()))
}

/// Load, restore through `registry`, and check tree invariants.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn load_tree(path: &Path, registry: &EvaluatorRegistry) -> Result<IterationTree> {
    let snapshot = load_snapshot(path)?;
    let tree = snapshot
        .restore(registry)
        .with_context(|| format!("restore tree {}", path.display()))?;
    let violations = tree.check_invariants();
    if !violations.is_empty() {
        return Err(anyhow!(
            "tree invariants failed: {}",
            violations.join("; ")
        ));
    }
    debug!(nodes = tree.len(), "tree loaded");
    Ok(tree)
}

fn validate_schema(tree: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(TREE_SCHEMA).context("parse tree schema")?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid tree schema: {err}"))?;
    let messages: Vec<String> = validator
        .iter_errors(tree)
        .map(|err| err.to_string())
        .collect();
    if messages.is_empty() {
        return Ok(());
    }
    Err(anyhow!("schema validation failed: {}", messages.join("; ")))
}
