//! Versioned iteration tree of candidate snapshots.
//!
//! Nodes live in a flat table keyed by version. A node owns the ordered list
//! of its children's versions; the parent link is a version handle used only
//! for upward traversal. All structural changes happen under one write lock,
//! so an append or a subtree deletion is observed either entirely or not at
//! all by concurrent readers.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use uuid::Uuid;

use crate::core::candidate::Candidate;
use crate::core::error::TreeError;

/// Read-only view of one attached node.
#[derive(Debug, Clone)]
pub struct IterationNode {
    version: String,
    value: Arc<Candidate>,
    parent: Option<String>,
    children: Vec<String>,
}

impl IterationNode {
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn value(&self) -> &Candidate {
        &self.value
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Child versions in attachment order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    pub fn children_count(&self) -> usize {
        self.children.len()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug)]
struct Slot {
    value: Arc<Candidate>,
    parent: Option<String>,
    children: Vec<String>,
}

#[derive(Debug)]
struct Arena {
    root: String,
    nodes: HashMap<String, Slot>,
}

impl Arena {
    fn view(&self, version: &str) -> Option<IterationNode> {
        self.nodes.get(version).map(|slot| IterationNode {
            version: version.to_string(),
            value: Arc::clone(&slot.value),
            parent: slot.parent.clone(),
            children: slot.children.clone(),
        })
    }

    /// Versions of `start` and its descendants: the node itself, then each
    /// child subtree left to right.
    fn preorder<'a>(&'a self, start: &'a str) -> Vec<&'a str> {
        let mut order = Vec::new();
        let mut stack = vec![start];
        while let Some(version) = stack.pop() {
            let Some(slot) = self.nodes.get(version) else {
                continue;
            };
            order.push(version);
            stack.extend(slot.children.iter().rev().map(String::as_str));
        }
        order
    }

    fn find<F>(&self, start: &str, mut matches: F) -> Option<IterationNode>
    where
        F: FnMut(&str, &Slot) -> bool,
    {
        self.preorder(start)
            .into_iter()
            .find(|version| matches(version, &self.nodes[*version]))
            .and_then(|version| self.view(version))
    }

    fn depth(&self, version: &str) -> Option<usize> {
        let mut current = self.nodes.get(version)?;
        let mut depth = 0;
        while let Some(parent) = current.parent.as_deref() {
            current = self.nodes.get(parent)?;
            depth += 1;
        }
        Some(depth)
    }

    fn fresh_version(&self) -> String {
        loop {
            let version = Uuid::new_v4().to_string();
            if !self.nodes.contains_key(&version) {
                return version;
            }
        }
    }
}

/// A tree of candidate snapshots with exactly one root.
#[derive(Debug)]
pub struct IterationTree {
    inner: RwLock<Arena>,
}

impl IterationTree {
    /// Create a tree whose root holds `root`.
    pub fn new(root: Candidate) -> Self {
        Self::with_root_version(Uuid::new_v4().to_string(), root)
    }

    pub fn with_root_version(version: impl Into<String>, root: Candidate) -> Self {
        let version = version.into();
        let mut nodes = HashMap::new();
        nodes.insert(
            version.clone(),
            Slot {
                value: Arc::new(root),
                parent: None,
                children: Vec::new(),
            },
        );
        Self {
            inner: RwLock::new(Arena {
                root: version,
                nodes,
            }),
        }
    }

    pub fn root_version(&self) -> String {
        self.read().root.clone()
    }

    pub fn root(&self) -> IterationNode {
        let arena = self.read();
        arena
            .view(&arena.root)
            .unwrap_or_else(|| unreachable!("root slot is never removed"))
    }

    pub fn len(&self) -> usize {
        self.read().nodes.len()
    }

    /// Always false: a tree has at least its root.
    pub fn is_empty(&self) -> bool {
        self.read().nodes.is_empty()
    }

    pub fn contains(&self, version: &str) -> bool {
        self.read().nodes.contains_key(version)
    }

    /// Direct lookup by version.
    pub fn node(&self, version: &str) -> Option<IterationNode> {
        self.read().view(version)
    }

    /// Attach `candidate` as the last child of `parent` under a fresh version.
    pub fn attach_child(
        &self,
        parent: &str,
        candidate: Candidate,
    ) -> Result<IterationNode, TreeError> {
        let mut arena = self.write();
        let version = arena.fresh_version();
        attach(&mut arena, parent, version, candidate)
    }

    /// Attach under an explicit version; fails if the version is taken.
    pub fn attach_child_with_version(
        &self,
        parent: &str,
        version: impl Into<String>,
        candidate: Candidate,
    ) -> Result<IterationNode, TreeError> {
        let version = version.into();
        let mut arena = self.write();
        if arena.nodes.contains_key(&version) {
            return Err(TreeError::DuplicateVersion { version });
        }
        attach(&mut arena, parent, version, candidate)
    }

    /// Delete `version` and its whole subtree, returning the removed versions
    /// in pre-order.
    ///
    /// The root cannot be deleted. Every check runs before the first write,
    /// so a failed delete leaves the tree exactly as it was.
    pub fn delete(&self, version: &str) -> Result<Vec<String>, TreeError> {
        let mut arena = self.write();
        if arena.root == version {
            return Err(TreeError::CannotDeleteRoot {
                version: version.to_string(),
            });
        }
        let slot = arena
            .nodes
            .get(version)
            .ok_or_else(|| TreeError::UnknownNode {
                version: version.to_string(),
            })?;
        let parent = slot
            .parent
            .clone()
            .ok_or_else(|| TreeError::Inconsistent(format!("non-root {version} has no parent")))?;
        let position = arena
            .nodes
            .get(&parent)
            .and_then(|slot| slot.children.iter().position(|child| child == version))
            .ok_or_else(|| {
                TreeError::Inconsistent(format!("{version} is not listed under parent {parent}"))
            })?;

        validate_subtree(&arena, version)?;
        let removed: Vec<String> = arena
            .preorder(version)
            .into_iter()
            .map(str::to_string)
            .collect();

        if let Some(parent_slot) = arena.nodes.get_mut(&parent) {
            parent_slot.children.remove(position);
        }
        for removed_version in &removed {
            arena.nodes.remove(removed_version);
        }
        info!(version, removed = removed.len(), "deleted subtree");
        Ok(removed)
    }

    /// First node in pre-order whose version is `version`.
    pub fn find_by_version(&self, version: &str) -> Option<IterationNode> {
        let arena = self.read();
        arena.find(&arena.root, |candidate_version, _| candidate_version == version)
    }

    /// First node in pre-order whose candidate id is `candidate_id`.
    pub fn find_by_id(&self, candidate_id: &str) -> Option<IterationNode> {
        let arena = self.read();
        arena.find(&arena.root, |_, slot| slot.value.id() == candidate_id)
    }

    /// Every childless node, in pre-order.
    pub fn leaves(&self) -> Vec<IterationNode> {
        let arena = self.read();
        collect_leaves(&arena, &arena.root)
    }

    /// Leaves of the subtree rooted at `version`.
    pub fn leaves_under(&self, version: &str) -> Option<Vec<IterationNode>> {
        let arena = self.read();
        arena
            .nodes
            .contains_key(version)
            .then(|| collect_leaves(&arena, version))
    }

    /// `version` and its descendants in pre-order.
    pub fn subtree(&self, version: &str) -> Vec<IterationNode> {
        let arena = self.read();
        arena
            .preorder(version)
            .into_iter()
            .filter_map(|v| arena.view(v))
            .collect()
    }

    /// Nodes from the root down to `version`, both included.
    pub fn path(&self, version: &str) -> Option<Vec<IterationNode>> {
        let arena = self.read();
        let mut path = Vec::new();
        let mut current = Some(version.to_string());
        while let Some(v) = current {
            let node = arena.view(&v)?;
            current = node.parent.clone();
            path.push(node);
        }
        path.reverse();
        Some(path)
    }

    /// Number of parent hops to the root; the root has depth 0.
    pub fn depth(&self, version: &str) -> Option<usize> {
        self.read().depth(version)
    }

    /// Leaf with the highest percentage; the earliest in pre-order wins ties.
    pub fn best_leaf(&self) -> IterationNode {
        let mut best: Option<IterationNode> = None;
        for leaf in self.leaves() {
            let better = match &best {
                Some(current) => leaf.value().percentage() > current.value().percentage(),
                None => true,
            };
            if better {
                best = Some(leaf);
            }
        }
        best.unwrap_or_else(|| self.root())
    }

    /// Check structural invariants. Returns one message per violation.
    pub fn check_invariants(&self) -> Vec<String> {
        let arena = self.read();
        let mut errors = Vec::new();

        match arena.nodes.get(&arena.root) {
            Some(root) if root.parent.is_some() => {
                errors.push(format!("root {} has a parent", arena.root));
            }
            Some(_) => {}
            None => errors.push(format!("root {} is missing", arena.root)),
        }

        let mut listed: HashMap<&str, usize> = HashMap::new();
        for (version, slot) in &arena.nodes {
            let mut seen = HashSet::new();
            for child in &slot.children {
                if !seen.insert(child.as_str()) {
                    errors.push(format!("{version} lists child {child} twice"));
                }
                *listed.entry(child.as_str()).or_default() += 1;
                match arena.nodes.get(child) {
                    Some(child_slot) if child_slot.parent.as_deref() != Some(version.as_str()) => {
                        errors.push(format!("{child} does not point back to parent {version}"));
                    }
                    Some(_) => {}
                    None => errors.push(format!("{version} lists missing child {child}")),
                }
            }
        }

        for (version, slot) in &arena.nodes {
            if *version == arena.root {
                continue;
            }
            if slot.parent.is_none() {
                errors.push(format!("{version} is a second root"));
            }
            match listed.get(version.as_str()).copied().unwrap_or(0) {
                1 => {}
                count => errors.push(format!("{version} is listed by {count} parents")),
            }
        }

        let reachable = arena.preorder(&arena.root).len();
        if reachable != arena.nodes.len() {
            errors.push(format!(
                "{} of {} nodes are unreachable from the root",
                arena.nodes.len() - reachable,
                arena.nodes.len()
            ));
        }
        errors.sort();
        errors
    }

    /// Indented outline of the tree, one node per line.
    pub fn render(&self) -> String {
        let arena = self.read();
        let mut out = String::new();
        render_node(&arena, &arena.root, "", None, &mut out);
        out
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn attach(
    arena: &mut Arena,
    parent: &str,
    version: String,
    candidate: Candidate,
) -> Result<IterationNode, TreeError> {
    let Some(parent_slot) = arena.nodes.get_mut(parent) else {
        return Err(TreeError::InvalidParent {
            version: parent.to_string(),
        });
    };
    parent_slot.children.push(version.clone());
    let node = IterationNode {
        version: version.clone(),
        value: Arc::new(candidate),
        parent: Some(parent.to_string()),
        children: Vec::new(),
    };
    arena.nodes.insert(
        version,
        Slot {
            value: Arc::clone(&node.value),
            parent: node.parent.clone(),
            children: Vec::new(),
        },
    );
    debug!(parent, version = %node.version, "attached child");
    Ok(node)
}

/// Every version listed below `version` must still have a slot.
fn validate_subtree(arena: &Arena, version: &str) -> Result<(), TreeError> {
    let mut stack = vec![version];
    while let Some(current) = stack.pop() {
        let slot = arena.nodes.get(current).ok_or_else(|| {
            TreeError::Inconsistent(format!("child {current} is listed but missing"))
        })?;
        stack.extend(slot.children.iter().map(String::as_str));
    }
    Ok(())
}

fn collect_leaves(arena: &Arena, start: &str) -> Vec<IterationNode> {
    arena
        .preorder(start)
        .into_iter()
        .filter(|version| arena.nodes[*version].children.is_empty())
        .filter_map(|version| arena.view(version))
        .collect()
}

fn render_node(arena: &Arena, version: &str, prefix: &str, last: Option<bool>, out: &mut String) {
    let Some(slot) = arena.nodes.get(version) else {
        return;
    };
    let connector = match last {
        None => "",
        Some(true) => "└── ",
        Some(false) => "├── ",
    };
    let candidate = &slot.value;
    let _ = writeln!(
        out,
        "{prefix}{connector}{version} {:.1}% ({}/{})",
        candidate.percentage(),
        candidate.total_score(),
        candidate.score_cap()
    );
    let child_prefix = match last {
        None => prefix.to_string(),
        Some(true) => format!("{prefix}    "),
        Some(false) => format!("{prefix}│   "),
    };
    for (index, child) in slot.children.iter().enumerate() {
        let is_last = index + 1 == slot.children.len();
        render_node(arena, child, &child_prefix, Some(is_last), out);
    }
}
