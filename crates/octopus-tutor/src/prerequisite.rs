//! Prerequisite forest and the pure operations over it.
//!
//! A forest is an ordered list of root concepts, each optionally carrying one
//! level of child concepts. Every node is completed independently: finishing
//! all children of a root does not complete the root, and completing a root
//! says nothing about its children.
//!
//! The operations here never fail. An id that matches nothing is a normal
//! outcome: [`toggle`] returns an unchanged copy and [`find_label`] returns
//! `None`, leaving the caller to fall back to the raw id via [`label_or_id`].

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum depth of a forest: roots plus one child level.
pub const MAX_DEPTH: usize = 2;

/// A concept needed to solve a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrerequisiteNode {
    /// Identifier, unique within one forest (not across regenerations).
    pub id: String,

    /// Short concept name.
    pub label: String,

    /// Explanation of the concept.
    #[serde(default)]
    pub description: String,

    /// Whether the learner has marked this concept as understood.
    #[serde(default)]
    pub completed: bool,

    /// Child concepts. Only roots have children; an empty list is a leaf.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PrerequisiteNode>,
}

impl PrerequisiteNode {
    /// Creates an incomplete leaf node.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: String::new(),
            completed: false,
            children: Vec::new(),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a child node.
    #[must_use]
    pub fn with_child(mut self, child: Self) -> Self {
        self.children.push(child);
        self
    }

    /// Sets the completion flag.
    #[must_use]
    pub const fn with_completed(mut self, completed: bool) -> Self {
        self.completed = completed;
        self
    }

    /// Returns `true` if this node has no children.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Returns a copy of `forest` in which the first node matching `id` has its
/// completion flag flipped.
///
/// The search is depth-first pre-order: a node is checked before its
/// children, and the search stops at the first match. When ids repeat, only
/// that first occurrence flips. An unknown id returns an identical forest.
#[must_use]
pub fn toggle(forest: &[PrerequisiteNode], id: &str) -> Vec<PrerequisiteNode> {
    let mut found = false;
    let toggled = toggle_first(forest, id, &mut found);
    if !found {
        debug!(id = %id, "Toggle ignored: no prerequisite with this id");
    }
    toggled
}

fn toggle_first(nodes: &[PrerequisiteNode], id: &str, found: &mut bool) -> Vec<PrerequisiteNode> {
    nodes
        .iter()
        .map(|node| {
            if *found {
                return node.clone();
            }
            if node.id == id {
                *found = true;
                return PrerequisiteNode {
                    completed: !node.completed,
                    ..node.clone()
                };
            }
            PrerequisiteNode {
                children: toggle_first(&node.children, id, &mut *found),
                ..node.clone()
            }
        })
        .collect()
}

/// Finds the label of the first node matching `id`, in depth-first pre-order.
#[must_use]
pub fn find_label<'a>(forest: &'a [PrerequisiteNode], id: &str) -> Option<&'a str> {
    find_node(forest, id).map(|node| node.label.as_str())
}

/// Label for display: the node's label, or the id itself when nothing matches.
#[must_use]
pub fn label_or_id<'a>(forest: &'a [PrerequisiteNode], id: &'a str) -> &'a str {
    find_label(forest, id).unwrap_or(id)
}

/// Finds the first node matching `id`, in depth-first pre-order.
#[must_use]
pub fn find_node<'a>(forest: &'a [PrerequisiteNode], id: &str) -> Option<&'a PrerequisiteNode> {
    for node in forest {
        if node.id == id {
            return Some(node);
        }
        if let Some(found) = find_node(&node.children, id) {
            return Some(found);
        }
    }
    None
}

/// Returns `true` iff every root is completed and every child of every root
/// is completed. A root without children only needs its own flag.
///
/// This is always computed from the forest and never stored.
#[must_use]
pub fn all_completed(forest: &[PrerequisiteNode]) -> bool {
    forest
        .iter()
        .all(|root| root.completed && root.children.iter().all(|child| child.completed))
}

/// Number of nodes (roots and children) not yet completed.
#[must_use]
pub fn remaining(forest: &[PrerequisiteNode]) -> usize {
    forest
        .iter()
        .map(|root| usize::from(!root.completed) + remaining(&root.children))
        .sum()
}

/// Prepares a freshly generated forest for a new session.
///
/// Every node starts incomplete, and anything below the child level is
/// dropped so the forest never exceeds [`MAX_DEPTH`].
#[must_use]
pub fn normalize(forest: Vec<PrerequisiteNode>) -> Vec<PrerequisiteNode> {
    normalize_at_depth(forest, 1)
}

fn normalize_at_depth(nodes: Vec<PrerequisiteNode>, depth: usize) -> Vec<PrerequisiteNode> {
    nodes
        .into_iter()
        .map(|node| {
            let children = if depth < MAX_DEPTH {
                normalize_at_depth(node.children, depth + 1)
            } else {
                if !node.children.is_empty() {
                    debug!(
                        id = %node.id,
                        dropped = node.children.len(),
                        "Dropping prerequisites nested deeper than two levels"
                    );
                }
                Vec::new()
            };
            PrerequisiteNode {
                completed: false,
                children,
                ..node
            }
        })
        .collect()
}
