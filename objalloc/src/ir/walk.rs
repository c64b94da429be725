//! # Tree Walking
//!
//! Pre-order traversal of expression trees with ancestor tracking.
//!
//! ## Design
//!
//! The walk keeps its own work stack instead of recursing, so deep trees do
//! not grow the native stack. While a node is being visited the walker
//! exposes a [`ParentStack`]: `index(0)` is the node itself, `index(1)` its
//! parent, `index(2)` its grandparent, and so on. Alongside each ancestor
//! the stack records which operand slot of *its* parent it occupies, so a
//! visitor can tell an assignment's destination from its source.
//!
//! ```ignore
//! use objalloc::ir::walk::{walk_tree_pre, WalkResult};
//!
//! walk_tree_pre(&stmt.root, |node, parents| {
//!     if let Some(parent) = parents.parent() {
//!         println!("{} under {}", node, parent);
//!     }
//!     WalkResult::Continue
//! });
//! ```

use super::types::Tree;

/// What the walker should do after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkResult {
    /// Visit the node's operands next.
    Continue,
    /// Do not visit this node's operands.
    SkipSubtrees,
    /// Stop the walk.
    Abort,
}

/// Ancestors of the node currently being visited.
#[derive(Debug, Default)]
pub struct ParentStack<'a> {
    /// Root first, current node last.
    nodes: Vec<&'a Tree>,
    /// Operand position of each node within its parent (0 for the root).
    positions: Vec<usize>,
}

impl<'a> ParentStack<'a> {
    fn new() -> Self {
        Self { nodes: Vec::new(), positions: Vec::new() }
    }

    fn truncate(&mut self, depth: usize) {
        self.nodes.truncate(depth);
        self.positions.truncate(depth);
    }

    fn push(&mut self, node: &'a Tree, position: usize) {
        self.nodes.push(node);
        self.positions.push(position);
    }

    /// Number of nodes on the stack, including the current one.
    pub fn height(&self) -> usize {
        self.nodes.len()
    }

    /// The node `n` levels up from the current one (0 is the current node).
    pub fn index(&self, n: usize) -> Option<&'a Tree> {
        let len = self.nodes.len();
        if n < len {
            Some(self.nodes[len - 1 - n])
        } else {
            None
        }
    }

    /// Operand position, within its own parent, of the node `n` levels up.
    pub fn position(&self, n: usize) -> Option<usize> {
        let len = self.positions.len();
        if n + 1 < len {
            Some(self.positions[len - 1 - n])
        } else {
            None
        }
    }

    /// The current node.
    pub fn current(&self) -> Option<&'a Tree> {
        self.index(0)
    }

    /// The current node's parent.
    pub fn parent(&self) -> Option<&'a Tree> {
        self.index(1)
    }

    /// The current node's grandparent.
    pub fn grandparent(&self) -> Option<&'a Tree> {
        self.index(2)
    }
}

/// Walk `root` in pre-order, calling `visit` for every node.
///
/// Returns [`WalkResult::Abort`] if the visitor aborted, otherwise
/// [`WalkResult::Continue`].
pub fn walk_tree_pre<'a, F>(root: &'a Tree, mut visit: F) -> WalkResult
where
    F: FnMut(&'a Tree, &ParentStack<'a>) -> WalkResult,
{
    let mut parents = ParentStack::new();
    // (node, depth, operand position in parent)
    let mut work: Vec<(&'a Tree, usize, usize)> = vec![(root, 0, 0)];

    while let Some((node, depth, position)) = work.pop() {
        parents.truncate(depth);
        parents.push(node, position);

        match visit(node, &parents) {
            WalkResult::Abort => return WalkResult::Abort,
            WalkResult::SkipSubtrees => continue,
            WalkResult::Continue => {}
        }

        let operands = node.operands();
        for (slot, operand) in operands.into_iter().enumerate().rev() {
            work.push((operand, depth + 1, slot));
        }
    }

    WalkResult::Continue
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{LocalId, Oper, VarType};

    fn v(n: u32) -> Tree {
        Tree::lcl_var(LocalId::new(n), VarType::Ref)
    }

    #[test]
    fn test_preorder_visit_order() {
        // (asg V01 (add V02 8))
        let tree = Tree::asg(v(1), Tree::add(VarType::Ref, v(2), Tree::cns_nint(8)));
        let mut opers = Vec::new();
        walk_tree_pre(&tree, |node, _| {
            opers.push(node.oper());
            WalkResult::Continue
        });
        assert_eq!(
            opers,
            vec![Oper::Asg, Oper::LclVar, Oper::Add, Oper::LclVar, Oper::CnsInt]
        );
    }

    #[test]
    fn test_parent_stack_indices_and_positions() {
        let tree = Tree::asg(v(1), Tree::add(VarType::Ref, v(2), Tree::cns_nint(8)));
        let mut seen = Vec::new();
        walk_tree_pre(&tree, |node, parents| {
            if node.as_lcl_var() == Some(LocalId::new(2)) {
                seen.push((
                    parents.height(),
                    parents.parent().map(Tree::oper),
                    parents.grandparent().map(Tree::oper),
                    parents.position(0),
                    parents.position(1),
                ));
            }
            WalkResult::Continue
        });
        assert_eq!(seen, vec![(3, Some(Oper::Add), Some(Oper::Asg), Some(0), Some(1))]);
    }

    #[test]
    fn test_root_has_no_parent() {
        let tree = v(1);
        walk_tree_pre(&tree, |_, parents| {
            assert_eq!(parents.height(), 1);
            assert!(parents.parent().is_none());
            assert!(parents.position(0).is_none());
            WalkResult::Continue
        });
    }

    #[test]
    fn test_skip_and_abort() {
        let tree = Tree::asg(v(1), Tree::add(VarType::Ref, v(2), Tree::cns_nint(8)));

        let mut count = 0;
        walk_tree_pre(&tree, |node, _| {
            count += 1;
            if node.oper() == Oper::Add {
                WalkResult::SkipSubtrees
            } else {
                WalkResult::Continue
            }
        });
        assert_eq!(count, 3);

        let mut count = 0;
        let result = walk_tree_pre(&tree, |_, _| {
            count += 1;
            WalkResult::Abort
        });
        assert_eq!(result, WalkResult::Abort);
        assert_eq!(count, 1);
    }

    #[test]
    fn test_deep_tree_does_not_recurse() {
        let mut tree = v(0);
        for _ in 0..10_000 {
            tree = Tree::ind(VarType::Ref, tree);
        }
        let mut depth = 0;
        walk_tree_pre(&tree, |_, parents| {
            depth = depth.max(parents.height());
            WalkResult::Continue
        });
        assert_eq!(depth, 10_001);
        // Drop of a boxed chain this deep recurses; leak it instead.
        std::mem::forget(tree);
    }
}
