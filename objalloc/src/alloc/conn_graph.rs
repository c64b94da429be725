//! # Connection Graph
//!
//! Points-to relationships between the pointer-like locals of one method,
//! and the set of locals whose pointer value escapes.
//!
//! ## Construction
//!
//! Every `Ref`, `IImpl` and `Byref` local gets a node with an (initially
//! empty) pointee set. Address-exposed nodes seed the escaping set. Each
//! statement is then walked pre-order, and every use of a pointer-typed
//! local is classified by the tree around it:
//!
//! | # | Context | Effect |
//! |---|---------|--------|
//! | 1 | source of `asg` into a local `d` | edge `d -> v` |
//! | 2 | source of `asg` into anything else | `v` escapes |
//! | 3 | destination of `asg` | nothing |
//! | 4 | operand of `add` that is the source of `asg` into a local `d` | edge `d -> v` |
//! | 5 | anything else | parent-context rule |
//!
//! An edge `d -> v` reads "`d` may hold what `v` holds". Edges come only
//! from plain copies, so escape flows from `d` to `v` and never back.
//!
//! ## Closure
//!
//! [`compute_reachable`] grows the escaping set until no escaping node has
//! a pointee outside it.

use tracing::{debug, trace};

use crate::bitset::LocalSet;
use crate::error::{AllocError, Result};
use crate::ir::{walk_tree_pre, LocalId, MethodBody, ParentStack, TreeKind, WalkResult};
use crate::runtime::HelperPurity;

use super::escape::can_lcl_var_escape_via_parent_stack;

// ============================================================================
// Graph
// ============================================================================

/// Directed points-to graph over local slots.
#[derive(Debug, Clone)]
pub struct ConnectionGraph {
    /// Pointee set per slot; `None` for slots that are not tracked.
    pointees: Vec<Option<LocalSet>>,
}

impl ConnectionGraph {
    /// A graph over `0..universe` with no tracked slots.
    pub fn new(universe: usize) -> Self {
        Self { pointees: vec![None; universe] }
    }

    /// A graph tracking every pointer-like local of `body`.
    pub fn for_body(body: &MethodBody) -> Self {
        let mut graph = Self::new(body.local_count());
        for dsc in &body.locals {
            if dsc.ty.is_pointer_like() {
                graph.track(dsc.id);
            }
        }
        graph
    }

    /// Number of slots the graph covers.
    pub fn universe(&self) -> usize {
        self.pointees.len()
    }

    /// Give `local` a node. Out-of-range slots are ignored.
    pub fn track(&mut self, local: LocalId) {
        let universe = self.universe();
        if let Some(slot) = self.pointees.get_mut(local.index()) {
            if slot.is_none() {
                *slot = Some(LocalSet::new(universe));
            }
        }
    }

    pub fn is_tracked(&self, local: LocalId) -> bool {
        matches!(self.pointees.get(local.index()), Some(Some(_)))
    }

    /// What `local` may point to, if it is tracked.
    pub fn pointees(&self, local: LocalId) -> Option<&LocalSet> {
        self.pointees.get(local.index()).and_then(Option::as_ref)
    }

    /// Record that `pointer` may hold what `pointee` holds.
    ///
    /// Returns false, and records nothing, when `pointer` is not tracked.
    pub fn add_edge(&mut self, pointer: LocalId, pointee: LocalId) -> bool {
        if pointee.index() >= self.universe() {
            return false;
        }
        match self.pointees.get_mut(pointer.index()) {
            Some(Some(set)) => {
                set.insert(pointee);
                true
            }
            _ => false,
        }
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.pointees.iter().flatten().map(LocalSet::len).sum()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Why a local was first marked escaping; shows up in debug logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EscapeCause {
    AddressExposed,
    StoredToMemory,
    UntrackedDestination,
    ParentContext,
}

struct GraphBuilder<'a> {
    graph: ConnectionGraph,
    escaping: LocalSet,
    helpers: &'a dyn HelperPurity,
}

impl<'a> GraphBuilder<'a> {
    fn mark_escaping(&mut self, local: LocalId, cause: EscapeCause) {
        if self.escaping.insert(local) {
            debug!(%local, ?cause, "local escapes");
        }
    }

    fn connect(&mut self, pointer: LocalId, pointee: LocalId) {
        if self.graph.add_edge(pointer, pointee) {
            trace!(%pointer, %pointee, "points-to edge");
        } else {
            // Nothing tracks where the destination goes.
            self.mark_escaping(pointee, EscapeCause::UntrackedDestination);
        }
    }

    /// Classify one use of the tracked local `local`.
    fn visit_use(&mut self, local: LocalId, parents: &ParentStack<'_>) {
        let parent = parents.parent().map(|p| &p.kind);
        let position = parents.position(0);

        match parent {
            Some(TreeKind::Asg { .. }) if position == Some(0) => {}
            Some(TreeKind::Asg { dst, .. }) => match dst.as_lcl_var() {
                Some(dst) => self.connect(dst, local),
                None => self.mark_escaping(local, EscapeCause::StoredToMemory),
            },
            Some(TreeKind::Add(..)) => match assigned_to_local(parents) {
                Some(dst) => self.connect(dst, local),
                None => self.apply_parent_rule(local, parents),
            },
            _ => self.apply_parent_rule(local, parents),
        }
    }

    fn apply_parent_rule(&mut self, local: LocalId, parents: &ParentStack<'_>) {
        if can_lcl_var_escape_via_parent_stack(parents, self.helpers, local) {
            self.mark_escaping(local, EscapeCause::ParentContext);
        }
    }
}

/// For a node under an `add`, the local the `add` is assigned to, if the
/// `add` is the source of an `asg` whose destination is a plain local.
fn assigned_to_local(parents: &ParentStack<'_>) -> Option<LocalId> {
    match parents.grandparent().map(|gp| &gp.kind) {
        Some(TreeKind::Asg { dst, .. }) if parents.position(1) == Some(1) => dst.as_lcl_var(),
        _ => None,
    }
}

/// Build the connection graph of `body` and the escaping set implied
/// directly by the IR, before closure.
pub fn build_connection_graph(
    body: &MethodBody,
    helpers: &dyn HelperPurity,
) -> Result<(ConnectionGraph, LocalSet)> {
    let universe = body.local_count();
    let mut builder = GraphBuilder {
        graph: ConnectionGraph::for_body(body),
        escaping: LocalSet::new(universe),
        helpers,
    };

    for dsc in body.locals.iter().filter(|dsc| dsc.addr_exposed) {
        if builder.graph.is_tracked(dsc.id) {
            builder.mark_escaping(dsc.id, EscapeCause::AddressExposed);
        }
    }

    for (block, bb) in body.blocks() {
        for stmt in &bb.statements {
            let mut unknown = None;
            walk_tree_pre(&stmt.root, |node, parents| {
                let TreeKind::LclVar(local) = node.kind else {
                    return WalkResult::Continue;
                };
                if !node.ty.is_pointer_like() {
                    return WalkResult::Continue;
                }
                if local.index() >= universe {
                    unknown = Some(local);
                    return WalkResult::Abort;
                }
                builder.visit_use(local, parents);
                WalkResult::Continue
            });
            if let Some(local) = unknown {
                debug!(%block, %local, "statement references unknown local");
                return Err(AllocError::UnknownLocal { local });
            }
        }
    }

    Ok((builder.graph, builder.escaping))
}

// ============================================================================
// Closure
// ============================================================================

/// Close `escaping` under the points-to edges of `graph`: everything a
/// member may point to becomes a member.
pub fn compute_reachable(graph: &ConnectionGraph, escaping: &mut LocalSet) {
    let mut frontier = escaping.clone();
    let mut fresh = LocalSet::new(escaping.universe());

    while let Some(local) = frontier.first() {
        frontier.remove(local);
        let Some(pointees) = graph.pointees(local) else {
            continue;
        };
        fresh.clone_from(pointees);
        fresh.difference_with(escaping);
        if !fresh.is_empty() {
            trace!(from = %local, reached = ?fresh, "escape propagates");
            escaping.union_with(&fresh);
            frontier.union_with(&fresh);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Call, ClassHandle, HelperId, MethodBuilder, MethodHandle, Tree, VarType};
    use crate::runtime::HelperTable;
    use proptest::prelude::*;

    const NEW: HelperId = HelperId(1);

    fn analyze(body: &MethodBody) -> (ConnectionGraph, LocalSet) {
        let (graph, mut escaping) =
            build_connection_graph(body, &HelperTable::new()).unwrap();
        compute_reachable(&graph, &mut escaping);
        (graph, escaping)
    }

    #[test]
    fn test_only_pointer_like_locals_are_tracked() {
        let mut b = MethodBuilder::new("m");
        let r = b.local("r", VarType::Ref);
        let i = b.local("i", VarType::Int);
        let p = b.local("p", VarType::IImpl);
        let graph = ConnectionGraph::for_body(&b.finish());
        assert!(graph.is_tracked(r));
        assert!(!graph.is_tracked(i));
        assert!(graph.is_tracked(p));
        assert!(!graph.is_tracked(LocalId::new(99)));
    }

    #[test]
    fn test_address_exposed_seeds_escape() {
        let mut b = MethodBuilder::new("m");
        let a = b.exposed_local("a", VarType::Ref);
        let n = b.exposed_local("n", VarType::Int);
        let (_, escaping) = analyze(&b.finish());
        assert!(escaping.contains(a));
        assert!(!escaping.contains(n));
    }

    #[test]
    fn test_copy_adds_edge_from_destination() {
        let mut b = MethodBuilder::new("m");
        let a = b.local("a", VarType::Ref);
        let c = b.local("c", VarType::Ref);
        let (va, vc) = (b.var(a), b.var(c));
        b.push(Tree::asg(va.clone(), Tree::alloc_obj(ClassHandle(1), NEW)));
        b.push(Tree::asg(vc, va));
        let (graph, escaping) = analyze(&b.finish());

        assert!(graph.pointees(c).unwrap().contains(a));
        assert!(!graph.pointees(a).unwrap().contains(c));
        assert!(escaping.is_empty());
    }

    #[test]
    fn test_offset_copy_adds_edge() {
        let mut b = MethodBuilder::new("m");
        let a = b.local("a", VarType::Ref);
        let p = b.local("p", VarType::Byref);
        let (va, vp) = (b.var(a), b.var(p));
        b.push(Tree::asg(vp, Tree::add(VarType::Byref, va, Tree::cns_nint(8))));
        let (graph, escaping) = analyze(&b.finish());

        assert!(graph.pointees(p).unwrap().contains(a));
        assert!(escaping.is_empty());
    }

    #[test]
    fn test_offset_stored_to_memory_escapes() {
        let mut b = MethodBuilder::new("m");
        let a = b.local("a", VarType::Ref);
        let q = b.local("q", VarType::Byref);
        let (va, vq) = (b.var(a), b.var(q));
        let dst = Tree::ind(VarType::Byref, vq);
        b.push(Tree::asg(dst, Tree::add(VarType::Byref, va, Tree::cns_nint(8))));
        let (_, escaping) = analyze(&b.finish());

        assert!(escaping.contains(a));
        // The store address itself is only dereferenced.
        assert!(!escaping.contains(q));
    }

    #[test]
    fn test_store_into_field_escapes() {
        let mut b = MethodBuilder::new("m");
        let a = b.local("a", VarType::Ref);
        let o = b.local("o", VarType::Ref);
        let (va, vo) = (b.var(a), b.var(o));
        b.push(Tree::asg(Tree::field(VarType::Ref, vo, 8), va));
        let (_, escaping) = analyze(&b.finish());
        assert!(escaping.contains(a));
    }

    #[test]
    fn test_copy_into_untracked_local_escapes() {
        let mut b = MethodBuilder::new("m");
        let a = b.local("a", VarType::Ref);
        let s = b.local("s", VarType::Struct);
        let va = b.var(a);
        // A pointer-typed use of a struct slot, as after reinterpretation.
        b.push(Tree::asg(Tree::lcl_var(s, VarType::Ref), va));
        let (_, escaping) = analyze(&b.finish());
        assert!(escaping.contains(a));
        assert!(!escaping.contains(s));
    }

    #[test]
    fn test_escape_flows_along_edges() {
        // a = new; b = a; call(b)  =>  b escapes, so a does too.
        let mut bld = MethodBuilder::new("m");
        let a = bld.local("a", VarType::Ref);
        let b = bld.local("b", VarType::Ref);
        let (va, vb) = (bld.var(a), bld.var(b));
        bld.push(Tree::asg(va.clone(), Tree::alloc_obj(ClassHandle(1), NEW)));
        bld.push(Tree::asg(vb.clone(), va));
        bld.push(Tree::call(VarType::Void, Call::user(MethodHandle(7), None, vec![vb])));
        let (_, escaping) = analyze(&bld.finish());
        assert!(escaping.contains(b));
        assert!(escaping.contains(a));
    }

    #[test]
    fn test_escape_does_not_flow_backwards() {
        // a = new; b = a; call(a)  =>  only a escapes.
        let mut bld = MethodBuilder::new("m");
        let a = bld.local("a", VarType::Ref);
        let b = bld.local("b", VarType::Ref);
        let (va, vb) = (bld.var(a), bld.var(b));
        bld.push(Tree::asg(va.clone(), Tree::alloc_obj(ClassHandle(1), NEW)));
        bld.push(Tree::asg(vb, va.clone()));
        bld.push(Tree::call(VarType::Void, Call::user(MethodHandle(7), None, vec![va])));
        let (_, escaping) = analyze(&bld.finish());
        assert!(escaping.contains(a));
        assert!(!escaping.contains(b));
    }

    #[test]
    fn test_unknown_local_is_an_error() {
        let mut b = MethodBuilder::new("m");
        let a = b.local("a", VarType::Ref);
        let va = b.var(a);
        b.push(Tree::asg(va, Tree::lcl_var(LocalId::new(42), VarType::Ref)));
        let err = build_connection_graph(&b.finish(), &HelperTable::new()).unwrap_err();
        assert!(matches!(err, AllocError::UnknownLocal { local } if local == LocalId::new(42)));
    }

    #[test]
    fn test_add_edge_ignores_untracked_pointer() {
        let mut graph = ConnectionGraph::new(4);
        graph.track(LocalId::new(1));
        assert!(graph.add_edge(LocalId::new(1), LocalId::new(2)));
        assert!(!graph.add_edge(LocalId::new(0), LocalId::new(2)));
        assert!(!graph.add_edge(LocalId::new(1), LocalId::new(9)));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_reachability_chain() {
        let mut graph = ConnectionGraph::new(5);
        for n in 0..5 {
            graph.track(LocalId::new(n));
        }
        for n in 0..4 {
            graph.add_edge(LocalId::new(n), LocalId::new(n + 1));
        }
        let mut escaping = LocalSet::from_locals(5, [LocalId::new(2)]);
        compute_reachable(&graph, &mut escaping);
        let members: Vec<_> = escaping.iter().map(|l| l.index).collect();
        assert_eq!(members, vec![2, 3, 4]);
    }

    /// Brute-force reachability: every slot reachable from the seed.
    fn reachable_from(graph: &ConnectionGraph, seed: &LocalSet) -> LocalSet {
        let mut result = seed.clone();
        let mut stack: Vec<LocalId> = seed.iter().collect();
        while let Some(local) = stack.pop() {
            if let Some(pointees) = graph.pointees(local) {
                for next in pointees.iter() {
                    if result.insert(next) {
                        stack.push(next);
                    }
                }
            }
        }
        result
    }

    proptest! {
        #[test]
        fn test_property_closure_is_sound_and_minimal(
            n in 1usize..40,
            tracked_bits in proptest::collection::vec(any::<bool>(), 40),
            edges in proptest::collection::vec((0usize..40, 0usize..40), 0..120),
            seed in proptest::collection::vec(0usize..40, 0..6),
        ) {
            let mut graph = ConnectionGraph::new(n);
            for (index, tracked) in tracked_bits.iter().take(n).enumerate() {
                if *tracked {
                    graph.track(LocalId::new(index as u32));
                }
            }
            for (from, to) in edges {
                graph.add_edge(LocalId::new((from % n) as u32), LocalId::new((to % n) as u32));
            }
            let seed = LocalSet::from_locals(n, seed.iter().map(|s| LocalId::new((s % n) as u32)));

            let mut escaping = seed.clone();
            compute_reachable(&graph, &mut escaping);

            // Closed: no member points outside the set.
            for local in escaping.iter() {
                if let Some(pointees) = graph.pointees(local) {
                    for pointee in pointees.iter() {
                        prop_assert!(escaping.contains(pointee));
                    }
                }
            }
            // Exactly what is reachable from the seed.
            prop_assert_eq!(escaping, reachable_from(&graph, &seed));
        }
    }
}
