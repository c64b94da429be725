//! # Parent-Context Escape Rule
//!
//! Decides whether one use of a pointer-like local lets the pointer escape,
//! judging only from the shape of the tree directly above the use.
//!
//! ## Recognized Shapes
//!
//! | Shape | Tree above the local | Escapes? |
//! |-------|----------------------|----------|
//! | Compare | `eq`/`ne` | no |
//! | Deref | `ind` | no |
//! | OffsetThenDeref | `add` under `ind` | no |
//! | FieldUnderAddr | `field` under `addr` | no |
//! | HelperCall | helper `call` | no if the helper is pure |
//! | DelegateInvoke | delegate `call`, local is the receiver | no |
//! | Root / Other | anything else | yes |
//!
//! Every check looks at most two levels up. A `field` under an `addr` is
//! accepted without confirming that the `addr` itself stays local.

use crate::ir::{CallKind, HelperId, LocalId, ParentStack, Tree, TreeKind};
use crate::runtime::HelperPurity;

/// The shape of the tree above a local use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentShape {
    /// The local is the statement root.
    Root,
    /// Operand of `eq`/`ne`.
    Compare,
    /// Address operand of `ind`.
    Deref,
    /// Operand of an `add` that feeds an `ind`.
    OffsetThenDeref,
    /// Object operand of a `field` that sits under an `addr`.
    FieldUnderAddr,
    /// Argument of a helper call.
    HelperCall(HelperId),
    /// Operand of a delegate invoke. `receiver` is the local passed as
    /// `this`, `is_receiver` whether the use is that operand.
    DelegateInvoke {
        receiver: Option<LocalId>,
        is_receiver: bool,
    },
    /// Anything else.
    Other,
}

impl ParentShape {
    /// Classify the ancestors of the node on top of `parents`.
    pub fn classify(parents: &ParentStack<'_>) -> Self {
        let Some(parent) = parents.parent() else {
            return ParentShape::Root;
        };
        let grandparent = parents.grandparent().map(|gp| &gp.kind);

        match &parent.kind {
            TreeKind::Eq(..) | TreeKind::Ne(..) => ParentShape::Compare,
            TreeKind::Ind(_) => ParentShape::Deref,
            TreeKind::Add(..) => match grandparent {
                Some(TreeKind::Ind(_)) => ParentShape::OffsetThenDeref,
                _ => ParentShape::Other,
            },
            TreeKind::Field { .. } => match grandparent {
                Some(TreeKind::Addr(_)) => ParentShape::FieldUnderAddr,
                _ => ParentShape::Other,
            },
            TreeKind::Call(call) => match call.kind {
                CallKind::Helper(helper) => ParentShape::HelperCall(helper),
                CallKind::User { delegate_invoke: true, .. } => ParentShape::DelegateInvoke {
                    receiver: call.this_arg.as_deref().and_then(Tree::as_lcl_var),
                    is_receiver: call.this_arg.is_some() && parents.position(0) == Some(0),
                },
                CallKind::User { .. } => ParentShape::Other,
            },
            _ => ParentShape::Other,
        }
    }
}

/// Whether `local`, the node on top of `parents`, may escape through this
/// use. Anything not recognized as harmless escapes.
pub fn can_lcl_var_escape_via_parent_stack(
    parents: &ParentStack<'_>,
    helpers: &dyn HelperPurity,
    local: LocalId,
) -> bool {
    match ParentShape::classify(parents) {
        ParentShape::Compare
        | ParentShape::Deref
        | ParentShape::OffsetThenDeref
        | ParentShape::FieldUnderAddr => false,
        ParentShape::HelperCall(helper) => !helpers.is_pure(helper),
        ParentShape::DelegateInvoke { receiver, is_receiver } => {
            !(is_receiver && receiver == Some(local))
        }
        ParentShape::Root | ParentShape::Other => true,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{walk_tree_pre, Call, MethodHandle, VarType, WalkResult};
    use crate::runtime::HelperTable;

    const A: LocalId = LocalId::new(1);
    const PURE: HelperId = HelperId(10);
    const IMPURE: HelperId = HelperId(11);

    fn a() -> Tree {
        Tree::lcl_var(A, VarType::Ref)
    }

    fn other() -> Tree {
        Tree::lcl_var(LocalId::new(2), VarType::Ref)
    }

    /// Shape and verdict at every occurrence of `A` in `tree`.
    fn verdicts(tree: &Tree) -> Vec<(ParentShape, bool)> {
        let helpers = HelperTable::new().with_pure(PURE);
        let mut out = Vec::new();
        walk_tree_pre(tree, |node, parents| {
            if node.as_lcl_var() == Some(A) {
                out.push((
                    ParentShape::classify(parents),
                    can_lcl_var_escape_via_parent_stack(parents, &helpers, A),
                ));
            }
            WalkResult::Continue
        });
        out
    }

    fn single(tree: Tree) -> (ParentShape, bool) {
        let all = verdicts(&tree);
        assert_eq!(all.len(), 1, "expected one use of V01 in {}", tree);
        all[0]
    }

    #[test]
    fn test_compare_does_not_escape() {
        assert_eq!(single(Tree::eq(a(), other())), (ParentShape::Compare, false));
        assert_eq!(single(Tree::ne(other(), a())), (ParentShape::Compare, false));
    }

    #[test]
    fn test_deref_does_not_escape() {
        assert_eq!(single(Tree::ind(VarType::Int, a())), (ParentShape::Deref, false));
    }

    #[test]
    fn test_offset_then_deref_does_not_escape() {
        let load = Tree::ind(VarType::Int, Tree::add(VarType::Byref, a(), Tree::cns_nint(8)));
        assert_eq!(single(load), (ParentShape::OffsetThenDeref, false));
    }

    #[test]
    fn test_offset_without_deref_escapes() {
        let add = Tree::add(VarType::Byref, a(), Tree::cns_nint(8));
        assert_eq!(single(Tree::addr(add)), (ParentShape::Other, true));
    }

    #[test]
    fn test_field_under_addr_does_not_escape() {
        let field_addr = Tree::addr(Tree::field(VarType::Int, a(), 8));
        assert_eq!(single(field_addr), (ParentShape::FieldUnderAddr, false));
    }

    #[test]
    fn test_field_load_escapes() {
        // Only the two-level field-under-addr shape is recognized.
        let load = Tree::asg(other(), Tree::field(VarType::Ref, a(), 8));
        assert_eq!(single(load), (ParentShape::Other, true));
    }

    #[test]
    fn test_pure_helper_does_not_escape() {
        let call = Tree::call(VarType::Int, Call::helper(PURE, vec![a()]));
        assert_eq!(single(call), (ParentShape::HelperCall(PURE), false));
    }

    #[test]
    fn test_impure_helper_escapes() {
        let call = Tree::call(VarType::Int, Call::helper(IMPURE, vec![a()]));
        assert_eq!(single(call), (ParentShape::HelperCall(IMPURE), true));
    }

    #[test]
    fn test_delegate_receiver_does_not_escape() {
        let call = Tree::call(
            VarType::Void,
            Call::delegate_invoke(MethodHandle(1), a(), vec![other()]),
        );
        assert_eq!(
            single(call),
            (ParentShape::DelegateInvoke { receiver: Some(A), is_receiver: true }, false)
        );
    }

    #[test]
    fn test_delegate_argument_escapes() {
        let call = Tree::call(
            VarType::Void,
            Call::delegate_invoke(MethodHandle(1), other(), vec![a()]),
        );
        assert_eq!(
            single(call),
            (
                ParentShape::DelegateInvoke {
                    receiver: Some(LocalId::new(2)),
                    is_receiver: false,
                },
                true
            )
        );
    }

    #[test]
    fn test_delegate_receiver_passed_again_as_argument_escapes() {
        let call = Tree::call(
            VarType::Void,
            Call::delegate_invoke(MethodHandle(1), a(), vec![a()]),
        );
        let all = verdicts(&call);
        assert_eq!(all.len(), 2);
        assert!(!all[0].1);
        assert!(all[1].1);
    }

    #[test]
    fn test_plain_user_call_escapes() {
        let call = Tree::call(
            VarType::Void,
            Call::user(MethodHandle(1), Some(a()), vec![]),
        );
        assert_eq!(single(call), (ParentShape::Other, true));
    }

    #[test]
    fn test_root_use_escapes() {
        assert_eq!(single(a()), (ParentShape::Root, true));
    }

    #[test]
    fn test_return_escapes() {
        assert_eq!(single(Tree::ret(Some(a()))), (ParentShape::Other, true));
    }
}
