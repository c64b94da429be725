//! # Allocation Site Rewriting
//!
//! Replaces every canonical `local = new T` with either a helper call or
//! an inline stack object.
//!
//! ## Heap
//!
//! ```text
//! (asg ref (lcl_var a) (alloc_obj T helper (cns_handle T)))
//!   =>
//! (asg ref (lcl_var a) (call ref helper (cns_handle T)))
//! ```
//!
//! ## Stack
//!
//! ```text
//! (asg ref (lcl_var a) (alloc_obj T helper (cns_handle T)))
//!   =>
//! (init_blk (addr (lcl_var tmp)) 0 [size])
//! (asg (ind (add (addr (lcl_var tmp)) header)) (cns_handle T))
//! (asg ref (lcl_var a) (add nint (addr (lcl_var tmp)) header))
//! ```
//!
//! `tmp` is a fresh struct local as large as the object, header included.
//! The object reference points just past the header, at the type handle.
//!
//! Blocks are scanned with an index cursor. The two statements a stack
//! rewrite inserts go in front of the cursor, which then skips them.

use std::mem;

use tracing::{debug, trace};

use crate::error::{AllocError, Result};
use crate::ir::{
    BasicBlockId, BlockFlags, Call, ClassHandle, EffectFlags, HelperId, LocalId, MethodBody,
    MethodFlags, Statement, Tree, TreeKind, VarType,
};
use crate::runtime::StmtNormalizer;

use super::{AllocDecision, AllocSite, AllocationSummary, ObjectAllocator};

/// The parts of a canonical allocation statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanonicalAlloc {
    pub local: LocalId,
    pub class: ClassHandle,
    pub helper: HelperId,
}

/// Match `root` against `(asg ref (lcl_var local) (alloc_obj ...))`.
pub fn canonical_alloc(root: &Tree) -> Option<CanonicalAlloc> {
    let TreeKind::Asg { dst, src } = &root.kind else {
        return None;
    };
    if root.ty != VarType::Ref {
        return None;
    }
    let local = dst.as_lcl_var()?;
    match src.kind {
        TreeKind::AllocObj { class, helper, .. } => Some(CanonicalAlloc { local, class, helper }),
        _ => None,
    }
}

impl<'rt> ObjectAllocator<'rt> {
    /// Rewrite every allocation site of `body`.
    pub fn morph_alloc_obj_nodes(
        &self,
        body: &mut MethodBody,
        normalizer: &mut dyn StmtNormalizer,
    ) -> Result<AllocationSummary> {
        let verify = self.config.verify_canonical_shapes;
        let mut summary = AllocationSummary::default();

        let block_ids: Vec<BasicBlockId> = body.block_ids().collect();
        for block in block_ids {
            let flagged = body.block(block)?.flags.contains(BlockFlags::HAS_NEWOBJ);
            if !flagged && !verify {
                continue;
            }

            let mut index = 0;
            while index < body.block(block)?.statements.len() {
                let root = &body.statement(block, index)?.root;
                let Some(site) = canonical_alloc(root) else {
                    if verify && root.contains_alloc_obj() {
                        return Err(AllocError::NonCanonicalAllocation { block, stmt: index });
                    }
                    index += 1;
                    continue;
                };
                if !flagged {
                    return Err(AllocError::MissingBlockFlag { block });
                }

                let decision = if self.stack_allocation_enabled
                    && !self.is_in_cycle(block)
                    && self.can_allocate_lcl_var_on_stack(site.local, site.class)?
                {
                    let temp = self.morph_into_stack_alloc(body, block, index, site.class, normalizer)?;
                    index += 2;
                    AllocDecision::Stack { temp }
                } else {
                    self.morph_into_helper_call(body, block, index, normalizer)?;
                    AllocDecision::Heap
                };

                debug!(%block, local = %site.local, class = %site.class, ?decision, "allocation site");
                summary.sites.push(AllocSite {
                    block,
                    local: site.local,
                    class: site.class,
                    decision,
                });
                index += 1;
            }
        }

        Ok(summary)
    }

    fn is_in_cycle(&self, block: BasicBlockId) -> bool {
        // Without cycle information nothing may go on the stack.
        self.cycles.as_ref().map_or(true, |cycles| cycles.is_part_of_cycle(block))
    }

    /// Replace the allocation in statement `stmt` of `block` with a call to
    /// its allocation helper.
    pub fn morph_into_helper_call(
        &self,
        body: &mut MethodBody,
        block: BasicBlockId,
        stmt: usize,
        normalizer: &mut dyn StmtNormalizer,
    ) -> Result<()> {
        let root = &mut body.statement_mut(block, stmt)?.root;
        let TreeKind::Asg { src, .. } = &mut root.kind else {
            return Err(AllocError::NonCanonicalAllocation { block, stmt });
        };
        let (helper, handle) = match &mut src.kind {
            TreeKind::AllocObj { helper, handle, .. } => (*helper, mem::replace(&mut **handle, Tree::nop())),
            _ => return Err(AllocError::NonCanonicalAllocation { block, stmt }),
        };

        **src = Tree::call(VarType::Ref, Call::helper(helper, vec![handle]));
        root.flags |= src.flags & EffectFlags::ALL_EFFECT;
        trace!(%block, stmt, tree = %root, "helper call");

        if self.is_running_after_morph(body) {
            normalizer.normalize(body, block, stmt)?;
        }
        Ok(())
    }

    /// Replace the allocation in statement `stmt` of `block` with an object
    /// laid out in a new struct local, initialized by two statements
    /// inserted in front of `stmt`. Returns the new local.
    pub fn morph_into_stack_alloc(
        &self,
        body: &mut MethodBody,
        block: BasicBlockId,
        stmt: usize,
        class: ClassHandle,
        normalizer: &mut dyn StmtNormalizer,
    ) -> Result<LocalId> {
        let size = self.allocation_size(class);
        let header = i64::from(self.types.object_header_size());

        let temp = body.grab_temp("stack allocated object");
        body.set_struct(temp, class, size)?;
        body.local_mut(temp)?.addr_exposed = true;
        let temp_addr = || Tree::addr(Tree::lcl_var(temp, VarType::Struct));

        let root = &mut body.statement_mut(block, stmt)?.root;
        let TreeKind::Asg { src, .. } = &mut root.kind else {
            return Err(AllocError::NonCanonicalAllocation { block, stmt });
        };
        let handle = match &mut src.kind {
            TreeKind::AllocObj { handle, .. } => mem::replace(&mut **handle, Tree::nop()),
            _ => return Err(AllocError::NonCanonicalAllocation { block, stmt }),
        };
        **src = Tree::add(VarType::IImpl, temp_addr(), Tree::cns_nint(header));
        root.flags |= src.flags & EffectFlags::ALL_EFFECT;

        let init = Tree::init_blk(temp_addr(), Tree::cns_int(0), size);
        let type_handle_slot = Tree::ind(
            VarType::IImpl,
            Tree::add(VarType::Byref, temp_addr(), Tree::cns_nint(header)),
        );
        let store_handle = Tree::asg(type_handle_slot, handle);

        body.insert_statement(block, stmt, Statement::new(init))?;
        body.insert_statement(block, stmt + 1, Statement::new(store_handle))?;
        body.flags |= MethodFlags::HAS_OBJ_STACK_ALLOC;
        trace!(%block, stmt, %temp, size, "stack allocated object");

        if self.is_running_after_morph(body) {
            for index in stmt..stmt + 3 {
                normalizer.normalize(body, block, index)?;
            }
        }
        Ok(temp)
    }
}

// ============================================================================
// Tests
// ============================================================================
