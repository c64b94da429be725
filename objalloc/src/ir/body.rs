//! # Method Bodies
//!
//! A method body owns the local variable table and the basic blocks of one
//! compiled method.
//!
//! ## Body Structure
//!
//! - **Locals**: the slot table, indexed by [`LocalId`]
//! - **Basic Blocks**: ordered statement lists plus a jump kind that names
//!   the successors
//! - **Flags**: method-level facts published to and consumed by phases
//!
//! New locals and statements may be appended while a phase runs; existing
//! slots and blocks are never renumbered.

use std::fmt;

use crate::error::{AllocError, Result};
use super::types::{BasicBlockId, ClassHandle, LocalId, Statement, Tree, VarType};

bitflags::bitflags! {
    /// Method-level flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MethodFlags: u32 {
        /// The method contains at least one `AllocObj`.
        const HAS_NEWOBJ = 0b0001;
        /// At least one object was allocated on the stack frame.
        const HAS_OBJ_STACK_ALLOC = 0b0010;
    }
}

bitflags::bitflags! {
    /// Per-block flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u32 {
        /// The block contains at least one `AllocObj`.
        const HAS_NEWOBJ = 0b0001;
    }
}

impl Default for MethodFlags {
    fn default() -> Self {
        MethodFlags::empty()
    }
}

impl Default for BlockFlags {
    fn default() -> Self {
        BlockFlags::empty()
    }
}

/// How control leaves a block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JumpKind {
    /// Method return.
    #[default]
    Return,
    /// Exception throw; no successors.
    Throw,
    /// Unconditional jump.
    Goto(BasicBlockId),
    /// Two-way conditional branch.
    Cond {
        /// Taken when the condition holds.
        then_target: BasicBlockId,
        /// Fall-through.
        else_target: BasicBlockId,
    },
    /// Multi-way branch.
    Switch(Vec<BasicBlockId>),
}

impl JumpKind {
    /// Successor blocks, in order.
    pub fn successors(&self) -> Vec<BasicBlockId> {
        match self {
            JumpKind::Return | JumpKind::Throw => vec![],
            JumpKind::Goto(target) => vec![*target],
            JumpKind::Cond { then_target, else_target } => vec![*then_target, *else_target],
            JumpKind::Switch(targets) => targets.clone(),
        }
    }
}

/// A basic block: a statement list followed by a jump.
#[derive(Debug, Clone, Default)]
pub struct BasicBlockData {
    /// Statements executed sequentially.
    pub statements: Vec<Statement>,
    /// How the block ends.
    pub jump: JumpKind,
    /// Block flags.
    pub flags: BlockFlags,
}

impl BasicBlockData {
    /// Create a new empty basic block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get successor blocks.
    pub fn successors(&self) -> Vec<BasicBlockId> {
        self.jump.successors()
    }
}

/// A local variable slot descriptor.
#[derive(Debug, Clone)]
pub struct LclVarDsc {
    /// The local ID.
    pub id: LocalId,
    /// Declared type.
    pub ty: VarType,
    /// The local's address is taken somewhere earlier analysis could not
    /// track precisely.
    pub addr_exposed: bool,
    /// Storage size in bytes. Only meaningful for `Struct` locals.
    pub size: u32,
    /// Class layout of a `Struct` local.
    pub class: Option<ClassHandle>,
    /// Name or creation reason, for dumps.
    pub name: Option<String>,
}

impl LclVarDsc {
    /// Create a new descriptor.
    pub fn new(id: LocalId, ty: VarType) -> Self {
        Self {
            id,
            ty,
            addr_exposed: false,
            size: 0,
            class: None,
            name: None,
        }
    }
}

impl fmt::Display for LclVarDsc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id, self.ty)?;
        if self.ty == VarType::Struct {
            write!(f, "<{}>", self.size)?;
        }
        if self.addr_exposed {
            f.write_str("(AX)")?;
        }
        if let Some(name) = &self.name {
            write!(f, " \"{}\"", name)?;
        }
        Ok(())
    }
}

/// A compiled method body.
#[derive(Debug, Clone, Default)]
pub struct MethodBody {
    /// Method name, for logs and dumps.
    pub name: String,
    /// Local variable table.
    pub locals: Vec<LclVarDsc>,
    /// Basic blocks; block 0 is the entry.
    pub blocks: Vec<BasicBlockData>,
    /// Method flags.
    pub flags: MethodFlags,
    /// Set once global morph has normalized every statement.
    pub morphed: bool,
}

impl MethodBody {
    /// Create a new empty method body.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Number of local slots.
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Allocate a new local and return its ID.
    pub fn new_local(&mut self, ty: VarType) -> LocalId {
        let id = LocalId::new(self.locals.len() as u32);
        self.locals.push(LclVarDsc::new(id, ty));
        id
    }

    /// Allocate a new named local.
    pub fn new_named_local(&mut self, name: impl Into<String>, ty: VarType) -> LocalId {
        let id = self.new_local(ty);
        self.locals[id.index()].name = Some(name.into());
        id
    }

    /// Grab a fresh temp of undetermined type; `reason` is kept for dumps.
    pub fn grab_temp(&mut self, reason: &str) -> LocalId {
        self.new_named_local(reason, VarType::Void)
    }

    /// Give `local` struct storage of `size` bytes laid out as `class`.
    pub fn set_struct(&mut self, local: LocalId, class: ClassHandle, size: u32) -> Result<()> {
        let dsc = self.local_mut(local)?;
        dsc.ty = VarType::Struct;
        dsc.class = Some(class);
        dsc.size = size;
        Ok(())
    }

    /// Get a local by ID.
    pub fn local(&self, id: LocalId) -> Result<&LclVarDsc> {
        self.locals.get(id.index()).ok_or(AllocError::UnknownLocal { local: id })
    }

    /// Get a mutable local by ID.
    pub fn local_mut(&mut self, id: LocalId) -> Result<&mut LclVarDsc> {
        self.locals.get_mut(id.index()).ok_or(AllocError::UnknownLocal { local: id })
    }

    /// A `LclVar` node typed as the local's declared type.
    pub fn lcl_var(&self, id: LocalId) -> Result<Tree> {
        Ok(Tree::lcl_var(id, self.local(id)?.ty))
    }

    /// Allocate a new basic block and return its ID.
    pub fn new_block(&mut self) -> BasicBlockId {
        let id = BasicBlockId::new(self.blocks.len() as u32);
        self.blocks.push(BasicBlockData::new());
        id
    }

    /// Get a basic block by ID.
    pub fn block(&self, id: BasicBlockId) -> Result<&BasicBlockData> {
        self.blocks.get(id.index()).ok_or(AllocError::UnknownBlock { block: id })
    }

    /// Get a mutable basic block by ID.
    pub fn block_mut(&mut self, id: BasicBlockId) -> Result<&mut BasicBlockData> {
        self.blocks.get_mut(id.index()).ok_or(AllocError::UnknownBlock { block: id })
    }

    /// Get all block IDs.
    pub fn block_ids(&self) -> impl Iterator<Item = BasicBlockId> {
        (0..self.blocks.len()).map(|i| BasicBlockId::new(i as u32))
    }

    /// Iterate over all blocks.
    pub fn blocks(&self) -> impl Iterator<Item = (BasicBlockId, &BasicBlockData)> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, bb)| (BasicBlockId::new(i as u32), bb))
    }

    /// Set how a block ends.
    pub fn set_jump(&mut self, block: BasicBlockId, jump: JumpKind) -> Result<()> {
        self.block_mut(block)?.jump = jump;
        Ok(())
    }

    /// Append a statement to a block.
    ///
    /// Statements containing an `AllocObj` set `HAS_NEWOBJ` on the block
    /// and the method, the way the importer does.
    pub fn push_statement(&mut self, block: BasicBlockId, stmt: Statement) -> Result<()> {
        let has_new_obj = stmt.root.contains_alloc_obj();
        let bb = self.block_mut(block)?;
        if has_new_obj {
            bb.flags |= BlockFlags::HAS_NEWOBJ;
        }
        bb.statements.push(stmt);
        if has_new_obj {
            self.flags |= MethodFlags::HAS_NEWOBJ;
        }
        Ok(())
    }

    /// Insert `stmt` so that it ends up at position `index` of `block`.
    pub fn insert_statement(&mut self, block: BasicBlockId, index: usize, stmt: Statement) -> Result<()> {
        let bb = self.block_mut(block)?;
        if index > bb.statements.len() {
            return Err(AllocError::UnknownStatement { block, index });
        }
        bb.statements.insert(index, stmt);
        Ok(())
    }

    /// Get a statement.
    pub fn statement(&self, block: BasicBlockId, index: usize) -> Result<&Statement> {
        self.block(block)?
            .statements
            .get(index)
            .ok_or(AllocError::UnknownStatement { block, index })
    }

    /// Get a mutable statement.
    pub fn statement_mut(&mut self, block: BasicBlockId, index: usize) -> Result<&mut Statement> {
        self.block_mut(block)?
            .statements
            .get_mut(index)
            .ok_or(AllocError::UnknownStatement { block, index })
    }

    /// Total number of statements across all blocks.
    pub fn statement_count(&self) -> usize {
        self.blocks.iter().map(|bb| bb.statements.len()).sum()
    }
}

impl fmt::Display for MethodBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method {}", self.name)?;
        for local in &self.locals {
            writeln!(f, "  local {}", local)?;
        }
        for (id, block) in self.blocks() {
            writeln!(f, "{}:", id)?;
            for stmt in &block.statements {
                writeln!(f, "  {}", stmt)?;
            }
            writeln!(f, "  -> {:?}", block.jump)?;
        }
        Ok(())
    }
}

// ============================================================================
// Builder helpers
// ============================================================================

/// Builder for constructing method bodies.
pub struct MethodBuilder {
    body: MethodBody,
    current_block: BasicBlockId,
}

impl MethodBuilder {
    /// Create a new builder with an entry block.
    pub fn new(name: impl Into<String>) -> Self {
        let mut body = MethodBody::new(name);
        let entry = body.new_block();
        Self { body, current_block: entry }
    }

    /// Create a new local.
    pub fn local(&mut self, name: &str, ty: VarType) -> LocalId {
        self.body.new_named_local(name, ty)
    }

    /// Create a new local whose address is exposed.
    pub fn exposed_local(&mut self, name: &str, ty: VarType) -> LocalId {
        let id = self.body.new_named_local(name, ty);
        self.body.locals[id.index()].addr_exposed = true;
        id
    }

    /// A `LclVar` node for a local created by this builder.
    pub fn var(&self, id: LocalId) -> Tree {
        let ty = self.body.locals.get(id.index()).map_or(VarType::Void, |l| l.ty);
        Tree::lcl_var(id, ty)
    }

    /// Create a new basic block.
    pub fn new_block(&mut self) -> BasicBlockId {
        self.body.new_block()
    }

    /// Get the current block.
    pub fn current_block(&self) -> BasicBlockId {
        self.current_block
    }

    /// Switch to a different block.
    pub fn switch_to(&mut self, block: BasicBlockId) {
        self.current_block = block;
    }

    /// Push a statement to the current block.
    pub fn push(&mut self, root: Tree) -> &mut Self {
        let has_new_obj = root.contains_alloc_obj();
        if let Some(bb) = self.body.blocks.get_mut(self.current_block.index()) {
            if has_new_obj {
                bb.flags |= BlockFlags::HAS_NEWOBJ;
            }
            bb.statements.push(Statement::new(root));
        }
        if has_new_obj {
            self.body.flags |= MethodFlags::HAS_NEWOBJ;
        }
        self
    }

    /// End the current block.
    pub fn jump(&mut self, jump: JumpKind) -> &mut Self {
        let block = self.current_block;
        if let Some(bb) = self.body.blocks.get_mut(block.index()) {
            bb.jump = jump;
        }
        self
    }

    /// Mark the body as already normalized by global morph.
    pub fn morphed(&mut self) -> &mut Self {
        self.body.morphed = true;
        self
    }

    /// Finish building and return the body.
    pub fn finish(self) -> MethodBody {
        self.body
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::{HelperId, TreeKind};

    #[test]
    fn test_method_body_new_local() {
        let mut body = MethodBody::new("m");
        let a = body.new_local(VarType::Ref);
        let b = body.new_local(VarType::Int);
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_eq!(body.local_count(), 2);
        assert_eq!(body.local(b).map(|l| l.ty).ok(), Some(VarType::Int));
    }

    #[test]
    fn test_unknown_local_and_block() {
        let body = MethodBody::new("m");
        assert!(matches!(
            body.local(LocalId::new(3)),
            Err(AllocError::UnknownLocal { .. })
        ));
        assert!(matches!(
            body.block(BasicBlockId::new(0)),
            Err(AllocError::UnknownBlock { .. })
        ));
    }

    #[test]
    fn test_grab_temp_and_set_struct() {
        let mut body = MethodBody::new("m");
        body.new_local(VarType::Ref);
        let tmp = body.grab_temp("stack object");
        body.set_struct(tmp, ClassHandle(7), 24).unwrap();

        let dsc = body.local(tmp).unwrap();
        assert_eq!(tmp.index, 1);
        assert_eq!(dsc.ty, VarType::Struct);
        assert_eq!(dsc.size, 24);
        assert_eq!(dsc.class, Some(ClassHandle(7)));
    }

    #[test]
    fn test_push_statement_sets_newobj_flags() {
        let mut body = MethodBody::new("m");
        let a = body.new_local(VarType::Ref);
        let bb0 = body.new_block();
        let bb1 = body.new_block();

        let plain = Tree::asg(body.lcl_var(a).unwrap(), Tree::cns_int(0));
        body.push_statement(bb0, Statement::new(plain)).unwrap();
        assert!(!body.flags.contains(MethodFlags::HAS_NEWOBJ));

        let alloc = Tree::asg(
            body.lcl_var(a).unwrap(),
            Tree::alloc_obj(ClassHandle(1), HelperId(1)),
        );
        body.push_statement(bb1, Statement::new(alloc)).unwrap();

        assert!(body.flags.contains(MethodFlags::HAS_NEWOBJ));
        assert!(!body.blocks[0].flags.contains(BlockFlags::HAS_NEWOBJ));
        assert!(body.blocks[1].flags.contains(BlockFlags::HAS_NEWOBJ));
    }

    #[test]
    fn test_insert_statement_before() {
        let mut body = MethodBody::new("m");
        let bb = body.new_block();
        body.push_statement(bb, Statement::new(Tree::cns_int(1))).unwrap();
        body.insert_statement(bb, 0, Statement::new(Tree::cns_int(0))).unwrap();

        let values: Vec<_> = body.blocks[0]
            .statements
            .iter()
            .map(|s| match s.root.kind {
                TreeKind::CnsInt(v) => v,
                _ => -1,
            })
            .collect();
        assert_eq!(values, vec![0, 1]);
        assert!(body.insert_statement(bb, 5, Statement::new(Tree::nop())).is_err());
    }

    #[test]
    fn test_successors() {
        let b1 = BasicBlockId::new(1);
        let b2 = BasicBlockId::new(2);
        assert!(JumpKind::Return.successors().is_empty());
        assert_eq!(JumpKind::Goto(b1).successors(), vec![b1]);
        assert_eq!(
            JumpKind::Cond { then_target: b1, else_target: b2 }.successors(),
            vec![b1, b2]
        );
    }

    #[test]
    fn test_builder() {
        let mut builder = MethodBuilder::new("m");
        let a = builder.local("a", VarType::Ref);
        let exposed = builder.exposed_local("b", VarType::Ref);
        let a_var = builder.var(a);
        builder.push(Tree::asg(a_var, Tree::alloc_obj(ClassHandle(1), HelperId(1))));
        builder.jump(JumpKind::Return);

        let body = builder.finish();
        assert_eq!(body.blocks.len(), 1);
        assert_eq!(body.statement_count(), 1);
        assert!(body.locals[exposed.index()].addr_exposed);
        assert!(body.flags.contains(MethodFlags::HAS_NEWOBJ));
        assert!(!body.morphed);
    }
}
