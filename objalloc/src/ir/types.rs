//! # Core IR Types
//!
//! Expression trees, statements and the identifiers the allocation phase
//! works with.
//!
//! ## Tree Shapes
//!
//! ```text
//! Statement
//! └── Tree (root)
//!     ├── Asg { dst, src }
//!     │   ├── LclVar(V01)
//!     │   └── AllocObj { class, helper, handle }
//!     ├── Ind(addr) / Field { obj, offset } / Addr(x)
//!     ├── Add / Eq / Ne
//!     ├── Call { kind, this_arg, args }
//!     └── InitBlk { dst, value, size }
//! ```
//!
//! Every node carries a [`VarType`] and a summary of the side effects of
//! its subtree ([`EffectFlags`]). Constructors compute the summary from
//! the operands; code that replaces a subtree in place must OR the new
//! subtree's effects into its ancestors.

use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

/// A local variable slot, dense and zero-based within one method.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId {
    /// Slot index.
    pub index: u32,
}

impl LocalId {
    /// Create a new LocalId with the given index.
    pub const fn new(index: u32) -> Self {
        Self { index }
    }

    /// The index as a `usize`, for table lookups.
    pub const fn index(self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{:02}", self.index)
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{:02}", self.index)
    }
}

/// A unique identifier for a basic block within a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BasicBlockId(pub u32);

impl BasicBlockId {
    /// The entry block ID (always 0).
    pub const ENTRY: BasicBlockId = BasicBlockId(0);

    /// Create a new BasicBlockId.
    pub const fn new(id: u32) -> Self {
        BasicBlockId(id)
    }

    /// Get the index value.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BasicBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BB{:02}", self.0)
    }
}

/// Runtime type handle of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassHandle(pub u32);

impl fmt::Display for ClassHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cls{}", self.0)
    }
}

/// Runtime helper function number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HelperId(pub u32);

impl fmt::Display for HelperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "helper{}", self.0)
    }
}

/// Handle of a user method (call target).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodHandle(pub u32);

// ============================================================================
// Types
// ============================================================================

/// Type classification of a local or a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VarType {
    /// No value (statements, stores).
    #[default]
    Void,
    /// 32-bit integer.
    Int,
    /// 64-bit integer.
    Long,
    /// Native-sized integer, also used for raw addresses.
    IImpl,
    /// Object reference into the managed heap (or a stack object).
    Ref,
    /// Managed interior pointer.
    Byref,
    /// Inline value aggregate.
    Struct,
}

impl VarType {
    /// Whether values of this type can point at an object, which makes a
    /// local of this type a node of the points-to graph.
    pub fn is_pointer_like(self) -> bool {
        matches!(self, VarType::Ref | VarType::IImpl | VarType::Byref)
    }

    fn name(self) -> &'static str {
        match self {
            VarType::Void => "void",
            VarType::Int => "int",
            VarType::Long => "long",
            VarType::IImpl => "nint",
            VarType::Ref => "ref",
            VarType::Byref => "byref",
            VarType::Struct => "struct",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Effect Flags
// ============================================================================

bitflags::bitflags! {
    /// Side-effect summary of a subtree.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EffectFlags: u8 {
        /// Subtree contains an assignment.
        const ASG = 0b0000_0001;
        /// Subtree contains a call.
        const CALL = 0b0000_0010;
        /// Subtree may throw.
        const EXCEPT = 0b0000_0100;
        /// Subtree reads or writes global (heap) state.
        const GLOB_REF = 0b0000_1000;
        /// Subtree must not be reordered.
        const ORDER_SIDEEFF = 0b0001_0000;

        /// All flags that describe an observable effect.
        const ALL_EFFECT = Self::ASG.bits()
            | Self::CALL.bits()
            | Self::EXCEPT.bits()
            | Self::GLOB_REF.bits()
            | Self::ORDER_SIDEEFF.bits();
    }
}

impl Default for EffectFlags {
    fn default() -> Self {
        EffectFlags::empty()
    }
}

// ============================================================================
// Trees
// ============================================================================

/// Call target classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    /// Call to a runtime helper.
    Helper(HelperId),
    /// Call to a user method.
    User {
        /// Callee.
        method: MethodHandle,
        /// Set when the call is a delegate `Invoke` through `this_arg`.
        delegate_invoke: bool,
    },
}

/// A call node's payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// What is being called.
    pub kind: CallKind,
    /// Receiver, if any. Always operand 0 of the call.
    pub this_arg: Option<Box<Tree>>,
    /// Remaining arguments, in order.
    pub args: Vec<Tree>,
}

impl Call {
    /// A helper call with the given arguments.
    pub fn helper(helper: HelperId, args: Vec<Tree>) -> Self {
        Self { kind: CallKind::Helper(helper), this_arg: None, args }
    }

    /// A user call, optionally with a receiver.
    pub fn user(method: MethodHandle, this_arg: Option<Tree>, args: Vec<Tree>) -> Self {
        Self {
            kind: CallKind::User { method, delegate_invoke: false },
            this_arg: this_arg.map(Box::new),
            args,
        }
    }

    /// A delegate `Invoke` call through `delegate`.
    pub fn delegate_invoke(method: MethodHandle, delegate: Tree, args: Vec<Tree>) -> Self {
        Self {
            kind: CallKind::User { method, delegate_invoke: true },
            this_arg: Some(Box::new(delegate)),
            args,
        }
    }

    /// The helper number, if this is a helper call.
    pub fn helper_id(&self) -> Option<HelperId> {
        match self.kind {
            CallKind::Helper(helper) => Some(helper),
            CallKind::User { .. } => None,
        }
    }

    /// Whether this is a delegate invoke.
    pub fn is_delegate_invoke(&self) -> bool {
        matches!(self.kind, CallKind::User { delegate_invoke: true, .. })
    }
}

/// Operator of a tree node, without operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Oper {
    LclVar,
    CnsInt,
    CnsHandle,
    Asg,
    Add,
    Eq,
    Ne,
    Ind,
    Field,
    Addr,
    Call,
    AllocObj,
    InitBlk,
    Return,
    Nop,
}

impl Oper {
    fn name(self) -> &'static str {
        match self {
            Oper::LclVar => "lcl_var",
            Oper::CnsInt => "cns_int",
            Oper::CnsHandle => "cns_handle",
            Oper::Asg => "asg",
            Oper::Add => "add",
            Oper::Eq => "eq",
            Oper::Ne => "ne",
            Oper::Ind => "ind",
            Oper::Field => "field",
            Oper::Addr => "addr",
            Oper::Call => "call",
            Oper::AllocObj => "alloc_obj",
            Oper::InitBlk => "init_blk",
            Oper::Return => "return",
            Oper::Nop => "nop",
        }
    }
}

/// The operator and operands of a tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeKind {
    /// Use (or, as an assignment destination, def) of a local.
    LclVar(LocalId),
    /// Integer constant.
    CnsInt(i64),
    /// Type handle constant.
    CnsHandle(ClassHandle),
    /// `dst = src`.
    Asg { dst: Box<Tree>, src: Box<Tree> },
    /// Addition, also pointer plus offset.
    Add(Box<Tree>, Box<Tree>),
    /// Equality comparison.
    Eq(Box<Tree>, Box<Tree>),
    /// Inequality comparison.
    Ne(Box<Tree>, Box<Tree>),
    /// Load (or store destination) through an address.
    Ind(Box<Tree>),
    /// Field at `offset` from the object address `obj`.
    Field { obj: Box<Tree>, offset: u32 },
    /// Address of a location.
    Addr(Box<Tree>),
    /// Call.
    Call(Call),
    /// Fresh object construction. `handle` is the type handle operand that
    /// becomes the helper argument or the stack object's header value.
    AllocObj { class: ClassHandle, helper: HelperId, handle: Box<Tree> },
    /// Fill `size` bytes at `dst` with `value`.
    InitBlk { dst: Box<Tree>, value: Box<Tree>, size: u32 },
    /// Method return.
    Return(Option<Box<Tree>>),
    /// No operation.
    Nop,
}

/// An expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    /// Operator and operands.
    pub kind: TreeKind,
    /// Result type.
    pub ty: VarType,
    /// Effects of this node and its operands.
    pub flags: EffectFlags,
}

impl Tree {
    /// Build a node, summarizing the effects of its operands.
    pub fn new(kind: TreeKind, ty: VarType) -> Self {
        let mut tree = Self { kind, ty, flags: EffectFlags::empty() };
        let mut flags = tree.own_effects();
        for op in tree.operands() {
            flags |= op.flags & EffectFlags::ALL_EFFECT;
        }
        tree.flags = flags;
        tree
    }

    pub fn lcl_var(local: LocalId, ty: VarType) -> Self {
        Self::new(TreeKind::LclVar(local), ty)
    }

    pub fn cns_int(value: i64) -> Self {
        Self::new(TreeKind::CnsInt(value), VarType::Int)
    }

    /// A native-sized integer constant (offsets added to addresses).
    pub fn cns_nint(value: i64) -> Self {
        Self::new(TreeKind::CnsInt(value), VarType::IImpl)
    }

    pub fn cns_handle(class: ClassHandle) -> Self {
        Self::new(TreeKind::CnsHandle(class), VarType::IImpl)
    }

    /// `dst = src`, typed as the destination.
    pub fn asg(dst: Tree, src: Tree) -> Self {
        let ty = dst.ty;
        Self::new(TreeKind::Asg { dst: Box::new(dst), src: Box::new(src) }, ty)
    }

    pub fn add(ty: VarType, lhs: Tree, rhs: Tree) -> Self {
        Self::new(TreeKind::Add(Box::new(lhs), Box::new(rhs)), ty)
    }

    pub fn eq(lhs: Tree, rhs: Tree) -> Self {
        Self::new(TreeKind::Eq(Box::new(lhs), Box::new(rhs)), VarType::Int)
    }

    pub fn ne(lhs: Tree, rhs: Tree) -> Self {
        Self::new(TreeKind::Ne(Box::new(lhs), Box::new(rhs)), VarType::Int)
    }

    pub fn ind(ty: VarType, addr: Tree) -> Self {
        Self::new(TreeKind::Ind(Box::new(addr)), ty)
    }

    pub fn field(ty: VarType, obj: Tree, offset: u32) -> Self {
        Self::new(TreeKind::Field { obj: Box::new(obj), offset }, ty)
    }

    pub fn addr(location: Tree) -> Self {
        Self::new(TreeKind::Addr(Box::new(location)), VarType::Byref)
    }

    pub fn call(ty: VarType, call: Call) -> Self {
        Self::new(TreeKind::Call(call), ty)
    }

    /// `new T()` with the type handle as its only operand.
    pub fn alloc_obj(class: ClassHandle, helper: HelperId) -> Self {
        Self::new(
            TreeKind::AllocObj {
                class,
                helper,
                handle: Box::new(Tree::cns_handle(class)),
            },
            VarType::Ref,
        )
    }

    pub fn init_blk(dst: Tree, value: Tree, size: u32) -> Self {
        Self::new(
            TreeKind::InitBlk { dst: Box::new(dst), value: Box::new(value), size },
            VarType::Void,
        )
    }

    pub fn ret(value: Option<Tree>) -> Self {
        Self::new(TreeKind::Return(value.map(Box::new)), VarType::Void)
    }

    pub fn nop() -> Self {
        Self::new(TreeKind::Nop, VarType::Void)
    }

    /// The operator of this node.
    pub fn oper(&self) -> Oper {
        match &self.kind {
            TreeKind::LclVar(_) => Oper::LclVar,
            TreeKind::CnsInt(_) => Oper::CnsInt,
            TreeKind::CnsHandle(_) => Oper::CnsHandle,
            TreeKind::Asg { .. } => Oper::Asg,
            TreeKind::Add(..) => Oper::Add,
            TreeKind::Eq(..) => Oper::Eq,
            TreeKind::Ne(..) => Oper::Ne,
            TreeKind::Ind(_) => Oper::Ind,
            TreeKind::Field { .. } => Oper::Field,
            TreeKind::Addr(_) => Oper::Addr,
            TreeKind::Call(_) => Oper::Call,
            TreeKind::AllocObj { .. } => Oper::AllocObj,
            TreeKind::InitBlk { .. } => Oper::InitBlk,
            TreeKind::Return(_) => Oper::Return,
            TreeKind::Nop => Oper::Nop,
        }
    }

    /// The local this node reads or writes, if it is a `LclVar`.
    pub fn as_lcl_var(&self) -> Option<LocalId> {
        match self.kind {
            TreeKind::LclVar(local) => Some(local),
            _ => None,
        }
    }

    /// Operands in evaluation order. A call's receiver comes first.
    pub fn operands(&self) -> Vec<&Tree> {
        match &self.kind {
            TreeKind::LclVar(_) | TreeKind::CnsInt(_) | TreeKind::CnsHandle(_) | TreeKind::Nop => {
                Vec::new()
            }
            TreeKind::Asg { dst, src } => vec![&**dst, &**src],
            TreeKind::Add(a, b) | TreeKind::Eq(a, b) | TreeKind::Ne(a, b) => vec![&**a, &**b],
            TreeKind::Ind(op) | TreeKind::Addr(op) => vec![&**op],
            TreeKind::Field { obj, .. } => vec![&**obj],
            TreeKind::Call(call) => call.this_arg.iter().map(|t| &**t).chain(call.args.iter()).collect(),
            TreeKind::AllocObj { handle, .. } => vec![&**handle],
            TreeKind::InitBlk { dst, value, .. } => vec![&**dst, &**value],
            TreeKind::Return(value) => value.iter().map(|t| &**t).collect(),
        }
    }

    /// Mutable operands, same order as [`Tree::operands`].
    pub fn operands_mut(&mut self) -> Vec<&mut Tree> {
        match &mut self.kind {
            TreeKind::LclVar(_) | TreeKind::CnsInt(_) | TreeKind::CnsHandle(_) | TreeKind::Nop => {
                Vec::new()
            }
            TreeKind::Asg { dst, src } => vec![&mut **dst, &mut **src],
            TreeKind::Add(a, b) | TreeKind::Eq(a, b) | TreeKind::Ne(a, b) => vec![&mut **a, &mut **b],
            TreeKind::Ind(op) | TreeKind::Addr(op) => vec![&mut **op],
            TreeKind::Field { obj, .. } => vec![&mut **obj],
            TreeKind::Call(call) => call
                .this_arg
                .iter_mut()
                .map(|t| &mut **t)
                .chain(call.args.iter_mut())
                .collect(),
            TreeKind::AllocObj { handle, .. } => vec![&mut **handle],
            TreeKind::InitBlk { dst, value, .. } => vec![&mut **dst, &mut **value],
            TreeKind::Return(value) => value.iter_mut().map(|t| &mut **t).collect(),
        }
    }

    /// Effects contributed by this node itself.
    fn own_effects(&self) -> EffectFlags {
        match &self.kind {
            TreeKind::Asg { .. } | TreeKind::InitBlk { .. } => EffectFlags::ASG,
            TreeKind::Call(_) => EffectFlags::CALL | EffectFlags::GLOB_REF,
            TreeKind::Ind(_) | TreeKind::Field { .. } => EffectFlags::EXCEPT | EffectFlags::GLOB_REF,
            TreeKind::AllocObj { .. } => EffectFlags::EXCEPT,
            _ => EffectFlags::empty(),
        }
    }

    /// Recompute effect summaries for this subtree bottom-up.
    pub fn recompute_flags(&mut self) -> EffectFlags {
        let mut flags = self.own_effects();
        for op in self.operands_mut() {
            flags |= op.recompute_flags() & EffectFlags::ALL_EFFECT;
        }
        self.flags = flags;
        flags
    }

    /// Whether any node in this subtree is an `AllocObj`.
    pub fn contains_alloc_obj(&self) -> bool {
        let mut found = false;
        super::walk::walk_tree_pre(self, |node, _| {
            if node.oper() == Oper::AllocObj {
                found = true;
                super::walk::WalkResult::Abort
            } else {
                super::walk::WalkResult::Continue
            }
        });
        found
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} {}", self.oper().name(), self.ty)?;
        match &self.kind {
            TreeKind::LclVar(local) => write!(f, " {}", local)?,
            TreeKind::CnsInt(value) => write!(f, " {}", value)?,
            TreeKind::CnsHandle(class) => write!(f, " {}", class)?,
            TreeKind::Field { offset, .. } => write!(f, " +{}", offset)?,
            TreeKind::AllocObj { class, helper, .. } => write!(f, " {} {}", class, helper)?,
            TreeKind::InitBlk { size, .. } => write!(f, " [{}]", size)?,
            TreeKind::Call(call) => match call.kind {
                CallKind::Helper(helper) => write!(f, " {}", helper)?,
                CallKind::User { method, delegate_invoke } => {
                    write!(f, " m{}", method.0)?;
                    if delegate_invoke {
                        f.write_str(" invoke")?;
                    }
                }
            },
            _ => {}
        }
        for op in self.operands() {
            write!(f, " {}", op)?;
        }
        f.write_str(")")
    }
}

// ============================================================================
// Statements
// ============================================================================

/// A top-level tree in a basic block.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Root of the expression tree.
    pub root: Tree,
}

impl Statement {
    /// Create a new statement.
    pub fn new(root: Tree) -> Self {
        Self { root }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.root, f)
    }
}

// ============================================================================
// Tests
// ============================================================================
