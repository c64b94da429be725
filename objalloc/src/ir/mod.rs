//! # Expression-Tree IR
//!
//! The slice of a JIT's intermediate representation that the object
//! allocation phase reads and rewrites.
//!
//! ## Module Structure
//!
//! - [`types`] - Identifiers, types, effect flags, trees and statements
//! - [`body`] - Method bodies, basic blocks and the local variable table
//! - [`walk`] - Pre-order tree walking with a parent stack
//!
//! ## Structure Overview
//!
//! ```text
//! MethodBody
//! ├── Locals (LclVarDsc: type, address-exposed, size)
//! └── Basic Blocks
//!     └── BasicBlockData
//!         ├── Statements (one Tree each)
//!         └── JumpKind (return, goto, cond, switch, throw)
//! ```

pub mod body;
pub mod types;
pub mod walk;

pub use body::{BasicBlockData, BlockFlags, JumpKind, LclVarDsc, MethodBody, MethodBuilder, MethodFlags};
pub use types::{
    BasicBlockId, Call, CallKind, ClassHandle, EffectFlags, HelperId, LocalId, MethodHandle, Oper,
    Statement, Tree, TreeKind, VarType,
};
pub use walk::{walk_tree_pre, ParentStack, WalkResult};
