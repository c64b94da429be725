//! # objalloc
//!
//! Object stack allocation for an expression-tree JIT IR.
//!
//! The phase looks at every `local = new T` in a method and decides whether
//! the object can live in the method's own stack frame. It builds a
//! points-to graph over the method's pointer-like locals, closes the set of
//! escaping locals over it, rejects allocations inside control-flow cycles,
//! and finally rewrites each site into either a runtime helper call or an
//! inline stack object.
//!
//! ## Pipeline Position
//!
//! ```text
//! Import -> ... -> Global Morph -> Object Allocation -> ... -> Codegen
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use objalloc::ir::{ClassHandle, HelperId, MethodBuilder, MethodFlags, Tree, VarType};
//! use objalloc::runtime::{ClassInfo, EffectNormalizer, HelperTable, TypeTable};
//! use objalloc::{AllocDecision, ObjectAllocConfig, ObjectAllocator};
//!
//! let point = ClassHandle(1);
//! let types = TypeTable::new(8).with_class(point, ClassInfo::reference("Point", 24));
//! let helpers = HelperTable::new();
//!
//! // a = new Point(); return a.x
//! let mut builder = MethodBuilder::new("Program::Main");
//! let a = builder.local("a", VarType::Ref);
//! let va = builder.var(a);
//! builder.push(Tree::asg(va.clone(), Tree::alloc_obj(point, HelperId(1))));
//! builder.push(Tree::ret(Some(Tree::ind(
//!     VarType::Int,
//!     Tree::add(VarType::Byref, va, Tree::cns_nint(8)),
//! ))));
//! let mut body = builder.finish();
//!
//! let config = ObjectAllocConfig { enable_stack_allocation: true, ..Default::default() };
//! let mut phase = ObjectAllocator::new(config, &types, &helpers);
//! let summary = phase.run(&mut body, &mut EffectNormalizer)?;
//!
//! assert!(matches!(summary.sites[0].decision, AllocDecision::Stack { .. }));
//! assert!(body.flags.contains(MethodFlags::HAS_OBJ_STACK_ALLOC));
//! # Ok::<(), objalloc::AllocError>(())
//! ```
//!
//! ## Module Structure
//!
//! - [`ir`] - Trees, statements, method bodies and tree walking
//! - [`alloc`] - Escape analysis and allocation site rewriting
//! - [`bitset`] - Fixed-universe sets of locals
//! - [`runtime`] - Type information, helper purity and normalization hooks
//! - [`config`] - Phase configuration
//! - [`error`] - Error types

pub mod alloc;
pub mod bitset;
pub mod config;
pub mod error;
pub mod ir;
pub mod runtime;

pub use alloc::{AllocDecision, AllocSite, AllocationSummary, ObjectAllocator};
pub use bitset::LocalSet;
pub use config::ObjectAllocConfig;
pub use error::{AllocError, Result};
