//! # Runtime Interfaces
//!
//! Capabilities the object allocation phase borrows from its host:
//!
//! - [`TypeInfoProvider`] - class layout and finalization facts
//! - [`HelperPurity`] - which runtime helpers are free of observable effects
//! - [`StmtNormalizer`] - re-normalization of statements the phase creates
//!   or changes after global morph has run
//!
//! [`TypeTable`] and [`HelperTable`] are in-memory implementations for
//! embedders without a live runtime, and for tests.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::Result;
use crate::ir::{BasicBlockId, ClassHandle, HelperId, MethodBody};

// ============================================================================
// Type Information
// ============================================================================

/// Runtime type metadata queries.
pub trait TypeInfoProvider {
    /// Whether instances of `class` need finalization.
    fn has_finalizer(&self, class: ClassHandle) -> bool;

    /// Whether `class` is a value type.
    fn is_value_class(&self, class: ClassHandle) -> bool;

    /// Size of `class` laid out as a value type.
    fn class_size(&self, class: ClassHandle) -> u32;

    /// Size of a heap instance of `class`, object header included.
    fn heap_class_size(&self, class: ClassHandle) -> u32;

    /// Size of the object header that precedes the type handle.
    fn object_header_size(&self) -> u32;
}

/// Helper side-effect metadata.
pub trait HelperPurity {
    /// Whether `helper` has no side effects that could capture an argument.
    fn is_pure(&self, helper: HelperId) -> bool;
}

/// Layout facts about one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassInfo {
    /// Name, for dumps.
    pub name: String,
    /// Value type rather than reference type.
    pub is_value_class: bool,
    /// Needs finalization.
    pub has_finalizer: bool,
    /// Size as a value type.
    pub class_size: u32,
    /// Size of a heap instance, header included.
    pub heap_size: u32,
}

impl ClassInfo {
    /// A reference class whose heap instances take `heap_size` bytes.
    pub fn reference(name: impl Into<String>, heap_size: u32) -> Self {
        Self {
            name: name.into(),
            is_value_class: false,
            has_finalizer: false,
            class_size: heap_size,
            heap_size,
        }
    }

    /// A value class of `size` bytes.
    pub fn value(name: impl Into<String>, size: u32) -> Self {
        Self {
            name: name.into(),
            is_value_class: true,
            has_finalizer: false,
            class_size: size,
            heap_size: size,
        }
    }

    /// Mark the class as finalizable.
    pub fn with_finalizer(mut self) -> Self {
        self.has_finalizer = true;
        self
    }
}

/// A fixed table of classes.
///
/// Unknown classes answer conservatively: finalizable and unboundedly
/// large, so they are never placed on the stack.
#[derive(Debug, Clone)]
pub struct TypeTable {
    classes: FxHashMap<ClassHandle, ClassInfo>,
    header_size: u32,
}

impl TypeTable {
    /// An empty table for a runtime with `header_size`-byte object headers.
    pub fn new(header_size: u32) -> Self {
        Self { classes: FxHashMap::default(), header_size }
    }

    /// Add a class.
    pub fn with_class(mut self, class: ClassHandle, info: ClassInfo) -> Self {
        self.classes.insert(class, info);
        self
    }

    /// Add a class in place.
    pub fn insert(&mut self, class: ClassHandle, info: ClassInfo) {
        self.classes.insert(class, info);
    }

    /// Look up a class.
    pub fn get(&self, class: ClassHandle) -> Option<&ClassInfo> {
        self.classes.get(&class)
    }
}

impl TypeInfoProvider for TypeTable {
    fn has_finalizer(&self, class: ClassHandle) -> bool {
        self.get(class).map_or(true, |info| info.has_finalizer)
    }

    fn is_value_class(&self, class: ClassHandle) -> bool {
        self.get(class).map_or(false, |info| info.is_value_class)
    }

    fn class_size(&self, class: ClassHandle) -> u32 {
        self.get(class).map_or(u32::MAX, |info| info.class_size)
    }

    fn heap_class_size(&self, class: ClassHandle) -> u32 {
        self.get(class).map_or(u32::MAX, |info| info.heap_size)
    }

    fn object_header_size(&self) -> u32 {
        self.header_size
    }
}

/// A fixed set of pure helpers.
#[derive(Debug, Clone, Default)]
pub struct HelperTable {
    pure: FxHashSet<HelperId>,
}

impl HelperTable {
    /// A table in which no helper is pure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `helper` as pure.
    pub fn with_pure(mut self, helper: HelperId) -> Self {
        self.pure.insert(helper);
        self
    }
}

impl HelperPurity for HelperTable {
    fn is_pure(&self, helper: HelperId) -> bool {
        self.pure.contains(&helper)
    }
}

// ============================================================================
// Normalization
// ============================================================================

/// Re-normalizes a single statement in place.
pub trait StmtNormalizer {
    /// Normalize statement `stmt` of `block`.
    fn normalize(&mut self, body: &mut MethodBody, block: BasicBlockId, stmt: usize) -> Result<()>;
}

/// Recomputes effect summaries bottom-up, so every node's flags reflect
/// its operands after a rewrite.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectNormalizer;

impl StmtNormalizer for EffectNormalizer {
    fn normalize(&mut self, body: &mut MethodBody, block: BasicBlockId, stmt: usize) -> Result<()> {
        body.statement_mut(block, stmt)?.root.recompute_flags();
        Ok(())
    }
}
