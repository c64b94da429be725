//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use objalloc::ir::{ClassHandle, HelperId, MethodBody, Tree, VarType};
use objalloc::runtime::{ClassInfo, EffectNormalizer, HelperTable, TypeTable};
use objalloc::{AllocationSummary, ObjectAllocConfig, ObjectAllocator};

pub const HEADER_SIZE: u32 = 8;

/// Plain 24-byte reference class.
pub const POINT: ClassHandle = ClassHandle(1);
/// Reference class with a finalizer.
pub const FINALIZABLE: ClassHandle = ClassHandle(2);
/// Reference class larger than the default ceiling.
pub const HUGE: ClassHandle = ClassHandle(3);
/// 16-byte value class.
pub const PAIR: ClassHandle = ClassHandle(4);

pub const NEWSFAST: HelperId = HelperId(1);
pub const PURE_HELPER: HelperId = HelperId(20);
pub const IMPURE_HELPER: HelperId = HelperId(21);

pub fn types() -> TypeTable {
    TypeTable::new(HEADER_SIZE)
        .with_class(POINT, ClassInfo::reference("Point", 24))
        .with_class(FINALIZABLE, ClassInfo::reference("FileHandle", 32).with_finalizer())
        .with_class(HUGE, ClassInfo::reference("Buffer", 0x4000))
        .with_class(PAIR, ClassInfo::value("Pair", 16))
}

pub fn helpers() -> HelperTable {
    HelperTable::new().with_pure(PURE_HELPER)
}

pub fn stack_config() -> ObjectAllocConfig {
    ObjectAllocConfig {
        enable_stack_allocation: true,
        verify_canonical_shapes: true,
        ..ObjectAllocConfig::default()
    }
}

/// `new T` through the fast allocation helper.
pub fn new_obj(class: ClassHandle) -> Tree {
    Tree::alloc_obj(class, NEWSFAST)
}

/// `*(local + offset)`, the shape of a field load.
pub fn load_field(local: Tree, offset: i64) -> Tree {
    Tree::ind(VarType::Int, Tree::add(VarType::Byref, local, Tree::cns_nint(offset)))
}

/// Run the phase once with a fresh allocator.
pub fn run_phase(body: &mut MethodBody, config: ObjectAllocConfig) -> AllocationSummary {
    let (types, helpers) = (types(), helpers());
    let mut phase = ObjectAllocator::new(config, &types, &helpers);
    phase
        .run(body, &mut EffectNormalizer)
        .expect("object allocation phase should succeed")
}
