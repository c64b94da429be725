//! # Object Stack Allocation
//!
//! Decides, per allocation site, whether a fresh object can live in the
//! method's stack frame instead of the managed heap, then rewrites the site
//! accordingly.
//!
//! ## Pipeline
//!
//! ```text
//! MethodBody
//!     │
//!     ▼ conn_graph::build_connection_graph
//! ConnectionGraph + escaping seed
//!     │
//!     ▼ conn_graph::compute_reachable
//! escaping set (frozen)
//!     │
//!     ▼ scc::CycleInfo::compute
//! cycle membership per block
//!     │
//!     ▼ morph
//! rewritten MethodBody + AllocationSummary
//! ```
//!
//! With stack allocation disabled only the last step runs, and every site
//! becomes a helper call.
//!
//! ## Stack Eligibility
//!
//! A site `local = new T` is allocated on the stack when all hold:
//!
//! - stack allocation is enabled
//! - `local` does not escape
//! - `T` has no finalizer
//! - the allocation size is within the configured ceiling
//! - the containing block is not part of a cycle
//!
//! ## Module Structure
//!
//! - [`escape`] - Escape verdict from the tree above one use
//! - [`conn_graph`] - Points-to graph construction and escape closure
//! - [`scc`] - Cycle membership of basic blocks
//! - [`morph`] - Allocation site rewriting

pub mod conn_graph;
pub mod escape;
pub mod morph;
pub mod scc;

use std::fmt;

use tracing::debug;

use crate::bitset::LocalSet;
use crate::config::ObjectAllocConfig;
use crate::error::{AllocError, Result};
use crate::ir::{BasicBlockId, ClassHandle, LocalId, MethodBody, MethodFlags};
use crate::runtime::{HelperPurity, StmtNormalizer, TypeInfoProvider};

pub use conn_graph::{build_connection_graph, compute_reachable, ConnectionGraph};
pub use escape::{can_lcl_var_escape_via_parent_stack, ParentShape};
pub use scc::CycleInfo;

// ============================================================================
// Summary
// ============================================================================

/// Where an allocation site ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocDecision {
    /// Inline in the stack frame, backed by `temp`.
    Stack { temp: LocalId },
    /// Through the allocation helper.
    Heap,
}

/// One rewritten allocation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocSite {
    /// Block holding the site.
    pub block: BasicBlockId,
    /// Local receiving the new object.
    pub local: LocalId,
    /// Class being allocated.
    pub class: ClassHandle,
    /// What the phase did with it.
    pub decision: AllocDecision,
}

/// Every allocation site rewritten by one run of the phase, in block and
/// statement order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationSummary {
    pub sites: Vec<AllocSite>,
}

impl AllocationSummary {
    /// Number of sites placed in the stack frame.
    pub fn stack_count(&self) -> usize {
        self.sites
            .iter()
            .filter(|site| matches!(site.decision, AllocDecision::Stack { .. }))
            .count()
    }

    /// Number of sites turned into helper calls.
    pub fn heap_count(&self) -> usize {
        self.sites.len() - self.stack_count()
    }

    /// The first site assigning to `local`.
    pub fn site_for(&self, local: LocalId) -> Option<&AllocSite> {
        self.sites.iter().find(|site| site.local == local)
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

impl fmt::Display for AllocationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} stack, {} heap", self.stack_count(), self.heap_count())?;
        for site in &self.sites {
            match site.decision {
                AllocDecision::Stack { temp } => {
                    writeln!(f, "  {} {} = new {} -> stack {}", site.block, site.local, site.class, temp)?
                }
                AllocDecision::Heap => {
                    writeln!(f, "  {} {} = new {} -> heap", site.block, site.local, site.class)?
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Phase Driver
// ============================================================================

/// The object allocation phase for one method.
///
/// Escape analysis runs at most once per instance; its results are frozen
/// and answer [`ObjectAllocator::can_lcl_var_escape`] queries afterwards.
pub struct ObjectAllocator<'rt> {
    config: ObjectAllocConfig,
    types: &'rt dyn TypeInfoProvider,
    helpers: &'rt dyn HelperPurity,
    stack_allocation_enabled: bool,
    analysis_done: bool,
    escaping: Option<LocalSet>,
    cycles: Option<CycleInfo>,
}

impl<'rt> ObjectAllocator<'rt> {
    /// Create the phase. Stack allocation starts as configured.
    pub fn new(
        config: ObjectAllocConfig,
        types: &'rt dyn TypeInfoProvider,
        helpers: &'rt dyn HelperPurity,
    ) -> Self {
        let stack_allocation_enabled = config.enable_stack_allocation;
        Self {
            config,
            types,
            helpers,
            stack_allocation_enabled,
            analysis_done: false,
            escaping: None,
            cycles: None,
        }
    }

    pub fn config(&self) -> &ObjectAllocConfig {
        &self.config
    }

    pub fn is_object_stack_allocation_enabled(&self) -> bool {
        self.stack_allocation_enabled
    }

    /// Turn on stack allocation for this method.
    pub fn enable_object_stack_allocation(&mut self) {
        self.stack_allocation_enabled = true;
    }

    /// Whether statements the phase creates or changes in `body` must be
    /// normalized on the spot.
    pub fn is_running_after_morph(&self, body: &MethodBody) -> bool {
        self.config.run_after_morph && body.morphed
    }

    pub fn is_analysis_done(&self) -> bool {
        self.analysis_done
    }

    /// Run the phase over `body`.
    ///
    /// Methods without allocations are left untouched. Otherwise escape
    /// analysis runs (when stack allocation is enabled) and every
    /// allocation site is rewritten.
    pub fn run(
        &mut self,
        body: &mut MethodBody,
        normalizer: &mut dyn StmtNormalizer,
    ) -> Result<AllocationSummary> {
        if !body.flags.contains(MethodFlags::HAS_NEWOBJ) {
            debug!(method = %body.name, "no allocations, punting");
            return Ok(AllocationSummary::default());
        }

        debug!(
            method = %body.name,
            stack_allocation = self.stack_allocation_enabled,
            "object allocation phase"
        );

        if self.stack_allocation_enabled {
            self.do_analysis(body)?;
        }

        let summary = self.morph_alloc_obj_nodes(body, normalizer)?;
        debug!(
            method = %body.name,
            stack = summary.stack_count(),
            heap = summary.heap_count(),
            "allocation sites rewritten"
        );
        Ok(summary)
    }

    /// Build the connection graph, close the escaping set and classify
    /// block cycles.
    pub fn do_analysis(&mut self, body: &MethodBody) -> Result<()> {
        if self.analysis_done {
            return Err(AllocError::AnalysisAlreadyDone);
        }
        if !self.stack_allocation_enabled {
            return Err(AllocError::AnalysisDisabled);
        }

        let (graph, mut escaping) = build_connection_graph(body, self.helpers)?;
        debug!(
            method = %body.name,
            locals = graph.universe(),
            edges = graph.edge_count(),
            seeded = escaping.len(),
            "connection graph built"
        );
        compute_reachable(&graph, &mut escaping);
        debug!(method = %body.name, escaping = ?escaping, "escape closure");

        self.cycles = Some(CycleInfo::compute(body)?);
        self.escaping = Some(escaping);
        self.analysis_done = true;
        Ok(())
    }

    /// Whether `local` may escape the method. Slots created after the
    /// analysis are not covered and are reported as escaping.
    pub fn can_lcl_var_escape(&self, local: LocalId) -> Result<bool> {
        let escaping = self.escaping.as_ref().ok_or(AllocError::AnalysisNotDone)?;
        Ok(local.index() >= escaping.universe() || escaping.contains(local))
    }

    /// Whether an instance of `class` assigned to `local` may be placed on
    /// the stack, block placement aside.
    pub fn can_allocate_lcl_var_on_stack(&self, local: LocalId, class: ClassHandle) -> Result<bool> {
        if self.types.has_finalizer(class) {
            return Ok(false);
        }
        if self.allocation_size(class) > self.config.max_stack_alloc_size {
            return Ok(false);
        }
        Ok(!self.can_lcl_var_escape(local)?)
    }

    /// Bytes an instance of `class` takes: the value layout for value
    /// classes, the header-inclusive heap layout otherwise.
    pub fn allocation_size(&self, class: ClassHandle) -> u32 {
        if self.types.is_value_class(class) {
            self.types.class_size(class)
        } else {
            self.types.heap_class_size(class)
        }
    }

    /// The frozen escaping set, once the analysis has run.
    pub fn escaping_locals(&self) -> Option<&LocalSet> {
        self.escaping.as_ref()
    }

    /// Cycle membership, once the analysis has run.
    pub fn cycle_info(&self) -> Option<&CycleInfo> {
        self.cycles.as_ref()
    }
}

impl fmt::Debug for ObjectAllocator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectAllocator")
            .field("config", &self.config)
            .field("stack_allocation_enabled", &self.stack_allocation_enabled)
            .field("analysis_done", &self.analysis_done)
            .field("escaping", &self.escaping)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
