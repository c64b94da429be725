//! # Block Cycle Detection
//!
//! Marks every basic block that can reach itself through successor edges.
//! An object allocated in such a block may be live in two iterations at
//! once, so a single stack slot cannot hold it.
//!
//! Membership comes from strongly connected components of the flow graph:
//! a block is in a cycle when its component has more than one block, or
//! when it jumps to itself. Blocks unreachable from the entry are
//! classified the same way.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::trace;

use crate::error::{AllocError, Result};
use crate::ir::{BasicBlockId, MethodBody};

/// Per-block cycle membership, computed once per method.
#[derive(Debug, Clone, Default)]
pub struct CycleInfo {
    in_cycle: Vec<bool>,
}

impl CycleInfo {
    /// Classify every block of `body`.
    pub fn compute(body: &MethodBody) -> Result<Self> {
        let block_count = body.blocks.len();
        let mut graph: DiGraph<BasicBlockId, ()> = DiGraph::with_capacity(block_count, block_count * 2);
        let nodes: Vec<NodeIndex> = body.block_ids().map(|id| graph.add_node(id)).collect();

        for (block, bb) in body.blocks() {
            for succ in bb.successors() {
                let target = nodes
                    .get(succ.index())
                    .copied()
                    .ok_or(AllocError::UnknownBlock { block: succ })?;
                graph.update_edge(nodes[block.index()], target, ());
            }
        }

        let mut in_cycle = vec![false; block_count];
        for component in tarjan_scc(&graph) {
            let cyclic = match component.as_slice() {
                [single] => graph.find_edge(*single, *single).is_some(),
                _ => true,
            };
            if cyclic {
                for node in component {
                    let block = graph[node];
                    trace!(%block, "block is part of a cycle");
                    in_cycle[block.index()] = true;
                }
            }
        }

        Ok(Self { in_cycle })
    }

    /// Whether `block` can reach itself. Blocks created after the analysis
    /// are not classified and answer `false`.
    pub fn is_part_of_cycle(&self, block: BasicBlockId) -> bool {
        self.in_cycle.get(block.index()).copied().unwrap_or(false)
    }

    /// All cycle members, in block order.
    pub fn cycle_blocks(&self) -> impl Iterator<Item = BasicBlockId> + '_ {
        self.in_cycle
            .iter()
            .enumerate()
            .filter(|(_, member)| **member)
            .map(|(index, _)| BasicBlockId::new(index as u32))
    }
}

// ============================================================================
// Tests
// ============================================================================
