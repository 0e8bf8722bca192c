// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block graph builder
//!
//! Builds a graph over labeled blocks whose instructions implement
//! [`CfgInstruction`]. Branch targets are already block ordinals, so no
//! boundary discovery happens here: the partition into blocks is given.

use petgraph::graph::DiGraph;

use crate::{
    block_graph::{BlockData, BlockGraph, BlockIndex, InnerBlockGraph},
    traits::{BasicInstruction, CfgBlock, CfgInstruction},
};

/// Build a block graph from the preamble and the labeled blocks.
pub fn build_block_graph<B: CfgBlock>(preamble: &B, blocks: &[B]) -> BlockGraph {
    BlockGraphBuilder::new(preamble, blocks).build()
}

/// Builder for constructing a block graph
struct BlockGraphBuilder<'a, B: CfgBlock> {
    preamble: &'a B,
    blocks: &'a [B],
    graph: InnerBlockGraph,
    nodes: Vec<BlockIndex>,
}

impl<'a, B: CfgBlock> BlockGraphBuilder<'a, B> {
    fn new(preamble: &'a B, blocks: &'a [B]) -> Self {
        Self {
            preamble,
            blocks,
            graph: DiGraph::new(),
            nodes: Vec::with_capacity(blocks.len()),
        }
    }

    fn build(mut self) -> BlockGraph {
        self.create_blocks();
        self.add_edges();
        let entry = self.entry_blocks();

        BlockGraph::new(self.graph, entry)
    }

    /// Create one graph node per labeled block, in ordinal order.
    fn create_blocks(&mut self) {
        for (ordinal, block) in self.blocks.iter().enumerate() {
            let node = self.graph.add_node(BlockData {
                ordinal,
                instruction_count: block.instructions().len(),
            });
            self.nodes.push(node);
        }
    }

    /// Add edges for direct branches and fall-through.
    fn add_edges(&mut self) {
        for ordinal in 0..self.blocks.len() {
            let node = self.nodes[ordinal];
            for target in self.flow_targets(&self.blocks[ordinal], Some(ordinal + 1)) {
                self.graph.update_edge(node, target, ());
            }
        }
    }

    /// Blocks reachable directly from the preamble.
    fn entry_blocks(&self) -> Vec<BlockIndex> {
        let mut entry = self.flow_targets(self.preamble, Some(0));
        entry.sort_unstable();
        entry.dedup();
        entry
    }

    /// Successor nodes of an instruction run, given the ordinal of the block
    /// that follows it textually.
    fn flow_targets(&self, block: &B, next: Option<usize>) -> Vec<BlockIndex> {
        let mut targets: Vec<BlockIndex> = block
            .instructions()
            .iter()
            .filter(|i| i.is_branch() && !i.is_call())
            .filter_map(|i| i.branch_target())
            .filter_map(|target| self.nodes.get(target).copied())
            .collect();

        if block.falls_through() {
            if let Some(&next_node) = next.and_then(|n| self.nodes.get(n)) {
                targets.push(next_node);
            }
        }

        targets
    }
}
