// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Label-level block graph data structures

use std::collections::{HashSet, VecDeque};

pub type BlockIndex = petgraph::graph::NodeIndex;

pub(crate) type InnerBlockGraph = petgraph::graph::DiGraph<BlockData, ()>;

/// Data stored in each labeled block node
#[derive(Debug)]
pub struct BlockData {
    /// Position of the block's label in textual order (0-based).
    pub ordinal: usize,

    /// Number of actual instructions in this block
    pub instruction_count: usize,
}

/// Control flow between labeled blocks, backed by petgraph.
///
/// Node indices coincide with block ordinals. The preamble (code before the
/// first label) is not a node; its successors are kept as the entry set.
#[derive(Debug)]
pub struct BlockGraph {
    /// The underlying directed graph
    graph: InnerBlockGraph,
    /// Blocks the preamble can transfer control to
    entry: Vec<BlockIndex>,
}

impl BlockGraph {
    /// Create a new block graph (used by builder).
    pub(crate) fn new(graph: InnerBlockGraph, entry: Vec<BlockIndex>) -> Self {
        Self { graph, entry }
    }

    /// Iterate over all block indices
    pub fn blocks(&self) -> impl Iterator<Item = BlockIndex> {
        self.graph.node_indices()
    }

    /// Get the number of blocks
    pub fn block_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of actual instructions in a block
    pub fn instruction_count(&self, block: BlockIndex) -> usize {
        self.graph[block].instruction_count
    }

    /// Ordinal of a block in textual order
    pub fn ordinal(&self, block: BlockIndex) -> usize {
        self.graph[block].ordinal
    }

    /// Iterate over CFG successors of a block
    pub fn successors(&self, block: BlockIndex) -> impl Iterator<Item = BlockIndex> + '_ {
        self.graph.neighbors(block)
    }

    /// Successor ordinals of a block, sorted ascending.
    pub fn successor_ordinals(&self, block: BlockIndex) -> Vec<usize> {
        let mut ordinals: Vec<usize> = self.successors(block).map(|s| self.ordinal(s)).collect();
        ordinals.sort_unstable();
        ordinals.dedup();
        ordinals
    }

    /// Find all blocks not reachable from the preamble.
    ///
    /// Such blocks keep a counter that always reads zero; they are not an
    /// error but worth reporting.
    pub fn compute_unreachable(&self) -> Vec<BlockIndex> {
        let reachable = self.compute_reachable();
        self.graph
            .node_indices()
            .filter(|node| !reachable.contains(node))
            .collect()
    }

    /// Computes all blocks reachable from the entry set via BFS.
    fn compute_reachable(&self) -> HashSet<BlockIndex> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();

        for &node in &self.entry {
            if reachable.insert(node) {
                queue.push_back(node);
            }
        }

        while let Some(node) = queue.pop_front() {
            for successor in self.graph.neighbors(node) {
                if reachable.insert(successor) {
                    queue.push_back(successor);
                }
            }
        }

        reachable
    }
}
