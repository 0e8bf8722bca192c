// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Block manifest: the ordinal to label to offset map handed to the host side.
//!
//! The host code reads counters back by ordinal; the manifest is what ties an
//! ordinal to a label and a static instruction count.

use serde::{Deserialize, Serialize};

use crate::{plan::SlotLayout, validate::ValidatedKernel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Kernel symbol, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<String>,
    pub counters: usize,
    pub slot_size: u32,
    /// Bytes of each slot the counter occupies, starting at the slot offset.
    pub counter_size: u32,
    pub wavefronts_per_workgroup: u32,
    pub wavefront_stride: u64,
    pub region_size: u64,
    pub blocks: Vec<ManifestBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestBlock {
    pub ordinal: usize,
    pub label: String,
    /// Line of the label in the uninstrumented kernel (1-indexed).
    pub line: usize,
    /// Counter offset relative to the wavefront base.
    pub offset: u64,
    pub instruction_count: usize,
    /// Ordinals of blocks control may flow to next.
    pub successors: Vec<usize>,
}

impl Manifest {
    pub fn new(kernel: &ValidatedKernel<'_>, layout: &SlotLayout, counter_size: u32) -> Self {
        let graph = &kernel.graph;
        let mut flow = vec![(0, Vec::new()); graph.block_count()];
        for node in graph.blocks() {
            flow[graph.ordinal(node)] = (graph.instruction_count(node), graph.successor_ordinals(node));
        }

        let blocks = kernel
            .partition
            .blocks
            .iter()
            .zip(flow)
            .map(|(block, (instruction_count, successors))| ManifestBlock {
                ordinal: block.ordinal,
                label: block.label.to_string(),
                line: block.label_line + 1,
                offset: layout.slot_offset(block.ordinal),
                instruction_count,
                successors,
            })
            .collect();

        Self {
            kernel: None,
            counters: layout.counters,
            slot_size: layout.slot_size,
            counter_size,
            wavefronts_per_workgroup: layout.wavefronts_per_workgroup,
            wavefront_stride: layout.wavefront_stride(),
            region_size: layout.region_size(),
            blocks,
        }
    }

    pub fn with_kernel(mut self, name: impl Into<String>) -> Self {
        self.kernel = Some(name.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Render a C header the host code can include to size and index the
    /// counter region.
    pub fn render_header(&self) -> String {
        let mut lines = vec!["// Generated by bb-instrument. Do not edit.".to_string()];
        if let Some(kernel) = &self.kernel {
            lines.push(format!("// kernel: {kernel}"));
        }
        lines.push("#pragma once".to_string());
        lines.push(String::new());
        lines.push(format!("#define BBCOUNT_NUM_COUNTERS {}", self.counters));
        lines.push(format!("#define BBCOUNT_SLOT_SIZE {}", self.slot_size));
        if self.counter_size < self.slot_size {
            lines.push("// counters occupy the low BBCOUNT_COUNTER_BYTES of each slot".to_string());
        }
        lines.push(format!("#define BBCOUNT_COUNTER_BYTES {}", self.counter_size));
        lines.push(format!(
            "#define BBCOUNT_WAVEFRONTS_PER_WORKGROUP {}",
            self.wavefronts_per_workgroup
        ));
        lines.push(format!("#define BBCOUNT_WAVEFRONT_STRIDE {}", self.wavefront_stride));
        lines.push(format!("#define BBCOUNT_REGION_BYTES {}", self.region_size));
        lines.push(
            "#define BBCOUNT_OFFSET(w, b) ((((w) * BBCOUNT_NUM_COUNTERS) + (b)) * BBCOUNT_SLOT_SIZE)"
                .to_string(),
        );
        lines.push(String::new());
        lines.extend(self.blocks.iter().map(|block| {
            format!(
                "// block {}: {} ({} instructions)",
                block.ordinal, block.label, block.instruction_count
            )
        }));

        let mut out = lines.join("\n");
        out.push('\n');
        out
    }

    /// Render a plain-text table of the blocks.
    pub fn render_table(&self) -> String {
        let width = self
            .blocks
            .iter()
            .map(|block| block.label.len())
            .max()
            .unwrap_or(0)
            .max("label".len());

        let mut out = format!(
            "{:>7}  {:<width$}  {:>6}  {:>6}  {:>6}  successors\n",
            "ordinal", "label", "line", "offset", "insns"
        );
        for block in &self.blocks {
            let successors = block
                .successors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            out.push_str(&format!(
                "{:>7}  {:<width$}  {:>6}  {:>6}  {:>6}  {}\n",
                block.ordinal, block.label, block.line, block.offset, block.instruction_count, successors
            ));
        }
        out
    }
}
