// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Basic-block partitioning and label resolution.
//!
//! A line whose label matches the block grammar opens a block; everything up
//! to the next block label belongs to it. Lines before the first block label
//! form the preamble, which is never instrumented. Labels outside the block
//! grammar (the kernel symbol, `.Lfunc_end0`) do not split anything.

use std::{collections::HashMap, ops::Range};

use cfg::{build_block_graph, BasicInstruction, BlockGraph, CfgBlock, CfgInstruction};

use crate::{
    config::Grammar,
    error::{InstrumentError, InstrumentResult},
    parser::ParsedAssembly,
};

/// A label-delimited basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock<'a> {
    /// The entry label.
    pub label: &'a str,
    /// Position of the label among block labels (0-based).
    pub ordinal: usize,
    /// Index of the label's line in [`ParsedAssembly::lines`].
    pub label_line: usize,
    /// Line indices after the label line, up to the next block label.
    pub body: Range<usize>,
    /// Instructions in the block, including one on the label line itself.
    pub instruction_count: usize,
}

/// One kernel split into its preamble and blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition<'a> {
    /// Line indices before the first block label.
    pub preamble: Range<usize>,
    pub blocks: Vec<BasicBlock<'a>>,
}

/// Partition a kernel into basic blocks.
///
/// # Errors
///
/// [`InstrumentError::DuplicateLabel`] if any label is defined twice. This is
/// checked for every label, not only block labels, since a duplicate makes
/// branch targets ambiguous.
pub fn partition<'a>(asm: &ParsedAssembly<'a>, grammar: &Grammar) -> InstrumentResult<Partition<'a>> {
    let lines = asm.lines();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut label_lines: Vec<(usize, &'a str)> = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(label) = line.label else { continue };

        if let Some(&first_line) = seen.get(label) {
            return Err(InstrumentError::DuplicateLabel {
                label: label.to_string(),
                first_line,
                second_line: line.line_number,
            });
        }
        seen.insert(label, line.line_number);

        if grammar.is_block_label(label) {
            label_lines.push((idx, label));
        }
    }

    let preamble_end = label_lines.first().map_or(lines.len(), |&(idx, _)| idx);

    let blocks = label_lines
        .iter()
        .enumerate()
        .map(|(ordinal, &(label_line, label))| {
            let end = label_lines.get(ordinal + 1).map_or(lines.len(), |&(next, _)| next);
            let instruction_count = lines[label_line..end]
                .iter()
                .filter(|line| line.instruction().is_some())
                .count();
            BasicBlock {
                label,
                ordinal,
                label_line,
                body: label_line + 1..end,
                instruction_count,
            }
        })
        .collect();

    Ok(Partition {
        preamble: 0..preamble_end,
        blocks,
    })
}

/// An instruction with its branch target resolved to a block ordinal.
#[derive(Debug, Clone)]
pub struct ResolvedInstruction<'a> {
    /// The instruction mnemonic.
    pub mnemonic: &'a str,
    /// Target block ordinal, if this is a direct branch.
    pub branch_target: Option<usize>,
    /// Original source line number (1-indexed).
    pub line_number: usize,
}

impl BasicInstruction for ResolvedInstruction<'_> {
    fn mnemonic(&self) -> &str {
        self.mnemonic
    }
}

impl CfgInstruction for ResolvedInstruction<'_> {
    fn branch_target(&self) -> Option<usize> {
        self.branch_target
    }
}

/// The resolved instructions of the preamble or of one block.
#[derive(Debug, Clone, Default)]
pub struct ResolvedBlock<'a> {
    pub instructions: Vec<ResolvedInstruction<'a>>,
}

impl<'a> CfgBlock for ResolvedBlock<'a> {
    type Instruction = ResolvedInstruction<'a>;

    fn instructions(&self) -> &[ResolvedInstruction<'a>] {
        &self.instructions
    }
}

/// A kernel whose branch labels all resolve to block entries.
#[derive(Debug, Clone)]
pub struct ResolvedKernel<'a> {
    pub preamble: ResolvedBlock<'a>,
    pub blocks: Vec<ResolvedBlock<'a>>,
}

impl ResolvedKernel<'_> {
    /// Build the block-level control flow graph.
    pub fn graph(&self) -> BlockGraph {
        build_block_graph(&self.preamble, &self.blocks)
    }
}

/// Where a label is defined.
struct LabelSite {
    line_number: usize,
    /// Ordinal if the label opens a block.
    block: Option<usize>,
    /// Enclosing block ordinal, `None` inside the preamble.
    enclosing: Option<usize>,
}

impl<'a> Partition<'a> {
    /// Resolve branch labels to block ordinals.
    ///
    /// Calls are not resolved: their targets are functions outside the
    /// kernel, and they return to the next instruction anyway.
    ///
    /// # Errors
    ///
    /// - [`InstrumentError::MalformedBlock`]: a branch enters a block somewhere
    ///   other than its entry label, or jumps into the preamble
    /// - [`InstrumentError::UndefinedLabel`]: a branch references a label that
    ///   is not defined in the kernel
    pub fn resolve(&self, asm: &ParsedAssembly<'a>) -> InstrumentResult<ResolvedKernel<'a>> {
        let sites = self.label_sites(asm);

        let resolve_range = |range: Range<usize>| -> InstrumentResult<ResolvedBlock<'a>> {
            let mut instructions = Vec::new();
            for line in &asm.lines()[range] {
                let Some(instruction) = line.instruction() else { continue };

                let branch_target = match instruction.branch_target_label() {
                    Some(label) if !instruction.is_call() => {
                        Some(self.resolve_label(&sites, label, line.line_number)?)
                    }
                    _ => None,
                };

                instructions.push(ResolvedInstruction {
                    mnemonic: instruction.mnemonic,
                    branch_target,
                    line_number: line.line_number,
                });
            }
            Ok(ResolvedBlock { instructions })
        };

        let preamble = resolve_range(self.preamble.clone())?;
        let blocks = self
            .blocks
            .iter()
            .map(|block| resolve_range(block.label_line..block.body.end))
            .collect::<InstrumentResult<Vec<_>>>()?;

        Ok(ResolvedKernel { preamble, blocks })
    }

    fn label_sites(&self, asm: &ParsedAssembly<'a>) -> HashMap<&'a str, LabelSite> {
        let mut sites = HashMap::new();
        let mut enclosing = None;
        let mut next_block = self.blocks.iter().peekable();

        for (idx, line) in asm.lines().iter().enumerate() {
            let mut block = None;
            if next_block.peek().is_some_and(|b| b.label_line == idx) {
                let opened = next_block.next().map(|b| b.ordinal);
                enclosing = opened;
                block = opened;
            }
            if let Some(label) = line.label {
                sites.insert(
                    label,
                    LabelSite {
                        line_number: line.line_number,
                        block,
                        enclosing,
                    },
                );
            }
        }

        sites
    }

    fn resolve_label(
        &self,
        sites: &HashMap<&'a str, LabelSite>,
        label: &str,
        line_number: usize,
    ) -> InstrumentResult<usize> {
        let site = sites.get(label).ok_or_else(|| InstrumentError::UndefinedLabel {
            label: label.to_string(),
            line: line_number,
        })?;

        if let Some(ordinal) = site.block {
            return Ok(ordinal);
        }

        let reason = match site.enclosing {
            Some(ordinal) => format!(
                "branch at line {line_number} enters block '{}' through label '{label}' (line {}) instead of its entry",
                self.blocks[ordinal].label, site.line_number
            ),
            None => format!(
                "branch at line {line_number} jumps into the kernel preamble (line {})",
                site.line_number
            ),
        };
        Err(InstrumentError::MalformedBlock {
            label: label.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use cfg::BasicInstruction;
    use indoc::indoc;

    use super::partition;
    use crate::{config::Grammar, error::InstrumentError, parser::ParsedAssembly};

    const THREE_BLOCKS: &str = indoc! {"
        \t.amdgpu_hsa_kernel _Z4loopPf
        _Z4loopPf:
        ; %bb.0:
        \ts_mov_b32 s0, 0
        BB0_0:
        \tv_mov_b32 v0, s0
        BB0_1:
        \ts_add_u32 s0, s0, 1
        \ts_cmp_lt_u32 s0, 10
        \ts_cbranch_scc1 BB0_1
        BB0_2:
        \ts_endpgm
        .Lfunc_end0:
        \t.size\t_Z4loopPf, .Lfunc_end0-_Z4loopPf
    "};

    #[test]
    fn test_blocks_in_textual_order() {
        let asm = ParsedAssembly::parse(THREE_BLOCKS);
        let partition = partition(&asm, &Grammar::default()).unwrap();

        let labels: Vec<_> = partition.blocks.iter().map(|b| b.label).collect();
        assert_eq!(labels, vec!["BB0_0", "BB0_1", "BB0_2"]);
        let ordinals: Vec<_> = partition.blocks.iter().map(|b| b.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2]);
    }

    #[test]
    fn test_preamble_and_bodies_cover_every_line() {
        let asm = ParsedAssembly::parse(THREE_BLOCKS);
        let partition = partition(&asm, &Grammar::default()).unwrap();

        assert_eq!(partition.preamble, 0..4);
        let mut covered = partition.preamble.len();
        for block in &partition.blocks {
            covered += 1 + block.body.len();
        }
        assert_eq!(covered, asm.lines().len());
    }

    #[test]
    fn test_non_block_labels_stay_in_block() {
        let asm = ParsedAssembly::parse(THREE_BLOCKS);
        let partition = partition(&asm, &Grammar::default()).unwrap();

        let last = &partition.blocks[2];
        assert_eq!(last.body.end, asm.lines().len());
        assert_eq!(last.instruction_count, 1);
        assert_eq!(partition.blocks[1].instruction_count, 3);
    }

    #[test]
    fn test_no_labels_yields_no_blocks() {
        let asm = ParsedAssembly::parse("k:\n\ts_mov_b32 s0, 0\n\ts_endpgm\n");
        let partition = partition(&asm, &Grammar::default()).unwrap();

        assert!(partition.blocks.is_empty());
        assert_eq!(partition.preamble, 0..3);
    }

    #[test]
    fn test_duplicate_block_label() {
        let input = indoc! {"
            BB0_0:
            \ts_nop 0
            BB0_1:
            \ts_nop 0
            BB0_1:
            \ts_endpgm
        "};
        let asm = ParsedAssembly::parse(input);

        assert_eq!(
            partition(&asm, &Grammar::default()),
            Err(InstrumentError::DuplicateLabel {
                label: "BB0_1".to_string(),
                first_line: 3,
                second_line: 5,
            })
        );
    }

    #[test]
    fn test_duplicate_non_block_label() {
        let asm = ParsedAssembly::parse("a:\n\ts_nop 0\na:\n\ts_endpgm\n");
        assert!(matches!(
            partition(&asm, &Grammar::default()),
            Err(InstrumentError::DuplicateLabel { .. })
        ));
    }

    #[test]
    fn test_label_with_statement_counts_instruction() {
        let asm = ParsedAssembly::parse("BB0_0: s_nop 0\n\ts_endpgm\n");
        let partition = partition(&asm, &Grammar::default()).unwrap();

        assert_eq!(partition.blocks[0].instruction_count, 2);
    }

    #[test]
    fn test_resolve_back_edge() {
        let asm = ParsedAssembly::parse(THREE_BLOCKS);
        let partition = partition(&asm, &Grammar::default()).unwrap();
        let resolved = partition.resolve(&asm).unwrap();

        assert_eq!(resolved.preamble.instructions.len(), 1);
        let branch = resolved.blocks[1].instructions.last().unwrap();
        assert!(branch.is_conditional());
        assert_eq!(branch.branch_target, Some(1));
        assert_eq!(branch.line_number, 10);
    }

    #[test]
    fn test_resolved_graph() {
        let asm = ParsedAssembly::parse(THREE_BLOCKS);
        let partition = partition(&asm, &Grammar::default()).unwrap();
        let graph = partition.resolve(&asm).unwrap().graph();

        assert_eq!(graph.block_count(), 3);
        let loop_block = graph.blocks().nth(1).unwrap();
        assert_eq!(graph.successor_ordinals(loop_block), vec![1, 2]);
        assert!(graph.compute_unreachable().is_empty());
    }

    #[test]
    fn test_branch_into_middle_of_block() {
        let input = indoc! {"
            BB0_0:
            \ts_cbranch_execz .Linside
            BB0_1:
            \tv_mov_b32 v0, 0
            .Linside:
            \tv_mov_b32 v1, 0
            \ts_endpgm
        "};
        let asm = ParsedAssembly::parse(input);
        let partition = partition(&asm, &Grammar::default()).unwrap();

        match partition.resolve(&asm) {
            Err(InstrumentError::MalformedBlock { label, reason }) => {
                assert_eq!(label, ".Linside");
                assert!(reason.contains("BB0_1"), "{reason}");
            }
            other => panic!("expected MalformedBlock, got {other:?}"),
        }
    }

    #[test]
    fn test_branch_into_preamble() {
        let input = indoc! {"
            k:
            \ts_nop 0
            BB0_0:
            \ts_branch k
            \ts_endpgm
        "};
        let asm = ParsedAssembly::parse(input);
        let partition = partition(&asm, &Grammar::default()).unwrap();

        assert!(matches!(
            partition.resolve(&asm),
            Err(InstrumentError::MalformedBlock { ref label, .. }) if label == "k"
        ));
    }

    #[test]
    fn test_undefined_label() {
        let asm = ParsedAssembly::parse("BB0_0:\n\ts_branch BB0_9\n\ts_endpgm\n");
        let partition = partition(&asm, &Grammar::default()).unwrap();

        assert_eq!(
            partition.resolve(&asm).unwrap_err(),
            InstrumentError::UndefinedLabel {
                label: "BB0_9".to_string(),
                line: 2,
            }
        );
    }

    #[test]
    fn test_calls_are_not_resolved() {
        let asm = ParsedAssembly::parse("BB0_0:\n\ts_call_b64 s[30:31], helper\n\ts_endpgm\n");
        let partition = partition(&asm, &Grammar::default()).unwrap();
        let resolved = partition.resolve(&asm).unwrap();

        assert_eq!(resolved.blocks[0].instructions[0].branch_target, None);
    }
}
