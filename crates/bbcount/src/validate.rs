// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Structural checks run before anything is emitted.
//!
//! Checks run in a fixed order and the first failure wins:
//! already instrumented, duplicate labels, missing terminator, malformed
//! blocks and undefined labels (in textual order). Slot planning checks
//! follow in [`crate::plan`].

use std::fmt;

use cfg::{registers_in, BlockGraph};
use tracing::{debug, warn};

use crate::{
    config::{Grammar, ReservedRegisters},
    error::{InstrumentError, InstrumentResult},
    instrument::INJECTION_MARKER,
    parser::ParsedAssembly,
    partition::{partition, Partition},
};

/// A kernel that passed every structural check.
#[derive(Debug)]
pub struct ValidatedKernel<'a> {
    pub partition: Partition<'a>,
    pub graph: BlockGraph,
}

/// Non-fatal findings about a kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// The kernel has no block labels; nothing will be counted.
    NoBlocks,
    /// No control flow path from the kernel entry reaches this block.
    UnreachableBlock { label: String },
    /// The kernel already mentions a register the counter update clobbers.
    ReservedRegisterUsed { register: String, line: usize },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::NoBlocks => write!(f, "kernel has no basic-block labels"),
            Warning::UnreachableBlock { label } => {
                write!(f, "block '{label}' is unreachable from the kernel entry")
            }
            Warning::ReservedRegisterUsed { register, line } => write!(
                f,
                "line {line} uses reserved register {register}; its value will be clobbered"
            ),
        }
    }
}

/// Run all structural checks on one kernel.
pub fn validate<'a>(asm: &ParsedAssembly<'a>, grammar: &Grammar) -> InstrumentResult<ValidatedKernel<'a>> {
    check_not_instrumented(asm)?;
    let partition = partition(asm, grammar)?;
    check_terminated(asm, grammar)?;
    check_trailing_block(&partition)?;
    let graph = partition.resolve(asm)?.graph();

    debug!(
        blocks = partition.blocks.len(),
        preamble_lines = partition.preamble.len(),
        "kernel validated"
    );

    Ok(ValidatedKernel { partition, graph })
}

fn check_not_instrumented(asm: &ParsedAssembly<'_>) -> InstrumentResult<()> {
    match asm
        .lines()
        .iter()
        .find(|line| line.comment.is_some_and(|comment| comment.contains(INJECTION_MARKER)))
    {
        Some(line) => Err(InstrumentError::AlreadyInstrumented {
            line: line.line_number,
        }),
        None => Ok(()),
    }
}

fn check_terminated(asm: &ParsedAssembly<'_>, grammar: &Grammar) -> InstrumentResult<()> {
    if asm
        .instructions()
        .any(|(_, instruction)| grammar.is_terminator(instruction.mnemonic))
    {
        Ok(())
    } else {
        Err(InstrumentError::Unterminated)
    }
}

/// A block label with nothing after it is a label the assembler would attach
/// to the next kernel's code.
fn check_trailing_block(partition: &Partition<'_>) -> InstrumentResult<()> {
    match partition.blocks.last() {
        Some(block) if block.instruction_count == 0 => Err(InstrumentError::MalformedBlock {
            label: block.label.to_string(),
            reason: "no instructions follow the label before the end of the kernel".to_string(),
        }),
        _ => Ok(()),
    }
}

/// Collect warnings for a validated kernel and log each one.
pub fn collect_warnings(
    asm: &ParsedAssembly<'_>,
    kernel: &ValidatedKernel<'_>,
    reserved: &ReservedRegisters,
) -> Vec<Warning> {
    let mut warnings = Vec::new();

    if kernel.partition.blocks.is_empty() {
        warnings.push(Warning::NoBlocks);
    }

    let mut unreachable: Vec<_> = kernel
        .graph
        .compute_unreachable()
        .into_iter()
        .map(|block| kernel.graph.ordinal(block))
        .collect();
    unreachable.sort_unstable();
    warnings.extend(unreachable.into_iter().map(|ordinal| Warning::UnreachableBlock {
        label: kernel.partition.blocks[ordinal].label.to_string(),
    }));

    for (line, instruction) in asm.instructions() {
        let clobbered = registers_in(instruction.operand_text)
            .find(|used| reserved.iter().any(|register| register.overlaps(used)));
        if let Some(register) = clobbered {
            warnings.push(Warning::ReservedRegisterUsed {
                register: register.to_string(),
                line: line.line_number,
            });
        }
    }

    for warning in &warnings {
        warn!("{warning}");
    }

    warnings
}
