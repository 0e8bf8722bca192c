// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Counter injection.
//!
//! Inserts a counter update right after every block label:
//!
//! ```asm
//! BB0_1:
//!     ds_read_b32 v254, v255 offset:4      ; bbcount slot 1 (BB0_1)
//!     s_waitcnt lgkmcnt(0)                 ; bbcount slot 1 (BB0_1)
//!     v_add_u32 v254, 1, v254              ; bbcount slot 1 (BB0_1)
//!     ds_write_b32 v255, v254 offset:4     ; bbcount slot 1 (BB0_1)
//! ```
//!
//! All lanes of a wavefront execute the sequence in lockstep and write the
//! same value, so the update needs no atomics. Other wavefronts use disjoint
//! slots. Every injected line carries the marker comment, which makes a
//! second run detectable and lets [`strip`] undo the transformation.

use std::collections::HashMap;

use tracing::debug;

use crate::{
    config::{CodegenConfig, ReservedRegisters},
    parser::{ParsedAssembly, ParsedLine, Statement},
    plan::{CounterSlot, InstrumentationPlan, PlannedBlock},
};

/// Comment text identifying injected lines.
pub const INJECTION_MARKER: &str = "bbcount slot";

/// Synthesize the counter update for one block.
///
/// The wait is omitted when `codegen.wait` is empty.
pub fn counter_sequence(
    codegen: &CodegenConfig,
    registers: &ReservedRegisters,
    slot: &CounterSlot,
    label: &str,
) -> Vec<String> {
    let scratch = registers.scratch;
    let address = registers.address;
    let offset = slot.byte_offset;
    let marker = format!("; {INJECTION_MARKER} {} ({label})", slot.block_ordinal);

    let mut sequence = vec![format!(
        "{} {scratch}, {address} offset:{offset} {marker}",
        codegen.load
    )];
    if !codegen.wait.trim().is_empty() {
        sequence.push(format!("{} {marker}", codegen.wait.trim()));
    }
    sequence.push(format!("{} {scratch}, 1, {scratch} {marker}", codegen.increment));
    sequence.push(format!(
        "{} {address}, {scratch} offset:{offset} {marker}",
        codegen.store
    ));
    sequence
}

/// Render the kernel with every planned sequence injected.
pub fn inject(asm: &ParsedAssembly<'_>, plan: &InstrumentationPlan<'_, '_>) -> String {
    Injector::new(asm, plan).run()
}

/// State for rewriting one kernel.
struct Injector<'p, 'a> {
    lines: &'p [ParsedLine<'a>],
    by_label_line: HashMap<usize, &'p PlannedBlock<'p, 'a>>,
    indent: &'a str,
    output: String,
}

impl<'p, 'a> Injector<'p, 'a> {
    fn new(asm: &'p ParsedAssembly<'a>, plan: &'p InstrumentationPlan<'p, 'a>) -> Self {
        let by_label_line = plan
            .blocks
            .iter()
            .map(|planned| (planned.block.label_line, planned))
            .collect();
        Self {
            lines: asm.lines(),
            by_label_line,
            indent: asm.indent(),
            output: String::new(),
        }
    }

    fn run(mut self) -> String {
        for (idx, line) in self.lines.iter().enumerate() {
            match self.by_label_line.get(&idx).copied() {
                Some(planned) => self.emit_instrumented_label(line, planned),
                None => self.emit_original_line(line),
            }
        }

        debug!(blocks = self.by_label_line.len(), "counter sequences injected");
        self.output
    }

    /// Emits the label, the counter update, and any statement that shared
    /// the label's line.
    fn emit_instrumented_label(&mut self, line: &ParsedLine<'a>, planned: &PlannedBlock<'_, '_>) {
        let eol = if line.eol.is_empty() { "\n" } else { line.eol };
        let shares_line = !matches!(line.statement, Statement::Empty);

        if shares_line {
            let label_end = line.original.len() - line.after_label().len();
            self.output.push_str(&line.original[..label_end]);
        } else {
            self.output.push_str(line.original);
        }
        self.output.push_str(eol);

        for instruction in &planned.sequence {
            self.output.push_str(self.indent);
            self.output.push_str(instruction);
            self.output.push_str(eol);
        }

        if shares_line {
            self.output.push_str(self.indent);
            self.output.push_str(line.after_label().trim_start());
            self.output.push_str(line.eol);
        }
    }

    /// Emits a line unchanged.
    fn emit_original_line(&mut self, line: &ParsedLine<'_>) {
        self.output.push_str(line.original);
        self.output.push_str(line.eol);
    }
}

/// Remove every injected line.
///
/// A label that shared its line with a statement stays split.
pub fn strip(source: &str) -> String {
    let asm = ParsedAssembly::parse(source);
    let mut removed = 0;
    let mut output = String::with_capacity(source.len());

    for line in asm.lines() {
        if line.comment.is_some_and(|comment| comment.contains(INJECTION_MARKER)) {
            removed += 1;
            continue;
        }
        output.push_str(line.original);
        output.push_str(line.eol);
    }

    debug!(removed, "injected lines stripped");
    output
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{counter_sequence, inject, strip};
    use crate::{
        config::{CodegenConfig, Config, Grammar},
        parser::ParsedAssembly,
        partition::partition,
        plan::{plan, CounterSlot},
    };

    fn instrument(input: &str, counters: usize) -> String {
        let config = Config::default();
        let registers = config.reserved_registers().unwrap();
        let asm = ParsedAssembly::parse(input);
        let partition = partition(&asm, &Grammar::default()).unwrap();
        let plan = plan(&partition, counters, &config.layout, &config.codegen, &registers).unwrap();
        inject(&asm, &plan)
    }

    #[test]
    fn test_counter_sequence() {
        let registers = Config::default().reserved_registers().unwrap();
        let slot = CounterSlot {
            block_ordinal: 2,
            byte_offset: 8,
        };

        assert_eq!(
            counter_sequence(&CodegenConfig::default(), &registers, &slot, "BB0_2"),
            vec![
                "ds_read_b32 v254, v255 offset:8 ; bbcount slot 2 (BB0_2)",
                "s_waitcnt lgkmcnt(0) ; bbcount slot 2 (BB0_2)",
                "v_add_u32 v254, 1, v254 ; bbcount slot 2 (BB0_2)",
                "ds_write_b32 v255, v254 offset:8 ; bbcount slot 2 (BB0_2)",
            ]
        );
    }

    #[test]
    fn test_counter_sequence_without_wait() {
        let registers = Config::default().reserved_registers().unwrap();
        let codegen = CodegenConfig {
            wait: String::new(),
            ..CodegenConfig::default()
        };
        let slot = CounterSlot {
            block_ordinal: 0,
            byte_offset: 0,
        };

        let sequence = counter_sequence(&codegen, &registers, &slot, "BB0_0");
        assert_eq!(sequence.len(), 3);
        assert!(sequence.iter().all(|line| !line.starts_with("s_waitcnt")));
    }

    #[test]
    fn test_inject_after_each_label() {
        let input = indoc! {"
            _Z3fooPf:
            \ts_mov_b32 s0, 0
            BB0_0:
            \tv_mov_b32 v0, 0
            BB0_1:                                  ; %bb.1
            \ts_endpgm
        "};
        let expected = indoc! {"
            _Z3fooPf:
            \ts_mov_b32 s0, 0
            BB0_0:
            \tds_read_b32 v254, v255 offset:0 ; bbcount slot 0 (BB0_0)
            \ts_waitcnt lgkmcnt(0) ; bbcount slot 0 (BB0_0)
            \tv_add_u32 v254, 1, v254 ; bbcount slot 0 (BB0_0)
            \tds_write_b32 v255, v254 offset:0 ; bbcount slot 0 (BB0_0)
            \tv_mov_b32 v0, 0
            BB0_1:                                  ; %bb.1
            \tds_read_b32 v254, v255 offset:4 ; bbcount slot 1 (BB0_1)
            \ts_waitcnt lgkmcnt(0) ; bbcount slot 1 (BB0_1)
            \tv_add_u32 v254, 1, v254 ; bbcount slot 1 (BB0_1)
            \tds_write_b32 v255, v254 offset:4 ; bbcount slot 1 (BB0_1)
            \ts_endpgm
        "};

        assert_eq!(instrument(input, 2), expected);
    }

    #[test]
    fn test_label_sharing_line_with_statement() {
        let input = "BB0_0: s_nop 0 ; keep\n\ts_endpgm\n";
        let output = instrument(input, 1);

        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines[0], "BB0_0:");
        assert!(lines[1].contains("bbcount slot 0"));
        assert_eq!(lines[5], "\ts_nop 0 ; keep");
        assert_eq!(lines[6], "\ts_endpgm");
    }

    #[test]
    fn test_kernel_descriptor_does_not_set_indent() {
        let input = indoc! {"
            \t.amd_kernel_code_t
            \t\tamd_code_version_major = 1
            \t.end_amd_kernel_code_t
            BB0_0:
            \ts_endpgm
        "};
        let output = instrument(input, 1);

        assert!(output.contains("BB0_0:\n\tds_read_b32 v254, v255 offset:0"));
        assert!(!output.contains("\t\tds_read_b32"));
    }

    #[test]
    fn test_preserves_crlf() {
        let input = "BB0_0:\r\n    s_endpgm\r\n";
        let output = instrument(input, 1);

        assert!(output.starts_with("BB0_0:\r\n    ds_read_b32"));
        assert!(output.ends_with("    s_endpgm\r\n"));
        assert_eq!(output.matches("\r\n").count(), 6);
    }

    #[test]
    fn test_no_blocks_is_identity() {
        let input = "k:\n\ts_endpgm\n";
        assert_eq!(instrument(input, 0), input);
    }

    #[test]
    fn test_original_lines_kept_in_order() {
        let input = indoc! {"
            \t.text
            k:
            BB0_0:
            \ts_cbranch_execz BB0_1 // skip
            BB0_1:
            \ts_endpgm
            \t.size k, .Lfunc_end0-k
        "};
        let output = instrument(input, 2);

        let kept: Vec<_> = output.lines().filter(|line| !line.contains("bbcount slot")).collect();
        assert_eq!(kept, input.lines().collect::<Vec<_>>());
    }

    #[test]
    fn test_strip_round_trip() {
        let input = indoc! {"
            k:
            BB0_0:
            \tv_mov_b32 v0, 0
            BB0_1:
            \ts_endpgm
        "};
        assert_eq!(strip(&instrument(input, 2)), input);
    }

    #[test]
    fn test_strip_uninstrumented_is_identity() {
        let input = "k:\n\ts_endpgm";
        assert_eq!(strip(input), input);
    }
}
