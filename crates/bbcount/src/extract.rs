// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Kernel extraction from multi-kernel dumps.
//!
//! A dump is a concatenation of kernels, each introduced by a kernel-boundary
//! marker line. Kernel `i` is the exact byte span from the `i`-th marker line
//! up to, but excluding, the next marker line (or the end of the dump). Text
//! before the first marker is the dump header and belongs to no kernel.

use std::ops::Range;

use tracing::debug;

use crate::{config::Grammar, error::ExtractError, parser::ParsedAssembly};

/// One kernel's slice of a dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSection<'a> {
    /// Position among the dump's markers, from 0.
    pub index: usize,
    /// Decorated kernel name captured from the marker.
    pub name: &'a str,
    /// 1-indexed line number of the marker.
    pub line_number: usize,
    /// The kernel text, marker line included.
    pub text: &'a str,
}

#[derive(Debug, Clone)]
struct SectionSpan<'a> {
    name: &'a str,
    line_number: usize,
    bytes: Range<usize>,
}

/// A scanned dump: the input text plus the location of every kernel.
#[derive(Debug, Clone)]
pub struct KernelDump<'a> {
    text: &'a str,
    sections: Vec<SectionSpan<'a>>,
}

impl<'a> KernelDump<'a> {
    /// Locate every kernel-boundary marker in `text`.
    ///
    /// # Errors
    ///
    /// [`ExtractError::EmptyInput`] if no marker is found.
    pub fn scan(text: &'a str, grammar: &Grammar) -> Result<Self, ExtractError> {
        let mut starts: Vec<(usize, usize, &'a str)> = Vec::new();
        let mut offset = 0;

        for (idx, raw) in text.split_inclusive('\n').enumerate() {
            let line = raw.trim_end_matches(['\n', '\r']);
            if let Some(name) = grammar.kernel_name(line) {
                starts.push((offset, idx + 1, name));
            }
            offset += raw.len();
        }

        if starts.is_empty() {
            return Err(ExtractError::EmptyInput);
        }

        let sections = starts
            .iter()
            .enumerate()
            .map(|(i, &(start, line_number, name))| {
                let end = starts.get(i + 1).map_or(text.len(), |&(next, _, _)| next);
                SectionSpan {
                    name,
                    line_number,
                    bytes: start..end,
                }
            })
            .collect::<Vec<_>>();

        debug!(kernels = sections.len(), "scanned dump");
        Ok(Self { text, sections })
    }

    /// Number of kernels in the dump.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Always false: a scanned dump holds at least one kernel.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Text before the first kernel marker.
    pub fn header(&self) -> &'a str {
        let first = self.sections.first().map_or(self.text.len(), |s| s.bytes.start);
        &self.text[..first]
    }

    /// All kernels in marker order, without terminator checks.
    pub fn sections(&self) -> impl Iterator<Item = KernelSection<'a>> + '_ {
        self.sections
            .iter()
            .enumerate()
            .map(|(index, span)| self.section(index, span))
    }

    /// Select kernel `index`.
    ///
    /// # Errors
    ///
    /// - [`ExtractError::NotFound`]: `index` is not below [`Self::len`]
    /// - [`ExtractError::Unterminated`]: the kernel has no instruction matching
    ///   the terminator grammar
    pub fn kernel(&self, index: usize, grammar: &Grammar) -> Result<KernelSection<'a>, ExtractError> {
        let span = self.sections.get(index).ok_or(ExtractError::NotFound {
            index,
            count: self.sections.len(),
        })?;
        let section = self.section(index, span);

        let asm = ParsedAssembly::parse(section.text);
        let terminated = asm
            .instructions()
            .any(|(_, instruction)| grammar.is_terminator(instruction.mnemonic));
        if !terminated {
            return Err(ExtractError::Unterminated {
                index,
                name: section.name.to_string(),
            });
        }

        Ok(section)
    }

    fn section(&self, index: usize, span: &SectionSpan<'a>) -> KernelSection<'a> {
        KernelSection {
            index,
            name: span.name,
            line_number: span.line_number,
            text: &self.text[span.bytes.clone()],
        }
    }
}

/// Scan `dump` and return kernel `index` in one step.
pub fn extract_kernel<'a>(
    dump: &'a str,
    index: usize,
    grammar: &Grammar,
) -> Result<KernelSection<'a>, ExtractError> {
    KernelDump::scan(dump, grammar)?.kernel(index, grammar)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::{extract_kernel, KernelDump};
    use crate::{config::Grammar, error::ExtractError};

    const TWO_KERNELS: &str = indoc! {"
        \t.text
        \t.amdgcn_target \"amdgcn-amd-amdhsa--gfx906\"
        \t.globl\t_Z5firstPf
        \t.amdgpu_hsa_kernel _Z5firstPf
        _Z5firstPf:
        \tv_mov_b32 v0, 0
        \ts_endpgm
        \t.globl\t_Z6secondPf
        \t.amdgpu_hsa_kernel _Z6secondPf
        _Z6secondPf:
        BB1_0:
        \tv_mov_b32 v1, 1
        \ts_endpgm
    "};

    #[test]
    fn test_scan_finds_both_kernels() {
        let grammar = Grammar::default();
        let dump = KernelDump::scan(TWO_KERNELS, &grammar).unwrap();

        assert_eq!(dump.len(), 2);
        let names: Vec<_> = dump.sections().map(|s| s.name).collect();
        assert_eq!(names, vec!["_Z5firstPf", "_Z6secondPf"]);
        let lines: Vec<_> = dump.sections().map(|s| s.line_number).collect();
        assert_eq!(lines, vec![4, 9]);
    }

    #[test]
    fn test_extract_first_kernel_only() {
        let grammar = Grammar::default();
        let kernel = extract_kernel(TWO_KERNELS, 0, &grammar).unwrap();

        assert_eq!(kernel.index, 0);
        assert!(kernel.text.starts_with("\t.amdgpu_hsa_kernel _Z5firstPf\n"));
        assert!(kernel.text.contains("v_mov_b32 v0, 0"));
        assert!(!kernel.text.contains("_Z6secondPf:"));
        // The next kernel's preceding directives stay with this kernel
        assert!(kernel.text.ends_with("\t.globl\t_Z6secondPf\n"));
    }

    #[test]
    fn test_extract_last_kernel_runs_to_eof() {
        let grammar = Grammar::default();
        let kernel = extract_kernel(TWO_KERNELS, 1, &grammar).unwrap();

        assert_eq!(kernel.name, "_Z6secondPf");
        assert!(kernel.text.starts_with("\t.amdgpu_hsa_kernel _Z6secondPf\n"));
        assert!(kernel.text.ends_with("\ts_endpgm\n"));
        assert!(!kernel.text.contains("_Z5firstPf"));
    }

    #[test]
    fn test_index_out_of_range() {
        let grammar = Grammar::default();
        assert_eq!(
            extract_kernel(TWO_KERNELS, 2, &grammar),
            Err(ExtractError::NotFound { index: 2, count: 2 })
        );
    }

    #[test]
    fn test_no_markers() {
        let grammar = Grammar::default();
        assert_eq!(
            KernelDump::scan("\ts_endpgm\n", &grammar).unwrap_err(),
            ExtractError::EmptyInput
        );
        assert_eq!(
            KernelDump::scan("", &grammar).unwrap_err(),
            ExtractError::EmptyInput
        );
    }

    #[test]
    fn test_unterminated_kernel() {
        let grammar = Grammar::default();
        let dump = indoc! {"
            \t.amdgpu_hsa_kernel _Z4halfPf
            _Z4halfPf:
            \tv_mov_b32 v0, 0
        "};
        assert_eq!(
            extract_kernel(dump, 0, &grammar),
            Err(ExtractError::Unterminated {
                index: 0,
                name: "_Z4halfPf".to_string()
            })
        );
    }

    #[test]
    fn test_terminator_in_comment_does_not_count() {
        let grammar = Grammar::default();
        let dump = "\t.amdgpu_hsa_kernel k\nk:\n\tv_mov_b32 v0, 0 ; s_endpgm\n";
        assert!(matches!(
            extract_kernel(dump, 0, &grammar),
            Err(ExtractError::Unterminated { .. })
        ));
    }

    #[test]
    fn test_header_and_sections_reconstruct_dump() {
        let grammar = Grammar::default();
        let dump = KernelDump::scan(TWO_KERNELS, &grammar).unwrap();

        let rebuilt: String =
            std::iter::once(dump.header()).chain(dump.sections().map(|s| s.text)).collect();
        assert_eq!(rebuilt, TWO_KERNELS);
        assert!(dump.header().ends_with("\t.globl\t_Z5firstPf\n"));
    }

    #[test]
    fn test_crlf_dump() {
        let grammar = Grammar::default();
        let text = "\t.amdgpu_hsa_kernel a\r\na:\r\n\ts_endpgm\r\n\t.amdgpu_hsa_kernel b\r\nb:\r\n\ts_endpgm\r\n";
        let dump = KernelDump::scan(text, &grammar).unwrap();

        let names: Vec<_> = dump.sections().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(dump.kernel(1, &grammar).unwrap().text, "\t.amdgpu_hsa_kernel b\r\nb:\r\n\ts_endpgm\r\n");
    }
}
