// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! AMDGCN assembly text lexer.
//!
//! Splits LLVM-style AMDGPU assembly into lines and classifies each one as a
//! label, instruction, directive, or blank/comment line. No validation is done
//! on mnemonics or operands; label resolution happens in [`crate::partition`].
//!
//! Every line keeps its exact original bytes, including its line terminator,
//! so the injector can reproduce untouched lines byte-for-byte.

use cfg::BasicInstruction;

/// Directives that open a raw data region (YAML metadata, kernel descriptor
/// fields) in which lines like `.name: foo` or `wavefront_size = 6` must not
/// be read as labels or instructions.
const DATA_REGIONS: &[(&str, &str)] = &[
    (".amd_kernel_code_t", ".end_amd_kernel_code_t"),
    (".amdgpu_metadata", ".end_amdgpu_metadata"),
    (".amd_amdgpu_hsa_metadata", ".end_amd_amdgpu_hsa_metadata"),
    (".amdgpu_pal_metadata", ".end_amdgpu_pal_metadata"),
];

/// Coarse classification of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Defines a label (possibly followed by a statement on the same line).
    Label,
    Instruction,
    Directive,
    /// Empty, whitespace-only, or comment-only.
    Blank,
}

/// The content of an assembly line after any label.
#[derive(Debug)]
pub enum Statement<'a> {
    /// A machine instruction.
    Instruction(UnresolvedInstruction<'a>),
    /// An assembler directive (e.g., `.p2align`, `.size`) or metadata.
    Directive,
    /// Empty line or label-only.
    Empty,
}

/// An unresolved instruction with operands as raw strings.
///
/// Branch targets are still label names, not block ordinals.
#[derive(Debug)]
pub struct UnresolvedInstruction<'a> {
    /// The mnemonic (e.g., "s_mov_b32", "s_cbranch_execz").
    pub mnemonic: &'a str,
    /// Comma-separated operands (e.g., `["v0", "v1 offset:16"]`).
    pub operands: Vec<&'a str>,
    /// Everything after the mnemonic, for register scanning.
    pub operand_text: &'a str,
}

impl<'a> UnresolvedInstruction<'a> {
    /// Parse an instruction from text (after removing label and comments).
    fn parse(text: &'a str) -> Self {
        let text = text.trim();

        let mut parts = text.splitn(2, |c: char| c.is_whitespace());
        let mnemonic = parts.next().unwrap_or("");
        let operand_text = parts.next().unwrap_or("").trim();

        Self {
            mnemonic,
            operands: Self::parse_operands(operand_text),
            operand_text,
        }
    }

    /// Parse comma-separated operands, respecting brackets of register tuples.
    fn parse_operands(s: &'a str) -> Vec<&'a str> {
        if s.is_empty() {
            return Vec::new();
        }

        let mut operands = Vec::new();
        let mut start = 0;
        let mut bracket_depth: usize = 0;

        for (i, c) in s.char_indices() {
            match c {
                '[' => bracket_depth += 1,
                ']' => bracket_depth = bracket_depth.saturating_sub(1),
                ',' if bracket_depth == 0 => {
                    let operand = s[start..i].trim();
                    if !operand.is_empty() {
                        operands.push(operand);
                    }
                    start = i + 1;
                }
                _ => {}
            }
        }

        let operand = s[start..].trim();
        if !operand.is_empty() {
            operands.push(operand);
        }

        operands
    }

    /// Get the branch target label, if this is a direct branch or call.
    ///
    /// Returns `None` for non-branches and register-indirect jumps.
    pub fn branch_target_label(&self) -> Option<&'a str> {
        if !self.is_branch() || self.is_indirect() {
            return None;
        }
        self.operands.last().copied()
    }
}

impl BasicInstruction for UnresolvedInstruction<'_> {
    fn mnemonic(&self) -> &str {
        self.mnemonic
    }
}

/// A parsed line from an assembly file.
#[derive(Debug)]
pub struct ParsedLine<'a> {
    /// Label defined on this line (e.g., `"BB0_1"` from `"BB0_1:"`).
    pub label: Option<&'a str>,
    /// The statement on this line.
    pub statement: Statement<'a>,
    /// Comment text including its leading `;` or `//`.
    pub comment: Option<&'a str>,
    /// Original line number (1-indexed).
    pub line_number: usize,
    /// Original line text without its terminator.
    pub original: &'a str,
    /// The line terminator (`"\n"`, `"\r\n"`, or `""` on an unterminated last line).
    pub eol: &'a str,
}

impl<'a> ParsedLine<'a> {
    pub fn kind(&self) -> LineKind {
        if self.label.is_some() {
            return LineKind::Label;
        }
        match self.statement {
            Statement::Instruction(_) => LineKind::Instruction,
            Statement::Directive => LineKind::Directive,
            Statement::Empty => LineKind::Blank,
        }
    }

    pub fn instruction(&self) -> Option<&UnresolvedInstruction<'a>> {
        match &self.statement {
            Statement::Instruction(instruction) => Some(instruction),
            _ => None,
        }
    }

    /// The line exactly as it appeared in the input, terminator included.
    pub fn raw(&self) -> String {
        format!("{}{}", self.original, self.eol)
    }

    /// Text following the label's colon, untrimmed; empty if there is no label.
    pub fn after_label(&self) -> &'a str {
        match self.label {
            Some(_) => self
                .original
                .find(':')
                .map_or("", |colon| &self.original[colon + 1..]),
            None => "",
        }
    }
}

/// Parsed assembly text, ready for partitioning or inspection.
#[derive(Debug)]
pub struct ParsedAssembly<'a> {
    lines: Vec<ParsedLine<'a>>,
}

impl<'a> ParsedAssembly<'a> {
    /// Parse assembly text into lines.
    pub fn parse(input: &'a str) -> Self {
        let mut lines = Vec::new();
        let mut region_end: Option<&str> = None;

        for (idx, raw) in input.split_inclusive('\n').enumerate() {
            let (text, eol) = split_eol(raw);
            let line_number = idx + 1;

            if let Some(end) = region_end {
                if text.trim_start().starts_with(end) {
                    region_end = None;
                }
                lines.push(Self::data_line(text, eol, line_number));
                continue;
            }

            let trimmed = text.trim_start();
            if let Some(&(_, end)) = DATA_REGIONS
                .iter()
                .find(|(start, _)| directive_is(trimmed, start))
            {
                region_end = Some(end);
                lines.push(Self::data_line(text, eol, line_number));
                continue;
            }

            lines.push(Self::parse_line(text, eol, line_number));
        }

        Self { lines }
    }

    /// Access the parsed lines for inspection.
    pub fn lines(&self) -> &[ParsedLine<'a>] {
        &self.lines
    }

    /// Iterate over lines that carry an instruction.
    pub fn instructions(&self) -> impl Iterator<Item = (&ParsedLine<'a>, &UnresolvedInstruction<'a>)> {
        self.lines
            .iter()
            .filter_map(|line| line.instruction().map(|instruction| (line, instruction)))
    }

    /// Leading whitespace of the first instruction line, used to indent
    /// inserted instructions the same way.
    pub fn indent(&self) -> &'a str {
        self.lines
            .iter()
            .find(|line| line.label.is_none() && line.instruction().is_some())
            .map(|line| {
                let original = line.original;
                &original[..original.len() - original.trim_start().len()]
            })
            .filter(|indent| !indent.is_empty())
            .unwrap_or("\t")
    }

    fn data_line(text: &'a str, eol: &'a str, line_number: usize) -> ParsedLine<'a> {
        ParsedLine {
            label: None,
            statement: Statement::Directive,
            comment: None,
            line_number,
            original: text,
            eol,
        }
    }

    /// Parse a single line of assembly.
    fn parse_line(text: &'a str, eol: &'a str, line_number: usize) -> ParsedLine<'a> {
        let original = text;
        let (code, comment) = Self::split_comment(text);
        let code = code.trim();

        let (label, rest) = Self::split_label(code);

        let statement = if rest.is_empty() {
            Statement::Empty
        } else if rest.starts_with('.') {
            Statement::Directive
        } else {
            Statement::Instruction(UnresolvedInstruction::parse(rest))
        };

        ParsedLine {
            label,
            statement,
            comment,
            line_number,
            original,
            eol,
        }
    }

    /// Split a line into code and an optional trailing comment.
    ///
    /// Supports: `;`, `//`
    fn split_comment(line: &str) -> (&str, Option<&str>) {
        let start = [line.find(';'), line.find("//")]
            .into_iter()
            .flatten()
            .min();

        match start {
            Some(pos) => (&line[..pos], Some(&line[pos..])),
            None => (line, None),
        }
    }

    /// Split a line into optional label and remaining text.
    fn split_label(line: &str) -> (Option<&str>, &str) {
        if let Some(colon_pos) = Self::find_label_colon(line) {
            let label = line[..colon_pos].trim();
            let rest = line[colon_pos + 1..].trim();
            (Some(label), rest)
        } else {
            (None, line)
        }
    }

    /// Find position of label-ending colon.
    ///
    /// Valid label characters: alphanumeric, `_`, `.`, `$`
    fn find_label_colon(line: &str) -> Option<usize> {
        for (pos, c) in line.char_indices() {
            if c == ':' {
                return (pos > 0).then_some(pos);
            }
            if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
                continue;
            }
            break;
        }

        None
    }
}

fn split_eol(raw: &str) -> (&str, &str) {
    if let Some(text) = raw.strip_suffix("\r\n") {
        (text, &raw[text.len()..])
    } else if let Some(text) = raw.strip_suffix('\n') {
        (text, &raw[text.len()..])
    } else {
        (raw, "")
    }
}

/// True if `line` starts with `directive` as a whole word.
fn directive_is(line: &str, directive: &str) -> bool {
    line.strip_prefix(directive)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(char::is_whitespace))
}
