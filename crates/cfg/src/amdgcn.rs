// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! AMDGCN opcode and register classification
//!
//! Single source of truth for the scalar control-flow instructions of the
//! GCN/CDNA family, shared by label resolution, block graph construction and
//! the reserved-register checks of the instrumenter. Only control flow is
//! classified; any other mnemonic is a straight-line instruction.

use std::{collections::HashMap, fmt};

use lazy_static::lazy_static;

/// Classification of an AMDGCN opcode
pub struct ClassifiedOpcode {
    /// The mnemonic string (e.g., "s_branch", "s_cbranch_execz")
    pub mnemonic: &'static str,
    /// Control flow: is this a branch instruction?
    pub is_branch: bool,
    /// Control flow: is this a call? (`s_call_b64`, `s_swappc_b64`)
    pub is_call: bool,
    /// Control flow: does this end the wavefront? (`s_endpgm` and variants)
    pub is_end_program: bool,
    /// Control flow: does this have an indirect (register) target?
    pub is_indirect: bool,
    /// Control flow: can this instruction fall through? (conditional branches)
    pub is_conditional: bool,
}

impl ClassifiedOpcode {
    const fn plain(mnemonic: &'static str) -> Self {
        Self {
            mnemonic,
            is_branch: false,
            is_call: false,
            is_end_program: false,
            is_indirect: false,
            is_conditional: false,
        }
    }

    const fn direct_branch(mnemonic: &'static str) -> Self {
        Self {
            is_branch: true,
            ..Self::plain(mnemonic)
        }
    }

    const fn conditional_branch(mnemonic: &'static str) -> Self {
        Self {
            is_branch: true,
            is_conditional: true,
            ..Self::plain(mnemonic)
        }
    }

    const fn direct_call(mnemonic: &'static str) -> Self {
        Self {
            is_branch: true,
            is_call: true,
            ..Self::plain(mnemonic)
        }
    }

    const fn indirect_branch(mnemonic: &'static str) -> Self {
        Self {
            is_branch: true,
            is_indirect: true,
            ..Self::plain(mnemonic)
        }
    }

    const fn indirect_call(mnemonic: &'static str) -> Self {
        Self {
            is_branch: true,
            is_call: true,
            is_indirect: true,
            ..Self::plain(mnemonic)
        }
    }

    const fn end_program(mnemonic: &'static str) -> Self {
        Self {
            is_end_program: true,
            ..Self::plain(mnemonic)
        }
    }

    /// Classify by mnemonic string.
    ///
    /// Returns None for mnemonics that do not affect control flow.
    pub fn from_mnemonic(mnemonic: &str) -> Option<&'static Self> {
        BY_MNEMONIC
            .get(mnemonic.to_ascii_lowercase().as_str())
            .copied()
    }
}

/// All classified control-flow opcodes
const OPCODE_TABLE: &[ClassifiedOpcode] = &[
    // Unconditional relative jump
    ClassifiedOpcode::direct_branch("s_branch"),
    // Conditional relative jumps (fall through when the condition fails)
    ClassifiedOpcode::conditional_branch("s_cbranch_scc0"),
    ClassifiedOpcode::conditional_branch("s_cbranch_scc1"),
    ClassifiedOpcode::conditional_branch("s_cbranch_vccz"),
    ClassifiedOpcode::conditional_branch("s_cbranch_vccnz"),
    ClassifiedOpcode::conditional_branch("s_cbranch_execz"),
    ClassifiedOpcode::conditional_branch("s_cbranch_execnz"),
    ClassifiedOpcode::conditional_branch("s_cbranch_cdbgsys"),
    ClassifiedOpcode::conditional_branch("s_cbranch_cdbguser"),
    ClassifiedOpcode::conditional_branch("s_cbranch_cdbgsys_or_user"),
    ClassifiedOpcode::conditional_branch("s_cbranch_cdbgsys_and_user"),
    // Calls
    ClassifiedOpcode::direct_call("s_call_b64"),
    ClassifiedOpcode::indirect_call("s_swappc_b64"),
    // Register-indirect jumps
    ClassifiedOpcode::indirect_branch("s_setpc_b64"),
    ClassifiedOpcode::indirect_branch("s_cbranch_join"),
    // End of program
    ClassifiedOpcode::end_program("s_endpgm"),
    ClassifiedOpcode::end_program("s_endpgm_saved"),
    ClassifiedOpcode::end_program("s_endpgm_ordered_ps_done"),
];

lazy_static! {
    /// Map from mnemonic string to ClassifiedOpcode
    pub static ref BY_MNEMONIC: HashMap<&'static str, &'static ClassifiedOpcode> = {
        OPCODE_TABLE.iter().map(|c| (c.mnemonic, c)).collect()
    };
}

/// Register file a register operand belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterClass {
    /// Per-lane vector registers (`v0`, `v[2:3]`)
    Vector,
    /// Wavefront-uniform scalar registers (`s0`, `s[4:7]`)
    Scalar,
    /// Accumulation registers on CDNA parts (`a0`, `a[0:3]`)
    Accumulator,
}

impl RegisterClass {
    fn prefix(self) -> char {
        match self {
            RegisterClass::Vector => 'v',
            RegisterClass::Scalar => 's',
            RegisterClass::Accumulator => 'a',
        }
    }
}

/// A single register or an inclusive register tuple such as `v[4:7]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterRange {
    pub class: RegisterClass,
    pub first: u32,
    pub last: u32,
}

impl RegisterRange {
    /// Parse a register token (`v7`, `s[0:1]`, `a[3]`).
    ///
    /// Returns None for anything that is not a plain numbered register,
    /// including special registers such as `vcc` or `exec`.
    pub fn parse(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        let class = match chars.next()? {
            'v' => RegisterClass::Vector,
            's' => RegisterClass::Scalar,
            'a' => RegisterClass::Accumulator,
            _ => return None,
        };
        let rest = chars.as_str();

        let (first, last) = match rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            Some(inner) => match inner.split_once(':') {
                Some((first, last)) => (parse_index(first.trim())?, parse_index(last.trim())?),
                None => {
                    let index = parse_index(inner.trim())?;
                    (index, index)
                }
            },
            None => {
                let index = parse_index(rest)?;
                (index, index)
            }
        };

        (first <= last).then_some(Self { class, first, last })
    }

    /// True if the two ranges share at least one register.
    pub fn overlaps(&self, other: &RegisterRange) -> bool {
        self.class == other.class && self.first <= other.last && other.first <= self.last
    }

    pub fn is_single(&self) -> bool {
        self.first == self.last
    }
}

impl fmt::Display for RegisterRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_single() {
            write!(f, "{}{}", self.class.prefix(), self.first)
        } else {
            write!(f, "{}[{}:{}]", self.class.prefix(), self.first, self.last)
        }
    }
}

fn parse_index(digits: &str) -> Option<u32> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Extract every numbered register referenced in an operand string.
///
/// Tokens are split on anything that cannot appear inside a register
/// operand, so modifiers like `offset:16` or `lgkmcnt(0)` are skipped.
pub fn registers_in(operands: &str) -> impl Iterator<Item = RegisterRange> + '_ {
    operands
        .split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '[' | ']' | ':' | '_')))
        .filter(|token| !token.is_empty())
        .filter_map(RegisterRange::parse)
}

#[cfg(test)]
mod tests {
    use super::{registers_in, ClassifiedOpcode, RegisterClass, RegisterRange};

    #[test]
    fn test_branch_classification() {
        let branch = ClassifiedOpcode::from_mnemonic("s_branch").unwrap();
        assert!(branch.is_branch);
        assert!(!branch.is_conditional);

        let cbranch = ClassifiedOpcode::from_mnemonic("s_cbranch_execz").unwrap();
        assert!(cbranch.is_branch);
        assert!(cbranch.is_conditional);

        let endpgm = ClassifiedOpcode::from_mnemonic("s_endpgm").unwrap();
        assert!(endpgm.is_end_program);
        assert!(!endpgm.is_branch);
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        assert!(ClassifiedOpcode::from_mnemonic("S_CBRANCH_SCC1").is_some());
    }

    #[test]
    fn test_straight_line_opcodes_are_unclassified() {
        for mnemonic in ["v_add_u32", "ds_read_b32", "s_waitcnt", "global_load_dword"] {
            assert!(ClassifiedOpcode::from_mnemonic(mnemonic).is_none(), "{mnemonic}");
        }
    }

    #[test]
    fn test_indirect_and_call() {
        let setpc = ClassifiedOpcode::from_mnemonic("s_setpc_b64").unwrap();
        assert!(setpc.is_indirect);
        assert!(!setpc.is_call);

        let swappc = ClassifiedOpcode::from_mnemonic("s_swappc_b64").unwrap();
        assert!(swappc.is_indirect);
        assert!(swappc.is_call);
    }

    #[test]
    fn test_parse_single_registers() {
        let v = RegisterRange::parse("v254").unwrap();
        assert_eq!(v.class, RegisterClass::Vector);
        assert_eq!((v.first, v.last), (254, 254));

        let s = RegisterRange::parse("s7").unwrap();
        assert_eq!(s.class, RegisterClass::Scalar);

        let a = RegisterRange::parse("a[3]").unwrap();
        assert_eq!(a.class, RegisterClass::Accumulator);
        assert!(a.is_single());
    }

    #[test]
    fn test_parse_register_tuples() {
        let pair = RegisterRange::parse("v[254:255]").unwrap();
        assert_eq!((pair.first, pair.last), (254, 255));
        assert_eq!(pair.to_string(), "v[254:255]");

        assert!(RegisterRange::parse("s[7:4]").is_none());
    }

    #[test]
    fn test_special_registers_are_not_numbered() {
        for token in ["vcc", "vcc_lo", "exec", "scc", "m0", "v", "s_", "off"] {
            assert!(RegisterRange::parse(token).is_none(), "{token}");
        }
    }

    #[test]
    fn test_overlap() {
        let pair = RegisterRange::parse("v[253:254]").unwrap();
        let single = RegisterRange::parse("v254").unwrap();
        let scalar = RegisterRange::parse("s254").unwrap();

        assert!(pair.overlaps(&single));
        assert!(single.overlaps(&pair));
        assert!(!pair.overlaps(&scalar));
        assert!(!RegisterRange::parse("v255").unwrap().overlaps(&pair));
    }

    #[test]
    fn test_registers_in_operands() {
        let found: Vec<_> = registers_in("v1, v[2:3] offset:16")
            .map(|r| r.to_string())
            .collect();
        assert_eq!(found, vec!["v1", "v[2:3]"]);

        let found: Vec<_> = registers_in("vcc, s[0:1], exec").map(|r| r.to_string()).collect();
        assert_eq!(found, vec!["s[0:1]"]);

        assert_eq!(registers_in("lgkmcnt(0)").count(), 0);
    }
}
