// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Trait abstractions for block graph construction
//!
//! [`BasicInstruction`] is the minimal mnemonic-based interface; it is
//! implemented by parsed-but-unresolved instructions as well as resolved ones.
//! [`CfgInstruction`] adds the resolved branch target, and [`CfgBlock`]
//! exposes the instruction stream of one labeled block.

use crate::amdgcn::ClassifiedOpcode;

/// Mnemonic-based classification shared by resolved and unresolved instructions.
///
/// Control flow methods have default implementations that look the mnemonic
/// up in the opcode table, so classification is consistent everywhere.
pub trait BasicInstruction {
    /// Returns the mnemonic of this instruction.
    fn mnemonic(&self) -> &str;

    /// Check if this is a branch instruction (including calls).
    #[inline]
    fn is_branch(&self) -> bool {
        ClassifiedOpcode::from_mnemonic(self.mnemonic()).is_some_and(|c| c.is_branch)
    }

    /// Check if this is a call instruction.
    #[inline]
    fn is_call(&self) -> bool {
        ClassifiedOpcode::from_mnemonic(self.mnemonic()).is_some_and(|c| c.is_call)
    }

    /// Check if this ends the program (`s_endpgm` and variants).
    #[inline]
    fn is_end_program(&self) -> bool {
        ClassifiedOpcode::from_mnemonic(self.mnemonic()).is_some_and(|c| c.is_end_program)
    }

    /// Check if the branch target lives in a register.
    #[inline]
    fn is_indirect(&self) -> bool {
        ClassifiedOpcode::from_mnemonic(self.mnemonic()).is_some_and(|c| c.is_indirect)
    }

    /// Check if this is a conditional branch.
    #[inline]
    fn is_conditional(&self) -> bool {
        ClassifiedOpcode::from_mnemonic(self.mnemonic()).is_some_and(|c| c.is_conditional)
    }

    /// Check if this is an unconditional jump (not a call).
    #[inline]
    fn is_unconditional_jump(&self) -> bool {
        self.is_branch() && !self.is_conditional() && !self.is_call()
    }

    /// Check if control never reaches the next instruction.
    #[inline]
    fn ends_flow(&self) -> bool {
        self.is_end_program() || self.is_unconditional_jump()
    }
}

/// An instruction whose direct branch target has been resolved.
pub trait CfgInstruction: BasicInstruction {
    /// Ordinal of the labeled block this instruction jumps to, if it is a
    /// direct branch (not a call) whose target is a block label.
    fn branch_target(&self) -> Option<usize>;
}

/// A straight run of instructions, either a labeled block or the preamble.
pub trait CfgBlock {
    type Instruction: CfgInstruction;

    fn instructions(&self) -> &[Self::Instruction];

    /// True if control can run off the end of this block into the next one.
    fn falls_through(&self) -> bool {
        self.instructions().last().map_or(true, |i| !i.ends_flow())
    }
}


#[cfg(test)]
mod tests {
    use super::{mock_instruction::MockBlock, mock_instruction::MockInstruction, BasicInstruction, CfgBlock};

    #[test]
    fn test_default_classification() {
        assert!(MockInstruction::new("s_branch").is_unconditional_jump());
        assert!(!MockInstruction::new("s_cbranch_scc0").is_unconditional_jump());
        assert!(!MockInstruction::new("s_call_b64").is_unconditional_jump());
        assert!(MockInstruction::new("s_setpc_b64").ends_flow());
        assert!(MockInstruction::new("s_endpgm").ends_flow());
        assert!(!MockInstruction::new("v_mov_b32").ends_flow());
    }

    #[test]
    fn test_falls_through() {
        assert!(MockBlock::default().falls_through());
        assert!(MockBlock(vec![MockInstruction::new("s_mov_b32")]).falls_through());
        assert!(MockBlock(vec![MockInstruction::with_target("s_cbranch_execz", 1)]).falls_through());
        assert!(!MockBlock(vec![MockInstruction::with_target("s_branch", 0)]).falls_through());
        assert!(!MockBlock(vec![MockInstruction::new("s_endpgm")]).falls_through());
    }
}
