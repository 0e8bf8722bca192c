// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Control flow analysis for AMDGCN kernel assembly
//!
//! This crate provides:
//! - **Opcode classification** of the scalar control-flow instructions
//! - **Register operand parsing** (`v7`, `s[0:1]`) for reserved-register checks
//! - **Block graph construction** over label-delimited blocks
//!
//! # Architecture
//!
//! - [`BasicInstruction`]: mnemonic-based classification, implemented by both
//!   resolved and unresolved instructions.
//! - [`CfgInstruction`]: adds the resolved branch target (a block ordinal).
//! - [`CfgBlock`]: a run of instructions, either the preamble or a labeled block.
//!
//! # Modules
//!
//! - [`amdgcn`]: Opcode table and register operands
//! - [`traits`]: Instruction and block traits
//! - [`block_graph`]: The graph itself ([`BlockGraph`], [`BlockData`])
//! - [`builder`]: Graph construction

pub mod amdgcn;
pub mod block_graph;
pub mod builder;
pub mod traits;

pub use amdgcn::{registers_in, ClassifiedOpcode, RegisterClass, RegisterRange, BY_MNEMONIC};
pub use block_graph::{BlockData, BlockGraph, BlockIndex};
pub use builder::build_block_graph;
pub use traits::{BasicInstruction, CfgBlock, CfgInstruction};
