// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Basic-block entry counting for AMDGCN kernel assembly
//!
//! This crate provides tools to:
//! - Extract one kernel from a multi-kernel assembly dump
//! - Partition a kernel into label-delimited basic blocks
//! - Assign each block a per-wavefront counter slot in LDS
//! - Inject a load/increment/store sequence after every block label
//!
//! The counts, multiplied by each block's static instruction count, give the
//! dynamic instruction mix of a kernel run.

pub mod cli;
pub mod config;
pub mod error;
pub mod extract;
pub mod instrument;
pub mod manifest;
pub mod parser;
pub mod partition;
pub mod plan;
pub mod validate;

pub use config::{Config, Grammar, ReservedRegisters};
pub use error::{ConfigError, ExtractError, InstrumentError, InstrumentResult};
pub use extract::{extract_kernel, KernelDump, KernelSection};
pub use instrument::{strip, INJECTION_MARKER};
pub use manifest::{Manifest, ManifestBlock};
pub use parser::{ParsedAssembly, ParsedLine};
pub use plan::{CounterSlot, SlotLayout};
pub use validate::Warning;

use crate::config::{CodegenConfig, LayoutConfig};
use crate::validate::ValidatedKernel;

/// An instrumented kernel.
#[derive(Debug, Clone)]
pub struct Instrumented {
    /// Kernel text with counter updates injected.
    pub text: String,
    pub manifest: Manifest,
    pub warnings: Vec<Warning>,
}

/// A kernel inspected without instrumenting it.
#[derive(Debug, Clone)]
pub struct Survey {
    /// Manifest sized for exactly the blocks found.
    pub manifest: Manifest,
    pub warnings: Vec<Warning>,
}

/// Instrumentation pipeline with a validated configuration.
#[derive(Debug, Clone)]
pub struct Instrumenter {
    grammar: Grammar,
    registers: ReservedRegisters,
    layout: LayoutConfig,
    codegen: CodegenConfig,
}

impl Instrumenter {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            grammar: config.grammar()?,
            registers: config.reserved_registers()?,
            layout: config.layout.clone(),
            codegen: config.codegen.clone(),
        })
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Instrument one kernel declared to have `counters` blocks.
    ///
    /// Nothing is produced unless every check passes.
    pub fn instrument(&self, source: &str, counters: usize) -> InstrumentResult<Instrumented> {
        let asm = ParsedAssembly::parse(source);
        let kernel = self.validate(&asm)?;
        let plan = plan::plan(
            &kernel.partition,
            counters,
            &self.layout,
            &self.codegen,
            &self.registers,
        )?;
        let warnings = validate::collect_warnings(&asm, &kernel, &self.registers);
        let text = instrument::inject(&asm, &plan);
        let manifest = Manifest::new(&kernel, &plan.layout, self.codegen.counter_size());

        Ok(Instrumented {
            text,
            manifest,
            warnings,
        })
    }

    /// Validate a kernel and describe its blocks, whatever their number.
    pub fn survey(&self, source: &str) -> InstrumentResult<Survey> {
        let asm = ParsedAssembly::parse(source);
        let kernel = self.validate(&asm)?;
        let layout = SlotLayout::new(kernel.partition.blocks.len(), &self.layout);
        let warnings = validate::collect_warnings(&asm, &kernel, &self.registers);

        Ok(Survey {
            manifest: Manifest::new(&kernel, &layout, self.codegen.counter_size()),
            warnings,
        })
    }

    fn validate<'a>(&self, asm: &ParsedAssembly<'a>) -> InstrumentResult<ValidatedKernel<'a>> {
        validate::validate(asm, &self.grammar)
    }
}

/// Instrument a kernel with the given configuration.
pub fn instrument_kernel(source: &str, counters: usize, config: &Config) -> Result<Instrumented, Error> {
    Ok(Instrumenter::new(config)?.instrument(source, counters)?)
}

/// Any failure of the library entry points.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Instrument(#[from] InstrumentError),
}

impl Error {
    /// Process exit status for this failure.
    ///
    /// Configuration failures are reported as 1, like I/O errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 1,
            Error::Extract(err) => err.exit_code(),
            Error::Instrument(err) => err.exit_code(),
        }
    }
}
