// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Error types for kernel extraction, instrumentation and configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Error while locating a kernel inside a multi-kernel dump.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The dump contains no kernel-boundary marker at all.
    #[error("no kernels found in dump")]
    EmptyInput,
    /// The requested index is past the last kernel.
    #[error("kernel index {index} out of range: dump contains {count} kernel(s)")]
    NotFound { index: usize, count: usize },
    /// The selected kernel has no end-of-program instruction.
    #[error("kernel {index} ('{name}') has no terminating instruction")]
    Unterminated { index: usize, name: String },
}

impl ExtractError {
    /// Process exit status reported by `kernel-extract`.
    pub fn exit_code(&self) -> u8 {
        match self {
            ExtractError::NotFound { .. } => 3,
            ExtractError::EmptyInput | ExtractError::Unterminated { .. } => 4,
        }
    }
}

/// Errors that prevent a kernel from being instrumented.
///
/// All of them are detected before any output is produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstrumentError {
    /// Input already carries counter sequences from an earlier run.
    #[error("input is already instrumented (marker found at line {line})")]
    AlreadyInstrumented { line: usize },
    /// The same label is defined twice, which would alias counter slots.
    #[error("duplicate label '{label}' at lines {first_line} and {second_line}")]
    DuplicateLabel {
        label: String,
        first_line: usize,
        second_line: usize,
    },
    /// Number of blocks found differs from the declared counter count.
    #[error("block/counter count mismatch: {expected} counter(s) declared, {found} block(s) found")]
    CountMismatch { expected: usize, found: usize },
    /// A block whose extent cannot be determined without guessing.
    #[error("malformed block '{label}': {reason}")]
    MalformedBlock { label: String, reason: String },
    /// Branch references a label not defined in the kernel.
    #[error("undefined label '{label}' referenced at line {line}")]
    UndefinedLabel {
        /// The undefined label name.
        label: String,
        /// Line number where the reference occurs.
        line: usize,
    },
    /// Kernel text contains no end-of-program instruction.
    #[error("kernel has no terminating instruction")]
    Unterminated,
    /// A block's immediate offset does not fit the LDS offset field.
    #[error("counter offset {offset} for block {ordinal} exceeds the maximum immediate offset {max}")]
    OffsetOutOfRange { ordinal: usize, offset: u64, max: u64 },
    /// The counter region does not fit the LDS budget.
    #[error("counter region of {size} bytes exceeds the budget of {budget} bytes")]
    RegionTooLarge { size: u64, budget: u64 },
}

impl InstrumentError {
    /// Process exit status reported by `bb-instrument`.
    pub fn exit_code(&self) -> u8 {
        match self {
            InstrumentError::CountMismatch { .. } => 3,
            InstrumentError::DuplicateLabel { .. } => 4,
            InstrumentError::MalformedBlock { .. }
            | InstrumentError::UndefinedLabel { .. }
            | InstrumentError::Unterminated
            | InstrumentError::OffsetOutOfRange { .. }
            | InstrumentError::RegionTooLarge { .. } => 5,
            InstrumentError::AlreadyInstrumented { .. } => 6,
        }
    }
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {which} pattern: {source}")]
    Grammar {
        which: &'static str,
        #[source]
        source: regex::Error,
    },
    #[error("kernel marker pattern must define a `name` capture group")]
    MissingNameGroup,
    #[error("'{register}' is not a usable vector register")]
    InvalidRegister { register: String },
    #[error("register '{register}' is not in the declared safe set")]
    UnsafeRegister { register: String },
    #[error("scratch and address registers overlap ('{register}')")]
    RegisterConflict { register: String },
    #[error("slot size {slot_size} is not supported (expected 4 or 8)")]
    InvalidSlotSize { slot_size: u32 },
    #[error("{counter_size}-byte counter does not fit a {slot_size}-byte slot")]
    SlotTooNarrow { slot_size: u32, counter_size: u32 },
}

/// Result type alias for instrumentation
pub type InstrumentResult<T> = Result<T, InstrumentError>;
