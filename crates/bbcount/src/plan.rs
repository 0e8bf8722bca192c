// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Counter-slot planning.
//!
//! Each wavefront owns a contiguous run of `K` slots. Block `b` of wavefront
//! `w` lives at byte `(w * K + b) * slot_size` of the counter region. The
//! address register already holds the wavefront base `w * K * slot_size`, so
//! the injected code only needs the immediate `b * slot_size`.

use serde::Serialize;
use tracing::debug;

use crate::{
    config::{CodegenConfig, LayoutConfig, ReservedRegisters, MAX_DS_OFFSET},
    error::{InstrumentError, InstrumentResult},
    instrument::counter_sequence,
    partition::{BasicBlock, Partition},
};

/// Geometry of the counter region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SlotLayout {
    /// Number of counters per wavefront (`K`).
    pub counters: usize,
    /// Bytes per counter.
    pub slot_size: u32,
    pub wavefronts_per_workgroup: u32,
}

impl SlotLayout {
    pub fn new(counters: usize, layout: &LayoutConfig) -> Self {
        Self {
            counters,
            slot_size: layout.slot_size,
            wavefronts_per_workgroup: layout.wavefronts_per_workgroup,
        }
    }

    /// Byte offset of block `ordinal`'s counter for wavefront `wavefront`.
    pub fn offset(&self, wavefront: u32, ordinal: usize) -> u64 {
        (u64::from(wavefront) * self.counters as u64 + ordinal as u64) * u64::from(self.slot_size)
    }

    /// Offset of a block's counter relative to its wavefront's base.
    pub fn slot_offset(&self, ordinal: usize) -> u64 {
        self.offset(0, ordinal)
    }

    /// Bytes between consecutive wavefront bases.
    pub fn wavefront_stride(&self) -> u64 {
        self.counters as u64 * u64::from(self.slot_size)
    }

    /// Total bytes the workgroup must reserve.
    pub fn region_size(&self) -> u64 {
        u64::from(self.wavefronts_per_workgroup) * self.wavefront_stride()
    }
}

/// A block's counter location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSlot {
    pub block_ordinal: usize,
    /// Immediate offset relative to the wavefront base.
    pub byte_offset: u32,
}

/// A block together with its slot and the lines to inject after its label.
#[derive(Debug, Clone)]
pub struct PlannedBlock<'p, 'a> {
    pub block: &'p BasicBlock<'a>,
    pub slot: CounterSlot,
    /// Counter update sequence, without indentation or line terminators.
    pub sequence: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InstrumentationPlan<'p, 'a> {
    pub layout: SlotLayout,
    pub blocks: Vec<PlannedBlock<'p, 'a>>,
}

/// Assign every block a counter slot and synthesize its update sequence.
///
/// # Errors
///
/// - [`InstrumentError::CountMismatch`]: `counters` differs from the number of blocks
/// - [`InstrumentError::OffsetOutOfRange`]: a slot offset does not fit the
///   LDS instruction's immediate field
/// - [`InstrumentError::RegionTooLarge`]: the workgroup's region exceeds the budget
pub fn plan<'p, 'a>(
    partition: &'p Partition<'a>,
    counters: usize,
    layout: &LayoutConfig,
    codegen: &CodegenConfig,
    registers: &ReservedRegisters,
) -> InstrumentResult<InstrumentationPlan<'p, 'a>> {
    if partition.blocks.len() != counters {
        return Err(InstrumentError::CountMismatch {
            expected: counters,
            found: partition.blocks.len(),
        });
    }

    let slots = SlotLayout::new(counters, layout);

    let blocks = partition
        .blocks
        .iter()
        .map(|block| {
            let offset = slots.slot_offset(block.ordinal);
            if offset > MAX_DS_OFFSET {
                return Err(InstrumentError::OffsetOutOfRange {
                    ordinal: block.ordinal,
                    offset,
                    max: MAX_DS_OFFSET,
                });
            }
            let slot = CounterSlot {
                block_ordinal: block.ordinal,
                byte_offset: offset as u32,
            };
            Ok(PlannedBlock {
                block,
                slot,
                sequence: counter_sequence(codegen, registers, &slot, block.label),
            })
        })
        .collect::<InstrumentResult<Vec<_>>>()?;

    if slots.region_size() > layout.max_region_bytes {
        return Err(InstrumentError::RegionTooLarge {
            size: slots.region_size(),
            budget: layout.max_region_bytes,
        });
    }

    debug!(
        counters,
        stride = slots.wavefront_stride(),
        region = slots.region_size(),
        "counter slots planned"
    );

    Ok(InstrumentationPlan {
        layout: slots,
        blocks,
    })
}
