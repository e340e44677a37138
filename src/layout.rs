//! Derives byte offsets and sizes of every segment region from a
//! [`SegmentConfig`] (spec §3.2's five-region layout: header, slot state
//! array, checksum array, flexible zone, data ring).

use crate::checksum::SlotChecksum;
use crate::config::SegmentConfig;
use crate::header::{Header, HEADER_SIZE};
use crate::slot::SlotRecord;

/// Every region in a segment starts on an 8-byte boundary; the data ring
/// additionally starts on this boundary so that `repr(C)` payload types up
/// to 8-byte alignment can be placed directly on top of it.
pub const DATA_ALIGNMENT: u64 = 8;

fn align_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// The fully resolved byte layout of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub header_offset: u64,
    pub header_size: u64,
    pub state_offset: u64,
    pub state_size: u64,
    pub checksum_offset: u64,
    pub checksum_size: u64,
    pub flexible_offset: u64,
    pub flexible_size: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub total_size: u64,
    pub slot_stride_bytes: u64,
    pub ring_capacity: u64,
}

impl Layout {
    /// Byte offset of slot `index`'s state record.
    pub fn state_record_offset(&self, index: u64) -> u64 {
        self.state_offset + index * core::mem::size_of::<SlotRecord>() as u64
    }

    /// Byte offset of slot `index`'s checksum record.
    pub fn checksum_record_offset(&self, index: u64) -> u64 {
        self.checksum_offset + index * core::mem::size_of::<SlotChecksum>() as u64
    }

    /// Byte offset of slot `index`'s payload within the data ring.
    pub fn slot_data_offset(&self, index: u64) -> u64 {
        self.data_offset + index * self.slot_stride_bytes
    }
}

/// Computes the layout a producer would lay down for `config` (spec §4.6's
/// "single validation point" calls this after validating the config).
pub fn layout_from_config(config: &SegmentConfig) -> Layout {
    let header_offset = 0u64;
    let header_size = HEADER_SIZE as u64;

    let state_offset = align_up(header_offset + header_size, DATA_ALIGNMENT);
    let state_size = config.ring_capacity * core::mem::size_of::<SlotRecord>() as u64;

    let checksum_offset = align_up(state_offset + state_size, DATA_ALIGNMENT);
    let checksum_size = config.ring_capacity * core::mem::size_of::<SlotChecksum>() as u64;

    let flexible_offset = align_up(checksum_offset + checksum_size, DATA_ALIGNMENT);
    let flexible_size = config.flexible_zone_size;

    let data_offset = align_up(flexible_offset + flexible_size, DATA_ALIGNMENT);
    let slot_stride_bytes = config.slot_stride_bytes();
    let data_size = config.ring_capacity * slot_stride_bytes;

    let total_size = data_offset + data_size;

    Layout {
        header_offset,
        header_size,
        state_offset,
        state_size,
        checksum_offset,
        checksum_size,
        flexible_offset,
        flexible_size,
        data_offset,
        data_size,
        total_size,
        slot_stride_bytes,
        ring_capacity: config.ring_capacity,
    }
}

/// Reconstructs the layout a consumer would expect from an attached
/// segment's header — the header's config-echo fields are the only input,
/// so an attacher never needs the original `SegmentConfig` the producer
/// used (spec §4.7 attach).
pub fn layout_from_header(header: &Header) -> Layout {
    layout_from_config(&header.config())
}
