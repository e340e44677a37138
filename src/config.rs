//! Segment configuration: the immutable, layout-defining fields a producer
//! chooses at `create` time and that every consumer must agree on at attach.

use crate::error::{DataBlockError, Result};

/// How the ring behaves once it is full.
///
/// Lives alongside `consumer_sync_policy` because both are echoed verbatim
/// into the header and both feed the layout fingerprint.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPolicy {
    /// Unset sentinel. `create` rejects this value.
    Unset = 0,
    /// The writer may overwrite a committed slot that still has readers by
    /// transitioning it through `draining` first.
    Ring = 1,
    /// The writer blocks (up to its timeout) rather than reuse a slot with
    /// live readers.
    Blocking = 2,
}

/// Governs how the ring's read cursor is tracked across consumers.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerSyncPolicy {
    /// Unset sentinel. `create` rejects this value.
    Unset = 0,
    /// Consumers are independent; each reads whatever is at `commit_index`.
    /// The producer never blocks waiting on a consumer under this policy.
    LatestOnly = 1,
    /// Exactly one consumer; a shared `read_index`; producer blocks when the
    /// ring is full relative to that single cursor.
    SingleReader = 2,
    /// Multiple consumers, each with its own read position; the effective
    /// read index is the minimum across all of them.
    SyncReader = 3,
}

/// Governs whether per-slot checksums are produced and verified.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// Checksum storage exists but is never written or verified.
    Disabled = 0,
    /// Every commit computes a checksum; every release verifies it.
    Enforced = 1,
}

/// Which digest populates the per-slot checksum record.
///
/// Only one algorithm is implemented today; the tag exists in the on-disk
/// format so a future revision can add others without a layout break (the
/// checksum record's 33rd byte is exactly this tag).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// No checksum is stored in this slot.
    None = 0,
    /// BLAKE2b-256, the same primitive used for schema/layout fingerprints.
    Blake2b256 = 1,
}

/// The subset of segment configuration that is immutable after `create` and
/// is therefore covered by the layout fingerprint.
///
/// This is the struct a consumer may pass as `expected_config` to `attach`;
/// `Producer::create`'s single validation point rejects an invalid
/// `SegmentConfig` before any shared memory is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    pub buffer_policy: BufferPolicy,
    pub consumer_sync_policy: ConsumerSyncPolicy,
    /// The physical page size slots are rounded up to, in bytes. Must be
    /// non-zero.
    pub physical_page_size: u32,
    /// Logical payload size per slot, in bytes. Zero means "use
    /// `physical_page_size` directly"; otherwise must be a multiple of
    /// `physical_page_size`.
    pub logical_unit_size: u32,
    /// Number of slots in the data ring. Must be non-zero.
    pub ring_capacity: u64,
    /// Size in bytes of the flexible zone (may be zero).
    pub flexible_zone_size: u64,
    pub checksum_policy: ChecksumPolicy,
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl SegmentConfig {
    /// The effective per-slot stride in bytes: `logical_unit_size` rounded
    /// up to `physical_page_size`, or `physical_page_size` itself when
    /// `logical_unit_size` is zero.
    pub fn slot_stride_bytes(&self) -> u64 {
        if self.logical_unit_size == 0 {
            self.physical_page_size as u64
        } else {
            self.logical_unit_size as u64
        }
    }

    /// The single validation point: `Producer::create` calls this before
    /// touching shared memory at all.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_policy == BufferPolicy::Unset {
            return Err(DataBlockError::InvalidConfig("buffer_policy is unset"));
        }
        if self.consumer_sync_policy == ConsumerSyncPolicy::Unset {
            return Err(DataBlockError::InvalidConfig(
                "consumer_sync_policy is unset",
            ));
        }
        if self.physical_page_size == 0 {
            return Err(DataBlockError::InvalidConfig(
                "physical_page_size must be non-zero",
            ));
        }
        if self.ring_capacity == 0 {
            return Err(DataBlockError::InvalidConfig(
                "ring_capacity must be non-zero",
            ));
        }
        if self.logical_unit_size != 0
            && self.logical_unit_size % self.physical_page_size != 0
        {
            return Err(DataBlockError::InvalidConfig(
                "logical_unit_size must be zero or a multiple of physical_page_size",
            ));
        }
        Ok(())
    }
}

impl BufferPolicy {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => BufferPolicy::Ring,
            2 => BufferPolicy::Blocking,
            _ => BufferPolicy::Unset,
        }
    }
}

impl ConsumerSyncPolicy {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => ConsumerSyncPolicy::LatestOnly,
            2 => ConsumerSyncPolicy::SingleReader,
            3 => ConsumerSyncPolicy::SyncReader,
            _ => ConsumerSyncPolicy::Unset,
        }
    }
}

impl ChecksumPolicy {
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => ChecksumPolicy::Enforced,
            _ => ChecksumPolicy::Disabled,
        }
    }
}

impl ChecksumAlgorithm {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ChecksumAlgorithm::Blake2b256,
            _ => ChecksumAlgorithm::None,
        }
    }
}
