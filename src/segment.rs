//! The mapped segment: owns the [`SharedMapping`] and exposes raw pointer
//! accessors into the five regions. `Producer`, `Consumer`, and the
//! recovery handle all build on this instead of touching `platform::shm`
//! directly.
//!
//! The accessor layer is an extension of unsafe getters over a raw
//! shared-memory base pointer, fixed here to the five-region layout rather
//! than a size-class partition scheme.

use std::sync::atomic::Ordering;

use tracing::warn;

use crate::checksum::SlotChecksum;
use crate::config::SegmentConfig;
use crate::error::{DataBlockError, Result};
use crate::hash::Digest32;
use crate::header::{Header, ABI_MAJOR, HEADER_SIZE, MAGIC};
use crate::layout::{layout_from_config, layout_from_header, Layout};
use crate::platform::{monotonic_nanos, shm::SharedMapping};
use crate::slot::SlotRecord;

pub struct Segment {
    mapping: SharedMapping,
    layout: Layout,
    name: String,
}

// SAFETY: every field reached through the mapping is either a lock-free
// atomic or is synchronized by the slot/header protocol itself.
unsafe impl Send for Segment {}
unsafe impl Sync for Segment {}

/// Optional checks an attacher asks [`Segment::attach`] to perform beyond
/// the unconditional magic/ABI/layout checks.
#[derive(Debug, Clone, Default)]
pub struct AttachExpectations {
    pub shared_secret: Option<[u8; 64]>,
    pub expected_config: Option<SegmentConfig>,
    pub expected_schema_fingerprint: Option<Digest32>,
    pub expected_schema_version: Option<u32>,
}

impl Segment {
    /// Allocates and initializes a brand-new segment. `config` must
    /// already have passed [`SegmentConfig::validate`] — the
    /// caller (`Producer::create`) owns that single validation point.
    pub fn create(
        name: &str,
        shared_secret: [u8; 64],
        schema_fingerprint: Digest32,
        schema_version_packed: u32,
        config: SegmentConfig,
    ) -> Result<Self> {
        let layout = layout_from_config(&config);
        let mapping = SharedMapping::create(name, layout.total_size as usize).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                DataBlockError::AlreadyExists(name.to_string())
            } else {
                DataBlockError::Io(e)
            }
        })?;

        let segment = Segment {
            mapping,
            layout,
            name: name.to_string(),
        };

        // SAFETY: this mapping was just created under O_EXCL, so no other
        // process can have attached yet; we hold the only reference.
        unsafe {
            let header = segment.header_mut();
            header.init(
                layout.total_size,
                shared_secret,
                schema_fingerprint,
                schema_version_packed,
                config,
                monotonic_nanos(),
            );
            for index in 0..config.ring_capacity {
                segment.slot_record_mut(index).init_free();
                segment.slot_checksum_mut(index).init_zero();
            }
            segment.flexible_zone_mut().fill(0);
        }

        Ok(segment)
    }

    /// Attaches to an existing segment and runs §4.5's attach validation.
    /// The segment's own total size is not known in advance, so this maps
    /// the header region first to discover it, then remaps the full
    /// segment.
    pub fn attach(name: &str, expectations: &AttachExpectations) -> Result<Self> {
        let probe = SharedMapping::attach(name, HEADER_SIZE).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DataBlockError::NotFound(name.to_string())
            } else {
                DataBlockError::Io(e)
            }
        })?;
        // SAFETY: `probe` maps at least HEADER_SIZE bytes; Header is
        // `repr(C)` and exactly HEADER_SIZE bytes.
        let total_size = unsafe { &*(probe.as_ptr() as *const Header) }.total_segment_size();
        drop(probe);

        let mapping = SharedMapping::attach(name, total_size as usize)
            .map_err(DataBlockError::Io)?;

        let segment = Segment {
            mapping,
            // Placeholder until validated below; `layout_from_header`
            // needs the header to already be reachable through `segment`.
            layout: Layout {
                header_offset: 0,
                header_size: HEADER_SIZE as u64,
                state_offset: 0,
                state_size: 0,
                checksum_offset: 0,
                checksum_size: 0,
                flexible_offset: 0,
                flexible_size: 0,
                data_offset: 0,
                data_size: 0,
                total_size,
                slot_stride_bytes: 0,
                ring_capacity: 0,
            },
            name: name.to_string(),
        };

        let layout = segment.validate_attach(expectations)?;
        Ok(Segment { layout, ..segment })
    }

    /// Runs every attach-time consistency check in order, bumping the
    /// matching header metric and logging at the point of detection
    /// before returning the first failure.
    fn validate_attach(&self, expectations: &AttachExpectations) -> Result<Layout> {
        let header = self.header();
        let now = monotonic_nanos();

        let fail = |err: DataBlockError| -> DataBlockError {
            header
                .metrics()
                .record_error(err.metric_code(), now);
            warn!(segment = %self.name, error = %err, "segment attach validation failed");
            err
        };

        if header.magic() != MAGIC {
            header
                .metrics()
                .magic_mismatch_count
                .fetch_add(1, Ordering::Relaxed);
            return Err(fail(DataBlockError::MagicMismatch {
                expected: MAGIC,
                found: header.magic(),
            }));
        }

        if header.abi_major() != ABI_MAJOR {
            header
                .metrics()
                .abi_mismatch_count
                .fetch_add(1, Ordering::Relaxed);
            return Err(fail(DataBlockError::AbiMismatch {
                expected: ABI_MAJOR,
                found: header.abi_major(),
            }));
        }

        if header.compute_header_layout_hash() != header.header_layout_hash() {
            header
                .metrics()
                .layout_hash_mismatch_count
                .fetch_add(1, Ordering::Relaxed);
            return Err(fail(DataBlockError::LayoutHashMismatch));
        }

        if header.compute_layout_fingerprint() != header.layout_fingerprint() {
            header
                .metrics()
                .layout_fingerprint_mismatch_count
                .fetch_add(1, Ordering::Relaxed);
            return Err(fail(DataBlockError::LayoutFingerprintMismatch));
        }

        let stored_config = header.config();
        let layout = layout_from_header(header);
        if layout.total_size != header.total_segment_size() {
            header
                .metrics()
                .layout_hash_mismatch_count
                .fetch_add(1, Ordering::Relaxed);
            return Err(fail(DataBlockError::LayoutHashMismatch));
        }

        if let Some(expected_config) = expectations.expected_config {
            if expected_config != stored_config {
                header
                    .metrics()
                    .layout_fingerprint_mismatch_count
                    .fetch_add(1, Ordering::Relaxed);
                return Err(fail(DataBlockError::ConfigMismatch));
            }
        }

        if let Some(expected_fingerprint) = expectations.expected_schema_fingerprint {
            if expected_fingerprint != header.schema_fingerprint() {
                header
                    .metrics()
                    .schema_mismatch_count
                    .fetch_add(1, Ordering::Relaxed);
                return Err(fail(DataBlockError::SchemaMismatch));
            }
        }

        if let Some(expected_version) = expectations.expected_schema_version {
            if !crate::schema::versions_compatible(expected_version, header.schema_version_packed())
            {
                header
                    .metrics()
                    .schema_mismatch_count
                    .fetch_add(1, Ordering::Relaxed);
                return Err(fail(DataBlockError::SchemaVersionMismatch {
                    expected: expected_version,
                    found: header.schema_version_packed(),
                }));
            }
        }

        if let Some(expected_secret) = expectations.shared_secret {
            if &expected_secret != header.shared_secret() {
                return Err(fail(DataBlockError::SharedSecretMismatch));
            }
        }

        Ok(layout)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn header(&self) -> &Header {
        // SAFETY: the header occupies the first HEADER_SIZE bytes of every
        // valid mapping; `Header` is `repr(C, align(64))` and exactly
        // HEADER_SIZE bytes (const-asserted in `header.rs`).
        unsafe { &*(self.mapping.as_ptr() as *const Header) }
    }

    /// # Safety
    /// The caller must guarantee exclusive access for the duration of the
    /// borrow — valid only during `create`, before any other process could
    /// have attached.
    unsafe fn header_mut(&self) -> &mut Header {
        &mut *(self.mapping.as_ptr() as *mut Header)
    }

    pub fn slot_record(&self, index: u64) -> Result<&SlotRecord> {
        if index >= self.layout.ring_capacity {
            return Err(DataBlockError::InvalidSlotIndex(index));
        }
        let offset = self.layout.state_record_offset(index);
        // SAFETY: offset is within the state array region, which is sized
        // for ring_capacity records of this exact type.
        Ok(unsafe { &*(self.mapping.as_ptr().add(offset as usize) as *const SlotRecord) })
    }

    /// # Safety
    /// Valid only during `create`'s one-time initialization.
    unsafe fn slot_record_mut(&self, index: u64) -> &mut SlotRecord {
        let offset = self.layout.state_record_offset(index);
        &mut *(self.mapping.as_ptr().add(offset as usize) as *mut SlotRecord)
    }

    pub fn slot_checksum(&self, index: u64) -> Result<&SlotChecksum> {
        if index >= self.layout.ring_capacity {
            return Err(DataBlockError::InvalidSlotIndex(index));
        }
        let offset = self.layout.checksum_record_offset(index);
        Ok(unsafe { &*(self.mapping.as_ptr().add(offset as usize) as *const SlotChecksum) })
    }

    /// # Safety
    /// The caller must hold slot `index`'s writer lock — the checksum
    /// record is only ever written by the slot's current writer, between
    /// `begin_commit` and `publish`.
    pub unsafe fn slot_checksum_mut(&self, index: u64) -> &mut SlotChecksum {
        let offset = self.layout.checksum_record_offset(index);
        &mut *(self.mapping.as_ptr().add(offset as usize) as *mut SlotChecksum)
    }

    pub fn flexible_zone(&self) -> &[u8] {
        // SAFETY: the flexible zone is `flexible_size` bytes at
        // `flexible_offset`, entirely within the mapping.
        unsafe {
            std::slice::from_raw_parts(
                self.mapping.as_ptr().add(self.layout.flexible_offset as usize),
                self.layout.flexible_size as usize,
            )
        }
    }

    /// # Safety
    /// The flexible zone has no system-imposed structure; callers are
    /// responsible for any synchronization their own layout
    /// needs (typically via [`crate::spinlock::SpinLockPool`]).
    pub unsafe fn flexible_zone_mut(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(
            self.mapping.as_ptr().add(self.layout.flexible_offset as usize),
            self.layout.flexible_size as usize,
        )
    }

    pub fn slot_data(&self, index: u64) -> Result<&[u8]> {
        if index >= self.layout.ring_capacity {
            return Err(DataBlockError::InvalidSlotIndex(index));
        }
        let offset = self.layout.slot_data_offset(index);
        Ok(unsafe {
            std::slice::from_raw_parts(
                self.mapping.as_ptr().add(offset as usize),
                self.layout.slot_stride_bytes as usize,
            )
        })
    }

    /// # Safety
    /// The caller must hold slot `index`'s writer lock — only the writer
    /// transitions a slot to writing, and the payload is likewise
    /// single-writer for the lifetime of that transition.
    pub unsafe fn slot_data_mut(&self, index: u64) -> Result<&mut [u8]> {
        if index >= self.layout.ring_capacity {
            return Err(DataBlockError::InvalidSlotIndex(index));
        }
        let offset = self.layout.slot_data_offset(index);
        Ok(std::slice::from_raw_parts_mut(
            self.mapping.as_ptr().add(offset as usize),
            self.layout.slot_stride_bytes as usize,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BufferPolicy, ChecksumAlgorithm, ChecksumPolicy, ConsumerSyncPolicy,
    };

    fn sample_config() -> SegmentConfig {
        SegmentConfig {
            buffer_policy: BufferPolicy::Ring,
            consumer_sync_policy: ConsumerSyncPolicy::LatestOnly,
            physical_page_size: 64,
            logical_unit_size: 0,
            ring_capacity: 4,
            flexible_zone_size: 32,
            checksum_policy: ChecksumPolicy::Enforced,
            checksum_algorithm: ChecksumAlgorithm::Blake2b256,
        }
    }

    #[test]
    fn create_then_attach_validates_cleanly() {
        let name = format!("datablock_segment_test_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);

        let created = Segment::create(&name, [7u8; 64], [9u8; 32], 42, sample_config()).unwrap();
        assert_eq!(created.header().ring_capacity(), 4);

        let attached = Segment::attach(
            &name,
            &AttachExpectations {
                shared_secret: Some([7u8; 64]),
                expected_config: Some(sample_config()),
                expected_schema_fingerprint: Some([9u8; 32]),
                expected_schema_version: Some(42),
            },
        )
        .unwrap();
        assert_eq!(attached.layout().ring_capacity, 4);

        drop(created);
        drop(attached);
        SharedMapping::unlink(&name).unwrap();
    }

    #[test]
    fn attach_rejects_wrong_shared_secret() {
        let name = format!("datablock_segment_test_secret_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);
        let created = Segment::create(&name, [1u8; 64], [2u8; 32], 1, sample_config()).unwrap();

        let result = Segment::attach(
            &name,
            &AttachExpectations {
                shared_secret: Some([0u8; 64]),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(DataBlockError::SharedSecretMismatch)));

        drop(created);
        SharedMapping::unlink(&name).unwrap();
    }

    #[test]
    fn attach_rejects_config_mismatch() {
        let name = format!("datablock_segment_test_config_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);
        let created = Segment::create(&name, [1u8; 64], [2u8; 32], 1, sample_config()).unwrap();

        let mut wrong = sample_config();
        wrong.ring_capacity = 8;
        let result = Segment::attach(
            &name,
            &AttachExpectations {
                expected_config: Some(wrong),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(DataBlockError::ConfigMismatch)));

        drop(created);
        SharedMapping::unlink(&name).unwrap();
    }
}
