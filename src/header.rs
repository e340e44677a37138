//! The segment header: exactly 4096 bytes at offset 0.
//!
//! Laid out as a sequence of sub-structs, each hand-padded to a multiple of
//! 8 bytes so no implicit compiler padding falls between them — every
//! byte offset quoted in doc comments below is exact.

use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

use crate::config::{
    BufferPolicy, ChecksumAlgorithm, ChecksumPolicy, ConsumerSyncPolicy, SegmentConfig,
};
use crate::hash::{Blake2bBuilder, Digest32};
use crate::metrics::SegmentMetrics;
use crate::spinlock::SpinLockPool;

/// "DBLKHUB\0" read as a little-endian u64 — identifies a DataBlock
/// segment, distinct from an arbitrary shared-memory region.
pub const MAGIC: u64 = u64::from_le_bytes(*b"DBLKHUB\0");

pub const ABI_MAJOR: u16 = 1;
pub const ABI_MINOR: u16 = 0;

/// Maximum number of consumers that may hold a heartbeat slot concurrently.
pub const MAX_CONSUMERS: usize = 16;

pub const HEADER_SIZE: usize = 4096;

#[repr(C)]
struct Identity {
    magic: u64,
    abi_major: u16,
    abi_minor: u16,
    _pad: u32,
}
const _: () = assert!(core::mem::size_of::<Identity>() == 16);

#[repr(C)]
struct Sizing {
    total_segment_size: u64,
}
const _: () = assert!(core::mem::size_of::<Sizing>() == 8);

#[repr(C)]
struct Secret {
    shared_secret: [u8; 64],
}
const _: () = assert!(core::mem::size_of::<Secret>() == 64);

#[repr(C)]
struct Schema {
    schema_fingerprint: Digest32,
    schema_version_packed: u32,
    _pad: u32,
}
const _: () = assert!(core::mem::size_of::<Schema>() == 40);

/// The eight fields the layout fingerprint is computed over.
#[repr(C)]
struct ConfigEcho {
    buffer_policy: u32,
    consumer_sync_policy: u32,
    physical_page_size: u32,
    logical_unit_size: u32,
    checksum_policy: u32,
    checksum_algorithm: u32,
    _pad: [u32; 2],
}
const _: () = assert!(core::mem::size_of::<ConfigEcho>() == 32);

#[repr(C)]
struct RingConfig {
    ring_capacity: u64,
    flexible_zone_size: u64,
}
const _: () = assert!(core::mem::size_of::<RingConfig>() == 16);

#[repr(C)]
struct RingState {
    write_index: AtomicU64,
    commit_index: AtomicU64,
    read_index: AtomicU64,
    active_consumer_count: AtomicU32,
    _pad: u32,
}
const _: () = assert!(core::mem::size_of::<RingState>() == 32);

/// One consumer heartbeat entry: 32 bytes, cache-padded.
#[repr(C)]
pub struct ConsumerHeartbeat {
    /// 0 == vacant. Otherwise the live PID of the consumer owning this
    /// entry.
    consumer_pid: AtomicU64,
    last_seen_ns: AtomicU64,
    /// Each consumer's own `sync_reader` read position, stored here so the
    /// producer can compute `min(positions)`.
    read_position: AtomicU64,
    _pad: [u8; 8],
}
const _: () = assert!(core::mem::size_of::<ConsumerHeartbeat>() == 32);

impl ConsumerHeartbeat {
    fn init_vacant(&mut self) {
        self.consumer_pid = AtomicU64::new(0);
        self.last_seen_ns = AtomicU64::new(0);
        self.read_position = AtomicU64::new(0);
        self._pad = [0; 8];
    }

    pub fn is_vacant(&self) -> bool {
        self.consumer_pid.load(Ordering::Acquire) == 0
    }

    pub fn pid(&self) -> u64 {
        self.consumer_pid.load(Ordering::Acquire)
    }

    pub fn last_seen_ns(&self) -> u64 {
        self.last_seen_ns.load(Ordering::Acquire)
    }

    pub fn read_position(&self) -> u64 {
        self.read_position.load(Ordering::Acquire)
    }

    pub fn set_read_position(&self, pos: u64) {
        self.read_position.store(pos, Ordering::Release);
    }

    /// Claims this entry for `pid` via CAS on the vacant sentinel.
    fn try_claim(&self, pid: u64) -> bool {
        self.consumer_pid
            .compare_exchange(0, pid, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn heartbeat(&self, now_ns: u64) {
        self.last_seen_ns.store(now_ns, Ordering::Release);
    }

    pub fn vacate(&self) {
        self.consumer_pid.store(0, Ordering::Release);
        self.last_seen_ns.store(0, Ordering::Release);
        self.read_position.store(0, Ordering::Release);
    }
}

#[repr(C)]
struct ConsumerHeartbeats {
    entries: [ConsumerHeartbeat; MAX_CONSUMERS],
}
const _: () =
    assert!(core::mem::size_of::<ConsumerHeartbeats>() == MAX_CONSUMERS * 32);

#[repr(C)]
struct ProducerHeartbeat {
    producer_pid: AtomicU64,
    last_seen_ns: AtomicU64,
}
const _: () = assert!(core::mem::size_of::<ProducerHeartbeat>() == 16);

#[repr(C)]
struct Fingerprints {
    /// BLAKE2b-256 over the eight [`ConfigEcho`] fields.
    layout_fingerprint: Digest32,
    /// BLAKE2b-256 over the header's own derived offsets/sizes — a
    /// self-check that the header struct itself (not just the config that
    /// produced it) agrees between producer and consumer builds.
    header_layout_hash: Digest32,
}
const _: () = assert!(core::mem::size_of::<Fingerprints>() == 64);

/// The full segment header. `repr(C, align(64))`; exactly 4096 bytes.
#[repr(C, align(64))]
pub struct Header {
    identity: Identity,
    sizing: Sizing,
    secret: Secret,
    schema: Schema,
    config_echo: ConfigEcho,
    ring_config: RingConfig,
    ring_state: RingState,
    metrics: SegmentMetrics,
    consumer_heartbeats: ConsumerHeartbeats,
    spinlocks: SpinLockPool,
    producer_heartbeat: ProducerHeartbeat,
    fingerprints: Fingerprints,
    _reserved: [u8; Header::RESERVED_BYTES],
}

impl Header {
    const USED_BYTES: usize = 16 + 8 + 64 + 40 + 32 + 16 + 32 + 184 + MAX_CONSUMERS * 32 + 128 + 16 + 64;
    const RESERVED_BYTES: usize = HEADER_SIZE - Self::USED_BYTES;
}

const _: () = assert!(core::mem::size_of::<Header>() == HEADER_SIZE);

impl Header {
    /// Initializes every field. Called exactly once, by the producer, at
    /// `create` time, after the single validation point has already run.
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        &mut self,
        total_segment_size: u64,
        shared_secret: [u8; 64],
        schema_fingerprint: Digest32,
        schema_version_packed: u32,
        config: SegmentConfig,
        creation_time_ns: u64,
    ) {
        self.identity = Identity {
            magic: MAGIC,
            abi_major: ABI_MAJOR,
            abi_minor: ABI_MINOR,
            _pad: 0,
        };
        self.sizing = Sizing { total_segment_size };
        self.secret = Secret { shared_secret };
        self.schema = Schema {
            schema_fingerprint,
            schema_version_packed,
            _pad: 0,
        };
        self.config_echo = ConfigEcho {
            buffer_policy: config.buffer_policy as u32,
            consumer_sync_policy: config.consumer_sync_policy as u32,
            physical_page_size: config.physical_page_size,
            logical_unit_size: config.logical_unit_size,
            checksum_policy: config.checksum_policy as u32,
            checksum_algorithm: config.checksum_algorithm as u32,
            _pad: [0; 2],
        };
        self.ring_config = RingConfig {
            ring_capacity: config.ring_capacity,
            flexible_zone_size: config.flexible_zone_size,
        };
        self.ring_state = RingState {
            write_index: AtomicU64::new(0),
            commit_index: AtomicU64::new(0),
            read_index: AtomicU64::new(0),
            active_consumer_count: AtomicU32::new(0),
            _pad: 0,
        };
        self.metrics.init(creation_time_ns);
        for entry in &mut self.consumer_heartbeats.entries {
            entry.init_vacant();
        }
        self.spinlocks = SpinLockPool::new();
        self.producer_heartbeat = ProducerHeartbeat {
            producer_pid: AtomicU64::new(crate::platform::current_pid()),
            last_seen_ns: AtomicU64::new(creation_time_ns),
        };

        let layout_fingerprint = self.compute_layout_fingerprint();
        let header_layout_hash = self.compute_header_layout_hash();
        self.fingerprints = Fingerprints {
            layout_fingerprint,
            header_layout_hash,
        };
        self._reserved = [0; Self::RESERVED_BYTES];
    }

    pub fn magic(&self) -> u64 {
        self.identity.magic
    }

    pub fn abi_major(&self) -> u16 {
        self.identity.abi_major
    }

    pub fn abi_minor(&self) -> u16 {
        self.identity.abi_minor
    }

    pub fn total_segment_size(&self) -> u64 {
        self.sizing.total_segment_size
    }

    pub fn shared_secret(&self) -> &[u8; 64] {
        &self.secret.shared_secret
    }

    pub fn schema_fingerprint(&self) -> Digest32 {
        self.schema.schema_fingerprint
    }

    pub fn schema_version_packed(&self) -> u32 {
        self.schema.schema_version_packed
    }

    pub fn config(&self) -> SegmentConfig {
        SegmentConfig {
            buffer_policy: BufferPolicy::from_u32(self.config_echo.buffer_policy),
            consumer_sync_policy: ConsumerSyncPolicy::from_u32(
                self.config_echo.consumer_sync_policy,
            ),
            physical_page_size: self.config_echo.physical_page_size,
            logical_unit_size: self.config_echo.logical_unit_size,
            ring_capacity: self.ring_config.ring_capacity,
            flexible_zone_size: self.ring_config.flexible_zone_size,
            checksum_policy: ChecksumPolicy::from_u32(self.config_echo.checksum_policy),
            checksum_algorithm: ChecksumAlgorithm::from_u8(
                self.config_echo.checksum_algorithm as u8,
            ),
        }
    }

    pub fn ring_capacity(&self) -> u64 {
        self.ring_config.ring_capacity
    }

    pub fn write_index(&self) -> &AtomicU64 {
        &self.ring_state.write_index
    }

    pub fn commit_index(&self) -> &AtomicU64 {
        &self.ring_state.commit_index
    }

    pub fn read_index(&self) -> &AtomicU64 {
        &self.ring_state.read_index
    }

    pub fn active_consumer_count(&self) -> &AtomicU32 {
        &self.ring_state.active_consumer_count
    }

    pub fn metrics(&self) -> &SegmentMetrics {
        &self.metrics
    }

    pub fn consumer_heartbeats(&self) -> &[ConsumerHeartbeat; MAX_CONSUMERS] {
        &self.consumer_heartbeats.entries
    }

    pub fn spinlocks(&self) -> &SpinLockPool {
        &self.spinlocks
    }

    pub fn producer_pid(&self) -> u64 {
        self.producer_heartbeat.producer_pid.load(Ordering::Acquire)
    }

    pub fn touch_producer_heartbeat(&self, now_ns: u64) {
        self.producer_heartbeat
            .last_seen_ns
            .store(now_ns, Ordering::Release);
        self.metrics
            .heartbeat_count_producer
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn producer_last_seen_ns(&self) -> u64 {
        self.producer_heartbeat.last_seen_ns.load(Ordering::Acquire)
    }

    /// Allocates a heartbeat slot for the calling consumer via an atomic CAS
    /// on a free entry. `None` if every slot is taken.
    pub fn claim_consumer_slot(&self, pid: u64, now_ns: u64) -> Option<usize> {
        for (index, entry) in self.consumer_heartbeats.entries.iter().enumerate() {
            if entry.try_claim(pid) {
                entry.heartbeat(now_ns);
                self.ring_state
                    .active_consumer_count
                    .fetch_add(1, Ordering::AcqRel);
                return Some(index);
            }
        }
        None
    }

    pub fn release_consumer_slot(&self, index: usize) {
        self.consumer_heartbeats.entries[index].vacate();
        self.ring_state
            .active_consumer_count
            .fetch_sub(1, Ordering::AcqRel);
    }

    pub fn layout_fingerprint(&self) -> Digest32 {
        self.fingerprints.layout_fingerprint
    }

    pub fn header_layout_hash(&self) -> Digest32 {
        self.fingerprints.header_layout_hash
    }

    /// Recomputes the layout fingerprint from the header's current
    /// config-echo fields — used both at `init` time and by a consumer at
    /// attach time to detect a mismatch.
    pub fn compute_layout_fingerprint(&self) -> Digest32 {
        Blake2bBuilder::new()
            .push_u32(self.config_echo.buffer_policy)
            .push_u32(self.config_echo.consumer_sync_policy)
            .push_u32(self.config_echo.physical_page_size)
            .push_u32(self.config_echo.logical_unit_size)
            .push_u64(self.ring_config.ring_capacity)
            .push_u64(self.ring_config.flexible_zone_size)
            .push_u32(self.config_echo.checksum_policy)
            .push_u32(self.config_echo.checksum_algorithm)
            .finish()
    }

    /// Recomputes the header self-check hash from the header's derived
    /// total size — catches a header struct compiled with a different
    /// layout even when the *config* fields happen to agree.
    pub fn compute_header_layout_hash(&self) -> Digest32 {
        Blake2bBuilder::new()
            .push_u64(self.sizing.total_segment_size)
            .push_u64(HEADER_SIZE as u64)
            .push_u64(MAX_CONSUMERS as u64)
            .finish()
    }
}
