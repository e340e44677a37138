//! Producer lifecycle: owns a segment it created and hands out exactly one
//! write handle at a time, backed by a keep-alive flag and an internal
//! mutex guarding acquire/commit/abort.

use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::checksum::SlotChecksum;
use crate::config::{ChecksumPolicy, ConsumerSyncPolicy, SegmentConfig};
use crate::error::{DataBlockError, Result};
use crate::hash::Digest32;
use crate::metrics::MetricsSnapshot;
use crate::platform::backoff::{spin_backoff, Deadline};
use crate::platform::shm::SharedMapping;
use crate::platform::{current_pid, monotonic_nanos};
use crate::segment::Segment;
use crate::slot::SlotError;
use crate::spinlock::{SpinLock, SpinLockError};

/// A write handle bound to the producer that issued it. Dropping the handle
/// without calling [`SlotWriteHandle::commit`] releases the slot without
/// publishing.
pub struct SlotWriteHandle<'p> {
    producer: &'p Producer,
    slot_index: u64,
    committed: bool,
}

impl<'p> SlotWriteHandle<'p> {
    pub fn slot_index(&self) -> u64 {
        self.slot_index
    }

    /// Mutable access to this slot's payload buffer.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        // SAFETY: this handle is the sole writer of `slot_index`'s payload
        // for as long as it is held (it owns the slot's writer lock).
        unsafe { self.producer.segment.slot_data_mut(self.slot_index).expect("valid slot index") }
    }

    /// Publishes `len` bytes of the buffer. Under enforced checksum policy,
    /// the checksum is computed over exactly `len` bytes before
    /// `commit_index` advances.
    pub fn commit(mut self, len: usize) {
        self.producer.commit_slot(self.slot_index, len);
        self.committed = true;
    }
}

impl<'p> Drop for SlotWriteHandle<'p> {
    fn drop(&mut self) {
        if !self.committed {
            self.producer.abort_slot(self.slot_index);
        }
    }
}

struct ProducerState {
    /// `true` while a `SlotWriteHandle` is outstanding; enforces a single
    /// active write handle at a time.
    handle_outstanding: bool,
    next_slot: u64,
}

/// Owns a segment it created; thread-safe via an internal mutex guarding
/// acquire/release and metrics APIs.
pub struct Producer {
    segment: Segment,
    config: SegmentConfig,
    state: Mutex<ProducerState>,
}

impl Producer {
    /// The single validation point: rejects an invalid config before any
    /// shared memory is touched.
    pub fn create(
        name: &str,
        shared_secret: [u8; 64],
        schema_fingerprint: Digest32,
        schema_version_packed: u32,
        config: SegmentConfig,
    ) -> Result<Self> {
        config.validate()?;
        let segment = Segment::create(
            name,
            shared_secret,
            schema_fingerprint,
            schema_version_packed,
            config,
        )?;
        debug!(segment = name, ring_capacity = config.ring_capacity, "segment created");
        Ok(Producer {
            segment,
            config,
            state: Mutex::new(ProducerState {
                handle_outstanding: false,
                next_slot: 0,
            }),
        })
    }

    pub fn segment_name(&self) -> &str {
        self.segment.name()
    }

    pub fn schema_fingerprint(&self) -> Digest32 {
        self.segment.header().schema_fingerprint()
    }

    pub fn schema_version_packed(&self) -> u32 {
        self.segment.header().schema_version_packed()
    }

    pub fn config(&self) -> SegmentConfig {
        self.config
    }

    /// Acquires the next slot to write, according to `consumer_sync_policy`
    /// backpressure: under `single_reader`/`sync_reader`, blocks (up to
    /// `timeout_ms`) while `write_index - read_index == capacity`.
    pub fn acquire_write_slot(&self, timeout_ms: u64) -> Result<SlotWriteHandle<'_>> {
        let mut guard = self.state.lock();
        if guard.handle_outstanding {
            return Err(DataBlockError::ContractViolation(
                "a write handle is already outstanding on this producer",
            ));
        }

        let header = self.segment.header();
        let deadline = Deadline::after(timeout_ms);
        let mut iteration = 0u32;

        loop {
            let write_index = header.write_index().load(Ordering::Acquire);
            if self.has_capacity(write_index) {
                break;
            }
            if deadline.expired() {
                header
                    .metrics()
                    .writer_lock_timeout_count
                    .fetch_add(1, Ordering::Relaxed);
                return Err(DataBlockError::Timeout);
            }
            spin_backoff(iteration);
            iteration = iteration.saturating_add(1);
        }

        let write_index = header.write_index().fetch_add(1, Ordering::AcqRel);
        let slot_index = write_index % self.config.ring_capacity;

        let remaining = deadline.remaining_ms();
        let record = self
            .segment
            .slot_record(slot_index)
            .expect("write_index modulo ring_capacity is always in range");
        match record.acquire_write(remaining, header.metrics()) {
            Ok(()) => {
                guard.handle_outstanding = true;
                guard.next_slot = slot_index + 1;
                Ok(SlotWriteHandle {
                    producer: self,
                    slot_index,
                    committed: false,
                })
            }
            Err(SlotError::LockTimeout) | Err(SlotError::ReaderDrainTimeout) => {
                // Roll write_index back: this reservation was never
                // fulfilled, so it must not count against capacity.
                header.write_index().fetch_sub(1, Ordering::AcqRel);
                Err(DataBlockError::Timeout)
            }
            Err(SlotError::AlreadyLocked) => Err(DataBlockError::ContractViolation(
                "producer process already holds this slot's writer lock",
            )),
            Err(SlotError::NotReady) => unreachable!("acquire_write never returns NotReady"),
        }
    }

    /// Whether a new slot can be reserved at `write_index` under the
    /// configured backpressure policy, mirrored here from the writer's
    /// side of the same policy the consumer's `slot_iterator` applies.
    fn has_capacity(&self, write_index: u64) -> bool {
        match self.config.consumer_sync_policy {
            ConsumerSyncPolicy::LatestOnly => true,
            ConsumerSyncPolicy::SingleReader => {
                let read_index = self.segment.header().read_index().load(Ordering::Acquire);
                write_index - read_index < self.config.ring_capacity
            }
            ConsumerSyncPolicy::SyncReader => {
                let min_position = self.min_consumer_position();
                write_index - min_position < self.config.ring_capacity
            }
            ConsumerSyncPolicy::Unset => unreachable!("validated at create"),
        }
    }

    fn min_consumer_position(&self) -> u64 {
        let header = self.segment.header();
        header
            .consumer_heartbeats()
            .iter()
            .filter(|hb| !hb.is_vacant())
            .map(|hb| hb.read_position())
            .min()
            .unwrap_or(0)
    }

    fn commit_slot(&self, slot_index: u64, len: usize) {
        let header = self.segment.header();
        let record = self.segment.slot_record(slot_index).expect("in-range");

        if self.config.checksum_policy == ChecksumPolicy::Enforced {
            let payload = self
                .segment
                .slot_data(slot_index)
                .expect("in-range")
                .get(..len)
                .expect("commit length must not exceed slot_stride_bytes");
            // SAFETY: this producer holds slot_index's writer lock for the
            // duration of the outstanding handle that called us.
            unsafe {
                self.segment
                    .slot_checksum_mut(slot_index)
                    .store(self.config.checksum_algorithm, payload);
            }
        }

        record.begin_commit(header.metrics());
        record.publish(header.commit_index());

        header.metrics().total_bytes_written.fetch_add(len as u64, Ordering::Relaxed);
        header.metrics().total_slots_written.fetch_add(1, Ordering::Relaxed);

        self.state.lock().handle_outstanding = false;
    }

    fn abort_slot(&self, slot_index: u64) {
        let record = self.segment.slot_record(slot_index).expect("in-range");
        record.release_without_commit();
        self.state.lock().handle_outstanding = false;
    }

    /// Raw span into the flexible zone. Typed access requires
    /// `size_of::<T>() <= flexible_zone_size` and that the zone's base
    /// pointer satisfies `T`'s alignment.
    pub fn flexible_zone(&self) -> &[u8] {
        self.segment.flexible_zone()
    }

    /// # Safety
    /// The flexible zone has no system-imposed structure; the caller must
    /// synchronize concurrent access itself, typically via
    /// [`Producer::get_spinlock`].
    pub unsafe fn flexible_zone_mut(&self) -> &mut [u8] {
        self.segment.flexible_zone_mut()
    }

    pub fn get_spinlock(&self, index: usize) -> std::result::Result<&SpinLock, SpinLockError> {
        self.segment.header().spinlocks().get(index)
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.segment.header().metrics().snapshot()
    }

    pub fn reset_metrics(&self) {
        self.segment.header().metrics().reset();
    }

    /// Refreshes the producer heartbeat; callers with no pending writes
    /// should call this periodically so recovery tooling does not mistake
    /// an idle producer for a dead one.
    pub fn update_heartbeat(&self) {
        self.segment.header().touch_producer_heartbeat(monotonic_nanos());
    }

    /// The information an external discovery broker needs to publish for
    /// this channel. This call does not itself talk to the broker.
    pub fn broker_registration(&self) -> BrokerRegistration {
        let header = self.segment.header();
        BrokerRegistration {
            segment_name: self.segment.name().to_string(),
            ring_capacity: self.config.ring_capacity,
            slot_stride_bytes: self.config.slot_stride_bytes(),
            flexible_zone_size: self.config.flexible_zone_size,
            schema_fingerprint: header.schema_fingerprint(),
            schema_version_packed: header.schema_version_packed(),
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if self.state.lock().handle_outstanding {
            warn!(
                segment = self.segment.name(),
                "producer dropped with an outstanding write handle"
            );
        }
        if let Err(e) = SharedMapping::unlink(self.segment.name()) {
            warn!(segment = self.segment.name(), error = %e, "failed to unlink segment on producer drop");
        }
    }
}

/// What an external discovery broker needs to publish for this channel.
/// The core never talks to the broker itself.
#[derive(Debug, Clone)]
pub struct BrokerRegistration {
    pub segment_name: String,
    pub ring_capacity: u64,
    pub slot_stride_bytes: u64,
    pub flexible_zone_size: u64,
    pub schema_fingerprint: Digest32,
    pub schema_version_packed: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferPolicy, ChecksumAlgorithm};

    fn sample_config() -> SegmentConfig {
        SegmentConfig {
            buffer_policy: BufferPolicy::Ring,
            consumer_sync_policy: ConsumerSyncPolicy::LatestOnly,
            physical_page_size: 256,
            logical_unit_size: 0,
            ring_capacity: 2,
            flexible_zone_size: 0,
            checksum_policy: ChecksumPolicy::Enforced,
            checksum_algorithm: ChecksumAlgorithm::Blake2b256,
        }
    }

    #[test]
    fn single_slot_write_commit_cycle() {
        let name = format!("datablock_producer_test_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);

        let producer =
            Producer::create(&name, [0u8; 64], [1u8; 32], 0, sample_config()).unwrap();
        {
            let mut handle = producer.acquire_write_slot(1000).unwrap();
            handle.buffer_mut()[..4].copy_from_slice(&[0xAB; 4]);
            handle.commit(4);
        }

        let snapshot = producer.get_metrics();
        assert_eq!(snapshot.total_slots_written, 1);
        assert_eq!(snapshot.total_bytes_written, 4);
    }

    #[test]
    fn dropped_handle_without_commit_does_not_publish() {
        let name = format!("datablock_producer_test_abort_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);

        let producer =
            Producer::create(&name, [0u8; 64], [1u8; 32], 0, sample_config()).unwrap();
        {
            let _handle = producer.acquire_write_slot(1000).unwrap();
        }
        let snapshot = producer.get_metrics();
        assert_eq!(snapshot.total_slots_written, 0);

        // The slot must be usable again immediately.
        let mut handle = producer.acquire_write_slot(1000).unwrap();
        handle.buffer_mut()[0] = 1;
        handle.commit(1);
    }

    #[test]
    fn single_reader_policy_blocks_when_ring_is_full() {
        let name = format!("datablock_producer_test_backpressure_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);

        let mut config = sample_config();
        config.consumer_sync_policy = ConsumerSyncPolicy::SingleReader;
        let producer = Producer::create(&name, [0u8; 64], [1u8; 32], 0, config).unwrap();

        for _ in 0..2 {
            let mut handle = producer.acquire_write_slot(1000).unwrap();
            handle.buffer_mut()[0] = 1;
            handle.commit(1);
        }

        // No consumer has advanced read_index; ring_capacity is 2, so a
        // third write must block until timeout.
        let result = producer.acquire_write_slot(20);
        assert!(matches!(result, Err(DataBlockError::Timeout)));
        assert_eq!(producer.get_metrics().writer_lock_timeout_count, 1);
    }
}
