//! Consumer lifecycle (spec §4.7). Grounded in the teacher's
//! `MPMC::consumer::Consumer` (receive/receive_blocking/receive_timeout,
//! producer-alive heuristic via last-message-time), generalized to the
//! three `consumer_sync_policy` iteration modes this spec requires instead
//! of the teacher's single dequeue mode.

use std::sync::atomic::Ordering;

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use tracing::warn;

use crate::config::{ConsumerSyncPolicy, SegmentConfig};
use crate::error::{DataBlockError, Result};
use crate::hash::Digest32;
use crate::metrics::MetricsSnapshot;
use crate::platform::backoff::{spin_backoff, Deadline};
use crate::platform::monotonic_nanos;
use crate::segment::{AttachExpectations, Segment};
use crate::slot::SlotError;
use crate::spinlock::{SpinLock, SpinLockError};

/// A consume handle bound to the consumer that acquired it (spec §4.7
/// `acquire_consume_slot`). At most one may be outstanding per consumer.
pub struct SlotConsumeHandle<'c> {
    consumer: &'c Consumer,
    slot_index: u64,
    generation: u64,
    released: bool,
}

impl<'c> SlotConsumeHandle<'c> {
    pub fn slot_index(&self) -> u64 {
        self.slot_index
    }

    pub fn buffer(&self) -> &[u8] {
        self.consumer
            .segment
            .slot_data(self.slot_index)
            .expect("valid slot index")
    }

    /// Re-checks the slot's generation against the one captured at
    /// acquisition (spec §4.4 `validate_read`). `false` means the ring
    /// wrapped onto this slot while the handle was held; the payload read
    /// through [`Self::buffer`] is not trustworthy.
    pub fn validate_read(&self) -> bool {
        let header = self.consumer.segment.header();
        let record = self
            .consumer
            .segment
            .slot_record(self.slot_index)
            .expect("valid slot index");
        record.validate_read(self.generation, header.metrics())
    }

    /// Verifies the slot's stored checksum against its current contents,
    /// when the segment's checksum policy is enforced (spec §4.7
    /// `release_consume_slot`).
    pub fn verify_checksum(&self) -> Result<()> {
        let config = self.consumer.config;
        if config.checksum_policy != crate::config::ChecksumPolicy::Enforced {
            return Ok(());
        }
        let checksum = self
            .consumer
            .segment
            .slot_checksum(self.slot_index)
            .expect("valid slot index");
        if checksum.verify_payload(self.buffer()) {
            Ok(())
        } else {
            self.consumer
                .segment
                .header()
                .metrics()
                .checksum_failures
                .fetch_add(1, Ordering::Relaxed);
            Err(DataBlockError::ChecksumMismatch(self.slot_index))
        }
    }
}

impl<'c> Drop for SlotConsumeHandle<'c> {
    fn drop(&mut self) {
        if !self.released {
            self.consumer.release_slot(self.slot_index);
        }
    }
}

struct ConsumerState {
    handle_outstanding: bool,
    heartbeat_slot: usize,
    /// This consumer's private notion of "next slot to read", advanced by
    /// `slot_iterator`. For `latest_only` this tracks nothing meaningful
    /// (every call re-reads `commit_index`); for `single_reader` it mirrors
    /// the header's shared `read_index`; for `sync_reader` it is this
    /// consumer's own position, also echoed into its heartbeat entry.
    next_read_position: u64,
}

/// Thread-safe via an internal re-entrant mutex (spec §4.7); a given
/// consumer holds at most one consume handle at a time.
pub struct Consumer {
    segment: Segment,
    config: SegmentConfig,
    state: ReentrantMutex<RefCell<ConsumerState>>,
}

impl Consumer {
    /// Opens a segment and runs §4.5 attach validation, then allocates a
    /// heartbeat slot (spec §4.7 `attach`).
    pub fn attach(
        name: &str,
        shared_secret: [u8; 64],
        expected_config: Option<SegmentConfig>,
        expected_schema_fingerprint: Option<Digest32>,
    ) -> Result<Self> {
        let segment = Segment::attach(
            name,
            &AttachExpectations {
                shared_secret: Some(shared_secret),
                expected_config,
                expected_schema_fingerprint,
                expected_schema_version: None,
            },
        )?;

        let config = segment.header().config();
        let now = monotonic_nanos();
        let heartbeat_slot = segment
            .header()
            .claim_consumer_slot(crate::platform::current_pid(), now)
            .ok_or(DataBlockError::TooManyConsumers)?;

        let next_read_position = match config.consumer_sync_policy {
            ConsumerSyncPolicy::SingleReader => segment.header().read_index().load(Ordering::Acquire),
            _ => segment.header().commit_index().load(Ordering::Acquire),
        };

        Ok(Consumer {
            segment,
            config,
            state: ReentrantMutex::new(RefCell::new(ConsumerState {
                handle_outstanding: false,
                heartbeat_slot,
                next_read_position,
            })),
        })
    }

    pub fn segment_name(&self) -> &str {
        self.segment.name()
    }

    pub fn config(&self) -> SegmentConfig {
        self.config
    }

    /// Acquires a specific slot for reading (spec §4.7
    /// `acquire_consume_slot`): retries `acquire_read` with backoff on
    /// `not_ready` up to `timeout_ms`.
    pub fn acquire_consume_slot(
        &self,
        slot_index: u64,
        timeout_ms: u64,
    ) -> Result<SlotConsumeHandle<'_>> {
        {
            let guard = self.state.lock();
            let mut s = guard.borrow_mut();
            if s.handle_outstanding {
                return Err(DataBlockError::ContractViolation(
                    "a consume handle is already outstanding on this consumer",
                ));
            }
            s.handle_outstanding = true;
        }

        let header = self.segment.header();
        let record = self.segment.slot_record(slot_index)?;
        let deadline = Deadline::after(timeout_ms);
        let mut iteration = 0u32;

        let generation = loop {
            match record.acquire_read(header.metrics()) {
                Ok(generation) => break generation,
                Err(SlotError::NotReady) => {
                    if deadline.expired() {
                        self.clear_outstanding();
                        header
                            .metrics()
                            .consumer_acquire_timeout_count
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(DataBlockError::Timeout);
                    }
                    spin_backoff(iteration);
                    iteration = iteration.saturating_add(1);
                }
                Err(other) => {
                    self.clear_outstanding();
                    return Err(DataBlockError::ContractViolation(
                        slot_error_message(other),
                    ));
                }
            }
        };

        Ok(SlotConsumeHandle {
            consumer: self,
            slot_index,
            generation,
            released: false,
        })
    }

    fn release_slot(&self, slot_index: u64) {
        let header = self.segment.header();
        if let Ok(record) = self.segment.slot_record(slot_index) {
            record.release_read();
            header.metrics().total_slots_read.fetch_add(1, Ordering::Relaxed);
        }
        self.clear_outstanding();
        self.update_heartbeat();
    }

    fn clear_outstanding(&self) {
        let guard = self.state.lock();
        guard.borrow_mut().handle_outstanding = false;
    }

    /// Produces the next slot index to read according to
    /// `consumer_sync_policy` (spec §4.7 `slot_iterator`).
    pub fn next_slot_index(&self, timeout_ms: u64) -> Result<u64> {
        let header = self.segment.header();
        let deadline = Deadline::after(timeout_ms);
        let mut iteration = 0u32;

        match self.config.consumer_sync_policy {
            ConsumerSyncPolicy::LatestOnly => loop {
                let commit_index = header.commit_index().load(Ordering::Acquire);
                if commit_index > 0 {
                    return Ok((commit_index - 1) % self.config.ring_capacity);
                }
                if deadline.expired() {
                    return Err(DataBlockError::Timeout);
                }
                spin_backoff(iteration);
                iteration = iteration.saturating_add(1);
            },
            ConsumerSyncPolicy::SingleReader | ConsumerSyncPolicy::SyncReader => loop {
                let position = self.state.lock().borrow().next_read_position;
                let commit_index = header.commit_index().load(Ordering::Acquire);
                if position < commit_index {
                    return Ok(position % self.config.ring_capacity);
                }
                if deadline.expired() {
                    return Err(DataBlockError::Timeout);
                }
                spin_backoff(iteration);
                iteration = iteration.saturating_add(1);
            },
            ConsumerSyncPolicy::Unset => unreachable!("validated at create"),
        }
    }

    /// Advances this consumer's own read position after a successful read,
    /// only meaningful for `single_reader`/`sync_reader` (spec §4.7: the
    /// shared or per-consumer position that producer backpressure is
    /// measured against).
    pub fn advance_read_position(&self) {
        if self.config.consumer_sync_policy == ConsumerSyncPolicy::LatestOnly {
            return;
        }
        let guard = self.state.lock();
        let (heartbeat_slot, new_position) = {
            let mut s = guard.borrow_mut();
            s.next_read_position += 1;
            (s.heartbeat_slot, s.next_read_position)
        };

        if self.config.consumer_sync_policy == ConsumerSyncPolicy::SingleReader {
            self.segment.header().read_index().store(new_position, Ordering::Release);
        } else {
            self.segment.header().consumer_heartbeats()[heartbeat_slot]
                .set_read_position(new_position);
        }
    }

    pub fn seek_latest(&self) {
        let commit_index = self.segment.header().commit_index().load(Ordering::Acquire);
        let guard = self.state.lock();
        guard.borrow_mut().next_read_position = commit_index;
    }

    pub fn seek_to(&self, position: u64) {
        let guard = self.state.lock();
        guard.borrow_mut().next_read_position = position;
    }

    pub fn flexible_zone(&self) -> &[u8] {
        self.segment.flexible_zone()
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

    pub fn update_heartbeat(&self) {
        let guard = self.state.lock();
        let heartbeat_slot = guard.borrow().heartbeat_slot;
        self.segment.header().consumer_heartbeats()[heartbeat_slot].heartbeat(monotonic_nanos());
        self.segment
            .header()
            .metrics()
            .heartbeat_count_consumer
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let guard = self.state.lock();
        let s = guard.borrow();
        if s.handle_outstanding {
            warn!(
                segment = self.segment.name(),
                "consumer dropped with an outstanding consume handle"
            );
        }
        self.segment.header().release_consumer_slot(s.heartbeat_slot);
    }
}

fn slot_error_message(err: SlotError) -> &'static str {
    match err {
        SlotError::LockTimeout => "unexpected lock timeout on a read-only path",
        SlotError::ReaderDrainTimeout => "unexpected reader-drain timeout on a read-only path",
        SlotError::AlreadyLocked => "unexpected writer-lock contention on a read-only path",
        SlotError::NotReady => "not ready",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BufferPolicy, ChecksumAlgorithm, ChecksumPolicy};
    use crate::platform::shm::SharedMapping;
    use crate::producer::Producer;

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
    fn single_slot_round_trip() {
        let name = format!("datablock_consumer_test_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);

        let producer =
            Producer::create(&name, [3u8; 64], [4u8; 32], 7, sample_config()).unwrap();
        {
            let mut handle = producer.acquire_write_slot(1000).unwrap();
            handle.buffer_mut()[..4].copy_from_slice(&[0xAB; 4]);
            handle.commit(4);
        }

        let consumer = Consumer::attach(
            &name,
            [3u8; 64],
            Some(sample_config()),
            Some([4u8; 32]),
        )
        .unwrap();

        let slot_index = consumer.next_slot_index(1000).unwrap();
        let handle = consumer.acquire_consume_slot(slot_index, 1000).unwrap();
        assert_eq!(&handle.buffer()[..4], &[0xAB; 4]);
        assert!(handle.validate_read());
        assert!(handle.verify_checksum().is_ok());
        drop(handle);
        consumer.advance_read_position();

        assert_eq!(consumer.get_metrics().total_slots_read, 1);
        drop(consumer);
        drop(producer);
    }

    #[test]
    fn attach_rejects_schema_mismatch() {
        let name = format!("datablock_consumer_test_schema_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);

        let producer =
            Producer::create(&name, [3u8; 64], [4u8; 32], 7, sample_config()).unwrap();
        let result = Consumer::attach(&name, [3u8; 64], None, Some([9u8; 32]));
        assert!(matches!(result, Err(DataBlockError::SchemaMismatch)));
        assert_eq!(producer.get_metrics().schema_mismatch_count, 1);
    }
}
