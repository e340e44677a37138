//! The header's metrics block (spec §3.2, §7).
//!
//! Every counter here uses `Relaxed` ordering: these are observability
//! counters, not correctness-load-bearing state, and spec §9 explicitly
//! permits undercounting under contention ("tests must assert `≥` rather
//! than `==` on counters except in single-threaded micro-tests").

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// `repr(C)`, 184 bytes, living inline in the segment header.
#[repr(C)]
pub struct SegmentMetrics {
    pub writer_lock_timeout_count: AtomicU64,
    pub writer_reader_timeout_count: AtomicU64,
    pub consumer_acquire_timeout_count: AtomicU64,
    pub spinlock_timeout_count: AtomicU64,
    pub reader_race_detected: AtomicU64,
    pub reader_validation_failed: AtomicU64,
    pub checksum_failures: AtomicU64,
    pub magic_mismatch_count: AtomicU64,
    pub abi_mismatch_count: AtomicU64,
    pub layout_hash_mismatch_count: AtomicU64,
    pub layout_fingerprint_mismatch_count: AtomicU64,
    pub schema_mismatch_count: AtomicU64,
    pub recovery_actions_count: AtomicU64,
    pub total_bytes_written: AtomicU64,
    pub total_bytes_read: AtomicU64,
    pub total_slots_written: AtomicU64,
    pub total_slots_read: AtomicU64,
    pub heartbeat_count_producer: AtomicU64,
    pub heartbeat_count_consumer: AtomicU64,
    pub write_generation_wraps: AtomicU64,
    pub peak_reader_count: AtomicU32,
    pub last_error_code: AtomicU32,
    pub last_error_timestamp_ns: AtomicU64,
    /// Set once at `create` time; never touched by `reset_metrics`.
    pub creation_time_ns: u64,
}

const _: () = assert!(core::mem::size_of::<SegmentMetrics>() == 184);

impl SegmentMetrics {
    pub fn init(&mut self, creation_time_ns: u64) {
        macro_rules! zero {
            ($($f:ident),* $(,)?) => { $( self.$f = AtomicU64::new(0); )* };
        }
        zero!(
            writer_lock_timeout_count,
            writer_reader_timeout_count,
            consumer_acquire_timeout_count,
            spinlock_timeout_count,
            reader_race_detected,
            reader_validation_failed,
            checksum_failures,
            magic_mismatch_count,
            abi_mismatch_count,
            layout_hash_mismatch_count,
            layout_fingerprint_mismatch_count,
            schema_mismatch_count,
            recovery_actions_count,
            total_bytes_written,
            total_bytes_read,
            total_slots_written,
            total_slots_read,
            heartbeat_count_producer,
            heartbeat_count_consumer,
            write_generation_wraps,
            last_error_timestamp_ns,
        );
        self.peak_reader_count = AtomicU32::new(0);
        self.last_error_code = AtomicU32::new(0);
        self.creation_time_ns = creation_time_ns;
    }

    /// Zeros every counter except `creation_time_ns`. Callers in
    /// `producer`/`consumer` are responsible for the spec's additional
    /// promise that `commit_index`/`slot_count` (which live in the ring
    /// state, not here) survive a reset untouched.
    pub fn reset(&self) {
        macro_rules! zero {
            ($($f:ident),* $(,)?) => { $( self.$f.store(0, Ordering::Relaxed); )* };
        }
        zero!(
            writer_lock_timeout_count,
            writer_reader_timeout_count,
            consumer_acquire_timeout_count,
            spinlock_timeout_count,
            reader_race_detected,
            reader_validation_failed,
            checksum_failures,
            magic_mismatch_count,
            abi_mismatch_count,
            layout_hash_mismatch_count,
            layout_fingerprint_mismatch_count,
            schema_mismatch_count,
            recovery_actions_count,
            total_bytes_written,
            total_bytes_read,
            total_slots_written,
            total_slots_read,
            heartbeat_count_producer,
            heartbeat_count_consumer,
            write_generation_wraps,
            last_error_timestamp_ns,
        );
        self.peak_reader_count.store(0, Ordering::Relaxed);
        self.last_error_code.store(0, Ordering::Relaxed);
    }

    pub fn record_peak_reader(&self, count: u32) {
        self.peak_reader_count.fetch_max(count, Ordering::Relaxed);
    }

    pub fn record_error(&self, code: u32, now_ns: u64) {
        self.last_error_code.store(code, Ordering::Relaxed);
        self.last_error_timestamp_ns.store(now_ns, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            writer_lock_timeout_count: self.writer_lock_timeout_count.load(Ordering::Relaxed),
            writer_reader_timeout_count: self.writer_reader_timeout_count.load(Ordering::Relaxed),
            consumer_acquire_timeout_count: self
                .consumer_acquire_timeout_count
                .load(Ordering::Relaxed),
            spinlock_timeout_count: self.spinlock_timeout_count.load(Ordering::Relaxed),
            reader_race_detected: self.reader_race_detected.load(Ordering::Relaxed),
            reader_validation_failed: self.reader_validation_failed.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            magic_mismatch_count: self.magic_mismatch_count.load(Ordering::Relaxed),
            abi_mismatch_count: self.abi_mismatch_count.load(Ordering::Relaxed),
            layout_hash_mismatch_count: self.layout_hash_mismatch_count.load(Ordering::Relaxed),
            layout_fingerprint_mismatch_count: self
                .layout_fingerprint_mismatch_count
                .load(Ordering::Relaxed),
            schema_mismatch_count: self.schema_mismatch_count.load(Ordering::Relaxed),
            recovery_actions_count: self.recovery_actions_count.load(Ordering::Relaxed),
            total_bytes_written: self.total_bytes_written.load(Ordering::Relaxed),
            total_bytes_read: self.total_bytes_read.load(Ordering::Relaxed),
            total_slots_written: self.total_slots_written.load(Ordering::Relaxed),
            total_slots_read: self.total_slots_read.load(Ordering::Relaxed),
            heartbeat_count_producer: self.heartbeat_count_producer.load(Ordering::Relaxed),
            heartbeat_count_consumer: self.heartbeat_count_consumer.load(Ordering::Relaxed),
            write_generation_wraps: self.write_generation_wraps.load(Ordering::Relaxed),
            peak_reader_count: self.peak_reader_count.load(Ordering::Relaxed),
            last_error_code: self.last_error_code.load(Ordering::Relaxed),
            last_error_timestamp_ns: self.last_error_timestamp_ns.load(Ordering::Relaxed),
            creation_time_ns: self.creation_time_ns,
        }
    }
}

/// An owned, point-in-time copy of the metrics block, returned by
/// `get_metrics(&mut out)` (spec §4.6/§4.7).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub writer_lock_timeout_count: u64,
    pub writer_reader_timeout_count: u64,
    pub consumer_acquire_timeout_count: u64,
    pub spinlock_timeout_count: u64,
    pub reader_race_detected: u64,
    pub reader_validation_failed: u64,
    pub checksum_failures: u64,
    pub magic_mismatch_count: u64,
    pub abi_mismatch_count: u64,
    pub layout_hash_mismatch_count: u64,
    pub layout_fingerprint_mismatch_count: u64,
    pub schema_mismatch_count: u64,
    pub recovery_actions_count: u64,
    pub total_bytes_written: u64,
    pub total_bytes_read: u64,
    pub total_slots_written: u64,
    pub total_slots_read: u64,
    pub heartbeat_count_producer: u64,
    pub heartbeat_count_consumer: u64,
    pub write_generation_wraps: u64,
    pub peak_reader_count: u32,
    pub last_error_code: u32,
    pub last_error_timestamp_ns: u64,
    pub creation_time_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_preserves_creation_time() {
        let mut m: SegmentMetrics = unsafe { std::mem::zeroed() };
        m.init(12345);
        m.writer_lock_timeout_count.store(7, Ordering::Relaxed);
        m.reset();
        let snap = m.snapshot();
        assert_eq!(snap.writer_lock_timeout_count, 0);
        assert_eq!(snap.creation_time_ns, 12345);
    }

    #[test]
    fn peak_reader_tracks_maximum() {
        let mut m: SegmentMetrics = unsafe { std::mem::zeroed() };
        m.init(0);
        m.record_peak_reader(3);
        m.record_peak_reader(1);
        m.record_peak_reader(5);
        assert_eq!(m.snapshot().peak_reader_count, 5);
    }
}
