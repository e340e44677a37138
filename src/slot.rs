//! The slot coordinator: spec §4.4, "the hardest part". A per-slot atomic
//! state machine with five operations (writer acquire/commit/abort, reader
//! acquire/validate/release) and the TOCTTOU double-check that makes
//! concurrent writer-drain and reader-acquire race-free without locking.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use crate::metrics::SegmentMetrics;
use crate::platform::backoff::{spin_backoff, Deadline};
use crate::platform::{current_pid, is_process_alive};

/// The four states a slot can be in (spec §4.4).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStateTag {
    Free = 0,
    Writing = 1,
    Committed = 2,
    Draining = 3,
}

impl SlotStateTag {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => SlotStateTag::Free,
            1 => SlotStateTag::Writing,
            2 => SlotStateTag::Committed,
            3 => SlotStateTag::Draining,
            _ => unreachable!("slot state field holds a value outside 0..=3"),
        }
    }
}

/// Result codes for the hot-path slot operations. Never wraps a heap
/// allocation or an unwind — this is the type the spec's §7 "hot-path
/// exceptions are forbidden" rule governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Writer-lock CAS did not succeed before the deadline.
    LockTimeout,
    /// Writer lock was acquired but readers never drained before the
    /// deadline.
    ReaderDrainTimeout,
    /// The slot was not in `committed` state when a reader looked (either
    /// initially or after the TOCTTOU re-check).
    NotReady,
    /// The calling process already holds this slot's writer lock.
    AlreadyLocked,
}

/// Per-slot coordination record: 48 bytes, placed in a dense array
/// immediately after the header (spec §3.3, §6.1).
#[repr(C)]
pub struct SlotRecord {
    /// 0 == free; otherwise the PID of the writer currently holding it.
    writer_lock: AtomicU64,
    /// Monotonically increasing per-slot commit counter. Kept next to
    /// `writer_lock` (both 8-byte aligned) so the 32-bit fields below it
    /// start on a 4-byte boundary with no compiler-inserted padding.
    write_generation: AtomicU64,
    /// Number of readers currently between `acquire_read` and
    /// `release_read`.
    reader_count: AtomicU32,
    /// One of [`SlotStateTag`], stored as a tagged `u32`.
    state: AtomicU32,
    /// Set while a writer is draining readers so new readers can see a
    /// takeover is in progress even before `state` flips.
    writer_waiting: AtomicU32,
    _reserved: [u8; 20],
}

const _: () = assert!(core::mem::size_of::<SlotRecord>() == 48);

impl SlotRecord {
    pub fn init_free(&mut self) {
        self.writer_lock = AtomicU64::new(0);
        self.reader_count = AtomicU32::new(0);
        self.state = AtomicU32::new(SlotStateTag::Free as u32);
        self.writer_waiting = AtomicU32::new(0);
        self.write_generation = AtomicU64::new(0);
        self._reserved = [0; 20];
    }

    pub fn state(&self) -> SlotStateTag {
        SlotStateTag::from_u32(self.state.load(Ordering::Acquire))
    }

    pub fn writer_lock_pid(&self) -> u64 {
        self.writer_lock.load(Ordering::Acquire)
    }

    pub fn reader_count(&self) -> u32 {
        self.reader_count.load(Ordering::Acquire)
    }

    pub fn write_generation(&self) -> u64 {
        self.write_generation.load(Ordering::Acquire)
    }

    /// Writer acquisition (spec §4.4 "Writer acquisition"). On success the
    /// slot is in `writing` state, owned by the caller's PID, with no
    /// readers. `timeout_ms` bounds both the lock CAS and the subsequent
    /// reader drain; the two are billed to distinct metrics so an operator
    /// can tell a contended lock from a slow reader.
    pub fn acquire_write(
        &self,
        timeout_ms: u64,
        metrics: &SegmentMetrics,
    ) -> Result<(), SlotError> {
        let me = current_pid();
        let deadline = Deadline::after(timeout_ms);
        let mut iteration = 0u32;

        loop {
            match self
                .writer_lock
                .compare_exchange(0, me, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(current) if current == me => return Err(SlotError::AlreadyLocked),
                Err(current) => {
                    if !is_process_alive(current)
                        && self
                            .writer_lock
                            .compare_exchange(current, me, Ordering::AcqRel, Ordering::Acquire)
                            .is_ok()
                    {
                        metrics.recovery_actions_count.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    if deadline.expired() {
                        metrics
                            .writer_lock_timeout_count
                            .fetch_add(1, Ordering::Relaxed);
                        return Err(SlotError::LockTimeout);
                    }
                    spin_backoff(iteration);
                    iteration = iteration.saturating_add(1);
                }
            }
        }

        // Invariant (§3.7): writer_lock was 0, so state is Free or
        // Committed — only the writer ever transitions out of Writing.
        if self.state() == SlotStateTag::Committed {
            self.state.store(SlotStateTag::Draining as u32, Ordering::Release);
        }

        self.writer_waiting.store(1, Ordering::Relaxed);
        loop {
            // The sequentially consistent fence is the single event that
            // orders this load against a concurrent reader's reader_count
            // increment (spec §4.4 step 3, §5 ordering guarantee 2).
            fence(Ordering::SeqCst);
            if self.reader_count.load(Ordering::Acquire) == 0 {
                break;
            }
            if deadline.expired() {
                self.writer_waiting.store(0, Ordering::Relaxed);
                self.writer_lock.store(0, Ordering::Release);
                // Undo the Committed->Draining transition above: spec §5
                // requires that a timed-out acquisition leave no side
                // effect on the slot, and a slot stuck in `draining`
                // forever would be unreadable to any new reader (whose
                // `acquire_read` requires `state == committed`).
                let _ = self.state.compare_exchange(
                    SlotStateTag::Draining as u32,
                    SlotStateTag::Committed as u32,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                metrics
                    .writer_reader_timeout_count
                    .fetch_add(1, Ordering::Relaxed);
                return Err(SlotError::ReaderDrainTimeout);
            }
            spin_backoff(iteration);
            iteration = iteration.saturating_add(1);
        }

        self.writer_waiting.store(0, Ordering::Relaxed);
        self.state.store(SlotStateTag::Writing as u32, Ordering::Release);
        Ok(())
    }

    /// First half of writer commit (spec §4.4 steps 1-2): bumps the
    /// generation and flips to `committed`, but does not yet publish via
    /// `commit_index` — the caller computes/stores the checksum between
    /// this call and [`SlotRecord::publish`].
    pub fn begin_commit(&self, metrics: &SegmentMetrics) -> u64 {
        let previous = self.write_generation.fetch_add(1, Ordering::Release);
        if previous == u64::MAX {
            metrics
                .write_generation_wraps
                .fetch_add(1, Ordering::Relaxed);
        }
        self.state.store(SlotStateTag::Committed as u32, Ordering::Release);
        previous.wrapping_add(1)
    }

    /// Step 4 of writer commit: the single publication point. Any consumer
    /// whose acquire-load of `commit_index` observes the new value
    /// happens-after every prior write to this slot's buffer.
    pub fn publish(&self, commit_index: &AtomicU64) {
        commit_index.fetch_add(1, Ordering::Release);
        self.writer_lock.store(0, Ordering::Release);
    }

    /// Writer release without commit: restores `free`, clears the lock.
    /// `commit_index` is not advanced.
    pub fn release_without_commit(&self) {
        self.state.store(SlotStateTag::Free as u32, Ordering::Release);
        self.writer_lock.store(0, Ordering::Release);
    }

    /// Consumer acquisition (spec §4.4 "Consumer acquisition"), including
    /// the TOCTTOU double-check. Returns the generation the caller must
    /// pass to [`SlotRecord::validate_read`].
    pub fn acquire_read(&self, metrics: &SegmentMetrics) -> Result<u64, SlotError> {
        if self.state.load(Ordering::Acquire) != SlotStateTag::Committed as u32 {
            return Err(SlotError::NotReady);
        }

        let count_after = self.reader_count.fetch_add(1, Ordering::AcqRel) + 1;
        fence(Ordering::SeqCst);

        if self.state.load(Ordering::Acquire) != SlotStateTag::Committed as u32 {
            self.reader_count.fetch_sub(1, Ordering::Release);
            metrics.reader_race_detected.fetch_add(1, Ordering::Relaxed);
            return Err(SlotError::NotReady);
        }

        metrics.record_peak_reader(count_after);
        Ok(self.write_generation.load(Ordering::Acquire))
    }

    /// Returns whether the slot's generation still matches what was
    /// captured at acquire time; `false` means the ring wrapped during this
    /// reader's tenure and the payload it began reading is gone.
    pub fn validate_read(&self, captured_generation: u64, metrics: &SegmentMetrics) -> bool {
        let current = self.write_generation.load(Ordering::Acquire);
        let valid = current == captured_generation;
        if !valid {
            metrics
                .reader_validation_failed
                .fetch_add(1, Ordering::Relaxed);
        }
        valid
    }

    pub fn release_read(&self) {
        self.reader_count.fetch_sub(1, Ordering::Release);
    }

    /// Forcibly returns the slot to `free`, clearing the writer lock and
    /// reader count regardless of protocol (spec §4.9 `force_reset_slot`).
    /// Recovery-only; never called from the hot path, and never safe to
    /// call while a live process actually holds the slot.
    pub fn force_reset(&self) {
        self.writer_lock.store(0, Ordering::Release);
        self.reader_count.store(0, Ordering::Release);
        self.writer_waiting.store(0, Ordering::Relaxed);
        self.state.store(SlotStateTag::Free as u32, Ordering::Release);
    }

    /// Forces the reader-count contribution to zero without touching the
    /// writer lock or state (spec §4.9 `release_zombie_readers`). Since a
    /// slot's reader count has no per-reader PID to probe, this is
    /// necessarily best-effort: it trusts the caller to have already
    /// established that no live reader is using this slot.
    pub fn force_clear_readers(&self) {
        self.reader_count.store(0, Ordering::Release);
    }

    /// Forces the writer lock clear and, if the slot was left `writing`,
    /// returns it to `free` (spec §4.9 `release_zombie_writer`).
    pub fn force_clear_writer(&self) {
        if self.state() == SlotStateTag::Writing {
            self.state.store(SlotStateTag::Free as u32, Ordering::Release);
        }
        self.writer_lock.store(0, Ordering::Release);
        self.writer_waiting.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_metrics() -> SegmentMetrics {
        let mut m: SegmentMetrics = unsafe { std::mem::zeroed() };
        m.init(0);
        m
    }

    fn fresh_slot() -> SlotRecord {
        let mut s: SlotRecord = unsafe { std::mem::zeroed() };
        s.init_free();
        s
    }

    #[test]
    fn single_threaded_write_commit_read_cycle() {
        let slot = fresh_slot();
        let metrics = fresh_metrics();
        let commit_index = AtomicU64::new(0);

        slot.acquire_write(100, &metrics).unwrap();
        assert_eq!(slot.state(), SlotStateTag::Writing);
        assert_eq!(slot.reader_count(), 0);

        let gen = slot.begin_commit(&metrics);
        assert_eq!(gen, 1);
        slot.publish(&commit_index);
        assert_eq!(commit_index.load(Ordering::Relaxed), 1);
        assert_eq!(slot.state(), SlotStateTag::Committed);

        let captured = slot.acquire_read(&metrics).unwrap();
        assert_eq!(captured, gen);
        assert!(slot.validate_read(captured, &metrics));
        slot.release_read();
        assert_eq!(slot.reader_count(), 0);
    }

    #[test]
    fn writer_abort_returns_slot_to_free_without_publishing() {
        let slot = fresh_slot();
        let metrics = fresh_metrics();
        slot.acquire_write(100, &metrics).unwrap();
        slot.release_without_commit();
        assert_eq!(slot.state(), SlotStateTag::Free);
        assert_eq!(slot.writer_lock_pid(), 0);
    }

    #[test]
    fn reader_sees_not_ready_before_first_commit() {
        let slot = fresh_slot();
        let metrics = fresh_metrics();
        assert_eq!(slot.acquire_read(&metrics), Err(SlotError::NotReady));
    }

    #[test]
    fn validate_read_detects_generation_mismatch_after_wrap() {
        let slot = fresh_slot();
        let metrics = fresh_metrics();
        let commit_index = AtomicU64::new(0);

        slot.acquire_write(100, &metrics).unwrap();
        let first_gen = slot.begin_commit(&metrics);
        slot.publish(&commit_index);
        let captured = slot.acquire_read(&metrics).unwrap();
        assert_eq!(captured, first_gen);

        // Simulate the ring wrapping back onto this slot while the reader
        // is still holding it: writer reuses the slot (bumping generation)
        // without the reader having released yet. Because reader_count > 0
        // the writer would normally block in acquire_write; we bypass that
        // here to test validate_read in isolation, as spec scenario 8.4.2
        // does via an internal test hook.
        slot.release_read();
        slot.acquire_write(100, &metrics).unwrap();
        let second_gen = slot.begin_commit(&metrics);
        slot.publish(&commit_index);
        assert_ne!(second_gen, first_gen);
        assert!(!slot.validate_read(captured, &metrics));
        assert_eq!(
            metrics.reader_validation_failed.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn writer_times_out_when_reader_holds_slot() {
        let slot = fresh_slot();
        let metrics = fresh_metrics();
        let commit_index = AtomicU64::new(0);

        slot.acquire_write(100, &metrics).unwrap();
        slot.begin_commit(&metrics);
        slot.publish(&commit_index);
        let captured = slot.acquire_read(&metrics).unwrap();
        let _ = captured;

        // A second writer cannot proceed while the reader_count is nonzero.
        let result = slot.acquire_write(20, &metrics);
        assert_eq!(result, Err(SlotError::ReaderDrainTimeout));
        assert_eq!(slot.writer_lock_pid(), 0);
        assert_eq!(
            metrics
                .writer_reader_timeout_count
                .load(Ordering::Relaxed),
            1
        );

        slot.release_read();
        slot.acquire_write(100, &metrics).unwrap();
    }

    #[test]
    fn force_reset_clears_lock_state_and_readers() {
        let slot = fresh_slot();
        let metrics = fresh_metrics();
        let commit_index = AtomicU64::new(0);

        slot.acquire_write(100, &metrics).unwrap();
        slot.begin_commit(&metrics);
        slot.publish(&commit_index);
        let _captured = slot.acquire_read(&metrics).unwrap();

        slot.force_reset();
        assert_eq!(slot.state(), SlotStateTag::Free);
        assert_eq!(slot.writer_lock_pid(), 0);
        assert_eq!(slot.reader_count(), 0);
    }

    #[test]
    fn fields_sit_at_the_documented_byte_offsets() {
        // Cross-checks the hand-computed layout this module's doc comments
        // promise: no implicit compiler padding between fields.
        assert_eq!(memoffset::offset_of!(SlotRecord, writer_lock), 0);
        assert_eq!(memoffset::offset_of!(SlotRecord, write_generation), 8);
        assert_eq!(memoffset::offset_of!(SlotRecord, reader_count), 16);
        assert_eq!(memoffset::offset_of!(SlotRecord, state), 20);
        assert_eq!(memoffset::offset_of!(SlotRecord, writer_waiting), 24);
        assert_eq!(memoffset::offset_of!(SlotRecord, _reserved), 28);
    }

    #[test]
    fn zombie_writer_lock_is_reclaimed() {
        let slot = fresh_slot();
        let metrics = fresh_metrics();
        // Implausible pid stands in for a crashed writer holding the lock.
        slot.writer_lock.store(0x7fff_fffe, Ordering::Relaxed);
        slot.state.store(SlotStateTag::Writing as u32, Ordering::Relaxed);

        slot.acquire_write(1000, &metrics).unwrap();
        assert_eq!(slot.writer_lock_pid(), current_pid());
        assert_eq!(metrics.recovery_actions_count.load(Ordering::Relaxed), 1);
    }
}
