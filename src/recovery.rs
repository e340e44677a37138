//! Recovery and diagnostics: a read-only-by-default handle on a segment
//! that never claims a consumer heartbeat slot, used for health reporting
//! and — when explicitly asked — forced repair of slots or consumer
//! entries left behind by a crashed participant.
//!
//! Shares the liveness-probe-first reclaim policy already implemented in
//! [`crate::slot::SlotRecord::acquire_write`] and
//! [`crate::platform::robust_mutex`] — recovery never mutates a slot or
//! consumer entry owned by a live process unless explicitly forced.

use std::fmt;

use tracing::{info, warn};

use crate::error::Result;
use crate::header::{ABI_MAJOR, MAGIC};
use crate::platform::is_process_alive;
use crate::segment::{AttachExpectations, Segment};
use crate::slot::SlotStateTag;

/// Classification [`DiagnosticHandle::diagnose_slot`] assigns to one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotHealth {
    Healthy,
    /// `writing`, and the writer's PID is confirmed dead.
    StuckWriting,
    /// `committed`/`draining` with a nonzero reader count but every reader
    /// that could plausibly hold it is unprovable-alive (best-effort: the
    /// slot carries no per-reader PID, so this can only ever be a
    /// heuristic based on elapsed time, never a certainty).
    StuckCommittedWithReaders,
}

/// One slot's point-in-time diagnosis.
#[derive(Debug, Clone, Copy)]
pub struct SlotDiagnosis {
    pub slot_index: u64,
    pub state: SlotStateTag,
    pub writer_pid: u64,
    pub writer_alive: bool,
    pub reader_count: u32,
    pub write_generation: u64,
    pub health: SlotHealth,
}

/// One consumer heartbeat entry's diagnosis.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerDiagnosis {
    pub heartbeat_slot: usize,
    pub pid: u64,
    pub last_seen_ns: u64,
    pub alive: bool,
}

/// The output of [`DiagnosticHandle::diagnose_all`].
#[derive(Debug, Clone)]
pub struct SegmentDiagnosis {
    pub producer_pid: u64,
    pub producer_alive: bool,
    pub slots: Vec<SlotDiagnosis>,
    pub consumers: Vec<ConsumerDiagnosis>,
}

impl fmt::Display for SegmentDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "producer pid={} alive={}",
            self.producer_pid, self.producer_alive
        )?;
        for slot in &self.slots {
            writeln!(
                f,
                "slot {:>4} state={:?} writer_pid={} writer_alive={} readers={} gen={} health={:?}",
                slot.slot_index,
                slot.state,
                slot.writer_pid,
                slot.writer_alive,
                slot.reader_count,
                slot.write_generation,
                slot.health
            )?;
        }
        for consumer in &self.consumers {
            writeln!(
                f,
                "consumer slot={} pid={} last_seen_ns={} alive={}",
                consumer.heartbeat_slot, consumer.pid, consumer.last_seen_ns, consumer.alive
            )?;
        }
        Ok(())
    }
}

/// The result of [`DiagnosticHandle::validate_integrity`].
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub magic_ok: bool,
    pub abi_ok: bool,
    pub layout_fingerprint_ok: bool,
    /// Slots whose stored checksum did not match a recomputation. Empty
    /// when the checksum policy is disabled (nothing to check) or every
    /// committed slot verified cleanly.
    pub checksum_mismatches: Vec<u64>,
    pub repaired: bool,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.magic_ok && self.abi_ok && self.layout_fingerprint_ok && self.checksum_mismatches.is_empty()
    }
}

/// A read-only attach that does not claim a consumer heartbeat slot (spec
/// §4.9: "attaches to a segment without claiming a consumer heartbeat
/// slot").
pub struct DiagnosticHandle {
    segment: Segment,
}

impl DiagnosticHandle {
    pub fn attach(name: &str) -> Result<Self> {
        let segment = Segment::attach(name, &AttachExpectations::default())?;
        Ok(Self { segment })
    }

    /// Diagnoses a single slot: reads the coordination record, probes
    /// writer-lock and reader-count liveness,
    /// classifies it healthy / stuck-writing / stuck-committed-with-dead-
    /// readers.
    pub fn diagnose_slot(&self, index: u64) -> Result<SlotDiagnosis> {
        let record = self.segment.slot_record(index)?;
        let state = record.state();
        let writer_pid = record.writer_lock_pid();
        let writer_alive = is_process_alive(writer_pid);
        let reader_count = record.reader_count();

        let health = if state == SlotStateTag::Writing && !writer_alive {
            SlotHealth::StuckWriting
        } else if matches!(state, SlotStateTag::Committed | SlotStateTag::Draining)
            && reader_count > 0
            && !is_process_alive(self.segment.header().producer_pid())
        {
            // Best-effort only: a live producer can legitimately see
            // readers draining a `draining` slot. We only flag this when
            // the producer itself looks dead too, since that's the
            // scenario where no participant remains to ever release it.
            SlotHealth::StuckCommittedWithReaders
        } else {
            SlotHealth::Healthy
        };

        Ok(SlotDiagnosis {
            slot_index: index,
            state,
            writer_pid,
            writer_alive,
            reader_count,
            write_generation: record.write_generation(),
            health,
        })
    }

    /// Diagnoses every slot and every consumer heartbeat entry.
    pub fn diagnose_all(&self) -> SegmentDiagnosis {
        let header = self.segment.header();
        let ring_capacity = header.ring_capacity();

        let slots = (0..ring_capacity)
            .map(|i| {
                self.diagnose_slot(i)
                    .expect("index is within ring_capacity by construction")
            })
            .collect();

        let consumers = header
            .consumer_heartbeats()
            .iter()
            .enumerate()
            .filter(|(_, hb)| !hb.is_vacant())
            .map(|(index, hb)| ConsumerDiagnosis {
                heartbeat_slot: index,
                pid: hb.pid(),
                last_seen_ns: hb.last_seen_ns(),
                alive: is_process_alive(hb.pid()),
            })
            .collect();

        SegmentDiagnosis {
            producer_pid: header.producer_pid(),
            producer_alive: is_process_alive(header.producer_pid()),
            slots,
            consumers,
        }
    }

    /// Reverifies magic, ABI major, and the layout fingerprint; if any
    /// commits have occurred, recomputes every committed slot's checksum
    /// and compares it with the stored one. When `repair` is true, mismatched checksums
    /// are overwritten with the recomputed value — dangerous, intended for
    /// offline repair only, never called on a segment with a live writer.
    pub fn validate_integrity(&self, repair: bool) -> IntegrityReport {
        let header = self.segment.header();
        let mut report = IntegrityReport {
            magic_ok: header.magic() == MAGIC,
            abi_ok: header.abi_major() == ABI_MAJOR,
            layout_fingerprint_ok: header.compute_layout_fingerprint() == header.layout_fingerprint(),
            checksum_mismatches: Vec::new(),
            repaired: false,
        };

        if header.config().checksum_policy != crate::config::ChecksumPolicy::Enforced {
            return report;
        }

        for index in 0..header.ring_capacity() {
            let record = match self.segment.slot_record(index) {
                Ok(r) => r,
                Err(_) => continue,
            };
            if record.state() != SlotStateTag::Committed {
                continue;
            }
            let payload = match self.segment.slot_data(index) {
                Ok(p) => p,
                Err(_) => continue,
            };
            let checksum = match self.segment.slot_checksum(index) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if !checksum.verify_payload(payload) {
                report.checksum_mismatches.push(index);
                if repair {
                    let algorithm = header.config().checksum_algorithm;
                    // SAFETY: offline repair only — the caller is
                    // responsible for ensuring no writer holds this slot
                    // concurrently; see the dangerous-operation note above.
                    unsafe {
                        self.segment.slot_checksum_mut(index).store(algorithm, payload);
                    }
                }
            }
        }
        report.repaired = repair && !report.checksum_mismatches.is_empty();
        report
    }

    /// Restores a slot to `free` and clears its reader count. Only acts
    /// when the writer PID is confirmed dead
    /// or `force` is set; never mutates a slot a live process still holds
    /// unless explicitly forced.
    pub fn force_reset_slot(&self, index: u64, force: bool) -> Result<()> {
        let record = self.segment.slot_record(index)?;
        let writer_pid = record.writer_lock_pid();
        if !force && writer_pid != 0 && is_process_alive(writer_pid) {
            return Err(crate::error::DataBlockError::ContractViolation(
                "refusing to reset a slot whose writer is alive; pass force=true to override",
            ));
        }
        record.force_reset();
        self.segment
            .header()
            .metrics()
            .recovery_actions_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        warn!(segment = self.segment.name(), slot = index, forced = force, "slot force-reset");
        Ok(())
    }

    /// Forces a slot's reader-count contribution to zero. There is no
    /// per-reader PID to probe, so
    /// this requires `force` unless `reader_count` is already zero.
    pub fn release_zombie_readers(&self, index: u64, force: bool) -> Result<()> {
        let record = self.segment.slot_record(index)?;
        if record.reader_count() == 0 {
            return Ok(());
        }
        if !force {
            return Err(crate::error::DataBlockError::ContractViolation(
                "cannot prove a reader is dead without a per-reader PID; pass force=true",
            ));
        }
        record.force_clear_readers();
        self.segment
            .header()
            .metrics()
            .recovery_actions_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        warn!(segment = self.segment.name(), slot = index, "zombie readers force-cleared");
        Ok(())
    }

    /// Clears a slot's writer lock (and returns it to `free` if it was left
    /// `writing`) when the writer PID is confirmed dead or `force` is set.
    pub fn release_zombie_writer(&self, index: u64, force: bool) -> Result<()> {
        let record = self.segment.slot_record(index)?;
        let writer_pid = record.writer_lock_pid();
        if writer_pid == 0 {
            return Ok(());
        }
        if !force && is_process_alive(writer_pid) {
            return Err(crate::error::DataBlockError::ContractViolation(
                "refusing to clear a writer lock held by a live process; pass force=true",
            ));
        }
        record.force_clear_writer();
        self.segment
            .header()
            .metrics()
            .recovery_actions_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        warn!(segment = self.segment.name(), slot = index, "zombie writer lock force-cleared");
        Ok(())
    }

    /// Vacates every consumer heartbeat entry whose PID is confirmed dead.
    /// Returns the number of entries reclaimed.
    pub fn cleanup_dead_consumers(&self) -> usize {
        let header = self.segment.header();
        let mut reclaimed = 0;
        for (index, hb) in header.consumer_heartbeats().iter().enumerate() {
            if hb.is_vacant() {
                continue;
            }
            if !is_process_alive(hb.pid()) {
                header.release_consumer_slot(index);
                header
                    .metrics()
                    .recovery_actions_count
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                reclaimed += 1;
            }
        }
        if reclaimed > 0 {
            info!(segment = self.segment.name(), reclaimed, "dead consumer entries reclaimed");
        }
        reclaimed
    }
}
