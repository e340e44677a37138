//! Platform layer: process identity, monotonic time, liveness probing, and
//! named shared-memory segment lifecycle (spec §4.1).
//!
//! Every coordinating field the rest of the crate puts in shared memory is a
//! naked integer atomic (`AtomicU32`/`AtomicU64`) rather than a
//! language-runtime wrapper, so the binary layout is identical across
//! processes built from different compilations of this crate (spec §9,
//! "Cross-process atomics").

pub mod backoff;
pub mod robust_mutex;
pub mod shm;

/// The current process's identifier, stable for the life of the process.
///
/// Never zero on any supported platform, so `0` is a safe "no owner"
/// sentinel for writer-lock and spin-lock fields (spec §3.3, §4.3).
pub fn current_pid() -> u64 {
    std::process::id() as u64
}

/// Monotonic nanosecond timestamp, suitable for heartbeats and metrics.
/// Not wall-clock time: only meaningful for comparison within one boot.
pub fn monotonic_nanos() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_nanos() as u64
}

/// Probes whether `pid` is a live process.
///
/// Returns `false` for `pid == 0` (the "free" sentinel) and for a
/// confirmed-dead process. A process whose existence is confirmed but which
/// the caller lacks permission to signal counts as alive (spec §4.1) — we
/// can't prove it's dead, so we must not reclaim its lock.
pub fn is_process_alive(pid: u64) -> bool {
    if pid == 0 {
        return false;
    }
    let pid = pid as libc::pid_t;
    // signal 0 sends no signal but still performs the existence/permission
    // check, per kill(2).
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => false, // confirmed: no such process
        Some(libc::EPERM) => true,  // exists, we just can't signal it
        _ => true,                  // unknown error: assume alive, don't reclaim
    }
}
