//! A cross-process robust mutex usable inside the shared segment (spec
//! §4.1). "Robust" in the POSIX sense: if the holder dies while the lock is
//! taken, the next acquirer detects that via a liveness probe and takes
//! over, but — unlike the spin-lock pool in `spinlock.rs` — the caller is
//! told about it (`LockOutcome::OwnerDied`) so it can reconcile whatever
//! invariant the mutex was protecting before trusting the data underneath.
//!
//! Used for control-zone operations that don't fit the slot coordinator's
//! lock-free protocol, e.g. consumer heartbeat-slot allocation.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::platform::backoff::{spin_backoff, Deadline};
use crate::platform::{current_pid, is_process_alive};

/// The raw state of a robust mutex record: 16 bytes, `repr(C)`, safe to
/// place directly in a `#[repr(C)]` shared-memory header.
#[repr(C)]
pub struct RobustMutexState {
    /// 0 == unlocked. Otherwise the PID of the current holder.
    owner_pid: AtomicU64,
    /// Re-entrant acquisition count for the current holder.
    recursion: AtomicU32,
    /// Bumped every time the lock is force-reclaimed from a dead holder.
    generation: AtomicU32,
}

const _: () = assert!(core::mem::size_of::<RobustMutexState>() == 16);

impl RobustMutexState {
    pub const fn new() -> Self {
        Self {
            owner_pid: AtomicU64::new(0),
            recursion: AtomicU32::new(0),
            generation: AtomicU32::new(0),
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }
}

impl Default for RobustMutexState {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened on a successful `lock()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    /// Acquired cleanly; no prior holder died while holding it.
    Acquired,
    /// Acquired by reclaiming a lock abandoned by a dead process. The data
    /// this mutex protects may be left mid-update; the caller must
    /// reconcile it before relying on it.
    OwnerDied,
}

/// Attempts to acquire `state` within `timeout_ms`, probing liveness and
/// force-reclaiming on contention exactly like the spin-lock pool (spec
/// §4.3 steps 1). Re-entrant for the calling process.
pub fn lock(state: &RobustMutexState, timeout_ms: u64) -> Result<LockOutcome, ()> {
    let me = current_pid();
    let deadline = Deadline::after(timeout_ms);
    let mut iteration = 0u32;

    loop {
        match state
            .owner_pid
            .compare_exchange(0, me, Ordering::Acquire, Ordering::Acquire)
        {
            Ok(_) => {
                state.recursion.store(1, Ordering::Relaxed);
                return Ok(LockOutcome::Acquired);
            }
            Err(current) if current == me => {
                state.recursion.fetch_add(1, Ordering::Relaxed);
                return Ok(LockOutcome::Acquired);
            }
            Err(current) => {
                if !is_process_alive(current) {
                    // Force-reclaim: take ownership, bump generation so any
                    // stale reader of `generation` knows a takeover happened.
                    if state
                        .owner_pid
                        .compare_exchange(current, me, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        state.generation.fetch_add(1, Ordering::Release);
                        state.recursion.store(1, Ordering::Relaxed);
                        return Ok(LockOutcome::OwnerDied);
                    }
                    // Someone else reclaimed it first; fall through to retry.
                }
                if deadline.expired() {
                    return Err(());
                }
                spin_backoff(iteration);
                iteration = iteration.saturating_add(1);
            }
        }
    }
}

/// Releases one level of recursion; unlocks entirely when it reaches zero.
/// Calling this on a lock the caller does not hold is a contract violation
/// and is only checked in debug builds.
pub fn unlock(state: &RobustMutexState) {
    debug_assert_eq!(
        state.owner_pid.load(Ordering::Relaxed),
        current_pid(),
        "unlock() called by a process that does not hold the lock"
    );
    let remaining = state.recursion.fetch_sub(1, Ordering::Relaxed) - 1;
    if remaining == 0 {
        state.owner_pid.store(0, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentrant_lock_unlock() {
        let state = RobustMutexState::new();
        assert_eq!(lock(&state, 100).unwrap(), LockOutcome::Acquired);
        assert_eq!(lock(&state, 100).unwrap(), LockOutcome::Acquired);
        unlock(&state);
        unlock(&state);
        assert_eq!(state.owner_pid.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn reclaims_from_dead_owner() {
        let state = RobustMutexState::new();
        state.owner_pid.store(0x7fff_fffe, Ordering::Relaxed); // implausible pid
        state.recursion.store(1, Ordering::Relaxed);
        let outcome = lock(&state, 1000).unwrap();
        assert_eq!(outcome, LockOutcome::OwnerDied);
        assert_eq!(state.generation(), 1);
    }

    #[test]
    fn times_out_against_live_holder() {
        let state = RobustMutexState::new();
        // Simulate a different, definitely-alive holder: pid 1 (init) is
        // always alive on any Linux system this runs on.
        state.owner_pid.store(1, Ordering::Relaxed);
        state.recursion.store(1, Ordering::Relaxed);
        assert!(lock(&state, 5).is_err());
    }
}
