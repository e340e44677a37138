//! Spin-lock primitive: a fixed pool of 8 PID-stamped lock records living
//! inside the header (spec §4.3). Built directly on
//! [`crate::platform::robust_mutex`]'s CAS-and-reclaim algorithm — the two
//! primitives solve the same problem (a lock that must survive its holder's
//! process dying) at different layers: the robust mutex guards
//! control-plane bookkeeping, this pool is exposed to applications via the
//! flexible zone for their own cross-process atomics.

use crate::platform::robust_mutex::{self, RobustMutexState};

/// Number of spin-lock records in the fixed pool.
pub const SPINLOCK_POOL_SIZE: usize = 8;

/// A single pool slot. `repr(C)`, 16 bytes, identical layout to
/// [`RobustMutexState`] since it *is* one — the spin lock adds only the
/// timeout/backoff policy on top (spec §4.3's "would_block"/"invalid_index"
/// framing instead of the robust mutex's "owner died" framing).
#[repr(C)]
pub struct SpinLock {
    state: RobustMutexState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinLockError {
    /// Timed out waiting for the lock.
    WouldBlock,
    /// The requested pool index was out of range.
    InvalidIndex,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            state: RobustMutexState::new(),
        }
    }

    /// Acquires the lock, force-reclaiming from a dead holder on contention.
    /// Whether the reclaim happened is not surfaced here — application code
    /// using the spin-lock pool to protect its own flexible-zone data
    /// structures is expected to design those structures to tolerate a
    /// torn update from a crashed holder (spec §4.3 does not specify a
    /// reconciliation step the way the robust mutex does).
    pub fn acquire(&self, timeout_ms: u64) -> Result<(), SpinLockError> {
        robust_mutex::lock(&self.state, timeout_ms)
            .map(|_| ())
            .map_err(|_| SpinLockError::WouldBlock)
    }

    pub fn release(&self) {
        robust_mutex::unlock(&self.state);
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// A fixed pool of [`SPINLOCK_POOL_SIZE`] spin locks, placed inside the
/// header so every participant addresses the same records by index.
#[repr(C)]
pub struct SpinLockPool {
    locks: [SpinLock; SPINLOCK_POOL_SIZE],
}

const _: () = assert!(
    core::mem::size_of::<SpinLockPool>() == SPINLOCK_POOL_SIZE * core::mem::size_of::<SpinLock>()
);

impl SpinLockPool {
    pub const fn new() -> Self {
        Self {
            locks: [
                SpinLock::new(),
                SpinLock::new(),
                SpinLock::new(),
                SpinLock::new(),
                SpinLock::new(),
                SpinLock::new(),
                SpinLock::new(),
                SpinLock::new(),
            ],
        }
    }

    pub fn get(&self, index: usize) -> Result<&SpinLock, SpinLockError> {
        self.locks.get(index).ok_or(SpinLockError::InvalidIndex)
    }
}

impl Default for SpinLockPool {
    fn default() -> Self {
        Self::new()
    }
}
