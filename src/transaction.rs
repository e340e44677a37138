//! Scope-based transaction API (spec §4.8): a thin RAII layer over
//! [`crate::producer::Producer`]/[`crate::consumer::Consumer`] handles so
//! callers get strong exception-safety (a commit happens or it doesn't;
//! reader count is always decremented) without having to remember to call
//! `commit`/`drop` themselves.
//!
//! Grounded in the teacher's builder/guard idiom (`MPMC::builder::ChannelBuilder`
//! composes handles; `Producer`/`Consumer` already return RAII handles whose
//! `Drop` impl is the safety net this module builds on) — generalized here
//! into the two guard types and four helper functions spec §4.8 names.

use crate::consumer::{Consumer, SlotConsumeHandle};
use crate::error::{DataBlockError, Result};
use crate::metrics::MetricsSnapshot;
use crate::producer::{Producer, SlotWriteHandle};

/// Move-only guard around an outstanding write handle (spec §4.8
/// `WriteTransactionGuard`). Dropping without calling [`Self::commit`]
/// releases the slot without publishing — the same behavior
/// [`SlotWriteHandle`]'s own `Drop` already provides; this type exists so
/// callers can name the scope-based pattern explicitly and so
/// [`with_write_transaction`] has something to hand to its closure.
pub struct WriteTransactionGuard<'p> {
    handle: Option<SlotWriteHandle<'p>>,
}

impl<'p> WriteTransactionGuard<'p> {
    fn new(handle: SlotWriteHandle<'p>) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// The slot index this guard holds.
    pub fn slot_index(&self) -> u64 {
        self.handle
            .as_ref()
            .expect("slot_index called after commit")
            .slot_index()
    }

    /// Mutable access to the slot's payload buffer.
    pub fn slot(&mut self) -> &mut [u8] {
        self.handle
            .as_mut()
            .expect("slot() called after commit")
            .buffer_mut()
    }

    /// Publishes `bytes_written` bytes and marks the guard as committed.
    /// Consumes the guard; a dropped, uncommitted guard still releases the
    /// slot (no double-release is possible since the inner handle is
    /// `Option`-wrapped and taken exactly once).
    pub fn commit(mut self, bytes_written: usize) {
        if let Some(handle) = self.handle.take() {
            handle.commit(bytes_written);
        }
    }
}

/// Move-only guard around an outstanding consume handle (spec §4.8
/// `ReadTransactionGuard`). Destructor releases the reader-count
/// contribution regardless of whether the caller inspected the data.
pub struct ReadTransactionGuard<'c> {
    handle: SlotConsumeHandle<'c>,
}

impl<'c> ReadTransactionGuard<'c> {
    fn new(handle: SlotConsumeHandle<'c>) -> Self {
        Self { handle }
    }

    pub fn slot_index(&self) -> u64 {
        self.handle.slot_index()
    }

    /// Read-only view of the slot's payload.
    pub fn slot(&self) -> &[u8] {
        self.handle.buffer()
    }

    /// Re-checks the slot's generation against the one captured at
    /// acquisition; `false` means the ring wrapped during this read.
    pub fn validate_read(&self) -> bool {
        self.handle.validate_read()
    }

    /// Verifies the slot's stored checksum, when the segment's checksum
    /// policy is enforced.
    pub fn verify_checksum(&self) -> Result<()> {
        self.handle.verify_checksum()
    }
}

/// Invokes `f` with a [`WriteTransactionGuard`] bound to a freshly acquired
/// write slot (spec §4.8 `with_write_transaction`). `f` returns the number
/// of bytes it wrote; on normal return, that many bytes are committed. If
/// `f` panics, the guard's `Drop` still runs and releases the slot without
/// publishing — strong exception-safety: either a successful commit
/// happens, or no commit happens.
pub fn with_write_transaction<F>(producer: &Producer, timeout_ms: u64, f: F) -> Result<()>
where
    F: FnOnce(&mut WriteTransactionGuard<'_>) -> usize,
{
    let handle = producer.acquire_write_slot(timeout_ms)?;
    let mut guard = WriteTransactionGuard::new(handle);
    let bytes_written = f(&mut guard);
    guard.commit(bytes_written);
    Ok(())
}

/// Invokes `f` with a [`ReadTransactionGuard`] bound to `slot_index` (spec
/// §4.8 `with_read_transaction`). The slot is released (reader count
/// decremented) when the guard drops at the end of this call, whether `f`
/// returned normally or panicked.
pub fn with_read_transaction<F, R>(
    consumer: &Consumer,
    slot_index: u64,
    timeout_ms: u64,
    f: F,
) -> Result<R>
where
    F: FnOnce(&ReadTransactionGuard<'_>) -> R,
{
    let handle = consumer.acquire_consume_slot(slot_index, timeout_ms)?;
    let guard = ReadTransactionGuard::new(handle);
    Ok(f(&guard))
}

/// Checked, typed wrapper over [`with_write_transaction`] (spec §4.8
/// `with_typed_write<T>`): verifies `size_of::<T>() <= slot_stride_bytes`
/// and that the slot's base address satisfies `align_of::<T>()` before
/// handing `f` a `&mut T` view of the slot. The whole of `size_of::<T>()`
/// bytes is committed on return.
pub fn with_typed_write<T, F>(producer: &Producer, timeout_ms: u64, f: F) -> Result<()>
where
    T: Copy,
    F: FnOnce(&mut T),
{
    let stride = producer.config().slot_stride_bytes() as usize;
    if core::mem::size_of::<T>() > stride {
        return Err(DataBlockError::InvalidConfig(
            "size_of::<T>() exceeds the segment's slot_stride_bytes",
        ));
    }

    let handle = producer.acquire_write_slot(timeout_ms)?;
    let mut guard = WriteTransactionGuard::new(handle);
    {
        let buffer = guard.slot();
        check_alignment::<T>(buffer.as_ptr())?;
        // SAFETY: the alignment and size checks above hold, and this guard
        // is the sole writer of the slot's buffer for the duration of the
        // borrow (it owns the slot's writer lock).
        let typed = unsafe { &mut *(buffer.as_mut_ptr() as *mut T) };
        f(typed);
    }
    guard.commit(core::mem::size_of::<T>());
    Ok(())
}

/// Checked, typed wrapper over [`with_read_transaction`] (spec §4.8
/// `with_typed_read<T>`): same size/alignment checks as
/// [`with_typed_write`], handing `f` a `&T` view instead.
pub fn with_typed_read<T, F, R>(
    consumer: &Consumer,
    slot_index: u64,
    timeout_ms: u64,
    f: F,
) -> Result<R>
where
    T: Copy,
    F: FnOnce(&T, &ReadTransactionGuard<'_>) -> R,
{
    let stride = consumer.config().slot_stride_bytes() as usize;
    if core::mem::size_of::<T>() > stride {
        return Err(DataBlockError::InvalidConfig(
            "size_of::<T>() exceeds the segment's slot_stride_bytes",
        ));
    }

    let handle = consumer.acquire_consume_slot(slot_index, timeout_ms)?;
    let guard = ReadTransactionGuard::new(handle);
    let buffer = guard.slot();
    check_alignment::<T>(buffer.as_ptr())?;
    // SAFETY: alignment and size checks above hold; the guard holds the
    // reader-count contribution for the duration of this borrow.
    let typed = unsafe { &*(buffer.as_ptr() as *const T) };
    Ok(f(typed, &guard))
}

fn check_alignment<T>(ptr: *const u8) -> Result<()> {
    if (ptr as usize) % core::mem::align_of::<T>() != 0 {
        return Err(DataBlockError::InvalidConfig(
            "slot base address does not satisfy T's alignment",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        BufferPolicy, ChecksumAlgorithm, ChecksumPolicy, ConsumerSyncPolicy, SegmentConfig,
    };
    use crate::platform::shm::SharedMapping;

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
    fn write_transaction_commits_on_normal_return() {
        let name = format!("datablock_txn_test_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);
        let producer = Producer::create(&name, [0u8; 64], [1u8; 32], 0, sample_config()).unwrap();

        with_write_transaction(&producer, 1000, |guard| {
            guard.slot()[..3].copy_from_slice(&[1, 2, 3]);
            3
        })
        .unwrap();

        assert_eq!(producer.get_metrics().total_slots_written, 1);
        assert_eq!(producer.get_metrics().total_bytes_written, 3);
    }

    #[test]
    fn write_transaction_does_not_commit_on_panic() {
        let name = format!("datablock_txn_test_panic_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);
        let producer = Producer::create(&name, [0u8; 64], [1u8; 32], 0, sample_config()).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = with_write_transaction(&producer, 1000, |guard| {
                guard.slot()[0] = 1;
                panic!("simulated failure mid-write");
            });
        }));
        assert!(result.is_err());
        assert_eq!(producer.get_metrics().total_slots_written, 0);

        // The slot must be free again, not stuck in `writing`.
        with_write_transaction(&producer, 1000, |guard| {
            guard.slot()[0] = 2;
            1
        })
        .unwrap();
        assert_eq!(producer.get_metrics().total_slots_written, 1);
    }

    #[test]
    fn read_transaction_round_trip_and_typed_access() {
        let name = format!("datablock_txn_test_read_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);
        let producer = Producer::create(&name, [0u8; 64], [1u8; 32], 0, sample_config()).unwrap();

        with_write_transaction(&producer, 1000, |guard| {
            guard.slot()[..8].copy_from_slice(&42u64.to_le_bytes());
            8
        })
        .unwrap();

        let consumer =
            Consumer::attach(&name, [0u8; 64], Some(sample_config()), Some([1u8; 32])).unwrap();

        let value = with_typed_read::<u64, _, _>(&consumer, 0, 1000, |v, guard| {
            assert!(guard.validate_read());
            *v
        })
        .unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn typed_write_rejects_oversized_type() {
        let name = format!("datablock_txn_test_oversize_{}", std::process::id());
        let _ = SharedMapping::unlink(&name);
        let producer = Producer::create(&name, [0u8; 64], [1u8; 32], 0, sample_config()).unwrap();

        let result = with_typed_write::<[u8; 4096], _>(&producer, 1000, |_| {});
        assert!(matches!(result, Err(DataBlockError::InvalidConfig(_))));
    }
}
