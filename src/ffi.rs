//! C ABI surface: a stable C entry point for instrumentation processes and
//! diagnostics tools written outside Rust to link against, covering the
//! create/attach/acquire/commit/release lifecycle with opaque boxed
//! handles, `#[no_mangle] extern "C"` functions, negative-integer error
//! codes, and null-pointer guards.
//!
//! # Safety contract
//!
//! Every handle returned by a `_new`/`_create`/`_attach` function here must
//! be freed by exactly one matching `_free` call. A [`SlotWriteFfiHandle`]
//! or [`SlotReadFfiHandle`] must be committed/released or dropped (via its
//! own `_commit`/`_release` call) *before* the producer/consumer handle
//! that issued it is freed — freeing the owner first and then touching the
//! slot handle is a use-after-free, exactly as it would be through the
//! safe Rust API.

use std::ffi::{c_char, CStr};
use std::ptr;

use crate::config::{
    BufferPolicy, ChecksumAlgorithm, ChecksumPolicy, ConsumerSyncPolicy, SegmentConfig,
};
use crate::consumer::{Consumer, SlotConsumeHandle};
use crate::error::DataBlockError;
use crate::producer::{Producer, SlotWriteHandle};

pub const DATABLOCK_OK: i32 = 0;
pub const DATABLOCK_ERR_NULL_POINTER: i32 = -1;
pub const DATABLOCK_ERR_INVALID_ARG: i32 = -2;
pub const DATABLOCK_ERR_TIMEOUT: i32 = -3;
pub const DATABLOCK_ERR_NOT_FOUND: i32 = -4;
pub const DATABLOCK_ERR_INTEGRITY: i32 = -5;
pub const DATABLOCK_ERR_INTERNAL: i32 = -6;

fn error_code(err: &DataBlockError) -> i32 {
    match err {
        DataBlockError::Timeout => DATABLOCK_ERR_TIMEOUT,
        DataBlockError::NotFound(_) => DATABLOCK_ERR_NOT_FOUND,
        DataBlockError::InvalidConfig(_)
        | DataBlockError::ConfigMismatch
        | DataBlockError::InvalidSlotIndex(_) => DATABLOCK_ERR_INVALID_ARG,
        DataBlockError::MagicMismatch { .. }
        | DataBlockError::AbiMismatch { .. }
        | DataBlockError::LayoutHashMismatch
        | DataBlockError::LayoutFingerprintMismatch
        | DataBlockError::SchemaMismatch
        | DataBlockError::SchemaVersionMismatch { .. }
        | DataBlockError::SharedSecretMismatch
        | DataBlockError::ChecksumMismatch(_) => DATABLOCK_ERR_INTEGRITY,
        _ => DATABLOCK_ERR_INTERNAL,
    }
}

/// Plain-old-data mirror of [`SegmentConfig`] for callers across the FFI
/// boundary, where the Rust enums aren't representable directly.
#[repr(C)]
pub struct DataBlockConfigFfi {
    pub buffer_policy: u32,
    pub consumer_sync_policy: u32,
    pub physical_page_size: u32,
    pub logical_unit_size: u32,
    pub ring_capacity: u64,
    pub flexible_zone_size: u64,
    pub checksum_policy: u32,
    pub checksum_algorithm: u32,
}

impl From<&DataBlockConfigFfi> for SegmentConfig {
    fn from(c: &DataBlockConfigFfi) -> Self {
        SegmentConfig {
            buffer_policy: BufferPolicy::from_u32(c.buffer_policy),
            consumer_sync_policy: ConsumerSyncPolicy::from_u32(c.consumer_sync_policy),
            physical_page_size: c.physical_page_size,
            logical_unit_size: c.logical_unit_size,
            ring_capacity: c.ring_capacity,
            flexible_zone_size: c.flexible_zone_size,
            checksum_policy: ChecksumPolicy::from_u32(c.checksum_policy),
            checksum_algorithm: ChecksumAlgorithm::from_u8(c.checksum_algorithm as u8),
        }
    }
}

/// # Safety
/// `name` must be a valid, NUL-terminated C string for the duration of
/// this call.
unsafe fn read_cstr<'a>(name: *const c_char) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    CStr::from_ptr(name).to_str().ok()
}

pub struct ProducerHandle {
    inner: Producer,
}

/// Creates a segment and returns an opaque producer handle, or null on
/// failure.
///
/// # Safety
/// `name` must be a valid NUL-terminated string. `shared_secret` must point
/// to 64 readable bytes, `schema_fingerprint` to 32, `config` to one valid
/// [`DataBlockConfigFfi`].
#[no_mangle]
pub unsafe extern "C" fn datablock_producer_create(
    name: *const c_char,
    shared_secret: *const u8,
    schema_fingerprint: *const u8,
    schema_version_packed: u32,
    config: *const DataBlockConfigFfi,
) -> *mut ProducerHandle {
    let Some(name) = read_cstr(name) else {
        return ptr::null_mut();
    };
    if shared_secret.is_null() || schema_fingerprint.is_null() || config.is_null() {
        return ptr::null_mut();
    }

    let mut secret = [0u8; 64];
    secret.copy_from_slice(std::slice::from_raw_parts(shared_secret, 64));
    let mut fingerprint = [0u8; 32];
    fingerprint.copy_from_slice(std::slice::from_raw_parts(schema_fingerprint, 32));
    let config = SegmentConfig::from(&*config);

    match Producer::create(name, secret, fingerprint, schema_version_packed, config) {
        Ok(producer) => Box::into_raw(Box::new(ProducerHandle { inner: producer })),
        Err(_) => ptr::null_mut(),
    }
}

/// Frees a producer handle created by [`datablock_producer_create`].
///
/// # Safety
/// `handle` must either be null or a pointer previously returned by
/// [`datablock_producer_create`] that has not already been freed, and must
/// have no outstanding [`SlotWriteFfiHandle`].
#[no_mangle]
pub unsafe extern "C" fn datablock_producer_free(handle: *mut ProducerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

pub struct SlotWriteFfiHandle {
    // SAFETY: erases the borrow from `Producer`; the safety contract above
    // (owner outlives handle) is the caller's responsibility to uphold,
    // exactly as it is for the safe `SlotWriteHandle<'p>` this wraps.
    inner: SlotWriteHandle<'static>,
}

/// Acquires a write slot. On success, `*out_ptr`/`*out_len` point at the
/// slot's writable buffer. Returns
/// [`DATABLOCK_OK`] or a negative error code; a timeout is
/// [`DATABLOCK_ERR_TIMEOUT`], not a fatal condition.
///
/// # Safety
/// `producer`, `out_handle`, `out_ptr`, and `out_len` must be valid,
/// non-null, and suitably aligned.
#[no_mangle]
pub unsafe extern "C" fn datablock_producer_acquire_write_slot(
    producer: *mut ProducerHandle,
    timeout_ms: u64,
    out_handle: *mut *mut SlotWriteFfiHandle,
    out_ptr: *mut *mut u8,
    out_len: *mut usize,
) -> i32 {
    if producer.is_null() || out_handle.is_null() || out_ptr.is_null() || out_len.is_null() {
        return DATABLOCK_ERR_NULL_POINTER;
    }
    let producer_ref: &'static Producer = &*(&(*producer).inner as *const Producer);
    match producer_ref.acquire_write_slot(timeout_ms) {
        Ok(mut handle) => {
            let buffer = handle.buffer_mut();
            *out_ptr = buffer.as_mut_ptr();
            *out_len = buffer.len();
            *out_handle = Box::into_raw(Box::new(SlotWriteFfiHandle { inner: handle }));
            DATABLOCK_OK
        }
        Err(e) => error_code(&e),
    }
}

/// Commits `len` bytes previously written through the pointer handed back
/// by [`datablock_producer_acquire_write_slot`], consuming the handle.
///
/// # Safety
/// `handle` must be a live pointer from
/// [`datablock_producer_acquire_write_slot`] that has not already been
/// committed or released.
#[no_mangle]
pub unsafe extern "C" fn datablock_slot_commit(handle: *mut SlotWriteFfiHandle, len: usize) -> i32 {
    if handle.is_null() {
        return DATABLOCK_ERR_NULL_POINTER;
    }
    let boxed = Box::from_raw(handle);
    boxed.inner.commit(len);
    DATABLOCK_OK
}

/// Releases a write handle without committing — the abort path.
///
/// # Safety
/// Same as [`datablock_slot_commit`].
#[no_mangle]
pub unsafe extern "C" fn datablock_slot_release_write(handle: *mut SlotWriteFfiHandle) -> i32 {
    if handle.is_null() {
        return DATABLOCK_ERR_NULL_POINTER;
    }
    drop(Box::from_raw(handle));
    DATABLOCK_OK
}

pub struct ConsumerHandle {
    inner: Consumer,
}

/// Attaches to an existing segment (spec §4.7 `attach`). `expected_config`
/// and `expected_schema_fingerprint` may be null to skip those checks.
///
/// # Safety
/// `name` must be a valid NUL-terminated string; `shared_secret` must point
/// to 64 readable bytes; `expected_config`/`expected_schema_fingerprint`
/// must each be either null or point to valid data of the documented size.
#[no_mangle]
pub unsafe extern "C" fn datablock_consumer_attach(
    name: *const c_char,
    shared_secret: *const u8,
    expected_config: *const DataBlockConfigFfi,
    expected_schema_fingerprint: *const u8,
) -> *mut ConsumerHandle {
    let Some(name) = read_cstr(name) else {
        return ptr::null_mut();
    };
    if shared_secret.is_null() {
        return ptr::null_mut();
    }
    let mut secret = [0u8; 64];
    secret.copy_from_slice(std::slice::from_raw_parts(shared_secret, 64));

    let config = if expected_config.is_null() {
        None
    } else {
        Some(SegmentConfig::from(&*expected_config))
    };
    let fingerprint = if expected_schema_fingerprint.is_null() {
        None
    } else {
        let mut f = [0u8; 32];
        f.copy_from_slice(std::slice::from_raw_parts(expected_schema_fingerprint, 32));
        Some(f)
    };

    match Consumer::attach(name, secret, config, fingerprint) {
        Ok(consumer) => Box::into_raw(Box::new(ConsumerHandle { inner: consumer })),
        Err(_) => ptr::null_mut(),
    }
}

/// Frees a consumer handle created by [`datablock_consumer_attach`].
///
/// # Safety
/// Same obligations as [`datablock_producer_free`].
#[no_mangle]
pub unsafe extern "C" fn datablock_consumer_free(handle: *mut ConsumerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

pub struct SlotReadFfiHandle {
    inner: SlotConsumeHandle<'static>,
}

/// Resolves the next slot index to read under the segment's
/// `consumer_sync_policy` (spec §4.7 `slot_iterator`).
///
/// # Safety
/// `consumer` and `out_slot_index` must be valid, non-null pointers.
#[no_mangle]
pub unsafe extern "C" fn datablock_consumer_next_slot_index(
    consumer: *mut ConsumerHandle,
    timeout_ms: u64,
    out_slot_index: *mut u64,
) -> i32 {
    if consumer.is_null() || out_slot_index.is_null() {
        return DATABLOCK_ERR_NULL_POINTER;
    }
    match (*consumer).inner.next_slot_index(timeout_ms) {
        Ok(index) => {
            *out_slot_index = index;
            DATABLOCK_OK
        }
        Err(e) => error_code(&e),
    }
}

/// Acquires a consume handle for `slot_index` (spec §4.7
/// `acquire_consume_slot`). On success, `*out_ptr`/`*out_len` point at the
/// slot's read-only buffer.
///
/// # Safety
/// `consumer`, `out_handle`, `out_ptr`, and `out_len` must be valid,
/// non-null, and suitably aligned.
#[no_mangle]
pub unsafe extern "C" fn datablock_consumer_acquire_slot(
    consumer: *mut ConsumerHandle,
    slot_index: u64,
    timeout_ms: u64,
    out_handle: *mut *mut SlotReadFfiHandle,
    out_ptr: *mut *const u8,
    out_len: *mut usize,
) -> i32 {
    if consumer.is_null() || out_handle.is_null() || out_ptr.is_null() || out_len.is_null() {
        return DATABLOCK_ERR_NULL_POINTER;
    }
    let consumer_ref: &'static Consumer = &*(&(*consumer).inner as *const Consumer);
    match consumer_ref.acquire_consume_slot(slot_index, timeout_ms) {
        Ok(handle) => {
            let buffer = handle.buffer();
            *out_ptr = buffer.as_ptr();
            *out_len = buffer.len();
            *out_handle = Box::into_raw(Box::new(SlotReadFfiHandle { inner: handle }));
            DATABLOCK_OK
        }
        Err(e) => error_code(&e),
    }
}

/// Re-checks the slot's generation against the one captured at acquisition
/// (spec §4.4 `validate_read`). Returns 1 if still valid, 0 if the ring
/// wrapped during this read, or a negative error code for a null handle.
///
/// # Safety
/// `handle` must be a live pointer from
/// [`datablock_consumer_acquire_slot`].
#[no_mangle]
pub unsafe extern "C" fn datablock_slot_validate_read(handle: *mut SlotReadFfiHandle) -> i32 {
    if handle.is_null() {
        return DATABLOCK_ERR_NULL_POINTER;
    }
    if (*handle).inner.validate_read() {
        1
    } else {
        0
    }
}

/// Releases a read handle, decrementing the slot's reader count.
///
/// # Safety
/// `handle` must be a live pointer from
/// [`datablock_consumer_acquire_slot`] that has not already been released.
#[no_mangle]
pub unsafe extern "C" fn datablock_slot_release_read(handle: *mut SlotReadFfiHandle) -> i32 {
    if handle.is_null() {
        return DATABLOCK_ERR_NULL_POINTER;
    }
    drop(Box::from_raw(handle));
    DATABLOCK_OK
}
