//! Crate-wide error type.
//!
//! Hot-path slot operations (acquire/commit/release) never return this type
//! directly — they return small `Copy` result enums so no allocation or
//! unwinding happens on the data-path (spec §7). `DataBlockError` is for the
//! high-level surface: `create`, `attach`, the transaction API, and
//! recovery/diagnostics.

use thiserror::Error;

/// Errors surfaced by the high-level producer/consumer/recovery API.
#[derive(Debug, Error)]
pub enum DataBlockError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("segment {0:?} already exists")]
    AlreadyExists(String),

    #[error("segment {0:?} not found")]
    NotFound(String),

    #[error("magic mismatch: expected {expected:#x}, found {found:#x}")]
    MagicMismatch { expected: u64, found: u64 },

    #[error("ABI major version mismatch: expected {expected}, found {found}")]
    AbiMismatch { expected: u16, found: u16 },

    #[error("header layout hash mismatch")]
    LayoutHashMismatch,

    #[error("layout fingerprint mismatch")]
    LayoutFingerprintMismatch,

    #[error("expected_config does not match the segment's stored configuration")]
    ConfigMismatch,

    #[error("schema fingerprint mismatch")]
    SchemaMismatch,

    #[error("schema version incompatible: expected {expected:#x}, found {found:#x}")]
    SchemaVersionMismatch { expected: u32, found: u32 },

    #[error("shared secret does not match")]
    SharedSecretMismatch,

    #[error("no free consumer heartbeat slot available")]
    TooManyConsumers,

    #[error("slot index {0} out of range")]
    InvalidSlotIndex(u64),

    #[error("operation timed out")]
    Timeout,

    #[error("checksum verification failed for slot {0}")]
    ChecksumMismatch(u64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("contract violation: {0}")]
    ContractViolation(&'static str),
}

impl DataBlockError {
    /// A small stable code for `metrics.last_error_code` (spec §3.2). Not
    /// meant to be exhaustive or future-proof across crate versions — it's
    /// an observability aid, not a wire format.
    pub fn metric_code(&self) -> u32 {
        match self {
            DataBlockError::InvalidConfig(_) => 1,
            DataBlockError::AlreadyExists(_) => 2,
            DataBlockError::NotFound(_) => 3,
            DataBlockError::MagicMismatch { .. } => 4,
            DataBlockError::AbiMismatch { .. } => 5,
            DataBlockError::LayoutHashMismatch => 6,
            DataBlockError::LayoutFingerprintMismatch => 7,
            DataBlockError::ConfigMismatch => 8,
            DataBlockError::SchemaMismatch => 9,
            DataBlockError::SchemaVersionMismatch { .. } => 10,
            DataBlockError::SharedSecretMismatch => 11,
            DataBlockError::TooManyConsumers => 12,
            DataBlockError::InvalidSlotIndex(_) => 13,
            DataBlockError::Timeout => 14,
            DataBlockError::ChecksumMismatch(_) => 15,
            DataBlockError::Io(_) => 16,
            DataBlockError::ContractViolation(_) => 17,
        }
    }
}

pub type Result<T> = std::result::Result<T, DataBlockError>;
