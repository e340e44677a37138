//! Shared helpers for the integration test binaries in this directory.
//! Each `tests/*.rs` file is its own crate, so this is included with
//! `#[path = "common.rs"] mod common;` rather than `pub mod`.

use std::sync::Once;

use datablock::{
    BufferPolicy, ChecksumAlgorithm, ChecksumPolicy, ConsumerSyncPolicy, SegmentConfig,
};

static INIT_LOGGING: Once = Once::new();

/// Installs a `tracing-subscriber` once per test binary so `tracing::warn!`
/// output from crash-recovery paths is visible with `--nocapture`.
pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn unique_name(prefix: &str) -> String {
    format!("{prefix}_{}_{}", std::process::id(), fastrand::u64(..))
}

pub fn sample_config() -> SegmentConfig {
    SegmentConfig {
        buffer_policy: BufferPolicy::Ring,
        consumer_sync_policy: ConsumerSyncPolicy::LatestOnly,
        physical_page_size: 256,
        logical_unit_size: 0,
        ring_capacity: 4,
        flexible_zone_size: 64,
        checksum_policy: ChecksumPolicy::Enforced,
        checksum_algorithm: ChecksumAlgorithm::Blake2b256,
    }
}
