//! Standalone helper process spawned by `tests/recovery_integration_test.rs`
//! to simulate a writer crashing mid-write: acquires a write slot and then
//! calls `std::process::exit` directly, which skips every destructor and so
//! leaves the slot's writer lock stamped with this (now-dead) pid — the only
//! way to get a genuinely dead writer pid into the shared segment, since a
//! live test process's own pid is, definitionally, always alive.
//!
//! Not part of the public crate surface; invoked via `cargo run --example
//! zombie_writer <segment_name>`.

use datablock::{
    BufferPolicy, ChecksumAlgorithm, ChecksumPolicy, ConsumerSyncPolicy, Producer, SegmentConfig,
};

fn config() -> SegmentConfig {
    SegmentConfig {
        buffer_policy: BufferPolicy::Ring,
        consumer_sync_policy: ConsumerSyncPolicy::LatestOnly,
        physical_page_size: 256,
        logical_unit_size: 0,
        ring_capacity: 4,
        flexible_zone_size: 0,
        checksum_policy: ChecksumPolicy::Enforced,
        checksum_algorithm: ChecksumAlgorithm::Blake2b256,
    }
}

fn main() {
    let name = std::env::args()
        .nth(1)
        .expect("usage: zombie_writer <segment_name>");

    let producer = Producer::create(&name, [0u8; 64], [0u8; 32], 0, config())
        .expect("failed to create segment");
    let mut handle = producer
        .acquire_write_slot(1000)
        .expect("failed to acquire write slot");
    handle.buffer_mut()[..4].copy_from_slice(&[0xCC; 4]);
    println!("zombie_writer: holding slot {}, exiting without releasing", handle.slot_index());

    // process::exit skips Drop entirely — the write handle's destructor
    // (which would release the slot) and the producer's destructor (which
    // would unlink the segment) never run.
    std::process::exit(0);
}
