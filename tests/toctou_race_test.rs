//! Concurrent writer-reclaim racing a reader's acquire (spec §8.4 scenario
//! 2), using real OS threads rather than the deterministic in-process
//! sequencing `src/slot.rs`'s `validate_read_detects_generation_mismatch_after_wrap`
//! unit test already covers. The exact TOCTTOU window (a writer's state
//! flip landing between a reader's reader_count increment and its
//! re-check) is a handful of instructions wide and not reliably forceable
//! through the public API alone, so this drives many overlapping
//! write/read cycles on a single slot and asserts the invariant that
//! matters: whenever a reader's `validate_read` reports `true`, the bytes
//! it sees are exactly the payload that generation published — never a
//! torn or overwritten one.

#[path = "common.rs"]
mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use datablock::platform::shm::SharedMapping;
use datablock::{ConsumerSyncPolicy, Producer};

#[test]
fn concurrent_writer_and_reader_never_observe_a_torn_payload() {
    common::init_logging();
    let name = common::unique_name("datablock_it_toctou");
    let _ = SharedMapping::unlink(&name);

    let mut config = common::sample_config();
    config.consumer_sync_policy = ConsumerSyncPolicy::LatestOnly;
    config.ring_capacity = 1; // force every writer commit to land on the same slot.

    let producer = Arc::new(Producer::create(&name, [1u8; 64], [1u8; 32], 0, config).unwrap());
    let consumer = Arc::new(
        datablock::Consumer::attach(&name, [1u8; 64], Some(config), None)
            .expect("consumer attach"),
    );

    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let producer = Arc::clone(&producer);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut counter: u8 = 0;
            while !stop.load(Ordering::Relaxed) {
                if let Ok(mut handle) = producer.acquire_write_slot(200) {
                    let byte = counter;
                    handle.buffer_mut()[0] = byte;
                    handle.buffer_mut()[1] = byte;
                    handle.commit(2);
                    counter = counter.wrapping_add(1);
                }
            }
        })
    };

    let reader = {
        let consumer = Arc::clone(&consumer);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut observations = 0u32;
            while observations < 2000 {
                if let Ok(slot_index) = consumer.next_slot_index(50) {
                    if let Ok(handle) = consumer.acquire_consume_slot(slot_index, 50) {
                        let first = handle.buffer()[0];
                        let second = handle.buffer()[1];
                        let valid = handle.validate_read();
                        if valid {
                            // The writer always publishes both bytes equal
                            // within a single commit; if the generation is
                            // still the one we captured, the two bytes must
                            // still agree.
                            assert_eq!(first, second, "validated read observed a torn payload");
                        }
                        drop(handle);
                        consumer.advance_read_position();
                        observations += 1;
                    }
                }
            }
            stop.store(true, Ordering::Relaxed);
        })
    };

    reader.join().unwrap();
    writer.join().unwrap();

    assert!(producer.get_metrics().total_slots_written > 0);
    assert!(consumer.get_metrics().total_slots_read > 0);
}
