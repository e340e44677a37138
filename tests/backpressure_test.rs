//! `single_reader` backpressure end-to-end: a real consumer process (well,
//! thread) advancing `read_index` is what eventually unblocks the producer,
//! not an in-process shortcut (spec §8.4 scenario 5).

#[path = "common.rs"]
mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use datablock::platform::shm::SharedMapping;
use datablock::{Consumer, ConsumerSyncPolicy, DataBlockError, Producer};

#[test]
fn producer_blocks_until_consumer_advances_read_index() {
    common::init_logging();
    let name = common::unique_name("datablock_it_backpressure");
    let _ = SharedMapping::unlink(&name);

    let mut config = common::sample_config();
    config.consumer_sync_policy = ConsumerSyncPolicy::SingleReader;
    config.ring_capacity = 2;

    let producer = Producer::create(&name, [3u8; 64], [1u8; 32], 0, config).unwrap();
    let consumer = Arc::new(Consumer::attach(&name, [3u8; 64], Some(config), None).unwrap());

    for _ in 0..2 {
        let mut handle = producer.acquire_write_slot(1000).unwrap();
        handle.buffer_mut()[0] = 1;
        handle.commit(1);
    }

    // Ring is full relative to read_index == 0; a third write must block.
    let unblocked = Arc::new(AtomicBool::new(false));
    let consumer_thread = {
        let consumer = Arc::clone(&consumer);
        let unblocked = Arc::clone(&unblocked);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            let slot_index = consumer.next_slot_index(1000).unwrap();
            let handle = consumer.acquire_consume_slot(slot_index, 1000).unwrap();
            drop(handle);
            consumer.advance_read_position();
            unblocked.store(true, Ordering::Release);
        })
    };

    let result = producer.acquire_write_slot(2000);
    assert!(result.is_ok(), "producer should unblock once the consumer advances");
    assert!(unblocked.load(Ordering::Acquire));

    consumer_thread.join().unwrap();
}

#[test]
fn short_timeout_reports_timeout_error_without_a_consumer() {
    common::init_logging();
    let name = common::unique_name("datablock_it_backpressure_timeout");
    let _ = SharedMapping::unlink(&name);

    let mut config = common::sample_config();
    config.consumer_sync_policy = ConsumerSyncPolicy::SingleReader;
    config.ring_capacity = 1;

    let producer = Producer::create(&name, [4u8; 64], [1u8; 32], 0, config).unwrap();
    {
        let mut handle = producer.acquire_write_slot(1000).unwrap();
        handle.buffer_mut()[0] = 9;
        handle.commit(1);
    }

    let result = producer.acquire_write_slot(30);
    assert!(matches!(result, Err(DataBlockError::Timeout)));
}
