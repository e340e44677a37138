//! End-to-end single-segment round trip: one producer, one consumer, real
//! shared memory, no in-process shortcuts (spec §8.4 scenario 1).

#[path = "common.rs"]
mod common;

use datablock::platform::shm::SharedMapping;
use datablock::{Consumer, Producer};

#[test]
fn producer_writes_consumer_reads_back_identical_bytes() {
    common::init_logging();
    let name = common::unique_name("datablock_it_roundtrip");
    let _ = SharedMapping::unlink(&name);

    let schema_fingerprint = [7u8; 32];
    let producer = Producer::create(&name, [1u8; 64], schema_fingerprint, 3, common::sample_config())
        .expect("producer create");

    let payload: Vec<u8> = (0..200).map(|_| fastrand::u8(..)).collect();
    {
        let mut handle = producer.acquire_write_slot(1000).unwrap();
        handle.buffer_mut()[..payload.len()].copy_from_slice(&payload);
        handle.commit(payload.len());
    }

    let consumer = Consumer::attach(
        &name,
        [1u8; 64],
        Some(common::sample_config()),
        Some(schema_fingerprint),
    )
    .expect("consumer attach");

    let slot_index = consumer.next_slot_index(1000).unwrap();
    let handle = consumer.acquire_consume_slot(slot_index, 1000).unwrap();
    assert_eq!(&handle.buffer()[..payload.len()], payload.as_slice());
    assert!(handle.validate_read());
    handle.verify_checksum().expect("checksum must verify");
    drop(handle);
    consumer.advance_read_position();

    assert_eq!(producer.get_metrics().total_slots_written, 1);
    assert_eq!(consumer.get_metrics().total_slots_read, 1);

    drop(consumer);
    drop(producer);
}

#[test]
fn multiple_commits_wrap_the_ring_and_stay_consistent() {
    common::init_logging();
    let name = common::unique_name("datablock_it_wrap");
    let _ = SharedMapping::unlink(&name);

    let producer = Producer::create(&name, [2u8; 64], [8u8; 32], 1, common::sample_config())
        .expect("producer create");
    let consumer = Consumer::attach(&name, [2u8; 64], None, None).expect("consumer attach");

    // ring_capacity is 4; write well past it so several slots wrap.
    for i in 0..10u8 {
        {
            let mut handle = producer.acquire_write_slot(1000).unwrap();
            handle.buffer_mut()[0] = i;
            handle.commit(1);
        }
        let slot_index = consumer.next_slot_index(1000).unwrap();
        let handle = consumer.acquire_consume_slot(slot_index, 1000).unwrap();
        assert_eq!(handle.buffer()[0], i);
        assert!(handle.validate_read());
        drop(handle);
        consumer.advance_read_position();
    }

    assert_eq!(producer.get_metrics().total_slots_written, 10);
    assert_eq!(consumer.get_metrics().total_slots_read, 10);
}
