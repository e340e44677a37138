//! Attach-time validation across real process-visible shared memory (spec
//! §8.4 scenarios 4 and 6): a consumer must refuse to attach when its
//! expectations don't match what the producer actually laid down.

#[path = "common.rs"]
mod common;

use datablock::platform::shm::SharedMapping;
use datablock::{Consumer, DataBlockError, Producer};

#[test]
fn attach_refuses_on_config_mismatch() {
    common::init_logging();
    let name = common::unique_name("datablock_it_attach_config");
    let _ = SharedMapping::unlink(&name);

    let producer =
        Producer::create(&name, [5u8; 64], [1u8; 32], 0, common::sample_config()).unwrap();

    let mut wrong = common::sample_config();
    wrong.ring_capacity = common::sample_config().ring_capacity * 2;

    let result = Consumer::attach(&name, [5u8; 64], Some(wrong), None);
    assert!(matches!(result, Err(DataBlockError::ConfigMismatch)));
    assert_eq!(producer.get_metrics().layout_fingerprint_mismatch_count, 1);
}

#[test]
fn attach_refuses_on_schema_fingerprint_mismatch() {
    common::init_logging();
    let name = common::unique_name("datablock_it_attach_schema");
    let _ = SharedMapping::unlink(&name);

    let producer =
        Producer::create(&name, [6u8; 64], [1u8; 32], 0, common::sample_config()).unwrap();

    let result = Consumer::attach(&name, [6u8; 64], None, Some([2u8; 32]));
    assert!(matches!(result, Err(DataBlockError::SchemaMismatch)));
    assert_eq!(producer.get_metrics().schema_mismatch_count, 1);
}

#[test]
fn attach_refuses_on_wrong_shared_secret() {
    common::init_logging();
    let name = common::unique_name("datablock_it_attach_secret");
    let _ = SharedMapping::unlink(&name);

    let producer =
        Producer::create(&name, [9u8; 64], [1u8; 32], 0, common::sample_config()).unwrap();

    let result = Consumer::attach(&name, [0u8; 64], None, None);
    assert!(matches!(result, Err(DataBlockError::SharedSecretMismatch)));

    drop(producer);
}
