//! DataBlock: a zero-copy, single-producer/multiple-consumer shared-memory
//! data exchange core for scientific instrumentation and real-time data
//! acquisition.
//!
//! One process (the [`producer::Producer`]) publishes fixed-size records
//! into a ring of shared-memory slots; zero or more peer processes (each a
//! [`consumer::Consumer`]) observe and read them without copying through a
//! kernel channel. The segment layout, the per-slot coordination protocol,
//! crash recovery, and attach-time schema/layout validation are the crate's
//! core; everything outside that (the discovery broker, a logging facility,
//! a configuration loader) is an external collaborator this crate only
//! hands data to.
//!
//! Start with [`producer::Producer::create`] and [`consumer::Consumer::attach`]
//! for the low-level handle API, or [`transaction`] for a scope-guarded
//! wrapper over the same operations.

pub mod checksum;
pub mod config;
pub mod consumer;
pub mod error;
pub mod ffi;
pub mod hash;
pub mod header;
pub mod layout;
pub mod metrics;
pub mod platform;
pub mod producer;
pub mod recovery;
pub mod schema;
pub mod segment;
pub mod slot;
pub mod spinlock;
pub mod transaction;

pub use config::{BufferPolicy, ChecksumAlgorithm, ChecksumPolicy, ConsumerSyncPolicy, SegmentConfig};
pub use consumer::Consumer;
pub use error::{DataBlockError, Result};
pub use producer::Producer;
