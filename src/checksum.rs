//! Per-slot checksum record: a 33-byte entry (1-byte algorithm tag +
//! 32-byte digest) in a dense array following the slot state array.
//! Storage is always present; [`crate::config::ChecksumPolicy`] controls
//! whether it is produced or verified.

use crate::config::ChecksumAlgorithm;
use crate::hash::{blake2b_256, verify, Digest32};

#[repr(C)]
pub struct SlotChecksum {
    algorithm: u8,
    digest: [u8; 32],
}

const _: () = assert!(core::mem::size_of::<SlotChecksum>() == 33);

impl SlotChecksum {
    pub fn init_zero(&mut self) {
        self.algorithm = ChecksumAlgorithm::None as u8;
        self.digest = [0; 32];
    }

    /// Computes and stores the checksum of `payload` using `algorithm`.
    /// Called by the producer after `begin_commit`, before `publish`.
    pub fn store(&mut self, algorithm: ChecksumAlgorithm, payload: &[u8]) {
        self.algorithm = algorithm as u8;
        self.digest = match algorithm {
            ChecksumAlgorithm::None => [0; 32],
            ChecksumAlgorithm::Blake2b256 => blake2b_256(payload),
        };
    }

    /// Recomputes the checksum over `payload` and compares it with the
    /// stored digest. Returns `true` trivially when no algorithm is stored
    /// (checksum policy was disabled for this slot's last commit).
    pub fn verify_payload(&self, payload: &[u8]) -> bool {
        if self.algorithm == ChecksumAlgorithm::None as u8 {
            return true;
        }
        let recomputed = blake2b_256(payload);
        verify(&self.digest, &recomputed)
    }

    pub fn digest(&self) -> Digest32 {
        self.digest
    }

    pub fn algorithm_tag(&self) -> u8 {
        self.algorithm
    }
}
