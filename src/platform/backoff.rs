//! Shared exponential backoff for every spin-wait in the crate: the spin
//! lock (§4.3), writer reader-drain (§4.4 step 3), and consumer acquisition
//! retry (§4.7). One implementation so every caller gets the same three
//! phases spec §4.3 mandates: yield, then a 1 µs sleep, then
//! `iteration * 10 µs`, capped at 100 ms.

use std::time::Duration;

const PHASE1_ITERATIONS: u32 = 32;
const PHASE2_ITERATIONS: u32 = 200;
const CAP: Duration = Duration::from_millis(100);

/// Call once per failed spin attempt with a monotonically increasing
/// `iteration` (starting at 0). Performs the appropriate backoff action.
pub fn spin_backoff(iteration: u32) {
    if iteration < PHASE1_ITERATIONS {
        std::hint::spin_loop();
        std::thread::yield_now();
    } else if iteration < PHASE2_ITERATIONS {
        std::thread::sleep(Duration::from_micros(1));
    } else {
        let extra = (iteration - PHASE2_ITERATIONS).saturating_mul(10);
        let sleep = Duration::from_micros(extra as u64).min(CAP);
        std::thread::sleep(sleep);
    }
}

/// A deadline-based helper for timeout-bounded spin loops. `None` means "no
/// timeout": the caller should still bound iterations itself if it wants
/// forward progress guarantees, but this type never reports expiry.
pub struct Deadline {
    at: Option<std::time::Instant>,
}

impl Deadline {
    pub fn after(timeout_ms: u64) -> Self {
        Self {
            at: Some(std::time::Instant::now() + Duration::from_millis(timeout_ms)),
        }
    }

    pub fn expired(&self) -> bool {
        match self.at {
            Some(at) => std::time::Instant::now() >= at,
            None => false,
        }
    }

    /// Milliseconds remaining until expiry, rounded down, floored at zero.
    /// Used to hand a sub-deadline down to a nested timeout-bounded call
    /// (e.g. producer backpressure wrapping slot acquisition).
    pub fn remaining_ms(&self) -> u64 {
        match self.at {
            Some(at) => {
                let now = std::time::Instant::now();
                if now >= at {
                    0
                } else {
                    (at - now).as_millis() as u64
                }
            }
            None => u64::MAX,
        }
    }
}
