//! Zombie-writer reclaim across real, separate OS processes (spec §8.4
//! scenario 3). A helper binary (`demos/zombie_writer.rs`) creates the
//! segment, acquires a write slot, and exits via `std::process::exit`
//! without releasing it — this test's own process never holds the slot, so
//! the dead pid the recovery handle finds in the writer-lock field is
//! genuinely dead, not merely "looks dead because we forged a number".
//!
//! Grounded in the teacher's `tests/mpmc_integration_test.rs`
//! (`Command::new("cargo").arg("run").arg("--example")` pattern for
//! cross-process scenarios the in-process test harness can't reach).

#[path = "common.rs"]
mod common;

use std::process::Command;
use std::time::Duration;

use datablock::platform::shm::SharedMapping;
use datablock::recovery::{DiagnosticHandle, SlotHealth};
use datablock::slot::SlotStateTag;

#[test]
fn zombie_writer_is_detected_and_reclaimed() {
    common::init_logging();
    let name = common::unique_name("datablock_it_zombie");
    let _ = SharedMapping::unlink(&name);

    let status = Command::new(env!("CARGO"))
        .args(["run", "--quiet", "--example", "zombie_writer", "--", &name])
        .status()
        .expect("failed to spawn zombie_writer helper process");
    assert!(status.success(), "zombie_writer helper exited non-zero");

    // Give the OS a moment to fully reap the child so kill(pid, 0) reliably
    // reports ESRCH rather than a lingering zombie-process state.
    std::thread::sleep(Duration::from_millis(100));

    let handle = DiagnosticHandle::attach(&name).expect("diagnostic attach");
    let before = handle.diagnose_slot(0).expect("diagnose slot 0");
    assert_eq!(before.state, SlotStateTag::Writing);
    assert!(!before.writer_alive, "the helper process's pid must be dead by now");
    assert_eq!(before.health, SlotHealth::StuckWriting);

    handle
        .release_zombie_writer(0, false)
        .expect("release_zombie_writer should succeed against a confirmed-dead writer");

    let after = handle.diagnose_slot(0).expect("diagnose slot 0 again");
    assert_eq!(after.state, SlotStateTag::Free);
    assert_eq!(after.writer_pid, 0);

    let _ = SharedMapping::unlink(&name);
}
