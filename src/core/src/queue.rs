//! Narrow collaborator contracts for the three subsystems §1 calls out as
//! deliberately external: the target executor, calibration/scheduling,
//! and on-disk queue layout. The dispatcher only ever touches the queue
//! entry fields named in §3.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::CoreError;

/// Outcome of running an input through the target, as far as the core
/// needs to know: did it crash/hang/exit cleanly, what trace bitmap did it
/// produce, and (on crash) where is the call-stack dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Ok,
    Crash,
    Timeout,
    Error,
}

/// One execution's result: the fault code, the raw trace bitmap (owned --
/// the executor hands ownership over since the core will mutate it in
/// place via `classify_counts`/`simplify_trace`), and the call-stack dump
/// path if the target crashed.
#[derive(Debug, Clone)]
pub struct ExecOutcome {
    pub fault: Fault,
    pub trace: Vec<u8>,
    pub callstack_path: Option<PathBuf>,
}

/// The forkserver/target-executor contract. Out of scope per §1; the core
/// only needs to ask it to run an input and to re-run one on a more
/// generous timeout during hang confirmation (§4.F).
pub trait Executor {
    fn run(&mut self, input: &[u8], timeout: Duration) -> Result<ExecOutcome, CoreError>;
}

/// Calibration/scheduling contract, a named Non-goal. The dispatcher calls
/// this exactly once per admitted crash, per §4.F, and treats a failure as
/// fatal.
pub trait Calibrator {
    fn calibrate(&mut self, entry: &mut dyn QueueAdmission, input: &[u8]) -> Result<(), CoreError>;
}

/// The subset of a queue entry's fields the core touches, per §3: `fname`,
/// `bitmap_size`, `has_new_cov`, `exec_cksum`, `n_fuzz_entry`, `disabled`,
/// `perf_score`, `was_fuzzed`. On-disk queue layout itself is a Non-goal;
/// this trait is the narrow seam between the dispatcher and whatever the
/// host fuzzer's real queue implementation looks like.
pub trait QueueAdmission {
    fn fname(&self) -> &Path;
    fn set_bitmap_size(&mut self, size: u32);
    fn set_has_new_cov(&mut self, has_new_cov: bool);
    fn set_exec_cksum(&mut self, cksum: u64);
    fn set_n_fuzz_entry(&mut self, index: usize);

    /// Mark this entry disabled, zero its scheduling weight, and
    /// decrement pending counters -- the side effect `same_crash_site`
    /// performs on a discarded entry (§4.D step 5).
    fn discard(&mut self);
}

/// Where a newly-admitted testcase gets its queue entry from. Separate from
/// [`QueueAdmission`] because adding an entry and mutating one are different
/// points in the dispatcher's control flow: `add` is called once per
/// admitted input, the returned entry is then mutated in place for the rest
/// of `save_if_interesting`.
pub trait QueueSink {
    fn add(&mut self, fname: PathBuf, len: u32) -> Box<dyn QueueAdmission>;
}
