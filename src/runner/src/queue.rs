//! Minimal in-memory queue admission + a no-op calibrator. On-disk queue
//! layout and real calibration/scheduling are Non-goals (§1); this module
//! exists only to give [`igorfuzz_core::dispatcher::save_if_interesting`]
//! something real to call.

use std::path::{Path, PathBuf};

use igorfuzz_core::error::CoreError;
use igorfuzz_core::queue::{Calibrator, QueueAdmission, QueueSink};

pub struct FileQueueEntry {
    fname: PathBuf,
    pub bitmap_size: u32,
    pub has_new_cov: bool,
    pub exec_cksum: u64,
    pub n_fuzz_entry: Option<usize>,
    pub disabled: bool,
}

impl FileQueueEntry {
    fn new(fname: PathBuf, len: u32) -> Self {
        Self {
            fname,
            bitmap_size: len,
            has_new_cov: false,
            exec_cksum: 0,
            n_fuzz_entry: None,
            disabled: false,
        }
    }
}

impl QueueAdmission for FileQueueEntry {
    fn fname(&self) -> &Path {
        &self.fname
    }
    fn set_bitmap_size(&mut self, size: u32) {
        self.bitmap_size = size;
    }
    fn set_has_new_cov(&mut self, has_new_cov: bool) {
        self.has_new_cov = has_new_cov;
    }
    fn set_exec_cksum(&mut self, cksum: u64) {
        self.exec_cksum = cksum;
    }
    fn set_n_fuzz_entry(&mut self, index: usize) {
        self.n_fuzz_entry = Some(index);
    }
    fn discard(&mut self) {
        self.disabled = true;
    }
}

/// Vends fresh [`FileQueueEntry`]s and keeps a running count -- real
/// scheduling weight bookkeeping is a Non-goal, the count is purely for
/// session reporting in `main`.
#[derive(Default)]
pub struct InMemoryQueueSink {
    pub total_added: u64,
}

impl QueueSink for InMemoryQueueSink {
    fn add(&mut self, fname: PathBuf, len: u32) -> Box<dyn QueueAdmission> {
        self.total_added += 1;
        Box::new(FileQueueEntry::new(fname, len))
    }
}

/// No-op: re-running the input to measure per-exec timing / stability is a
/// named Non-goal. A real host fuzzer would wire this to its own scheduler.
pub struct NoopCalibrator;

impl Calibrator for NoopCalibrator {
    fn calibrate(&mut self, _entry: &mut dyn QueueAdmission, _input: &[u8]) -> Result<(), CoreError> {
        Ok(())
    }
}
