//! The interestingness dispatcher (§4.F): the piece that combines the
//! virgin-map engine, the crash-site identifier, the describe builder and
//! persistence into one `save_if_interesting` call per execution.

use std::time::Duration;

use log::debug;
use xxhash_rust::xxh3::xxh3_64;

use crate::bitmap::{classify_counts, simplify_trace};
use crate::callstack::{ModuleFilter, Symbolizer};
use crate::config::Config;
use crate::crash_site::{identify_crash_site, same_crash_site, CrashMode};
use crate::describe::{build_description, StageInfo};
use crate::error::CoreError;
use crate::persistence::{self, CrashDetail};
use crate::queue::{Calibrator, ExecOutcome, Executor, Fault, QueueSink};
use crate::virgin::{CoverageState, FewBitsOutcome, VirginMapId};

/// Session counters the dispatcher updates as a side effect of triage --
/// separate from `CoverageState` since these are reporting/bookkeeping
/// numbers, not part of the novelty algorithm itself.
#[derive(Debug, Clone)]
pub struct Counters {
    pub total_crashes: u64,
    pub total_tmouts: u64,
    pub saved_hangs: u64,
    pub saved_crashes: u64,
    pub queued_items: u64,
    pub queued_with_cov: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self {
            total_crashes: 0,
            total_tmouts: 0,
            saved_hangs: 0,
            saved_crashes: 0,
            queued_items: 0,
            queued_with_cov: 0,
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything `save_if_interesting` needs to carry across calls: the
/// virgin-map engine, the running counters, the n_fuzz frequency table
/// (only populated under a frequency-based [`Schedule`]), and the
/// reference crash site tier-3 admission compares new crashes against.
pub struct DispatcherState {
    pub coverage: CoverageState,
    pub counters: Counters,
    pub reference_site: crate::callstack::CrashSite,
    n_fuzz: Vec<u32>,
}

impl DispatcherState {
    pub fn new(config: &Config) -> Self {
        Self {
            coverage: CoverageState::new(config.map_size),
            counters: Counters::new(),
            reference_site: crate::callstack::CrashSite::default(),
            n_fuzz: vec![0u32; config.n_fuzz_size.max(1)],
        }
    }
}

/// The collaborators `save_if_interesting` drives but does not own: the
/// target executor, the symbolizer, the calibrator and the queue sink.
/// Bundled so the dispatcher's own signature doesn't grow a parameter per
/// trait.
pub struct Collaborators<'a> {
    pub executor: &'a mut dyn Executor,
    pub symbolizer: &'a mut dyn Symbolizer,
    pub calibrator: &'a mut dyn Calibrator,
    pub queue: &'a mut dyn QueueSink,
}

/// Run one input's outcome through the full §4.F triage pipeline: timeout
/// handling (with hang re-run and fault-restart), crash handling (tier-3
/// pre-check, crash detail, calibration), and queue admission. Returns
/// whether the input was kept.
///
/// `outcome` is the *first* execution's result; on a timeout this function
/// may re-run the target itself via `collab.executor` to confirm a genuine
/// hang, which is why `collab` and `config` are threaded through rather
/// than just the already-computed trace.
pub fn save_if_interesting(
    state: &mut DispatcherState,
    config: &Config,
    collab: &mut Collaborators,
    input: &[u8],
    stage: &StageInfo,
    mut outcome: ExecOutcome,
) -> Result<bool, CoreError> {
    if input.is_empty() {
        return Ok(false);
    }

    let filter = module_filter(config);

    loop {
        match outcome.fault {
            Fault::Ok => return Ok(false),
            Fault::Error => return Err(CoreError::ExecutorFailed("executor reported error".into())),

            Fault::Timeout => {
                if config.ignore_timeouts {
                    return Ok(false);
                }
                state.counters.total_tmouts += 1;
                if state.counters.saved_hangs >= config.keep_unique_hang as u64 {
                    return Ok(false);
                }

                classify_counts(&mut outcome.trace);
                let actual_counts: u64 = outcome.trace.iter().map(|&b| b as u64).sum();
                simplify_trace(&mut outcome.trace);

                let few_bits =
                    state
                        .coverage
                        .has_few_bits(&outcome.trace, actual_counts, VirginMapId::Timeout);
                if few_bits.is_not_interesting() {
                    return Ok(false);
                }

                // Confirm this is a genuine hang with a more generous
                // timeout before committing it to disk, per §4.F.
                let hang_timeout = config.hang_timeout();
                let rerun = collab.executor.run(input, hang_timeout)?;
                if rerun.fault == Fault::Crash {
                    outcome = rerun;
                    continue;
                }
                if rerun.fault != Fault::Timeout {
                    outcome = rerun;
                    continue;
                }

                let desc = if config.simple_files {
                    None
                } else {
                    Some(build_description(few_bits, true, stage, config.path_max())?)
                };
                let hangs_dir = config.out_dir.join("hangs");
                persistence::write_testcase(
                    &hangs_dir,
                    state.counters.saved_hangs,
                    desc.as_deref(),
                    input,
                )?;
                state.counters.saved_hangs += 1;
                return Ok(true);
            }

            Fault::Crash => {
                state.counters.total_crashes += 1;

                if config.crash_mode.requires_site_match() && !state.reference_site.is_empty() {
                    let cmp = same_crash_site(
                        &state.reference_site,
                        outcome.callstack_path.as_deref(),
                        &filter,
                        collab.symbolizer,
                        None,
                        false,
                    );
                    if !cmp.is_same {
                        return Ok(false);
                    }
                    state.reference_site = cmp.site;
                }

                classify_counts(&mut outcome.trace);
                let actual_counts: u64 = outcome.trace.iter().map(|&b| b as u64).sum();

                let few_bits =
                    state
                        .coverage
                        .has_few_bits(&outcome.trace, actual_counts, VirginMapId::Bits);
                if few_bits.is_not_interesting() {
                    debug!("crashing input did not decrease coverage, discarding");
                    return Ok(false);
                }

                let desc = if config.simple_files {
                    None
                } else {
                    Some(build_description(few_bits, false, stage, config.path_max())?)
                };
                let queue_dir = config.out_dir.join("queue");
                let fname = persistence::write_testcase(
                    &queue_dir,
                    state.counters.queued_items,
                    desc.as_deref(),
                    input,
                )?;

                let mut entry = collab.queue.add(fname.clone(), input.len() as u32);
                state.counters.queued_items += 1;

                entry.set_bitmap_size(crate::bitmap::count_bytes(&outcome.trace));

                let has_new_cov = matches!(
                    few_bits,
                    FewBitsOutcome::Fallback(crate::virgin::Novelty::NewTuple)
                ) || matches!(
                    few_bits,
                    FewBitsOutcome::Decrease(axes) if axes.coverage
                );
                entry.set_has_new_cov(has_new_cov);
                if has_new_cov {
                    state.counters.queued_with_cov += 1;
                }

                let cksum = xxh3_64(&outcome.trace);
                entry.set_exec_cksum(cksum);

                if config.schedule.is_frequency_based() {
                    let idx = (cksum as usize) % state.n_fuzz.len();
                    state.n_fuzz[idx] = state.n_fuzz[idx].saturating_add(1);
                    entry.set_n_fuzz_entry(idx);
                }

                collab.calibrator.calibrate(&mut *entry, input).map_err(|_| CoreError::CalibrationFailed)?;

                if config.crash_mode != CrashMode::Classic {
                    let site = if config.crash_mode.requires_site_match() && !state.reference_site.is_empty() {
                        let cmp = same_crash_site(
                            &state.reference_site,
                            outcome.callstack_path.as_deref(),
                            &filter,
                            collab.symbolizer,
                            None,
                            false,
                        );
                        cmp.site
                    } else {
                        identify_crash_site(
                            outcome.callstack_path.as_deref(),
                            &filter,
                            collab.symbolizer,
                            true,
                        )
                    };
                    state.reference_site = site.clone();

                    persistence::write_crash_detail(
                        &config.out_dir,
                        &CrashDetail {
                            fname: entry.fname(),
                            bitmap_size: crate::bitmap::count_bytes(&outcome.trace),
                            actual_counts,
                            site: Some(&site),
                            want_addr: config.crash_mode.wants_addr_detail(),
                            want_func: config.crash_mode.wants_func_detail(),
                        },
                    );
                }

                state.counters.saved_crashes += 1;
                return Ok(true);
            }
        }
    }
}

fn module_filter(config: &Config) -> ModuleFilter {
    match &config.module_filter {
        crate::config::ModuleFilterConfig::Blacklist => ModuleFilter::Blacklist,
        crate::config::ModuleFilterConfig::ExactModule { target_path } => {
            ModuleFilter::ExactModule(target_path.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callstack::SymbolizedFrame;
    use crate::queue::test_support::FakeQueueSink;
    use std::path::Path;

    struct FakeExecutor {
        next: Vec<ExecOutcome>,
    }

    impl Executor for FakeExecutor {
        fn run(&mut self, _input: &[u8], _timeout: Duration) -> Result<ExecOutcome, CoreError> {
            Ok(self.next.pop().unwrap_or(ExecOutcome {
                fault: Fault::Ok,
                trace: vec![0u8; 8],
                callstack_path: None,
            }))
        }
    }

    struct NullSymbolizer;
    impl Symbolizer for NullSymbolizer {
        fn resolve(&mut self, _image: &Path, _offset: u64) -> Result<Vec<SymbolizedFrame>, CoreError> {
            Ok(Vec::new())
        }
    }

    struct NoopCalibrator;
    impl Calibrator for NoopCalibrator {
        fn calibrate(
            &mut self,
            _entry: &mut dyn crate::queue::QueueAdmission,
            _input: &[u8],
        ) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn base_stage() -> StageInfo {
        StageInfo {
            source_entry: 0,
            splicing_with: None,
            syncing_party: None,
            syncing_case: 0,
            stage_short: "havoc".to_string(),
            stage_cur_byte: None,
            stage_val: None,
            stage_cur_rep: 0,
            elapsed_ms: 0,
            total_execs: 0,
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut cfg = Config::default();
        cfg.map_size = 8;
        cfg.out_dir = dir.to_path_buf();
        cfg
    }

    #[test]
    fn new_coverage_crash_is_queued() {
        let dir = tempfile::tempdir().unwrap();
        persistence::ensure_output_dirs(dir.path()).unwrap();
        let config = test_config(dir.path());
        let mut state = DispatcherState::new(&config);

        let mut executor = FakeExecutor { next: vec![] };
        let mut symbolizer = NullSymbolizer;
        let mut calibrator = NoopCalibrator;
        let mut queue = FakeQueueSink::new();
        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let outcome = ExecOutcome {
            fault: Fault::Crash,
            trace: vec![0x00u8, 0x01, 0, 0, 0, 0, 0, 0],
            callstack_path: None,
        };

        let kept = save_if_interesting(&mut state, &config, &mut collab, b"AAAA", &base_stage(), outcome)
            .unwrap();

        assert!(kept);
        assert_eq!(state.counters.saved_crashes, 1);
        assert_eq!(queue.added, 1);
        assert!(dir.path().join("queue").read_dir().unwrap().next().is_some());
    }

    #[test]
    fn simple_files_mode_uses_bare_filename() {
        let dir = tempfile::tempdir().unwrap();
        persistence::ensure_output_dirs(dir.path()).unwrap();
        let mut config = test_config(dir.path());
        config.simple_files = true;
        let mut state = DispatcherState::new(&config);

        let mut executor = FakeExecutor { next: vec![] };
        let mut symbolizer = NullSymbolizer;
        let mut calibrator = NoopCalibrator;
        let mut queue = FakeQueueSink::new();
        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let outcome = ExecOutcome {
            fault: Fault::Crash,
            trace: vec![0x00u8, 0x01, 0, 0, 0, 0, 0, 0],
            callstack_path: None,
        };

        let kept = save_if_interesting(&mut state, &config, &mut collab, b"AAAA", &base_stage(), outcome)
            .unwrap();
        assert!(kept);

        let entry = dir
            .path()
            .join("queue")
            .read_dir()
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        let fname = entry.file_name();
        let fname = fname.to_str().unwrap();
        assert!(fname.starts_with("id_"));
        assert!(!fname.contains(','));
    }

    #[test]
    fn repeat_crash_with_no_novelty_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        persistence::ensure_output_dirs(dir.path()).unwrap();
        let config = test_config(dir.path());
        let mut state = DispatcherState::new(&config);

        let mut executor = FakeExecutor { next: vec![] };
        let mut symbolizer = NullSymbolizer;
        let mut calibrator = NoopCalibrator;
        let mut queue = FakeQueueSink::new();
        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let outcome1 = ExecOutcome {
            fault: Fault::Crash,
            trace: vec![0x00u8, 0x01, 0, 0, 0, 0, 0, 0],
            callstack_path: None,
        };
        save_if_interesting(&mut state, &config, &mut collab, b"AAAA", &base_stage(), outcome1).unwrap();

        let outcome2 = ExecOutcome {
            fault: Fault::Crash,
            trace: vec![0x00u8, 0x01, 0, 0, 0, 0, 0, 0],
            callstack_path: None,
        };
        let kept =
            save_if_interesting(&mut state, &config, &mut collab, b"AAAA", &base_stage(), outcome2)
                .unwrap();
        assert!(!kept);
        assert_eq!(state.counters.saved_crashes, 1);
    }

    #[test]
    fn ok_fault_is_never_interesting() {
        let dir = tempfile::tempdir().unwrap();
        persistence::ensure_output_dirs(dir.path()).unwrap();
        let config = test_config(dir.path());
        let mut state = DispatcherState::new(&config);

        let mut executor = FakeExecutor { next: vec![] };
        let mut symbolizer = NullSymbolizer;
        let mut calibrator = NoopCalibrator;
        let mut queue = FakeQueueSink::new();
        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let outcome = ExecOutcome {
            fault: Fault::Ok,
            trace: vec![0u8; 8],
            callstack_path: None,
        };
        let kept = save_if_interesting(&mut state, &config, &mut collab, b"AAAA", &base_stage(), outcome)
            .unwrap();
        assert!(!kept);
    }

    #[test]
    fn empty_input_is_never_interesting() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let mut state = DispatcherState::new(&config);

        let mut executor = FakeExecutor { next: vec![] };
        let mut symbolizer = NullSymbolizer;
        let mut calibrator = NoopCalibrator;
        let mut queue = FakeQueueSink::new();
        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let outcome = ExecOutcome {
            fault: Fault::Crash,
            trace: vec![0u8; 8],
            callstack_path: None,
        };
        let kept = save_if_interesting(&mut state, &config, &mut collab, b"", &base_stage(), outcome)
            .unwrap();
        assert!(!kept);
    }

    /// Scenario 6: a tier-3 crash whose site doesn't match the reference is
    /// rejected before any virgin-map work happens -- `total_crashes` still
    /// increments (it's an execution that crashed), but nothing is queued.
    #[test]
    fn tier3_site_mismatch_is_rejected_before_classification() {
        use std::io::Write as _;

        let dir = tempfile::tempdir().unwrap();
        persistence::ensure_output_dirs(dir.path()).unwrap();
        let mut config = test_config(dir.path());
        config.crash_mode = crate::crash_site::CrashMode::DecreaseLv3;
        let mut state = DispatcherState::new(&config);
        state.reference_site = crate::callstack::CrashSite {
            symbol: None,
            module: Some(std::path::PathBuf::from("/home/user/mytarget")),
            offset: 0xaaaa,
        };

        let mut callstack_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(callstack_file, "#0 0x5555000000bb (/home/user/mytarget+0xbbbb)").unwrap();
        callstack_file.flush().unwrap();

        let mut executor = FakeExecutor { next: vec![] };
        let mut symbolizer = NullSymbolizer;
        let mut calibrator = NoopCalibrator;
        let mut queue = FakeQueueSink::new();
        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let outcome = ExecOutcome {
            fault: Fault::Crash,
            trace: vec![0x00u8, 0x01, 0, 0, 0, 0, 0, 0],
            callstack_path: Some(callstack_file.path().to_path_buf()),
        };

        let kept = save_if_interesting(&mut state, &config, &mut collab, b"AAAA", &base_stage(), outcome)
            .unwrap();

        assert!(!kept);
        assert_eq!(state.counters.total_crashes, 1);
        assert_eq!(state.counters.saved_crashes, 0);
        assert_eq!(queue.added, 0);
        assert!(dir.path().join("queue").read_dir().unwrap().next().is_none());
    }

    #[test]
    fn hang_is_queued_once_confirmed() {
        let dir = tempfile::tempdir().unwrap();
        persistence::ensure_output_dirs(dir.path()).unwrap();
        let config = test_config(dir.path());
        let mut state = DispatcherState::new(&config);

        // The hang re-run also reports a timeout, confirming the hang.
        let confirm = ExecOutcome {
            fault: Fault::Timeout,
            trace: vec![0u8; 8],
            callstack_path: None,
        };
        let mut executor = FakeExecutor { next: vec![confirm] };
        let mut symbolizer = NullSymbolizer;
        let mut calibrator = NoopCalibrator;
        let mut queue = FakeQueueSink::new();
        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let outcome = ExecOutcome {
            fault: Fault::Timeout,
            trace: vec![0x00u8, 0x01, 0, 0, 0, 0, 0, 0],
            callstack_path: None,
        };
        let kept = save_if_interesting(&mut state, &config, &mut collab, b"AAAA", &base_stage(), outcome)
            .unwrap();
        assert!(kept);
        assert_eq!(state.counters.saved_hangs, 1);
        assert!(dir.path().join("hangs").read_dir().unwrap().next().is_some());
    }

    /// A hang re-run that instead crashes restarts the dispatch switch with
    /// the new fault rather than being treated as a confirmed hang, per
    /// §4.F's "restartable block" description.
    #[test]
    fn hang_rerun_that_crashes_restarts_as_crash() {
        let dir = tempfile::tempdir().unwrap();
        persistence::ensure_output_dirs(dir.path()).unwrap();
        let config = test_config(dir.path());
        let mut state = DispatcherState::new(&config);

        let rerun_crash = ExecOutcome {
            fault: Fault::Crash,
            trace: vec![0x00u8, 0x01, 0, 0, 0, 0, 0, 0],
            callstack_path: None,
        };
        let mut executor = FakeExecutor { next: vec![rerun_crash] };
        let mut symbolizer = NullSymbolizer;
        let mut calibrator = NoopCalibrator;
        let mut queue = FakeQueueSink::new();
        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let outcome = ExecOutcome {
            fault: Fault::Timeout,
            trace: vec![0x00u8, 0x01, 0, 0, 0, 0, 0, 0],
            callstack_path: None,
        };
        let kept = save_if_interesting(&mut state, &config, &mut collab, b"AAAA", &base_stage(), outcome)
            .unwrap();

        assert!(kept);
        assert_eq!(state.counters.saved_hangs, 0);
        assert_eq!(state.counters.saved_crashes, 1);
        assert_eq!(state.counters.total_tmouts, 1);
        assert_eq!(state.counters.total_crashes, 1);
        assert!(dir.path().join("queue").read_dir().unwrap().next().is_some());
    }

    #[test]
    fn error_fault_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        persistence::ensure_output_dirs(dir.path()).unwrap();
        let config = test_config(dir.path());
        let mut state = DispatcherState::new(&config);

        let mut executor = FakeExecutor { next: vec![] };
        let mut symbolizer = NullSymbolizer;
        let mut calibrator = NoopCalibrator;
        let mut queue = FakeQueueSink::new();
        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let outcome = ExecOutcome {
            fault: Fault::Error,
            trace: vec![0u8; 8],
            callstack_path: None,
        };
        let err = save_if_interesting(&mut state, &config, &mut collab, b"AAAA", &base_stage(), outcome)
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
