//! CLI harness proving `igorfuzz-core`'s dispatcher is wireable to a real
//! target: re-triages an existing corpus directory (e.g. handed off from
//! another fuzzer, or a directory of known crashes) through the
//! coverage-decrease pipeline, one input per process spawn.
//!
//! A full mutation-driven fuzz loop is out of scope (the mutator engine is
//! a named Non-goal) -- this binary's job is only to prove the traits in
//! `igorfuzz_core::queue` are wireable to something real.

use std::fs;
use std::path::PathBuf;
use std::process::exit;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use log::info;
use structopt::StructOpt;

mod constants;
mod forkserver;
mod queue;
mod symbolizer;

use forkserver::ProcessExecutor;
use igorfuzz_core::config::Config;
use igorfuzz_core::describe::StageInfo;
use igorfuzz_core::dispatcher::{save_if_interesting, Collaborators, DispatcherState};
use igorfuzz_core::persistence;
use queue::{InMemoryQueueSink, NoopCalibrator};
use symbolizer::Addr2LineSymbolizer;

#[derive(Debug, StructOpt)]
#[structopt(name = "igorfuzz-runner", about = "Triage a testcase corpus against coverage-decrease semantics")]
struct Opt {
    /// Turn on debug logging
    #[structopt(short, long)]
    debug: bool,

    /// Path to the instrumented, igorfuzz-shim-linked target binary
    #[structopt(short, long)]
    target: PathBuf,

    /// Directory of testcases to triage
    #[structopt(short, long)]
    input_dir: PathBuf,

    /// Optional TOML config overriding defaults
    #[structopt(short, long)]
    config: Option<PathBuf>,

    /// Override the configured output directory
    #[structopt(short, long)]
    out_dir: Option<PathBuf>,

    /// Per-execution timeout in milliseconds
    #[structopt(long, default_value = "1000")]
    exec_timeout_ms: u64,
}

fn load_config(opt: &Opt) -> Result<Config> {
    let mut config = match &opt.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {:?}", path))?;
            Config::from_toml_str(&text).with_context(|| "failed to parse config file".to_string())?
        }
        None => Config::default(),
    };

    if let Some(out_dir) = &opt.out_dir {
        config.out_dir = out_dir.clone();
    }

    Ok(config)
}

fn triage_stage(source_entry: u32, start: Instant, total_execs: u64) -> StageInfo {
    StageInfo {
        source_entry,
        splicing_with: None,
        syncing_party: None,
        syncing_case: 0,
        stage_short: "triage".to_string(),
        stage_cur_byte: None,
        stage_val: None,
        stage_cur_rep: 0,
        elapsed_ms: start.elapsed().as_millis() as u64,
        total_execs,
    }
}

fn _main() -> Result<()> {
    let opt = Opt::from_args();

    let mut builder = env_logger::Builder::from_default_env();
    if opt.debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.init();

    let config = load_config(&opt)?;
    persistence::ensure_output_dirs(&config.out_dir)?;

    let mut state = DispatcherState::new(&config);
    let mut executor = ProcessExecutor::new(opt.target.clone(), Vec::new(), config.map_size)
        .with_context(|| "failed to set up target executor".to_string())?;
    let mut symbolizer = Addr2LineSymbolizer::new();
    let mut calibrator = NoopCalibrator;
    let mut queue = InMemoryQueueSink::default();

    let start = Instant::now();
    let mut total_execs: u64 = 0;
    let mut kept: u64 = 0;

    let entries: Vec<PathBuf> = fs::read_dir(&opt.input_dir)
        .with_context(|| format!("failed to read input dir {:?}", opt.input_dir))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();

    for (idx, path) in entries.iter().enumerate() {
        let input = fs::read(path).with_context(|| format!("failed to read {:?}", path))?;

        let outcome = executor.run(&input, Duration::from_millis(opt.exec_timeout_ms))?;
        total_execs += 1;

        let mut collab = Collaborators {
            executor: &mut executor,
            symbolizer: &mut symbolizer,
            calibrator: &mut calibrator,
            queue: &mut queue,
        };

        let stage = triage_stage(idx as u32, start, total_execs);
        if save_if_interesting(&mut state, &config, &mut collab, &input, &stage, outcome)? {
            kept += 1;
        }
    }

    persistence::dump_bitmap(&config.out_dir, state.coverage.virgin_bits.as_slice(), &mut state.coverage.bitmap_dirty)?;

    info!(
        "triaged {} inputs, kept {} ({} crashes, {} hangs)",
        total_execs, kept, state.counters.saved_crashes, state.counters.saved_hangs
    );

    Ok(())
}

fn main() {
    match _main() {
        Ok(()) => exit(0),
        Err(e) => {
            eprintln!("igorfuzz-runner: {:#}", e);
            exit(1);
        }
    }
}
