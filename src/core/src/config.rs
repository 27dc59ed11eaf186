//! Session configuration. §9's compile-time feature flags
//! (`IGORFUZZ_FEATURE_ENABLE`, `IGORFUZZ_CALLSTACK_EXACT_MODULE`,
//! `SIMPLE_FILES`) become runtime fields here, chosen by whoever drives
//! the dispatcher rather than baked in at build time.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crash_site::CrashMode;

/// How to recognize out-of-scope (sanitizer runtime) frames.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ModuleFilterConfig {
    /// The classic substring blacklist against `libasan`/`liblsan`/etc.
    Blacklist,
    /// The binary is statically linked with sanitizers: only frames whose
    /// image basename matches `target_path`'s basename are in-scope.
    ExactModule { target_path: PathBuf },
}

/// Mirrors AFL++'s `POWER_SCHEDULE`: only `Fast`/`Rare` feed the n_fuzz
/// frequency table the dispatcher maintains for the scheduler's benefit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    Classic,
    Fast,
    Rare,
}

impl Schedule {
    pub fn is_frequency_based(self) -> bool {
        matches!(self, Schedule::Fast | Schedule::Rare)
    }
}

/// Top-level, `toml`-deserializable session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Shared-memory bitmap size. Must be a power of two.
    pub map_size: usize,
    /// Which crash-mode tier (§6) governs decrease semantics and crash
    /// detail verbosity.
    pub crash_mode: CrashMode,
    pub module_filter: ModuleFilterConfig,
    /// Stop recording new unique hangs past this count.
    pub keep_unique_hang: u32,
    /// Generous re-run timeout (milliseconds) used to confirm a genuine
    /// hang (§4.F).
    pub hang_timeout_ms: u64,
    /// Mirrors `SIMPLE_FILES`: when set, skip building the rich `describe`
    /// suffix and use a bare numeric filename instead.
    pub simple_files: bool,
    pub out_dir: PathBuf,
    /// Power schedule; governs whether the dispatcher maintains the n_fuzz
    /// frequency table.
    pub schedule: Schedule,
    /// Mirrors `AFL_IGNORE_TIMEOUTS`: drop timeouts instead of triaging them.
    pub ignore_timeouts: bool,
    /// Number of buckets in the n_fuzz frequency table.
    pub n_fuzz_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            map_size: crate::bitmap::MAP_SIZE,
            crash_mode: CrashMode::DecreaseLv2,
            module_filter: ModuleFilterConfig::Blacklist,
            keep_unique_hang: 500,
            hang_timeout_ms: 5000,
            simple_files: false,
            out_dir: PathBuf::from("out"),
            schedule: Schedule::Classic,
            ignore_timeouts: false,
            n_fuzz_size: 1 << 21,
        }
    }
}

impl Config {
    /// Parse a `toml` config file, falling back to defaults for any
    /// unspecified field.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn hang_timeout(&self) -> Duration {
        Duration::from_millis(self.hang_timeout_ms)
    }

    /// `PATH_MAX`-derived description length limit the original enforces
    /// in `describe_op` before writing a filename.
    pub fn path_max(&self) -> usize {
        4096
    }
}
