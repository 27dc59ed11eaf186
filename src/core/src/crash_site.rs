//! Crash-site identification and comparison (§4.C/§4.D): drives the
//! call-stack parser to produce a [`CrashSite`], and compares two sites
//! for queue-admission purposes.

use std::path::Path;

use crate::callstack::{find_crash_site, CrashSite, ModuleFilter, Symbolizer};
use crate::queue::QueueAdmission;

/// The four crash-mode tiers from §6: how aggressively IgorFuzz-style
/// decrease semantics are applied, and how much crash-site detail gets
/// written to the crashes README.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashMode {
    /// Classic AFL crash handling, no decrease semantics.
    Classic = 0,
    /// Decrease semantics; crash detail includes `@ADDR`.
    DecreaseLv1 = 1,
    /// Lv1 + `@FUNC`.
    DecreaseLv2 = 2,
    /// Lv2 + crash-site equality is a prerequisite for admission, checked
    /// both before classification and after calibration.
    DecreaseLv3 = 3,
}

impl CrashMode {
    pub fn wants_addr_detail(self) -> bool {
        self >= CrashMode::DecreaseLv1
    }

    pub fn wants_func_detail(self) -> bool {
        self >= CrashMode::DecreaseLv2
    }

    pub fn requires_site_match(self) -> bool {
        self >= CrashMode::DecreaseLv3
    }
}

/// Identify the crash site for the most recent execution.
pub fn identify_crash_site(
    callstack_path: Option<&Path>,
    filter: &ModuleFilter,
    symbolizer: &mut dyn Symbolizer,
    flush: bool,
) -> CrashSite {
    find_crash_site(callstack_path, filter, symbolizer, flush)
}

/// Re-parse the fresh call-stack dump and compare it against `previous`.
/// Two sites are the same iff `offset` matches and `module` is either
/// both absent or bytewise equal -- `symbol` is deliberately excluded
/// since two builds may symbolize the same address differently.
///
/// On a match, the freshly parsed site is kept (returned) and `previous`
/// is discarded. On a mismatch, `previous` is restored (returned)
/// unchanged, and if `entry` is provided:
/// - when `write_detail` is set, a line describing `entry` is appended to
///   the crashes README by the caller (this function only reports the
///   mismatch; the caller owns persistence, matching §4.D step 5).
/// - when `discard` is set, `entry` is marked disabled, its scheduling
///   weight zeroed, and pending counters decremented.
pub fn same_crash_site(
    previous: &CrashSite,
    callstack_path: Option<&Path>,
    filter: &ModuleFilter,
    symbolizer: &mut dyn Symbolizer,
    entry: Option<&mut dyn QueueAdmission>,
    discard: bool,
) -> SiteComparison {
    let fresh = find_crash_site(callstack_path, filter, symbolizer, true);

    let is_same = fresh.offset == previous.offset && fresh.module == previous.module;

    if is_same {
        return SiteComparison {
            is_same: true,
            site: fresh,
        };
    }

    if let Some(entry) = entry {
        if discard {
            entry.discard();
        }
    }

    SiteComparison {
        is_same: false,
        site: previous.clone(),
    }
}

/// Result of [`same_crash_site`]: whether the sites matched, and the site
/// that should be kept as "current" going forward (the fresh one on a
/// match, the restored previous one on a mismatch).
#[derive(Debug, Clone)]
pub struct SiteComparison {
    pub is_same: bool,
    pub site: CrashSite,
}
