//! Call-stack parsing: reads the target's ASan-style crash dump, filters
//! runtime/sanitizer frames via a blacklist, and drives an external
//! symbolizer to pick the innermost meaningful user frame.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::CoreError;

/// Frames whose image path contains one of these substrings are sanitizer
/// runtime, not user code.
pub const MODULE_BLACKLIST: &[&str] = &["libasan", "liblsan", "libubsan", "libclang_rt."];

/// Frames whose symbol contains one of these substrings are sanitizer
/// internals, even when the image itself isn't blacklisted (e.g. a
/// statically-linked binary).
pub const FUNCTION_BLACKLIST: &[&str] = &[
    "__asan",
    "__lsan",
    "__sanitizer",
    "__interceptor",
    "__interception",
    "__ubsan",
    "__sancov",
    "__hwasan",
    "__dfsan",
    "__dfsw",
];

/// How to decide whether a frame's image is in-scope. `Blacklist` checks
/// the image basename against [`MODULE_BLACKLIST`]; `ExactModule` is the
/// "statically linked with sanitizers" mode, where only frames inside the
/// target binary itself ever qualify.
#[derive(Debug, Clone)]
pub enum ModuleFilter {
    Blacklist,
    ExactModule(PathBuf),
}

impl ModuleFilter {
    fn is_blocked(&self, image: &Path) -> bool {
        let basename = image
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        match self {
            ModuleFilter::Blacklist => MODULE_BLACKLIST.iter().any(|m| basename.contains(m)),
            ModuleFilter::ExactModule(target) => {
                let target_name = target
                    .file_name()
                    .map(|n| n.to_string_lossy())
                    .unwrap_or_default();
                basename != target_name
            }
        }
    }
}

fn function_is_blocked(symbol: &str) -> bool {
    FUNCTION_BLACKLIST.iter().any(|f| symbol.contains(f))
}

/// One resolution returned by a [`Symbolizer`] for a given `(image,
/// offset)` pair. A single address may resolve to several of these due to
/// inlining; the innermost (first) one is what the parser uses.
#[derive(Debug, Clone)]
pub struct SymbolizedFrame {
    pub function: Option<String>,
}

/// Narrow contract to an external symbolizer subprocess (`addr_send` /
/// `addr_read` / `addr_free` in the spec). Implementations are free to be
/// a long-lived child process reached over stdin/stdout; callers serialize
/// their own access since the symbolizer handle is effectively a
/// singleton (see the concurrency notes in the spec).
pub trait Symbolizer {
    /// Resolve `offset` within `image`, returning innermost-first frames.
    /// An empty `Vec` means the symbolizer couldn't resolve anything.
    fn resolve(&mut self, image: &Path, offset: u64) -> Result<Vec<SymbolizedFrame>, CoreError>;
}

/// `(symbol?, module?, offset)` identifying the innermost non-blacklisted
/// frame of a crash. An owned value type per Design Note §9, replacing the
/// manual `ck_strdup`/`ck_free` dance the original performs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrashSite {
    pub symbol: Option<String>,
    pub module: Option<PathBuf>,
    pub offset: u64,
}

impl CrashSite {
    pub fn is_empty(&self) -> bool {
        self.module.is_none()
    }
}

const MIN_LINE_LEN: usize = 1;
const PATH_FIELD_MARKER: &str = " (";
const ADDR_FIELD_MARKER: &str = "+0x";

/// Extract `(image_path, offset)` from one un-symbolized ASan frame line,
/// e.g. `#3 0x558a19d4f2b1 (/home/user/target+0x4f2b1)`. Returns `None`
/// for lines missing either field, in line with the grammar in SPEC_FULL.
fn parse_frame_line(line: &str) -> Option<(&str, u64)> {
    if line.len() <= MIN_LINE_LEN {
        return None;
    }

    let path_start = line.find(PATH_FIELD_MARKER)? + PATH_FIELD_MARKER.len();
    let rest = &line[path_start..];

    let addr_marker_pos = rest.find(ADDR_FIELD_MARKER)?;
    let image_path = &rest[..addr_marker_pos];
    if image_path.is_empty() {
        return None;
    }

    let addr_start = addr_marker_pos + ADDR_FIELD_MARKER.len();
    let addr_str = &rest[addr_start..];
    let addr_str = addr_str.trim_end_matches(')');
    let offset = u64::from_str_radix(addr_str, 16).ok()?;

    Some((image_path, offset))
}

/// Read the call-stack dump file (if any) and walk it top (innermost) to
/// bottom, applying the module and function blacklists as described in
/// §4.C, to identify the crash site.
///
/// A blacklisted frame poisons (discards) any candidate accumulated so
/// far -- later, still-innermost-relative, non-blacklisted frames are
/// sticky, but a blacklisted frame encountered afterwards in iteration
/// (i.e. further out on the stack) resets the candidate to empty. This
/// implements "the crash site is the innermost frame such that it and
/// every frame above it are non-blacklisted" by treating a blacklist hit
/// as evidence the stack is still in sanitizer territory.
///
/// If `flush` is set, the file is truncated to a single empty line once
/// parsing completes (successfully or not), so the next crash writes into
/// a clean file.
pub fn find_crash_site(
    callstack_path: Option<&Path>,
    filter: &ModuleFilter,
    symbolizer: &mut dyn Symbolizer,
    flush: bool,
) -> CrashSite {
    let Some(path) = callstack_path else {
        return CrashSite::default();
    };

    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to open call-stack file {:?}: {}", path, e);
            return CrashSite::default();
        }
    };

    let mut contents = String::new();
    if let Err(e) = file.read_to_string(&mut contents) {
        warn!("failed to read call-stack file {:?}: {}", path, e);
        return CrashSite::default();
    }

    let mut candidate = CrashSite::default();

    for line in contents.lines() {
        let Some((image_path, offset)) = parse_frame_line(line) else {
            continue;
        };
        let image = Path::new(image_path);

        if filter.is_blocked(image) {
            candidate = CrashSite::default();
            continue;
        }

        let frames = match symbolizer.resolve(image, offset) {
            Ok(frames) => frames,
            Err(e) => {
                warn!("symbolizer failed for {:?}+{:#x}: {}", image, offset, e);
                Vec::new()
            }
        };

        match frames.first() {
            Some(SymbolizedFrame {
                function: Some(func),
            }) => {
                if function_is_blocked(func) {
                    candidate = CrashSite::default();
                } else if candidate.module.is_none() {
                    candidate = CrashSite {
                        symbol: Some(func.clone()),
                        module: Some(image.to_path_buf()),
                        offset,
                    };
                }
            }
            // Symbolizer resolved the module but couldn't name a function
            // -- still very likely the crash site, just unsymbolizable.
            Some(SymbolizedFrame { function: None }) | None => {
                if candidate.module.is_none() {
                    candidate = CrashSite {
                        symbol: None,
                        module: Some(image.to_path_buf()),
                        offset,
                    };
                }
            }
        }
    }

    if flush {
        if let Err(e) = flush_callstack_file(&mut file) {
            warn!("failed to flush call-stack file {:?}: {}", path, e);
        }
    }

    candidate
}

fn flush_callstack_file(file: &mut std::fs::File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(b"\n")
}
