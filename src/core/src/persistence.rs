//! Persistence (§4.G): atomic bitmap dump, and the crash README append.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::callstack::CrashSite;
use crate::error::CoreError;

const NUL_TOKEN: &str = "-";

/// Atomically overwrite `out_dir/fuzz_bitmap` with `virgin_bits` if the
/// dirty flag is set, by writing to a sibling temp file and renaming it
/// into place -- survives a crash mid-write, unlike a raw truncate.
/// Clears `*dirty` on success.
pub fn dump_bitmap(out_dir: &Path, virgin_bits: &[u8], dirty: &mut bool) -> Result<(), CoreError> {
    if !*dirty {
        return Ok(());
    }

    let fname = out_dir.join("fuzz_bitmap");
    let tmp_fname = out_dir.join("fuzz_bitmap.tmp");

    let mut f = File::create(&tmp_fname).map_err(|e| CoreError::CreateFile {
        path: tmp_fname.clone(),
        source: e,
    })?;
    f.write_all(virgin_bits).map_err(|e| CoreError::CreateFile {
        path: tmp_fname.clone(),
        source: e,
    })?;
    f.sync_all().ok();
    drop(f);

    fs::rename(&tmp_fname, &fname).map_err(|e| CoreError::CreateFile {
        path: fname.clone(),
        source: e,
    })?;

    *dirty = false;
    info!("bitmap dumped to {:?}", fname);
    Ok(())
}

/// One row of detail this session wants recorded for a kept crash.
pub struct CrashDetail<'a> {
    pub fname: &'a Path,
    pub bitmap_size: u32,
    pub actual_counts: u64,
    pub site: Option<&'a CrashSite>,
    pub want_addr: bool,
    pub want_func: bool,
}

/// Append one line to `out_dir/crashes/README.txt` describing a kept
/// crash. Failing to open the file for append is impolite-silent (§7):
/// logged and swallowed rather than propagated, since losing one
/// diagnostic line shouldn't abort a fuzzing session.
pub fn write_crash_detail(out_dir: &Path, detail: &CrashDetail) {
    let fname = out_dir.join("crashes").join("README.txt");

    let mut f = match OpenOptions::new().create(true).append(true).open(&fname) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to open {:?} for append: {}", fname, e);
            return;
        }
    };

    let mut line = format!(
        "@FILE:{}; @SIZE:{:x}; @HITS:{:x}; ",
        detail.fname.display(),
        detail.bitmap_size,
        detail.actual_counts
    );

    if detail.want_addr {
        match detail.site.and_then(|s| s.module.as_ref()) {
            Some(module) => {
                let offset = detail.site.map(|s| s.offset).unwrap_or(0);
                line.push_str(&format!("@ADDR:{}+0x{:x}; ", module.display(), offset));
            }
            None => line.push_str(&format!("@ADDR:{}; ", NUL_TOKEN)),
        }
    }

    if detail.want_func {
        match detail.site.and_then(|s| s.symbol.as_deref()) {
            Some(symbol) => line.push_str(&format!("@FUNC:{}; ", symbol)),
            None => line.push_str(&format!("@FUNC:{}; ", NUL_TOKEN)),
        }
    }

    line.push('\n');

    if let Err(e) = f.write_all(line.as_bytes()) {
        warn!("failed to append to {:?}: {}", fname, e);
    }
}

/// Ensure `out_dir/{queue,hangs,crashes}` exist. Fatal on failure -- if we
/// can't create these, nothing downstream can work either.
pub fn ensure_output_dirs(out_dir: &Path) -> Result<(), CoreError> {
    for sub in ["queue", "hangs", "crashes"] {
        let dir = out_dir.join(sub);
        fs::create_dir_all(&dir).map_err(|e| CoreError::CreateFile {
            path: dir,
            source: e,
        })?;
    }
    Ok(())
}

/// Write `bytes` to `dir/id:NNNNNN,<desc>` (or, when `desc` is `None` --
/// i.e. `SIMPLE_FILES` mode -- the bare `dir/id_NNNNNN`) and return the
/// path. Used for both queue entries and hangs -- `PATH_MAX`-style length
/// limits are the caller's concern via
/// [`crate::describe::build_description`]'s `max_description_len`.
pub fn write_testcase(
    dir: &Path,
    id: u64,
    desc: Option<&str>,
    bytes: &[u8],
) -> Result<PathBuf, CoreError> {
    let fname = match desc {
        Some(desc) => dir.join(format!("id:{:06},{}", id, desc)),
        None => dir.join(format!("id_{:06}", id)),
    };
    let mut f = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&fname)
        .map_err(|e| CoreError::CreateFile {
            path: fname.clone(),
            source: e,
        })?;
    f.write_all(bytes).map_err(|e| CoreError::CreateFile {
        path: fname.clone(),
        source: e,
    })?;
    Ok(fname)
}
