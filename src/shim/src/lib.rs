//! Target-side ASan error hook. Linked into the fuzzed binary (preloaded or
//! statically linked), this overrides the sanitizer runtime's weak
//! `__asan_on_error` symbol so that every ASan report also gets dumped,
//! un-symbolized, to a file the fuzzer-side crash-site parser can read
//! back.
//!
//! See `__asan_on_error`'s doc comment in LLVM's
//! `compiler-rt/lib/asan/asan_report.cpp` for the weak symbol being
//! overridden, and `__sanitizer_print_stack_trace` in
//! `compiler-rt/include/sanitizer/common_interface_defs.h` for the
//! un-symbolized dump format this shim relies on.

use std::env;
use std::ffi::CString;
use std::os::raw::c_int;

/// Env var the fuzzer-side runner sets before launching the target, naming
/// the per-run file this shim should dump the raw call stack into.
const IGORFUZZ_CALLSTACK_ENV_FILEPATH: &str = "__AFL_IGORFUZZ_CALLSTACK_FILEPATH";

const OPEN_FLAGS: c_int = libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC;
const IGORFUZZ_CALLSTACK_DEFAULT_MODE: libc::mode_t = 0o644;

extern "C" {
    fn __sanitizer_set_report_fd(fd: *mut libc::c_void);
    fn __sanitizer_print_stack_trace();
}

/// Overrides the sanitizer runtime's weak no-op default. Called by ASan
/// immediately before it prints its own report, once per detected error.
#[no_mangle]
pub extern "C" fn __asan_on_error() {
    let path = match env::var(IGORFUZZ_CALLSTACK_ENV_FILEPATH) {
        Ok(p) if !p.is_empty() => p,
        _ => return,
    };

    let cpath = match CString::new(path) {
        Ok(c) => c,
        Err(_) => return,
    };

    let fd = unsafe { libc::open(cpath.as_ptr(), OPEN_FLAGS, IGORFUZZ_CALLSTACK_DEFAULT_MODE as c_int) };
    if fd < 0 {
        return;
    }

    unsafe {
        __sanitizer_set_report_fd(fd as *mut libc::c_void);
        __sanitizer_print_stack_trace();
        __sanitizer_set_report_fd(libc::STDERR_FILENO as *mut libc::c_void);
        libc::close(fd);
    }
}
