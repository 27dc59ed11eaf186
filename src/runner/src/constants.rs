/// Shared memory region size the target's coverage instrumentation writes
/// into, and the default [`igorfuzz_core::config::Config::map_size`].
pub const AFL_MAP_SIZE: usize = 1 << 16;

/// Env var naming the shared memory segment id a freshly-spawned target
/// should `shmat` onto for its edge-coverage trace, matching upstream
/// AFL++'s `__AFL_SHM_ID` convention.
pub const AFL_SHM_ID_VAR: &str = "__AFL_SHM_ID";

/// Env var the `igorfuzz-shim`-linked target reads to find where to dump
/// its raw call stack on an ASan error.
pub const CALLSTACK_FILEPATH_VAR: &str = "__AFL_IGORFUZZ_CALLSTACK_FILEPATH";
