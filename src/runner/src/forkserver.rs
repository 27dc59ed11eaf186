//! A target executor backed by a `shmat`-ed shared-memory trace map,
//! grounded in `danobi-btrfs-fuzz`'s own `forkserver.rs`: same
//! `SharedMemPtr`-style ownership of the coverage buffer, same reliance on
//! `AFL_MAP_SIZE` and a `shmat`/`shmdt` pair, just observed from the
//! controlling side instead of the target's persistent-mode stub. A fresh
//! process is spawned per execution rather than reusing one persistent
//! forkserver child -- `igorfuzz-runner` exists to prove the
//! [`igorfuzz_core::queue::Executor`] trait is wireable to something real,
//! not to reimplement AFL++'s persistent-mode protocol byte for byte.

use std::convert::TryInto;
use std::ffi::c_void;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::slice;
use std::time::Duration;

use anyhow::{bail, Result as AnyResult};
use libc::{calloc, free, shmat, shmctl, shmdt, shmget, IPC_CREAT, IPC_PRIVATE, IPC_RMID};
use wait_timeout::ChildExt;

use igorfuzz_core::error::CoreError;
use igorfuzz_core::queue::{ExecOutcome, Executor, Fault};

use crate::constants::{AFL_SHM_ID_VAR, CALLSTACK_FILEPATH_VAR};

enum SharedMemPtr {
    /// Allocated via `shmget`/`shmat`; torn down with `shmdt` + `IPC_RMID`.
    Shm { ptr: *mut c_void, id: i32 },
    /// Fallback when `shmget` fails -- still lets standalone runs work.
    Anon(*mut c_void),
}

/// Spawns the target fresh for every input, feeding it via a temp file
/// path and reading its edge-coverage trace back out of shared memory.
pub struct ProcessExecutor {
    target: PathBuf,
    args: Vec<String>,
    map_size: usize,
    shared_mem: SharedMemPtr,
    input_path: PathBuf,
    callstack_path: PathBuf,
}

impl ProcessExecutor {
    pub fn new(target: PathBuf, args: Vec<String>, map_size: usize) -> AnyResult<Self> {
        let shared_mem = Self::alloc_shared_mem(map_size)?;

        Ok(Self {
            target,
            args,
            map_size,
            shared_mem,
            input_path: std::env::temp_dir().join(format!("igorfuzz-input-{}", std::process::id())),
            callstack_path: std::env::temp_dir()
                .join(format!("igorfuzz-callstack-{}", std::process::id())),
        })
    }

    fn alloc_shared_mem(map_size: usize) -> AnyResult<SharedMemPtr> {
        let id = unsafe { shmget(IPC_PRIVATE, map_size, IPC_CREAT | 0o600) };
        if id < 0 {
            let ptr = unsafe { calloc(map_size.try_into()?, 1) };
            if ptr.is_null() {
                bail!("failed to calloc() fallback edge buffer");
            }
            return Ok(SharedMemPtr::Anon(ptr));
        }

        let ptr = unsafe { shmat(id, std::ptr::null(), 0) };
        if ptr as isize == -1 {
            bail!("failed to shmat() edge buffer");
        }

        Ok(SharedMemPtr::Shm { ptr, id })
    }

    fn shmem(&self) -> &mut [u8] {
        let ptr = match self.shared_mem {
            SharedMemPtr::Shm { ptr, .. } => ptr,
            SharedMemPtr::Anon(ptr) => ptr,
        };
        unsafe { slice::from_raw_parts_mut(ptr as *mut u8, self.map_size) }
    }

    fn clear_shmem(&self) {
        for b in self.shmem().iter_mut() {
            *b = 0;
        }
    }
}

impl Drop for ProcessExecutor {
    fn drop(&mut self) {
        match self.shared_mem {
            SharedMemPtr::Shm { ptr, id } => unsafe {
                shmdt(ptr);
                shmctl(id, IPC_RMID, std::ptr::null_mut());
            },
            SharedMemPtr::Anon(ptr) => unsafe { free(ptr) },
        }
    }
}

impl Executor for ProcessExecutor {
    fn run(&mut self, input: &[u8], timeout: Duration) -> Result<ExecOutcome, CoreError> {
        fs::write(&self.input_path, input)?;
        let _ = fs::remove_file(&self.callstack_path);
        self.clear_shmem();

        let shm_id = match self.shared_mem {
            SharedMemPtr::Shm { id, .. } => id.to_string(),
            SharedMemPtr::Anon(_) => String::new(),
        };

        let mut child = Command::new(&self.target)
            .args(&self.args)
            .arg(&self.input_path)
            .env(AFL_SHM_ID_VAR, shm_id)
            .env(CALLSTACK_FILEPATH_VAR, &self.callstack_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| CoreError::ExecutorFailed(format!("failed to spawn target: {}", e)))?;

        let status = match child
            .wait_timeout(timeout)
            .map_err(|e| CoreError::ExecutorFailed(format!("waitpid failed: {}", e)))?
        {
            Some(status) => status,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Ok(ExecOutcome {
                    fault: Fault::Timeout,
                    trace: self.shmem().to_vec(),
                    callstack_path: None,
                });
            }
        };

        let callstack_path = if self.callstack_path.exists() {
            Some(self.callstack_path.clone())
        } else {
            None
        };

        let fault = if status.code().is_none() {
            // Terminated by a signal -- SIGSEGV/SIGABRT/etc from the target's
            // sanitizer runtime.
            Fault::Crash
        } else {
            Fault::Ok
        };

        Ok(ExecOutcome {
            fault,
            trace: self.shmem().to_vec(),
            callstack_path,
        })
    }
}
