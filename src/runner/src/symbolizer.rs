//! External symbolizer subprocess client: the `addr_send`/`addr_read`
//! collaborator named (but left unimplemented) in §4.C/§9, backed here by
//! shelling out to `addr2line` per address rather than keeping a
//! long-lived child -- simple, and the core only calls this path once per
//! admitted crash, not once per execution.

use std::path::Path;
use std::process::Command;

use igorfuzz_core::callstack::{SymbolizedFrame, Symbolizer};
use igorfuzz_core::error::CoreError;

/// Shells out to `addr2line -f -C -e <image> <offset>` for each resolution.
pub struct Addr2LineSymbolizer {
    binary: String,
}

impl Addr2LineSymbolizer {
    pub fn new() -> Self {
        Self {
            binary: "addr2line".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for Addr2LineSymbolizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Symbolizer for Addr2LineSymbolizer {
    fn resolve(&mut self, image: &Path, offset: u64) -> Result<Vec<SymbolizedFrame>, CoreError> {
        let output = Command::new(&self.binary)
            .arg("-f")
            .arg("-C")
            .arg("-e")
            .arg(image)
            .arg(format!("0x{:x}", offset))
            .output()
            .map_err(|e| CoreError::SymbolizerFailed {
                image: image.to_path_buf(),
                offset,
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(CoreError::SymbolizerFailed {
                image: image.to_path_buf(),
                offset,
                reason: format!("exited with {:?}", output.status.code()),
            });
        }

        // addr2line -f prints the function name on the first line, the
        // file:line on the second. We only need the function name.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let function = stdout.lines().next().map(|s| s.trim().to_string()).filter(|s| {
            !s.is_empty() && s != "??"
        });

        Ok(vec![SymbolizedFrame { function }])
    }
}
