//! Scoped write-out resource ownership. `WriteoutMedium` owns a
//! `tempfile::TempDir` for intermediate-tier scratch space and a registry of
//! closers invoked on drop, guaranteeing release on every exit path —
//! following `fff-poc`'s file-writer context pattern of bundling all
//! mutable write-path state behind one struct that owns its `Drop`-cleaned
//! resources.

use std::path::{Path, PathBuf};

use segment_core::errors::Result;
use tempfile::TempDir;

/// Registers a resource that must be released when the owning medium is
/// dropped, regardless of whether the merge that created it succeeded.
pub struct WriteoutMedium {
    scratch: TempDir,
    closers: Vec<Box<dyn FnOnce()>>,
}

impl WriteoutMedium {
    pub fn new() -> Result<Self> {
        Ok(Self {
            scratch: tempfile::tempdir()?,
            closers: Vec::new(),
        })
    }

    /// A fresh path under this medium's scratch directory. The caller
    /// creates whatever file or directory it needs there.
    pub fn scratch_path(&self, name: &str) -> PathBuf {
        self.scratch.path().join(name)
    }

    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// Registers a closure to run exactly once, when this medium is
    /// dropped. Closers run in reverse registration order, mirroring
    /// nested-resource teardown.
    pub fn register_closer(&mut self, closer: Box<dyn FnOnce()>) {
        self.closers.push(closer);
    }
}

impl Drop for WriteoutMedium {
    fn drop(&mut self) {
        while let Some(closer) = self.closers.pop() {
            closer();
        }
    }
}
