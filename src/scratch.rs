//! Per-run scratch space for intermediate files.
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use tempfile::TempDir;

use crate::error::{CleanupError, CouplingError, CouplingResult};

/// A uniquely named scratch directory owned by one coupling or export run.
///
/// Every intermediate file a run produces is registered here. [`ScratchArea::cleanup`]
/// removes the registered files and then the directory itself; if the area is
/// dropped without being cleaned up (e.g. during a panic), the directory is
/// still removed.
#[derive(Debug)]
pub struct ScratchArea {
    dir: Option<TempDir>,
    registered: Vec<PathBuf>,
}

impl ScratchArea {
    /// Create a new scratch directory inside `parent`, creating `parent` if needed.
    pub fn create(parent: &Path, prefix: &str) -> CouplingResult<Self> {
        std::fs::create_dir_all(parent)
            .change_context_lazy(|| CouplingError::Scratch(parent.to_path_buf()))?;
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent)
            .change_context_lazy(|| CouplingError::Scratch(parent.to_path_buf()))?;
        log::debug!("Created scratch area {}", dir.path().display());
        Ok(Self { dir: Some(dir), registered: vec![] })
    }

    pub fn path(&self) -> &Path {
        // `dir` is only taken by cleanup/drop, which consume the area
        self.dir.as_ref().map(|d| d.path()).unwrap_or_else(|| Path::new(""))
    }

    /// Reserve a file name in the scratch area and register it for removal.
    pub fn register(&mut self, file_name: &str) -> PathBuf {
        let path = self.path().join(file_name);
        if !self.registered.contains(&path) {
            self.registered.push(path.clone());
        }
        path
    }

    pub fn registered(&self) -> &[PathBuf] {
        &self.registered
    }

    /// Remove every registered artifact, then the scratch directory.
    ///
    /// Registered names that were never written are skipped. Failures do not
    /// stop the cleanup; they are returned so the caller can report them
    /// without masking the outcome of the run.
    pub fn cleanup(mut self) -> Vec<CleanupError> {
        self.drain()
    }

    fn drain(&mut self) -> Vec<CleanupError> {
        let mut errors = vec![];
        for path in self.registered.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => {},
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
                Err(e) => errors.push(CleanupError::new(path, e)),
            }
        }

        if let Some(dir) = self.dir.take() {
            let dir_path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                errors.push(CleanupError::new(dir_path, e));
            } else {
                log::debug!("Removed scratch area {}", dir_path.display());
            }
        }
        errors
    }
}

impl Drop for ScratchArea {
    fn drop(&mut self) {
        for e in self.drain() {
            log::warn!("{e}");
        }
    }
}
