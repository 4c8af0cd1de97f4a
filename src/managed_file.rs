use std::path::{Path, PathBuf};

use error_stack::ResultExt;

use crate::dataset::GriddedDataset;
use crate::error::{CleanupError, CouplingError, CouplingResult};

/// A produced artifact bound to the place it must end up.
///
/// The source normally lives in a run's scratch area. Nothing is written to the
/// destination until [`ManagedFile::commit`], which copies to a hidden sibling
/// of the destination and renames it into place, so the destination either
/// does not exist or is complete. A file already at the destination is moved
/// aside first and put back by [`ManagedFile::revert`]. A file can be committed
/// once; a reverted file cannot be committed again.
#[derive(Debug)]
pub struct ManagedFile {
    source: PathBuf,
    destination: PathBuf,
    state: CommitState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum CommitState {
    Pending,
    /// `previous` is where the file found at the destination was moved to
    Committed { previous: Option<PathBuf> },
    Reverted,
}

impl ManagedFile {
    pub fn new<S: Into<PathBuf>, D: Into<PathBuf>>(source: S, destination: D) -> Self {
        Self { source: source.into(), destination: destination.into(), state: CommitState::Pending }
    }

    pub fn from_dataset<D: Into<PathBuf>>(dataset: &GriddedDataset, destination: D) -> Self {
        Self::new(dataset.path(), destination)
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.state, CommitState::Committed { .. })
    }

    /// Copy the source to the destination. Fails if already committed or reverted.
    pub fn commit(&mut self) -> CouplingResult<&Path> {
        if self.state != CommitState::Pending {
            error_stack::bail!(CouplingError::AlreadyCommitted {
                artifact: self.source.clone(),
                destination: self.destination.clone(),
            });
        }

        let partial = self.sibling_path("partial");
        let previous = self.destination.exists().then(|| self.sibling_path("previous"));
        let res = self.put_in_place(&partial, previous.as_deref());
        if let Err(e) = res {
            // don't leave a half-written sibling behind
            let _ = std::fs::remove_file(&partial);
            return Err(e).change_context_lazy(|| CouplingError::Commit {
                artifact: self.source.clone(),
                destination: self.destination.clone(),
            });
        }

        log::debug!("Committed {} to {}", self.source.display(), self.destination.display());
        self.state = CommitState::Committed { previous };
        Ok(&self.destination)
    }

    fn put_in_place(&self, partial: &Path, previous: Option<&Path>) -> std::io::Result<()> {
        std::fs::copy(&self.source, partial)?;
        if let Some(previous) = previous {
            std::fs::rename(&self.destination, previous)?;
        }
        let res = std::fs::rename(partial, &self.destination);
        if let (Err(_), Some(previous)) = (&res, previous) {
            let _ = std::fs::rename(previous, &self.destination);
        }
        res
    }

    /// Remove the committed destination again, e.g. when a later file of the
    /// same bundle failed to commit, and put back the file it replaced. Does
    /// nothing if not committed.
    pub fn revert(&mut self) -> Result<(), CleanupError> {
        let CommitState::Committed { previous } = &self.state else {
            return Ok(());
        };
        match previous {
            Some(previous) => std::fs::rename(previous, &self.destination)
                .map_err(|e| CleanupError::new(previous.clone(), e))?,
            None => std::fs::remove_file(&self.destination)
                .map_err(|e| CleanupError::new(self.destination.clone(), e))?,
        }
        log::debug!("Reverted {}", self.destination.display());
        self.state = CommitState::Reverted;
        Ok(())
    }

    /// Delete the file this commit replaced, once the commit is known to stand.
    pub fn discard_previous(&mut self) -> Result<(), CleanupError> {
        if let CommitState::Committed { previous } = &mut self.state {
            if let Some(path) = previous.take() {
                std::fs::remove_file(&path).map_err(|e| CleanupError::new(path, e))?;
            }
        }
        Ok(())
    }

    fn sibling_path(&self, suffix: &str) -> PathBuf {
        let name = self.destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.destination.with_file_name(format!(".{name}.{suffix}"))
    }
}
