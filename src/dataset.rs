//! Handles to file-backed gridded datasets.
//!
//! A [`GriddedDataset`] never changes once created: every grid operation or
//! attribute edit writes a new file and returns a new handle for it.
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// An opaque handle to a multi-variable, multi-timestep gridded dataset on disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GriddedDataset {
    path: PathBuf,
}

impl GriddedDataset {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Use this dataset's horizontal grid as a remapping target.
    pub fn grid(&self) -> GridDescriptor {
        GridDescriptor::new(&self.path)
    }
}

/// A target grid for resampling, interpolation or remapping.
///
/// This may point to a grid description file or to any dataset defined on
/// the target grid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GridDescriptor {
    path: PathBuf,
}

impl GridDescriptor {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Metadata of one variable in a dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableInfo {
    /// The `units` attribute, if the variable has one.
    pub units: Option<String>,
}

/// The variables and time axis length of a dataset, as reported by the grid operations tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetInfo {
    pub variables: IndexMap<String, VariableInfo>,
    pub ntime: usize,
}

impl DatasetInfo {
    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn has_all<'a, I: IntoIterator<Item = &'a str>>(&self, names: I) -> bool {
        names.into_iter().all(|n| self.has_variable(n))
    }

    /// Units of `name`; `None` if either the variable or its units attribute is missing.
    pub fn units(&self, name: &str) -> Option<&str> {
        self.variables.get(name).and_then(|v| v.units.as_deref())
    }
}
