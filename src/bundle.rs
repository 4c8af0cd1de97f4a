//! Assembling and committing the files handed to a consuming model.
//!
//! Every bundle consists of one or more data files plus two sidecars keyed by
//! the model type tag: `<type>_grid`, naming the pooled grid description the
//! data is defined on, and `<type>_variables.dat`, listing the variable name
//! and units of each field the consumer reads.
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;
use serde::{Deserialize, Serialize};

use crate::ablation::ForcingSpec;
use crate::dataset::GriddedDataset;
use crate::error::{CouplingError, CouplingResult};
use crate::managed_file::ManagedFile;
use crate::scratch::ScratchArea;

/// Location of the pre-generated grid description files shared by all runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GridPool {
    pub directory: PathBuf,
    /// Model domain, e.g. "greenland"
    pub domain: String,
    /// Lateral resolution, e.g. "20km"
    pub lateral_resolution: String,
}

impl GridPool {
    /// The grid file for `executable` on this domain and resolution,
    /// `<directory>/<executable>_<domain>_<resolution>`.
    pub fn grid_file(&self, executable: &str) -> PathBuf {
        self.directory.join(format!("{executable}_{}_{}", self.domain, self.lateral_resolution))
    }
}

/// One entry of a `<type>_variables.dat` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariableDescription {
    /// Key the consumer looks the variable up by, e.g. "ice_thickness"
    pub key: String,
    pub name: String,
    pub units: String,
}

impl VariableDescription {
    pub fn new<K: Into<String>, N: Into<String>, U: Into<String>>(key: K, name: N, units: U) -> Self {
        Self { key: key.into(), name: name.into(), units: units.into() }
    }
}

/// Render variable descriptions as `<key>_variablename=<name>` and
/// `<key>_units=<units>` lines, in the order given.
pub fn format_variable_descriptions(variables: &[VariableDescription]) -> String {
    let mut s = String::new();
    for var in variables {
        // writing to a String cannot fail
        let _ = writeln!(s, "{}_variablename={}", var.key, var.name);
        let _ = writeln!(s, "{}_units={}", var.key, var.units);
    }
    s
}

/// The committed result of a coupling or export run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForcingBundle {
    /// The committed data files
    pub files: Vec<PathBuf>,
    pub grid_description: PathBuf,
    pub variable_description: PathBuf,
    /// How the ice model must be told to read the forcing; absent for solid earth bundles
    pub spec: Option<ForcingSpec>,
}

/// Stages a bundle in a scratch area and commits it to the output directory.
#[derive(Debug)]
pub struct BundleBuilder {
    output_dir: PathBuf,
    data: Vec<ManagedFile>,
    grid: ManagedFile,
    variables: ManagedFile,
}

impl BundleBuilder {
    /// Write both sidecar files for `model_type` into `scratch`.
    pub fn new(
        output_dir: &Path,
        model_type: &str,
        scratch: &mut ScratchArea,
        pool_file: &Path,
        variables: &[VariableDescription],
    ) -> CouplingResult<Self> {
        let grid_name = format!("{model_type}_grid");
        let grid_path = scratch.register(&grid_name);
        std::fs::write(&grid_path, format!("{}\n", pool_file.display()))
            .change_context_lazy(|| CouplingError::Write(grid_path.clone()))?;

        let vars_name = format!("{model_type}_variables.dat");
        let vars_path = scratch.register(&vars_name);
        std::fs::write(&vars_path, format_variable_descriptions(variables))
            .change_context_lazy(|| CouplingError::Write(vars_path.clone()))?;

        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            data: vec![],
            grid: ManagedFile::new(grid_path, output_dir.join(grid_name)),
            variables: ManagedFile::new(vars_path, output_dir.join(vars_name)),
        })
    }

    /// Add a data file, to be committed as `file_name` in the output directory.
    pub fn add_dataset(&mut self, dataset: &GriddedDataset, file_name: &str) -> &mut Self {
        self.data.push(ManagedFile::from_dataset(dataset, self.output_dir.join(file_name)));
        self
    }

    /// Commit every file of the bundle. If any commit fails, the files of
    /// this bundle committed so far are removed again, files they replaced
    /// are restored, and the output directory is removed if this call created it.
    pub fn commit(mut self, spec: Option<ForcingSpec>) -> CouplingResult<ForcingBundle> {
        let created_dir = !self.output_dir.exists();
        std::fs::create_dir_all(&self.output_dir)
            .change_context_lazy(|| CouplingError::Write(self.output_dir.clone()))?;

        if let Err(e) = self.commit_all() {
            self.roll_back(created_dir);
            return Err(e);
        }
        for file in self.files_mut() {
            if let Err(e) = file.discard_previous() {
                log::warn!("{e}");
            }
        }

        log::info!("Committed {} files to {}", self.data.len() + 2, self.output_dir.display());
        Ok(ForcingBundle {
            files: self.data.iter().map(|f| f.destination().to_path_buf()).collect(),
            grid_description: self.grid.destination().to_path_buf(),
            variable_description: self.variables.destination().to_path_buf(),
            spec,
        })
    }

    fn files_mut(&mut self) -> impl Iterator<Item = &mut ManagedFile> {
        self.data.iter_mut().chain([&mut self.grid, &mut self.variables])
    }

    fn commit_all(&mut self) -> CouplingResult<()> {
        for file in self.files_mut() {
            file.commit()?;
        }
        Ok(())
    }

    fn roll_back(&mut self, remove_dir: bool) {
        for file in self.files_mut() {
            if let Err(e) = file.revert() {
                log::warn!("{e}");
            }
        }
        if remove_dir {
            if let Err(e) = std::fs::remove_dir(&self.output_dir) {
                log::warn!("Could not remove output directory {}: {e}", self.output_dir.display());
            }
        }
    }
}
