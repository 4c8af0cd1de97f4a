//! Editing variable names and unit metadata.
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;

use crate::dataset::GriddedDataset;
use crate::error::{CouplingError, CouplingResult};
use crate::tools::run_tool;

/// Metadata edits on a gridded dataset. Like [`crate::gridops::GridOperations`],
/// edits are written to a new file and the input is left untouched.
pub trait AttributeEditor {
    fn rename_variable(&self, old: &str, new: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset>;

    /// Overwrite (or create) the `units` attribute of `variable`.
    fn set_unit(&self, variable: &str, unit: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset>;
}

/// [`AttributeEditor`] backed by the NCO `ncrename` and `ncatted` programs.
#[derive(Debug, Clone, Default)]
pub struct Nco {
    /// Directory containing the NCO executables; `None` searches `PATH`.
    bin_dir: Option<PathBuf>,
}

impl Nco {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    fn program(&self, name: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }
}

impl AttributeEditor for Nco {
    fn rename_variable(&self, old: &str, new: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        let args = rename_args(old, new, dataset.path(), output);
        run_tool(&self.program("ncrename"), &args, None)
            .change_context_lazy(|| CouplingError::AttributeEdit(format!("rename {old} to {new}")))?;
        Ok(GriddedDataset::new(output))
    }

    fn set_unit(&self, variable: &str, unit: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        let args = set_unit_args(variable, unit, dataset.path(), output);
        run_tool(&self.program("ncatted"), &args, None)
            .change_context_lazy(|| CouplingError::AttributeEdit(format!("set units of {variable} to '{unit}'")))?;
        Ok(GriddedDataset::new(output))
    }
}

fn rename_args(old: &str, new: &str, input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-O".into(),
        "-v".into(),
        format!("{old},{new}").into(),
        input.as_os_str().to_owned(),
        output.as_os_str().to_owned(),
    ]
}

fn set_unit_args(variable: &str, unit: &str, input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-O".into(),
        "-a".into(),
        format!("units,{variable},o,c,{unit}").into(),
        input.as_os_str().to_owned(),
        output.as_os_str().to_owned(),
    ]
}
