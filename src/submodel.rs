//! The surface energy balance submodel run by the energy balance ablation scheme.
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use error_stack::ResultExt;

use crate::dataset::GriddedDataset;
use crate::error::{CouplingError, CouplingResult};
use crate::tools::run_tool;

/// An external surface model that turns near-surface temperature and
/// precipitation into surface mass balance and surface temperature.
pub trait SurfaceSubmodel {
    /// Run the submodel on `forcing`, writing its output to `output`. `workdir`
    /// is a scratch directory the submodel may litter.
    fn run(&self, forcing: &GriddedDataset, output: &Path, workdir: &Path) -> CouplingResult<GriddedDataset>;
}

/// A submodel executable called as `<program> <args...> <forcing> <output>`, e.g. SEMIC.
#[derive(Debug, Clone)]
pub struct SemicExecutable {
    program: PathBuf,
    args: Vec<String>,
}

impl SemicExecutable {
    pub fn new<P: Into<PathBuf>>(program: P, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl SurfaceSubmodel for SemicExecutable {
    fn run(&self, forcing: &GriddedDataset, output: &Path, workdir: &Path) -> CouplingResult<GriddedDataset> {
        let mut args: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        args.push(forcing.path().into());
        args.push(output.into());

        run_tool(&self.program, &args, Some(workdir))
            .change_context_lazy(|| CouplingError::SubmodelExecution(self.program.display().to_string()))?;

        if !output.exists() {
            error_stack::bail!(CouplingError::SubmodelExecution(
                format!("{} exited successfully but wrote no output to {}", self.program.display(), output.display())
            ));
        }
        Ok(GriddedDataset::new(output))
    }
}
