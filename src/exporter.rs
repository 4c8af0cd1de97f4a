//! Handing ice model output to a solid earth model.
use std::path::PathBuf;

use error_stack::ResultExt;
use serde::{Deserialize, Serialize};

use crate::bundle::{BundleBuilder, ForcingBundle, VariableDescription};
use crate::context::CouplingContext;
use crate::dataset::GriddedDataset;
use crate::error::{CouplingError, CouplingResult};
use crate::gridops::GridOperations;
use crate::scratch::ScratchArea;

/// Which timestep of the ice model output is exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestepPolicy {
    /// The final timestep
    #[default]
    Last,
    /// A zero-based index from the start
    Index(usize),
    /// A zero-based offset from the end, `from_end = 0` being the last timestep
    FromEnd(usize),
}

impl TimestepPolicy {
    /// The zero-based timestep index to select from a time axis of length `ntime`.
    pub fn resolve(&self, ntime: usize) -> Result<usize, CouplingError> {
        if ntime == 0 {
            return Err(CouplingError::Timestep("the dataset has no timesteps".to_string()));
        }
        let index = match *self {
            TimestepPolicy::Last => Some(ntime - 1),
            TimestepPolicy::Index(i) => (i < ntime).then_some(i),
            TimestepPolicy::FromEnd(n) => ntime.checked_sub(n + 1),
        };
        index.ok_or_else(|| CouplingError::Timestep(format!("{self:?} is out of range for {ntime} timesteps")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolidEarthSettings {
    #[serde(default)]
    pub timestep: TimestepPolicy,
    /// The ice thickness variable to export
    #[serde(default = "default_thickness_variable")]
    pub variable: String,
    /// Units written to the variables file if the variable has no units attribute
    #[serde(default = "default_thickness_units")]
    pub default_units: String,
    /// Where the export bundle is committed. Defaults to a `solid_earth`
    /// subdirectory of the coupling output directory, so the export's grid and
    /// variable files never replace the ice forcing ones.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for SolidEarthSettings {
    fn default() -> Self {
        Self {
            timestep: TimestepPolicy::default(),
            variable: default_thickness_variable(),
            default_units: default_thickness_units(),
            output_dir: None,
        }
    }
}

fn default_thickness_variable() -> String {
    "thk".to_string()
}

fn default_thickness_units() -> String {
    "m".to_string()
}

pub struct IceToEarthExporter<'a> {
    grid: &'a dyn GridOperations,
}

impl<'a> IceToEarthExporter<'a> {
    pub fn new(grid: &'a dyn GridOperations) -> Self {
        Self { grid }
    }

    /// Export one timestep of ice thickness from `ice_output` as
    /// `<type>_file_for_solid_earth.nc` in the context's solid earth output directory.
    pub fn export(&self, ice_output: &GriddedDataset, context: &CouplingContext) -> CouplingResult<ForcingBundle> {
        let mut scratch = ScratchArea::create(&context.scratch_parent, &format!("{}_solid_earth_", context.model_type))?;
        let scoped_grid = self.grid.in_workdir(scratch.path());
        let grid = scoped_grid.as_deref().unwrap_or(self.grid);
        let outcome = Self::export_in(grid, ice_output, context, &mut scratch);
        for e in scratch.cleanup() {
            log::warn!("{e}");
        }
        outcome
    }

    fn export_in(grid: &dyn GridOperations, ice_output: &GriddedDataset, context: &CouplingContext, scratch: &mut ScratchArea) -> CouplingResult<ForcingBundle> {
        let settings = &context.solid_earth;
        let info = grid.describe(ice_output)?;
        if !info.has_variable(&settings.variable) {
            error_stack::bail!(CouplingError::MissingVariable {
                variable: settings.variable.clone(),
                path: ice_output.path().to_path_buf(),
            });
        }
        let index = settings.timestep.resolve(info.ntime)
            .attach_printable_lazy(|| format!("Exporting from {}", ice_output.path().display()))?;
        log::info!("Exporting {} at timestep {index} of {}", settings.variable, info.ntime);

        let selected = grid.select_timestep(index, ice_output, &scratch.register("solid_earth_timestep.nc"))?;
        let thickness = grid.select_variable(&settings.variable, &selected, &scratch.register("solid_earth_thickness.nc"))?;

        let units = info.units(&settings.variable).unwrap_or(&settings.default_units);
        let tag = &context.model_type;
        let variables = [VariableDescription::new(format!("{tag}_thickness"), settings.variable.as_str(), units)];
        let mut builder = BundleBuilder::new(&context.solid_earth_output_dir(), tag, scratch, &context.pooled_grid_file(), &variables)?;
        builder.add_dataset(&thickness, &format!("{tag}_file_for_solid_earth.nc"));
        builder.commit(None)
    }
}
