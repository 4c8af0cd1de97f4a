//! The read-only description of one coupling invocation.
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ablation::AblationChoice;
use crate::bundle::GridPool;
use crate::dataset::{GridDescriptor, GriddedDataset};
use crate::exporter::SolidEarthSettings;
use crate::gridops::TimeAxis;
use crate::transform::TransformChoice;

/// Names of the climate fields in the atmosphere model's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AtmosphereVariables {
    #[serde(default = "default_atmosphere_temperature")]
    pub temperature: String,
    #[serde(default = "default_atmosphere_precipitation")]
    pub precipitation: String,
}

impl Default for AtmosphereVariables {
    fn default() -> Self {
        Self {
            temperature: default_atmosphere_temperature(),
            precipitation: default_atmosphere_precipitation(),
        }
    }
}

fn default_atmosphere_temperature() -> String {
    "temp2".to_string()
}

fn default_atmosphere_precipitation() -> String {
    "aprt".to_string()
}

/// A variable name and unit a consumer expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableTarget {
    pub name: String,
    pub units: String,
}

impl VariableTarget {
    pub fn new(name: &str, units: &str) -> Self {
        Self { name: name.to_string(), units: units.to_string() }
    }
}

/// Canonical names and units of the climate fields as the ice model reads them.
///
/// Atmosphere variables are renamed to these names before any numeric step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IceVariables {
    #[serde(default = "default_ice_temperature")]
    pub temperature: VariableTarget,
    #[serde(default = "default_ice_precipitation")]
    pub precipitation: VariableTarget,
}

impl Default for IceVariables {
    fn default() -> Self {
        Self {
            temperature: default_ice_temperature(),
            precipitation: default_ice_precipitation(),
        }
    }
}

fn default_ice_temperature() -> VariableTarget {
    VariableTarget::new("air_temp", "K")
}

fn default_ice_precipitation() -> VariableTarget {
    VariableTarget::new("precipitation", "kg m-2 year-1")
}

/// What the ice model needs from the host to run. The coupler only uses the
/// executable name (to find pooled grid files); the counts are carried for the
/// job launcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComputeRequirements {
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default)]
    pub num_tasks: Option<u32>,
    #[serde(default)]
    pub num_threads: Option<u32>,
}

impl Default for ComputeRequirements {
    fn default() -> Self {
        Self { executable: default_executable(), num_tasks: None, num_threads: None }
    }
}

fn default_executable() -> String {
    "pismr".to_string()
}

/// Everything one coupling or export run needs to know. Built once from the
/// configuration and never modified afterwards.
#[derive(Debug, Clone)]
pub struct CouplingContext {
    /// Name of the ice model, e.g. "pism"
    pub model_name: String,
    /// Component type tag used to namespace output files, e.g. "ice"
    pub model_type: String,
    /// Model date of this coupling step, used to label files
    pub date: NaiveDate,
    pub transform: TransformChoice,
    pub ablation: AblationChoice,
    /// Ice model geometry on the high resolution grid
    pub ice: GriddedDataset,
    /// Grid the climate fields must end up on
    pub ice_grid: GridDescriptor,
    pub atmosphere: GriddedDataset,
    /// Surface elevation the atmosphere model used, on its own grid
    pub lo_res_elevation: GriddedDataset,
    pub atmosphere_variables: AtmosphereVariables,
    pub ice_variables: IceVariables,
    pub time_axis: TimeAxis,
    pub output_dir: PathBuf,
    /// Directory in which each run creates (and later removes) its own scratch directory
    pub scratch_parent: PathBuf,
    pub grid_pool: GridPool,
    pub compute: ComputeRequirements,
    pub solid_earth: SolidEarthSettings,
}

impl CouplingContext {
    /// Date label used in file names, e.g. "20000101"
    pub fn label(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }

    pub(crate) fn scratch_prefix(&self) -> String {
        format!("{}_coupling_", self.model_type)
    }

    pub fn forcing_file_name(&self) -> String {
        format!("{}_forcing_{}.nc", self.model_type, self.label())
    }

    /// Where the prepared ice forcing file is committed to.
    pub fn forcing_destination(&self) -> PathBuf {
        self.output_dir.join(self.forcing_file_name())
    }

    /// Where the solid earth export bundle goes, separate from the forcing bundle.
    pub fn solid_earth_output_dir(&self) -> PathBuf {
        self.solid_earth.output_dir.clone()
            .unwrap_or_else(|| self.output_dir.join("solid_earth"))
    }

    /// The pooled grid description file for the ice model's domain and resolution.
    pub fn pooled_grid_file(&self) -> PathBuf {
        self.grid_pool.grid_file(&self.compute.executable)
    }
}
