//! Configuration of a coupled ice sheet setup.
//!
//! The configuration is a [TOML](https://toml.io/en/) file. Any value can be
//! overridden from the environment with an `ICE_COUPLER_` prefixed variable,
//! using a double underscore to descend into sections, e.g.
//! `ICE_COUPLER_TOOLS__CDO=/opt/cdo/bin/cdo` replaces `cdo` in the `[tools]`
//! section.
//!
//! A minimal file lists the date, the output directory, the input datasets,
//! the target time axis, the grid pool and the two strategies:
//!
//! ```toml
//! date = "2000-01-01"
//! output_dir = "outdata/pism"
//!
//! [inputs]
//! ice = "restart/pism/pism_restart.nc"
//! atmosphere = "outdata/echam/echam_2000.nc"
//! lo_res_elevation = "input/echam/orography.nc"
//!
//! [transform]
//! kind = "downscale"
//! temperature = true
//! precipitation = true
//!
//! [ablation]
//! scheme = "pdd"
//!
//! [time_axis]
//! calendar = "365_day"
//! start_date = "2000-01-01"
//! increment = "1mon"
//!
//! [grid_pool]
//! directory = "/pool/pism/grids"
//! domain = "greenland"
//! lateral_resolution = "20km"
//! ```
//!
//! # Transform
//!
//! `kind` is one of `interpolate`, `remap` or `downscale`. `remap` takes an
//! optional `method` (`conservative`, the default, `nearest_neighbor` or
//! `bilinear`). `downscale` must state `temperature` and `precipitation`
//! explicitly; a field set to `false` is only interpolated. `lapse_rate`
//! (K/m, default 0.0065) and `precipitation_sensitivity` (1/K, default 0.07)
//! are optional and must not be negative.
//!
//! # Ablation
//!
//! `scheme` is `pdd` (the ice model computes melt from temperature and
//! precipitation) or `ebm`. The `ebm` scheme runs a surface energy balance
//! model and needs its `executable`; the variable names and units it
//! exchanges can be changed, see [`EnergyBalanceSettings`](crate::ablation::EnergyBalanceSettings).
//!
//! ```toml
//! [ablation]
//! scheme = "ebm"
//! executable = "/opt/semic/bin/semic"
//! args = ["--namelist", "semic.nml"]
//! ```
//!
//! # Other sections
//!
//! - `model_name` and `model_type` (defaults "pism" and "ice") name files.
//! - `scratch_dir` is where each run creates its scratch directory. It
//!   defaults to the system temporary directory.
//! - `inputs.ice_grid` is the grid the climate fields are regridded to. It
//!   defaults to the ice dataset.
//! - `[atmosphere_variables]` gives the names of `temperature` and
//!   `precipitation` in the atmosphere output (defaults "temp2", "aprt").
//! - `[ice_variables.temperature]` and `[ice_variables.precipitation]` give
//!   the `name` and `units` the ice model reads.
//! - `[compute]` holds the ice model `executable` (default "pismr"), which
//!   selects the pooled grid file, and the optional `num_tasks` and `num_threads`.
//! - `[solid_earth]` controls the export to a solid earth model: `timestep`
//!   (`"last"`, `{ index = 3 }` or `{ from_end = 1 }`), `variable` (default
//!   "thk"), `default_units` (default "m") and `output_dir` (default the
//!   `solid_earth` subdirectory of `output_dir`).
//! - `[tools]` holds the path to `cdo` and the directory containing the NCO
//!   executables, if they are not on the `PATH`.
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use error_stack::ResultExt;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::ablation::AblationChoice;
use crate::bundle::GridPool;
use crate::context::{AtmosphereVariables, ComputeRequirements, CouplingContext, IceVariables};
use crate::dataset::{GridDescriptor, GriddedDataset};
use crate::error::{CouplingError, CouplingResult};
use crate::exporter::SolidEarthSettings;
use crate::gridops::TimeAxis;
use crate::transform::TransformChoice;

/// Prefix of environment variables overriding configuration values
pub const ENV_PREFIX: &str = "ICE_COUPLER_";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CouplingConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_model_type")]
    pub model_type: String,
    pub date: NaiveDate,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    pub inputs: InputFiles,
    pub transform: TransformChoice,
    pub ablation: AblationChoice,
    #[serde(default)]
    pub atmosphere_variables: AtmosphereVariables,
    #[serde(default)]
    pub ice_variables: IceVariables,
    pub time_axis: TimeAxis,
    pub grid_pool: GridPool,
    #[serde(default)]
    pub compute: ComputeRequirements,
    #[serde(default)]
    pub solid_earth: SolidEarthSettings,
    #[serde(default)]
    pub tools: ToolSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputFiles {
    pub ice: PathBuf,
    pub atmosphere: PathBuf,
    pub lo_res_elevation: PathBuf,
    #[serde(default)]
    pub ice_grid: Option<PathBuf>,
}

/// Where to find the external tools.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolSettings {
    #[serde(default = "default_cdo")]
    pub cdo: PathBuf,
    #[serde(default)]
    pub nco_dir: Option<PathBuf>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self { cdo: default_cdo(), nco_dir: None }
    }
}

fn default_model_name() -> String {
    "pism".to_string()
}

fn default_model_type() -> String {
    "ice".to_string()
}

fn default_cdo() -> PathBuf {
    PathBuf::from("cdo")
}

impl CouplingConfig {
    /// Load the configuration from `config_file`, with environment overrides.
    pub fn load(config_file: &Path) -> CouplingResult<Self> {
        // figment treats a missing file as empty, which would only surface as a confusing missing field
        if !config_file.exists() {
            error_stack::bail!(CouplingError::Configuration(
                format!("configuration file {} does not exist", config_file.display())
            ));
        }

        Figment::new()
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .change_context_lazy(|| CouplingError::Configuration(
                format!("could not load {}", config_file.display())
            ))
    }

    /// Validate the configuration and build the context for a run.
    pub fn context(&self) -> CouplingResult<CouplingContext> {
        let required = [
            ("model_name", &self.model_name),
            ("model_type", &self.model_type),
            ("atmosphere_variables.temperature", &self.atmosphere_variables.temperature),
            ("atmosphere_variables.precipitation", &self.atmosphere_variables.precipitation),
            ("ice_variables.temperature.name", &self.ice_variables.temperature.name),
            ("ice_variables.precipitation.name", &self.ice_variables.precipitation.name),
            ("time_axis.calendar", &self.time_axis.calendar),
            ("time_axis.increment", &self.time_axis.increment),
            ("compute.executable", &self.compute.executable),
            ("solid_earth.variable", &self.solid_earth.variable),
        ];
        if let Some((key, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            error_stack::bail!(CouplingError::Configuration(format!("'{key}' must not be empty")));
        }

        if let TransformChoice::Downscale(settings) = &self.transform {
            settings.validate().map_err(CouplingError::Configuration)?;
        }

        let ice_grid = self.inputs.ice_grid.as_ref().unwrap_or(&self.inputs.ice);
        Ok(CouplingContext {
            model_name: self.model_name.clone(),
            model_type: self.model_type.clone(),
            date: self.date,
            transform: self.transform.clone(),
            ablation: self.ablation.clone(),
            ice: GriddedDataset::new(&self.inputs.ice),
            ice_grid: GridDescriptor::new(ice_grid),
            atmosphere: GriddedDataset::new(&self.inputs.atmosphere),
            lo_res_elevation: GriddedDataset::new(&self.inputs.lo_res_elevation),
            atmosphere_variables: self.atmosphere_variables.clone(),
            ice_variables: self.ice_variables.clone(),
            time_axis: self.time_axis.clone(),
            output_dir: self.output_dir.clone(),
            scratch_parent: self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir),
            grid_pool: self.grid_pool.clone(),
            compute: self.compute.clone(),
            solid_earth: self.solid_earth.clone(),
        })
    }
}
