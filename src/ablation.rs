//! Turning the regridded climate fields into surface mass balance forcing.
//!
//! Two schemes are supported. With the positive degree day scheme the ice model
//! computes melt itself from near-surface air temperature and precipitation, so
//! this module only has to deliver those two fields in the names, units and time
//! axis it expects. With the energy balance scheme an external surface
//! energy balance model (e.g. SEMIC) is run first, and its mass balance and
//! surface temperature are handed to the ice model as given surface fields.
use std::path::PathBuf;

use error_stack::ResultExt;
use serde::{Deserialize, Serialize};

use crate::bundle::VariableDescription;
use crate::context::{CouplingContext, VariableTarget};
use crate::dataset::GriddedDataset;
use crate::error::{CouplingError, CouplingResult};
use crate::gridops::TimeAxis;
use crate::pipeline::Toolbox;
use crate::scratch::ScratchArea;
use crate::transform::{ClimateFields, Field};
use crate::units;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AtmosphereMode {
    Given,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SurfaceMode {
    Pdd,
    Given,
}

/// The ice model options selecting how it reads its surface forcing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForcingSpec {
    /// Atmosphere model mode; `None` if the surface model is given its fields directly
    pub atmosphere: Option<AtmosphereMode>,
    pub surface: SurfaceMode,
    /// Committed location of the prepared forcing file
    pub forcing_file: PathBuf,
}

impl ForcingSpec {
    /// The mode selecting options, e.g. `-atmosphere given -surface pdd`.
    pub fn command_option(&self) -> String {
        let mut parts = vec![];
        if let Some(atm) = self.atmosphere {
            parts.push(format!("-atmosphere {atm}"));
        }
        parts.push(format!("-surface {}", self.surface));
        parts.join(" ")
    }

    /// All options as separate arguments, including the forcing file option.
    pub fn options(&self) -> Vec<String> {
        let mut opts = vec![];
        if let Some(atm) = self.atmosphere {
            opts.push("-atmosphere".to_string());
            opts.push(atm.to_string());
        }
        opts.push("-surface".to_string());
        opts.push(self.surface.to_string());
        opts.push(self.file_option().to_string());
        opts.push(self.forcing_file.display().to_string());
        opts
    }

    fn file_option(&self) -> &'static str {
        match self.atmosphere {
            Some(AtmosphereMode::Given) => "-atmosphere_given_file",
            None => "-surface_given_file",
        }
    }
}

/// The result of an [`AblationForcing`] strategy: the forcing file (still in
/// the scratch area), the options pointing the ice model at its committed
/// location, and the variable descriptions for the bundle.
#[derive(Debug, Clone)]
pub struct PreparedForcing {
    pub spec: ForcingSpec,
    pub dataset: GriddedDataset,
    pub variables: Vec<VariableDescription>,
}

pub trait AblationForcing {
    fn name(&self) -> &'static str;

    /// Check that the tools this scheme needs were provided, before any work is done.
    fn check_tools(&self, _tools: &Toolbox) -> CouplingResult<()> {
        Ok(())
    }

    fn prepare(&self, tools: &Toolbox, scratch: &mut ScratchArea, fields: &ClimateFields, context: &CouplingContext) -> CouplingResult<PreparedForcing>;
}

/// Names and units exchanged with the energy balance submodel, and the ice
/// model surface fields its output becomes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnergyBalanceSettings {
    /// The submodel executable
    pub executable: PathBuf,
    /// Arguments given to the executable before the input and output file paths
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_submodel_temperature")]
    pub input_temperature: VariableTarget,
    #[serde(default = "default_submodel_precipitation")]
    pub input_precipitation: VariableTarget,
    /// Name of the mass balance variable in the submodel output
    #[serde(default = "default_output_mass_balance")]
    pub output_mass_balance: String,
    /// Name of the surface temperature variable in the submodel output
    #[serde(default = "default_output_surface_temperature")]
    pub output_surface_temperature: String,
    #[serde(default = "default_ice_mass_balance")]
    pub ice_mass_balance: VariableTarget,
    #[serde(default = "default_ice_surface_temperature")]
    pub ice_surface_temperature: VariableTarget,
}

impl EnergyBalanceSettings {
    pub fn new<P: Into<PathBuf>>(executable: P) -> Self {
        Self {
            executable: executable.into(),
            args: vec![],
            input_temperature: default_submodel_temperature(),
            input_precipitation: default_submodel_precipitation(),
            output_mass_balance: default_output_mass_balance(),
            output_surface_temperature: default_output_surface_temperature(),
            ice_mass_balance: default_ice_mass_balance(),
            ice_surface_temperature: default_ice_surface_temperature(),
        }
    }
}

fn default_submodel_temperature() -> VariableTarget {
    VariableTarget::new("tas", "K")
}

fn default_submodel_precipitation() -> VariableTarget {
    VariableTarget::new("pr", "kg m-2 s-1")
}

fn default_output_mass_balance() -> String {
    "smb".to_string()
}

fn default_output_surface_temperature() -> String {
    "tsurf".to_string()
}

fn default_ice_mass_balance() -> VariableTarget {
    VariableTarget::new("climatic_mass_balance", "kg m-2 year-1")
}

fn default_ice_surface_temperature() -> VariableTarget {
    VariableTarget::new("ice_surface_temp", "K")
}

/// Which ablation scheme to prepare forcing for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "scheme")]
pub enum AblationChoice {
    #[serde(rename = "pdd")]
    #[strum(serialize = "pdd")]
    PositiveDegreeDay,
    #[serde(rename = "ebm")]
    #[strum(serialize = "ebm")]
    EnergyBalance(EnergyBalanceSettings),
}

impl AblationChoice {
    pub fn strategy(&self) -> Box<dyn AblationForcing> {
        match self {
            AblationChoice::PositiveDegreeDay => Box::new(PositiveDegreeDay),
            AblationChoice::EnergyBalance(settings) => Box::new(EnergyBalance { settings: settings.clone() }),
        }
    }
}

pub struct PositiveDegreeDay;

impl AblationForcing for PositiveDegreeDay {
    fn name(&self) -> &'static str {
        "pdd"
    }

    fn prepare(&self, tools: &Toolbox, scratch: &mut ScratchArea, fields: &ClimateFields, context: &CouplingContext) -> CouplingResult<PreparedForcing> {
        let targets = &context.ice_variables;
        let temperature = conform_field(tools, scratch, &fields.temperature, &targets.temperature, Quantity::Temperature)?;
        let precipitation = conform_field(tools, scratch, &fields.precipitation, &targets.precipitation, Quantity::MassFlux)?;
        let temperature = align_time_axis(tools, scratch, temperature, &context.time_axis)?;
        let precipitation = align_time_axis(tools, scratch, precipitation, &context.time_axis)?;

        let dataset = tools.grid.merge(
            &[&temperature.dataset, &precipitation.dataset],
            &scratch.register("pdd_forcing.nc"),
        )?;

        let tag = &context.model_type;
        Ok(PreparedForcing {
            spec: ForcingSpec {
                atmosphere: Some(AtmosphereMode::Given),
                surface: SurfaceMode::Pdd,
                forcing_file: context.forcing_destination(),
            },
            dataset,
            variables: vec![
                VariableDescription::new(format!("{tag}_air_temperature"), &targets.temperature.name, &targets.temperature.units),
                VariableDescription::new(format!("{tag}_precipitation"), &targets.precipitation.name, &targets.precipitation.units),
            ],
        })
    }
}

pub struct EnergyBalance {
    settings: EnergyBalanceSettings,
}

impl AblationForcing for EnergyBalance {
    fn name(&self) -> &'static str {
        "ebm"
    }

    fn check_tools(&self, tools: &Toolbox) -> CouplingResult<()> {
        if tools.submodel.is_none() {
            error_stack::bail!(CouplingError::Configuration(
                "the energy balance scheme was selected but no surface submodel was provided".to_string()
            ));
        }
        Ok(())
    }

    fn prepare(&self, tools: &Toolbox, scratch: &mut ScratchArea, fields: &ClimateFields, context: &CouplingContext) -> CouplingResult<PreparedForcing> {
        let submodel = tools.submodel.ok_or_else(|| CouplingError::Configuration(
            "the energy balance scheme was selected but no surface submodel was provided".to_string()
        ))?;
        let s = &self.settings;

        // 1. forcing in the submodel's format
        let temperature = conform_field(tools, scratch, &fields.temperature, &s.input_temperature, Quantity::Temperature)?;
        let precipitation = conform_field(tools, scratch, &fields.precipitation, &s.input_precipitation, Quantity::MassFlux)?;
        let input = tools.grid.merge(&[&temperature.dataset, &precipitation.dataset], &scratch.register("ebm_input.nc"))?;

        // 2. run it
        log::info!("Running surface energy balance submodel {}", s.executable.display());
        let output = submodel.run(&input, &scratch.register("ebm_output.nc"), scratch.path())?;

        // 3. its output as ice model surface fields
        let info = tools.grid.describe(&output)?;
        for name in [&s.output_mass_balance, &s.output_surface_temperature] {
            if !info.has_variable(name) {
                error_stack::bail!(CouplingError::SubmodelExecution(
                    format!("output {} has no variable '{name}'", output.path().display())
                ));
            }
        }

        let mut extract = |name: &str| -> CouplingResult<Field> {
            let dataset = tools.grid.select_variable(name, &output, &scratch.register(&format!("ebm_{name}.nc")))?;
            Ok(Field { dataset, variable: name.to_string() })
        };
        let mass_balance = extract(&s.output_mass_balance)?;
        let surface_temp = extract(&s.output_surface_temperature)?;

        let mass_balance = conform_field(tools, scratch, &mass_balance, &s.ice_mass_balance, Quantity::MassFlux)?;
        let surface_temp = conform_field(tools, scratch, &surface_temp, &s.ice_surface_temperature, Quantity::Temperature)?;
        let mass_balance = align_time_axis(tools, scratch, mass_balance, &context.time_axis)?;
        let surface_temp = align_time_axis(tools, scratch, surface_temp, &context.time_axis)?;
        let dataset = tools.grid.merge(&[&mass_balance.dataset, &surface_temp.dataset], &scratch.register("ebm_forcing.nc"))?;

        // 4. options
        let tag = &context.model_type;
        Ok(PreparedForcing {
            spec: ForcingSpec {
                atmosphere: None,
                surface: SurfaceMode::Given,
                forcing_file: context.forcing_destination(),
            },
            dataset,
            variables: vec![
                VariableDescription::new(format!("{tag}_surface_mass_balance"), &s.ice_mass_balance.name, &s.ice_mass_balance.units),
                VariableDescription::new(format!("{tag}_surface_temperature"), &s.ice_surface_temperature.name, &s.ice_surface_temperature.units),
            ],
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Quantity {
    Temperature,
    MassFlux,
}

/// Rename `field` to `target.name`, convert its values to `target.units` and
/// set the units attribute. The rename comes first so the conversion
/// expression refers to the target name.
fn conform_field(tools: &Toolbox, scratch: &mut ScratchArea, field: &Field, target: &VariableTarget, quantity: Quantity) -> CouplingResult<Field> {
    let info = tools.grid.describe(&field.dataset)?;
    if !info.has_variable(&field.variable) {
        error_stack::bail!(CouplingError::UnitConversion {
            variable: field.variable.clone(),
            reason: format!("variable not present in {}", field.dataset.path().display()),
        });
    }
    let current_units = info.units(&field.variable)
        .ok_or_else(|| CouplingError::UnitConversion {
            variable: field.variable.clone(),
            reason: "no units attribute".to_string(),
        })?
        .to_string();

    let name = &target.name;
    let mut dataset = if &field.variable == name {
        field.dataset.clone()
    } else {
        tools.attributes.rename_variable(&field.variable, name, &field.dataset, &scratch.register(&format!("{name}_as_target.nc")))?
    };

    let expression = conversion_expression(name, &current_units, &target.units, quantity)
        .change_context_lazy(|| CouplingError::UnitConversion {
            variable: field.variable.clone(),
            reason: format!("cannot convert '{current_units}' to '{}'", target.units),
        })?;
    if let Some(expr) = expression {
        log::debug!("Converting {name} from '{current_units}' to '{}'", target.units);
        dataset = tools.grid.evaluate_expression(&expr, &dataset, &scratch.register(&format!("{name}_converted.nc")))?;
    }

    let dataset = tools.attributes.set_unit(name, &target.units, &dataset, &scratch.register(&format!("{name}_units.nc")))?;
    Ok(Field { dataset, variable: name.clone() })
}

/// The expression converting `name` from `old_unit` to `new_unit`, or `None` if no change is needed.
fn conversion_expression(name: &str, old_unit: &str, new_unit: &str, quantity: Quantity) -> Result<Option<String>, units::UnknownUnitError> {
    let expr = match quantity {
        Quantity::Temperature => {
            let offset = units::temperature_offset(old_unit, new_unit)?;
            if offset == 0.0 {
                None
            } else if offset > 0.0 {
                Some(format!("{name}={name}+{offset}"))
            } else {
                Some(format!("{name}={name}-{}", -offset))
            }
        },
        Quantity::MassFlux => {
            let factor = units::flux_conv_factor(old_unit, new_unit)?;
            if (factor - 1.0).abs() < 1e-12 {
                None
            } else {
                Some(format!("{name}={name}*{factor}"))
            }
        },
    };
    Ok(expr)
}

fn align_time_axis(tools: &Toolbox, scratch: &mut ScratchArea, field: Field, axis: &TimeAxis) -> CouplingResult<Field> {
    let output = scratch.register(&format!("{}_time_axis.nc", field.variable));
    let dataset = tools.grid.set_time_axis(&field.dataset, axis, &output)?;
    Ok(Field { dataset, variable: field.variable })
}
