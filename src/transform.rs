//! Moving temperature and precipitation from the atmosphere grid to the ice grid.
//!
//! Three strategies are available, chosen once per coupling context through
//! [`TransformChoice`]:
//!
//! - `interpolate`: plain horizontal interpolation of both fields,
//! - `remap`: remapping with a chosen method (conservative by default),
//! - `downscale`: a lapse rate correction of temperature and an elevation
//!   dependent scaling of precipitation, using the elevation difference between
//!   the ice and atmosphere surfaces, followed by interpolation. Each field can
//!   opt out of the correction, in which case it is only interpolated.
//!
//! Whatever the strategy, each field is first split out of the atmosphere file
//! and renamed to its canonical ice model name, so that all later expressions
//! refer to canonical names.
use serde::{Deserialize, Serialize};

use crate::context::CouplingContext;
use crate::dataset::GriddedDataset;
use crate::elevation::{ElevationDifference, ELEVATION_VARNAME};
use crate::error::{CouplingError, CouplingResult};
use crate::gridops::RemapMethod;
use crate::pipeline::Toolbox;
use crate::scratch::ScratchArea;

/// A dataset holding one climate field, and the name of that field's variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub dataset: GriddedDataset,
    pub variable: String,
}

/// The output of a [`FieldTransform`]: temperature and precipitation on the ice grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClimateFields {
    pub temperature: Field,
    pub precipitation: Field,
}

pub trait FieldTransform {
    fn name(&self) -> &'static str;

    /// Whether [`FieldTransform::produce`] needs an elevation difference field.
    fn needs_elevation_difference(&self) -> bool {
        false
    }

    fn produce(
        &self,
        tools: &Toolbox,
        scratch: &mut ScratchArea,
        context: &CouplingContext,
        atmosphere: &GriddedDataset,
        elevation_difference: Option<&ElevationDifference>,
    ) -> CouplingResult<ClimateFields>;
}

/// Settings of the downscaling transform.
///
/// The two toggles have no defaults: a configuration selecting downscaling
/// must state for each field whether it is downscaled or only interpolated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownscaleSettings {
    /// Apply the lapse rate correction to temperature
    pub temperature: bool,
    /// Apply the elevation scaling to precipitation
    pub precipitation: bool,
    /// Atmospheric temperature lapse rate in K/m (positive means colder with height)
    #[serde(default = "default_lapse_rate")]
    pub lapse_rate: f64,
    /// Fractional change in precipitation per kelvin of temperature change
    #[serde(default = "default_precipitation_sensitivity")]
    pub precipitation_sensitivity: f64,
}

impl DownscaleSettings {
    /// Check that both coefficients are finite and not negative.
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [("lapse_rate", self.lapse_rate), ("precipitation_sensitivity", self.precipitation_sensitivity)] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("downscaling {name} must be a finite, non-negative number, got {value}"));
            }
        }
        Ok(())
    }
}

fn default_lapse_rate() -> f64 {
    0.0065
}

fn default_precipitation_sensitivity() -> f64 {
    0.07
}

/// Which transform to use, with its settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransformChoice {
    Interpolate,
    Remap {
        #[serde(default)]
        method: RemapMethod,
    },
    Downscale(DownscaleSettings),
}

impl TransformChoice {
    pub fn strategy(&self) -> Box<dyn FieldTransform> {
        match self {
            TransformChoice::Interpolate => Box::new(Interpolate),
            TransformChoice::Remap { method } => Box::new(Remap { method: *method }),
            TransformChoice::Downscale(settings) => Box::new(Downscale { settings: settings.clone() }),
        }
    }
}

pub struct Interpolate;

impl FieldTransform for Interpolate {
    fn name(&self) -> &'static str {
        "interpolate"
    }

    fn produce(
        &self,
        tools: &Toolbox,
        scratch: &mut ScratchArea,
        context: &CouplingContext,
        atmosphere: &GriddedDataset,
        _elevation_difference: Option<&ElevationDifference>,
    ) -> CouplingResult<ClimateFields> {
        let (temperature, precipitation) = split_fields(tools, scratch, context, atmosphere)?;
        Ok(ClimateFields {
            temperature: interpolate_field(tools, scratch, context, temperature)?,
            precipitation: interpolate_field(tools, scratch, context, precipitation)?,
        })
    }
}

pub struct Remap {
    method: RemapMethod,
}

impl FieldTransform for Remap {
    fn name(&self) -> &'static str {
        "remap"
    }

    fn produce(
        &self,
        tools: &Toolbox,
        scratch: &mut ScratchArea,
        context: &CouplingContext,
        atmosphere: &GriddedDataset,
        _elevation_difference: Option<&ElevationDifference>,
    ) -> CouplingResult<ClimateFields> {
        let (temperature, precipitation) = split_fields(tools, scratch, context, atmosphere)?;
        let mut remap = |field: Field| -> CouplingResult<Field> {
            let output = scratch.register(&format!("{}_remapped.nc", field.variable));
            let dataset = tools.grid.remap(&field.dataset, &context.ice_grid, self.method, &output)?;
            Ok(Field { dataset, variable: field.variable })
        };
        Ok(ClimateFields {
            temperature: remap(temperature)?,
            precipitation: remap(precipitation)?,
        })
    }
}

pub struct Downscale {
    settings: DownscaleSettings,
}

impl Downscale {
    fn lapse_correct_temperature(&self, tools: &Toolbox, scratch: &mut ScratchArea, context: &CouplingContext, field: Field, difference: &ElevationDifference) -> CouplingResult<Field> {
        let v = &field.variable;
        let correction = tools.grid.evaluate_expression(
            &format!("{v}={}*{ELEVATION_VARNAME}", self.settings.lapse_rate),
            difference.dataset(),
            &scratch.register(&format!("{v}_lapse_correction.nc")),
        )?;
        let corrected = tools.grid.subtract(&field.dataset, &correction, &scratch.register(&format!("{v}_lapse_corrected.nc")))?;
        let output = scratch.register(&format!("{v}_downscaled.nc"));
        let dataset = tools.grid.interpolate(&corrected, &context.ice_grid, &output)?;
        Ok(Field { dataset, variable: field.variable })
    }

    fn scale_precipitation(&self, tools: &Toolbox, scratch: &mut ScratchArea, context: &CouplingContext, field: Field, difference: &ElevationDifference) -> CouplingResult<Field> {
        let v = &field.variable;
        // exp(s * dT) with dT = -lapse_rate * dz
        let exponent = -(self.settings.precipitation_sensitivity * self.settings.lapse_rate);
        let factor = tools.grid.evaluate_expression(
            &format!("{v}=exp({exponent}*{ELEVATION_VARNAME})"),
            difference.dataset(),
            &scratch.register(&format!("{v}_elevation_factor.nc")),
        )?;
        let scaled = tools.grid.multiply(&field.dataset, &factor, &scratch.register(&format!("{v}_elevation_scaled.nc")))?;
        let output = scratch.register(&format!("{v}_downscaled.nc"));
        let dataset = tools.grid.interpolate(&scaled, &context.ice_grid, &output)?;
        Ok(Field { dataset, variable: field.variable })
    }
}

impl FieldTransform for Downscale {
    fn name(&self) -> &'static str {
        "downscale"
    }

    fn needs_elevation_difference(&self) -> bool {
        true
    }

    fn produce(
        &self,
        tools: &Toolbox,
        scratch: &mut ScratchArea,
        context: &CouplingContext,
        atmosphere: &GriddedDataset,
        elevation_difference: Option<&ElevationDifference>,
    ) -> CouplingResult<ClimateFields> {
        let difference = elevation_difference.ok_or(CouplingError::MissingElevationDifference)?;
        let (temperature, precipitation) = split_fields(tools, scratch, context, atmosphere)?;

        let temperature = if self.settings.temperature {
            self.lapse_correct_temperature(tools, scratch, context, temperature, difference)?
        } else {
            log::info!("Temperature downscaling disabled, interpolating instead");
            interpolate_field(tools, scratch, context, temperature)?
        };

        let precipitation = if self.settings.precipitation {
            self.scale_precipitation(tools, scratch, context, precipitation, difference)?
        } else {
            log::info!("Precipitation downscaling disabled, interpolating instead");
            interpolate_field(tools, scratch, context, precipitation)?
        };

        Ok(ClimateFields { temperature, precipitation })
    }
}

/// Split temperature and precipitation out of the atmosphere dataset and give
/// them their canonical ice model names.
fn split_fields(tools: &Toolbox, scratch: &mut ScratchArea, context: &CouplingContext, atmosphere: &GriddedDataset) -> CouplingResult<(Field, Field)> {
    let info = tools.grid.describe(atmosphere)?;
    let mut split = |source: &str, canonical: &str| -> CouplingResult<Field> {
        if !info.has_variable(source) {
            error_stack::bail!(CouplingError::MissingVariable {
                variable: source.to_string(),
                path: atmosphere.path().to_path_buf(),
            });
        }
        let selected = tools.grid.select_variable(source, atmosphere, &scratch.register(&format!("{canonical}_selected.nc")))?;
        let dataset = if source == canonical {
            selected
        } else {
            tools.attributes.rename_variable(source, canonical, &selected, &scratch.register(&format!("{canonical}_renamed.nc")))?
        };
        Ok(Field { dataset, variable: canonical.to_string() })
    };

    let temperature = split(&context.atmosphere_variables.temperature, &context.ice_variables.temperature.name)?;
    let precipitation = split(&context.atmosphere_variables.precipitation, &context.ice_variables.precipitation.name)?;
    Ok((temperature, precipitation))
}

fn interpolate_field(tools: &Toolbox, scratch: &mut ScratchArea, context: &CouplingContext, field: Field) -> CouplingResult<Field> {
    let output = scratch.register(&format!("{}_interpolated.nc", field.variable));
    let dataset = tools.grid.interpolate(&field.dataset, &context.ice_grid, &output)?;
    Ok(Field { dataset, variable: field.variable })
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    use super::*;
    use crate::ablation::AblationChoice;
    use crate::elevation::ElevationReconciler;
    use crate::test_utils::{sample_context, FakeAttributes, FakeDataset, FakeGridOps};

    fn downscale(temperature: bool, precipitation: bool) -> TransformChoice {
        TransformChoice::Downscale(DownscaleSettings {
            temperature,
            precipitation,
            lapse_rate: default_lapse_rate(),
            precipitation_sensitivity: default_precipitation_sensitivity(),
        })
    }

    struct Harness {
        _dir: tempfile::TempDir,
        context: CouplingContext,
        grid: FakeGridOps,
        attributes: FakeAttributes,
    }

    impl Harness {
        fn new(choice: TransformChoice) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let context = sample_context(dir.path(), choice, AblationChoice::PositiveDegreeDay);
            Self { _dir: dir, context, grid: FakeGridOps::default(), attributes: FakeAttributes }
        }

        fn tools(&self) -> Toolbox<'_> {
            Toolbox { grid: &self.grid, attributes: &self.attributes, submodel: None }
        }

        fn difference(&self, scratch: &mut ScratchArea) -> ElevationDifference {
            ElevationReconciler::new(&self.grid)
                .compute_difference(&self.context.ice, &self.context.lo_res_elevation, scratch, &self.context)
                .unwrap()
        }

        fn produce(&self, with_difference: bool) -> CouplingResult<(FakeDataset, FakeDataset)> {
            let mut scratch = ScratchArea::create(&self.context.scratch_parent, "test_").unwrap();
            let difference = with_difference.then(|| self.difference(&mut scratch));
            let fields = self.context.transform.strategy().produce(
                &self.tools(),
                &mut scratch,
                &self.context,
                &self.context.atmosphere,
                difference.as_ref(),
            )?;
            assert_eq!(fields.temperature.variable, "air_temp");
            assert_eq!(fields.precipitation.variable, "precipitation");
            Ok((
                FakeDataset::read(fields.temperature.dataset.path()).unwrap(),
                FakeDataset::read(fields.precipitation.dataset.path()).unwrap(),
            ))
        }
    }

    #[test]
    fn test_downscale_requires_difference() {
        let h = Harness::new(downscale(true, true));
        let err = h.produce(false).unwrap_err();
        assert!(matches!(err.current_context(), CouplingError::MissingElevationDifference));
        // fails before touching the atmosphere data
        assert!(h.grid.calls().iter().all(|c| !c.starts_with("select_variable")));
    }

    #[rstest]
    #[case(TransformChoice::Interpolate, false)]
    #[case(TransformChoice::Interpolate, true)]
    #[case(TransformChoice::Remap { method: RemapMethod::Conservative }, false)]
    #[case(TransformChoice::Remap { method: RemapMethod::NearestNeighbor }, true)]
    fn test_difference_not_required(#[case] choice: TransformChoice, #[case] with_difference: bool) {
        let h = Harness::new(choice);
        let (temp, precip) = h.produce(with_difference).unwrap();
        assert_eq!(temp.grid.name, "ice");
        assert_eq!(precip.grid.name, "ice");
        // no elevation correction: values are the coarse ones repeated
        assert_eq!(temp.variables["air_temp"].values[0], vec![-5.0, -5.0, -10.0, -10.0]);
    }

    #[test]
    fn test_downscale_both_fields() {
        let h = Harness::new(downscale(true, true));
        let (temp, precip) = h.produce(true).unwrap();

        // elevation difference is [50, 100] m on the coarse grid
        let t = &temp.variables["air_temp"].values[0];
        assert_abs_diff_eq!(t[0], -5.0 - 0.0065 * 50.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t[3], -10.0 - 0.0065 * 100.0, epsilon = 1e-12);

        let p = &precip.variables["precipitation"].values[1];
        assert_abs_diff_eq!(p[1], 3e-5 * (-0.07 * 0.0065 * 50.0f64).exp(), epsilon = 1e-15);
        assert_abs_diff_eq!(p[2], 4e-5 * (-0.07 * 0.0065 * 100.0f64).exp(), epsilon = 1e-15);
    }

    #[test]
    fn test_inverted_lapse_rate_expressions() {
        let h = Harness::new(TransformChoice::Downscale(DownscaleSettings {
            temperature: true,
            precipitation: true,
            lapse_rate: -0.0065,
            precipitation_sensitivity: 0.07,
        }));
        let (temp, precip) = h.produce(true).unwrap();

        let calls = h.grid.calls();
        assert!(calls.iter().all(|c| !c.contains("--") && !c.contains("-+")), "{calls:?}");
        assert_abs_diff_eq!(temp.variables["air_temp"].values[0][0], -5.0 + 0.0065 * 50.0, epsilon = 1e-12);
        let p = &precip.variables["precipitation"].values[1];
        assert_abs_diff_eq!(p[1], 3e-5 * (0.07 * 0.0065 * 50.0f64).exp(), epsilon = 1e-15);
    }

    #[rstest]
    #[case(0.0065, 0.07, true)]
    #[case(0.0, 0.0, true)]
    #[case(-0.0065, 0.07, false)]
    #[case(0.0065, -0.07, false)]
    #[case(f64::NAN, 0.07, false)]
    fn test_downscale_settings_validation(#[case] lapse_rate: f64, #[case] precipitation_sensitivity: f64, #[case] ok: bool) {
        let settings = DownscaleSettings { temperature: true, precipitation: true, lapse_rate, precipitation_sensitivity };
        assert_eq!(settings.validate().is_ok(), ok);
    }

    #[test]
    fn test_downscale_toggle_falls_back_per_field() {
        let h = Harness::new(downscale(false, true));
        let (temp, precip) = h.produce(true).unwrap();
        assert_eq!(temp.variables["air_temp"].values[0], vec![-5.0, -5.0, -10.0, -10.0]);
        assert!(precip.variables["precipitation"].values[0][0] < 1e-5);
    }

    #[test]
    fn test_renaming_precedes_expressions() {
        let h = Harness::new(downscale(true, true));
        h.produce(true).unwrap();
        let calls = h.grid.calls();
        let exprs: Vec<&String> = calls.iter().filter(|c| c.starts_with("evaluate_expression")).collect();
        assert!(exprs.iter().any(|c| c.contains("air_temp=")), "{exprs:?}");
        assert!(exprs.iter().all(|c| !c.contains("temp2") && !c.contains("aprt")), "{exprs:?}");
    }

    #[test]
    fn test_missing_atmosphere_variable() {
        let mut h = Harness::new(TransformChoice::Interpolate);
        h.context.atmosphere_variables.temperature = "t2m".to_string();
        let err = h.produce(false).unwrap_err();
        match err.current_context() {
            CouplingError::MissingVariable { variable, .. } => assert_eq!(variable, "t2m"),
            other => panic!("unexpected error {other}"),
        }
    }
}
