//! Recognition of the temperature and precipitation units found in atmosphere output.
//!
//! Conversions are expressed as an additive offset (temperature) or a multiplicative
//! factor (mass flux) so that they can be handed to the grid operations tool as a
//! simple expression.
use std::fmt::Display;

/// Length of the year used to convert per-second fluxes, in seconds (365.2422 days).
pub const SECONDS_PER_YEAR: f64 = 31_556_926.0;
const SECONDS_PER_DAY: f64 = 86_400.0;
/// Density of water in kg m-3, for water equivalent fluxes.
const WATER_DENSITY: f64 = 1000.0;

#[derive(Debug)]
pub struct UnknownUnitError {
    pub quantity: &'static str,
    pub unit: String
}

impl UnknownUnitError {
    fn new<S: ToString>(quantity: &'static str, unit: S) -> Self {
        Self { quantity, unit: unit.to_string() }
    }
}

impl Display for UnknownUnitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown {} unit '{}'", self.quantity, self.unit)
    }
}

impl std::error::Error for UnknownUnitError {}


/// Offset to add to values in `old_unit` to express them in `new_unit`.
pub fn temperature_offset(old_unit: &str, new_unit: &str) -> Result<f64, UnknownUnitError> {
    let off1 = kelvin_offset(old_unit)?;
    let off2 = kelvin_offset(new_unit)?;
    Ok(off1 - off2)
}

/// Factor to multiply values in `old_unit` by to express them in `new_unit`.
pub fn flux_conv_factor(old_unit: &str, new_unit: &str) -> Result<f64, UnknownUnitError> {
    let (mass1, period1) = mass_per_period(old_unit)?;
    let (mass2, period2) = mass_per_period(new_unit)?;
    // (mass1 / period1) / (mass2 / period2), arranged so that whole-number
    // tables give whole-number factors
    Ok(mass1 * period2 / (period1 * mass2))
}

fn kelvin_offset(temp_unit: &str) -> Result<f64, UnknownUnitError> {
    match normalize(temp_unit).as_str() {
        "k" | "kelvin" | "degk" | "deg_k" | "degrees_k" => Ok(0.0),
        "c" | "°c" | "degc" | "deg_c" | "degrees_c" | "degree_celsius" | "celsius" => Ok(273.15),
        _ => Err(UnknownUnitError::new("temperature", temp_unit)),
    }
}

/// Mass in kg m-2 and the period in seconds that one of `flux_unit` stands for
fn mass_per_period(flux_unit: &str) -> Result<(f64, f64), UnknownUnitError> {
    match normalize(flux_unit).as_str() {
        "kg m-2 s-1" | "kg/m2/s" | "kg m**-2 s**-1" | "mm s-1" | "mm/s" => Ok((1.0, 1.0)),
        "kg m-2 day-1" | "kg m-2 d-1" | "kg/m2/day" | "mm day-1" | "mm/day" => Ok((1.0, SECONDS_PER_DAY)),
        "kg m-2 year-1" | "kg m-2 yr-1" | "kg m-2 a-1" | "kg/m2/year" | "mm year-1" | "mm/year" => Ok((1.0, SECONDS_PER_YEAR)),
        "m s-1" | "m/s" => Ok((WATER_DENSITY, 1.0)),
        "m year-1" | "m yr-1" | "m/year" => Ok((WATER_DENSITY, SECONDS_PER_YEAR)),
        _ => Err(UnknownUnitError::new("precipitation flux", flux_unit)),
    }
}

fn normalize(unit: &str) -> String {
    unit.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
