//! Reconciling the ice model's surface elevation with the atmosphere's.
//!
//! The atmosphere sees a coarse, smoothed topography. Downscaling needs to know
//! how far the real (ice model) surface sits above or below it in each coarse
//! cell: `resample(elevation_hi) - elevation_lo`.
use error_stack::ResultExt;

use crate::context::CouplingContext;
use crate::dataset::{DatasetInfo, GriddedDataset};
use crate::error::{CouplingError, CouplingResult};
use crate::gridops::GridOperations;
use crate::scratch::ScratchArea;

/// Name of the elevation variable in the low resolution file and in the difference field
pub const ELEVATION_VARNAME: &str = "elevation";
pub const SURFACE_ELEVATION_VARNAME: &str = "usurf";
pub const THICKNESS_VARNAME: &str = "thk";
pub const BEDROCK_VARNAME: &str = "topg";

/// How the high resolution elevation is obtained from the ice dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElevationSource {
    /// Use `usurf` directly
    SurfaceElevation,
    /// Ice thickness plus bedrock topography
    ThicknessPlusBedrock,
}

impl ElevationSource {
    /// Pick the source from the variables present. `usurf` takes precedence.
    pub fn detect(info: &DatasetInfo) -> Option<Self> {
        if info.has_variable(SURFACE_ELEVATION_VARNAME) {
            Some(Self::SurfaceElevation)
        } else if info.has_all([THICKNESS_VARNAME, BEDROCK_VARNAME]) {
            Some(Self::ThicknessPlusBedrock)
        } else {
            None
        }
    }

    pub fn expression(&self) -> String {
        match self {
            Self::SurfaceElevation => format!("{ELEVATION_VARNAME}={SURFACE_ELEVATION_VARNAME}"),
            Self::ThicknessPlusBedrock => format!("{ELEVATION_VARNAME}={THICKNESS_VARNAME}+{BEDROCK_VARNAME}"),
        }
    }
}

/// A single `elevation` variable on the low resolution grid: high resolution
/// elevation resampled to that grid, minus the low resolution elevation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElevationDifference {
    dataset: GriddedDataset,
}

impl ElevationDifference {
    pub fn dataset(&self) -> &GriddedDataset {
        &self.dataset
    }
}

pub struct ElevationReconciler<'a> {
    grid: &'a dyn GridOperations,
}

impl<'a> ElevationReconciler<'a> {
    pub fn new(grid: &'a dyn GridOperations) -> Self {
        Self { grid }
    }

    /// Compute the elevation difference between `ice` and `lo_res_elevation`.
    ///
    /// Fails with [`CouplingError::InsufficientGeometry`] before writing anything
    /// if `ice` has neither `usurf` nor both `thk` and `topg`.
    pub fn compute_difference(
        &self,
        ice: &GriddedDataset,
        lo_res_elevation: &GriddedDataset,
        scratch: &mut ScratchArea,
        context: &CouplingContext,
    ) -> CouplingResult<ElevationDifference> {
        let info = self.grid.describe(ice)?;
        let source = ElevationSource::detect(&info)
            .ok_or_else(|| CouplingError::InsufficientGeometry(ice.path().to_path_buf()))?;
        log::debug!("Deriving high resolution elevation as '{}'", source.expression());

        let lo_info = self.grid.describe(lo_res_elevation)?;
        if !lo_info.has_variable(ELEVATION_VARNAME) {
            error_stack::bail!(CouplingError::MissingVariable {
                variable: ELEVATION_VARNAME.to_string(),
                path: lo_res_elevation.path().to_path_buf(),
            });
        }

        let tag = format!("{}_{}", context.model_name, context.label());
        let hi_res = self.grid.evaluate_expression(
            &source.expression(),
            ice,
            &scratch.register(&format!("hi_res_elevation_{tag}.nc")),
        )?;
        let hi_on_lo = self.grid.resample(
            &hi_res,
            &lo_res_elevation.grid(),
            &scratch.register(&format!("hi_res_elevation_on_lo_grid_{tag}.nc")),
        )
        .attach_printable("Resampling high resolution elevation to the atmosphere grid")?;
        let lo_res = self.grid.select_variable(
            ELEVATION_VARNAME,
            lo_res_elevation,
            &scratch.register(&format!("lo_res_elevation_{tag}.nc")),
        )?;
        let dataset = self.grid.subtract(
            &hi_on_lo,
            &lo_res,
            &scratch.register(&format!("elevation_difference_{tag}.nc")),
        )?;

        log::info!("Computed elevation difference {}", dataset.path().display());
        Ok(ElevationDifference { dataset })
    }
}
