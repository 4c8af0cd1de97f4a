//! Common errors across the ice-coupler crate
use std::path::PathBuf;

/// Shorthand for results carrying an [`error_stack::Report`] of [`CouplingError`]
pub type CouplingResult<T> = error_stack::Result<T, CouplingError>;

/// Errors that abort a coupling or export run.
///
/// Every one of these is fatal for the run it occurs in; none are retried.
/// Context about which stage failed is attached to the report by the caller.
#[derive(Debug, thiserror::Error)]
pub enum CouplingError {
    /// The ice dataset has neither `usurf` nor both `thk` and `topg`.
    #[error("Insufficient information for high resolution elevation in {}: need 'usurf' or both 'thk' and 'topg'", .0.display())]
    InsufficientGeometry(PathBuf),

    /// The downscale strategy was invoked without an elevation difference field.
    #[error("Downscaling requires an elevation difference field, but none was available")]
    MissingElevationDifference,

    /// A unit needed for conversion was absent or not recognized, or a rename target was missing.
    #[error("Cannot convert units of '{variable}': {reason}")]
    UnitConversion { variable: String, reason: String },

    /// The energy balance submodel failed or produced unusable output.
    #[error("Surface energy balance submodel failed: {0}")]
    SubmodelExecution(String),

    /// A variable required by a stage was not in the dataset.
    #[error("Variable '{variable}' not found in {}", .path.display())]
    MissingVariable { variable: String, path: PathBuf },

    /// The grid operations tool failed; the inner value is the operator name.
    #[error("Grid operation '{0}' failed")]
    GridOperation(String),

    /// The attribute editor failed; the inner value is the edit attempted.
    #[error("Attribute edit '{0}' failed")]
    AttributeEdit(String),

    #[error("Could not commit {} to {}", .artifact.display(), .destination.display())]
    Commit { artifact: PathBuf, destination: PathBuf },

    #[error("{} has already been committed to {}", .artifact.display(), .destination.display())]
    AlreadyCommitted { artifact: PathBuf, destination: PathBuf },

    #[error("Could not create a scratch area under {}", .0.display())]
    Scratch(PathBuf),

    #[error("Could not write {}", .0.display())]
    Write(PathBuf),

    #[error("Invalid coupling configuration: {0}")]
    Configuration(String),

    #[error("Cannot select a timestep: {0}")]
    Timestep(String),
}

/// A temporary artifact could not be removed.
///
/// This never aborts a run. It is logged once the primary outcome of the run is known.
#[derive(Debug, thiserror::Error)]
#[error("Could not remove temporary artifact {}: {reason}", .path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    pub reason: String,
}

impl CleanupError {
    pub(crate) fn new<S: ToString>(path: PathBuf, reason: S) -> Self {
        Self { path, reason: reason.to_string() }
    }
}
