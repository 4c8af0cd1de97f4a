//! Grid operations delegated to an external tool.
//!
//! The coupler never touches grid values itself. Everything numeric (selecting,
//! combining, regridding, relabelling the time axis) goes through a
//! [`GridOperations`] implementation. The production implementation, [`Cdo`],
//! shells out to the Climate Data Operators. Every operation writes its result
//! to an explicit output path so that the caller decides where intermediate
//! files live and when they are removed.
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use error_stack::ResultExt;
use serde::{Deserialize, Serialize};

use crate::dataset::{DatasetInfo, GridDescriptor, GriddedDataset, VariableInfo};
use crate::error::{CouplingError, CouplingResult};
use crate::tools::{run_tool, ToolError};

static PARDES_REGEX: OnceLock<regex::Regex> = OnceLock::new();
static UNITS_REGEX: OnceLock<regex::Regex> = OnceLock::new();

/// How fields are moved between grids without elevation correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RemapMethod {
    /// First order conservative remapping, preserves area integrals
    #[default]
    Conservative,
    NearestNeighbor,
    Bilinear,
}

impl RemapMethod {
    fn cdo_operator(&self) -> &'static str {
        match self {
            RemapMethod::Conservative => "remapcon",
            RemapMethod::NearestNeighbor => "remapnn",
            RemapMethod::Bilinear => "remapbil",
        }
    }
}

/// The time axis the ice model expects its forcing on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeAxis {
    /// CF calendar name, e.g. "365_day"
    pub calendar: String,
    /// Date of the first timestep, as YYYY-MM-DD
    pub start_date: String,
    /// Time of day of the first timestep
    #[serde(default = "default_start_time")]
    pub start_time: String,
    /// Increment between timesteps, e.g. "1mon" or "1year"
    pub increment: String,
}

fn default_start_time() -> String {
    "00:00:00".to_string()
}

/// The operations the coupler needs from a gridded data toolkit.
///
/// Implementations must not modify their input datasets. Each method writes
/// to `output` and returns a handle to it.
pub trait GridOperations {
    /// List the variables (with units) and the number of timesteps in `dataset`.
    fn describe(&self, dataset: &GriddedDataset) -> CouplingResult<DatasetInfo>;

    /// Select the timestep at zero-based `index`.
    fn select_timestep(&self, index: usize, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset>;

    fn select_variable(&self, name: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset>;

    /// Evaluate an assignment expression such as `elevation=thk+topg`. Only the
    /// assigned variable is kept in the output.
    fn evaluate_expression(&self, expression: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset>;

    /// Elementwise `minuend - subtrahend`; variable names are taken from `minuend`.
    fn subtract(&self, minuend: &GriddedDataset, subtrahend: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset>;

    /// Elementwise product; variable names are taken from `lhs`.
    fn multiply(&self, lhs: &GriddedDataset, rhs: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset>;

    /// Combine the variables of several datasets on the same grid and time axis into one.
    fn merge(&self, datasets: &[&GriddedDataset], output: &Path) -> CouplingResult<GriddedDataset>;

    /// Aggregate a fine field onto a coarser grid.
    fn resample(&self, dataset: &GriddedDataset, target: &GridDescriptor, output: &Path) -> CouplingResult<GriddedDataset>;

    /// Horizontally interpolate onto the target grid.
    fn interpolate(&self, dataset: &GriddedDataset, target: &GridDescriptor, output: &Path) -> CouplingResult<GriddedDataset>;

    fn remap(&self, dataset: &GriddedDataset, target: &GridDescriptor, method: RemapMethod, output: &Path) -> CouplingResult<GriddedDataset>;

    /// Relabel the time axis with a new calendar, start and increment.
    fn set_time_axis(&self, dataset: &GriddedDataset, axis: &TimeAxis, output: &Path) -> CouplingResult<GriddedDataset>;

    /// The same operations, run with `workdir` as the tool's working and
    /// temporary directory. `None` if these operations leave nothing behind
    /// outside their explicit outputs.
    fn in_workdir(&self, _workdir: &Path) -> Option<Box<dyn GridOperations + '_>> {
        None
    }
}

/// [`GridOperations`] backed by the `cdo` executable.
#[derive(Debug, Clone)]
pub struct Cdo {
    program: PathBuf,
    workdir: Option<PathBuf>,
}

impl Default for Cdo {
    fn default() -> Self {
        Self::new("cdo")
    }
}

impl Cdo {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self { program: program.into(), workdir: None }
    }

    fn apply(&self, operators: &[String], inputs: &[&Path], output: &Path) -> CouplingResult<GriddedDataset> {
        let args = build_args(operators, inputs, Some(output));
        let op_name = operators.first().map(|o| o.as_str()).unwrap_or("");
        run_tool(&self.program, &args, self.workdir.as_deref())
            .change_context_lazy(|| CouplingError::GridOperation(op_name.to_string()))?;
        Ok(GriddedDataset::new(output))
    }

    fn query(&self, operator: &str, input: &Path) -> CouplingResult<String> {
        let args = build_args(&[operator.to_string()], &[input], None);
        let stdout = run_tool(&self.program, &args, self.workdir.as_deref())
            .change_context_lazy(|| CouplingError::GridOperation(operator.to_string()))
            .attach_printable_lazy(|| format!("Querying {}", input.display()))?;
        Ok(stdout)
    }
}

impl GridOperations for Cdo {
    fn describe(&self, dataset: &GriddedDataset) -> CouplingResult<DatasetInfo> {
        let pardes = self.query("pardes", dataset.path())?;
        let variables = parse_pardes(&pardes);
        let ntime = self.query("ntime", dataset.path())?;
        let ntime = parse_ntime(&ntime)
            .map_err(|e| ToolError::BadOutput { program: self.program.clone(), reason: e })
            .change_context_lazy(|| CouplingError::GridOperation("ntime".to_string()))?;
        Ok(DatasetInfo { variables, ntime })
    }

    fn select_timestep(&self, index: usize, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        // CDO counts timesteps from 1
        self.apply(&[format!("seltimestep,{}", index + 1)], &[dataset.path()], output)
    }

    fn select_variable(&self, name: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        self.apply(&[format!("selname,{name}")], &[dataset.path()], output)
    }

    fn evaluate_expression(&self, expression: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        self.apply(&[format!("expr,{expression}")], &[dataset.path()], output)
    }

    fn subtract(&self, minuend: &GriddedDataset, subtrahend: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        self.apply(&["sub".to_string()], &[minuend.path(), subtrahend.path()], output)
    }

    fn multiply(&self, lhs: &GriddedDataset, rhs: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        self.apply(&["mul".to_string()], &[lhs.path(), rhs.path()], output)
    }

    fn merge(&self, datasets: &[&GriddedDataset], output: &Path) -> CouplingResult<GriddedDataset> {
        let inputs: Vec<&Path> = datasets.iter().map(|d| d.path()).collect();
        self.apply(&["merge".to_string()], &inputs, output)
    }

    fn resample(&self, dataset: &GriddedDataset, target: &GridDescriptor, output: &Path) -> CouplingResult<GriddedDataset> {
        self.remap(dataset, target, RemapMethod::Conservative, output)
    }

    fn interpolate(&self, dataset: &GriddedDataset, target: &GridDescriptor, output: &Path) -> CouplingResult<GriddedDataset> {
        self.remap(dataset, target, RemapMethod::Bilinear, output)
    }

    fn remap(&self, dataset: &GriddedDataset, target: &GridDescriptor, method: RemapMethod, output: &Path) -> CouplingResult<GriddedDataset> {
        let op = format!("{},{}", method.cdo_operator(), target.path().display());
        self.apply(&[op], &[dataset.path()], output)
    }

    fn set_time_axis(&self, dataset: &GriddedDataset, axis: &TimeAxis, output: &Path) -> CouplingResult<GriddedDataset> {
        let ops = [
            format!("setcalendar,{}", axis.calendar),
            format!("settaxis,{},{},{}", axis.start_date, axis.start_time, axis.increment),
        ];
        self.apply(&ops, &[dataset.path()], output)
    }

    fn in_workdir(&self, workdir: &Path) -> Option<Box<dyn GridOperations + '_>> {
        Some(Box::new(Cdo { program: self.program.clone(), workdir: Some(workdir.to_path_buf()) }))
    }
}

/// Build a CDO command line: silent and overwriting, with the first operator
/// bare and any chained operators prefixed with a dash.
fn build_args(operators: &[String], inputs: &[&Path], output: Option<&Path>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-s".into(), "-O".into()];
    for (i, op) in operators.iter().enumerate() {
        if i == 0 {
            args.push(op.into());
        } else {
            args.push(format!("-{op}").into());
        }
    }
    args.extend(inputs.iter().map(|p| p.as_os_str().to_owned()));
    if let Some(out) = output {
        args.push(out.as_os_str().to_owned());
    }
    args
}

/// Parse the output of `cdo pardes`: one line per variable with its code,
/// name, and a description that may end with the units in square brackets.
fn parse_pardes(output: &str) -> indexmap::IndexMap<String, VariableInfo> {
    let line_re = PARDES_REGEX.get_or_init(|| {
        regex::Regex::new(r"^\s*-?\d+\s+(?<name>\S+)(?:\s+(?<descr>.*?))?\s*$")
            .expect("Could not compile pardes line regex")
    });
    let units_re = UNITS_REGEX.get_or_init(|| {
        regex::Regex::new(r"\[(?<units>[^\]]*)\]$").expect("Could not compile units regex")
    });

    output.lines()
        .filter_map(|line| line_re.captures(line))
        .map(|caps| {
            let units = caps.name("descr")
                .and_then(|d| units_re.captures(d.as_str()))
                .map(|u| u["units"].trim().to_string())
                .filter(|u| !u.is_empty());
            (caps["name"].to_string(), VariableInfo { units })
        })
        .collect()
}

fn parse_ntime(output: &str) -> Result<usize, String> {
    let s = output.trim();
    s.parse::<usize>()
        .map_err(|e| format!("expected a number of timesteps, got '{s}' ({e})"))
}
