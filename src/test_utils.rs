//! In-process stand-ins for the external tools, for unit tests.
//!
//! Datasets are small JSON files holding a named one-dimensional grid, a
//! calendar, a time axis and per-timestep values of each variable. The fakes
//! implement just enough of each operation's semantics to check numbers
//! end to end: resampling averages blocks of cells, interpolation and
//! remapping repeat the nearest source cell.
use std::path::Path;
use std::sync::Mutex;

use error_stack::ResultExt;
use indexmap::IndexMap;
use pest::{iterators::Pair, Parser};
use pest_derive::Parser;
use serde::{Deserialize, Serialize};

use crate::ablation::AblationChoice;
use crate::attributes::AttributeEditor;
use crate::bundle::GridPool;
use crate::context::{AtmosphereVariables, ComputeRequirements, CouplingContext, IceVariables};
use crate::dataset::{DatasetInfo, GridDescriptor, GriddedDataset, VariableInfo};
use crate::error::{CouplingError, CouplingResult};
use crate::exporter::SolidEarthSettings;
use crate::gridops::{GridOperations, RemapMethod, TimeAxis};
use crate::submodel::SurfaceSubmodel;
use crate::transform::TransformChoice;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeGrid {
    pub name: String,
    pub size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeVariable {
    pub units: Option<String>,
    /// Values indexed by timestep, then cell
    pub values: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FakeDataset {
    pub grid: FakeGrid,
    pub calendar: Option<String>,
    pub time: Vec<f64>,
    pub variables: IndexMap<String, FakeVariable>,
}

impl FakeDataset {
    pub fn new(grid_name: &str, size: usize) -> Self {
        Self {
            grid: FakeGrid { name: grid_name.to_string(), size },
            calendar: None,
            time: vec![],
            variables: IndexMap::new(),
        }
    }

    /// Add a variable. The first variable added defines the time axis.
    pub fn with_variable(mut self, name: &str, units: Option<&str>, values: Vec<Vec<f64>>) -> Self {
        if self.time.is_empty() {
            self.time = (0..values.len()).map(|i| i as f64).collect();
        }
        self.variables.insert(
            name.to_string(),
            FakeVariable { units: units.map(|u| u.to_string()), values },
        );
        self
    }

    pub fn write(&self, path: &Path) -> GriddedDataset {
        let json = serde_json::to_string_pretty(self).unwrap();
        std::fs::write(path, json).unwrap();
        GriddedDataset::new(path)
    }

    pub fn read(path: &Path) -> CouplingResult<Self> {
        let s = std::fs::read_to_string(path)
            .change_context_lazy(|| CouplingError::GridOperation(format!("read {}", path.display())))?;
        serde_json::from_str(&s)
            .change_context_lazy(|| CouplingError::GridOperation(format!("parse {}", path.display())))
    }

    fn save(&self, output: &Path) -> CouplingResult<GriddedDataset> {
        let json = serde_json::to_string_pretty(self)
            .change_context_lazy(|| CouplingError::Write(output.to_path_buf()))?;
        std::fs::write(output, json)
            .change_context_lazy(|| CouplingError::Write(output.to_path_buf()))?;
        Ok(GriddedDataset::new(output))
    }

    fn with_same_axes(&self) -> Self {
        Self { variables: IndexMap::new(), ..self.clone() }
    }

    fn ntime(&self) -> usize {
        self.time.len()
    }
}

fn fail<T>(op: &str, reason: String) -> CouplingResult<T> {
    Err(error_stack::Report::new(CouplingError::GridOperation(op.to_string())).attach_printable(reason))
}

/// Value of `values` at timestep `t`, repeating a single timestep for all times.
fn at_time(values: &[Vec<f64>], t: usize) -> &[f64] {
    if values.len() == 1 { &values[0] } else { &values[t] }
}

/// [`GridOperations`] on [`FakeDataset`] files. Records each call without
/// file paths, e.g. "select_variable temp2".
#[derive(Debug, Default)]
pub struct FakeGridOps {
    calls: Mutex<Vec<String>>,
}

impl FakeGridOps {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record<S: Into<String>>(&self, call: S) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn combine(&self, op: &str, a: &GriddedDataset, b: &GriddedDataset, output: &Path, f: fn(f64, f64) -> f64) -> CouplingResult<GriddedDataset> {
        self.record(op);
        let a = FakeDataset::read(a.path())?;
        let b = FakeDataset::read(b.path())?;
        if a.grid != b.grid {
            return fail(op, format!("grids differ: {:?} vs {:?}", a.grid, b.grid));
        }

        let mut out = if a.ntime() >= b.ntime() { a.with_same_axes() } else { b.with_same_axes() };
        for ((name, va), (_, vb)) in a.variables.iter().zip(b.variables.iter()) {
            let nt = va.values.len().max(vb.values.len());
            let values = (0..nt)
                .map(|t| {
                    at_time(&va.values, t).iter().zip(at_time(&vb.values, t)).map(|(&x, &y)| f(x, y)).collect()
                })
                .collect();
            out.variables.insert(name.clone(), FakeVariable { units: va.units.clone(), values });
        }
        out.save(output)
    }

    fn regrid(&self, dataset: &GriddedDataset, target: &GridDescriptor, output: &Path, average: bool) -> CouplingResult<GriddedDataset> {
        let data = FakeDataset::read(dataset.path())?;
        let target_grid = FakeDataset::read(target.path())?.grid;
        let (n, m) = (data.grid.size, target_grid.size);

        let mut out = data.with_same_axes();
        out.grid = target_grid;
        for (name, var) in data.variables.iter() {
            let values = var.values.iter()
                .map(|src| {
                    (0..m).map(|j| {
                        if average {
                            let block: Vec<f64> = (0..n).filter(|i| i * m / n == j).map(|i| src[i]).collect();
                            block.iter().sum::<f64>() / block.len() as f64
                        } else {
                            src[j * n / m]
                        }
                    }).collect()
                })
                .collect();
            out.variables.insert(name.clone(), FakeVariable { units: var.units.clone(), values });
        }
        out.save(output)
    }
}

impl GridOperations for FakeGridOps {
    fn describe(&self, dataset: &GriddedDataset) -> CouplingResult<DatasetInfo> {
        self.record("describe");
        let data = FakeDataset::read(dataset.path())?;
        let variables = data.variables.iter()
            .map(|(name, var)| (name.clone(), VariableInfo { units: var.units.clone() }))
            .collect();
        Ok(DatasetInfo { variables, ntime: data.ntime() })
    }

    fn select_timestep(&self, index: usize, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        self.record(format!("select_timestep {index}"));
        let data = FakeDataset::read(dataset.path())?;
        if index >= data.ntime() {
            return fail("select_timestep", format!("{index} out of range"));
        }
        let mut out = data.with_same_axes();
        out.time = vec![data.time[index]];
        for (name, var) in data.variables.iter() {
            let values = vec![at_time(&var.values, index).to_vec()];
            out.variables.insert(name.clone(), FakeVariable { units: var.units.clone(), values });
        }
        out.save(output)
    }

    fn select_variable(&self, name: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        self.record(format!("select_variable {name}"));
        let data = FakeDataset::read(dataset.path())?;
        let Some(var) = data.variables.get(name) else {
            return fail("select_variable", format!("no variable {name}"));
        };
        let mut out = data.with_same_axes();
        out.variables.insert(name.to_string(), var.clone());
        out.save(output)
    }

    fn evaluate_expression(&self, expression: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        self.record(format!("evaluate_expression {expression}"));
        let data = FakeDataset::read(dataset.path())?;
        let Some((target, rhs)) = expression.trim_end_matches(';').split_once('=') else {
            return fail("evaluate_expression", format!("not an assignment: {expression}"));
        };
        let expr = match parse_expression(rhs) {
            Ok(e) => e,
            Err(e) => return fail("evaluate_expression", e),
        };

        let mut names = vec![];
        expr.variables(&mut names);
        let mut inputs = vec![];
        for name in &names {
            match data.variables.get(name.as_str()) {
                Some(v) => inputs.push(v),
                None => return fail("evaluate_expression", format!("unknown variable {name}")),
            }
        }

        let nt = inputs.iter().map(|v| v.values.len()).max().unwrap_or(1);
        let mut values = vec![];
        for t in 0..nt {
            let mut row = vec![];
            for c in 0..data.grid.size {
                let lookup = |name: &str| {
                    names.iter().position(|n| n == name).map(|i| at_time(&inputs[i].values, t)[c])
                };
                match expr.eval(&lookup) {
                    Ok(v) => row.push(v),
                    Err(e) => return fail("evaluate_expression", e),
                }
            }
            values.push(row);
        }

        let units = match (&expr, data.variables.get(target)) {
            (_, Some(existing)) => existing.units.clone(),
            (Expr::Var(source), None) => data.variables.get(source).and_then(|v| v.units.clone()),
            _ => None,
        };
        let mut out = data.with_same_axes();
        out.variables.insert(target.to_string(), FakeVariable { units, values });
        out.save(output)
    }

    fn subtract(&self, minuend: &GriddedDataset, subtrahend: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        self.combine("subtract", minuend, subtrahend, output, |a, b| a - b)
    }

    fn multiply(&self, lhs: &GriddedDataset, rhs: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        self.combine("multiply", lhs, rhs, output, |a, b| a * b)
    }

    fn merge(&self, datasets: &[&GriddedDataset], output: &Path) -> CouplingResult<GriddedDataset> {
        self.record("merge");
        let mut merged: Option<FakeDataset> = None;
        for ds in datasets {
            let data = FakeDataset::read(ds.path())?;
            match merged.as_mut() {
                None => merged = Some(data),
                Some(m) => {
                    if m.grid != data.grid {
                        return fail("merge", format!("grids differ: {:?} vs {:?}", m.grid, data.grid));
                    }
                    if data.ntime() > m.ntime() {
                        m.time = data.time.clone();
                    }
                    for (name, var) in data.variables {
                        m.variables.entry(name).or_insert(var);
                    }
                },
            }
        }
        match merged {
            Some(m) => m.save(output),
            None => fail("merge", "nothing to merge".to_string()),
        }
    }

    fn resample(&self, dataset: &GriddedDataset, target: &GridDescriptor, output: &Path) -> CouplingResult<GriddedDataset> {
        self.record("resample");
        self.regrid(dataset, target, output, true)
    }

    fn interpolate(&self, dataset: &GriddedDataset, target: &GridDescriptor, output: &Path) -> CouplingResult<GriddedDataset> {
        self.record("interpolate");
        self.regrid(dataset, target, output, false)
    }

    fn remap(&self, dataset: &GriddedDataset, target: &GridDescriptor, method: RemapMethod, output: &Path) -> CouplingResult<GriddedDataset> {
        self.record(format!("remap {method}"));
        self.regrid(dataset, target, output, false)
    }

    fn set_time_axis(&self, dataset: &GriddedDataset, axis: &TimeAxis, output: &Path) -> CouplingResult<GriddedDataset> {
        self.record("set_time_axis");
        let mut data = FakeDataset::read(dataset.path())?;
        data.calendar = Some(axis.calendar.clone());
        data.save(output)
    }

    fn in_workdir(&self, workdir: &Path) -> Option<Box<dyn GridOperations + '_>> {
        self.record(format!("workdir {}", workdir.display()));
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Exp(Box<Expr>),
    Bin(char, Box<Expr>, Box<Expr>),
}

impl Expr {
    fn variables(&self, names: &mut Vec<String>) {
        match self {
            Expr::Num(_) => {},
            Expr::Var(v) => {
                if !names.contains(v) {
                    names.push(v.clone());
                }
            },
            Expr::Neg(e) | Expr::Exp(e) => e.variables(names),
            Expr::Bin(_, a, b) => {
                a.variables(names);
                b.variables(names);
            },
        }
    }

    fn eval(&self, lookup: &dyn Fn(&str) -> Option<f64>) -> Result<f64, String> {
        let v = match self {
            Expr::Num(x) => *x,
            Expr::Var(v) => lookup(v).ok_or_else(|| format!("unknown variable {v}"))?,
            Expr::Neg(e) => -e.eval(lookup)?,
            Expr::Exp(e) => e.eval(lookup)?.exp(),
            Expr::Bin(op, a, b) => {
                let (a, b) = (a.eval(lookup)?, b.eval(lookup)?);
                match op {
                    '+' => a + b,
                    '-' => a - b,
                    '*' => a * b,
                    '/' => a / b,
                    _ => return Err(format!("unknown operator {op}")),
                }
            },
        };
        Ok(v)
    }
}

#[derive(Parser)]
#[grammar = "fake_expr.pest"]
struct ExprParser;

/// Parse the right hand side of an assignment such as `exp(-0.07*elevation)`.
fn parse_expression(s: &str) -> Result<Expr, String> {
    let mut parsed = ExprParser::parse(Rule::expression, s).map_err(|e| e.to_string())?;
    let sum = parsed.next()
        .and_then(|expr| expr.into_inner().next())
        .ok_or_else(|| format!("empty expression '{s}'"))?;
    Ok(build_expr(sum))
}

fn build_expr(pair: Pair<'_, Rule>) -> Expr {
    match pair.as_rule() {
        Rule::sum | Rule::product => {
            let mut inner = pair.into_inner();
            let mut lhs = build_expr(inner.next().unwrap());
            while let Some(op) = inner.next() {
                let rhs = build_expr(inner.next().unwrap());
                let op = op.as_str().chars().next().unwrap();
                lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
            }
            lhs
        },
        Rule::unary => {
            let mut parts: Vec<_> = pair.into_inner().collect();
            let operand = build_expr(parts.pop().unwrap());
            parts.iter().fold(operand, |e, _| Expr::Neg(Box::new(e)))
        },
        Rule::exp_call => Expr::Exp(Box::new(build_expr(pair.into_inner().next().unwrap()))),
        Rule::number => Expr::Num(pair.as_str().parse().unwrap()),
        Rule::variable => Expr::Var(pair.as_str().to_string()),
        rule => unreachable!("{rule:?} is not an expression node"),
    }
}

/// [`AttributeEditor`] on [`FakeDataset`] files.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeAttributes;

impl AttributeEditor for FakeAttributes {
    fn rename_variable(&self, old: &str, new: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        let mut data = FakeDataset::read(dataset.path())?;
        if !data.variables.contains_key(old) {
            error_stack::bail!(CouplingError::AttributeEdit(format!("rename {old} to {new}")));
        }
        data.variables = data.variables
            .into_iter()
            .map(|(k, v)| if k == old { (new.to_string(), v) } else { (k, v) })
            .collect();
        data.save(output)
    }

    fn set_unit(&self, variable: &str, unit: &str, dataset: &GriddedDataset, output: &Path) -> CouplingResult<GriddedDataset> {
        let mut data = FakeDataset::read(dataset.path())?;
        let Some(var) = data.variables.get_mut(variable) else {
            error_stack::bail!(CouplingError::AttributeEdit(format!("set units of {variable}")));
        };
        var.units = Some(unit.to_string());
        data.save(output)
    }
}

/// A surface energy balance model that reads `tas` and `pr` and writes
/// `smb` (half the precipitation, kg m-2 s-1) and `tsurf` (temperature capped
/// at melting, K).
#[derive(Debug, Default)]
pub struct FakeSubmodel {
    pub fail: bool,
    /// Leave this variable out of the output
    pub omit: Option<&'static str>,
    pub last_input: Mutex<Option<FakeDataset>>,
}

impl FakeSubmodel {
    pub fn last_input(&self) -> Option<FakeDataset> {
        self.last_input.lock().unwrap().clone()
    }
}

impl SurfaceSubmodel for FakeSubmodel {
    fn run(&self, forcing: &GriddedDataset, output: &Path, _workdir: &Path) -> CouplingResult<GriddedDataset> {
        let input = FakeDataset::read(forcing.path())?;
        *self.last_input.lock().unwrap() = Some(input.clone());
        if self.fail {
            error_stack::bail!(CouplingError::SubmodelExecution("exit status: 1".to_string()));
        }

        let var = |name: &str| {
            input.variables.get(name)
                .cloned()
                .ok_or_else(|| CouplingError::SubmodelExecution(format!("no {name} in input")))
        };
        let (tas, pr) = (var("tas")?, var("pr")?);

        let mut out = input.with_same_axes();
        let smb = pr.values.iter().map(|row| row.iter().map(|p| 0.5 * p).collect()).collect();
        let tsurf = tas.values.iter().map(|row| row.iter().map(|t| t.min(273.15)).collect()).collect();
        out.variables.insert("smb".to_string(), FakeVariable { units: Some("kg m-2 s-1".to_string()), values: smb });
        out.variables.insert("tsurf".to_string(), FakeVariable { units: Some("K".to_string()), values: tsurf });
        if let Some(name) = self.omit {
            out.variables.shift_remove(name);
        }
        out.save(output)
    }
}

/// A complete context with small datasets written to `dir`: a four cell ice
/// grid with `usurf` = [100, 300, 1000, 1200] m, and a two cell atmosphere grid
/// with `elevation` = [150, 1000] m and two timesteps of `temp2` (degC) and
/// `aprt` (kg m-2 s-1). The elevation difference on the atmosphere grid is
/// [50, 100] m.
pub fn sample_context(dir: &Path, transform: TransformChoice, ablation: AblationChoice) -> CouplingContext {
    let ice = FakeDataset::new("ice", 4)
        .with_variable("usurf", Some("m"), vec![vec![100.0, 300.0, 1000.0, 1200.0]])
        .write(&dir.join("ice.json"));
    let lo_res_elevation = FakeDataset::new("atmo", 2)
        .with_variable("elevation", Some("m"), vec![vec![150.0, 1000.0]])
        .write(&dir.join("lo_res_elevation.json"));
    let atmosphere = FakeDataset::new("atmo", 2)
        .with_variable("temp2", Some("degC"), vec![vec![-5.0, -10.0], vec![-3.0, -8.0]])
        .with_variable("aprt", Some("kg m-2 s-1"), vec![vec![1e-5, 2e-5], vec![3e-5, 4e-5]])
        .write(&dir.join("atmosphere.json"));
    let scratch_parent = dir.join("scratch");
    std::fs::create_dir_all(&scratch_parent).unwrap();

    CouplingContext {
        model_name: "pism".to_string(),
        model_type: "ice".to_string(),
        date: chrono::NaiveDate::from_ymd_opt(2000, 1, 1).unwrap(),
        transform,
        ablation,
        ice_grid: ice.grid(),
        ice,
        atmosphere,
        lo_res_elevation,
        atmosphere_variables: AtmosphereVariables::default(),
        ice_variables: IceVariables::default(),
        time_axis: TimeAxis {
            calendar: "365_day".to_string(),
            start_date: "2000-01-01".to_string(),
            start_time: "00:00:00".to_string(),
            increment: "1mon".to_string(),
        },
        output_dir: dir.join("outdata"),
        scratch_parent,
        grid_pool: GridPool {
            directory: dir.join("pool"),
            domain: "greenland".to_string(),
            lateral_resolution: "20km".to_string(),
        },
        compute: ComputeRequirements::default(),
        solid_earth: SolidEarthSettings::default(),
    }
}

#[test]
fn test_expression_parser() {
    let e = parse_expression("exp(-0.000455*elevation) * (2 + x) / 1e2").unwrap();
    let lookup = |n: &str| match n {
        "elevation" => Some(0.0),
        "x" => Some(3.0),
        _ => None,
    };
    assert_eq!(e.eval(&lookup).unwrap(), 0.05);
    assert_eq!(parse_expression("a-b-c").unwrap().eval(&|_| Some(1.0)).unwrap(), -1.0);
    assert_eq!(parse_expression("--2*exponent").unwrap().eval(&|_| Some(3.0)).unwrap(), 6.0);
    let mut names = vec![];
    parse_expression("0.000455*dz + exp(dz/thk)").unwrap().variables(&mut names);
    assert_eq!(names, ["dz", "thk"]);
    assert!(parse_expression("a+").is_err());
    assert!(parse_expression("exp(a").is_err());
}
