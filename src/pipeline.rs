//! One coupling step from atmosphere output to ice model forcing.
use error_stack::ResultExt;

use crate::ablation::AblationForcing;
use crate::attributes::AttributeEditor;
use crate::bundle::{BundleBuilder, ForcingBundle};
use crate::context::CouplingContext;
use crate::elevation::ElevationReconciler;
use crate::error::CouplingResult;
use crate::gridops::GridOperations;
use crate::scratch::ScratchArea;
use crate::submodel::SurfaceSubmodel;
use crate::transform::FieldTransform;

/// The external tools a run delegates to.
#[derive(Clone, Copy)]
pub struct Toolbox<'a> {
    pub grid: &'a dyn GridOperations,
    pub attributes: &'a dyn AttributeEditor,
    /// Only needed by the energy balance ablation scheme
    pub submodel: Option<&'a dyn SurfaceSubmodel>,
}

/// Runs the coupling stages in order: elevation difference (if the transform
/// needs one), transform, ablation forcing, bundle commit.
///
/// All intermediate files live in a scratch area created for the run and
/// removed when it ends, whether it succeeded or not. Nothing is written to the
/// output directory until every stage has succeeded.
pub struct CouplingPipeline<'a> {
    tools: Toolbox<'a>,
}

impl<'a> CouplingPipeline<'a> {
    pub fn new(grid: &'a dyn GridOperations, attributes: &'a dyn AttributeEditor) -> Self {
        Self { tools: Toolbox { grid, attributes, submodel: None } }
    }

    pub fn with_submodel(mut self, submodel: &'a dyn SurfaceSubmodel) -> Self {
        self.tools.submodel = Some(submodel);
        self
    }

    pub fn run(&self, context: &CouplingContext) -> CouplingResult<ForcingBundle> {
        let transform = context.transform.strategy();
        let ablation = context.ablation.strategy();
        log::info!(
            "Coupling {} for {} with transform '{}' and ablation scheme '{}'",
            context.model_name, context.date, transform.name(), ablation.name()
        );
        ablation.check_tools(&self.tools)?;

        let mut scratch = ScratchArea::create(&context.scratch_parent, &context.scratch_prefix())?;
        let scoped_grid = self.tools.grid.in_workdir(scratch.path());
        let tools = Toolbox {
            grid: scoped_grid.as_deref().unwrap_or(self.tools.grid),
            attributes: self.tools.attributes,
            submodel: self.tools.submodel,
        };
        let outcome = Self::run_stages(&tools, transform.as_ref(), ablation.as_ref(), &mut scratch, context);
        for e in scratch.cleanup() {
            log::warn!("{e}");
        }

        if let Ok(bundle) = &outcome {
            log::info!("Ice forcing ready in {}", context.output_dir.display());
            if let Some(spec) = &bundle.spec {
                log::debug!("Ice model options: {}", spec.options().join(" "));
            }
        }
        outcome
    }

    fn run_stages(
        tools: &Toolbox<'_>,
        transform: &dyn FieldTransform,
        ablation: &dyn AblationForcing,
        scratch: &mut ScratchArea,
        context: &CouplingContext,
    ) -> CouplingResult<ForcingBundle> {
        let difference = if transform.needs_elevation_difference() {
            let diff = ElevationReconciler::new(tools.grid)
                .compute_difference(&context.ice, &context.lo_res_elevation, scratch, context)
                .attach_printable("Computing the elevation difference between ice and atmosphere surfaces")?;
            Some(diff)
        } else {
            None
        };

        let fields = transform
            .produce(tools, scratch, context, &context.atmosphere, difference.as_ref())
            .attach_printable_lazy(|| format!("Transforming atmosphere fields with '{}'", transform.name()))?;

        let prepared = ablation
            .prepare(tools, scratch, &fields, context)
            .attach_printable_lazy(|| format!("Preparing '{}' forcing", ablation.name()))?;

        let mut builder = BundleBuilder::new(
            &context.output_dir,
            &context.model_type,
            scratch,
            &context.pooled_grid_file(),
            &prepared.variables,
        )?;
        builder.add_dataset(&prepared.dataset, &context.forcing_file_name());
        builder.commit(Some(prepared.spec))
    }
}
