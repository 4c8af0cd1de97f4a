use std::process::ExitCode;

use clap::Parser;
use error_stack::ResultExt;
use ice_coupler::{
    attributes::Nco,
    bundle::ForcingBundle,
    config::CouplingConfig,
    dataset::GriddedDataset,
    error::{CouplingError, CouplingResult},
    exporter::IceToEarthExporter,
    gridops::Cdo,
    logging::init_logging,
    pipeline::CouplingPipeline,
    submodel::SemicExecutable,
    ablation::AblationChoice,
};

mod cli;

fn main() -> ExitCode {
    let clargs = cli::Cli::parse();
    init_logging(clargs.verbosity.log_level_filter(), clargs.log_file.as_deref());
    if let Err(e) = main_inner(clargs.command) {
        eprintln!("ERROR: {e:?}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_inner(command: cli::Commands) -> CouplingResult<()> {
    match command {
        cli::Commands::Couple(args) => couple(args),
        cli::Commands::ExportSolidEarth(args) => export(args),
        cli::Commands::ShowConfig(args) => {
            let config = CouplingConfig::load(&args.config)?;
            println!("Configuration:\n\n{config:#?}");
            Ok(())
        },
    }
}

fn couple(args: cli::CoupleCli) -> CouplingResult<()> {
    let config = CouplingConfig::load(&args.config.config)?;
    let context = config.context()?;
    let cdo = Cdo::new(&config.tools.cdo);
    let nco = Nco::new(config.tools.nco_dir.clone());
    let submodel = match &context.ablation {
        AblationChoice::EnergyBalance(settings) => Some(SemicExecutable::new(&settings.executable, settings.args.clone())),
        AblationChoice::PositiveDegreeDay => None,
    };

    let mut pipeline = CouplingPipeline::new(&cdo, &nco);
    if let Some(submodel) = &submodel {
        pipeline = pipeline.with_submodel(submodel);
    }
    let bundle = pipeline.run(&context)?;

    if args.json {
        print_json(&bundle)
    } else {
        if let Some(spec) = &bundle.spec {
            println!("{}", spec.options().join(" "));
        }
        Ok(())
    }
}

fn export(args: cli::ExportCli) -> CouplingResult<()> {
    let config = CouplingConfig::load(&args.config.config)?;
    let context = config.context()?;
    let cdo = Cdo::new(&config.tools.cdo);
    let bundle = IceToEarthExporter::new(&cdo).export(&GriddedDataset::new(&args.ice_output), &context)?;

    if args.json {
        print_json(&bundle)
    } else {
        for f in bundle.files.iter().chain([&bundle.grid_description, &bundle.variable_description]) {
            println!("{}", f.display());
        }
        Ok(())
    }
}

fn print_json(bundle: &ForcingBundle) -> CouplingResult<()> {
    let s = serde_json::to_string_pretty(bundle)
        .change_context_lazy(|| CouplingError::Write("stdout".into()))?;
    println!("{s}");
    Ok(())
}
