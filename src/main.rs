use std::path::PathBuf;

use bevy::log::LogPlugin;
use bevy::prelude::*;
use galaxy_core::*;
use galaxy_gpu::{ComputeApi, DeviceCapabilityNegotiator, HostApi, WgpuApi};
use galaxy_physics::GalaxyGenerator;
use galaxy_sim::{ActiveSimulation, ForceIntegrationScheduler, SimulationPlugin};

const USAGE: &str = "usage: galaxy [--config FILE] [--open FILE.glxy] [--output FILE.glxy] [--steps N] [--host]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    open: Option<PathBuf>,
    output: Option<PathBuf>,
    steps: Option<u64>,
    host: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => args.config = it.next().map(PathBuf::from),
            "--open" => args.open = it.next().map(PathBuf::from),
            "--output" => args.output = it.next().map(PathBuf::from),
            "--steps" => {
                let value = it.next().ok_or("--steps needs a value")?;
                args.steps = Some(value.parse().map_err(|_| format!("bad step count {value}"))?);
            }
            "--host" => args.host = true,
            other => return Err(format!("unknown argument {other}")),
        }
    }
    Ok(args)
}

/// Prepare the scheduler on `api` and hand it to the app
fn launch<A: ComputeApi>(app: &mut App, api: A, config: SimConfig, args: &Args) -> Result<(), EngineError> {
    let negotiator = DeviceCapabilityNegotiator::new(api);
    negotiator.list_platforms()?;

    let bodies = match &args.open {
        Some(path) => {
            let bodies = galaxy_storage::load(path, config.min_body_count as usize)?;
            info!("Opened {} bodies from {}", bodies.len(), path.display());
            bodies
        }
        None => {
            let population = GalaxyGenerator::new(config.seed)
                .generate(&config.generation, config.body_count as usize)?;
            info!(
                "Generated {} bodies in {} galaxies",
                population.bodies.len(),
                population.galaxies.len()
            );
            population.bodies
        }
    };

    let mut scheduler = ForceIntegrationScheduler::new(negotiator, config)?;
    scheduler.prepare(bodies)?;
    scheduler.start()?;

    let mut active = ActiveSimulation::new(scheduler);
    active.max_steps = args.steps;
    active.output = args.output.clone();
    app.insert_resource(active)
        .add_plugins(SimulationPlugin::<A>::default());
    Ok(())
}

fn main() -> AppExit {
    let mut app = App::new();
    app.add_plugins((MinimalPlugins, LogPlugin::default()));

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            error!("{e}\n{USAGE}");
            return AppExit::error();
        }
    };

    let config = match &args.config {
        Some(path) => galaxy_storage::load_config_or_default(path),
        None => SimConfig::default(),
    };

    let launched = if args.host {
        launch(&mut app, HostApi::default(), config.clone(), &args)
    } else {
        launch(&mut app, WgpuApi::default(), config.clone(), &args)
    };
    if let Err(e) = launched {
        error!("Could not start simulation: {e}");
        return AppExit::error();
    }

    if let Some(path) = &args.config {
        if let Err(e) = galaxy_storage::save_config(&config, path) {
            warn!("Could not store settings: {e}");
        }
    }

    app.run()
}
