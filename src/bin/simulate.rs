//! Batch galaxy generation.
//! Writes one `.glxy` per seed and prints a summary line for each.

use std::path::PathBuf;

use galaxy_core::{GenerationSettings, SimConfig};
use galaxy_physics::GalaxyGenerator;
use galaxy_physics::forces::{center_of_mass, total_momentum};

struct Batch {
    runs: u64,
    first_seed: u64,
    bodies: usize,
    collision: bool,
    out_dir: PathBuf,
}

fn parse() -> Result<Batch, String> {
    let defaults = SimConfig::default();
    let mut batch = Batch {
        runs: 10,
        first_seed: defaults.seed,
        bodies: defaults.body_count as usize,
        collision: false,
        out_dir: PathBuf::from("galaxies"),
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        let mut value = |name: &str| it.next().ok_or(format!("{name} needs a value"));
        match arg.as_str() {
            "--runs" => batch.runs = value("--runs")?.parse().map_err(|e| format!("--runs: {e}"))?,
            "--seed" => batch.first_seed = value("--seed")?.parse().map_err(|e| format!("--seed: {e}"))?,
            "--bodies" => batch.bodies = value("--bodies")?.parse().map_err(|e| format!("--bodies: {e}"))?,
            "--out" => batch.out_dir = PathBuf::from(value("--out")?),
            "--collision" => batch.collision = true,
            other => return Err(format!("unknown argument {other}")),
        }
    }
    Ok(batch)
}

fn main() {
    let batch = match parse() {
        Ok(batch) => batch,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("usage: simulate [--runs N] [--seed S] [--bodies N] [--out DIR] [--collision]");
            std::process::exit(2);
        }
    };

    let settings = if batch.collision {
        GenerationSettings::collision(30.0, 60.0, 200.0, 5e-5)
    } else {
        GenerationSettings::single(50.0)
    };

    eprintln!("Generating {} populations of {} bodies...", batch.runs, batch.bodies);

    let mut failures = 0;
    for run in 0..batch.runs {
        let seed = batch.first_seed.wrapping_add(run);
        let population = match GalaxyGenerator::new(seed).generate(&settings, batch.bodies) {
            Ok(population) => population,
            Err(e) => {
                eprintln!("seed {seed}: {e}");
                failures += 1;
                continue;
            }
        };

        let path = batch.out_dir.join(format!("galaxy_{seed}.glxy"));
        if let Err(e) = galaxy_storage::save(&population.bodies, &path) {
            eprintln!("seed {seed}: {e}");
            failures += 1;
            continue;
        }

        let com = center_of_mass(&population.bodies);
        let p = total_momentum(&population.bodies);
        let total_mass: f64 = population.bodies.iter().map(|b| b.mass as f64).sum();
        let max_speed = population
            .bodies
            .iter()
            .map(|b| b.speed())
            .fold(0.0f32, f32::max);
        println!(
            "{seed:>20}  galaxies={}  mass={total_mass:.3e}  com=({:.2}, {:.2}, {:.2})  |p|={:.3e}  vmax={max_speed:.3e}  -> {}",
            population.galaxies.len(),
            com[0],
            com[1],
            com[2],
            (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt(),
            path.display()
        );
    }

    if failures > 0 {
        eprintln!("{failures} of {} runs failed", batch.runs);
        std::process::exit(1);
    }
}
