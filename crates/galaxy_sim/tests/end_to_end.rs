use galaxy_core::*;
use galaxy_gpu::{DeviceCapabilityNegotiator, HostApi};
use galaxy_physics::GalaxyGenerator;
use galaxy_sim::{ForceIntegrationScheduler, NullRenderer, SchedulerState, StopHandle};

#[test]
fn generated_galaxy_survives_save_and_load() {
    let settings = GenerationSettings::single(50.0).with_star_mass(0.1, 2.0);
    let population = GalaxyGenerator::new(2024).generate(&settings, 500).unwrap();
    let layout = &population.galaxies[0];
    assert_eq!(population.bodies.len(), 500);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("galaxy.glxy");
    galaxy_storage::save(&population.bodies, &path).unwrap();
    let loaded = galaxy_storage::load(&path, 500).unwrap();

    assert_eq!(loaded.len(), 500);
    assert_eq!(loaded, population.bodies);
    for body in &loaded[layout.black_holes..] {
        assert!(settings.star_mass.contains(body.mass), "star mass {}", body.mass);
    }
    for body in &loaded[..layout.black_holes] {
        assert!(settings.black_hole_mass.contains(body.mass));
    }
}

#[test]
fn simulated_galaxy_can_be_saved_and_reopened() {
    let config = SimConfig {
        body_count: 500,
        min_body_count: 500,
        generation: GenerationSettings::single(50.0).with_star_mass(0.1, 2.0),
        ..SimConfig::default()
    };
    let population = GalaxyGenerator::new(config.seed)
        .generate(&config.generation, config.body_count as usize)
        .unwrap();

    let mut scheduler =
        ForceIntegrationScheduler::new(DeviceCapabilityNegotiator::new(HostApi::default()), config).unwrap();
    scheduler.prepare(population.bodies.clone()).unwrap();
    scheduler.start().unwrap();
    assert_eq!(scheduler.run(&mut NullRenderer, Some(5), &StopHandle::new()).unwrap(), 5);
    scheduler.pause().unwrap();

    let evolved = scheduler.snapshot().unwrap();
    assert_ne!(evolved, population.bodies);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evolved.glxy");
    galaxy_storage::save(&evolved, &path).unwrap();

    let reopened = galaxy_storage::load(&path, 500).unwrap();
    assert_eq!(reopened, evolved);
    scheduler.replace_bodies(reopened).unwrap();
    assert_eq!(scheduler.state(), SchedulerState::BuffersAllocated);
    assert_eq!(scheduler.snapshot().unwrap(), evolved);

    assert!(matches!(
        galaxy_storage::load(&path, 501),
        Err(IoError::InsufficientBodies {
            required: 501,
            found: 500
        })
    ));
}
