use std::marker::PhantomData;
use std::path::PathBuf;

use bevy::prelude::*;
use galaxy_gpu::ComputeApi;

use crate::renderer::Frame;
use crate::scheduler::{DeviceBuffer, ForceIntegrationScheduler, SchedulerState, StopHandle};

/// The scheduler driven by the app, one step per frame
#[derive(Resource)]
pub struct ActiveSimulation<A: ComputeApi> {
    pub scheduler: ForceIntegrationScheduler<A>,
    /// Exit after this many steps
    pub max_steps: Option<u64>,
    pub stop: StopHandle,
    /// Where the final population is saved on exit
    pub output: Option<PathBuf>,
    /// Log progress every this many steps
    pub report_every: u64,
}

impl<A: ComputeApi> ActiveSimulation<A> {
    pub fn new(scheduler: ForceIntegrationScheduler<A>) -> Self {
        Self {
            scheduler,
            max_steps: None,
            stop: StopHandle::new(),
            output: None,
            report_every: 100,
        }
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = Some(max_steps);
        self
    }

    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output = Some(path.into());
        self
    }

    fn finished(&self) -> bool {
        self.stop.is_stop_requested()
            || self
                .max_steps
                .is_some_and(|max| self.scheduler.elapsed_steps() >= max)
    }
}

/// Bevy plugin stepping an `ActiveSimulation<A>` in `Update`
pub struct SimulationPlugin<A> {
    _api: PhantomData<fn() -> A>,
}

impl<A> Default for SimulationPlugin<A> {
    fn default() -> Self {
        Self { _api: PhantomData }
    }
}

impl<A: ComputeApi> Plugin for SimulationPlugin<A> {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, simulation_tick::<A>);
    }
}

fn simulation_tick<A: ComputeApi>(
    mut active: ResMut<ActiveSimulation<A>>,
    mut exit: EventWriter<AppExit>,
) {
    let active = &mut *active;
    if active.scheduler.state() != SchedulerState::Running {
        return;
    }

    if active.finished() {
        match finish(active) {
            Ok(()) => exit.send(AppExit::Success),
            Err(e) => {
                error!("Could not finish simulation: {e}");
                exit.send(AppExit::error())
            }
        };
        return;
    }

    let report_every = active.report_every.max(1);
    let mut report = |frame: Frame<'_, DeviceBuffer<A>>| {
        if frame.step % report_every == 0 {
            info!(
                "Step {} ({}), {} bodies in buffer {:?}",
                frame.step,
                galaxy_core::format_elapsed(frame.elapsed_years),
                frame.body_count,
                frame.role
            );
        }
    };
    match active.scheduler.step(&mut report) {
        Ok(()) => {}
        Err(e) if e.is_recoverable() => warn!("Step delayed: {e}"),
        Err(e) => {
            error!("Simulation aborted: {e}");
            exit.send(AppExit::error());
        }
    }
}

/// Save the final population when requested, then stop
fn finish<A: ComputeApi>(active: &mut ActiveSimulation<A>) -> Result<(), galaxy_core::EngineError> {
    active.scheduler.pause()?;
    if let Some(path) = &active.output {
        let bodies = active.scheduler.snapshot()?;
        galaxy_storage::save(&bodies, path)?;
    }
    active.scheduler.stop()
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_core::{Body, SimConfig};
    use galaxy_gpu::{DeviceCapabilityNegotiator, HostApi};

    fn app_with(steps: u64, output: Option<PathBuf>) -> App {
        let config = SimConfig {
            body_count: 64,
            ..SimConfig::default()
        };
        let mut scheduler =
            ForceIntegrationScheduler::new(DeviceCapabilityNegotiator::new(HostApi::default()), config).unwrap();
        let bodies = (0..64)
            .map(|i| Body::new(i, [i as f32, (i % 8) as f32, 0.0], [0.0; 3], 1.0))
            .collect();
        scheduler.prepare(bodies).unwrap();
        scheduler.start().unwrap();

        let mut active = ActiveSimulation::new(scheduler).with_max_steps(steps);
        active.output = output;

        let mut app = App::new();
        app.add_event::<AppExit>()
            .insert_resource(active)
            .add_plugins(SimulationPlugin::<HostApi>::default());
        app
    }

    #[test]
    fn tick_steps_until_the_limit_then_stops() {
        let mut app = app_with(3, None);
        for _ in 0..3 {
            app.update();
        }
        {
            let active = app.world().resource::<ActiveSimulation<HostApi>>();
            assert_eq!(active.scheduler.elapsed_steps(), 3);
            assert_eq!(active.scheduler.state(), SchedulerState::Running);
        }

        app.update();
        let active = app.world().resource::<ActiveSimulation<HostApi>>();
        assert_eq!(active.scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn finishing_saves_the_population() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.glxy");
        let mut app = app_with(1, Some(path.clone()));
        app.update();
        app.update();

        assert_eq!(galaxy_storage::load(&path, 64).unwrap().len(), 64);
    }
}
