use galaxy_core::{Body, format_elapsed};
use galaxy_gpu::{ComputeDevice, SimulationContext};
use uuid::Uuid;

/// One running simulation: the device context plus its clock.
///
/// Created when a population is allocated, replaced wholesale by reset or
/// by opening a file, dropped on stop or teardown.
pub struct SimulationState<D: ComputeDevice> {
    id: Uuid,
    context: SimulationContext<D>,
    step_years: f32,
    elapsed_steps: u64,
    /// Population the simulation started from, for restoring
    initial: Vec<Body>,
}

impl<D: ComputeDevice> SimulationState<D> {
    pub fn new(context: SimulationContext<D>, step_years: f32, initial: Vec<Body>) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            step_years,
            elapsed_steps: 0,
            initial,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn context(&self) -> &SimulationContext<D> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SimulationContext<D> {
        &mut self.context
    }

    pub fn step_years(&self) -> f32 {
        self.step_years
    }

    pub fn elapsed_steps(&self) -> u64 {
        self.elapsed_steps
    }

    pub fn elapsed_years(&self) -> f64 {
        self.elapsed_steps as f64 * self.step_years as f64
    }

    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed_years())
    }

    pub fn initial_bodies(&self) -> &[Body] {
        &self.initial
    }

    pub(crate) fn record_step(&mut self) {
        self.elapsed_steps += 1;
    }

    pub(crate) fn reset_clock(&mut self) {
        self.elapsed_steps = 0;
    }
}
