pub mod pipeline;
pub mod renderer;
pub mod scheduler;
pub mod simulation;

pub use pipeline::{ActiveSimulation, SimulationPlugin};
pub use renderer::{Frame, NullRenderer, Renderer};
pub use scheduler::{DeviceBuffer, ForceIntegrationScheduler, SchedulerState, StopHandle};
pub use simulation::SimulationState;
