use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bevy::prelude::*;
use galaxy_core::*;
use galaxy_gpu::{
    CompiledProgram, ComputeApi, ComputeDevice, DeviceCapabilities, DeviceCapabilityNegotiator,
    Dispatch, DispatchRequest, ParticleBufferSet, ProgramSource, SimulationContext,
    compute_dispatch,
};

use crate::renderer::{Frame, Renderer};
use crate::simulation::SimulationState;

/// Consecutive transient failures `run` tolerates before giving up
const MAX_TRANSIENT_FAILURES: u32 = 3;

/// Device buffer type handed to renderers
pub type DeviceBuffer<A> = <<A as ComputeApi>::Device as ComputeDevice>::Buffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchedulerState {
    Uninitialized,
    DeviceReady,
    ProgramBuilt,
    BuffersAllocated,
    Running,
    Stopped,
    Error,
}

impl SchedulerState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::DeviceReady => "device ready",
            Self::ProgramBuilt => "program built",
            Self::BuffersAllocated => "buffers allocated",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Error => "in error",
        }
    }
}

/// Cooperative cancellation, checked between steps
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives device selection, program build, allocation and the per-step
/// launch / mark / await / swap protocol.
///
/// Fatal errors move the scheduler to `Error`, release the simulation and
/// evict the device from the negotiator's cache. `Error` and `Stopped` need
/// `reset()` before the next `select_device()`.
pub struct ForceIntegrationScheduler<A: ComputeApi> {
    simulation: Option<SimulationState<A::Device>>,
    program: Option<Arc<CompiledProgram<A::Device>>>,
    device: Option<Arc<A::Device>>,
    /// Body count the current program was sized for
    planned_bodies: u32,
    negotiator: DeviceCapabilityNegotiator<A>,
    source: ProgramSource,
    config: SimConfig,
    state: SchedulerState,
}

impl<A: ComputeApi> ForceIntegrationScheduler<A> {
    pub fn new(negotiator: DeviceCapabilityNegotiator<A>, config: SimConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            simulation: None,
            program: None,
            device: None,
            planned_bodies: 0,
            negotiator,
            source: ProgramSource::builtin(),
            config,
            state: SchedulerState::Uninitialized,
        })
    }

    pub fn with_source(mut self, source: ProgramSource) -> Self {
        self.source = source;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn negotiator(&self) -> &DeviceCapabilityNegotiator<A> {
        &self.negotiator
    }

    pub fn device(&self) -> Option<&Arc<A::Device>> {
        self.device.as_ref()
    }

    pub fn program(&self) -> Option<&Arc<CompiledProgram<A::Device>>> {
        self.program.as_ref()
    }

    pub fn simulation(&self) -> Option<&SimulationState<A::Device>> {
        self.simulation.as_ref()
    }

    pub fn select_device(&mut self) -> Result<DeviceCapabilities, EngineError> {
        self.require(&[SchedulerState::Uninitialized], "select a device")?;
        let DeviceSelection { platform, device } = self.config.device;
        match self.negotiator.select_device(platform, device) {
            Ok(opened) => {
                let caps = opened.capabilities().clone();
                self.device = Some(opened);
                self.state = SchedulerState::DeviceReady;
                Ok(caps)
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Size the launch for `body_count` and build the kernel for it
    pub fn build_program(&mut self, body_count: u32) -> Result<Dispatch, EngineError> {
        self.require(&[SchedulerState::DeviceReady], "build the program")?;
        match self.plan(body_count) {
            Ok(program) => {
                let dispatch = program.dispatch();
                self.program = Some(program);
                self.state = SchedulerState::ProgramBuilt;
                Ok(dispatch)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Create both buffers and upload `bodies` as the current population.
    /// Rebuilds the program when the count differs from the one it was
    /// sized for.
    pub fn allocate(&mut self, bodies: Vec<Body>) -> Result<(), EngineError> {
        self.require(&[SchedulerState::ProgramBuilt], "allocate buffers")?;
        match self.create_simulation(bodies) {
            Ok(simulation) => {
                info!(
                    "Simulation {} ready with {} bodies",
                    simulation.id(),
                    simulation.context().buffers().body_count()
                );
                self.simulation = Some(simulation);
                self.state = SchedulerState::BuffersAllocated;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Select the configured device, build and allocate in one go
    pub fn prepare(&mut self, bodies: Vec<Body>) -> Result<(), EngineError> {
        let count = u32::try_from(bodies.len()).map_err(|_| DeviceError::InvalidBufferSize)?;
        self.select_device()?;
        self.build_program(count)?;
        self.allocate(bodies)
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        self.require(&[SchedulerState::BuffersAllocated], "start")?;
        self.state = SchedulerState::Running;
        if let Some(simulation) = &self.simulation {
            info!(
                "Simulation {} running, {} per step",
                simulation.id(),
                format_elapsed(simulation.step_years() as f64)
            );
        }
        Ok(())
    }

    /// Launch the next step and enqueue its completion marker.
    ///
    /// A step still in flight is not launched again; only its marker is
    /// retried. A marker that cannot be enqueued after one retry is reported
    /// as `Transient` and the step stays in flight.
    pub fn begin_step(&mut self) -> Result<(), EngineError> {
        self.require(&[SchedulerState::Running], "step")?;
        let launched = {
            let context = self.active("step")?.context_mut();
            if context.is_in_flight() {
                Ok(())
            } else {
                context.launch()
            }
        };
        if let Err(e) = launched {
            return Err(self.fail(e.into()));
        }
        self.ensure_marker()
    }

    /// Wait for the in-flight step, swap, and hand the new read buffer to
    /// `renderer`. `Ok(false)` when nothing was in flight.
    pub fn finish_step<R>(&mut self, renderer: &mut R) -> Result<bool, EngineError>
    where
        R: Renderer<DeviceBuffer<A>> + ?Sized,
    {
        self.require(&[SchedulerState::Running], "step")?;
        if !self.complete_in_flight()? {
            return Ok(false);
        }

        let simulation = self.active("step")?;
        let buffers = simulation.context().buffers();
        renderer.present(Frame {
            buffer: buffers.read_buffer(),
            role: buffers.read_role(),
            body_count: buffers.body_count(),
            step: simulation.elapsed_steps(),
            elapsed_years: simulation.elapsed_years(),
        });
        Ok(true)
    }

    /// One full step. A missing marker is retried once more while finishing.
    pub fn step<R>(&mut self, renderer: &mut R) -> Result<(), EngineError>
    where
        R: Renderer<DeviceBuffer<A>> + ?Sized,
    {
        match self.begin_step() {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => debug!("Deferring marker to step completion: {e}"),
            Err(e) => return Err(e),
        }
        self.finish_step(renderer).map(|_| ())
    }

    /// Step until `max_steps` steps completed or `stop` is requested.
    /// Returns the number of steps completed by this call.
    pub fn run<R>(
        &mut self,
        renderer: &mut R,
        max_steps: Option<u64>,
        stop: &StopHandle,
    ) -> Result<u64, EngineError>
    where
        R: Renderer<DeviceBuffer<A>> + ?Sized,
    {
        let mut completed = 0;
        let mut failures = 0;
        while !stop.is_stop_requested() && max_steps.is_none_or(|max| completed < max) {
            match self.step(renderer) {
                Ok(()) => {
                    completed += 1;
                    failures = 0;
                }
                Err(e) if e.is_recoverable() && failures < MAX_TRANSIENT_FAILURES => {
                    failures += 1;
                    warn!("Step {} delayed: {e}", self.elapsed_steps() + 1);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(completed)
    }

    /// Finish the in-flight step and go back to `BuffersAllocated`
    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.require(&[SchedulerState::Running], "pause")?;
        self.complete_in_flight()?;
        self.state = SchedulerState::BuffersAllocated;
        Ok(())
    }

    /// Finish the in-flight step, then release the simulation
    pub fn stop(&mut self) -> Result<(), EngineError> {
        self.require(
            &[SchedulerState::Running, SchedulerState::BuffersAllocated],
            "stop",
        )?;
        self.complete_in_flight()?;
        if let Some(simulation) = &self.simulation {
            info!(
                "Simulation {} stopped after {} steps ({})",
                simulation.id(),
                simulation.elapsed_steps(),
                simulation.elapsed_display()
            );
        }
        self.teardown();
        self.state = SchedulerState::Stopped;
        Ok(())
    }

    /// Release everything and go back to `Uninitialized`. A step still in
    /// flight is completed first; if it cannot be, nothing is released.
    pub fn reset(&mut self) -> Result<(), EngineError> {
        if self.state == SchedulerState::Running {
            self.complete_in_flight()?;
        }
        if self.state != SchedulerState::Uninitialized {
            debug!("Resetting scheduler from {}", self.state.name());
        }
        self.teardown();
        self.state = SchedulerState::Uninitialized;
        Ok(())
    }

    /// Current population, read back from the read buffer
    pub fn snapshot(&mut self) -> Result<Vec<Body>, EngineError> {
        self.require(
            &[SchedulerState::BuffersAllocated, SchedulerState::Running],
            "take a snapshot",
        )?;
        let downloaded = self.active("take a snapshot")?.context().download();
        downloaded.map_err(|e| self.fail(e.into()))
    }

    /// Tear down and start over with a new population (open file, new
    /// generation). Not while running.
    pub fn replace_bodies(&mut self, bodies: Vec<Body>) -> Result<(), EngineError> {
        if self.state == SchedulerState::Running {
            return Err(self.invalid("replace bodies").into());
        }
        self.reset()?;
        self.prepare(bodies)
    }

    /// Put the population the simulation started from back on the device
    pub fn restore_initial(&mut self) -> Result<(), EngineError> {
        self.require(&[SchedulerState::BuffersAllocated], "restore the initial bodies")?;
        let simulation = self.active("restore the initial bodies")?;
        let initial = simulation.initial_bodies().to_vec();
        simulation.context_mut().populate(&initial)?;
        simulation.reset_clock();
        info!("Simulation {} restored to its initial bodies", simulation.id());
        Ok(())
    }

    pub fn body(&mut self, index: usize) -> Result<Body, EngineError> {
        self.require(&[SchedulerState::BuffersAllocated], "read a body")?;
        let bodies = self.snapshot()?;
        bodies.get(index).copied().ok_or_else(|| {
            ConfigError::BodyIndexOutOfRange {
                index,
                count: bodies.len(),
            }
            .into()
        })
    }

    pub fn update_body(&mut self, index: usize, mut body: Body) -> Result<(), EngineError> {
        self.require(&[SchedulerState::BuffersAllocated], "edit a body")?;
        if !(body.mass.is_finite() && body.mass > 0.0) {
            return Err(ConfigError::NonPositiveMass {
                name: "body mass",
                value: body.mass,
            }
            .into());
        }
        let mut bodies = self.snapshot()?;
        let count = bodies.len();
        let Some(slot) = bodies.get_mut(index) else {
            return Err(ConfigError::BodyIndexOutOfRange { index, count }.into());
        };
        body.index = index as u32;
        *slot = body;
        self.active("edit a body")?.context_mut().populate(&bodies)
    }

    pub fn elapsed_steps(&self) -> u64 {
        self.simulation.as_ref().map_or(0, SimulationState::elapsed_steps)
    }

    pub fn elapsed_years(&self) -> f64 {
        self.simulation.as_ref().map_or(0.0, SimulationState::elapsed_years)
    }

    pub fn elapsed_display(&self) -> String {
        format_elapsed(self.elapsed_years())
    }

    fn plan(&mut self, body_count: u32) -> Result<Arc<CompiledProgram<A::Device>>, EngineError> {
        let device = Arc::clone(self.device.as_ref().ok_or(DeviceError::InvalidDevice)?);
        let dispatch = compute_dispatch(
            device.capabilities(),
            &device.kernel_capabilities(),
            &DispatchRequest::linear(body_count),
        )?;
        let program = self.negotiator.build_program(&device, &self.source, dispatch)?;
        self.planned_bodies = body_count;
        Ok(program)
    }

    fn create_simulation(
        &mut self,
        mut bodies: Vec<Body>,
    ) -> Result<SimulationState<A::Device>, EngineError> {
        let minimum = self.config.min_body_count.max(MIN_BODY_COUNT) as usize;
        if bodies.len() < minimum {
            return Err(ConfigError::TooFewBodies {
                required: minimum,
                found: bodies.len(),
            }
            .into());
        }
        let count = u32::try_from(bodies.len()).map_err(|_| DeviceError::InvalidBufferSize)?;
        reindex(&mut bodies);

        if count != self.planned_bodies {
            self.program = Some(self.plan(count)?);
        }
        let device = Arc::clone(self.device.as_ref().ok_or(DeviceError::InvalidDevice)?);
        let program = Arc::clone(self.program.as_ref().ok_or(DeviceError::InvalidProgram)?);

        let mut buffers = ParticleBufferSet::<A::Device>::allocate(&device, bodies.len())?;
        buffers.populate(&device, &bodies)?;
        let params = StepParams::new(self.config.step_years, self.config.softening, count);
        let context = SimulationContext::new(device, program, buffers, params);
        Ok(SimulationState::new(context, self.config.step_years, bodies))
    }

    fn ensure_marker(&mut self) -> Result<(), EngineError> {
        let context = self.active("step")?.context_mut();
        if context.has_marker() {
            return Ok(());
        }
        match context.mark() {
            Ok(()) => return Ok(()),
            Err(e) => warn!("Could not enqueue completion marker ({e}), retrying"),
        }
        spin_sleep::sleep(Duration::from_millis(MARKER_RETRY_DELAY_MS));
        context.mark().map_err(|e| {
            warn!("Completion marker failed again: {e}");
            EngineError::Transient(e)
        })
    }

    /// Await the in-flight step, swap and count it. `Ok(false)` when nothing
    /// was in flight.
    fn complete_in_flight(&mut self) -> Result<bool, EngineError> {
        let timeout = Duration::from_millis(self.config.marker_timeout_ms);
        if !self.active("complete a step")?.context().is_in_flight() {
            return Ok(false);
        }
        self.ensure_marker()?;

        let simulation = self.active("complete a step")?;
        let completed = simulation.context_mut().complete(timeout);
        match completed {
            Ok(true) => {
                simulation.record_step();
                Ok(true)
            }
            Ok(false) => {
                warn!(
                    "Step {} not complete after {} ms",
                    simulation.elapsed_steps() + 1,
                    timeout.as_millis()
                );
                Err(EngineError::Transient(DeviceError::CompletionTimeout))
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    fn active(&mut self, operation: &'static str) -> Result<&mut SimulationState<A::Device>, ConfigError> {
        let state = self.state.name();
        self.simulation
            .as_mut()
            .ok_or(ConfigError::InvalidState { operation, state })
    }

    fn require(&self, allowed: &[SchedulerState], operation: &'static str) -> Result<(), ConfigError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    fn invalid(&self, operation: &'static str) -> ConfigError {
        ConfigError::InvalidState {
            operation,
            state: self.state.name(),
        }
    }

    /// Enter `Error`, releasing the simulation. Device failures also drop
    /// the device and its programs from the negotiator's cache.
    fn fail(&mut self, err: EngineError) -> EngineError {
        error!("Simulation failed while {}: {err}", self.state.name());
        if matches!(err, EngineError::Device(_)) {
            if let Some(device) = &self.device {
                let caps = device.capabilities().clone();
                self.negotiator.evict(&caps);
            }
        }
        self.teardown();
        self.state = SchedulerState::Error;
        err
    }

    fn teardown(&mut self) {
        self.simulation = None;
        self.program = None;
        self.device = None;
        self.planned_bodies = 0;
    }
}
