use std::sync::Arc;
use std::time::Duration;

use bevy::prelude::*;
use galaxy_core::*;

use crate::backend::{ComputeDevice, KernelLaunch};
use crate::buffers::ParticleBufferSet;
use crate::dispatch::Dispatch;
use crate::negotiator::CompiledProgram;

/// A launched step waiting for its completion marker
struct InFlight<F> {
    /// `None` while the marker could not be enqueued yet
    fence: Option<F>,
}

/// Everything one running simulation owns on the device.
///
/// Field order is release order: pending fence, buffers, program, then the
/// device and its queue.
pub struct SimulationContext<D: ComputeDevice> {
    in_flight: Option<InFlight<D::Fence>>,
    buffers: ParticleBufferSet<D>,
    program: Arc<CompiledProgram<D>>,
    device: Arc<D>,
    params: StepParams,
}

impl<D: ComputeDevice> SimulationContext<D> {
    pub fn new(
        device: Arc<D>,
        program: Arc<CompiledProgram<D>>,
        buffers: ParticleBufferSet<D>,
        params: StepParams,
    ) -> Self {
        Self {
            in_flight: None,
            buffers,
            program,
            device,
            params,
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn program(&self) -> &Arc<CompiledProgram<D>> {
        &self.program
    }

    pub fn buffers(&self) -> &ParticleBufferSet<D> {
        &self.buffers
    }

    pub fn dispatch(&self) -> Dispatch {
        self.program.dispatch()
    }

    pub fn params(&self) -> &StepParams {
        &self.params
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Whether the in-flight step has its completion marker
    pub fn has_marker(&self) -> bool {
        matches!(self.in_flight, Some(InFlight { fence: Some(_) }))
    }

    /// Launch one step reading the read buffer and writing the write buffer
    pub fn launch(&mut self) -> Result<(), DeviceError> {
        if self.in_flight.is_some() {
            return Err(DeviceError::InvalidOperation);
        }
        let launch = KernelLaunch {
            input: self.buffers.read_buffer(),
            output: self.buffers.write_buffer(),
            dispatch: self.program.dispatch(),
            params: self.params,
        };
        self.device.enqueue_kernel(self.program.program(), &launch)?;
        self.in_flight = Some(InFlight { fence: None });
        Ok(())
    }

    /// Enqueue the completion marker for the in-flight step
    pub fn mark(&mut self) -> Result<(), DeviceError> {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return Err(DeviceError::InvalidEvent);
        };
        if in_flight.fence.is_none() {
            in_flight.fence = Some(self.device.enqueue_marker()?);
        }
        Ok(())
    }

    /// Wait for the in-flight step and swap on completion.
    ///
    /// `Ok(false)` means the timeout expired; the step stays in flight.
    pub fn complete(&mut self, timeout: Duration) -> Result<bool, DeviceError> {
        let Some(in_flight) = self.in_flight.as_ref() else {
            return Ok(true);
        };
        let Some(fence) = in_flight.fence.as_ref() else {
            return Err(DeviceError::InvalidEvent);
        };
        if !self.device.await_completion(fence, timeout)? {
            return Ok(false);
        }
        self.in_flight = None;
        self.buffers.swap();
        Ok(true)
    }

    /// Upload a whole population and make it current. Not while a step is
    /// in flight.
    pub fn populate(&mut self, bodies: &[Body]) -> Result<(), EngineError> {
        if self.in_flight.is_some() {
            return Err(DeviceError::InvalidOperation.into());
        }
        self.buffers.populate(&self.device, bodies)
    }

    pub fn download(&self) -> Result<Vec<Body>, DeviceError> {
        self.buffers.download(&self.device)
    }
}

impl<D: ComputeDevice> Drop for SimulationContext<D> {
    fn drop(&mut self) {
        if self.in_flight.is_some() {
            warn!("Releasing compute context with a step still in flight");
        }
        debug!(
            "Releasing compute context on {} ({} bodies)",
            self.device.capabilities(),
            self.buffers.body_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostApi, HostDevice};
    use crate::negotiator::{DeviceCapabilityNegotiator, ProgramSource};

    fn context(n: usize) -> SimulationContext<HostDevice> {
        let mut negotiator = DeviceCapabilityNegotiator::new(HostApi::default());
        let device = negotiator.select_device(0, 0).unwrap();
        let dispatch = crate::dispatch::compute_dispatch(
            device.capabilities(),
            &device.kernel_capabilities(),
            &crate::dispatch::DispatchRequest::linear(n as u32),
        )
        .unwrap();
        let program = negotiator
            .build_program(&device, &ProgramSource::builtin(), dispatch)
            .unwrap();
        let buffers = ParticleBufferSet::allocate(device.as_ref(), n).unwrap();
        SimulationContext::new(device, program, buffers, StepParams::new(DT_YEARS, SOFTENING, n as u32))
    }

    #[test]
    fn step_swaps_only_after_completion() {
        let mut ctx = context(4);
        let bodies: Vec<Body> = (0..4)
            .map(|i| Body::new(i, [i as f32, 0.0, 0.0], [0.0; 3], 10.0))
            .collect();
        ctx.populate(&bodies).unwrap();
        let role = ctx.buffers().read_role();

        ctx.launch().unwrap();
        assert!(ctx.is_in_flight());
        assert_eq!(ctx.buffers().read_role(), role);
        assert_eq!(ctx.launch().unwrap_err(), DeviceError::InvalidOperation);

        // No marker yet
        assert_eq!(
            ctx.complete(Duration::from_millis(1)).unwrap_err(),
            DeviceError::InvalidEvent
        );
        ctx.mark().unwrap();
        assert!(ctx.complete(Duration::from_millis(1)).unwrap());
        assert_eq!(ctx.buffers().read_role(), role.other());
        assert!(!ctx.is_in_flight());
    }

    #[test]
    fn populate_refused_while_in_flight() {
        let mut ctx = context(2);
        ctx.launch().unwrap();
        assert!(ctx.populate(&[]).is_err());
    }

    #[test]
    fn marker_without_launch_is_invalid() {
        let mut ctx = context(2);
        assert_eq!(ctx.mark().unwrap_err(), DeviceError::InvalidEvent);
    }
}
