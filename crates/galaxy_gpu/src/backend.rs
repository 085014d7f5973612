use std::fmt;
use std::time::Duration;

use galaxy_core::{BuildError, DeviceError, GpuBody, StepParams};

use crate::dispatch::Dispatch;

/// One compute platform (a wgpu backend, or the host) and its devices
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformInfo {
    pub index: usize,
    pub name: String,
    pub devices: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub kind: String,
}

/// Limits of an opened device. Immutable once queried.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCapabilities {
    pub platform: usize,
    pub device: usize,
    pub platform_name: String,
    pub device_name: String,
    /// Not every API reports it
    pub compute_units: Option<u32>,
    pub max_work_group_size: u32,
    pub local_memory_bytes: u64,
    pub max_buffer_bytes: u64,
    pub max_work_groups_per_dimension: u32,
    pub max_work_dimensions: u32,
    pub extensions: Vec<String>,
}

impl DeviceCapabilities {
    /// Stable identifier used as the program cache key
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.platform, self.device, self.device_name)
    }
}

impl fmt::Display for DeviceCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device_name, self.platform_name)
    }
}

/// Limits the force kernel itself imposes on a launch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramCapabilities {
    pub kernel_max_work_group_size: u32,
}

/// Everything one kernel launch needs
#[derive(Debug)]
pub struct KernelLaunch<'a, B> {
    pub input: &'a B,
    pub output: &'a B,
    pub dispatch: Dispatch,
    pub params: StepParams,
}

/// Entry point into a compute API: enumerates platforms and opens devices
pub trait ComputeApi: Send + Sync + 'static {
    type Device: ComputeDevice;

    fn name(&self) -> &'static str;

    fn platforms(&self) -> Result<Vec<PlatformInfo>, DeviceError>;

    fn open_device(&self, platform: usize, device: usize) -> Result<Self::Device, DeviceError>;
}

/// An opened device with its in-order queue.
///
/// Launches and markers are asynchronous; `await_completion` is the only call
/// that blocks on queued work, and it is bounded by its timeout.
pub trait ComputeDevice: Send + Sync + 'static {
    type Program: Send + Sync + 'static;
    type Buffer: Send + Sync + 'static;
    type Fence: Send + Sync + 'static;

    fn capabilities(&self) -> &DeviceCapabilities;

    fn kernel_capabilities(&self) -> ProgramCapabilities;

    fn compile(&self, source: &str, entry_point: &str) -> Result<Self::Program, BuildError>;

    fn create_buffer(&self, label: &str, bytes: u64) -> Result<Self::Buffer, DeviceError>;

    fn write_buffer(&self, buffer: &Self::Buffer, bodies: &[GpuBody]) -> Result<(), DeviceError>;

    fn read_buffer(&self, buffer: &Self::Buffer, count: usize) -> Result<Vec<GpuBody>, DeviceError>;

    fn enqueue_kernel(
        &self,
        program: &Self::Program,
        launch: &KernelLaunch<'_, Self::Buffer>,
    ) -> Result<(), DeviceError>;

    /// Marker completing once all previously enqueued work has finished
    fn enqueue_marker(&self) -> Result<Self::Fence, DeviceError>;

    /// `Ok(true)` once the fence completed, `Ok(false)` on timeout
    fn await_completion(&self, fence: &Self::Fence, timeout: Duration) -> Result<bool, DeviceError>;
}
