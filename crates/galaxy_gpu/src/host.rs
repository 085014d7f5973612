use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytemuck::Zeroable;
use galaxy_core::*;
use galaxy_physics::forces;

use crate::backend::*;

/// Limits the host device reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
    pub max_work_group_size: u32,
    pub kernel_max_work_group_size: u32,
    pub local_memory_bytes: u64,
    pub max_buffer_bytes: u64,
    pub max_work_groups_per_dimension: u32,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            max_work_group_size: 256,
            kernel_max_work_group_size: 256,
            local_memory_bytes: 32 * 1024,
            max_buffer_bytes: 1 << 30,
            max_work_groups_per_dimension: 65_535,
        }
    }
}

/// CPU reference backend.
///
/// Runs the same softened all-pairs step as the WGSL kernel, synchronously
/// at enqueue time, and checks launches the way a driver would.
#[derive(Debug, Clone, Default)]
pub struct HostApi {
    limits: HostLimits,
}

impl HostApi {
    pub fn new(limits: HostLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &HostLimits {
        &self.limits
    }
}

impl ComputeApi for HostApi {
    type Device = HostDevice;

    fn name(&self) -> &'static str {
        "host"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>, DeviceError> {
        Ok(vec![PlatformInfo {
            index: 0,
            name: "Host".into(),
            devices: vec![DeviceInfo {
                index: 0,
                name: "Host reference device".into(),
                kind: "Cpu".into(),
            }],
        }])
    }

    fn open_device(&self, platform: usize, device: usize) -> Result<HostDevice, DeviceError> {
        if platform != 0 {
            return Err(DeviceError::InvalidPlatform);
        }
        if device != 0 {
            return Err(DeviceError::InvalidDevice);
        }
        let compute_units = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .ok();

        Ok(HostDevice {
            capabilities: DeviceCapabilities {
                platform,
                device,
                platform_name: "Host".into(),
                device_name: "Host reference device".into(),
                compute_units,
                max_work_group_size: self.limits.max_work_group_size,
                local_memory_bytes: self.limits.local_memory_bytes,
                max_buffer_bytes: self.limits.max_buffer_bytes,
                max_work_groups_per_dimension: self.limits.max_work_groups_per_dimension,
                max_work_dimensions: 3,
                extensions: Vec::new(),
            },
            kernel: ProgramCapabilities {
                kernel_max_work_group_size: self.limits.kernel_max_work_group_size,
            },
            submitted: AtomicU64::new(0),
        })
    }
}

#[derive(Debug)]
pub struct HostDevice {
    capabilities: DeviceCapabilities,
    kernel: ProgramCapabilities,
    submitted: AtomicU64,
}

#[derive(Debug)]
pub struct HostProgram {
    entry_point: String,
}

impl HostProgram {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

#[derive(Debug)]
pub struct HostBuffer {
    label: String,
    data: Mutex<Vec<GpuBody>>,
}

impl HostBuffer {
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Host work completes at enqueue, so a fence only records its position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostFence {
    pub submission: u64,
}

impl HostDevice {
    /// Launches executed so far
    pub fn submissions(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }
}

impl ComputeDevice for HostDevice {
    type Program = HostProgram;
    type Buffer = HostBuffer;
    type Fence = HostFence;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn kernel_capabilities(&self) -> ProgramCapabilities {
        self.kernel
    }

    fn compile(&self, source: &str, entry_point: &str) -> Result<HostProgram, BuildError> {
        if source.trim().is_empty() {
            return Err(BuildError {
                device: self.capabilities.to_string(),
                log: "error: program source is empty".into(),
            });
        }
        if !source.contains(&format!("fn {entry_point}(")) {
            return Err(BuildError {
                device: self.capabilities.to_string(),
                log: format!("error: entry point `{entry_point}` not found"),
            });
        }
        Ok(HostProgram {
            entry_point: entry_point.to_string(),
        })
    }

    fn create_buffer(&self, label: &str, bytes: u64) -> Result<HostBuffer, DeviceError> {
        if bytes == 0 || bytes > self.capabilities.max_buffer_bytes {
            return Err(DeviceError::InvalidBufferSize);
        }
        let len = (bytes / std::mem::size_of::<GpuBody>() as u64) as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| DeviceError::MemObjectAllocationFailure)?;
        data.resize(len, GpuBody::zeroed());

        Ok(HostBuffer {
            label: label.to_string(),
            data: Mutex::new(data),
        })
    }

    fn write_buffer(&self, buffer: &HostBuffer, bodies: &[GpuBody]) -> Result<(), DeviceError> {
        let mut data = buffer.data.lock().map_err(|_| DeviceError::InvalidMemObject)?;
        if bodies.len() > data.len() {
            return Err(DeviceError::InvalidValue);
        }
        data[..bodies.len()].copy_from_slice(bodies);
        Ok(())
    }

    fn read_buffer(&self, buffer: &HostBuffer, count: usize) -> Result<Vec<GpuBody>, DeviceError> {
        let data = buffer.data.lock().map_err(|_| DeviceError::InvalidMemObject)?;
        if count > data.len() {
            return Err(DeviceError::InvalidValue);
        }
        let mut out = Vec::new();
        out.try_reserve_exact(count)
            .map_err(|_| DeviceError::OutOfHostMemory)?;
        out.extend_from_slice(&data[..count]);
        Ok(out)
    }

    fn enqueue_kernel(
        &self,
        _program: &HostProgram,
        launch: &KernelLaunch<'_, HostBuffer>,
    ) -> Result<(), DeviceError> {
        let local = launch.dispatch.local_size;
        let global = launch.dispatch.global_size;
        let max_local = self
            .capabilities
            .max_work_group_size
            .min(self.kernel.kernel_max_work_group_size);
        if local == 0 || local > max_local || global % local != 0 {
            return Err(DeviceError::InvalidWorkGroupSize);
        }
        if global < launch.params.body_count
            || global / local > self.capabilities.max_work_groups_per_dimension
        {
            return Err(DeviceError::InvalidGlobalWorkSize);
        }
        if std::ptr::eq(launch.input, launch.output) {
            return Err(DeviceError::InvalidMemObject);
        }

        let input = launch.input.data.lock().map_err(|_| DeviceError::InvalidMemObject)?;
        let mut output = launch
            .output
            .data
            .lock()
            .map_err(|_| DeviceError::InvalidMemObject)?;
        let count = launch.params.body_count as usize;
        if count > input.len() || count > output.len() {
            return Err(DeviceError::InvalidArgValue);
        }

        forces::integrate(&input, &mut output, &launch.params);
        self.submitted.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn enqueue_marker(&self) -> Result<HostFence, DeviceError> {
        Ok(HostFence {
            submission: self.submissions(),
        })
    }

    fn await_completion(&self, fence: &HostFence, _timeout: Duration) -> Result<bool, DeviceError> {
        Ok(fence.submission <= self.submissions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatch;

    fn device() -> HostDevice {
        HostApi::default().open_device(0, 0).unwrap()
    }

    #[test]
    fn invalid_ids_are_rejected() {
        let api = HostApi::default();
        assert_eq!(api.open_device(1, 0).unwrap_err(), DeviceError::InvalidPlatform);
        assert_eq!(api.open_device(0, 3).unwrap_err(), DeviceError::InvalidDevice);
    }

    #[test]
    fn compile_reports_missing_entry_point() {
        let device = device();
        let err = device.compile("fn other() {}", KERNEL_ENTRY_POINT).unwrap_err();
        assert!(err.log.contains("`step`"));
        assert!(device.compile("fn step() {}", KERNEL_ENTRY_POINT).is_ok());
        assert!(device.compile("   ", KERNEL_ENTRY_POINT).is_err());
    }

    #[test]
    fn launch_checks_work_group_geometry() {
        let device = device();
        let program = device.compile("fn step() {}", KERNEL_ENTRY_POINT).unwrap();
        let a = device.create_buffer("a", 32 * 64).unwrap();
        let b = device.create_buffer("b", 32 * 64).unwrap();
        let launch = |local_size, global_size| KernelLaunch {
            input: &a,
            output: &b,
            dispatch: Dispatch {
                local_size,
                global_size,
            },
            params: StepParams::new(1.0, 0.05, 60),
        };

        assert_eq!(
            device.enqueue_kernel(&program, &launch(512, 512)).unwrap_err(),
            DeviceError::InvalidWorkGroupSize
        );
        assert_eq!(
            device.enqueue_kernel(&program, &launch(16, 40)).unwrap_err(),
            DeviceError::InvalidWorkGroupSize
        );
        assert_eq!(
            device.enqueue_kernel(&program, &launch(16, 48)).unwrap_err(),
            DeviceError::InvalidGlobalWorkSize
        );
        assert!(device.enqueue_kernel(&program, &launch(16, 64)).is_ok());
        assert_eq!(device.submissions(), 1);
    }

    #[test]
    fn oversized_buffer_is_rejected() {
        let api = HostApi::new(HostLimits {
            max_buffer_bytes: 1024,
            ..HostLimits::default()
        });
        let device = api.open_device(0, 0).unwrap();
        assert_eq!(
            device.create_buffer("big", 2048).unwrap_err(),
            DeviceError::InvalidBufferSize
        );
    }
}
